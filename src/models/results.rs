use serde::{Deserialize, Serialize};

use super::null_as_default;
use super::patient::PatientRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSummary {
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_matching_patients: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_evaluated: u32,
}

impl MatchSummary {
    /// Fraction of evaluated patients that match; `None` when nobody was evaluated.
    pub fn match_rate(&self) -> Option<f64> {
        if self.total_evaluated == 0 {
            return None;
        }
        Some(f64::from(self.total_matching_patients) / f64::from(self.total_evaluated))
    }
}

/// Body of `GET /results/{trial_id}`. The backend partitions patients; the
/// two lists are kept in the order received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchResults {
    #[serde(default, deserialize_with = "null_as_default")]
    pub summary: MatchSummary,
    #[serde(default, deserialize_with = "null_as_default")]
    pub matching_patients: Vec<PatientRecord>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub non_matching_patients: Vec<PatientRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial_id: Option<String>,
}
