use std::fmt;

use serde::{Deserialize, Serialize};

use super::null_as_default;

/// Criteria tally for one patient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriteriaSummary {
    #[serde(default, deserialize_with = "null_as_default")]
    pub total: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub met: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub not_met: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub unsure: u32,
}

impl CriteriaSummary {
    /// `met + not_met + unsure == total`.
    pub fn is_consistent(&self) -> bool {
        u64::from(self.met) + u64::from(self.not_met) + u64::from(self.unsure)
            == u64::from(self.total)
    }

    /// Denominator for percentages; never zero.
    pub fn denominator(&self) -> u32 {
        self.total.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionReasoning {
    #[serde(default, deserialize_with = "null_as_default")]
    pub criterion: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reasoning: String,
}

/// Per-criterion reasoning, split by outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityDetails {
    #[serde(default, deserialize_with = "null_as_default")]
    pub met: Vec<CriterionReasoning>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub not_met: Vec<CriterionReasoning>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub unsure: Vec<CriterionReasoning>,
}

impl EligibilityDetails {
    pub fn is_empty(&self) -> bool {
        self.met.is_empty() && self.not_met.is_empty() && self.unsure.is_empty()
    }
}

/// The backend sends the priority factor either as a number or a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriorityFactor {
    Number(f64),
    Text(String),
}

impl fmt::Display for PriorityFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One evaluated patient's match outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    #[serde(default)]
    pub patient_id: Option<String>,
    /// 0–100.
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub eligible: Option<bool>,
    /// Kilometres to the trial site.
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub priority_factor: Option<PriorityFactor>,
    #[serde(default)]
    pub criteria_summary: Option<CriteriaSummary>,
    #[serde(default)]
    pub rejection_reasons: Option<Vec<String>>,
    #[serde(default)]
    pub eligibility_details: Option<EligibilityDetails>,
}

impl PatientRecord {
    pub fn patient_id(&self) -> &str {
        match self.patient_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => "Unknown",
        }
    }

    pub fn score(&self) -> f64 {
        self.score.filter(|s| s.is_finite()).unwrap_or(0.0)
    }

    pub fn is_eligible(&self) -> bool {
        self.eligible.unwrap_or(false)
    }

    pub fn criteria(&self) -> CriteriaSummary {
        self.criteria_summary.unwrap_or_default()
    }

    pub fn rejection_reasons(&self) -> &[String] {
        self.rejection_reasons.as_deref().unwrap_or(&[])
    }
}
