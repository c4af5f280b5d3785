use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::null_as_default;

/// Identifier shown for an uploaded definition that carries no `nct_id`.
pub const CUSTOM_TRIAL_ID: &str = "custom-trial";

/// A trial as listed by `GET /trials`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trial {
    pub nct_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
}

impl Trial {
    pub fn new(nct_id: &str, title: &str) -> Self {
        Self {
            nct_id: nct_id.to_string(),
            title: title.to_string(),
        }
    }
}

/// Response body of `GET /trials`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrialCatalog {
    #[serde(default, deserialize_with = "null_as_default")]
    pub trials: Vec<Trial>,
}

/// A parsed trial-definition file.
///
/// `body` is forwarded verbatim to `/match/trial_json`; the other fields are
/// what the workflow needs to display and route it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialDocument {
    pub file_name: String,
    pub nct_id: Option<String>,
    pub title: String,
    #[serde(skip_serializing)]
    pub body: Value,
}

impl TrialDocument {
    /// Build from a JSON object, reading `nct_id` and the first non-empty of
    /// `brief_title`, `official_title`, `title`, else the file name.
    pub fn from_object(file_name: &str, object: Map<String, Value>) -> Self {
        let nct_id = non_empty_str(object.get("nct_id")).map(str::to_string);
        let title = ["brief_title", "official_title", "title"]
            .iter()
            .find_map(|key| non_empty_str(object.get(*key)))
            .unwrap_or(file_name)
            .to_string();

        Self {
            file_name: file_name.to_string(),
            nct_id,
            title,
            body: Value::Object(object),
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// The trial the next run is for. Catalog selection and upload are
/// mutually exclusive by construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ActiveTrial {
    Catalog(Trial),
    Uploaded(TrialDocument),
}

impl ActiveTrial {
    /// Identifier usable with `/match/trial` and `/results/{id}`, if any.
    pub fn trial_id(&self) -> Option<&str> {
        match self {
            Self::Catalog(trial) => Some(&trial.nct_id),
            Self::Uploaded(doc) => doc.nct_id.as_deref(),
        }
    }

    pub fn display_id(&self) -> &str {
        self.trial_id().unwrap_or(CUSTOM_TRIAL_ID)
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Catalog(trial) => &trial.title,
            Self::Uploaded(doc) => &doc.title,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::Uploaded(_))
    }
}
