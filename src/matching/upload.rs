//! Trial-definition uploads: declared-type check, async read, JSON parse.

use std::path::PathBuf;

use serde_json::Value;

use super::error::MatchingError;
use crate::models::TrialDocument;

pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone)]
enum UploadSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// A user-supplied file claimed to hold a JSON trial definition.
#[derive(Debug, Clone)]
pub struct TrialUpload {
    pub file_name: String,
    /// Declared media type, e.g. `application/json`.
    pub content_type: String,
    source: UploadSource,
}

impl TrialUpload {
    /// Upload from disk; the declared type is guessed from the extension.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content_type = mime_guess::from_path(&path)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string();

        Self {
            file_name,
            content_type,
            source: UploadSource::Path(path),
        }
    }

    /// Upload whose content is already in memory.
    pub fn from_bytes(file_name: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            source: UploadSource::Bytes(bytes),
        }
    }

    /// Declared type is `application/json`, ignoring parameters and case.
    pub fn is_json(&self) -> bool {
        self.content_type
            .split(';')
            .next()
            .map(str::trim)
            .is_some_and(|essence| essence.eq_ignore_ascii_case(JSON_CONTENT_TYPE))
    }

    async fn read_text(self) -> Result<String, MatchingError> {
        match self.source {
            UploadSource::Path(path) => tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| MatchingError::FileRead(format!("{}: {e}", path.display()))),
            UploadSource::Bytes(bytes) => {
                String::from_utf8(bytes).map_err(|e| MatchingError::FileRead(e.to_string()))
            }
        }
    }
}

/// Validate, read and parse an upload into a `TrialDocument`.
///
/// The type check happens before anything is read.
pub async fn read_trial_document(upload: TrialUpload) -> Result<TrialDocument, MatchingError> {
    if !upload.is_json() {
        return Err(MatchingError::UnsupportedFileType {
            content_type: upload.content_type,
        });
    }

    let file_name = upload.file_name.clone();
    let text = upload.read_text().await?;
    let text = text.trim_start_matches('\u{feff}');

    let value: Value =
        serde_json::from_str(text).map_err(|e| MatchingError::InvalidJson(e.to_string()))?;

    match value {
        Value::Object(object) => {
            let document = TrialDocument::from_object(&file_name, object);
            if document.nct_id.is_none() {
                tracing::warn!(file = %file_name, "Uploaded trial has no nct_id; it will be matched by document");
            }
            Ok(document)
        }
        other => Err(MatchingError::InvalidJson(format!(
            "expected a JSON object, found {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
