//! Error taxonomy for the matching workflow.
//!
//! Validation errors never reach the network. API and transport errors end the
//! current run. Only a 404 while polling is retried, and it is handled by the
//! poller before it ever becomes a `MatchingError`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchingError {
    // ── Validation ──────────────────────────────────────────
    #[error("No trial selected or uploaded. Please select or upload a trial first.")]
    NoTrialSelected,

    #[error("Trial {0} is not in the trial list.")]
    UnknownTrial(String),

    #[error("Please upload a valid JSON file. Other file formats are not supported.")]
    UnsupportedFileType { content_type: String },

    #[error("Failed to read the uploaded file.")]
    FileRead(String),

    #[error("Invalid JSON format: {0}")]
    InvalidJson(String),

    #[error("A matching run is already in progress.")]
    RunInProgress,

    // ── Transport / API ─────────────────────────────────────
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Cannot reach the matching backend at {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    // ── Workflow ────────────────────────────────────────────
    #[error("Matching initiated via JSON upload, but no results returned directly and no ID available for polling.")]
    NoPollingIdentifier,

    #[error("Results for {trial_id} not available after {attempts} attempts.")]
    PollingExhausted { trial_id: String, attempts: u32 },

    #[error("Polling failed for {trial_id}: {source}")]
    PollingFailed {
        trial_id: String,
        #[source]
        source: Box<MatchingError>,
    },

    /// The trial input changed while the run was in flight.
    #[error("Matching run superseded by a newer trial selection")]
    Superseded,
}

impl MatchingError {
    /// Rejected locally, before any request was sent.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NoTrialSelected
                | Self::UnknownTrial(_)
                | Self::UnsupportedFileType { .. }
                | Self::FileRead(_)
                | Self::InvalidJson(_)
                | Self::RunInProgress
        )
    }

    /// HTTP status carried by an API error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::PollingFailed { source, .. } => source.status(),
            _ => None,
        }
    }
}
