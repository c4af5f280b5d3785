use std::time::Duration;

use crate::models::Trial;

/// Application-level constants
pub const APP_NAME: &str = "Trial Match";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Backend origin used when nothing else is configured.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// Environment variable that overrides the backend origin.
pub const API_URL_ENV: &str = "TRIALMATCH_API_URL";

/// Patient data directory hint sent with every match-by-id request.
pub const DEFAULT_PATIENTS_DIR: &str = "data/patients";

/// Poll `/results/{id}` at most this many times.
pub const POLLING_ATTEMPTS: u32 = 15;

/// Wait between two poll attempts.
pub const POLLING_INTERVAL_MS: u64 = 8000;

pub const REQUEST_TIMEOUT_SECS: u64 = 30;
pub const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Trial offered when the catalog cannot be fetched, and run by the sample match.
pub const SAMPLE_TRIAL_ID: &str = "NCT06238479";
pub const SAMPLE_TRIAL_TITLE: &str =
    "A Study of LY4101174 in Participants With Recurrent, Advanced or Metastatic Solid Tumors";

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,trialmatch_lib=debug"
}

/// The built-in sample trial.
pub fn sample_trial() -> Trial {
    Trial::new(SAMPLE_TRIAL_ID, SAMPLE_TRIAL_TITLE)
}

/// Everything the workflow needs to know about the matching backend.
///
/// Injected into the HTTP client and the controller at construction time so
/// tests can point them at a local mock server and shrink the poll budget.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend origin without trailing slash.
    pub base_url: String,
    /// `patients_dir` hint for `/match/trial`. `None` omits the field.
    pub patients_dir: Option<String>,
    /// Maximum number of `/results/{id}` requests per run (at least 1).
    pub poll_attempts: u32,
    /// Wait between two poll attempts.
    pub poll_interval: Duration,
    /// Whole-request timeout for every HTTP call.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Degraded-mode entry shown when the catalog fetch fails.
    pub fallback_trial: Option<Trial>,
}

impl BackendConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            patients_dir: Some(DEFAULT_PATIENTS_DIR.to_string()),
            poll_attempts: POLLING_ATTEMPTS,
            poll_interval: Duration::from_millis(POLLING_INTERVAL_MS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            fallback_trial: Some(sample_trial()),
        }
    }

    /// Read the backend origin from `TRIALMATCH_API_URL`, falling back to
    /// `http://localhost:8000`.
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(API_URL_ENV).ok())
    }

    fn from_env_value(value: Option<String>) -> Self {
        match value.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Self::new(url),
            _ => Self::default(),
        }
    }

    pub fn with_patients_dir(mut self, patients_dir: Option<String>) -> Self {
        self.patients_dir = patients_dir.filter(|d| !d.trim().is_empty());
        self
    }

    pub fn with_polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.poll_attempts = attempts.max(1);
        self.poll_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn without_fallback_trial(mut self) -> Self {
        self.fallback_trial = None;
        self
    }

    /// Full URL for an API path such as `/trials`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE_URL)
    }
}
