use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::error::MatchingError;
use crate::config::BackendConfig;
use crate::models::{MatchResults, Trial, TrialCatalog};

/// One `/results/{trial_id}` answer.
#[derive(Debug, Clone, PartialEq)]
pub enum PollResponse {
    Ready(MatchResults),
    /// HTTP 404: the backend has not finished yet.
    NotReady,
}

/// Answer to `/match/trial_json`.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentMatchOutcome {
    /// The backend matched synchronously.
    Results(MatchResults),
    /// Matching was accepted; results, if any, must be polled under `trial_id`.
    Accepted { trial_id: Option<String> },
}

impl DocumentMatchOutcome {
    /// Classify a response body: it carries results when either patient list
    /// is present, otherwise a `trial_id` or `nct_id` may identify the run.
    pub fn from_response(body: Value) -> Result<Self, MatchingError> {
        let has_results = ["matching_patients", "non_matching_patients"]
            .iter()
            .any(|key| body.get(*key).is_some_and(|v| !v.is_null()));

        if has_results {
            let results = serde_json::from_value(body)
                .map_err(|e| MatchingError::ResponseParsing(e.to_string()))?;
            return Ok(Self::Results(results));
        }

        let trial_id = ["trial_id", "nct_id"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        Ok(Self::Accepted { trial_id })
    }
}

/// HTTP contract of the matching backend.
#[async_trait]
pub trait MatchingApi: Send + Sync {
    /// `GET /trials`
    async fn list_trials(&self) -> Result<Vec<Trial>, MatchingError>;

    /// `POST /match/trial`. Returns the backend's opaque acknowledgement.
    async fn submit_trial(
        &self,
        trial_id: &str,
        patients_dir: Option<&str>,
    ) -> Result<Value, MatchingError>;

    /// `POST /match/trial_json` with the full trial definition.
    async fn submit_trial_document(
        &self,
        document: &Value,
    ) -> Result<DocumentMatchOutcome, MatchingError>;

    /// `GET /results/{trial_id}`. A 404 maps to `PollResponse::NotReady`.
    async fn fetch_results(&self, trial_id: &str) -> Result<PollResponse, MatchingError>;
}

/// Request body for `/match/trial`
#[derive(Serialize)]
struct SubmitTrialRequest<'a> {
    trial_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    patients_dir: Option<&'a str>,
}

/// reqwest-backed client for the matching backend.
pub struct HttpMatchingApi {
    base_url: Url,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpMatchingApi {
    pub fn new(config: &BackendConfig) -> Result<Self, MatchingError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| MatchingError::HttpClient(format!("Invalid API URL {}: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(MatchingError::HttpClient(format!(
                "Invalid API URL {}: cannot be a base",
                config.base_url
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| MatchingError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url,
            client,
            timeout_secs: config.request_timeout.as_secs(),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Append path segments to the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn send_error(&self, e: reqwest::Error) -> MatchingError {
        if e.is_timeout() {
            MatchingError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            MatchingError::Connection(self.base_url().to_string())
        } else {
            MatchingError::HttpClient(e.to_string())
        }
    }

    async fn get(&self, segments: &[&str]) -> Result<reqwest::Response, MatchingError> {
        let url = self.url(segments);
        tracing::debug!(%url, "GET");
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| self.send_error(e))
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<reqwest::Response, MatchingError> {
        let url = self.url(segments);
        tracing::debug!(%url, "POST");
        self.client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.send_error(e))
    }

    /// Turn a non-2xx response into `MatchingError::Api`.
    async fn ensure_success(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, MatchingError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(MatchingError::Api {
            status: status.as_u16(),
            message: error_message(status, &body),
        })
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, MatchingError> {
        response.json().await.map_err(|e| {
            if e.is_timeout() {
                MatchingError::Timeout(self.timeout_secs)
            } else {
                MatchingError::ResponseParsing(e.to_string())
            }
        })
    }
}

/// Message for a failed call: the server's `detail` when present, otherwise
/// the status code and reason.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").cloned());

    match detail {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        Some(Value::Null) | Some(Value::String(_)) | None => {
            let reason = status.canonical_reason().unwrap_or_default();
            format!("API request failed: {} {reason}", status.as_u16())
                .trim_end()
                .to_string()
        }
        Some(other) => other.to_string(),
    }
}

#[async_trait]
impl MatchingApi for HttpMatchingApi {
    async fn list_trials(&self) -> Result<Vec<Trial>, MatchingError> {
        let response = self.get(&["trials"]).await?;
        let response = self.ensure_success(response).await?;
        let catalog: TrialCatalog = self.read_json(response).await?;
        tracing::info!(count = catalog.trials.len(), "Trial catalog received");
        Ok(catalog.trials)
    }

    async fn submit_trial(
        &self,
        trial_id: &str,
        patients_dir: Option<&str>,
    ) -> Result<Value, MatchingError> {
        let body = SubmitTrialRequest { trial_id, patients_dir };
        let response = self.post(&["match", "trial"], &body).await?;
        let response = self.ensure_success(response).await?;

        // The acknowledgement is opaque; tolerate an empty or non-JSON body.
        let text = response.text().await.map_err(|e| self.send_error(e))?;
        Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
    }

    async fn submit_trial_document(
        &self,
        document: &Value,
    ) -> Result<DocumentMatchOutcome, MatchingError> {
        let response = self.post(&["match", "trial_json"], document).await?;
        let response = self.ensure_success(response).await?;
        let body: Value = self.read_json(response).await?;
        DocumentMatchOutcome::from_response(body)
    }

    async fn fetch_results(&self, trial_id: &str) -> Result<PollResponse, MatchingError> {
        let response = self.get(&["results", trial_id]).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(PollResponse::NotReady);
        }
        let response = self.ensure_success(response).await?;
        let results = self.read_json(response).await?;
        Ok(PollResponse::Ready(results))
    }
}

#[cfg(test)]
pub use mock::{ApiCall, ScriptedApi};
