//! Matching workflow controller: owns the demo state and runs the
//! submit → poll → results cycle.
//!
//! **Design**:
//! - State lives behind one `std::sync::Mutex`, never held across an `.await`
//! - Every trial input change bumps a generation counter; a run remembers the
//!   generation it started under (its run token) and drops any answer that
//!   arrives after the counter has moved on
//! - `run_matching` is refused while another run is submitting or polling
//! - `snapshot()` is the read model for whatever shell renders the workflow

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use super::api::{DocumentMatchOutcome, HttpMatchingApi, MatchingApi};
use super::clock::{Sleeper, TokioSleeper};
use super::error::MatchingError;
use super::poller::{PollPolicy, ResultsPoller};
use super::upload::{read_trial_document, TrialUpload};
use crate::config::{self, BackendConfig};
use crate::models::{ActiveTrial, MatchResults, Trial};

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    /// No trial chosen yet.
    Idle,
    TrialChosen,
    Submitting,
    Polling,
    ResultsReady,
    Failed,
}

impl WorkflowStage {
    /// A run is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Submitting | Self::Polling)
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::TrialChosen => write!(f, "Trial chosen"),
            Self::Submitting => write!(f, "Submitting"),
            Self::Polling => write!(f, "Polling"),
            Self::ResultsReady => write!(f, "Results ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Read-only copy of the workflow state.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSnapshot {
    pub stage: WorkflowStage,
    pub catalog: Vec<Trial>,
    pub catalog_loading: bool,
    pub active_trial: Option<ActiveTrial>,
    pub results: Option<MatchResults>,
    /// User-visible error message.
    pub error: Option<String>,
    /// User-visible progress or success message.
    pub notice: Option<String>,
    pub run_started_at: Option<DateTime<Utc>>,
    pub run_finished_at: Option<DateTime<Utc>>,
}

impl WorkflowSnapshot {
    /// The run action is available.
    pub fn can_run(&self) -> bool {
        self.active_trial.is_some() && !self.stage.is_busy()
    }
}

#[derive(Debug)]
struct WorkflowState {
    stage: WorkflowStage,
    catalog: Vec<Trial>,
    catalog_loading: bool,
    active: Option<ActiveTrial>,
    results: Option<MatchResults>,
    error: Option<String>,
    notice: Option<String>,
    /// Bumped on every trial input change.
    generation: u64,
    run_started_at: Option<DateTime<Utc>>,
    run_finished_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    fn new() -> Self {
        Self {
            stage: WorkflowStage::Idle,
            catalog: Vec::new(),
            catalog_loading: false,
            active: None,
            results: None,
            error: None,
            notice: None,
            generation: 0,
            run_started_at: None,
            run_finished_at: None,
        }
    }

    /// Make `trial` the active input and drop everything derived from the old one.
    fn activate(&mut self, trial: ActiveTrial) {
        self.active = Some(trial);
        self.results = None;
        self.error = None;
        self.notice = None;
        self.stage = WorkflowStage::TrialChosen;
        self.generation += 1;
    }
}

// ═══════════════════════════════════════════════════════════
// WorkflowController
// ═══════════════════════════════════════════════════════════

pub struct WorkflowController<A: MatchingApi, S: Sleeper = TokioSleeper> {
    api: A,
    sleeper: S,
    config: BackendConfig,
    state: Mutex<WorkflowState>,
}

impl WorkflowController<HttpMatchingApi, TokioSleeper> {
    /// Controller talking HTTP to `config.base_url` with real waits.
    pub fn connect(config: BackendConfig) -> Result<Self, MatchingError> {
        let api = HttpMatchingApi::new(&config)?;
        Ok(Self::new(api, TokioSleeper, config))
    }
}

impl<A: MatchingApi, S: Sleeper> WorkflowController<A, S> {
    pub fn new(api: A, sleeper: S, config: BackendConfig) -> Self {
        Self {
            api,
            sleeper,
            config,
            state: Mutex::new(WorkflowState::new()),
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        let state = self.lock();
        WorkflowSnapshot {
            stage: state.stage,
            catalog: state.catalog.clone(),
            catalog_loading: state.catalog_loading,
            active_trial: state.active.clone(),
            results: state.results.clone(),
            error: state.error.clone(),
            notice: state.notice.clone(),
            run_started_at: state.run_started_at,
            run_finished_at: state.run_finished_at,
        }
    }

    pub fn stage(&self) -> WorkflowStage {
        self.lock().stage
    }

    // ── Catalog ─────────────────────────────────────────────

    /// Fetch the trial list once and replace the catalog with it.
    ///
    /// On failure the catalog holds only the configured fallback trial (if
    /// any) and the error is both returned and recorded for display.
    /// A reload leaves the error of a failed run in place.
    pub async fn load_catalog(&self) -> Result<usize, MatchingError> {
        {
            let mut state = self.lock();
            state.catalog_loading = true;
            // A failed run keeps its message until the next input change or run.
            if state.stage != WorkflowStage::Failed {
                state.error = None;
            }
        }

        let fetched = self.api.list_trials().await;

        let mut state = self.lock();
        state.catalog_loading = false;
        match fetched {
            Ok(trials) => {
                tracing::info!(count = trials.len(), "Trial catalog loaded");
                state.catalog = trials;
                Ok(state.catalog.len())
            }
            Err(e) => {
                tracing::warn!(error = %e, base_url = %self.config.base_url, "Trial catalog unavailable");
                state.error = Some(format!(
                    "Failed to connect to API: {e}. Is the backend running at {}?",
                    self.config.base_url
                ));
                state.catalog = self.config.fallback_trial.iter().cloned().collect();
                if let Some(fallback) = &self.config.fallback_trial {
                    tracing::info!(trial_id = %fallback.nct_id, "Offering offline fallback trial");
                }
                Err(e)
            }
        }
    }

    // ── Trial input ─────────────────────────────────────────

    /// Make the catalog trial `trial_id` the active input.
    pub fn select_trial(&self, trial_id: &str) -> Result<Trial, MatchingError> {
        let mut state = self.lock();
        let Some(trial) = state.catalog.iter().find(|t| t.nct_id == trial_id).cloned() else {
            let err = MatchingError::UnknownTrial(trial_id.to_string());
            state.error = Some(err.to_string());
            return Err(err);
        };

        tracing::info!(trial_id, "Trial selected");
        state.activate(ActiveTrial::Catalog(trial.clone()));
        Ok(trial)
    }

    /// Make an uploaded trial definition the active input.
    ///
    /// Nothing but the error message changes when the upload is rejected.
    pub async fn upload_trial(&self, upload: TrialUpload) -> Result<ActiveTrial, MatchingError> {
        let file_name = upload.file_name.clone();
        match read_trial_document(upload).await {
            Ok(document) => {
                tracing::info!(file = %file_name, nct_id = ?document.nct_id, "Trial file parsed");
                let active = ActiveTrial::Uploaded(document);
                let mut state = self.lock();
                state.activate(active.clone());
                state.notice = Some("Trial JSON file successfully parsed.".to_string());
                Ok(active)
            }
            Err(e) => {
                tracing::warn!(file = %file_name, error = %e, "Trial upload rejected");
                self.lock().error = Some(e.to_string());
                Err(e)
            }
        }
    }

    // ── Runs ────────────────────────────────────────────────

    /// Match the active trial: submit, then poll unless the backend answered
    /// with results directly.
    ///
    /// Returns `MatchingError::Superseded` without touching state when the
    /// trial input changed while the run was in flight.
    pub async fn run_matching(&self) -> Result<MatchResults, MatchingError> {
        let (active, token) = {
            let mut state = self.lock();
            if state.stage.is_busy() {
                return Err(MatchingError::RunInProgress);
            }
            let Some(active) = state.active.clone() else {
                let err = MatchingError::NoTrialSelected;
                state.error = Some(err.to_string());
                return Err(err);
            };
            state.stage = WorkflowStage::Submitting;
            state.results = None;
            state.error = None;
            state.notice = None;
            state.run_started_at = Some(Utc::now());
            state.run_finished_at = None;
            (active, state.generation)
        };

        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("match_run", %run_id, trial = %active.display_id());
        let outcome = self.execute(&active, token).instrument(span).await;
        self.finish(token, outcome)
    }

    /// Activate the built-in sample trial and run it.
    pub async fn run_sample_match(&self) -> Result<MatchResults, MatchingError> {
        {
            let mut state = self.lock();
            if state.stage.is_busy() {
                return Err(MatchingError::RunInProgress);
            }
            let trial = self.config.fallback_trial.clone().unwrap_or_else(config::sample_trial);
            tracing::info!(trial_id = %trial.nct_id, "Running sample match");
            state.activate(ActiveTrial::Catalog(trial));
        }
        self.run_matching().await
    }

    async fn execute(
        &self,
        active: &ActiveTrial,
        token: u64,
    ) -> Result<(MatchResults, String), MatchingError> {
        let trial_id = match active {
            ActiveTrial::Catalog(trial) => self.submit_by_id(&trial.nct_id).await?,
            ActiveTrial::Uploaded(doc) => match &doc.nct_id {
                Some(id) => self.submit_by_id(id).await?,
                None => {
                    tracing::info!(file = %doc.file_name, "Submitting trial document");
                    match self.api.submit_trial_document(&doc.body).await? {
                        DocumentMatchOutcome::Results(results) => {
                            tracing::info!("Document match answered with results directly");
                            return Ok((
                                results,
                                "Matching process completed successfully (from direct response)!"
                                    .to_string(),
                            ));
                        }
                        DocumentMatchOutcome::Accepted { trial_id: Some(id) } => id,
                        DocumentMatchOutcome::Accepted { trial_id: None } => {
                            return Err(MatchingError::NoPollingIdentifier);
                        }
                    }
                }
            },
        };

        self.enter_polling(token, &trial_id)?;

        let poller = ResultsPoller::new(&self.api, &self.sleeper, PollPolicy::from_config(&self.config));
        let is_current = || self.is_current(token);
        let results = poller.poll(&trial_id, &is_current).await?;
        Ok((results, format!("Matching results received for {trial_id}!")))
    }

    async fn submit_by_id(&self, trial_id: &str) -> Result<String, MatchingError> {
        let patients_dir = self.config.patients_dir.as_deref();
        tracing::info!(trial_id, patients_dir = patients_dir.unwrap_or("default"), "Submitting match");
        let ack = self.api.submit_trial(trial_id, patients_dir).await?;
        tracing::debug!(trial_id, %ack, "Match accepted");
        Ok(trial_id.to_string())
    }

    fn enter_polling(&self, token: u64, trial_id: &str) -> Result<(), MatchingError> {
        let mut state = self.lock();
        if state.generation != token {
            return Err(MatchingError::Superseded);
        }
        state.stage = WorkflowStage::Polling;
        state.notice = Some(format!("Matching initiated for {trial_id}. Polling for results..."));
        Ok(())
    }

    fn is_current(&self, token: u64) -> bool {
        self.lock().generation == token
    }

    /// Commit a run's outcome, unless the input changed in the meantime.
    fn finish(
        &self,
        token: u64,
        outcome: Result<(MatchResults, String), MatchingError>,
    ) -> Result<MatchResults, MatchingError> {
        let mut state = self.lock();
        if state.generation != token {
            tracing::debug!(token, current = state.generation, "Discarding outcome of superseded run");
            return Err(MatchingError::Superseded);
        }

        state.run_finished_at = Some(Utc::now());
        match outcome {
            Ok((results, notice)) => {
                tracing::info!(
                    matching = results.matching_patients.len(),
                    non_matching = results.non_matching_patients.len(),
                    "Match run completed"
                );
                state.stage = WorkflowStage::ResultsReady;
                state.results = Some(results.clone());
                state.notice = Some(notice);
                Ok(results)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Match run failed");
                state.stage = WorkflowStage::Failed;
                state.results = None;
                state.notice = None;
                state.error = Some(format!("Error: {e}"));
                Err(e)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkflowState> {
        // State stays consistent between statements, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use std::sync::{Arc, OnceLock, Weak};
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::matching::api::{ApiCall, PollResponse, ScriptedApi};
    use crate::matching::clock::FakeClock;
    use crate::matching::upload::JSON_CONTENT_TYPE;
    use crate::models::MatchSummary;

    type TestController = WorkflowController<ScriptedApi, FakeClock>;

    fn catalog() -> Vec<Trial> {
        vec![Trial::new("NCT001", "First"), Trial::new("NCT002", "Second")]
    }

    fn results(matching: u32, evaluated: u32) -> MatchResults {
        MatchResults {
            summary: MatchSummary { total_matching_patients: matching, total_evaluated: evaluated },
            ..MatchResults::default()
        }
    }

    fn controller(api: ScriptedApi) -> TestController {
        WorkflowController::new(api, FakeClock::new(), BackendConfig::default())
    }

    async fn loaded(api: ScriptedApi) -> TestController {
        let ctrl = controller(api.with_catalog(Ok(catalog())));
        ctrl.load_catalog().await.unwrap();
        ctrl
    }

    fn json_upload(name: &str, body: serde_json::Value) -> TrialUpload {
        TrialUpload::from_bytes(name, JSON_CONTENT_TYPE, body.to_string().into_bytes())
    }

    // ── Catalog ─────────────────────────────────────────────

    #[tokio::test]
    async fn catalog_matches_backend_exactly() {
        let ctrl = loaded(ScriptedApi::new()).await;
        let snap = ctrl.snapshot();
        assert_eq!(snap.catalog, catalog());
        assert!(!snap.catalog_loading);
        assert!(snap.error.is_none());
        assert_eq!(snap.stage, WorkflowStage::Idle);
    }

    #[tokio::test]
    async fn catalog_failure_offers_fallback_only() {
        let api = ScriptedApi::new().with_catalog(Err(MatchingError::Connection(
            "http://localhost:8000".into(),
        )));
        let ctrl = controller(api);
        assert!(ctrl.load_catalog().await.is_err());

        let snap = ctrl.snapshot();
        assert_eq!(snap.catalog, vec![config::sample_trial()]);
        let error = snap.error.unwrap();
        assert!(error.starts_with("Failed to connect to API: "));
        assert!(error.ends_with("Is the backend running at http://localhost:8000?"));
    }

    #[tokio::test]
    async fn catalog_failure_without_fallback_is_empty() {
        let api = ScriptedApi::new().with_catalog(Err(MatchingError::Timeout(30)));
        let ctrl = WorkflowController::new(
            api,
            FakeClock::new(),
            BackendConfig::default().without_fallback_trial(),
        );
        assert!(ctrl.load_catalog().await.is_err());
        assert!(ctrl.snapshot().catalog.is_empty());
    }

    #[tokio::test]
    async fn catalog_is_fetched_once_per_load() {
        let ctrl = loaded(ScriptedApi::new()).await;
        assert_eq!(ctrl.api().calls(), vec![ApiCall::ListTrials]);
    }

    #[tokio::test]
    async fn catalog_reload_keeps_failed_run_error() {
        let api = ScriptedApi::new().with_submit(Err(MatchingError::Api {
            status: 500,
            message: "API request failed: 500 Internal Server Error".into(),
        }));
        let ctrl = loaded(api).await;
        ctrl.select_trial("NCT001").unwrap();
        assert!(ctrl.run_matching().await.is_err());

        ctrl.load_catalog().await.unwrap();
        let snap = ctrl.snapshot();
        assert_eq!(snap.stage, WorkflowStage::Failed);
        assert_eq!(snap.error.as_deref(), Some("Error: API request failed: 500 Internal Server Error"));
        assert_eq!(snap.catalog, catalog());
    }

    #[tokio::test]
    async fn catalog_reload_clears_its_own_previous_error() {
        let ctrl = controller(ScriptedApi::new().with_catalog(Ok(catalog())));
        ctrl.lock().error = Some("Failed to connect to API: stale".into());
        ctrl.load_catalog().await.unwrap();
        assert!(ctrl.snapshot().error.is_none());
    }

    // ── Trial input ─────────────────────────────────────────

    #[tokio::test]
    async fn selecting_unknown_trial_changes_nothing_but_error() {
        let ctrl = loaded(ScriptedApi::new()).await;
        ctrl.select_trial("NCT001").unwrap();

        let err = ctrl.select_trial("NCT999").unwrap_err();
        assert_eq!(err, MatchingError::UnknownTrial("NCT999".into()));

        let snap = ctrl.snapshot();
        assert_eq!(snap.active_trial.unwrap().trial_id(), Some("NCT001"));
        assert_eq!(snap.stage, WorkflowStage::TrialChosen);
        assert!(snap.error.is_some());
    }

    #[tokio::test]
    async fn select_and_upload_are_mutually_exclusive() {
        let ctrl = loaded(ScriptedApi::new()).await;

        ctrl.select_trial("NCT001").unwrap();
        ctrl.upload_trial(json_upload("mine.json", json!({"brief_title": "Mine"})))
            .await
            .unwrap();
        let active = ctrl.snapshot().active_trial.unwrap();
        assert!(active.is_file());
        assert_eq!(active.title(), "Mine");
        assert_eq!(ctrl.snapshot().notice.as_deref(), Some("Trial JSON file successfully parsed."));

        ctrl.select_trial("NCT002").unwrap();
        let snap = ctrl.snapshot();
        let active = snap.active_trial.unwrap();
        assert!(!active.is_file());
        assert_eq!(active.trial_id(), Some("NCT002"));
        assert!(snap.notice.is_none());
    }

    #[tokio::test]
    async fn non_json_upload_only_sets_error() {
        let ctrl = loaded(ScriptedApi::new().with_polls([Ok(PollResponse::Ready(results(1, 2)))])).await;
        ctrl.select_trial("NCT001").unwrap();
        ctrl.run_matching().await.unwrap();
        let before = ctrl.snapshot();

        let upload = TrialUpload::from_bytes("trial.csv", "text/csv", b"a,b".to_vec());
        let err = ctrl.upload_trial(upload).await.unwrap_err();
        assert!(matches!(err, MatchingError::UnsupportedFileType { .. }));

        let after = ctrl.snapshot();
        assert_eq!(after.stage, before.stage);
        assert_eq!(after.active_trial, before.active_trial);
        assert_eq!(after.results, before.results);
        assert_eq!(after.notice, before.notice);
        assert_eq!(
            after.error.as_deref(),
            Some("Please upload a valid JSON file. Other file formats are not supported.")
        );
    }

    #[tokio::test]
    async fn invalid_json_upload_activates_nothing() {
        let ctrl = loaded(ScriptedApi::new()).await;
        let upload = TrialUpload::from_bytes("broken.json", JSON_CONTENT_TYPE, b"{ nope".to_vec());
        assert!(ctrl.upload_trial(upload).await.is_err());

        let snap = ctrl.snapshot();
        assert!(snap.active_trial.is_none());
        assert_eq!(snap.stage, WorkflowStage::Idle);
        assert!(snap.error.unwrap().starts_with("Invalid JSON format: "));
    }

    #[tokio::test]
    async fn new_input_clears_previous_results() {
        let api = ScriptedApi::new().with_polls([Ok(PollResponse::Ready(results(1, 1)))]);
        let ctrl = loaded(api).await;
        ctrl.select_trial("NCT001").unwrap();
        ctrl.run_matching().await.unwrap();
        assert_eq!(ctrl.stage(), WorkflowStage::ResultsReady);

        ctrl.select_trial("NCT002").unwrap();
        let snap = ctrl.snapshot();
        assert_eq!(snap.stage, WorkflowStage::TrialChosen);
        assert!(snap.results.is_none());
    }

    // ── Runs ────────────────────────────────────────────────

    #[tokio::test]
    async fn run_without_trial_is_rejected_locally() {
        let ctrl = loaded(ScriptedApi::new()).await;
        let err = ctrl.run_matching().await.unwrap_err();
        assert_eq!(err, MatchingError::NoTrialSelected);

        let snap = ctrl.snapshot();
        assert_eq!(snap.stage, WorkflowStage::Idle);
        assert_eq!(
            snap.error.as_deref(),
            Some("No trial selected or uploaded. Please select or upload a trial first.")
        );
        assert_eq!(ctrl.api().calls(), vec![ApiCall::ListTrials]);
    }

    #[tokio::test]
    async fn catalog_run_submits_then_polls_until_ready() {
        let mut polls: Vec<_> = (0..14).map(|_| Ok(PollResponse::NotReady)).collect();
        polls.push(Ok(PollResponse::Ready(results(10, 40))));
        let ctrl = loaded(ScriptedApi::new().with_polls(polls)).await;
        ctrl.select_trial("NCT001").unwrap();

        let got = ctrl.run_matching().await.unwrap();
        assert_eq!(got, results(10, 40));

        let calls = ctrl.api().calls();
        assert_eq!(
            calls[1],
            ApiCall::SubmitTrial {
                trial_id: "NCT001".into(),
                patients_dir: Some("data/patients".into())
            }
        );
        assert_eq!(ctrl.api().poll_count(), 15);
        assert_eq!(ctrl.sleeper().waits().len(), 14);

        let snap = ctrl.snapshot();
        assert_eq!(snap.stage, WorkflowStage::ResultsReady);
        assert_eq!(snap.results, Some(results(10, 40)));
        assert_eq!(snap.notice.as_deref(), Some("Matching results received for NCT001!"));
        assert!(snap.run_finished_at.is_some());
    }

    #[tokio::test]
    async fn exhausted_polling_fails_the_run() {
        let polls: Vec<_> = (0..15).map(|_| Ok(PollResponse::NotReady)).collect();
        let ctrl = loaded(ScriptedApi::new().with_polls(polls)).await;
        ctrl.select_trial("NCT002").unwrap();

        let err = ctrl.run_matching().await.unwrap_err();
        assert_eq!(err.to_string(), "Results for NCT002 not available after 15 attempts.");
        assert_eq!(ctrl.api().poll_count(), 15);
        assert_eq!(ctrl.sleeper().elapsed(), Duration::from_millis(14 * 8000));

        let snap = ctrl.snapshot();
        assert_eq!(snap.stage, WorkflowStage::Failed);
        assert!(snap.results.is_none());
        assert!(snap.can_run());
    }

    #[tokio::test]
    async fn submit_failure_skips_polling() {
        let api = ScriptedApi::new().with_submit(Err(MatchingError::Api {
            status: 500,
            message: "API request failed: 500 Internal Server Error".into(),
        }));
        let ctrl = loaded(api).await;
        ctrl.select_trial("NCT001").unwrap();

        let err = ctrl.run_matching().await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(ctrl.api().poll_count(), 0);

        let snap = ctrl.snapshot();
        assert_eq!(snap.stage, WorkflowStage::Failed);
        assert_eq!(snap.error.as_deref(), Some("Error: API request failed: 500 Internal Server Error"));
    }

    #[tokio::test]
    async fn uploaded_trial_with_id_uses_id_flow() {
        let api = ScriptedApi::new().with_polls([Ok(PollResponse::Ready(results(2, 5)))]);
        let ctrl = loaded(api).await;
        ctrl.upload_trial(json_upload("t.json", json!({"nct_id": "NCT777", "brief_title": "Up"})))
            .await
            .unwrap();

        ctrl.run_matching().await.unwrap();
        let calls = ctrl.api().calls();
        assert!(matches!(&calls[1], ApiCall::SubmitTrial { trial_id, .. } if trial_id == "NCT777"));
        assert_eq!(calls[2], ApiCall::FetchResults("NCT777".into()));
    }

    #[tokio::test]
    async fn uploaded_trial_without_id_gets_direct_results() {
        let api = ScriptedApi::new()
            .with_document(Ok(DocumentMatchOutcome::Results(results(1, 3))));
        let ctrl = loaded(api).await;
        let body = json!({"brief_title": "Custom", "criteria": "age > 18"});
        ctrl.upload_trial(json_upload("c.json", body.clone())).await.unwrap();

        let got = ctrl.run_matching().await.unwrap();
        assert_eq!(got, results(1, 3));
        assert_eq!(ctrl.api().calls()[1], ApiCall::SubmitDocument(body));
        assert_eq!(ctrl.api().poll_count(), 0);
        assert_eq!(ctrl.stage(), WorkflowStage::ResultsReady);
    }

    #[tokio::test]
    async fn uploaded_trial_without_any_id_fails() {
        let ctrl = loaded(ScriptedApi::new()).await;
        ctrl.upload_trial(json_upload("c.json", json!({"title": "Nameless"})))
            .await
            .unwrap();

        let err = ctrl.run_matching().await.unwrap_err();
        assert_eq!(err, MatchingError::NoPollingIdentifier);
        assert_eq!(ctrl.api().poll_count(), 0);
        assert_eq!(ctrl.stage(), WorkflowStage::Failed);
    }

    #[tokio::test]
    async fn document_ack_with_id_is_polled() {
        let api = ScriptedApi::new()
            .with_document(Ok(DocumentMatchOutcome::Accepted { trial_id: Some("GEN-1".into()) }))
            .with_polls([Ok(PollResponse::Ready(results(0, 0)))]);
        let ctrl = loaded(api).await;
        ctrl.upload_trial(json_upload("c.json", json!({"title": "Generated"})))
            .await
            .unwrap();

        ctrl.run_matching().await.unwrap();
        assert_eq!(ctrl.api().calls()[2], ApiCall::FetchResults("GEN-1".into()));
    }

    #[tokio::test]
    async fn sample_match_runs_fallback_trial() {
        let api = ScriptedApi::new().with_polls([Ok(PollResponse::Ready(results(4, 8)))]);
        let ctrl = controller(api);

        ctrl.run_sample_match().await.unwrap();
        let snap = ctrl.snapshot();
        assert_eq!(
            snap.active_trial.unwrap().trial_id(),
            Some(config::SAMPLE_TRIAL_ID)
        );
        assert_eq!(snap.stage, WorkflowStage::ResultsReady);
    }

    // ── Concurrency ─────────────────────────────────────────

    #[tokio::test]
    async fn second_run_is_refused_while_busy() {
        let gate = Arc::new(Notify::new());
        let api = ScriptedApi::new()
            .with_submit_gate(gate.clone())
            .with_polls([Ok(PollResponse::Ready(results(1, 1)))]);
        let ctrl = Arc::new(loaded(api).await);
        ctrl.select_trial("NCT001").unwrap();

        let runner = ctrl.clone();
        let first = tokio::spawn(async move { runner.run_matching().await });
        while ctrl.stage() != WorkflowStage::Submitting {
            tokio::task::yield_now().await;
        }

        assert_eq!(ctrl.run_matching().await.unwrap_err(), MatchingError::RunInProgress);
        assert!(!ctrl.snapshot().can_run());

        gate.notify_one();
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn late_submit_answer_is_discarded_after_new_selection() {
        let gate = Arc::new(Notify::new());
        let api = ScriptedApi::new()
            .with_submit_gate(gate.clone())
            .with_polls([Ok(PollResponse::Ready(results(9, 9)))]);
        let ctrl = Arc::new(loaded(api).await);
        ctrl.select_trial("NCT001").unwrap();

        let runner = ctrl.clone();
        let run = tokio::spawn(async move { runner.run_matching().await });
        while ctrl.stage() != WorkflowStage::Submitting {
            tokio::task::yield_now().await;
        }

        ctrl.select_trial("NCT002").unwrap();
        gate.notify_one();

        assert_eq!(run.await.unwrap().unwrap_err(), MatchingError::Superseded);
        let snap = ctrl.snapshot();
        assert_eq!(snap.stage, WorkflowStage::TrialChosen);
        assert_eq!(snap.active_trial.unwrap().trial_id(), Some("NCT002"));
        assert!(snap.results.is_none());
        assert!(snap.error.is_none());
        assert_eq!(ctrl.api().poll_count(), 0);
    }

    #[tokio::test]
    async fn late_submit_answer_is_discarded_after_upload() {
        let gate = Arc::new(Notify::new());
        let api = ScriptedApi::new()
            .with_submit_gate(gate.clone())
            .with_polls([Ok(PollResponse::Ready(results(5, 5)))]);
        let ctrl = Arc::new(loaded(api).await);
        ctrl.select_trial("NCT001").unwrap();

        let runner = ctrl.clone();
        let run = tokio::spawn(async move { runner.run_matching().await });
        while ctrl.stage() != WorkflowStage::Submitting {
            tokio::task::yield_now().await;
        }

        ctrl.upload_trial(json_upload("late.json", json!({"brief_title": "Replacement"})))
            .await
            .unwrap();
        gate.notify_one();

        assert_eq!(run.await.unwrap().unwrap_err(), MatchingError::Superseded);
        let snap = ctrl.snapshot();
        let active = snap.active_trial.unwrap();
        assert!(active.is_file());
        assert_eq!(active.title(), "Replacement");
        assert_eq!(snap.stage, WorkflowStage::TrialChosen);
        assert_eq!(snap.notice.as_deref(), Some("Trial JSON file successfully parsed."));
        assert!(snap.results.is_none());
        assert!(snap.error.is_none());
        assert_eq!(ctrl.api().poll_count(), 0);
    }

    #[tokio::test]
    async fn selection_during_polling_stops_the_poller() {
        let slot: Arc<OnceLock<Weak<TestController>>> = Arc::new(OnceLock::new());
        let hook_slot = slot.clone();
        let clock = FakeClock::with_hook(move |n| {
            if n == 2 {
                if let Some(ctrl) = hook_slot.get().and_then(Weak::upgrade) {
                    ctrl.select_trial("NCT002").unwrap();
                }
            }
        });
        let polls: Vec<_> = (0..15).map(|_| Ok(PollResponse::NotReady)).collect();
        let api = ScriptedApi::new().with_catalog(Ok(catalog())).with_polls(polls);
        let ctrl = Arc::new(WorkflowController::new(api, clock, BackendConfig::default()));
        slot.set(Arc::downgrade(&ctrl)).unwrap();

        ctrl.load_catalog().await.unwrap();
        ctrl.select_trial("NCT001").unwrap();

        assert_eq!(ctrl.run_matching().await.unwrap_err(), MatchingError::Superseded);
        assert_eq!(ctrl.api().poll_count(), 2);
        let snap = ctrl.snapshot();
        assert_eq!(snap.stage, WorkflowStage::TrialChosen);
        assert!(snap.error.is_none());
    }

    // ── Over HTTP ───────────────────────────────────────────

    #[tokio::test]
    async fn end_to_end_over_http() {
        use std::sync::atomic::{AtomicU32, Ordering};

        use axum::extract::{Path, State};
        use axum::http::StatusCode;
        use axum::routing::{get, post};
        use axum::{Json, Router};

        let hits = Arc::new(AtomicU32::new(0));
        let app = Router::new()
            .route(
                "/trials",
                get(|| async { Json(json!({"trials": [{"nct_id": "NCT042", "title": "Answer"}]})) }),
            )
            .route(
                "/match/trial",
                post(|Json(body): Json<serde_json::Value>| async move {
                    Json(json!({"status": "accepted", "trial_id": body["trial_id"]}))
                }),
            )
            .route(
                "/results/:trial_id",
                get(
                    |State(hits): State<Arc<AtomicU32>>, Path(id): Path<String>| async move {
                        if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                            return (StatusCode::NOT_FOUND, Json(json!({"detail": "Not Found"})));
                        }
                        (
                            StatusCode::OK,
                            Json(json!({
                                "trial_id": id,
                                "summary": {"total_matching_patients": 1, "total_evaluated": 3},
                                "matching_patients": [{"patient_id": "P1", "score": 88, "eligible": true}],
                                "non_matching_patients": [{"patient_id": "P2"}, {"patient_id": "P3"}]
                            })),
                        )
                    },
                ),
            )
            .with_state(hits.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = BackendConfig::new(&format!("http://{addr}"));
        let api = HttpMatchingApi::new(&config).unwrap();
        let ctrl = WorkflowController::new(api, FakeClock::new(), config);

        assert_eq!(ctrl.load_catalog().await.unwrap(), 1);
        ctrl.select_trial("NCT042").unwrap();
        let got = ctrl.run_matching().await.unwrap();

        assert_eq!(got.summary.match_rate(), Some(1.0 / 3.0));
        assert_eq!(got.matching_patients[0].patient_id(), "P1");
        assert_eq!(got.non_matching_patients.len(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(ctrl.sleeper().waits().len(), 2);
        assert_eq!(ctrl.stage(), WorkflowStage::ResultsReady);
    }

    #[test]
    fn stage_busy_flags() {
        assert!(WorkflowStage::Submitting.is_busy());
        assert!(WorkflowStage::Polling.is_busy());
        assert!(!WorkflowStage::Failed.is_busy());
        assert_eq!(WorkflowStage::ResultsReady.to_string(), "Results ready");
    }

    #[test]
    fn snapshot_serializes_snake_case_stage() {
        let ctrl = controller(ScriptedApi::new());
        let json = serde_json::to_value(ctrl.snapshot()).unwrap();
        assert_eq!(json["stage"], "idle");
        assert_eq!(json["catalog"], json!([]));
    }
}
