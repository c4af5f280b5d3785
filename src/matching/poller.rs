//! Bounded polling of `/results/{trial_id}` as an explicit state machine.
//!
//! `PollPolicy` owns the transitions and is pure; `ResultsPoller` drives it
//! against a `MatchingApi` and a `Sleeper`. A 404 is retried until the attempt
//! budget is spent; every other error ends polling at once.

use std::time::Duration;

use super::api::{MatchingApi, PollResponse};
use super::clock::Sleeper;
use super::error::MatchingError;
use crate::config::BackendConfig;
use crate::models::MatchResults;

#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    /// About to send request number `attempt` (1-based).
    Requesting { attempt: u32 },
    /// Attempt `after_attempt` returned 404; waiting before the next one.
    Waiting { after_attempt: u32 },
    Ready(MatchResults),
    Failed(MatchingError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(config.poll_attempts, config.poll_interval)
    }

    pub fn initial(&self) -> PollState {
        PollState::Requesting { attempt: 1 }
    }

    /// Transition after the answer to request number `attempt`.
    pub fn on_response(
        &self,
        trial_id: &str,
        attempt: u32,
        response: Result<PollResponse, MatchingError>,
    ) -> PollState {
        match response {
            Ok(PollResponse::Ready(results)) => PollState::Ready(results),
            Ok(PollResponse::NotReady) if attempt >= self.max_attempts => {
                PollState::Failed(MatchingError::PollingExhausted {
                    trial_id: trial_id.to_string(),
                    attempts: self.max_attempts,
                })
            }
            Ok(PollResponse::NotReady) => PollState::Waiting { after_attempt: attempt },
            Err(source) => PollState::Failed(MatchingError::PollingFailed {
                trial_id: trial_id.to_string(),
                source: Box::new(source),
            }),
        }
    }

    /// Transition once the wait after `after_attempt` has elapsed.
    pub fn on_wait_elapsed(&self, after_attempt: u32) -> PollState {
        PollState::Requesting { attempt: after_attempt + 1 }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&BackendConfig::default())
    }
}

pub struct ResultsPoller<'a, A: MatchingApi, S: Sleeper> {
    api: &'a A,
    sleeper: &'a S,
    policy: PollPolicy,
}

impl<'a, A: MatchingApi, S: Sleeper> ResultsPoller<'a, A, S> {
    pub fn new(api: &'a A, sleeper: &'a S, policy: PollPolicy) -> Self {
        Self { api, sleeper, policy }
    }

    /// Poll until results arrive, polling fails, or `is_current` turns false.
    ///
    /// `is_current` is checked before each request and after each response
    /// and wait; once it returns false the loop stops with
    /// `MatchingError::Superseded` and the pending answer is dropped.
    pub async fn poll(
        &self,
        trial_id: &str,
        is_current: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<MatchResults, MatchingError> {
        tracing::info!(trial_id, max_attempts = self.policy.max_attempts, "Polling for results");
        let mut state = self.policy.initial();

        loop {
            state = match state {
                PollState::Requesting { attempt } => {
                    if !is_current() {
                        return Err(MatchingError::Superseded);
                    }
                    tracing::debug!(trial_id, attempt, max = self.policy.max_attempts, "Poll attempt");
                    let response = self.api.fetch_results(trial_id).await;
                    if !is_current() {
                        tracing::debug!(trial_id, attempt, "Discarding poll answer for superseded run");
                        return Err(MatchingError::Superseded);
                    }
                    self.policy.on_response(trial_id, attempt, response)
                }
                PollState::Waiting { after_attempt } => {
                    tracing::debug!(
                        trial_id,
                        after_attempt,
                        wait_ms = self.policy.interval.as_millis() as u64,
                        "Results not ready yet"
                    );
                    self.sleeper.sleep(self.policy.interval).await;
                    self.policy.on_wait_elapsed(after_attempt)
                }
                PollState::Ready(results) => {
                    tracing::info!(trial_id, "Poll succeeded");
                    return Ok(results);
                }
                PollState::Failed(error) => {
                    tracing::warn!(trial_id, error = %error, "Polling stopped");
                    return Err(error);
                }
            };
        }
    }
}
