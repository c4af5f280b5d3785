//! Trial-matching workflow: backend client, uploads, polling and the
//! controller that ties them together.

pub mod api;
pub mod clock;
pub mod controller;
pub mod error;
pub mod poller;
pub mod upload;

pub use api::{DocumentMatchOutcome, HttpMatchingApi, MatchingApi, PollResponse};
pub use clock::{Sleeper, TokioSleeper};
pub use controller::{WorkflowController, WorkflowSnapshot, WorkflowStage};
pub use error::MatchingError;
pub use poller::{PollPolicy, PollState, ResultsPoller};
pub use upload::{read_trial_document, TrialUpload};
