use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{self, BackendConfig};

#[derive(Debug, Parser)]
#[command(
    name = "trialmatch",
    version,
    about = "Match patients against clinical trials using the matching backend"
)]
pub struct Cli {
    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the trials the backend knows about.
    Trials,
    /// Match patients against a catalog trial or an uploaded trial file.
    Match(MatchArgs),
    /// Match patients against the built-in sample trial.
    Sample(OutputArgs),
}

#[derive(Debug, Args)]
pub struct BackendArgs {
    #[arg(long, global = true, env = config::API_URL_ENV, help = "Matching backend origin")]
    pub api_url: Option<String>,

    #[arg(long, global = true, help = "patients_dir hint sent with match-by-id requests")]
    pub patients_dir: Option<String>,

    #[arg(long, global = true, help = "Maximum result polls per run")]
    pub poll_attempts: Option<u32>,

    #[arg(long, global = true, help = "Wait between result polls (ms)")]
    pub poll_interval_ms: Option<u64>,

    #[arg(long, global = true, help = "Per-request timeout (seconds)")]
    pub timeout_secs: Option<u64>,
}

impl BackendArgs {
    /// Flags override the environment, which overrides the built-in defaults.
    pub fn to_config(&self) -> BackendConfig {
        let mut config = match self.api_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => BackendConfig::new(url),
            _ => BackendConfig::from_env(),
        };

        if self.patients_dir.is_some() {
            config = config.with_patients_dir(self.patients_dir.clone());
        }
        if self.poll_attempts.is_some() || self.poll_interval_ms.is_some() {
            let attempts = self.poll_attempts.unwrap_or(config.poll_attempts);
            let interval = self
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(config.poll_interval);
            config = config.with_polling(attempts, interval);
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_request_timeout(Duration::from_secs(secs));
        }
        config
    }
}

#[derive(Debug, Args)]
pub struct MatchArgs {
    #[arg(long, conflicts_with = "file", required_unless_present = "file", help = "Catalog trial id (NCT number)")]
    pub trial: Option<String>,

    #[arg(long, help = "Trial definition JSON file")]
    pub file: Option<PathBuf>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Clone, Copy, Args)]
pub struct OutputArgs {
    #[arg(long, default_value_t = false, help = "Show per-criterion reasoning")]
    pub details: bool,

    #[arg(long, default_value_t = false, help = "Print raw results as JSON")]
    pub json: bool,
}
