use anyhow::{Context, Result};
use clap::Parser;

use trialmatch_lib::cli::{Cli, Commands, MatchArgs, OutputArgs};
use trialmatch_lib::config;
use trialmatch_lib::matching::{HttpMatchingApi, MatchingError, TrialUpload, WorkflowController};
use trialmatch_lib::models::MatchResults;
use trialmatch_lib::presentation::{render_results_text, ResultsView};

type Controller = WorkflowController<HttpMatchingApi>;

#[tokio::main]
async fn main() -> Result<()> {
    trialmatch_lib::init_tracing();

    let cli = Cli::parse();
    let backend = cli.backend.to_config();
    tracing::info!(
        version = config::APP_VERSION,
        api_url = %backend.base_url,
        "{} starting",
        config::APP_NAME
    );

    let controller = WorkflowController::connect(backend).context("failed to set up the HTTP client")?;

    match cli.command {
        Commands::Trials => list_trials(&controller).await,
        Commands::Match(args) => match_trial(&controller, args).await,
        Commands::Sample(output) => {
            let results = controller.run_sample_match().await;
            finish_run(&controller, results, output)
        }
    }
}

async fn list_trials(controller: &Controller) -> Result<()> {
    tracing::debug!(url = %controller.config().endpoint("/trials"), "Loading trial catalog");
    if controller.load_catalog().await.is_err() {
        report_error(controller);
    }

    let snapshot = controller.snapshot();
    if snapshot.catalog.is_empty() {
        println!("No trials available.");
    }
    for trial in &snapshot.catalog {
        println!("{}  {}", trial.nct_id, trial.title);
    }
    Ok(())
}

async fn match_trial(controller: &Controller, args: MatchArgs) -> Result<()> {
    match (args.trial, args.file) {
        (Some(trial_id), _) => {
            // Catalog failure still leaves the fallback trial selectable.
            if controller.load_catalog().await.is_err() {
                report_error(controller);
            }
            controller
                .select_trial(&trial_id)
                .with_context(|| format!("cannot select trial {trial_id}"))?;
        }
        (None, Some(path)) => {
            controller
                .upload_trial(TrialUpload::from_path(&path))
                .await
                .with_context(|| format!("cannot use {} as a trial definition", path.display()))?;
            report_notice(controller);
        }
        (None, None) => anyhow::bail!("either --trial or --file is required"),
    }

    let results = controller.run_matching().await;
    finish_run(controller, results, args.output)
}

fn finish_run(
    controller: &Controller,
    results: Result<MatchResults, MatchingError>,
    output: OutputArgs,
) -> Result<()> {
    let results = match results {
        Ok(results) => results,
        Err(e) => {
            report_error(controller);
            let context = if e.is_validation() {
                "matching run rejected"
            } else {
                "matching run failed"
            };
            return Err(e).context(context);
        }
    };
    report_notice(controller);

    if output.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    let snapshot = controller.snapshot();
    let active_title = snapshot.active_trial.as_ref().map(|t| t.title());
    let view = ResultsView::build(&results, active_title, output.details);
    print!("{}", render_results_text(&view));
    Ok(())
}

fn report_error(controller: &Controller) {
    if let Some(error) = controller.snapshot().error {
        eprintln!("{error}");
    }
}

fn report_notice(controller: &Controller) {
    if let Some(notice) = controller.snapshot().notice {
        eprintln!("{notice}");
    }
}
