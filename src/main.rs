mod cli;
mod ui;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use payout_engine::config::EngineConfig;
use payout_engine::context::EngineContext;
use payout_engine::error::EngineError;
use payout_engine::ledger::TransactionId;
use payout_engine::mirror::{ConfirmationVerifier, MirrorVerifier};
use payout_engine::orchestrator::PayoutOrchestrator;
use payout_engine::payout::{PayoutBatchFile, RunExecution, RunStatus};
use payout_engine::store::{JsonFileStore, PayoutStore};
use ui::RunProgress;

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info,payout_engine=debug"
    } else {
        "info,payout_engine=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Failed payouts are reported in the summary; only an aborted run is a failure.
fn exit_code(run: &RunExecution) -> ExitCode {
    match run.status {
        RunStatus::Failed => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(max_retries) = cli.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }

    match cli.command {
        Command::Execute { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let batch: PayoutBatchFile = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", file.display()))?;

            let ctx = EngineContext::from_config(config)?;
            // Checked before the stored instructions are overwritten.
            if ctx.store.load_run(&batch.run_id).await?.is_some() {
                return Err(EngineError::RunExists(batch.run_id).into());
            }
            JsonFileStore::new(&ctx.config.data_dir)
                .register_recipients(&batch.payouts)
                .await?;
            ctx.store.save_instructions(&batch).await?;

            let progress = Arc::new(RunProgress::start(&batch.run_id));
            let orchestrator = PayoutOrchestrator::new(ctx).with_observer(progress.clone());
            let run = orchestrator.execute(batch).await?;
            progress.finish();

            ui::print_run(&run, cli.verbose);
            Ok(exit_code(&run))
        }
        Command::Retry { run_id } => {
            let ctx = EngineContext::from_config(config)?;
            let progress = Arc::new(RunProgress::start(&run_id));
            let orchestrator = PayoutOrchestrator::new(ctx).with_observer(progress.clone());
            let run = orchestrator.retry_failed_payouts(&run_id).await?;
            progress.finish();

            ui::print_run(&run, cli.verbose);
            Ok(exit_code(&run))
        }
        Command::Status { run_id } => {
            let store = JsonFileStore::new(&config.data_dir);
            let Some(run) = store.load_run(&run_id).await? else {
                bail!("no run named {run_id} under {}", config.data_dir);
            };
            ui::print_run(&run, cli.verbose);
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify { transaction_id } => {
            let tx: TransactionId = transaction_id.parse()?;
            let verifier = MirrorVerifier::new(config.mirror_url.clone(), config.request_timeout())?;
            let finality = verifier.check(&tx).await?;
            ui::print_finality(&transaction_id, &finality);
            Ok(ExitCode::SUCCESS)
        }
    }
}
