//! upd-helper - applies a staged update after the application exits.
//!
//! Usage: `upd-helper WAITPID=<pid> RELAUNCH=<0|1> ELEVATE=<0|1>`
//!
//! Runs from `<temp>/UpdateHelper/`, finds the install dir through the
//! `install.path` marker next to it, waits for `WAITPID` to exit, applies,
//! and starts the main executable again when `RELAUNCH=1`.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use upd_cli::ui::LogReporter;
use upd_core::relaunch::{self, HelperArgs, WAIT_TIMEOUT};
use upd_core::{ApplyOutcome, Updater};

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("UPD_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let args = HelperArgs::parse(std::env::args().skip(1)).context("Invalid helper arguments")?;
    tracing::info!(?args, version = upd_cli::VERSION, "update helper started");

    relaunch::wait_for_exit(args.wait_pid, WAIT_TIMEOUT)
        .await
        .context("Application did not exit")?;

    let updater = Updater::open()
        .context("Failed to load updater config")?
        .with_reporter(Arc::new(LogReporter::new()));

    let cancel = CancellationToken::new();
    let result = updater.apply(&cancel).await;
    match &result {
        Ok(ApplyOutcome::Applied { version }) => tracing::info!(%version, "update installed"),
        Ok(ApplyOutcome::NothingToApply) => tracing::warn!("nothing to apply"),
        Err(e) => tracing::error!(error = %e, "update failed"),
    }

    // Relaunched whatever the apply result.
    if args.relaunch {
        relaunch::relaunch_app(updater.layout(), &updater.config().main_executable)
            .context("Failed to relaunch the application")?;
    }

    result.map(|_| ()).context("Update was not applied")
}
