//! Apply command: install the available update.

use std::path::Path;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;
use upd_core::{ApplyOutcome, CheckRequest};

use crate::ui::Output;

/// Stage the helper and hand off to it, or apply in-process.
///
/// The helper path returns as soon as the helper is spawned; the helper
/// waits for this process to exit before touching the install dir.
/// In-process apply can be cancelled with Ctrl-C up to the start of the
/// swap.
pub async fn apply(
    install_dir: Option<&Path>,
    in_process: bool,
    relaunch: bool,
    dry_run: bool,
) -> Result<()> {
    let output = Output::new();
    let mut updater = super::open(install_dir, &output)?;

    // Respects the schedule: falls back to the cached manifest when not due.
    updater.check(CheckRequest::now()).await;
    if let Some(e) = updater.last_check_error() {
        output.warning(&format!("Update check failed: {e}"));
    }

    let Some(manifest) = updater.current_manifest() else {
        output.info("No update available; run `upd check --force` to look again");
        return Ok(());
    };
    if !updater.update_available() {
        output.success(&format!(
            "{} is up to date (v{})",
            updater.config().product_name,
            updater.config().product_version
        ));
        return Ok(());
    }

    let elevation = updater.elevation();
    if dry_run {
        output.info(&format!(
            "Would install v{} from {}",
            manifest.version, manifest.url
        ));
        if elevation.is_required() {
            output.info("Administrator rights would be requested");
        }
        return Ok(());
    }

    if !in_process {
        let args = updater
            .launch_helper(relaunch)
            .context("Failed to start the update helper")?;
        output.success(&format!(
            "Update helper started; it will install v{} once process {} exits",
            manifest.version, args.wait_pid
        ));
        return Ok(());
    }

    if elevation.is_required() {
        bail!(
            "{} is not writable; drop --in-process to install through the elevated helper",
            updater.layout().install_dir().display()
        );
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    output.info(&format!("Installing v{}...", manifest.version));
    match updater.apply(&cancel).await {
        Ok(ApplyOutcome::Applied { version }) => {
            output.success(&format!("Updated to v{version}"));
            Ok(())
        }
        Ok(ApplyOutcome::NothingToApply) => {
            output.warning("The downloaded package did not contain a complete release");
            Ok(())
        }
        Err(e) if e.is_security() => bail!("Update rejected: signature check failed"),
        Err(_) => bail!("Update to v{} was not applied", manifest.version),
    }
}
