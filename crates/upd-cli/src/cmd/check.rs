//! Check command

use std::path::Path;

use anyhow::{Result, bail};
use upd_core::{CheckRequest, Updater};

use crate::ui::Output;

/// Check the selected channel and report what it offers.
pub async fn check(install_dir: Option<&Path>, force: bool) -> Result<()> {
    let output = Output::new();
    let mut updater = super::open(install_dir, &output)?;

    let Some(channel) = updater.channel() else {
        output.warning("No update channel selected; updates are disabled");
        return Ok(());
    };
    output.info(&format!("Checking channel '{}'...", channel.name));

    updater.check(CheckRequest::now().forced(force)).await;
    report(&updater, &output)
}

/// Print the outcome of the last check. Shared with `use`.
pub fn report(updater: &Updater, output: &Output) -> Result<()> {
    if let Some(e) = updater.last_check_error() {
        bail!("Update check failed: {e}");
    }
    let current = &updater.config().product_version;
    match updater.current_manifest() {
        Some(manifest) if updater.update_available() => {
            output.warning(&format!(
                "Update available: {current} -> {} ({})",
                manifest.version,
                manifest.date.format("%Y-%m-%d")
            ));
            output.info("Run `upd apply` to install it");
        }
        Some(_) => output.success(&format!(
            "{} is up to date (v{current})",
            updater.config().product_name
        )),
        None => output.info("No release published on this channel yet"),
    }
    if let Some(next) = updater.state().next_check {
        output.field("Next check:", &super::format_time(Some(next)));
    }
    Ok(())
}
