//! Use command: switch channel

use std::path::Path;

use anyhow::{Context, Result};
use upd_core::CheckRequest;

use crate::ui::Output;

/// Select `name`, persist it, and run the forced check the switch implies.
pub async fn use_channel(install_dir: Option<&Path>, name: &str, dry_run: bool) -> Result<()> {
    let output = Output::new();
    let mut updater = super::open(install_dir, &output)?;

    if updater.channel().is_some_and(|c| c.name == name) {
        output.success(&format!("Already on channel '{name}'"));
        return Ok(());
    }
    if dry_run {
        if updater.channels().iter().any(|c| c.name == name) {
            output.info(&format!("Would switch to channel '{name}' and check it"));
        } else {
            output.error(&format!("Unknown channel '{name}'"));
        }
        return Ok(());
    }

    updater
        .set_channel(name)
        .with_context(|| format!("Failed to select channel '{name}'"))?;
    output.success(&format!("Switched to channel '{name}'"));

    let forced = updater.take_forced();
    updater.check(CheckRequest::now().forced(forced)).await;
    super::check::report(&updater, &output)
}
