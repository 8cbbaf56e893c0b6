//! Recover command

use std::path::Path;

use anyhow::{Context, Result};
use upd_core::apply::Recovery;

use crate::ui::Output;

/// Finish or undo an update that was interrupted mid-swap.
pub fn recover(install_dir: Option<&Path>, dry_run: bool) -> Result<()> {
    let output = Output::new();
    let updater = super::open(install_dir, &output)?;
    let journal = updater.layout().journal_path();

    if !journal.exists() {
        output.success("No interrupted update found");
        return Ok(());
    }
    if dry_run {
        output.info(&format!("Would recover from {}", journal.display()));
        return Ok(());
    }

    match updater.recover().context("Recovery failed")? {
        Some(Recovery::Completed { moved_in }) => {
            output.success(&format!(
                "Finished the interrupted update ({moved_in} files installed)"
            ));
        }
        Some(Recovery::Restored { restored }) => {
            output.success(&format!(
                "Rolled back the interrupted update ({restored} files restored)"
            ));
        }
        None => output.success("No interrupted update found"),
    }
    Ok(())
}
