//! Clean command

use std::path::Path;

use anyhow::{Context, Result};

use crate::ui::Output;

/// Remove staging, dirty and probe directories.
pub fn clean(install_dir: Option<&Path>, helper: bool, dry_run: bool) -> Result<()> {
    let output = Output::new();
    let updater = super::open(install_dir, &output)?;
    let layout = updater.layout();

    if dry_run {
        let mut targets = vec![layout.probe_dir(), layout.stage_dir(), layout.dirty_dir()];
        if helper {
            targets.push(layout.helper_dir());
        }
        for dir in targets.iter().filter(|d| d.exists()) {
            output.info(&format!("Would remove {}", dir.display()));
        }
        return Ok(());
    }

    let cleaned = updater.clean(helper).context("Failed to clean scratch directories")?;
    if cleaned.kept_for_recovery {
        output.warning("Kept scratch directories of an interrupted update; run `upd recover`");
    } else {
        output.success("Scratch directories are clean");
    }
    Ok(())
}
