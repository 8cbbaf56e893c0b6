//! Status command

use std::path::Path;

use anyhow::Result;
use upd_core::Updater;
use upd_core::elevation::Elevation;

use crate::ui::Output;

/// Show configuration, schedule and pending-update state.
pub fn status(install_dir: Option<&Path>, json: bool) -> Result<()> {
    let output = Output::new();
    let updater = super::open(install_dir, &output)?;

    if json {
        output.raw(&serde_json::to_string_pretty(&status_json(&updater))?);
        return Ok(());
    }

    let config = updater.config();
    let layout = updater.layout();
    let state = updater.state();
    let manifest = updater.current_manifest();

    output.header(&format!("{} v{}", config.product_name, config.product_version));
    output.field("Install:", &layout.install_dir().display());
    output.field("Scratch:", &layout.temp_dir().display());
    output.field(
        "Channel:",
        &updater
            .channel()
            .map_or_else(|| "none (updates disabled)".to_string(), |c| c.name.clone()),
    );
    output.field("Last check:", &super::format_time(state.last_check));
    output.field("Next check:", &super::format_time(state.next_check));
    output.field(
        "Latest:",
        &manifest
            .as_ref()
            .map_or_else(|| "unknown".to_string(), |m| m.version.to_string()),
    );
    output.field("Staged:", &if updater.is_ready() { "ready" } else { "no" });
    output.field("Permissions:", &describe(updater.elevation()));

    if layout.journal_path().exists() {
        output.warning("An interrupted update is pending; run `upd recover`");
    }
    match manifest {
        Some(m) if updater.update_available() => {
            output.warning(&format!("Update available: v{}", m.version));
        }
        Some(_) => output.success("Up to date"),
        None => {}
    }
    Ok(())
}

fn describe(elevation: Elevation) -> &'static str {
    match elevation {
        Elevation::NotNeeded => "writable",
        Elevation::AlreadyElevated => "writable as administrator",
        Elevation::Required => "administrator rights required",
    }
}

fn status_json(updater: &Updater) -> serde_json::Value {
    let config = updater.config();
    let layout = updater.layout();
    let state = updater.state();
    serde_json::json!({
        "product": config.product_name,
        "version": config.product_version,
        "install_dir": layout.install_dir(),
        "temp_dir": layout.temp_dir(),
        "channel": updater.channel().map(|c| c.name.as_str()),
        "last_check": state.last_check,
        "next_check": state.next_check,
        "latest": updater.current_manifest().map(|m| m.version.to_string()),
        "update_available": updater.update_available(),
        "staged": updater.is_ready(),
        "recovery_pending": layout.journal_path().exists(),
        "elevation_required": updater.elevation().is_required(),
    })
}
