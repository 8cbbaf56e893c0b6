//! Channels command

use std::path::Path;

use anyhow::Result;

use crate::ui::Output;

/// List configured channels, marking the selected one.
pub fn channels(install_dir: Option<&Path>) -> Result<()> {
    let output = Output::new();
    let updater = super::open(install_dir, &output)?;
    let selected = updater.channel().map(|c| c.name.clone());

    if updater.channels().is_empty() {
        output.warning("No channels configured");
        return Ok(());
    }

    output.header("Channels");
    for channel in updater.channels() {
        let is_selected = selected.as_deref() == Some(channel.name.as_str());
        let text = format!(
            "{:<12} every {:<4} {}",
            channel.name,
            super::format_ttl(channel.ttl),
            channel.url
        );
        output.item(&text, is_selected);
    }
    if selected.is_none() {
        output.info("No channel selected; run `upd use <name>` to enable updates");
    }
    Ok(())
}
