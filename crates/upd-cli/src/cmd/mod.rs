//! Subcommand implementations.

pub mod apply;
pub mod channels;
pub mod check;
pub mod clean;
pub mod recover;
pub mod status;
pub mod use_channel;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use upd_core::Updater;

use crate::ui::Output;

/// Open the updater for `install_dir` (or the discovered one) with its
/// reporter wired to the terminal.
pub fn open(install_dir: Option<&Path>, output: &Output) -> Result<Updater> {
    let updater = match install_dir {
        Some(dir) => Updater::open_at(dir)
            .with_context(|| format!("Failed to load updater config in {}", dir.display()))?,
        None => Updater::open().context("Failed to load updater config")?,
    };
    Ok(updater.with_reporter(Arc::new(output.clone())))
}

/// Local wall-clock rendering of a stored UTC timestamp.
pub fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map_or_else(
        || "never".to_string(),
        |t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
    )
}

/// `86400s` reads better as `1d`.
pub fn format_ttl(ttl: std::time::Duration) -> String {
    let secs = ttl.as_secs();
    match secs {
        s if s >= 86_400 && s % 86_400 == 0 => format!("{}d", s / 86_400),
        s if s >= 3_600 && s % 3_600 == 0 => format!("{}h", s / 3_600),
        s if s >= 60 && s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{s}s"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_ttl() {
        assert_eq!(format_ttl(Duration::from_secs(86_400)), "1d");
        assert_eq!(format_ttl(Duration::from_secs(7 * 86_400)), "7d");
        assert_eq!(format_ttl(Duration::from_secs(7_200)), "2h");
        assert_eq!(format_ttl(Duration::from_secs(90)), "90s");
        assert_eq!(format_ttl(Duration::from_secs(60)), "1m");
    }

    #[test]
    fn test_format_time_never() {
        assert_eq!(format_time(None), "never");
    }

    #[test]
    fn test_open_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let err = open(Some(dir.path()), &Output::new()).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to load updater config"));
    }
}
