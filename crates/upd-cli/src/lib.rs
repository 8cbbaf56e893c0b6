//! upd - self-update front end
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
//!
//! Two binaries share this library:
//!
//! - `upd` checks the configured channel, shows status, switches channels,
//!   and applies updates either in-process or by handing off to the helper.
//! - `upd-helper` is copied into the scratch root, waits for the
//!   application to exit, applies the staged release and relaunches.
//!
//! # Directory Layout
//!
//! ```text
//! <install>/
//! ├── updater.toml         # channels, executables, selected channel
//! ├── update-state.json    # last/next check and cached manifest
//! └── ...                  # the product itself
//! <install>.update/
//! ├── UpdateStage/         # extracted candidate release
//! ├── UpdateDirty/         # displaced files during a swap
//! ├── UpdateHelper/        # staged helper + install.path marker
//! └── UpdateJournal.json   # present only while a swap is in flight
//! ```

pub mod cmd;
pub mod ui;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Version reported by `--version`, derived from git tags at build time.
pub const VERSION: &str = env!("UPD_VERSION");

#[derive(Debug, Parser)]
#[command(name = "upd")]
#[command(author, version = VERSION, about = "upd - application self-updater")]
pub struct Cli {
    /// Install directory (defaults to UPD_INSTALL_DIR or the executable's directory)
    #[arg(long, global = true, value_name = "DIR")]
    pub install_dir: Option<PathBuf>,

    /// Show what would happen without making changes
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check the selected channel for a newer release
    Check {
        /// Ignore the schedule and fetch now
        #[arg(long, short = 'f')]
        force: bool,
    },
    /// Show install, schedule and pending update state
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// List configured update channels
    Channels,
    /// Select an update channel and check it immediately
    Use {
        /// Channel name
        channel: String,
    },
    /// Download, verify and install the available update
    Apply {
        /// Apply from this process instead of handing off to the helper
        #[arg(long)]
        in_process: bool,
        /// Start the application again once the helper is done
        #[arg(long, conflicts_with = "in_process")]
        relaunch: bool,
    },
    /// Finish or undo an interrupted update
    Recover,
    /// Remove staging and scratch directories
    Clean {
        /// Also remove the staged helper copy
        #[arg(long)]
        helper: bool,
    },
}
