//! Filesystem layout of an installation and its scratch areas.
//!
//! ```text
//! <install>/
//! ├── updater.toml        # channel + product configuration
//! ├── update-state.json   # scheduling state (moved and rewritten by apply)
//! ├── <settings file>     # never touched by apply
//! └── UpdateTest/         # writability probe, transient
//!
//! <temp>/                 # defaults to the sibling <install>.update
//! ├── UpdateStage/        # download + extraction target
//! │   └── Update.<ext>    # the downloaded package, deleted after extraction
//! ├── UpdateDirty/        # displaced program files during apply
//! ├── UpdateJournal.json  # last apply phase started, present only mid-apply
//! └── UpdateHelper/       # copy of the helper executable that performs apply
//! ```

use std::path::{Path, PathBuf};

use crate::io::extract::ArchiveFormat;

/// Writability probe directory, created inside the install dir.
pub const PROBE_DIR: &str = "UpdateTest";
/// Holding area for displaced program files.
pub const DIRTY_DIR: &str = "UpdateDirty";
/// Download and extraction target.
pub const STAGE_DIR: &str = "UpdateStage";
/// Apply journal file name.
pub const JOURNAL_FILE: &str = "UpdateJournal.json";
/// Directory the helper executable is copied to before it is spawned.
pub const HELPER_DIR: &str = "UpdateHelper";
/// Marker written next to the staged helper naming the install dir.
pub const INSTALL_MARKER: &str = "install.path";
/// Scheduling state file name.
pub const STATE_FILE: &str = "update-state.json";
/// Configuration file name.
pub const CONFIG_FILE: &str = "updater.toml";
/// Stem of the downloaded package file.
pub const ARCHIVE_STEM: &str = "Update";

/// Returns the install directory, or None if it cannot be resolved.
///
/// Resolution order: `UPD_INSTALL_DIR`, then an `install.path` marker next to
/// the running executable (present when running as a staged helper), then
/// the directory of the running executable.
pub fn try_install_dir() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("UPD_INSTALL_DIR") {
        return Some(PathBuf::from(val));
    }
    let exe_dir = std::env::current_exe().ok()?.parent()?.to_path_buf();
    if let Ok(marker) = std::fs::read_to_string(exe_dir.join(INSTALL_MARKER)) {
        let marker = marker.trim();
        if !marker.is_empty() {
            return Some(PathBuf::from(marker));
        }
    }
    Some(exe_dir)
}

/// Default scratch root for an install dir: `UPD_TEMP_DIR`, else the sibling
/// `<install>.update` directory (same volume, so moves are renames).
pub fn default_temp_dir(install_dir: &Path) -> PathBuf {
    if let Ok(val) = std::env::var("UPD_TEMP_DIR") {
        return PathBuf::from(val);
    }
    let name = install_dir
        .file_name()
        .map_or_else(|| "install".into(), |n| n.to_string_lossy().into_owned());
    install_dir
        .parent()
        .unwrap_or(install_dir)
        .join(format!("{name}.update"))
}

/// Resolved locations for one installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    install_dir: PathBuf,
    temp_dir: PathBuf,
}

impl Layout {
    /// Create a layout from explicit directories.
    pub fn new(install_dir: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
            temp_dir: temp_dir.into(),
        }
    }

    /// Layout for `install_dir` with the default scratch root.
    pub fn for_install(install_dir: impl Into<PathBuf>) -> Self {
        Self::resolve(install_dir, None)
    }

    /// Layout for `install_dir`. The scratch root is `UPD_TEMP_DIR`, else
    /// `configured` relative to the install dir, else the sibling default.
    pub fn resolve(install_dir: impl Into<PathBuf>, configured: Option<&Path>) -> Self {
        let install_dir = install_dir.into();
        let temp_dir = match configured {
            Some(temp) if std::env::var_os("UPD_TEMP_DIR").is_none() => install_dir.join(temp),
            _ => default_temp_dir(&install_dir),
        };
        Self::new(install_dir, temp_dir)
    }

    /// Directory holding the installed program files.
    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Scratch root.
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// `<install>/UpdateTest`
    pub fn probe_dir(&self) -> PathBuf {
        self.install_dir.join(PROBE_DIR)
    }

    /// `<temp>/UpdateDirty`
    pub fn dirty_dir(&self) -> PathBuf {
        self.temp_dir.join(DIRTY_DIR)
    }

    /// `<temp>/UpdateStage`
    pub fn stage_dir(&self) -> PathBuf {
        self.temp_dir.join(STAGE_DIR)
    }

    /// `<temp>/UpdateJournal.json`
    pub fn journal_path(&self) -> PathBuf {
        self.temp_dir.join(JOURNAL_FILE)
    }

    /// `<temp>/UpdateHelper`
    pub fn helper_dir(&self) -> PathBuf {
        self.temp_dir.join(HELPER_DIR)
    }

    /// `<install>/update-state.json`
    pub fn state_path(&self) -> PathBuf {
        self.install_dir.join(STATE_FILE)
    }

    /// `<install>/updater.toml`
    pub fn config_path(&self) -> PathBuf {
        self.install_dir.join(CONFIG_FILE)
    }

    /// `<temp>/UpdateStage/Update.<ext>`
    pub fn archive_path(&self, format: ArchiveFormat) -> PathBuf {
        self.stage_dir()
            .join(format!("{ARCHIVE_STEM}.{}", format.extension()))
    }
}
