//! Swap of staged files into the install directory.
//!
//! The swap is two passes of renames: every installed file except the
//! settings file moves to the dirty directory, then every staged file moves
//! into the install directory. A journal in the scratch root records which
//! pass is running so an interrupted swap can be finished or undone by
//! [`recover`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

use crate::io::extract::ArchiveFormat;
use crate::paths::{CONFIG_FILE, Layout};
use crate::state::{StateError, StateStore};

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to move {} to {}: {source}", .from.display(), .to.display())]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Invalid journal: {0}")]
    Journal(#[from] serde_json::Error),

    #[error(transparent)]
    State(#[from] StateError),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ApplyError + '_ {
    move |source| ApplyError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Pass of the swap that was running when the journal was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalPhase {
    /// Installed files are moving to the dirty directory.
    Evacuating,
    /// Staged files are moving into the install directory.
    Filling,
}

/// Record of an in-flight swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    pub phase: JournalPhase,
    pub version: String,
    pub started: DateTime<Utc>,
}

impl Journal {
    pub fn load(path: &Path) -> Result<Option<Self>, ApplyError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(path)(e)),
        }
    }

    fn store(&self, path: &Path) -> Result<(), ApplyError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(self)?).map_err(io_error(&tmp))?;
        fs::rename(&tmp, path).map_err(io_error(path))
    }
}

/// Counts from a completed swap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub moved_out: usize,
    pub moved_in: usize,
}

/// What [`recover`] did with an interrupted swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Displaced files were moved back into empty install slots.
    Restored { restored: usize },
    /// The fill pass was finished from the staging directory.
    Completed { moved_in: usize },
}

/// Performs the swap for one install.
#[derive(Debug)]
pub struct Applier<'a> {
    layout: &'a Layout,
    settings_file: &'a Path,
    store: &'a StateStore,
}

impl<'a> Applier<'a> {
    pub fn new(layout: &'a Layout, settings_file: &'a Path, store: &'a StateStore) -> Self {
        Self {
            layout,
            settings_file,
            store,
        }
    }

    /// Replace the installed files with the staged ones.
    ///
    /// A failure part-way leaves files where they are; the dirty and staging
    /// directories plus the journal are kept for [`recover`].
    pub fn run(&self, version: &str) -> Result<ApplyReport, ApplyError> {
        let install = self.layout.install_dir();
        let dirty = self.layout.dirty_dir();
        let journal_path = self.layout.journal_path();

        let installed = self.installed_files()?;
        let mut journal = Journal {
            phase: JournalPhase::Evacuating,
            version: version.to_string(),
            started: Utc::now(),
        };
        journal.store(&journal_path)?;

        fs::create_dir_all(&dirty).map_err(io_error(&dirty))?;
        for dir in self.installed_dirs()? {
            let target = dirty.join(dir);
            fs::create_dir_all(&target).map_err(io_error(&target))?;
        }
        for rel in &installed {
            tracing::debug!(file = %rel.display(), "evacuating");
            move_file(&install.join(rel), &dirty.join(rel))?;
        }
        remove_empty_dirs(install, Some(self.layout.temp_dir()));
        tracing::info!(files = installed.len(), "installed files moved aside");

        journal.phase = JournalPhase::Filling;
        journal.store(&journal_path)?;
        let moved_in = fill(self.layout, self.settings_file)?;
        keep_config(self.layout)?;

        self.store.save()?;
        fs::remove_file(&journal_path).map_err(io_error(&journal_path))?;
        tracing::info!(version, files = moved_in, "update applied");

        Ok(ApplyReport {
            moved_out: installed.len(),
            moved_in,
        })
    }

    /// Non-directory entries under the install dir, relative, minus the
    /// settings file and anything inside the scratch root.
    fn installed_files(&self) -> Result<Vec<PathBuf>, ApplyError> {
        let mut files = Vec::new();
        for entry in self.walk_install() {
            let entry = entry?;
            if entry.file_type().is_dir() {
                continue;
            }
            let rel = relative(self.layout.install_dir(), entry.path());
            if rel == self.settings_file {
                continue;
            }
            files.push(rel);
        }
        Ok(files)
    }

    fn installed_dirs(&self) -> Result<Vec<PathBuf>, ApplyError> {
        let mut dirs = Vec::new();
        for entry in self.walk_install() {
            let entry = entry?;
            if entry.file_type().is_dir() {
                dirs.push(relative(self.layout.install_dir(), entry.path()));
            }
        }
        Ok(dirs)
    }

    fn walk_install(&self) -> impl Iterator<Item = walkdir::Result<walkdir::DirEntry>> + '_ {
        let temp = self.layout.temp_dir();
        WalkDir::new(self.layout.install_dir())
            .min_depth(1)
            .into_iter()
            .filter_entry(move |e| e.path() != temp)
    }
}

fn relative(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

/// Move every staged file into the install dir. Returns the number moved.
fn fill(layout: &Layout, settings_file: &Path) -> Result<usize, ApplyError> {
    let stage = layout.stage_dir();
    let install = layout.install_dir();
    let mut moved = 0;

    let staged: Vec<PathBuf> = WalkDir::new(&stage)
        .min_depth(1)
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|e| !e.file_type().is_dir())
        .map(|e| relative(&stage, e.path()))
        .collect();

    for rel in staged {
        if rel == settings_file {
            tracing::warn!(file = %rel.display(), "package ships a settings file, keeping the installed one");
            continue;
        }
        let target = install.join(&rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        tracing::debug!(file = %rel.display(), "installing");
        move_file(&stage.join(&rel), &target)?;
        moved += 1;
    }
    remove_empty_dirs(&stage, None);
    Ok(moved)
}

/// Delete empty directories under `root` (not `root` itself), deepest first.
fn remove_empty_dirs(root: &Path, skip: Option<&Path>) {
    let entries = WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_entry(|e| Some(e.path()) != skip)
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir());
    for entry in entries {
        // Fails for directories that still hold the settings file
        let _ = fs::remove_dir(entry.path());
    }
}

/// Rename `from` to `to`, falling back to copy and delete across volumes.
pub fn move_file(from: &Path, to: &Path) -> Result<(), ApplyError> {
    let move_error = |source| ApplyError::Move {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            let options = fs_extra::file::CopyOptions::new().overwrite(true);
            fs_extra::file::move_file(from, to, &options)
                .map(|_| ())
                .map_err(|e| move_error(io::Error::other(e.to_string())))
        }
        Err(e) => Err(move_error(e)),
    }
}

/// Whether staging holds a complete, unpacked release: the staging dir
/// exists, contains the main executable, and no archive is left.
pub fn is_stage_ready(layout: &Layout, main_executable: &Path) -> bool {
    let stage = layout.stage_dir();
    stage.is_dir()
        && stage.join(main_executable).is_file()
        && !ArchiveFormat::ALL
            .iter()
            .any(|f| layout.archive_path(*f).exists())
}

/// Finish or undo a swap that was interrupted, if the journal says one was.
///
/// An interrupted fill is completed from staging when staging still
/// exists. Otherwise every displaced file whose install slot is empty is
/// moved back. The dirty directory and journal are removed afterwards.
pub fn recover(
    layout: &Layout,
    settings_file: &Path,
    store: &StateStore,
) -> Result<Option<Recovery>, ApplyError> {
    let journal_path = layout.journal_path();
    let phase = match Journal::load(&journal_path) {
        Ok(None) => return Ok(None),
        Ok(Some(journal)) => {
            tracing::warn!(version = %journal.version, phase = ?journal.phase, "recovering interrupted update");
            Some(journal.phase)
        }
        Err(ApplyError::Journal(e)) => {
            tracing::warn!(error = %e, "unreadable journal, restoring displaced files");
            None
        }
        Err(e) => return Err(e),
    };

    let recovery = if phase == Some(JournalPhase::Filling) && layout.stage_dir().is_dir() {
        let moved_in = fill(layout, settings_file)?;
        keep_config(layout)?;
        store.save()?;
        Recovery::Completed { moved_in }
    } else {
        Recovery::Restored {
            restored: restore(layout)?,
        }
    };

    remove_dir_if_exists(&layout.dirty_dir())?;
    fs::remove_file(&journal_path).map_err(io_error(&journal_path))?;
    tracing::info!(?recovery, "recovery finished");
    Ok(Some(recovery))
}

/// Put the displaced `updater.toml` back when the release shipped none.
fn keep_config(layout: &Layout) -> Result<(), ApplyError> {
    let installed = layout.config_path();
    let displaced = layout.dirty_dir().join(CONFIG_FILE);
    if fs::symlink_metadata(&installed).is_ok() || !displaced.is_file() {
        return Ok(());
    }
    tracing::info!("package has no {CONFIG_FILE}, keeping the installed one");
    move_file(&displaced, &installed)
}

fn restore(layout: &Layout) -> Result<usize, ApplyError> {
    let dirty = layout.dirty_dir();
    if !dirty.is_dir() {
        return Ok(0);
    }
    let mut restored = 0;
    let displaced: Vec<PathBuf> = WalkDir::new(&dirty)
        .min_depth(1)
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|e| !e.file_type().is_dir())
        .map(|e| relative(&dirty, e.path()))
        .collect();

    for rel in displaced {
        let target = layout.install_dir().join(&rel);
        if fs::symlink_metadata(&target).is_ok() {
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        move_file(&dirty.join(&rel), &target)?;
        restored += 1;
    }
    Ok(restored)
}

fn remove_dir_if_exists(path: &Path) -> Result<(), ApplyError> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(io_error(path)(e)),
        _ => Ok(()),
    }
}

/// Result of [`clean_scratch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cleaned {
    /// Staging and dirty directories were kept because a journal exists.
    pub kept_for_recovery: bool,
}

/// Remove the probe, staging and dirty directories.
///
/// While a journal exists, staging and dirty hold the only copies of some
/// files and are left alone.
pub fn clean_scratch(layout: &Layout) -> Result<Cleaned, ApplyError> {
    remove_dir_if_exists(&layout.probe_dir())?;
    if layout.journal_path().exists() {
        tracing::warn!(
            dirty = %layout.dirty_dir().display(),
            "interrupted update pending recovery, keeping scratch directories"
        );
        return Ok(Cleaned {
            kept_for_recovery: true,
        });
    }
    remove_dir_if_exists(&layout.stage_dir())?;
    remove_dir_if_exists(&layout.dirty_dir())?;
    Ok(Cleaned::default())
}
