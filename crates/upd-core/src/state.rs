//! On-disk store for [`UpdateState`].

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use upd_schema::UpdateState;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to write state file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Scheduling state backed by a JSON file.
///
/// A missing or unreadable file loads as the empty state. Saves go through
/// a temporary file and a rename, so the file on disk is always complete.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: Mutex<UpdateState>,
}

impl StateStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "discarding corrupt update state");
                UpdateState::default()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => UpdateState::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read update state");
                UpdateState::default()
            }
        };
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> UpdateState {
        self.lock().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut UpdateState)) {
        f(&mut self.lock());
    }

    pub fn save(&self) -> Result<(), StateError> {
        let text = serde_json::to_string_pretty(&*self.lock())?;
        let io_err = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, UpdateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
