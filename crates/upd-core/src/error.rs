//! Error aggregate for the apply pipeline.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::apply::ApplyError;
use crate::checker::CheckError;
use crate::config::ConfigError;
use crate::elevation::Elevation;
use crate::io::download::DownloadError;
use crate::io::extract::ExtractError;
use crate::relaunch::RelaunchError;
use crate::state::StateError;
use crate::verify::VerifyError;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Install directory {} is not writable: {source}", .path.display())]
    NotWritable {
        path: PathBuf,
        elevation: Elevation,
        #[source]
        source: std::io::Error,
    },

    #[error("Install directory could not be determined")]
    NoInstallDir,

    #[error("No update channel selected")]
    NoChannel,

    #[error("No manifest available, run a check first")]
    NoManifest,

    #[error("An update is already being applied")]
    Busy,

    #[error("Update cancelled")]
    Cancelled,

    #[error(transparent)]
    Check(#[from] CheckError),

    #[error("Download failed: {0}")]
    Download(DownloadError),

    #[error("Extraction failed: {0}")]
    Extract(ExtractError),

    #[error("Verification failed: {0}")]
    Verify(#[from] VerifyError),

    #[error("Apply failed: {0}")]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Relaunch(#[from] RelaunchError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<DownloadError> for UpdateError {
    fn from(e: DownloadError) -> Self {
        match e {
            DownloadError::Cancelled => Self::Cancelled,
            other => Self::Download(other),
        }
    }
}

impl From<ExtractError> for UpdateError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::Cancelled => Self::Cancelled,
            other => Self::Extract(other),
        }
    }
}

impl UpdateError {
    /// A staged file failed the code-signing check.
    pub fn is_security(&self) -> bool {
        matches!(self, Self::Verify(_))
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotWritable { .. } => FailureKind::WriteProbe,
            Self::Download(_) | Self::Check(_) => FailureKind::Download,
            Self::Extract(_) => FailureKind::Extract,
            Self::Verify(_) => FailureKind::Verify,
            Self::Apply(_) | Self::State(_) => FailureKind::Apply,
            Self::Cancelled => FailureKind::Cancelled,
            Self::NoManifest | Self::NoChannel => FailureKind::NothingToApply,
            Self::NoInstallDir
            | Self::Busy
            | Self::Config(_)
            | Self::Relaunch(_)
            | Self::Task(_) => FailureKind::Other,
        }
    }
}

/// Class of an apply failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    WriteProbe,
    NothingToApply,
    Download,
    Extract,
    Verify,
    Apply,
    Cancelled,
    Other,
}

/// Recorded outcome of the last failed apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&UpdateError> for ApplyFailure {
    fn from(e: &UpdateError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}
