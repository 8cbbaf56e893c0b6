//! Install-directory writability and administrator detection.

use std::fs;
use std::io;
use std::path::Path;

use crate::paths::PROBE_DIR;

/// Whether applying needs a privileged helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
    /// The install dir is writable as-is.
    NotNeeded,
    /// Not writable, but the process already runs as administrator.
    AlreadyElevated,
    /// Not writable and not administrator: the helper must be elevated.
    Required,
}

impl Elevation {
    pub fn is_required(self) -> bool {
        self == Self::Required
    }
}

/// Create and delete `<install>/UpdateTest`.
pub fn probe_writable(install_dir: &Path) -> io::Result<()> {
    let probe = install_dir.join(PROBE_DIR);
    if probe.exists() {
        fs::remove_dir_all(&probe)?;
    }
    fs::create_dir(&probe)?;
    fs::remove_dir(&probe)
}

/// Probe `install_dir` and classify the result.
pub fn check(install_dir: &Path) -> Elevation {
    match probe_writable(install_dir) {
        Ok(()) => Elevation::NotNeeded,
        Err(e) => {
            tracing::info!(dir = %install_dir.display(), error = %e, "install directory is not writable");
            if is_elevated() {
                Elevation::AlreadyElevated
            } else {
                Elevation::Required
            }
        }
    }
}

/// Effective uid 0.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn is_elevated() -> bool {
    // SAFETY: geteuid(2) has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// `net session` only succeeds for members of the Administrators group.
#[cfg(windows)]
pub fn is_elevated() -> bool {
    std::process::Command::new("net")
        .arg("session")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}
