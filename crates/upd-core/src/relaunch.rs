//! Out-of-process apply: helper command line, spawning, waiting, relaunch.
//!
//! The running application copies the helper into the scratch root, spawns
//! it with `WAITPID=<pid> RELAUNCH=<0|1> ELEVATE=<0|1>` and exits. The
//! helper waits for that pid to disappear, applies, and optionally starts
//! the main executable again.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use thiserror::Error;

use crate::paths::{INSTALL_MARKER, Layout};

/// How long the helper waits for the application to exit.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum RelaunchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing helper argument {0}")]
    MissingArgument(&'static str),

    #[error("Invalid helper argument '{0}'")]
    InvalidArgument(String),

    #[error("Failed to spawn {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Process {pid} did not exit within {}s", .timeout.as_secs())]
    Timeout { pid: u32, timeout: Duration },
}

/// Command line of the helper process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperArgs {
    /// Process to wait for before touching the install dir.
    pub wait_pid: u32,
    /// Start the main executable after applying.
    pub relaunch: bool,
    /// The helper was started with elevated rights.
    pub elevate: bool,
}

impl HelperArgs {
    pub fn to_args(&self) -> [String; 3] {
        [
            format!("WAITPID={}", self.wait_pid),
            format!("RELAUNCH={}", u8::from(self.relaunch)),
            format!("ELEVATE={}", u8::from(self.elevate)),
        ]
    }

    /// Parse `KEY=VALUE` tokens. Every key is required exactly once.
    pub fn parse<I, S>(args: I) -> Result<Self, RelaunchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut wait_pid = None;
        let mut relaunch = None;
        let mut elevate = None;

        for arg in args {
            let arg = arg.as_ref();
            let invalid = || RelaunchError::InvalidArgument(arg.to_string());
            let (key, value) = arg.split_once('=').ok_or_else(invalid)?;
            let slot_was_empty = match key {
                "WAITPID" => wait_pid
                    .replace(value.parse::<u32>().map_err(|_| invalid())?)
                    .is_none(),
                "RELAUNCH" => relaunch.replace(parse_flag(value).ok_or_else(invalid)?).is_none(),
                "ELEVATE" => elevate.replace(parse_flag(value).ok_or_else(invalid)?).is_none(),
                _ => return Err(invalid()),
            };
            if !slot_was_empty {
                return Err(invalid());
            }
        }

        Ok(Self {
            wait_pid: wait_pid.ok_or(RelaunchError::MissingArgument("WAITPID"))?,
            relaunch: relaunch.ok_or(RelaunchError::MissingArgument("RELAUNCH"))?,
            elevate: elevate.ok_or(RelaunchError::MissingArgument("ELEVATE"))?,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

/// Copy the installed helper into `<temp>/UpdateHelper/` next to a marker
/// naming the install dir. Returns the path of the copy.
pub fn stage_helper(layout: &Layout, helper_executable: &Path) -> Result<PathBuf, RelaunchError> {
    let source = layout.install_dir().join(helper_executable);
    let dir = layout.helper_dir();
    std::fs::create_dir_all(&dir)?;
    let name = source
        .file_name()
        .ok_or_else(|| RelaunchError::InvalidArgument(source.display().to_string()))?;
    let target = dir.join(name);
    std::fs::copy(&source, &target)?;
    std::fs::write(
        dir.join(INSTALL_MARKER),
        layout.install_dir().to_string_lossy().as_bytes(),
    )?;
    Ok(target)
}

/// Start the helper detached from this process.
pub fn spawn_helper(helper: &Path, args: &HelperArgs) -> Result<(), RelaunchError> {
    let argv = args.to_args();
    let mut cmd = if args.elevate {
        elevated_command(helper, &argv)
    } else {
        let mut cmd = Command::new(helper);
        cmd.args(&argv);
        cmd
    };
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(dir) = helper.parent() {
        cmd.current_dir(dir);
    }
    tracing::info!(helper = %helper.display(), args = ?argv, "spawning update helper");
    cmd.spawn().map_err(|source| RelaunchError::Spawn {
        path: helper.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(windows)]
fn elevated_command(helper: &Path, argv: &[String; 3]) -> Command {
    let quoted = |s: &str| format!("'{}'", s.replace('\'', "''"));
    let list = argv.iter().map(|a| quoted(a)).collect::<Vec<_>>().join(",");
    let script = format!(
        "Start-Process -FilePath {} -ArgumentList {list} -Verb RunAs",
        quoted(&helper.to_string_lossy())
    );
    let mut cmd = Command::new("powershell");
    cmd.args(["-NoProfile", "-NonInteractive", "-Command", &script]);
    cmd
}

#[cfg(not(windows))]
fn elevated_command(helper: &Path, argv: &[String; 3]) -> Command {
    let mut cmd = Command::new("sudo");
    cmd.arg(helper).args(argv);
    cmd
}

/// Whether a process with `pid` exists.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) with signal 0 performs permission and existence checks only.
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(windows)]
pub fn process_alive(pid: u32) -> bool {
    Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}"), "/NH", "/FO", "CSV"])
        .output()
        .is_ok_and(|o| String::from_utf8_lossy(&o.stdout).contains(&format!("\"{pid}\"")))
}

/// Poll until `pid` has exited.
pub async fn wait_for_exit(pid: u32, timeout: Duration) -> Result<(), RelaunchError> {
    let deadline = tokio::time::Instant::now() + timeout;
    while process_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            return Err(RelaunchError::Timeout { pid, timeout });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    tracing::debug!(pid, "waited process has exited");
    Ok(())
}

/// Start the main executable from the install dir.
pub fn relaunch_app(layout: &Layout, main_executable: &Path) -> Result<(), RelaunchError> {
    let exe = layout.install_dir().join(main_executable);
    tracing::info!(exe = %exe.display(), "relaunching application");
    Command::new(&exe)
        .current_dir(layout.install_dir())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| RelaunchError::Spawn { path: exe, source })?;
    Ok(())
}
