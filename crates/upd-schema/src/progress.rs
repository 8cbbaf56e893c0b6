//! Apply progress events.

use serde::{Deserialize, Serialize};

/// Step of the apply state machine.
///
/// Variants are declared in execution order; `Failed` is absorbing and can
/// follow any step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPhase {
    /// Nothing has started.
    Idle,
    /// Checking that the install directory is writable.
    ProbeWritable,
    /// Removing leftovers of a previous attempt.
    CleanStale,
    /// Fetching the release package.
    Downloading,
    /// Unpacking the package into the staging directory.
    Extracting,
    /// Checking that the staging directory holds a complete release.
    ReadyCheck,
    /// Comparing code-signing subjects of staged executables.
    Verifying,
    /// Swapping staged files into the install directory.
    Applying,
    /// Finished successfully.
    Done,
    /// Stopped on an error.
    Failed,
}

impl ApplyPhase {
    /// Percentage window `(start, end)` this phase occupies in the overall
    /// 0..=100 progress bar. `None` for phases that carry no work.
    pub fn span(self) -> Option<(u8, u8)> {
        match self {
            Self::ProbeWritable => Some((0, 1)),
            Self::CleanStale => Some((1, 2)),
            Self::Downloading => Some((2, 67)),
            Self::Extracting => Some((67, 97)),
            Self::ReadyCheck => Some((97, 98)),
            Self::Verifying => Some((98, 99)),
            Self::Applying => Some((99, 100)),
            Self::Done => Some((100, 100)),
            Self::Idle | Self::Failed => None,
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ProbeWritable => "checking permissions",
            Self::CleanStale => "cleaning up",
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::ReadyCheck => "checking package",
            Self::Verifying => "verifying signatures",
            Self::Applying => "installing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ApplyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One progress observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyProgress {
    /// Overall completion, `0..=100`.
    pub percent: u8,
    /// Step the pipeline is in.
    pub phase: ApplyPhase,
}

impl ApplyProgress {
    /// Create a progress value, clamping `percent` to 100.
    pub fn new(percent: u8, phase: ApplyPhase) -> Self {
        Self {
            percent: percent.min(100),
            phase,
        }
    }

    /// Progress at the start of `phase`.
    pub fn start_of(phase: ApplyPhase) -> Self {
        let percent = phase.span().map_or(0, |(start, _)| start);
        Self::new(percent, phase)
    }

    /// Progress at the end of `phase`.
    pub fn end_of(phase: ApplyPhase) -> Self {
        let percent = phase.span().map_or(0, |(_, end)| end);
        Self::new(percent, phase)
    }
}
