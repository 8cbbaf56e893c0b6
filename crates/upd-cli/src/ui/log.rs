//! Reporter for headless runs: forwards everything to `tracing`.

use std::sync::atomic::{AtomicU8, Ordering};

use upd_core::Reporter;
use upd_schema::{ApplyPhase, ApplyProgress};

/// Logs phase changes and every tenth percent instead of every event.
#[derive(Debug, Default)]
pub struct LogReporter {
    last_bucket: AtomicU8,
}

impl LogReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `progress` crosses into a new 10% bucket or ends the run.
    fn should_log(&self, progress: ApplyProgress) -> bool {
        let bucket = progress.percent / 10;
        let previous = self.last_bucket.swap(bucket, Ordering::Relaxed);
        bucket != previous || matches!(progress.phase, ApplyPhase::Done | ApplyPhase::Failed)
    }
}

impl Reporter for LogReporter {
    fn progress(&self, progress: ApplyProgress) {
        if self.should_log(progress) {
            tracing::info!(percent = progress.percent, phase = %progress.phase, "update progress");
        }
    }

    fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    fn warning(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }
}
