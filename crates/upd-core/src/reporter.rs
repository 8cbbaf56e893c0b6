//! Reporter trait for dependency injection
//!
//! The pipeline reports progress and status through this trait so it is not
//! coupled to a specific terminal or GUI front end. Implementations must be
//! `Send + Sync`: download and extraction report from worker contexts.

use std::sync::{Arc, Mutex, PoisonError};

use upd_schema::{ApplyPhase, ApplyProgress};

pub trait Reporter: Send + Sync {
    /// Overall apply progress changed.
    fn progress(&self, progress: ApplyProgress);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for Arc<T> {
    fn progress(&self, progress: ApplyProgress) {
        (**self).progress(progress)
    }
    fn info(&self, msg: &str) {
        (**self).info(msg)
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg)
    }
    fn error(&self, msg: &str) {
        (**self).error(msg)
    }
}

/// A reporter that does nothing (for tests and headless runs)
#[derive(Clone, Copy, Default, Debug)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn progress(&self, _progress: ApplyProgress) {}
    fn info(&self, _msg: &str) {}
    fn warning(&self, _msg: &str) {}
    fn error(&self, _msg: &str) {}
}

/// A window `[min, min + len]` of the overall progress bar that one
/// sub-operation reports into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressRange {
    pub min: u8,
    pub len: u8,
}

impl ProgressRange {
    pub fn new(min: u8, len: u8) -> Self {
        Self { min, len }
    }

    /// The window a phase occupies.
    pub fn of(phase: ApplyPhase) -> Self {
        match phase.span() {
            Some((start, end)) => Self::new(start, end - start),
            None => Self::new(0, 0),
        }
    }

    /// Map `done / total` into the window. Unknown totals map to `min`.
    pub fn map(&self, done: u64, total: u64) -> u8 {
        if total == 0 {
            return self.min;
        }
        let step = u128::from(done.min(total)) * u128::from(self.len) / u128::from(total);
        self.min.saturating_add(step as u8)
    }

    pub fn end(&self) -> u8 {
        self.min.saturating_add(self.len)
    }
}

/// Forwards progress to a [`Reporter`], never letting the percentage go
/// backwards.
pub struct ProgressSink {
    reporter: Arc<dyn Reporter>,
    high_water: Mutex<u8>,
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("high_water", &*self.high_water.lock().unwrap_or_else(PoisonError::into_inner))
            .finish_non_exhaustive()
    }
}

impl ProgressSink {
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self {
            reporter,
            high_water: Mutex::new(0),
        }
    }

    /// Report `percent` in `phase`, clamped to `[previous, 100]`.
    ///
    /// The lock is held while the reporter is called so observers see
    /// events in the order their percentages were computed.
    pub fn report(&self, percent: u8, phase: ApplyPhase) {
        let mut high = self.high_water.lock().unwrap_or_else(PoisonError::into_inner);
        let percent = percent.clamp(*high, 100);
        *high = percent;
        self.reporter.progress(ApplyProgress::new(percent, phase));
    }

    pub fn enter(&self, phase: ApplyPhase) {
        self.report(ApplyProgress::start_of(phase).percent, phase);
    }

    pub fn complete(&self, phase: ApplyPhase) {
        self.report(ApplyProgress::end_of(phase).percent, phase);
    }

    /// Terminal failure event at the current percentage.
    pub fn fail(&self) {
        let high = *self.high_water.lock().unwrap_or_else(PoisonError::into_inner);
        self.report(high, ApplyPhase::Failed);
    }

    pub fn reporter(&self) -> &dyn Reporter {
        self.reporter.as_ref()
    }
}
