//! Terminal output.
//!
//! ```text
//! Commands / Updater ──► Output ──► UiActor thread ──► stdout
//!                      (Reporter)   (one writer)
//! ```
//!
//! Commands and the apply pipeline never print directly. They send events
//! through a cloneable [`Output`] handle; a single actor thread owns the
//! terminal and renders them in order, so progress from download and
//! extraction tasks cannot tear the progress line.
//!
//! The helper runs without a terminal and reports through [`LogReporter`].

pub mod actor;
pub mod log;
pub mod output;
pub mod progress;
pub mod theme;

pub use log::LogReporter;
pub use output::Output;
pub use theme::Theme;
