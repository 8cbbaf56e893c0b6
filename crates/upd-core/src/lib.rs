//! Core library for upd: the self-update pipeline of a desktop application.
//!
//! [`Updater`] ties the pieces together: [`checker`] decides when to contact
//! the channel, [`io::download`] and [`io::extract`] stage a release,
//! [`verify`] checks its signing identity against the installed helper, and
//! [`apply`] swaps it into place. [`relaunch`] covers running all of that in
//! a helper process while the application is closed.

pub mod apply;
pub mod checker;
pub mod config;
pub mod elevation;
pub mod error;
pub mod io;
pub mod paths;
pub mod relaunch;
pub mod reporter;
pub mod schedule;
pub mod state;
pub mod updater;
pub mod verify;

pub use checker::{CheckError, CheckRequest};
pub use config::UpdaterConfig;
pub use error::{ApplyFailure, FailureKind, UpdateError};
pub use paths::Layout;
pub use reporter::{NullReporter, Reporter};
pub use updater::{ApplyOutcome, Updater};
