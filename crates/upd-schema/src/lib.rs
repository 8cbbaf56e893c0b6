//! Shared types and wire format for upd.
//!
//! Everything in this crate is either exchanged with an update server
//! ([`Manifest`]), persisted between runs ([`UpdateState`]), read from the
//! host application's settings ([`Channel`]) or pushed to a progress
//! observer ([`ApplyProgress`]). None of it performs IO.

pub mod hash;
pub mod progress;
pub mod state;
pub mod types;
pub mod version;

// Re-exports
pub use hash::*;
pub use progress::{ApplyPhase, ApplyProgress};
pub use state::UpdateState;
pub use types::*;

/// Minimum spacing between two remote checks, whatever the channel TTL says.
pub const MIN_CHECK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);
