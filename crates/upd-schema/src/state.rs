//! Persisted scheduling state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Manifest, ManifestError};

/// State carried between runs of the host application.
///
/// `manifest` holds the raw text of the last manifest fetched, or the empty
/// string when nothing is cached (including while a fetch is in flight).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateState {
    /// When the last remote check started.
    pub last_check: Option<DateTime<Utc>>,
    /// Earliest time the next remote check may run.
    pub next_check: Option<DateTime<Utc>>,
    /// Raw text of the last manifest received.
    pub manifest: String,
    /// Channel chosen at runtime; overrides the one in `updater.toml`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl UpdateState {
    /// Returns `true` if a remote check is due at `now`.
    ///
    /// A state that has never scheduled a check is always due.
    pub fn is_check_due(&self, now: DateTime<Utc>) -> bool {
        self.next_check.is_none_or(|next| now >= next)
    }

    /// Decode the cached manifest text.
    ///
    /// Returns `None` when nothing is cached.
    pub fn cached_manifest(&self) -> Option<Result<Manifest, ManifestError>> {
        if self.manifest.trim().is_empty() {
            None
        } else {
            Some(Manifest::from_json(&self.manifest))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_fresh_state_is_due() {
        let state = UpdateState::default();
        assert!(state.is_check_due(Utc::now()));
        assert!(state.cached_manifest().is_none());
    }

    #[test]
    fn test_due_at_and_after_next_check() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let state = UpdateState {
            next_check: Some(t),
            ..Default::default()
        };
        assert!(!state.is_check_due(t - Duration::seconds(1)));
        assert!(state.is_check_due(t));
        assert!(state.is_check_due(t + Duration::seconds(1)));
    }

    #[test]
    fn test_deserialize_partial_state() {
        let state: UpdateState = serde_json::from_str(r#"{"manifest":""}"#).unwrap();
        assert_eq!(state, UpdateState::default());
    }

    #[test]
    fn test_channel_choice_persists() {
        let json = serde_json::to_string(&UpdateState::default()).unwrap();
        assert!(!json.contains("channel"));

        let state = UpdateState {
            channel: Some("beta".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: UpdateState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.channel.as_deref(), Some("beta"));
    }

    #[test]
    fn test_cached_manifest_reports_garbage() {
        let state = UpdateState {
            manifest: "not json".to_string(),
            ..Default::default()
        };
        assert!(matches!(state.cached_manifest(), Some(Err(_))));
    }
}
