//! Channel, manifest and version types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::Sha256Digest;

/// A release version string, stored as published by the update server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// Create a new version from the given string (stored as-is).
    pub fn new(v: &str) -> Self {
        Self(v.to_string())
    }

    /// Return the version string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if `self` is a newer release than `current`.
    pub fn is_newer_than(&self, current: &str) -> bool {
        crate::version::is_newer(current, &self.0)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for Version {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for Version {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A named update feed.
///
/// Owned by the host application's settings; the updater only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Display and selection name (e.g. `stable`, `beta`).
    pub name: String,
    /// Absolute URL of the channel's manifest document.
    pub url: String,
    /// Minimum interval between remote checks, serialized as whole seconds.
    #[serde(with = "ttl_secs")]
    pub ttl: Duration,
}

impl Channel {
    /// Create a channel from its parts.
    pub fn new(name: impl Into<String>, url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ttl,
        }
    }
}

mod ttl_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(ttl: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(ttl.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Errors that can occur when decoding or validating a [`Manifest`].
#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    /// The text is not a well-formed manifest document.
    #[error("Invalid manifest: {0}")]
    Parse(#[from] serde_json::Error),

    /// A required field is present but empty.
    #[error("Empty field: {0}")]
    EmptyField(&'static str),
}

/// One available release, as served by a channel.
///
/// `url` is relative to the channel URL (an absolute URL is also accepted,
/// since joining an absolute URL yields itself).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Publication timestamp of the release.
    pub date: DateTime<Utc>,
    /// Package location, relative to the channel URL.
    pub url: String,
    /// Version string of the release.
    pub version: Version,
    /// Optional digest of the package; verified after download when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<Sha256Digest>,
}

impl Manifest {
    /// Decode a manifest from its wire text and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Parse`] for malformed JSON or missing fields and
    /// [`ManifestError::EmptyField`] if `url` or `version` is empty.
    pub fn from_json(text: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Encode this manifest as wire text.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Parse`] if serialization fails.
    pub fn to_json(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check that the required string fields are non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::EmptyField`] naming the first empty field.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.url.trim().is_empty() {
            return Err(ManifestError::EmptyField("url"));
        }
        if self.version.trim().is_empty() {
            return Err(ManifestError::EmptyField("version"));
        }
        Ok(())
    }

    /// The package file name, i.e. the last path segment of `url` without
    /// query or fragment.
    pub fn package_file_name(&self) -> &str {
        let path = self.url.split(['?', '#']).next().unwrap_or_default();
        path.rsplit('/').next().unwrap_or_default()
    }
}
