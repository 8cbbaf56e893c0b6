//! SHA-256 digest newtype.

use serde::{Deserialize, Deserializer, Serialize};

/// Error returned when a string is not a valid SHA-256 hex digest.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    /// The hex portion is not exactly 64 characters long.
    #[error("Invalid SHA256 digest: expected 64 hex characters, got {len} in '{input}'")]
    Length {
        /// Length of the hex portion.
        len: usize,
        /// The rejected input.
        input: String,
    },

    /// The input contains characters outside `[0-9a-fA-F]`.
    #[error("Invalid SHA256 digest: contains non-hex characters in '{0}'")]
    NotHex(String),
}

/// A validated SHA256 digest (64 hex characters)
///
/// This newtype ensures that digests carried by manifests are validated at
/// deserialization time, so a malformed value is a decode error rather than a
/// confusing mismatch after a full download.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Create a new `Sha256Digest`, validating the input.
    ///
    /// Accepts strings with or without a `sha256:` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the hex portion is not exactly 64 ASCII hex characters.
    pub fn new(s: impl Into<String>) -> Result<Self, DigestError> {
        let s = s.into();
        let hex = s.strip_prefix("sha256:").unwrap_or(&s);

        if hex.len() != 64 {
            return Err(DigestError::Length {
                len: hex.len(),
                input: s.clone(),
            });
        }

        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::NotHex(s.clone()));
        }

        Ok(Self(hex.to_lowercase()))
    }

    /// Build a digest from raw hash output bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Get the digest as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
