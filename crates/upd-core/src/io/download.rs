//! Streaming package download with progress and optional SHA256 check.

use std::io::Write;
use std::path::Path;

use futures::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use upd_schema::Sha256Digest;

use crate::reporter::ProgressRange;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Download cancelled")]
    Cancelled,
}

/// Result of a completed download.
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub bytes: u64,
    pub sha256: Sha256Digest,
}

/// Request for a download operation
pub struct DownloadRequest<'a> {
    pub client: &'a Client,
    pub url: &'a str,
    pub dest: &'a Path,
    pub user_agent: &'a str,
    pub expected_hash: Option<&'a Sha256Digest>,
    pub range: ProgressRange,
    pub cancel: Option<&'a CancellationToken>,
}

impl<'a> DownloadRequest<'a> {
    pub fn new(client: &'a Client, url: &'a str, dest: &'a Path, user_agent: &'a str) -> Self {
        Self {
            client,
            url,
            dest,
            user_agent,
            expected_hash: None,
            range: ProgressRange::new(0, 100),
            cancel: None,
        }
    }

    pub fn with_expected_hash(mut self, hash: Option<&'a Sha256Digest>) -> Self {
        self.expected_hash = hash;
        self
    }

    pub fn with_range(mut self, range: ProgressRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_cancel(mut self, cancel: &'a CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Stream the body to `dest`, calling `on_progress` with a percentage
    /// inside `range` after every chunk.
    ///
    /// Every progress call happens before this future resolves. On error
    /// the destination may hold a partial file; the caller cleans up.
    pub async fn execute(
        self,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<Downloaded, DownloadError> {
        let response = self
            .client
            .get(self.url)
            .header(reqwest::header::USER_AGENT, self.user_agent)
            .send()
            .await?
            .error_for_status()?;

        let total_size = response.content_length().unwrap_or(0);
        on_progress(self.range.min);

        if let Some(parent) = self.dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(self.dest).await?;
        let mut stream = response.bytes_stream();
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            if self.cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(DownloadError::Cancelled);
            }
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            hasher.write_all(&chunk)?;
            downloaded += chunk.len() as u64;
            if total_size > 0 {
                on_progress(self.range.map(downloaded, total_size));
            }
        }

        file.flush().await?;
        on_progress(self.range.end());

        let actual = Sha256Digest::from_bytes(&hasher.finalize());
        if let Some(expected) = self.expected_hash
            && *expected != actual
        {
            tokio::fs::remove_file(self.dest).await.ok();
            return Err(DownloadError::HashMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }

        tracing::debug!(url = self.url, bytes = downloaded, "download complete");
        Ok(Downloaded {
            bytes: downloaded,
            sha256: actual,
        })
    }
}
