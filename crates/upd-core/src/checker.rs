//! Manifest checks: decide whether a fetch is due, fetch, classify.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, Url};
use thiserror::Error;
use upd_schema::{Channel, Manifest, ManifestError};

use crate::schedule;
use crate::state::StateStore;

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Invalid channel URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Parameters of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckRequest {
    pub now: DateTime<Utc>,
    /// Fetch even when the current window has already been checked.
    pub forced: bool,
}

impl CheckRequest {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now, forced: false }
    }

    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn forced(mut self, forced: bool) -> Self {
        self.forced = forced;
        self
    }
}

/// What a check concluded.
#[derive(Debug, Default)]
pub struct CheckOutcome {
    pub manifest: Option<Manifest>,
    pub error: Option<CheckError>,
    /// Whether the network was contacted.
    pub fetched: bool,
}

/// Source of manifest text for a channel.
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch(&self, channel: &Channel, forced: bool) -> Result<String, CheckError>;
}

/// Fetches manifests over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(client: Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
        }
    }
}

/// The channel URL, with `force=true` appended for forced checks.
pub fn manifest_url(channel: &Channel, forced: bool) -> Result<Url, CheckError> {
    let mut url = Url::parse(&channel.url).map_err(|e| CheckError::InvalidUrl {
        url: channel.url.clone(),
        reason: e.to_string(),
    })?;
    if forced {
        url.query_pairs_mut().append_pair("force", "true");
    }
    Ok(url)
}

/// Resolve a manifest's package URL against its channel URL.
pub fn package_url(channel: &Channel, manifest: &Manifest) -> Result<Url, CheckError> {
    Url::parse(&channel.url)
        .and_then(|base| base.join(&manifest.url))
        .map_err(|e| CheckError::InvalidUrl {
            url: manifest.url.clone(),
            reason: e.to_string(),
        })
}

#[async_trait]
impl ManifestFetcher for HttpFetcher {
    async fn fetch(&self, channel: &Channel, forced: bool) -> Result<String, CheckError> {
        let url = manifest_url(channel, forced)?;
        tracing::debug!(%url, forced, "fetching manifest");
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CheckError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }
}

/// Run one check against `channel`.
///
/// When no check is due and none is forced, the outcome is rebuilt from the
/// cached manifest without touching the network. Otherwise the next check
/// time is advanced and the cache cleared (and persisted) before fetching;
/// a successful fetch is cached and persisted again.
pub async fn run_check<Tz: TimeZone>(
    channel: &Channel,
    store: &StateStore,
    fetcher: &dyn ManifestFetcher,
    request: CheckRequest,
    tz: &Tz,
) -> CheckOutcome {
    let now = request.now;
    if !request.forced && !store.snapshot().is_check_due(now) {
        return match store.snapshot().cached_manifest() {
            None => CheckOutcome::default(),
            Some(Ok(manifest)) => CheckOutcome {
                manifest: Some(manifest),
                ..Default::default()
            },
            Some(Err(e)) => CheckOutcome {
                error: Some(e.into()),
                ..Default::default()
            },
        };
    }

    let next = if request.forced {
        schedule::forced_next_check(now)
    } else {
        schedule::next_check(now, channel.ttl, tz)
    };
    store.update(|s| {
        s.last_check = Some(now);
        s.next_check = Some(next);
        s.manifest.clear();
    });
    if let Err(e) = store.save() {
        tracing::warn!(error = %e, "failed to persist check schedule");
    }

    let result = match fetcher.fetch(channel, request.forced).await {
        Ok(text) => Manifest::from_json(&text)
            .map(|m| (m, text))
            .map_err(CheckError::from),
        Err(e) => Err(e),
    };

    match result {
        Ok((manifest, text)) => {
            store.update(|s| s.manifest = text);
            if let Err(e) = store.save() {
                tracing::warn!(error = %e, "failed to persist manifest");
            }
            tracing::info!(channel = %channel.name, version = %manifest.version, "manifest received");
            CheckOutcome {
                manifest: Some(manifest),
                error: None,
                fetched: true,
            }
        }
        Err(e) => {
            tracing::warn!(channel = %channel.name, error = %e, "update check failed");
            CheckOutcome {
                manifest: None,
                error: Some(e),
                fetched: true,
            }
        }
    }
}
