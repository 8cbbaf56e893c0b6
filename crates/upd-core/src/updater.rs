//! The update pipeline for one installation.
//!
//! `check()` decides whether the channel is due and caches what it finds.
//! `apply()` walks `ProbeWritable → CleanStale → Downloading → Extracting →
//! ReadyCheck → Verifying → Applying → Done`, reporting progress through a
//! [`Reporter`] and cleaning the scratch directories on every exit path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use upd_schema::{ApplyPhase, Channel, Manifest, UpdateState, Version};

use crate::apply::{self, Applier, Cleaned, Recovery};
use crate::checker::{self, CheckError, CheckRequest, HttpFetcher, ManifestFetcher};
use crate::config::UpdaterConfig;
use crate::elevation::{self, Elevation};
use crate::error::{ApplyFailure, UpdateError};
use crate::io::download::DownloadRequest;
use crate::io::extract::{self, ArchiveFormat, ExtractOptions};
use crate::paths::{self, CONFIG_FILE, Layout};
use crate::relaunch::{self, HelperArgs};
use crate::reporter::{NullReporter, ProgressRange, ProgressSink, Reporter};
use crate::state::StateStore;
use crate::verify::{PlatformSignatureReader, SignatureReader, Verdict, Verifier};

/// How an `apply()` that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The release was swapped in.
    Applied { version: Version },
    /// Staging did not hold a complete release; nothing was moved.
    NothingToApply,
}

/// Resets the in-flight flag when an apply ends.
struct ApplyGuard<'a>(&'a AtomicBool);

impl Drop for ApplyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Updater {
    config: UpdaterConfig,
    layout: Layout,
    state: StateStore,
    client: Client,
    fetcher: Arc<dyn ManifestFetcher>,
    signatures: Arc<dyn SignatureReader>,
    reporter: Arc<dyn Reporter>,
    last_update: Option<Manifest>,
    last_check_error: Option<CheckError>,
    last_apply_error: Mutex<Option<ApplyFailure>>,
    force_next_check: bool,
    applying: AtomicBool,
}

impl std::fmt::Debug for Updater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updater")
            .field("product", &self.config.product_name)
            .field("layout", &self.layout)
            .field("last_update", &self.last_update)
            .finish_non_exhaustive()
    }
}

impl Updater {
    /// A channel chosen at runtime and recorded in the update state wins
    /// over the one named in `config`, as long as it is still defined.
    pub fn new(mut config: UpdaterConfig, layout: Layout) -> Self {
        let client = Client::new();
        let fetcher = Arc::new(HttpFetcher::new(client.clone(), config.user_agent()));
        let state = StateStore::load(layout.state_path());
        if let Some(chosen) = state.snapshot().channel {
            if config.channels().iter().any(|c| c.name == chosen) {
                config.channel = Some(chosen);
            } else {
                tracing::warn!(channel = %chosen, "stored channel no longer configured, ignoring");
            }
        }
        Self {
            config,
            layout,
            state,
            client,
            fetcher,
            signatures: Arc::new(PlatformSignatureReader),
            reporter: Arc::new(NullReporter),
            last_update: None,
            last_check_error: None,
            last_apply_error: Mutex::new(None),
            force_next_check: false,
            applying: AtomicBool::new(false),
        }
    }

    /// Load `updater.toml` from the discovered install dir.
    pub fn open() -> Result<Self, UpdateError> {
        let install = paths::try_install_dir().ok_or(UpdateError::NoInstallDir)?;
        Self::open_at(install)
    }

    pub fn open_at(install_dir: impl Into<PathBuf>) -> Result<Self, UpdateError> {
        let install_dir = install_dir.into();
        let config = UpdaterConfig::from_file(&install_dir.join(CONFIG_FILE))?;
        let layout = Layout::resolve(install_dir, config.temp_dir.as_deref());
        Ok(Self::new(config, layout))
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ManifestFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_signature_reader(mut self, reader: Arc<dyn SignatureReader>) -> Self {
        self.signatures = reader;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Use `client` for package downloads and the default manifest fetcher.
    pub fn with_client(mut self, client: Client) -> Self {
        self.fetcher = Arc::new(HttpFetcher::new(client.clone(), self.config.user_agent()));
        self.client = client;
        self
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn state(&self) -> UpdateState {
        self.state.snapshot()
    }

    pub fn channels(&self) -> &[Channel] {
        self.config.channels()
    }

    pub fn channel(&self) -> Option<&Channel> {
        self.config.selected_channel()
    }

    /// Select a channel, persist the choice, and force the next check.
    ///
    /// The choice is written to both `updater.toml` and the update state;
    /// the state copy survives a release that replaces `updater.toml`.
    pub fn set_channel(&mut self, name: &str) -> Result<(), UpdateError> {
        self.config.set_channel(name)?;
        self.state.update(|s| s.channel = Some(name.to_string()));
        self.state.save()?;
        self.force_next_check = true;
        tracing::info!(channel = name, "channel selected");
        Ok(())
    }

    /// Whether the next check must be forced. Clears the flag.
    pub fn take_forced(&mut self) -> bool {
        std::mem::take(&mut self.force_next_check)
    }

    pub fn last_update(&self) -> Option<&Manifest> {
        self.last_update.as_ref()
    }

    pub fn last_check_error(&self) -> Option<&CheckError> {
        self.last_check_error.as_ref()
    }

    pub fn last_apply_error(&self) -> Option<ApplyFailure> {
        self.last_apply_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_applying(&self) -> bool {
        self.applying.load(Ordering::Acquire)
    }

    /// The manifest from the last check, else the one cached on disk.
    pub fn current_manifest(&self) -> Option<Manifest> {
        self.last_update
            .clone()
            .or_else(|| self.state.snapshot().cached_manifest().and_then(Result::ok))
    }

    /// Whether the current manifest is newer than the running product.
    pub fn update_available(&self) -> bool {
        self.current_manifest()
            .is_some_and(|m| m.version.is_newer_than(&self.config.product_version))
    }

    /// Check the selected channel. Does nothing when no channel is selected.
    pub async fn check(&mut self, request: CheckRequest) {
        let Some(channel) = self.config.selected_channel().cloned() else {
            tracing::debug!("no channel selected, updates disabled");
            return;
        };
        let outcome = checker::run_check(
            &channel,
            &self.state,
            self.fetcher.as_ref(),
            request,
            &chrono::Local,
        )
        .await;
        self.last_update = outcome.manifest;
        self.last_check_error = outcome.error;
    }

    /// Staging holds a complete release ready to be swapped in.
    pub fn is_ready(&self) -> bool {
        apply::is_stage_ready(&self.layout, &self.config.main_executable)
    }

    pub fn elevation(&self) -> Elevation {
        elevation::check(self.layout.install_dir())
    }

    /// Finish or undo an interrupted apply.
    pub fn recover(&self) -> Result<Option<Recovery>, UpdateError> {
        Ok(apply::recover(
            &self.layout,
            &self.config.settings_file,
            &self.state,
        )?)
    }

    /// Remove scratch directories; `helper` also removes the staged helper.
    pub fn clean(&self, helper: bool) -> Result<Cleaned, UpdateError> {
        let cleaned = apply::clean_scratch(&self.layout)?;
        if helper {
            match std::fs::remove_dir_all(self.layout.helper_dir()) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    return Err(relaunch::RelaunchError::Io(e).into());
                }
                _ => {}
            }
        }
        Ok(cleaned)
    }

    /// Stage and spawn the helper that applies after this process exits.
    pub fn launch_helper(&self, relaunch_after: bool) -> Result<HelperArgs, UpdateError> {
        let args = HelperArgs {
            wait_pid: std::process::id(),
            relaunch: relaunch_after,
            elevate: self.elevation().is_required(),
        };
        let helper = relaunch::stage_helper(&self.layout, &self.config.helper_executable)?;
        relaunch::spawn_helper(&helper, &args)?;
        Ok(args)
    }

    /// Run the apply pipeline.
    ///
    /// A second call while one is running returns [`UpdateError::Busy`]
    /// without touching the recorded error of the running one.
    pub async fn apply(&self, cancel: &CancellationToken) -> Result<ApplyOutcome, UpdateError> {
        if self
            .applying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(UpdateError::Busy);
        }
        let _guard = ApplyGuard(&self.applying);

        let sink = Arc::new(ProgressSink::new(self.reporter.clone()));
        sink.report(0, ApplyPhase::Idle);

        let result = self.run_apply(&sink, cancel).await;

        if let Err(e) = apply::clean_scratch(&self.layout) {
            tracing::warn!(error = %e, "cleanup after apply failed");
        }

        let mut slot = self
            .last_apply_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match &result {
            Ok(outcome) => {
                sink.report(100, ApplyPhase::Done);
                tracing::info!(?outcome, "apply finished");
                *slot = None;
            }
            Err(e) => {
                if e.is_security() {
                    tracing::error!(error = %e, "update rejected");
                } else {
                    tracing::warn!(error = %e, "update failed");
                }
                self.reporter.error(&e.to_string());
                sink.fail();
                *slot = Some(ApplyFailure::from(e));
            }
        }
        drop(slot);
        result
    }

    async fn run_apply(
        &self,
        sink: &Arc<ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<ApplyOutcome, UpdateError> {
        let install = self.layout.install_dir();

        sink.enter(ApplyPhase::ProbeWritable);
        elevation::probe_writable(install).map_err(|source| UpdateError::NotWritable {
            path: install.to_path_buf(),
            elevation: if elevation::is_elevated() {
                Elevation::AlreadyElevated
            } else {
                Elevation::Required
            },
            source,
        })?;
        sink.complete(ApplyPhase::ProbeWritable);
        ensure_live(cancel)?;

        sink.enter(ApplyPhase::CleanStale);
        if let Some(recovery) = self.recover()? {
            self.reporter
                .warning(&format!("Recovered an interrupted update: {recovery:?}"));
        }
        apply::clean_scratch(&self.layout)?;
        sink.complete(ApplyPhase::CleanStale);
        ensure_live(cancel)?;

        let manifest = self.current_manifest().ok_or(UpdateError::NoManifest)?;
        let channel = self.config.selected_channel().ok_or(UpdateError::NoChannel)?;
        let url = checker::package_url(channel, &manifest)?;
        let format = ArchiveFormat::detect(manifest.package_file_name())?;
        let archive = self.layout.archive_path(format);
        let stage = self.layout.stage_dir();

        sink.enter(ApplyPhase::Downloading);
        tracing::info!(version = %manifest.version, %url, "downloading update");
        let user_agent = self.config.user_agent();
        let on_download = |p: u8| sink.report(p, ApplyPhase::Downloading);
        DownloadRequest::new(&self.client, url.as_str(), &archive, &user_agent)
            .with_expected_hash(manifest.sha256.as_ref())
            .with_range(ProgressRange::of(ApplyPhase::Downloading))
            .with_cancel(cancel)
            .execute(&on_download)
            .await?;
        sink.complete(ApplyPhase::Downloading);
        ensure_live(cancel)?;

        sink.enter(ApplyPhase::Extracting);
        let task_sink = Arc::clone(sink);
        let task_cancel = cancel.clone();
        let task_stage = stage.clone();
        tokio::task::spawn_blocking(move || {
            let on_progress = move |p: u8| task_sink.report(p, ApplyPhase::Extracting);
            extract::extract_package(
                &archive,
                &task_stage,
                &ExtractOptions {
                    range: ProgressRange::of(ApplyPhase::Extracting),
                    on_progress: &on_progress,
                    cancel: Some(&task_cancel),
                },
            )
        })
        .await
        .map_err(|e| UpdateError::Task(e.to_string()))??;
        sink.complete(ApplyPhase::Extracting);
        ensure_live(cancel)?;

        sink.enter(ApplyPhase::ReadyCheck);
        if !self.is_ready() {
            tracing::info!(stage = %stage.display(), "staging is not ready, nothing to apply");
            return Ok(ApplyOutcome::NothingToApply);
        }
        sink.complete(ApplyPhase::ReadyCheck);
        ensure_live(cancel)?;

        sink.enter(ApplyPhase::Verifying);
        let helper = install.join(&self.config.helper_executable);
        let verifier = Verifier::from_helper(self.signatures.as_ref(), &helper)?;
        if verifier.verify_dir(&stage)? == Verdict::Unverifiable {
            self.reporter
                .warning("Installed helper is unsigned; update signatures were not verified");
        }
        sink.complete(ApplyPhase::Verifying);
        ensure_live(cancel)?;

        // Past this point the swap runs to completion.
        sink.enter(ApplyPhase::Applying);
        Applier::new(&self.layout, &self.config.settings_file, &self.state)
            .run(manifest.version.as_str())?;
        sink.complete(ApplyPhase::Applying);

        Ok(ApplyOutcome::Applied {
            version: manifest.version,
        })
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), UpdateError> {
    if cancel.is_cancelled() {
        return Err(UpdateError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::tests::{MANIFEST, StubFetcher};
    use std::time::Duration;

    fn updater(dir: &std::path::Path) -> Updater {
        let mut config = UpdaterConfig::new("Acme", "Acme.exe", "upd-helper.exe", "settings.ini");
        config.product_version = "1.0.0".to_string();
        config.channels = vec![
            Channel::new("stable", "https://updates.example.com/stable.json", Duration::from_secs(86_400)),
            Channel::new("beta", "https://updates.example.com/beta.json", Duration::from_secs(86_400)),
        ];
        config.channel = Some("stable".to_string());
        let layout = Layout::new(dir.join("Acme"), dir.join("Acme.update"));
        std::fs::create_dir_all(layout.install_dir()).unwrap();
        Updater::new(config, layout)
    }

    #[tokio::test]
    async fn test_check_without_channel_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::serving(MANIFEST));
        let mut up = updater(dir.path()).with_fetcher(fetcher.clone());
        up.config.channel = None;

        up.check(CheckRequest::now()).await;

        assert_eq!(fetcher.calls(), 0);
        assert!(up.last_update().is_none());
        assert!(up.last_check_error().is_none());
    }

    #[tokio::test]
    async fn test_channel_switch_forces_one_check() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::serving(MANIFEST));
        let mut up = updater(dir.path()).with_fetcher(fetcher.clone());

        up.check(CheckRequest::now()).await;
        let forced = up.take_forced();
        up.check(CheckRequest::now().forced(forced)).await;
        assert_eq!(fetcher.calls(), 1);

        up.set_channel("beta").unwrap();
        let forced = up.take_forced();
        assert!(forced);
        up.check(CheckRequest::now().forced(forced)).await;
        assert_eq!(fetcher.calls(), 2);
        assert!(!up.take_forced());

        assert!(up.update_available());
        assert_eq!(up.last_update().unwrap().version.as_str(), "2.0.0");
    }

    #[test]
    fn test_channel_choice_outlives_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut up = updater(dir.path());
        up.set_channel("beta").unwrap();
        assert_eq!(up.state().channel.as_deref(), Some("beta"));

        // Fresh config still names "stable".
        let reopened = updater(dir.path());
        assert_eq!(reopened.channel().unwrap().name, "beta");
    }

    #[test]
    fn test_unknown_stored_channel_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let up = updater(dir.path());
        up.state.update(|s| s.channel = Some("nightly".to_string()));
        up.state.save().unwrap();

        let reopened = updater(dir.path());
        assert_eq!(reopened.channel().unwrap().name, "stable");
    }

    #[tokio::test]
    async fn test_apply_without_manifest_fails_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let up = updater(dir.path());

        let err = up.apply(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, UpdateError::NoManifest));
        assert_eq!(
            up.last_apply_error().unwrap().kind,
            crate::error::FailureKind::NothingToApply
        );
        assert!(!up.is_applying());
    }

    #[tokio::test]
    async fn test_busy_apply_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let up = updater(dir.path());
        up.applying.store(true, Ordering::Release);

        let err = up.apply(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, UpdateError::Busy));
        assert!(up.last_apply_error().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let up = updater(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = up.apply(&cancel).await.unwrap_err();
        assert!(matches!(err, UpdateError::Cancelled));
    }
}
