//! End-to-end apply against a mock update server.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use upd_core::error::FailureKind;
use upd_core::verify::{SignatureReader, VerifyError};
use upd_core::{ApplyOutcome, CheckRequest, Reporter, UpdateError, Updater};
use upd_schema::{ApplyPhase, ApplyProgress};

#[derive(Default)]
struct Recorder(Mutex<Vec<ApplyProgress>>);

impl Reporter for Recorder {
    fn progress(&self, progress: ApplyProgress) {
        self.0.lock().unwrap().push(progress);
    }
    fn info(&self, _msg: &str) {}
    fn warning(&self, _msg: &str) {}
    fn error(&self, _msg: &str) {}
}

/// Every file is signed by `default`, except the ones listed.
struct Signer {
    default: &'static str,
    overrides: Vec<(&'static str, &'static str)>,
}

impl SignatureReader for Signer {
    fn subject(&self, path: &Path) -> Result<Option<String>, VerifyError> {
        let name = path.file_name().unwrap().to_string_lossy();
        let subject = self
            .overrides
            .iter()
            .find(|(file, _)| *file == name)
            .map_or(self.default, |(_, s)| *s);
        Ok(Some(subject.to_string()))
    }
}

fn config(server_url: &str) -> String {
    format!(
        r#"product_name = "Acme"
product_version = "1.0.0"
main_executable = "Acme.exe"
helper_executable = "upd-helper.exe"
settings_file = "settings.ini"
channel = "stable"

[[channels]]
name = "stable"
url = "{server_url}/feed/stable.json"
ttl = 86400

[[channels]]
name = "beta"
url = "{server_url}/feed/beta.json"
ttl = 86400
"#
    )
}

fn package(config: &str) -> Vec<u8> {
    package_with(&[
        ("Acme.exe", "new main"),
        ("upd-helper.exe", "new helper"),
        ("lib/render.dll", "new lib"),
        ("updater.toml", config),
    ])
}

fn package_with(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf.into_inner()
}

struct Install {
    _root: tempfile::TempDir,
    dir: PathBuf,
}

fn install(server_url: &str) -> Install {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("Acme");
    fs::create_dir_all(dir.join("old")).unwrap();
    fs::write(dir.join("Acme.exe"), "old main").unwrap();
    fs::write(dir.join("upd-helper.exe"), "old helper").unwrap();
    fs::write(dir.join("old/legacy.dll"), "old lib").unwrap();
    fs::write(dir.join("settings.ini"), "volume=3").unwrap();
    fs::write(dir.join("updater.toml"), config(server_url)).unwrap();
    Install { _root: root, dir }
}

fn files(root: &Path) -> BTreeSet<String> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect()
}

const MANIFEST: &str = r#"{"date":"2024-05-01T10:00:00Z","url":"pkg/acme-2.0.0.zip","version":"2.0.0"}"#;

fn signed() -> Arc<Signer> {
    Arc::new(Signer {
        default: "CN=Acme Corp",
        overrides: vec![],
    })
}

async fn serve(server: &mut mockito::ServerGuard) -> (mockito::Mock, mockito::Mock) {
    let manifest = server
        .mock("GET", "/feed/stable.json")
        .match_header("user-agent", "Acme/1.0.0")
        .with_body(MANIFEST)
        .create_async()
        .await;
    let pkg = server
        .mock("GET", "/feed/pkg/acme-2.0.0.zip")
        .with_body(package(&config(&server.url())))
        .create_async()
        .await;
    (manifest, pkg)
}

#[tokio::test]
async fn test_check_then_apply_replaces_install() {
    let mut server = mockito::Server::new_async().await;
    let (manifest_mock, pkg_mock) = serve(&mut server).await;
    let inst = install(&server.url());
    let recorder = Arc::new(Recorder::default());

    let mut updater = Updater::open_at(&inst.dir)
        .unwrap()
        .with_reporter(recorder.clone())
        .with_signature_reader(Arc::new(Signer {
            default: "CN=Acme Corp",
            overrides: vec![],
        }));

    updater.check(CheckRequest::now()).await;
    assert!(updater.last_check_error().is_none());
    assert!(updater.update_available());

    let outcome = updater.apply(&CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        ApplyOutcome::Applied {
            version: "2.0.0".into()
        }
    );
    manifest_mock.assert_async().await;
    pkg_mock.assert_async().await;

    let expected: BTreeSet<String> = [
        "Acme.exe",
        "lib/render.dll",
        "settings.ini",
        "upd-helper.exe",
        "update-state.json",
        "updater.toml",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(files(&inst.dir), expected);
    assert_eq!(fs::read_to_string(inst.dir.join("Acme.exe")).unwrap(), "new main");
    assert_eq!(fs::read_to_string(inst.dir.join("settings.ini")).unwrap(), "volume=3");

    let layout = updater.layout();
    assert!(!layout.stage_dir().exists());
    assert!(!layout.dirty_dir().exists());
    assert!(!layout.journal_path().exists());
    assert!(updater.last_apply_error().is_none());

    let state: upd_schema::UpdateState =
        serde_json::from_str(&fs::read_to_string(inst.dir.join("update-state.json")).unwrap())
            .unwrap();
    assert!(state.manifest.contains("2.0.0"));

    let events = recorder.0.lock().unwrap();
    assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
    assert!(events.iter().all(|p| p.percent <= 100));
    let last = events.last().unwrap();
    assert_eq!((last.percent, last.phase), (100, ApplyPhase::Done));
    assert!(events.iter().any(|p| p.phase == ApplyPhase::Verifying));
}

#[tokio::test]
async fn test_signature_mismatch_moves_nothing() {
    let mut server = mockito::Server::new_async().await;
    let _mocks = serve(&mut server).await;
    let inst = install(&server.url());
    let before = files(&inst.dir);
    let recorder = Arc::new(Recorder::default());

    let mut updater = Updater::open_at(&inst.dir)
        .unwrap()
        .with_reporter(recorder.clone())
        .with_signature_reader(Arc::new(Signer {
            default: "CN=Acme Corp",
            overrides: vec![("render.dll", "CN=Mallory")],
        }));
    updater.check(CheckRequest::now()).await;

    let err = updater.apply(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, UpdateError::Verify(VerifyError::SubjectMismatch { .. })));
    assert!(err.is_security());
    assert_eq!(updater.last_apply_error().unwrap().kind, FailureKind::Verify);

    let mut after = files(&inst.dir);
    after.remove("update-state.json");
    assert_eq!(after, before);
    assert_eq!(fs::read_to_string(inst.dir.join("Acme.exe")).unwrap(), "old main");
    assert!(!updater.layout().stage_dir().exists());

    let last = *recorder.0.lock().unwrap().last().unwrap();
    assert_eq!(last.phase, ApplyPhase::Failed);
}

#[tokio::test]
async fn test_helper_process_uses_cached_manifest() {
    let mut server = mockito::Server::new_async().await;
    let _mocks = serve(&mut server).await;
    let inst = install(&server.url());

    // The application checks, then a fresh process applies.
    let mut app = Updater::open_at(&inst.dir).unwrap();
    app.check(CheckRequest::now()).await;
    drop(app);

    let helper = Updater::open_at(&inst.dir)
        .unwrap()
        .with_signature_reader(Arc::new(Signer {
            default: "CN=Acme Corp",
            overrides: vec![],
        }));
    assert!(helper.last_update().is_none());
    assert_eq!(helper.current_manifest().unwrap().version.as_str(), "2.0.0");

    helper.apply(&CancellationToken::new()).await.unwrap();
    assert_eq!(fs::read_to_string(inst.dir.join("Acme.exe")).unwrap(), "new main");
}

#[tokio::test]
async fn test_flat_install_keeps_config_when_package_has_none() {
    let mut server = mockito::Server::new_async().await;
    let _manifest = server
        .mock("GET", "/feed/stable.json")
        .with_body(MANIFEST)
        .create_async()
        .await;
    let _pkg = server
        .mock("GET", "/feed/pkg/acme-2.0.0.zip")
        .with_body(package_with(&[
            ("Acme.exe", "new main"),
            ("upd-helper.exe", "new helper"),
        ]))
        .create_async()
        .await;
    let inst = install(&server.url());
    fs::remove_dir_all(inst.dir.join("old")).unwrap();
    let config_before = fs::read_to_string(inst.dir.join("updater.toml")).unwrap();

    let mut updater = Updater::open_at(&inst.dir).unwrap().with_signature_reader(signed());
    updater.check(CheckRequest::now()).await;
    updater.apply(&CancellationToken::new()).await.unwrap();

    assert_eq!(fs::read_to_string(inst.dir.join("Acme.exe")).unwrap(), "new main");
    assert_eq!(
        fs::read_to_string(inst.dir.join("updater.toml")).unwrap(),
        config_before
    );
    let reopened = Updater::open_at(&inst.dir).unwrap();
    assert_eq!(reopened.channel().unwrap().name, "stable");
}

#[tokio::test]
async fn test_channel_choice_survives_apply() {
    let mut server = mockito::Server::new_async().await;
    let _mocks = serve(&mut server).await;
    let beta = server
        .mock("GET", "/feed/beta.json")
        .with_body(MANIFEST)
        .create_async()
        .await;
    let inst = install(&server.url());

    let mut updater = Updater::open_at(&inst.dir).unwrap().with_signature_reader(signed());
    updater.set_channel("beta").unwrap();
    let forced = updater.take_forced();
    updater.check(CheckRequest::now().forced(forced)).await;
    beta.assert_async().await;
    updater.apply(&CancellationToken::new()).await.unwrap();

    // The release ships its own updater.toml naming "stable".
    let shipped = fs::read_to_string(inst.dir.join("updater.toml")).unwrap();
    assert!(shipped.contains(r#"channel = "stable""#));

    let reopened = Updater::open_at(&inst.dir).unwrap();
    assert_eq!(reopened.channel().unwrap().name, "beta");
}
