//! Code-signing identity check of staged executables.
//!
//! The trust anchor is the signing subject of the installed helper
//! executable. Every staged file with a loadable extension must carry the
//! exact same subject string before anything is moved into the install dir.
//! No certificate chain validation happens here; the platform loader does
//! that when the file is executed.

use std::path::{Path, PathBuf};
#[cfg(any(windows, target_os = "macos"))]
use std::process::Command;

use thiserror::Error;

/// Extensions of files the platform loader will execute or map.
pub const SIGNED_EXTENSIONS: [&str; 5] = ["drv", "dll", "exe", "ocx", "sys"];

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to walk staging directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Trust anchor {} does not exist", .0.display())]
    MissingAnchor(PathBuf),

    #[error("'{tool}' failed on {}: {message}", .path.display())]
    Tool {
        tool: &'static str,
        path: PathBuf,
        message: String,
    },

    #[error(
        "Signature mismatch on {}: expected '{expected}', found '{}'",
        .path.display(),
        .actual.as_deref().unwrap_or("<unsigned>")
    )]
    SubjectMismatch {
        path: PathBuf,
        expected: String,
        actual: Option<String>,
    },
}

/// Reads the code-signing subject of a file. `Ok(None)` means unsigned.
pub trait SignatureReader: Send + Sync {
    fn subject(&self, path: &Path) -> Result<Option<String>, VerifyError>;
}

/// Shells out to the platform signing tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformSignatureReader;

impl SignatureReader for PlatformSignatureReader {
    #[cfg(windows)]
    fn subject(&self, path: &Path) -> Result<Option<String>, VerifyError> {
        let literal = path.to_string_lossy().replace('\'', "''");
        let script = format!(
            "$s = Get-AuthenticodeSignature -LiteralPath '{literal}'; \
             if ($s.Status -ne 'NotSigned' -and $s.SignerCertificate) {{ $s.SignerCertificate.Subject }}"
        );
        let output = Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command", &script])
            .output()?;
        if !output.status.success() {
            return Err(VerifyError::Tool {
                tool: "powershell",
                path: path.to_path_buf(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let subject = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!subject.is_empty()).then_some(subject))
    }

    #[cfg(target_os = "macos")]
    fn subject(&self, path: &Path) -> Result<Option<String>, VerifyError> {
        let output = Command::new("codesign").arg("-dvv").arg(path).output()?;
        // codesign reports on stderr
        let report = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            if report.contains("not signed at all") {
                return Ok(None);
            }
            return Err(VerifyError::Tool {
                tool: "codesign",
                path: path.to_path_buf(),
                message: report.trim().to_string(),
            });
        }
        Ok(parse_codesign_authority(&report))
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    fn subject(&self, _path: &Path) -> Result<Option<String>, VerifyError> {
        Ok(None)
    }
}

/// First `Authority=` line of `codesign -dvv` output.
pub fn parse_codesign_authority(report: &str) -> Option<String> {
    report
        .lines()
        .find_map(|line| line.strip_prefix("Authority="))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Outcome of a verification pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Every loadable file matched the anchor.
    Verified { checked: usize },
    /// The installed helper is unsigned; nothing was checked.
    Unverifiable,
}

/// Checks staged files against one trust anchor.
pub struct Verifier<'a> {
    reader: &'a dyn SignatureReader,
    anchor: Option<String>,
}

impl std::fmt::Debug for Verifier<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("anchor", &self.anchor)
            .finish_non_exhaustive()
    }
}

impl<'a> Verifier<'a> {
    /// Read the trust anchor from the installed helper executable.
    pub fn from_helper(reader: &'a dyn SignatureReader, helper: &Path) -> Result<Self, VerifyError> {
        if !helper.is_file() {
            return Err(VerifyError::MissingAnchor(helper.to_path_buf()));
        }
        let anchor = reader.subject(helper)?;
        Ok(Self { reader, anchor })
    }

    pub fn anchor(&self) -> Option<&str> {
        self.anchor.as_deref()
    }

    /// Compare every loadable file under `stage` with the anchor, stopping at
    /// the first mismatch.
    pub fn verify_dir(&self, stage: &Path) -> Result<Verdict, VerifyError> {
        let Some(expected) = &self.anchor else {
            tracing::warn!("installed helper is unsigned, skipping signature verification");
            return Ok(Verdict::Unverifiable);
        };

        let mut checked = 0;
        if !stage.exists() {
            return Ok(Verdict::Verified { checked });
        }
        for entry in walkdir::WalkDir::new(stage) {
            let entry = entry?;
            if !entry.file_type().is_file() || !is_loadable(entry.path()) {
                continue;
            }
            let actual = self.reader.subject(entry.path())?;
            if actual.as_deref() != Some(expected.as_str()) {
                let err = VerifyError::SubjectMismatch {
                    path: entry.path().to_path_buf(),
                    expected: expected.clone(),
                    actual,
                };
                tracing::error!(error = %err, "staged file failed signature verification");
                return Err(err);
            }
            checked += 1;
        }
        tracing::info!(checked, "signatures verified");
        Ok(Verdict::Verified { checked })
    }
}

fn is_loadable(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SIGNED_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(ext)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    /// Subjects keyed by file name; unknown files are unsigned.
    #[derive(Default)]
    pub(crate) struct FakeSigner(pub(crate) HashMap<String, String>);

    impl FakeSigner {
        pub(crate) fn with(mut self, file: &str, subject: &str) -> Self {
            self.0.insert(file.to_string(), subject.to_string());
            self
        }
    }

    impl SignatureReader for FakeSigner {
        fn subject(&self, path: &Path) -> Result<Option<String>, VerifyError> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            Ok(self.0.get(&name).cloned())
        }
    }

    fn setup(files: &[&str]) -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let helper = dir.path().join("upd-helper.exe");
        fs::write(&helper, b"helper").unwrap();
        let stage = dir.path().join("stage");
        for f in files {
            let p = stage.join(f);
            fs::create_dir_all(p.parent().unwrap()).unwrap();
            fs::write(p, b"x").unwrap();
        }
        (dir, helper, stage)
    }

    #[test]
    fn test_matching_subjects_pass() {
        let (_dir, helper, stage) = setup(&["Acme.exe", "plugins/codec.DLL", "readme.txt"]);
        let signer = FakeSigner::default()
            .with("upd-helper.exe", "CN=Acme Corp")
            .with("Acme.exe", "CN=Acme Corp")
            .with("codec.DLL", "CN=Acme Corp");

        let verifier = Verifier::from_helper(&signer, &helper).unwrap();
        assert_eq!(verifier.verify_dir(&stage).unwrap(), Verdict::Verified { checked: 2 });
    }

    #[test]
    fn test_mismatch_fails() {
        let (_dir, helper, stage) = setup(&["Acme.exe"]);
        let signer = FakeSigner::default()
            .with("upd-helper.exe", "CN=Acme Corp")
            .with("Acme.exe", "CN=Mallory");

        let err = Verifier::from_helper(&signer, &helper)
            .unwrap()
            .verify_dir(&stage)
            .unwrap_err();
        assert!(matches!(err, VerifyError::SubjectMismatch { actual: Some(ref a), .. } if a == "CN=Mallory"));
    }

    #[test]
    fn test_unsigned_staged_file_fails() {
        let (_dir, helper, stage) = setup(&["driver.sys"]);
        let signer = FakeSigner::default().with("upd-helper.exe", "CN=Acme Corp");

        let err = Verifier::from_helper(&signer, &helper)
            .unwrap()
            .verify_dir(&stage)
            .unwrap_err();
        assert!(matches!(err, VerifyError::SubjectMismatch { actual: None, .. }));
    }

    #[test]
    fn test_unsigned_helper_skips() {
        let (_dir, helper, stage) = setup(&["Acme.exe"]);
        let signer = FakeSigner::default().with("Acme.exe", "CN=Anyone");

        let verifier = Verifier::from_helper(&signer, &helper).unwrap();
        assert_eq!(verifier.anchor(), None);
        assert_eq!(verifier.verify_dir(&stage).unwrap(), Verdict::Unverifiable);
    }

    #[test]
    fn test_no_loadable_files_pass() {
        let (_dir, helper, stage) = setup(&["data.bin", "notes.txt"]);
        let signer = FakeSigner::default().with("upd-helper.exe", "CN=Acme Corp");
        let verifier = Verifier::from_helper(&signer, &helper).unwrap();
        assert_eq!(verifier.verify_dir(&stage).unwrap(), Verdict::Verified { checked: 0 });
    }

    #[test]
    fn test_missing_helper_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Verifier::from_helper(&FakeSigner::default(), &dir.path().join("nope.exe")).unwrap_err();
        assert!(matches!(err, VerifyError::MissingAnchor(_)));
    }

    #[test]
    fn test_parse_codesign_authority() {
        let report = "Executable=/Applications/Acme.app/Contents/MacOS/Acme\n\
                      Identifier=com.acme.app\n\
                      Authority=Developer ID Application: Acme Corp (ABCDE12345)\n\
                      Authority=Developer ID Certification Authority\n";
        assert_eq!(
            parse_codesign_authority(report).as_deref(),
            Some("Developer ID Application: Acme Corp (ABCDE12345)")
        );
        assert_eq!(parse_codesign_authority("Signature=adhoc\n"), None);
    }
}
