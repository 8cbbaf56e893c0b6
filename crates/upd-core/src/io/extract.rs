//! Archive extraction module
//!
//! Unpacks the downloaded package into the staging directory. Handles zip,
//! tar, tar.gz and tar.zst, detected from the file name.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;
use zstd::stream::Decoder as ZstdDecoder;

use crate::reporter::ProgressRange;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Entry escapes the destination: {}", .0.display())]
    UnsafePath(PathBuf),

    #[error("Extraction cancelled")]
    Cancelled,
}

impl From<zip::result::ZipError> for ExtractError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Archive(e.to_string())
    }
}

/// Supported package container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarZst,
}

impl ArchiveFormat {
    pub const ALL: [Self; 4] = [Self::Zip, Self::Tar, Self::TarGz, Self::TarZst];

    /// Detect the format from a file name.
    pub fn detect(name: &str) -> Result<Self, ExtractError> {
        let lower = name.to_lowercase();
        if lower.ends_with(".tar.zst") || lower.ends_with(".tzst") {
            Ok(Self::TarZst)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Ok(Self::TarGz)
        } else if lower.ends_with(".tar") {
            Ok(Self::Tar)
        } else if lower.ends_with(".zip") {
            Ok(Self::Zip)
        } else {
            Err(ExtractError::UnsupportedFormat(name.to_string()))
        }
    }

    /// Canonical extension, without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
            Self::TarZst => "tar.zst",
        }
    }
}

/// Information about an extracted file
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    /// Path relative to extraction root
    pub relative_path: PathBuf,
    /// Absolute path on disk
    pub absolute_path: PathBuf,
}

/// Callbacks and limits for one extraction.
pub struct ExtractOptions<'a> {
    pub range: ProgressRange,
    pub on_progress: &'a (dyn Fn(u8) + Send + Sync),
    pub cancel: Option<&'a CancellationToken>,
}

impl std::fmt::Debug for ExtractOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractOptions")
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

impl ExtractOptions<'_> {
    fn check_cancelled(&self) -> Result<(), ExtractError> {
        if self.cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(ExtractError::Cancelled);
        }
        Ok(())
    }
}

/// Extract `archive_path` into `dest_dir`, overwriting existing files, and
/// delete the archive once every entry has been written.
///
/// On error the archive is kept and `dest_dir` may hold partial output.
pub fn extract_package(
    archive_path: &Path,
    dest_dir: &Path,
    opts: &ExtractOptions<'_>,
) -> Result<Vec<ExtractedFile>, ExtractError> {
    let name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let format = ArchiveFormat::detect(&name)?;

    (opts.on_progress)(opts.range.min);
    let files = match format {
        ArchiveFormat::Zip => extract_zip(archive_path, dest_dir, opts)?,
        ArchiveFormat::Tar => {
            let (counter, reader, total) = counted(archive_path)?;
            extract_tar(&counter, total, reader, dest_dir, opts)?
        }
        ArchiveFormat::TarGz => {
            let (counter, reader, total) = counted(archive_path)?;
            let gz = flate2::read::GzDecoder::new(reader);
            extract_tar(&counter, total, gz, dest_dir, opts)?
        }
        ArchiveFormat::TarZst => {
            let (counter, reader, total) = counted(archive_path)?;
            let zst = ZstdDecoder::new(reader)?;
            extract_tar(&counter, total, zst, dest_dir, opts)?
        }
    };
    (opts.on_progress)(opts.range.end());

    fs::remove_file(archive_path)?;
    tracing::debug!(archive = %archive_path.display(), entries = files.len(), "extracted");
    Ok(files)
}

/// Reader that counts the bytes pulled through it.
struct Counted<R> {
    inner: R,
    read: Arc<AtomicU64>,
}

impl<R: Read> Read for Counted<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Open `path` for counted reading; returns the shared counter, the reader
/// and the file size.
fn counted(path: &Path) -> Result<(Arc<AtomicU64>, Counted<BufReader<File>>, u64), ExtractError> {
    let file = File::open(path)?;
    let total = file.metadata()?.len();
    let read = Arc::new(AtomicU64::new(0));
    let reader = Counted {
        inner: BufReader::new(file),
        read: read.clone(),
    };
    Ok((read, reader, total))
}

/// Join an archive entry path onto `dest_dir`, rejecting absolute paths and
/// parent components.
fn safe_join(dest_dir: &Path, entry: &Path) -> Result<(PathBuf, PathBuf), ExtractError> {
    let mut relative = PathBuf::new();
    for component in entry.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return Err(ExtractError::UnsafePath(entry.to_path_buf())),
        }
    }
    reject_linked_parent(dest_dir, &relative)?;
    Ok((dest_dir.join(&relative), relative))
}

/// Fail if any directory between `dest_dir` and the entry is a symlink.
fn reject_linked_parent(dest_dir: &Path, relative: &Path) -> Result<(), ExtractError> {
    let Some(parent) = relative.parent() else {
        return Ok(());
    };
    let mut current = dest_dir.to_path_buf();
    for part in parent.components() {
        current.push(part);
        if fs::symlink_metadata(&current).is_ok_and(|m| m.file_type().is_symlink()) {
            return Err(ExtractError::UnsafePath(relative.to_path_buf()));
        }
    }
    Ok(())
}

/// A link target is kept only if it resolves inside the destination when
/// read relative to the link's own directory.
fn link_stays_inside(relative: &Path, target: &Path) -> bool {
    let mut depth = relative.components().count().saturating_sub(1);
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(up) => depth = up,
                None => return false,
            },
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

/// Extract a tar stream; progress follows compressed bytes consumed.
fn extract_tar<R: Read>(
    counter: &AtomicU64,
    total: u64,
    reader: R,
    dest_dir: &Path,
    opts: &ExtractOptions<'_>,
) -> Result<Vec<ExtractedFile>, ExtractError> {
    fs::create_dir_all(dest_dir)?;

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    let mut extracted_files = Vec::new();

    for entry in archive.entries()? {
        opts.check_cancelled()?;
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let (absolute_path, relative_path) = safe_join(dest_dir, &entry_path)?;

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(&absolute_path)?;
        } else if kind.is_file() || kind.is_symlink() {
            if kind.is_symlink() {
                let target = entry.link_name()?.unwrap_or_default().into_owned();
                if !link_stays_inside(&relative_path, &target) {
                    return Err(ExtractError::UnsafePath(entry_path));
                }
            }
            if let Some(parent) = absolute_path.parent() {
                fs::create_dir_all(parent)?;
            }
            if kind.is_symlink() && fs::symlink_metadata(&absolute_path).is_ok() {
                fs::remove_file(&absolute_path)?;
            }
            entry.unpack(&absolute_path)?;
            extracted_files.push(ExtractedFile {
                relative_path,
                absolute_path,
            });
        }

        let read = counter.load(Ordering::Relaxed);
        (opts.on_progress)(opts.range.map(read, total));
    }

    Ok(extracted_files)
}

/// Extract a zip archive; progress follows the entry index.
fn extract_zip(
    archive_path: &Path,
    dest_dir: &Path,
    opts: &ExtractOptions<'_>,
) -> Result<Vec<ExtractedFile>, ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;

    fs::create_dir_all(dest_dir)?;
    let mut extracted_files = Vec::new();
    let count = archive.len() as u64;

    for i in 0..archive.len() {
        opts.check_cancelled()?;
        let mut file = archive.by_index(i)?;
        let Some(name) = file.enclosed_name() else {
            return Err(ExtractError::UnsafePath(PathBuf::from(file.name())));
        };
        let (absolute_path, relative_path) = safe_join(dest_dir, &name)?;

        if file.is_dir() {
            fs::create_dir_all(&absolute_path)?;
        } else {
            if let Some(p) = absolute_path.parent() {
                fs::create_dir_all(p)?;
            }
            let mut outfile = File::create(&absolute_path)?;
            io::copy(&mut file, &mut outfile)?;

            #[cfg(unix)]
            if let Some(mode) = file.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&absolute_path, fs::Permissions::from_mode(mode & 0o7777))?;
            }

            extracted_files.push(ExtractedFile {
                relative_path,
                absolute_path,
            });
        }

        (opts.on_progress)(opts.range.map(i as u64 + 1, count));
    }

    Ok(extracted_files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o755);
        for (name, data) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn write_tar_gz(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(gz);
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn opts<'a>(on_progress: &'a (dyn Fn(u8) + Send + Sync)) -> ExtractOptions<'a> {
        ExtractOptions {
            range: ProgressRange::new(67, 30),
            on_progress,
            cancel: None,
        }
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(ArchiveFormat::detect("a.ZIP").unwrap(), ArchiveFormat::Zip);
        assert_eq!(ArchiveFormat::detect("a.tgz").unwrap(), ArchiveFormat::TarGz);
        assert_eq!(ArchiveFormat::detect("a.tar.zst").unwrap(), ArchiveFormat::TarZst);
        assert_eq!(ArchiveFormat::detect("a.tar").unwrap(), ArchiveFormat::Tar);
        assert!(matches!(
            ArchiveFormat::detect("a.dmg"),
            Err(ExtractError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_extract_zip_reports_and_deletes_archive() {
        let dir = tempfile::tempdir().unwrap();
        let stage = dir.path().join("stage");
        fs::create_dir_all(&stage).unwrap();
        let archive = stage.join("Update.zip");
        write_zip(&archive, &[("Acme.exe", b"bin"), ("data/a.txt", b"a")]);
        fs::write(stage.join("Acme.exe"), b"stale").unwrap();

        let seen = Mutex::new(Vec::new());
        let on_progress = |p| seen.lock().unwrap().push(p);
        let files = extract_package(&archive, &stage, &opts(&on_progress)).unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(fs::read(stage.join("Acme.exe")).unwrap(), b"bin");
        assert_eq!(fs::read(stage.join("data/a.txt")).unwrap(), b"a");
        assert!(!archive.exists());

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.first(), Some(&67));
        assert_eq!(seen.last(), Some(&97));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_extract_tar_gz() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Update.tar.gz");
        write_tar_gz(&archive, &[("bin/acme", b"x"), ("readme.txt", b"y")]);

        let dest = dir.path().join("out");
        let files = extract_package(&archive, &dest, &opts(&|_| {})).unwrap();

        assert_eq!(files.len(), 2);
        assert!(dest.join("bin/acme").is_file());
        assert!(!archive.exists());
    }

    #[test]
    fn test_failed_extraction_keeps_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Update.zip");
        fs::write(&archive, b"not a zip").unwrap();

        let err = extract_package(&archive, &dir.path().join("out"), &opts(&|_| {})).unwrap_err();
        assert!(matches!(err, ExtractError::Archive(_)));
        assert!(archive.exists());
    }

    #[test]
    fn test_safe_join_rejects_escape() {
        let dest = Path::new("/stage");
        assert!(safe_join(dest, Path::new("../evil")).is_err());
        assert!(safe_join(dest, Path::new("/etc/passwd")).is_err());
        let (abs, rel) = safe_join(dest, Path::new("./a/b")).unwrap();
        assert_eq!(abs, Path::new("/stage/a/b"));
        assert_eq!(rel, Path::new("a/b"));
    }

    /// Plain tar where an entry with a link target becomes a symlink.
    fn write_tar(path: &Path, entries: &[(&str, Option<&str>, &[u8])]) {
        let mut builder = tar::Builder::new(File::create(path).unwrap());
        for (name, link, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_mode(0o644);
            match link {
                Some(target) => {
                    header.set_entry_type(tar::EntryType::Symlink);
                    header.set_size(0);
                    header.set_link_name(target).unwrap();
                    header.set_cksum();
                    builder.append_data(&mut header, name, io::empty()).unwrap();
                }
                None => {
                    header.set_size(data.len() as u64);
                    header.set_cksum();
                    builder.append_data(&mut header, name, *data).unwrap();
                }
            }
        }
        builder.into_inner().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_tar_symlink_out_of_stage_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        let stage = dir.path().join("stage");
        let archive = dir.path().join("Update.tar");
        let outside_str = outside.to_string_lossy().into_owned();

        for target in [outside_str.as_str(), "../outside", "lib/../../outside"] {
            write_tar(
                &archive,
                &[
                    ("d", Some(target), b""),
                    ("d/evil.txt", None, b"pwned"),
                ],
            );
            let err = extract_package(&archive, &stage, &opts(&|_| {})).unwrap_err();
            assert!(matches!(err, ExtractError::UnsafePath(_)), "{target}: {err}");
            assert!(!outside.join("evil.txt").exists());
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_tar_write_through_existing_link_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside");
        let stage = dir.path().join("stage");
        fs::create_dir_all(&outside).unwrap();
        fs::create_dir_all(&stage).unwrap();
        std::os::unix::fs::symlink(&outside, stage.join("d")).unwrap();
        let archive = dir.path().join("Update.tar");
        write_tar(&archive, &[("d/evil.txt", None, b"pwned")]);

        let err = extract_package(&archive, &stage, &opts(&|_| {})).unwrap_err();
        assert!(matches!(err, ExtractError::UnsafePath(_)));
        assert!(!outside.join("evil.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_tar_internal_symlink_kept() {
        let dir = tempfile::tempdir().unwrap();
        let stage = dir.path().join("stage");
        let archive = dir.path().join("Update.tar");
        write_tar(
            &archive,
            &[
                ("lib/v2/core.so", None, b"elf"),
                ("lib/current", Some("v2"), b""),
                ("bin/core.so", Some("../lib/v2/core.so"), b""),
            ],
        );

        let files = extract_package(&archive, &stage, &opts(&|_| {})).unwrap();
        assert_eq!(files.len(), 3);
        assert!(fs::symlink_metadata(stage.join("lib/current")).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(stage.join("bin/core.so")).unwrap(), b"elf");
    }

    #[test]
    fn test_link_target_depth() {
        assert!(link_stays_inside(Path::new("a/b/link"), Path::new("../../x")));
        assert!(!link_stays_inside(Path::new("a/link"), Path::new("../../x")));
        assert!(!link_stays_inside(Path::new("link"), Path::new("/etc")));
        assert!(link_stays_inside(Path::new("link"), Path::new("./x/../y")));
    }

    #[test]
    fn test_cancelled_before_first_entry() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Update.zip");
        write_zip(&archive, &[("a", b"a")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let options = ExtractOptions {
            range: ProgressRange::new(0, 100),
            on_progress: &|_| {},
            cancel: Some(&cancel),
        };
        let err = extract_package(&archive, &dir.path().join("out"), &options).unwrap_err();
        assert!(matches!(err, ExtractError::Cancelled));
    }
}
