//! Moves uploaded files into the archive folder.

use crate::error::ArchiveError;
use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[cfg(unix)]
const CROSS_DEVICE_ERROR: i32 = 18; // EXDEV
#[cfg(windows)]
const CROSS_DEVICE_ERROR: i32 = 17; // ERROR_NOT_SAME_DEVICE

/// Relocates files into an archive directory without ever overwriting an
/// existing entry.
#[derive(Debug, Clone, Default)]
pub struct Archiver {
    // Destination choice and the move happen under this lock.
    claim: Arc<Mutex<()>>,
}

impl Archiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `local_path` into `dest_dir`, returning the final path.
    pub async fn archive(&self, local_path: &Path, dest_dir: &Path) -> Result<PathBuf, ArchiveError> {
        self.archive_as(local_path, dest_dir, Uuid::new_v4()).await
    }

    /// Like [`archive`](Self::archive); `job_id` tags a disambiguated name.
    pub async fn archive_as(
        &self,
        local_path: &Path,
        dest_dir: &Path,
        job_id: Uuid,
    ) -> Result<PathBuf, ArchiveError> {
        let claim = self.claim.clone();
        let local = local_path.to_path_buf();
        let dest = dest_dir.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let _guard = claim.lock().unwrap_or_else(|p| p.into_inner());
            move_into(&local, &dest, job_id)
        })
        .await
        .map_err(|e| ArchiveError::Io {
            path: local_path.to_path_buf(),
            message: format!("archive task failed: {}", e),
        })?
    }
}

fn io_err(path: &Path, e: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

fn move_into(local: &Path, dest_dir: &Path, job_id: Uuid) -> Result<PathBuf, ArchiveError> {
    if !dest_dir.is_dir() {
        return Err(ArchiveError::DestinationMissing {
            path: dest_dir.to_path_buf(),
        });
    }
    match fs::symlink_metadata(local) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ArchiveError::SourceMissing {
                path: local.to_path_buf(),
            })
        }
        Err(e) => return Err(io_err(local, e)),
    }
    let name = local
        .file_name()
        .ok_or_else(|| io_err(local, "path has no file name"))?;

    let dest = free_destination(dest_dir, Path::new(name), job_id);
    match fs::rename(local, &dest) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE_ERROR) => {
            log::debug!("{} is on another filesystem, copying", dest.display());
            copy_across(local, &dest)?;
        }
        Err(e) => return Err(io_err(local, e)),
    }
    log::debug!("Archived {} -> {}", local.display(), dest.display());
    Ok(dest)
}

/// `dest_dir/name`, or `dest_dir/<stem>-<utc stamp>-<job id prefix>.<ext>`
/// when that is taken.
fn free_destination(dest_dir: &Path, name: &Path, job_id: Uuid) -> PathBuf {
    let plain = dest_dir.join(name);
    if fs::symlink_metadata(&plain).is_err() {
        return plain;
    }

    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = name.extension().map(|e| e.to_string_lossy().into_owned());
    let id = job_id.simple().to_string();
    let tag = format!("{}-{}", Utc::now().format("%Y%m%d%H%M%S"), &id[..8]);

    let build = |tag: &str| match &ext {
        Some(ext) => dest_dir.join(format!("{}-{}.{}", stem, tag, ext)),
        None => dest_dir.join(format!("{}-{}", stem, tag)),
    };
    let candidate = build(&tag);
    if fs::symlink_metadata(&candidate).is_err() {
        return candidate;
    }
    // Same job archived twice within one second.
    build(&format!("{}-{}", tag, Uuid::new_v4().simple()))
}

/// Copy into a hidden part file, sync, rename into place, then remove the
/// source. An interruption never leaves a truncated `dest` behind.
fn copy_across(local: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let part = dir.join(format!(".{}.{}.part", name, Uuid::new_v4().simple()));

    let staged = (|| -> io::Result<()> {
        fs::copy(local, &part)?;
        fs::File::open(&part)?.sync_all()?;
        fs::rename(&part, dest)
    })();
    if let Err(e) = staged {
        let _ = fs::remove_file(&part);
        return Err(io_err(local, e));
    }

    if let Err(e) = fs::remove_file(local) {
        log::warn!(
            "Archived copy at {} but could not remove {}: {}",
            dest.display(),
            local.display(),
            e
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_archive_moves_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("report.csv"), b"a,b\n").unwrap();

        let out = Archiver::new()
            .archive(&src.join("report.csv"), &dst)
            .await
            .unwrap();
        assert_eq!(out, dst.join("report.csv"));
        assert!(!src.join("report.csv").exists());
        assert_eq!(fs::read(out).unwrap(), b"a,b\n");
    }

    #[tokio::test]
    async fn test_collision_is_disambiguated() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("dst");
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("report.csv"), b"old").unwrap();
        let src = dir.path().join("report.csv");
        fs::write(&src, b"new").unwrap();

        let id = Uuid::new_v4();
        let out = Archiver::new().archive_as(&src, &dst, id).await.unwrap();

        let name = out.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("report-"), "{}", name);
        assert!(name.ends_with(&format!("-{}.csv", &id.simple().to_string()[..8])), "{}", name);
        // report-YYYYmmddHHMMSS-xxxxxxxx.csv
        assert_eq!(name.len(), "report-".len() + 14 + 1 + 8 + ".csv".len());
        assert_eq!(fs::read(dst.join("report.csv")).unwrap(), b"old");
        assert_eq!(fs::read(&out).unwrap(), b"new");
    }

    #[test]
    fn test_disambiguated_name_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README"), b"").unwrap();
        let out = free_destination(dir.path(), Path::new("README"), Uuid::new_v4());
        let name = out.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("README-"));
        assert!(!name.contains('.'));
    }

    #[tokio::test]
    async fn test_missing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("f");
        fs::write(&src, b"x").unwrap();
        let err = Archiver::new()
            .archive(&src, &dir.path().join("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::DestinationMissing { .. }));
        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = Archiver::new()
            .archive(&dir.path().join("gone"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::SourceMissing { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_same_name_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("dst");
        fs::create_dir_all(&dst).unwrap();

        let archiver = Archiver::new();
        let mut tasks = Vec::new();
        for i in 0..8 {
            let src_dir = dir.path().join(format!("s{}", i));
            fs::create_dir_all(&src_dir).unwrap();
            let src = src_dir.join("same.txt");
            fs::write(&src, format!("{}", i)).unwrap();
            let archiver = archiver.clone();
            let dst = dst.clone();
            tasks.push(tokio::spawn(async move { archiver.archive(&src, &dst).await }));
        }

        let mut outs = Vec::new();
        for t in tasks {
            outs.push(t.await.unwrap().unwrap());
        }
        outs.sort();
        outs.dedup();
        assert_eq!(outs.len(), 8);
        assert_eq!(fs::read_dir(&dst).unwrap().count(), 8);
    }

    #[test]
    fn test_copy_across_replaces_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.bin");
        let dest = dir.path().join("out").join("a.bin");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&src, b"payload").unwrap();

        copy_across(&src, &dest).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"payload");
        let parts = fs::read_dir(dest.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .count();
        assert_eq!(parts, 0);
    }

    #[test]
    fn test_copy_across_failure_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.bin");
        fs::write(&src, b"payload").unwrap();
        let dest = dir.path().join("missing-dir").join("a.bin");

        assert!(copy_across(&src, &dest).is_err());
        assert!(src.exists());
    }
}
