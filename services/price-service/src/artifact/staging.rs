//! Hidden sibling file that becomes the artifact only via rename.

use crate::error::FetchError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

pub(crate) const STAGING_SUFFIX: &str = ".part";

/// Staging files older than this belong to a process that died mid-fetch.
pub(crate) const STALE_AFTER: Duration = Duration::from_secs(60 * 60);

fn write_failed(e: std::io::Error) -> FetchError { FetchError::LocalWriteFailed(e.to_string()) }

/// Removes `.{name}.*.part` siblings last modified more than `max_age` ago.
/// Best effort: failures are logged and never fail the fetch.
pub(crate) async fn sweep_stale(dir: &Path, name: &str, max_age: Duration) -> usize {
    let prefix = format!(".{name}.");
    let mut entries = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) => {
            tracing::debug!(dir=%dir.display(), error=%e, "staging sweep skipped");
            return 0;
        }
    };
    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !file_name.starts_with(&prefix) || !file_name.ends_with(STAGING_SUFFIX) { continue; }
        let age = match entry.metadata().await.and_then(|m| m.modified()) {
            Ok(modified) => SystemTime::now().duration_since(modified).unwrap_or_default(),
            Err(_) => continue,
        };
        if age < max_age { continue; }
        match fs::remove_file(entry.path()).await {
            Ok(()) => {
                removed += 1;
                tracing::info!(path=%entry.path().display(), age_secs = age.as_secs(), "removed stale staging file");
            }
            Err(e) => tracing::warn!(path=%entry.path().display(), error=%e, "could not remove stale staging file"),
        }
    }
    removed
}

/// Removed on drop unless persisted, which also covers a fetch future that
/// is dropped by a timeout mid-stream.
pub(crate) struct StagingFile {
    path: PathBuf,
    target: PathBuf,
    file: Option<File>,
    hasher: Sha256,
    written: u64,
    persisted: bool,
}

impl StagingFile {
    pub(crate) async fn create(target: &Path) -> Result<Self, FetchError> {
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).await.map_err(write_failed)?;
        let name = target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "artifact".into());
        sweep_stale(&dir, &name, STALE_AFTER).await;
        let path = dir.join(format!(".{name}.{}{STAGING_SUFFIX}", uuid::Uuid::new_v4().simple()));
        let file = File::create(&path).await.map_err(write_failed)?;
        Ok(Self { path, target: target.to_path_buf(), file: Some(file), hasher: Sha256::new(), written: 0, persisted: false })
    }

    pub(crate) async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), FetchError> {
        let file = self.file.as_mut().ok_or_else(|| FetchError::LocalWriteFailed("staging file already closed".into()))?;
        file.write_all(chunk).await.map_err(write_failed)?;
        self.hasher.update(chunk);
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub(crate) fn written(&self) -> u64 { self.written }

    /// Flushes, syncs, checks the digest and renames onto the target.
    pub(crate) async fn persist(mut self, expected_sha256: Option<&str>) -> Result<u64, FetchError> {
        if self.written == 0 { return Err(FetchError::EmptyPayload); }
        if let Some(mut file) = self.file.take() {
            file.flush().await.map_err(write_failed)?;
            file.sync_all().await.map_err(write_failed)?;
        }
        let actual = hex::encode(std::mem::take(&mut self.hasher).finalize());
        if let Some(expected) = expected_sha256 {
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(FetchError::IntegrityMismatch { expected: expected.to_string(), actual });
            }
        }
        fs::rename(&self.path, &self.target).await.map_err(write_failed)?;
        self.persisted = true;
        tracing::debug!(target=%self.target.display(), bytes=self.written, sha256=%actual, "artifact persisted");
        Ok(self.written)
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if self.persisted { return; }
        self.file.take();
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path=%self.path.display(), error=%e, "could not remove staging file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staging_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(STAGING_SUFFIX)).count()
    }

    #[tokio::test]
    async fn dropped_staging_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("model.hvrf");
        let mut s = StagingFile::create(&target).await.unwrap();
        s.write_chunk(b"partial").await.unwrap();
        assert_eq!(staging_files(dir.path()), 1);
        drop(s);
        assert_eq!(staging_files(dir.path()), 0);
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn persist_renames_and_verifies_digest() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("model.hvrf");
        let mut s = StagingFile::create(&target).await.unwrap();
        s.write_chunk(b"abc").await.unwrap();
        // sha256("abc")
        let digest = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert_eq!(s.persist(Some(digest)).await.unwrap(), 3);
        assert_eq!(std::fs::read(&target).unwrap(), b"abc");
        assert_eq!(staging_files(target.parent().unwrap()), 0);
    }

    #[tokio::test]
    async fn digest_mismatch_discards_payload() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("model.hvrf");
        let mut s = StagingFile::create(&target).await.unwrap();
        s.write_chunk(b"abc").await.unwrap();
        let err = s.persist(Some("00")).await.unwrap_err();
        assert!(matches!(err, FetchError::IntegrityMismatch { .. }));
        assert!(!target.exists());
        assert_eq!(staging_files(dir.path()), 0);
    }

    fn age(path: &Path, by: Duration) {
        let f = std::fs::File::options().write(true).open(path).unwrap();
        f.set_modified(SystemTime::now() - by).unwrap();
    }

    #[tokio::test]
    async fn create_sweeps_stale_leftovers_of_the_same_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("model.hvrf");
        let stale = dir.path().join(".model.hvrf.deadbeef.part");
        let fresh = dir.path().join(".model.hvrf.cafef00d.part");
        let other = dir.path().join(".other.hvrf.deadbeef.part");
        for p in [&stale, &fresh, &other] { std::fs::write(p, b"partial").unwrap(); }
        age(&stale, STALE_AFTER + Duration::from_secs(60));
        age(&other, STALE_AFTER + Duration::from_secs(60));

        let s = StagingFile::create(&target).await.unwrap();

        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(other.exists());
        drop(s);
        assert_eq!(staging_files(dir.path()), 2);
    }

    #[tokio::test]
    async fn empty_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("model.hvrf");
        let s = StagingFile::create(&target).await.unwrap();
        assert_eq!(s.persist(None).await.unwrap_err(), FetchError::EmptyPayload);
        assert_eq!(staging_files(dir.path()), 0);
    }
}
