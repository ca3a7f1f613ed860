//! The Blob Store external interface (§6): screenshots at
//! `studies/{study_id}/sessions/{session_id}/steps/step_{NNN}.png` and
//! reports at `studies/{study_id}/report.{md,pdf}`. `FsBlobStore` is the
//! filesystem-backed adapter, using the atomic write idiom so readers never
//! observe a partially-written blob; pluggable behind the trait for a
//! future object-store backend.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::atomic_io::write_bytes_atomic;

pub trait BlobStore: Send + Sync {
    fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;
    fn get(&self, path: &str) -> Result<Vec<u8>>;
    fn exists(&self, path: &str) -> bool;
    fn full_path(&self, path: &str) -> PathBuf;
}

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        write_bytes_atomic(&self.full_path(path), bytes)
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path);
        std::fs::read(&full_path).with_context(|| format!("failed to read blob {}", full_path.display()))
    }

    fn exists(&self, path: &str) -> bool {
        self.full_path(path).exists()
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(Path::new(path))
    }
}

pub fn screenshot_blob_path(study_id: &str, session_id: &str, step_number: u32) -> String {
    format!("studies/{study_id}/sessions/{session_id}/steps/step_{step_number:03}.png")
}

pub fn report_blob_path(study_id: &str, extension: &str) -> String {
    format!("studies/{study_id}/report.{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_put_then_get_round_trips_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsBlobStore::new(dir.path());
        let path = screenshot_blob_path("study-1", "session-1", 3);
        store.put(&path, b"fake-png-bytes").expect("put");
        assert!(store.exists(&path));
        assert_eq!(store.get(&path).expect("get"), b"fake-png-bytes");
    }

    #[test]
    fn regression_get_missing_blob_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsBlobStore::new(dir.path());
        assert!(store.get("studies/missing/report.md").is_err());
    }

    #[test]
    fn functional_screenshot_path_pads_step_number() {
        assert_eq!(
            screenshot_blob_path("s1", "sess1", 7),
            "studies/s1/sessions/sess1/steps/step_007.png"
        );
    }
}
