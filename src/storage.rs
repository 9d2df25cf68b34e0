use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Storage error enum.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    /// Failed to create the results directory or write a file into it.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Path that failed.
        path: PathBuf,
        /// Underlying io error.
        source: std::io::Error,
    },
}

/// Directory of annotated images served under `/results`.
#[derive(Debug)]
pub struct ResultStore {
    dir: PathBuf,
    seq: AtomicU64,
}

impl ResultStore {
    /// Open the store, creating the directory when missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StorageError::Write {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            seq: AtomicU64::new(0),
        })
    }

    /// The directory files are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write PNG bytes under a fresh name and return that name.
    pub fn save_png(&self, bytes: &[u8]) -> Result<String, StorageError> {
        let name = self.next_name();
        let path = self.dir.join(&name);
        std::fs::write(&path, bytes).map_err(|source| StorageError::Write { path, source })?;
        tracing::debug!(%name, size = bytes.len(), "annotated image stored");
        Ok(name)
    }

    fn next_name(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        format!("annotated_{stamp}_{seq}.png")
    }
}
