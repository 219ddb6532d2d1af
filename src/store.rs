//! Durable storage for the proxy configuration document

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Document content as it was read, used as the expected value on write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub text: String,
}

/// Reads and writes the configuration document in full
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load(&self) -> Result<Snapshot>;

    /// Replace the document with `text`
    ///
    /// Fails with `SyncError::ConfigConflict` when the stored content no
    /// longer matches `expected`.
    async fn replace(&self, expected: &Snapshot, text: &str) -> Result<()>;
}

/// Configuration file on the local filesystem
#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    path: PathBuf,
    atomic: bool,
}

impl FileDocumentStore {
    /// Create a store that replaces the file atomically via rename
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            atomic: true,
        }
    }

    /// Write in place instead of renaming a temporary file over the target
    ///
    /// Needed when the file is a single-file Docker bind mount: a rename
    /// swaps the inode and the container keeps seeing the old content.
    pub fn in_place(mut self) -> Self {
        self.atomic = false;
        self
    }

    fn write_error(&self, source: std::io::Error) -> SyncError {
        SyncError::ConfigWrite {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn load(&self) -> Result<Snapshot> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SyncError::ConfigRead {
                path: self.path.clone(),
                source,
            })?;
        Ok(Snapshot { text })
    }

    async fn replace(&self, expected: &Snapshot, text: &str) -> Result<()> {
        let current = self.load().await?;
        if current != *expected {
            return Err(SyncError::ConfigConflict(self.path.clone()));
        }

        if self.atomic {
            let path = self.path.clone();
            let text = text.to_string();
            tokio::task::spawn_blocking(move || write_atomic(&path, &text))
                .await
                .map_err(|e| self.write_error(std::io::Error::new(std::io::ErrorKind::Other, e)))?
                .map_err(|e| self.write_error(e))?;
        } else {
            tokio::fs::write(&self.path, text)
                .await
                .map_err(|e| self.write_error(e))?;
        }

        debug!(path = %self.path.display(), bytes = text.len(), atomic = self.atomic, "Config file written");
        Ok(())
    }
}

/// Write to a temporary file next to `path`, then rename it into place
fn write_atomic(path: &Path, text: &str) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(text.as_bytes())?;
    tmp.as_file().sync_all()?;

    // Temporary files are created 0600; keep whatever the proxy could read before
    if let Ok(metadata) = std::fs::metadata(path) {
        std::fs::set_permissions(tmp.path(), metadata.permissions())?;
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// In-memory document, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    text: Mutex<String>,
    writes: Mutex<usize>,
}

impl MemoryDocumentStore {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Mutex::new(text.into()),
            writes: Mutex::new(0),
        }
    }

    pub fn text(&self) -> String {
        self.text.lock().clone()
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn load(&self) -> Result<Snapshot> {
        Ok(Snapshot { text: self.text() })
    }

    async fn replace(&self, expected: &Snapshot, text: &str) -> Result<()> {
        let mut current = self.text.lock();
        if *current != expected.text {
            return Err(SyncError::ConfigConflict(PathBuf::from("<memory>")));
        }
        *current = text.to_string();
        *self.writes.lock() += 1;
        Ok(())
    }
}
