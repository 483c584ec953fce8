//! JSON snapshot persistence for [`MemoryStore`].
//!
//! Every committed write rewrites the whole snapshot: serialize to a sibling
//! temp file, then rename over the target, so a crash leaves either the old or
//! the new snapshot on disk and never a torn one. Writes happen off the store
//! lock, on the blocking pool.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::core::StoreError;
use crate::infra::store::memory::{MemoryStore, StoreState};

/// Location of a store snapshot on disk.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    /// Snapshot at `path`; nothing is read or created yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot, or `None` if the file does not exist.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Option<StoreState>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|e| StoreError::Io(format!("read {}: {e}", self.path.display())))?;
        let state = serde_json::from_str(&content)
            .map_err(|e| StoreError::Io(format!("parse {}: {e}", self.path.display())))?;
        Ok(Some(state))
    }

    /// Atomically replace the snapshot with `state`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if serialization or any filesystem step fails.
    pub fn save(&self, state: &StoreState) -> Result<(), StoreError> {
        self.write(&Self::encode(state)?)
    }

    /// Serialized snapshot content for `state`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if serialization fails.
    pub fn encode(state: &StoreState) -> Result<String, StoreError> {
        serde_json::to_string_pretty(state)
            .map_err(|e| StoreError::Io(format!("serialize snapshot: {e}")))
    }

    /// Atomically replace the snapshot with already encoded `content`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if any filesystem step fails.
    pub fn write(&self, content: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("create {}: {e}", parent.display())))?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content)
            .map_err(|e| StoreError::Io(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            StoreError::Io(format!(
                "rename {} -> {}: {e}",
                tmp.display(),
                self.path.display()
            ))
        })?;
        debug!(path = %self.path.display(), "snapshot written");
        Ok(())
    }
}

/// Versioned writer in front of a [`SnapshotFile`].
///
/// Snapshots are encoded under the store lock and written after it is
/// released, so writes can arrive out of order. Each carries the version it
/// was taken at; one older than the last written snapshot is dropped.
#[derive(Debug, Clone)]
pub(crate) struct SnapshotWriter {
    file: SnapshotFile,
    written: Arc<Mutex<u64>>,
}

impl SnapshotWriter {
    pub(crate) fn new(file: SnapshotFile) -> Self {
        Self {
            file,
            written: Arc::new(Mutex::new(0)),
        }
    }

    /// Blocking write. Returns whether the snapshot reached the disk.
    pub(crate) fn write(&self, version: u64, content: &str) -> Result<bool, StoreError> {
        let mut written = self.written.lock();
        if version <= *written {
            debug!(version, written = *written, "superseded snapshot skipped");
            return Ok(false);
        }
        self.file.write(content)?;
        *written = version;
        Ok(true)
    }

    /// Write on the blocking pool.
    pub(crate) async fn write_async(&self, version: u64, content: String) -> Result<bool, StoreError> {
        let writer = self.clone();
        tokio::task::spawn_blocking(move || writer.write(version, &content))
            .await
            .map_err(|e| StoreError::Io(format!("snapshot writer task failed: {e}")))?
    }
}

/// Open a [`MemoryStore`] backed by the snapshot at `path`, loading existing
/// state if the file is present.
///
/// # Errors
///
/// [`StoreError::Io`] if an existing snapshot cannot be read.
pub fn open_file_store(path: impl Into<PathBuf>) -> Result<MemoryStore, StoreError> {
    let file = SnapshotFile::new(path);
    let state = match file.load()? {
        Some(state) => {
            info!(path = %file.path().display(), "loaded store snapshot");
            state
        }
        None => StoreState::default(),
    };
    Ok(MemoryStore::from_parts(state, Some(file)))
}
