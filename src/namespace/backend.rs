//! Storage backends a namespace can sit on.
//!
//! The core never moves data; it only needs the backing size, an optional
//! allocation cluster size, and the ability to drain and flush the store at
//! lifecycle boundaries.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use super::geometry::BackendInfo;
use crate::error::Result;

/// Backing store of a namespace.
pub trait BlockBackend: Send + Sync + std::fmt::Debug {
    /// Backing size in bytes.
    fn length(&self) -> Result<u64>;

    /// Allocation cluster size in bytes, if the store has one.
    fn cluster_size(&self) -> Option<u64> {
        None
    }

    /// Wait for in-flight requests to complete.
    fn drain(&self);

    /// Make completed writes durable.
    fn flush(&self) -> Result<()>;

    /// Size and cluster information for geometry calculation.
    fn info(&self) -> Result<BackendInfo> {
        Ok(BackendInfo {
            length: self.length()?,
            cluster_size: self.cluster_size(),
        })
    }
}

// =============================================================================
// In-memory backend
// =============================================================================

/// Backend with a fixed size and no storage behind it.
///
/// Counts drain and flush requests so lifecycle ordering can be observed.
#[derive(Debug, Default)]
pub struct MemBackend {
    length: u64,
    cluster_size: Option<u64>,
    drains: AtomicU64,
    flushes: AtomicU64,
}

impl MemBackend {
    pub fn new(length: u64) -> Self {
        Self {
            length,
            ..Default::default()
        }
    }

    /// Report an allocation cluster size, like a thin-provisioned image.
    pub fn with_cluster_size(mut self, cluster_size: u64) -> Self {
        self.cluster_size = Some(cluster_size);
        self
    }

    pub fn drain_count(&self) -> u64 {
        self.drains.load(Ordering::Acquire)
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Acquire)
    }
}

impl BlockBackend for MemBackend {
    fn length(&self) -> Result<u64> {
        Ok(self.length)
    }

    fn cluster_size(&self) -> Option<u64> {
        self.cluster_size
    }

    fn drain(&self) {
        self.drains.fetch_add(1, Ordering::AcqRel);
    }

    fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

// =============================================================================
// File backend
// =============================================================================

/// Regular file or block device.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: File,
}

impl FileBackend {
    /// Open `path` for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        debug!(path = %path.display(), "opened backing file");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockBackend for FileBackend {
    fn length(&self) -> Result<u64> {
        // metadata reports 0 for block devices, seeking does not
        Ok((&self.file).seek(SeekFrom::End(0))?)
    }

    fn drain(&self) {}

    fn flush(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_backend() {
        let backend = MemBackend::new(1 << 20).with_cluster_size(64 * 1024);
        let info = backend.info().unwrap();
        assert_eq!(info.length, 1 << 20);
        assert_eq!(info.cluster_size, Some(64 * 1024));

        backend.drain();
        backend.flush().unwrap();
        backend.flush().unwrap();
        assert_eq!(backend.drain_count(), 1);
        assert_eq!(backend.flush_count(), 2);
    }

    #[test]
    fn test_file_backend() {
        let path = std::env::temp_dir().join(format!("znscore-backend-{}.img", std::process::id()));
        let file = File::create(&path).unwrap();
        file.set_len(4 * 1024 * 1024).unwrap();
        drop(file);

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.length().unwrap(), 4 * 1024 * 1024);
        assert_eq!(backend.cluster_size(), None);
        backend.flush().unwrap();
        assert_eq!(backend.path(), path.as_path());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_file_backend_missing() {
        let err = FileBackend::open("/nonexistent/znscore.img").unwrap_err();
        assert!(matches!(err, crate::error::Error::Io(_)));
    }
}
