use std::sync::RwLock;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total_chunks: u64,
    pub total_files: u64,

    pub downloaded_chunks: u64,
    pub decompressed_chunks: u64,
    pub verified_chunks: u64,
    pub assembled_chunks: u64,
    pub verified_files: u64,

    pub total_bytes: u64,
    pub downloaded_bytes: u64
}

impl ProgressSnapshot {
    /// Fraction of the compressed payload fetched so far.
    ///
    /// Stays meaningful across retries because re-enqueueing a chunk restores
    /// `total_bytes` by its compressed size.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        }
        else {
            self.downloaded_bytes as f64 / self.total_bytes as f64
        }
    }
}

/// Pipeline counters behind a single reader-writer guard.
///
/// The guard protects only these scalar updates; no stage holds it across a
/// blocking operation.
#[derive(Debug, Default)]
pub struct Progress {
    inner: RwLock<ProgressSnapshot>
}

impl Progress {
    pub fn reset(&self) {
        *self.inner.write().unwrap() = ProgressSnapshot::default();
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.inner.read().unwrap()
    }

    pub(crate) fn set_totals(&self, total_chunks: u64, total_files: u64) {
        let mut inner = self.inner.write().unwrap();

        inner.total_chunks = total_chunks;
        inner.total_files = total_files;
    }

    pub(crate) fn set_total_bytes(&self, bytes: u64) {
        self.inner.write().unwrap().total_bytes = bytes;
    }

    /// A re-enqueued chunk will be downloaded again, so its compressed size
    /// goes back into the denominator
    pub(crate) fn restore_total_bytes(&self, bytes: u64) {
        self.inner.write().unwrap().total_bytes += bytes;
    }

    pub(crate) fn add_downloaded_chunk(&self, bytes: u64) {
        let mut inner = self.inner.write().unwrap();

        inner.downloaded_bytes += bytes;
        inner.downloaded_chunks += 1;
    }

    pub(crate) fn inc_decompressed_chunks(&self) {
        self.inner.write().unwrap().decompressed_chunks += 1;
    }

    pub(crate) fn inc_verified_chunks(&self) {
        self.inner.write().unwrap().verified_chunks += 1;
    }

    pub(crate) fn inc_assembled_chunks(&self) {
        self.inner.write().unwrap().assembled_chunks += 1;
    }

    pub(crate) fn inc_verified_files(&self) {
        self.inner.write().unwrap().verified_files += 1;
    }
}
