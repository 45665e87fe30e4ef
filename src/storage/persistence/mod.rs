//! Snapshot persistence for the in-memory store
//!
//! The whole store is written periodically as one LZ4-compressed JSON
//! snapshot and read back at startup.

pub mod snapshot;
pub mod worker;

pub use snapshot::{SnapshotManager, SnapshotMetadata};
pub use worker::SnapshotWorker;

use std::path::{Path, PathBuf};

/// Persistence configuration
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Directory holding the snapshot files
    pub data_dir: PathBuf,
    /// Snapshot interval in seconds
    pub snapshot_interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tracekeep_data"),
            snapshot_interval_secs: 300, // 5 minutes
        }
    }
}

impl PersistenceConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn with_snapshot_interval(mut self, secs: u64) -> Self {
        self.snapshot_interval_secs = secs;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corrupted snapshot: {0}")]
    Corrupted(String),
}
