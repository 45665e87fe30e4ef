//! Snapshot manager for writing and restoring the trace store

use super::{PersistenceConfig, SnapshotError};
use crate::storage::{InMemoryTraceStore, StoredTrace};
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const SNAPSHOT_FILE: &str = "traces.snapshot.lz4";
const METADATA_FILE: &str = "snapshot.meta.json";
const SCHEMA_VERSION: u32 = 1;

/// Snapshot metadata
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SnapshotMetadata {
    /// Snapshot ID
    pub id: String,
    /// Creation timestamp (epoch ms)
    pub created_at: i64,
    /// Number of traces in the snapshot
    pub trace_count: usize,
    /// Compressed size in bytes
    pub size_bytes: usize,
    /// Schema version for compatibility
    pub schema_version: u32,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SnapshotBody {
    schema_version: u32,
    records: Vec<StoredTrace>,
}

/// Writes the whole store to disk and reads it back on restart
pub struct SnapshotManager {
    data_dir: PathBuf,
    latest_snapshot: RwLock<Option<SnapshotMetadata>>,
}

impl SnapshotManager {
    /// Create the data directory if needed and pick up the latest snapshot metadata
    pub fn new(config: &PersistenceConfig) -> Result<Self, SnapshotError> {
        fs::create_dir_all(&config.data_dir)?;

        let manager = Self {
            data_dir: config.data_dir.clone(),
            latest_snapshot: RwLock::new(None),
        };
        manager.load_latest_metadata()?;

        Ok(manager)
    }

    fn path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    fn load_latest_metadata(&self) -> Result<(), SnapshotError> {
        let path = self.path(METADATA_FILE);
        if !path.exists() {
            return Ok(());
        }
        let data = fs::read(&path)?;
        let metadata: SnapshotMetadata = serde_json::from_slice(&data)
            .map_err(|e| SnapshotError::Deserialization(e.to_string()))?;
        *self.latest_snapshot.write() = Some(metadata);
        Ok(())
    }

    /// Snapshot every record of the store
    pub fn create_snapshot(
        &self,
        store: &InMemoryTraceStore,
    ) -> Result<SnapshotMetadata, SnapshotError> {
        let created_at = current_time_ms();
        let body = SnapshotBody {
            schema_version: SCHEMA_VERSION,
            records: store.records(),
        };
        let trace_count = body.records.len();

        let json =
            serde_json::to_vec(&body).map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        let compressed = lz4_flex::compress_prepend_size(&json);
        write_atomic(&self.path(SNAPSHOT_FILE), &compressed)?;

        let metadata = SnapshotMetadata {
            id: format!("snapshot_{}", created_at),
            created_at,
            trace_count,
            size_bytes: compressed.len(),
            schema_version: SCHEMA_VERSION,
        };
        let metadata_bytes = serde_json::to_vec(&metadata)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        write_atomic(&self.path(METADATA_FILE), &metadata_bytes)?;

        *self.latest_snapshot.write() = Some(metadata.clone());
        tracing::debug!(
            snapshot_id = %metadata.id,
            traces = trace_count,
            bytes = metadata.size_bytes,
            "Snapshot written"
        );

        Ok(metadata)
    }

    /// Load the latest snapshot into the store, if one exists
    pub fn restore_latest(
        &self,
        store: &InMemoryTraceStore,
    ) -> Result<Option<SnapshotMetadata>, SnapshotError> {
        let Some(metadata) = self.latest_snapshot() else {
            return Ok(None);
        };

        let compressed = fs::read(self.path(SNAPSHOT_FILE))?;
        let json = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| SnapshotError::Corrupted(e.to_string()))?;
        let body: SnapshotBody = serde_json::from_slice(&json)
            .map_err(|e| SnapshotError::Deserialization(e.to_string()))?;

        if body.schema_version != SCHEMA_VERSION {
            return Err(SnapshotError::Corrupted(format!(
                "unsupported schema version {}",
                body.schema_version
            )));
        }

        let restored = store.restore(body.records);
        tracing::info!(snapshot_id = %metadata.id, traces = restored, "Restored snapshot");
        Ok(Some(metadata))
    }

    /// Get the latest snapshot metadata
    pub fn latest_snapshot(&self) -> Option<SnapshotMetadata> {
        self.latest_snapshot.read().clone()
    }
}

/// Write to a sibling temp file, then rename over the target
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), SnapshotError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn current_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{HexId, Span, Trace, TraceData, TraceInfo, TraceLocation, TraceState};
    use crate::storage::TraceStore;
    use chrono::DateTime;
    use tempfile::TempDir;

    fn make_trace(trace_id: &str) -> Trace {
        let mut info = TraceInfo::new(
            trace_id,
            TraceLocation::inference_table("main.default.requests"),
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        );
        info.state = TraceState::Ok;
        info.tags.insert("env".to_string(), "prod".to_string());
        let span = Span::new(HexId::new([1; 16]), HexId::new([2; 8]), "root", 5, 9)
            .with_attribute("inputs", "hello");
        Trace::new(info, TraceData::new(vec![span]))
    }

    #[tokio::test]
    async fn test_snapshot_create_restore() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(&PersistenceConfig::new(temp_dir.path())).unwrap();

        let store = InMemoryTraceStore::new();
        store.create_if_absent(make_trace("a")).await.unwrap();
        store
            .compare_and_swap("a", 1, make_trace("a"))
            .await
            .unwrap();
        store.create_if_absent(make_trace("b")).await.unwrap();

        let metadata = manager.create_snapshot(&store).unwrap();
        assert_eq!(metadata.trace_count, 2);

        // A fresh manager over the same directory sees the snapshot
        let manager = SnapshotManager::new(&PersistenceConfig::new(temp_dir.path())).unwrap();
        assert_eq!(manager.latest_snapshot(), Some(metadata));

        let restored = InMemoryTraceStore::new();
        manager.restore_latest(&restored).unwrap();
        assert_eq!(restored.len(), 2);

        let a = restored.get_by_trace_id("a").await.unwrap().unwrap();
        assert_eq!(a.version, 2);
        assert_eq!(a.trace, make_trace("a"));
    }

    #[test]
    fn test_restore_without_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(&PersistenceConfig::new(temp_dir.path())).unwrap();

        let store = InMemoryTraceStore::new();
        assert!(manager.restore_latest(&store).unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupted_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(&PersistenceConfig::new(temp_dir.path())).unwrap();
        manager.create_snapshot(&InMemoryTraceStore::new()).unwrap();

        fs::write(temp_dir.path().join(SNAPSHOT_FILE), b"garbage").unwrap();
        let err = manager
            .restore_latest(&InMemoryTraceStore::new())
            .unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::Corrupted(_) | SnapshotError::Deserialization(_)
        ));
    }
}
