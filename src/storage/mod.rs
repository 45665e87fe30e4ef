pub mod engine;
pub mod persistence;

pub use engine::{InMemoryTraceStore, StoreError, StoredTrace, TraceStore};
pub use persistence::{PersistenceConfig, SnapshotError, SnapshotManager, SnapshotWorker};
