use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::data::Trace;

/// A persisted trace and its record version
///
/// The first stored version is 1; every successful write bumps it by one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTrace {
    pub trace: Trace,
    pub version: u64,
}

impl StoredTrace {
    pub fn trace_id(&self) -> &str {
        self.trace.trace_id()
    }
}

/// Persistence collaborator of the ingestion service
///
/// Implementations must commit atomically: a write either happens in full or
/// not at all, and dropping a pending future must leave no visible record.
#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn get_by_trace_id(&self, trace_id: &str) -> Result<Option<StoredTrace>, StoreError>;

    /// Store a trace under a new id at version 1
    async fn create_if_absent(&self, trace: Trace) -> Result<StoredTrace, StoreError>;

    /// Replace the record only if it is still at `expected_version`.
    /// `expected_version` 0 means the record must not exist yet.
    async fn compare_and_swap(
        &self,
        trace_id: &str,
        expected_version: u64,
        trace: Trace,
    ) -> Result<StoredTrace, StoreError>;
}

/// Reference store: traces in a concurrent map keyed by trace id
#[derive(Debug, Default)]
pub struct InMemoryTraceStore {
    traces: DashMap<String, StoredTrace>,
}

impl InMemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Copy of every record, ordered by trace id
    pub fn records(&self) -> Vec<StoredTrace> {
        let mut records: Vec<StoredTrace> =
            self.traces.iter().map(|e| e.value().clone()).collect();
        records.sort_by(|a, b| a.trace_id().cmp(b.trace_id()));
        records
    }

    /// Load records, keeping versions. Existing records with the same id are overwritten.
    pub fn restore(&self, records: Vec<StoredTrace>) -> usize {
        let mut restored = 0;
        for record in records {
            self.traces.insert(record.trace_id().to_string(), record);
            restored += 1;
        }
        restored
    }

    fn write(
        &self,
        trace_id: &str,
        expected_version: u64,
        trace: Trace,
    ) -> Result<StoredTrace, StoreError> {
        if trace.trace_id() != trace_id {
            return Err(StoreError::KeyMismatch {
                key: trace_id.to_string(),
                trace_id: trace.trace_id().to_string(),
            });
        }

        match self.traces.entry(trace_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let actual = entry.get().version;
                if expected_version == 0 {
                    return Err(StoreError::AlreadyExists(trace_id.to_string()));
                }
                if actual != expected_version {
                    return Err(StoreError::ConcurrentUpdate {
                        trace_id: trace_id.to_string(),
                        expected: expected_version,
                        actual,
                    });
                }
                let stored = StoredTrace {
                    trace,
                    version: actual + 1,
                };
                entry.insert(stored.clone());
                Ok(stored)
            }
            Entry::Vacant(entry) => {
                if expected_version != 0 {
                    return Err(StoreError::NotFound(trace_id.to_string()));
                }
                let stored = StoredTrace { trace, version: 1 };
                entry.insert(stored.clone());
                Ok(stored)
            }
        }
    }
}

#[async_trait]
impl TraceStore for InMemoryTraceStore {
    async fn get_by_trace_id(&self, trace_id: &str) -> Result<Option<StoredTrace>, StoreError> {
        Ok(self.traces.get(trace_id).map(|e| e.value().clone()))
    }

    async fn create_if_absent(&self, trace: Trace) -> Result<StoredTrace, StoreError> {
        let trace_id = trace.trace_id().to_string();
        self.write(&trace_id, 0, trace)
    }

    async fn compare_and_swap(
        &self,
        trace_id: &str,
        expected_version: u64,
        trace: Trace,
    ) -> Result<StoredTrace, StoreError> {
        self.write(trace_id, expected_version, trace)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("trace '{0}' already exists")]
    AlreadyExists(String),

    #[error("trace '{trace_id}' was modified concurrently (expected version {expected}, found {actual})")]
    ConcurrentUpdate {
        trace_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("trace '{0}' not found")]
    NotFound(String),

    #[error("record key '{key}' does not match trace id '{trace_id}'")]
    KeyMismatch { key: String, trace_id: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            // A create racing another create for the same id lost the race
            StoreError::AlreadyExists(_) | StoreError::ConcurrentUpdate { .. } => {
                "CONCURRENT_UPDATE"
            }
            StoreError::NotFound(_) => "NOT_FOUND",
            StoreError::KeyMismatch { .. } => "INTERNAL_ERROR",
            StoreError::Unavailable(_) => "STORAGE_UNAVAILABLE",
        }
    }
}
