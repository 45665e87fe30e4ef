//! Trace identifier allocation

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::data::OtelTraceId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("identifier sequence exhausted")]
    Exhausted,

    #[error("identifier source unavailable: {0}")]
    Unavailable(String),
}

/// Source of fresh trace ids for traces submitted without one
#[async_trait]
pub trait IdGenerator: Send + Sync {
    /// A 16-byte id never handed out before by this generator
    async fn new_unique_id(&self) -> Result<OtelTraceId, IdError>;
}

/// Random per-process prefix followed by an atomic sequence
///
/// The 8-byte prefix separates instances; the big-endian sequence keeps ids
/// from one instance unique without locking.
#[derive(Debug)]
pub struct RandomIdGenerator {
    prefix: [u8; 8],
    sequence: AtomicU64,
}

impl RandomIdGenerator {
    pub fn new() -> Self {
        Self::with_prefix(rand::random())
    }

    pub fn with_prefix(prefix: [u8; 8]) -> Self {
        Self {
            prefix,
            sequence: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> Result<OtelTraceId, IdError> {
        let seq = self
            .sequence
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |s| s.checked_add(1))
            .map_err(|_| IdError::Exhausted)?;

        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.prefix);
        bytes[8..].copy_from_slice(&seq.to_be_bytes());
        Ok(OtelTraceId::new(bytes))
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdGenerator for RandomIdGenerator {
    async fn new_unique_id(&self) -> Result<OtelTraceId, IdError> {
        self.next_id()
    }
}
