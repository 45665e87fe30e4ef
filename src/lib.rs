//! tracekeep: trace ingestion for MLflow-style traces built from OpenTelemetry spans
//!
//! Clients submit a trace (metadata plus spans) over HTTP as JSON or protobuf.
//! The service validates it, settles its identity and location, and stores it
//! as a versioned record. Traces still `IN_PROGRESS` may be updated; anything
//! else is immutable apart from its tags.
//!
//! # Layout
//!
//! - [`data`]: domain types (`Trace`, `TraceInfo`, `Span`, attribute values)
//! - [`otel`]: wire models and the JSON/protobuf codecs
//! - [`validate`]: turning wire models into domain types, collecting violations
//! - [`ingest`]: the [`TraceService`] and its collaborators
//! - [`storage`]: the versioned in-memory store and snapshot persistence
//! - [`api`]: axum routes and server startup
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tracekeep::ingest::{AllowAll, AnyExperiment, LocationResolver, RandomIdGenerator, RequestContext};
//! use tracekeep::storage::InMemoryTraceStore;
//! use tracekeep::TraceService;
//!
//! # async fn demo(request: tracekeep::otel::model::CreateTrace) -> Result<(), tracekeep::IngestError> {
//! let service = TraceService::new(
//!     Arc::new(InMemoryTraceStore::new()),
//!     Arc::new(RandomIdGenerator::new()),
//!     LocationResolver::new(Arc::new(AnyExperiment), Arc::new(AllowAll), Duration::from_secs(60)),
//!     Default::default(),
//! );
//! let stored = service.create_trace(request, &RequestContext::default()).await?;
//! println!("stored {}", stored.trace_id());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod data;
pub mod ingest;
pub mod otel;
pub mod storage;
pub mod validate;

// Re-export commonly used types
pub use data::{Span, Trace, TraceInfo, TraceLocation, TraceState};
pub use ingest::{IngestConfig, IngestError, RequestContext, TraceService};
pub use storage::{InMemoryTraceStore, StoreError, TraceStore};
