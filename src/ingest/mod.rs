//! The trace ingestion service and its collaborators
//!
//! - [`TraceService`]: validation, identity, location checks, and versioned writes
//! - [`IdGenerator`]: fresh trace ids for traces submitted without one
//! - [`LocationResolver`]: experiment lookup and write authorization

pub mod config;
pub mod error;
pub mod ids;
pub mod resolver;
pub mod service;

pub use config::{DroppedAttributesPolicy, IngestConfig, UpdateMode};
pub use error::IngestError;
pub use ids::{IdError, IdGenerator, RandomIdGenerator};
pub use resolver::{
    AllowAll, AnyExperiment, Authorizer, CollaboratorError, ExperimentCache, ExperimentCatalog,
    LocationResolver, LocationTarget, ResolvedLocation, StaticExperimentCatalog,
};
pub use service::{RequestContext, TraceService};
