//! Wire formats for MLflow-style traces carrying OpenTelemetry spans
//!
//! Clients send `POST /tracing/traces` with either body encoding:
//!
//! ```bash
//! curl -X POST http://localhost:5050/tracing/traces \
//!   -H 'content-type: application/json' \
//!   -d '{"info": {"trace_location": {"type": "MLFLOW_EXPERIMENT",
//!        "mlflow_experiment": {"experiment_id": "1"}},
//!        "request_time": "2024-05-01T12:00:00Z", "state": "OK"},
//!        "data": {"spans": []}}'
//! ```
//!
//! or `content-type: application/x-protobuf` with the messages in [`proto`].
//! Both decode into the loosely typed [`model`] messages, which
//! `crate::validate` checks before anything reaches storage.

pub mod codec;
pub mod model;
pub mod proto;

pub use codec::WireFormat;

use crate::data::value::AttributeError;

/// A body that could not be read or written at all
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed protobuf body: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("unsupported content type '{0}'")]
    UnsupportedMediaType(String),

    #[error("unknown {name} value {value}")]
    UnknownEnumValue { name: &'static str, value: i32 },

    #[error("attribute '{path}': number has no wire representation")]
    NonFiniteNumber { path: String },

    #[error("{field}: timestamp out of range")]
    InvalidTimestamp { field: &'static str },

    #[error("{field}: duration must be non-negative")]
    InvalidDuration { field: &'static str },

    #[error(transparent)]
    Attribute(#[from] AttributeError),
}

impl WireError {
    pub fn kind(&self) -> &'static str {
        match self {
            WireError::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            WireError::Attribute(_) => "INTERNAL_ERROR",
            _ => "MALFORMED_REQUEST",
        }
    }
}
