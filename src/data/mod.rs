pub mod ids;
pub mod location;
pub mod span;
pub mod trace;
pub mod value;
pub(crate) mod wire_enum;

pub use ids::{canonical_trace_id, HexId, OtelTraceId, SpanId};
pub use location::{
    InferenceTableLocation, MlflowExperimentLocation, TraceLocation, TraceLocationType,
};
pub use span::{Span, SpanEvent, SpanKind, SpanLink, SpanStatus, StatusCode};
pub use trace::{Assessment, Trace, TraceData, TraceInfo, TraceState};
pub use value::{AttributeValue, Attributes};
pub use wire_enum::WireEnum;
