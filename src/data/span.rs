//! Span data model

use serde::{Deserialize, Serialize};

use super::ids::{OtelTraceId, SpanId};
use super::value::{AttributeValue, Attributes};
use super::wire_enum::{wire_enum_serde, WireEnum};

/// Span kind from OTel spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SpanKind {
    #[default]
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl WireEnum for SpanKind {
    const PREFIX: &'static str = "SPAN_KIND_";
    const NAME: &'static str = "span kind";

    fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Unspecified => "UNSPECIFIED",
            SpanKind::Internal => "INTERNAL",
            SpanKind::Server => "SERVER",
            SpanKind::Client => "CLIENT",
            SpanKind::Producer => "PRODUCER",
            SpanKind::Consumer => "CONSUMER",
        }
    }

    fn as_i32(&self) -> i32 {
        *self as i32
    }

    fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(SpanKind::Unspecified),
            1 => Some(SpanKind::Internal),
            2 => Some(SpanKind::Server),
            3 => Some(SpanKind::Client),
            4 => Some(SpanKind::Producer),
            5 => Some(SpanKind::Consumer),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "UNSPECIFIED" => Some(SpanKind::Unspecified),
            "INTERNAL" => Some(SpanKind::Internal),
            "SERVER" => Some(SpanKind::Server),
            "CLIENT" => Some(SpanKind::Client),
            "PRODUCER" => Some(SpanKind::Producer),
            "CONSUMER" => Some(SpanKind::Consumer),
            _ => None,
        }
    }
}

wire_enum_serde!(SpanKind);

/// Span status code from OTel spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatusCode {
    #[default]
    Unset,
    Ok,
    Error,
}

impl WireEnum for StatusCode {
    const PREFIX: &'static str = "STATUS_CODE_";
    const NAME: &'static str = "status code";

    fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Unset => "UNSET",
            StatusCode::Ok => "OK",
            StatusCode::Error => "ERROR",
        }
    }

    fn as_i32(&self) -> i32 {
        *self as i32
    }

    fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(StatusCode::Unset),
            1 => Some(StatusCode::Ok),
            2 => Some(StatusCode::Error),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "UNSET" => Some(StatusCode::Unset),
            "OK" => Some(StatusCode::Ok),
            "ERROR" => Some(StatusCode::Error),
            _ => None,
        }
    }
}

wire_enum_serde!(StatusCode);

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpanStatus {
    pub code: StatusCode,
    #[serde(default)]
    pub message: String,
}

/// A timestamped annotation on a span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub time_unix_nano: u64,
    pub name: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub dropped_attributes_count: u32,
}

impl SpanEvent {
    pub fn new(name: impl Into<String>, time_unix_nano: u64) -> Self {
        Self {
            time_unix_nano,
            name: name.into(),
            attributes: Attributes::new(),
            dropped_attributes_count: 0,
        }
    }
}

/// A reference to another span, possibly in another trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLink {
    pub trace_id: OtelTraceId,
    pub span_id: SpanId,
    #[serde(default)]
    pub trace_state: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub dropped_attributes_count: u32,
    #[serde(default)]
    pub flags: u32,
}

/// One traced operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: OtelTraceId,
    pub span_id: SpanId,
    #[serde(default)]
    pub trace_state: Option<String>,
    /// `None` for the root span
    #[serde(default)]
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    #[serde(default)]
    pub kind: SpanKind,
    pub start_time_unix_nano: u64,
    pub end_time_unix_nano: u64,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub dropped_attributes_count: u32,
    #[serde(default)]
    pub events: Vec<SpanEvent>,
    #[serde(default)]
    pub dropped_events_count: u32,
    #[serde(default)]
    pub links: Vec<SpanLink>,
    #[serde(default)]
    pub dropped_links_count: u32,
    #[serde(default)]
    pub status: Option<SpanStatus>,
    #[serde(default)]
    pub flags: u32,
}

impl Span {
    /// Create a root span; use the `with_*` methods to fill in the rest
    pub fn new(
        trace_id: OtelTraceId,
        span_id: SpanId,
        name: impl Into<String>,
        start_time_unix_nano: u64,
        end_time_unix_nano: u64,
    ) -> Self {
        Self {
            trace_id,
            span_id,
            trace_state: None,
            parent_span_id: None,
            name: name.into(),
            kind: SpanKind::Unspecified,
            start_time_unix_nano,
            end_time_unix_nano,
            attributes: Attributes::new(),
            dropped_attributes_count: 0,
            events: Vec::new(),
            dropped_events_count: 0,
            links: Vec::new(),
            dropped_links_count: 0,
            status: None,
            flags: 0,
        }
    }

    pub fn with_parent(mut self, parent_span_id: SpanId) -> Self {
        self.parent_span_id = if parent_span_id.is_empty() {
            None
        } else {
            Some(parent_span_id)
        };
        self
    }

    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_event(mut self, event: SpanEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_status(mut self, code: StatusCode, message: impl Into<String>) -> Self {
        self.status = Some(SpanStatus {
            code,
            message: message.into(),
        });
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    /// Status code, with an absent status reading as `UNSET`
    pub fn status_code(&self) -> StatusCode {
        self.status.as_ref().map(|s| s.code).unwrap_or_default()
    }

    pub fn duration_nanos(&self) -> u64 {
        self.end_time_unix_nano.saturating_sub(self.start_time_unix_nano)
    }

    /// Human-readable handle used in error messages: `name (span_id)`
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.span_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_kind_from_i32() {
        assert_eq!(SpanKind::from_i32(0), Some(SpanKind::Unspecified));
        assert_eq!(SpanKind::from_i32(1), Some(SpanKind::Internal));
        assert_eq!(SpanKind::from_i32(2), Some(SpanKind::Server));
        assert_eq!(SpanKind::from_i32(3), Some(SpanKind::Client));
        assert_eq!(SpanKind::from_i32(9), None);
    }

    #[test]
    fn test_span_kind_serde_accepts_every_form() {
        let short: SpanKind = serde_json::from_str(r#""SERVER""#).unwrap();
        let prefixed: SpanKind = serde_json::from_str(r#""SPAN_KIND_SERVER""#).unwrap();
        let numeric: SpanKind = serde_json::from_str("2").unwrap();
        assert_eq!(short, SpanKind::Server);
        assert_eq!(prefixed, SpanKind::Server);
        assert_eq!(numeric, SpanKind::Server);

        assert_eq!(serde_json::to_string(&SpanKind::Server).unwrap(), r#""SERVER""#);
        assert!(serde_json::from_str::<SpanKind>(r#""SIDEWAYS""#).is_err());
    }

    #[test]
    fn test_status_code_defaults_to_unset() {
        let span = Span::new(trace_id(), span_id(1), "root", 1000, 2000);
        assert_eq!(span.status_code(), StatusCode::Unset);

        let span = span.with_status(StatusCode::Error, "boom");
        assert_eq!(span.status_code(), StatusCode::Error);
    }

    #[test]
    fn test_empty_parent_means_root() {
        let span = Span::new(trace_id(), span_id(2), "child", 1000, 2000)
            .with_parent(SpanId::default());
        assert!(span.is_root());

        let span = span.with_parent(span_id(1));
        assert!(!span.is_root());
        assert_eq!(span.duration_nanos(), 1000);
    }

    fn trace_id() -> OtelTraceId {
        OtelTraceId::new([7u8; 16])
    }

    fn span_id(n: u8) -> SpanId {
        SpanId::new([n; 8])
    }
}
