//! Trace-level model: info, data and the aggregate exchanged with clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use super::ids::SpanId;
use super::location::TraceLocation;
use super::span::Span;
use super::wire_enum::{wire_enum_serde, WireEnum};

/// Execution state of a trace
///
/// `STATE_UNSPECIFIED -> IN_PROGRESS -> {OK, ERROR}`. Only `IN_PROGRESS`
/// traces accept further writes to their data and core info fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TraceState {
    #[default]
    Unspecified,
    Ok,
    Error,
    InProgress,
}

impl TraceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TraceState::Ok | TraceState::Error)
    }

    pub fn accepts_updates(&self) -> bool {
        matches!(self, TraceState::InProgress)
    }
}

impl WireEnum for TraceState {
    const PREFIX: &'static str = "STATE_";
    const NAME: &'static str = "trace state";

    fn as_str(&self) -> &'static str {
        match self {
            TraceState::Unspecified => "STATE_UNSPECIFIED",
            TraceState::Ok => "OK",
            TraceState::Error => "ERROR",
            TraceState::InProgress => "IN_PROGRESS",
        }
    }

    fn as_i32(&self) -> i32 {
        *self as i32
    }

    fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(TraceState::Unspecified),
            1 => Some(TraceState::Ok),
            2 => Some(TraceState::Error),
            3 => Some(TraceState::InProgress),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "STATE_UNSPECIFIED" | "UNSPECIFIED" => Some(TraceState::Unspecified),
            "OK" => Some(TraceState::Ok),
            "ERROR" => Some(TraceState::Error),
            "IN_PROGRESS" => Some(TraceState::InProgress),
            _ => None,
        }
    }
}

wire_enum_serde!(TraceState);

impl fmt::Display for TraceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally defined assessment record, stored and returned verbatim
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Assessment(pub serde_json::Map<String, serde_json::Value>);

/// Trace-level metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceInfo {
    pub trace_id: String,
    #[serde(default)]
    pub client_request_id: Option<String>,
    pub trace_location: TraceLocation,
    #[serde(default)]
    pub request: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    pub request_time: DateTime<Utc>,
    #[serde(default)]
    pub execution_duration: Option<Duration>,
    #[serde(default)]
    pub state: TraceState,
    #[serde(default)]
    pub trace_metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub assessments: Vec<Assessment>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl TraceInfo {
    pub fn new(
        trace_id: impl Into<String>,
        trace_location: TraceLocation,
        request_time: DateTime<Utc>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            client_request_id: None,
            trace_location,
            request: None,
            response: None,
            request_time,
            execution_duration: None,
            state: TraceState::Unspecified,
            trace_metadata: BTreeMap::new(),
            assessments: Vec::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Logical end instant, `request_time + execution_duration`
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        let duration = chrono::Duration::from_std(self.execution_duration?).ok()?;
        self.request_time.checked_add_signed(duration)
    }
}

/// Spans of one trace, in submission order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TraceData {
    #[serde(default)]
    pub spans: Vec<Span>,
}

impl TraceData {
    pub fn new(spans: Vec<Span>) -> Self {
        Self { spans }
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// First span without a parent
    pub fn root_span(&self) -> Option<&Span> {
        self.spans.iter().find(|s| s.is_root())
    }

    pub fn span(&self, span_id: &SpanId) -> Option<&Span> {
        self.spans.iter().find(|s| &s.span_id == span_id)
    }
}

/// The unit exchanged with clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub info: TraceInfo,
    #[serde(default)]
    pub data: TraceData,
}

impl Trace {
    pub fn new(info: TraceInfo, data: TraceData) -> Self {
        Self { info, data }
    }

    pub fn trace_id(&self) -> &str {
        &self.info.trace_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ids::{HexId, OtelTraceId};

    fn request_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_state_transitions() {
        assert!(TraceState::InProgress.accepts_updates());
        assert!(!TraceState::Ok.accepts_updates());
        assert!(!TraceState::Unspecified.accepts_updates());
        assert!(TraceState::Ok.is_terminal());
        assert!(TraceState::Error.is_terminal());
        assert!(!TraceState::InProgress.is_terminal());
    }

    #[test]
    fn test_state_names() {
        let state: TraceState = serde_json::from_str(r#""IN_PROGRESS""#).unwrap();
        assert_eq!(state, TraceState::InProgress);
        let state: TraceState = serde_json::from_str(r#""STATE_UNSPECIFIED""#).unwrap();
        assert_eq!(state, TraceState::Unspecified);
        assert_eq!(TraceState::Ok.to_string(), "OK");
    }

    #[test]
    fn test_end_time() {
        let mut info = TraceInfo::new("abc", TraceLocation::experiment("1"), request_time());
        assert_eq!(info.end_time(), None);

        info.execution_duration = Some(Duration::from_millis(1500));
        let end = info.end_time().unwrap();
        assert_eq!(end.timestamp_millis(), request_time().timestamp_millis() + 1500);
    }

    #[test]
    fn test_root_span_lookup() {
        let trace_id = OtelTraceId::new([1u8; 16]);
        let root = Span::new(trace_id.clone(), HexId::new([1u8; 8]), "root", 0, 10);
        let child = Span::new(trace_id, HexId::new([2u8; 8]), "child", 1, 5)
            .with_parent(HexId::new([1u8; 8]));
        let data = TraceData::new(vec![child, root]);

        assert_eq!(data.root_span().unwrap().name, "root");
        assert_eq!(data.span(&HexId::new([2u8; 8])).unwrap().name, "child");
        assert_eq!(data.len(), 2);
    }
}
