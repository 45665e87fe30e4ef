//! Protobuf form of the wire messages
//!
//! Hand-declared prost messages. Span, event, link and status keep the
//! OpenTelemetry field numbers so OTLP tooling can read them; the trace
//! envelope follows the MLflow trace messages. Scalar fields use explicit
//! presence so an omitted field reaches validation as missing instead of as a
//! zero value. Enums travel as plain `int32`, which is wire compatible with a
//! proto enum.

use chrono::{DateTime, Utc};
use prost_types::value::Kind;
use serde_json::{Map, Number, Value as JsonValue};
use std::collections::BTreeMap;
use std::time::Duration;

use super::model;
use super::WireError;
use crate::data::{HexId, SpanKind, StatusCode, TraceLocationType, TraceState, WireEnum};

#[derive(Clone, PartialEq, prost::Message)]
pub struct Trace {
    #[prost(message, optional, tag = "1")]
    pub info: Option<TraceInfo>,
    #[prost(message, optional, tag = "2")]
    pub data: Option<TraceData>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TraceData {
    #[prost(message, repeated, tag = "1")]
    pub spans: Vec<Span>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Span {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub trace_id: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub span_id: Option<Vec<u8>>,
    #[prost(string, optional, tag = "3")]
    pub trace_state: Option<String>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub parent_span_id: Option<Vec<u8>>,
    #[prost(string, optional, tag = "5")]
    pub name: Option<String>,
    #[prost(int32, optional, tag = "6")]
    pub kind: Option<i32>,
    #[prost(fixed64, optional, tag = "7")]
    pub start_time_unix_nano: Option<u64>,
    #[prost(fixed64, optional, tag = "8")]
    pub end_time_unix_nano: Option<u64>,
    #[prost(btree_map = "string, message", tag = "9")]
    pub attributes: BTreeMap<String, prost_types::Value>,
    #[prost(uint32, optional, tag = "10")]
    pub dropped_attributes_count: Option<u32>,
    #[prost(message, repeated, tag = "11")]
    pub events: Vec<Event>,
    #[prost(uint32, optional, tag = "12")]
    pub dropped_events_count: Option<u32>,
    #[prost(message, repeated, tag = "13")]
    pub links: Vec<Link>,
    #[prost(uint32, optional, tag = "14")]
    pub dropped_links_count: Option<u32>,
    #[prost(message, optional, tag = "15")]
    pub status: Option<Status>,
    #[prost(fixed32, optional, tag = "16")]
    pub flags: Option<u32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Event {
    #[prost(fixed64, optional, tag = "1")]
    pub time_unix_nano: Option<u64>,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(btree_map = "string, message", tag = "3")]
    pub attributes: BTreeMap<String, prost_types::Value>,
    #[prost(uint32, optional, tag = "4")]
    pub dropped_attributes_count: Option<u32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Link {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub trace_id: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub span_id: Option<Vec<u8>>,
    #[prost(string, optional, tag = "3")]
    pub trace_state: Option<String>,
    #[prost(btree_map = "string, message", tag = "4")]
    pub attributes: BTreeMap<String, prost_types::Value>,
    #[prost(uint32, optional, tag = "5")]
    pub dropped_attributes_count: Option<u32>,
    #[prost(fixed32, optional, tag = "6")]
    pub flags: Option<u32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Status {
    #[prost(string, optional, tag = "2")]
    pub message: Option<String>,
    #[prost(int32, optional, tag = "3")]
    pub code: Option<i32>,
}

/// `mlflow_experiment` and `inference_table` form a oneof on the wire. They
/// are declared as plain fields so a body setting both can be rejected rather
/// than silently keeping the last one.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TraceLocation {
    #[prost(int32, optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(message, optional, tag = "2")]
    pub mlflow_experiment: Option<MlflowExperimentLocation>,
    #[prost(message, optional, tag = "3")]
    pub inference_table: Option<InferenceTableLocation>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MlflowExperimentLocation {
    #[prost(string, optional, tag = "1")]
    pub experiment_id: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InferenceTableLocation {
    #[prost(string, optional, tag = "1")]
    pub full_table_name: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TraceInfo {
    #[prost(string, optional, tag = "1")]
    pub trace_id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub client_request_id: Option<String>,
    #[prost(message, optional, tag = "3")]
    pub trace_location: Option<TraceLocation>,
    #[prost(string, optional, tag = "4")]
    pub request: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub response: Option<String>,
    #[prost(message, optional, tag = "6")]
    pub request_time: Option<prost_types::Timestamp>,
    #[prost(message, optional, tag = "7")]
    pub execution_duration: Option<prost_types::Duration>,
    #[prost(int32, optional, tag = "8")]
    pub state: Option<i32>,
    #[prost(btree_map = "string, string", tag = "9")]
    pub trace_metadata: BTreeMap<String, String>,
    #[prost(message, repeated, tag = "10")]
    pub assessments: Vec<prost_types::Struct>,
    #[prost(btree_map = "string, string", tag = "11")]
    pub tags: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// protobuf -> wire model
// ---------------------------------------------------------------------------

fn enum_value<T: WireEnum>(value: Option<i32>) -> Result<Option<T>, WireError> {
    value
        .map(|v| {
            T::from_i32(v).ok_or(WireError::UnknownEnumValue {
                name: T::NAME,
                value: v,
            })
        })
        .transpose()
}

/// Numbers JSON cannot carry, recorded by path and replaced with `null`
type NonFinite = Vec<(String, f64)>;

fn value_to_json(value: prost_types::Value, path: &str, non_finite: &mut NonFinite) -> JsonValue {
    match value.kind {
        None | Some(Kind::NullValue(_)) => JsonValue::Null,
        Some(Kind::BoolValue(b)) => JsonValue::Bool(b),
        Some(Kind::NumberValue(n)) => match Number::from_f64(n) {
            Some(number) => JsonValue::Number(number),
            None => {
                non_finite.push((path.to_string(), n));
                JsonValue::Null
            }
        },
        Some(Kind::StringValue(s)) => JsonValue::String(s),
        Some(Kind::ListValue(list)) => JsonValue::Array(
            list.values
                .into_iter()
                .enumerate()
                .map(|(i, item)| value_to_json(item, &format!("{path}[{i}]"), non_finite))
                .collect(),
        ),
        Some(Kind::StructValue(st)) => JsonValue::Object(struct_to_json(st, path, non_finite)),
    }
}

fn struct_to_json(
    st: prost_types::Struct,
    path: &str,
    non_finite: &mut NonFinite,
) -> Map<String, JsonValue> {
    st.fields
        .into_iter()
        .map(|(key, item)| {
            let child = if path.is_empty() {
                key.clone()
            } else {
                format!("{path}.{key}")
            };
            let json = value_to_json(item, &child, non_finite);
            (key, json)
        })
        .collect()
}

/// Attribute maps keep going when a number is not finite; span validation
/// turns the recorded paths into attribute violations
fn attributes_to_json(
    attributes: BTreeMap<String, prost_types::Value>,
    prefix: &str,
    non_finite: &mut NonFinite,
) -> BTreeMap<String, JsonValue> {
    attributes
        .into_iter()
        .map(|(key, value)| {
            let json = value_to_json(value, &format!("{prefix}attributes.{key}"), non_finite);
            (key, json)
        })
        .collect()
}

fn timestamp_to_chrono(ts: prost_types::Timestamp) -> Result<DateTime<Utc>, WireError> {
    u32::try_from(ts.nanos)
        .ok()
        .filter(|nanos| *nanos < 1_000_000_000)
        .and_then(|nanos| DateTime::from_timestamp(ts.seconds, nanos))
        .ok_or(WireError::InvalidTimestamp {
            field: "request_time",
        })
}

fn duration_to_std(d: prost_types::Duration) -> Result<Duration, WireError> {
    let secs = u64::try_from(d.seconds).ok();
    let nanos = u32::try_from(d.nanos).ok().filter(|n| *n < 1_000_000_000);
    match (secs, nanos) {
        (Some(secs), Some(nanos)) => Ok(Duration::new(secs, nanos)),
        _ => Err(WireError::InvalidDuration {
            field: "execution_duration",
        }),
    }
}

impl TryFrom<Trace> for model::Trace {
    type Error = WireError;

    fn try_from(trace: Trace) -> Result<Self, Self::Error> {
        Ok(Self {
            info: trace.info.map(model::TraceInfo::try_from).transpose()?,
            data: trace.data.map(model::TraceData::try_from).transpose()?,
        })
    }
}

impl TryFrom<TraceData> for model::TraceData {
    type Error = WireError;

    fn try_from(data: TraceData) -> Result<Self, Self::Error> {
        Ok(Self {
            spans: data
                .spans
                .into_iter()
                .map(model::Span::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}

impl TryFrom<Span> for model::Span {
    type Error = WireError;

    fn try_from(span: Span) -> Result<Self, Self::Error> {
        let mut non_finite = NonFinite::new();
        let attributes = attributes_to_json(span.attributes, "", &mut non_finite);
        let events = span
            .events
            .into_iter()
            .enumerate()
            .map(|(i, event)| model::Event {
                time_unix_nano: event.time_unix_nano,
                name: event.name,
                attributes: attributes_to_json(
                    event.attributes,
                    &format!("events[{i}]."),
                    &mut non_finite,
                ),
                dropped_attributes_count: event.dropped_attributes_count,
            })
            .collect();
        let links = span
            .links
            .into_iter()
            .enumerate()
            .map(|(i, link)| model::Link {
                trace_id: link.trace_id.map(HexId::from),
                span_id: link.span_id.map(HexId::from),
                trace_state: link.trace_state,
                attributes: attributes_to_json(
                    link.attributes,
                    &format!("links[{i}]."),
                    &mut non_finite,
                ),
                dropped_attributes_count: link.dropped_attributes_count,
                flags: link.flags,
            })
            .collect();

        Ok(Self {
            trace_id: span.trace_id.map(HexId::from),
            span_id: span.span_id.map(HexId::from),
            trace_state: span.trace_state,
            parent_span_id: span.parent_span_id.map(HexId::from),
            flags: span.flags,
            name: span.name,
            kind: enum_value::<SpanKind>(span.kind)?,
            start_time_unix_nano: span.start_time_unix_nano,
            end_time_unix_nano: span.end_time_unix_nano,
            attributes,
            dropped_attributes_count: span.dropped_attributes_count,
            events,
            dropped_events_count: span.dropped_events_count,
            links,
            dropped_links_count: span.dropped_links_count,
            status: span
                .status
                .map(|status| {
                    Ok::<_, WireError>(model::Status {
                        message: status.message,
                        code: enum_value::<StatusCode>(status.code)?,
                    })
                })
                .transpose()?,
            non_finite_attributes: non_finite,
        })
    }
}

impl TryFrom<TraceLocation> for model::TraceLocation {
    type Error = WireError;

    fn try_from(location: TraceLocation) -> Result<Self, Self::Error> {
        Ok(Self {
            location_type: enum_value::<TraceLocationType>(location.r#type)?,
            mlflow_experiment: location
                .mlflow_experiment
                .map(|loc| model::MlflowExperimentLocation {
                    experiment_id: loc.experiment_id,
                }),
            inference_table: location
                .inference_table
                .map(|loc| model::InferenceTableLocation {
                    full_table_name: loc.full_table_name,
                }),
        })
    }
}

impl TryFrom<TraceInfo> for model::TraceInfo {
    type Error = WireError;

    fn try_from(info: TraceInfo) -> Result<Self, Self::Error> {
        Ok(Self {
            trace_id: info.trace_id,
            client_request_id: info.client_request_id,
            trace_location: info
                .trace_location
                .map(model::TraceLocation::try_from)
                .transpose()?,
            request: info.request,
            response: info.response,
            request_time: info.request_time.map(timestamp_to_chrono).transpose()?,
            execution_duration: info.execution_duration.map(duration_to_std).transpose()?,
            state: enum_value::<TraceState>(info.state)?,
            trace_metadata: info
                .trace_metadata
                .into_iter()
                .map(|(k, v)| (k, JsonValue::String(v)))
                .collect(),
            assessments: info
                .assessments
                .into_iter()
                .enumerate()
                .map(|(i, st)| {
                    let mut non_finite = NonFinite::new();
                    let json = struct_to_json(st, &format!("assessments[{i}]"), &mut non_finite);
                    match non_finite.into_iter().next() {
                        Some((path, _)) => Err(WireError::NonFiniteNumber { path }),
                        None => Ok(JsonValue::Object(json)),
                    }
                })
                .collect::<Result<_, _>>()?,
            tags: info
                .tags
                .into_iter()
                .map(|(k, v)| (k, JsonValue::String(v)))
                .collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// wire model -> protobuf
// ---------------------------------------------------------------------------

fn json_to_value(json: &JsonValue) -> prost_types::Value {
    let kind = match json {
        JsonValue::Null => Kind::NullValue(0),
        JsonValue::Bool(b) => Kind::BoolValue(*b),
        JsonValue::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or_default()),
        JsonValue::String(s) => Kind::StringValue(s.clone()),
        JsonValue::Array(items) => Kind::ListValue(prost_types::ListValue {
            values: items.iter().map(json_to_value).collect(),
        }),
        JsonValue::Object(entries) => Kind::StructValue(json_to_struct(entries)),
    };
    prost_types::Value { kind: Some(kind) }
}

fn json_to_struct(entries: &Map<String, JsonValue>) -> prost_types::Struct {
    prost_types::Struct {
        fields: entries
            .iter()
            .map(|(k, v)| (k.clone(), json_to_value(v)))
            .collect(),
    }
}

fn attributes_to_proto(
    attributes: &BTreeMap<String, JsonValue>,
) -> BTreeMap<String, prost_types::Value> {
    attributes
        .iter()
        .map(|(k, v)| (k.clone(), json_to_value(v)))
        .collect()
}

/// Metadata and tag values are strings once validated; anything else is
/// carried as its JSON text
fn string_map(map: &BTreeMap<String, JsonValue>) -> BTreeMap<String, String> {
    map.iter()
        .map(|(k, v)| {
            let value = match v {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

fn ids(id: &Option<HexId>) -> Option<Vec<u8>> {
    id.as_ref().map(|id| id.as_bytes().to_vec())
}

impl From<&model::Trace> for Trace {
    fn from(trace: &model::Trace) -> Self {
        Self {
            info: trace.info.as_ref().map(TraceInfo::from),
            data: trace.data.as_ref().map(|data| TraceData {
                spans: data.spans.iter().map(Span::from).collect(),
            }),
        }
    }
}

impl From<&model::Span> for Span {
    fn from(span: &model::Span) -> Self {
        Self {
            trace_id: ids(&span.trace_id),
            span_id: ids(&span.span_id),
            trace_state: span.trace_state.clone(),
            parent_span_id: ids(&span.parent_span_id),
            name: span.name.clone(),
            kind: span.kind.map(|k| k.as_i32()),
            start_time_unix_nano: span.start_time_unix_nano,
            end_time_unix_nano: span.end_time_unix_nano,
            attributes: attributes_to_proto(&span.attributes),
            dropped_attributes_count: span.dropped_attributes_count,
            events: span
                .events
                .iter()
                .map(|event| Event {
                    time_unix_nano: event.time_unix_nano,
                    name: event.name.clone(),
                    attributes: attributes_to_proto(&event.attributes),
                    dropped_attributes_count: event.dropped_attributes_count,
                })
                .collect(),
            dropped_events_count: span.dropped_events_count,
            links: span
                .links
                .iter()
                .map(|link| Link {
                    trace_id: ids(&link.trace_id),
                    span_id: ids(&link.span_id),
                    trace_state: link.trace_state.clone(),
                    attributes: attributes_to_proto(&link.attributes),
                    dropped_attributes_count: link.dropped_attributes_count,
                    flags: link.flags,
                })
                .collect(),
            dropped_links_count: span.dropped_links_count,
            status: span.status.as_ref().map(|status| Status {
                message: status.message.clone(),
                code: status.code.map(|c| c.as_i32()),
            }),
            flags: span.flags,
        }
    }
}

impl From<&model::TraceInfo> for TraceInfo {
    fn from(info: &model::TraceInfo) -> Self {
        Self {
            trace_id: info.trace_id.clone(),
            client_request_id: info.client_request_id.clone(),
            trace_location: info.trace_location.as_ref().map(|loc| TraceLocation {
                r#type: loc.location_type.map(|t| t.as_i32()),
                mlflow_experiment: loc.mlflow_experiment.as_ref().map(|m| {
                    MlflowExperimentLocation {
                        experiment_id: m.experiment_id.clone(),
                    }
                }),
                inference_table: loc.inference_table.as_ref().map(|t| InferenceTableLocation {
                    full_table_name: t.full_table_name.clone(),
                }),
            }),
            request: info.request.clone(),
            response: info.response.clone(),
            request_time: info.request_time.map(|t| prost_types::Timestamp {
                seconds: t.timestamp(),
                nanos: t.timestamp_subsec_nanos() as i32,
            }),
            execution_duration: info.execution_duration.map(|d| prost_types::Duration {
                seconds: d.as_secs() as i64,
                nanos: d.subsec_nanos() as i32,
            }),
            state: info.state.map(|s| s.as_i32()),
            trace_metadata: string_map(&info.trace_metadata),
            // Assessments are objects once validated
            assessments: info
                .assessments
                .iter()
                .filter_map(|a| a.as_object().map(json_to_struct))
                .collect(),
            tags: string_map(&info.tags),
        }
    }
}
