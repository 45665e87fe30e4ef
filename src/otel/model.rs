//! Wire messages for the trace ingestion API
//!
//! These mirror the protobuf messages field for field: every field is
//! optional, nothing is validated here. `crate::validate` turns them into the
//! strongly typed [`crate::data`] model. JSON conventions:
//!
//! - proto field names in snake_case;
//! - span, trace and link identifiers as lowercase hex strings;
//! - `*_unix_nano` timestamps written as decimal strings, read from strings or numbers;
//! - `request_time` as RFC 3339, `execution_duration` as `"<seconds>s"`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::data::value::{encode_attributes, AttributeError, Attributes};
use crate::data::{self, HexId, SpanKind, StatusCode, TraceLocationType, TraceState};

/// Body of `POST /tracing/traces`: the trace itself, with no envelope
pub type CreateTrace = Trace;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    #[serde(default, alias = "trace_info", skip_serializing_if = "Option::is_none")]
    pub info: Option<TraceInfo>,
    #[serde(default, alias = "trace_data", skip_serializing_if = "Option::is_none")]
    pub data: Option<TraceData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceData {
    #[serde(default)]
    pub spans: Vec<Span>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Span {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<HexId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<HexId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<HexId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SpanKind>,
    #[serde(default, with = "nanos", skip_serializing_if = "Option::is_none")]
    pub start_time_unix_nano: Option<u64>,
    #[serde(default, with = "nanos", skip_serializing_if = "Option::is_none")]
    pub end_time_unix_nano: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropped_attributes_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Event>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropped_events_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropped_links_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Attribute numbers the body carried that JSON cannot represent, by path
    /// relative to the span (`attributes.score`, `events[0].attributes.x`).
    /// Only the protobuf wire can produce them.
    #[serde(skip)]
    pub non_finite_attributes: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, with = "nanos", skip_serializing_if = "Option::is_none")]
    pub time_unix_nano: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropped_attributes_count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<HexId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<HexId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_state: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropped_attributes_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<StatusCode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceLocation {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub location_type: Option<TraceLocationType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mlflow_experiment: Option<MlflowExperimentLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_table: Option<InferenceTableLocation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MlflowExperimentLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceTableLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_table_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_location: Option<TraceLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_time: Option<DateTime<Utc>>,
    #[serde(default, with = "duration", skip_serializing_if = "Option::is_none")]
    pub execution_duration: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<TraceState>,
    /// Values must be strings; kept loose so validation can name offenders
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub trace_metadata: BTreeMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assessments: Vec<JsonValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, JsonValue>,
}

fn non_zero(count: u32) -> Option<u32> {
    (count != 0).then_some(count)
}

fn string_map(map: &BTreeMap<String, String>) -> BTreeMap<String, JsonValue> {
    map.iter()
        .map(|(k, v)| (k.clone(), JsonValue::String(v.clone())))
        .collect()
}

fn attributes(attrs: &Attributes) -> Result<BTreeMap<String, JsonValue>, AttributeError> {
    encode_attributes(attrs)
}

impl TryFrom<&data::Trace> for Trace {
    type Error = AttributeError;

    fn try_from(trace: &data::Trace) -> Result<Self, Self::Error> {
        Ok(Self {
            info: Some(TraceInfo::from(&trace.info)),
            data: Some(TraceData::try_from(&trace.data)?),
        })
    }
}

impl TryFrom<&data::TraceData> for TraceData {
    type Error = AttributeError;

    fn try_from(data: &data::TraceData) -> Result<Self, Self::Error> {
        Ok(Self {
            spans: data
                .spans
                .iter()
                .map(Span::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}

impl TryFrom<&data::Span> for Span {
    type Error = AttributeError;

    fn try_from(span: &data::Span) -> Result<Self, Self::Error> {
        Ok(Self {
            trace_id: Some(span.trace_id.clone()),
            span_id: Some(span.span_id.clone()),
            trace_state: span.trace_state.clone(),
            parent_span_id: Some(span.parent_span_id.clone().unwrap_or_default()),
            flags: non_zero(span.flags),
            name: Some(span.name.clone()),
            kind: Some(span.kind),
            start_time_unix_nano: Some(span.start_time_unix_nano),
            end_time_unix_nano: Some(span.end_time_unix_nano),
            attributes: attributes(&span.attributes)?,
            dropped_attributes_count: non_zero(span.dropped_attributes_count),
            events: span
                .events
                .iter()
                .map(|event| {
                    Ok(Event {
                        time_unix_nano: Some(event.time_unix_nano),
                        name: Some(event.name.clone()),
                        attributes: attributes(&event.attributes)?,
                        dropped_attributes_count: non_zero(event.dropped_attributes_count),
                    })
                })
                .collect::<Result<_, AttributeError>>()?,
            dropped_events_count: non_zero(span.dropped_events_count),
            links: span
                .links
                .iter()
                .map(|link| {
                    Ok(Link {
                        trace_id: Some(link.trace_id.clone()),
                        span_id: Some(link.span_id.clone()),
                        trace_state: link.trace_state.clone(),
                        attributes: attributes(&link.attributes)?,
                        dropped_attributes_count: non_zero(link.dropped_attributes_count),
                        flags: non_zero(link.flags),
                    })
                })
                .collect::<Result<_, AttributeError>>()?,
            dropped_links_count: non_zero(span.dropped_links_count),
            status: span.status.as_ref().map(|status| Status {
                message: (!status.message.is_empty()).then(|| status.message.clone()),
                code: Some(status.code),
            }),
            non_finite_attributes: Vec::new(),
        })
    }
}

impl From<&data::TraceLocation> for TraceLocation {
    fn from(location: &data::TraceLocation) -> Self {
        let mut wire = TraceLocation {
            location_type: Some(location.location_type()),
            ..Default::default()
        };
        match location {
            data::TraceLocation::MlflowExperiment(loc) => {
                wire.mlflow_experiment = Some(MlflowExperimentLocation {
                    experiment_id: Some(loc.experiment_id.clone()),
                });
            }
            data::TraceLocation::InferenceTable(loc) => {
                wire.inference_table = Some(InferenceTableLocation {
                    full_table_name: Some(loc.full_table_name.clone()),
                });
            }
        }
        wire
    }
}

impl From<&data::TraceInfo> for TraceInfo {
    fn from(info: &data::TraceInfo) -> Self {
        Self {
            trace_id: Some(info.trace_id.clone()),
            client_request_id: info.client_request_id.clone(),
            trace_location: Some(TraceLocation::from(&info.trace_location)),
            request: info.request.clone(),
            response: info.response.clone(),
            request_time: Some(info.request_time),
            execution_duration: info.execution_duration,
            state: Some(info.state),
            trace_metadata: string_map(&info.trace_metadata),
            assessments: info
                .assessments
                .iter()
                .map(|a| JsonValue::Object(a.0.clone()))
                .collect(),
            tags: string_map(&info.tags),
        }
    }
}

/// `Option<u64>` nanosecond timestamps: proto3 JSON writes 64-bit integers as
/// strings, but plenty of clients send plain numbers
pub(crate) mod nanos {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        Number(u64),
        String(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<StringOrNumber>::deserialize(deserializer)? {
            None => Ok(None),
            Some(StringOrNumber::Number(v)) => Ok(Some(v)),
            Some(StringOrNumber::String(s)) => s
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|e| de::Error::custom(format!("invalid nanosecond timestamp '{s}': {e}"))),
        }
    }
}

/// `Option<Duration>` in protobuf JSON form: `"3s"`, `"1.5s"`, `"0.000250s"`
pub(crate) mod duration {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn format(duration: &Duration) -> String {
        let secs = duration.as_secs();
        let nanos = duration.subsec_nanos();
        if nanos == 0 {
            format!("{secs}s")
        } else if nanos % 1_000_000 == 0 {
            format!("{secs}.{:03}s", nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            format!("{secs}.{:06}s", nanos / 1_000)
        } else {
            format!("{secs}.{nanos:09}s")
        }
    }

    pub fn parse(input: &str) -> Option<Duration> {
        let body = input.trim().strip_suffix('s')?;
        let (secs, frac) = match body.split_once('.') {
            Some((secs, frac)) => (secs, frac),
            None => (body, ""),
        };
        if frac.len() > 9 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let secs: u64 = secs.parse().ok()?;
        let nanos: u32 = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<9}").parse().ok()?
        };
        Some(Duration::new(secs, nanos))
    }

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&format(d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(s) => parse(&s)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid duration '{s}'"))),
        }
    }
}
