//! Trace-level checks: required info fields, location syntax, duration drift

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use super::{Violation, Violations};
use crate::data::{
    canonical_trace_id, Assessment, InferenceTableLocation, MlflowExperimentLocation, Span,
    TraceInfo, TraceLocation, TraceLocationType, TraceState, WireEnum,
};
use crate::otel::model;

/// Allowed gap between `request_time + execution_duration` and the root span end
pub const DURATION_TOLERANCE: Duration = Duration::from_millis(1);

const LOCATION_FIELD: &str = "info.trace_location";

/// Validated trace info whose identity may still have to be assigned
#[derive(Debug, Clone, PartialEq)]
pub struct TraceInfoDraft {
    pub trace_id: Option<String>,
    pub client_request_id: Option<String>,
    pub trace_location: TraceLocation,
    pub request: Option<String>,
    pub response: Option<String>,
    pub request_time: DateTime<Utc>,
    pub execution_duration: Option<Duration>,
    pub state: TraceState,
    pub trace_metadata: BTreeMap<String, String>,
    pub assessments: Vec<Assessment>,
    pub tags: BTreeMap<String, String>,
}

impl TraceInfoDraft {
    pub fn into_info(self, trace_id: String) -> TraceInfo {
        TraceInfo {
            trace_id,
            client_request_id: self.client_request_id,
            trace_location: self.trace_location,
            request: self.request,
            response: self.response,
            request_time: self.request_time,
            execution_duration: self.execution_duration,
            state: self.state,
            trace_metadata: self.trace_metadata,
            assessments: self.assessments,
            tags: self.tags,
        }
    }
}

fn string_map(
    raw: BTreeMap<String, JsonValue>,
    field: &str,
    violations: &mut Violations,
) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (key, value) in raw {
        match value {
            JsonValue::String(s) => {
                map.insert(key, s);
            }
            other => violations.push(Violation::invalid_attribute(
                format!("info.{field}.{key}"),
                format!("value must be a string, got {}", json_type(&other)),
            )),
        }
    }
    map
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "list",
        JsonValue::Object(_) => "map",
    }
}

/// Validate the info half of a `CreateTrace`
pub fn validate_info(raw: model::TraceInfo) -> Result<TraceInfoDraft, Vec<Violation>> {
    let mut violations = Violations::default();

    let trace_location = match validate_location(raw.trace_location) {
        Ok(location) => Some(location),
        Err(violation) => {
            violations.push(violation);
            None
        }
    };
    let request_time = violations.require(raw.request_time, || "info.request_time".to_string());

    // Spans carry the id as bytes, so the string form is fixed to lowercase hex
    let trace_id = match raw.trace_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(given) => {
            let canonical = canonical_trace_id(given);
            if canonical.is_none() {
                violations.push(Violation::malformed(format!(
                    "info.trace_id '{given}' is not a hex trace id"
                )));
            }
            canonical
        }
    };

    let trace_metadata = string_map(raw.trace_metadata, "trace_metadata", &mut violations);
    let tags = string_map(raw.tags, "tags", &mut violations);

    let mut assessments = Vec::with_capacity(raw.assessments.len());
    for (i, assessment) in raw.assessments.into_iter().enumerate() {
        match assessment {
            JsonValue::Object(record) => assessments.push(Assessment(record)),
            other => violations.push(Violation::invalid_attribute(
                format!("info.assessments[{i}]"),
                format!("assessment must be an object, got {}", json_type(&other)),
            )),
        }
    }

    violations.into_result(|| {
        Some(TraceInfoDraft {
            trace_id,
            client_request_id: raw.client_request_id,
            trace_location: trace_location?,
            request: raw.request,
            response: raw.response,
            request_time: request_time?,
            execution_duration: raw.execution_duration,
            state: raw.state.unwrap_or_default(),
            trace_metadata,
            assessments,
            tags,
        })
    })
}

/// Syntactic check and canonicalization of a wire location
///
/// Existence and writability are looked up later, against the experiment
/// catalog and the authorizer.
pub fn validate_location(raw: Option<model::TraceLocation>) -> Result<TraceLocation, Violation> {
    let raw = raw.ok_or_else(|| Violation::missing(LOCATION_FIELD))?;

    let location = match (raw.mlflow_experiment, raw.inference_table) {
        (Some(_), Some(_)) => {
            return Err(Violation::invalid_location(
                "both mlflow_experiment and inference_table are set",
            ))
        }
        (None, None) => return Err(Violation::missing(LOCATION_FIELD)),
        (Some(experiment), None) => {
            let experiment_id = experiment
                .experiment_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .ok_or_else(|| {
                    Violation::missing(format!("{LOCATION_FIELD}.mlflow_experiment.experiment_id"))
                })?;
            TraceLocation::MlflowExperiment(MlflowExperimentLocation { experiment_id })
        }
        (None, Some(table)) => {
            let raw_name = table
                .full_table_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .ok_or_else(|| {
                    Violation::missing(format!("{LOCATION_FIELD}.inference_table.full_table_name"))
                })?;
            TraceLocation::InferenceTable(InferenceTableLocation {
                full_table_name: canonical_table_name(&raw_name)?,
            })
        }
    };

    match raw.location_type {
        Some(declared)
            if declared != TraceLocationType::Unspecified
                && declared != location.location_type() =>
        {
            Err(Violation::invalid_location(format!(
                "type {} does not match the populated {} location",
                declared.as_str(),
                location.location_type().as_str()
            )))
        }
        _ => Ok(location),
    }
}

fn table_part_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").ok())
        .as_ref()
}

/// `catalog.schema.table`, each part trimmed and stripped of backticks
fn canonical_table_name(raw: &str) -> Result<String, Violation> {
    let invalid = || {
        Violation::invalid_location(format!(
            "full_table_name '{raw}' must be catalog.schema.table"
        ))
    };

    let parts: Vec<&str> = raw
        .split('.')
        .map(|part| {
            let part = part.trim();
            part.strip_prefix('`')
                .and_then(|p| p.strip_suffix('`'))
                .unwrap_or(part)
        })
        .collect();

    let valid_part = |part: &&str| {
        table_part_pattern()
            .map(|re| re.is_match(part))
            .unwrap_or(false)
    };
    if parts.len() != 3 || !parts.iter().all(valid_part) {
        return Err(invalid());
    }
    Ok(parts.join("."))
}

/// `request_time + execution_duration` against the root span's end time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationMismatch {
    pub expected_end_unix_nano: u64,
    pub root_end_unix_nano: u64,
    pub drift: Duration,
}

/// Returns the mismatch when the two disagree by more than [`DURATION_TOLERANCE`].
/// This is reported, never rejected.
pub fn check_duration_consistency(info: &TraceInfo, spans: &[Span]) -> Option<DurationMismatch> {
    let duration = info.execution_duration?;
    let root = spans.iter().find(|s| s.is_root())?;

    let start = u64::try_from(info.request_time.timestamp_nanos_opt()?).ok()?;
    let expected_end = start.checked_add(u64::try_from(duration.as_nanos()).ok()?)?;
    let drift = Duration::from_nanos(expected_end.abs_diff(root.end_time_unix_nano));

    (drift > DURATION_TOLERANCE).then_some(DurationMismatch {
        expected_end_unix_nano: expected_end,
        root_end_unix_nano: root.end_time_unix_nano,
        drift,
    })
}
