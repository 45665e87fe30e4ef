//! Per-span field checks
//!
//! Parent references are not looked at here; they need the whole trace and
//! are checked by [`super::trace_data`].

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use super::{Violation, Violations};
use crate::data::value::{decode_attributes, AttributeErrorReason};
use crate::data::{Attributes, HexId, Span, SpanEvent, SpanLink, SpanStatus};
use crate::otel::model;

fn non_empty_id(id: Option<HexId>) -> Option<HexId> {
    id.filter(|id| !id.is_empty())
}

fn non_empty_str(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

fn attributes(
    raw: &BTreeMap<String, JsonValue>,
    path: &str,
    violations: &mut Violations,
) -> Attributes {
    match decode_attributes(raw) {
        Ok(attrs) => attrs,
        Err(errors) => {
            violations.extend(errors.into_iter().map(|e| {
                Violation::invalid_attribute(format!("{path}.attributes.{}", e.path), e.reason)
            }));
            Attributes::new()
        }
    }
}

/// Validate one wire span found at `path` (e.g. `data.spans[3]`)
///
/// Every problem with the span is reported, not just the first.
pub fn validate_span(raw: model::Span, path: &str) -> Result<Span, Vec<Violation>> {
    let mut violations = Violations::default();

    let trace_id = violations.require(non_empty_id(raw.trace_id), || format!("{path}.trace_id"));
    let span_id = violations.require(non_empty_id(raw.span_id), || format!("{path}.span_id"));
    let name = violations.require(non_empty_str(raw.name), || format!("{path}.name"));
    let start = violations.require(raw.start_time_unix_nano, || {
        format!("{path}.start_time_unix_nano")
    });
    let end = violations.require(raw.end_time_unix_nano, || format!("{path}.end_time_unix_nano"));

    let span_attributes = attributes(&raw.attributes, path, &mut violations);
    violations.extend(raw.non_finite_attributes.iter().map(|(attr_path, n)| {
        Violation::invalid_attribute(
            format!("{path}.{attr_path}"),
            AttributeErrorReason::NonFinite(*n),
        )
    }));

    let mut events = Vec::with_capacity(raw.events.len());
    for (i, event) in raw.events.into_iter().enumerate() {
        let event_path = format!("{path}.events[{i}]");
        let event_name =
            violations.require(non_empty_str(event.name), || format!("{event_path}.name"));
        let event_attributes = attributes(&event.attributes, &event_path, &mut violations);
        if let Some(event_name) = event_name {
            events.push(SpanEvent {
                time_unix_nano: event.time_unix_nano.unwrap_or_default(),
                name: event_name,
                attributes: event_attributes,
                dropped_attributes_count: event.dropped_attributes_count.unwrap_or_default(),
            });
        }
    }

    let mut links = Vec::with_capacity(raw.links.len());
    for (i, link) in raw.links.into_iter().enumerate() {
        let link_path = format!("{path}.links[{i}]");
        let link_trace_id =
            violations.require(non_empty_id(link.trace_id), || format!("{link_path}.trace_id"));
        let link_span_id =
            violations.require(non_empty_id(link.span_id), || format!("{link_path}.span_id"));
        let link_attributes = attributes(&link.attributes, &link_path, &mut violations);
        if let (Some(trace_id), Some(span_id)) = (link_trace_id, link_span_id) {
            links.push(SpanLink {
                trace_id,
                span_id,
                trace_state: link.trace_state,
                attributes: link_attributes,
                dropped_attributes_count: link.dropped_attributes_count.unwrap_or_default(),
                flags: link.flags.unwrap_or_default(),
            });
        }
    }

    let (Some(trace_id), Some(span_id), Some(name), Some(start), Some(end)) =
        (trace_id, span_id, name, start, end)
    else {
        return Err(violations.into_vec());
    };

    let span = Span {
        trace_id,
        span_id,
        trace_state: raw.trace_state,
        parent_span_id: non_empty_id(raw.parent_span_id),
        name,
        kind: raw.kind.unwrap_or_default(),
        start_time_unix_nano: start,
        end_time_unix_nano: end,
        attributes: span_attributes,
        dropped_attributes_count: raw.dropped_attributes_count.unwrap_or_default(),
        events,
        dropped_events_count: raw.dropped_events_count.unwrap_or_default(),
        links,
        dropped_links_count: raw.dropped_links_count.unwrap_or_default(),
        status: raw.status.map(|status| SpanStatus {
            code: status.code.unwrap_or_default(),
            message: status.message.unwrap_or_default(),
        }),
        flags: raw.flags.unwrap_or_default(),
    };

    violations.extend(check_span(&span));
    violations.into_result(|| Some(span))
}

/// Invariants of an already typed span
pub fn check_span(span: &Span) -> Vec<Violation> {
    let mut violations = Vec::new();
    if span.trace_id.is_empty() {
        violations.push(Violation::missing(format!("{}.trace_id", span.label())));
    }
    if span.span_id.is_empty() {
        violations.push(Violation::missing(format!("{}.span_id", span.label())));
    }
    if span.name.is_empty() {
        violations.push(Violation::missing(format!("span ({}).name", span.span_id)));
    }
    if span.end_time_unix_nano < span.start_time_unix_nano {
        violations.push(Violation::InvalidTiming {
            span: span.label(),
            start: span.start_time_unix_nano,
            end: span.end_time_unix_nano,
        });
    }
    violations
}
