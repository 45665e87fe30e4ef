//! Checks that turn wire messages into the typed trace model
//!
//! Validation never stops at the first problem: every violation found in a
//! request is collected and reported together, and nothing is persisted
//! unless the list is empty.

pub mod info;
pub mod span;
pub mod trace_data;

pub use info::{check_duration_consistency, validate_info, validate_location, DurationMismatch, TraceInfoDraft};
pub use span::{check_span, validate_span};
pub use trace_data::{validate_structure, ValidationMode, ValidationPolicy};

use crate::data::TraceState;

/// One validation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("{field} is required")]
    MissingField { field: String },

    #[error("span {span}: end time {end} is before start time {start}")]
    InvalidTiming { span: String, start: u64, end: u64 },

    #[error("malformed trace: {reason}")]
    MalformedTraceStructure { reason: String },

    #[error("span {span}: parent {parent} is not part of the trace")]
    OrphanSpan { span: String, parent: String },

    #[error("span id {span} appears more than once")]
    DuplicateSpan { span: String },

    #[error("invalid trace location: {reason}")]
    InvalidLocation { reason: String },

    #[error("{path}: {reason}")]
    InvalidAttribute { path: String, reason: String },

    #[error("cannot move trace from {from} to {to}")]
    InvalidStateTransition { from: TraceState, to: TraceState },
}

impl Violation {
    pub fn missing(field: impl Into<String>) -> Self {
        Violation::MissingField {
            field: field.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Violation::MalformedTraceStructure {
            reason: reason.into(),
        }
    }

    pub fn invalid_location(reason: impl Into<String>) -> Self {
        Violation::InvalidLocation {
            reason: reason.into(),
        }
    }

    pub fn invalid_attribute(path: impl Into<String>, reason: impl ToString) -> Self {
        Violation::InvalidAttribute {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Machine-readable kind, as reported to clients
    pub fn kind(&self) -> &'static str {
        match self {
            Violation::MissingField { .. } => "MISSING_FIELD",
            Violation::InvalidTiming { .. } => "INVALID_TIMING",
            Violation::MalformedTraceStructure { .. } => "MALFORMED_TRACE_STRUCTURE",
            Violation::OrphanSpan { .. } => "ORPHAN_SPAN",
            Violation::DuplicateSpan { .. } => "DUPLICATE_SPAN",
            Violation::InvalidLocation { .. } => "INVALID_LOCATION",
            Violation::InvalidAttribute { .. } => "INVALID_ATTRIBUTE",
            Violation::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
        }
    }

    /// The field, span or attribute path the violation is about
    pub fn subject(&self) -> Option<&str> {
        match self {
            Violation::MissingField { field } => Some(field),
            Violation::InvalidTiming { span, .. }
            | Violation::OrphanSpan { span, .. }
            | Violation::DuplicateSpan { span } => Some(span),
            Violation::InvalidAttribute { path, .. } => Some(path),
            Violation::MalformedTraceStructure { .. } => None,
            Violation::InvalidLocation { .. } => Some("trace_location"),
            Violation::InvalidStateTransition { .. } => Some("state"),
        }
    }
}

/// Collects violations while a message is walked
#[derive(Debug, Default)]
pub(crate) struct Violations(Vec<Violation>);

impl Violations {
    pub fn push(&mut self, violation: Violation) {
        self.0.push(violation);
    }

    pub fn extend(&mut self, violations: impl IntoIterator<Item = Violation>) {
        self.0.extend(violations);
    }

    /// Record a missing field and hand back `None`
    pub fn require<T>(&mut self, value: Option<T>, field: impl FnOnce() -> String) -> Option<T> {
        if value.is_none() {
            self.0.push(Violation::missing(field()));
        }
        value
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_result<T>(self, value: impl FnOnce() -> Option<T>) -> Result<T, Vec<Violation>> {
        if !self.0.is_empty() {
            return Err(self.0);
        }
        match value() {
            Some(v) => Ok(v),
            None => Err(vec![Violation::malformed("incomplete message")]),
        }
    }

    pub fn into_vec(self) -> Vec<Violation> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_and_subjects() {
        let v = Violation::missing("data.spans[0].name");
        assert_eq!(v.kind(), "MISSING_FIELD");
        assert_eq!(v.subject(), Some("data.spans[0].name"));

        let v = Violation::InvalidTiming {
            span: "llm (0102)".to_string(),
            start: 10,
            end: 5,
        };
        assert_eq!(v.kind(), "INVALID_TIMING");
        assert_eq!(v.to_string(), "span llm (0102): end time 5 is before start time 10");

        let v = Violation::InvalidStateTransition {
            from: TraceState::InProgress,
            to: TraceState::Unspecified,
        };
        assert_eq!(v.kind(), "INVALID_STATE_TRANSITION");
        assert_eq!(v.subject(), Some("state"));
    }

    #[test]
    fn test_require_records_missing_fields() {
        let mut violations = Violations::default();
        assert_eq!(violations.require(Some(1), || "a".to_string()), Some(1));
        assert_eq!(violations.require::<u8>(None, || "b".to_string()), None);

        let err = violations.into_result(|| Some(())).unwrap_err();
        assert_eq!(err, vec![Violation::missing("b")]);
    }
}
