//! Whole-trace structure checks: one root, known parents, unique ids

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use super::Violation;
use crate::data::{Span, SpanId, TraceState};

/// How parent references are checked for a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Every parent must be a span of the submitted trace
    Strict,
    /// Parents outside the submitted spans are accepted
    Lenient,
}

/// Configured policy the per-request [`ValidationMode`] is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationPolicy {
    Strict,
    Lenient,
    /// Lenient while the submitted trace is still `IN_PROGRESS`, strict otherwise
    #[default]
    LenientInProgress,
}

impl ValidationPolicy {
    pub fn mode_for(&self, state: TraceState) -> ValidationMode {
        match self {
            ValidationPolicy::Strict => ValidationMode::Strict,
            ValidationPolicy::Lenient => ValidationMode::Lenient,
            ValidationPolicy::LenientInProgress if state == TraceState::InProgress => {
                ValidationMode::Lenient
            }
            ValidationPolicy::LenientInProgress => ValidationMode::Strict,
        }
    }
}

impl FromStr for ValidationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "strict" => Ok(ValidationPolicy::Strict),
            "lenient" => Ok(ValidationPolicy::Lenient),
            "lenient-in-progress" => Ok(ValidationPolicy::LenientInProgress),
            other => Err(format!("unknown validation mode '{other}'")),
        }
    }
}

impl fmt::Display for ValidationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValidationPolicy::Strict => "strict",
            ValidationPolicy::Lenient => "lenient",
            ValidationPolicy::LenientInProgress => "lenient-in-progress",
        })
    }
}

/// Check the span tree of one trace
///
/// An empty span list has no structure and passes.
pub fn validate_structure(spans: &[Span], mode: ValidationMode) -> Result<(), Vec<Violation>> {
    let Some(first) = spans.first() else {
        return Ok(());
    };
    let mut violations = Vec::new();

    for span in spans.iter().filter(|s| s.trace_id != first.trace_id) {
        violations.push(Violation::malformed(format!(
            "span {} has trace id {}, expected {}",
            span.label(),
            span.trace_id,
            first.trace_id
        )));
    }

    let mut parents: HashMap<&SpanId, Option<&SpanId>> = HashMap::with_capacity(spans.len());
    let mut reported = HashSet::new();
    for span in spans {
        if parents.contains_key(&span.span_id) {
            if reported.insert(&span.span_id) {
                violations.push(Violation::DuplicateSpan {
                    span: span.span_id.to_hex(),
                });
            }
        } else {
            parents.insert(&span.span_id, span.parent_span_id.as_ref());
        }
    }

    let roots: Vec<&Span> = spans.iter().filter(|s| s.is_root()).collect();
    match roots.len() {
        1 => {}
        0 => violations.push(Violation::malformed("trace has no root span")),
        n => violations.push(Violation::malformed(format!(
            "trace has {n} root spans: {}",
            roots.iter().map(|s| s.label()).collect::<Vec<_>>().join(", ")
        ))),
    }

    if mode == ValidationMode::Strict {
        for span in spans {
            if let Some(parent) = &span.parent_span_id {
                if !parents.contains_key(parent) {
                    violations.push(Violation::OrphanSpan {
                        span: span.label(),
                        parent: parent.to_hex(),
                    });
                }
            }
        }
    }

    violations.extend(find_cycles(spans, &parents));

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

/// Parent chains that loop back on themselves, one violation per loop
fn find_cycles(spans: &[Span], parents: &HashMap<&SpanId, Option<&SpanId>>) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut done: HashSet<&SpanId> = HashSet::with_capacity(spans.len());

    for span in spans {
        let mut walk = HashSet::new();
        let mut current = Some(&span.span_id);
        while let Some(id) = current {
            if done.contains(id) {
                break;
            }
            if !walk.insert(id) {
                violations.push(Violation::malformed(format!(
                    "parent references form a cycle through span {id}"
                )));
                break;
            }
            current = parents.get(id).copied().flatten();
        }
        done.extend(walk);
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::HexId;
    use proptest::prelude::*;

    fn id(n: u8) -> SpanId {
        HexId::new([n; 8])
    }

    fn span(n: u8, parent: Option<u8>) -> Span {
        let span = Span::new(HexId::new([9; 16]), id(n), format!("s{n}"), 0, 10);
        match parent {
            Some(p) => span.with_parent(id(p)),
            None => span,
        }
    }

    fn kinds(result: Result<(), Vec<Violation>>) -> Vec<&'static str> {
        result.unwrap_err().iter().map(|v| v.kind()).collect()
    }

    #[test]
    fn test_single_root_tree_passes() {
        let spans = vec![span(1, None), span(2, Some(1)), span(3, Some(2)), span(4, Some(1))];
        assert!(validate_structure(&spans, ValidationMode::Strict).is_ok());
    }

    #[test]
    fn test_spans_may_arrive_in_any_order() {
        let spans = vec![span(3, Some(2)), span(2, Some(1)), span(1, None)];
        assert!(validate_structure(&spans, ValidationMode::Strict).is_ok());
    }

    #[test]
    fn test_empty_trace_passes() {
        assert!(validate_structure(&[], ValidationMode::Strict).is_ok());
    }

    #[test]
    fn test_root_count() {
        let no_root = vec![span(1, Some(2)), span(2, Some(1))];
        assert!(kinds(validate_structure(&no_root, ValidationMode::Lenient))
            .contains(&"MALFORMED_TRACE_STRUCTURE"));

        let two_roots = vec![span(1, None), span(2, None)];
        assert_eq!(
            kinds(validate_structure(&two_roots, ValidationMode::Strict)),
            vec!["MALFORMED_TRACE_STRUCTURE"]
        );
    }

    #[test]
    fn test_orphans_depend_on_mode() {
        let spans = vec![span(1, None), span(2, Some(7))];
        assert_eq!(
            kinds(validate_structure(&spans, ValidationMode::Strict)),
            vec!["ORPHAN_SPAN"]
        );
        assert!(validate_structure(&spans, ValidationMode::Lenient).is_ok());
    }

    #[test]
    fn test_duplicate_span_ids_reported_once() {
        let spans = vec![span(1, None), span(2, Some(1)), span(2, Some(1)), span(2, Some(1))];
        assert_eq!(
            kinds(validate_structure(&spans, ValidationMode::Strict)),
            vec!["DUPLICATE_SPAN"]
        );
    }

    #[test]
    fn test_mixed_trace_ids() {
        let mut stray = span(2, Some(1));
        stray.trace_id = HexId::new([8; 16]);
        let spans = vec![span(1, None), stray];
        assert_eq!(
            kinds(validate_structure(&spans, ValidationMode::Strict)),
            vec!["MALFORMED_TRACE_STRUCTURE"]
        );
    }

    #[test]
    fn test_cycles_detected_in_lenient_mode() {
        let spans = vec![span(1, None), span(2, Some(3)), span(3, Some(2))];
        let violations = validate_structure(&spans, ValidationMode::Lenient).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].to_string().contains("cycle"));

        let self_parent = vec![span(1, None), span(2, Some(2))];
        assert!(validate_structure(&self_parent, ValidationMode::Lenient).is_err());
    }

    /// One root plus up to 40 spans, each hanging off a span generated before it,
    /// delivered in random order
    fn span_tree() -> impl Strategy<Value = Vec<Span>> {
        prop::collection::vec(any::<prop::sample::Index>(), 0..40)
            .prop_map(|picks| {
                let mut spans = vec![span(1, None)];
                for (i, pick) in picks.iter().enumerate() {
                    let parent = pick.index(i + 1) as u8 + 1;
                    spans.push(span(i as u8 + 2, Some(parent)));
                }
                spans
            })
            .prop_shuffle()
    }

    proptest! {
        #[test]
        fn test_any_single_root_tree_passes(spans in span_tree()) {
            prop_assert!(validate_structure(&spans, ValidationMode::Strict).is_ok());
            prop_assert!(validate_structure(&spans, ValidationMode::Lenient).is_ok());
        }

        #[test]
        fn test_any_forest_is_malformed(spans in span_tree(), extra_roots in 1u8..5) {
            let mut forest = spans;
            forest.extend((0..extra_roots).map(|n| span(100 + n, None)));

            for mode in [ValidationMode::Strict, ValidationMode::Lenient] {
                let violations = validate_structure(&forest, mode).unwrap_err();
                prop_assert_eq!(violations.len(), 1);
                prop_assert_eq!(violations[0].kind(), "MALFORMED_TRACE_STRUCTURE");
                let expected = format!("{} root spans", extra_roots + 1);
                prop_assert!(violations[0].to_string().contains(&expected));
            }
        }

        #[test]
        fn test_any_rootless_sequence_is_malformed(
            spans in span_tree(),
            pick in any::<prop::sample::Index>(),
        ) {
            let mut spans = spans;
            let parent = spans[pick.index(spans.len())].span_id.clone();
            for span in spans.iter_mut().filter(|s| s.is_root()) {
                span.parent_span_id = Some(parent.clone());
            }

            for mode in [ValidationMode::Strict, ValidationMode::Lenient] {
                let violations = validate_structure(&spans, mode).unwrap_err();
                prop_assert!(violations
                    .iter()
                    .any(|v| v.to_string().contains("no root span")));
                prop_assert!(violations.iter().all(|v| v.kind() == "MALFORMED_TRACE_STRUCTURE"));
            }
        }

        #[test]
        fn test_any_unresolved_parent_is_an_orphan(
            spans in span_tree().prop_filter("needs a child span", |spans| spans.len() > 1),
            pick in any::<prop::sample::Index>(),
        ) {
            let mut spans = spans;
            let children: Vec<usize> = (0..spans.len()).filter(|&i| !spans[i].is_root()).collect();
            let orphan = children[pick.index(children.len())];
            spans[orphan].parent_span_id = Some(id(200));

            let violations = validate_structure(&spans, ValidationMode::Strict).unwrap_err();
            prop_assert_eq!(violations.len(), 1);
            prop_assert_eq!(violations[0].kind(), "ORPHAN_SPAN");
            prop_assert!(validate_structure(&spans, ValidationMode::Lenient).is_ok());
        }
    }

    #[test]
    fn test_policy_modes() {
        let policy = ValidationPolicy::default();
        assert_eq!(policy.mode_for(TraceState::InProgress), ValidationMode::Lenient);
        assert_eq!(policy.mode_for(TraceState::Ok), ValidationMode::Strict);
        assert_eq!(
            ValidationPolicy::Lenient.mode_for(TraceState::Ok),
            ValidationMode::Lenient
        );

        assert_eq!("STRICT".parse::<ValidationPolicy>(), Ok(ValidationPolicy::Strict));
        assert_eq!(
            "lenient_in_progress".parse::<ValidationPolicy>(),
            Ok(ValidationPolicy::LenientInProgress)
        );
        assert!("loose".parse::<ValidationPolicy>().is_err());
    }
}
