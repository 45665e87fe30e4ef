//! The trace ingestion service
//!
//! `create_trace` is the single write path for span data. A request is fully
//! validated before anything is written; identity is then settled, the
//! location resolved, and the record created or, for a stored `IN_PROGRESS`
//! trace, compare-and-swapped against the version that was read.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::config::{IngestConfig, UpdateMode};
use super::error::{bounded, IngestError};
use super::ids::IdGenerator;
use super::resolver::LocationResolver;
use crate::data::{canonical_trace_id, Span, Trace, TraceData, TraceState};
use crate::otel::model::CreateTrace;
use crate::storage::{StoredTrace, TraceStore};
use crate::validate::{
    check_duration_consistency, validate_info, validate_span, validate_structure, TraceInfoDraft,
    Violation,
};

/// Per-call settings supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Identity handed to the authorizer; `None` for anonymous callers
    pub principal: Option<String>,
    /// Budget for every external call made while serving the request
    pub timeout: Duration,
}

impl RequestContext {
    pub fn new(timeout: Duration) -> Self {
        Self {
            principal: None,
            timeout,
        }
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.timeout
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// A request that passed field and structure validation
struct ValidRequest {
    info: TraceInfoDraft,
    /// `None` when the request carried no `data` at all
    spans: Option<Vec<Span>>,
}

pub struct TraceService {
    store: Arc<dyn TraceStore>,
    ids: Arc<dyn IdGenerator>,
    resolver: LocationResolver,
    config: IngestConfig,
}

impl TraceService {
    pub fn new(
        store: Arc<dyn TraceStore>,
        ids: Arc<dyn IdGenerator>,
        resolver: LocationResolver,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            ids,
            resolver,
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Validate and store a trace, returning what was stored
    pub async fn create_trace(
        &self,
        request: CreateTrace,
        ctx: &RequestContext,
    ) -> Result<Trace, IngestError> {
        let deadline = ctx.deadline();
        let ValidRequest { info, spans } = self.validate_request(request)?;

        let trace_id = self.settle_trace_id(&info, spans.as_deref(), deadline).await?;

        let existing = bounded(deadline, "read trace", self.store.get_by_trace_id(&trace_id)).await?;
        if let Some(existing) = &existing {
            check_updatable(existing, &info)?;
        }

        let resolved = self
            .resolver
            .resolve(&info.trace_location, ctx.principal.as_deref(), deadline)
            .await?;
        tracing::debug!(trace_id = %trace_id, target = ?resolved.target, "Resolved trace location");

        let mut trace = match &existing {
            None => {
                let spans = spans.unwrap_or_default();
                if self.config.update_mode == UpdateMode::Append {
                    validate_structure(&spans, self.config.validation.mode_for(info.state))?;
                }
                Trace::new(info.into_info(trace_id.clone()), TraceData::new(spans))
            }
            Some(existing) => self.merge(existing, info, spans, trace_id.clone())?,
        };
        self.config.dropped_attributes.apply(&mut trace.data.spans);

        if let Some(mismatch) = check_duration_consistency(&trace.info, &trace.data.spans) {
            tracing::warn!(
                trace_id = %trace_id,
                expected_end_unix_nano = mismatch.expected_end_unix_nano,
                root_end_unix_nano = mismatch.root_end_unix_nano,
                drift_ms = mismatch.drift.as_secs_f64() * 1000.0,
                "execution_duration disagrees with the root span end time"
            );
        }

        let state = trace.info.state;
        let span_count = trace.data.len();
        let stored = match existing {
            None => bounded(deadline, "create trace", self.store.create_if_absent(trace)).await?,
            Some(existing) => {
                bounded(
                    deadline,
                    "update trace",
                    self.store.compare_and_swap(&trace_id, existing.version, trace),
                )
                .await?
            }
        };

        tracing::info!(
            trace_id = %trace_id,
            state = %state,
            spans = span_count,
            version = stored.version,
            "Stored trace"
        );
        Ok(stored.trace)
    }

    /// Read a stored trace
    pub async fn get_trace(&self, trace_id: &str, ctx: &RequestContext) -> Result<Trace, IngestError> {
        let deadline = ctx.deadline();
        Ok(self.load(&store_key(trace_id)?, deadline).await?.trace)
    }

    /// Set one tag; tags stay writable whatever the trace state
    pub async fn set_trace_tag(
        &self,
        trace_id: &str,
        key: &str,
        value: &str,
        ctx: &RequestContext,
    ) -> Result<Trace, IngestError> {
        let key = tag_key(key)?;
        let trace_id = store_key(trace_id)?;
        let deadline = ctx.deadline();
        let stored = self.load(&trace_id, deadline).await?;
        self.resolver
            .authorize(&stored.trace.info.trace_location, ctx.principal.as_deref(), deadline)
            .await?;

        let mut trace = stored.trace;
        trace.info.tags.insert(key.to_string(), value.to_string());
        let updated = bounded(
            deadline,
            "set trace tag",
            self.store.compare_and_swap(&trace_id, stored.version, trace),
        )
        .await?;

        tracing::debug!(trace_id = %trace_id, key = %key, "Set trace tag");
        Ok(updated.trace)
    }

    /// Remove one tag; removing a tag that is not there changes nothing
    pub async fn delete_trace_tag(
        &self,
        trace_id: &str,
        key: &str,
        ctx: &RequestContext,
    ) -> Result<Trace, IngestError> {
        let key = tag_key(key)?;
        let trace_id = store_key(trace_id)?;
        let deadline = ctx.deadline();
        let stored = self.load(&trace_id, deadline).await?;
        self.resolver
            .authorize(&stored.trace.info.trace_location, ctx.principal.as_deref(), deadline)
            .await?;

        if !stored.trace.info.tags.contains_key(key) {
            return Ok(stored.trace);
        }

        let mut trace = stored.trace;
        trace.info.tags.remove(key);
        let updated = bounded(
            deadline,
            "delete trace tag",
            self.store.compare_and_swap(&trace_id, stored.version, trace),
        )
        .await?;

        tracing::debug!(trace_id = %trace_id, key = %key, "Deleted trace tag");
        Ok(updated.trace)
    }

    async fn load(&self, trace_id: &str, deadline: Instant) -> Result<StoredTrace, IngestError> {
        bounded(deadline, "read trace", self.store.get_by_trace_id(trace_id))
            .await?
            .ok_or_else(|| IngestError::NotFound(trace_id.to_string()))
    }

    /// Every field and structure check, with all violations reported together
    fn validate_request(&self, request: CreateTrace) -> Result<ValidRequest, IngestError> {
        let mut violations = Vec::new();

        let submitted_state = request
            .info
            .as_ref()
            .and_then(|info| info.state)
            .unwrap_or_default();

        let info = match request.info {
            None => {
                violations.push(Violation::missing("info"));
                None
            }
            Some(raw) => match validate_info(raw) {
                Ok(draft) => Some(draft),
                Err(found) => {
                    violations.extend(found);
                    None
                }
            },
        };

        let spans = request.data.map(|data| {
            let mut spans = Vec::with_capacity(data.spans.len());
            for (i, raw) in data.spans.into_iter().enumerate() {
                match validate_span(raw, &format!("data.spans[{i}]")) {
                    Ok(span) => spans.push(span),
                    Err(found) => violations.extend(found),
                }
            }
            spans
        });

        // Structure is only meaningful once every span parsed. Appended
        // batches are checked together with the stored spans instead.
        if violations.is_empty() && self.config.update_mode == UpdateMode::Replace {
            if let Some(spans) = &spans {
                let mode = self.config.validation.mode_for(submitted_state);
                if let Err(found) = validate_structure(spans, mode) {
                    violations.extend(found);
                }
            }
        }

        match info {
            Some(info) if violations.is_empty() => Ok(ValidRequest { info, spans }),
            _ => {
                tracing::warn!(
                    violations = violations.len(),
                    first = %violations.first().map(|v| v.to_string()).unwrap_or_default(),
                    "Rejected trace"
                );
                Err(IngestError::Validation(violations))
            }
        }
    }

    /// `info.trace_id`, else the spans' trace id, else a fresh one. Spans must
    /// agree with whichever is chosen.
    async fn settle_trace_id(
        &self,
        info: &TraceInfoDraft,
        spans: Option<&[Span]>,
        deadline: Instant,
    ) -> Result<String, IngestError> {
        let spans = spans.unwrap_or_default();
        let trace_id = match (&info.trace_id, spans.first()) {
            (Some(trace_id), _) => trace_id.clone(),
            (None, Some(span)) => span.trace_id.to_hex(),
            (None, None) => bounded(deadline, "allocate trace id", self.ids.new_unique_id())
                .await?
                .to_hex(),
        };

        let violations: Vec<Violation> = spans
            .iter()
            .filter(|span| !span.trace_id.matches_trace_key(&trace_id))
            .map(|span| {
                Violation::malformed(format!(
                    "span {} has trace id {}, but info.trace_id is {}",
                    span.label(),
                    span.trace_id,
                    trace_id
                ))
            })
            .collect();
        if !violations.is_empty() {
            return Err(IngestError::Validation(violations));
        }
        Ok(trace_id)
    }

    /// Fold a request into the stored `IN_PROGRESS` trace
    fn merge(
        &self,
        existing: &StoredTrace,
        incoming: TraceInfoDraft,
        spans: Option<Vec<Span>>,
        trace_id: String,
    ) -> Result<Trace, IngestError> {
        let previous = &existing.trace.info;
        let mut info = incoming.into_info(trace_id);

        let mut metadata = previous.trace_metadata.clone();
        metadata.append(&mut info.trace_metadata);
        info.trace_metadata = metadata;

        let mut tags = previous.tags.clone();
        tags.append(&mut info.tags);
        info.tags = tags;

        if info.client_request_id.is_none() {
            info.client_request_id = previous.client_request_id.clone();
        }
        if info.request.is_none() {
            info.request = previous.request.clone();
        }
        if info.response.is_none() {
            info.response = previous.response.clone();
        }
        if info.execution_duration.is_none() {
            info.execution_duration = previous.execution_duration;
        }
        if info.assessments.is_empty() {
            info.assessments = previous.assessments.clone();
        }

        let spans = match (spans, self.config.update_mode) {
            (None, _) => existing.trace.data.spans.clone(),
            (Some(spans), UpdateMode::Replace) => spans,
            (Some(spans), UpdateMode::Append) => {
                let mut combined = existing.trace.data.spans.clone();
                combined.extend(spans);
                let mode = self.config.validation.mode_for(info.state);
                validate_structure(&combined, mode)?;
                combined
            }
        };

        Ok(Trace::new(info, TraceData::new(spans)))
    }
}

/// Trace ids in paths are matched in their canonical lowercase form
fn store_key(trace_id: &str) -> Result<String, IngestError> {
    canonical_trace_id(trace_id).ok_or_else(|| IngestError::NotFound(trace_id.to_string()))
}

fn tag_key(key: &str) -> Result<&str, IngestError> {
    match key.trim() {
        "" => Err(IngestError::violation(Violation::missing("key"))),
        key => Ok(key),
    }
}

/// Only `IN_PROGRESS` traces take updates, and an update may neither move
/// the trace nor send it back to `STATE_UNSPECIFIED`
fn check_updatable(existing: &StoredTrace, incoming: &TraceInfoDraft) -> Result<(), IngestError> {
    let stored = &existing.trace.info;
    if !stored.state.accepts_updates() {
        return Err(IngestError::ImmutableTrace {
            trace_id: stored.trace_id.clone(),
            state: stored.state,
        });
    }

    let mut violations = Vec::new();
    if incoming.trace_location != stored.trace_location {
        violations.push(Violation::invalid_location(format!(
            "trace location cannot change from {} to {}",
            stored.trace_location, incoming.trace_location
        )));
    }
    if incoming.state == TraceState::Unspecified {
        violations.push(Violation::InvalidStateTransition {
            from: stored.state,
            to: incoming.state,
        });
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(IngestError::Validation(violations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{AllowAll, AnyExperiment, DroppedAttributesPolicy, RandomIdGenerator};
    use crate::storage::{InMemoryTraceStore, StoreError};
    use crate::validate::ValidationPolicy;
    use async_trait::async_trait;
    use serde_json::{json, Value as JsonValue};
    use tokio::sync::Barrier;

    const TRACE_ID: &str = "0af7651916cd43dd8448eb211c80319c";
    const ROOT: &str = "b7ad6b7169203331";
    const CHILD: &str = "00f067aa0ba902b7";
    const GRANDCHILD: &str = "1111111111111111";

    fn service_with(store: Arc<dyn TraceStore>, config: IngestConfig) -> TraceService {
        let resolver = LocationResolver::new(
            Arc::new(AnyExperiment),
            Arc::new(AllowAll),
            Duration::from_secs(60),
        );
        TraceService::new(store, Arc::new(RandomIdGenerator::new()), resolver, config)
    }

    fn in_memory_service() -> (TraceService, Arc<InMemoryTraceStore>) {
        let store = Arc::new(InMemoryTraceStore::new());
        (service_with(store.clone(), IngestConfig::default()), store)
    }

    fn span(span_id: &str, parent: &str, name: &str, start: u64, end: u64) -> JsonValue {
        json!({
            "trace_id": TRACE_ID,
            "span_id": span_id,
            "parent_span_id": parent,
            "name": name,
            "start_time_unix_nano": start.to_string(),
            "end_time_unix_nano": end.to_string(),
        })
    }

    fn request(state: &str, spans: Vec<JsonValue>) -> CreateTrace {
        serde_json::from_value(json!({
            "info": {
                "trace_location": {"type": "MLFLOW_EXPERIMENT", "mlflow_experiment": {"experiment_id": "1"}},
                "request_time": "2024-05-01T12:00:00Z",
                "state": state,
            },
            "data": {"spans": spans}
        }))
        .unwrap()
    }

    fn ctx() -> RequestContext {
        RequestContext::default()
    }

    #[tokio::test]
    async fn test_create_derives_trace_id_from_spans() {
        let (service, store) = in_memory_service();
        let trace = service
            .create_trace(request("OK", vec![span(ROOT, "", "root", 0, 100)]), &ctx())
            .await
            .unwrap();

        assert_eq!(trace.trace_id(), TRACE_ID);
        assert_eq!(trace.data.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_create_without_spans_generates_trace_id() {
        let (service, _store) = in_memory_service();
        let mut req = request("IN_PROGRESS", vec![]);
        req.data = None;

        let trace = service.create_trace(req, &ctx()).await.unwrap();
        assert_eq!(trace.trace_id().len(), 32);
        assert!(trace.data.is_empty());
    }

    #[tokio::test]
    async fn test_trace_id_must_match_spans() {
        let (service, store) = in_memory_service();
        let mut req = request("OK", vec![span(ROOT, "", "root", 0, 100)]);
        req.info.as_mut().unwrap().trace_id = Some("ffffffffffffffffffffffffffffffff".to_string());

        let err = service.create_trace(req, &ctx()).await.unwrap_err();
        assert_eq!(err.kind(), "MALFORMED_TRACE_STRUCTURE");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_uppercase_trace_id_names_the_same_trace() {
        let (service, store) = in_memory_service();
        let upper = TRACE_ID.to_ascii_uppercase();
        let mut req = request("OK", vec![span(ROOT, "", "root", 0, 100)]);
        req.info.as_mut().unwrap().trace_id = Some(upper.clone());

        let trace = service.create_trace(req, &ctx()).await.unwrap();
        assert_eq!(trace.trace_id(), TRACE_ID);

        // Same trace again, id taken from the spans this time
        let err = service
            .create_trace(request("OK", vec![span(ROOT, "", "root", 0, 100)]), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "IMMUTABLE_TRACE");
        assert_eq!(store.len(), 1);

        let read = service.get_trace(&upper, &ctx()).await.unwrap();
        assert_eq!(read.trace_id(), TRACE_ID);
        let tagged = service.set_trace_tag(&upper, "k", "v", &ctx()).await.unwrap();
        assert_eq!(tagged.info.tags["k"], "v");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_violations_are_collected_across_info_and_spans() {
        let (service, store) = in_memory_service();
        let mut req = request("OK", vec![span(ROOT, "", "root", 100, 50)]);
        req.info.as_mut().unwrap().request_time = None;

        let err = service.create_trace(req, &ctx()).await.unwrap_err();
        let kinds: Vec<_> = err.violations().iter().map(|v| v.kind()).collect();
        assert_eq!(kinds, vec!["MISSING_FIELD", "INVALID_TIMING"]);
        assert_eq!(err.violations()[1].subject(), Some("root (b7ad6b7169203331)"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_info() {
        let (service, _store) = in_memory_service();
        let err = service
            .create_trace(CreateTrace::default(), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.violations(), &[Violation::missing("info")]);
    }

    #[tokio::test]
    async fn test_orphans_follow_validation_policy() {
        let spans = vec![span(ROOT, "", "root", 0, 100), span(CHILD, "2222222222222222", "child", 10, 20)];

        // Default policy: lenient while in progress, strict once finished
        let (service, _store) = in_memory_service();
        assert!(service
            .create_trace(request("IN_PROGRESS", spans.clone()), &ctx())
            .await
            .is_ok());

        let (service, _store) = in_memory_service();
        let err = service
            .create_trace(request("OK", spans.clone()), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ORPHAN_SPAN");

        let store = Arc::new(InMemoryTraceStore::new());
        let lenient = service_with(
            store,
            IngestConfig::default().with_validation(ValidationPolicy::Lenient),
        );
        assert!(lenient.create_trace(request("OK", spans), &ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_second_submission_of_finished_trace_is_rejected() {
        let (service, store) = in_memory_service();
        let mut req = request("OK", vec![span(ROOT, "", "root", 0, 100)]);
        req.info.as_mut().unwrap().trace_id = Some(TRACE_ID.to_string());

        let first = service.create_trace(req.clone(), &ctx()).await.unwrap();
        let err = service.create_trace(req, &ctx()).await.unwrap_err();

        assert!(matches!(
            err,
            IngestError::ImmutableTrace {
                state: TraceState::Ok,
                ..
            }
        ));
        let stored = store.get_by_trace_id(TRACE_ID).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.trace, first);
    }

    #[tokio::test]
    async fn test_in_progress_then_ok_replaces_data() {
        let (service, store) = in_memory_service();

        let mut started = request("IN_PROGRESS", vec![span(ROOT, "", "root", 0, 100)]);
        started.info.as_mut().unwrap().tags.insert("stage".into(), json!("running"));
        started
            .info
            .as_mut()
            .unwrap()
            .trace_metadata
            .insert("mlflow.user".into(), json!("ada"));
        service.create_trace(started, &ctx()).await.unwrap();

        let mut finished = request(
            "OK",
            vec![span(ROOT, "", "root", 0, 200), span(CHILD, ROOT, "llm", 10, 150)],
        );
        finished.info.as_mut().unwrap().tags.insert("stage".into(), json!("done"));
        let trace = service.create_trace(finished, &ctx()).await.unwrap();

        assert_eq!(trace.info.state, TraceState::Ok);
        assert_eq!(trace.data.len(), 2);
        assert_eq!(trace.data.root_span().unwrap().end_time_unix_nano, 200);
        assert_eq!(trace.info.tags["stage"], "done");
        assert_eq!(trace.info.trace_metadata["mlflow.user"], "ada");

        let stored = store.get_by_trace_id(TRACE_ID).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_update_without_data_keeps_spans() {
        let (service, _store) = in_memory_service();
        service
            .create_trace(request("IN_PROGRESS", vec![span(ROOT, "", "root", 0, 100)]), &ctx())
            .await
            .unwrap();

        let mut finish = request("OK", vec![]);
        finish.data = None;
        finish.info.as_mut().unwrap().trace_id = Some(TRACE_ID.to_string());
        let trace = service.create_trace(finish, &ctx()).await.unwrap();
        assert_eq!(trace.data.len(), 1);
    }

    #[tokio::test]
    async fn test_append_mode() {
        let store = Arc::new(InMemoryTraceStore::new());
        let service = service_with(
            store,
            IngestConfig::default().with_update_mode(UpdateMode::Append),
        );

        service
            .create_trace(request("IN_PROGRESS", vec![span(ROOT, "", "root", 0, 100)]), &ctx())
            .await
            .unwrap();
        let trace = service
            .create_trace(
                request("IN_PROGRESS", vec![span(CHILD, ROOT, "llm", 10, 50)]),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(trace.data.len(), 2);

        // A second root collides with the stored one
        let err = service
            .create_trace(request("OK", vec![span(GRANDCHILD, "", "again", 0, 1)]), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "MALFORMED_TRACE_STRUCTURE");
    }

    #[tokio::test]
    async fn test_update_rules() {
        let (service, _store) = in_memory_service();
        service
            .create_trace(request("IN_PROGRESS", vec![span(ROOT, "", "root", 0, 100)]), &ctx())
            .await
            .unwrap();

        let back_to_unspecified = request("STATE_UNSPECIFIED", vec![span(ROOT, "", "root", 0, 100)]);
        let err = service.create_trace(back_to_unspecified, &ctx()).await.unwrap_err();
        assert_eq!(err.kind(), "INVALID_STATE_TRANSITION");

        let mut moved = request("OK", vec![span(ROOT, "", "root", 0, 100)]);
        moved.info.as_mut().unwrap().trace_location = Some(
            serde_json::from_value(json!({"mlflow_experiment": {"experiment_id": "2"}})).unwrap(),
        );
        let err = service.create_trace(moved, &ctx()).await.unwrap_err();
        assert_eq!(err.kind(), "INVALID_LOCATION");
    }

    #[tokio::test]
    async fn test_unspecified_trace_is_immutable() {
        let (service, _store) = in_memory_service();
        let req = request("STATE_UNSPECIFIED", vec![span(ROOT, "", "root", 0, 100)]);
        service.create_trace(req.clone(), &ctx()).await.unwrap();

        let err = service.create_trace(req, &ctx()).await.unwrap_err();
        assert_eq!(err.kind(), "IMMUTABLE_TRACE");
    }

    #[tokio::test]
    async fn test_enforced_attribute_limit() {
        let store = Arc::new(InMemoryTraceStore::new());
        let service = service_with(
            store,
            IngestConfig::default()
                .with_dropped_attributes(DroppedAttributesPolicy::Enforce { max_attributes: 1 }),
        );
        let mut root = span(ROOT, "", "root", 0, 100);
        root["attributes"] = json!({"b": 2, "a": 1, "c": 3});
        root["dropped_attributes_count"] = json!(4);

        let trace = service.create_trace(request("OK", vec![root]), &ctx()).await.unwrap();
        let root = trace.data.root_span().unwrap();
        assert_eq!(root.attributes.keys().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(root.dropped_attributes_count, 6);
    }

    #[tokio::test]
    async fn test_tags() {
        let (service, store) = in_memory_service();
        service
            .create_trace(request("OK", vec![span(ROOT, "", "root", 0, 100)]), &ctx())
            .await
            .unwrap();

        let trace = service.set_trace_tag(TRACE_ID, "reviewed", "yes", &ctx()).await.unwrap();
        assert_eq!(trace.info.tags["reviewed"], "yes");

        let trace = service.delete_trace_tag(TRACE_ID, "reviewed", &ctx()).await.unwrap();
        assert!(trace.info.tags.is_empty());

        // No-op delete does not write
        service.delete_trace_tag(TRACE_ID, "absent", &ctx()).await.unwrap();
        assert_eq!(store.get_by_trace_id(TRACE_ID).await.unwrap().unwrap().version, 3);

        let err = service.set_trace_tag(TRACE_ID, " ", "x", &ctx()).await.unwrap_err();
        assert_eq!(err.kind(), "MISSING_FIELD");
        let err = service.delete_trace_tag(TRACE_ID, "", &ctx()).await.unwrap_err();
        assert_eq!(err.kind(), "MISSING_FIELD");

        let err = service.set_trace_tag("nope", "k", "v", &ctx()).await.unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
        let err = service.get_trace("nope", &ctx()).await.unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_tag_keys_are_trimmed_on_set_and_delete() {
        let (service, _store) = in_memory_service();
        service
            .create_trace(request("OK", vec![span(ROOT, "", "root", 0, 100)]), &ctx())
            .await
            .unwrap();

        let trace = service.set_trace_tag(TRACE_ID, " k ", "v", &ctx()).await.unwrap();
        assert_eq!(trace.info.tags.get("k").map(String::as_str), Some("v"));

        let trace = service.delete_trace_tag(TRACE_ID, " k ", &ctx()).await.unwrap();
        assert!(!trace.info.tags.contains_key("k"));
        assert!(service.get_trace(TRACE_ID, &ctx()).await.unwrap().info.tags.is_empty());
    }

    /// Holds every reader at a barrier so concurrent writers see the same version
    struct BarrierStore {
        inner: InMemoryTraceStore,
        barrier: Barrier,
    }

    #[async_trait]
    impl TraceStore for BarrierStore {
        async fn get_by_trace_id(&self, trace_id: &str) -> Result<Option<StoredTrace>, StoreError> {
            let found = self.inner.get_by_trace_id(trace_id).await;
            self.barrier.wait().await;
            found
        }

        async fn create_if_absent(&self, trace: Trace) -> Result<StoredTrace, StoreError> {
            self.inner.create_if_absent(trace).await
        }

        async fn compare_and_swap(
            &self,
            trace_id: &str,
            expected_version: u64,
            trace: Trace,
        ) -> Result<StoredTrace, StoreError> {
            self.inner.compare_and_swap(trace_id, expected_version, trace).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_updates_one_wins() {
        let store = Arc::new(BarrierStore {
            inner: InMemoryTraceStore::new(),
            barrier: Barrier::new(2),
        });
        let seed = Trace::new(
            {
                let mut info = crate::data::TraceInfo::new(
                    TRACE_ID,
                    crate::data::TraceLocation::experiment("1"),
                    chrono::DateTime::from_timestamp(1_714_564_800, 0).unwrap(),
                );
                info.state = TraceState::InProgress;
                info
            },
            TraceData::default(),
        );
        store.inner.create_if_absent(seed).await.unwrap();

        let service = service_with(store.clone(), IngestConfig::default());
        let first = request("OK", vec![span(ROOT, "", "root", 0, 100)]);
        let second = request("ERROR", vec![span(ROOT, "", "root", 0, 90)]);

        let ctx = ctx();
        let (a, b) = futures::join!(
            service.create_trace(first, &ctx),
            service.create_trace(second, &ctx)
        );

        let outcomes = [a, b];
        let successes = outcomes.iter().filter(|r| r.is_ok()).count();
        let conflicts: Vec<_> = outcomes
            .iter()
            .filter_map(|r| r.as_ref().err())
            .map(|e| e.kind())
            .collect();
        assert_eq!(successes, 1);
        assert_eq!(conflicts, vec!["CONCURRENT_UPDATE"]);

        let stored = store.inner.get_by_trace_id(TRACE_ID).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
    }

    /// A store that never answers
    struct StalledStore;

    #[async_trait]
    impl TraceStore for StalledStore {
        async fn get_by_trace_id(&self, _: &str) -> Result<Option<StoredTrace>, StoreError> {
            std::future::pending().await
        }

        async fn create_if_absent(&self, _: Trace) -> Result<StoredTrace, StoreError> {
            std::future::pending().await
        }

        async fn compare_and_swap(&self, _: &str, _: u64, _: Trace) -> Result<StoredTrace, StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_store_times_out() {
        let service = service_with(Arc::new(StalledStore), IngestConfig::default());
        let ctx = RequestContext::new(Duration::from_millis(50));

        let err = service
            .create_trace(request("OK", vec![span(ROOT, "", "root", 0, 100)]), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Timeout { operation: "read trace" }));
        assert_eq!(err.kind(), "TIMEOUT");
    }
}
