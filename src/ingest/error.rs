use std::future::Future;
use tokio::time::Instant;

use super::ids::IdError;
use super::resolver::CollaboratorError;
use crate::data::TraceState;
use crate::storage::StoreError;
use crate::validate::Violation;

/// Failure of an ingestion service operation
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("trace rejected: {}", summarize(.0))]
    Validation(Vec<Violation>),

    #[error("trace '{trace_id}' is {state} and can no longer be updated")]
    ImmutableTrace { trace_id: String, state: TraceState },

    #[error("trace '{0}' not found")]
    NotFound(String),

    #[error("{principal} may not write to {location}")]
    PermissionDenied { principal: String, location: String },

    #[error("{operation} did not finish before the deadline")]
    Timeout { operation: &'static str },

    #[error("{operation}: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("{operation}: {source}")]
    Collaborator {
        operation: &'static str,
        #[source]
        source: CollaboratorError,
    },

    #[error("{operation}: {source}")]
    IdAllocation {
        operation: &'static str,
        #[source]
        source: IdError,
    },
}

fn summarize(violations: &[Violation]) -> String {
    match violations {
        [] => "no violations".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    }
}

impl IngestError {
    pub fn violation(violation: Violation) -> Self {
        IngestError::Validation(vec![violation])
    }

    /// Machine-readable kind
    ///
    /// A rejected request reports the kind of its first violation; the full
    /// list travels alongside.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Validation(violations) => violations
                .first()
                .map(|v| v.kind())
                .unwrap_or("INVALID_ARGUMENT"),
            IngestError::ImmutableTrace { .. } => "IMMUTABLE_TRACE",
            IngestError::NotFound(_) => "NOT_FOUND",
            IngestError::PermissionDenied { .. } => "PERMISSION_DENIED",
            IngestError::Timeout { .. } => "TIMEOUT",
            IngestError::Store { source, .. } => source.kind(),
            IngestError::Collaborator { .. } => "UPSTREAM_UNAVAILABLE",
            IngestError::IdAllocation { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            IngestError::Validation(violations) => violations,
            _ => &[],
        }
    }
}

impl From<Vec<Violation>> for IngestError {
    fn from(violations: Vec<Violation>) -> Self {
        IngestError::Validation(violations)
    }
}

/// Errors of an external call, tagged with the operation that made it
pub(crate) trait OperationError {
    fn in_operation(self, operation: &'static str) -> IngestError;
}

impl OperationError for StoreError {
    fn in_operation(self, operation: &'static str) -> IngestError {
        IngestError::Store {
            operation,
            source: self,
        }
    }
}

impl OperationError for CollaboratorError {
    fn in_operation(self, operation: &'static str) -> IngestError {
        IngestError::Collaborator {
            operation,
            source: self,
        }
    }
}

impl OperationError for IdError {
    fn in_operation(self, operation: &'static str) -> IngestError {
        IngestError::IdAllocation {
            operation,
            source: self,
        }
    }
}

/// Run an external call under the request deadline
pub(crate) async fn bounded<T, E, F>(
    deadline: Instant,
    operation: &'static str,
    call: F,
) -> Result<T, IngestError>
where
    F: Future<Output = Result<T, E>>,
    E: OperationError,
{
    match tokio::time::timeout_at(deadline, call).await {
        Ok(result) => result.map_err(|e| e.in_operation(operation)),
        Err(_) => Err(IngestError::Timeout { operation }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_validation_kind_and_message() {
        let err = IngestError::Validation(vec![
            Violation::missing("info.request_time"),
            Violation::malformed("trace has no root span"),
        ]);
        assert_eq!(err.kind(), "MISSING_FIELD");
        assert_eq!(err.violations().len(), 2);
        assert_eq!(
            err.to_string(),
            "trace rejected: info.request_time is required (and 1 more)"
        );
    }

    #[test]
    fn test_store_errors_keep_their_kind() {
        let err = StoreError::ConcurrentUpdate {
            trace_id: "t".to_string(),
            expected: 1,
            actual: 2,
        }
        .in_operation("update trace");
        assert_eq!(err.kind(), "CONCURRENT_UPDATE");
        assert!(err.to_string().starts_with("update trace: "));

        let err = StoreError::Unavailable("disk gone".to_string()).in_operation("read trace");
        assert_eq!(err.kind(), "STORAGE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let deadline = Instant::now() + Duration::from_millis(20);
        let result: Result<(), _> = bounded(deadline, "read trace", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StoreError>(())
        })
        .await;
        assert!(matches!(
            result,
            Err(IngestError::Timeout {
                operation: "read trace"
            })
        ));
    }
}
