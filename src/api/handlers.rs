use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::data::Trace;
use crate::ingest::{IngestError, RequestContext, TraceService};
use crate::otel::{WireError, WireFormat};
use crate::validate::Violation;

/// Principal handed to the authorizer
pub const PRINCIPAL_HEADER: &str = "x-tracekeep-principal";
/// Per-request deadline in milliseconds, capped by the server maximum
pub const TIMEOUT_HEADER: &str = "x-tracekeep-timeout-ms";

/// Application state shared across handlers
pub struct AppState {
    pub service: Arc<TraceService>,
    pub default_timeout: Duration,
    pub max_timeout: Duration,
}

impl AppState {
    /// Caller identity and deadline from the request headers
    fn request_context(&self, headers: &HeaderMap) -> RequestContext {
        let timeout = header_str(headers, TIMEOUT_HEADER)
            .and_then(|ms| ms.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout);

        let ctx = RequestContext::new(timeout);
        match header_str(headers, PRINCIPAL_HEADER).map(str::trim) {
            Some(principal) if !principal.is_empty() => ctx.with_principal(principal),
            _ => ctx,
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Encode a trace in the negotiated format
fn trace_response(format: WireFormat, trace: &Trace) -> Result<Response, ApiError> {
    let body = format.encode_trace(trace)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static(format.content_type()))],
        body,
    )
        .into_response())
}

/// Response format: what `Accept` names, else the format of the request
fn response_format(headers: &HeaderMap, request_format: WireFormat) -> WireFormat {
    match header_str(headers, header::ACCEPT) {
        Some(accept) if accept.contains("protobuf") || accept.contains("json") => {
            WireFormat::from_accept(Some(accept))
        }
        _ => request_format,
    }
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Traces
// ============================================================================

pub async fn create_trace(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request_format = WireFormat::from_content_type(header_str(&headers, header::CONTENT_TYPE))?;
    let request = request_format.decode_trace(&body)?;
    let ctx = state.request_context(&headers);

    let trace = state.service.create_trace(request, &ctx).await?;
    trace_response(response_format(&headers, request_format), &trace)
}

pub async fn get_trace(
    State(state): State<Arc<AppState>>,
    Path(trace_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = state.request_context(&headers);
    let trace = state.service.get_trace(&trace_id, &ctx).await?;
    trace_response(response_format(&headers, WireFormat::Json), &trace)
}

#[derive(Debug, Deserialize)]
pub struct SetTagRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

pub async fn set_trace_tag(
    State(state): State<Arc<AppState>>,
    Path(trace_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: SetTagRequest = serde_json::from_slice(&body).map_err(WireError::from)?;
    let ctx = state.request_context(&headers);

    let trace = state
        .service
        .set_trace_tag(&trace_id, &request.key, &request.value, &ctx)
        .await?;
    trace_response(response_format(&headers, WireFormat::Json), &trace)
}

pub async fn delete_trace_tag(
    State(state): State<Arc<AppState>>,
    Path((trace_id, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = state.request_context(&headers);
    let trace = state.service.delete_trace_tag(&trace_id, &key, &ctx).await?;
    trace_response(response_format(&headers, WireFormat::Json), &trace)
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ViolationBody {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub message: String,
}

impl From<&Violation> for ViolationBody {
    fn from(violation: &Violation) -> Self {
        Self {
            kind: violation.kind(),
            subject: violation.subject().map(str::to_string),
            message: violation.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error_code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<ViolationBody>,
}

#[derive(Debug)]
pub enum ApiError {
    Ingest(IngestError),
    Wire(WireError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Wire(WireError::UnsupportedMediaType(_)) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Wire(WireError::Attribute(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Wire(_) => StatusCode::BAD_REQUEST,
            ApiError::Ingest(err) => match err {
                IngestError::Validation(_) => StatusCode::BAD_REQUEST,
                IngestError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
                IngestError::NotFound(_) => StatusCode::NOT_FOUND,
                IngestError::ImmutableTrace { .. } => StatusCode::CONFLICT,
                IngestError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                IngestError::Collaborator { .. } => StatusCode::SERVICE_UNAVAILABLE,
                IngestError::IdAllocation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                IngestError::Store { .. } => match err.kind() {
                    "CONCURRENT_UPDATE" => StatusCode::CONFLICT,
                    "NOT_FOUND" => StatusCode::NOT_FOUND,
                    "STORAGE_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                },
            },
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Ingest(err) => err.kind(),
            ApiError::Wire(err) => err.kind(),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        ApiError::Ingest(err)
    }
}

impl From<WireError> for ApiError {
    fn from(err: WireError) -> Self {
        ApiError::Wire(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_code = self.error_code();
        let (message, violations) = match &self {
            ApiError::Ingest(err) => (
                err.to_string(),
                err.violations().iter().map(ViolationBody::from).collect(),
            ),
            ApiError::Wire(err) => (err.to_string(), Vec::new()),
        };

        if status.is_server_error() {
            tracing::error!(error_code, "{}", message);
        } else {
            tracing::debug!(error_code, "{}", message);
        }

        let body = ErrorBody {
            error_code,
            message,
            violations,
        };
        (status, Json(body)).into_response()
    }
}
