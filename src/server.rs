//! HTTP boundary.
//!
//! | Method | Path            | Body                                          |
//! |--------|-----------------|-----------------------------------------------|
//! | GET    | `/health`       | none                                          |
//! | POST   | `/analyze`      | raw PDF/text, or `{pdf_hex, user_context, user_id}` |
//! | POST   | `/analyze_bill` | `{bill_text}`                                 |
//! | POST   | `/analyze_pdf`  | multipart `file` (+ `user_context`)           |
//!
//! Every request runs under `request_timeout_secs`; when it expires the
//! pipeline future is dropped and the caller gets a 504. Error bodies are
//! always JSON with a `status` field.

use crate::audit::BillAuditor;
use crate::config::ServerConfig;
use crate::error::AuditError;
use crate::memory::MemoryStore;
use crate::output::AuditResponse;
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Name reported by `/health`.
pub const SERVICE_NAME: &str = "oversight-ai";

/// Slack on top of the document cap for the JSON/multipart wrapping.
const ENVELOPE_OVERHEAD: usize = 64 * 1024;

/// Shared, immutable per-process state.
#[derive(Clone)]
pub struct AppState {
    pub auditor: Arc<BillAuditor>,
    pub config: Arc<ServerConfig>,
    pub memory: Option<Arc<MemoryStore>>,
}

impl AppState {
    /// Wire the memory store from `config.memory`, if any.
    ///
    /// A memory store that cannot be built is logged and left out; it never
    /// stops the service from starting.
    pub fn new(auditor: Arc<BillAuditor>, config: ServerConfig) -> Self {
        let memory = config
            .memory
            .clone()
            .and_then(|mc| match MemoryStore::new(mc) {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    warn!("[memory] Disabled: {}", e);
                    None
                }
            });
        Self {
            auditor,
            config: Arc::new(config),
            memory,
        }
    }
}

/// Largest request body accepted. Hex doubles the document on the wire.
fn body_limit(config: &ServerConfig) -> usize {
    config
        .max_upload_bytes
        .saturating_mul(2)
        .saturating_add(ENVELOPE_OVERHEAD)
}

/// Build the router with CORS, tracing and the body limit applied.
pub fn router(state: AppState) -> Router {
    let limit = body_limit(&state.config);

    Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .route("/analyze_bill", post(analyze_bill))
        .route("/analyze_pdf", post(analyze_pdf))
        .layer(DefaultBodyLimit::max(limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `config.bind` and serve until Ctrl-C.
pub async fn serve(state: AppState) -> Result<(), AuditError> {
    let addr = state.config.bind.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AuditError::Internal(format!("cannot bind {addr}: {e}")))?;
    info!("-- Starting {} on {}", SERVICE_NAME, addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AuditError::Internal(format!("server error: {e}")))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "service": SERVICE_NAME}))
}

#[derive(Debug, Deserialize)]
struct AnalyzeEnvelope {
    #[serde(default)]
    pdf_hex: Option<String>,
    #[serde(default)]
    user_context: Option<Map<String, Value>>,
    #[serde(default)]
    user_id: Option<String>,
}

async fn analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, AuditError> {
    let body = body.map_err(|e| AuditError::InvalidPayload(e.body_text()))?;

    let (document, user_context, user_id) = if is_json(&headers) {
        let envelope: AnalyzeEnvelope = serde_json::from_slice(&body)
            .map_err(|e| AuditError::InvalidPayload(format!("JSON body: {e}")))?;
        let hex_text = envelope.pdf_hex.unwrap_or_default();
        if hex_text.trim().is_empty() {
            return Err(AuditError::EmptyPayload);
        }
        let document = hex::decode(hex_text.trim())
            .map_err(|e| AuditError::InvalidPayload(format!("pdf_hex: {e}")))?;
        (
            document,
            envelope.user_context.unwrap_or_default(),
            envelope.user_id.filter(|id| !id.is_empty()),
        )
    } else {
        (body.to_vec(), Map::new(), None)
    };

    if document.is_empty() {
        return Err(AuditError::EmptyPayload);
    }
    check_size(document.len(), &state.config)?;

    let auditor = Arc::clone(&state.auditor);
    let response = with_deadline(&state.config, async move {
        auditor.audit_document(document, &user_context).await
    })
    .await?;

    match response {
        AuditResponse::Success(ref report) => {
            if let (Some(store), Some(user_id)) = (&state.memory, user_id) {
                store.spawn_store(report.as_ref().clone(), user_id);
            }
            Ok((StatusCode::OK, Json(response)).into_response())
        }
        AuditResponse::Failed { .. } => {
            Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(response)).into_response())
        }
    }
}

#[derive(Debug, Deserialize)]
struct BillTextRequest {
    #[serde(default)]
    bill_text: String,
}

async fn analyze_bill(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, AuditError> {
    let body = body.map_err(|e| AuditError::InvalidPayload(e.body_text()))?;
    let request: BillTextRequest = serde_json::from_slice(&body)
        .map_err(|e| AuditError::InvalidPayload(format!("JSON body: {e}")))?;
    if request.bill_text.trim().is_empty() {
        return Err(AuditError::InvalidPayload("bill_text must not be empty".into()));
    }

    let auditor = Arc::clone(&state.auditor);
    let report = with_deadline(&state.config, async move {
        auditor
            .quick_review_text(&request.bill_text, &Map::new())
            .await
    })
    .await?;
    Ok(Json(report).into_response())
}

async fn analyze_pdf(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AuditError> {
    let mut multipart = multipart.map_err(|e| AuditError::InvalidPayload(e.body_text()))?;
    let mut document: Option<Bytes> = None;
    let mut user_context = Map::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AuditError::InvalidPayload(format!("multipart: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                if let Some(file_name) = field.file_name() {
                    if !file_name.to_ascii_lowercase().ends_with(".pdf") {
                        return Err(AuditError::InvalidPayload(
                            "Only PDF files are supported".into(),
                        ));
                    }
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AuditError::InvalidPayload(format!("file: {e}")))?;
                document = Some(bytes);
            }
            "user_context" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AuditError::InvalidPayload(format!("user_context: {e}")))?;
                if !text.trim().is_empty() {
                    user_context = serde_json::from_str(&text).map_err(|_| {
                        AuditError::InvalidPayload("user_context must be a JSON object".into())
                    })?;
                }
            }
            _ => {}
        }
    }

    let document = document
        .filter(|d| !d.is_empty())
        .ok_or(AuditError::EmptyPayload)?;
    check_size(document.len(), &state.config)?;

    let auditor = Arc::clone(&state.auditor);
    let report = with_deadline(&state.config, async move {
        auditor
            .quick_review_document(document.to_vec(), &user_context)
            .await
    })
    .await?;
    Ok(Json(report).into_response())
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false)
}

fn check_size(size: usize, config: &ServerConfig) -> Result<(), AuditError> {
    if size > config.max_upload_bytes {
        return Err(AuditError::PayloadTooLarge {
            size,
            max: config.max_upload_bytes,
        });
    }
    Ok(())
}

async fn with_deadline<T, F>(config: &ServerConfig, fut: F) -> Result<T, AuditError>
where
    F: Future<Output = Result<T, AuditError>>,
{
    let secs = config.request_timeout_secs;
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Request cancelled after {}s", secs);
            Err(AuditError::Timeout { secs })
        }
    }
}

// ── Error mapping ────────────────────────────────────────────────────────

impl AuditError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuditError::NoExtractableText => StatusCode::UNPROCESSABLE_ENTITY,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            AuditError::LlmApiError { .. } | AuditError::ProviderNotConfigured { .. } => {
                StatusCode::BAD_GATEWAY
            }
            AuditError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuditError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            AuditError::NoExtractableText => json!({"status": "failed", "error": self.to_string()}),
            _ => json!({"status": "error", "message": self.to_string()}),
        };
        if status.is_server_error() {
            warn!("{} → {}", status, body);
        }
        (status, Json(body)).into_response()
    }
}
