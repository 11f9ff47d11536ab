//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST`   | `/api/upload` | Upload a document (multipart field `document`) |
//! | `GET`    | `/api/document/{id}` | Document metadata |
//! | `DELETE` | `/api/document/{id}` | Forget a document |
//! | `POST`   | `/api/message` | Chat; streams `text/plain` assistant text |
//! | `POST`   | `/api/inquiry-email` | Contact form (JSON) |
//! | `POST`   | `/send-email` | Human-response form (multipart, optional file) |
//! | `GET`    | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Every non-streaming error response has the shape
//!
//! ```json
//! { "error": "Document not found", "code": "not_found" }
//! ```
//!
//! Codes: `bad_request`, `unsupported_media_type`, `payload_too_large` (all
//! 400), `not_found` (404), `extraction_failed`, `upstream_failed`,
//! `send_failed`, `internal` (all 500).
//!
//! `/api/message` reports failures that happen before the first assistant
//! byte the same way. Later failures truncate the body.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted; the site front end is
//! served from a different origin.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::config::{Config, SmtpConfig};
use crate::ingest::{DocumentIngestor, IngestError, IngestReceipt};
use crate::mail::{
    DisabledMailer, FormError, HumanResponseForm, InquiryForm, MailAttachment, Mailer, SmtpMailer,
};
use crate::models::DocumentMetadata;
use crate::relay::{ChatRelay, RelayError};
use crate::store::{DocumentStore, InMemoryDocumentStore};

/// Headroom above the upload cap for multipart boundaries and text fields.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<DocumentIngestor>,
    pub relay: Arc<ChatRelay>,
    pub inquiry_mailer: Arc<dyn Mailer>,
    pub human_response_mailer: Arc<dyn Mailer>,
}

impl AppState {
    /// Wires the production services. Fails when the upstream API key is
    /// missing, so the server never starts without it. Mail problems only
    /// disable the affected form.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let api_key = config.upstream.resolve_api_key()?;
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());

        let ingestor = DocumentIngestor::new(
            store.clone(),
            config.server.upload_dir.clone(),
            config.server.max_upload_bytes,
        );
        let relay = ChatRelay::new(config.upstream.clone(), api_key, store)?;

        let inquiry_mailer = mailer_for("inquiry", config.mail.inquiry.as_ref());
        let human_response_mailer =
            mailer_for("human_response", config.mail.human_response.as_ref());

        Ok(Self {
            ingestor: Arc::new(ingestor),
            relay: Arc::new(relay),
            inquiry_mailer,
            human_response_mailer,
        })
    }
}

/// SMTP mailer for one form, or a [`DisabledMailer`] when the section is
/// absent or unusable. Only the affected form fails; the server still starts.
fn mailer_for(path: &'static str, smtp: Option<&SmtpConfig>) -> Arc<dyn Mailer> {
    let Some(smtp) = smtp else {
        tracing::warn!("mail.{} not configured; submissions will fail", path);
        return Arc::new(DisabledMailer::new(path));
    };
    match SmtpMailer::from_config(smtp) {
        Ok(mailer) => Arc::new(mailer),
        Err(e) => {
            tracing::warn!(error = %e, "mail.{} unusable; submissions will fail", path);
            Arc::new(DisabledMailer::new(path))
        }
    }
}

/// Starts the HTTP server on `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        addr = %config.server.bind,
        model = %config.upstream.model,
        "server listening on http://{}",
        config.server.bind
    );
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

/// Serves `state` on an already-bound listener until the task is dropped.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = DefaultBodyLimit::max(
        usize::try_from(state.ingestor.max_upload_bytes())
            .unwrap_or(usize::MAX)
            .saturating_add(MULTIPART_OVERHEAD_BYTES),
    );

    Router::new()
        .route(
            "/api/upload",
            post(handle_upload).layer(body_limit.clone()),
        )
        .route(
            "/api/document/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/api/message", post(handle_message))
        .route("/api/inquiry-email", post(handle_inquiry))
        .route("/send-email", post(handle_human_response).layer(body_limit))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    /// Human-readable error message.
    error: String,
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: &'static str,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn server_error(code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code,
        message: message.into(),
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::UnsupportedMediaType(rejection) => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "unsupported_media_type",
                message: rejection.to_string(),
            },
            e @ IngestError::PayloadTooLarge { .. } => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "payload_too_large",
                message: e.to_string(),
            },
            IngestError::NotFound(_) => not_found("Document not found"),
            e @ IngestError::ExtractionFailed(_) => {
                tracing::error!(error = %e, "extraction failed");
                server_error("extraction_failed", e.to_string())
            }
            e => {
                tracing::error!(error = %e, "upload failed");
                server_error("internal", "Failed to process uploaded document")
            }
        }
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::InvalidRequest(message) => bad_request(message),
            e => {
                tracing::error!(error = %e, "chat relay failed before streaming");
                server_error("upstream_failed", "Failed to get response from the chat provider")
            }
        }
    }
}

impl From<FormError> for AppError {
    fn from(err: FormError) -> Self {
        match err {
            FormError::Render(_) => {
                tracing::error!(error = %err, "mail rendering failed");
                server_error("internal", "Failed to prepare email")
            }
            _ => {
                tracing::warn!(error = %err, "form rejected");
                bad_request(err.to_string())
            }
        }
    }
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError {
            status: StatusCode::BAD_REQUEST,
            code: "payload_too_large",
            message: "Upload exceeds the size limit".to_string(),
        }
    } else {
        bad_request(err.body_text())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Documents ============

/// Handler for `POST /api/upload`.
///
/// Streams the `document` field into a staged temp file, then extracts and
/// stores its text. The media type is checked before anything is written.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestReceipt>, AppError> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("document") {
            continue;
        }
        let original_name = field.file_name().unwrap_or("document").to_string();
        let declared = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let mut staged = state.ingestor.stage(&declared, &original_name).await?;
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            staged.write_chunk(&chunk).await?;
        }
        let receipt = state.ingestor.ingest_staged(staged).await?;
        return Ok(Json(receipt));
    }
    Err(bad_request("No file uploaded"))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentMetadata>, AppError> {
    Ok(Json(state.ingestor.metadata(&id)?))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.ingestor.delete(&id)?;
    Ok(Json(
        json!({ "success": true, "message": "Document deleted successfully" }),
    ))
}

// ============ POST /api/message ============

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "documentId")]
    document_id: Option<String>,
}

/// Handler for `POST /api/message`.
///
/// Waits for the first assistant delta before sending headers, then streams
/// the rest as they arrive.
async fn handle_message(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload.map_err(|_| bad_request("Invalid or missing message"))?;
    let message = req.message.unwrap_or_default();
    let document_id = req.document_id.as_deref().filter(|id| !id.is_empty());

    let mut deltas = state.relay.open(&message, document_id).await?;
    let first = deltas.next_delta().await.transpose()?;

    let headers = [
        (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
        (header::CACHE_CONTROL, "no-cache"),
        (header::CONNECTION, "keep-alive"),
    ];
    Ok((headers, Body::from_stream(deltas.into_body(first))).into_response())
}

// ============ Forms ============

/// Handler for `POST /api/inquiry-email`.
async fn handle_inquiry(
    State(state): State<AppState>,
    payload: Result<Json<InquiryForm>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(form) = payload.map_err(|e| bad_request(e.body_text()))?;
    let mail = form.into_mail()?;
    let submitter = mail.reply_to.clone().unwrap_or_default();

    state.inquiry_mailer.send(mail).await.map_err(|e| {
        tracing::error!(error = %e, "inquiry email send failed");
        server_error("send_failed", "Failed to send email. Try again later.")
    })?;

    tracing::info!(from = %submitter, "inquiry email sent");
    Ok(Json(json!({ "message": "Email sent successfully!" })))
}

/// Handler for `POST /send-email`.
///
/// Text fields `name`, `email`, `message`, optional `phone`, and an optional
/// `file` that is forwarded as an attachment.
async fn handle_human_response(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut form = HumanResponseForm::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("attachment").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                if !bytes.is_empty() {
                    form.attachment = Some(MailAttachment {
                        filename,
                        content_type,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            "name" | "email" | "phone" | "message" => {
                let value = field.text().await.map_err(multipart_error)?;
                let slot = match name.as_str() {
                    "name" => &mut form.name,
                    "email" => &mut form.email,
                    "phone" => &mut form.phone,
                    _ => &mut form.message,
                };
                *slot = Some(value);
            }
            _ => {}
        }
    }

    let mail = form.into_mail()?;
    state.human_response_mailer.send(mail).await.map_err(|e| {
        tracing::error!(error = %e, "human-response email send failed");
        server_error("send_failed", "Failed to submit.")
    })?;

    tracing::info!("human-response email sent");
    Ok(Json(json!({ "message": "Submitted successfully!" })))
}
