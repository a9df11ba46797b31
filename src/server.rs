//! HTTP API over [`Doc2MdService`].
//!
//! Every endpoint answers JSON. Failures are `{"success": false, "message"}`
//! with 404 for unknown batches/uploads/records, 400 for bad requests and
//! wrong lifecycle states, and 500 for everything else.

use crate::batch::BatchJob;
use crate::error::Doc2MdError;
use crate::format::FormatTag;
use crate::service::Doc2MdService;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Multipart overhead allowed on top of `max_upload_bytes`.
const MULTIPART_SLACK: usize = 64 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Doc2MdService,
}

impl AppState {
    pub fn new(service: Doc2MdService) -> Self {
        Self { service }
    }
}

/// Build the router with every endpoint.
pub fn build_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.service.config().max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_SLACK);
    let download_route = format!("{}/{{filename}}", state.service.config().download_prefix);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/formats", get(list_formats))
        // Batch workflow
        .route("/upload/batch", post(upload_batch))
        .route("/extract/batch/{batch_id}", post(extract_batch))
        .route("/convert/batch/{batch_id}", post(convert_batch))
        .route("/status/batch/{batch_id}", get(batch_status))
        .route("/cancel/batch/{batch_id}", post(cancel_batch))
        .route("/batch/{batch_id}/files", delete(cleanup_batch))
        .route("/api/batches", get(list_batches))
        // Single files
        .route("/upload/{format}", post(upload_single))
        .route("/convert/{format}", post(convert_single))
        .route(&download_route, get(download))
        // History
        .route("/api/history", get(list_history))
        .route("/api/history/clear", post(clear_history))
        .route("/api/history/{id}", delete(delete_history))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until the process exits.
pub async fn start_server(addr: &str, state: AppState) -> Result<(), std::io::Error> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await
}

// ── Errors ───────────────────────────────────────────────────────────────

/// JSON error response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<Doc2MdError> for ApiError {
    fn from(e: Doc2MdError) -> Self {
        let status = if e.is_not_found() {
            StatusCode::NOT_FOUND
        } else if e.is_input_error() {
            StatusCode::BAD_REQUEST
        } else {
            error!("request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "success": false, "message": self.message })),
        )
            .into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

// ── Misc ─────────────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_formats(State(state): State<AppState>) -> impl IntoResponse {
    let formats: BTreeMap<&str, &[&str]> = FormatTag::convertible()
        .map(|tag| (tag.as_str(), tag.extensions()))
        .collect();
    Json(json!({
        "success": true,
        "supported_formats": formats,
        "supported_types": FormatTag::convertible().map(FormatTag::as_str).collect::<Vec<_>>(),
        "max_upload_bytes": state.service.config().max_upload_bytes,
    }))
}

// ── Multipart ────────────────────────────────────────────────────────────

struct UploadForm {
    filename: String,
    bytes: Bytes,
    password: Option<String>,
}

/// Read the `file` part (required) and an optional `password` field.
async fn read_upload(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut file = None;
    let mut password = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("cannot read upload: {e}")))?;
                file = Some((filename, bytes));
            }
            Some("password") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("cannot read password: {e}")))?;
                password = Some(text).filter(|p| !p.is_empty());
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| ApiError::bad_request("no file provided"))?;
    if filename.trim().is_empty() {
        return Err(ApiError::bad_request("no file selected"));
    }
    Ok(UploadForm {
        filename,
        bytes,
        password,
    })
}

// ── Batch workflow ───────────────────────────────────────────────────────

async fn upload_batch(State(state): State<AppState>, multipart: Multipart) -> ApiResult {
    let form = read_upload(multipart).await?;
    let receipt = state
        .service
        .batches()
        .upload(&form.filename, &form.bytes, form.password)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("archive {} uploaded", receipt.archive_name),
        "batch_id": receipt.batch_id,
        "archive_name": receipt.archive_name,
        "file_size": receipt.file_size,
    })))
}

async fn extract_batch(State(state): State<AppState>, Path(batch_id): Path<String>) -> ApiResult {
    let summary = state.service.batches().extract(&batch_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("extracted {} file(s)", summary.total_files),
        "total_files": summary.total_files,
        "extracted_files": summary.extracted_files,
        "failed_files": summary.failed_files,
        "files": summary.files,
    })))
}

#[derive(Debug, Default, Deserialize)]
struct ConvertBatchRequest {
    #[serde(default)]
    files: Vec<String>,
}

async fn convert_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let request: ConvertBatchRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ConvertBatchRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid request body: {e}")))?
    };
    let selection = Some(request.files).filter(|f| !f.is_empty());

    let handle = state
        .service
        .batches()
        .start_conversion(&batch_id, selection)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "batch conversion started",
        "batch_id": handle.batch_id,
        "total_files": handle.total_files,
    })))
}

async fn batch_status(State(state): State<AppState>, Path(batch_id): Path<String>) -> ApiResult {
    let job: BatchJob = state.service.batches().status(&batch_id)?;
    Ok(Json(json!({ "success": true, "status": job })))
}

async fn cancel_batch(State(state): State<AppState>, Path(batch_id): Path<String>) -> ApiResult {
    state.service.batches().cancel(&batch_id)?;
    Ok(Json(json!({ "success": true, "message": "cancellation requested" })))
}

async fn cleanup_batch(State(state): State<AppState>, Path(batch_id): Path<String>) -> ApiResult {
    state.service.batches().cleanup(&batch_id).await?;
    Ok(Json(json!({ "success": true, "message": "batch files removed" })))
}

async fn list_batches(State(state): State<AppState>) -> ApiResult {
    let batches = state.service.batches().list();
    Ok(Json(json!({
        "success": true,
        "total": batches.len(),
        "batches": batches,
    })))
}

// ── Single files ─────────────────────────────────────────────────────────

fn parse_format(format: &str) -> Result<FormatTag, ApiError> {
    match format.parse::<FormatTag>() {
        Ok(FormatTag::Unknown) | Err(_) => {
            Err(ApiError::bad_request(format!("unsupported format: {format}")))
        }
        Ok(tag) => Ok(tag),
    }
}

async fn upload_single(
    State(state): State<AppState>,
    Path(format): Path<String>,
    multipart: Multipart,
) -> ApiResult {
    let tag = parse_format(&format)?;
    let form = read_upload(multipart).await?;
    let upload = state
        .service
        .upload_single(tag, &form.filename, &form.bytes)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("{} uploaded", upload.original_name),
        "file_id": upload.file_id,
        "original_name": upload.original_name,
        "file_size": upload.file_size,
        "format": tag,
    })))
}

#[derive(Debug, Deserialize)]
struct ConvertSingleRequest {
    file_id: String,
}

async fn convert_single(
    State(state): State<AppState>,
    Path(format): Path<String>,
    body: Bytes,
) -> ApiResult {
    let tag = parse_format(&format)?;
    let request: ConvertSingleRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::bad_request("no file_id provided"))?;
    let done = state.service.convert_single(tag, &request.file_id).await?;
    let note = match &done.outcome {
        crate::dispatch::ConversionOutcome::Degraded { note, .. } => Some(note.clone()),
        _ => None,
    };
    Ok(Json(json!({
        "success": true,
        "message": format!("converted {}", done.original_name),
        "md_file_path": done.markdown_path,
        "filename": done.filename,
        "download_url": done.download_url,
        "history_id": done.history_id,
        "conversion_error": note,
    })))
}

/// Serve a generated `.md` file. Only plain file names inside the download
/// directory are accepted.
async fn download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let plain = !filename.is_empty()
        && !filename.contains(['/', '\\'])
        && !filename.contains("..")
        && filename.ends_with(".md");
    if !plain {
        warn!("rejected download name {:?}", filename);
        return Err(ApiError::bad_request("invalid file name"));
    }

    let path = state.service.config().download_dir.join(&filename);
    let content = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found(format!("file {filename} not found")))
        }
        Err(e) => return Err(Doc2MdError::io(&path, e).into()),
    };

    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        content,
    )
        .into_response())
}

// ── History ──────────────────────────────────────────────────────────────

async fn list_history(State(state): State<AppState>) -> ApiResult {
    let history = state.service.history().list();
    Ok(Json(json!({
        "success": true,
        "total": history.len(),
        "history": history,
    })))
}

async fn clear_history(State(state): State<AppState>) -> ApiResult {
    state.service.history().clear();
    Ok(Json(json!({ "success": true, "message": "history cleared" })))
}

async fn delete_history(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    if state.service.history().delete(&id) {
        Ok(Json(json!({ "success": true, "message": "record deleted" })))
    } else {
        Err(ApiError::not_found(format!("history record {id} not found")))
    }
}
