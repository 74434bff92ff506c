//! API handlers
//!
//! All handlers return `Response` via [`ApiResponse::ok`] or [`ApiErrorResponse`].
//! Pipeline failures are not HTTP errors: a wafer that cannot be classified
//! still yields a FAIL record with status 200.

use axum::extract::{Multipart, Path, Query, State};
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::envelope::{ApiErrorResponse, ApiResponse};
use super::state::ApiState;
use crate::config::defaults::{HISTORY_DEFAULT_LIMIT, HISTORY_MAX_LIMIT};
use crate::error::InspectionError;
use crate::ingestion;
use crate::notify::{NotificationConfig, NotifyError};
use crate::pipeline::{LotItem, LotSubmission, PipelineStatsSnapshot};
use crate::storage::{HistoryFilter, StorageError};
use crate::types::{ArtifactInput, ArtifactKind, WaferAnalysis, WaferContext};

fn storage_error(e: StorageError) -> Response {
    warn!("Storage query failed: {}", e);
    ApiErrorResponse::internal(format!("Storage error: {e}"))
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub storage_backend: &'static str,
    pub records: Option<usize>,
    pub notifications_enabled: bool,
    pub pipeline: PipelineStatsSnapshot,
}

/// GET /api/v1/health
pub async fn health(State(state): State<ApiState>) -> Response {
    let records = match state.store.count() {
        Ok(n) => Some(n),
        Err(e) => {
            warn!("Health check could not count records: {}", e);
            None
        }
    };
    ApiResponse::ok(HealthResponse {
        status: if records.is_some() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        storage_backend: state.store.backend_name(),
        records,
        notifications_enabled: state.notifier.config().enabled,
        pipeline: state.coordinator.stats(),
    })
}

// ============================================================================
// Uploads
// ============================================================================

/// Parsed multipart body: files plus shared metadata fields.
#[derive(Debug, Default)]
struct Upload {
    files: Vec<(String, Vec<u8>)>,
    kind: Option<String>,
    context: WaferContext,
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, Response> {
    let mut upload = Upload::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(ApiErrorResponse::bad_request(format!("Malformed multipart body: {e}"))),
        };
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiErrorResponse::bad_request(format!("Could not read '{file_name}': {e}")))?;
            upload.files.push((file_name, bytes.to_vec()));
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| ApiErrorResponse::bad_request(format!("Could not read field '{name}': {e}")))?;
        match name.as_str() {
            "kind" => upload.kind = non_empty(text),
            "wafer_id" => upload.context.wafer_id = non_empty(text),
            "lot_id" => upload.context.lot_id = non_empty(text),
            "tool_id" => upload.context.tool_id = non_empty(text),
            "chamber_id" => upload.context.chamber_id = non_empty(text),
            other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
        }
    }
    Ok(upload)
}

/// The shared `kind` field, if one was sent.
fn declared_kind(upload: &Upload) -> Result<Option<ArtifactKind>, Response> {
    upload
        .kind
        .as_deref()
        .map(str::parse::<ArtifactKind>)
        .transpose()
        .map_err(|e: String| ApiErrorResponse::bad_request(e))
}

/// Declared kind wins, then the extension, then the payload's magic bytes.
fn resolve_kind(declared: Option<ArtifactKind>, file_name: &str, bytes: &[u8]) -> Option<ArtifactKind> {
    declared
        .or_else(|| ArtifactKind::from_file_name(file_name))
        .or_else(|| ingestion::detect_kind(bytes))
}

fn unknown_kind_message(file_name: &str) -> String {
    format!("Cannot infer artifact kind for '{file_name}'; pass kind=grid or kind=photo")
}

/// POST /api/v1/analyze
pub async fn analyze(State(state): State<ApiState>, multipart: Multipart) -> Response {
    let upload = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(resp) => return resp,
    };
    let declared = match declared_kind(&upload) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };
    let mut files = upload.files.into_iter();
    let (file_name, bytes) = match (files.next(), files.next()) {
        (Some(file), None) => file,
        (None, _) => return ApiErrorResponse::bad_request("Missing 'file' field"),
        (Some(_), Some(_)) => {
            return ApiErrorResponse::bad_request("Send exactly one 'file'; use /analyze/batch for lots")
        }
    };
    let Some(kind) = resolve_kind(declared, &file_name, &bytes) else {
        return ApiErrorResponse::bad_request(unknown_kind_message(&file_name));
    };

    let record = state
        .coordinator
        .inspect(ArtifactInput::new(file_name, kind, bytes), upload.context)
        .await;
    ApiResponse::ok(record)
}

/// POST /api/v1/analyze/batch
///
/// A file whose kind cannot be determined becomes a FAIL record in its slot;
/// the rest of the lot still runs.
pub async fn analyze_batch(State(state): State<ApiState>, multipart: Multipart) -> Response {
    let upload = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(resp) => return resp,
    };
    if upload.files.is_empty() {
        return ApiErrorResponse::bad_request("No 'file' fields in batch");
    }
    let declared = match declared_kind(&upload) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };

    let items = upload
        .files
        .into_iter()
        .map(|(file_name, bytes)| match resolve_kind(declared, &file_name, &bytes) {
            Some(kind) => LotItem::Artifact(ArtifactInput::new(file_name, kind, bytes)),
            None => LotItem::Rejected {
                error: InspectionError::UnsupportedFormat(unknown_kind_message(&file_name)),
                file_name,
            },
        })
        .collect();

    let submission = LotSubmission {
        lot_id: upload.context.lot_id,
        tool_id: upload.context.tool_id,
        chamber_id: upload.context.chamber_id,
        items,
    };
    let outcome = state.batch.run(submission, &state.shutdown.child_token()).await;
    ApiResponse::ok(outcome)
}

// ============================================================================
// History
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub tool_id: Option<String>,
    pub chamber_id: Option<String>,
    pub lot_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub count: usize,
    pub wafers: Vec<WaferAnalysis>,
}

/// GET /api/v1/wafers
pub async fn list_wafers(State(state): State<ApiState>, Query(q): Query<HistoryQuery>) -> Response {
    if let (Some(from), Some(to)) = (q.from, q.to) {
        if from > to {
            return ApiErrorResponse::bad_request("'from' must not be after 'to'");
        }
    }
    let filter = HistoryFilter {
        limit: Some(q.limit.unwrap_or(HISTORY_DEFAULT_LIMIT).clamp(1, HISTORY_MAX_LIMIT)),
        tool_id: q.tool_id,
        chamber_id: q.chamber_id,
        lot_id: q.lot_id,
        since: q.from,
        until: q.to,
    };
    match state.store.history(&filter) {
        Ok(wafers) => ApiResponse::ok(HistoryResponse {
            count: wafers.len(),
            wafers,
        }),
        Err(e) => storage_error(e),
    }
}

/// GET /api/v1/wafers/:id
pub async fn get_wafer(State(state): State<ApiState>, Path(wafer_id): Path<String>) -> Response {
    match state.store.get(&wafer_id) {
        Ok(Some(record)) => ApiResponse::ok(record),
        Ok(None) => ApiErrorResponse::not_found(format!("Wafer '{wafer_id}' not found")),
        Err(e) => storage_error(e),
    }
}

// ============================================================================
// Analytics
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct SpcQuery {
    pub days: Option<u32>,
    pub tool_id: Option<String>,
}

/// Run a store scan plus aggregation on the blocking pool.
async fn off_runtime<T, F>(query: F) -> Response
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Serialize + Send + 'static,
{
    match tokio::task::spawn_blocking(query).await {
        Ok(Ok(report)) => ApiResponse::ok(report),
        Ok(Err(e)) => storage_error(e),
        Err(e) => {
            warn!("Analytics task aborted: {}", e);
            ApiErrorResponse::internal(format!("Analytics task aborted: {e}"))
        }
    }
}

/// GET /api/v1/spc
pub async fn spc(State(state): State<ApiState>, Query(q): Query<SpcQuery>) -> Response {
    off_runtime(move || state.spc.report(state.store.as_ref(), q.days, q.tool_id.as_deref())).await
}

/// GET /api/v1/rca
pub async fn rca(State(state): State<ApiState>) -> Response {
    off_runtime(move || state.rca.report(state.store.as_ref())).await
}

#[derive(Debug, Deserialize)]
pub struct CopilotRequest {
    #[serde(default)]
    pub query: String,
}

/// POST /api/v1/copilot
pub async fn copilot(State(state): State<ApiState>, Json(request): Json<CopilotRequest>) -> Response {
    off_runtime(move || state.copilot.answer(state.store.as_ref(), &request.query)).await
}

// ============================================================================
// Notifications
// ============================================================================

fn notify_error(e: NotifyError) -> Response {
    match e {
        NotifyError::InvalidConfig(msg) => ApiErrorResponse::bad_request(format!("Invalid notification config: {msg}")),
        NotifyError::Storage(msg) => ApiErrorResponse::internal(format!("Could not persist notification config: {msg}")),
        delivery => ApiErrorResponse::bad_gateway(format!("Delivery failed: {delivery}")),
    }
}

/// GET /api/v1/notifications/config
pub async fn get_notification_config(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.notifier.config())
}

/// PUT /api/v1/notifications/config
pub async fn put_notification_config(
    State(state): State<ApiState>,
    Json(config): Json<NotificationConfig>,
) -> Response {
    match state.notifier.update(config) {
        Ok(saved) => {
            info!(enabled = saved.enabled, "Notification config replaced via API");
            ApiResponse::ok(saved)
        }
        Err(e) => notify_error(e),
    }
}

/// POST /api/v1/notifications/test
///
/// Body is optional; without one the live config is exercised.
pub async fn test_notification(
    State(state): State<ApiState>,
    config: Option<Json<NotificationConfig>>,
) -> Response {
    match state.notifier.send_test(config.map(|Json(c)| c)).await {
        Ok(sent) => ApiResponse::ok(sent),
        Err(e) => notify_error(e),
    }
}
