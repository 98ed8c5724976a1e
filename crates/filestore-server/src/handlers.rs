//! File API handlers

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header::HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use filestore::{delivery_headers, Disposition, FileRecord, ThumbnailFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// Key looked up to check the blob backend answers; it never exists
const HEALTH_KEY: &str = "filestore-health-check";

/// Component health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
    /// Not configured, e.g. no database behind in-memory records
    Disabled,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub database: ComponentStatus,
    pub storage: ComponentStatus,
}

/// Database and blob backend check
///
/// GET /health
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let database = match &state.db {
        Some(db) => match db.ping().await {
            Ok(()) => ComponentStatus::Up,
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                ComponentStatus::Down
            }
        },
        None => ComponentStatus::Disabled,
    };

    let storage = match state.files.storage().exists(HEALTH_KEY).await {
        Ok(_) => ComponentStatus::Up,
        Err(e) => {
            warn!(
                backend = state.files.storage().name(),
                error = %e,
                "Storage health check failed"
            );
            ComponentStatus::Down
        }
    };

    let healthy = database != ComponentStatus::Down && storage != ComponentStatus::Down;
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthReport {
            status: if healthy { "ok" } else { "unavailable" },
            version: env!("CARGO_PKG_VERSION"),
            database,
            storage,
        }),
    )
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct FileCollection {
    pub total: i64,
    pub count: usize,
    pub limit: i64,
    pub offset: i64,
    pub elements: Vec<FileRecord>,
}

/// List files, newest first
///
/// GET /api/files?limit=&offset=
pub async fn list_files(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<FileCollection>> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0).max(0);

    let (elements, total) = state.files.list(limit, offset).await?;

    Ok(Json(FileCollection {
        total,
        count: elements.len(),
        limit,
        offset,
        elements,
    }))
}

/// Upload a file as a new draft
///
/// POST /api/files (multipart field `file`)
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to process multipart: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;

        let record = state.files.ingest_bytes(data, &filename).await?;
        return Ok((StatusCode::CREATED, Json(record)));
    }

    Err(ApiError::bad_request("Missing multipart field \"file\""))
}

/// Get file metadata
///
/// GET /api/files/:token
pub async fn get_file(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<FileRecord>> {
    Ok(Json(state.files.get_by_token(&token).await?))
}

/// Stream the file as an attachment
///
/// GET /api/files/:token/download
pub async fn download_file(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Response> {
    deliver(&state, &token, Disposition::Attachment).await
}

/// Stream the file for display in the browser
///
/// GET /api/files/:token/view
pub async fn view_file(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Response> {
    deliver(&state, &token, Disposition::Inline).await
}

async fn deliver(state: &AppState, token: &str, disposition: Disposition) -> ApiResult<Response> {
    let (record, data) = state.files.read(token).await?;

    let mut response = Response::new(Body::from(data));
    let headers = response.headers_mut();
    for (name, value) in delivery_headers(&record, disposition) {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ApiError::internal(format!("Invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| ApiError::internal(format!("Invalid {} header: {}", name, e)))?;
        headers.insert(header_name, value);
    }

    debug!(token = %token, disposition = disposition.as_str(), "Delivering file");

    Ok(response)
}

/// Discard an upload that was never linked
///
/// DELETE /api/files/:token
pub async fn delete_file(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<StatusCode> {
    if state.files.discard_draft(&token).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::conflict(format!("{} is not a draft", token)))
    }
}

#[derive(Debug, Deserialize)]
pub struct ThumbnailRequest {
    pub max_width: u32,
    pub max_height: u32,
    pub format: Option<String>,
}

/// Derive a thumbnail
///
/// POST /api/files/:token/thumbnail
pub async fn create_thumbnail(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(req): Json<ThumbnailRequest>,
) -> ApiResult<impl IntoResponse> {
    let format = match req.format.as_deref() {
        Some(f) => f.parse::<ThumbnailFormat>()?,
        None => ThumbnailFormat::Png,
    };

    let original = state.files.get_by_token(&token).await?;
    let thumb = state
        .files
        .create_thumbnail(&original, req.max_width, req.max_height, format)
        .await?;

    Ok((StatusCode::CREATED, Json(thumb)))
}
