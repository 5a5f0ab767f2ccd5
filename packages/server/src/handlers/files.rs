use std::path::Path as FsPath;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, body::Body};
use common::LogicalFile;
use common::storage::BoxReader;
use futures::TryStreamExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::instrument;
use uuid::Uuid;

use crate::error::{AppError, ErrorBody};
use crate::extractors::owner::Owner;
use crate::ingest::UploadRequest;
use crate::models::file::{FileResponse, UploadResponse};
use crate::state::AppState;

/// Allowance for multipart boundaries and part headers around the file.
pub const MULTIPART_OVERHEAD: u64 = 16 * 1024;

pub fn upload_body_limit(max_upload: u64) -> DefaultBodyLimit {
    let limit = max_upload.saturating_add(MULTIPART_OVERHEAD);
    DefaultBodyLimit::max(usize::try_from(limit).unwrap_or(usize::MAX))
}

#[utoipa::path(
    post,
    path = "/",
    tag = "Files",
    operation_id = "uploadFile",
    summary = "Upload a file",
    description = "Stores the `file` multipart field. Identical content is stored once and \
        shared. Videos are transcoded in the background and start out `pending`; other \
        files are `ready` immediately.",
    params(("X-User-Id" = String, Header, description = "Caller identity")),
    request_body(content_type = "multipart/form-data", description = "File upload"),
    responses(
        (status = 201, description = "File stored", body = UploadResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Missing identity (OWNER_MISSING)", body = ErrorBody),
        (status = 413, description = "Too large (PAYLOAD_TOO_LARGE)", body = ErrorBody),
        (status = 415, description = "Type not allowed (UNSUPPORTED_MEDIA_TYPE)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, headers, multipart), fields(owner = %owner.as_str()))]
pub async fn upload_file(
    owner: Owner,
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let request_len = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let max_request = state
        .store
        .storage_config()
        .max_request_size()
        .saturating_add(MULTIPART_OVERHEAD);
    if let Some(len) = request_len
        && len > max_request
    {
        return Err(AppError::PayloadTooLarge(format!(
            "Request exceeds maximum size of {max_request} bytes"
        )));
    }

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
    {
        if field.name() != Some("file") {
            continue; // Ignore unknown fields.
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let mime_type = field
            .content_type()
            .map(str::to_string)
            .or_else(|| mime_guess::from_path(&filename).first().map(|m| m.to_string()))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let request = UploadRequest {
            owner: owner.0.clone(),
            filename,
            mime_type,
            // The file is at most the request minus the multipart framing.
            declared_size: request_len.map(|len| len.saturating_sub(MULTIPART_OVERHEAD)),
        };
        state.store.validate_upload(&request)?;

        let body = StreamReader::new(field.map_err(std::io::Error::other));
        tokio::pin!(body);

        let receipt = state.store.upload(request, body).await?;
        return Ok((StatusCode::CREATED, Json(UploadResponse::from(receipt))));
    }

    Err(AppError::Validation("Missing 'file' field".into()))
}

#[utoipa::path(
    get,
    path = "/{id}",
    tag = "Files",
    operation_id = "getFile",
    summary = "Get file metadata",
    description = "Returns metadata and processing status of one of the caller's files.",
    params(
        ("id" = String, Path, description = "File ID (UUID)"),
        ("X-User-Id" = String, Header, description = "Caller identity"),
    ),
    responses(
        (status = 200, description = "File metadata", body = FileResponse),
        (status = 401, description = "Missing identity (OWNER_MISSING)", body = ErrorBody),
        (status = 404, description = "File not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state), fields(owner = %owner.as_str()))]
pub async fn get_file(
    owner: Owner,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileResponse>, AppError> {
    let id = parse_id(&id)?;
    let file = state.store.get_file(id, owner.as_str()).await?;
    Ok(Json(file.into()))
}

#[utoipa::path(
    delete,
    path = "/{id}",
    tag = "Files",
    operation_id = "deleteFile",
    summary = "Delete a file",
    description = "Removes the file. The stored content and its transcoding output are \
        reclaimed once no other file shares them.",
    params(
        ("id" = String, Path, description = "File ID (UUID)"),
        ("X-User-Id" = String, Header, description = "Caller identity"),
    ),
    responses(
        (status = 204, description = "File deleted"),
        (status = 401, description = "Missing identity (OWNER_MISSING)", body = ErrorBody),
        (status = 404, description = "File not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state), fields(owner = %owner.as_str()))]
pub async fn delete_file(
    owner: Owner,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    state.store.delete_file(id, owner.as_str()).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/{id}/content",
    tag = "Files",
    operation_id = "downloadFile",
    summary = "Download the original",
    description = "Streams the uploaded bytes. Only available once the file is `ready`. \
        Supports ETag-based caching via If-None-Match.",
    params(
        ("id" = String, Path, description = "File ID (UUID)"),
        ("X-User-Id" = String, Header, description = "Caller identity"),
    ),
    responses(
        (status = 200, description = "File content"),
        (status = 304, description = "Not Modified (ETag match)"),
        (status = 404, description = "File not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "Still processing or failed (NOT_READY)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, headers), fields(owner = %owner.as_str()))]
pub async fn download_content(
    owner: Owner,
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    let (file, reader) = state.store.open_original(id, owner.as_str()).await?;

    let etag = format!("\"{}\"", file.content_hash);
    if matches_etag(&headers, &etag) {
        return Ok(StatusCode::NOT_MODIFIED.into_response());
    }

    build_download_response(&file, &etag, reader)
}

#[utoipa::path(
    get,
    path = "/api/v1/files/{id}/stream/{path}",
    tag = "Files",
    operation_id = "streamArtifact",
    summary = "Fetch a transcoding artifact",
    description = "Serves the HLS playlist (`index.m3u8`) or a segment of a ready video. \
        Paths that leave the file's output directory are rejected.",
    params(
        ("id" = String, Path, description = "File ID (UUID)"),
        ("path" = String, Path, description = "Artifact path, e.g. `index.m3u8`"),
        ("X-User-Id" = String, Header, description = "Caller identity"),
    ),
    responses(
        (status = 200, description = "Artifact content"),
        (status = 404, description = "Artifact not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "Still processing or failed (NOT_READY)", body = ErrorBody),
    ),
)]
#[instrument(skip(state), fields(owner = %owner.as_str()))]
pub async fn stream_artifact(
    owner: Owner,
    State(state): State<AppState>,
    Path((id, path)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    let (_, resolved) = state.store.resolve_artifact(id, owner.as_str(), &path).await?;

    let file = tokio::fs::File::open(&resolved)
        .await
        .map_err(|_| AppError::NotFound("Artifact not found".into()))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| AppError::Internal(format!("Failed to stat artifact: {e}")))?
        .len();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, artifact_content_type(&resolved))
        .header(header::CONTENT_LENGTH, len.to_string())
        .header(header::CACHE_CONTROL, "private, max-age=3600")
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))
}

fn parse_id(id: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id).map_err(|_| AppError::Validation("Invalid file ID".into()))
}

fn matches_etag(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|val| val == etag || val == "*")
}

/// Build a streaming response for an original.
fn build_download_response(
    file: &LogicalFile,
    etag: &str,
    reader: BoxReader,
) -> Result<Response, AppError> {
    let body = Body::from_stream(ReaderStream::new(reader));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, &file.mime_type)
        .header(header::CONTENT_LENGTH, file.size.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            crate::utils::filename::content_disposition_value("attachment", &file.name),
        )
        .header(header::ETAG, etag)
        .header(header::CACHE_CONTROL, "private, max-age=3600")
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))
}

fn artifact_content_type(path: &FsPath) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("m3u8") => "application/vnd.apple.mpegurl".into(),
        Some("ts") => "video/mp2t".into(),
        _ => mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string(),
    }
}
