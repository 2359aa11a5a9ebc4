use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    Extension, Json,
};

use crate::error::{ApiResponse, AppError, Result};
use crate::models::{CurrentUser, FileDetail, FileFilter, FilePage, Pagination, UploadResponse, Visibility};
use crate::services::{stage_stream, DeleteOutcome, StagedUpload};
use crate::storage::ByteStream;
use crate::AppState;

/// List the caller's files
/// GET /api/v1/files?filename=&mime_type=&min_size=&max_size=&uploaded_from=&uploaded_to=&limit=&offset=
pub async fn list_files(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Query(filter): Query<FileFilter>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<ApiResponse<FilePage>>> {
    let page = state
        .engine
        .list_for_user(&current_user.id, &filter, &pagination)
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

/// Get a specific file
/// GET /api/v1/files/:id
pub async fn get_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<FileDetail>>> {
    let file = state.engine.get_handle(&current_user, &id).await?;
    Ok(Json(ApiResponse::success(file)))
}

struct PendingFile {
    filename: String,
    mime_type: String,
    staged: StagedUpload,
}

/// Upload one or more files
/// POST /api/v1/files/upload
///
/// Parts named `file` or `files` are streamed to staging while hashed; an
/// optional `visibility` text part applies to all of them. Staged files not
/// yet registered are removed when they drop, on error or disconnect alike.
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<Vec<UploadResponse>>>> {
    let staging_dir = state.engine.objects().staging_dir();
    let mut pending: Vec<PendingFile> = Vec::new();
    let mut visibility = Visibility::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to process multipart: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" | "files" => {
                let filename = field
                    .file_name()
                    .map(|s| s.to_string())
                    .ok_or_else(|| AppError::BadRequest("No file name provided".to_string()))?;
                let mime_type = resolve_mime(field.content_type(), &filename);

                let staged = stage_stream(&staging_dir, field).await?;
                tracing::debug!(hash = %staged.hash, size = staged.size, "Staged upload {}", filename);

                pending.push(PendingFile {
                    filename,
                    mime_type,
                    staged,
                });
            }
            "visibility" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::StreamRead(format!("Failed to read field: {}", e)))?;
                visibility = Visibility::parse(&text)
                    .ok_or_else(|| AppError::BadRequest(format!("Invalid visibility: {}", text)))?;
            }
            _ => {}
        }
    }

    if pending.is_empty() {
        return Err(AppError::BadRequest("No file provided".to_string()));
    }

    let mut uploaded = Vec::with_capacity(pending.len());
    for file in pending {
        let response = state
            .engine
            .register_upload(&current_user, &file.filename, visibility, file.staged, &file.mime_type)
            .await?;
        uploaded.push(response);
    }

    Ok(Json(ApiResponse::success(uploaded)))
}

/// Download a file
/// GET /api/v1/files/:id/download
pub async fn download_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Response> {
    let (handle, stream) = state.engine.open_handle(&current_user, &id).await?;
    stream_response(&handle.filename, &handle.mime_type, handle.size_bytes, stream)
}

/// Delete a file handle
/// DELETE /api/v1/files/:id
pub async fn delete_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<DeleteOutcome>>> {
    let outcome = state.engine.delete_handle(&current_user, &id).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// Declared part type unless it is missing or generic, then the extension
fn resolve_mime(declared: Option<&str>, filename: &str) -> String {
    match declared.map(str::trim) {
        Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => ct.to_string(),
        _ => mime_guess::from_path(filename)
            .first_or_octet_stream()
            .to_string(),
    }
}

/// Attachment response streaming blob contents
pub(crate) fn stream_response(
    filename: &str,
    mime_type: &str,
    size_bytes: i64,
    stream: ByteStream,
) -> Result<Response> {
    let fallback_name = filename.replace(['"', '\\'], "_");
    let encoded_name = urlencoding::encode(filename);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime_type)
        .header(header::CONTENT_LENGTH, size_bytes)
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"; filename*=UTF-8''{}",
                fallback_name, encoded_name
            ),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}
