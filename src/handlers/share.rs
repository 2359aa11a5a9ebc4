use axum::{
    extract::{Path, State},
    response::Response,
    Extension, Json,
};

use crate::error::{ApiResponse, Result};
use crate::handlers::file::stream_response;
use crate::models::{CreateShareRequest, CurrentUser, PublicShareInfo, Share, ShareListItem};
use crate::services::ShareService;
use crate::AppState;

/// Create a new share
/// POST /api/v1/shares
pub async fn create_share(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateShareRequest>,
) -> Result<Json<ApiResponse<Share>>> {
    let share = ShareService::create_share(&state.db, &current_user.id, req).await?;
    Ok(Json(ApiResponse::success(share)))
}

/// List user's shares
/// GET /api/v1/shares
pub async fn list_my_shares(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<Vec<ShareListItem>>>> {
    let shares = ShareService::list_user_shares(&state.db, &current_user.id).await?;
    Ok(Json(ApiResponse::success(shares)))
}

/// Delete a share
/// DELETE /api/v1/shares/:id
pub async fn delete_share(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>> {
    ShareService::delete_share(&state.db, &current_user.id, &id).await?;
    Ok(Json(ApiResponse::<()>::success_message("Share deleted")))
}

/// Get public share info
/// GET /api/v1/public/shares/:link
pub async fn get_public_share(
    State(state): State<AppState>,
    Path(link): Path<String>,
) -> Result<Json<ApiResponse<PublicShareInfo>>> {
    let info = ShareService::public_info(&state.db, &link).await?;
    Ok(Json(ApiResponse::success(info)))
}

/// Download through a public share
/// GET /api/v1/public/shares/:link/download
pub async fn download_public_share(
    State(state): State<AppState>,
    Path(link): Path<String>,
) -> Result<Response> {
    let (_share, handle) = ShareService::record_download(&state.db, &link).await?;
    let stream = state.engine.objects().open(&handle.to_file_object()).await?;
    stream_response(&handle.filename, &handle.mime_type, handle.size_bytes, stream)
}
