use axum::{
    extract::{Query, State},
    Extension, Json,
};

use crate::error::{ApiResponse, Result};
use crate::models::{AdminFilePage, CurrentUser, DedupStats, Pagination};
use crate::services::StatsAggregator;
use crate::AppState;

/// List every user's files
/// GET /api/v1/admin/files?limit=50&offset=0
pub async fn list_files(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<ApiResponse<AdminFilePage>>> {
    let page = state.engine.list_all(&current_user, &pagination).await?;
    Ok(Json(ApiResponse::success(page)))
}

/// Deduplication savings
/// GET /api/v1/admin/stats
pub async fn get_stats(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<DedupStats>>> {
    state.engine.access().require_admin(&current_user)?;
    let stats = StatsAggregator::compute_stats(&state.db).await?;
    Ok(Json(ApiResponse::success(stats)))
}
