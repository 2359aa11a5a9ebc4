use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::models::CurrentUser;
use crate::AppState;

/// Per-user request throttle. Runs inside `auth_middleware`, which supplies
/// the caller.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(limiter) = &state.rate_limiter {
        let user = request
            .extensions()
            .get::<CurrentUser>()
            .ok_or_else(|| AppError::Unauthorized("Missing identity".to_string()))?;
        limiter.check(&user.id)?;
    }

    Ok(next.run(request).await)
}
