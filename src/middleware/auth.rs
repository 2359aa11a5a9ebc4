use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::services::{AuthService, UserService};
use crate::AppState;

/// Authentication middleware
/// Validates the bearer JWT and mirrors the caller into the users table
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = AuthService::bearer_token(auth_header)?;
    let claims = AuthService::validate_token(token, &state.config.auth.jwt_secret)?;

    let current_user = UserService::sync_identity(&state.db, &claims).await?;

    // Insert current user into request extensions
    request.extensions_mut().insert(current_user);

    Ok(next.run(request).await)
}
