use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The upload byte stream failed mid-read. Retryable by the client.
    #[error("Upload stream error: {0}")]
    StreamRead(String),

    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Gone: {0}")]
    Gone(String),

    /// A reference count would have gone negative, or an object with live
    /// references was about to be removed. Never recovered from.
    #[error("Reference count invariant violated: {0}")]
    ReferenceCountInvariant(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Seconds a client should wait before retrying a 429 or 503
const RETRY_AFTER_SECS: u32 = 1;

impl AppError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::StreamRead(_)
            | AppError::Storage(_)
            | AppError::Io(_)
            | AppError::TooManyRequests(_) => true,
            AppError::Database(e) => is_contention(e),
            _ => false,
        }
    }
}

/// Lock contention or pool exhaustion rather than a bad query
fn is_contention(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            // Primary codes SQLITE_BUSY and SQLITE_LOCKED
            .map(|code| matches!(code & 0xff, 5 | 6))
            .unwrap_or(false),
        _ => false,
    }
}

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Set on failures the client may retry unchanged
    #[serde(skip_serializing_if = "is_false")]
    pub retryable: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
            retryable: false,
        }
    }

    pub fn success_message(message: &str) -> ApiResponse<()> {
        ApiResponse {
            code: 0,
            message: message.to_string(),
            data: None,
            retryable: false,
        }
    }

    pub fn error(code: i32, message: &str, retryable: bool) -> ApiResponse<()> {
        ApiResponse {
            code,
            message: message.to_string(),
            data: None,
            retryable,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retryable = self.is_retryable();
        let (status, code, message) = match &self {
            AppError::Database(e) if retryable => {
                tracing::warn!("Database busy: {:?}", e);
                (StatusCode::SERVICE_UNAVAILABLE, 503, "Database busy".to_string())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "Database error".to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, 404, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, 401, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, 403, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, 400, msg.clone()),
            AppError::StreamRead(msg) => {
                tracing::warn!("Upload stream error: {}", msg);
                (StatusCode::BAD_REQUEST, 400, msg.clone())
            }
            AppError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, 429, msg.clone()),
            AppError::QuotaExceeded(msg) => (StatusCode::PAYLOAD_TOO_LARGE, 413, msg.clone()),
            AppError::Gone(msg) => (StatusCode::GONE, 410, msg.clone()),
            AppError::ReferenceCountInvariant(msg) => {
                tracing::error!("Reference count invariant violated: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    500,
                    "Internal consistency error".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, msg.clone())
            }
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, 503, msg.clone())
            }
            AppError::Jwt(e) => {
                tracing::warn!("JWT error: {:?}", e);
                (StatusCode::UNAUTHORIZED, 401, "Invalid token".to_string())
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "IO error".to_string())
            }
        };

        let body = Json(ApiResponse::<()>::error(code, &message, retryable));
        let mut response = (status, body).into_response();
        if matches!(status, StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, RETRY_AFTER_SECS.into());
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
