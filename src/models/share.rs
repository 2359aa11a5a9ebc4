use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Share model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Share {
    pub id: String,
    pub user_file_id: String,
    pub public_link: String,
    pub expires_at: Option<String>,
    pub download_count: i64,
    pub created_at: String,
}

impl Share {
    /// Expired when `expires_at` is set and in the past. An unparseable
    /// timestamp counts as expired.
    pub fn is_expired(&self) -> bool {
        Self::expiry_passed(self.expires_at.as_deref())
    }

    pub fn expiry_passed(expires_at: Option<&str>) -> bool {
        match expires_at {
            None => false,
            Some(ts) => chrono::DateTime::parse_from_rfc3339(ts)
                .map(|t| t < chrono::Utc::now())
                .unwrap_or(true),
        }
    }
}

/// Request to create a share
#[derive(Debug, Deserialize)]
pub struct CreateShareRequest {
    pub user_file_id: String,
    pub expires_at: Option<String>,
}

/// Share item for listing (includes file name)
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ShareListItem {
    pub id: String,
    pub user_file_id: String,
    pub filename: String,
    pub public_link: String,
    pub expires_at: Option<String>,
    pub download_count: i64,
    pub created_at: String,
    #[sqlx(skip)]
    pub is_expired: bool,
}

/// Public share info (safe to return to anyone with the link)
#[derive(Debug, Serialize)]
pub struct PublicShareInfo {
    pub public_link: String,
    pub filename: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub expires_at: Option<String>,
    pub download_count: i64,
    pub created_at: String,
}
