use rand::Rng;
use uuid::Uuid;

use crate::db::{format_timestamp, now_timestamp, Database};
use crate::error::{AppError, Result};
use crate::models::{CreateShareRequest, HandleRow, PublicShareInfo, Share, ShareListItem};
use crate::services::dedup::handle_select;

const LINK_ATTEMPTS: usize = 5;

pub struct ShareService;

impl ShareService {
    /// Create a public link to one of the caller's handles
    pub async fn create_share(db: &Database, user_id: &str, req: CreateShareRequest) -> Result<Share> {
        let owner: Option<String> = sqlx::query_scalar("SELECT user_id FROM user_files WHERE id = ?")
            .bind(&req.user_file_id)
            .fetch_optional(db.pool())
            .await?;

        let owner = owner.ok_or_else(|| AppError::NotFound("File not found".to_string()))?;
        if owner != user_id {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }

        let expires_at = match req.expires_at.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(raw) => {
                let expiry = chrono::DateTime::parse_from_rfc3339(raw)
                    .map_err(|_| AppError::BadRequest("Invalid expires_at".to_string()))?
                    .with_timezone(&chrono::Utc);
                if expiry <= chrono::Utc::now() {
                    return Err(AppError::BadRequest("expires_at must be in the future".to_string()));
                }
                Some(format_timestamp(expiry))
            }
            None => None,
        };

        let share_id = Uuid::new_v4().to_string();
        let now = now_timestamp();

        let mut last_error: Option<sqlx::Error> = None;
        for _ in 0..LINK_ATTEMPTS {
            let candidate = hex::encode(rand::thread_rng().gen::<[u8; 16]>());

            let result = sqlx::query(
                r#"
                INSERT INTO shares (id, user_file_id, public_link, expires_at, download_count, created_at)
                VALUES (?, ?, ?, ?, 0, ?)
                "#,
            )
            .bind(&share_id)
            .bind(&req.user_file_id)
            .bind(&candidate)
            .bind(&expires_at)
            .bind(&now)
            .execute(db.pool())
            .await;

            match result {
                Ok(_) => {
                    tracing::info!("Created share {} for handle {}", share_id, req.user_file_id);
                    return Self::get_share(db, &share_id).await;
                }
                Err(sqlx::Error::Database(db_err))
                    if db_err.message().contains("UNIQUE constraint failed: shares.public_link") =>
                {
                    last_error = Some(sqlx::Error::Database(db_err));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Internal(format!(
            "Failed to generate unique share link: {}",
            last_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        )))
    }

    /// Get share by ID
    pub async fn get_share(db: &Database, id: &str) -> Result<Share> {
        sqlx::query_as("SELECT * FROM shares WHERE id = ?")
            .bind(id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("Share not found".to_string()))
    }

    /// Get user's shares with file name for listing
    pub async fn list_user_shares(db: &Database, user_id: &str) -> Result<Vec<ShareListItem>> {
        let mut items: Vec<ShareListItem> = sqlx::query_as(
            r#"
            SELECT
              s.id,
              s.user_file_id,
              f.filename,
              s.public_link,
              s.expires_at,
              s.download_count,
              s.created_at
            FROM shares s
            JOIN user_files f ON s.user_file_id = f.id
            WHERE f.user_id = ?
            ORDER BY s.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(db.pool())
        .await?;

        for item in &mut items {
            item.is_expired = Share::expiry_passed(item.expires_at.as_deref());
        }
        Ok(items)
    }

    /// Delete one of the caller's shares
    pub async fn delete_share(db: &Database, user_id: &str, share_id: &str) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM shares WHERE id = ? AND user_file_id IN (SELECT id FROM user_files WHERE user_id = ?)",
        )
        .bind(share_id)
        .bind(user_id)
        .execute(db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Share not found".to_string()));
        }

        Ok(())
    }

    /// Look up a live share and the handle it points at
    pub async fn resolve_public(db: &Database, link: &str) -> Result<(Share, HandleRow)> {
        let share: Share = sqlx::query_as("SELECT * FROM shares WHERE public_link = ?")
            .bind(link)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("Share not found".to_string()))?;

        if share.is_expired() {
            return Err(AppError::Gone("Share link expired".to_string()));
        }

        let sql = format!("{} WHERE f.id = ?", handle_select());
        let handle: HandleRow = sqlx::query_as(&sql)
            .bind(&share.user_file_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("Share not found".to_string()))?;

        Ok((share, handle))
    }

    /// Get public share info by link (no auth required)
    pub async fn public_info(db: &Database, link: &str) -> Result<PublicShareInfo> {
        let (share, handle) = Self::resolve_public(db, link).await?;

        Ok(PublicShareInfo {
            public_link: share.public_link,
            filename: handle.filename,
            size_bytes: handle.size_bytes,
            mime_type: handle.mime_type,
            expires_at: share.expires_at,
            download_count: share.download_count,
            created_at: share.created_at,
        })
    }

    /// Resolve a link for download and count the download
    pub async fn record_download(db: &Database, link: &str) -> Result<(Share, HandleRow)> {
        let (mut share, handle) = Self::resolve_public(db, link).await?;

        share.download_count = sqlx::query_scalar(
            "UPDATE shares SET download_count = download_count + 1 WHERE id = ? RETURNING download_count",
        )
        .bind(&share.id)
        .fetch_optional(db.pool())
        .await?
        .ok_or_else(|| AppError::NotFound("Share not found".to_string()))?;

        Ok((share, handle))
    }
}
