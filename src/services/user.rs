use crate::db::{now_timestamp, Database};
use crate::error::Result;
use crate::models::{Claims, CurrentUser, User, UserRole};

/// Local mirror of externally managed users
pub struct UserService;

impl UserService {
    pub async fn find_user(db: &Database, user_id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(db.pool())
            .await?;
        Ok(user)
    }

    /// Record the identity carried by verified claims and return it as the
    /// request's caller. Email and role follow the latest token.
    ///
    /// Only a new or changed identity writes; an unchanged one is a plain
    /// read and never waits on an upload or delete transaction.
    pub async fn sync_identity(db: &Database, claims: &Claims) -> Result<CurrentUser> {
        let role = UserRole::from_str(&claims.role);
        let current = CurrentUser {
            id: claims.sub.clone(),
            email: claims.email.clone(),
            role: role.clone(),
        };

        if let Some(user) = Self::find_user(db, &claims.sub).await? {
            if user.email == claims.email && user.get_role() == role {
                return Ok(current);
            }
        }

        let now = now_timestamp();
        sqlx::query(
            r#"
            INSERT INTO users (id, email, role, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                role = excluded.role,
                updated_at = excluded.updated_at
            WHERE users.email != excluded.email OR users.role != excluded.role
            "#,
        )
        .bind(&claims.sub)
        .bind(&claims.email)
        .bind(role.as_str())
        .bind(&now)
        .bind(&now)
        .execute(db.pool())
        .await?;

        tracing::debug!(user_id = %claims.sub, "Synced identity");
        Ok(current)
    }
}
