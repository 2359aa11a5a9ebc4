use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Result;

/// Timestamp format for every stored time column. Fixed-width UTC, so text
/// comparison in SQL orders the same as time.
pub fn format_timestamp(t: chrono::DateTime<chrono::Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(chrono::Utc::now())
}

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(path: &str, max_connections: u32) -> Result<Self> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // WAL lets list/stats readers see a consistent snapshot without
        // blocking the upload/delete writers; the busy timeout serialises writers.
        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        // Mirror of the external identity provider's users
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL DEFAULT '',
                role TEXT NOT NULL DEFAULT 'user',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // One row per distinct content hash
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_objects (
                id TEXT PRIMARY KEY,
                hash TEXT NOT NULL UNIQUE,
                storage_path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                mime_type TEXT NOT NULL,
                ref_count INTEGER NOT NULL DEFAULT 0 CHECK (ref_count >= 0),
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // One row per upload event
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_files (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                file_object_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                visibility TEXT NOT NULL DEFAULT 'private' CHECK (visibility IN ('private', 'public')),
                uploaded_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (file_object_id) REFERENCES file_objects(id) ON DELETE RESTRICT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS shares (
                id TEXT PRIMARY KEY,
                user_file_id TEXT NOT NULL,
                public_link TEXT NOT NULL UNIQUE,
                expires_at TEXT,
                download_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_file_id) REFERENCES user_files(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Create indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_user_files_user_id ON user_files(user_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_user_files_file_object_id ON user_files(file_object_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_user_files_uploaded_at ON user_files(uploaded_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_shares_user_file_id ON shares(user_file_id)")
            .execute(&self.pool)
            .await?;

        tracing::info!("Database migrations completed");
        Ok(())
    }
}
