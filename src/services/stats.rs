use crate::db::Database;
use crate::error::Result;
use crate::models::DedupStats;

/// Deduplication savings over live state
pub struct StatsAggregator;

impl StatsAggregator {
    /// Both totals come from one statement, so they describe the same snapshot.
    pub async fn compute_stats(db: &Database) -> Result<DedupStats> {
        let (original_bytes, deduped_bytes): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COALESCE(SUM(o.size_bytes), 0)
                   FROM user_files f
                   JOIN file_objects o ON o.id = f.file_object_id) AS original_bytes,
                (SELECT COALESCE(SUM(o.size_bytes), 0)
                   FROM file_objects o
                  WHERE EXISTS (SELECT 1 FROM user_files f WHERE f.file_object_id = o.id)) AS deduped_bytes
            "#,
        )
        .fetch_one(db.pool())
        .await?;

        let stats = DedupStats::from_totals(original_bytes, deduped_bytes);
        tracing::debug!(
            original_bytes = stats.original_bytes,
            deduped_bytes = stats.total_deduped_bytes,
            saved_percent = stats.saved_percent,
            "Computed dedup stats"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_user, test_db};

    async fn object(db: &Database, id: &str, size: i64, refs: i64) {
        sqlx::query(
            "INSERT INTO file_objects (id, hash, storage_path, size_bytes, mime_type, ref_count, created_at) VALUES (?, ?, ?, ?, 'text/plain', ?, datetime('now'))",
        )
        .bind(id)
        .bind(format!("hash-{}", id))
        .bind(format!("p/{}", id))
        .bind(size)
        .bind(refs)
        .execute(db.pool())
        .await
        .unwrap();
    }

    async fn handle(db: &Database, id: &str, user: &str, object_id: &str) {
        sqlx::query(
            "INSERT INTO user_files (id, user_id, file_object_id, filename, visibility, uploaded_at) VALUES (?, ?, ?, 'f', 'private', datetime('now'))",
        )
        .bind(id)
        .bind(user)
        .bind(object_id)
        .execute(db.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_empty_store() {
        let (db, _dir) = test_db().await;
        let stats = StatsAggregator::compute_stats(&db).await.unwrap();
        assert_eq!(stats, DedupStats::from_totals(0, 0));
    }

    #[tokio::test]
    async fn test_counts_per_reference_and_per_object() {
        let (db, _dir) = test_db().await;
        insert_user(&db, "a", "user").await;
        insert_user(&db, "b", "user").await;

        object(&db, "o1", 2, 2).await;
        object(&db, "o2", 10, 1).await;
        handle(&db, "h1", "a", "o1").await;
        handle(&db, "h2", "b", "o1").await;
        handle(&db, "h3", "a", "o2").await;

        let stats = StatsAggregator::compute_stats(&db).await.unwrap();
        assert_eq!(stats.original_bytes, 14);
        assert_eq!(stats.total_deduped_bytes, 12);
        assert_eq!(stats.saved_bytes, 2);
    }

    #[tokio::test]
    async fn test_unreferenced_objects_are_not_counted() {
        let (db, _dir) = test_db().await;
        object(&db, "pending", 1000, 0).await;

        let stats = StatsAggregator::compute_stats(&db).await.unwrap();
        assert_eq!(stats.total_deduped_bytes, 0);
        assert_eq!(stats.saved_percent, 0.0);
    }
}
