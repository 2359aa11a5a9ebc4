//! Content-addressed object persistence.
//!
//! One `file_objects` row and one blob per distinct SHA-256. Reference
//! counts live on the row but are never touched here; see [`DedupEngine`].
//!
//! [`DedupEngine`]: crate::services::DedupEngine

use sqlx::SqliteConnection;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use uuid::Uuid;

use crate::db::{now_timestamp, Database};
use crate::error::{AppError, Result};
use crate::models::{FileObject, FindOrCreate};
use crate::services::hasher::StagedUpload;
use crate::storage::{ByteStream, StorageProvider};

/// What a startup sweep removed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub orphan_blobs: usize,
    pub stale_uploads: usize,
    pub missing_blobs: usize,
}

/// A blob moved into storage by [`ObjectStore::find_or_create`] whose row
/// is not committed yet.
///
/// Dropped while armed, it schedules the blob's removal, so a rolled back or
/// cancelled upload does not leave the blob behind until the next sweep.
pub struct PendingBlob {
    store: ObjectStore,
    object: Option<FileObject>,
}

impl PendingBlob {
    /// The row committed; keep the blob
    pub fn disarm(mut self) {
        self.object = None;
    }

    /// Remove the blob now
    pub async fn release(mut self) {
        if let Some(object) = self.object.take() {
            if let Err(e) = self.store.remove_blob(&object).await {
                tracing::warn!(object_id = %object.id, "Failed to remove uncommitted blob: {}", e);
            }
        }
    }
}

impl Drop for PendingBlob {
    fn drop(&mut self) {
        let Some(object) = self.object.take() else {
            return;
        };
        // The key carries the object id, so a later object for the same hash
        // is never hit by this removal
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = self.store.clone();
                handle.spawn(async move {
                    if let Err(e) = store.remove_blob(&object).await {
                        tracing::warn!(object_id = %object.id, "Failed to remove uncommitted blob: {}", e);
                    }
                });
            }
            Err(_) => tracing::warn!(
                object_id = %object.id,
                "Uncommitted blob left for the startup sweep"
            ),
        }
    }
}

/// Blob store plus the metadata table keyed by content hash
#[derive(Clone)]
pub struct ObjectStore {
    storage: Arc<dyn StorageProvider>,
}

impl ObjectStore {
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self { storage }
    }

    /// Blob key for an object: two levels of hash sharding, then the object id.
    pub fn storage_path_for(hash: &str, object_id: &str) -> String {
        let a = hash.get(0..2).unwrap_or("00");
        let b = hash.get(2..4).unwrap_or("00");
        format!("{}/{}/{}", a, b, object_id)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.storage.staging_dir()
    }

    /// Return the object for `staged.hash`, creating it (with `ref_count = 0`)
    /// if the hash is new.
    ///
    /// Runs on the caller's transaction. On `Created` the staged file has
    /// already been moved into the blob store; the caller holds a
    /// [`ObjectStore::pending_blob`] guard until the transaction commits.
    /// Two callers racing on the same new hash both succeed: the loser's
    /// insert is absorbed by the unique constraint and it reads the winner's row.
    pub async fn find_or_create(
        &self,
        conn: &mut SqliteConnection,
        staged: &StagedUpload,
        mime_type: &str,
    ) -> Result<FindOrCreate> {
        let id = Uuid::new_v4().to_string();
        let storage_path = Self::storage_path_for(&staged.hash, &id);
        let now = now_timestamp();

        let inserted: Option<FileObject> = sqlx::query_as(
            r#"
            INSERT INTO file_objects (id, hash, storage_path, size_bytes, mime_type, ref_count, created_at)
            VALUES (?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT(hash) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&staged.hash)
        .bind(&storage_path)
        .bind(staged.size as i64)
        .bind(mime_type)
        .bind(&now)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(object) = inserted {
            self.storage.put_file(&object.storage_path, &staged.path).await?;
            tracing::info!(
                hash = %object.hash,
                object_id = %object.id,
                size = object.size_bytes,
                "Created file object"
            );
            return Ok(FindOrCreate::Created(object));
        }

        let existing: FileObject = sqlx::query_as("SELECT * FROM file_objects WHERE hash = ?")
            .bind(&staged.hash)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| {
                AppError::Internal(format!("File object for hash {} vanished", staged.hash))
            })?;

        if existing.size_bytes != staged.size as i64 {
            return Err(AppError::Internal(format!(
                "Size mismatch for hash {}: stored {} bytes, uploaded {}",
                staged.hash, existing.size_bytes, staged.size
            )));
        }

        tracing::debug!(hash = %existing.hash, object_id = %existing.id, "Reusing file object");
        Ok(FindOrCreate::Found(existing))
    }

    /// Cleanup guard for the blob behind `found`, armed only when it was created
    pub fn pending_blob(&self, found: &FindOrCreate) -> PendingBlob {
        PendingBlob {
            store: self.clone(),
            object: found.is_created().then(|| found.object().clone()),
        }
    }

    pub async fn find_by_hash(&self, db: &Database, hash: &str) -> Result<Option<FileObject>> {
        let object = sqlx::query_as("SELECT * FROM file_objects WHERE hash = ?")
            .bind(hash)
            .fetch_optional(db.pool())
            .await?;
        Ok(object)
    }

    /// Delete the metadata row, but only while its count is exactly zero.
    ///
    /// Returns the removed row, or `None` when the object is absent or still
    /// referenced. The blob is left for [`ObjectStore::remove_blob`] once the
    /// surrounding transaction has committed.
    pub async fn delete_record(
        &self,
        conn: &mut SqliteConnection,
        object_id: &str,
    ) -> Result<Option<FileObject>> {
        let removed = sqlx::query_as(
            "DELETE FROM file_objects WHERE id = ? AND ref_count = 0 RETURNING *",
        )
        .bind(object_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(removed)
    }

    /// Physically remove an object's blob. Missing blobs are fine.
    pub async fn remove_blob(&self, object: &FileObject) -> Result<()> {
        self.storage.delete(&object.storage_path).await?;
        tracing::info!(hash = %object.hash, object_id = %object.id, "Removed blob");
        Ok(())
    }

    /// Stream the content stored under `hash`
    pub async fn get(&self, db: &Database, hash: &str) -> Result<(FileObject, ByteStream)> {
        let object = self
            .find_by_hash(db, hash)
            .await?
            .ok_or_else(|| AppError::NotFound("File object not found".to_string()))?;
        let stream = self.open(&object).await?;
        Ok((object, stream))
    }

    pub async fn open(&self, object: &FileObject) -> Result<ByteStream> {
        self.storage.open(&object.storage_path).await
    }

    /// Reconcile the blob store with the metadata table.
    ///
    /// Removes blobs that no row points at (left by a crash between commit
    /// and blob removal) and abandoned staging files. Must run before the
    /// server accepts uploads.
    pub async fn sweep_orphans(&self, db: &Database) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        let known: HashSet<String> = sqlx::query_scalar::<_, String>("SELECT storage_path FROM file_objects")
            .fetch_all(db.pool())
            .await?
            .into_iter()
            .collect();

        let keys = self.storage.list().await?;
        let stored: HashSet<&str> = keys.iter().map(String::as_str).collect();

        for key in &keys {
            if !known.contains(key) {
                tracing::warn!("Removing orphaned blob {}", key);
                self.storage.delete(key).await?;
                report.orphan_blobs += 1;
            }
        }

        for path in &known {
            if !stored.contains(path.as_str()) {
                tracing::error!("File object blob missing from storage: {}", path);
                report.missing_blobs += 1;
            }
        }

        let staging = self.staging_dir();
        match fs::read_dir(&staging).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    if entry.file_type().await?.is_file() {
                        fs::remove_file(entry.path()).await?;
                        report.stale_uploads += 1;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            orphan_blobs = report.orphan_blobs,
            stale_uploads = report.stale_uploads,
            missing_blobs = report.missing_blobs,
            "Blob store sweep finished"
        );
        Ok(report)
    }
}
