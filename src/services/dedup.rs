//! Handles and the reference counts that tie them to stored objects.
//!
//! Every change to `file_objects.ref_count` happens here, in the same
//! transaction as the `user_files` insert or delete that justifies it, and
//! while holding the per-hash lock for the object's content.

use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{format_timestamp, now_timestamp, Database};
use crate::error::{AppError, Result};
use crate::models::{
    AdminFileItem, AdminFilePage, CurrentUser, FileDetail, FileFilter, FileListItem, FileObject, FilePage,
    HandleRow, Pagination, UploadResponse, UserSummary, Visibility,
};
use crate::services::access::AccessController;
use crate::services::hasher::StagedUpload;
use crate::services::locks::HashLocks;
use crate::services::object_store::ObjectStore;
use crate::storage::ByteStream;

/// Columns of [`HandleRow`], over `user_files f` joined to `file_objects o`
pub(crate) const HANDLE_COLUMNS: &str = r#"
    f.id AS handle_id, f.user_id, f.filename, f.visibility, f.uploaded_at,
    o.id AS object_id, o.hash, o.storage_path, o.size_bytes, o.mime_type,
    o.ref_count, o.created_at AS object_created_at
"#;

pub(crate) const HANDLE_FROM: &str =
    "FROM user_files f JOIN file_objects o ON o.id = f.file_object_id";

pub(crate) fn handle_select() -> String {
    format!("SELECT {} {}", HANDLE_COLUMNS, HANDLE_FROM)
}

const MAX_FILENAME_BYTES: usize = 255;

/// Result of removing one handle
#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub handle_id: String,
    pub object_id: String,
    pub remaining_refs: i64,
    pub object_removed: bool,
}

#[derive(sqlx::FromRow)]
struct AdminRow {
    #[sqlx(flatten)]
    handle: HandleRow,
    email: String,
    role: String,
}

struct EngineInner {
    db: Database,
    objects: ObjectStore,
    locks: HashLocks,
    access: AccessController,
    quota_bytes: Option<u64>,
}

/// Reference index over stored objects
#[derive(Clone)]
pub struct DedupEngine {
    inner: Arc<EngineInner>,
}

impl DedupEngine {
    pub fn new(
        db: Database,
        objects: ObjectStore,
        access: AccessController,
        quota_bytes: Option<u64>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                db,
                objects,
                locks: HashLocks::new(),
                access,
                quota_bytes,
            }),
        }
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.inner.objects
    }

    pub fn access(&self) -> &AccessController {
        &self.inner.access
    }

    /// Link a staged upload to its object and create the caller's handle.
    ///
    /// The staging file is always consumed: moved into the blob store when
    /// the content is new, removed otherwise. That holds even when the
    /// returned future is dropped before completion.
    pub async fn register_upload(
        &self,
        owner: &CurrentUser,
        filename: &str,
        visibility: Visibility,
        staged: StagedUpload,
        mime_type: &str,
    ) -> Result<UploadResponse> {
        let result = self
            .register_staged(owner, filename, visibility, &staged, mime_type)
            .await;
        staged.discard().await;
        result
    }

    async fn register_staged(
        &self,
        owner: &CurrentUser,
        filename: &str,
        visibility: Visibility,
        staged: &StagedUpload,
        mime_type: &str,
    ) -> Result<UploadResponse> {
        validate_filename(filename)?;
        self.check_quota(&owner.id, staged).await?;

        let _guard = self.inner.locks.lock(&staged.hash).await;

        // find_or_create opens with an INSERT, so the write lock is taken up front
        let mut tx = self.inner.db.pool().begin().await?;
        let found = self
            .inner
            .objects
            .find_or_create(tx.as_mut(), staged, mime_type)
            .await?;
        let pending = self.inner.objects.pending_blob(&found);

        let linked = async {
            let object = found.object();
            let ref_count: i64 = sqlx::query_scalar(
                "UPDATE file_objects SET ref_count = ref_count + 1 WHERE id = ? RETURNING ref_count",
            )
            .bind(&object.id)
            .fetch_optional(tx.as_mut())
            .await?
            .ok_or_else(|| AppError::Internal(format!("File object {} vanished", object.id)))?;

            let handle_id = Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO user_files (id, user_id, file_object_id, filename, visibility, uploaded_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&handle_id)
            .bind(&owner.id)
            .bind(&object.id)
            .bind(filename)
            .bind(visibility.as_str())
            .bind(now_timestamp())
            .execute(tx.as_mut())
            .await?;

            Ok::<_, AppError>((handle_id, ref_count))
        }
        .await;

        let committed = match linked {
            Ok(ids) => tx.commit().await.map(|_| ids).map_err(AppError::from),
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        };

        let (handle_id, ref_count) = match committed {
            Ok(ids) => {
                pending.disarm();
                ids
            }
            Err(e) => {
                pending.release().await;
                return Err(e);
            }
        };

        let object = found.into_object();
        tracing::info!(
            hash = %object.hash,
            object_id = %object.id,
            handle_id = %handle_id,
            ref_count,
            "Registered upload for user {}",
            owner.id
        );

        Ok(UploadResponse {
            handle_id,
            object_id: object.id,
            filename: filename.to_string(),
            hash: object.hash,
            size_bytes: object.size_bytes,
            mime_type: object.mime_type,
            ref_count,
        })
    }

    /// Remove a handle, releasing its reference. The object and its blob go
    /// away with the last reference.
    pub async fn delete_handle(&self, caller: &CurrentUser, handle_id: &str) -> Result<DeleteOutcome> {
        let handle = self.find_handle(handle_id).await?;
        self.inner.access.authorize_delete(caller, &handle.user_id)?;

        let _guard = self.inner.locks.lock(&handle.hash).await;

        let mut tx = self.inner.db.pool().begin().await?;

        let object_id: String = sqlx::query_scalar(
            "DELETE FROM user_files WHERE id = ? AND user_id = ? RETURNING file_object_id",
        )
        .bind(handle_id)
        .bind(&handle.user_id)
        .fetch_optional(tx.as_mut())
        .await?
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        let remaining: i64 = sqlx::query_scalar(
            "UPDATE file_objects SET ref_count = ref_count - 1 WHERE id = ? AND ref_count > 0 RETURNING ref_count",
        )
        .bind(&object_id)
        .fetch_optional(tx.as_mut())
        .await?
        .ok_or_else(|| {
            AppError::ReferenceCountInvariant(format!(
                "Handle {} referenced object {} with no outstanding references",
                handle_id, object_id
            ))
        })?;

        let removed: Option<FileObject> = if remaining == 0 {
            let object = self
                .inner
                .objects
                .delete_record(tx.as_mut(), &object_id)
                .await?
                .ok_or_else(|| {
                    AppError::ReferenceCountInvariant(format!(
                        "Object {} reached zero references but could not be released",
                        object_id
                    ))
                })?;
            Some(object)
        } else {
            None
        };

        tx.commit().await?;

        tracing::info!(
            hash = %handle.hash,
            object_id = %object_id,
            handle_id = %handle_id,
            ref_count = remaining,
            "Deleted handle"
        );

        if let Some(object) = &removed {
            // Committed already; a leftover blob is picked up by the startup sweep
            if let Err(e) = self.inner.objects.remove_blob(object).await {
                tracing::warn!(object_id = %object.id, "Failed to remove blob: {}", e);
            }
        }

        Ok(DeleteOutcome {
            handle_id: handle_id.to_string(),
            object_id,
            remaining_refs: remaining,
            object_removed: removed.is_some(),
        })
    }

    /// One page of the caller's own handles, newest first, with the number
    /// matching the filter
    pub async fn list_for_user(
        &self,
        user_id: &str,
        filter: &FileFilter,
        pagination: &Pagination,
    ) -> Result<FilePage> {
        let (limit, offset) = pagination.resolve();

        // Count and page read from the same snapshot
        let mut tx = self.inner.db.pool().begin().await?;

        let mut count: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT COUNT(*) {}", HANDLE_FROM));
        count.push(" WHERE f.user_id = ").push_bind(user_id.to_string());
        push_filter(&mut count, filter)?;
        let total_count: i64 = count.build_query_scalar().fetch_one(tx.as_mut()).await?;

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(handle_select());
        query.push(" WHERE f.user_id = ").push_bind(user_id.to_string());
        push_filter(&mut query, filter)?;
        query
            .push(" ORDER BY f.uploaded_at DESC, f.rowid DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows: Vec<HandleRow> = query.build_query_as().fetch_all(tx.as_mut()).await?;

        tx.commit().await?;

        Ok(FilePage {
            total_count,
            items: rows.into_iter().map(FileListItem::from).collect(),
        })
    }

    pub async fn get_handle(&self, caller: &CurrentUser, handle_id: &str) -> Result<FileDetail> {
        let handle = self.find_handle(handle_id).await?;
        self.inner
            .access
            .authorize_read(caller, &handle.user_id, handle.get_visibility())?;
        Ok(FileDetail::from(handle))
    }

    /// Open a handle's content for download. Reference counts are untouched.
    pub async fn open_handle(&self, caller: &CurrentUser, handle_id: &str) -> Result<(HandleRow, ByteStream)> {
        let handle = self.find_handle(handle_id).await?;
        self.inner
            .access
            .authorize_read(caller, &handle.user_id, handle.get_visibility())?;
        let stream = self.inner.objects.open(&handle.to_file_object()).await?;
        Ok((handle, stream))
    }

    /// Every handle across all users, for admins
    pub async fn list_all(&self, caller: &CurrentUser, pagination: &Pagination) -> Result<AdminFilePage> {
        self.inner.access.require_admin(caller)?;
        let (limit, offset) = pagination.resolve();

        // Count and page read from the same snapshot
        let mut tx = self.inner.db.pool().begin().await?;

        let total_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_files")
            .fetch_one(tx.as_mut())
            .await?;

        let sql = format!(
            r#"
            SELECT {}, u.email, u.role
            {}
            JOIN users u ON u.id = f.user_id
            ORDER BY f.uploaded_at DESC, f.rowid DESC
            LIMIT ? OFFSET ?
            "#,
            HANDLE_COLUMNS, HANDLE_FROM
        );
        let rows: Vec<AdminRow> = sqlx::query_as(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(tx.as_mut())
            .await?;

        tx.commit().await?;

        let items = rows
            .into_iter()
            .map(|row| AdminFileItem {
                user: UserSummary {
                    id: row.handle.user_id.clone(),
                    email: row.email,
                    role: row.role,
                },
                object: row.handle.object_summary(),
                visibility: row.handle.get_visibility(),
                handle_id: row.handle.handle_id,
                filename: row.handle.filename,
                uploaded_at: row.handle.uploaded_at,
            })
            .collect();

        Ok(AdminFilePage { total_count, items })
    }

    /// Bytes of distinct objects the user references
    pub async fn usage_for_user(&self, user_id: &str) -> Result<i64> {
        let used: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(o.size_bytes), 0)
            FROM file_objects o
            WHERE EXISTS (SELECT 1 FROM user_files f WHERE f.file_object_id = o.id AND f.user_id = ?)
            "#,
        )
        .bind(user_id)
        .fetch_one(self.inner.db.pool())
        .await?;
        Ok(used)
    }

    async fn find_handle(&self, handle_id: &str) -> Result<HandleRow> {
        let sql = format!("{} WHERE f.id = ?", handle_select());
        sqlx::query_as(&sql)
            .bind(handle_id)
            .fetch_optional(self.inner.db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))
    }

    async fn check_quota(&self, user_id: &str, staged: &StagedUpload) -> Result<()> {
        let Some(quota) = self.inner.quota_bytes else {
            return Ok(());
        };

        let already_held: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM user_files f
                JOIN file_objects o ON o.id = f.file_object_id
                WHERE f.user_id = ? AND o.hash = ?
            )
            "#,
        )
        .bind(user_id)
        .bind(&staged.hash)
        .fetch_one(self.inner.db.pool())
        .await?;

        // Another handle to content the user already holds costs nothing
        let incoming = if already_held { 0 } else { staged.size };
        let used = self.usage_for_user(user_id).await?.max(0) as u64;

        if used + incoming > quota {
            return Err(AppError::QuotaExceeded(format!(
                "Upload of {} bytes exceeds quota ({} of {} bytes used)",
                staged.size, used, quota
            )));
        }
        Ok(())
    }
}

fn validate_filename(filename: &str) -> Result<()> {
    if filename.trim().is_empty()
        || filename.len() > MAX_FILENAME_BYTES
        || filename.contains('/')
        || filename.contains('\\')
    {
        return Err(AppError::BadRequest("Invalid file name".to_string()));
    }
    Ok(())
}

fn parse_bound(name: &str, value: &str) -> Result<String> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|t| format_timestamp(t.with_timezone(&chrono::Utc)))
        .map_err(|_| AppError::BadRequest(format!("Invalid {}: expected RFC 3339 timestamp", name)))
}

fn push_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &FileFilter) -> Result<()> {
    if let Some(name) = filter.filename.as_deref().filter(|s| !s.is_empty()) {
        let escaped = name
            .to_lowercase()
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        query
            .push(" AND LOWER(f.filename) LIKE ")
            .push_bind(format!("%{}%", escaped))
            .push(" ESCAPE '\\'");
    }
    if let Some(mime) = filter.mime_type.as_deref().filter(|s| !s.is_empty()) {
        query.push(" AND o.mime_type = ").push_bind(mime.to_string());
    }
    if let Some(min) = filter.min_size {
        query.push(" AND o.size_bytes >= ").push_bind(min);
    }
    if let Some(max) = filter.max_size {
        query.push(" AND o.size_bytes <= ").push_bind(max);
    }
    if let Some(from) = filter.uploaded_from.as_deref() {
        query
            .push(" AND f.uploaded_at >= ")
            .push_bind(parse_bound("uploaded_from", from)?);
    }
    if let Some(to) = filter.uploaded_to.as_deref() {
        query
            .push(" AND f.uploaded_at <= ")
            .push_bind(parse_bound("uploaded_to", to)?);
    }
    Ok(())
}
