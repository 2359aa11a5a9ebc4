use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{FileObject, UserSummary};

/// Handle visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Public => "public",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "private" => Some(Visibility::Private),
            "public" => Some(Visibility::Public),
            _ => None,
        }
    }
}

/// Joined handle + object row, the shape every read query selects
#[derive(Debug, Clone, FromRow)]
pub struct HandleRow {
    pub handle_id: String,
    pub user_id: String,
    pub filename: String,
    pub visibility: String,
    pub uploaded_at: String,
    pub object_id: String,
    pub hash: String,
    pub storage_path: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub ref_count: i64,
    pub object_created_at: String,
}

impl HandleRow {
    pub fn get_visibility(&self) -> Visibility {
        Visibility::parse(&self.visibility).unwrap_or_default()
    }

    /// Bytes this handle avoided storing thanks to the other references
    pub fn storage_saved_bytes(&self) -> i64 {
        self.size_bytes * (self.ref_count - 1).max(0)
    }

    pub fn to_file_object(&self) -> FileObject {
        FileObject {
            id: self.object_id.clone(),
            hash: self.hash.clone(),
            storage_path: self.storage_path.clone(),
            size_bytes: self.size_bytes,
            mime_type: self.mime_type.clone(),
            ref_count: self.ref_count,
            created_at: self.object_created_at.clone(),
        }
    }

    pub fn object_summary(&self) -> ObjectSummary {
        ObjectSummary {
            id: self.object_id.clone(),
            hash: self.hash.clone(),
            size_bytes: self.size_bytes,
            ref_count: self.ref_count,
            mime_type: self.mime_type.clone(),
            created_at: self.object_created_at.clone(),
        }
    }
}

/// Result of a successful upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub handle_id: String,
    pub object_id: String,
    pub filename: String,
    pub hash: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub ref_count: i64,
}

/// Caller's own file listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileListItem {
    pub handle_id: String,
    pub object_id: String,
    pub filename: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub ref_count: i64,
    pub storage_saved_bytes: i64,
}

impl From<HandleRow> for FileListItem {
    fn from(row: HandleRow) -> Self {
        let storage_saved_bytes = row.storage_saved_bytes();
        Self {
            handle_id: row.handle_id,
            object_id: row.object_id,
            filename: row.filename,
            size_bytes: row.size_bytes,
            mime_type: row.mime_type,
            ref_count: row.ref_count,
            storage_saved_bytes,
        }
    }
}

/// Object fields exposed to clients (no storage path)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub id: String,
    pub hash: String,
    pub size_bytes: i64,
    pub ref_count: i64,
    pub mime_type: String,
    pub created_at: String,
}

/// Single handle detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDetail {
    pub handle_id: String,
    pub filename: String,
    pub visibility: Visibility,
    pub uploaded_at: String,
    pub object: ObjectSummary,
}

impl From<HandleRow> for FileDetail {
    fn from(row: HandleRow) -> Self {
        Self {
            object: row.object_summary(),
            visibility: row.get_visibility(),
            handle_id: row.handle_id,
            filename: row.filename,
            uploaded_at: row.uploaded_at,
        }
    }
}

/// Admin listing entry
#[derive(Debug, Clone, Serialize)]
pub struct AdminFileItem {
    pub handle_id: String,
    pub filename: String,
    pub visibility: Visibility,
    pub uploaded_at: String,
    pub user: UserSummary,
    pub object: ObjectSummary,
}

/// Caller's listing page
#[derive(Debug, Clone, Serialize)]
pub struct FilePage {
    pub total_count: i64,
    pub items: Vec<FileListItem>,
}

/// Admin listing page
#[derive(Debug, Clone, Serialize)]
pub struct AdminFilePage {
    pub total_count: i64,
    pub items: Vec<AdminFileItem>,
}

/// Pagination query parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 500;

    /// Clamped (limit, offset)
    pub fn resolve(&self) -> (i64, i64) {
        let limit = self
            .limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

/// File list filter query parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileFilter {
    /// Case-insensitive filename substring
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    /// RFC 3339 lower bound on upload time
    pub uploaded_from: Option<String>,
    /// RFC 3339 upper bound on upload time
    pub uploaded_to: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(size: i64, refs: i64) -> HandleRow {
        HandleRow {
            handle_id: "h".into(),
            user_id: "u".into(),
            filename: "a.txt".into(),
            visibility: "public".into(),
            uploaded_at: "2024-01-01T00:00:00Z".into(),
            object_id: "o".into(),
            hash: "abc".into(),
            storage_path: "ab/c/o".into(),
            size_bytes: size,
            mime_type: "text/plain".into(),
            ref_count: refs,
            object_created_at: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_storage_saved_bytes() {
        assert_eq!(row(100, 1).storage_saved_bytes(), 0);
        assert_eq!(row(100, 3).storage_saved_bytes(), 200);
        assert_eq!(FileListItem::from(row(2, 2)).storage_saved_bytes, 2);
    }

    #[test]
    fn test_visibility_parse() {
        assert_eq!(Visibility::parse(""), Some(Visibility::Private));
        assert_eq!(Visibility::parse("PUBLIC"), Some(Visibility::Public));
        assert_eq!(Visibility::parse("friends"), None);
        assert_eq!(FileDetail::from(row(1, 1)).visibility, Visibility::Public);
    }

    #[test]
    fn test_pagination_clamp() {
        assert_eq!(Pagination::default().resolve(), (50, 0));
        let p = Pagination {
            limit: Some(10_000),
            offset: Some(-4),
        };
        assert_eq!(p.resolve(), (500, 0));
        let p = Pagination {
            limit: Some(0),
            offset: Some(20),
        };
        assert_eq!(p.resolve(), (1, 20));
    }
}
