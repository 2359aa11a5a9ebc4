use serde::Serialize;
use sqlx::FromRow;

/// Canonical stored object - one per distinct content hash
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FileObject {
    pub id: String,
    pub hash: String,
    #[serde(skip_serializing)]
    pub storage_path: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub ref_count: i64,
    pub created_at: String,
}

/// Outcome of a find-or-create lookup on the object store
#[derive(Debug, Clone)]
pub enum FindOrCreate {
    /// A new record was inserted with `ref_count = 0`
    Created(FileObject),
    /// The hash was already known
    Found(FileObject),
}

impl FindOrCreate {
    pub fn object(&self) -> &FileObject {
        match self {
            FindOrCreate::Created(o) | FindOrCreate::Found(o) => o,
        }
    }

    pub fn into_object(self) -> FileObject {
        match self {
            FindOrCreate::Created(o) | FindOrCreate::Found(o) => o,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, FindOrCreate::Created(_))
    }
}
