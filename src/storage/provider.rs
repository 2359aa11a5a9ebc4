use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Streamed blob contents
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Blob storage backend. Keys are relative, `/`-separated paths.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Move a fully written local file into storage under `path`
    async fn put_file(&self, path: &str, local_path: &Path) -> Result<()>;

    /// Open a blob as a byte stream
    async fn open(&self, path: &str) -> Result<ByteStream>;

    /// Delete a blob. Deleting a missing blob is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// List every stored blob key
    async fn list(&self) -> Result<Vec<String>>;

    /// Directory for in-flight uploads, on the same filesystem as the blobs
    fn staging_dir(&self) -> PathBuf;

    /// Get the storage type name
    fn storage_type(&self) -> &'static str;
}
