use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;

use crate::error::{AppError, Result};
use crate::storage::{ByteStream, StorageProvider};

const STAGING_DIR: &str = "tmp";
const READ_CHUNK: usize = 64 * 1024;

/// Local file system storage provider
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn get_full_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path)
    }

    fn not_found_or_storage(path: &str, e: std::io::Error) -> AppError {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::NotFound(format!("Blob not found: {}", path))
        } else {
            AppError::Storage(format!("Failed to read blob: {}", e))
        }
    }

    /// Whether staged uploads reach the blob tree by rename.
    ///
    /// A staging directory on another filesystem makes every new blob a full
    /// copy, taken while the upload's write transaction is open.
    pub async fn staging_renames(&self) -> Result<bool> {
        let staging = self.staging_dir();
        fs::create_dir_all(&staging).await?;

        let name = format!(".rename-check-{}", uuid::Uuid::new_v4());
        let source = staging.join(&name);
        let target = self.base_path.join(&name);
        fs::write(&source, b"").await?;

        let renamed = fs::rename(&source, &target).await.is_ok();
        let _ = fs::remove_file(if renamed { &target } else { &source }).await;
        Ok(renamed)
    }

    /// Remove empty directories between `start` and the base path
    async fn prune_empty_dirs(&self, start: Option<&Path>) -> Result<()> {
        let mut current_dir = start.map(|p| p.to_path_buf());
        while let Some(dir) = current_dir {
            if dir == self.base_path {
                break;
            }
            match fs::read_dir(&dir).await {
                Ok(mut entries) => {
                    if entries.next_entry().await?.is_some() {
                        break; // Not empty
                    }
                    let _ = fs::remove_dir(&dir).await;
                }
                Err(_) => break,
            }
            current_dir = dir.parent().map(|p| p.to_path_buf());
        }
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for LocalStorage {
    async fn put_file(&self, path: &str, local_path: &Path) -> Result<()> {
        let full_path = self.get_full_path(path);

        // Ensure parent directory exists
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        if let Err(rename_err) = fs::rename(local_path, &full_path).await {
            // Cross-device staging dir: copy then drop the source
            tracing::warn!(
                "Rename of staged upload into {:?} failed ({}), copying instead",
                full_path,
                rename_err
            );
            fs::copy(local_path, &full_path)
                .await
                .map_err(|e| AppError::Storage(format!("Failed to store blob: {}", e)))?;
            let _ = fs::remove_file(local_path).await;
        }

        tracing::debug!("Stored blob at {:?}", full_path);
        Ok(())
    }

    async fn open(&self, path: &str) -> Result<ByteStream> {
        let full_path = self.get_full_path(path);
        let file = fs::File::open(&full_path)
            .await
            .map_err(|e| Self::not_found_or_storage(path, e))?;

        let stream = futures::stream::try_unfold(file, |mut file| async move {
            let mut buf = BytesMut::with_capacity(READ_CHUNK);
            let n = file.read_buf(&mut buf).await?;
            if n == 0 {
                Ok::<_, std::io::Error>(None)
            } else {
                Ok(Some((buf.freeze(), file)))
            }
        });

        Ok(stream.boxed())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.get_full_path(path);

        match fs::remove_file(&full_path).await {
            Ok(()) => {
                tracing::debug!("Deleted blob {:?}", full_path);
                self.prune_empty_dirs(full_path.parent()).await?;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(format!("Failed to delete blob: {}", e))),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.base_path.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    if dir == self.base_path && entry.file_name() == STAGING_DIR {
                        continue;
                    }
                    pending.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.base_path) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn staging_dir(&self) -> PathBuf {
        self.base_path.join(STAGING_DIR)
    }

    fn storage_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::TryStreamExt;

    async fn stage(storage: &LocalStorage, data: &[u8]) -> PathBuf {
        let dir = storage.staging_dir();
        fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join(uuid::Uuid::new_v4().to_string());
        fs::write(&path, data).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_put_open_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        let staged = stage(&storage, b"hello blob").await;
        storage.put_file("ab/cd/obj1", &staged).await.unwrap();
        assert!(!staged.exists());
        assert!(dir.path().join("ab/cd/obj1").exists());

        let chunks: Vec<Bytes> = storage.open("ab/cd/obj1").await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"hello blob");

        storage.delete("ab/cd/obj1").await.unwrap();
        assert!(!dir.path().join("ab/cd/obj1").exists());
        // Empty shard directories are pruned
        assert!(!dir.path().join("ab").exists());
    }

    #[tokio::test]
    async fn test_staging_renames_on_same_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        assert!(storage.staging_renames().await.unwrap());
        // The check cleans up after itself
        assert!(storage.list().await.unwrap().is_empty());
        let mut staged = fs::read_dir(storage.staging_dir()).await.unwrap();
        assert!(staged.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.delete("no/such/blob").await.unwrap();
    }

    #[tokio::test]
    async fn test_open_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(matches!(storage.open("zz/zz/none").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_skips_staging() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        let a = stage(&storage, b"a").await;
        let b = stage(&storage, b"b").await;
        storage.put_file("aa/bb/one", &a).await.unwrap();
        storage.put_file("cc/dd/two", &b).await.unwrap();
        stage(&storage, b"in flight").await;

        assert_eq!(storage.list().await.unwrap(), vec!["aa/bb/one", "cc/dd/two"]);
    }
}
