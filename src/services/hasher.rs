//! Streaming content identification.
//!
//! Upload bytes are hashed with SHA-256 while being written to a staging
//! file, so the digest is known by the time the last chunk lands and the
//! body never has to sit in memory.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Incremental SHA-256 over a byte stream
#[derive(Default)]
pub struct ContentHasher {
    hasher: Sha256,
    size: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
    }

    /// Bytes consumed so far
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Lowercase hex digest, 64 characters
    pub fn finalize(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Hash an in-memory buffer
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = ContentHasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Upload bytes written to the staging area, with their digest.
///
/// Dropping it removes the staging file, so an upload abandoned at any
/// await point (client gone, request cancelled) leaves nothing in `tmp/`.
#[derive(Debug)]
pub struct StagedUpload {
    pub hash: String,
    pub size: u64,
    pub path: PathBuf,
    released: bool,
}

impl StagedUpload {
    /// Remove the staging file if it is still there
    pub async fn discard(mut self) {
        match fs::remove_file(&self.path).await {
            Ok(()) => tracing::debug!("Discarded staged upload {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove staged upload {:?}: {}", self.path, e),
        }
        self.released = true;
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Already moved into the blob store when the content was new
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed abandoned staged upload {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove staged upload {:?}: {}", self.path, e),
        }
    }
}

/// Drain `stream` into a new file under `staging_dir`, hashing as it goes.
///
/// A stream error aborts with [`AppError::StreamRead`] and leaves nothing
/// behind.
pub async fn stage_stream<S, E>(staging_dir: &Path, stream: S) -> Result<StagedUpload>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Display,
{
    fs::create_dir_all(staging_dir).await?;
    let path = staging_dir.join(format!("upload-{}", Uuid::new_v4()));

    let mut file = fs::File::create(&path)
        .await
        .map_err(|e| AppError::Storage(format!("Failed to create staging file: {}", e)))?;

    let mut hasher = ContentHasher::new();
    futures::pin_mut!(stream);

    let copied: Result<()> = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AppError::StreamRead(format!("Failed to read upload: {}", e)))?;
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| AppError::Storage(format!("Failed to write staging file: {}", e)))?;
        }
        file.flush()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to flush staging file: {}", e)))?;
        Ok(())
    }
    .await;
    drop(file);

    if let Err(e) = copied {
        let _ = fs::remove_file(&path).await;
        return Err(e);
    }

    let size = hasher.size();
    Ok(StagedUpload {
        hash: hasher.finalize(),
        size,
        path,
        released: false,
    })
}
