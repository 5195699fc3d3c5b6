use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },
    #[error("blob not found")]
    NotFound,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Content-addressed store for uploaded image bytes. Blob ids are the
/// SHA-256 of the content plus the original extension, so identical
/// uploads collapse to one file and the mime type survives round-trips.
pub struct BlobStore {
    dir: PathBuf,
    max_bytes: u64,
}

impl BlobStore {
    pub fn new(dir: PathBuf, max_bytes: u64) -> Self {
        Self { dir, max_bytes }
    }

    /// Store `data` and return its blob id. Oversize payloads are refused
    /// before anything touches the disk.
    pub async fn put(&self, data: Bytes, ext: &str) -> Result<String, BlobError> {
        if data.len() as u64 > self.max_bytes {
            return Err(BlobError::PayloadTooLarge {
                limit: self.max_bytes,
            });
        }
        let mut hasher = Sha256::new();
        hasher.update(&data);
        let id = format!("{:x}.{}", hasher.finalize(), ext.to_ascii_lowercase());
        let dir = self.dir.join(&id[..2]);
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(&id), &data).await?;
        Ok(id)
    }

    /// On-disk path for a blob id within the store.
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(&id[..2]).join(id)
    }

    /// Open a blob for streaming, with the mime type resolved from the
    /// id's extension.
    pub async fn open(&self, id: &str) -> Result<(fs::File, String), BlobError> {
        // Ids are hex plus an extension; anything else never names a blob.
        if id.len() < 2 || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
            return Err(BlobError::NotFound);
        }
        let mime = mime_guess::from_path(id).first_or_octet_stream().to_string();
        let file = fs::File::open(self.path_for(id))
            .await
            .map_err(|_| BlobError::NotFound)?;
        Ok((file, mime))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
