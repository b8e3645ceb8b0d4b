use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("File too large")]
    TooLarge { size: usize, limit: usize },

    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("File not found")]
    NotFound,

    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoredObject {
    pub name: String,
    pub url: String,
}

/// Blob storage for uploaded photos.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under a generated unique name that keeps the extension
    /// of `original_name`.
    async fn put(&self, original_name: &str, bytes: &[u8]) -> Result<StoredObject, StoreError>;

    async fn get(&self, name: &str) -> Result<Vec<u8>, StoreError>;
}

pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: String,
    max_bytes: usize,
}

impl LocalObjectStore {
    pub fn new(root: PathBuf, public_base_url: impl Into<String>, max_bytes: usize) -> Self {
        Self {
            root,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            max_bytes,
        }
    }

    fn public_url(&self, name: &str) -> String {
        format!("{}/{}", self.public_base_url, name)
    }
}

/// Lowercased alphanumeric extension of a client-supplied file name.
pub fn extension_of(original_name: &str) -> Option<String> {
    let (_, ext) = original_name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Stored names are generated, so anything else is rejected before touching disk.
fn is_stored_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, original_name: &str, bytes: &[u8]) -> Result<StoredObject, StoreError> {
        if bytes.len() > self.max_bytes {
            return Err(StoreError::TooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }

        let id = uuid::Uuid::now_v7();
        let name = match extension_of(original_name) {
            Some(ext) => format!("{}.{}", id, ext),
            None => id.to_string(),
        };

        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.root.join(&name), bytes).await?;
        tracing::info!("Stored upload {} ({} bytes)", name, bytes.len());

        Ok(StoredObject {
            url: self.public_url(&name),
            name,
        })
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        if !is_stored_name(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        match tokio::fs::read(self.root.join(name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}
