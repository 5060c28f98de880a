use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};
use tourbook_media::PublicUrlMapper;

use crate::error::ServerError;

/// Key-addressed image storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key` and return the public URL.
    async fn put(&self, bytes: Vec<u8>, key: &str, content_type: &str) -> Result<String, ServerError>;

    /// Remove `key`. Missing objects are not an error.
    async fn delete(&self, key: &str) -> Result<(), ServerError>;

    /// Remove every key, logging individual failures. Returns how many
    /// objects were actually removed.
    async fn delete_many(&self, keys: &[String]) -> Result<usize, ServerError>;
}

/// Resolve `key` below `base`, refusing anything that could escape it.
fn resolve_key(base: &Path, key: &str) -> Result<PathBuf, ServerError> {
    let traversal = || ServerError::BadRequest("Path traversal detected".to_string());
    if key.is_empty() || key.contains('\\') || key.contains("://") {
        return Err(traversal());
    }

    let mut resolved = base.to_path_buf();
    for component in Path::new(key).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return Err(traversal()),
        }
    }
    if resolved == base || !resolved.starts_with(base) {
        return Err(traversal());
    }
    Ok(resolved)
}

/// [`ObjectStore`] on the local filesystem. The directory is also served
/// statically, so the public URL of a key is `{public_base}/{key}`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    base_path: PathBuf,
    urls: PublicUrlMapper,
}

impl FsObjectStore {
    pub async fn new(base_path: PathBuf, urls: PublicUrlMapper) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::Storage(format!(
                "Failed to create storage directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;
        let base_path = base_path.canonicalize().unwrap_or(base_path);

        info!(path = %base_path.display(), public_base = urls.public_base(), "Object store initialized");

        Ok(Self { base_path, urls })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, bytes: Vec<u8>, key: &str, content_type: &str) -> Result<String, ServerError> {
        let path = resolve_key(&self.base_path, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ServerError::Storage(format!("Failed to create {}: {}", parent.display(), e)))?;
        }

        let size = bytes.len();
        fs::write(&path, bytes)
            .await
            .map_err(|e| ServerError::Storage(format!("Failed to write {key}: {e}")))?;

        debug!(key, size, content_type, "Stored object");
        Ok(self.urls.to_url(key))
    }

    async fn delete(&self, key: &str) -> Result<(), ServerError> {
        let path = resolve_key(&self.base_path, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, "Deleted object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ServerError::Storage(format!("Failed to delete {key}: {e}"))),
        }
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, ServerError> {
        let mut deleted = 0;
        for key in keys {
            let Ok(path) = resolve_key(&self.base_path, key) else {
                warn!(key = %key, "Skipping delete of key outside the store");
                continue;
            };
            match fs::remove_file(&path).await {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(key = %key, error = %e, "Failed to delete object"),
            }
        }
        info!(requested = keys.len(), deleted, "Deleted objects");
        Ok(deleted)
    }
}
