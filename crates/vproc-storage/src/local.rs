//! Local filesystem storage client.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};
use vproc_models::VideoId;

use crate::error::{StorageError, StorageResult};

/// File name suffix of processed assets.
pub const PROCESSED_SUFFIX: &str = "_processed.mp4";

/// Configuration for local storage.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory of raw uploads
    pub upload_dir: PathBuf,
    /// Root directory of processed assets
    pub processed_dir: PathBuf,
    /// Public URL prefix of the upload root
    pub base_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./uploads"),
            processed_dir: PathBuf::from("./processed"),
            base_url: "http://localhost:8080/uploads".to_string(),
        }
    }
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            upload_dir: std::env::var("UPLOAD_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            processed_dir: std::env::var("PROCESSED_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.processed_dir),
            base_url: std::env::var("STORAGE_BASE_URL").unwrap_or(defaults.base_url),
        }
    }
}

/// Storage rooted at two local directories.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    upload_dir: PathBuf,
    processed_dir: PathBuf,
    base_url: String,
}

impl LocalStorage {
    /// Create a new storage client from configuration.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            upload_dir: clean_path(&config.upload_dir),
            processed_dir: clean_path(&config.processed_dir),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self::new(StorageConfig::from_env())
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    /// Resolve an upload reference to a path under the upload root.
    ///
    /// References are cleaned lexically. `..` components are rejected and
    /// absolute references must already point inside the upload root.
    pub fn full_path(&self, reference: &str) -> StorageResult<PathBuf> {
        if reference.trim().is_empty() {
            return Err(StorageError::invalid_path(reference));
        }

        let path = Path::new(reference);
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(StorageError::invalid_path(reference));
        }

        let cleaned = clean_path(path);
        if cleaned.is_absolute() {
            return if cleaned.starts_with(&self.upload_dir) {
                Ok(cleaned)
            } else {
                Err(StorageError::invalid_path(reference))
            };
        }

        if cleaned.as_os_str().is_empty() {
            return Err(StorageError::invalid_path(reference));
        }

        Ok(self.upload_dir.join(cleaned))
    }

    /// Public URL of a stored upload.
    pub fn file_url(&self, reference: &str) -> String {
        format!("{}/{}", self.base_url, reference.trim_start_matches('/'))
    }

    /// Write `data` at `reference`, creating parent directories.
    ///
    /// Returns the public URL of the stored file.
    pub async fn save_file(&self, reference: &str, data: &[u8]) -> StorageResult<String> {
        let path = self.full_path(reference)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;

        debug!("Saved {} bytes to {}", data.len(), path.display());
        Ok(self.file_url(reference))
    }

    /// Delete the upload at `reference`.
    pub async fn delete_file(&self, reference: &str) -> StorageResult<()> {
        let path = self.full_path(reference)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|source| StorageError::DeleteFailed {
                path: path.clone(),
                source,
            })?;

        info!("Deleted {}", path.display());
        Ok(())
    }

    /// Destination of the processed asset for `video_id`.
    pub fn processed_destination(&self, video_id: &VideoId) -> PathBuf {
        self.processed_dir
            .join(format!("{}{}", video_id.as_str(), PROCESSED_SUFFIX))
    }

    /// Path of an existing processed asset.
    pub async fn processed_file_path(&self, video_id: &VideoId) -> StorageResult<PathBuf> {
        let path = self.processed_destination(video_id);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(StorageError::NotFound(path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Lexically normalize a path, dropping `.` components.
fn clean_path(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
