//! Media storage behind the opaque blob-store contract.
//!
//! The dispatcher uploads media *before* writing any message row; an
//! upload failure aborts the whole send, so the store must never partially
//! persist. The default [`DiskMediaStore`] keeps uploads on the local
//! filesystem under a folder per media kind.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Empty media payload")]
    Empty,

    #[error("Media too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Media storage error: {0}")]
    Storage(String),
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedMedia {
    /// Addressable location of the stored blob.
    pub url: String,
    pub size_bytes: i64,
    /// Seconds; only known for containers the store can probe. The disk
    /// store cannot, so it reports `None`.
    pub duration_secs: Option<f64>,
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store `data` and return its address. Must either fully persist or
    /// fail without leaving anything behind.
    async fn upload(
        &self,
        data: &[u8],
        mime_type: &str,
        folder: &str,
    ) -> Result<UploadedMedia, MediaError>;
}

/// Broad media category derived from a MIME type, used for the storage
/// folder and the message's attachment kind.
pub fn media_kind(mime_type: &str) -> &'static str {
    if mime_type.eq_ignore_ascii_case("image/gif") {
        "gif"
    } else if mime_type.starts_with("image/") {
        "image"
    } else if mime_type.starts_with("video/") {
        "video"
    } else if mime_type.starts_with("audio/") {
        "voice"
    } else {
        "file"
    }
}

/// Filesystem-backed media store.
#[derive(Debug, Clone)]
pub struct DiskMediaStore {
    base_path: PathBuf,
    max_size: usize,
}

impl DiskMediaStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, MediaError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            MediaError::Storage(format!(
                "Failed to create media directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Media store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn base_path(&self) -> &std::path::Path {
        &self.base_path
    }
}

#[async_trait]
impl MediaStore for DiskMediaStore {
    async fn upload(
        &self,
        data: &[u8],
        mime_type: &str,
        folder: &str,
    ) -> Result<UploadedMedia, MediaError> {
        if data.is_empty() {
            return Err(MediaError::Empty);
        }
        if data.len() > self.max_size {
            return Err(MediaError::TooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }
        // Folder names come from media_kind(), but hold the line against
        // anything path-like slipping through.
        if !folder
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
            || folder.is_empty()
        {
            return Err(MediaError::Storage(format!("Invalid folder name: {folder}")));
        }

        let dir = self.base_path.join(folder);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| MediaError::Storage(format!("Failed to create folder {folder}: {e}")))?;

        let id = Uuid::new_v4();
        let path = dir.join(id.to_string());

        fs::write(&path, data)
            .await
            .map_err(|e| MediaError::Storage(format!("Failed to write media {id}: {e}")))?;

        debug!(id = %id, kind = folder, mime = mime_type, size = data.len(), "Stored media");

        Ok(UploadedMedia {
            url: format!("media/{folder}/{id}"),
            size_bytes: data.len() as i64,
            duration_secs: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (DiskMediaStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = DiskMediaStore::new(dir.path().to_path_buf(), 1024 * 1024)
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_upload_and_read_back() {
        let (store, dir) = test_store().await;

        let uploaded = store.upload(b"fake-jpeg-bytes", "image/jpeg", "image").await.unwrap();
        assert!(uploaded.url.starts_with("media/image/"));
        assert_eq!(uploaded.size_bytes, 15);

        let id = uploaded.url.rsplit('/').next().unwrap();
        let on_disk = std::fs::read(dir.path().join("image").join(id)).unwrap();
        assert_eq!(on_disk, b"fake-jpeg-bytes");
    }

    #[tokio::test]
    async fn test_empty_upload_rejected() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.upload(b"", "image/png", "image").await,
            Err(MediaError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected() {
        let dir = TempDir::new().unwrap();
        let store = DiskMediaStore::new(dir.path().to_path_buf(), 8).await.unwrap();

        assert!(matches!(
            store.upload(b"way too many bytes", "image/png", "image").await,
            Err(MediaError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_path_like_folder_rejected() {
        let (store, _dir) = test_store().await;
        assert!(store.upload(b"data", "image/png", "../escape").await.is_err());
        assert!(store.upload(b"data", "image/png", "").await.is_err());
    }

    #[test]
    fn test_media_kind_mapping() {
        assert_eq!(media_kind("image/png"), "image");
        assert_eq!(media_kind("image/gif"), "gif");
        assert_eq!(media_kind("video/mp4"), "video");
        assert_eq!(media_kind("audio/ogg"), "voice");
        assert_eq!(media_kind("application/pdf"), "file");
    }
}
