//! File-system abstraction for destination files.
//!
//! The partial file's on-disk length doubles as the resume cursor, so the
//! whole contract is three operations: measure, append, truncate. No
//! sidecar metadata is written.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::DownloadError;

/// Destination-file operations used by an agent.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Length in bytes of the file at `path`; 0 when it does not exist.
    async fn existing_len(&self, path: &Path) -> Result<u64, DownloadError>;

    /// Append `bytes` at the end of the file, creating it if needed.
    async fn append(&self, path: &Path, bytes: &[u8]) -> Result<(), DownloadError>;

    /// Truncate the file to zero length, creating it if needed.
    async fn truncate(&self, path: &Path) -> Result<(), DownloadError>;
}

/// Storage over the local file system via `tokio::fs`.
pub struct LocalStorage;

impl LocalStorage {
    async fn ensure_parent(path: &Path) -> Result<(), DownloadError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn existing_len(&self, path: &Path) -> Result<u64, DownloadError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    async fn append(&self, path: &Path, bytes: &[u8]) -> Result<(), DownloadError> {
        Self::ensure_parent(path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    async fn truncate(&self, path: &Path) -> Result<(), DownloadError> {
        Self::ensure_parent(path).await?;
        tokio::fs::File::create(path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_has_length_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.bin");
        let len = LocalStorage.existing_len(&path).await.unwrap();
        assert_eq!(len, 0);
    }

    #[tokio::test]
    async fn append_grows_and_truncate_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.bin");

        LocalStorage.append(&path, b"hello").await.unwrap();
        LocalStorage.append(&path, b" world").await.unwrap();
        assert_eq!(LocalStorage.existing_len(&path).await.unwrap(), 11);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");

        LocalStorage.truncate(&path).await.unwrap();
        assert_eq!(LocalStorage.existing_len(&path).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn append_creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/part.bin");
        LocalStorage.append(&path, b"x").await.unwrap();
        assert_eq!(LocalStorage.existing_len(&path).await.unwrap(), 1);
    }
}
