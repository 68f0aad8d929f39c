//! Thin filesystem seam shared by the Recording Manager, Snapshot Manager, and
//! File Catalog, so catalog tests run against a `tempfile::tempdir()` instead of
//! the directories named in `storage.recordings_dir`/`storage.snapshots_dir`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct DirEntryInfo {
    pub file_name: String,
    pub size_bytes: u64,
    pub modified_at: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn list_dir(&self, dir: &Path) -> Result<Vec<DirEntryInfo>>;
    async fn metadata(&self, path: &Path) -> Result<DirEntryInfo>;
    async fn remove_file(&self, path: &Path) -> Result<()>;
    async fn fsync_dir(&self, dir: &Path) -> Result<()>;
}

/// Production implementation backed by `tokio::fs`.
pub struct TokioFileStore;

#[async_trait]
impl FileStore for TokioFileStore {
    async fn list_dir(&self, dir: &Path) -> Result<Vec<DirEntryInfo>> {
        let mut entries = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(AppError::Io(e)),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            let meta = entry.metadata().await?;
            entries.push(DirEntryInfo {
                file_name,
                size_bytes: meta.len(),
                modified_at: meta.modified().map(chrono::DateTime::from).unwrap_or_else(|_| chrono::Utc::now()),
            });
        }
        Ok(entries)
    }

    async fn metadata(&self, path: &Path) -> Result<DirEntryInfo> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|_| AppError::NotFound(format!("file not found: {}", path.display())))?;
        let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        Ok(DirEntryInfo {
            file_name,
            size_bytes: meta.len(),
            modified_at: meta.modified().map(chrono::DateTime::from).unwrap_or_else(|_| chrono::Utc::now()),
        })
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|_| AppError::NotFound(format!("file not found: {}", path.display())))
    }

    async fn fsync_dir(&self, dir: &Path) -> Result<()> {
        let dir = tokio::fs::File::open(dir).await?;
        dir.sync_all().await?;
        Ok(())
    }
}

/// Rejects `..` traversal and empty components; used before any path join with a
/// user-supplied filename (catalog deletes, file-surface downloads).
pub fn sanitize_filename(name: &str) -> Result<&str> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(AppError::InvalidParams(format!("invalid filename: {name}")));
    }
    Ok(name)
}

pub fn join_checked(base: &Path, filename: &str) -> Result<PathBuf> {
    sanitize_filename(filename)?;
    Ok(base.join(filename))
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeFileStore {
        pub files: Mutex<HashMap<PathBuf, DirEntryInfo>>,
    }

    #[async_trait]
    impl FileStore for FakeFileStore {
        async fn list_dir(&self, dir: &Path) -> Result<Vec<DirEntryInfo>> {
            let files = self.files.lock().unwrap();
            Ok(files
                .iter()
                .filter(|(path, _)| path.parent() == Some(dir))
                .map(|(_, info)| info.clone())
                .collect())
        }

        async fn metadata(&self, path: &Path) -> Result<DirEntryInfo> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("file not found: {}", path.display())))
        }

        async fn remove_file(&self, path: &Path) -> Result<()> {
            self.files
                .lock()
                .unwrap()
                .remove(path)
                .map(|_| ())
                .ok_or_else(|| AppError::NotFound(format!("file not found: {}", path.display())))
        }

        async fn fsync_dir(&self, _dir: &Path) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal() {
        assert!(sanitize_filename("../etc/passwd").is_err());
        assert!(sanitize_filename("a/b").is_err());
        assert!(sanitize_filename("camera0_2024-01-01T00-00-00Z.mp4").is_ok());
    }
}
