//! Enumerates the recordings and snapshots directories as the durable record of
//! produced media; the catalog has no database, it derives listings from
//! directory contents through the `FileStore` seam.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{AppError, Result};
use crate::storage::{join_checked, sanitize_filename, FileStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Recording,
    Snapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub filename: String,
    pub category: FileCategory,
    pub size_bytes: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub download_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileListing {
    pub files: Vec<FileEntry>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

/// Hand-rolled match for `^camera[0-9]+_\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}Z\.(mp4|mkv|fmp4|jpg|png)$`;
/// no pack crate pulls in a regex engine for a single fixed-shape pattern.
fn is_canonical_filename(name: &str) -> bool {
    let Some(rest) = name.strip_prefix("camera") else { return false };
    let Some(underscore) = rest.find('_') else { return false };
    let (digits, rest) = rest.split_at(underscore);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let rest = &rest[1..]; // skip '_'

    let Some((timestamp, ext)) = rest.rsplit_once('.') else { return false };
    if !matches!(ext, "mp4" | "mkv" | "fmp4" | "jpg" | "png") {
        return false;
    }

    // timestamp shape: YYYY-MM-DDThh-mm-ssZ (exactly 20 bytes)
    let bytes = timestamp.as_bytes();
    if bytes.len() != 20 {
        return false;
    }
    let digit = |i: usize| bytes[i].is_ascii_digit();
    (0..4).all(digit)
        && bytes[4] == b'-'
        && (5..7).all(digit)
        && bytes[7] == b'-'
        && (8..10).all(digit)
        && bytes[10] == b'T'
        && (11..13).all(digit)
        && bytes[13] == b'-'
        && (14..16).all(digit)
        && bytes[16] == b'-'
        && (17..19).all(digit)
        && bytes[19] == b'Z'
}

pub struct FileCatalog {
    files: Arc<dyn FileStore>,
    recordings_dir: PathBuf,
    snapshots_dir: PathBuf,
}

impl FileCatalog {
    pub fn new(files: Arc<dyn FileStore>, recordings_dir: PathBuf, snapshots_dir: PathBuf) -> Self {
        Self { files, recordings_dir, snapshots_dir }
    }

    pub async fn list_recordings(&self, limit: usize, offset: usize) -> Result<FileListing> {
        self.list(&self.recordings_dir, FileCategory::Recording, limit, offset).await
    }

    pub async fn list_snapshots(&self, limit: usize, offset: usize) -> Result<FileListing> {
        self.list(&self.snapshots_dir, FileCategory::Snapshot, limit, offset).await
    }

    async fn list(&self, dir: &std::path::Path, category: FileCategory, limit: usize, offset: usize) -> Result<FileListing> {
        let mut entries = self.files.list_dir(dir).await?;
        entries.sort_by(|a, b| b.modified_at.cmp(&a.modified_at).then_with(|| a.file_name.cmp(&b.file_name)));

        let total = entries.len();
        let page: Vec<FileEntry> = entries
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|info| FileEntry {
                download_url: download_url(category, &info.file_name),
                filename: info.file_name,
                category,
                size_bytes: info.size_bytes,
                created_at: info.modified_at,
            })
            .collect();

        let has_more = offset + page.len() < total;
        Ok(FileListing { files: page, total, offset, limit, has_more })
    }

    pub async fn get_info(&self, filename: &str) -> Result<FileEntry> {
        let (category, dir) = self.categorize(filename)?;
        let path = join_checked(dir, filename)?;
        let info = self.files.metadata(&path).await?;
        Ok(FileEntry {
            download_url: download_url(category, filename),
            filename: info.file_name,
            category,
            size_bytes: info.size_bytes,
            created_at: info.modified_at,
        })
    }

    /// Deletes `filename`, refusing if it doesn't belong to `expected` — so
    /// `delete_recording` can't be used to remove a snapshot and vice versa.
    pub async fn delete(&self, filename: &str, expected: FileCategory) -> Result<()> {
        sanitize_filename(filename)?;
        if !is_canonical_filename(filename) {
            return Err(AppError::InvalidParams(format!("not a canonical media filename: {filename}")));
        }
        let (category, dir) = self.categorize(filename)?;
        if category != expected {
            return Err(AppError::NotFound(format!("no such file: {filename}")));
        }
        let path = dir.join(filename);
        self.files.remove_file(&path).await
    }

    fn categorize(&self, filename: &str) -> Result<(FileCategory, &std::path::Path)> {
        sanitize_filename(filename)?;
        match filename.rsplit('.').next() {
            Some("jpg") | Some("png") => Ok((FileCategory::Snapshot, self.snapshots_dir.as_path())),
            Some("mp4") | Some("mkv") | Some("fmp4") => Ok((FileCategory::Recording, self.recordings_dir.as_path())),
            _ => Err(AppError::InvalidParams(format!("unrecognized file extension: {filename}"))),
        }
    }
}

fn download_url(category: FileCategory, filename: &str) -> String {
    let segment = match category {
        FileCategory::Recording => "recordings",
        FileCategory::Snapshot => "snapshots",
    };
    format!("/files/{segment}/{filename}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fake::FakeFileStore;
    use crate::storage::DirEntryInfo;

    fn catalog_with(entries: Vec<(PathBuf, DirEntryInfo)>) -> (FileCatalog, PathBuf, PathBuf) {
        let recordings = PathBuf::from("/data/recordings");
        let snapshots = PathBuf::from("/data/snapshots");
        let store = FakeFileStore::default();
        {
            let mut files = store.files.lock().unwrap();
            for (path, info) in entries {
                files.insert(path, info);
            }
        }
        (FileCatalog::new(Arc::new(store), recordings.clone(), snapshots.clone()), recordings, snapshots)
    }

    #[tokio::test]
    async fn lists_recordings_newest_first() {
        let now = chrono::Utc::now();
        let (catalog, recordings, _) = catalog_with(vec![
            (
                recordings.join("camera0_2024-01-01T00-00-00Z.mp4"),
                DirEntryInfo { file_name: "camera0_2024-01-01T00-00-00Z.mp4".to_string(), size_bytes: 10, modified_at: now - chrono::Duration::seconds(10) },
            ),
            (
                recordings.join("camera0_2024-01-01T00-05-00Z.mp4"),
                DirEntryInfo { file_name: "camera0_2024-01-01T00-05-00Z.mp4".to_string(), size_bytes: 20, modified_at: now },
            ),
        ]);

        let listing = catalog.list_recordings(10, 0).await.unwrap();
        assert_eq!(listing.total, 2);
        assert_eq!(listing.files[0].filename, "camera0_2024-01-01T00-05-00Z.mp4");
        assert!(!listing.has_more);
    }

    #[tokio::test]
    async fn delete_rejects_non_canonical_filename() {
        let (catalog, _, _) = catalog_with(vec![]);
        let err = catalog.delete("../../etc/passwd", FileCategory::Recording).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidParams);

        let err = catalog.delete("not-canonical.mp4", FileCategory::Recording).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidParams);
    }

    #[tokio::test]
    async fn delete_rejects_category_mismatch() {
        let now = chrono::Utc::now();
        let (catalog, recordings, _) = catalog_with(vec![(
            recordings.join("camera0_2024-01-01T00-00-00Z.mp4"),
            DirEntryInfo { file_name: "camera0_2024-01-01T00-00-00Z.mp4".to_string(), size_bytes: 10, modified_at: now },
        )]);

        let err = catalog.delete("camera0_2024-01-01T00-00-00Z.mp4", FileCategory::Snapshot).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn get_info_on_missing_file_is_not_found() {
        let (catalog, _, _) = catalog_with(vec![]);
        let err = catalog.get_info("camera0_2024-01-01T00-00-00Z.mp4").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
