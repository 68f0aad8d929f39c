//! Single-shot image capture, grounded on the Recording Manager's per-camera
//! locking and canonical-filename conventions but serialized by a semaphore
//! rather than a mutex, since concurrent snapshots of the same camera queue
//! rather than conflict outright.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, Semaphore};
use uuid::Uuid;

use crate::camera::CameraRegistry;
use crate::clock::Clock;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::mediamtx::MediaBackend;
use crate::storage::FileStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    Jpeg,
    Png,
}

impl Default for SnapshotFormat {
    fn default() -> Self {
        SnapshotFormat::Jpeg
    }
}

impl SnapshotFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SnapshotFormat::Jpeg => "jpg",
            SnapshotFormat::Png => "png",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SnapshotStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotResult {
    pub request_id: String,
    pub camera_id: String,
    pub requested_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub file_path: Option<String>,
    pub format: SnapshotFormat,
    pub quality: u8,
    pub status: SnapshotStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions {
    pub filename: Option<String>,
    pub format: Option<SnapshotFormat>,
    pub quality: Option<u8>,
}

pub struct SnapshotManager {
    backend: Arc<dyn MediaBackend>,
    registry: Arc<CameraRegistry>,
    events: EventBus,
    files: Arc<dyn FileStore>,
    snapshots_dir: PathBuf,
    clock: Arc<dyn Clock>,
    per_camera: RwLock<HashMap<String, Arc<Semaphore>>>,
    transient_path_timeout: Duration,
}

impl SnapshotManager {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        registry: Arc<CameraRegistry>,
        events: EventBus,
        files: Arc<dyn FileStore>,
        snapshots_dir: PathBuf,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            registry,
            events,
            files,
            snapshots_dir,
            clock,
            per_camera: RwLock::new(HashMap::new()),
            transient_path_timeout: Duration::from_secs(3),
        }
    }

    async fn semaphore_for(&self, camera_id: &str) -> Arc<Semaphore> {
        if let Some(sem) = self.per_camera.read().await.get(camera_id) {
            return sem.clone();
        }
        let mut map = self.per_camera.write().await;
        map.entry(camera_id.to_string()).or_insert_with(|| Arc::new(Semaphore::new(1))).clone()
    }

    pub async fn take(&self, camera_id: &str, options: SnapshotOptions) -> Result<SnapshotResult> {
        if let Some(quality) = options.quality {
            if quality == 0 || quality > 100 {
                return Err(AppError::InvalidParams("quality must be in 1..=100".to_string()));
            }
        }

        let camera = self.registry.get(camera_id).await?;
        if camera.status != crate::camera::CameraStatus::Connected {
            return Err(AppError::InvalidState("CAMERA_NOT_READY".to_string()));
        }

        let semaphore = self.semaphore_for(camera_id).await;
        let _permit = semaphore.acquire().await.map_err(|_| AppError::Internal("snapshot semaphore closed".to_string()))?;

        let request_id = Uuid::new_v4().to_string();
        let requested_at = self.clock.now();
        let format = options.format.unwrap_or_default();
        let quality = options.quality.unwrap_or(85);
        let filename = options.filename.unwrap_or_else(|| self.canonical_filename(camera_id, format));
        let file_path = self.snapshots_dir.join(&filename);

        let result = self.capture_and_write(camera_id, camera.path_ready, &file_path).await;

        let snapshot_result = match result {
            Ok(()) => SnapshotResult {
                request_id: request_id.clone(),
                camera_id: camera_id.to_string(),
                requested_at,
                completed_at: self.clock.now(),
                file_path: Some(file_path.to_string_lossy().to_string()),
                format,
                quality,
                status: SnapshotStatus::Success,
                error: None,
            },
            Err(e) => SnapshotResult {
                request_id: request_id.clone(),
                camera_id: camera_id.to_string(),
                requested_at,
                completed_at: self.clock.now(),
                file_path: None,
                format,
                quality,
                status: SnapshotStatus::Failed,
                error: Some(e.to_string()),
            },
        };

        self.events.publish(SystemEvent::SnapshotTaken {
            camera_id: camera_id.to_string(),
            request_id,
            status: format!("{:?}", snapshot_result.status).to_uppercase(),
            file_path: snapshot_result.file_path.clone(),
            error: snapshot_result.error.clone(),
        });

        Ok(snapshot_result)
    }

    /// Captures a frame, creating a transient MediaMTX path first if the camera
    /// has no ready path, and tearing the transient path down afterwards.
    async fn capture_and_write(&self, camera_id: &str, path_already_ready: bool, file_path: &std::path::Path) -> Result<()> {
        let transient = !path_already_ready;
        if transient {
            tokio::time::timeout(self.transient_path_timeout, self.backend.create_path(camera_id, camera_id))
                .await
                .map_err(|_| AppError::DependencyFailed("timed out creating transient path".to_string()))??;
        }

        let capture = self.backend.snapshot(camera_id).await;

        if transient {
            let _ = self.backend.delete_path(camera_id).await;
        }

        let bytes = capture?;
        tokio::fs::write(file_path, &bytes).await?;
        if let Some(parent) = file_path.parent() {
            self.files.fsync_dir(parent).await?;
        }
        Ok(())
    }

    fn canonical_filename(&self, camera_id: &str, format: SnapshotFormat) -> String {
        let timestamp = self.clock.now().format("%Y-%m-%dT%H-%M-%SZ");
        format!("{camera_id}_{timestamp}.{}", format.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::mediamtx::fake::FakeMediaBackend;
    use crate::storage::fake::FakeFileStore;
    use std::time::Duration as StdDuration;

    fn new_manager(dir: PathBuf) -> SnapshotManager {
        let events = EventBus::new(16);
        let registry = Arc::new(CameraRegistry::new(events.clone(), StdDuration::from_secs(10), StdDuration::from_secs(2)));
        SnapshotManager::new(
            Arc::new(FakeMediaBackend::always_ready()),
            registry,
            events,
            Arc::new(FakeFileStore::default()),
            dir,
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn rejects_invalid_quality() {
        let dir = tempfile::tempdir().unwrap();
        let manager = new_manager(dir.path().to_path_buf());
        manager.registry.set_device_present("camera0", "/dev/video0", true).await;
        manager.registry.set_path_ready("camera0", true).await;

        let err = manager
            .take("camera0", SnapshotOptions { quality: Some(0), ..Default::default() })
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidParams);
    }

    #[tokio::test]
    async fn rejects_disconnected_camera() {
        let dir = tempfile::tempdir().unwrap();
        let manager = new_manager(dir.path().to_path_buf());
        let err = manager.take("camera0", SnapshotOptions::default()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn successful_capture_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = new_manager(dir.path().to_path_buf());
        manager.registry.set_device_present("camera0", "/dev/video0", true).await;
        manager.registry.set_path_ready("camera0", true).await;

        let result = manager.take("camera0", SnapshotOptions::default()).await.unwrap();
        assert_eq!(result.status, SnapshotStatus::Success);
        let path = result.file_path.unwrap();
        assert!(tokio::fs::metadata(&path).await.unwrap().len() > 0);
    }
}
