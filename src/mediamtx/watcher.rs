//! Closes the other half of the Camera Registry's merge rule (§4.1): device
//! presence alone is not sufficient for `CONNECTED`, MediaMTX path readiness
//! must be observed continuously, not just at the moments the Recording
//! Manager happens to create or tear down a recording path. Also the place
//! that notices when MediaMTX drops out from under an active recording.
//!
//! Grounded on the same poll-and-diff idiom as [`crate::camera::device_monitor`],
//! applied to `get_path` instead of device enumeration.

use std::sync::Arc;
use std::time::Duration;

use crate::camera::CameraRegistry;
use crate::mediamtx::MediaBackend;
use crate::recording::RecordingManager;

pub struct PathReadinessWatcher {
    backend: Arc<dyn MediaBackend>,
    registry: Arc<CameraRegistry>,
    recording: Arc<RecordingManager>,
    poll_interval: Duration,
}

impl PathReadinessWatcher {
    pub fn new(backend: Arc<dyn MediaBackend>, registry: Arc<CameraRegistry>, recording: Arc<RecordingManager>, poll_interval: Duration) -> Self {
        Self { backend, registry, recording, poll_interval }
    }

    /// Runs until shutdown, polling every present camera's path readiness on
    /// each tick. A camera mid-recording will already have had `path_ready`
    /// set synchronously by the Recording Manager; this poll just keeps that
    /// flag truthful for cameras that are merely streaming, or whose
    /// recording-managed path outlives the session (e.g. a stop that failed).
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => self.poll_once().await,
                _ = shutdown.recv() => {
                    tracing::info!("path readiness watcher stopping");
                    return;
                }
            }
        }
    }

    async fn poll_once(&self) {
        let snapshot = self.registry.list().await;
        for camera in snapshot.cameras {
            if !camera.device_present {
                continue;
            }
            let ready = match self.backend.get_path(&camera.identifier).await {
                Ok(path) => path.ready,
                Err(_) => false,
            };
            self.registry.set_path_ready(&camera.identifier, ready).await;

            // The device is still physically present, so an unready path means
            // MediaMTX lost it, not that the camera went away. Any recording
            // session riding on that path can't continue.
            if !ready {
                self.recording.mark_backend_lost(&camera.identifier).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingConfig;
    use crate::events::EventBus;
    use crate::mediamtx::fake::FakeMediaBackend;
    use crate::recording::StartOptions;
    use std::path::PathBuf;
    use std::time::Duration as StdDuration;
    use tokio::sync::broadcast;

    fn recording_manager(backend: Arc<dyn MediaBackend>, registry: Arc<CameraRegistry>) -> Arc<RecordingManager> {
        RecordingManager::new(
            backend,
            registry,
            EventBus::new(16),
            PathBuf::from("/tmp/recordings"),
            &RecordingConfig::default(),
            Arc::new(crate::clock::SystemClock),
            Arc::new(crate::health::HealthState::default()),
        )
    }

    #[tokio::test]
    async fn poll_marks_present_camera_connected_without_a_recording() {
        let events = EventBus::new(16);
        let registry = Arc::new(CameraRegistry::new(events, StdDuration::from_secs(10), StdDuration::from_millis(0)));
        registry.set_device_present("camera0", "/dev/video0", true).await;
        assert_eq!(registry.get("camera0").await.unwrap().status, crate::camera::CameraStatus::Unknown);

        let backend: Arc<dyn MediaBackend> = Arc::new(FakeMediaBackend::always_ready());
        let recording = recording_manager(backend.clone(), registry.clone());
        let watcher = PathReadinessWatcher::new(backend, registry.clone(), recording, StdDuration::from_millis(10));
        watcher.poll_once().await;

        assert_eq!(registry.get("camera0").await.unwrap().status, crate::camera::CameraStatus::Connected);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let events = EventBus::new(16);
        let registry = Arc::new(CameraRegistry::new(events, StdDuration::from_secs(10), StdDuration::from_millis(0)));
        let backend: Arc<dyn MediaBackend> = Arc::new(FakeMediaBackend::always_ready());
        let recording = recording_manager(backend.clone(), registry.clone());
        let watcher = PathReadinessWatcher::new(backend, registry, recording, StdDuration::from_secs(30));

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { watcher.run(rx).await });
        tx.send(()).unwrap();
        tokio::time::timeout(StdDuration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn poll_fails_active_recording_when_path_goes_unready() {
        let events = EventBus::new(16);
        let registry = Arc::new(CameraRegistry::new(events, StdDuration::from_secs(10), StdDuration::from_millis(0)));
        registry.set_device_present("camera0", "/dev/video0", true).await;
        registry.set_path_ready("camera0", true).await;

        let backend = Arc::new(FakeMediaBackend::always_ready());
        let recording = recording_manager(backend.clone(), registry.clone());
        recording.start("camera0", StartOptions::default()).await.unwrap();

        *backend.ready.lock().unwrap() = false;
        let dyn_backend: Arc<dyn MediaBackend> = backend;
        let watcher = PathReadinessWatcher::new(dyn_backend, registry.clone(), recording.clone(), StdDuration::from_millis(10));
        watcher.poll_once().await;

        let err = recording.get("camera0").await.unwrap_err();
        assert!(matches!(err, crate::error::AppError::NotFound(_)));
        assert_ne!(registry.get("camera0").await.unwrap().status, crate::camera::CameraStatus::Connected);
    }
}
