//! Recording session orchestration: at most one active session per camera,
//! open-ended or time-bounded, backed by the external media server.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::camera::CameraRegistry;
use crate::clock::Clock;
use crate::config::{RecordingConfig, RecordingFormat};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::health::HealthState;
use crate::mediamtx::MediaBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordingState {
    Starting,
    Recording,
    Stopping,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    User,
    Timer,
    Error,
    Shutdown,
}

pub struct RecordingSession {
    pub session_id: String,
    pub camera_id: String,
    pub started_at: DateTime<Utc>,
    pub planned_duration: Option<Duration>,
    pub format: RecordingFormat,
    pub output_file_path: String,
    pub state: RecordingState,
    pub stop_reason: Option<StopReason>,
    pub error: Option<String>,
    deadline_handle: Option<tokio::task::JoinHandle<()>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordingSessionView {
    pub session_id: String,
    pub camera_id: String,
    pub started_at: DateTime<Utc>,
    pub format: RecordingFormat,
    pub output_file_path: String,
    pub state: RecordingState,
    pub stop_reason: Option<StopReason>,
    pub error: Option<String>,
}

impl RecordingSession {
    fn view(&self) -> RecordingSessionView {
        RecordingSessionView {
            session_id: self.session_id.clone(),
            camera_id: self.camera_id.clone(),
            started_at: self.started_at,
            format: self.format,
            output_file_path: self.output_file_path.clone(),
            state: self.state,
            stop_reason: self.stop_reason,
            error: self.error.clone(),
        }
    }

    fn cancel_deadline(&mut self) {
        if let Some(handle) = self.deadline_handle.take() {
            handle.abort();
        }
    }
}

#[derive(Debug, Default)]
pub struct StartOptions {
    pub duration: Option<Duration>,
    pub format: Option<RecordingFormat>,
}

type CameraSlot = Arc<Mutex<Option<RecordingSession>>>;

/// Orchestrates recording sessions. One non-reentrant lock per camera allows
/// unrelated cameras to start/stop independently; the outer map lock is only
/// held briefly to get-or-insert that per-camera lock.
pub struct RecordingManager {
    slots: RwLock<HashMap<String, CameraSlot>>,
    backend: Arc<dyn MediaBackend>,
    registry: Arc<CameraRegistry>,
    events: EventBus,
    recordings_dir: PathBuf,
    default_format: RecordingFormat,
    stop_settle: Duration,
    clock: Arc<dyn Clock>,
    health: Arc<HealthState>,
    self_ref: std::sync::OnceLock<Arc<RecordingManager>>,
}

impl RecordingManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        registry: Arc<CameraRegistry>,
        events: EventBus,
        recordings_dir: PathBuf,
        config: &RecordingConfig,
        clock: Arc<dyn Clock>,
        health: Arc<HealthState>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            slots: RwLock::new(HashMap::new()),
            backend,
            registry,
            events,
            recordings_dir,
            default_format: config.default_format,
            stop_settle: Duration::from_secs(config.stop_settle_secs),
            clock,
            health,
            self_ref: std::sync::OnceLock::new(),
        });
        let _ = manager.self_ref.set(manager.clone());
        manager
    }

    async fn slot_for(&self, camera_id: &str) -> CameraSlot {
        if let Some(slot) = self.slots.read().await.get(camera_id) {
            return slot.clone();
        }
        let mut slots = self.slots.write().await;
        slots
            .entry(camera_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    pub async fn start(&self, camera_id: &str, options: StartOptions) -> Result<RecordingSessionView> {
        let camera = self.registry.get(camera_id).await?;
        if camera.status != crate::camera::CameraStatus::Connected {
            return Err(AppError::InvalidState("CAMERA_NOT_READY".to_string()));
        }

        let slot = self.slot_for(camera_id).await;
        let mut guard = slot.lock().await;
        if let Some(existing) = guard.as_ref() {
            if !matches!(existing.state, RecordingState::Stopped | RecordingState::Failed) {
                return Err(AppError::InvalidState("ALREADY_RECORDING".to_string()));
            }
        }

        let session_id = Uuid::new_v4().to_string();
        let format = options.format.unwrap_or(self.default_format);
        let output_file_path = self.canonical_path(camera_id, format);

        let mut session = RecordingSession {
            session_id: session_id.clone(),
            camera_id: camera_id.to_string(),
            started_at: self.clock.now(),
            planned_duration: options.duration,
            format,
            output_file_path: output_file_path.clone(),
            state: RecordingState::Starting,
            stop_reason: None,
            error: None,
            deadline_handle: None,
        };

        match self.backend.create_path(camera_id, &output_file_path).await {
            Ok(()) => {
                session.state = RecordingState::Recording;
                self.registry.set_path_ready(camera_id, true).await;
                self.publish(&session);

                if let Some(duration) = options.duration {
                    let manager = self.self_ref.get().expect("self_ref set in new()").clone();
                    let camera_id_owned = camera_id.to_string();
                    let handle = tokio::spawn(async move {
                        tokio::time::sleep(duration).await;
                        let _ = manager.stop(&camera_id_owned, StopReason::Timer).await;
                    });
                    session.deadline_handle = Some(handle);
                }
            }
            Err(e) => {
                self.health.metrics.record_downstream_failure();
                session.state = RecordingState::Failed;
                session.error = Some(e.to_string());
                self.publish(&session);
                *guard = Some(session);
                return Err(AppError::DependencyFailed(e.to_string()));
            }
        }

        let view = session.view();
        *guard = Some(session);
        Ok(view)
    }

    pub async fn stop(&self, camera_id: &str, reason: StopReason) -> Result<RecordingSessionView> {
        let slot = self.slot_for(camera_id).await;
        let mut guard = slot.lock().await;

        let Some(session) = guard.as_mut() else {
            return Err(AppError::InvalidState("NO_ACTIVE_SESSION".to_string()));
        };
        if matches!(session.state, RecordingState::Stopped | RecordingState::Failed) {
            return Err(AppError::InvalidState("NO_ACTIVE_SESSION".to_string()));
        }

        session.cancel_deadline();
        session.state = RecordingState::Stopping;

        let outcome = tokio::time::timeout(self.stop_settle, self.backend.delete_path(camera_id)).await;

        match outcome {
            Ok(Ok(())) => {
                session.state = RecordingState::Stopped;
                session.stop_reason = Some(reason);
            }
            Ok(Err(e)) => {
                self.health.metrics.record_downstream_failure();
                session.state = RecordingState::Failed;
                session.stop_reason = Some(StopReason::Error);
                session.error = Some(e.to_string());
            }
            Err(_) => {
                self.health.metrics.record_downstream_failure();
                session.state = RecordingState::Failed;
                session.stop_reason = Some(StopReason::Error);
                session.error = Some("timed out waiting for mediamtx to stop recording".to_string());
            }
        }

        self.registry.set_path_ready(camera_id, false).await;
        self.publish(session);
        let view = session.view();
        *guard = None;
        Ok(view)
    }

    /// Fails the camera's active session (if any) with `media_backend_lost`,
    /// cancelling its deadline task. Called when MediaMTX stops reporting a
    /// ready path for a camera whose device is still present, i.e. the
    /// failure is on the backend side, not a device disconnect.
    pub async fn mark_backend_lost(&self, camera_id: &str) {
        let slot = self.slot_for(camera_id).await;
        let mut guard = slot.lock().await;

        let Some(session) = guard.as_mut() else { return };
        if matches!(session.state, RecordingState::Stopped | RecordingState::Failed) {
            return;
        }

        session.cancel_deadline();
        session.state = RecordingState::Failed;
        session.stop_reason = Some(StopReason::Error);
        session.error = Some("media_backend_lost".to_string());
        self.health.metrics.record_downstream_failure();
        self.publish(session);
        *guard = None;
    }

    pub async fn get(&self, camera_id: &str) -> Result<RecordingSessionView> {
        let slot = self.slot_for(camera_id).await;
        let guard = slot.lock().await;
        guard
            .as_ref()
            .map(RecordingSession::view)
            .ok_or_else(|| AppError::NotFound(format!("no recording session for {camera_id}")))
    }

    pub async fn list_active(&self) -> Vec<RecordingSessionView> {
        let slots = self.slots.read().await;
        let mut active = Vec::new();
        for slot in slots.values() {
            if let Some(session) = slot.lock().await.as_ref() {
                if !matches!(session.state, RecordingState::Stopped | RecordingState::Failed) {
                    active.push(session.view());
                }
            }
        }
        active
    }

    /// Stop every active session with `stop_reason = shutdown`; called during
    /// orderly process shutdown.
    pub async fn shutdown_all(&self) {
        let camera_ids: Vec<String> = self.slots.read().await.keys().cloned().collect();
        for camera_id in camera_ids {
            let _ = self.stop(&camera_id, StopReason::Shutdown).await;
        }
    }

    fn canonical_path(&self, camera_id: &str, format: RecordingFormat) -> String {
        let timestamp = self.clock.now().format("%Y-%m-%dT%H-%M-%SZ");
        let filename = format!("{camera_id}_{timestamp}.{}", format.extension());
        self.recordings_dir.join(filename).to_string_lossy().to_string()
    }

    fn publish(&self, session: &RecordingSession) {
        self.events.publish(SystemEvent::RecordingStatusUpdate {
            camera_id: session.camera_id.clone(),
            session_id: session.session_id.clone(),
            state: format!("{:?}", session.state).to_uppercase(),
            stop_reason: session.stop_reason.map(|r| format!("{r:?}").to_lowercase()),
            error: session.error.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraRegistry;
    use crate::mediamtx::fake::FakeMediaBackend;
    use std::time::Duration as StdDuration;

    async fn connected_registry(camera_id: &str) -> Arc<CameraRegistry> {
        let registry = Arc::new(CameraRegistry::new(EventBus::new(16), StdDuration::from_secs(10), StdDuration::from_millis(0)));
        registry.set_device_present(camera_id, "/dev/video0", true).await;
        registry.set_path_ready(camera_id, true).await;
        registry
    }

    fn manager(backend: Arc<dyn MediaBackend>, registry: Arc<CameraRegistry>) -> Arc<RecordingManager> {
        manager_with_health(backend, registry, Arc::new(crate::health::HealthState::default()))
    }

    fn manager_with_health(backend: Arc<dyn MediaBackend>, registry: Arc<CameraRegistry>, health: Arc<crate::health::HealthState>) -> Arc<RecordingManager> {
        RecordingManager::new(
            backend,
            registry,
            EventBus::new(16),
            PathBuf::from("/tmp/recordings"),
            &RecordingConfig::default(),
            Arc::new(crate::clock::SystemClock),
            health,
        )
    }

    #[tokio::test]
    async fn start_then_stop_reaches_stopped() {
        let registry = connected_registry("camera0").await;
        let backend = Arc::new(FakeMediaBackend::always_ready());
        let mgr = manager(backend, registry);

        let started = mgr.start("camera0", StartOptions::default()).await.unwrap();
        assert_eq!(started.state, RecordingState::Recording);

        let stopped = mgr.stop("camera0", StopReason::User).await.unwrap();
        assert_eq!(stopped.state, RecordingState::Stopped);
    }

    #[tokio::test]
    async fn double_stop_yields_no_active_session() {
        let registry = connected_registry("camera0").await;
        let backend = Arc::new(FakeMediaBackend::always_ready());
        let mgr = manager(backend, registry);

        mgr.start("camera0", StartOptions::default()).await.unwrap();
        mgr.stop("camera0", StopReason::User).await.unwrap();
        let second = mgr.stop("camera0", StopReason::User).await;
        assert!(matches!(second, Err(AppError::InvalidState(reason)) if reason == "NO_ACTIVE_SESSION"));
    }

    #[tokio::test]
    async fn concurrent_start_is_rejected() {
        let registry = connected_registry("camera0").await;
        let backend = Arc::new(FakeMediaBackend::always_ready());
        let mgr = manager(backend, registry);

        mgr.start("camera0", StartOptions::default()).await.unwrap();
        let second = mgr.start("camera0", StartOptions::default()).await;
        assert!(matches!(second, Err(AppError::InvalidState(reason)) if reason == "ALREADY_RECORDING"));
    }

    #[tokio::test]
    async fn dependency_failure_surfaces_as_dependency_failed() {
        let registry = connected_registry("camera0").await;
        let backend = Arc::new(FakeMediaBackend::failing(1));
        let mgr = manager(backend, registry);

        let result = mgr.start("camera0", StartOptions::default()).await;
        assert!(matches!(result, Err(AppError::DependencyFailed(_))));
    }

    #[tokio::test]
    async fn dependency_failure_is_reflected_in_health_metrics() {
        let registry = connected_registry("camera0").await;
        let backend = Arc::new(FakeMediaBackend::failing(1));
        let health = Arc::new(crate::health::HealthState::default());
        let mgr = manager_with_health(backend, registry, health.clone());

        let _ = mgr.start("camera0", StartOptions::default()).await;
        assert_eq!(health.metrics.snapshot().downstream_failures, 1);
    }

    #[tokio::test]
    async fn backend_lost_fails_active_session_and_cancels_deadline() {
        let registry = connected_registry("camera0").await;
        let backend = Arc::new(FakeMediaBackend::always_ready());
        let health = Arc::new(crate::health::HealthState::default());
        let mgr = manager_with_health(backend, registry, health.clone());

        mgr.start(
            "camera0",
            StartOptions { duration: Some(StdDuration::from_millis(20)), format: None },
        )
        .await
        .unwrap();

        mgr.mark_backend_lost("camera0").await;
        let err = mgr.get("camera0").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(health.metrics.snapshot().downstream_failures, 1);

        // The deadline task was cancelled, so waiting past the planned duration
        // must not resurrect the (already-cleared) session via its timer stop.
        tokio::time::sleep(StdDuration::from_millis(40)).await;
        assert!(mgr.get("camera0").await.is_err());
    }

    #[tokio::test]
    async fn backend_lost_on_idle_camera_is_a_no_op() {
        let registry = connected_registry("camera0").await;
        let backend = Arc::new(FakeMediaBackend::always_ready());
        let mgr = manager(backend, registry);

        mgr.mark_backend_lost("camera0").await;
        assert!(mgr.get("camera0").await.is_err());
    }

    #[tokio::test]
    async fn time_bounded_recording_stops_itself() {
        let registry = connected_registry("camera0").await;
        let backend = Arc::new(FakeMediaBackend::always_ready());
        let mgr = manager(backend, registry);

        mgr.start(
            "camera0",
            StartOptions { duration: Some(StdDuration::from_millis(20)), format: None },
        )
        .await
        .unwrap();

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        let session = mgr.get("camera0").await.unwrap();
        assert_eq!(session.state, RecordingState::Stopped);
        assert_eq!(session.stop_reason, Some(StopReason::Timer));
    }
}
