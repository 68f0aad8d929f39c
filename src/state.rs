//! Application-wide state shared across RPC handlers and the HTTP file surface.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::auth::AuthVerifier;
use crate::camera::CameraRegistry;
use crate::catalog::FileCatalog;
use crate::config::ConfigStore;
use crate::events::EventBus;
use crate::health::HealthState;
use crate::mediamtx::MediaBackend;
use crate::recording::RecordingManager;
use crate::snapshot::SnapshotManager;

/// The composition root's single bag of shared handles. Built once in `main`
/// and threaded through as `Arc<AppState>` via `AppState::new(...) -> Arc<Self>`.
pub struct AppState {
    pub config: ConfigStore,
    pub camera_registry: Arc<CameraRegistry>,
    pub recording_manager: Arc<RecordingManager>,
    pub snapshot_manager: Arc<SnapshotManager>,
    pub catalog: Arc<FileCatalog>,
    pub events: EventBus,
    pub auth: Arc<AuthVerifier>,
    pub health: Arc<HealthState>,
    pub mediamtx: Arc<dyn MediaBackend>,
    pub shutdown_tx: broadcast::Sender<()>,
    data_dir: PathBuf,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConfigStore,
        camera_registry: Arc<CameraRegistry>,
        recording_manager: Arc<RecordingManager>,
        snapshot_manager: Arc<SnapshotManager>,
        catalog: Arc<FileCatalog>,
        events: EventBus,
        auth: Arc<AuthVerifier>,
        health: Arc<HealthState>,
        mediamtx: Arc<dyn MediaBackend>,
        shutdown_tx: broadcast::Sender<()>,
        data_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            camera_registry,
            recording_manager,
            snapshot_manager,
            catalog,
            events,
            auth,
            health,
            mediamtx,
            shutdown_tx,
            data_dir,
        })
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}
