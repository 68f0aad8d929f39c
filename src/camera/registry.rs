use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};

use super::capabilities::CameraCapabilities;
use super::url::{build_stream_urls, StreamUrls};
use crate::config::MediaMtxConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CameraStatus {
    Connected,
    Disconnected,
    Error,
    Unknown,
}

impl CameraStatus {
    fn as_str(self) -> &'static str {
        match self {
            CameraStatus::Connected => "CONNECTED",
            CameraStatus::Disconnected => "DISCONNECTED",
            CameraStatus::Error => "ERROR",
            CameraStatus::Unknown => "UNKNOWN",
        }
    }
}

/// The authoritative, in-memory record for one camera. Merges device-presence
/// input (from the device monitor) with MediaMTX path readiness.
#[derive(Debug, Clone, Serialize)]
pub struct Camera {
    pub identifier: String,
    pub device_path: Option<String>,
    pub status: CameraStatus,
    pub last_seen_at: DateTime<Utc>,
    pub stream_urls: Option<StreamUrls>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<CameraCapabilities>,

    #[serde(skip)]
    pub device_present: bool,
    #[serde(skip)]
    pub path_ready: bool,
    #[serde(skip)]
    unready_since: Option<DateTime<Utc>>,
    #[serde(skip)]
    last_transition_at: DateTime<Utc>,
    #[serde(skip)]
    last_status: Option<CameraStatus>,
    /// The status emitted immediately before `last_status`, i.e. what the
    /// camera's externally-visible status would revert to if this is a flap.
    #[serde(skip)]
    prior_status: Option<CameraStatus>,
}

impl Camera {
    fn new(identifier: String, device_path: String) -> Self {
        let now = Utc::now();
        Self {
            identifier,
            device_path: Some(device_path),
            status: CameraStatus::Unknown,
            last_seen_at: now,
            stream_urls: None,
            capabilities: None,
            device_present: false,
            path_ready: false,
            unready_since: None,
            last_transition_at: now,
            last_status: None,
            prior_status: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraListSnapshot {
    pub cameras: Vec<Camera>,
    pub total: usize,
    pub connected_count: usize,
}

/// The authoritative camera map: single writer, many readers via snapshots.
pub struct CameraRegistry {
    cameras: RwLock<HashMap<String, Camera>>,
    events: EventBus,
    unready_error_grace: Duration,
    flap_window: chrono::Duration,
}

impl CameraRegistry {
    pub fn new(events: EventBus, unready_error_grace: Duration, flap_window: Duration) -> Self {
        Self {
            cameras: RwLock::new(HashMap::new()),
            events,
            unready_error_grace,
            flap_window: chrono::Duration::from_std(flap_window).unwrap_or(chrono::Duration::seconds(2)),
        }
    }

    pub async fn list(&self) -> CameraListSnapshot {
        let cameras = self.cameras.read().await;
        let mut list: Vec<Camera> = cameras.values().cloned().collect();
        list.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        let connected_count = list.iter().filter(|c| c.status == CameraStatus::Connected).count();
        CameraListSnapshot {
            total: list.len(),
            connected_count,
            cameras: list,
        }
    }

    pub async fn get(&self, camera_id: &str) -> Result<Camera> {
        self.cameras
            .read()
            .await
            .get(camera_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("camera not found: {camera_id}")))
    }

    /// Called by the device monitor on each presence transition.
    pub async fn set_device_present(&self, camera_id: &str, device_path: &str, present: bool) {
        let mut cameras = self.cameras.write().await;
        let camera = cameras
            .entry(camera_id.to_string())
            .or_insert_with(|| Camera::new(camera_id.to_string(), device_path.to_string()));
        camera.device_present = present;
        camera.last_seen_at = Utc::now();
        drop(cameras);
        self.recompute(camera_id, None).await;
    }

    /// Called by the MediaMTX client / recording manager when path readiness changes.
    pub async fn set_path_ready(&self, camera_id: &str, ready: bool) {
        self.recompute(camera_id, Some(ready)).await;
    }

    /// Recompute derived status for `camera_id`, optionally updating `path_ready`,
    /// and emit `camera_status_update` if the (debounced) status changed.
    async fn recompute(&self, camera_id: &str, path_ready: Option<bool>) {
        let mut cameras = self.cameras.write().await;
        let Some(camera) = cameras.get_mut(camera_id) else { return };

        if let Some(ready) = path_ready {
            camera.path_ready = ready;
        }

        let now = Utc::now();
        if !camera.path_ready {
            camera.unready_since.get_or_insert(now);
        } else {
            camera.unready_since = None;
        }

        let new_status = if !camera.device_present {
            CameraStatus::Disconnected
        } else if camera.path_ready {
            CameraStatus::Connected
        } else {
            let grace = chrono::Duration::from_std(self.unready_error_grace).unwrap_or(chrono::Duration::seconds(10));
            match camera.unready_since {
                Some(since) if now - since > grace => CameraStatus::Error,
                _ => CameraStatus::Unknown,
            }
        };

        camera.status = new_status;

        // No change from the last status we actually told subscribers about.
        if camera.last_status == Some(new_status) {
            return;
        }

        // Reverting to the status held just before the last emitted transition,
        // within `flap_window`, is a flap: suppress the event but extend the
        // window so a rapid run of bounces keeps collapsing into one.
        let is_flap = camera.prior_status == Some(new_status) && now - camera.last_transition_at < self.flap_window;
        if is_flap {
            camera.last_transition_at = now;
            return;
        }

        camera.prior_status = camera.last_status;
        camera.last_status = Some(new_status);
        camera.last_transition_at = now;
        self.events.publish(SystemEvent::CameraStatusUpdate {
            camera_id: camera.identifier.clone(),
            status: new_status.as_str().to_string(),
            device_path: camera.device_path.clone(),
        });
    }

    pub async fn attach_stream_urls(&self, camera_id: &str, mediamtx: &MediaMtxConfig) {
        let mut cameras = self.cameras.write().await;
        if let Some(camera) = cameras.get_mut(camera_id) {
            camera.stream_urls = Some(build_stream_urls(camera_id, mediamtx));
        }
    }

    /// Called by the device monitor after a successful capability probe.
    pub async fn set_capabilities(&self, camera_id: &str, capabilities: CameraCapabilities) {
        let mut cameras = self.cameras.write().await;
        if let Some(camera) = cameras.get_mut(camera_id) {
            camera.capabilities = Some(capabilities);
        }
    }
}
