use serde::{Deserialize, Serialize};

/// Real-time events published by the registry, recording and snapshot managers.
///
/// Externally tagged, so every event carries its own topic name and a flat
/// payload the RPC layer can forward unchanged to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    #[serde(rename = "camera_status_update")]
    CameraStatusUpdate {
        camera_id: String,
        status: String,
        device_path: Option<String>,
    },

    #[serde(rename = "recording_status_update")]
    RecordingStatusUpdate {
        camera_id: String,
        session_id: String,
        state: String,
        stop_reason: Option<String>,
        error: Option<String>,
    },

    #[serde(rename = "snapshot_taken")]
    SnapshotTaken {
        camera_id: String,
        request_id: String,
        status: String,
        file_path: Option<String>,
        error: Option<String>,
    },

    #[serde(rename = "media_backend_health")]
    MediaBackendHealth { healthy: bool, detail: Option<String> },

    #[serde(rename = "system_readiness")]
    SystemReadiness { ready: bool },

    /// Synthetic marker delivered once to a subscriber whose queue overflowed, in
    /// place of the events that were dropped.
    #[serde(rename = "events_dropped")]
    EventsDropped { topic: String, dropped: u64 },
}

impl SystemEvent {
    /// The topic name this event is published under; also the name carried in the
    /// serialized envelope's `event` tag.
    pub fn topic(&self) -> &'static str {
        match self {
            SystemEvent::CameraStatusUpdate { .. } => "camera_status_update",
            SystemEvent::RecordingStatusUpdate { .. } => "recording_status_update",
            SystemEvent::SnapshotTaken { .. } => "snapshot_taken",
            SystemEvent::MediaBackendHealth { .. } => "media_backend_health",
            SystemEvent::SystemReadiness { .. } => "system_readiness",
            SystemEvent::EventsDropped { .. } => "events_dropped",
        }
    }
}
