use serde::{Deserialize, Serialize};

/// Top-level configuration document, loaded once at startup from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub mediamtx: MediaMtxConfig,
    pub storage: StorageConfig,
    pub camera: CameraConfig,
    pub recording: RecordingConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    pub ws_path: String,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_miss: u32,
    pub max_in_flight: usize,
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8002,
            ws_path: "/ws".to_string(),
            heartbeat_interval_secs: 30,
            heartbeat_miss: 2,
            max_in_flight: 64,
            max_frame_bytes: 256 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthAlgorithm {
    Hs256,
    Rs256,
}

impl Default for AuthAlgorithm {
    fn default() -> Self {
        AuthAlgorithm::Hs256
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub algorithm: AuthAlgorithm,
    /// Shared secret, used when `algorithm = hs256`.
    pub secret: String,
    /// PEM-encoded public key, used when `algorithm = rs256` and no JWKS URL is set.
    pub public_key_pem: Option<String>,
    /// JWKS endpoint, used when `algorithm = rs256`.
    pub jwks_url: Option<String>,
    pub jwks_refresh_secs: u64,
    pub clock_skew_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            algorithm: AuthAlgorithm::Hs256,
            secret: String::new(),
            public_key_pem: None,
            jwks_url: None,
            jwks_refresh_secs: 300,
            clock_skew_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaMtxConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub retry_max: u32,
    pub failure_streak: u32,
    pub open_cooldown_secs: u64,
    pub rtsp_port: u16,
    pub hls_port: u16,
    pub webrtc_port: u16,
    pub public_host: String,
}

impl Default for MediaMtxConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9997".to_string(),
            request_timeout_secs: 3,
            retry_max: 3,
            failure_streak: 5,
            open_cooldown_secs: 30,
            rtsp_port: 8554,
            hls_port: 8888,
            webrtc_port: 8889,
            public_host: "127.0.0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub recordings_dir: String,
    pub snapshots_dir: String,
    pub warn_percent: u8,
    pub block_percent: u8,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            recordings_dir: "/var/lib/camera-gateway/recordings".to_string(),
            snapshots_dir: "/var/lib/camera-gateway/snapshots".to_string(),
            warn_percent: 85,
            block_percent: 95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub unready_error_grace_secs: u64,
    pub flap_window_secs: u64,
    pub debounce_window_ms: u64,
    pub device_poll_interval_secs: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            unready_error_grace_secs: 10,
            flap_window_secs: 2,
            debounce_window_ms: 500,
            device_poll_interval_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordingFormat {
    Fmp4,
    Mp4,
    Mkv,
}

impl Default for RecordingFormat {
    fn default() -> Self {
        RecordingFormat::Fmp4
    }
}

impl RecordingFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            RecordingFormat::Fmp4 => "fmp4",
            RecordingFormat::Mp4 => "mp4",
            RecordingFormat::Mkv => "mkv",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fmp4" => Some(RecordingFormat::Fmp4),
            "mp4" => Some(RecordingFormat::Mp4),
            "mkv" => Some(RecordingFormat::Mkv),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub default_format: RecordingFormat,
    pub stop_settle_secs: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            default_format: RecordingFormat::Fmp4,
            stop_settle_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub queue_size: usize,
    pub outbound_stall_timeout_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_size: 256,
            outbound_stall_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
