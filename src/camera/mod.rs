//! Camera identity, status derivation, and local-device presence monitoring.

pub mod capabilities;
pub mod device_monitor;
pub mod identifier;
pub mod registry;
pub mod url;

pub use capabilities::{CameraCapabilities, Resolution};
pub use device_monitor::{DeviceMonitor, DeviceSource, V4l2DeviceSource};
pub use identifier::{camera_id_for_device, device_for_camera_id};
pub use registry::{Camera, CameraRegistry, CameraStatus};
pub use url::{build_stream_urls, StreamUrls};
