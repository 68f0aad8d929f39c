//! Capability probing for local V4L2 devices, built on the `v4l` crate
//! (`Device`, the `video::Capture` trait, `FourCC`), trimmed to the shape the
//! RPC layer's `get_camera_capabilities` exposes.

use std::path::Path;

use serde::{Deserialize, Serialize};
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::video::Capture;
use v4l::Device;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CameraCapabilities {
    pub resolutions: Vec<Resolution>,
    pub fps: Vec<u32>,
    pub formats: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Probe a device's capabilities. Opens the node and walks its format/frame-size
/// enumeration; callers invoke this via `spawn_blocking`, mirroring the device
/// reconciliation path.
pub fn probe(device_path: &Path) -> Result<CameraCapabilities> {
    let device = Device::with_path(device_path)
        .map_err(|e| AppError::Unsupported(format!("cannot open {}: {e}", device_path.display())))?;

    let format_descriptions = device
        .enum_formats()
        .map_err(|e| AppError::Unsupported(format!("format enumeration failed for {}: {e}", device_path.display())))?;

    let mut formats = Vec::new();
    let mut resolutions = Vec::new();
    let mut fps_set = std::collections::BTreeSet::new();

    for desc in &format_descriptions {
        formats.push(fourcc_to_string(&desc.fourcc.repr));

        let Ok(framesizes) = device.enum_framesizes(desc.fourcc) else {
            continue;
        };
        for framesize in &framesizes {
            if let FrameSizeEnum::Discrete(discretes) = &framesize.size {
                for discrete in discretes {
                    resolutions.push(Resolution { width: discrete.width, height: discrete.height });

                    if let Ok(intervals) = device.enum_frameintervals(desc.fourcc, discrete.width, discrete.height) {
                        for frameinterval in &intervals {
                            if let FrameIntervalEnum::Discrete(fraction) = &frameinterval.interval {
                                if fraction.numerator > 0 {
                                    fps_set.insert(fraction.denominator / fraction.numerator);
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    resolutions.sort_by(|a, b| (b.width * b.height).cmp(&(a.width * a.height)));
    resolutions.dedup_by(|a, b| a.width == b.width && a.height == b.height);
    formats.sort();
    formats.dedup();

    if fps_set.is_empty() {
        fps_set.extend([15, 30]);
    }

    Ok(CameraCapabilities {
        resolutions,
        fps: fps_set.into_iter().collect(),
        formats,
    })
}

fn fourcc_to_string(repr: &[u8; 4]) -> String {
    String::from_utf8_lossy(repr).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_is_unsupported() {
        let result = probe(Path::new("/dev/does-not-exist-video99"));
        assert!(result.is_err());
    }
}
