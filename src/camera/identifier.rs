use crate::error::{AppError, Result};

/// Convert a V4L2 device path (`/dev/videoN`) to its canonical camera identifier
/// (`cameraN`). The mapping is bijective; any other device path shape is rejected.
pub fn camera_id_for_device(device_path: &str) -> Result<String> {
    let index = device_path
        .strip_prefix("/dev/video")
        .filter(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| AppError::Unsupported(format!("unsupported device path: {device_path}")))?;
    Ok(format!("camera{index}"))
}

/// Convert a canonical camera identifier (`cameraN`) back to its device path.
pub fn device_for_camera_id(camera_id: &str) -> Result<String> {
    let index = camera_id
        .strip_prefix("camera")
        .filter(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| AppError::Unsupported(format!("unsupported camera identifier: {camera_id}")))?;
    Ok(format!("/dev/video{index}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let id = camera_id_for_device("/dev/video0").unwrap();
        assert_eq!(id, "camera0");
        assert_eq!(device_for_camera_id(&id).unwrap(), "/dev/video0");
    }

    #[test]
    fn rejects_non_numeric_suffix() {
        assert!(camera_id_for_device("/dev/videoX").is_err());
        assert!(camera_id_for_device("/dev/audio0").is_err());
    }

    #[test]
    fn rejects_unknown_identifier_shape() {
        assert!(device_for_camera_id("webcam0").is_err());
    }
}
