use crate::config::MediaMtxConfig;

/// Deterministically constructed stream URLs for a camera, built purely from
/// camera identity and configuration — no round trip to MediaMTX is required.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StreamUrls {
    pub rtsp: String,
    pub hls: String,
    pub webrtc: String,
}

pub fn build_stream_urls(camera_id: &str, config: &MediaMtxConfig) -> StreamUrls {
    let host = &config.public_host;
    StreamUrls {
        rtsp: format!("rtsp://{host}:{}/{camera_id}", config.rtsp_port),
        hls: format!("http://{host}:{}/{camera_id}/index.m3u8", config.hls_port),
        webrtc: format!("http://{host}:{}/{camera_id}/whep", config.webrtc_port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_canonical_urls() {
        let config = MediaMtxConfig {
            public_host: "192.168.1.10".to_string(),
            rtsp_port: 8554,
            hls_port: 8888,
            webrtc_port: 8889,
            ..Default::default()
        };
        let urls = build_stream_urls("camera0", &config);
        assert_eq!(urls.rtsp, "rtsp://192.168.1.10:8554/camera0");
        assert_eq!(urls.hls, "http://192.168.1.10:8888/camera0/index.m3u8");
        assert_eq!(urls.webrtc, "http://192.168.1.10:8889/camera0/whep");
    }
}
