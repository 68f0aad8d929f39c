use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::MediaMtxConfig;
use crate::error::Result;
use crate::events::{EventBus, SystemEvent};
use crate::utils::LogThrottler;

use super::identifier::camera_id_for_device;
use super::registry::CameraRegistry;

/// One reconciliation pass's worth of presence information for a local device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub device_path: String,
}

/// A source of "what local video devices exist right now". Production code polls
/// V4L2; tests substitute a scripted sequence, per the trait seam in the design
/// notes.
#[async_trait]
pub trait DeviceSource: Send + Sync {
    async fn reconcile(&self) -> Result<Vec<DeviceDescriptor>>;
}

/// Enumerates `/dev/video*` nodes directly, filtered through a sysfs
/// pre-check that skips metadata-only V4L2 nodes before an expensive ioctl
/// probe.
pub struct V4l2DeviceSource;

#[async_trait]
impl DeviceSource for V4l2DeviceSource {
    async fn reconcile(&self) -> Result<Vec<DeviceDescriptor>> {
        tokio::task::spawn_blocking(enumerate_blocking)
            .await
            .map_err(|e| crate::error::AppError::Internal(format!("device probe task panicked: {e}")))?
    }
}

fn enumerate_blocking() -> Result<Vec<DeviceDescriptor>> {
    let mut descriptors = Vec::new();
    let entries = match std::fs::read_dir("/dev") {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read /dev, reporting no devices");
            return Ok(descriptors);
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if !name.starts_with("video") {
            continue;
        }
        if !sysfs_maybe_capture(&path) {
            continue;
        }
        descriptors.push(DeviceDescriptor {
            device_path: path.to_string_lossy().to_string(),
        });
    }

    Ok(descriptors)
}

fn sysfs_maybe_capture(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };
    let uevent = Path::new("/sys/class/video4linux").join(name).join("device/uevent");
    match std::fs::read_to_string(uevent) {
        Ok(contents) => !contents.to_lowercase().contains("driver=vivid"),
        Err(_) => true,
    }
}

/// Observes device presence and feeds transitions into the [`CameraRegistry`],
/// coalescing rapid add/remove pairs for the same path within `debounce_window`.
///
/// Restarting the monitor (i.e. calling [`DeviceMonitor::run`] again) performs a
/// fresh reconciliation pass rather than assuming prior state, so the service is
/// level-triggered: correct behavior does not depend on having observed every
/// intermediate transition.
pub struct DeviceMonitor {
    source: Arc<dyn DeviceSource>,
    registry: Arc<CameraRegistry>,
    events: EventBus,
    poll_interval: Duration,
    debounce_window: Duration,
    mediamtx: MediaMtxConfig,
    known: Mutex<HashSet<String>>,
    error_throttle: LogThrottler,
}

impl DeviceMonitor {
    pub fn new(
        source: Arc<dyn DeviceSource>,
        registry: Arc<CameraRegistry>,
        events: EventBus,
        poll_interval: Duration,
        debounce_window: Duration,
        mediamtx: MediaMtxConfig,
    ) -> Self {
        Self {
            source,
            registry,
            events,
            poll_interval,
            debounce_window,
            mediamtx,
            known: Mutex::new(HashSet::new()),
            error_throttle: LogThrottler::with_secs(30),
        }
    }

    /// Run the monitor loop until the process shuts down. The first iteration is
    /// an unconditional full reconciliation against an empty known-set, so any
    /// camera present at startup is reported as `added`.
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        crate::warn_throttled!(self.error_throttle, "reconcile_failed", error = %e, "device reconciliation failed");
                        self.events.publish(SystemEvent::MediaBackendHealth {
                            healthy: false,
                            detail: Some(format!("device reconciliation failed: {e}")),
                        });
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("device monitor stopping");
                    return;
                }
            }
        }
    }

    async fn reconcile_once(&self) -> Result<()> {
        let sampled: HashSet<String> = self
            .source
            .reconcile()
            .await?
            .into_iter()
            .map(|d| d.device_path)
            .collect();

        let baseline = self.known.lock().await.clone();

        if sampled.symmetric_difference(&baseline).next().is_none() {
            return Ok(());
        }

        // Debounce: wait out the window, then re-sample and diff against the
        // same `baseline` rather than `sampled`. A path that flapped (added then
        // removed, or removed then re-added) and settled back to its baseline
        // presence within the window produces no transition at all; only the
        // net change that survives the window is applied.
        tokio::time::sleep(self.debounce_window).await;
        let settled: HashSet<String> = self
            .source
            .reconcile()
            .await?
            .into_iter()
            .map(|d| d.device_path)
            .collect();

        let added: Vec<String> = settled.difference(&baseline).cloned().collect();
        let removed: Vec<String> = baseline.difference(&settled).cloned().collect();

        for device_path in &removed {
            if let Ok(camera_id) = camera_id_for_device(device_path) {
                self.registry.set_device_present(&camera_id, device_path, false).await;
            }
        }
        for device_path in &added {
            if let Ok(camera_id) = camera_id_for_device(device_path) {
                self.registry.set_device_present(&camera_id, device_path, true).await;
                self.registry.attach_stream_urls(&camera_id, &self.mediamtx).await;
                self.probe_capabilities(camera_id, device_path.clone());
            }
        }

        *self.known.lock().await = settled;
        Ok(())
    }

    /// Probes the newly-added device's capabilities off the async runtime and
    /// records the result, best-effort: a probe failure only means
    /// `get_camera_capabilities` stays empty for this camera, it does not affect
    /// connectivity status.
    fn probe_capabilities(&self, camera_id: String, device_path: String) {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let path = std::path::PathBuf::from(&device_path);
            match tokio::task::spawn_blocking(move || super::capabilities::probe(&path)).await {
                Ok(Ok(caps)) => registry.set_capabilities(&camera_id, caps).await,
                Ok(Err(e)) => tracing::debug!(camera_id, error = %e, "capability probe failed"),
                Err(e) => tracing::debug!(camera_id, error = %e, "capability probe task panicked"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSource {
        rounds: Mutex<Vec<Vec<DeviceDescriptor>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DeviceSource for ScriptedSource {
        async fn reconcile(&self) -> Result<Vec<DeviceDescriptor>> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            let rounds = self.rounds.lock().await;
            Ok(rounds.get(idx).cloned().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn reconcile_emits_added_then_removed() {
        let events = EventBus::new(16);
        let registry = Arc::new(CameraRegistry::new(events.clone(), Duration::from_secs(2), Duration::from_secs(10)));
        let source = Arc::new(ScriptedSource {
            rounds: Mutex::new(vec![
                // First reconcile_once: pre-debounce and post-debounce samples both
                // see the device present, so it's applied as `added`.
                vec![DeviceDescriptor { device_path: "/dev/video0".to_string() }],
                vec![DeviceDescriptor { device_path: "/dev/video0".to_string() }],
                // Second reconcile_once: pre- and post-debounce samples both see it
                // gone, so it's applied as `removed`.
                vec![],
                vec![],
            ]),
            calls: AtomicUsize::new(0),
        });
        let monitor = DeviceMonitor::new(
            source,
            registry.clone(),
            events,
            Duration::from_millis(10),
            Duration::from_millis(1),
            MediaMtxConfig::default(),
        );

        monitor.reconcile_once().await.unwrap();
        assert_eq!(registry.get("camera0").await.unwrap().device_path.as_deref(), Some("/dev/video0"));

        monitor.reconcile_once().await.unwrap();
        assert!(!registry.get("camera0").await.unwrap().device_present);
    }

    #[tokio::test]
    async fn flap_within_debounce_window_produces_no_transition() {
        let events = EventBus::new(16);
        let registry = Arc::new(CameraRegistry::new(events.clone(), Duration::from_secs(2), Duration::from_secs(10)));
        let source = Arc::new(ScriptedSource {
            rounds: Mutex::new(vec![
                // Pre-debounce sample sees the device appear, but by the
                // post-debounce re-sample it's gone again: net change against
                // baseline (empty) is none, so no transition should apply.
                vec![DeviceDescriptor { device_path: "/dev/video0".to_string() }],
                vec![],
            ]),
            calls: AtomicUsize::new(0),
        });
        let monitor = DeviceMonitor::new(
            source,
            registry.clone(),
            events,
            Duration::from_millis(10),
            Duration::from_millis(5),
            MediaMtxConfig::default(),
        );

        monitor.reconcile_once().await.unwrap();
        assert!(registry.get("camera0").await.is_err(), "a flap settling back to baseline must not register the camera at all");
    }
}
