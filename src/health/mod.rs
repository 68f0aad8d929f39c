//! Liveness/readiness and counters feeding `get_status`, `get_system_status`,
//! `get_storage_info`, and `get_metrics`.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::config::StorageConfig;
use crate::error::Result;

#[derive(Default)]
pub struct Metrics {
    pub requests_handled: AtomicU64,
    pub downstream_failures: AtomicU64,
    pub recordings_started: AtomicU64,
    pub snapshots_taken: AtomicU64,
    pub events_dropped: AtomicU64,
}

impl Metrics {
    pub fn record_request(&self) {
        self.requests_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_downstream_failure(&self) {
        self.downstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recording_started(&self) {
        self.recordings_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_taken(&self) {
        self.snapshots_taken.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_handled: self.requests_handled.load(Ordering::Relaxed),
            downstream_failures: self.downstream_failures.load(Ordering::Relaxed),
            recordings_started: self.recordings_started.load(Ordering::Relaxed),
            snapshots_taken: self.snapshots_taken.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_handled: u64,
    pub downstream_failures: u64,
    pub recordings_started: u64,
    pub snapshots_taken: u64,
    pub events_dropped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub uptime_secs: u64,
    pub mediamtx_healthy: bool,
    pub camera_count: usize,
    pub connected_count: usize,
    pub active_recordings: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    pub recordings_dir: String,
    pub snapshots_dir: String,
    pub used_percent: u8,
    pub warn_percent: u8,
    pub block_percent: u8,
    pub over_warn: bool,
    pub over_block: bool,
}

pub struct HealthState {
    pub metrics: Metrics,
    started_at: Instant,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            metrics: Metrics::default(),
            started_at: Instant::now(),
        }
    }
}

impl HealthState {
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Queries the filesystem backing `storage.recordings_dir` for capacity, used by
/// `get_storage_info`. Built on `nix::sys::statvfs`, the same crate already
/// relied on for socket binding, rather than introducing a new dependency.
pub fn storage_info(config: &StorageConfig) -> Result<StorageInfo> {
    let used_percent = percent_used(Path::new(&config.recordings_dir)).unwrap_or(0);
    Ok(StorageInfo {
        recordings_dir: config.recordings_dir.clone(),
        snapshots_dir: config.snapshots_dir.clone(),
        used_percent,
        warn_percent: config.warn_percent,
        block_percent: config.block_percent,
        over_warn: used_percent >= config.warn_percent,
        over_block: used_percent >= config.block_percent,
    })
}

fn percent_used(path: &Path) -> Option<u8> {
    let stat = nix::sys::statvfs::statvfs(path).ok()?;
    let total = stat.blocks() as u128 * stat.fragment_size() as u128;
    if total == 0 {
        return Some(0);
    }
    let free = stat.blocks_available() as u128 * stat.fragment_size() as u128;
    let used = total.saturating_sub(free);
    Some(((used * 100) / total).min(100) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_start_at_zero() {
        let metrics = Metrics::default();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_handled, 0);
        metrics.record_request();
        assert_eq!(metrics.snapshot().requests_handled, 1);
    }

    #[test]
    fn percent_used_on_existing_dir_is_in_range() {
        let dir = tempfile::tempdir().unwrap();
        let pct = percent_used(dir.path()).unwrap();
        assert!(pct <= 100);
    }
}
