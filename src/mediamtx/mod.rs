//! Integration with the external media server ("MediaMTX") that performs the
//! actual RTSP/HLS/WebRTC transcoding and stores recorded bytes.

pub mod client;
pub mod watcher;

pub use client::{MediaMtxClient, MediaPath, SharedMediaMtxClient};
pub use watcher::PathReadinessWatcher;

use async_trait::async_trait;

use crate::error::Result;

/// The narrow surface the Recording and Snapshot managers depend on. Production
/// code is backed by [`MediaMtxClient`]; tests substitute an in-memory fake with
/// injectable failure sequences so downstream-outage scenarios are deterministic.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn create_path(&self, name: &str, source: &str) -> Result<()>;
    async fn delete_path(&self, name: &str) -> Result<()>;
    async fn get_path(&self, name: &str) -> Result<MediaPath>;
    async fn health(&self) -> bool;
    /// Pulls a single still frame from an already-ready path. Used by the
    /// Snapshot Manager; callers are responsible for ensuring a path exists
    /// first (creating a transient one if needed).
    async fn snapshot(&self, name: &str) -> Result<Vec<u8>>;
}

#[async_trait]
impl MediaBackend for MediaMtxClient {
    async fn create_path(&self, name: &str, source: &str) -> Result<()> {
        MediaMtxClient::create_path(self, name, source).await
    }

    async fn delete_path(&self, name: &str) -> Result<()> {
        MediaMtxClient::delete_path(self, name).await
    }

    async fn get_path(&self, name: &str) -> Result<MediaPath> {
        MediaMtxClient::get_path(self, name).await
    }

    async fn health(&self) -> bool {
        MediaMtxClient::health(self).await
    }

    async fn snapshot(&self, name: &str) -> Result<Vec<u8>> {
        MediaMtxClient::snapshot(self, name).await
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::error::AppError;

    /// Scripted failure/success sequence per method, used to exercise S5
    /// (downstream outage) deterministically without a live MediaMTX process.
    #[derive(Default)]
    pub struct FakeMediaBackend {
        pub create_path_results: Mutex<VecDeque<Result<()>>>,
        pub snapshot_results: Mutex<VecDeque<Result<Vec<u8>>>>,
        pub ready: Mutex<bool>,
    }

    impl FakeMediaBackend {
        pub fn always_ready() -> Self {
            Self {
                create_path_results: Mutex::new(VecDeque::new()),
                snapshot_results: Mutex::new(VecDeque::new()),
                ready: Mutex::new(true),
            }
        }

        pub fn failing(times: usize) -> Self {
            let mut results = VecDeque::new();
            for _ in 0..times {
                results.push_back(Err(AppError::DependencyFailed("mediamtx unreachable".to_string())));
            }
            Self {
                create_path_results: Mutex::new(results),
                snapshot_results: Mutex::new(VecDeque::new()),
                ready: Mutex::new(true),
            }
        }
    }

    #[async_trait]
    impl MediaBackend for FakeMediaBackend {
        async fn create_path(&self, _name: &str, _source: &str) -> Result<()> {
            let mut results = self.create_path_results.lock().unwrap();
            match results.pop_front() {
                Some(result) => result,
                None => Ok(()),
            }
        }

        async fn delete_path(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn get_path(&self, name: &str) -> Result<MediaPath> {
            Ok(MediaPath {
                name: name.to_string(),
                source: None,
                ready: *self.ready.lock().unwrap(),
                readers: 0,
                bytes_received: 0,
            })
        }

        async fn health(&self) -> bool {
            *self.ready.lock().unwrap()
        }

        async fn snapshot(&self, _name: &str) -> Result<Vec<u8>> {
            let mut results = self.snapshot_results.lock().unwrap();
            match results.pop_front() {
                Some(result) => result,
                None => Ok(vec![0xFF, 0xD8, 0xFF, 0xD9]),
            }
        }
    }
}
