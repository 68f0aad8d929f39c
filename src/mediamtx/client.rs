use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::MediaMtxConfig;
use crate::error::{AppError, Result};
use crate::health::HealthState;

/// A path reservation on the external media server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPath {
    pub name: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub readers: u32,
    #[serde(default, rename = "bytesReceived")]
    pub bytes_received: u64,
}

#[derive(Debug, Serialize)]
struct CreatePathBody<'a> {
    source: &'a str,
    #[serde(rename = "recordPath", skip_serializing_if = "Option::is_none")]
    record_path: Option<&'a str>,
}

/// Two-state circuit breaker guarding the HTTP connection to MediaMTX.
///
/// No retry/backoff crate is pulled in for this; it's a small hand-rolled
/// implementation built from the same `Arc<Mutex<...>>` + `tokio::time`
/// idioms used elsewhere in this crate (e.g. `LogThrottler`).
struct CircuitBreaker {
    failure_streak_limit: u32,
    open_cooldown: Duration,
    consecutive_failures: AtomicU32,
    opened_at_millis: AtomicU64,
}

impl CircuitBreaker {
    fn new(failure_streak_limit: u32, open_cooldown: Duration) -> Self {
        Self {
            failure_streak_limit,
            open_cooldown,
            consecutive_failures: AtomicU32::new(0),
            opened_at_millis: AtomicU64::new(0),
        }
    }

    fn is_open(&self) -> bool {
        let opened_at = self.opened_at_millis.load(Ordering::Acquire);
        if opened_at == 0 {
            return false;
        }
        let elapsed = now_millis().saturating_sub(opened_at);
        if elapsed > self.open_cooldown.as_millis() as u64 {
            // Half-open: allow one probe through by resetting the open marker.
            self.opened_at_millis.store(0, Ordering::Release);
            false
        } else {
            true
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.opened_at_millis.store(0, Ordering::Release);
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.failure_streak_limit {
            self.opened_at_millis.store(now_millis(), Ordering::Release);
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// HTTP client for the external media server's control API.
pub struct MediaMtxClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    retry_max: u32,
    breaker: CircuitBreaker,
    backoff_base: Mutex<Duration>,
    health: Arc<HealthState>,
}

impl MediaMtxClient {
    pub fn new(config: &MediaMtxConfig, health: Arc<HealthState>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            retry_max: config.retry_max,
            breaker: CircuitBreaker::new(config.failure_streak, Duration::from_secs(config.open_cooldown_secs)),
            backoff_base: Mutex::new(Duration::from_millis(200)),
            health,
        }
    }

    pub async fn create_path(&self, name: &str, source: &str) -> Result<()> {
        let body = CreatePathBody { source, record_path: None };
        self.call_with_retry(|| async {
            self.http
                .post(format!("{}/v3/config/paths/add/{name}", self.base_url))
                .json(&body)
                .timeout(self.request_timeout)
                .send()
                .await
        })
        .await?;
        Ok(())
    }

    pub async fn delete_path(&self, name: &str) -> Result<()> {
        self.call_with_retry(|| async {
            self.http
                .delete(format!("{}/v3/config/paths/delete/{name}", self.base_url))
                .timeout(self.request_timeout)
                .send()
                .await
        })
        .await?;
        Ok(())
    }

    pub async fn get_path(&self, name: &str) -> Result<MediaPath> {
        let response = self
            .call_with_retry(|| async {
                self.http
                    .get(format!("{}/v3/paths/get/{name}", self.base_url))
                    .timeout(self.request_timeout)
                    .send()
                    .await
            })
            .await?;
        response
            .json::<MediaPath>()
            .await
            .map_err(|e| AppError::DependencyFailed(format!("malformed path response: {e}")))
    }

    pub async fn list_paths(&self) -> Result<Vec<MediaPath>> {
        #[derive(Deserialize)]
        struct ListResponse {
            items: Vec<MediaPath>,
        }
        let response = self
            .call_with_retry(|| async {
                self.http
                    .get(format!("{}/v3/paths/list", self.base_url))
                    .timeout(self.request_timeout)
                    .send()
                    .await
            })
            .await?;
        let parsed: ListResponse = response
            .json()
            .await
            .map_err(|e| AppError::DependencyFailed(format!("malformed list response: {e}")))?;
        Ok(parsed.items)
    }

    /// Pulls one still frame. MediaMTX does not document a stable response
    /// shape for this endpoint; this assumes a `GET /{name}/snapshot`
    /// convention returning raw image bytes, the simplest shape consistent
    /// with its existing path-scoped route layout.
    pub async fn snapshot(&self, name: &str) -> Result<Vec<u8>> {
        let response = self
            .call_with_retry(|| async {
                self.http
                    .get(format!("{}/{name}/snapshot", self.base_url))
                    .timeout(self.request_timeout)
                    .send()
                    .await
            })
            .await?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| AppError::DependencyFailed(format!("malformed snapshot response: {e}")))
    }

    pub async fn health(&self) -> bool {
        matches!(
            self.call_with_retry(|| async {
                self.http
                    .get(format!("{}/v3/config/global/get", self.base_url))
                    .timeout(self.request_timeout)
                    .send()
                    .await
            })
            .await,
            Ok(_)
        )
    }

    /// Retry an idempotent call with exponential backoff and jitter, short-circuited
    /// by the circuit breaker once `failure_streak` consecutive failures accrue.
    async fn call_with_retry<F, Fut>(&self, call: F) -> Result<reqwest::Response>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<reqwest::Response, reqwest::Error>>,
    {
        if self.breaker.is_open() {
            self.health.metrics.record_downstream_failure();
            return Err(AppError::DependencyFailed("mediamtx circuit open".to_string()));
        }

        let mut attempt = 0;
        let base = *self.backoff_base.lock();
        loop {
            attempt += 1;
            match call().await {
                Ok(response) if response.status().is_success() => {
                    self.breaker.record_success();
                    return Ok(response);
                }
                Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                    self.breaker.record_success();
                    return Err(AppError::NotFound(format!("mediamtx: {}", response.status())));
                }
                Ok(response) if response.status().is_client_error() => {
                    self.breaker.record_success();
                    return Err(AppError::InvalidState(format!("mediamtx rejected request: {}", response.status())));
                }
                Ok(response) => {
                    self.breaker.record_failure();
                    if attempt >= self.retry_max {
                        self.health.metrics.record_downstream_failure();
                        return Err(AppError::DependencyFailed(format!(
                            "mediamtx returned {} after {attempt} attempts",
                            response.status()
                        )));
                    }
                }
                Err(e) => {
                    self.breaker.record_failure();
                    if attempt >= self.retry_max {
                        self.health.metrics.record_downstream_failure();
                        return Err(AppError::DependencyFailed(format!(
                            "mediamtx unreachable after {attempt} attempts: {e}"
                        )));
                    }
                }
            }

            let delay = backoff_delay(base, attempt);
            tokio::time::sleep(delay).await;
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(8));
    let raw = base.saturating_mul(factor).min(Duration::from_secs(5));
    let jitter_fraction = (attempt as u64 * 37) % 100;
    let jitter = raw.mul_f64(0.2 * (jitter_fraction as f64 / 100.0));
    raw + jitter
}

/// Shared handle into the client.
pub type SharedMediaMtxClient = Arc<MediaMtxClient>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_breaker_opens_after_failure_streak() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(50));
        assert!(!breaker.is_open());
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn circuit_breaker_half_opens_after_cooldown() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure();
        assert!(breaker.is_open());
        std::thread::sleep(Duration::from_millis(20));
        assert!(!breaker.is_open());
    }

    #[test]
    fn circuit_breaker_success_resets_streak() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(50));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_millis(200);
        assert!(backoff_delay(base, 1) < backoff_delay(base, 4));
        assert!(backoff_delay(base, 10) <= Duration::from_millis(6000));
    }
}
