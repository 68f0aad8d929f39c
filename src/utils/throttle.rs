//! Log throttling: limits how often the same message key is logged, so a
//! persistent failure (e.g. a camera stuck in reconciliation errors) doesn't
//! flood the log at poll-interval frequency.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

pub struct LogThrottler {
    last_logged: RwLock<HashMap<String, Instant>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_logged: RwLock::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` if `key` should be logged now, updating its timestamp.
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        {
            let map = self.last_logged.read().unwrap();
            if let Some(last) = map.get(key) {
                if now.duration_since(*last) < self.interval {
                    return false;
                }
            }
        }
        let mut map = self.last_logged.write().unwrap();
        if let Some(last) = map.get(key) {
            if now.duration_since(*last) < self.interval {
                return false;
            }
        }
        map.insert(key.to_string(), now);
        true
    }

    /// Clears throttle state for `key`, so the next call logs immediately.
    pub fn clear(&self, key: &str) {
        self.last_logged.write().unwrap().remove(key);
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`, keyed by a string to scope the throttle.
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn first_call_always_logs() {
        let throttler = LogThrottler::with_secs(1);
        assert!(throttler.should_log("test_key"));
    }

    #[test]
    fn throttles_within_interval_then_allows_after() {
        let throttler = LogThrottler::new(Duration::from_millis(100));
        assert!(throttler.should_log("test_key"));
        assert!(!throttler.should_log("test_key"));
        thread::sleep(Duration::from_millis(150));
        assert!(throttler.should_log("test_key"));
    }

    #[test]
    fn keys_are_independent() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.should_log("key1"));
        assert!(throttler.should_log("key2"));
        assert!(!throttler.should_log("key1"));
    }

    #[test]
    fn clear_allows_immediate_relog() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.should_log("test_key"));
        throttler.clear("test_key");
        assert!(throttler.should_log("test_key"));
    }
}
