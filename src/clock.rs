use chrono::{DateTime, Utc};

/// Abstracts wall-clock time so scheduled-stop deadlines (time-bounded
/// recordings) can be exercised in tests without real sleeps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
