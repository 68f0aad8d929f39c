//! Per-connection session state: auth claims, topic subscriptions, and the
//! in-flight request counter used for per-connection backpressure.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::{Claims, Scope};

/// The three authorization tiers a method falls into. `Public` methods never
/// require a session to be authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthTier {
    Public,
    Read,
    Control,
}

pub struct Session {
    pub session_id: String,
    pub claims: Option<Claims>,
    pub subscriptions: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
}

/// RAII guard released when a request handler finishes, decrementing the
/// session's in-flight counter even if the handler returns early. Owns a
/// clone of the counter (rather than borrowing the `Session`) so holding a
/// permit doesn't keep any borrow of `*session` alive across the handler call.
pub struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Session {
    pub fn new(max_in_flight: usize) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            claims: None,
            subscriptions: HashSet::new(),
            created_at: now,
            last_activity: now,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Attempts to reserve an in-flight request slot; `None` means the
    /// connection is over `max_in_flight` and the caller should respond
    /// `RATE_LIMITED` instead of dispatching.
    pub fn try_begin_request(&self) -> Option<InFlightGuard> {
        loop {
            let current = self.in_flight.load(Ordering::Acquire);
            if current >= self.max_in_flight {
                return None;
            }
            if self
                .in_flight
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(InFlightGuard { counter: self.in_flight.clone() });
            }
        }
    }

    /// Demotes the session to unauthenticated once claims expire; subsequent
    /// non-public calls then fail `AUTH_REQUIRED` rather than stale-succeed.
    pub fn active_claims(&mut self) -> Option<&Claims> {
        if let Some(claims) = &self.claims {
            if claims.is_expired(Utc::now()) {
                self.claims = None;
            }
        }
        self.claims.as_ref()
    }

    pub fn has_scope(&mut self, scope: Scope) -> bool {
        self.active_claims().map(|c| c.has_scope(scope)).unwrap_or(false)
    }

    pub fn is_authenticated(&mut self) -> bool {
        self.active_claims().is_some()
    }
}

/// Authorization tier a method name belongs to.
pub fn tier_for_method(method: &str) -> AuthTier {
    const PUBLIC: &[&str] = &["ping", "authenticate", "get_server_info"];
    const CONTROL: &[&str] = &["take_snapshot", "start_recording", "stop_recording", "delete_recording", "delete_snapshot"];

    if PUBLIC.contains(&method) {
        AuthTier::Public
    } else if CONTROL.contains(&method) {
        AuthTier::Control
    } else if method.starts_with("get_") || method.starts_with("list_") || method == "subscribe_events" || method == "unsubscribe_events" {
        AuthTier::Read
    } else {
        // Not in the method catalogue at all: let dispatch reach `handle_method`
        // unauthenticated so an unknown method always yields `METHOD_NOT_FOUND`
        // rather than masking it behind `AUTH_REQUIRED`.
        AuthTier::Public
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_match_method_catalogue() {
        assert_eq!(tier_for_method("ping"), AuthTier::Public);
        assert_eq!(tier_for_method("authenticate"), AuthTier::Public);
        assert_eq!(tier_for_method("get_camera_list"), AuthTier::Read);
        assert_eq!(tier_for_method("list_recordings"), AuthTier::Read);
        assert_eq!(tier_for_method("subscribe_events"), AuthTier::Read);
        assert_eq!(tier_for_method("start_recording"), AuthTier::Control);
        assert_eq!(tier_for_method("delete_snapshot"), AuthTier::Control);
    }

    #[test]
    fn in_flight_guard_releases_on_drop() {
        let session = Session::new(1);
        let guard = session.try_begin_request().unwrap();
        assert!(session.try_begin_request().is_none());
        drop(guard);
        assert!(session.try_begin_request().is_some());
    }
}
