//! Event bus for real-time state notifications.
//!
//! A single `tokio::sync::broadcast` channel gives every subscriber the same
//! lag-and-skip-ahead semantics across *all* topics combined, which does not
//! satisfy "ordered per topic per subscriber" together with a single
//! `events_dropped` marker per gap. Instead, publications fan out to one
//! bounded queue per subscriber; on overflow the oldest entry is dropped and a
//! pending-gap counter is set, surfaced as a single synthetic event the next time
//! that subscriber drains.

pub mod types;

pub use types::SystemEvent;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

struct Inner {
    queue: Mutex<VecDeque<SystemEvent>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    topics: Option<Vec<String>>,
    id: u64,
}

/// A per-subscriber handle into the event bus.
pub struct Subscriber {
    inner: Arc<Inner>,
}

impl Subscriber {
    /// Wait for and return the next event visible to this subscriber.
    ///
    /// If the queue overflowed since the last call, the first value returned is a
    /// synthetic [`SystemEvent::EventsDropped`] marker rather than a real event.
    pub async fn recv(&self) -> SystemEvent {
        loop {
            {
                let mut queue = self.inner.queue.lock();
                if let Some(event) = queue.pop_front() {
                    let dropped = self.inner.dropped.swap(0, Ordering::AcqRel);
                    if dropped > 0 {
                        queue.push_front(event);
                        return SystemEvent::EventsDropped {
                            topic: "*".to_string(),
                            dropped,
                        };
                    }
                    return event;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    fn deliver(&self, event: &SystemEvent) {
        if let Some(topics) = &self.inner.topics {
            if !topics.iter().any(|t| t == "*" || t == event.topic()) {
                return;
            }
        }
        let mut queue = self.inner.queue.lock();
        if queue.len() >= self.inner.capacity {
            queue.pop_front();
            self.inner.dropped.fetch_add(1, Ordering::AcqRel);
        }
        queue.push_back(event.clone());
        drop(queue);
        self.inner.notify.notify_one();
    }
}

struct Registration {
    id: u64,
    inner: Arc<Inner>,
}

/// The event bus. Cloned handles share the same set of subscribers.
#[derive(Clone)]
pub struct EventBus {
    state: Arc<Mutex<Vec<Registration>>>,
    default_capacity: usize,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given per-subscriber queue capacity.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(Vec::new())),
            default_capacity,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Publish an event to every interested subscriber.
    ///
    /// If there are no subscribers, the event is silently dropped; this is a
    /// fire-and-forget notification bus, not a durable log.
    pub fn publish(&self, event: SystemEvent) {
        let registrations = self.state.lock();
        for reg in registrations.iter() {
            reg.inner.deliver(&event);
        }
    }

    /// Subscribe to one or more topics. Pass `["*"]` to receive every topic.
    pub fn subscribe(&self, topics: Vec<String>) -> Subscriber {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::new(Inner {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: self.default_capacity,
            dropped: AtomicU64::new(0),
            topics: if topics.is_empty() { None } else { Some(topics) },
            id,
        });
        self.state.lock().push(Registration { id, inner: inner.clone() });
        Subscriber { inner }
    }

    /// Drop a subscriber's registration; called on client disconnect.
    pub fn unsubscribe(&self, subscriber: &Subscriber) {
        let id = subscriber.inner.id;
        self.state.lock().retain(|reg| reg.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(camera_id: &str) -> SystemEvent {
        SystemEvent::CameraStatusUpdate {
            camera_id: camera_id.to_string(),
            status: "CONNECTED".to_string(),
            device_path: None,
        }
    }

    #[tokio::test]
    async fn publish_subscribe_round_trips() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe(vec!["*".to_string()]);
        bus.publish(sample("camera0"));
        let event = sub.recv().await;
        assert!(matches!(event, SystemEvent::CameraStatusUpdate { .. }));
    }

    #[tokio::test]
    async fn topic_filter_excludes_other_topics() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe(vec!["recording_status_update".to_string()]);
        bus.publish(sample("camera0"));
        assert_eq!(bus.subscriber_count(), 1);
        let queue_len = sub.inner.queue.lock().len();
        assert_eq!(queue_len, 0);
    }

    #[tokio::test]
    async fn overflow_surfaces_single_dropped_marker() {
        let bus = EventBus::new(2);
        let sub = bus.subscribe(vec!["*".to_string()]);
        for _ in 0..5 {
            bus.publish(sample("camera0"));
        }
        let first = sub.recv().await;
        assert!(matches!(first, SystemEvent::EventsDropped { dropped: 3, .. }));
        let second = sub.recv().await;
        assert!(matches!(second, SystemEvent::CameraStatusUpdate { .. }));
    }

    #[tokio::test]
    async fn unsubscribe_removes_registration() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe(vec!["*".to_string()]);
        assert_eq!(bus.subscriber_count(), 1);
        bus.unsubscribe(&sub);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
