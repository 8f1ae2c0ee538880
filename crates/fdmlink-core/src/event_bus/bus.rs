//! Event Bus implementation.
//!
//! Each engine owns one [`EventBus`]; handlers and receivers are scoped to
//! that engine's lifetime.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::{EngineEvent, EventCategory};

/// Subscription handle for unsubscribing from events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Filter to receive only specific event types
#[derive(Debug, Clone, Default)]
pub enum EventFilter {
    /// Receive all events.
    #[default]
    All,
    /// Receive events matching any of these categories.
    Categories(Vec<EventCategory>),
}

impl EventFilter {
    /// Check if an event matches this filter
    pub fn matches(&self, event: &EngineEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Categories(categories) => categories.contains(&event.category()),
        }
    }
}

type EventHandler = Box<dyn Fn(EngineEvent) + Send + Sync>;

/// Configuration for the event bus
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Broadcast capacity; slow receivers lose the oldest events.
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

/// Fan-out point for engine events
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
    handlers: Arc<RwLock<HashMap<SubscriptionId, (EventFilter, EventHandler)>>>,
    config: EventBusConfig,
}

impl EventBus {
    /// Create a new event bus with default configuration
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a new event bus with custom configuration
    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Never fails: events with nobody listening are dropped, and a
    /// panicking handler is logged and skipped. Returns the number of
    /// handlers and receivers that saw the event.
    pub fn publish(&self, event: EngineEvent) -> usize {
        let mut delivered = 0;
        {
            let handlers = self.handlers.read();
            for (id, (filter, handler)) in handlers.iter() {
                if !filter.matches(&event) {
                    continue;
                }
                let outcome = catch_unwind(AssertUnwindSafe(|| handler(event.clone())));
                match outcome {
                    Ok(()) => delivered += 1,
                    Err(_) => tracing::warn!("Event handler {} panicked", id),
                }
            }
        }

        delivered + self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe with a synchronous handler.
    ///
    /// The handler runs on the publishing thread and must return quickly.
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(EngineEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.handlers.write().insert(id, (filter, Box::new(handler)));
        tracing::debug!("Subscription {} added", id);
        id
    }

    /// Get a receiver for polling events from a tokio task
    pub fn receiver(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Unsubscribe from events
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.handlers.write().remove(&id).is_some();
        if removed {
            tracing::debug!("Subscription {} removed", id);
        }
        removed
    }

    /// Number of synchronous handlers
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::events::{ConnectionEvent, ErrorEvent, JobEvent};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn connected() -> EngineEvent {
        EngineEvent::Connection(ConnectionEvent::Connecting {
            port: "/dev/ttyUSB0".to_string(),
        })
    }

    fn paused(i: usize) -> EngineEvent {
        EngineEvent::Job(JobEvent::Paused {
            job_id: format!("job-{}", i),
        })
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let bus = EventBus::new();

        let id = bus.subscribe(EventFilter::All, |_| {});
        assert_eq!(bus.subscriber_count(), 1);

        assert!(bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(), 0);
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn test_publish_without_listeners_is_harmless() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(connected()), 0);
    }

    #[test]
    fn test_event_filtering() {
        let bus = EventBus::new();
        let connection_count = Arc::new(AtomicUsize::new(0));
        let job_count = Arc::new(AtomicUsize::new(0));

        let cc = connection_count.clone();
        bus.subscribe(
            EventFilter::Categories(vec![EventCategory::Connection]),
            move |_| {
                cc.fetch_add(1, Ordering::SeqCst);
            },
        );

        let jc = job_count.clone();
        bus.subscribe(EventFilter::Categories(vec![EventCategory::Job]), move |_| {
            jc.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(connected());
        bus.publish(paused(0));
        bus.publish(paused(1));

        assert_eq!(connection_count.load(Ordering::SeqCst), 1);
        assert_eq!(job_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventFilter::All, |_| panic!("observer bug"));
        let c = count.clone();
        bus.subscribe(EventFilter::All, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(EngineEvent::Error(ErrorEvent::EmergencyStop { delivered: true }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_receiver_loses_oldest() {
        let bus = EventBus::with_config(EventBusConfig {
            channel_capacity: 4,
        });
        let mut receiver = bus.receiver();

        for i in 0..10 {
            bus.publish(paused(i));
        }

        assert!(matches!(
            receiver.recv().await,
            Err(broadcast::error::RecvError::Lagged(6))
        ));
        match receiver.recv().await {
            Ok(EngineEvent::Job(JobEvent::Paused { job_id })) => assert_eq!(job_id, "job-6"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_async_receiver() {
        let bus = EventBus::new();
        let mut receiver = bus.receiver();

        bus.publish(connected());

        match receiver.try_recv() {
            Ok(EngineEvent::Connection(ConnectionEvent::Connecting { port })) => {
                assert_eq!(port, "/dev/ttyUSB0")
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
