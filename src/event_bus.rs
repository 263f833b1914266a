//! Synchronous, subscription-ordered pub/sub broker.
//!
//! Every handler for a topic runs on the publisher's thread, in subscription
//! order. A handler that panics or errors is logged and does not block the
//! remaining subscribers for that topic.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::error::EngineError;

pub const TOPIC_MARKET_SNAPSHOT: &str = "MARKET_SNAPSHOT";
pub const TOPIC_PATTERN_DETECTED: &str = "PATTERN_DETECTED";
pub const TOPIC_SIGNAL_GENERATED: &str = "SIGNAL_GENERATED";
pub const TOPIC_SIGNAL_APPROVED: &str = "SIGNAL_APPROVED";
pub const TOPIC_SIGNAL_REJECTED: &str = "SIGNAL_REJECTED";
pub const TOPIC_MANIPULATION_DETECTED: &str = "MANIPULATION_DETECTED";
pub const TOPIC_REGIME_CHANGE: &str = "REGIME_CHANGE";
pub const TOPIC_MAINTENANCE_COMPLETED: &str = "MAINTENANCE_COMPLETED";
pub const TOPIC_DAILY_RESET: &str = "DAILY_RESET";
pub const TOPIC_SYSTEM_STARTED: &str = "SYSTEM_STARTED";
pub const TOPIC_SYSTEM_STOPPING: &str = "SYSTEM_STOPPING";
pub const TOPIC_SYSTEM_ERROR: &str = "SYSTEM_ERROR";

/// Payload carried by an event. A loosely typed envelope keeps the bus
/// generic across the dozen topics above without one enum variant per topic.
#[derive(Debug, Clone)]
pub enum Event {
    Snapshot(Arc<crate::domain::MarketSnapshot>),
    Candidate(Arc<crate::domain::Candidate>),
    Signal(Arc<crate::domain::Signal>),
    Regime { instrument: String, old: String, new: String, confidence: f64 },
    Reject { instrument: String, reason: String },
    Text(String),
}

type Handler = Box<dyn Fn(&Event) -> Result<(), EngineError> + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: &str, handler: F)
    where
        F: Fn(&Event) -> Result<(), EngineError> + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(Box::new(handler));
    }

    pub fn unsubscribe_all(&self, topic: &str) {
        self.subscribers.write().remove(topic);
    }

    /// Dispatch synchronously to every subscriber of `topic`, in
    /// subscription order. A handler fault is logged, never propagated.
    pub fn publish(&self, topic: &str, event: Event) {
        let subscribers = self.subscribers.read();
        let Some(handlers) = subscribers.get(topic) else {
            return;
        };
        for handler in handlers {
            if let Err(err) = handler(&event) {
                warn!(topic, error = %err, "handler fault, continuing to next subscriber");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatches_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(RwLock::new(Vec::new()));
        for id in 0..3 {
            let order = order.clone();
            bus.subscribe(TOPIC_SYSTEM_STARTED, move |_| {
                order.write().push(id);
                Ok(())
            });
        }
        bus.publish(TOPIC_SYSTEM_STARTED, Event::Text("go".into()));
        assert_eq!(*order.read(), vec![0, 1, 2]);
    }

    #[test]
    fn faulting_handler_does_not_block_others() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        bus.subscribe(TOPIC_SYSTEM_ERROR, |_| {
            Err(EngineError::HandlerFault { topic: "x".into(), reason: "boom".into() })
        });
        let calls2 = calls.clone();
        bus.subscribe(TOPIC_SYSTEM_ERROR, move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.publish(TOPIC_SYSTEM_ERROR, Event::Text("x".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
