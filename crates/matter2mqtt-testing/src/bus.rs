//! Recording message bus.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use matter2mqtt_core::{BusError, MessageBus, MessageHandler};

use crate::EventLog;

/// Message bus that keeps every retained publication in order.
///
/// Incoming messages are simulated with [`deliver`](Self::deliver), which
/// invokes the installed handler on the calling thread, the same way a real
/// bus invokes it on its network thread.
#[derive(Default)]
pub struct RecordingBus {
    handler: Mutex<Option<MessageHandler>>,
    published: Mutex<Vec<(String, String)>>,
    subscriptions: Mutex<Vec<String>>,
    failing_topics: Mutex<HashSet<String>>,
    fail_connect: AtomicBool,
    closed: AtomicBool,
    connects: AtomicUsize,
    closes: AtomicUsize,
    log: Option<EventLog>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record lifecycle calls as `bus.connect` / `bus.subscribe` / `bus.close`.
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Make `connect` fail with [`BusError::ConnectionFailed`].
    pub fn failing_connect(self) -> Self {
        self.fail_connect.store(true, Ordering::SeqCst);
        self
    }

    /// Reject publications to `topic` until [`clear_failures`](Self::clear_failures).
    pub fn fail_publishes_to(&self, topic: impl Into<String>) {
        self.failing_topics.lock().insert(topic.into());
    }

    pub fn clear_failures(&self) {
        self.failing_topics.lock().clear();
    }

    /// Every successful publication as `(topic, payload)`, oldest first.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    /// Payloads published to one topic, oldest first.
    pub fn published_to(&self, topic: &str) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Most recent payload on `topic`, i.e. what a retained subscriber sees.
    pub fn retained(&self, topic: &str) -> Option<String> {
        self.published
            .lock()
            .iter()
            .rev()
            .find(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
    }

    pub fn clear_published(&self) {
        self.published.lock().clear();
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().is_some()
    }

    /// Simulate an incoming message. Returns `false` if no handler is set.
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> bool {
        // Clone out so the handler never runs under our lock.
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => {
                handler(topic, payload);
                true
            }
            None => false,
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn record(&self, entry: &str) {
        if let Some(log) = &self.log {
            log.record(entry);
        }
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    fn set_message_handler(&self, handler: MessageHandler) {
        *self.handler.lock() = Some(handler);
    }

    async fn connect(&self) -> Result<(), BusError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.record("bus.connect");
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(BusError::ConnectionFailed("broker unreachable".into()));
        }
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        if self.failing_topics.lock().contains(topic) {
            return Err(BusError::Publish {
                topic: topic.to_string(),
                reason: "rejected by test".into(),
            });
        }
        self.published
            .lock()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), BusError> {
        self.record("bus.subscribe");
        self.subscriptions.lock().push(pattern.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.record("bus.close");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
