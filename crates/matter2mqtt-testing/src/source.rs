//! Scripted snapshot source.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;

use matter2mqtt_core::{EndpointKey, Handshake, NodeSnapshot, SnapshotSource, SourceError};

use crate::fixtures::onoff_attribute_key;
use crate::EventLog;

/// Snapshot source serving a mutable node table.
///
/// Every `fetch_snapshot` returns the current table unless a one-shot
/// failure has been queued with [`fail_next_fetch`](Self::fail_next_fetch).
/// [`pause_fetches`](Self::pause_fetches) holds every fetch in flight until
/// [`resume_fetches`](Self::resume_fetches).
#[derive(Default)]
pub struct FakeSource {
    nodes: Mutex<Vec<NodeSnapshot>>,
    fetch_failures: Mutex<VecDeque<SourceError>>,
    paused: AtomicBool,
    resumed: Notify,
    fail_connect: AtomicBool,
    connects: AtomicUsize,
    fetches: AtomicUsize,
    closes: AtomicUsize,
    log: Option<EventLog>,
}

impl FakeSource {
    pub fn new(nodes: Vec<NodeSnapshot>) -> Self {
        Self {
            nodes: Mutex::new(nodes),
            ..Default::default()
        }
    }

    /// Record lifecycle calls as `source.connect` / `source.close`.
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Make `connect` fail with [`SourceError::ConnectionFailed`].
    pub fn failing_connect(self) -> Self {
        self.fail_connect.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_nodes(&self, nodes: Vec<NodeSnapshot>) {
        *self.nodes.lock() = nodes;
    }

    /// Overwrite the on/off attribute of one endpoint. Returns `false` if
    /// the node does not exist.
    pub fn set_on_off(&self, key: EndpointKey, on: bool) -> bool {
        let mut nodes = self.nodes.lock();
        match nodes.iter_mut().find(|n| n.node_id == key.device_id) {
            Some(node) => {
                node.attributes
                    .insert(onoff_attribute_key(key.endpoint_id), Value::Bool(on));
                true
            }
            None => false,
        }
    }

    /// Current on/off attribute of one endpoint.
    pub fn on_off(&self, key: EndpointKey) -> Option<bool> {
        self.nodes
            .lock()
            .iter()
            .find(|n| n.node_id == key.device_id)
            .and_then(|n| n.attributes.get(&onoff_attribute_key(key.endpoint_id)))
            .and_then(Value::as_bool)
    }

    pub fn set_available(&self, node_id: u64, available: bool) {
        if let Some(node) = self.nodes.lock().iter_mut().find(|n| n.node_id == node_id) {
            node.available = available;
        }
    }

    /// Queue a failure for the next `fetch_snapshot` call.
    pub fn fail_next_fetch(&self, error: SourceError) {
        self.fetch_failures.lock().push_back(error);
    }

    /// Hold fetches after they are counted, before they return.
    pub fn pause_fetches(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume_fetches(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resumed.notify_waiters();
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
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
impl SnapshotSource for FakeSource {
    async fn connect(&self) -> Result<Handshake, SourceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.record("source.connect");
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(SourceError::ConnectionFailed("connection refused".into()));
        }
        Ok(Handshake {
            schema_version: Some(11),
            sdk_version: Some("fake".into()),
        })
    }

    async fn fetch_snapshot(&self) -> Result<Vec<NodeSnapshot>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        loop {
            let resumed = self.resumed.notified();
            if !self.paused.load(Ordering::SeqCst) {
                break;
            }
            resumed.await;
        }
        if let Some(error) = self.fetch_failures.lock().pop_front() {
            return Err(error);
        }
        Ok(self.nodes.lock().clone())
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.record("source.close");
        Ok(())
    }
}
