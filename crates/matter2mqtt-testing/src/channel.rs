//! Scripted command channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use matter2mqtt_core::{CommandChannel, CommandError, EndpointKey, OnOffAction};

use crate::source::FakeSource;
use crate::EventLog;

/// Command channel recording every send.
///
/// Send results are taken from a script; once the script is exhausted every
/// send succeeds. When linked to a [`FakeSource`], successful commands change
/// the device table the way a real device would.
#[derive(Default)]
pub struct FakeChannel {
    script: Mutex<VecDeque<Result<(), CommandError>>>,
    sent: Mutex<Vec<(EndpointKey, OnOffAction)>>,
    device: Option<Arc<FakeSource>>,
    fail_connect: AtomicBool,
    connect_delay: Mutex<Duration>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    log: Option<EventLog>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply successful commands to the on/off attributes of `source`.
    pub fn driving(mut self, source: Arc<FakeSource>) -> Self {
        self.device = Some(source);
        self
    }

    /// Record lifecycle calls as `channel.connect` / `channel.close`.
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Queue the result of the next send.
    pub fn push_result(&self, result: Result<(), CommandError>) {
        self.script.lock().push_back(result);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make every `connect` take `delay` before it resolves.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    /// Every send attempt, including failed ones, oldest first.
    pub fn sent(&self) -> Vec<(EndpointKey, OnOffAction)> {
        self.sent.lock().clone()
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

    fn apply(&self, key: EndpointKey, action: OnOffAction) {
        let Some(source) = &self.device else { return };
        let on = match action.desired_state() {
            Some(on) => on,
            None => !source.on_off(key).unwrap_or(false),
        };
        if !source.set_on_off(key, on) {
            debug!("Fake device {} does not exist", key);
        }
    }
}

#[async_trait]
impl CommandChannel for FakeChannel {
    async fn connect(&self) -> Result<(), CommandError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.record("channel.connect");
        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(CommandError::ConnectionFailed("connection refused".into()));
        }
        Ok(())
    }

    async fn send_command(&self, key: EndpointKey, action: OnOffAction) -> Result<(), CommandError> {
        self.sent.lock().push((key, action));
        let result = self.script.lock().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.apply(key, action);
        }
        result
    }

    async fn close(&self) -> Result<(), CommandError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.record("channel.close");
        Ok(())
    }
}
