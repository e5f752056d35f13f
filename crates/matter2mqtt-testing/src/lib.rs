//! Testing utilities for matter2mqtt
//!
//! This crate provides in-memory collaborators for the bridge engine:
//! - `FakeSource`: a scripted snapshot source backed by a mutable device table
//! - `RecordingBus`: a message bus that records every publication
//! - `FakeChannel`: a command channel with scripted results
//! - `EventLog`: a shared, ordered record of lifecycle calls

pub mod bus;
pub mod channel;
pub mod fixtures;
pub mod source;

use std::sync::Arc;

use parking_lot::Mutex;

pub use bus::RecordingBus;
pub use channel::FakeChannel;
pub use fixtures::{on_off_node, onoff_attribute_key};
pub use source::FakeSource;

/// Ordered log of lifecycle calls shared between fakes, used to assert
/// startup and shutdown ordering across collaborators.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Position of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().iter().filter(|e| *e == entry).count()
    }
}
