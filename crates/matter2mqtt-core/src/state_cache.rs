//! Last-published values per endpoint.
//!
//! A value is published only when it differs from the last value published
//! for the same endpoint. Availability and on/off are tracked independently.
//! Entries never expire.

use std::collections::HashMap;

use crate::model::EndpointKey;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CacheEntry {
    availability: Option<bool>,
    on_off: Option<bool>,
}

/// Cache of published availability and on/off values.
///
/// The check-and-set methods take `&mut self`, so the decision and the
/// commit happen under the same borrow.
#[derive(Debug, Default)]
pub struct StateCache {
    entries: HashMap<EndpointKey, CacheEntry>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` and records `value` if it differs from the last
    /// published availability for `key`.
    pub fn should_publish_availability(&mut self, key: EndpointKey, value: bool) -> bool {
        let entry = self.entries.entry(key).or_default();
        if entry.availability == Some(value) {
            return false;
        }
        entry.availability = Some(value);
        true
    }

    /// Returns `true` and records `value` if it differs from the last
    /// published on/off state for `key`. Unknown readings are never
    /// published and never cached.
    pub fn should_publish_on_off(&mut self, key: EndpointKey, value: Option<bool>) -> bool {
        let Some(value) = value else {
            return false;
        };
        let entry = self.entries.entry(key).or_default();
        if entry.on_off == Some(value) {
            return false;
        }
        entry.on_off = Some(value);
        true
    }

    /// Record an on/off value that was published outside a refresh.
    pub fn record_on_off(&mut self, key: EndpointKey, value: bool) {
        self.entries.entry(key).or_default().on_off = Some(value);
    }

    /// Drop the cached availability so the next reading is published again.
    pub fn forget_availability(&mut self, key: EndpointKey) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.availability = None;
        }
    }

    /// Drop the cached on/off value so the next reading is published again.
    pub fn forget_on_off(&mut self, key: EndpointKey) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.on_off = None;
        }
    }

    pub fn last_availability(&self, key: EndpointKey) -> Option<bool> {
        self.entries.get(&key).and_then(|e| e.availability)
    }

    pub fn last_on_off(&self, key: EndpointKey) -> Option<bool> {
        self.entries.get(&key).and_then(|e| e.on_off)
    }

    /// Number of endpoints ever seen.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
