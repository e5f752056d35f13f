//! Snapshot polling and state publication.
//!
//! A refresh reads every node from the snapshot source, extracts the on/off
//! endpoints and publishes, in this order:
//!
//! 1. a discovery descriptor for every endpoint (always),
//! 2. availability for every endpoint whose availability changed,
//! 3. state for every endpoint whose known on/off value changed.
//!
//! Refreshes are serialized: the periodic task, the post-command
//! confirmation and optimistic state publication never interleave.

use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::discovery::DiscoveryConfig;
use crate::error::{BridgeError, BusError};
use crate::extractor::extract_onoff_endpoints;
use crate::model::{EndpointKey, EndpointRecord};
use crate::state_cache::StateCache;
use crate::topics::{availability_payload, state_payload, Topics};
use crate::traits::{DynMessageBus, DynSnapshotSource};

/// Summary of one refresh cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub endpoints: usize,
    pub discovery_published: usize,
    pub availability_published: usize,
    pub state_published: usize,
}

/// Outcome of a single publish attempt.
enum Published {
    Yes,
    Failed,
}

/// Reads snapshots and publishes what changed.
pub struct SnapshotPoller {
    source: DynSnapshotSource,
    bus: DynMessageBus,
    topics: Topics,
    publish_discovery: bool,
    /// Serializes refresh cycles and optimistic publishes.
    refresh_lock: Mutex<()>,
    /// Never held across an await.
    cache: SyncMutex<StateCache>,
}

impl SnapshotPoller {
    pub fn new(source: DynSnapshotSource, bus: DynMessageBus, topics: Topics) -> Self {
        Self {
            source,
            bus,
            topics,
            publish_discovery: true,
            refresh_lock: Mutex::new(()),
            cache: SyncMutex::new(StateCache::new()),
        }
    }

    /// Enable or disable discovery publication.
    pub fn with_discovery(mut self, enabled: bool) -> Self {
        self.publish_discovery = enabled;
        self
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Last published on/off value for an endpoint.
    pub fn last_published_state(&self, key: EndpointKey) -> Option<bool> {
        self.cache.lock().last_on_off(key)
    }

    /// Last published availability for an endpoint.
    pub fn last_published_availability(&self, key: EndpointKey) -> Option<bool> {
        self.cache.lock().last_availability(key)
    }

    /// Run one full refresh cycle.
    pub async fn refresh(&self) -> Result<RefreshReport, BridgeError> {
        let _cycle = self.refresh_lock.lock().await;

        let nodes = self.source.fetch_snapshot().await?;
        debug!("Retrieved {} nodes from snapshot source", nodes.len());

        let endpoints: Vec<EndpointRecord> =
            nodes.iter().flat_map(extract_onoff_endpoints).collect();
        if endpoints.is_empty() {
            debug!("No OnOff endpoints found");
            return Ok(RefreshReport::default());
        }

        let mut report = RefreshReport {
            endpoints: endpoints.len(),
            ..Default::default()
        };

        if self.publish_discovery {
            for ep in &endpoints {
                let key = ep.key();
                let payload = DiscoveryConfig::for_endpoint(&self.topics, key).to_json();
                if let Published::Yes = self.publish(&self.topics.discovery(key), &payload).await? {
                    report.discovery_published += 1;
                }
            }
        }

        for ep in &endpoints {
            let key = ep.key();
            if !self.cache.lock().should_publish_availability(key, ep.available) {
                continue;
            }
            let payload = availability_payload(ep.available);
            match self.publish(&self.topics.available(key), payload).await? {
                Published::Yes => {
                    report.availability_published += 1;
                    info!(
                        "Published availability for node {} endpoint {}: {}",
                        key.device_id, key.endpoint_id, payload
                    );
                }
                Published::Failed => self.cache.lock().forget_availability(key),
            }
        }

        for ep in &endpoints {
            let key = ep.key();
            if !self.cache.lock().should_publish_on_off(key, ep.on_off) {
                continue;
            }
            let Some(on) = ep.on_off else { continue };
            let payload = state_payload(on);
            match self.publish(&self.topics.state(key), payload).await? {
                Published::Yes => {
                    report.state_published += 1;
                    info!(
                        "Published state for node {} endpoint {}: {}",
                        key.device_id, key.endpoint_id, payload
                    );
                }
                Published::Failed => self.cache.lock().forget_on_off(key),
            }
        }

        let discovered: Vec<String> = endpoints.iter().map(|e| e.key().to_string()).collect();
        info!("Discovered OnOff endpoints: {}", discovered.join(", "));

        Ok(report)
    }

    /// Publish a commanded state before the device confirms it.
    ///
    /// The value is recorded as published so that the confirming refresh
    /// republishes only if the device ended up in a different state. Waits
    /// for a refresh in progress, so the bus and the cache agree afterwards.
    pub async fn publish_optimistic_state(&self, key: EndpointKey, on: bool) -> Result<(), BusError> {
        let _cycle = self.refresh_lock.lock().await;
        self.bus
            .publish_retained(&self.topics.state(key), state_payload(on))
            .await?;
        self.cache.lock().record_on_off(key, on);
        Ok(())
    }

    /// Refresh every `period` until the task is cancelled or the transport
    /// shuts down. The first refresh happens one period after the call.
    pub async fn run_periodic(&self, period: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.refresh().await {
                Ok(report) => debug!(?report, "Periodic refresh complete"),
                Err(e) if e.is_shutdown_noise() => {
                    debug!("Transport closing, stopping periodic refresh: {}", e);
                    break;
                }
                Err(e) => error!("Snapshot refresh error: {}", e),
            }
        }
    }

    /// Publish one retained message. A closed bus aborts the cycle, any other
    /// failure only affects this message.
    async fn publish(&self, topic: &str, payload: &str) -> Result<Published, BridgeError> {
        match self.bus.publish_retained(topic, payload).await {
            Ok(()) => Ok(Published::Yes),
            Err(BusError::Closed) => Err(BusError::Closed.into()),
            Err(e) => {
                warn!("Failed to publish to {}: {}", topic, e);
                Ok(Published::Failed)
            }
        }
    }
}
