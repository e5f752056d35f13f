//! Synchronization engine between a Matter device snapshot source and an
//! MQTT-style message bus.
//!
//! The engine periodically reads full attribute snapshots, extracts the
//! on/off endpoints and publishes their availability and state as retained
//! messages, publishing only what changed. Command messages arriving on the
//! bus are queued across threads and forwarded to a command channel with a
//! single reconnect-and-retry on connection loss.
//!
//! Transports are abstracted behind the traits in [`traits`]; concrete
//! implementations live in the `matter2mqtt-adapters` crate.

pub mod bridge;
pub mod commander;
pub mod config;
pub mod discovery;
pub mod error;
pub mod extractor;
pub mod model;
pub mod poller;
pub mod state_cache;
pub mod supervisor;
pub mod topics;
pub mod traits;

pub use bridge::{
    command_queue, CommandBridge, CommandIngress, CommandQueue, CONNECT_RETRY_INTERVAL,
};
pub use commander::{CommandChannelManager, ConnectionState};
pub use config::{BridgeConfig, BridgeSettings, MatterSettings, MqttSettings};
pub use error::{BridgeError, BusError, CommandError, ConfigError, Result, SourceError};
pub use extractor::extract_onoff_endpoints;
pub use model::{Command, EndpointKey, EndpointRecord, Handshake, NodeSnapshot, OnOffAction};
pub use poller::{RefreshReport, SnapshotPoller};
pub use state_cache::StateCache;
pub use supervisor::BridgeSupervisor;
pub use topics::Topics;
pub use traits::{
    CommandChannel, DynCommandChannel, DynMessageBus, DynSnapshotSource, MessageBus,
    MessageHandler, SnapshotSource,
};

/// Version of the bridge.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
