//! Collaborator capabilities.
//!
//! The bridge talks to the outside world through three traits. Concrete
//! implementations live in `matter2mqtt-adapters`; in-memory fakes live in
//! `matter2mqtt-testing`.
//!
//! ```text
//!  SnapshotSource ──snapshot──▶ ┌────────────┐ ──retained──▶ MessageBus
//!                               │   bridge   │
//!  CommandChannel ◀──command─── └────────────┘ ◀──callback── MessageBus
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{BusError, CommandError, SourceError};
use crate::model::{EndpointKey, Handshake, NodeSnapshot, OnOffAction};

/// Callback invoked for each message arriving on a subscribed topic.
///
/// It may run on the bus's own thread and must not block.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Source of full attribute snapshots.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Connect and return the server greeting.
    async fn connect(&self) -> Result<Handshake, SourceError>;

    /// Read the current state of every known node.
    async fn fetch_snapshot(&self) -> Result<Vec<NodeSnapshot>, SourceError>;

    async fn close(&self) -> Result<(), SourceError>;
}

/// Publish/subscribe messaging layer.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Install the callback for arriving messages. Must be called before
    /// `connect` to avoid missing retained command messages.
    fn set_message_handler(&self, handler: MessageHandler);

    async fn connect(&self) -> Result<(), BusError>;

    async fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), BusError>;

    async fn subscribe(&self, pattern: &str) -> Result<(), BusError>;

    async fn close(&self) -> Result<(), BusError>;
}

/// Path for sending on/off commands to devices.
///
/// Implementations report a lost connection as
/// [`CommandError::NotConnected`]; callers bound `send_command` with their
/// own timeout.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn connect(&self) -> Result<(), CommandError>;

    async fn send_command(&self, key: EndpointKey, action: OnOffAction)
        -> Result<(), CommandError>;

    async fn close(&self) -> Result<(), CommandError>;
}

pub type DynSnapshotSource = Arc<dyn SnapshotSource>;
pub type DynMessageBus = Arc<dyn MessageBus>;
pub type DynCommandChannel = Arc<dyn CommandChannel>;
