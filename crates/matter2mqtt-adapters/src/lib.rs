//! Concrete collaborators for the matter2mqtt bridge.
//!
//! - [`mqtt::MqttBus`]: `MessageBus` over an MQTT broker (feature `mqtt`)
//! - [`matter::MatterWsSource`]: `SnapshotSource` over the Matter server
//!   WebSocket API (feature `websocket`)
//! - [`matter::MatterWsCommandChannel`]: `CommandChannel` over the same API,
//!   on its own connection (feature `websocket`)

#[cfg(feature = "websocket")]
pub mod matter;
#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "websocket")]
pub use matter::{MatterWsCommandChannel, MatterWsSource};
#[cfg(feature = "mqtt")]
pub use mqtt::MqttBus;
