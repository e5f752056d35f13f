//! On/off commands over the Matter server WebSocket.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use matter2mqtt_core::extractor::ONOFF_CLUSTER_ID;
use matter2mqtt_core::{CommandChannel, CommandError, EndpointKey, MatterSettings, OnOffAction};

use super::rpc::MatterRpc;

const DEVICE_COMMAND: &str = "device_command";

/// Command name of an action in the OnOff cluster.
pub fn command_name(action: OnOffAction) -> &'static str {
    match action {
        OnOffAction::On => "On",
        OnOffAction::Off => "Off",
        OnOffAction::Toggle => "Toggle",
    }
}

/// Arguments of a `device_command` request.
pub(crate) fn device_command_args(key: EndpointKey, action: OnOffAction) -> Value {
    json!({
        "node_id": key.device_id,
        "endpoint_id": key.endpoint_id,
        "cluster_id": ONOFF_CLUSTER_ID,
        "command_name": command_name(action),
        "payload": {},
    })
}

/// Sends OnOff cluster commands on a dedicated connection.
///
/// A dropped connection surfaces as [`CommandError::NotConnected`]; the
/// reconnect is left to the caller.
pub struct MatterWsCommandChannel {
    rpc: MatterRpc,
}

impl MatterWsCommandChannel {
    pub fn new(settings: &MatterSettings) -> Self {
        Self {
            rpc: MatterRpc::new(settings),
        }
    }
}

#[async_trait]
impl CommandChannel for MatterWsCommandChannel {
    async fn connect(&self) -> Result<(), CommandError> {
        self.rpc.open().await?;
        info!("Matter commander connected to {}", self.rpc.url());
        Ok(())
    }

    async fn send_command(&self, key: EndpointKey, action: OnOffAction) -> Result<(), CommandError> {
        debug!(
            "Sending {} command to node {} endpoint {}",
            command_name(action),
            key.device_id,
            key.endpoint_id
        );
        self.rpc
            .request(DEVICE_COMMAND, device_command_args(key, action))
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), CommandError> {
        self.rpc.close().await?;
        Ok(())
    }
}
