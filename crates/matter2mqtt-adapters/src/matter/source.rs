//! Snapshot source over the Matter server WebSocket.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use matter2mqtt_core::{Handshake, MatterSettings, NodeSnapshot, SnapshotSource, SourceError};

use super::rpc::MatterRpc;

/// Command returning the full node list.
const SNAPSHOT_COMMAND: &str = "start_listening";

/// Reads node snapshots with `start_listening`.
///
/// A dropped connection is re-opened by the next `fetch_snapshot`, so the
/// periodic refresh doubles as the reconnect loop.
pub struct MatterWsSource {
    rpc: MatterRpc,
}

impl MatterWsSource {
    pub fn new(settings: &MatterSettings) -> Self {
        Self {
            rpc: MatterRpc::new(settings),
        }
    }

    async fn open(&self) -> Result<Handshake, SourceError> {
        let hello = self.rpc.open().await?;
        Ok(parse_handshake(hello))
    }
}

/// Read the server info frame. Unknown layouts yield an empty handshake.
pub(crate) fn parse_handshake(hello: Value) -> Handshake {
    serde_json::from_value(hello).unwrap_or_else(|e| {
        debug!("Unrecognized Matter server info frame: {}", e);
        Handshake::default()
    })
}

/// Decode the `start_listening` result. Entries that are not nodes are
/// skipped; a result that is not a list yields no nodes.
pub(crate) fn parse_nodes(result: Value) -> Vec<NodeSnapshot> {
    let Value::Array(entries) = result else {
        warn!("Unexpected response format from Matter WebSocket");
        return Vec::new();
    };

    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<NodeSnapshot>(entry) {
            Ok(node) => Some(node),
            Err(e) => {
                debug!("Skipping malformed node entry: {}", e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl SnapshotSource for MatterWsSource {
    async fn connect(&self) -> Result<Handshake, SourceError> {
        info!("Connecting to Matter WebSocket at {}", self.rpc.url());
        let handshake = self.open().await.map_err(|e| {
            warn!("Failed to connect to Matter WebSocket: {}", e);
            e
        })?;
        info!("Matter WebSocket connection established");
        Ok(handshake)
    }

    async fn fetch_snapshot(&self) -> Result<Vec<NodeSnapshot>, SourceError> {
        if !self.rpc.is_closed() && !self.rpc.is_open().await {
            info!("Reconnecting to Matter WebSocket at {}", self.rpc.url());
            self.open().await?;
        }

        let result = self.rpc.request(SNAPSHOT_COMMAND, json!({})).await?;
        let nodes = parse_nodes(result);
        debug!("Retrieved {} nodes from Matter", nodes.len());
        Ok(nodes)
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.rpc.close().await?;
        Ok(())
    }
}
