//! Snapshot builders.

use matter2mqtt_core::extractor::{ONOFF_ATTRIBUTE_ID, ONOFF_CLUSTER_ID};
use matter2mqtt_core::NodeSnapshot;
use serde_json::Value;

/// Attribute key of the on/off attribute on `endpoint`.
pub fn onoff_attribute_key(endpoint: u16) -> String {
    format!("{}/{}/{}", endpoint, ONOFF_CLUSTER_ID, ONOFF_ATTRIBUTE_ID)
}

/// Build a node whose listed endpoints expose the on/off cluster.
///
/// An endpoint with `None` gets a non-boolean on/off attribute, so it is
/// discovered but has no known state.
pub fn on_off_node(node_id: u64, available: bool, endpoints: &[(u16, Option<bool>)]) -> NodeSnapshot {
    endpoints
        .iter()
        .fold(NodeSnapshot::new(node_id, available), |node, (endpoint, on)| {
            let value = match on {
                Some(on) => Value::Bool(*on),
                None => Value::Null,
            };
            node.with_attribute(onoff_attribute_key(*endpoint), value)
        })
}
