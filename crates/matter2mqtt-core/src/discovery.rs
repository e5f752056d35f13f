//! Home Assistant MQTT discovery descriptors.
//!
//! One descriptor is published per on/off endpoint to
//! `homeassistant/<component>/<unique_id>/config` so that Home Assistant (and
//! compatible consumers) register the endpoint as a controllable entity.

use serde::{Deserialize, Serialize};

use crate::model::EndpointKey;
use crate::topics::{Topics, PAYLOAD_AVAILABLE, PAYLOAD_OFF, PAYLOAD_ON, PAYLOAD_UNAVAILABLE};

/// Discovery config message for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub name: String,
    pub unique_id: String,
    pub state_topic: String,
    pub command_topic: String,
    pub availability_topic: String,
    pub payload_on: String,
    pub payload_off: String,
    pub payload_available: String,
    pub payload_not_available: String,
    pub device: DiscoveryDevice,
}

/// Device block shared by all endpoints of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDevice {
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

impl DiscoveryConfig {
    pub fn for_endpoint(topics: &Topics, key: EndpointKey) -> Self {
        Self {
            name: format!("Matter {}/{}", key.device_id, key.endpoint_id),
            unique_id: topics.unique_id(key),
            state_topic: topics.state(key),
            command_topic: topics.command(key),
            availability_topic: topics.available(key),
            payload_on: PAYLOAD_ON.to_string(),
            payload_off: PAYLOAD_OFF.to_string(),
            payload_available: PAYLOAD_AVAILABLE.to_string(),
            payload_not_available: PAYLOAD_UNAVAILABLE.to_string(),
            device: DiscoveryDevice {
                identifiers: vec![format!("{}_node_{}", topics.namespace(), key.device_id)],
                name: format!("Matter Node {}", key.device_id),
                manufacturer: "Matter".to_string(),
                model: "OnOff Device".to_string(),
            },
        }
    }

    pub fn to_json(&self) -> String {
        // Only string fields, serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
