//! Data model shared by every bridge component.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CommandError;

/// Identity of one endpoint on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointKey {
    pub device_id: u64,
    pub endpoint_id: u16,
}

impl EndpointKey {
    pub fn new(device_id: u64, endpoint_id: u16) -> Self {
        Self {
            device_id,
            endpoint_id,
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.endpoint_id)
    }
}

/// An endpoint exposing the on/off capability, as seen in one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRecord {
    pub device_id: u64,
    pub endpoint_id: u16,
    pub available: bool,
    /// `None` when the on/off attribute is missing or not a boolean.
    pub on_off: Option<bool>,
}

impl EndpointRecord {
    pub fn key(&self) -> EndpointKey {
        EndpointKey::new(self.device_id, self.endpoint_id)
    }
}

/// Raw state of one node as reported by the snapshot source.
///
/// Attribute keys have the form `"<endpoint>/<cluster>/<attribute>"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_id: u64,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl NodeSnapshot {
    pub fn new(node_id: u64, available: bool) -> Self {
        Self {
            node_id,
            available,
            attributes: Map::new(),
        }
    }

    /// Builder-style attribute insertion, mostly for tests and fakes.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Greeting returned by the snapshot source on connect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub sdk_version: Option<String>,
}

/// Action requested for an on/off endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnOffAction {
    On,
    Off,
    Toggle,
}

impl OnOffAction {
    /// Map an MQTT command payload to an action.
    ///
    /// Accepts `ON|1|TRUE`, `OFF|0|FALSE` and `TOGGLE|T` in any case, with
    /// surrounding whitespace ignored.
    pub fn from_payload(payload: &str) -> Option<Self> {
        match payload.trim().to_ascii_uppercase().as_str() {
            "ON" | "1" | "TRUE" => Some(Self::On),
            "OFF" | "0" | "FALSE" => Some(Self::Off),
            "TOGGLE" | "T" => Some(Self::Toggle),
            _ => None,
        }
    }

    /// The state the endpoint should end up in, when it is known up front.
    pub fn desired_state(self) -> Option<bool> {
        match self {
            Self::On => Some(true),
            Self::Off => Some(false),
            Self::Toggle => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Toggle => "toggle",
        }
    }
}

impl fmt::Display for OnOffAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OnOffAction {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "toggle" => Ok(Self::Toggle),
            other => Err(CommandError::InvalidArgument(format!(
                "unknown action '{}', expected on, off or toggle",
                other
            ))),
        }
    }
}

/// A command received from the bus, waiting to be sent to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub device_id: u64,
    pub endpoint_id: u16,
    pub action: OnOffAction,
}

impl Command {
    pub fn new(key: EndpointKey, action: OnOffAction) -> Self {
        Self {
            device_id: key.device_id,
            endpoint_id: key.endpoint_id,
            action,
        }
    }

    pub fn key(&self) -> EndpointKey {
        EndpointKey::new(self.device_id, self.endpoint_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_families() {
        for payload in ["ON", "on", "1", "true", " True "] {
            assert_eq!(OnOffAction::from_payload(payload), Some(OnOffAction::On));
        }
        for payload in ["OFF", "off", "0", "FALSE"] {
            assert_eq!(OnOffAction::from_payload(payload), Some(OnOffAction::Off));
        }
        for payload in ["TOGGLE", "toggle", "t", "T"] {
            assert_eq!(OnOffAction::from_payload(payload), Some(OnOffAction::Toggle));
        }
        assert_eq!(OnOffAction::from_payload("blorp"), None);
        assert_eq!(OnOffAction::from_payload(""), None);
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!("on".parse::<OnOffAction>().unwrap(), OnOffAction::On);
        assert_eq!("toggle".parse::<OnOffAction>().unwrap(), OnOffAction::Toggle);

        let err = "dim".parse::<OnOffAction>().unwrap_err();
        assert!(matches!(err, CommandError::InvalidArgument(_)));
    }

    #[test]
    fn test_desired_state() {
        assert_eq!(OnOffAction::On.desired_state(), Some(true));
        assert_eq!(OnOffAction::Off.desired_state(), Some(false));
        assert_eq!(OnOffAction::Toggle.desired_state(), None);
    }

    #[test]
    fn test_node_snapshot_deserialize() {
        let json = serde_json::json!({
            "node_id": 7,
            "available": true,
            "attributes": { "1/6/0": false },
            "is_bridge": false
        });
        let node: NodeSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(node.node_id, 7);
        assert!(node.available);
        assert_eq!(node.attributes.get("1/6/0"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_endpoint_key_display() {
        assert_eq!(EndpointKey::new(42, 3).to_string(), "42/3");
    }
}
