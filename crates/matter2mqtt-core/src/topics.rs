//! MQTT topic layout.
//!
//! ## Topic Format
//!
//! State: `{namespace}/{device_id}/{endpoint_id}/state` (`ON` / `OFF`)
//! Availability: `{namespace}/{device_id}/{endpoint_id}/available` (`true` / `false`)
//! Command: `{namespace}/{device_id}/{endpoint_id}/set`
//! Discovery: `{discovery_prefix}/{component}/{namespace}_{device_id}_{endpoint_id}/config`

use thiserror::Error;

use crate::config::BridgeSettings;
use crate::model::{Command, EndpointKey, OnOffAction};

pub const PAYLOAD_ON: &str = "ON";
pub const PAYLOAD_OFF: &str = "OFF";
pub const PAYLOAD_AVAILABLE: &str = "true";
pub const PAYLOAD_UNAVAILABLE: &str = "false";

const STATE_SUFFIX: &str = "state";
const AVAILABLE_SUFFIX: &str = "available";
const COMMAND_SUFFIX: &str = "set";

/// Reasons an incoming command message is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngressError {
    #[error("topic '{0}' is not a command topic")]
    NotCommandTopic(String),

    #[error("topic '{0}' has a non-numeric device or endpoint id")]
    InvalidId(String),

    #[error("unknown payload '{payload}' on {topic}")]
    UnknownPayload { topic: String, payload: String },
}

/// Topic naming for one bridge instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    namespace: String,
    discovery_prefix: String,
    discovery_component: String,
}

impl Topics {
    pub fn new(
        namespace: impl Into<String>,
        discovery_prefix: impl Into<String>,
        discovery_component: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            discovery_prefix: discovery_prefix.into(),
            discovery_component: discovery_component.into(),
        }
    }

    pub fn from_settings(settings: &BridgeSettings) -> Self {
        Self::new(
            settings.topic_namespace.clone(),
            settings.discovery_prefix.clone(),
            settings.discovery_component.clone(),
        )
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn state(&self, key: EndpointKey) -> String {
        self.endpoint_topic(key, STATE_SUFFIX)
    }

    pub fn available(&self, key: EndpointKey) -> String {
        self.endpoint_topic(key, AVAILABLE_SUFFIX)
    }

    pub fn command(&self, key: EndpointKey) -> String {
        self.endpoint_topic(key, COMMAND_SUFFIX)
    }

    /// Subscription filter matching every command topic.
    pub fn command_filter(&self) -> String {
        format!("{}/+/+/{}", self.namespace, COMMAND_SUFFIX)
    }

    pub fn discovery(&self, key: EndpointKey) -> String {
        format!(
            "{}/{}/{}/config",
            self.discovery_prefix,
            self.discovery_component,
            self.unique_id(key)
        )
    }

    /// Stable identifier of an endpoint across restarts.
    pub fn unique_id(&self, key: EndpointKey) -> String {
        format!("{}_{}_{}", self.namespace, key.device_id, key.endpoint_id)
    }

    /// Parse a command message. The topic must have exactly four levels:
    /// namespace, device id, endpoint id and `set`.
    pub fn parse_command(&self, topic: &str, payload: &[u8]) -> Result<Command, IngressError> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() != 4 || parts[0] != self.namespace || parts[3] != COMMAND_SUFFIX {
            return Err(IngressError::NotCommandTopic(topic.to_string()));
        }

        let device_id: u64 = parts[1]
            .parse()
            .map_err(|_| IngressError::InvalidId(topic.to_string()))?;
        let endpoint_id: u16 = parts[2]
            .parse()
            .map_err(|_| IngressError::InvalidId(topic.to_string()))?;

        let payload = String::from_utf8_lossy(payload);
        let action =
            OnOffAction::from_payload(&payload).ok_or_else(|| IngressError::UnknownPayload {
                topic: topic.to_string(),
                payload: payload.trim().to_string(),
            })?;

        Ok(Command::new(EndpointKey::new(device_id, endpoint_id), action))
    }

    fn endpoint_topic(&self, key: EndpointKey, suffix: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.namespace, key.device_id, key.endpoint_id, suffix
        )
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::from_settings(&BridgeSettings::default())
    }
}

pub fn state_payload(on: bool) -> &'static str {
    if on {
        PAYLOAD_ON
    } else {
        PAYLOAD_OFF
    }
}

pub fn availability_payload(available: bool) -> &'static str {
    if available {
        PAYLOAD_AVAILABLE
    } else {
        PAYLOAD_UNAVAILABLE
    }
}
