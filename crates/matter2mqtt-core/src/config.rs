//! Bridge configuration.
//!
//! The configuration is read once at startup from a TOML file and passed by
//! `Arc` to every component.
//!
//! ```toml
//! [mqtt]
//! host = "localhost"
//! port = 1883
//!
//! [matter]
//! url = "ws://localhost:5580/ws"
//!
//! [bridge]
//! topic_namespace = "matter"
//! refresh_interval_secs = 30
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "matter2mqtt.toml";

/// Environment variable overriding the configuration file path.
pub const CONFIG_PATH_ENV: &str = "MATTER2MQTT_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub mqtt: MqttSettings,
    pub matter: MatterSettings,
    #[serde(default)]
    pub bridge: BridgeSettings,
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,

    /// Client ID (auto-generated if not provided)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// QoS level for publications and subscriptions
    #[serde(default = "default_qos")]
    pub qos: u8,

    /// How long to wait for the broker to acknowledge the connection
    #[serde(default = "default_mqtt_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// How long a publish may wait for room in the client request queue
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_secs: u64,
}

/// Matter server WebSocket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatterSettings {
    pub url: String,

    #[serde(default = "default_matter_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Synchronization behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// First segment of every state, availability and command topic
    #[serde(default = "default_namespace")]
    pub topic_namespace: String,

    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,

    /// Home Assistant component used for discovery (e.g. `light`, `switch`)
    #[serde(default = "default_discovery_component")]
    pub discovery_component: String,

    #[serde(default = "default_true")]
    pub enable_discovery: bool,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Wait between a successful command and the confirming refresh
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
}

fn default_keep_alive() -> u64 {
    60
}
fn default_qos() -> u8 {
    1
}
fn default_mqtt_connect_timeout() -> u64 {
    10
}
fn default_publish_timeout() -> u64 {
    5
}
fn default_matter_connect_timeout() -> u64 {
    5
}
fn default_request_timeout() -> u64 {
    15
}
fn default_namespace() -> String {
    "matter".to_string()
}
fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}
fn default_discovery_component() -> String {
    "light".to_string()
}
fn default_true() -> bool {
    true
}
fn default_refresh_interval() -> u64 {
    30
}
fn default_command_timeout() -> u64 {
    15
}
fn default_settle_delay() -> u64 {
    1000
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            topic_namespace: default_namespace(),
            discovery_prefix: default_discovery_prefix(),
            discovery_component: default_discovery_component(),
            enable_discovery: true,
            refresh_interval_secs: default_refresh_interval(),
            command_timeout_secs: default_command_timeout(),
            settle_delay_ms: default_settle_delay(),
        }
    }
}

impl MqttSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            qos: default_qos(),
            connect_timeout_secs: default_mqtt_connect_timeout(),
            publish_timeout_secs: default_publish_timeout(),
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Configured client ID, or a fresh unique one.
    pub fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("matter2mqtt-{}", uuid::Uuid::new_v4()))
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }
}

impl MatterSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout_secs: default_matter_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl BridgeSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl BridgeConfig {
    pub fn new(mqtt: MqttSettings, matter: MatterSettings) -> Self {
        Self {
            mqtt,
            matter,
            bridge: BridgeSettings::default(),
        }
    }

    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value that the TOML schema alone cannot constrain.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::invalid("mqtt.host", "must not be empty"));
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::invalid("mqtt.port", "must be non-zero"));
        }
        if self.mqtt.qos > 2 {
            return Err(ConfigError::invalid(
                "mqtt.qos",
                format!("{} is not a QoS level (0, 1 or 2)", self.mqtt.qos),
            ));
        }
        if self.mqtt.username.is_some() != self.mqtt.password.is_some() {
            return Err(ConfigError::invalid(
                "mqtt.username",
                "username and password must be set together",
            ));
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::invalid("mqtt.connect_timeout_secs", "must be non-zero"));
        }
        if self.mqtt.publish_timeout_secs == 0 {
            return Err(ConfigError::invalid("mqtt.publish_timeout_secs", "must be non-zero"));
        }

        let url = self.matter.url.trim();
        if url.is_empty() {
            return Err(ConfigError::invalid("matter.url", "must not be empty"));
        }
        if !url.starts_with("ws://") {
            return Err(ConfigError::invalid(
                "matter.url",
                format!("'{}' is not a ws:// URL", url),
            ));
        }
        if self.matter.connect_timeout_secs == 0 || self.matter.request_timeout_secs == 0 {
            return Err(ConfigError::invalid("matter", "timeouts must be non-zero"));
        }

        let ns = &self.bridge.topic_namespace;
        if ns.is_empty() {
            return Err(ConfigError::invalid("bridge.topic_namespace", "must not be empty"));
        }
        if ns.contains(['/', '+', '#']) {
            return Err(ConfigError::invalid(
                "bridge.topic_namespace",
                "must be a single topic level without wildcards",
            ));
        }
        if self.bridge.discovery_prefix.is_empty() || self.bridge.discovery_component.is_empty() {
            return Err(ConfigError::invalid(
                "bridge.discovery_prefix",
                "discovery prefix and component must not be empty",
            ));
        }
        if self.bridge.refresh_interval_secs == 0 {
            return Err(ConfigError::invalid("bridge.refresh_interval_secs", "must be non-zero"));
        }
        if self.bridge.command_timeout_secs == 0 {
            return Err(ConfigError::invalid("bridge.command_timeout_secs", "must be non-zero"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [mqtt]
        host = "broker.local"
        port = 1883

        [matter]
        url = "ws://matter.local:5580/ws"
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = BridgeConfig::from_toml_str(MINIMAL).unwrap();

        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.qos, 1);
        assert_eq!(config.mqtt.keep_alive(), Duration::from_secs(60));
        assert_eq!(config.mqtt.publish_timeout(), Duration::from_secs(5));
        assert_eq!(config.matter.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.bridge.topic_namespace, "matter");
        assert_eq!(config.bridge.refresh_interval(), Duration::from_secs(30));
        assert_eq!(config.bridge.command_timeout(), Duration::from_secs(15));
        assert_eq!(config.bridge.settle_delay(), Duration::from_secs(1));
        assert!(config.bridge.enable_discovery);
    }

    #[test]
    fn test_missing_section_is_rejected() {
        let err = BridgeConfig::from_toml_str("[mqtt]\nhost = \"x\"\nport = 1883\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_port_is_rejected() {
        let toml = "[mqtt]\nhost = \"x\"\n[matter]\nurl = \"ws://m/ws\"\n";
        assert!(matches!(
            BridgeConfig::from_toml_str(toml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validation() {
        let base = BridgeConfig::from_toml_str(MINIMAL).unwrap();

        let mut config = base.clone();
        config.mqtt.qos = 3;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "mqtt.qos", .. })
        ));

        let mut config = base.clone();
        config.mqtt.username = Some("user".into());
        assert!(config.validate().is_err());
        config.mqtt.password = Some("secret".into());
        assert!(config.validate().is_ok());

        let mut config = base.clone();
        config.matter.url = "http://matter.local".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "matter.url", .. })
        ));

        let mut config = base.clone();
        config.bridge.topic_namespace = "matter/+".into();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.mqtt.publish_timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "mqtt.publish_timeout_secs", .. })
        ));

        let mut config = base;
        config.bridge.refresh_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = BridgeConfig::load("/nonexistent/matter2mqtt.toml").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_client_id_generation() {
        let settings = MqttSettings::new("localhost", 1883);
        assert!(settings.client_id().starts_with("matter2mqtt-"));

        let mut settings = settings;
        settings.client_id = Some("bridge-1".into());
        assert_eq!(settings.client_id(), "bridge-1");
    }
}
