//! Error taxonomy for the bridge.
//!
//! Each collaborator reports failures through its own enum so that callers can
//! match on the category instead of inspecting messages. Only connection
//! failures of the message bus and the snapshot source are fatal; everything
//! else is logged where it happens.

use std::time::Duration;

use thiserror::Error;

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file does not exist.
    #[error("Configuration file '{0}' not found. Copy 'matter2mqtt.toml.example' and update it with your settings")]
    NotFound(String),

    /// Configuration file could not be read.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid TOML or has the wrong shape.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value failed validation.
    #[error("Invalid configuration value '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Snapshot source failures.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Could not establish the connection.
    #[error("Snapshot source connection failed: {0}")]
    ConnectionFailed(String),

    /// The transport is closed or closing.
    #[error("Snapshot source transport closed: {0}")]
    Closed(String),

    /// No response within the allowed time.
    #[error("Snapshot source timed out after {0:?}")]
    Timeout(Duration),

    /// The peer answered with something unexpected.
    #[error("Snapshot source protocol error: {0}")]
    Protocol(String),
}

/// Message bus failures.
#[derive(Debug, Error)]
pub enum BusError {
    /// Could not connect to the broker.
    #[error("Message bus connection failed: {0}")]
    ConnectionFailed(String),

    /// The bus has been closed.
    #[error("Message bus closed")]
    Closed,

    /// A publish request was rejected.
    #[error("Publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    /// A subscribe request was rejected.
    #[error("Subscribe to '{pattern}' failed: {reason}")]
    Subscribe { pattern: String, reason: String },
}

/// Command channel failures.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The channel lost its connection. This is the only category that
    /// triggers a reconnect-and-retry.
    #[error("Command channel not connected: {0}")]
    NotConnected(String),

    /// The requested action is not one of on, off or toggle.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The device did not answer in time.
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    /// The device or server refused the command.
    #[error("Command rejected: {0}")]
    Rejected(String),

    /// Connecting the channel failed.
    #[error("Command channel connection failed: {0}")]
    ConnectionFailed(String),

    /// No command channel can be used right now.
    #[error("Commands unavailable: {0}")]
    Unavailable(String),
}

impl CommandError {
    /// Whether this failure means the channel must be reconnected before
    /// another attempt can succeed.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::NotConnected(_))
    }
}

/// Supervisor-level failures.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Source(#[from] SourceError),

    /// `start` was called on a supervisor that already ran.
    #[error("Bridge already started")]
    AlreadyStarted,
}

impl BridgeError {
    /// Whether this failure is transport noise produced while shutting down.
    pub fn is_shutdown_noise(&self) -> bool {
        matches!(
            self,
            Self::Bus(BusError::Closed) | Self::Source(SourceError::Closed(_))
        )
    }
}

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_loss_classification() {
        assert!(CommandError::NotConnected("socket closed".into()).is_connection_loss());
        assert!(!CommandError::Timeout(Duration::from_secs(15)).is_connection_loss());
        assert!(!CommandError::Rejected("unsupported".into()).is_connection_loss());
        assert!(!CommandError::InvalidArgument("blink".into()).is_connection_loss());
    }

    #[test]
    fn test_shutdown_noise() {
        assert!(BridgeError::from(BusError::Closed).is_shutdown_noise());
        assert!(BridgeError::from(SourceError::Closed("closing transport".into())).is_shutdown_noise());
        assert!(!BridgeError::from(SourceError::Protocol("bad frame".into())).is_shutdown_noise());
        assert!(!BridgeError::from(ConfigError::invalid("mqtt.host", "empty")).is_shutdown_noise());
    }

    #[test]
    fn test_error_display() {
        let err = ConfigError::invalid("mqtt.port", "must be non-zero");
        assert_eq!(
            err.to_string(),
            "Invalid configuration value 'mqtt.port': must be non-zero"
        );

        let err = BusError::Publish {
            topic: "matter/1/1/state".into(),
            reason: "queue full".into(),
        };
        assert!(err.to_string().contains("matter/1/1/state"));
    }
}
