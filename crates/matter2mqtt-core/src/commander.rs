//! Connection management for the device command channel.
//!
//! ## State Machine
//!
//! ```text
//! Disconnected ──connect──▶ Connected ──connection lost──▶ Reconnecting
//!      ▲                        ▲                              │
//!      └────── reconnect failed ┴──────── reconnected ─────────┘
//! ```
//!
//! Connection attempts are serialized by a single lock. A send that fails
//! because the connection was lost gets exactly one reconnect and one retry;
//! a second failure is returned to the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::CommandError;
use crate::model::{EndpointKey, OnOffAction};
use crate::traits::DynCommandChannel;

/// Connection state of the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Reconnecting,
}

/// Owns the lifecycle of a [`CommandChannel`](crate::traits::CommandChannel).
pub struct CommandChannelManager {
    channel: DynCommandChannel,
    /// Held for the duration of every connect or reconnect attempt.
    connect_lock: Mutex<()>,
    state: RwLock<ConnectionState>,
    reconnect_count: AtomicU64,
}

impl CommandChannelManager {
    pub fn new(channel: DynCommandChannel) -> Self {
        Self {
            channel,
            connect_lock: Mutex::new(()),
            state: RwLock::new(ConnectionState::Disconnected),
            reconnect_count: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of reconnects performed after a lost connection.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    /// Connect if not already connected. Concurrent callers wait for the
    /// attempt in progress instead of starting their own.
    pub async fn connect(&self) -> Result<(), CommandError> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        match self.channel.connect().await {
            Ok(()) => {
                *self.state.write() = ConnectionState::Connected;
                info!("Command channel connected");
                Ok(())
            }
            Err(e) => {
                *self.state.write() = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Send an on/off command, bounded by `timeout` per attempt.
    pub async fn send_on_off(
        &self,
        key: EndpointKey,
        action: OnOffAction,
        timeout: Duration,
    ) -> Result<(), CommandError> {
        self.connect().await?;

        debug!("Sending {} command to {}", action, key);
        match self.send_once(key, action, timeout).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_connection_loss() => {
                info!("Reconnecting command channel after disconnection: {}", e);
                self.reconnect().await?;
                info!("Retrying {} command to {}", action, key);
                self.send_once(key, action, timeout).await
            }
            Err(e) => {
                error!("Failed to send {} command to {}: {}", action, key, e);
                Err(e)
            }
        }
    }

    /// Close the channel.
    pub async fn close(&self) -> Result<(), CommandError> {
        let _guard = self.connect_lock.lock().await;
        *self.state.write() = ConnectionState::Disconnected;
        self.channel.close().await
    }

    async fn send_once(
        &self,
        key: EndpointKey,
        action: OnOffAction,
        timeout: Duration,
    ) -> Result<(), CommandError> {
        let result = tokio::time::timeout(timeout, self.channel.send_command(key, action))
            .await
            .map_err(|_| CommandError::Timeout(timeout))?;

        if let Err(e) = &result {
            if e.is_connection_loss() {
                *self.state.write() = ConnectionState::Disconnected;
            }
        }
        result
    }

    /// Drop the current connection and open a new one.
    async fn reconnect(&self) -> Result<(), CommandError> {
        let _guard = self.connect_lock.lock().await;
        *self.state.write() = ConnectionState::Reconnecting;
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.channel.close().await {
            debug!("Error closing command channel during reconnect: {}", e);
        }

        match self.channel.connect().await {
            Ok(()) => {
                *self.state.write() = ConnectionState::Connected;
                info!("Command channel reconnected");
                Ok(())
            }
            Err(e) => {
                *self.state.write() = ConnectionState::Disconnected;
                warn!("Command channel reconnect failed: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Channel whose send results are scripted in advance.
    #[derive(Default)]
    struct ScriptedChannel {
        sends: parking_lot::Mutex<VecDeque<Result<(), CommandError>>>,
        connects: AtomicU64,
        closes: AtomicU64,
        send_calls: AtomicU64,
        fail_connect: std::sync::atomic::AtomicBool,
    }

    impl ScriptedChannel {
        fn with_sends(results: Vec<Result<(), CommandError>>) -> Arc<Self> {
            let channel = Self::default();
            *channel.sends.lock() = results.into();
            Arc::new(channel)
        }
    }

    #[async_trait]
    impl crate::traits::CommandChannel for ScriptedChannel {
        async fn connect(&self) -> Result<(), CommandError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(CommandError::ConnectionFailed("refused".into()));
            }
            Ok(())
        }

        async fn send_command(
            &self,
            _key: EndpointKey,
            _action: OnOffAction,
        ) -> Result<(), CommandError> {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            self.sends.lock().pop_front().unwrap_or(Ok(()))
        }

        async fn close(&self) -> Result<(), CommandError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    const KEY: EndpointKey = EndpointKey {
        device_id: 42,
        endpoint_id: 3,
    };
    const TIMEOUT: Duration = Duration::from_secs(15);

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let channel = ScriptedChannel::with_sends(vec![]);
        let manager = CommandChannelManager::new(channel.clone());

        manager.connect().await.unwrap();
        manager.connect().await.unwrap();

        assert_eq!(channel.connects.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_send_connects_lazily() {
        let channel = ScriptedChannel::with_sends(vec![Ok(())]);
        let manager = CommandChannelManager::new(channel.clone());

        manager
            .send_on_off(KEY, OnOffAction::On, TIMEOUT)
            .await
            .unwrap();

        assert_eq!(channel.connects.load(Ordering::SeqCst), 1);
        assert_eq!(channel.send_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_loss_retries_once() {
        let channel = ScriptedChannel::with_sends(vec![
            Err(CommandError::NotConnected("socket closed".into())),
            Ok(()),
        ]);
        let manager = CommandChannelManager::new(channel.clone());
        manager.connect().await.unwrap();

        manager
            .send_on_off(KEY, OnOffAction::Toggle, TIMEOUT)
            .await
            .unwrap();

        assert_eq!(manager.reconnect_count(), 1);
        assert_eq!(channel.closes.load(Ordering::SeqCst), 1);
        assert_eq!(channel.connects.load(Ordering::SeqCst), 2);
        assert_eq!(channel.send_calls.load(Ordering::SeqCst), 2);
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_second_connection_loss_is_surfaced() {
        let channel = ScriptedChannel::with_sends(vec![
            Err(CommandError::NotConnected("first".into())),
            Err(CommandError::NotConnected("second".into())),
            Ok(()),
        ]);
        let manager = CommandChannelManager::new(channel.clone());

        let err = manager
            .send_on_off(KEY, OnOffAction::On, TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::NotConnected(ref m) if m == "second"));
        assert_eq!(manager.reconnect_count(), 1);
        assert_eq!(channel.send_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_other_failures_are_not_retried() {
        let channel =
            ScriptedChannel::with_sends(vec![Err(CommandError::Rejected("busy".into()))]);
        let manager = CommandChannelManager::new(channel.clone());

        let err = manager
            .send_on_off(KEY, OnOffAction::Off, TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::Rejected(_)));
        assert_eq!(manager.reconnect_count(), 0);
        assert_eq!(channel.send_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_reconnect_aborts_command() {
        let channel =
            ScriptedChannel::with_sends(vec![Err(CommandError::NotConnected("gone".into()))]);
        let manager = CommandChannelManager::new(channel.clone());
        manager.connect().await.unwrap();
        channel.fail_connect.store(true, Ordering::SeqCst);

        let err = manager
            .send_on_off(KEY, OnOffAction::On, TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::ConnectionFailed(_)));
        assert_eq!(channel.send_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    struct SlowChannel;

    #[async_trait]
    impl crate::traits::CommandChannel for SlowChannel {
        async fn connect(&self) -> Result<(), CommandError> {
            Ok(())
        }

        async fn send_command(
            &self,
            _key: EndpointKey,
            _action: OnOffAction,
        ) -> Result<(), CommandError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        async fn close(&self) -> Result<(), CommandError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_timeout() {
        let manager = CommandChannelManager::new(Arc::new(SlowChannel));

        let err = manager
            .send_on_off(KEY, OnOffAction::On, TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::Timeout(d) if d == TIMEOUT));
        assert_eq!(manager.reconnect_count(), 0);
    }

    #[tokio::test]
    async fn test_close_then_reconnect_on_demand() {
        let channel = ScriptedChannel::with_sends(vec![Ok(())]);
        let manager = CommandChannelManager::new(channel.clone());
        manager.connect().await.unwrap();

        manager.close().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager
            .send_on_off(KEY, OnOffAction::On, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(channel.connects.load(Ordering::SeqCst), 2);
        assert_eq!(manager.reconnect_count(), 0);
    }
}
