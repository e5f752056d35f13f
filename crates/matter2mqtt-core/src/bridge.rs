//! Command bridge between the message bus and the command channel.
//!
//! The bus invokes its message callback on its own thread. [`CommandIngress`]
//! parses command messages there and pushes them onto an unbounded queue
//! without blocking. A single [`CommandBridge`] task drains the queue in
//! arrival order and drives the command channel.
//!
//! A disconnected command channel is reconnected lazily by the next command.
//! The attempt is bounded by the command timeout, and after a failure the
//! commands of the following [`CONNECT_RETRY_INTERVAL`] fail without a new
//! attempt.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::commander::CommandChannelManager;
use crate::config::BridgeSettings;
use crate::error::CommandError;
use crate::model::Command;
use crate::poller::SnapshotPoller;
use crate::topics::{IngressError, Topics};
use crate::traits::MessageHandler;

/// Minimum time between two command channel connect attempts.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Create the ingress/consumer pair sharing one FIFO queue.
pub fn command_queue(topics: Topics) -> (CommandIngress, CommandQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandIngress { topics, tx }, CommandQueue { rx })
}

/// Producer side, safe to use from any thread.
#[derive(Clone)]
pub struct CommandIngress {
    topics: Topics,
    tx: mpsc::UnboundedSender<Command>,
}

impl CommandIngress {
    /// Parse an incoming message and queue it if it is a valid command.
    /// Returns whether a command was queued. Never blocks.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> bool {
        let cmd = match self.topics.parse_command(topic, payload) {
            Ok(cmd) => cmd,
            Err(e @ IngressError::UnknownPayload { .. }) => {
                warn!("{}", e);
                return false;
            }
            Err(e) => {
                debug!("Ignoring message: {}", e);
                return false;
            }
        };

        info!(
            "Received command from MQTT: node {} endpoint {} action {}",
            cmd.device_id, cmd.endpoint_id, cmd.action
        );
        if self.tx.send(cmd).is_err() {
            debug!("Command queue closed, dropping command for {}", cmd.key());
            return false;
        }
        true
    }

    /// Wrap this ingress as a message bus callback.
    pub fn into_handler(self) -> MessageHandler {
        Arc::new(move |topic: &str, payload: &[u8]| {
            self.handle_message(topic, payload);
        })
    }
}

/// Consumer side of the command queue.
pub struct CommandQueue {
    rx: mpsc::UnboundedReceiver<Command>,
}

impl CommandQueue {
    /// Wait for the next command. Returns `None` once every ingress is gone.
    pub async fn recv(&mut self) -> Option<Command> {
        self.rx.recv().await
    }

    /// Take a command if one is ready.
    pub fn try_recv(&mut self) -> Option<Command> {
        self.rx.try_recv().ok()
    }
}

/// Single consumer translating queued commands into device commands.
pub struct CommandBridge {
    queue: CommandQueue,
    poller: Arc<SnapshotPoller>,
    commander: Option<Arc<CommandChannelManager>>,
    command_timeout: Duration,
    settle_delay: Duration,
    /// Earliest time of the next connect attempt after a failed one.
    next_connect: Mutex<Option<Instant>>,
}

impl CommandBridge {
    pub fn new(
        queue: CommandQueue,
        poller: Arc<SnapshotPoller>,
        commander: Option<Arc<CommandChannelManager>>,
        settings: &BridgeSettings,
    ) -> Self {
        Self {
            queue,
            poller,
            commander,
            command_timeout: settings.command_timeout(),
            settle_delay: settings.settle_delay(),
            next_connect: Mutex::new(None),
        }
    }

    /// Process commands until the queue closes or the task is cancelled.
    pub async fn run(mut self) {
        while let Some(cmd) = self.queue.recv().await {
            if let Err(e) = self.process(cmd).await {
                error!(
                    "Failed to send command to node {} endpoint {}: {}",
                    cmd.device_id, cmd.endpoint_id, e
                );
            }
        }
        debug!("Command queue closed, command bridge stopping");
    }

    /// Handle one command: optimistic state, device command, confirmation.
    pub async fn process(&self, cmd: Command) -> Result<(), CommandError> {
        let key = cmd.key();
        info!(
            "Processing MQTT command: node {} endpoint {} action {}",
            cmd.device_id, cmd.endpoint_id, cmd.action
        );

        if let Some(on) = cmd.action.desired_state() {
            if let Err(e) = self.poller.publish_optimistic_state(key, on).await {
                warn!("Optimistic state publish for {} failed: {}", key, e);
            }
        }

        let commander = self.commander.as_ref().ok_or_else(|| {
            CommandError::Unavailable("no command channel configured".to_string())
        })?;
        if !commander.is_connected() {
            self.ensure_connected(commander).await?;
        }

        commander
            .send_on_off(key, cmd.action, self.command_timeout)
            .await?;
        info!(
            "Command sent successfully to node {} endpoint {}",
            cmd.device_id, cmd.endpoint_id
        );

        tokio::time::sleep(self.settle_delay).await;
        if let Err(e) = self.poller.refresh().await {
            warn!("Confirmation refresh after command to {} failed: {}", key, e);
        }
        Ok(())
    }

    async fn ensure_connected(&self, commander: &CommandChannelManager) -> Result<(), CommandError> {
        let next = *self.next_connect.lock();
        if let Some(at) = next {
            let now = Instant::now();
            if now < at {
                return Err(CommandError::Unavailable(format!(
                    "command channel not connected, next attempt in {:?}",
                    at - now
                )));
            }
        }

        let result = match tokio::time::timeout(self.command_timeout, commander.connect()).await {
            Ok(result) => result,
            Err(_) => Err(CommandError::Timeout(self.command_timeout)),
        };
        match result {
            Ok(()) => {
                self.next_connect.lock().take();
                Ok(())
            }
            Err(e) => {
                *self.next_connect.lock() = Some(Instant::now() + CONNECT_RETRY_INTERVAL);
                Err(CommandError::Unavailable(format!(
                    "command channel not connected: {}",
                    e
                )))
            }
        }
    }
}
