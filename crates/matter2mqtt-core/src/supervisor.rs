//! Bridge lifecycle.
//!
//! Startup order: message bus, snapshot source (both fatal on failure),
//! command channel (optional), one synchronous refresh, then the periodic
//! refresh task and the command consumer task.
//!
//! Shutdown order: cancel both tasks and wait for them, then close the
//! message bus, the snapshot source and the command channel, each attempted
//! regardless of how the others went.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bridge::{command_queue, CommandBridge, CommandIngress, CommandQueue};
use crate::commander::CommandChannelManager;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::poller::SnapshotPoller;
use crate::topics::Topics;
use crate::traits::{DynCommandChannel, DynMessageBus, DynSnapshotSource};

/// Owns the collaborators and the two long-running tasks.
pub struct BridgeSupervisor {
    config: Arc<BridgeConfig>,
    bus: DynMessageBus,
    source: DynSnapshotSource,
    commander: Option<Arc<CommandChannelManager>>,
    poller: Arc<SnapshotPoller>,
    ingress: CommandIngress,
    /// Taken by the first `start`.
    queue: SyncMutex<Option<CommandQueue>>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    shutdown: watch::Sender<bool>,
    stopped: AtomicBool,
}

impl BridgeSupervisor {
    /// Create a supervisor. `channel` is `None` when no command path is
    /// available; the bridge then only reports state.
    pub fn new(
        config: Arc<BridgeConfig>,
        bus: DynMessageBus,
        source: DynSnapshotSource,
        channel: Option<DynCommandChannel>,
    ) -> Self {
        let topics = Topics::from_settings(&config.bridge);
        let poller = Arc::new(
            SnapshotPoller::new(source.clone(), bus.clone(), topics.clone())
                .with_discovery(config.bridge.enable_discovery),
        );
        let (ingress, queue) = command_queue(topics);
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            bus,
            source,
            commander: channel.map(|c| Arc::new(CommandChannelManager::new(c))),
            poller,
            ingress,
            queue: SyncMutex::new(Some(queue)),
            tasks: Mutex::new(Vec::new()),
            shutdown,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn poller(&self) -> &Arc<SnapshotPoller> {
        &self.poller
    }

    pub fn commander(&self) -> Option<&Arc<CommandChannelManager>> {
        self.commander.as_ref()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Start the bridge and wait until [`stop`](Self::stop) is called.
    ///
    /// Returns early with an error if the message bus or the snapshot source
    /// cannot be connected.
    pub async fn start(&self) -> Result<()> {
        let queue = self.queue.lock().take().ok_or(BridgeError::AlreadyStarted)?;
        let topics = self.poller.topics().clone();

        self.bus
            .set_message_handler(self.ingress.clone().into_handler());
        self.bus.connect().await?;
        info!("MQTT bridge connected");
        self.bus.subscribe(&topics.command_filter()).await?;
        info!("Subscribed to: {}", topics.command_filter());

        let hello = self.source.connect().await?;
        info!(
            "Matter WebSocket connected. schema={} sdk={}",
            hello
                .schema_version
                .map_or_else(|| "unknown".to_string(), |v| v.to_string()),
            hello.sdk_version.as_deref().unwrap_or("unknown")
        );

        match &self.commander {
            Some(commander) => match commander.connect().await {
                Ok(()) => info!("Matter commander connected (can send OnOff commands)"),
                Err(e) => warn!("Matter commander not available, commands disabled: {}", e),
            },
            None => warn!("No command channel available, commands disabled"),
        }

        if let Err(e) = self.poller.refresh().await {
            error!("Initial snapshot refresh failed: {}", e);
        }

        {
            let mut tasks = self.tasks.lock().await;
            if self.is_stopped() {
                return Ok(());
            }

            let poller = self.poller.clone();
            let period = self.config.bridge.refresh_interval();
            tasks.push((
                "refresh",
                tokio::spawn(async move { poller.run_periodic(period).await }),
            ));

            let bridge = CommandBridge::new(
                queue,
                self.poller.clone(),
                self.commander.clone(),
                &self.config.bridge,
            );
            tasks.push(("cmd_consumer", tokio::spawn(bridge.run())));
        }
        info!("Bridge running");

        let mut shutdown = self.shutdown.subscribe();
        let _ = shutdown.wait_for(|stopped| *stopped).await;
        Ok(())
    }

    /// Run until `signal` completes or startup fails, then stop.
    pub async fn run_until<F>(&self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let result = tokio::select! {
            result = self.start() => result,
            _ = signal => {
                info!("Shutting down...");
                Ok(())
            }
        };
        self.stop().await;
        result
    }

    /// Stop the tasks and close every collaborator. Only the first call
    /// does anything.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for (_, handle) in &tasks {
            handle.abort();
        }
        for (name, handle) in tasks {
            match handle.await {
                Ok(()) => debug!("Task {} finished", name),
                Err(e) if e.is_cancelled() => debug!("Task {} cancelled", name),
                Err(e) => error!("Task {} failed: {}", name, e),
            }
        }

        if let Err(e) = self.bus.close().await {
            warn!("Error closing message bus: {}", e);
        }
        if let Err(e) = self.source.close().await {
            warn!("Error closing snapshot source: {}", e);
        }
        if let Some(commander) = &self.commander {
            if let Err(e) = commander.close().await {
                warn!("Error closing command channel: {}", e);
            }
        }
        info!("Bridge stopped");
    }
}
