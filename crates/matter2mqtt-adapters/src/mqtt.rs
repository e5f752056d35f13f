//! MQTT message bus.
//!
//! The network event loop runs on a dedicated OS thread with its own
//! single-threaded runtime, so the message callback is invoked on that thread
//! and never on the bridge's scheduler. The callback must not block.
//!
//! Every subscription is re-issued on each CONNACK, since sessions are clean
//! and the broker forgets them on reconnect.
//!
//! Publishes wait for room in the client request queue, bounded by the
//! configured publish timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use matter2mqtt_core::{BusError, MessageBus, MessageHandler, MqttSettings};

/// Capacity of the client request queue.
const REQUEST_CAPACITY: usize = 64;
/// Pause before the event loop retries after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// How long `close` waits for the network thread to finish.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type ConnAckResult = Result<(), String>;

/// Map a configured QoS level to the client's QoS.
pub fn qos_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Build client options from the bridge settings.
pub fn mqtt_options(settings: &MqttSettings) -> MqttOptions {
    let mut options = MqttOptions::new(settings.client_id(), &settings.host, settings.port);
    options.set_keep_alive(settings.keep_alive());
    options.set_clean_session(true);
    if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
        options.set_credentials(user, pass);
    }
    options
}

/// `MessageBus` backed by an MQTT broker connection.
pub struct MqttBus {
    settings: MqttSettings,
    qos: QoS,
    client: Mutex<Option<AsyncClient>>,
    handler: Arc<RwLock<Option<MessageHandler>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    running: Arc<AtomicBool>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl MqttBus {
    pub fn new(settings: MqttSettings) -> Self {
        let qos = qos_level(settings.qos);
        Self {
            settings,
            qos,
            client: Mutex::new(None),
            handler: Arc::new(RwLock::new(None)),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            stop_tx: Mutex::new(None),
            thread: Mutex::new(None),
        }
    }

    /// Check if the network thread is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn broker_addr(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }

    fn current_client(&self) -> Result<AsyncClient, BusError> {
        if !self.is_running() {
            return Err(BusError::Closed);
        }
        self.client.lock().clone().ok_or(BusError::Closed)
    }

    /// Stop the network thread and wait (bounded) for it to exit.
    async fn shutdown_thread(&self) {
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            stop_tx.send_replace(true);
        }
        let Some(handle) = self.thread.lock().take() else {
            return;
        };

        let joined = tokio::task::spawn_blocking(move || handle.join());
        match tokio::time::timeout(CLOSE_TIMEOUT, joined).await {
            Ok(Ok(Ok(()))) => debug!("MQTT network thread joined"),
            Ok(Ok(Err(_))) => error!("MQTT network thread panicked"),
            Ok(Err(e)) => warn!("Failed to join MQTT network thread: {}", e),
            Err(_) => warn!("MQTT network thread did not stop within {:?}", CLOSE_TIMEOUT),
        }
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    fn set_message_handler(&self, handler: MessageHandler) {
        *self.handler.write() = Some(handler);
    }

    async fn connect(&self) -> Result<(), BusError> {
        if self.is_running() {
            return Ok(());
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options(&self.settings), REQUEST_CAPACITY);
        let (connack_tx, connack_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let network = NetworkLoop {
            client: client.clone(),
            eventloop,
            qos: self.qos,
            handler: self.handler.clone(),
            subscriptions: self.subscriptions.clone(),
            running: self.running.clone(),
            stop_rx,
            broker: self.broker_addr(),
        };

        self.running.store(true, Ordering::SeqCst);
        let handle = thread::Builder::new()
            .name("matter2mqtt-mqtt".to_string())
            .spawn(move || network.run(connack_tx))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                BusError::ConnectionFailed(format!("failed to spawn MQTT thread: {}", e))
            })?;

        *self.client.lock() = Some(client);
        *self.stop_tx.lock() = Some(stop_tx);
        *self.thread.lock() = Some(handle);

        let timeout = self.settings.connect_timeout();
        let failure = match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(Ok(()))) => {
                info!("Connected to MQTT broker at {}", self.broker_addr());
                return Ok(());
            }
            Ok(Ok(Err(reason))) => reason,
            Ok(Err(_)) => "MQTT network thread exited".to_string(),
            Err(_) => format!("no CONNACK within {:?}", timeout),
        };

        error!("Failed to connect to MQTT broker at {}: {}", self.broker_addr(), failure);
        self.running.store(false, Ordering::SeqCst);
        self.client.lock().take();
        self.shutdown_thread().await;
        Err(BusError::ConnectionFailed(format!("{}: {}", self.broker_addr(), failure)))
    }

    async fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        let client = self.current_client()?;
        // A full request queue slows the caller down until the network
        // thread drains it. Only a stalled connection ends in an error.
        let timeout = self.settings.publish_timeout();
        let publish = client.publish(topic, self.qos, true, payload.as_bytes().to_vec());
        let result = match tokio::time::timeout(timeout, publish).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("request queue still full after {:?}", timeout)),
        };
        if let Err(reason) = result {
            if !self.is_running() {
                return Err(BusError::Closed);
            }
            return Err(BusError::Publish {
                topic: topic.to_string(),
                reason,
            });
        }
        debug!("Published to {}: {}", topic, payload);
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), BusError> {
        {
            let mut subscriptions = self.subscriptions.lock();
            if !subscriptions.iter().any(|s| s == pattern) {
                subscriptions.push(pattern.to_string());
            }
        }

        let client = self.current_client()?;
        client
            .subscribe(pattern, self.qos)
            .await
            .map_err(|e| BusError::Subscribe {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    async fn close(&self) -> Result<(), BusError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.client.lock().take();
        self.shutdown_thread().await;
        info!("MQTT connection to {} closed", self.broker_addr());
        Ok(())
    }
}

/// State owned by the network thread.
struct NetworkLoop {
    client: AsyncClient,
    eventloop: EventLoop,
    qos: QoS,
    handler: Arc<RwLock<Option<MessageHandler>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    running: Arc<AtomicBool>,
    stop_rx: watch::Receiver<bool>,
    broker: String,
}

impl NetworkLoop {
    fn run(self, connack_tx: oneshot::Sender<ConnAckResult>) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                let _ = connack_tx.send(Err(format!("failed to build MQTT runtime: {}", e)));
                return;
            }
        };
        runtime.block_on(self.poll_until_stopped(connack_tx));
    }

    async fn poll_until_stopped(mut self, connack_tx: oneshot::Sender<ConnAckResult>) {
        let mut connack_tx = Some(connack_tx);
        let mut error_count: u32 = 0;

        loop {
            let event = tokio::select! {
                _ = self.stop_rx.wait_for(|stop| *stop) => None,
                event = self.eventloop.poll() => Some(event),
            };
            let Some(event) = event else {
                self.disconnect().await;
                break;
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        let reason = format!("broker refused connection: {:?}", ack.code);
                        if let Some(tx) = connack_tx.take() {
                            let _ = tx.send(Err(reason));
                            break;
                        }
                        warn!("MQTT broker {} {}", self.broker, reason);
                        continue;
                    }

                    error_count = 0;
                    info!("MQTT broker {} connection acknowledged", self.broker);
                    self.resubscribe();
                    if let Some(tx) = connack_tx.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let handler = self.handler.read().clone();
                    match handler {
                        Some(handler) => handler(publish.topic.as_str(), publish.payload.as_ref()),
                        None => debug!("No handler for message on {}", publish.topic),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    if let Some(tx) = connack_tx.take() {
                        let _ = tx.send(Err(e.to_string()));
                        break;
                    }
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    error_count += 1;
                    warn!(
                        "MQTT broker {} error (attempt {}), reconnecting: {}",
                        self.broker, error_count, e
                    );
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }

        info!("MQTT network loop for {} stopped", self.broker);
    }

    /// Re-issue every known subscription without waiting on the request queue.
    fn resubscribe(&self) {
        let patterns = self.subscriptions.lock().clone();
        for pattern in patterns {
            match self.client.try_subscribe(pattern.as_str(), self.qos) {
                Ok(()) => info!("Subscribed to: {}", pattern),
                Err(e) => warn!("Failed to subscribe to {}: {}", pattern, e),
            }
        }
    }

    /// Send DISCONNECT and drive the loop until it is written out.
    async fn disconnect(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT disconnect request failed: {}", e);
            return;
        }
        let flushed = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if flushed.is_err() {
            debug!("MQTT disconnect not flushed before timeout");
        }
    }
}
