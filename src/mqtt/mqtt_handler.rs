//! Broker backed channel
//!
//! Wraps a rumqttc `AsyncClient` and drives its `EventLoop` in a background
//! task. The task is the only place inbound publishes enter the process; it
//! hands each one to the shared [`Router`], which fans it out to the
//! subscription sinks.
//!
//! ```text
//! Broker ─► EventLoop (pump task) ─► Router ─► MessageSink per subscription
//!   ▲
//!   └── AsyncClient (try_subscribe / try_unsubscribe)
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::router::Router;
use super::{
    BrokerConfig, ChannelError, MessageSink, MqttMessage, PubSubChannel, SubscriptionHandle,
};

const REQUEST_CAPACITY: usize = 100;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const MAX_ERROR_MESSAGES: usize = 20;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MqttStatus {
    pub error_messages: Vec<String>,
    pub messages_received: usize,
    pub last_activity: Option<chrono::DateTime<chrono::Local>>,
}

impl MqttStatus {
    fn record_error(&mut self, message: String) {
        if self.error_messages.len() == MAX_ERROR_MESSAGES {
            self.error_messages.remove(0);
        }
        self.error_messages.push(message);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// [`PubSubChannel`] backed by a live MQTT broker connection
pub struct MqttChannel {
    client: AsyncClient,
    router: Arc<Mutex<Router>>,
    status: Arc<Mutex<MqttStatus>>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl MqttChannel {
    /// Creates the client and spawns the event loop task.
    ///
    /// Must be called from within a tokio runtime. The connection is
    /// established in the background; use [`MqttChannel::wait_connected`]
    /// to block until the broker acknowledged it.
    pub fn connect(config: &BrokerConfig) -> Result<Self, ChannelError> {
        let (host, port) = config.host_port()?;
        let mut mqtt_options = MqttOptions::new(config.client_id.clone(), host.clone(), port);
        mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(1)));
        if config.has_credentials() {
            mqtt_options.set_credentials(config.user.clone(), config.password.clone());
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let router = Arc::new(Mutex::new(Router::new()));
        let status = Arc::new(Mutex::new(MqttStatus::default()));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();

        info!("Connecting to MQTT broker {}:{}", host, port);
        let pump = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            router.clone(),
            status.clone(),
            state_tx,
            cancel.clone(),
        ));

        Ok(Self {
            client,
            router,
            status,
            state_rx,
            cancel,
            pump: Mutex::new(Some(pump)),
        })
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn status(&self) -> MqttStatus {
        lock(&self.status).clone()
    }

    /// Waits until the broker acknowledged the connection
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), ChannelError> {
        let mut state_rx = self.state_rx.clone();
        let wait = state_rx.wait_for(|state| *state == ConnectionState::Connected);
        let connected = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(_)) => true,
            Ok(Err(_)) => {
                return Err(ChannelError::Connection(
                    "event loop stopped".to_string(),
                ))
            }
            Err(_) => false,
        };
        if connected {
            return Ok(());
        }
        let last_error = self.status().error_messages.last().cloned();
        Err(ChannelError::Connection(format!(
            "not connected after {:?}{}",
            timeout,
            last_error.map(|e| format!(": {}", e)).unwrap_or_default()
        )))
    }

    /// Disconnects and stops the event loop task
    pub async fn shutdown(&self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request not queued: {}", e);
        }
        self.cancel.cancel();
        let pump = lock(&self.pump).take();
        if let Some(handle) = pump {
            if let Err(e) = handle.await {
                error!("MQTT event loop task panicked: {}", e);
            }
        }
        info!("MQTT channel shut down");
    }
}

impl PubSubChannel for MqttChannel {
    fn subscribe(
        &self,
        filter: &str,
        sink: MessageSink,
    ) -> Result<SubscriptionHandle, ChannelError> {
        let handle = lock(&self.router).insert(filter, sink)?;

        // Sent for every handle so the broker replays retained messages to it.
        // The route stays when the request cannot be queued; every routed
        // filter is subscribed again on ConnAck.
        if let Err(e) = self.client.try_subscribe(filter, QoS::AtMostOnce) {
            debug!("SUBSCRIBE for {} not queued ({}), waiting for queue space", filter, e);
            let client = self.client.clone();
            let cancel = self.cancel.clone();
            let filter = filter.to_string();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    res = client.subscribe(filter.clone(), QoS::AtMostOnce) => {
                        if let Err(e) = res {
                            warn!("SUBSCRIBE for {} dropped: {}", filter, e);
                        }
                    }
                }
            });
        }
        debug!("Subscribed to {} (handle {})", filter, handle.id());
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), ChannelError> {
        let last = lock(&self.router).remove(&handle)?;
        if last {
            queue_unsubscribe(&self.client, &self.cancel, handle.filter().to_string());
        }
        debug!("Unsubscribed from {} (handle {})", handle.filter(), handle.id());
        Ok(())
    }

    fn active_subscriptions(&self) -> usize {
        lock(&self.router).len()
    }
}

impl Drop for MqttChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Queues an UNSUBSCRIBE, waiting in a task when the request queue is full
fn queue_unsubscribe(client: &AsyncClient, cancel: &CancellationToken, filter: String) {
    let Err(e) = client.try_unsubscribe(filter.clone()) else {
        return;
    };
    debug!("UNSUBSCRIBE for {} not queued ({}), waiting for queue space", filter, e);
    let client = client.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            res = client.unsubscribe(filter.clone()) => {
                if let Err(e) = res {
                    warn!("UNSUBSCRIBE for {} dropped: {}", filter, e);
                }
            }
        }
    });
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    router: Arc<Mutex<Router>>,
    status: Arc<Mutex<MqttStatus>>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to MQTT broker");
                state_tx.send_replace(ConnectionState::Connected);

                // Clean sessions forget subscriptions across reconnects
                let filters = lock(&router).filters();
                for filter in filters {
                    if let Err(e) = client.try_subscribe(filter.clone(), QoS::AtMostOnce) {
                        warn!("Failed to restore subscription {}: {}", filter, e);
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let msg = MqttMessage::new(publish.topic, publish.payload.to_vec(), publish.retain);
                let dispatch = lock(&router).dispatch(&msg);
                debug!("Received {} ({} subscribers)", msg, dispatch.delivered);
                for filter in dispatch.released {
                    debug!("Last receiver for {} is gone, unsubscribing", filter);
                    queue_unsubscribe(&client, &cancel, filter);
                }

                let mut stats = lock(&status);
                stats.messages_received += 1;
                stats.last_activity = Some(chrono::Local::now());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker closed the connection");
                state_tx.send_replace(ConnectionState::Reconnecting);
            }
            Ok(_) => {}
            Err(e) => {
                let was_connected = *state_tx.borrow() == ConnectionState::Connected;
                if was_connected {
                    warn!("MQTT connection lost: {}", e);
                    state_tx.send_replace(ConnectionState::Reconnecting);
                } else {
                    error!("MQTT connection failed: {}", e);
                    state_tx.send_replace(ConnectionState::Failed);
                }
                lock(&status).record_error(e.to_string());

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }

    state_tx.send_replace(ConnectionState::Disconnected);
    debug!("MQTT event loop stopped");
}
