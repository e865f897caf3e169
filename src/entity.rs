//! Sensor entities with statum lifecycle
//!
//! One entity per enabled descriptor. Each owns exactly one subscription to
//! its topic for as long as it is active and releases it exactly once.
//!
//! # State Machine
//!
//! ```text
//! Pending ──(added)──► Active ──(remove)──► Removed
//! ```
//!
//! `remove` consumes the active entity, so a second release of the same
//! subscription does not type check.
//!
//! # Architecture
//!
//! ```text
//! MessageSink ──► MessageStream ──► [PayloadDecoder] ──► watch<Option<SensorState>>
//!  (router)         (entity)                                 (state readers)
//! ```

use crate::classifier::{DeviceClass, SensorDescriptor, SensorKind};
use crate::decoder::{PayloadDecoder, SensorState};
use crate::mqtt::{
    ChannelError, MessageSink, MessageStream, MqttMessage, PubSubChannel, SubscriptionHandle,
};
use crate::topics::ModuleIdentity;
use statum::{machine, state};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEVICE_NAME: &str = "Honeywell Galaxy Alarm";
pub const MANUFACTURER: &str = "SelfMon";
pub const DOMAIN: &str = "selfmon";

/// Entity platform a sensor is exposed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    BinarySensor,
    Sensor,
}

/// Device all sensors of one module are grouped under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub identifiers: (String, String),
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

impl DeviceInfo {
    pub fn for_module(module: &ModuleIdentity) -> Self {
        Self {
            identifiers: (DOMAIN.to_string(), module.device_identifier()),
            name: DEVICE_NAME.to_string(),
            manufacturer: MANUFACTURER.to_string(),
            model: format!("VMOD {}", module.module_id()),
        }
    }
}

/// Static presentation data of an entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityInfo {
    pub unique_id: String,
    pub name: String,
    pub platform: Platform,
    pub device_class: Option<String>,
    pub unit_of_measurement: Option<&'static str>,
    pub state_class: Option<&'static str>,
    pub icon: Option<&'static str>,
}

impl EntityInfo {
    pub fn from_descriptor(module: &ModuleIdentity, descriptor: &SensorDescriptor) -> Self {
        let prefix = module.device_identifier();
        let zone = &descriptor.zone_id;
        let mut info = Self {
            unique_id: String::new(),
            name: descriptor.name.clone(),
            platform: Platform::Sensor,
            device_class: None,
            unit_of_measurement: None,
            state_class: None,
            icon: None,
        };
        match descriptor.kind {
            SensorKind::ZoneInput => {
                info.unique_id = format!("{}_zone_{}", prefix, zone);
                info.platform = Platform::BinarySensor;
                info.device_class = descriptor.device_class.map(|c: DeviceClass| c.to_string());
            }
            SensorKind::Output => {
                info.unique_id = format!("{}_output_{}", prefix, zone);
            }
            SensorKind::Temperature => {
                info.unique_id = format!("{}_temperature", prefix);
                info.device_class = Some("temperature".to_string());
                info.unit_of_measurement = Some("°C");
                info.state_class = Some("measurement");
            }
            SensorKind::KeypadLine => {
                info.unique_id = format!("{}_vkp_{}", prefix, zone);
            }
            SensorKind::Version => {
                info.unique_id = format!("{}_version", prefix);
                info.icon = Some("mdi:information-outline");
            }
        }
        info
    }
}

/// Lifecycle states of a sensor entity
#[state]
#[derive(Debug, Clone)]
pub enum SensorLifecycle {
    Pending, // Built from its descriptor, not subscribed
    Active,  // Subscribed and decoding
    Removed, // Subscription released
}

#[machine]
pub struct SensorEntity<S: SensorLifecycle> {
    descriptor: SensorDescriptor,
    info: EntityInfo,
    device: DeviceInfo,
    decoder: PayloadDecoder,
    sink: Option<MessageSink>,
    stream: MessageStream,
    subscription: Option<SubscriptionHandle>,
    state_tx: watch::Sender<Option<SensorState>>,
}

impl<S: SensorLifecycle> SensorEntity<S> {
    pub fn descriptor(&self) -> &SensorDescriptor {
        &self.descriptor
    }

    pub fn info(&self) -> &EntityInfo {
        &self.info
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn topic(&self) -> &str {
        &self.descriptor.topic
    }

    pub fn state(&self) -> Option<SensorState> {
        self.state_tx.borrow().clone()
    }

    /// Receiver observing every state the entity writes
    pub fn watch_state(&self) -> watch::Receiver<Option<SensorState>> {
        self.state_tx.subscribe()
    }
}

impl SensorEntity<Pending> {
    pub fn create(module: &ModuleIdentity, descriptor: SensorDescriptor) -> Self {
        let info = EntityInfo::from_descriptor(module, &descriptor);
        let decoder = PayloadDecoder::for_kind(descriptor.kind);
        let (sink, stream) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(None);
        debug!("Created entity {} for {}", info.unique_id, descriptor.topic);

        Self::new(
            descriptor,
            info,
            DeviceInfo::for_module(module),
            decoder,
            Some(sink),
            stream,
            None, // subscription
            state_tx,
        )
    }

    /// Subscribes to the sensor topic and transitions to Active
    pub fn added<C>(mut self, channel: &C) -> Result<SensorEntity<Active>, ChannelError>
    where
        C: PubSubChannel + ?Sized,
    {
        let sink = self.sink.take().ok_or_else(|| ChannelError::SubscribeFailed {
            filter: self.descriptor.topic.clone(),
            reason: "entity already subscribed".to_string(),
        })?;
        let handle = channel.subscribe(&self.descriptor.topic, sink)?;
        info!("Entity {} subscribed to {}", self.info.unique_id, self.descriptor.topic);
        self.subscription = Some(handle);
        Ok(self.transition())
    }
}

impl SensorEntity<Active> {
    /// Decodes one message and publishes the new state.
    ///
    /// Returns `false` when the payload was rejected; the previous state is
    /// kept and nothing is published.
    pub fn handle_message(&mut self, msg: &MqttMessage) -> bool {
        let payload = msg.payload_str();
        match self.decoder.decode(&payload) {
            Ok(state) => {
                debug!("{} -> {}", self.info.unique_id, state);
                self.state_tx.send_replace(Some(state.clone()));
                true
            }
            Err(e) => {
                warn!("Unexpected payload for {}: {}", self.descriptor.topic, e);
                false
            }
        }
    }

    /// Processes messages until shutdown is signalled or the subscription ends
    pub async fn run_until_shutdown(mut self, mut shutdown_rx: oneshot::Receiver<()>) -> Self {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("Shutdown signal received for: {}", self.info.unique_id);
                    break;
                }
                msg = self.stream.recv() => match msg {
                    Some(msg) => {
                        self.handle_message(&msg);
                    }
                    None => {
                        warn!("Message stream closed for: {}", self.info.unique_id);
                        break;
                    }
                }
            }
        }
        self
    }

    /// Releases the subscription and transitions to Removed
    pub fn remove<C>(mut self, channel: &C) -> SensorEntity<Removed>
    where
        C: PubSubChannel + ?Sized,
    {
        if let Some(handle) = self.subscription.take() {
            if let Err(e) = channel.unsubscribe(handle) {
                warn!("Failed to unsubscribe {}: {}", self.descriptor.topic, e);
            }
        }
        info!("Entity {} removed", self.info.unique_id);
        self.transition()
    }
}

impl SensorEntity<Removed> {}

/// Errors from running entity tasks
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// Subscribing the entity topic failed
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The entity task panicked; its subscription could not be released
    #[error("Entity task failed for {topic}: {reason}")]
    TaskFailed { topic: String, reason: String },
}

/// Handle for an active entity running in a tokio task
pub struct SensorHandle {
    pub topic: String,
    pub info: EntityInfo,
    state_rx: watch::Receiver<Option<SensorState>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<JoinHandle<SensorEntity<Active>>>,
}

impl Drop for SensorHandle {
    fn drop(&mut self) {
        // the task ends and drops its stream; the channel prunes the route
        if let Some(tx) = self.shutdown_tx.take() {
            debug!("Handle dropped without shutdown: {}", self.info.unique_id);
            let _ = tx.send(());
        }
    }
}

impl SensorHandle {
    /// Subscribes the entity and spawns its message loop
    pub fn start<C>(entity: SensorEntity<Pending>, channel: &C) -> Result<Self, EntityError>
    where
        C: PubSubChannel + ?Sized,
    {
        let active = entity.added(channel)?;
        let topic = active.topic().to_string();
        let info = active.info().clone();
        let state_rx = active.watch_state();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task_handle = tokio::spawn(active.run_until_shutdown(shutdown_rx));

        Ok(Self {
            topic,
            info,
            state_rx,
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
        })
    }

    pub fn state(&self) -> Option<SensorState> {
        self.state_rx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<Option<SensorState>> {
        self.state_rx.clone()
    }

    /// Stops the task and releases the subscription
    pub async fn shutdown<C>(&mut self, channel: &C) -> Result<(), EntityError>
    where
        C: PubSubChannel + ?Sized,
    {
        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).is_err() {
                debug!("Entity task already finished: {}", self.info.unique_id);
            }
        }

        match self.task_handle.take() {
            Some(handle) => match handle.await {
                Ok(active) => {
                    active.remove(channel);
                    Ok(())
                }
                Err(e) => {
                    error!("Entity task panicked: {} - {}", self.info.unique_id, e);
                    Err(EntityError::TaskFailed {
                        topic: self.topic.clone(),
                        reason: e.to_string(),
                    })
                }
            },
            None => {
                debug!("Entity already shut down: {}", self.info.unique_id);
                Ok(())
            }
        }
    }
}
