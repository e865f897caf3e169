//! # MQTT Channel Module
//!
//! Publish/subscribe plumbing shared by discovery and the live sensors.
//!
//! ## Why This Module Exists
//!
//! Discovery and the per-topic decoders only need three things from a broker:
//! subscribe to a filter, stop a subscription, and receive `{topic, payload}`
//! messages. [`PubSubChannel`] captures exactly that, so the same code runs
//! against a real broker ([`MqttChannel`]) and against the in-process
//! [`LocalChannel`] used by tests and replay mode.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs          - Broker connection settings
//! ├── error.rs           - ChannelError
//! ├── message_manager.rs - Message representation
//! ├── router.rs          - Subscription table and wildcard dispatch
//! ├── mqtt_handler.rs    - rumqttc backed channel and event loop pump
//! └── local.rs           - In-process broker with retained messages
//! ```
//!
//! ## Delivery Model
//!
//! Every subscription carries its own unbounded sender. Inbound messages are
//! matched against all live filters by the [`router::Router`] and pushed into
//! each matching sender; the owner of the receiver is the single consumer.
//! Subscribe and unsubscribe are synchronous (they only queue a request for
//! the broker), which lets guards release subscriptions from `Drop`.

pub mod config;
pub mod error;
pub mod local;
pub mod message_manager;
pub mod mqtt_handler;
pub mod router;

pub use config::BrokerConfig;
pub use error::ChannelError;
pub use local::LocalChannel;
pub use message_manager::MqttMessage;
pub use mqtt_handler::{ConnectionState, MqttChannel, MqttStatus};

use std::sync::Arc;
use tokio::sync::mpsc;

/// Where a subscription delivers its messages
pub type MessageSink = mpsc::UnboundedSender<MqttMessage>;

/// Receiving side of a [`MessageSink`]
pub type MessageStream = mpsc::UnboundedReceiver<MqttMessage>;

/// Proof of one live subscription.
///
/// Not `Clone`: a handle is given back to [`PubSubChannel::unsubscribe`] by
/// value, so each subscription can only be released once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    filter: String,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: u64, filter: String) -> Self {
        Self { id, filter }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }
}

/// Minimal publish/subscribe surface needed by discovery and the sensors
pub trait PubSubChannel: Send + Sync {
    /// Starts delivering messages matching `filter` into `sink`
    fn subscribe(&self, filter: &str, sink: MessageSink)
        -> Result<SubscriptionHandle, ChannelError>;

    /// Stops the subscription behind `handle`
    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), ChannelError>;

    /// Number of live subscription handles
    fn active_subscriptions(&self) -> usize;
}

impl<T: PubSubChannel + ?Sized> PubSubChannel for Arc<T> {
    fn subscribe(
        &self,
        filter: &str,
        sink: MessageSink,
    ) -> Result<SubscriptionHandle, ChannelError> {
        (**self).subscribe(filter, sink)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), ChannelError> {
        (**self).unsubscribe(handle)
    }

    fn active_subscriptions(&self) -> usize {
        (**self).active_subscriptions()
    }
}

impl<T: PubSubChannel + ?Sized> PubSubChannel for &T {
    fn subscribe(
        &self,
        filter: &str,
        sink: MessageSink,
    ) -> Result<SubscriptionHandle, ChannelError> {
        (**self).subscribe(filter, sink)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), ChannelError> {
        (**self).unsubscribe(handle)
    }

    fn active_subscriptions(&self) -> usize {
        (**self).active_subscriptions()
    }
}
