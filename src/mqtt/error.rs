//! Error definitions for the MQTT channel layer

use thiserror::Error;

/// Errors raised by [`PubSubChannel`](super::PubSubChannel) implementations
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The topic filter is not a valid MQTT filter
    #[error("invalid topic filter: {0}")]
    InvalidFilter(String),

    /// The subscription was refused
    #[error("failed to subscribe to {filter}: {reason}")]
    SubscribeFailed { filter: String, reason: String },

    /// The handle does not belong to a live subscription
    #[error("unknown subscription handle: {0}")]
    UnknownHandle(u64),

    /// The broker address could not be parsed
    #[error("invalid broker url: {0}")]
    InvalidBrokerUrl(String),

    /// Connection could not be established in time
    #[error("connection error: {0}")]
    Connection(String),
}
