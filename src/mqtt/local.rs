//! In-process broker
//!
//! Behaves like a broker from the subscriber's point of view: retained
//! messages are kept per topic and replayed to every new matching
//! subscription, live publishes go to all matching subscriptions. Used by the
//! tests and by the binary's replay mode.

use super::router::Router;
use super::{ChannelError, MessageSink, MqttMessage, PubSubChannel, SubscriptionHandle};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Default)]
struct LocalBroker {
    router: Router,
    retained: BTreeMap<String, Vec<u8>>,
    refused_filters: Vec<String>,
}

/// Cloneable handle to one in-process broker
#[derive(Clone, Default)]
pub struct LocalChannel {
    inner: Arc<Mutex<LocalBroker>>,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn broker(&self) -> MutexGuard<'_, LocalBroker> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publishes a message; returns the number of subscriptions reached.
    ///
    /// A retained publish with an empty payload clears the retained message
    /// for that topic, as on a real broker.
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>, retain: bool) -> usize {
        let payload = payload.into();
        let mut broker = self.broker();
        if retain {
            if payload.is_empty() {
                broker.retained.remove(topic);
            } else {
                broker.retained.insert(topic.to_string(), payload.clone());
            }
        }
        let msg = MqttMessage::new(topic, payload, false);
        broker.router.dispatch(&msg).delivered
    }

    /// Makes every later subscribe to exactly `filter` fail
    pub fn refuse_filter(&self, filter: &str) {
        self.broker().refused_filters.push(filter.to_string());
    }

    pub fn retained_topics(&self) -> Vec<String> {
        self.broker().retained.keys().cloned().collect()
    }

    /// Publishes a captured broker snapshot as retained messages.
    ///
    /// One message per line, topic and payload separated by the first run of
    /// whitespace. Blank lines and lines starting with `#` are skipped.
    /// Returns the number of messages published.
    pub fn seed_from_snapshot(&self, snapshot: &str) -> usize {
        let mut published = 0;
        for line in snapshot.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (topic, payload) = match line.split_once(char::is_whitespace) {
                Some((topic, payload)) => (topic, payload.trim_start()),
                None => (line, ""),
            };
            if payload.is_empty() {
                warn!("Snapshot line without payload: {}", topic);
                continue;
            }
            self.publish(topic, payload, true);
            published += 1;
        }
        debug!("Seeded {} retained messages", published);
        published
    }
}

impl PubSubChannel for LocalChannel {
    fn subscribe(
        &self,
        filter: &str,
        sink: MessageSink,
    ) -> Result<SubscriptionHandle, ChannelError> {
        let mut broker = self.broker();
        if broker.refused_filters.iter().any(|f| f == filter) {
            warn!("Refusing subscription to {}", filter);
            return Err(ChannelError::SubscribeFailed {
                filter: filter.to_string(),
                reason: "refused by broker".to_string(),
            });
        }

        let handle = broker.router.insert(filter, sink)?;

        let mut replayed = 0;
        for (topic, payload) in &broker.retained {
            if rumqttc::matches(topic, filter) {
                let msg = MqttMessage::new(topic.clone(), payload.clone(), true);
                if broker.router.deliver_to(&handle, &msg) {
                    replayed += 1;
                }
            }
        }
        debug!("Subscribed {} ({} retained replayed)", filter, replayed);
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), ChannelError> {
        let last = self.broker().router.remove(&handle)?;
        debug!("Unsubscribed {} (last for filter: {})", handle.filter(), last);
        Ok(())
    }

    fn active_subscriptions(&self) -> usize {
        self.broker().router.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn replays_retained_on_subscribe() {
        let channel = LocalChannel::new();
        channel.publish("selfmon/vmod.01/temperature", "20.5", true);
        channel.publish("selfmon/vmod.01/version", "1.0", false);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = channel.subscribe("selfmon/#", tx).unwrap();

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.topic, "selfmon/vmod.01/temperature");
        assert!(msg.retained);
        assert!(rx.try_recv().is_err());

        channel.publish("selfmon/vmod.01/version", "1.1", false);
        let live = rx.try_recv().unwrap();
        assert!(!live.retained);

        channel.unsubscribe(handle).unwrap();
        assert_eq!(channel.active_subscriptions(), 0);
        assert_eq!(channel.publish("selfmon/vmod.01/version", "1.2", false), 0);
    }

    #[test]
    fn empty_retained_publish_clears() {
        let channel = LocalChannel::new();
        channel.publish("a/b", "x", true);
        assert_eq!(channel.retained_topics(), vec!["a/b".to_string()]);
        channel.publish("a/b", "", true);
        assert!(channel.retained_topics().is_empty());
    }

    #[test]
    fn snapshot_lines_become_retained() {
        let channel = LocalChannel::new();
        let seeded = channel.seed_from_snapshot(
            "# captured from the gateway\n\
             selfmon/vmod.01/vkp/display/line1   UNSET  12:00\n\
             \n\
             selfmon/vmod.01/temperature 21.5\n\
             selfmon/vmod.01/version\n",
        );
        assert_eq!(seeded, 2);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = channel.subscribe("selfmon/vmod.01/vkp/#", tx).unwrap();
        assert_eq!(rx.try_recv().unwrap().payload_str(), "UNSET  12:00");
    }

    #[test]
    fn refused_filters_fail() {
        let channel = LocalChannel::new();
        channel.refuse_filter("selfmon/#");
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            channel.subscribe("selfmon/#", tx.clone()),
            Err(ChannelError::SubscribeFailed { .. })
        ));
        assert!(channel.subscribe("selfmon/+/version", tx).is_ok());
        assert_eq!(channel.active_subscriptions(), 1);
    }
}
