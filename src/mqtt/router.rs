//! Subscription table shared by the channel implementations
//!
//! Keeps one route per handle. Several handles may use the same filter; the
//! router reports when the last one for a filter goes away so the broker
//! level UNSUBSCRIBE is only sent then. Routes whose receiver was dropped are
//! pruned during dispatch.

use super::{ChannelError, MessageSink, MqttMessage, SubscriptionHandle};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

struct Route {
    filter: String,
    sink: MessageSink,
}

/// Outcome of one [`Router::dispatch`]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Dispatch {
    pub delivered: usize,
    /// Filters that lost their last route to pruning
    pub released: Vec<String>,
}

#[derive(Default)]
pub struct Router {
    next_id: u64,
    routes: BTreeMap<u64, Route>,
    pruned: BTreeSet<u64>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route for `filter`
    pub fn insert(
        &mut self,
        filter: &str,
        sink: MessageSink,
    ) -> Result<SubscriptionHandle, ChannelError> {
        if !rumqttc::valid_filter(filter) {
            return Err(ChannelError::InvalidFilter(filter.to_string()));
        }
        self.next_id += 1;
        let id = self.next_id;
        self.routes.insert(
            id,
            Route {
                filter: filter.to_string(),
                sink,
            },
        );
        Ok(SubscriptionHandle::new(id, filter.to_string()))
    }

    /// Removes the route behind `handle`.
    ///
    /// Returns `true` when no other route uses the same filter anymore. A
    /// handle whose route was already pruned is accepted once and returns
    /// `false`, its filter was released at pruning time.
    pub fn remove(&mut self, handle: &SubscriptionHandle) -> Result<bool, ChannelError> {
        if self.pruned.remove(&handle.id()) {
            return Ok(false);
        }
        let route = self
            .routes
            .remove(&handle.id())
            .ok_or(ChannelError::UnknownHandle(handle.id()))?;
        Ok(self.filter_count(&route.filter) == 0)
    }

    /// Pushes `msg` into every route whose filter matches its topic and
    /// prunes routes whose receiver is gone.
    pub fn dispatch(&mut self, msg: &MqttMessage) -> Dispatch {
        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, route) in &self.routes {
            if route.sink.is_closed() {
                dead.push(*id);
                continue;
            }
            if !rumqttc::matches(&msg.topic, &route.filter) {
                continue;
            }
            if route.sink.send(msg.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }
        Dispatch {
            delivered,
            released: self.prune(dead),
        }
    }

    fn prune(&mut self, ids: Vec<u64>) -> Vec<String> {
        let mut released = Vec::new();
        for id in ids {
            let Some(route) = self.routes.remove(&id) else {
                continue;
            };
            debug!("Receiver for subscription {} ({}) is gone, pruned", id, route.filter);
            self.pruned.insert(id);
            if self.filter_count(&route.filter) == 0 && !released.contains(&route.filter) {
                released.push(route.filter);
            }
        }
        released
    }

    /// Sends `msg` to a single route, used for retained replay on subscribe
    pub fn deliver_to(&self, handle: &SubscriptionHandle, msg: &MqttMessage) -> bool {
        self.routes
            .get(&handle.id())
            .map(|route| route.sink.send(msg.clone()).is_ok())
            .unwrap_or(false)
    }

    pub fn filter_count(&self, filter: &str) -> usize {
        self.routes.values().filter(|r| r.filter == filter).count()
    }

    /// Distinct filters currently in use
    pub fn filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = self.routes.values().map(|r| r.filter.clone()).collect();
        filters.sort();
        filters.dedup();
        filters
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
