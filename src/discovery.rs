//! # Discovery Sessions
//!
//! Time-boxed listening passes that infer configuration from what the broker
//! delivers: retained state first, then whatever the gateway publishes live.
//!
//! ## Why the window is fixed
//!
//! The broker gives no signal for "all retained messages delivered", so a
//! session cannot tell a quiet broker from one still flushing. Each session
//! therefore always listens for its whole window and never exits early.
//!
//! ## Subscription lifetime
//!
//! All handles of a session live in a [`SubscriptionGuard`]. The guard
//! unsubscribes in `Drop`, so the subscriptions are released when the window
//! ends, when the caller drops the session future (flow aborted), and when
//! anything in between unwinds.
//!
//! ## Failures
//!
//! A filter that cannot be subscribed is logged and skipped. The filter
//! lists overlap, so the remaining ones usually still see the traffic. An
//! empty result is a normal outcome and is returned as such.

use crate::classifier::{classify, SensorKind, SensorMap};
use crate::mqtt::{MessageStream, PubSubChannel, SubscriptionHandle};
use crate::topics::{ModuleIdentity, MODULE_DISCOVERY_FILTERS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Listening windows of the two discovery passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryTimeouts {
    pub module_window: Duration,
    pub sensor_window: Duration,
}

impl Default for DiscoveryTimeouts {
    fn default() -> Self {
        Self {
            module_window: Duration::from_secs(8),
            sensor_window: Duration::from_secs(10),
        }
    }
}

/// Owns the handles of one session and releases them on drop
pub struct SubscriptionGuard<'a, C: PubSubChannel + ?Sized> {
    channel: &'a C,
    handles: Vec<SubscriptionHandle>,
}

impl<'a, C: PubSubChannel + ?Sized> SubscriptionGuard<'a, C> {
    /// Subscribes every filter to one shared stream.
    ///
    /// Filters that fail are logged and left out.
    pub fn subscribe_all<I, S>(channel: &'a C, filters: I) -> (Self, MessageStream)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = Self {
            channel,
            handles: Vec::new(),
        };
        for filter in filters {
            let filter = filter.as_ref();
            match channel.subscribe(filter, tx.clone()) {
                Ok(handle) => guard.handles.push(handle),
                Err(e) => warn!("Failed to subscribe to {}: {}", filter, e),
            }
        }
        (guard, rx)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Releases all handles now instead of at drop
    pub fn release(mut self) {
        self.release_all();
    }

    fn release_all(&mut self) {
        for handle in self.handles.drain(..) {
            let filter = handle.filter().to_string();
            if let Err(e) = self.channel.unsubscribe(handle) {
                warn!("Failed to unsubscribe from {}: {}", filter, e);
            }
        }
    }
}

impl<C: PubSubChannel + ?Sized> Drop for SubscriptionGuard<'_, C> {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            debug!("Releasing {} discovery subscriptions", self.handles.len());
            self.release_all();
        }
    }
}

/// Feeds every message arriving before `window` elapses into `on_message`.
///
/// Always waits the full window.
async fn listen_for<F>(rx: &mut MessageStream, window: Duration, mut on_message: F)
where
    F: FnMut(&str),
{
    let deadline = Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(msg)) => on_message(&msg.topic),
            // every sender is gone: nothing else can arrive, sit out the rest
            Ok(None) => {
                tokio::time::sleep_until(deadline).await;
                break;
            }
            Err(_) => break,
        }
    }
}

/// Looks for VMOD modules on the broker.
///
/// Returns every distinct module base path seen during `window`; an empty
/// set means the caller should fall back to manual entry.
pub async fn discover_modules<C>(channel: &C, window: Duration) -> BTreeSet<ModuleIdentity>
where
    C: PubSubChannel + ?Sized,
{
    info!("Discovering modules for {:?}", window);
    let (guard, mut rx) = SubscriptionGuard::subscribe_all(channel, MODULE_DISCOVERY_FILTERS);
    if guard.is_empty() {
        warn!("No module discovery subscription succeeded");
    }

    let mut modules = BTreeSet::new();
    listen_for(&mut rx, window, |topic| {
        if let Some(module) = ModuleIdentity::from_topic(topic) {
            if modules.insert(module.clone()) {
                debug!("Discovered module: {} from topic: {}", module, topic);
            }
        }
    })
    .await;
    guard.release();

    info!("Module discovery complete, found {} module(s)", modules.len());
    modules
}

/// Collects the sensors published below `module`.
///
/// Output topics are only picked up when `outputs_enabled` is set. An empty
/// map means the caller should fall back to manual entry or retry.
pub async fn discover_sensors<C>(
    channel: &C,
    module: &ModuleIdentity,
    outputs_enabled: bool,
    window: Duration,
) -> SensorMap
where
    C: PubSubChannel + ?Sized,
{
    info!(
        "Discovering sensors on {} for {:?} (outputs: {})",
        module, window, outputs_enabled
    );
    let (guard, mut rx) =
        SubscriptionGuard::subscribe_all(channel, module.sensor_filters(outputs_enabled));

    let mut sensors = SensorMap::new();
    listen_for(&mut rx, window, |topic| {
        if let Some(descriptor) = classify(module.base(), topic, outputs_enabled) {
            debug!("Discovered topic: {} as {}", topic, descriptor.kind);
            sensors.insert(topic.to_string(), descriptor);
        }
    })
    .await;
    guard.release();

    info!("{}", DiscoveryReport::from_sensors(&sensors));
    sensors
}

/// Per-kind counts of a sensor discovery result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub counts: BTreeMap<SensorKind, usize>,
}

impl DiscoveryReport {
    pub fn from_sensors(sensors: &SensorMap) -> Self {
        let mut counts = BTreeMap::new();
        for descriptor in sensors.values() {
            *counts.entry(descriptor.kind).or_insert(0) += 1;
        }
        Self { counts }
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

impl std::fmt::Display for DiscoveryReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sensor discovery complete, found {} sensor(s)", self.total())?;
        for (kind, count) in &self.counts {
            write!(f, ", {}: {}", kind, count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::LocalChannel;

    const BASE: &str = "selfmon/vmod.010aa1";

    fn module() -> ModuleIdentity {
        ModuleIdentity::parse(BASE).unwrap()
    }

    fn seeded_channel() -> LocalChannel {
        let channel = LocalChannel::new();
        channel.publish(&format!("{}/prio/inputs/read/7", BASE), "CLOSED", true);
        channel.publish(&format!("{}/vrio/inputs/read/12", BASE), "OPEN", true);
        channel.publish(&format!("{}/prio/outputs/3", BASE), "OFF", true);
        channel.publish(&format!("{}/temperature", BASE), "21.5", true);
        channel.publish(&format!("{}/vkp/display/line1", BASE), "GALAXY", true);
        channel.publish(&format!("{}/version", BASE), "2.1", true);
        channel.publish(&format!("{}/heartbeat", BASE), "1", true);
        channel.publish("selfmon/vmod.BEEF01/temperature", "19", true);
        channel.publish("selfmon/bridge/status", "online", true);
        channel
    }

    #[tokio::test(start_paused = true)]
    async fn finds_modules_from_retained_topics() {
        let channel = seeded_channel();
        let modules = discover_modules(&channel, Duration::from_secs(8)).await;
        let bases: Vec<&str> = modules.iter().map(|m| m.base()).collect();
        assert_eq!(bases, vec!["selfmon/vmod.010aa1", "selfmon/vmod.BEEF01"]);
        assert_eq!(channel.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_broker_yields_empty_results() {
        let channel = LocalChannel::new();
        let start = Instant::now();
        assert!(discover_modules(&channel, Duration::from_secs(8)).await.is_empty());
        assert!(start.elapsed() >= Duration::from_secs(8));

        let sensors = discover_sensors(&channel, &module(), true, Duration::from_secs(10)).await;
        assert!(sensors.is_empty());
        assert_eq!(channel.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn collects_sensors_without_outputs() {
        let channel = seeded_channel();
        let sensors = discover_sensors(&channel, &module(), false, Duration::from_secs(10)).await;

        let topics: Vec<&str> = sensors.keys().map(|k| k.as_str()).collect();
        assert_eq!(
            topics,
            vec![
                "selfmon/vmod.010aa1/prio/inputs/read/7",
                "selfmon/vmod.010aa1/temperature",
                "selfmon/vmod.010aa1/version",
                "selfmon/vmod.010aa1/vkp/display/line1",
                "selfmon/vmod.010aa1/vrio/inputs/read/12",
            ]
        );
        assert_eq!(channel.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn collects_outputs_when_enabled() {
        let channel = seeded_channel();
        let sensors = discover_sensors(&channel, &module(), true, Duration::from_secs(10)).await;
        let output = &sensors["selfmon/vmod.010aa1/prio/outputs/3"];
        assert_eq!(output.kind, SensorKind::Output);
        assert_eq!(sensors.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn live_messages_inside_the_window_count() {
        let channel = LocalChannel::new();
        let publisher = channel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            publisher.publish(&format!("{}/prio/inputs/read/4", BASE), "OPEN", false);
            tokio::time::sleep(Duration::from_secs(20)).await;
            publisher.publish(&format!("{}/prio/inputs/read/5", BASE), "OPEN", false);
        });

        let sensors = discover_sensors(&channel, &module(), false, Duration::from_secs(10)).await;
        assert_eq!(sensors.len(), 1);
        assert!(sensors.contains_key("selfmon/vmod.010aa1/prio/inputs/read/4"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_subscriptions_are_skipped() {
        let channel = seeded_channel();
        channel.refuse_filter("selfmon/vmod.010aa1/temperature");
        let sensors = discover_sensors(&channel, &module(), false, Duration::from_secs(10)).await;
        assert!(!sensors.contains_key("selfmon/vmod.010aa1/temperature"));
        assert_eq!(sensors.len(), 4);
        assert_eq!(channel.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_session_releases_subscriptions() {
        let channel = seeded_channel();
        let module = module();
        let session = discover_sensors(&channel, &module, true, Duration::from_secs(10));
        let result = tokio::time::timeout(Duration::from_secs(2), session).await;
        assert!(result.is_err());
        assert_eq!(channel.active_subscriptions(), 0);

        let session = discover_modules(&channel, Duration::from_secs(8));
        assert!(tokio::time::timeout(Duration::from_secs(1), session).await.is_err());
        assert_eq!(channel.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rediscovery_is_repeatable() {
        let channel = seeded_channel();
        let first = discover_sensors(&channel, &module(), true, Duration::from_secs(10)).await;
        let second = discover_sensors(&channel, &module(), true, Duration::from_secs(10)).await;
        assert_eq!(first, second);
    }

    #[test]
    fn report_counts_kinds() {
        let mut sensors = SensorMap::new();
        for t in ["prio/inputs/read/1", "prio/inputs/read/2", "temperature"] {
            let topic = format!("{}/{}", BASE, t);
            sensors.insert(topic.clone(), classify(BASE, &topic, false).unwrap());
        }
        let report = DiscoveryReport::from_sensors(&sensors);
        assert_eq!(report.total(), 3);
        assert_eq!(report.counts[&SensorKind::ZoneInput], 2);
        assert!(report.to_string().contains("zone_input: 2"));
    }
}
