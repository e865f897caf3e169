use selfmon_bridge::classifier::{DeviceClass, SensorKind};
use selfmon_bridge::decoder::SensorState;
use selfmon_bridge::discovery::{discover_sensors, DiscoveryTimeouts};
use selfmon_bridge::flow::{
    ConfigFlow, DefaultsResponder, FlowDriver, FlowInput, FlowOutcome, FlowResponder, Form,
    FormStep, OptionsFlow, SensorSettings, FIELD_NAME,
};
use selfmon_bridge::mqtt::{LocalChannel, PubSubChannel};
use selfmon_bridge::registry::ModuleRegistry;
use selfmon_bridge::store::EntryStore;
use selfmon_bridge::topics::ModuleIdentity;
use std::collections::BTreeSet;
use std::time::Duration;

const BASE: &str = "selfmon/vmod.010aa1";

fn gateway() -> LocalChannel {
    let channel = LocalChannel::new();
    channel.seed_from_snapshot(
        "selfmon/vmod.010aa1/prio/inputs/read/1 CLOSED
         selfmon/vmod.010aa1/prio/inputs/read/2 CLOSED
         selfmon/vmod.010aa1/vrio/inputs/read/14 OPEN
         selfmon/vmod.010aa1/prio/outputs/1 OFF
         selfmon/vmod.010aa1/temperature 22.0
         selfmon/vmod.010aa1/vkp/display/line1 GALAXY DIMENSION
         selfmon/vmod.010aa1/vkp/display/line2 UNSET
         selfmon/vmod.010aa1/version 1.2.3
         selfmon/vmod.010aa1/heartbeat 1",
    );
    channel
}

fn timeouts() -> DiscoveryTimeouts {
    DiscoveryTimeouts::default()
}

/// Renames every sensor form and disables zone 2
struct RenamingResponder {
    seen: Vec<String>,
}

impl FlowResponder for RenamingResponder {
    fn respond(&mut self, form: &Form) -> Option<FlowInput> {
        match form.step {
            FormStep::OutputConfig => Some(FlowInput::OutputsChosen(false)),
            FormStep::SensorConfig => {
                let topic = form.placeholders.get("topic")?.clone();
                let name = form.default_text(FIELD_NAME)?.to_string();
                self.seen.push(topic.clone());
                Some(FlowInput::SensorConfigured(SensorSettings {
                    enabled: !topic.ends_with("/read/2"),
                    name: format!("{} (renamed)", name),
                    device_class: Some("tamper".to_string()),
                }))
            }
            _ => DefaultsResponder::new().respond(form),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn setup_store_and_run_entities() {
    let channel = gateway();
    let driver = FlowDriver::new(&channel, timeouts());
    let mut responder = RenamingResponder { seen: Vec::new() };

    let started = tokio::time::Instant::now();
    let outcome = driver
        .run(&mut ConfigFlow::new(BTreeSet::new()), &mut responder)
        .await
        .unwrap();
    // both windows are always waited out in full
    assert!(started.elapsed() >= Duration::from_secs(18));
    assert_eq!(channel.active_subscriptions(), 0);

    let data = match outcome {
        FlowOutcome::Created { data, .. } => data,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(
        responder.seen,
        vec![
            format!("{}/prio/inputs/read/1", BASE),
            format!("{}/prio/inputs/read/2", BASE),
            format!("{}/vrio/inputs/read/14", BASE),
        ]
    );
    // outputs were declined, so the output topic is not part of the entry
    assert_eq!(data.sensors.len(), 7);
    assert!(data
        .sensors
        .values()
        .all(|d| d.kind != SensorKind::Output));
    let zone1 = &data.sensors[&format!("{}/prio/inputs/read/1", BASE)];
    assert_eq!(zone1.name, "Alarm - Zone 1 (renamed)");
    assert_eq!(zone1.device_class, Some(DeviceClass::Tamper));
    let temperature = &data.sensors[&format!("{}/temperature", BASE)];
    assert_eq!(temperature.name, "Temperature Sensor");

    let dir = tempfile::tempdir().unwrap();
    let store = EntryStore::new(dir.path());
    store.save("selfmon_010aa1", &data).await.unwrap();
    let stored = store.load("selfmon_010aa1").await.unwrap().unwrap();
    assert_eq!(stored, data);

    let mut registry = ModuleRegistry::new();
    // zone 2 is disabled
    assert_eq!(registry.setup_entry("selfmon_010aa1", stored, &channel).unwrap(), 6);
    assert_eq!(channel.active_subscriptions(), 6);

    let zone1_topic = format!("{}/prio/inputs/read/1", BASE);
    let mut zone1_rx = registry
        .handles("selfmon_010aa1")
        .iter()
        .find(|h| h.topic == zone1_topic)
        .map(|h| h.watch_state())
        .unwrap();
    zone1_rx
        .wait_for(|s| *s == Some(SensorState::Binary(false)))
        .await
        .unwrap();

    channel.publish(&zone1_topic, "OPEN", false);
    zone1_rx
        .wait_for(|s| *s == Some(SensorState::Binary(true)))
        .await
        .unwrap();

    // a malformed payload leaves the state alone
    channel.publish(&zone1_topic, "TAMPER", false);
    channel.publish(&format!("{}/temperature", BASE), "n/a", false);
    tokio::task::yield_now().await;
    let states = registry.states("selfmon_010aa1").unwrap();
    assert_eq!(states[&zone1_topic], Some(SensorState::Binary(true)));

    registry.unload_all(&channel).await;
    assert_eq!(channel.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn failing_subscriptions_do_not_abort_discovery() {
    let channel = gateway();
    channel.refuse_filter(&format!("{}/prio/inputs/read/#", BASE));
    channel.refuse_filter(&format!("{}/temperature", BASE));

    let module = ModuleIdentity::parse(BASE).unwrap();
    let sensors = discover_sensors(&channel, &module, true, Duration::from_secs(10)).await;
    let kinds: Vec<SensorKind> = sensors.values().map(|d| d.kind).collect();
    assert_eq!(sensors.len(), 5);
    assert!(!kinds.contains(&SensorKind::Temperature));
    assert!(sensors.contains_key(&format!("{}/vrio/inputs/read/14", BASE)));
    assert!(sensors.contains_key(&format!("{}/prio/outputs/1", BASE)));
    assert_eq!(channel.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn reconfigure_and_reload() {
    let channel = gateway();
    let driver = FlowDriver::new(&channel, timeouts());
    let data = match driver
        .run(
            &mut ConfigFlow::new(BTreeSet::new()),
            &mut DefaultsResponder::new().with_outputs(true),
        )
        .await
        .unwrap()
    {
        FlowOutcome::Created { data, .. } => data,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(data.sensors.len(), 8);

    let mut registry = ModuleRegistry::new();
    registry.setup_entry("e", data.clone(), &channel).unwrap();
    assert_eq!(channel.active_subscriptions(), 8);

    // a second setup of the same module aborts
    let outcome = driver
        .run(
            &mut ConfigFlow::new(registry.configured_modules()),
            &mut DefaultsResponder::new(),
        )
        .await
        .unwrap();
    assert_eq!(
        outcome,
        FlowOutcome::Aborted(selfmon_bridge::flow::AbortReason::AlreadyConfigured)
    );

    let mut responder = RenamingResponder { seen: Vec::new() };
    let updated = match driver
        .run(&mut OptionsFlow::new(data), &mut responder)
        .await
        .unwrap()
    {
        FlowOutcome::Updated(updated) => updated,
        other => panic!("unexpected {:?}", other),
    };
    // zones and the output, never the auto-enabled sensors
    assert_eq!(responder.seen.len(), 4);

    assert_eq!(registry.reload_entry("e", updated, &channel).await.unwrap(), 7);
    assert_eq!(channel.active_subscriptions(), 7);
    registry.unload_all(&channel).await;
    assert_eq!(channel.active_subscriptions(), 0);
}
