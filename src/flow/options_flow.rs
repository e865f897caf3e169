//! Reconfiguration of an existing entry
//!
//! Walks the user-configurable sensors of the entry through the same sensor
//! form as the setup wizard. Auto-enabled sensors are never shown.

use super::form::{sensor_config_form, FieldValue, Form, FormStep, FIELD_RECONFIGURE};
use super::{
    apply_settings, configurable_keys, EntryData, Flow, FlowError, FlowInput, FlowResult,
    FlowStep,
};
use tracing::{debug, info, warn};

pub struct OptionsFlow {
    step: FlowStep,
    entry: EntryData,
    sensor_keys: Vec<String>,
}

impl OptionsFlow {
    pub fn new(entry: EntryData) -> Self {
        Self {
            step: FlowStep::User,
            entry,
            sensor_keys: Vec::new(),
        }
    }

    fn show_or_finish(&mut self, index: usize) -> FlowResult {
        match sensor_config_form(&self.entry.sensors, &self.sensor_keys, index) {
            Some(form) => {
                self.step = FlowStep::SensorConfig(index);
                FlowResult::ShowForm(form)
            }
            None => {
                self.step = FlowStep::Done;
                info!("Reconfigured entry for {}", self.entry.module_path);
                FlowResult::UpdateEntry(self.entry.clone())
            }
        }
    }
}

impl Flow for OptionsFlow {
    fn step(&self) -> FlowStep {
        self.step
    }

    fn handle(&mut self, input: FlowInput) -> Result<FlowResult, FlowError> {
        let result = match (self.step, input) {
            (FlowStep::User, FlowInput::Start) => FlowResult::ShowForm(
                Form::new(FormStep::Init).field(FIELD_RECONFIGURE, FieldValue::Bool(true)),
            ),
            (FlowStep::User, FlowInput::Reconfigure(false)) => {
                debug!("Reconfiguration declined for {}", self.entry.module_path);
                self.step = FlowStep::Done;
                FlowResult::UpdateEntry(self.entry.clone())
            }
            (FlowStep::User, FlowInput::Reconfigure(true)) => {
                self.sensor_keys = configurable_keys(&self.entry.sensors);
                self.show_or_finish(0)
            }
            (FlowStep::SensorConfig(index), FlowInput::SensorConfigured(settings)) => {
                if let Some(key) = self.sensor_keys.get(index).cloned() {
                    apply_settings(&mut self.entry.sensors, &key, settings)?;
                }
                self.show_or_finish(index + 1)
            }
            (step, input) => {
                warn!("Input {} not accepted in step {}", input.name(), step);
                return Err(FlowError::UnexpectedInput {
                    step,
                    input: input.name(),
                });
            }
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{SensorSettings, FIELD_NAME};
    use super::*;
    use crate::classifier::{classify, SensorMap};
    use crate::topics::ModuleIdentity;

    const BASE: &str = "selfmon/vmod.010aa1";

    fn entry(relatives: &[&str]) -> EntryData {
        let sensors: SensorMap = relatives
            .iter()
            .filter_map(|r| classify(BASE, &format!("{}/{}", BASE, r), true))
            .map(|d| (d.topic.clone(), d))
            .collect();
        EntryData {
            module_path: ModuleIdentity::parse(BASE).unwrap(),
            enable_outputs: true,
            sensors,
        }
    }

    #[test]
    fn walks_configurable_sensors_and_updates() {
        let mut flow = OptionsFlow::new(entry(&["prio/inputs/read/1", "vrio/outputs/5", "temperature"]));
        match flow.handle(FlowInput::Start).unwrap() {
            FlowResult::ShowForm(form) => {
                assert_eq!(form.step, FormStep::Init);
                assert_eq!(form.default_bool(FIELD_RECONFIGURE), Some(true));
            }
            other => panic!("unexpected {:?}", other),
        }

        let first = flow.handle(FlowInput::Reconfigure(true)).unwrap();
        assert!(matches!(first, FlowResult::ShowForm(ref f) if f.default_text(FIELD_NAME) == Some("Alarm - Zone 1")));

        flow.handle(FlowInput::SensorConfigured(SensorSettings {
            enabled: false,
            name: "Garage".to_string(),
            device_class: Some("garage_door".to_string()),
        }))
        .unwrap();
        assert_eq!(flow.step(), FlowStep::SensorConfig(1));

        let done = flow
            .handle(FlowInput::SensorConfigured(SensorSettings {
                enabled: true,
                name: "Siren".to_string(),
                device_class: None,
            }))
            .unwrap();
        match done {
            FlowResult::UpdateEntry(data) => {
                let zone = &data.sensors[&format!("{}/prio/inputs/read/1", BASE)];
                assert!(!zone.enabled);
                assert_eq!(zone.name, "Garage");
                assert_eq!(data.sensors[&format!("{}/vrio/outputs/5", BASE)].name, "Siren");
                assert_eq!(data.sensors.len(), 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn nothing_to_configure_updates_unchanged() {
        let original = entry(&["temperature", "version"]);
        let mut flow = OptionsFlow::new(original.clone());
        flow.handle(FlowInput::Start).unwrap();
        assert_eq!(
            flow.handle(FlowInput::Reconfigure(true)).unwrap(),
            FlowResult::UpdateEntry(original)
        );
    }

    #[test]
    fn declining_keeps_entry() {
        let original = entry(&["prio/inputs/read/1"]);
        let mut flow = OptionsFlow::new(original.clone());
        flow.handle(FlowInput::Start).unwrap();
        assert_eq!(
            flow.handle(FlowInput::Reconfigure(false)).unwrap(),
            FlowResult::UpdateEntry(original)
        );
        assert!(flow.handle(FlowInput::Start).is_err());
    }
}
