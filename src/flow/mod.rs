//! Setup and reconfiguration wizards
//!
//! Both wizards are explicit state machines: a step enum, one context
//! struct and a `handle(input) -> FlowResult` transition function. They
//! never touch the broker themselves; discovery is requested through
//! [`FlowResult::RunModuleDiscovery`] / [`FlowResult::RunSensorDiscovery`]
//! and its outcome fed back as input. [`FlowDriver`] runs that loop against
//! a channel and a [`FlowResponder`] that fills in the forms.

mod config_flow;
mod driver;
mod form;
mod options_flow;

pub use config_flow::{ConfigFlow, FlowContext};
pub use driver::{DefaultsResponder, FlowDriver, FlowOutcome, FlowResponder};
pub use form::{
    FieldValue, Form, FormError, FormField, FormStep, FIELD_DEVICE_CLASS, FIELD_ENABLED,
    FIELD_ENABLE_OUTPUTS, FIELD_MODULE_PATH, FIELD_NAME, FIELD_RECONFIGURE,
};
pub use options_flow::OptionsFlow;

use crate::classifier::{DeviceClass, SensorKind, SensorMap, UnknownDeviceClass};
use crate::topics::ModuleIdentity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Title of every created entry
pub const ENTRY_TITLE: &str = "Honeywell Galaxy Alarm";

/// Persisted result of a completed setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryData {
    pub module_path: ModuleIdentity,
    #[serde(default)]
    pub enable_outputs: bool,
    #[serde(default)]
    pub sensors: SensorMap,
}

impl EntryData {
    /// Topics the user walks through, in order
    pub fn configurable_keys(&self) -> Vec<String> {
        configurable_keys(&self.sensors)
    }
}

/// Sorted topics of all sensors that are not auto-enabled
pub(crate) fn configurable_keys(sensors: &SensorMap) -> Vec<String> {
    sensors
        .iter()
        .filter(|(_, descriptor)| !descriptor.auto_enabled)
        .map(|(key, _)| key.clone())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStep {
    User,
    SelectModule,
    ManualEntry,
    OutputConfig,
    Discover,
    SensorConfig(usize),
    Done,
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowStep::User => f.write_str("user"),
            FlowStep::SelectModule => f.write_str("select_module"),
            FlowStep::ManualEntry => f.write_str("manual_entry"),
            FlowStep::OutputConfig => f.write_str("output_config"),
            FlowStep::Discover => f.write_str("discover"),
            FlowStep::SensorConfig(i) => write!(f, "sensor_config[{}]", i),
            FlowStep::Done => f.write_str("done"),
        }
    }
}

/// Values submitted on a sensor form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorSettings {
    pub enabled: bool,
    pub name: String,
    /// Select value; only applied to zone inputs
    pub device_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowInput {
    Start,
    ModulesDiscovered(BTreeSet<ModuleIdentity>),
    ModuleSelected(String),
    ManualPath(String),
    OutputsChosen(bool),
    SensorsDiscovered(SensorMap),
    SensorConfigured(SensorSettings),
    Reconfigure(bool),
}

impl FlowInput {
    pub fn name(&self) -> &'static str {
        match self {
            FlowInput::Start => "start",
            FlowInput::ModulesDiscovered(_) => "modules_discovered",
            FlowInput::ModuleSelected(_) => "module_selected",
            FlowInput::ManualPath(_) => "manual_path",
            FlowInput::OutputsChosen(_) => "outputs_chosen",
            FlowInput::SensorsDiscovered(_) => "sensors_discovered",
            FlowInput::SensorConfigured(_) => "sensor_configured",
            FlowInput::Reconfigure(_) => "reconfigure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    AlreadyConfigured,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::AlreadyConfigured => "already_configured",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowResult {
    ShowForm(Form),
    RunModuleDiscovery,
    RunSensorDiscovery {
        module: ModuleIdentity,
        outputs_enabled: bool,
    },
    CreateEntry {
        title: String,
        data: EntryData,
    },
    UpdateEntry(EntryData),
    Abort(AbortReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// Input that the current step does not accept
    #[error("Unexpected input {input} in step {step}")]
    UnexpectedInput { step: FlowStep, input: &'static str },

    /// The wizard reached its end without a module to create the entry for
    #[error("No module selected when finishing step {step}")]
    NoModuleSelected { step: FlowStep },

    /// Device class outside the offered options
    #[error("Invalid device class: {0}")]
    InvalidDeviceClass(#[from] UnknownDeviceClass),
}

/// A wizard the driver can run
pub trait Flow {
    fn handle(&mut self, input: FlowInput) -> Result<FlowResult, FlowError>;
    fn step(&self) -> FlowStep;
}

/// Applies submitted settings to one descriptor
pub(crate) fn apply_settings(
    sensors: &mut SensorMap,
    key: &str,
    settings: SensorSettings,
) -> Result<(), FlowError> {
    let Some(descriptor) = sensors.get_mut(key) else {
        return Ok(());
    };
    let device_class = match (&settings.device_class, descriptor.kind) {
        (Some(raw), SensorKind::ZoneInput) => Some(DeviceClass::parse_option(raw)?),
        _ => None,
    };
    descriptor.enabled = settings.enabled;
    descriptor.name = settings.name;
    if let Some(class) = device_class {
        descriptor.device_class = class;
    }
    Ok(())
}

/// Carries user choices over a re-discovery.
///
/// Topics whose kind is unchanged keep `enabled`, `name` and `device_class`
/// from `previous`; changed kinds get fresh defaults; topics that were not
/// rediscovered are dropped.
pub fn merge_overrides(previous: &SensorMap, rediscovered: SensorMap) -> SensorMap {
    rediscovered
        .into_iter()
        .map(|(topic, mut descriptor)| {
            if let Some(old) = previous.get(&topic) {
                if old.kind == descriptor.kind {
                    descriptor.enabled = old.enabled;
                    descriptor.name = old.name.clone();
                    descriptor.device_class = old.device_class;
                }
            }
            (topic, descriptor)
        })
        .collect()
}
