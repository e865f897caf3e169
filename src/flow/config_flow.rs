//! Initial setup wizard
//!
//! ```text
//! User ──► SelectModule ─┐
//!   │                    ├──► OutputConfig ──► Discover ──► SensorConfig(0..n) ──► Done
//!   └────► ManualEntry ──┘                        │
//!              ▲                                  │ nothing found
//!              └──────────────────────────────────┘
//! ```

use super::form::{
    manual_entry_form, output_config_form, select_module_form, sensor_config_form, FormError,
};
use super::{
    apply_settings, configurable_keys, merge_overrides, AbortReason, EntryData, Flow,
    FlowError, FlowInput, FlowResult, FlowStep, ENTRY_TITLE,
};
use crate::classifier::SensorMap;
use crate::topics::{ModuleIdentity, DEFAULT_MODULE_PATH};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Mutable state threaded through the steps
#[derive(Debug, Clone, Default)]
pub struct FlowContext {
    pub module: Option<ModuleIdentity>,
    pub discovered_modules: BTreeSet<ModuleIdentity>,
    pub sensors: SensorMap,
    pub sensor_keys: Vec<String>,
    pub index: usize,
    pub enable_outputs: bool,
}

pub struct ConfigFlow {
    step: FlowStep,
    context: FlowContext,
    configured: BTreeSet<ModuleIdentity>,
    previous: Option<EntryData>,
}

impl ConfigFlow {
    /// New setup; `configured` are the modules that already have an entry
    pub fn new(configured: BTreeSet<ModuleIdentity>) -> Self {
        Self {
            step: FlowStep::User,
            context: FlowContext::default(),
            configured,
            previous: None,
        }
    }

    /// Re-runs sensor discovery for an existing entry, keeping user choices
    /// for topics that are still there
    pub fn rediscover(previous: EntryData) -> Self {
        Self {
            step: FlowStep::User,
            context: FlowContext::default(),
            configured: BTreeSet::new(),
            previous: Some(previous),
        }
    }

    pub fn context(&self) -> &FlowContext {
        &self.context
    }

    fn unexpected(&self, input: &FlowInput) -> FlowError {
        warn!("Input {} not accepted in step {}", input.name(), self.step);
        FlowError::UnexpectedInput {
            step: self.step,
            input: input.name(),
        }
    }

    /// Rediscovery may only continue on the module the entry belongs to
    fn is_foreign(&self, module: &ModuleIdentity) -> bool {
        match &self.previous {
            Some(previous) if previous.module_path != *module => {
                info!(
                    "Module {} does not belong to the entry for {}",
                    module, previous.module_path
                );
                true
            }
            _ => false,
        }
    }

    fn choose_module(&mut self, module: ModuleIdentity) -> FlowResult {
        if self.configured.contains(&module) {
            info!("Module {} is already configured", module);
            self.step = FlowStep::Done;
            return FlowResult::Abort(AbortReason::AlreadyConfigured);
        }
        info!("Selected module {}", module);
        let form = output_config_form(module.base());
        self.context.module = Some(module);
        self.step = FlowStep::OutputConfig;
        FlowResult::ShowForm(form)
    }

    fn run_sensor_discovery(&mut self, module: ModuleIdentity) -> FlowResult {
        self.step = FlowStep::Discover;
        FlowResult::RunSensorDiscovery {
            module,
            outputs_enabled: self.context.enable_outputs,
        }
    }

    fn sensors_discovered(&mut self, sensors: SensorMap) -> Result<FlowResult, FlowError> {
        if sensors.is_empty() {
            let current = self
                .context
                .module
                .as_ref()
                .map(|m| m.base().to_string())
                .unwrap_or_else(|| DEFAULT_MODULE_PATH.to_string());
            self.step = FlowStep::ManualEntry;
            return Ok(FlowResult::ShowForm(manual_entry_form(
                &current,
                Some(FormError::NoSensorsFound),
            )));
        }

        let sensors = match &self.previous {
            Some(previous) => merge_overrides(&previous.sensors, sensors),
            None => sensors,
        };
        self.context.sensor_keys = configurable_keys(&sensors);
        self.context.sensors = sensors;
        self.context.index = 0;
        debug!(
            "{} sensors discovered, {} to configure",
            self.context.sensors.len(),
            self.context.sensor_keys.len()
        );
        self.show_sensor_or_finish()
    }

    fn show_sensor_or_finish(&mut self) -> Result<FlowResult, FlowError> {
        match sensor_config_form(
            &self.context.sensors,
            &self.context.sensor_keys,
            self.context.index,
        ) {
            Some(form) => {
                self.step = FlowStep::SensorConfig(self.context.index);
                Ok(FlowResult::ShowForm(form))
            }
            None => self.finish(),
        }
    }

    fn finish(&mut self) -> Result<FlowResult, FlowError> {
        let Some(module) = self.context.module.clone() else {
            return Err(FlowError::NoModuleSelected { step: self.step });
        };
        self.step = FlowStep::Done;
        let data = EntryData {
            module_path: module,
            enable_outputs: self.context.enable_outputs,
            sensors: std::mem::take(&mut self.context.sensors),
        };
        if self.previous.is_some() {
            info!("Updated entry for {}", data.module_path);
            Ok(FlowResult::UpdateEntry(data))
        } else {
            info!("Created entry for {}", data.module_path);
            Ok(FlowResult::CreateEntry {
                title: ENTRY_TITLE.to_string(),
                data,
            })
        }
    }
}

impl Flow for ConfigFlow {
    fn step(&self) -> FlowStep {
        self.step
    }

    fn handle(&mut self, input: FlowInput) -> Result<FlowResult, FlowError> {
        let result = match (self.step, input) {
            (FlowStep::User, FlowInput::Start) => match &self.previous {
                Some(previous) => {
                    let module = previous.module_path.clone();
                    self.context.enable_outputs = previous.enable_outputs;
                    self.context.module = Some(module.clone());
                    self.run_sensor_discovery(module)
                }
                None => FlowResult::RunModuleDiscovery,
            },
            (FlowStep::User, FlowInput::ModulesDiscovered(modules)) => {
                self.context.discovered_modules = modules;
                let first = self.context.discovered_modules.iter().next().cloned();
                match (self.context.discovered_modules.len(), first) {
                    (_, None) => {
                        self.step = FlowStep::ManualEntry;
                        FlowResult::ShowForm(manual_entry_form(
                            DEFAULT_MODULE_PATH,
                            Some(FormError::NoModulesFound),
                        ))
                    }
                    (1, Some(only)) => self.choose_module(only),
                    _ => {
                        self.step = FlowStep::SelectModule;
                        FlowResult::ShowForm(select_module_form(
                            self.context.discovered_modules.iter().map(|m| m.base()),
                        ))
                    }
                }
            }
            (FlowStep::SelectModule, FlowInput::ModuleSelected(path)) => {
                match ModuleIdentity::parse(&path) {
                    Ok(module) if !self.is_foreign(&module) => self.choose_module(module),
                    rejected => {
                        if let Err(e) = rejected {
                            debug!("{}", e);
                        }
                        FlowResult::ShowForm(
                            select_module_form(
                                self.context.discovered_modules.iter().map(|m| m.base()),
                            )
                            .with_error(FormError::InvalidPath),
                        )
                    }
                }
            }
            (FlowStep::ManualEntry, FlowInput::ManualPath(path)) => {
                match ModuleIdentity::parse(&path) {
                    Ok(module) if !self.is_foreign(&module) => self.choose_module(module),
                    rejected => {
                        if let Err(e) = rejected {
                            debug!("{}", e);
                        }
                        let current = self
                            .previous
                            .as_ref()
                            .map(|p| p.module_path.base())
                            .unwrap_or(DEFAULT_MODULE_PATH);
                        FlowResult::ShowForm(manual_entry_form(
                            current,
                            Some(FormError::InvalidPath),
                        ))
                    }
                }
            }
            (FlowStep::OutputConfig, FlowInput::OutputsChosen(enabled)) => {
                self.context.enable_outputs = enabled;
                match self.context.module.clone() {
                    Some(module) => self.run_sensor_discovery(module),
                    None => return Err(self.unexpected(&FlowInput::OutputsChosen(enabled))),
                }
            }
            (FlowStep::Discover, FlowInput::SensorsDiscovered(sensors)) => {
                self.sensors_discovered(sensors)?
            }
            (FlowStep::SensorConfig(index), FlowInput::SensorConfigured(settings)) => {
                if let Some(key) = self.context.sensor_keys.get(index).cloned() {
                    apply_settings(&mut self.context.sensors, &key, settings)?;
                }
                self.context.index = index + 1;
                self.show_sensor_or_finish()?
            }
            (_, input) => return Err(self.unexpected(&input)),
        };
        Ok(result)
    }
}
