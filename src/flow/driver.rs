//! Runs a wizard to completion
//!
//! The driver performs the discovery actions a flow requests and asks a
//! [`FlowResponder`] to fill in every form it shows.

use super::form::{
    Form, FormStep, FIELD_DEVICE_CLASS, FIELD_ENABLED, FIELD_ENABLE_OUTPUTS, FIELD_MODULE_PATH,
    FIELD_NAME, FIELD_RECONFIGURE,
};
use super::{AbortReason, EntryData, Flow, FlowError, FlowInput, FlowResult, SensorSettings};
use crate::discovery::{discover_modules, discover_sensors, DiscoveryTimeouts};
use crate::mqtt::PubSubChannel;
use tracing::{debug, info};

/// Fills in forms; stands in for an interactive UI
pub trait FlowResponder {
    /// Answers `form`, or `None` to cancel the flow
    fn respond(&mut self, form: &Form) -> Option<FlowInput>;
}

/// How a driven flow ended
#[derive(Debug, Clone, PartialEq)]
pub enum FlowOutcome {
    Created { title: String, data: EntryData },
    Updated(EntryData),
    Aborted(AbortReason),
    Cancelled,
}

pub struct FlowDriver<'a, C: PubSubChannel + ?Sized> {
    channel: &'a C,
    timeouts: DiscoveryTimeouts,
}

impl<'a, C: PubSubChannel + ?Sized> FlowDriver<'a, C> {
    pub fn new(channel: &'a C, timeouts: DiscoveryTimeouts) -> Self {
        Self { channel, timeouts }
    }

    pub async fn run<F, R>(&self, flow: &mut F, responder: &mut R) -> Result<FlowOutcome, FlowError>
    where
        F: Flow + ?Sized,
        R: FlowResponder + ?Sized,
    {
        let mut result = flow.handle(FlowInput::Start)?;
        loop {
            let input = match result {
                FlowResult::RunModuleDiscovery => FlowInput::ModulesDiscovered(
                    discover_modules(self.channel, self.timeouts.module_window).await,
                ),
                FlowResult::RunSensorDiscovery {
                    module,
                    outputs_enabled,
                } => FlowInput::SensorsDiscovered(
                    discover_sensors(
                        self.channel,
                        &module,
                        outputs_enabled,
                        self.timeouts.sensor_window,
                    )
                    .await,
                ),
                FlowResult::ShowForm(form) => {
                    debug!("Showing form {}", form.step.id());
                    match responder.respond(&form) {
                        Some(input) => input,
                        None => {
                            info!("Flow cancelled at {}", form.step.id());
                            return Ok(FlowOutcome::Cancelled);
                        }
                    }
                }
                FlowResult::CreateEntry { title, data } => {
                    return Ok(FlowOutcome::Created { title, data })
                }
                FlowResult::UpdateEntry(data) => return Ok(FlowOutcome::Updated(data)),
                FlowResult::Abort(reason) => {
                    info!("Flow aborted: {}", reason.as_str());
                    return Ok(FlowOutcome::Aborted(reason));
                }
            };
            result = flow.handle(input)?;
        }
    }
}

/// Accepts every default, optionally with a preset module and outputs flag.
///
/// Gives up on the second manual entry form, so an unreachable module
/// cancels the flow instead of looping.
#[derive(Debug, Clone, Default)]
pub struct DefaultsResponder {
    module_path: Option<String>,
    enable_outputs: Option<bool>,
    manual_attempts: usize,
}

impl DefaultsResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module_path(mut self, module_path: impl Into<String>) -> Self {
        self.module_path = Some(module_path.into());
        self
    }

    pub fn with_outputs(mut self, enable_outputs: bool) -> Self {
        self.enable_outputs = Some(enable_outputs);
        self
    }
}

impl FlowResponder for DefaultsResponder {
    fn respond(&mut self, form: &Form) -> Option<FlowInput> {
        match form.step {
            FormStep::SelectModule => {
                let options = form.options(FIELD_MODULE_PATH)?;
                let preset = self
                    .module_path
                    .as_ref()
                    .filter(|path| options.contains(path));
                preset
                    .or_else(|| options.first())
                    .map(|path| FlowInput::ModuleSelected(path.clone()))
            }
            FormStep::ManualEntry => {
                if self.manual_attempts > 0 {
                    return None;
                }
                self.manual_attempts += 1;
                let path = self
                    .module_path
                    .clone()
                    .or_else(|| form.default_text(FIELD_MODULE_PATH).map(str::to_string))?;
                Some(FlowInput::ManualPath(path))
            }
            FormStep::OutputConfig => Some(FlowInput::OutputsChosen(
                self.enable_outputs
                    .or_else(|| form.default_bool(FIELD_ENABLE_OUTPUTS))
                    .unwrap_or(false),
            )),
            FormStep::SensorConfig => Some(FlowInput::SensorConfigured(SensorSettings {
                enabled: form.default_bool(FIELD_ENABLED).unwrap_or(true),
                name: form.default_text(FIELD_NAME).unwrap_or_default().to_string(),
                device_class: form.selected(FIELD_DEVICE_CLASS).map(str::to_string),
            })),
            FormStep::Init => Some(FlowInput::Reconfigure(
                form.default_bool(FIELD_RECONFIGURE).unwrap_or(true),
            )),
        }
    }
}
