//! Form descriptions handed to the responder

use crate::classifier::{DeviceClass, SensorDescriptor, SensorKind, SensorMap, NO_DEVICE_CLASS};
use std::collections::BTreeMap;

pub const FIELD_MODULE_PATH: &str = "module_path";
pub const FIELD_ENABLE_OUTPUTS: &str = "enable_outputs";
pub const FIELD_ENABLED: &str = "enabled";
pub const FIELD_NAME: &str = "name";
pub const FIELD_DEVICE_CLASS: &str = "device_class";
pub const FIELD_RECONFIGURE: &str = "reconfigure";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormStep {
    SelectModule,
    ManualEntry,
    OutputConfig,
    SensorConfig,
    Init,
}

impl FormStep {
    pub fn id(&self) -> &'static str {
        match self {
            FormStep::SelectModule => "select_module",
            FormStep::ManualEntry => "manual_entry",
            FormStep::OutputConfig => "output_config",
            FormStep::SensorConfig => "sensor_config",
            FormStep::Init => "init",
        }
    }
}

/// Form-level validation errors, shown under the `base` key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormError {
    NoModulesFound,
    NoSensorsFound,
    InvalidPath,
}

impl FormError {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormError::NoModulesFound => "no_modules_found",
            FormError::NoSensorsFound => "no_sensors_found",
            FormError::InvalidPath => "invalid_path",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
    Select {
        options: Vec<String>,
        selected: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub key: &'static str,
    pub default: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    pub step: FormStep,
    pub fields: Vec<FormField>,
    pub error: Option<FormError>,
    pub placeholders: BTreeMap<&'static str, String>,
    pub last_step: bool,
}

impl Form {
    pub fn new(step: FormStep) -> Self {
        Self {
            step,
            fields: Vec::new(),
            error: None,
            placeholders: BTreeMap::new(),
            last_step: false,
        }
    }

    pub fn field(mut self, key: &'static str, default: FieldValue) -> Self {
        self.fields.push(FormField { key, default });
        self
    }

    pub fn with_error(mut self, error: FormError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn placeholder(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.placeholders.insert(key, value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.key == key).map(|f| &f.default)
    }

    pub fn default_text(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn default_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            FieldValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn options(&self, key: &str) -> Option<&[String]> {
        match self.get(key)? {
            FieldValue::Select { options, .. } => Some(options),
            _ => None,
        }
    }

    pub fn selected(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            FieldValue::Select { selected, .. } => selected.as_deref(),
            _ => None,
        }
    }
}

pub(crate) fn manual_entry_form(default_path: &str, error: Option<FormError>) -> Form {
    let form = Form::new(FormStep::ManualEntry)
        .field(FIELD_MODULE_PATH, FieldValue::Text(default_path.to_string()));
    match error {
        Some(error) => form.with_error(error),
        None => form,
    }
}

pub(crate) fn select_module_form<'a, I>(modules: I) -> Form
where
    I: IntoIterator<Item = &'a str>,
{
    Form::new(FormStep::SelectModule).field(
        FIELD_MODULE_PATH,
        FieldValue::Select {
            options: modules.into_iter().map(str::to_string).collect(),
            selected: None,
        },
    )
}

pub(crate) fn output_config_form(module_path: &str) -> Form {
    Form::new(FormStep::OutputConfig)
        .field(FIELD_ENABLE_OUTPUTS, FieldValue::Bool(false))
        .placeholder(FIELD_MODULE_PATH, module_path)
}

/// Form for the sensor at `index` of `keys`
pub(crate) fn sensor_config_form(sensors: &SensorMap, keys: &[String], index: usize) -> Option<Form> {
    let descriptor: &SensorDescriptor = sensors.get(keys.get(index)?)?;
    let mut form = Form::new(FormStep::SensorConfig)
        .field(FIELD_ENABLED, FieldValue::Bool(descriptor.enabled))
        .field(FIELD_NAME, FieldValue::Text(descriptor.name.clone()));

    if descriptor.kind == SensorKind::ZoneInput {
        let selected = descriptor
            .device_class
            .map(|c: DeviceClass| c.as_str())
            .unwrap_or(NO_DEVICE_CLASS);
        form = form.field(
            FIELD_DEVICE_CLASS,
            FieldValue::Select {
                options: DeviceClass::options().into_iter().map(str::to_string).collect(),
                selected: Some(selected.to_string()),
            },
        );
    }

    form = form
        .placeholder("sensor_id", format!("{} - {}", descriptor.kind, descriptor.zone_id))
        .placeholder("sensor_num", (index + 1).to_string())
        .placeholder("total_sensors", keys.len().to_string())
        .placeholder("topic", descriptor.topic.clone());
    form.last_step = index + 1 == keys.len();
    Some(form)
}
