//! Topic classification
//!
//! Turns a topic seen below a module base into a [`SensorDescriptor`]. The
//! classification is a pure function of `(module base, topic, outputs flag)`:
//! no I/O, no clock, no hidden state, so discovery results can be reproduced
//! from nothing but the topic list.
//!
//! Zone inputs also get a guessed device class. The guess follows a common
//! installer numbering habit (last digit of the zone number) and is only a
//! default the user can change.

use crate::topics::{
    TOPIC_PRIO_INPUTS, TOPIC_PRIO_OUTPUTS, TOPIC_TEMPERATURE, TOPIC_VERSION, TOPIC_VKP_LINE1,
    TOPIC_VKP_LINE2, TOPIC_VRIO_INPUTS, TOPIC_VRIO_OUTPUTS,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Discovered sensors keyed by full topic
pub type SensorMap = BTreeMap<String, SensorDescriptor>;

/// What a topic represents on the alarm panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SensorKind {
    #[serde(rename = "zone_input")]
    ZoneInput,
    #[serde(rename = "output")]
    Output,
    #[serde(rename = "temperature")]
    Temperature,
    #[serde(rename = "vkp_line")]
    KeypadLine,
    #[serde(rename = "version")]
    Version,
}

impl SensorKind {
    /// Kinds that are active without asking the user
    pub fn auto_enabled(&self) -> bool {
        matches!(
            self,
            SensorKind::Temperature | SensorKind::KeypadLine | SensorKind::Version
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::ZoneInput => "zone_input",
            SensorKind::Output => "output",
            SensorKind::Temperature => "temperature",
            SensorKind::KeypadLine => "vkp_line",
            SensorKind::Version => "version",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary sensor device classes offered for zone inputs
///
/// "No class" is expressed as `Option::<DeviceClass>::None`; see
/// [`device_class_serde`] for how that is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Door,
    Motion,
    Smoke,
    Safety,
    Window,
    GarageDoor,
    Vibration,
    Tamper,
    Problem,
}

impl DeviceClass {
    pub const ALL: [DeviceClass; 9] = [
        DeviceClass::Door,
        DeviceClass::Motion,
        DeviceClass::Smoke,
        DeviceClass::Safety,
        DeviceClass::Window,
        DeviceClass::GarageDoor,
        DeviceClass::Vibration,
        DeviceClass::Tamper,
        DeviceClass::Problem,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Door => "door",
            DeviceClass::Motion => "motion",
            DeviceClass::Smoke => "smoke",
            DeviceClass::Safety => "safety",
            DeviceClass::Window => "window",
            DeviceClass::GarageDoor => "garage_door",
            DeviceClass::Vibration => "vibration",
            DeviceClass::Tamper => "tamper",
            DeviceClass::Problem => "problem",
        }
    }

    /// Options list for a select field, including the "None" choice
    pub fn options() -> Vec<&'static str> {
        let mut options: Vec<&'static str> = Self::ALL.iter().map(|c| c.as_str()).collect();
        options.push(NO_DEVICE_CLASS);
        options
    }

    /// Parses a select field value; `"None"` (or empty) means no class
    pub fn parse_option(value: &str) -> Result<Option<DeviceClass>, UnknownDeviceClass> {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case(NO_DEVICE_CLASS) {
            return Ok(None);
        }
        value.parse().map(Some)
    }
}

/// Stored and displayed value for "no device class"
pub const NO_DEVICE_CLASS: &str = "None";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown device class: {0}")]
pub struct UnknownDeviceClass(pub String);

impl FromStr for DeviceClass {
    type Err = UnknownDeviceClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownDeviceClass(s.to_string()))
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stores `Option<DeviceClass>` as a plain string with `"None"` for absence,
/// which keeps entries readable and TOML friendly (TOML has no null).
pub mod device_class_serde {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<DeviceClass>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(class) => serializer.serialize_str(class.as_str()),
            None => serializer.serialize_str(NO_DEVICE_CLASS),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DeviceClass>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DeviceClass::parse_option(&raw).map_err(serde::de::Error::custom)
    }
}

/// One discovered sensor
///
/// `default_name` and `default_device_class` are derived from `kind` and
/// `zone_id`; `enabled`, `name` and `device_class` are what the user chose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    pub topic: String,
    #[serde(rename = "sensor_type")]
    pub kind: SensorKind,
    pub zone_id: String,
    pub default_name: String,
    #[serde(with = "device_class_serde")]
    pub default_device_class: Option<DeviceClass>,
    #[serde(rename = "is_prio", default)]
    pub is_priority: bool,
    pub auto_enabled: bool,
    pub enabled: bool,
    pub name: String,
    #[serde(with = "device_class_serde")]
    pub device_class: Option<DeviceClass>,
}

impl SensorDescriptor {
    /// Builds a descriptor with all user-facing fields at their defaults
    pub fn new(topic: String, kind: SensorKind, zone_id: String, is_priority: bool) -> Self {
        let default_name = default_name(kind, &zone_id);
        let default_device_class = match kind {
            SensorKind::ZoneInput => default_device_class(&zone_id),
            _ => None,
        };
        Self {
            topic,
            kind,
            zone_id,
            name: default_name.clone(),
            default_name,
            device_class: default_device_class,
            default_device_class,
            is_priority,
            auto_enabled: kind.auto_enabled(),
            enabled: true,
        }
    }
}

/// Guesses a device class from the zone number.
///
/// Only the last digit matters; ids that are not plain numbers count as 0.
pub fn default_device_class(zone_id: &str) -> Option<DeviceClass> {
    let zone_num: u64 = if !zone_id.is_empty() && zone_id.bytes().all(|b| b.is_ascii_digit()) {
        // digit strings too long for u64 still have a meaningful last digit
        zone_id
            .parse()
            .unwrap_or_else(|_| u64::from(zone_id.as_bytes()[zone_id.len() - 1] - b'0'))
    } else {
        0
    };
    match zone_num % 10 {
        1 | 7 => Some(DeviceClass::Door),
        2 | 8 => Some(DeviceClass::Motion),
        4 | 6 => Some(DeviceClass::Smoke),
        3 | 5 => Some(DeviceClass::Safety),
        _ => None,
    }
}

pub fn default_name(kind: SensorKind, zone_id: &str) -> String {
    match kind {
        SensorKind::ZoneInput => format!("Alarm - Zone {}", zone_id),
        SensorKind::Output => format!("Alarm - Output {}", zone_id),
        SensorKind::Temperature => "Temperature Sensor".to_string(),
        SensorKind::KeypadLine => {
            if zone_id.to_ascii_lowercase().contains("line1") {
                "Keypad Line 1".to_string()
            } else {
                "Keypad Line 2".to_string()
            }
        }
        SensorKind::Version => "Module Version".to_string(),
    }
}

fn last_segment(relative: &str) -> String {
    relative.rsplit('/').next().unwrap_or(relative).to_string()
}

/// `Some(true)` below the prio branch, `Some(false)` below vrio
fn branch_prefix(relative: &str, prio: &str, vrio: &str) -> Option<bool> {
    if relative.starts_with(&format!("{}/", prio)) {
        Some(true)
    } else if relative.starts_with(&format!("{}/", vrio)) {
        Some(false)
    } else {
        None
    }
}

/// Classifies `full_topic` relative to `module_base`.
///
/// Returns `None` for topics outside the module or with no known meaning.
/// Output topics are only recognised when `outputs_enabled` is set.
pub fn classify(
    module_base: &str,
    full_topic: &str,
    outputs_enabled: bool,
) -> Option<SensorDescriptor> {
    let relative = full_topic
        .strip_prefix(module_base)
        .and_then(|rest| rest.strip_prefix('/'))?;

    if let Some(is_priority) = branch_prefix(relative, TOPIC_PRIO_INPUTS, TOPIC_VRIO_INPUTS) {
        return Some(SensorDescriptor::new(
            full_topic.to_string(),
            SensorKind::ZoneInput,
            last_segment(relative),
            is_priority,
        ));
    }

    if outputs_enabled {
        if let Some(is_priority) = branch_prefix(relative, TOPIC_PRIO_OUTPUTS, TOPIC_VRIO_OUTPUTS)
        {
            return Some(SensorDescriptor::new(
                full_topic.to_string(),
                SensorKind::Output,
                last_segment(relative),
                is_priority,
            ));
        }
    }

    let (kind, zone_id) = match relative {
        TOPIC_TEMPERATURE => (SensorKind::Temperature, "temperature"),
        TOPIC_VKP_LINE1 => (SensorKind::KeypadLine, "line1"),
        TOPIC_VKP_LINE2 => (SensorKind::KeypadLine, "line2"),
        TOPIC_VERSION => (SensorKind::Version, "version"),
        _ => return None,
    };

    Some(SensorDescriptor::new(
        full_topic.to_string(),
        kind,
        zone_id.to_string(),
        false,
    ))
}
