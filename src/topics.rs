//! Topic vocabulary of the SelfMon VMOD gateway
//!
//! Every topic a VMOD publishes lives below its module base path
//! (`selfmon/vmod.<hex>`). The constants here are relative to that base;
//! [`ModuleIdentity`] joins them into full topics and filters.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Default shown in the manual entry form
pub const DEFAULT_MODULE_PATH: &str = "selfmon/vmod.010aa1";

pub const TOPIC_PRIO_INPUTS: &str = "prio/inputs/read";
pub const TOPIC_VRIO_INPUTS: &str = "vrio/inputs/read";
pub const TOPIC_PRIO_OUTPUTS: &str = "prio/outputs";
pub const TOPIC_VRIO_OUTPUTS: &str = "vrio/outputs";
pub const TOPIC_TEMPERATURE: &str = "temperature";
pub const TOPIC_VKP_LINE1: &str = "vkp/display/line1";
pub const TOPIC_VKP_LINE2: &str = "vkp/display/line2";
pub const TOPIC_VERSION: &str = "version";

/// Zone payloads
pub const PAYLOAD_OPEN: &str = "OPEN";
pub const PAYLOAD_CLOSED: &str = "CLOSED";

/// Output payloads (advisory, outputs accept anything)
pub const PAYLOAD_ON: &str = "ON";
pub const PAYLOAD_OFF: &str = "OFF";

/// Broad filters used while looking for any module on the broker.
///
/// They overlap on purpose: a failed subscription on one of them leaves the
/// others to pick up the same traffic. `+` has to span a whole level, so the
/// module level is matched with `+` and narrowed by [`ModuleIdentity::from_topic`].
pub const MODULE_DISCOVERY_FILTERS: [&str; 7] = [
    "selfmon/+/temperature",
    "selfmon/+/version",
    "selfmon/+/heartbeat",
    "selfmon/+/vkp/display/#",
    "selfmon/+/prio/#",
    "selfmon/+/vrio/#",
    "selfmon/#",
];

fn module_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^selfmon/vmod\.[a-fA-F0-9]+$").expect("static regex"))
}

fn module_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(selfmon/vmod\.[a-fA-F0-9]+)(?:/|$)").expect("static regex"))
}

/// Error returned when a string is not a valid module base path
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid module path: {0}")]
pub struct InvalidModulePath(pub String);

/// Base topic path of one physical VMOD gateway
///
/// Created once when the module is chosen and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleIdentity {
    base: String,
}

impl ModuleIdentity {
    /// Validates user supplied input.
    ///
    /// Surrounding whitespace and trailing slashes are ignored, so
    /// `" selfmon/vmod.010aa1/ "` is accepted.
    pub fn parse(input: &str) -> Result<Self, InvalidModulePath> {
        let cleaned = input.trim().trim_end_matches('/');
        if module_path_regex().is_match(cleaned) {
            Ok(Self {
                base: cleaned.to_string(),
            })
        } else {
            Err(InvalidModulePath(input.to_string()))
        }
    }

    /// Extracts the module base from any topic published below it
    pub fn from_topic(topic: &str) -> Option<Self> {
        module_prefix_regex().captures(topic).and_then(|caps| {
            caps.get(1).map(|m| Self {
                base: m.as_str().to_string(),
            })
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Hex suffix of the module path (`010aa1` for `selfmon/vmod.010aa1`)
    pub fn module_id(&self) -> &str {
        self.base
            .rsplit_once('.')
            .map(|(_, id)| id)
            .unwrap_or(&self.base)
    }

    /// Stable identifier grouping all sensors of this module
    pub fn device_identifier(&self) -> String {
        format!("selfmon_{}", self.module_id())
    }

    /// Joins a module-relative topic onto the base path
    pub fn topic(&self, relative: &str) -> String {
        format!("{}/{}", self.base, relative)
    }

    /// Subscription filters used for sensor discovery on this module
    pub fn sensor_filters(&self, outputs_enabled: bool) -> Vec<String> {
        let mut filters = vec![
            self.topic(&format!("{}/#", TOPIC_PRIO_INPUTS)),
            self.topic(&format!("{}/#", TOPIC_VRIO_INPUTS)),
            self.topic(TOPIC_TEMPERATURE),
            self.topic(TOPIC_VKP_LINE1),
            self.topic(TOPIC_VKP_LINE2),
            self.topic(TOPIC_VERSION),
        ];
        if outputs_enabled {
            filters.push(self.topic(&format!("{}/#", TOPIC_PRIO_OUTPUTS)));
            filters.push(self.topic(&format!("{}/#", TOPIC_VRIO_OUTPUTS)));
        }
        filters
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)
    }
}

impl TryFrom<String> for ModuleIdentity {
    type Error = InvalidModulePath;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ModuleIdentity> for String {
    fn from(value: ModuleIdentity) -> Self {
        value.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_paths() {
        let module = ModuleIdentity::parse("selfmon/vmod.010aa1").unwrap();
        assert_eq!(module.base(), "selfmon/vmod.010aa1");
        assert_eq!(module.module_id(), "010aa1");
        assert_eq!(module.device_identifier(), "selfmon_010aa1");

        let upper = ModuleIdentity::parse("  selfmon/vmod.0A1F/ ").unwrap();
        assert_eq!(upper.base(), "selfmon/vmod.0A1F");
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(ModuleIdentity::parse("selfmon/vmod.xyz").is_err());
        assert!(ModuleIdentity::parse("selfmon/vmod").is_err());
        assert!(ModuleIdentity::parse("other/vmod.0101").is_err());
        assert!(ModuleIdentity::parse("selfmon/vmod.0101/temperature").is_err());
        assert!(ModuleIdentity::parse("").is_err());
    }

    #[test]
    fn extracts_module_from_topic() {
        let module = ModuleIdentity::from_topic("selfmon/vmod.010AA1/prio/inputs/read/7").unwrap();
        assert_eq!(module.base(), "selfmon/vmod.010AA1");
        assert!(ModuleIdentity::from_topic("selfmon/bridge/status").is_none());
        assert!(ModuleIdentity::from_topic("x/selfmon/vmod.01/temperature").is_none());
        assert!(ModuleIdentity::from_topic("selfmon/vmod.01zz/temperature").is_none());
    }

    #[test]
    fn sensor_filters_respect_outputs_flag() {
        let module = ModuleIdentity::parse(DEFAULT_MODULE_PATH).unwrap();
        let filters = module.sensor_filters(false);
        assert_eq!(filters.len(), 6);
        assert!(filters.contains(&"selfmon/vmod.010aa1/prio/inputs/read/#".to_string()));
        assert!(!filters.iter().any(|f| f.contains("outputs")));

        let filters = module.sensor_filters(true);
        assert_eq!(filters.len(), 8);
        assert!(filters.contains(&"selfmon/vmod.010aa1/vrio/outputs/#".to_string()));
    }

    #[test]
    fn serializes_as_plain_string() {
        let module = ModuleIdentity::parse(DEFAULT_MODULE_PATH).unwrap();
        let value = toml::Value::try_from(&module).unwrap();
        assert_eq!(value.as_str(), Some(DEFAULT_MODULE_PATH));
    }
}
