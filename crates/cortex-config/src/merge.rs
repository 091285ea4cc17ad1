//! Per-component config merging.

use serde_json::{Map, Value};

use crate::schema::SystemConfig;

/// Global values injected into every component config of a mode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentDefaults {
    pub api_key: Option<String>,
    pub robot_ip: Option<String>,
    pub device_id: Option<String>,
    pub ethernet_adapter: Option<String>,
    pub mode: Option<String>,
}

impl ComponentDefaults {
    /// Defaults for components of `mode` under `system`.
    pub fn for_mode(system: &SystemConfig, mode: &str) -> Self {
        let creds = &system.credentials;
        Self {
            api_key: creds.api_key.clone(),
            robot_ip: creds.robot_ip.clone(),
            device_id: creds.device_id.clone(),
            ethernet_adapter: creds.ethernet_adapter.clone(),
            mode: Some(mode.to_string()),
        }
    }

    fn entries(&self) -> [(&'static str, Option<&String>); 5] {
        [
            ("api_key", self.api_key.as_ref()),
            ("robot_ip", self.robot_ip.as_ref()),
            ("device_id", self.device_id.as_ref()),
            ("ethernet_adapter", self.ethernet_adapter.as_ref()),
            ("mode", self.mode.as_ref()),
        ]
    }
}

/// Fill keys that are absent (or `null`) in `config` from `defaults`.
/// Explicit per-component values always win.
pub fn merge_component_defaults(
    config: &Map<String, Value>,
    defaults: &ComponentDefaults,
) -> Map<String, Value> {
    let mut merged = config.clone();
    for (key, value) in defaults.entries() {
        let Some(value) = value else { continue };
        let missing = merged.get(key).is_none_or(Value::is_null);
        if missing {
            merged.insert(key.to_string(), Value::String(value.clone()));
        }
    }
    merged
}
