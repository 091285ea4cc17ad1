//! Legacy single-mode ↔ multi-mode document conversion.
//!
//! Conversion operates on untyped [`serde_json::Value`] documents so that a
//! converted legacy file goes through exactly the same typed parsing and
//! validation as a native multi-mode file.

use cortex_types::ConfigError;
use serde_json::{Map, Value, json};

/// Name of the synthetic mode when a legacy document carries no `name`.
pub const DEFAULT_LEGACY_NAME: &str = "default";

/// Keys that live at the top level of a multi-mode document.
const GLOBAL_KEYS: &[&str] = &[
    "version",
    "api_key",
    "robot_ip",
    "device_id",
    "ethernet_adapter",
    "system_governance",
    "system_prompt_examples",
    "cortex_llm",
];

/// Keys that move under the synthetic mode.
const MODE_KEYS: &[&str] = &[
    "system_prompt_base",
    "hertz",
    "agent_inputs",
    "agent_actions",
    "simulators",
    "backgrounds",
    "cortex_llm",
    "action_execution_mode",
    "action_dependencies",
];

/// `true` when `doc` is a legacy single-mode document.
///
/// A document with a `modes` table is always treated as multi-mode, even if
/// `default_mode` is missing, so that the omission is reported instead of
/// silently converting the whole file into one mode.
pub fn is_single_mode(doc: &Value) -> bool {
    doc.get("modes").is_none()
}

/// Up-convert a legacy single-mode document.
///
/// Global fields are promoted, mode-scoped fields are nested under one mode
/// named after the config, switching and mode memory are disabled and no
/// transition rules are declared.
pub fn convert_to_multi_mode(doc: Value) -> Result<Value, ConfigError> {
    let Value::Object(legacy) = doc else {
        return Err(ConfigError::Parse(
            "configuration root must be a table".to_string(),
        ));
    };

    let name = legacy
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_LEGACY_NAME)
        .to_string();

    let mut mode = Map::new();
    mode.insert("display_name".into(), json!(name));
    mode.insert(
        "description".into(),
        json!(format!("Converted from single-mode config '{name}'")),
    );
    copy_keys(&legacy, &mut mode, MODE_KEYS);

    let mut out = Map::new();
    copy_keys(&legacy, &mut out, GLOBAL_KEYS);
    out.insert("name".into(), json!(&name));
    out.insert("default_mode".into(), json!(&name));
    out.insert("allow_manual_switching".into(), json!(false));
    out.insert("mode_memory_enabled".into(), json!(false));
    let mut modes = Map::new();
    modes.insert(name, Value::Object(mode));
    out.insert("modes".into(), Value::Object(modes));
    out.insert("transition_rules".into(), json!([]));

    Ok(Value::Object(out))
}

/// Turn a one-mode document back into legacy shape.
///
/// The mode's own `cortex_llm` wins over the global one.
pub fn to_single_mode(doc: &Value) -> Result<Value, ConfigError> {
    let modes = doc
        .get("modes")
        .and_then(Value::as_object)
        .ok_or_else(|| ConfigError::MissingField("modes".to_string()))?;
    if modes.len() != 1 {
        return Err(ConfigError::Invalid(format!(
            "only a configuration with exactly one mode can be converted to single-mode (found {})",
            modes.len()
        )));
    }
    let Some((mode_name, Value::Object(mode))) = modes.iter().next() else {
        return Err(ConfigError::Parse(
            "mode entry must be a table".to_string(),
        ));
    };

    let mut out = Map::new();
    if let Value::Object(root) = doc {
        copy_keys(root, &mut out, GLOBAL_KEYS);
    }
    out.insert("name".into(), json!(mode_name));
    copy_keys(mode, &mut out, MODE_KEYS);
    Ok(Value::Object(out))
}

fn copy_keys(from: &Map<String, Value>, to: &mut Map<String, Value>, keys: &[&str]) {
    for key in keys {
        if let Some(v) = from.get(*key)
            && !v.is_null()
        {
            to.insert((*key).to_string(), v.clone());
        }
    }
}
