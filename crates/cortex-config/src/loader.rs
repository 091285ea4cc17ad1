//! Configuration loading: resolve → read → substitute → convert → parse →
//! validate.
//!
//! Every step returns a [`ConfigError`]; nothing is applied until the whole
//! document validated.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use cortex_types::ConfigError;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::converter::{convert_to_multi_mode, is_single_mode};
use crate::schema::{ANY_MODE, SystemConfig};

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "CORTEX_CONFIG_DIR";
/// Default configuration directory, relative to the working directory.
pub const DEFAULT_CONFIG_DIR: &str = "config";

// ─────────────────────────────────────────────────────────────────────────────
// Entry points
// ─────────────────────────────────────────────────────────────────────────────

/// Return the configuration directory (`$CORTEX_CONFIG_DIR` or `./config`).
pub fn config_dir() -> PathBuf {
    std::env::var(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR))
}

/// Resolve a config name to `<dir>/<name>.json`, falling back to
/// `<dir>/<name>.toml`.
pub fn resolve_in(dir: &Path, name: &str) -> Result<PathBuf, ConfigError> {
    for ext in ["json", "toml"] {
        let candidate = dir.join(format!("{name}.{ext}"));
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(ConfigError::Io {
        path: dir.join(format!("{name}.json")).display().to_string(),
        reason: "no .json or .toml configuration with that name".to_string(),
    })
}

/// Load the configuration called `name` from [`config_dir`].
pub fn load(name: &str) -> Result<SystemConfig, ConfigError> {
    let path = resolve_in(&config_dir(), name)?;
    load_from_path(&path)
}

/// Load and validate a configuration file.
pub fn load_from_path(path: &Path) -> Result<SystemConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let doc = parse_document(&raw, DocumentFormat::from_path(path))?;
    let config = from_value(doc)?;
    info!(
        path = %path.display(),
        name = %config.name,
        modes = config.modes.len(),
        rules = config.transition_rules.len(),
        "configuration loaded"
    );
    Ok(config)
}

// ─────────────────────────────────────────────────────────────────────────────
// Document parsing
// ─────────────────────────────────────────────────────────────────────────────

/// On-disk syntax of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Toml,
}

impl DocumentFormat {
    /// `.toml` files are TOML; everything else is read as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => DocumentFormat::Toml,
            _ => DocumentFormat::Json,
        }
    }
}

/// Parse raw text into an untyped document.
pub fn parse_document(raw: &str, format: DocumentFormat) -> Result<Value, ConfigError> {
    match format {
        DocumentFormat::Json => {
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        DocumentFormat::Toml => {
            toml::from_str::<Value>(raw).map_err(|e| ConfigError::Parse(e.to_string()))
        }
    }
}

/// Build a validated [`SystemConfig`] from an untyped document using the
/// process environment for placeholders and credential fallbacks.
pub fn from_value(doc: Value) -> Result<SystemConfig, ConfigError> {
    from_value_with(doc, &|key| std::env::var(key).ok())
}

/// Same as [`from_value`] with an explicit environment lookup.
/// Extracted for testability without mutating environment variables.
pub fn from_value_with(
    doc: Value,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<SystemConfig, ConfigError> {
    let doc = substitute_env_vars(doc, env);
    let doc = if is_single_mode(&doc) {
        debug!("converting single-mode configuration");
        convert_to_multi_mode(doc)?
    } else {
        doc
    };

    check_required_fields(&doc)?;

    let mut config: SystemConfig =
        serde_json::from_value(doc).map_err(|e| ConfigError::Parse(e.to_string()))?;

    for (key, mode) in config.modes.iter_mut() {
        mode.name = key.clone();
        if mode.display_name.is_empty() {
            mode.display_name = key.clone();
        }
    }

    apply_credential_fallbacks(&mut config, env);
    validate(&config)?;
    Ok(config)
}

/// Report required fields by name before typed parsing, so callers get a
/// [`ConfigError::MissingField`] instead of a generic parse message.
fn check_required_fields(doc: &Value) -> Result<(), ConfigError> {
    let root = doc
        .as_object()
        .ok_or_else(|| ConfigError::Parse("configuration root must be a table".to_string()))?;
    if !root.contains_key("default_mode") {
        return Err(ConfigError::MissingField("default_mode".to_string()));
    }
    if let Some(modes) = root.get("modes").and_then(Value::as_object) {
        for (name, mode) in modes {
            if mode.get("system_prompt_base").is_none() {
                return Err(ConfigError::MissingField(format!(
                    "modes.{name}.system_prompt_base"
                )));
            }
        }
    }
    if let Some(rules) = root.get("transition_rules").and_then(Value::as_array) {
        for (index, rule) in rules.iter().enumerate() {
            for field in ["from_mode", "to_mode", "transition_type"] {
                if rule.get(field).is_none() {
                    return Err(ConfigError::MissingField(format!(
                        "transition_rules[{index}].{field}"
                    )));
                }
            }
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment handling
// ─────────────────────────────────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` placeholders in every string value.
///
/// Unresolved placeholders without a default are left untouched.
pub fn substitute_env_vars(value: Value, env: &dyn Fn(&str) -> Option<String>) -> Value {
    match value {
        Value::String(s) => Value::String(substitute_str(&s, env)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| substitute_env_vars(v, env))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, substitute_env_vars(v, env)))
                .collect(),
        ),
        other => other,
    }
}

fn substitute_str(s: &str, env: &dyn Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let expr = &after[..end];
        let (var, default) = match expr.split_once(":-") {
            Some((var, default)) => (var, Some(default)),
            None => (expr, None),
        };
        match (env(var), default) {
            (Some(v), _) => out.push_str(&v),
            (None, Some(d)) => out.push_str(d),
            (None, None) => {
                warn!(var, "environment variable not set; leaving placeholder");
                out.push_str(&rest[start..start + 2 + end + 1]);
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

/// Fill empty credentials from the environment.
///
/// | Variable | Field | Applied when |
/// |---|---|---|
/// | `CORTEX_API_KEY` | `api_key` | missing or empty |
/// | `ROBOT_IP` | `robot_ip` | missing or empty |
/// | `DEVICE_ID` | `device_id` | missing, empty or `"default"` |
pub fn apply_credential_fallbacks(config: &mut SystemConfig, env: &dyn Fn(&str) -> Option<String>) {
    let creds = &mut config.credentials;
    if creds.api_key.as_deref().is_none_or(str::is_empty)
        && let Some(v) = env("CORTEX_API_KEY")
    {
        creds.api_key = Some(v);
    }
    if creds.robot_ip.as_deref().is_none_or(str::is_empty)
        && let Some(v) = env("ROBOT_IP")
    {
        creds.robot_ip = Some(v);
    }
    if creds
        .device_id
        .as_deref()
        .is_none_or(|id| id.is_empty() || id == "default")
        && let Some(v) = env("DEVICE_ID")
    {
        creds.device_id = Some(v);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Check the cross-field invariants of a parsed configuration.
pub fn validate(config: &SystemConfig) -> Result<(), ConfigError> {
    if !is_valid_version(&config.version) {
        return Err(ConfigError::Invalid(format!(
            "version '{}' is not of the form MAJOR[.MINOR[.PATCH]]",
            config.version
        )));
    }
    if !config.modes.contains_key(&config.default_mode) {
        return Err(ConfigError::DefaultModeMissing(config.default_mode.clone()));
    }

    for (name, mode) in &config.modes {
        if !(mode.hertz.is_finite() && mode.hertz > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "mode '{name}' has non-positive hertz {}",
                mode.hertz
            )));
        }
        if let Some(cycle) = find_dependency_cycle(&mode.action_dependencies) {
            return Err(ConfigError::Invalid(format!(
                "mode '{name}' has cyclic action_dependencies: {}",
                cycle.join(" -> ")
            )));
        }
    }

    for (index, rule) in config.transition_rules.iter().enumerate() {
        let context = format!("transition_rules[{index}]");
        if rule.to_mode == ANY_MODE {
            return Err(ConfigError::Invalid(format!(
                "{context}: to_mode cannot be '{ANY_MODE}'"
            )));
        }
        if rule.from_mode != ANY_MODE && !config.modes.contains_key(&rule.from_mode) {
            return Err(ConfigError::UnknownMode {
                context: format!("{context}.from_mode"),
                mode: rule.from_mode.clone(),
            });
        }
        if !config.modes.contains_key(&rule.to_mode) {
            return Err(ConfigError::UnknownMode {
                context: format!("{context}.to_mode"),
                mode: rule.to_mode.clone(),
            });
        }
        if !(rule.cooldown_seconds.is_finite() && rule.cooldown_seconds >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "{context}: cooldown_seconds must be >= 0"
            )));
        }
    }
    Ok(())
}

fn is_valid_version(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() <= 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

/// Return one dependency cycle, listed in traversal order with the repeated
/// node at both ends, or `None` for an acyclic graph.
pub fn find_dependency_cycle(deps: &BTreeMap<String, Vec<String>>) -> Option<Vec<String>> {
    fn visit<'a>(
        node: &'a str,
        deps: &'a BTreeMap<String, Vec<String>>,
        done: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = path.iter().position(|n| *n == node) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if done.contains(node) {
            return None;
        }
        path.push(node);
        for next in deps.get(node).into_iter().flatten() {
            if let Some(cycle) = visit(next, deps, done, path) {
                return Some(cycle);
            }
        }
        path.pop();
        done.insert(node);
        None
    }

    let mut done = HashSet::new();
    for start in deps.keys() {
        let mut path = Vec::new();
        if let Some(cycle) = visit(start, deps, &mut done, &mut path) {
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ExecutionPolicy, TransitionType};
    use serde_json::json;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn two_modes() -> Value {
        json!({
            "version": "1.0.0",
            "name": "guard",
            "default_mode": "calm",
            "modes": {
                "calm": {"system_prompt_base": "Stay calm.", "hertz": 1.0},
                "alert": {"system_prompt_base": "Be alert.", "hertz": 4.0, "timeout_seconds": 30.0}
            },
            "transition_rules": [
                {"from_mode": "calm", "to_mode": "alert", "transition_type": "input_triggered",
                 "trigger_keywords": ["intruder"], "priority": 5, "cooldown_seconds": 60.0},
                {"from_mode": "*", "to_mode": "calm", "transition_type": "time_based"}
            ]
        })
    }

    #[test]
    fn loads_multi_mode_document() {
        let cfg = from_value_with(two_modes(), &no_env).unwrap();
        assert_eq!(cfg.default_mode, "calm");
        assert_eq!(cfg.modes.len(), 2);
        assert_eq!(cfg.modes["alert"].name, "alert");
        assert_eq!(cfg.modes["alert"].display_name, "alert");
        assert_eq!(cfg.transition_rules[0].transition_type, TransitionType::InputTriggered);
        assert_eq!(cfg.transition_rules[1].priority, 1);
        assert!(cfg.allow_manual_switching);
    }

    #[test]
    fn loaded_rules_reference_known_modes() {
        let cfg = from_value_with(two_modes(), &no_env).unwrap();
        assert!(cfg.modes.contains_key(&cfg.default_mode));
        for rule in &cfg.transition_rules {
            assert!(rule.from_mode == ANY_MODE || cfg.modes.contains_key(&rule.from_mode));
            assert!(cfg.modes.contains_key(&rule.to_mode));
        }
    }

    #[test]
    fn missing_default_mode_is_reported() {
        let mut doc = two_modes();
        doc.as_object_mut().unwrap().remove("default_mode");
        assert_eq!(
            from_value_with(doc, &no_env),
            Err(ConfigError::MissingField("default_mode".into()))
        );
    }

    #[test]
    fn missing_prompt_is_reported() {
        let mut doc = two_modes();
        doc["modes"]["calm"].as_object_mut().unwrap().remove("system_prompt_base");
        assert!(matches!(
            from_value_with(doc, &no_env),
            Err(ConfigError::MissingField(f)) if f.contains("system_prompt_base")
        ));
    }

    #[test]
    fn missing_rule_field_is_reported() {
        let mut doc = two_modes();
        doc["transition_rules"][0].as_object_mut().unwrap().remove("to_mode");
        assert!(matches!(
            from_value_with(doc, &no_env),
            Err(ConfigError::MissingField(f)) if f == "transition_rules[0].to_mode"
        ));
    }

    #[test]
    fn unknown_mode_in_rule_is_rejected() {
        let mut doc = two_modes();
        doc["transition_rules"][0]["to_mode"] = json!("panic");
        assert!(matches!(
            from_value_with(doc, &no_env),
            Err(ConfigError::UnknownMode { mode, .. }) if mode == "panic"
        ));
    }

    #[test]
    fn wildcard_target_is_rejected() {
        let mut doc = two_modes();
        doc["transition_rules"][0]["to_mode"] = json!("*");
        assert!(matches!(from_value_with(doc, &no_env), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn absent_default_mode_is_rejected() {
        let mut doc = two_modes();
        doc["default_mode"] = json!("sleep");
        assert_eq!(
            from_value_with(doc, &no_env),
            Err(ConfigError::DefaultModeMissing("sleep".into()))
        );
    }

    #[test]
    fn non_positive_hertz_is_rejected() {
        let mut doc = two_modes();
        doc["modes"]["calm"]["hertz"] = json!(0.0);
        assert!(matches!(from_value_with(doc, &no_env), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_version_is_rejected() {
        let mut doc = two_modes();
        doc["version"] = json!("invalid_version");
        assert!(matches!(from_value_with(doc, &no_env), Err(ConfigError::Invalid(_))));
        assert!(is_valid_version("2"));
        assert!(is_valid_version("1.0.3"));
        assert!(!is_valid_version("1..0"));
    }

    #[test]
    fn unknown_transition_type_is_rejected() {
        let mut doc = two_modes();
        doc["transition_rules"][0]["transition_type"] = json!("telepathic");
        assert!(matches!(from_value_with(doc, &no_env), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn cyclic_dependencies_are_rejected() {
        let mut doc = two_modes();
        doc["modes"]["calm"]["action_execution_mode"] = json!("dependencies");
        doc["modes"]["calm"]["action_dependencies"] =
            json!({"a": ["b"], "b": ["c"], "c": ["a"]});
        let err = from_value_with(doc, &no_env).unwrap_err();
        assert!(err.to_string().contains("cyclic"));
    }

    #[test]
    fn finds_cycle_path() {
        let deps: BTreeMap<String, Vec<String>> = [
            ("a".to_string(), vec!["b".to_string()]),
            ("b".to_string(), vec!["a".to_string()]),
        ]
        .into_iter()
        .collect();
        assert_eq!(find_dependency_cycle(&deps).unwrap(), vec!["a", "b", "a"]);

        let dag: BTreeMap<String, Vec<String>> = [
            ("speak".to_string(), vec!["move".to_string(), "look".to_string()]),
            ("move".to_string(), vec!["look".to_string()]),
        ]
        .into_iter()
        .collect();
        assert!(find_dependency_cycle(&dag).is_none());
    }

    #[test]
    fn legacy_document_is_converted_and_validated() {
        let doc = json!({
            "name": "patrol",
            "system_prompt_base": "You patrol.",
            "hertz": 2.0,
            "action_execution_mode": "sequential"
        });
        let cfg = from_value_with(doc, &no_env).unwrap();
        assert_eq!(cfg.default_mode, "patrol");
        assert!(!cfg.allow_manual_switching);
        assert!(!cfg.mode_memory_enabled);
        assert!(cfg.transition_rules.is_empty());
        let mode = &cfg.modes["patrol"];
        assert_eq!(mode.hertz, 2.0);
        assert_eq!(mode.action_execution_mode, ExecutionPolicy::Sequential);
    }

    #[test]
    fn legacy_document_with_bad_hertz_fails_the_same_way() {
        let doc = json!({"name": "patrol", "system_prompt_base": "x", "hertz": -1.0});
        assert!(matches!(from_value_with(doc, &no_env), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn substitutes_placeholders() {
        let env = |k: &str| (k == "HOST").then(|| "robot.local".to_string());
        let value = substitute_env_vars(
            json!({"url": "http://${HOST}:${PORT:-8000}/x", "list": ["${MISSING}"]}),
            &env,
        );
        assert_eq!(value["url"], "http://robot.local:8000/x");
        assert_eq!(value["list"][0], "${MISSING}");
    }

    #[test]
    fn unterminated_placeholder_is_kept() {
        assert_eq!(substitute_str("abc ${OPEN", &no_env), "abc ${OPEN");
    }

    #[test]
    fn credential_fallbacks_fill_only_empty_values() {
        let env = |k: &str| match k {
            "CORTEX_API_KEY" => Some("env-key".to_string()),
            "ROBOT_IP" => Some("10.1.1.1".to_string()),
            "DEVICE_ID" => Some("unit-7".to_string()),
            _ => None,
        };
        let mut doc = two_modes();
        doc["api_key"] = json!("");
        doc["robot_ip"] = json!("192.168.0.5");
        doc["device_id"] = json!("default");
        let cfg = from_value_with(doc, &env).unwrap();
        assert_eq!(cfg.credentials.api_key.as_deref(), Some("env-key"));
        assert_eq!(cfg.credentials.robot_ip.as_deref(), Some("192.168.0.5"));
        assert_eq!(cfg.credentials.device_id.as_deref(), Some("unit-7"));
    }

    #[test]
    fn serialized_config_reloads_equal() {
        let cfg = from_value_with(two_modes(), &no_env).unwrap();
        let again = from_value_with(cfg.to_value(), &no_env).unwrap();
        assert_eq!(cfg, again);
    }

    #[test]
    fn load_from_path_reads_json_and_toml() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let json_path = dir.path().join("guard.json");
        fs::write(&json_path, two_modes().to_string()).unwrap();
        assert_eq!(load_from_path(&json_path).unwrap().name, "guard");

        let toml_path = dir.path().join("legacy.toml");
        fs::write(
            &toml_path,
            "name = \"legacy\"\nsystem_prompt_base = \"Hello\"\nhertz = 0.5\n",
        )
        .unwrap();
        let cfg = load_from_path(&toml_path).unwrap();
        assert_eq!(cfg.default_mode, "legacy");
        assert_eq!(cfg.modes["legacy"].hertz, 0.5);
    }

    #[test]
    fn resolve_prefers_json_then_toml() {
        let dir = tempfile::tempdir().expect("tmp dir");
        fs::write(dir.path().join("a.toml"), "").unwrap();
        assert!(resolve_in(dir.path(), "a").unwrap().ends_with("a.toml"));
        fs::write(dir.path().join("a.json"), "{}").unwrap();
        assert!(resolve_in(dir.path(), "a").unwrap().ends_with("a.json"));
        assert!(matches!(resolve_in(dir.path(), "b"), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn unreadable_and_malformed_files_fail() {
        let dir = tempfile::tempdir().expect("tmp dir");
        assert!(matches!(
            load_from_path(&dir.path().join("nope.json")),
            Err(ConfigError::Io { .. })
        ));
        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(load_from_path(&bad), Err(ConfigError::Parse(_))));
    }
}
