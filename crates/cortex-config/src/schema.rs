//! Strongly-typed configuration schema.
//!
//! A [`SystemConfig`] is produced once per load by
//! [`crate::loader::from_value`] and shared immutably afterwards.  Component
//! specs stay *unresolved* here; live instances are only created when a mode
//! is activated by the runtime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wildcard accepted in [`TransitionRule::from_mode`].
pub const ANY_MODE: &str = "*";

// ─────────────────────────────────────────────────────────────────────────────
// System-level configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Process-wide configuration of a mode-aware agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_system_name")]
    pub name: String,
    pub default_mode: String,
    #[serde(default = "default_true")]
    pub allow_manual_switching: bool,
    #[serde(default = "default_true")]
    pub mode_memory_enabled: bool,

    #[serde(flatten)]
    pub credentials: Credentials,

    #[serde(default)]
    pub system_governance: String,
    #[serde(default)]
    pub system_prompt_examples: String,

    /// Default LLM used by modes that do not declare their own.
    #[serde(default, rename = "cortex_llm", skip_serializing_if = "Option::is_none")]
    pub default_llm: Option<ComponentSpec>,

    #[serde(default)]
    pub global_lifecycle_hooks: Vec<HookSpec>,

    pub modes: BTreeMap<String, ModeConfig>,

    /// Kept in declaration order; the index of a rule is its identity.
    #[serde(default)]
    pub transition_rules: Vec<TransitionRule>,
}

impl SystemConfig {
    /// Look up a mode by name.
    pub fn mode(&self, name: &str) -> Option<&ModeConfig> {
        self.modes.get(name)
    }

    /// The LLM spec a mode resolves to: its own, else the global default.
    pub fn llm_for<'a>(&'a self, mode: &'a ModeConfig) -> Option<&'a ComponentSpec> {
        mode.cortex_llm.as_ref().or(self.default_llm.as_ref())
    }

    /// Serialize back to a multi-mode document that re-loads to an equal config.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Global credentials and device identifiers, merged into component configs
/// at activation time.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethernet_adapter: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field(
                "api_key",
                match self.api_key.as_deref() {
                    None | Some("") => &"<not set>",
                    Some(_) => &"<redacted>",
                },
            )
            .field("robot_ip", &self.robot_ip)
            .field("device_id", &self.device_id)
            .field("ethernet_adapter", &self.ethernet_adapter)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mode configuration
// ─────────────────────────────────────────────────────────────────────────────

/// How a mode's orchestrator runs the commands of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPolicy {
    #[default]
    Concurrent,
    Sequential,
    Dependencies,
}

impl std::fmt::Display for ExecutionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionPolicy::Concurrent => write!(f, "concurrent"),
            ExecutionPolicy::Sequential => write!(f, "sequential"),
            ExecutionPolicy::Dependencies => write!(f, "dependencies"),
        }
    }
}

/// A named operating configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeConfig {
    /// Filled from the key of the `modes` map during loading.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt_base: String,
    #[serde(default = "default_hertz")]
    pub hertz: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    #[serde(default)]
    pub remember_locations: bool,
    #[serde(default)]
    pub save_interactions: bool,

    #[serde(default)]
    pub lifecycle_hooks: Vec<HookSpec>,

    #[serde(default)]
    pub agent_inputs: Vec<ComponentSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cortex_llm: Option<ComponentSpec>,
    #[serde(default)]
    pub simulators: Vec<ComponentSpec>,
    #[serde(default)]
    pub agent_actions: Vec<ActionSpec>,
    #[serde(default)]
    pub backgrounds: Vec<ComponentSpec>,

    #[serde(default)]
    pub action_execution_mode: ExecutionPolicy,
    /// action name → prerequisite action names.
    #[serde(default)]
    pub action_dependencies: BTreeMap<String, Vec<String>>,
}

/// Raw spec of a sensor, simulator, background or LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// Raw spec of an agent action and the connector that carries it out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    /// Command type emitted by the LLM; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_label: Option<String>,
    pub connector: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
}

impl ActionSpec {
    /// The command type this action answers to.
    pub fn label(&self) -> &str {
        self.llm_label.as_deref().unwrap_or(&self.name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle hooks
// ─────────────────────────────────────────────────────────────────────────────

/// Point in the mode lifecycle at which a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookType {
    OnEntry,
    OnExit,
    OnStartup,
    OnShutdown,
    OnTimeout,
}

/// Raw spec of a lifecycle hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookSpec {
    pub hook_type: HookType,
    pub handler_type: String,
    #[serde(default)]
    pub handler_config: Map<String, Value>,
    #[serde(default = "default_hook_timeout")]
    pub timeout_seconds: f64,
    #[serde(default)]
    pub priority: i32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Transition rules
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    /// A trigger keyword appears in the tick's fused input.
    InputTriggered,
    /// The current mode has been active longer than a timeout.
    TimeBased,
    /// All context conditions hold.
    ContextAware,
    /// Only on explicit external request.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub from_mode: String,
    pub to_mode: String,
    pub transition_type: TransitionType,
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub cooldown_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    #[serde(default)]
    pub context_conditions: BTreeMap<String, Value>,
}

impl TransitionRule {
    /// `true` when the rule can leave `mode`.
    pub fn applies_from(&self, mode: &str) -> bool {
        self.from_mode == ANY_MODE || self.from_mode == mode
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

fn default_version() -> String {
    "1.0.0".to_string()
}
fn default_system_name() -> String {
    "mode_system".to_string()
}
fn default_true() -> bool {
    true
}
fn default_hertz() -> f64 {
    1.0
}
fn default_priority() -> i32 {
    1
}
fn default_hook_timeout() -> f64 {
    5.0
}
