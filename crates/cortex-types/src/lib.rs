use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single command produced by the LLM, e.g. `{"type": "speak", "value": "hello"}`.
///
/// The `type` is the routing key used by the orchestrators to find a
/// connector; the `value` is an opaque payload interpreted by that connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: String,
}

impl Action {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// Structured response the LLM is asked to produce each tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CortexOutput {
    pub actions: Vec<Action>,
}

/// The role of a participant in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single role-tagged message in the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Reasons a configuration document is rejected.  A config that produces any
/// of these is never partially applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cannot read configuration '{path}': {reason}")]
    Io { path: String, reason: String },

    #[error("cannot parse configuration: {0}")]
    Parse(String),

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("{context} references unknown mode '{mode}'")]
    UnknownMode { context: String, mode: String },

    #[error("default mode '{0}' is not defined in modes")]
    DefaultModeMissing(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure of a single connector call.  Isolated to the command that caused
/// it unless `fatal` is set, which halts a sequential dispatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("connector '{connector}' failed on '{action}': {reason}")]
pub struct DispatchError {
    pub connector: String,
    pub action: String,
    pub reason: String,
    pub fatal: bool,
}

impl DispatchError {
    pub fn new(
        connector: impl Into<String>,
        action: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            connector: connector.into(),
            action: action.into(),
            reason: reason.into(),
            fatal: false,
        }
    }

    /// Mark this error as policy-fatal.
    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

/// Global error type spanning configuration, activation, dispatch and
/// inference failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CortexError {
    #[error("Configuration Error: {0}")]
    Config(#[from] ConfigError),

    #[error("Component Load Error in mode '{mode}': {reason}")]
    ComponentLoad { mode: String, reason: String },

    #[error("Lifecycle Hook '{hook}' failed: {reason}")]
    Hook { hook: String, reason: String },

    #[error("Dispatch Error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Inference Failure: {0}")]
    Inference(String),

    #[error("Reload Error: {0}")]
    Reload(String),

    #[error("Dependency cycle among actions: {0:?}")]
    Cycle(Vec<String>),

    #[error("Transition rejected: {0}")]
    Transition(String),
}

impl CortexError {
    pub fn component_load(mode: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ComponentLoad {
            mode: mode.into(),
            reason: reason.into(),
        }
    }
}
