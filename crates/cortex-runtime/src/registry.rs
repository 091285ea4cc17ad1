//! [`ComponentRegistry`] – explicit map from component type names to
//! constructors.
//!
//! Every spec in a mode (`agent_inputs`, `cortex_llm`, `agent_actions`,
//! `simulators`, `backgrounds`, lifecycle hooks) names a registered type.
//! Constructors receive the component's inline config with global defaults
//! merged in (see [`cortex_config::merge_component_defaults`]) and the
//! [`ModeContext`] of the activation.
//!
//! # Built-ins
//!
//! | Kind | Name |
//! |---|---|
//! | sensor | `static_text` |
//! | LLM | `openai_compatible` |
//! | connector | `log` |
//! | simulator | `log` |
//! | background | `heartbeat` |
//! | hook | `message` |
//!
//! Applications add their own with the `register_*` methods at startup.

use std::collections::HashMap;
use std::sync::Arc;

use cortex_config::{ActionSpec, ComponentSpec, HookSpec};
use cortex_orchestrator::{Background, Connector};
use cortex_types::CortexError;
use serde_json::{Map, Value};

use crate::builtins::{Heartbeat, LogConnector, LogSimulator};
use crate::context::ModeContext;
use crate::hooks::{LifecycleHook, MessageHook};
use crate::llm::{Llm, LlmDriver};
use crate::sensor::{Sensor, StaticTextSensor};

/// Constructor of one component kind.
pub type Factory<T> =
    Arc<dyn Fn(&Map<String, Value>, &ModeContext) -> Result<T, CortexError> + Send + Sync>;

#[derive(Default, Clone)]
pub struct ComponentRegistry {
    sensors: HashMap<String, Factory<Arc<dyn Sensor>>>,
    llms: HashMap<String, Factory<Arc<dyn Llm>>>,
    connectors: HashMap<String, Factory<Arc<dyn Connector>>>,
    simulators: HashMap<String, Factory<Arc<dyn Connector>>>,
    backgrounds: HashMap<String, Factory<Arc<dyn Background>>>,
    hooks: HashMap<String, Factory<Arc<dyn LifecycleHook>>>,
}

impl ComponentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in components.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register_sensor("static_text", |config, _| {
            Ok(Arc::new(StaticTextSensor::from_config(config)))
        });
        registry.register_llm("openai_compatible", |config, _| {
            Ok(Arc::new(LlmDriver::from_config(config)))
        });
        registry.register_connector("log", |config, _| {
            Ok(Arc::new(LogConnector::from_config(config)))
        });
        registry.register_simulator("log", |config, _| {
            Ok(Arc::new(LogSimulator::from_config(config)))
        });
        registry.register_background("heartbeat", |config, ctx| {
            Ok(Arc::new(Heartbeat::from_config(config, ctx.context.clone())))
        });
        registry.register_hook("message", |config, _| {
            Ok(Arc::new(MessageHook::from_config(config)))
        });
        registry
    }

    // ─────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────

    pub fn register_sensor<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Map<String, Value>, &ModeContext) -> Result<Arc<dyn Sensor>, CortexError>
            + Send
            + Sync
            + 'static,
    {
        self.sensors.insert(name.into(), Arc::new(factory));
    }

    pub fn register_llm<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Map<String, Value>, &ModeContext) -> Result<Arc<dyn Llm>, CortexError>
            + Send
            + Sync
            + 'static,
    {
        self.llms.insert(name.into(), Arc::new(factory));
    }

    pub fn register_connector<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Map<String, Value>, &ModeContext) -> Result<Arc<dyn Connector>, CortexError>
            + Send
            + Sync
            + 'static,
    {
        self.connectors.insert(name.into(), Arc::new(factory));
    }

    pub fn register_simulator<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Map<String, Value>, &ModeContext) -> Result<Arc<dyn Connector>, CortexError>
            + Send
            + Sync
            + 'static,
    {
        self.simulators.insert(name.into(), Arc::new(factory));
    }

    pub fn register_background<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Map<String, Value>, &ModeContext) -> Result<Arc<dyn Background>, CortexError>
            + Send
            + Sync
            + 'static,
    {
        self.backgrounds.insert(name.into(), Arc::new(factory));
    }

    pub fn register_hook<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Map<String, Value>, &ModeContext) -> Result<Arc<dyn LifecycleHook>, CortexError>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.insert(name.into(), Arc::new(factory));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Resolution
    // ─────────────────────────────────────────────────────────────────────

    pub fn sensor(
        &self,
        spec: &ComponentSpec,
        ctx: &ModeContext,
    ) -> Result<Arc<dyn Sensor>, CortexError> {
        build(&self.sensors, "sensor", &spec.kind, &spec.config, ctx)
    }

    pub fn llm(&self, spec: &ComponentSpec, ctx: &ModeContext) -> Result<Arc<dyn Llm>, CortexError> {
        build(&self.llms, "LLM", &spec.kind, &spec.config, ctx)
    }

    /// The connector carrying out one agent action.
    pub fn connector(
        &self,
        spec: &ActionSpec,
        ctx: &ModeContext,
    ) -> Result<Arc<dyn Connector>, CortexError> {
        build(&self.connectors, "connector", &spec.connector, &spec.config, ctx)
    }

    pub fn simulator(
        &self,
        spec: &ComponentSpec,
        ctx: &ModeContext,
    ) -> Result<Arc<dyn Connector>, CortexError> {
        build(&self.simulators, "simulator", &spec.kind, &spec.config, ctx)
    }

    pub fn background(
        &self,
        spec: &ComponentSpec,
        ctx: &ModeContext,
    ) -> Result<Arc<dyn Background>, CortexError> {
        build(&self.backgrounds, "background", &spec.kind, &spec.config, ctx)
    }

    pub fn hook(
        &self,
        spec: &HookSpec,
        ctx: &ModeContext,
    ) -> Result<Arc<dyn LifecycleHook>, CortexError> {
        build(&self.hooks, "hook", &spec.handler_type, &spec.handler_config, ctx)
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn names<T>(map: &HashMap<String, T>) -> Vec<&str> {
            let mut names: Vec<&str> = map.keys().map(String::as_str).collect();
            names.sort_unstable();
            names
        }
        f.debug_struct("ComponentRegistry")
            .field("sensors", &names(&self.sensors))
            .field("llms", &names(&self.llms))
            .field("connectors", &names(&self.connectors))
            .field("simulators", &names(&self.simulators))
            .field("backgrounds", &names(&self.backgrounds))
            .field("hooks", &names(&self.hooks))
            .finish()
    }
}

fn build<T>(
    factories: &HashMap<String, Factory<T>>,
    kind: &str,
    name: &str,
    config: &Map<String, Value>,
    ctx: &ModeContext,
) -> Result<T, CortexError> {
    let factory = factories.get(name).ok_or_else(|| {
        CortexError::component_load(&ctx.mode, format!("unknown {kind} type '{name}'"))
    })?;
    factory(&ctx.merged(config), ctx).map_err(|e| match e {
        CortexError::ComponentLoad { .. } => e,
        other => CortexError::component_load(&ctx.mode, format!("{kind} '{name}': {other}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_config::{SystemConfig, from_value};
    use cortex_history::InputBuffer;
    use cortex_transition::ContextStore;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::events::EventBus;

    fn ctx() -> ModeContext {
        let system: SystemConfig = from_value(json!({
            "default_mode": "calm",
            "robot_ip": "10.0.0.7",
            "modes": {"calm": {"system_prompt_base": "p"}}
        }))
        .unwrap();
        ModeContext::new(
            Arc::new(system),
            "calm",
            InputBuffer::new(),
            ContextStore::new(),
            EventBus::default(),
            &CancellationToken::new(),
        )
    }

    fn component(kind: &str, config: Value) -> ComponentSpec {
        ComponentSpec {
            kind: kind.into(),
            config: config.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn builtins_resolve() {
        let registry = ComponentRegistry::builtin();
        let ctx = ctx();
        let sensor = registry
            .sensor(&component("static_text", json!({"name": "door"})), &ctx)
            .unwrap();
        assert_eq!(sensor.name(), "door");
        assert!(registry.llm(&component("openai_compatible", json!({})), &ctx).is_ok());
        assert!(registry.simulator(&component("log", json!({})), &ctx).is_ok());
        assert!(registry.background(&component("heartbeat", json!({})), &ctx).is_ok());
    }

    #[test]
    fn unknown_type_is_a_component_load_error() {
        let registry = ComponentRegistry::builtin();
        let err = registry
            .sensor(&component("lidar", json!({})), &ctx())
            .err()
            .unwrap();
        assert!(matches!(err, CortexError::ComponentLoad { ref mode, .. } if mode == "calm"));
        assert!(err.to_string().contains("unknown sensor type 'lidar'"));
    }

    #[test]
    fn factories_receive_merged_config() {
        let mut registry = ComponentRegistry::new();
        registry.register_connector("probe", |config, _| {
            let ip = config.get("robot_ip").and_then(Value::as_str).unwrap_or("");
            let mode = config.get("mode").and_then(Value::as_str).unwrap_or("");
            Ok(Arc::new(LogConnector::new(format!("{ip}/{mode}"))))
        });
        let action = ActionSpec {
            name: "speak".into(),
            llm_label: None,
            connector: "probe".into(),
            config: Map::new(),
            timeout_seconds: None,
        };
        let connector = registry.connector(&action, &ctx()).unwrap();
        assert_eq!(connector.name(), "10.0.0.7/calm");
    }

    #[test]
    fn factory_errors_are_wrapped() {
        let mut registry = ComponentRegistry::new();
        registry.register_background("broken", |_, _| {
            Err(CortexError::Inference("no device".into()))
        });
        let err = registry
            .background(&component("broken", json!({})), &ctx())
            .err()
            .unwrap();
        assert!(matches!(err, CortexError::ComponentLoad { .. }));
        assert!(err.to_string().contains("no device"));
    }

    #[test]
    fn debug_lists_registered_names() {
        let debug = format!("{:?}", ComponentRegistry::builtin());
        assert!(debug.contains("static_text"));
        assert!(debug.contains("openai_compatible"));
        assert!(debug.contains("message"));
    }
}
