//! [`ActiveMode`] – the live components of one activated mode.
//!
//! Activation resolves every spec of the mode through the
//! [`ComponentRegistry`]; any unresolvable component aborts the activation
//! with [`CortexError::ComponentLoad`] before anything is started.  A built
//! mode is started with [`ActiveMode::start`] and must be stopped with
//! [`ActiveMode::stop`] before it is dropped.

use std::sync::Arc;
use std::time::Duration;

use cortex_config::{HookType, ModeConfig, SystemConfig};
use cortex_history::{HistoryConfig, HistoryManager};
use cortex_orchestrator::{BackgroundOrchestrator, ConnectorRegistry, DispatchReport, Orchestrator};
use cortex_types::{Action, CortexError};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::context::ModeContext;
use crate::events::{CortexEvent, EventPayload};
use crate::fuser::Fuser;
use crate::hooks::{HookContext, HookReport, HookRunner};
use crate::llm::Llm;
use crate::pipeline::{InferencePipeline, Turn};
use crate::registry::ComponentRegistry;
use crate::sensor::BufferedSensor;

/// What one tick of a mode produced.
#[derive(Debug, Clone, Default)]
pub struct ModeTick {
    /// Sensor text of this tick, used for keyword transitions.
    pub inputs: String,
    /// `None` when inference failed.
    pub actions: Option<Vec<Action>>,
    pub dispatch: Option<DispatchReport>,
    pub simulation: Option<DispatchReport>,
    /// Inference or dispatch errors of this tick.
    pub errors: Vec<CortexError>,
}

pub struct ActiveMode {
    config: ModeConfig,
    ctx: ModeContext,
    sensors: Vec<BufferedSensor>,
    llm: Arc<dyn Llm>,
    actions: Orchestrator,
    simulators: Orchestrator,
    backgrounds: BackgroundOrchestrator,
    history: Arc<HistoryManager>,
    pipeline: InferencePipeline,
    hooks: HookRunner,
    fuser: Fuser,
    running: bool,
}

impl ActiveMode {
    /// Resolve every component of `ctx.mode`.
    ///
    /// # Errors
    ///
    /// [`CortexError::ComponentLoad`] when the mode is unknown, has no LLM or
    /// names an unregistered component type.
    pub fn build(ctx: ModeContext, registry: &ComponentRegistry) -> Result<Self, CortexError> {
        let system = Arc::clone(&ctx.system);
        let config = system
            .mode(&ctx.mode)
            .cloned()
            .ok_or_else(|| CortexError::component_load(&ctx.mode, "mode is not configured"))?;

        let sensors = config
            .agent_inputs
            .iter()
            .map(|spec| registry.sensor(spec, &ctx).map(BufferedSensor::new))
            .collect::<Result<Vec<_>, _>>()?;

        let llm_spec = system
            .llm_for(&config)
            .ok_or_else(|| CortexError::component_load(&ctx.mode, "no cortex_llm configured"))?;
        let llm = registry.llm(llm_spec, &ctx)?;

        let mut action_routes = ConnectorRegistry::new();
        for spec in &config.agent_actions {
            let connector = registry.connector(spec, &ctx)?;
            let timeout = spec
                .timeout_seconds
                .filter(|s| s.is_finite() && *s > 0.0)
                .map(Duration::from_secs_f64);
            action_routes.register(spec.label(), &spec.name, connector, timeout);
        }
        let mut simulator_routes = ConnectorRegistry::new();
        for spec in &config.simulators {
            simulator_routes.register_catch_all(registry.simulator(spec, &ctx)?);
        }
        let backgrounds = config
            .backgrounds
            .iter()
            .map(|spec| registry.background(spec, &ctx))
            .collect::<Result<Vec<_>, _>>()?;

        let mut hooks = HookRunner::new();
        for spec in system.global_lifecycle_hooks.iter().chain(&config.lifecycle_hooks) {
            hooks.add(spec.clone(), registry.hook(spec, &ctx)?);
        }

        let history = Arc::new(HistoryManager::new(
            history_config(&system, &llm_spec.config),
            llm.summarizer(),
        ));
        let pipeline = InferencePipeline::standard(ctx.events.clone(), Arc::clone(&history));

        Ok(Self {
            fuser: Fuser::new(&system, &config),
            actions: Orchestrator::new(
                "actions",
                action_routes,
                config.action_execution_mode,
                config.action_dependencies.clone(),
            ),
            simulators: Orchestrator::new(
                "simulators",
                simulator_routes,
                config.action_execution_mode,
                config.action_dependencies.clone(),
            ),
            backgrounds: BackgroundOrchestrator::new(backgrounds, &ctx.cancel),
            sensors,
            llm,
            history,
            pipeline,
            hooks,
            config,
            ctx,
            running: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.ctx.mode
    }

    pub fn config(&self) -> &ModeConfig {
        &self.config
    }

    pub fn context(&self) -> &ModeContext {
        &self.ctx
    }

    pub fn history(&self) -> &Arc<HistoryManager> {
        &self.history
    }

    /// Tick period derived from `hertz`.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.hertz)
    }

    /// Start sensor loops, connector keep-alives and backgrounds.
    pub async fn start(&mut self) {
        if self.running {
            return;
        }
        for sensor in &mut self.sensors {
            sensor.start(&self.ctx.cancel);
        }
        self.actions.start().await;
        self.simulators.start().await;
        self.backgrounds.start();
        self.running = true;
        info!(
            mode = %self.ctx.mode,
            sensors = self.sensors.len(),
            actions = self.config.agent_actions.len(),
            simulators = self.config.simulators.len(),
            backgrounds = self.backgrounds.len(),
            "mode activated"
        );
    }

    /// Cancel every task of the mode and release its components.
    pub async fn stop(&mut self) {
        self.ctx.cancel.cancel();
        for sensor in &mut self.sensors {
            sensor.stop().await;
        }
        self.backgrounds.stop().await;
        self.actions.stop().await;
        self.simulators.stop().await;
        self.history.abort_summary();
        if self.running {
            info!(mode = %self.ctx.mode, "mode deactivated");
        }
        self.running = false;
    }

    /// Run the hooks of `hook_type`.
    pub async fn run_hooks(
        &self,
        hook_type: HookType,
        from_mode: Option<&str>,
        to_mode: Option<&str>,
    ) -> HookReport {
        let ctx = HookContext {
            hook_type,
            mode: self.ctx.mode.clone(),
            from_mode: from_mode.map(str::to_string),
            to_mode: to_mode.map(str::to_string),
            context: self.ctx.context.clone(),
        };
        self.hooks.run(&ctx).await
    }

    /// One tick: drain sensors, fuse, infer, dispatch.
    pub async fn tick(&mut self, tick: u64) -> ModeTick {
        let inputs = &self.ctx.inputs;
        for sensor in &self.sensors {
            for text in sensor.latest_buffer() {
                inputs.add_input(sensor.name(), text);
            }
        }
        let records = inputs.current_tick_records();
        let fused = self.fuser.fuse(&records);
        debug!(mode = %self.ctx.mode, tick, records = records.len(), "inputs fused");

        let turn = Turn {
            mode: self.ctx.mode.clone(),
            tick,
            prompt: fused.prompt,
            records,
        };
        let history = self.history.context();
        let mut outcome = ModeTick {
            inputs: fused.inputs,
            ..ModeTick::default()
        };

        let actions = match self.pipeline.run(self.llm.as_ref(), &turn, &history).await {
            Ok(actions) => actions,
            Err(e) => {
                warn!(mode = %self.ctx.mode, tick, error = %e, "inference failed; dispatch skipped");
                outcome.errors.push(e);
                return outcome;
            }
        };

        let (dispatch, simulation) = tokio::join!(
            self.actions.dispatch(&actions),
            self.simulators.dispatch(&actions)
        );
        for result in [&dispatch, &simulation] {
            if let Err(e) = result {
                error!(mode = %self.ctx.mode, tick, error = %e, "dispatch aborted");
            }
        }
        let dispatch = dispatch.map_err(|e| outcome.errors.push(e)).ok();
        let simulation = simulation.map_err(|e| outcome.errors.push(e)).ok();
        for report in [&dispatch, &simulation].into_iter().flatten() {
            if let Some(fatal) = &report.aborted {
                outcome.errors.push(CortexError::Dispatch(fatal.clone()));
            }
        }

        if let Some(report) = &dispatch {
            self.ctx.events.publish(CortexEvent::new(
                &self.ctx.mode,
                EventPayload::ActionsDispatched {
                    tick,
                    succeeded: report.succeeded.clone(),
                    failed: report.failed.len(),
                },
            ));
        }
        outcome.actions = Some(actions);
        outcome.dispatch = dispatch;
        outcome.simulation = simulation;
        outcome
    }
}

impl Drop for ActiveMode {
    fn drop(&mut self) {
        self.ctx.cancel.cancel();
        self.history.abort_summary();
    }
}

/// History settings come from the LLM spec (`history_length`,
/// `agent_name`); the agent name defaults to the system name.
fn history_config(system: &SystemConfig, llm: &serde_json::Map<String, Value>) -> HistoryConfig {
    let mut config = HistoryConfig {
        agent_name: system.name.clone(),
        ..HistoryConfig::default()
    };
    if let Some(length) = llm
        .get("history_length")
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
    {
        config.history_length = length;
    }
    if let Some(name) = llm.get("agent_name").and_then(Value::as_str) {
        config.agent_name = name.to_string();
    }
    config
}
