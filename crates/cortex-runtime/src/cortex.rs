//! [`Cortex`] – the mode-aware tick loop.
//!
//! # Lifecycle
//!
//! `uninitialized → active → stopped`.  [`Cortex::initialize`] activates the
//! starting mode (the remembered one when mode memory is on, else
//! `default_mode`), runs `on_startup` and `on_entry` hooks and spawns the
//! transition handler.  [`Cortex::shutdown`] cancels every background task,
//! runs `on_shutdown` hooks and stops the active mode.
//!
//! # Ticks
//!
//! The active mode sits behind an async mutex held for the whole tick, so
//! ticks never overlap and a mode swap waits for the tick in progress.  A
//! tick never swaps modes itself: a rule that fires is queued to the
//! transition handler, which is the only writer of the mode state.
//!
//! # Swaps
//!
//! `on_timeout` hooks (time-based triggers only) → `on_exit` hooks → stop
//! source → activate target → `on_entry` hooks → commit.  If the target
//! cannot be activated the source mode is activated again.
//!
//! # Hot reload
//!
//! [`Cortex::watch_config`] polls a configuration file; a changed file is
//! validated in full and only then handed to the transition handler.  A
//! rejected file is logged and the running configuration stays live.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cortex_config::{DocumentFormat, HookType, SystemConfig, TransitionType, from_value, parse_document};
use cortex_history::InputBuffer;
use cortex_orchestrator::DispatchReport;
use cortex_transition::{ContextStore, ModeMemory, TransitionEngine, TransitionRequest};
use cortex_types::{Action, CortexError};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, instrument, warn};

use crate::context::ModeContext;
use crate::events::{CortexEvent, EventBus, EventPayload, EventSubscriber};
use crate::mode::ActiveMode;
use crate::registry::ComponentRegistry;

type Reply = oneshot::Sender<Result<(), CortexError>>;

/// Work for the transition handler.
#[derive(Debug)]
pub enum ModeCommand {
    Transition {
        request: TransitionRequest,
        done: Option<Reply>,
    },
    Reload {
        config: Arc<SystemConfig>,
        done: Option<Reply>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Uninitialized,
    Active,
    Stopped,
}

/// Outcome of one [`Cortex::tick`].
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick: u64,
    pub mode: String,
    /// `None` when inference failed.
    pub actions: Option<Vec<Action>>,
    pub dispatch: Option<DispatchReport>,
    pub simulation: Option<DispatchReport>,
    pub errors: Vec<CortexError>,
    /// Swap queued by this tick, if a rule fired.
    pub transition: Option<TransitionRequest>,
}

struct Shared {
    config: RwLock<Arc<SystemConfig>>,
    registry: ComponentRegistry,
    engine: TransitionEngine,
    context: ContextStore,
    events: EventBus,
    inputs: InputBuffer,
    active: tokio::sync::Mutex<Option<ActiveMode>>,
    memory: Option<ModeMemory>,
    cancel: CancellationToken,
}

pub struct Cortex {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<ModeCommand>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<ModeCommand>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    state: Mutex<RuntimeState>,
}

/// Assembles a [`Cortex`].
pub struct CortexBuilder {
    config: SystemConfig,
    registry: ComponentRegistry,
    memory: Option<ModeMemory>,
    events: EventBus,
}

impl CortexBuilder {
    pub fn registry(mut self, registry: ComponentRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Persist the current mode here when `mode_memory_enabled` is set.
    pub fn mode_memory(mut self, memory: ModeMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> Cortex {
        let config = Arc::new(self.config);
        let initial = self
            .memory
            .as_ref()
            .filter(|_| config.mode_memory_enabled)
            .and_then(|m| m.restore(config.modes.keys()))
            .unwrap_or_else(|| config.default_mode.clone());
        let engine = TransitionEngine::new(&config, &initial, Instant::now());
        let (commands, receiver) = mpsc::unbounded_channel();

        Cortex {
            shared: Arc::new(Shared {
                config: RwLock::new(config),
                registry: self.registry,
                engine,
                context: ContextStore::new(),
                events: self.events,
                inputs: InputBuffer::new(),
                active: tokio::sync::Mutex::new(None),
                memory: self.memory,
                cancel: CancellationToken::new(),
            }),
            commands,
            receiver: Mutex::new(Some(receiver)),
            tasks: Mutex::new(Vec::new()),
            state: Mutex::new(RuntimeState::Uninitialized),
        }
    }
}

impl Cortex {
    /// Start building with the built-in component registry.
    pub fn builder(config: SystemConfig) -> CortexBuilder {
        CortexBuilder {
            config,
            registry: ComponentRegistry::builtin(),
            memory: None,
            events: EventBus::default(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────

    pub fn state(&self) -> RuntimeState {
        *self.state.lock()
    }

    pub fn current_mode(&self) -> String {
        self.shared.engine.current_mode()
    }

    pub fn config(&self) -> Arc<SystemConfig> {
        Arc::clone(&self.shared.config.read())
    }

    pub fn engine(&self) -> &TransitionEngine {
        &self.shared.engine
    }

    /// Values read by context-aware transition rules.
    pub fn context(&self) -> &ContextStore {
        &self.shared.context
    }

    /// The tick-scoped input buffer shared by every mode.
    pub fn inputs(&self) -> &InputBuffer {
        &self.shared.inputs
    }

    pub fn subscribe(&self) -> EventSubscriber {
        self.shared.events.subscribe()
    }

    /// Tick period of the current mode.
    pub fn period(&self) -> Duration {
        let config = self.config();
        let hertz = config
            .mode(&self.current_mode())
            .map(|m| m.hertz)
            .filter(|h| h.is_finite() && *h > 0.0)
            .unwrap_or(1.0);
        Duration::from_secs_f64(1.0 / hertz)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Activate the starting mode and spawn the transition handler.
    ///
    /// # Errors
    ///
    /// [`CortexError::ComponentLoad`] when the starting mode cannot be
    /// activated; [`CortexError::Transition`] when called twice.
    pub async fn initialize(&self) -> Result<(), CortexError> {
        if self.state() != RuntimeState::Uninitialized {
            return Err(CortexError::Transition("cortex already initialized".into()));
        }
        let Some(receiver) = self.receiver.lock().take() else {
            return Err(CortexError::Transition("transition handler already started".into()));
        };
        let mode = self.current_mode();
        self.initialize_mode(&mode).await?;

        let shared = Arc::clone(&self.shared);
        self.tasks.lock().push(tokio::spawn(
            handle_commands(shared, receiver).instrument(info_span!("transition_handler")),
        ));
        *self.state.lock() = RuntimeState::Active;
        Ok(())
    }

    /// Activate `name` as the first mode of this run.
    async fn initialize_mode(&self, name: &str) -> Result<(), CortexError> {
        let config = self.config();
        let mut active = self.shared.active.lock().await;
        let mode = self.shared.activate(&config, name).await?;
        mode.run_hooks(HookType::OnStartup, None, Some(name)).await;
        mode.run_hooks(HookType::OnEntry, None, Some(name)).await;
        *active = Some(mode);
        self.shared.engine.commit(name, Instant::now());
        self.shared.remember(&config, name);
        info!(mode = %name, system = %config.name, "cortex initialized");
        Ok(())
    }

    /// Run one tick of the active mode.
    ///
    /// Inference and dispatch failures are reported in the [`TickReport`];
    /// the tick id advances either way.
    ///
    /// # Errors
    ///
    /// [`CortexError::ComponentLoad`] when no mode is active.
    #[instrument(skip_all, fields(tick = self.shared.inputs.tick()))]
    pub async fn tick(&self) -> Result<TickReport, CortexError> {
        let shared = &self.shared;
        let tick = shared.inputs.tick();
        let mut active = shared.active.lock().await;
        let Some(mode) = active.as_mut() else {
            shared.inputs.increment_tick();
            return Err(CortexError::component_load(
                shared.engine.current_mode(),
                "no active mode",
            ));
        };

        let name = mode.name().to_string();
        let outcome = mode.tick(tick).await;
        let transition = shared
            .engine
            .evaluate(&outcome.inputs, &shared.context, Instant::now());
        drop(active);

        if let Some(request) = &transition {
            info!(from = %request.from_mode, to = %request.to_mode, reason = %request.reason, "transition scheduled");
            let command = ModeCommand::Transition {
                request: request.clone(),
                done: None,
            };
            if self.commands.send(command).is_err() {
                warn!("transition handler is not running; switch dropped");
            }
        }
        shared.inputs.increment_tick();

        Ok(TickReport {
            tick,
            mode: name,
            actions: outcome.actions,
            dispatch: outcome.dispatch,
            simulation: outcome.simulation,
            errors: outcome.errors,
            transition,
        })
    }

    /// Tick at the current mode's `hertz` until `cancel` fires or the cortex
    /// shuts down.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            let started = Instant::now();
            if let Err(e) = self.tick().await {
                warn!(error = %e, "tick skipped");
            }
            let wait = self.period().saturating_sub(started.elapsed());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.shared.cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Stop background tasks, run `on_shutdown` hooks and stop the active
    /// mode.  Calling it again is a no-op.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if *state == RuntimeState::Stopped {
                return;
            }
            *state = RuntimeState::Stopped;
        }
        self.shared.cancel.cancel();
        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await
                && !e.is_cancelled()
            {
                warn!(error = %e, "background task panicked");
            }
        }
        let mut active = self.shared.active.lock().await;
        if let Some(mut mode) = active.take() {
            mode.run_hooks(HookType::OnShutdown, Some(mode.name()), None)
                .await;
            mode.stop().await;
        }
        info!("cortex stopped");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mode control
    // ─────────────────────────────────────────────────────────────────────

    /// Switch to `target` on operator request and wait for the swap.
    ///
    /// # Errors
    ///
    /// [`CortexError::Transition`] when manual switching is disabled, the
    /// target is unknown or current, a manual rule is cooling down, or the
    /// handler is not running; [`CortexError::ComponentLoad`] when the target
    /// cannot be activated.
    pub async fn request_transition(&self, target: &str) -> Result<(), CortexError> {
        let request = self
            .shared
            .engine
            .request_transition(target, Instant::now())?;
        self.send_and_wait(|done| ModeCommand::Transition {
            request,
            done: Some(done),
        })
        .await
    }

    /// Validate `config` and swap it in.
    ///
    /// # Errors
    ///
    /// [`CortexError::Reload`] when validation or re-activation fails; the
    /// previous configuration keeps running.
    pub async fn reload(&self, config: SystemConfig) -> Result<(), CortexError> {
        cortex_config::validate(&config).map_err(|e| CortexError::Reload(e.to_string()))?;
        let config = Arc::new(config);
        self.send_and_wait(|done| ModeCommand::Reload {
            config,
            done: Some(done),
        })
        .await
    }

    async fn send_and_wait(
        &self,
        command: impl FnOnce(Reply) -> ModeCommand,
    ) -> Result<(), CortexError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| CortexError::Transition("transition handler is not running".into()))?;
        rx.await
            .map_err(|_| CortexError::Transition("transition handler stopped".into()))?
    }

    /// Poll `path` every `interval` and reload when its content changes.
    pub fn watch_config(&self, path: impl Into<PathBuf>, interval: Duration) {
        let path = path.into();
        let commands = self.commands.clone();
        let cancel = self.shared.cancel.child_token();
        let span = info_span!("config_watcher", path = %path.display());
        let handle = tokio::spawn(
            async move {
                let mut last = tokio::fs::read(&path).await.ok();
                let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    let content = match tokio::fs::read(&path).await {
                        Ok(content) => content,
                        Err(e) => {
                            warn!(error = %e, "cannot read configuration file");
                            continue;
                        }
                    };
                    if last.as_ref() == Some(&content) {
                        continue;
                    }
                    last = Some(content.clone());
                    match parse_config(&path, &content) {
                        Ok(config) => {
                            info!(version = %config.version, "configuration change detected");
                            let command = ModeCommand::Reload {
                                config: Arc::new(config),
                                done: None,
                            };
                            if commands.send(command).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "configuration change rejected; previous configuration stays live");
                        }
                    }
                }
            }
            .instrument(span),
        );
        self.tasks.lock().push(handle);
    }
}

impl Drop for Cortex {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

fn parse_config(path: &std::path::Path, content: &[u8]) -> Result<SystemConfig, CortexError> {
    let raw = std::str::from_utf8(content).map_err(|e| CortexError::Reload(e.to_string()))?;
    let doc = parse_document(raw, DocumentFormat::from_path(path))
        .map_err(|e| CortexError::Reload(e.to_string()))?;
    from_value(doc).map_err(|e| CortexError::Reload(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Transition handler
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_commands(shared: Arc<Shared>, mut receiver: mpsc::UnboundedReceiver<ModeCommand>) {
    loop {
        let command = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            command = receiver.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };
        let (result, done) = match command {
            ModeCommand::Transition { request, done } => (shared.swap(request).await, done),
            ModeCommand::Reload { config, done } => (shared.reload(config).await, done),
        };
        if let Some(done) = done {
            let _ = done.send(result);
        }
    }
}

impl Shared {
    async fn activate(
        &self,
        config: &Arc<SystemConfig>,
        mode: &str,
    ) -> Result<ActiveMode, CortexError> {
        let ctx = ModeContext::new(
            Arc::clone(config),
            mode,
            self.inputs.clone(),
            self.context.clone(),
            self.events.clone(),
            &self.cancel,
        );
        let mut active = ActiveMode::build(ctx, &self.registry)?;
        active.start().await;
        Ok(active)
    }

    fn remember(&self, config: &SystemConfig, mode: &str) {
        if !config.mode_memory_enabled {
            return;
        }
        if let Some(memory) = &self.memory
            && let Err(e) = memory.save(mode)
        {
            warn!(path = %memory.path().display(), error = %e, "cannot persist current mode");
        }
    }

    #[instrument(skip_all, fields(from = %request.from_mode, to = %request.to_mode))]
    async fn swap(&self, request: TransitionRequest) -> Result<(), CortexError> {
        let mut active = self.active.lock().await;
        let current = self.engine.current_mode();
        if current != request.from_mode {
            info!(current = %current, "stale transition ignored");
            return Err(CortexError::Transition(format!(
                "mode is '{current}', not '{}'",
                request.from_mode
            )));
        }
        let config = Arc::clone(&self.config.read());
        if config.mode(&request.to_mode).is_none() {
            return Err(CortexError::Transition(format!(
                "unknown mode '{}'",
                request.to_mode
            )));
        }
        let (from, to) = (request.from_mode.as_str(), request.to_mode.as_str());

        if let Some(mut mode) = active.take() {
            if request.trigger == TransitionType::TimeBased {
                mode.run_hooks(HookType::OnTimeout, Some(from), Some(to)).await;
            }
            mode.run_hooks(HookType::OnExit, Some(from), Some(to)).await;
            mode.stop().await;
        }

        match self.activate(&config, to).await {
            Ok(mode) => {
                mode.run_hooks(HookType::OnEntry, Some(from), Some(to)).await;
                *active = Some(mode);
                self.engine.commit(to, Instant::now());
                self.remember(&config, to);
                info!(reason = %request.reason, "mode changed");
                self.events.publish(CortexEvent::new(
                    to,
                    EventPayload::ModeChanged {
                        from: from.to_string(),
                        to: to.to_string(),
                        reason: request.reason.clone(),
                    },
                ));
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "target mode failed to activate; restoring source mode");
                match self.activate(&config, from).await {
                    Ok(mode) => {
                        *active = Some(mode);
                        self.engine.commit(from, Instant::now());
                    }
                    Err(restore) => {
                        error!(error = %restore, "source mode could not be restored");
                    }
                }
                Err(e)
            }
        }
    }

    #[instrument(skip_all, fields(version = %next.version))]
    async fn reload(&self, next: Arc<SystemConfig>) -> Result<(), CortexError> {
        let mut active = self.active.lock().await;
        let previous = Arc::clone(&self.config.read());
        let current = self.engine.current_mode();
        let target = if next.mode(&current).is_some() {
            current.clone()
        } else {
            next.default_mode.clone()
        };

        if target == current && active.is_some() && builds_alike(&previous, &next, &target) {
            *self.config.write() = Arc::clone(&next);
            self.engine.reload(&next);
            info!(mode = %target, "configuration reloaded; active mode kept running");
            self.events.publish(CortexEvent::new(
                &target,
                EventPayload::ConfigReloaded {
                    version: next.version.clone(),
                },
            ));
            return Ok(());
        }

        if let Some(mut mode) = active.take() {
            mode.stop().await;
        }

        match self.activate(&next, &target).await {
            Ok(mode) => {
                *active = Some(mode);
                *self.config.write() = Arc::clone(&next);
                self.engine.reload(&next);
                if target != current {
                    self.engine.commit(&target, Instant::now());
                    self.remember(&next, &target);
                }
                info!(mode = %target, "configuration reloaded");
                self.events.publish(CortexEvent::new(
                    &target,
                    EventPayload::ConfigReloaded {
                        version: next.version.clone(),
                    },
                ));
                Ok(())
            }
            Err(e) => {
                let err = CortexError::Reload(e.to_string());
                warn!(error = %err, "reload failed; previous configuration stays live");
                match self.activate(&previous, &current).await {
                    Ok(mode) => *active = Some(mode),
                    Err(restore) => {
                        error!(error = %restore, "previous mode could not be restored");
                    }
                }
                Err(err)
            }
        }
    }
}

/// Whether `mode` would be activated identically under both configurations.
fn builds_alike(a: &SystemConfig, b: &SystemConfig, mode: &str) -> bool {
    a.mode(mode) == b.mode(mode)
        && a.name == b.name
        && a.credentials == b.credentials
        && a.system_governance == b.system_governance
        && a.system_prompt_examples == b.system_prompt_examples
        && a.default_llm == b.default_llm
        && a.global_lifecycle_hooks == b.global_lifecycle_hooks
}
