//! [`Orchestrator`] – executes one tick's command list under an
//! [`ExecutionPolicy`].
//!
//! # Policies
//!
//! | Policy | Behaviour |
//! |---|---|
//! | `concurrent` | every routed call starts at once; returns when all finish |
//! | `sequential` | one call at a time in command order; a fatal error skips the rest |
//! | `dependencies` | topological waves; each wave runs concurrently |
//!
//! Under `dependencies` a command waits for every other command in the same
//! list whose action name is one of its prerequisites.  Prerequisites absent
//! from the list count as satisfied.  A cycle is reported as
//! [`CortexError::Cycle`] before any connector is called, and commands whose
//! prerequisite failed are skipped.
//!
//! Every call is bounded by its route's deadline.  Connectors exposing a
//! keep-alive are ticked by background tasks between [`Orchestrator::start`]
//! and [`Orchestrator::stop`].

use std::collections::BTreeMap;
use std::sync::Arc;

use cortex_config::ExecutionPolicy;
use cortex_types::{Action, CortexError, DispatchError};
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{ConnectorRegistry, Route};

/// Outcome of one [`Orchestrator::dispatch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Command types whose every route succeeded.
    pub succeeded: Vec<String>,
    pub failed: Vec<DispatchError>,
    /// Command types not run because a prerequisite failed or was skipped.
    pub skipped: Vec<String>,
    /// Command types with no registered connector.
    pub unrouted: Vec<String>,
    /// The fatal error that halted a `sequential` dispatch.  It is also
    /// listed in `failed`; the commands after it are in `skipped`.
    pub aborted: Option<DispatchError>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pending,
    Done,
    Failed,
    Skipped,
}

enum CommandResult {
    Unrouted,
    Ok,
    Err(Vec<DispatchError>),
}

struct KeepAlive {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Dispatches command lists to the connectors of one registry.
pub struct Orchestrator {
    label: String,
    registry: ConnectorRegistry,
    policy: ExecutionPolicy,
    dependencies: BTreeMap<String, Vec<String>>,
    keep_alive: Mutex<Option<KeepAlive>>,
}

impl Orchestrator {
    /// `label` names the orchestrator in logs (`"actions"`, `"simulators"`).
    pub fn new(
        label: impl Into<String>,
        registry: ConnectorRegistry,
        policy: ExecutionPolicy,
        dependencies: BTreeMap<String, Vec<String>>,
    ) -> Self {
        Self {
            label: label.into(),
            registry,
            policy,
            dependencies,
            keep_alive: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> ExecutionPolicy {
        self.policy
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    /// Execute `commands` under the configured policy.
    ///
    /// # Errors
    ///
    /// [`CortexError::Cycle`] on a dependency cycle among the commands.
    ///
    /// Connector failures are reported, not returned.  A fatal failure under
    /// `sequential` sets [`DispatchReport::aborted`] and keeps the results
    /// of the commands that already ran.
    pub async fn dispatch(&self, commands: &[Action]) -> Result<DispatchReport, CortexError> {
        if commands.is_empty() {
            return Ok(DispatchReport::default());
        }
        debug!(orchestrator = %self.label, policy = %self.policy, count = commands.len(), "dispatching");
        let report = match self.policy {
            ExecutionPolicy::Concurrent => self.dispatch_concurrent(commands).await,
            ExecutionPolicy::Sequential => self.dispatch_sequential(commands).await,
            ExecutionPolicy::Dependencies => self.dispatch_dependencies(commands).await?,
        };
        if !report.is_clean() {
            warn!(
                orchestrator = %self.label,
                failed = report.failed.len(),
                skipped = report.skipped.len(),
                "dispatch finished with errors"
            );
        }
        Ok(report)
    }

    async fn dispatch_concurrent(&self, commands: &[Action]) -> DispatchReport {
        let results = join_all(commands.iter().map(|c| self.run_command(c))).await;
        let mut report = DispatchReport::default();
        for (command, result) in commands.iter().zip(results) {
            record(&mut report, command, result);
        }
        report
    }

    async fn dispatch_sequential(&self, commands: &[Action]) -> DispatchReport {
        let mut report = DispatchReport::default();
        for (i, command) in commands.iter().enumerate() {
            let result = self.run_command(command).await;
            if let CommandResult::Err(errors) = &result
                && let Some(fatal) = errors.iter().find(|e| e.fatal)
            {
                warn!(
                    orchestrator = %self.label,
                    action = %command.kind,
                    error = %fatal,
                    "fatal dispatch error; remaining commands skipped"
                );
                report.aborted = Some(fatal.clone());
                record(&mut report, command, result);
                report
                    .skipped
                    .extend(commands[i + 1..].iter().map(|c| c.kind.clone()));
                break;
            }
            record(&mut report, command, result);
        }
        report
    }

    async fn dispatch_dependencies(
        &self,
        commands: &[Action],
    ) -> Result<DispatchReport, CortexError> {
        let names: Vec<&str> = commands
            .iter()
            .map(|c| self.registry.action_name(&c.kind))
            .collect();
        let prereqs: Vec<Vec<usize>> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let wanted = self.dependencies.get(*name).map(Vec::as_slice).unwrap_or(&[]);
                (0..names.len())
                    .filter(|&j| j != i && wanted.iter().any(|w| w == names[j]))
                    .collect()
            })
            .collect();

        let waves = plan_waves(&prereqs).map_err(|stuck| {
            CortexError::Cycle(stuck.iter().map(|&i| names[i].to_string()).collect())
        })?;

        let mut status = vec![Status::Pending; commands.len()];
        let mut results: Vec<Option<CommandResult>> = (0..commands.len()).map(|_| None).collect();
        for wave in waves {
            let mut runnable = Vec::new();
            for i in wave {
                if prereqs[i]
                    .iter()
                    .any(|&p| matches!(status[p], Status::Failed | Status::Skipped))
                {
                    info!(orchestrator = %self.label, action = %commands[i].kind, "skipped: prerequisite failed");
                    status[i] = Status::Skipped;
                } else {
                    runnable.push(i);
                }
            }
            let outcomes = join_all(runnable.iter().map(|&i| self.run_command(&commands[i]))).await;
            for (i, outcome) in runnable.into_iter().zip(outcomes) {
                status[i] = match outcome {
                    CommandResult::Err(_) => Status::Failed,
                    _ => Status::Done,
                };
                results[i] = Some(outcome);
            }
        }

        let mut report = DispatchReport::default();
        for (i, command) in commands.iter().enumerate() {
            match results[i].take() {
                Some(result) => record(&mut report, command, result),
                None => report.skipped.push(command.kind.clone()),
            }
        }
        Ok(report)
    }

    async fn run_command(&self, command: &Action) -> CommandResult {
        let routes = self.registry.routes_for(&command.kind);
        if routes.is_empty() {
            debug!(orchestrator = %self.label, action = %command.kind, "no connector registered; skipping");
            return CommandResult::Unrouted;
        }
        let errors: Vec<DispatchError> = join_all(routes.iter().map(|r| call(r, command)))
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();
        for e in &errors {
            warn!(orchestrator = %self.label, connector = %e.connector, action = %e.action, reason = %e.reason, "connector call failed");
        }
        if errors.is_empty() {
            CommandResult::Ok
        } else {
            CommandResult::Err(errors)
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Keep-alive
    // ─────────────────────────────────────────────────────────────────────

    /// Spawn keep-alive tasks for connectors that declare a tick interval.
    /// Calling `start` twice restarts them.
    pub async fn start(&self) {
        self.stop_keep_alive().await;
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();
        for connector in self.registry.connectors() {
            let Some(period) = connector.tick_interval() else {
                continue;
            };
            let token = cancel.child_token();
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => connector.tick().await,
                    }
                }
            }));
        }
        if !handles.is_empty() {
            debug!(orchestrator = %self.label, tasks = handles.len(), "keep-alive started");
        }
        *self.keep_alive.lock() = Some(KeepAlive { cancel, handles });
    }

    /// Cancel keep-alive tasks and stop every connector.
    pub async fn stop(&self) {
        self.stop_keep_alive().await;
        for connector in self.registry.connectors() {
            connector.stop().await;
        }
        debug!(orchestrator = %self.label, "stopped");
    }

    async fn stop_keep_alive(&self) {
        let Some(keep_alive) = self.keep_alive.lock().take() else {
            return;
        };
        keep_alive.cancel.cancel();
        for handle in keep_alive.handles {
            if let Err(e) = handle.await
                && !e.is_cancelled()
            {
                warn!(orchestrator = %self.label, error = %e, "keep-alive task panicked");
            }
        }
    }
}

async fn call(route: &Route, command: &Action) -> Result<(), DispatchError> {
    match tokio::time::timeout(route.timeout, route.connector.connect(command)).await {
        Ok(result) => result,
        Err(_) => Err(DispatchError::new(
            route.connector.name(),
            &command.kind,
            format!("timed out after {:?}", route.timeout),
        )),
    }
}

fn record(report: &mut DispatchReport, command: &Action, result: CommandResult) {
    match result {
        CommandResult::Unrouted => report.unrouted.push(command.kind.clone()),
        CommandResult::Ok => report.succeeded.push(command.kind.clone()),
        CommandResult::Err(errors) => report.failed.extend(errors),
    }
}

/// Group command indices into waves: a command lands in the first wave after
/// all its prerequisites.  On a cycle returns the indices that could not be
/// scheduled.
fn plan_waves(prereqs: &[Vec<usize>]) -> Result<Vec<Vec<usize>>, Vec<usize>> {
    let mut placed = vec![false; prereqs.len()];
    let mut waves = Vec::new();
    let mut remaining = prereqs.len();
    while remaining > 0 {
        let wave: Vec<usize> = (0..prereqs.len())
            .filter(|&i| !placed[i] && prereqs[i].iter().all(|&p| placed[p]))
            .collect();
        if wave.is_empty() {
            return Err((0..prereqs.len()).filter(|&i| !placed[i]).collect());
        }
        for &i in &wave {
            placed[i] = true;
        }
        remaining -= wave.len();
        waves.push(wave);
    }
    Ok(waves)
}
