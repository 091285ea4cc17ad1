//! Lifecycle hooks.
//!
//! Hooks run at fixed points of a mode's life (see [`HookType`]).  The
//! [`HookRunner`] of a mode holds its own hooks plus the global ones, runs
//! those of one type in descending priority, and bounds each by its
//! `timeout_seconds`.  A hook that returns `false`, errors or times out is
//! logged and the remaining hooks still run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cortex_config::{HookSpec, HookType};
use cortex_transition::ContextStore;
use cortex_types::CortexError;
use serde_json::{Map, Value};
use tracing::{info, warn};

/// What a hook sees when it runs.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub hook_type: HookType,
    /// Mode the hook belongs to.
    pub mode: String,
    pub from_mode: Option<String>,
    pub to_mode: Option<String>,
    pub context: ContextStore,
}

#[async_trait]
pub trait LifecycleHook: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(false)` reports a soft failure.
    async fn execute(&self, ctx: &HookContext) -> Result<bool, CortexError>;
}

struct Registered {
    spec: HookSpec,
    hook: Arc<dyn LifecycleHook>,
}

/// The hooks of one mode, global ones included.
#[derive(Default)]
pub struct HookRunner {
    hooks: Vec<Registered>,
}

/// Result of running every hook of one type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl HookRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, spec: HookSpec, hook: Arc<dyn LifecycleHook>) {
        self.hooks.push(Registered { spec, hook });
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook of `ctx.hook_type`, highest priority first.  Equal
    /// priorities keep registration order.
    pub async fn run(&self, ctx: &HookContext) -> HookReport {
        let mut selected: Vec<&Registered> = self
            .hooks
            .iter()
            .filter(|r| r.spec.hook_type == ctx.hook_type)
            .collect();
        selected.sort_by(|a, b| b.spec.priority.cmp(&a.spec.priority));

        let mut report = HookReport::default();
        for registered in selected {
            let name = registered.hook.name().to_string();
            let limit = hook_timeout(&registered.spec);
            let outcome = match tokio::time::timeout(limit, registered.hook.execute(ctx)).await {
                Ok(Ok(true)) => Ok(()),
                Ok(Ok(false)) => Err("returned false".to_string()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {limit:?}")),
            };
            match outcome {
                Ok(()) => report.succeeded.push(name),
                Err(reason) => {
                    let err = CortexError::Hook {
                        hook: name.clone(),
                        reason,
                    };
                    warn!(mode = %ctx.mode, hook_type = ?ctx.hook_type, error = %err, "lifecycle hook failed");
                    report.failed.push(name);
                }
            }
        }
        report
    }
}

fn hook_timeout(spec: &HookSpec) -> Duration {
    if spec.timeout_seconds.is_finite() && spec.timeout_seconds > 0.0 {
        Duration::from_secs_f64(spec.timeout_seconds)
    } else {
        Duration::from_secs(5)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in: message
// ─────────────────────────────────────────────────────────────────────────────

/// Logs `handler_config.message` and, when `context_key` is set, stores the
/// message in the context store under that key.
pub struct MessageHook {
    message: String,
    context_key: Option<String>,
}

impl MessageHook {
    pub fn from_config(config: &Map<String, Value>) -> Self {
        Self {
            message: config
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            context_key: config
                .get("context_key")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

#[async_trait]
impl LifecycleHook for MessageHook {
    fn name(&self) -> &str {
        "message"
    }

    async fn execute(&self, ctx: &HookContext) -> Result<bool, CortexError> {
        info!(mode = %ctx.mode, hook_type = ?ctx.hook_type, message = %self.message, "lifecycle message");
        if let Some(key) = &self.context_key {
            ctx.context.set(key.clone(), Value::String(self.message.clone()));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Probe {
        name: String,
        result: Result<bool, CortexError>,
        delay: Duration,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LifecycleHook for Probe {
        fn name(&self) -> &str {
            &self.name
        }
        async fn execute(&self, _ctx: &HookContext) -> Result<bool, CortexError> {
            tokio::time::sleep(self.delay).await;
            self.log.lock().push(self.name.clone());
            self.result.clone()
        }
    }

    fn spec(hook_type: HookType, priority: i32, timeout: f64) -> HookSpec {
        HookSpec {
            hook_type,
            handler_type: "probe".into(),
            handler_config: Map::new(),
            timeout_seconds: timeout,
            priority,
        }
    }

    fn ctx(hook_type: HookType) -> HookContext {
        HookContext {
            hook_type,
            mode: "calm".into(),
            from_mode: None,
            to_mode: None,
            context: ContextStore::new(),
        }
    }

    fn probe(
        name: &str,
        result: Result<bool, CortexError>,
        delay_ms: u64,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn LifecycleHook> {
        Arc::new(Probe {
            name: name.into(),
            result,
            delay: Duration::from_millis(delay_ms),
            log: Arc::clone(log),
        })
    }

    #[tokio::test]
    async fn runs_matching_hooks_by_descending_priority() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut runner = HookRunner::new();
        runner.add(spec(HookType::OnEntry, 1, 1.0), probe("low", Ok(true), 0, &log));
        runner.add(spec(HookType::OnEntry, 10, 1.0), probe("high", Ok(true), 0, &log));
        runner.add(spec(HookType::OnExit, 99, 1.0), probe("exit", Ok(true), 0, &log));

        let report = runner.run(&ctx(HookType::OnEntry)).await;
        assert_eq!(*log.lock(), vec!["high", "low"]);
        assert_eq!(report.succeeded, vec!["high", "low"]);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn failures_are_reported_and_do_not_stop_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut runner = HookRunner::new();
        runner.add(spec(HookType::OnExit, 3, 1.0), probe("soft", Ok(false), 0, &log));
        runner.add(
            spec(HookType::OnExit, 2, 1.0),
            probe("hard", Err(CortexError::Inference("boom".into())), 0, &log),
        );
        runner.add(spec(HookType::OnExit, 1, 0.02), probe("slow", Ok(true), 200, &log));
        runner.add(spec(HookType::OnExit, 0, 1.0), probe("fine", Ok(true), 0, &log));

        let report = runner.run(&ctx(HookType::OnExit)).await;
        assert_eq!(report.failed, vec!["soft", "hard", "slow"]);
        assert_eq!(report.succeeded, vec!["fine"]);
    }

    #[tokio::test]
    async fn message_hook_writes_context() {
        let config = json!({"message": "entering alert", "context_key": "banner"});
        let hook = MessageHook::from_config(config.as_object().unwrap());
        let ctx = ctx(HookType::OnEntry);
        assert!(hook.execute(&ctx).await.unwrap());
        assert_eq!(ctx.context.get("banner"), Some(json!("entering alert")));
    }
}
