//! Reference components shipped with the runtime so a configuration can run
//! end to end without hardware: a logging connector, a logging simulator and
//! a heartbeat background.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cortex_orchestrator::{Background, Connector};
use cortex_transition::ContextStore;
use cortex_types::{Action, CortexError, DispatchError};
use serde_json::{Map, Value};
use tracing::{debug, info};

fn name_or(config: &Map<String, Value>, fallback: &str) -> String {
    config
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}

/// Logs every command it receives.
pub struct LogConnector {
    name: String,
    calls: AtomicU64,
}

impl LogConnector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &Map<String, Value>) -> Self {
        Self::new(name_or(config, "log"))
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connector for LogConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self, action: &Action) -> Result<(), DispatchError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        info!(connector = %self.name, action = %action.kind, value = %action.value, "action");
        Ok(())
    }
}

/// Catch-all simulator that logs what the robot would do.
pub struct LogSimulator {
    name: String,
    mode: String,
}

impl LogSimulator {
    pub fn from_config(config: &Map<String, Value>) -> Self {
        Self {
            name: name_or(config, "log_simulator"),
            mode: config
                .get("mode")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

#[async_trait]
impl Connector for LogSimulator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self, action: &Action) -> Result<(), DispatchError> {
        debug!(simulator = %self.name, mode = %self.mode, action = %action.kind, value = %action.value, "simulated");
        Ok(())
    }
}

/// Writes the current time to the context store every `interval_seconds`
/// (default 5) under `context_key` (default `"heartbeat"`).
pub struct Heartbeat {
    context: ContextStore,
    key: String,
    interval: Duration,
    beats: AtomicU64,
}

impl Heartbeat {
    pub fn new(context: ContextStore, key: impl Into<String>, interval: Duration) -> Self {
        Self {
            context,
            key: key.into(),
            interval,
            beats: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &Map<String, Value>, context: ContextStore) -> Self {
        let key = config
            .get("context_key")
            .and_then(Value::as_str)
            .unwrap_or("heartbeat");
        let interval = config
            .get("interval_seconds")
            .and_then(Value::as_f64)
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::from_secs(5));
        Self::new(context, key, interval)
    }

    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Background for Heartbeat {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn run(&self) -> Result<(), CortexError> {
        let beat = self.beats.fetch_add(1, Ordering::Relaxed) + 1;
        self.context
            .set(self.key.clone(), Value::String(Utc::now().to_rfc3339()));
        debug!(key = %self.key, beat, "heartbeat");
        Ok(())
    }

    fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn log_connector_counts_calls() {
        let connector = LogConnector::from_config(json!({"name": "speaker"}).as_object().unwrap());
        assert_eq!(connector.name(), "speaker");
        connector.connect(&Action::new("speak", "hi")).await.unwrap();
        connector.connect(&Action::new("speak", "bye")).await.unwrap();
        assert_eq!(connector.calls(), 2);
    }

    #[tokio::test]
    async fn log_simulator_accepts_anything() {
        let sim = LogSimulator::from_config(&Map::new());
        assert_eq!(sim.name(), "log_simulator");
        assert!(sim.connect(&Action::new("dance", "")).await.is_ok());
    }

    #[tokio::test]
    async fn heartbeat_stamps_context() {
        let context = ContextStore::new();
        let beat = Heartbeat::from_config(
            json!({"context_key": "alive", "interval_seconds": 0.5}).as_object().unwrap(),
            context.clone(),
        );
        assert_eq!(beat.interval(), Duration::from_millis(500));
        beat.run().await.unwrap();
        assert_eq!(beat.beats(), 1);
        assert!(context.get("alive").and_then(|v| v.as_str().map(str::to_string)).is_some());
    }
}
