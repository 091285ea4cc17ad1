//! Sensors and their buffered polling loops.
//!
//! A [`Sensor`] is polled on its own task by a [`BufferedSensor`]; every raw
//! reading that converts to text is appended to a buffer the tick loop
//! drains with [`BufferedSensor::latest_buffer`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Pause after a poll that produced nothing.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Buffered readings kept per sensor; older ones are dropped first.
const MAX_BUFFERED: usize = 64;

#[async_trait]
pub trait Sensor: Send + Sync {
    /// Input name used in the prompt and the input buffer.
    fn name(&self) -> &str;

    /// Next raw reading, or `None` when nothing new is available.
    async fn poll(&self) -> Option<Value>;

    /// Render a raw reading as prompt text; `None` discards it.
    async fn to_text(&self, raw: Value) -> Option<String>;

    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }
}

/// Runs one [`Sensor`] and buffers its text.
pub struct BufferedSensor {
    sensor: Arc<dyn Sensor>,
    buffer: Arc<Mutex<Vec<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl BufferedSensor {
    pub fn new(sensor: Arc<dyn Sensor>) -> Self {
        Self {
            sensor,
            buffer: Arc::new(Mutex::new(Vec::new())),
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        self.sensor.name()
    }

    /// Spawn the polling loop; it ends when `cancel` fires.
    pub fn start(&mut self, cancel: &CancellationToken) {
        if self.handle.is_some() {
            return;
        }
        let sensor = Arc::clone(&self.sensor);
        let buffer = Arc::clone(&self.buffer);
        let token = cancel.clone();
        self.handle = Some(tokio::spawn(async move {
            loop {
                let produced = tokio::select! {
                    _ = token.cancelled() => break,
                    produced = poll_into(sensor.as_ref(), &buffer) => produced,
                };
                if !produced {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(sensor.poll_interval()) => {}
                    }
                }
            }
            debug!(sensor = %sensor.name(), "sensor loop exited");
        }));
    }

    /// Drain and return every buffered text, oldest first.
    pub fn latest_buffer(&self) -> Vec<String> {
        std::mem::take(&mut *self.buffer.lock())
    }

    /// Wait for the polling loop to end.  Cancel its token first.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
            && !e.is_cancelled()
        {
            warn!(sensor = %self.sensor.name(), error = %e, "sensor task panicked");
        }
    }
}

async fn poll_into(sensor: &dyn Sensor, buffer: &Mutex<Vec<String>>) -> bool {
    let Some(raw) = sensor.poll().await else {
        return false;
    };
    let Some(text) = sensor.to_text(raw).await else {
        return false;
    };
    let mut buffer = buffer.lock();
    if buffer.len() >= MAX_BUFFERED {
        buffer.remove(0);
    }
    buffer.push(text);
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in: static text
// ─────────────────────────────────────────────────────────────────────────────

/// Emits a fixed text every `interval_seconds` (or only once with
/// `"once": true`).  Useful for scripted demos and smoke tests.
pub struct StaticTextSensor {
    name: String,
    text: String,
    interval: Duration,
    once: bool,
    emitted: AtomicBool,
}

impl StaticTextSensor {
    pub fn new(name: impl Into<String>, text: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            interval,
            once: false,
            emitted: AtomicBool::new(false),
        }
    }

    /// Read `name`, `text`, `interval_seconds` and `once` from a component
    /// config.
    pub fn from_config(config: &serde_json::Map<String, Value>) -> Self {
        let name = config
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("static_text");
        let text = config.get("text").and_then(Value::as_str).unwrap_or("");
        let interval = config
            .get("interval_seconds")
            .and_then(Value::as_f64)
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::from_secs(1));
        let mut sensor = Self::new(name, text, interval);
        sensor.once = config.get("once").and_then(Value::as_bool).unwrap_or(false);
        sensor
    }
}

#[async_trait]
impl Sensor for StaticTextSensor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self) -> Option<Value> {
        let already = self.emitted.swap(true, Ordering::SeqCst);
        if self.once && already {
            return None;
        }
        if already {
            tokio::time::sleep(self.interval).await;
        }
        Some(Value::String(self.text.clone()))
    }

    async fn to_text(&self, raw: Value) -> Option<String> {
        raw.as_str().filter(|s| !s.is_empty()).map(str::to_string)
    }

    fn poll_interval(&self) -> Duration {
        self.interval
    }
}
