//! Tick-scoped input buffer.
//!
//! Sensors record their latest text under their own name; each record is
//! stamped with the tick that was current when it arrived.  Only records of
//! the current tick are fused into the prompt and written to history, so a
//! sensor that went quiet does not keep repeating stale text.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// One sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputRecord {
    pub name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub tick: u64,
}

#[derive(Debug, Default)]
struct InputState {
    tick: u64,
    /// Latest record per input name, in arrival order.
    records: Vec<InputRecord>,
}

/// Shared buffer; clones refer to the same state.
#[derive(Debug, Clone, Default)]
pub struct InputBuffer {
    inner: Arc<Mutex<InputState>>,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `text` from input `name` at the current tick.
    pub fn add_input(&self, name: impl Into<String>, text: impl Into<String>) {
        self.add_input_at(name, text, Utc::now());
    }

    /// Record with an explicit timestamp.  A newer reading of the same input
    /// replaces the older one.
    pub fn add_input_at(
        &self,
        name: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) {
        let name = name.into();
        let mut state = self.inner.lock();
        state.records.retain(|r| r.name != name);
        let tick = state.tick;
        state.records.push(InputRecord {
            name,
            text: text.into(),
            timestamp,
            tick,
        });
    }

    pub fn tick(&self) -> u64 {
        self.inner.lock().tick
    }

    /// Advance to the next tick and return its id.
    pub fn increment_tick(&self) -> u64 {
        let mut state = self.inner.lock();
        state.tick += 1;
        state.tick
    }

    /// Every retained record, regardless of tick.
    pub fn records(&self) -> Vec<InputRecord> {
        self.inner.lock().records.clone()
    }

    /// Records stamped with the current tick.
    pub fn current_tick_records(&self) -> Vec<InputRecord> {
        let state = self.inner.lock();
        state
            .records
            .iter()
            .filter(|r| r.tick == state.tick)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.inner.lock().records.clear();
    }
}
