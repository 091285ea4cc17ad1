//! [`HistoryManager`] – bounded LLM conversation history.
//!
//! One tick is one *turn*: [`HistoryManager::begin_turn`] appends a `user`
//! message describing what the agent sensed during the current tick, and
//! [`HistoryManager::complete_turn`] either appends the `assistant` reply or,
//! when inference failed, removes the dangling `user` message again.
//!
//! When a completed turn leaves more than `history_length` messages, a
//! summarization runs on a background task (never more than one at a time):
//!
//! * success – the summarized prefix becomes a single
//!   `assistant` message `"Previously, <summary>"`; messages appended while
//!   the summary was running are kept.
//! * failure, empty summary or timeout – history is truncated to its most
//!   recent `history_length` messages.
//!
//! While a summarization runs, a turn that pushes history past
//! `history_length + 2` truncates it on the spot, so a slow summarizer never
//! lets the history grow with the tick rate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cortex_types::{Action, ChatMessage, CortexError, Role};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::input::InputRecord;

/// Default bound on the number of retained messages.
pub const DEFAULT_HISTORY_LENGTH: usize = 10;
/// Default deadline of one summarization.
pub const DEFAULT_SUMMARY_TIMEOUT: Duration = Duration::from_secs(30);

/// Condenses a run of messages into a short paragraph.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[ChatMessage]) -> Result<String, CortexError>;
}

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub agent_name: String,
    pub history_length: usize,
    pub summary_timeout: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            agent_name: "Robot".to_string(),
            history_length: DEFAULT_HISTORY_LENGTH,
            summary_timeout: DEFAULT_SUMMARY_TIMEOUT,
        }
    }
}

#[derive(Debug, Default)]
struct HistoryState {
    messages: Vec<ChatMessage>,
    turn_open: bool,
}

pub struct HistoryManager {
    config: HistoryConfig,
    state: Arc<Mutex<HistoryState>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    summary_task: Mutex<Option<JoinHandle<()>>>,
}

impl HistoryManager {
    /// Without a summarizer, overflow is handled by truncation alone.
    pub fn new(config: HistoryConfig, summarizer: Option<Arc<dyn Summarizer>>) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(HistoryState::default())),
            summarizer,
            summary_task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Snapshot of the messages to send along with the next prompt.
    pub fn context(&self) -> Vec<ChatMessage> {
        self.state.lock().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append the `user` message for this tick.  Records of other ticks are
    /// ignored.  A turn left open by the previous tick is rolled back first.
    pub fn begin_turn(&self, records: &[InputRecord], current_tick: u64) {
        let content = self.describe_inputs(records, current_tick);
        let mut state = self.state.lock();
        if state.turn_open {
            warn!("previous turn was never completed; rolling it back");
            rollback(&mut state);
        }
        state.messages.push(ChatMessage::user(content));
        state.turn_open = true;
    }

    /// Close the open turn.
    ///
    /// `Some(actions)` appends the assistant reply and may schedule a
    /// summarization; `None` removes the unpaired `user` message.
    pub fn complete_turn(&self, actions: Option<&[Action]>) {
        let over_limit = {
            let mut state = self.state.lock();
            if !state.turn_open {
                debug!("complete_turn called without an open turn");
            }
            state.turn_open = false;
            match actions {
                Some(actions) => {
                    state
                        .messages
                        .push(ChatMessage::assistant(self.describe_actions(actions)));
                    state.messages.len() > self.config.history_length
                }
                None => {
                    rollback(&mut state);
                    false
                }
            }
        };
        if over_limit {
            self.schedule_summary();
        }
    }

    /// Wait for an in-flight summarization, if any.
    pub async fn settle(&self) {
        let handle = self.summary_task.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
            && !e.is_cancelled()
        {
            warn!(error = %e, "summarization task panicked");
        }
    }

    /// Abort an in-flight summarization.
    pub fn abort_summary(&self) {
        if let Some(handle) = self.summary_task.lock().take() {
            handle.abort();
        }
    }

    pub fn summary_in_flight(&self) -> bool {
        self.summary_task
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    fn schedule_summary(&self) {
        let mut slot = self.summary_task.lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            // The running task sees the changed prefix and truncates again.
            let mut state = self.state.lock();
            if state.messages.len() > self.config.history_length + 2 {
                warn!(
                    len = state.messages.len(),
                    "summarization still running; truncating history"
                );
                truncate(&mut state, self.config.history_length);
            } else {
                debug!("summarization already in flight");
            }
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime; truncating history instead of summarizing");
            truncate(&mut self.state.lock(), self.config.history_length);
            return;
        };

        let snapshot = self.state.lock().messages.clone();
        let state = Arc::clone(&self.state);
        let summarizer = self.summarizer.clone();
        let limit = self.config.history_length;
        let timeout = self.config.summary_timeout;

        *slot = Some(runtime.spawn(async move {
            let outcome = match summarizer {
                Some(s) => match tokio::time::timeout(timeout, s.summarize(&snapshot)).await {
                    Ok(Ok(summary)) if !summary.trim().is_empty() => Ok(summary),
                    Ok(Ok(_)) => Err("empty summary".to_string()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("timed out after {timeout:?}")),
                },
                None => Err("no summarizer configured".to_string()),
            };

            let mut state = state.lock();
            match outcome {
                Ok(summary) if state.messages.starts_with(&snapshot) => {
                    let kept = state.messages.split_off(snapshot.len());
                    state.messages = std::iter::once(ChatMessage::assistant(format!(
                        "Previously, {summary}"
                    )))
                    .chain(kept)
                    .collect();
                    info!(summarized = snapshot.len(), retained = state.messages.len(), "history summarized");
                }
                Ok(_) => {
                    warn!("history changed during summarization; truncating instead");
                    truncate(&mut state, limit);
                }
                Err(reason) => {
                    warn!(reason = %reason, "summarization failed; truncating history");
                    truncate(&mut state, limit);
                }
            }
        }));
    }

    fn describe_inputs(&self, records: &[InputRecord], current_tick: u64) -> String {
        let mut out = format!("{} sensed the following:", self.config.agent_name);
        for record in records.iter().filter(|r| r.tick == current_tick) {
            out.push_str(&format!("\n{}: {}", record.name, record.text));
        }
        out
    }

    fn describe_actions(&self, actions: &[Action]) -> String {
        if actions.is_empty() {
            return format!("{} chose no actions.", self.config.agent_name);
        }
        let mut out = format!("{} chose the following actions:", self.config.agent_name);
        for action in actions {
            out.push_str(&format!("\n{}: {}", action.kind, action.value));
        }
        out
    }
}

impl Drop for HistoryManager {
    fn drop(&mut self) {
        self.abort_summary();
    }
}

fn rollback(state: &mut HistoryState) {
    if state.messages.last().is_some_and(|m| m.role == Role::User) {
        state.messages.pop();
    }
    state.turn_open = false;
}

/// Keep the most recent `limit` messages.  An open turn's `user` message is
/// always the newest, so it survives.
fn truncate(state: &mut HistoryState, limit: usize) {
    let len = state.messages.len();
    if len > limit {
        state.messages.drain(..len - limit);
    }
}
