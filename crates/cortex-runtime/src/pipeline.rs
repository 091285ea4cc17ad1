//! [`InferencePipeline`] – the ordered stages wrapped around each LLM call.
//!
//! Stages see the turn before the call (`before`, in order) and the outcome
//! after it (`after`, in reverse order), so the first stage is the outermost.
//! The default pipeline is `[ThinkingStage, HistoryStage]`:
//!
//! * [`ThinkingStage`] publishes thinking started/finished events.
//! * [`HistoryStage`] opens a history turn from the tick's records and
//!   completes or rolls it back with the outcome.

use std::sync::Arc;

use async_trait::async_trait;
use cortex_history::{HistoryManager, InputRecord};
use cortex_types::{Action, ChatMessage, CortexError};
use tracing::debug;

use crate::events::{CortexEvent, EventBus, EventPayload};
use crate::llm::Llm;

/// One tick's inference input.
#[derive(Debug, Clone)]
pub struct Turn {
    pub mode: String,
    pub tick: u64,
    pub prompt: String,
    /// Records of this tick only.
    pub records: Vec<InputRecord>,
}

#[async_trait]
pub trait InferenceStage: Send + Sync {
    fn name(&self) -> &str;

    async fn before(&self, _turn: &Turn) {}

    /// `outcome` is `None` when inference failed.
    async fn after(&self, _turn: &Turn, _outcome: Option<&[Action]>) {}
}

#[derive(Default)]
pub struct InferencePipeline {
    stages: Vec<Arc<dyn InferenceStage>>,
}

impl InferencePipeline {
    pub fn new(stages: Vec<Arc<dyn InferenceStage>>) -> Self {
        Self { stages }
    }

    /// `[ThinkingStage, HistoryStage]`.
    pub fn standard(events: EventBus, history: Arc<HistoryManager>) -> Self {
        let thinking: Arc<dyn InferenceStage> = Arc::new(ThinkingStage::new(events));
        let history: Arc<dyn InferenceStage> = Arc::new(HistoryStage::new(history));
        Self::new(vec![thinking, history])
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Ask `llm` for this turn's actions with `history` as prior context.
    ///
    /// # Errors
    ///
    /// [`CortexError::Inference`] when the LLM produced no answer.
    pub async fn run(
        &self,
        llm: &dyn Llm,
        turn: &Turn,
        history: &[ChatMessage],
    ) -> Result<Vec<Action>, CortexError> {
        for stage in &self.stages {
            stage.before(turn).await;
        }
        let outcome = llm.ask(&turn.prompt, history).await;
        for stage in self.stages.iter().rev() {
            stage.after(turn, outcome.as_deref()).await;
        }
        outcome.ok_or_else(|| {
            CortexError::Inference(format!("no answer from LLM at tick {}", turn.tick))
        })
    }
}

/// Publishes [`EventPayload::ThinkingStarted`] and
/// [`EventPayload::ThinkingFinished`].
pub struct ThinkingStage {
    events: EventBus,
}

impl ThinkingStage {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }
}

#[async_trait]
impl InferenceStage for ThinkingStage {
    fn name(&self) -> &str {
        "thinking"
    }

    async fn before(&self, turn: &Turn) {
        self.events.publish(CortexEvent::new(
            &turn.mode,
            EventPayload::ThinkingStarted { tick: turn.tick },
        ));
    }

    async fn after(&self, turn: &Turn, outcome: Option<&[Action]>) {
        self.events.publish(CortexEvent::new(
            &turn.mode,
            EventPayload::ThinkingFinished {
                tick: turn.tick,
                actions: outcome.map(<[Action]>::to_vec),
            },
        ));
    }
}

/// Keeps the conversation history in step with each turn.
pub struct HistoryStage {
    history: Arc<HistoryManager>,
}

impl HistoryStage {
    pub fn new(history: Arc<HistoryManager>) -> Self {
        Self { history }
    }
}

#[async_trait]
impl InferenceStage for HistoryStage {
    fn name(&self) -> &str {
        "history"
    }

    async fn before(&self, turn: &Turn) {
        self.history.begin_turn(&turn.records, turn.tick);
    }

    async fn after(&self, turn: &Turn, outcome: Option<&[Action]>) {
        self.history.complete_turn(outcome);
        debug!(tick = turn.tick, messages = self.history.len(), "history updated");
    }
}
