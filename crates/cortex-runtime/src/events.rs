//! Runtime event stream.
//!
//! The [`EventBus`] is a [`tokio::sync::broadcast`] channel of
//! [`CortexEvent`]s.  Every subscriber sees every event; a slow subscriber
//! loses the oldest ones instead of blocking the tick loop.
//!
//! | Payload | Published by |
//! |---|---|
//! | [`EventPayload::ThinkingStarted`] / [`EventPayload::ThinkingFinished`] | `ThinkingStage` around each LLM call |
//! | [`EventPayload::ActionsDispatched`] | the active mode after both orchestrators finish |
//! | [`EventPayload::ModeChanged`] | the transition handler after a completed swap |
//! | [`EventPayload::ConfigReloaded`] | the transition handler after a good reload |

use chrono::{DateTime, Utc};
use cortex_types::Action;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{trace, warn};
use uuid::Uuid;

/// Buffered events per subscriber before the oldest are dropped.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    ThinkingStarted {
        tick: u64,
    },
    /// `actions` is `None` when inference failed.
    ThinkingFinished {
        tick: u64,
        actions: Option<Vec<Action>>,
    },
    ActionsDispatched {
        tick: u64,
        succeeded: Vec<String>,
        failed: usize,
    },
    ModeChanged {
        from: String,
        to: String,
        reason: String,
    },
    ConfigReloaded {
        version: String,
    },
}

/// One event with its origin mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CortexEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub mode: String,
    pub payload: EventPayload,
}

impl CortexEvent {
    pub fn new(mode: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            mode: mode.into(),
            payload,
        }
    }
}

/// Cheap to clone; clones share the channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<CortexEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `event`, returning how many subscribers received it.  Having
    /// no subscribers is normal and yields `0`.
    pub fn publish(&self, event: CortexEvent) -> usize {
        match self.sender.send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(event)) => {
                trace!(mode = %event.mode, "event published without subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiving end of an [`EventBus`].
pub struct EventSubscriber {
    receiver: broadcast::Receiver<CortexEvent>,
}

impl EventSubscriber {
    /// Next event; `None` once every sender is gone.  Lag is logged and
    /// skipped.
    pub async fn recv(&mut self) -> Option<CortexEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the first event whose payload satisfies `pred`.
    pub async fn recv_matching(
        &mut self,
        mut pred: impl FnMut(&EventPayload) -> bool,
    ) -> Option<CortexEvent> {
        while let Some(event) = self.recv().await {
            if pred(&event.payload) {
                return Some(event);
            }
        }
        None
    }
}
