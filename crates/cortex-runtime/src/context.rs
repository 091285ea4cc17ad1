//! Per-activation context handed to every component factory.

use std::sync::Arc;

use cortex_config::{ComponentDefaults, SystemConfig, merge_component_defaults};
use cortex_history::InputBuffer;
use cortex_transition::ContextStore;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::events::EventBus;

/// Everything a component of one active mode may reach.  Built when the mode
/// is activated and dropped when it is deactivated; cancelling `cancel` stops
/// every task the mode spawned.
#[derive(Clone)]
pub struct ModeContext {
    pub mode: String,
    pub system: Arc<SystemConfig>,
    pub defaults: ComponentDefaults,
    pub inputs: InputBuffer,
    pub context: ContextStore,
    pub events: EventBus,
    pub cancel: CancellationToken,
}

impl ModeContext {
    pub fn new(
        system: Arc<SystemConfig>,
        mode: &str,
        inputs: InputBuffer,
        context: ContextStore,
        events: EventBus,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            mode: mode.to_string(),
            defaults: ComponentDefaults::for_mode(&system, mode),
            system,
            inputs,
            context,
            events,
            cancel: parent.child_token(),
        }
    }

    /// A component's inline config with global defaults filled in.
    pub fn merged(&self, config: &Map<String, Value>) -> Map<String, Value> {
        merge_component_defaults(config, &self.defaults)
    }
}

impl std::fmt::Debug for ModeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeContext")
            .field("mode", &self.mode)
            .field("system", &self.system.name)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
