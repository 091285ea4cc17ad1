//! `cortex-transition` – deciding when the agent changes mode.
//!
//! * [`engine`] – [`TransitionEngine`]: rule evaluation, priority, cooldown,
//!   manual requests and the authoritative [`ModeManagerState`].
//! * [`context`] – [`ContextStore`] and the predicate grammar of
//!   `context_aware` rules.
//! * [`memory`] – [`ModeMemory`]: the remembered mode across restarts.

pub mod context;
pub mod engine;
pub mod memory;

pub use context::{ContextStore, condition_holds};
pub use engine::{ModeManagerState, TransitionEngine, TransitionRequest};
pub use memory::{ModeMemory, RememberedMode};
