//! `cortex-runtime` – the mode-aware agent runtime.
//!
//! Turns a validated [`SystemConfig`][cortex_config::SystemConfig] into a
//! running agent: one mode active at a time, ticking at that mode's `hertz`,
//! swapping modes when transition rules fire.
//!
//! # Modules
//!
//! - [`cortex`] – [`Cortex`]: lifecycle, the serialized tick, the
//!   transition handler, hot reload and mode memory.
//! - [`mode`] – [`ActiveMode`][mode::ActiveMode]: one mode's live
//!   components and its per-tick sense → fuse → infer → dispatch step.
//! - [`registry`] – [`ComponentRegistry`]: component type names to
//!   constructors.
//! - [`context`] – [`ModeContext`]: what a component sees while it is built.
//! - [`sensor`] – [`Sensor`] and the background-polling [`BufferedSensor`].
//! - [`fuser`] – assembles the per-tick prompt.
//! - [`llm`] – [`Llm`] and the OpenAI-compatible [`LlmDriver`], which also
//!   summarizes history.
//! - [`pipeline`] – [`InferencePipeline`]: stages wrapped around each call.
//! - [`hooks`] – [`LifecycleHook`] and the priority-ordered [`HookRunner`].
//! - [`events`] – [`EventBus`]: broadcast of thinking, dispatch, mode and
//!   reload events.
//! - [`builtins`] – reference connector, simulator and background.
//! - [`telemetry`] – [`init_tracing`]: the global `tracing` subscriber with
//!   an optional OTLP exporter (`OTEL_EXPORTER_OTLP_ENDPOINT`).

pub mod builtins;
pub mod context;
pub mod cortex;
pub mod events;
pub mod fuser;
pub mod hooks;
pub mod llm;
pub mod mode;
pub mod pipeline;
pub mod registry;
pub mod sensor;
pub mod telemetry;

pub use context::ModeContext;
pub use cortex::{Cortex, CortexBuilder, ModeCommand, RuntimeState, TickReport};
pub use events::{CortexEvent, EventBus, EventPayload, EventSubscriber};
pub use hooks::{HookContext, HookReport, HookRunner, LifecycleHook};
pub use llm::{Llm, LlmDriver};
pub use pipeline::{InferencePipeline, InferenceStage, Turn};
pub use registry::ComponentRegistry;
pub use sensor::{BufferedSensor, Sensor};
pub use telemetry::{TracerProviderGuard, init_tracing};
