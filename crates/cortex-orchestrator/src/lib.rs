//! `cortex-orchestrator` – turning LLM commands into connector calls.
//!
//! * [`connector`] – the [`Connector`] trait and the [`BlockingConnector`]
//!   adapter for synchronous drivers.
//! * [`registry`] – [`ConnectorRegistry`]: command type → connectors.
//! * [`orchestrator`] – [`Orchestrator`]: concurrent, sequential and
//!   dependency-ordered dispatch with per-call deadlines.
//! * [`background`] – [`Background`] components and their loops.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use cortex_config::ExecutionPolicy;
//! use cortex_orchestrator::{ConnectorRegistry, Orchestrator};
//! use cortex_types::Action;
//!
//! # async fn demo() -> Result<(), cortex_types::CortexError> {
//! let orchestrator = Orchestrator::new(
//!     "actions",
//!     ConnectorRegistry::new(),
//!     ExecutionPolicy::Concurrent,
//!     BTreeMap::new(),
//! );
//! let report = orchestrator.dispatch(&[Action::new("speak", "hello")]).await?;
//! assert_eq!(report.unrouted, vec!["speak"]);
//! # Ok(())
//! # }
//! ```

pub mod background;
pub mod connector;
pub mod orchestrator;
pub mod registry;

pub use background::{Background, BackgroundOrchestrator};
pub use connector::{BlockingConnector, Connector, DEFAULT_CALL_TIMEOUT, SyncConnector};
pub use orchestrator::{DispatchReport, Orchestrator};
pub use registry::{ConnectorRegistry, Route};
