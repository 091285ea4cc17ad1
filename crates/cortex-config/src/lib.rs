//! `cortex-config` – the mode-aware configuration model.
//!
//! * [`schema`] – typed [`SystemConfig`], [`ModeConfig`] and
//!   [`TransitionRule`] definitions.
//! * [`loader`] – `load` / `load_from_path`, placeholder substitution,
//!   credential fallbacks and validation.
//! * [`converter`] – legacy single-mode documents in and out.
//! * [`merge`] – per-component config merging.
//!
//! ```no_run
//! let config = cortex_config::load("guard").expect("valid configuration");
//! println!("starting in {}", config.default_mode);
//! ```

pub mod converter;
pub mod loader;
pub mod merge;
pub mod schema;

pub use converter::{convert_to_multi_mode, is_single_mode, to_single_mode};
pub use loader::{
    DocumentFormat, config_dir, from_value, load, load_from_path, parse_document, validate,
};
pub use merge::{ComponentDefaults, merge_component_defaults};
pub use schema::{
    ANY_MODE, ActionSpec, ComponentSpec, Credentials, ExecutionPolicy, HookSpec, HookType,
    ModeConfig, SystemConfig, TransitionRule, TransitionType,
};
