//! `cortex-history` – what the LLM remembers between ticks.
//!
//! * [`input`] – [`InputBuffer`]: tick-scoped sensor records.
//! * [`manager`] – [`HistoryManager`]: turn bookkeeping, unpaired-message
//!   rollback and background summarization through a [`Summarizer`].

pub mod input;
pub mod manager;

pub use input::{InputBuffer, InputRecord};
pub use manager::{
    DEFAULT_HISTORY_LENGTH, DEFAULT_SUMMARY_TIMEOUT, HistoryConfig, HistoryManager, Summarizer,
};
