//! Builds the per-tick prompt from the mode's prompt sections and the
//! current tick's sensor records.

use cortex_config::{ModeConfig, SystemConfig};
use cortex_history::InputRecord;

/// Output of one fusion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusedPrompt {
    /// Full prompt sent to the LLM.
    pub prompt: String,
    /// Only the sensor lines; used for keyword transitions.
    pub inputs: String,
}

/// Prompt assembly for one mode.
#[derive(Debug, Clone)]
pub struct Fuser {
    base: String,
    governance: String,
    examples: String,
    actions: Vec<String>,
}

impl Fuser {
    pub fn new(system: &SystemConfig, mode: &ModeConfig) -> Self {
        Self {
            base: mode.system_prompt_base.clone(),
            governance: system.system_governance.clone(),
            examples: system.system_prompt_examples.clone(),
            actions: mode
                .agent_actions
                .iter()
                .map(|a| a.label().to_string())
                .collect(),
        }
    }

    pub fn fuse(&self, records: &[InputRecord]) -> FusedPrompt {
        let inputs = records
            .iter()
            .map(|r| format!("{}: {}", r.name, r.text))
            .collect::<Vec<_>>()
            .join("\n");

        let mut sections = vec![format!("BASIC CONTEXT:\n{}", self.base)];
        if !self.governance.is_empty() {
            sections.push(format!("LAWS:\n{}", self.governance));
        }
        sections.push(format!(
            "INPUTS:\n{}",
            if inputs.is_empty() { "(none)" } else { &inputs }
        ));
        if !self.actions.is_empty() {
            sections.push(format!("AVAILABLE ACTIONS:\n{}", self.actions.join("\n")));
        }
        if !self.examples.is_empty() {
            sections.push(format!("EXAMPLES:\n{}", self.examples));
        }
        sections.push("What will you do? Actions:".to_string());

        FusedPrompt {
            prompt: sections.join("\n\n"),
            inputs,
        }
    }
}
