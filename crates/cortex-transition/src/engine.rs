//! Rule-based mode state machine with priority and cooldown.
//!
//! The [`TransitionEngine`] owns the [`ModeManagerState`] and the last-fired
//! timestamp of every rule, keyed by the rule's declaration index.  It only
//! *decides*: a positive [`TransitionEngine::evaluate`] returns a
//! [`TransitionRequest`] which the runtime's transition handler performs
//! later and then acknowledges with [`TransitionEngine::commit`].
//!
//! All time inputs are explicit `now: Instant` arguments so evaluation is
//! deterministic under test.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use cortex_config::{SystemConfig, TransitionRule, TransitionType};
use cortex_types::CortexError;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::context::ContextStore;

/// Current mode and when it became active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeManagerState {
    pub current_mode: String,
    pub mode_start: Instant,
}

/// A decided, not yet performed, mode switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub from_mode: String,
    pub to_mode: String,
    pub trigger: TransitionType,
    /// Index of the rule that fired; `None` for a direct manual switch.
    pub rule_index: Option<usize>,
    pub reason: String,
}

struct RuleBook {
    rules: Vec<TransitionRule>,
    last_fired: Vec<Option<Instant>>,
    modes: HashSet<String>,
    mode_timeouts: HashMap<String, f64>,
    allow_manual: bool,
}

impl RuleBook {
    fn from_config(config: &SystemConfig) -> Self {
        Self {
            rules: config.transition_rules.clone(),
            last_fired: vec![None; config.transition_rules.len()],
            modes: config.modes.keys().cloned().collect(),
            mode_timeouts: config
                .modes
                .iter()
                .filter_map(|(name, mode)| mode.timeout_seconds.map(|t| (name.clone(), t)))
                .collect(),
            allow_manual: config.allow_manual_switching,
        }
    }

    fn past_cooldown(&self, index: usize, now: Instant) -> bool {
        match self.last_fired[index] {
            None => true,
            Some(last) => {
                now.saturating_duration_since(last).as_secs_f64()
                    >= self.rules[index].cooldown_seconds
            }
        }
    }
}

/// Evaluates transition rules against the current mode.
pub struct TransitionEngine {
    book: Mutex<RuleBook>,
    state: RwLock<ModeManagerState>,
}

impl TransitionEngine {
    /// Create an engine starting in `initial_mode` at `now`.
    pub fn new(config: &SystemConfig, initial_mode: &str, now: Instant) -> Self {
        Self {
            book: Mutex::new(RuleBook::from_config(config)),
            state: RwLock::new(ModeManagerState {
                current_mode: initial_mode.to_string(),
                mode_start: now,
            }),
        }
    }

    /// Snapshot of the mode state.
    pub fn state(&self) -> ModeManagerState {
        self.state.read().clone()
    }

    pub fn current_mode(&self) -> String {
        self.state.read().current_mode.clone()
    }

    /// When rule `index` last fired, if ever.
    pub fn last_fired(&self, index: usize) -> Option<Instant> {
        self.book.lock().last_fired.get(index).copied().flatten()
    }

    /// Decide whether a transition should happen this tick.
    ///
    /// Eligible rules leave the current mode (or `*`), are past their
    /// cooldown, target another mode and satisfy their type predicate.  The
    /// highest priority wins; ties go to the first declared rule.  The
    /// winner's last-fired timestamp is recorded immediately.
    pub fn evaluate(
        &self,
        input: &str,
        context: &ContextStore,
        now: Instant,
    ) -> Option<TransitionRequest> {
        let state = self.state();
        let lowered = input.to_lowercase();
        let mut book = self.book.lock();

        let mut winner: Option<usize> = None;
        for (index, rule) in book.rules.iter().enumerate() {
            if !rule.applies_from(&state.current_mode) || rule.to_mode == state.current_mode {
                continue;
            }
            if !book.past_cooldown(index, now) {
                debug!(rule = index, to = %rule.to_mode, "rule in cooldown");
                continue;
            }
            if !predicate_holds(rule, &lowered, context, &state, &book.mode_timeouts, now) {
                continue;
            }
            match winner {
                Some(best) if book.rules[best].priority >= rule.priority => {}
                _ => winner = Some(index),
            }
        }

        let index = winner?;
        book.last_fired[index] = Some(now);
        let rule = &book.rules[index];
        let request = TransitionRequest {
            from_mode: state.current_mode.clone(),
            to_mode: rule.to_mode.clone(),
            trigger: rule.transition_type,
            rule_index: Some(index),
            reason: describe(rule),
        };
        info!(
            from = %request.from_mode,
            to = %request.to_mode,
            rule = index,
            priority = rule.priority,
            reason = %request.reason,
            "transition rule fired"
        );
        Some(request)
    }

    /// Validate an explicit mode switch.
    ///
    /// A matching `manual` rule has its cooldown enforced and its firing
    /// recorded; without one the switch is allowed directly.
    pub fn request_transition(
        &self,
        target: &str,
        now: Instant,
    ) -> Result<TransitionRequest, CortexError> {
        let current = self.current_mode();
        let mut book = self.book.lock();

        if !book.allow_manual {
            return Err(CortexError::Transition(
                "manual mode switching is disabled".to_string(),
            ));
        }
        if !book.modes.contains(target) {
            return Err(CortexError::Transition(format!("unknown mode '{target}'")));
        }
        if target == current {
            return Err(CortexError::Transition(format!("already in mode '{target}'")));
        }

        let manual_rule = book.rules.iter().position(|r| {
            r.transition_type == TransitionType::Manual
                && r.to_mode == target
                && r.applies_from(&current)
        });

        if let Some(index) = manual_rule {
            if !book.past_cooldown(index, now) {
                return Err(CortexError::Transition(format!(
                    "manual rule to '{target}' is in cooldown"
                )));
            }
            book.last_fired[index] = Some(now);
        }

        info!(from = %current, to = %target, "manual transition requested");
        Ok(TransitionRequest {
            from_mode: current,
            to_mode: target.to_string(),
            trigger: TransitionType::Manual,
            rule_index: manual_rule,
            reason: "manual request".to_string(),
        })
    }

    /// Record that the runtime finished switching to `mode`.
    pub fn commit(&self, mode: &str, now: Instant) {
        let mut state = self.state.write();
        state.current_mode = mode.to_string();
        state.mode_start = now;
    }

    /// Rebuild the rule set from a freshly validated config.  A new rule
    /// identical to an old one inherits its last-fired timestamp.
    pub fn reload(&self, config: &SystemConfig) {
        let mut book = self.book.lock();
        let mut next = RuleBook::from_config(config);
        let mut taken = vec![false; book.rules.len()];
        for (new_index, rule) in next.rules.iter().enumerate() {
            let carried = book
                .rules
                .iter()
                .enumerate()
                .position(|(old_index, old)| !taken[old_index] && old == rule);
            if let Some(old_index) = carried {
                taken[old_index] = true;
                next.last_fired[new_index] = book.last_fired[old_index];
            }
        }
        info!(rules = next.rules.len(), "transition rules reloaded");
        *book = next;
    }
}

fn predicate_holds(
    rule: &TransitionRule,
    lowered_input: &str,
    context: &ContextStore,
    state: &ModeManagerState,
    mode_timeouts: &HashMap<String, f64>,
    now: Instant,
) -> bool {
    match rule.transition_type {
        TransitionType::InputTriggered => rule
            .trigger_keywords
            .iter()
            .filter(|k| !k.is_empty())
            .any(|k| lowered_input.contains(&k.to_lowercase())),
        TransitionType::TimeBased => {
            let timeout = rule
                .timeout_seconds
                .or_else(|| mode_timeouts.get(&state.current_mode).copied());
            match timeout {
                Some(limit) => {
                    now.saturating_duration_since(state.mode_start).as_secs_f64() >= limit
                }
                None => false,
            }
        }
        TransitionType::ContextAware => context.satisfies(&rule.context_conditions),
        TransitionType::Manual => false,
    }
}

fn describe(rule: &TransitionRule) -> String {
    match rule.transition_type {
        TransitionType::InputTriggered => {
            format!("keyword match ({})", rule.trigger_keywords.join(", "))
        }
        TransitionType::TimeBased => "mode timeout elapsed".to_string(),
        TransitionType::ContextAware => "context conditions met".to_string(),
        TransitionType::Manual => "manual request".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn config(rules: serde_json::Value) -> SystemConfig {
        cortex_config::loader::from_value_with(
            json!({
                "name": "guard",
                "default_mode": "calm",
                "modes": {
                    "calm": {"system_prompt_base": "calm"},
                    "alert": {"system_prompt_base": "alert", "timeout_seconds": 30.0},
                    "patrol": {"system_prompt_base": "patrol"}
                },
                "transition_rules": rules
            }),
            &|_| None,
        )
        .unwrap()
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn keyword_triggers_case_insensitively() {
        let cfg = config(json!([
            {"from_mode": "calm", "to_mode": "alert", "transition_type": "input_triggered",
             "trigger_keywords": ["Intruder"]}
        ]));
        let t0 = Instant::now();
        let engine = TransitionEngine::new(&cfg, "calm", t0);
        let ctx = ContextStore::new();
        assert!(engine.evaluate("all quiet", &ctx, t0).is_none());
        let req = engine.evaluate("INTRUDER at the door", &ctx, t0).unwrap();
        assert_eq!(req.to_mode, "alert");
        assert_eq!(req.rule_index, Some(0));
        assert_eq!(engine.last_fired(0), Some(t0));
    }

    #[test]
    fn cooldown_suppresses_refire() {
        let cfg = config(json!([
            {"from_mode": "*", "to_mode": "alert", "transition_type": "input_triggered",
             "trigger_keywords": ["intruder"], "cooldown_seconds": 60.0}
        ]));
        let t0 = Instant::now();
        let engine = TransitionEngine::new(&cfg, "calm", t0);
        let ctx = ContextStore::new();
        assert!(engine.evaluate("intruder", &ctx, t0).is_some());
        // Still in calm (swap not committed): the rule must stay silent.
        assert!(engine.evaluate("intruder", &ctx, t0 + secs(5)).is_none());
        assert!(engine.evaluate("intruder", &ctx, t0 + secs(60)).is_some());
    }

    #[test]
    fn highest_priority_wins() {
        let cfg = config(json!([
            {"from_mode": "calm", "to_mode": "patrol", "transition_type": "input_triggered",
             "trigger_keywords": ["noise"], "priority": 1},
            {"from_mode": "calm", "to_mode": "alert", "transition_type": "input_triggered",
             "trigger_keywords": ["noise"], "priority": 9}
        ]));
        let t0 = Instant::now();
        let engine = TransitionEngine::new(&cfg, "calm", t0);
        let req = engine.evaluate("a noise", &ContextStore::new(), t0).unwrap();
        assert_eq!(req.to_mode, "alert");
        assert_eq!(engine.last_fired(0), None);
    }

    #[test]
    fn equal_priority_picks_first_declared() {
        let cfg = config(json!([
            {"from_mode": "calm", "to_mode": "patrol", "transition_type": "input_triggered",
             "trigger_keywords": ["noise"], "priority": 3},
            {"from_mode": "*", "to_mode": "alert", "transition_type": "input_triggered",
             "trigger_keywords": ["noise"], "priority": 3}
        ]));
        for _ in 0..10 {
            let t0 = Instant::now();
            let engine = TransitionEngine::new(&cfg, "calm", t0);
            let req = engine.evaluate("noise", &ContextStore::new(), t0).unwrap();
            assert_eq!(req.to_mode, "patrol");
        }
    }

    #[test]
    fn rules_targeting_current_mode_are_ignored() {
        let cfg = config(json!([
            {"from_mode": "*", "to_mode": "calm", "transition_type": "input_triggered",
             "trigger_keywords": ["relax"]}
        ]));
        let t0 = Instant::now();
        let engine = TransitionEngine::new(&cfg, "calm", t0);
        assert!(engine.evaluate("relax", &ContextStore::new(), t0).is_none());
    }

    #[test]
    fn time_based_uses_rule_then_mode_timeout() {
        let cfg = config(json!([
            {"from_mode": "alert", "to_mode": "calm", "transition_type": "time_based"},
            {"from_mode": "patrol", "to_mode": "calm", "transition_type": "time_based",
             "timeout_seconds": 10.0},
            {"from_mode": "calm", "to_mode": "patrol", "transition_type": "time_based"}
        ]));
        let t0 = Instant::now();
        let ctx = ContextStore::new();

        let engine = TransitionEngine::new(&cfg, "alert", t0);
        assert!(engine.evaluate("", &ctx, t0 + secs(29)).is_none());
        let req = engine.evaluate("", &ctx, t0 + secs(30)).unwrap();
        assert_eq!(req.trigger, TransitionType::TimeBased);

        engine.commit("patrol", t0 + secs(30));
        assert!(engine.evaluate("", &ctx, t0 + secs(39)).is_none());
        assert!(engine.evaluate("", &ctx, t0 + secs(40)).is_some());

        // calm has no timeout and the rule declares none: never fires.
        engine.commit("calm", t0);
        assert!(engine.evaluate("", &ctx, t0 + secs(100_000)).is_none());
    }

    #[test]
    fn context_rules_follow_the_store() {
        let cfg = config(json!([
            {"from_mode": "calm", "to_mode": "alert", "transition_type": "context_aware",
             "context_conditions": {"battery": {"lt": 20}}},
            {"from_mode": "calm", "to_mode": "patrol", "transition_type": "context_aware"}
        ]));
        let t0 = Instant::now();
        let engine = TransitionEngine::new(&cfg, "calm", t0);
        let ctx = ContextStore::new();
        assert!(engine.evaluate("", &ctx, t0).is_none());
        ctx.set("battery", json!(12));
        assert_eq!(engine.evaluate("", &ctx, t0).unwrap().to_mode, "alert");
    }

    #[test]
    fn manual_rules_never_fire_automatically() {
        let cfg = config(json!([
            {"from_mode": "calm", "to_mode": "alert", "transition_type": "manual",
             "trigger_keywords": ["alert"]}
        ]));
        let t0 = Instant::now();
        let engine = TransitionEngine::new(&cfg, "calm", t0);
        assert!(engine.evaluate("alert", &ContextStore::new(), t0).is_none());
    }

    #[test]
    fn manual_request_validation() {
        let cfg = config(json!([
            {"from_mode": "calm", "to_mode": "alert", "transition_type": "manual",
             "cooldown_seconds": 10.0}
        ]));
        let t0 = Instant::now();
        let engine = TransitionEngine::new(&cfg, "calm", t0);

        assert!(engine.request_transition("nowhere", t0).is_err());
        assert!(engine.request_transition("calm", t0).is_err());

        let req = engine.request_transition("alert", t0).unwrap();
        assert_eq!(req.rule_index, Some(0));
        assert!(engine.request_transition("alert", t0 + secs(3)).is_err());
        assert!(engine.request_transition("alert", t0 + secs(10)).is_ok());

        // No manual rule towards patrol: allowed directly.
        let direct = engine.request_transition("patrol", t0).unwrap();
        assert_eq!(direct.rule_index, None);
    }

    #[test]
    fn manual_request_rejected_when_disabled() {
        let mut cfg = config(json!([]));
        cfg.allow_manual_switching = false;
        let engine = TransitionEngine::new(&cfg, "calm", Instant::now());
        assert!(matches!(
            engine.request_transition("alert", Instant::now()),
            Err(CortexError::Transition(_))
        ));
    }

    #[test]
    fn commit_resets_mode_start() {
        let cfg = config(json!([]));
        let t0 = Instant::now();
        let engine = TransitionEngine::new(&cfg, "calm", t0);
        engine.commit("alert", t0 + secs(7));
        let state = engine.state();
        assert_eq!(state.current_mode, "alert");
        assert_eq!(state.mode_start, t0 + secs(7));
    }

    #[test]
    fn reload_carries_cooldowns_for_identical_rules() {
        let rule = json!({"from_mode": "*", "to_mode": "alert", "transition_type": "input_triggered",
                          "trigger_keywords": ["intruder"], "cooldown_seconds": 60.0});
        let cfg = config(json!([rule.clone()]));
        let t0 = Instant::now();
        let engine = TransitionEngine::new(&cfg, "calm", t0);
        let ctx = ContextStore::new();
        assert!(engine.evaluate("intruder", &ctx, t0).is_some());

        let changed = json!({"from_mode": "calm", "to_mode": "patrol",
                             "transition_type": "input_triggered", "trigger_keywords": ["walk"]});
        engine.reload(&config(json!([changed, rule])));
        assert_eq!(engine.last_fired(0), None);
        assert_eq!(engine.last_fired(1), Some(t0));
        assert!(engine.evaluate("intruder", &ctx, t0 + secs(5)).is_none());
    }
}
