//! Full runtime scenarios: a calm/alert guard robot driven through ticks,
//! manual switches, cooldowns, hooks and hot reload.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cortex_config::from_value;
use cortex_orchestrator::Connector;
use cortex_runtime::{ComponentRegistry, Cortex, CortexEvent, EventPayload, EventSubscriber, Llm};
use cortex_transition::ModeMemory;
use cortex_types::{Action, ChatMessage, DispatchError};
use parking_lot::Mutex;
use serde_json::{Value, json};

/// Answers every prompt with one `speak` action and remembers the prompts.
struct Scripted {
    prompts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Llm for Scripted {
    async fn ask(&self, prompt: &str, _history: &[ChatMessage]) -> Option<Vec<Action>> {
        self.prompts.lock().push(prompt.to_string());
        Some(vec![Action::new("speak", "on it")])
    }
}

struct Recording {
    seen: Arc<Mutex<Vec<Action>>>,
}

#[async_trait]
impl Connector for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    async fn connect(&self, action: &Action) -> Result<(), DispatchError> {
        self.seen.lock().push(action.clone());
        Ok(())
    }
}

#[derive(Default, Clone)]
struct Probes {
    prompts: Arc<Mutex<Vec<String>>>,
    seen: Arc<Mutex<Vec<Action>>>,
}

fn registry(probes: &Probes) -> ComponentRegistry {
    let mut registry = ComponentRegistry::builtin();
    let prompts = probes.prompts.clone();
    registry.register_llm("scripted", move |_, _| {
        Ok(Arc::new(Scripted {
            prompts: prompts.clone(),
        }))
    });
    let seen = probes.seen.clone();
    registry.register_connector("recording", move |_, _| {
        Ok(Arc::new(Recording { seen: seen.clone() }))
    });
    registry
}

fn guard() -> Value {
    json!({
        "version": "1.0",
        "name": "guard",
        "default_mode": "calm",
        "mode_memory_enabled": false,
        "system_governance": "Never harm a human.",
        "cortex_llm": {"type": "scripted"},
        "global_lifecycle_hooks": [
            {"hook_type": "on_entry", "handler_type": "message",
             "handler_config": {"message": "entered", "context_key": "last_hook"}}
        ],
        "modes": {
            "calm": {
                "display_name": "Calm",
                "system_prompt_base": "You patrol quietly.",
                "hertz": 10.0,
                "agent_actions": [{"name": "speak", "connector": "recording"}]
            },
            "alert": {
                "display_name": "Alert",
                "system_prompt_base": "You raise the alarm.",
                "hertz": 10.0,
                "agent_actions": [{"name": "speak", "connector": "recording"}],
                "lifecycle_hooks": [
                    {"hook_type": "on_exit", "handler_type": "message",
                     "handler_config": {"message": "left alert", "context_key": "last_hook"}}
                ]
            }
        },
        "transition_rules": [
            {"from_mode": "calm", "to_mode": "alert", "transition_type": "input_triggered",
             "trigger_keywords": ["help"], "cooldown_seconds": 60.0}
        ]
    })
}

async fn next_mode_change(events: &mut EventSubscriber) -> CortexEvent {
    tokio::time::timeout(
        Duration::from_secs(2),
        events.recv_matching(|p| matches!(p, EventPayload::ModeChanged { .. })),
    )
    .await
    .expect("mode change in time")
    .expect("event bus open")
}

#[tokio::test]
async fn keyword_escalates_then_cooldown_holds() {
    let probes = Probes::default();
    let cortex = Cortex::builder(from_value(guard()).unwrap())
        .registry(registry(&probes))
        .build();
    cortex.initialize().await.unwrap();
    assert_eq!(cortex.context().get("last_hook"), Some(json!("entered")));
    let mut events = cortex.subscribe();

    cortex.inputs().add_input("microphone", "Somebody HELP me");
    let report = cortex.tick().await.unwrap();
    assert_eq!(report.mode, "calm");
    assert_eq!(report.actions, Some(vec![Action::new("speak", "on it")]));
    assert_eq!(report.dispatch.as_ref().map(|d| d.succeeded.len()), Some(1));
    assert!(report.transition.is_some());

    let changed = next_mode_change(&mut events).await;
    assert!(matches!(
        changed.payload,
        EventPayload::ModeChanged { ref from, ref to, .. } if from == "calm" && to == "alert"
    ));
    assert_eq!(cortex.current_mode(), "alert");

    let prompt = probes.prompts.lock()[0].clone();
    assert!(prompt.contains("You patrol quietly."));
    assert!(prompt.contains("Never harm a human."));
    assert!(prompt.contains("microphone: Somebody HELP me"));

    cortex.request_transition("calm").await.unwrap();
    assert_eq!(cortex.current_mode(), "calm");
    assert_eq!(cortex.context().get("last_hook"), Some(json!("entered")));

    cortex.inputs().add_input("microphone", "help again");
    let report = cortex.tick().await.unwrap();
    assert!(report.transition.is_none());
    assert_eq!(cortex.current_mode(), "calm");
    assert_eq!(probes.seen.lock().len(), 2);

    cortex.shutdown().await;
}

#[tokio::test]
async fn inputs_from_an_earlier_tick_do_not_trigger() {
    let probes = Probes::default();
    let cortex = Cortex::builder(from_value(guard()).unwrap())
        .registry(registry(&probes))
        .build();
    cortex.initialize().await.unwrap();

    cortex.inputs().add_input("microphone", "help");
    cortex.inputs().increment_tick();
    let report = cortex.tick().await.unwrap();
    assert!(report.transition.is_none());
    assert!(probes.prompts.lock()[0].contains("(none)"));
    cortex.shutdown().await;
}

#[tokio::test]
async fn sensors_feed_the_tick() {
    let probes = Probes::default();
    let mut doc = guard();
    doc["modes"]["calm"]["agent_inputs"] = json!([
        {"type": "static_text", "config": {"name": "door", "text": "open", "once": true}}
    ]);
    let cortex = Cortex::builder(from_value(doc).unwrap())
        .registry(registry(&probes))
        .build();
    cortex.initialize().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    cortex.tick().await.unwrap();
    assert!(probes.prompts.lock()[0].contains("door: open"));
    cortex.shutdown().await;
}

#[tokio::test]
async fn mode_memory_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let memory = ModeMemory::for_config(dir.path(), "guard");
    let mut doc = guard();
    doc["mode_memory_enabled"] = json!(true);

    let probes = Probes::default();
    let first = Cortex::builder(from_value(doc.clone()).unwrap())
        .registry(registry(&probes))
        .mode_memory(memory.clone())
        .build();
    first.initialize().await.unwrap();
    first.request_transition("alert").await.unwrap();
    first.shutdown().await;

    let second = Cortex::builder(from_value(doc).unwrap())
        .registry(registry(&probes))
        .mode_memory(memory)
        .build();
    second.initialize().await.unwrap();
    assert_eq!(second.current_mode(), "alert");
    assert_eq!(second.tick().await.unwrap().mode, "alert");
    second.shutdown().await;
}

#[tokio::test]
async fn hot_reload_applies_valid_files_and_ignores_broken_ones() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("guard.json");
    std::fs::write(&path, guard().to_string()).unwrap();

    let probes = Probes::default();
    let config = cortex_config::load_from_path(&path).unwrap();
    let cortex = Cortex::builder(config).registry(registry(&probes)).build();
    cortex.initialize().await.unwrap();
    let mut events = cortex.subscribe();
    cortex.watch_config(&path, Duration::from_millis(20));

    let mut next = guard();
    next["version"] = json!("1.1");
    next["modes"]["calm"]["system_prompt_base"] = json!("You patrol loudly.");
    std::fs::write(&path, next.to_string()).unwrap();

    let reloaded = tokio::time::timeout(
        Duration::from_secs(2),
        events.recv_matching(|p| matches!(p, EventPayload::ConfigReloaded { .. })),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(matches!(reloaded.payload, EventPayload::ConfigReloaded { ref version } if version == "1.1"));
    assert_eq!(cortex.current_mode(), "calm");

    cortex.tick().await.unwrap();
    assert!(probes.prompts.lock().last().unwrap().contains("You patrol loudly."));

    std::fs::write(&path, "{ not json").unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(cortex.config().version, "1.1");
    cortex.tick().await.unwrap();
    assert!(probes.prompts.lock().last().unwrap().contains("You patrol loudly."));

    cortex.shutdown().await;
}
