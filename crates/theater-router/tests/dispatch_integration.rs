//! Integration tests for the dispatch pipeline.
//!
//! These exercise the public surface of theater-router end-to-end:
//! `DispatchEngine` + `Registry` + `TomlRuleFile` with in-process recording
//! destinations standing in for real devices.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use theater_core::{EnumType, Envelope, Rule, Value, ValueCodecRegistry, ValueType};
use theater_router::application::dispatch::{DispatchEngine, EngineConfig, StatusEvent};
use theater_router::application::registry::{Controllers, Destination};
use theater_router::infrastructure::storage::rules_file::TomlRuleFile;
use tokio::sync::mpsc::UnboundedReceiver;

const WAIT: Duration = Duration::from_secs(5);

// ── Test doubles ──────────────────────────────────────────────────────────────

/// Destination that records `(action, args)` for every call it receives.
struct RecordingDestination {
    name: &'static str,
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingDestination {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Destination for RecordingDestination {
    fn name(&self) -> &str {
        self.name
    }

    fn actions(&self) -> BTreeMap<String, ValueType> {
        BTreeMap::from([
            ("Dim".to_string(), ValueType::Integer),
            ("Lower".to_string(), ValueType::Bool),
        ])
    }

    async fn route_action(&self, action: &str, args: &Value) -> Result<String, String> {
        self.calls
            .lock()
            .unwrap()
            .push((action.to_string(), args.clone()));
        Ok(format!("{}: {action}({args})", self.name))
    }
}

fn power(member: &str) -> Value {
    Value::enum_member("PowerStatus", member)
}

async fn next_status(rx: &mut UnboundedReceiver<StatusEvent>) -> StatusEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("status event within timeout")
        .expect("status channel open")
}

fn temp_file(label: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("theater_dispatch_it_{label}_{}", std::process::id()))
        .join("rules.toml")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_avr_power_on_dims_lighting() {
    // Arrange
    let (engine, mut status) = DispatchEngine::new(EngineConfig::default());
    let lighting = RecordingDestination::new("Lighting");
    engine.bind_registry(&Controllers::new().with_destination(lighting.clone()));
    engine.add_rule(Rule::new("AVR", power("On"), "Lighting", "Dim", Value::Integer(20)));
    engine.start().unwrap();

    // Act
    engine.publish(Envelope::new("AVR", power("On")).unwrap());
    let event = next_status(&mut status).await;
    engine.stop();

    // Assert
    assert_eq!(lighting.calls(), vec![("Dim".to_string(), Value::Integer(20))]);
    assert_eq!(event.to_string(), "Lighting: Dim(20)");
}

#[tokio::test]
async fn test_one_event_fires_every_matching_rule_in_order() {
    // Arrange
    let (engine, mut status) = DispatchEngine::new(EngineConfig::default());
    let lighting = RecordingDestination::new("Lighting");
    let screen = RecordingDestination::new("Screen");
    engine.bind_registry(
        &Controllers::new()
            .with_destination(lighting.clone())
            .with_destination(screen.clone()),
    );
    engine.set_rules(vec![
        Rule::new("Projector", power("On"), "Lighting", "Dim", Value::Integer(0)),
        Rule::new("Projector", power("On"), "Screen", "Lower", Value::Bool(true)),
        Rule::new("Projector", power("Off"), "Screen", "Lower", Value::Bool(false)),
    ]);
    engine.start().unwrap();

    // Act
    engine.publish(Envelope::new("Projector", power("On")).unwrap());
    let first = next_status(&mut status).await;
    let second = next_status(&mut status).await;
    engine.stop();

    // Assert
    assert_eq!(first.to_string(), "Lighting: Dim(0)");
    assert_eq!(second.to_string(), "Screen: Lower(true)");
    assert_eq!(lighting.calls().len(), 1);
    assert_eq!(screen.calls(), vec![("Lower".to_string(), Value::Bool(true))]);
}

#[tokio::test]
async fn test_envelopes_are_dispatched_in_publish_order() {
    let (engine, mut status) = DispatchEngine::new(EngineConfig::default());
    let lighting = RecordingDestination::new("Lighting");
    engine.bind_registry(&Controllers::new().with_destination(lighting.clone()));
    let levels: Vec<i64> = (0..20).collect();
    engine.set_rules(
        levels
            .iter()
            .map(|&n| Rule::new("Dial", Value::Integer(n), "Lighting", "Dim", Value::Integer(n)))
            .collect(),
    );

    // Publish from another thread before the worker exists.
    let publisher = engine.publisher();
    std::thread::spawn(move || {
        for n in 0..20 {
            publisher.publish(Envelope::new("Dial", Value::Integer(n)).unwrap());
        }
    })
    .join()
    .unwrap();
    engine.start().unwrap();

    for _ in &levels {
        next_status(&mut status).await;
    }
    engine.stop();

    let seen: Vec<i64> = lighting
        .calls()
        .into_iter()
        .filter_map(|(_, args)| args.as_integer())
        .collect();
    assert_eq!(seen, levels);
}

#[tokio::test]
async fn test_disabled_rule_never_fires() {
    let (engine, mut status) = DispatchEngine::new(EngineConfig::default());
    let lighting = RecordingDestination::new("Lighting");
    let screen = RecordingDestination::new("Screen");
    engine.bind_registry(
        &Controllers::new()
            .with_destination(lighting.clone())
            .with_destination(screen.clone()),
    );
    engine.set_rules(vec![
        Rule::new("AVR", power("On"), "Screen", "Lower", Value::Bool(true)).disabled(),
        Rule::new("AVR", power("On"), "Lighting", "Dim", Value::Integer(5)),
    ]);
    engine.start().unwrap();

    engine.publish(Envelope::new("AVR", power("On")).unwrap());
    let event = next_status(&mut status).await;
    engine.stop();

    assert_eq!(event.to_string(), "Lighting: Dim(5)");
    assert!(screen.calls().is_empty());
}

#[tokio::test]
async fn test_rules_saved_to_file_load_into_a_fresh_engine() {
    // Arrange
    let path = temp_file("reload");
    let mut codecs = ValueCodecRegistry::new();
    codecs.register_enum(EnumType::new("PowerStatus", ["On", "Off"]));
    let store = TomlRuleFile::new(&path, codecs);

    let (first, _status) = DispatchEngine::new(EngineConfig::default());
    first.set_rules(vec![
        Rule::new("AVR", power("On"), "Lighting", "Dim", Value::Integer(20)),
        Rule::new("AVR", Value::Decimal(-12.5), "Lighting", "Dim", Value::Integer(40)),
        Rule::new("AVR", Value::from("Tuner"), "Lighting", "Dim", Value::Integer(60)).disabled(),
    ]);

    // Act
    let written = first.save_rules(&store).expect("save");
    let (second, _status) = DispatchEngine::new(EngineConfig::default());
    let loaded = second.load_rules(&store);

    // Assert
    assert_eq!(written, 3);
    assert_eq!(*loaded, *first.rules());

    if let Some(dir) = path.parent() {
        std::fs::remove_dir_all(dir).ok();
    }
}

#[tokio::test]
async fn test_malformed_rule_file_loads_empty_and_is_reported() {
    let path = temp_file("malformed");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "this is = = not toml").unwrap();
    let store = TomlRuleFile::new(&path, ValueCodecRegistry::new());

    let (engine, mut status) = DispatchEngine::new(EngineConfig::default());
    engine.add_rule(Rule::new("AVR", power("On"), "Lighting", "Dim", Value::Integer(1)));
    let loaded = engine.load_rules(&store);
    let event = next_status(&mut status).await;

    assert!(loaded.is_empty());
    assert!(engine.rules().is_empty());
    assert!(matches!(event, StatusEvent::RuleFile(_)));

    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}
