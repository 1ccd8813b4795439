//! Marshal and unmarshal of the whole engine state.

mod common;

use std::io::Read;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::TimeDelta;
use common::{engine, message_process, single_task, t0, timer_process, vars};
use flate2::read::DeflateDecoder;
use process_engine::{
    EngineConfig, EngineError, EngineFault, JobOutcome, ProcessEngine, RestoreCause,
    SnapshotError, StepResult, VersionSelector,
};
use process_types::{ElementId, InstanceKey, InstanceStatus, ProcessKey, TimerState};
use serde_json::{json, Map, Value};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// An engine with one instance parked at each kind of wait, plus one
/// finished instance
struct Populated {
    engine: ProcessEngine,
    timer: InstanceKey,
    message: InstanceKey,
    job: InstanceKey,
    done: InstanceKey,
}

fn populated() -> Populated {
    let (engine, _) = engine();
    engine
        .register_definition(&timer_process("reminder", "PT5S"), Some("reminder.json"))
        .unwrap();
    engine
        .register_definition(&message_process("payment", "orderPaid", "orderId"), None)
        .unwrap();
    engine
        .register_definition(&single_task("review", "manual"), None)
        .unwrap();
    engine
        .register_definition(&single_task("audit", "logger"), None)
        .unwrap();
    engine.register_handler("logger", |job| {
        job.set_variable("logged", true);
        Ok(JobOutcome::Completed)
    });

    let timer = engine
        .create_instance("reminder", VersionSelector::Latest, vars(json!({"attempt": 1})))
        .unwrap()
        .key;
    let message = engine
        .create_instance(
            "payment",
            VersionSelector::Latest,
            vars(json!({"orderId": "42", "lines": [1, 2, 3]})),
        )
        .unwrap()
        .key;
    let job = engine
        .create_instance("review", VersionSelector::Latest, Map::new())
        .unwrap()
        .key;
    let done = engine
        .create_instance("audit", VersionSelector::Latest, Map::new())
        .unwrap()
        .key;

    Populated {
        engine,
        timer,
        message,
        job,
        done,
    }
}

fn restore(bytes: &[u8]) -> process_engine::RestoredEngine {
    ProcessEngine::unmarshal(bytes, EngineConfig::default()).unwrap()
}

/// Rewrite a current snapshot as a version 1 document with plain-text payloads
fn downgrade(bytes: &[u8]) -> Value {
    let mut document: Value = serde_json::from_slice(bytes).unwrap();
    document["version"] = json!(1);
    for reference in document["processReferences"].as_array_mut().unwrap() {
        let packed = reference["data"].as_str().unwrap();
        let compressed = STANDARD.decode(packed).unwrap();
        let mut raw = String::new();
        DeflateDecoder::new(compressed.as_slice())
            .read_to_string(&mut raw)
            .unwrap();
        reference["data"] = Value::String(raw);
    }
    document
}

fn reference_index(document: &Value, process_id: &str) -> usize {
    document["processReferences"]
        .as_array()
        .unwrap()
        .iter()
        .position(|r| r["bpmnProcessId"] == process_id)
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn round_trip_preserves_state() {
    let original = populated();
    let bytes = original.engine.marshal().unwrap();
    let restored = restore(&bytes);
    assert!(restored.errors.is_empty());
    let engine = restored.engine;

    assert_eq!(engine.name(), "test-engine");

    let before = original.engine.definitions();
    let after = engine.definitions();
    assert_eq!(before.len(), after.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.process_key, new.process_key);
        assert_eq!(old.process_id, new.process_id);
        assert_eq!(old.version, new.version);
        assert_eq!(old.checksum, new.checksum);
        assert_eq!(old.raw, new.raw);
        assert_eq!(old.resource_name, new.resource_name);
    }

    let before = original.engine.instances();
    let after = engine.instances();
    assert_eq!(before.len(), 4);
    assert_eq!(before.len(), after.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.key, new.key);
        assert_eq!(old.process_key, new.process_key);
        assert_eq!(old.status, new.status);
        assert_eq!(old.variables, new.variables);
        assert_eq!(old.tokens, new.tokens);
        assert_eq!(old.created_at, new.created_at);
        assert_eq!(old.active_elements(), new.active_elements());
        assert!(new.is_linked());
    }

    assert_eq!(original.engine.timers(), engine.timers());
    assert_eq!(original.engine.subscriptions(), engine.subscriptions());

    let done = engine.find_instance(original.done).unwrap();
    assert_eq!(done.status, InstanceStatus::Completed);
    assert_eq!(done.variables.get("logged"), Some(&Value::Bool(true)));
}

#[test]
fn restored_engine_keeps_running() {
    let original = populated();
    let engine = restore(&original.engine.marshal().unwrap()).engine;

    let delivery = engine.deliver_timer_tick(t0() + TimeDelta::seconds(5));
    assert!(delivery.resumed.contains(&original.timer));
    assert_eq!(engine.timers()[0].state, TimerState::Triggered);

    let delivery = engine.publish_message("orderPaid", Some("42"));
    assert!(delivery.resumed.contains(&original.message));

    let result = engine
        .complete_job(original.job, "work", Map::new())
        .unwrap();
    assert_eq!(result, StepResult::Completed);

    for key in [original.timer, original.message, original.job] {
        assert_eq!(
            engine.find_instance(key).unwrap().status,
            InstanceStatus::Completed
        );
    }

    // New keys continue after every restored key
    let fresh = engine
        .create_instance("review", VersionSelector::Latest, Map::new())
        .unwrap();
    let highest = engine
        .definitions()
        .iter()
        .map(|d| d.process_key.0)
        .chain([original.timer.0, original.message.0, original.job.0, original.done.0])
        .max()
        .unwrap();
    assert!(fresh.key.0 > highest);
}

#[test]
fn restored_versions_follow_key_order() {
    let (engine, _) = engine();
    engine
        .register_definition(&single_task("order", "pack"), None)
        .unwrap();
    engine
        .register_new_version(&single_task("order", "ship"), None)
        .unwrap();
    let restored = restore(&engine.marshal().unwrap()).engine;

    let versions: Vec<u32> = restored.definitions().iter().map(|d| d.version).collect();
    assert_eq!(versions, vec![1, 2]);
}

#[test]
fn unsupported_version_is_rejected() {
    let original = populated();
    let mut document: Value = serde_json::from_slice(&original.engine.marshal().unwrap()).unwrap();
    document["version"] = json!(3);
    let bytes = serde_json::to_vec(&document).unwrap();

    assert!(matches!(
        ProcessEngine::unmarshal(&bytes, EngineConfig::default()),
        Err(SnapshotError::UnsupportedVersion {
            found: 3,
            supported: 2
        })
    ));
}

#[test]
fn garbage_is_malformed() {
    assert!(matches!(
        ProcessEngine::unmarshal(b"\x00\x01snapshot", EngineConfig::default()),
        Err(SnapshotError::Malformed(_))
    ));
}

#[test]
fn version_one_documents_are_readable() {
    let original = populated();
    let document = downgrade(&original.engine.marshal().unwrap());
    let restored = restore(&serde_json::to_vec(&document).unwrap());

    assert!(restored.errors.is_empty());
    assert_eq!(restored.engine.definitions().len(), 4);
    assert_eq!(restored.engine.instances().len(), 4);
}

#[test]
fn corrupted_definition_is_reported_and_skipped() {
    let original = populated();
    let reminder_key = original
        .engine
        .definitions()
        .iter()
        .find(|d| d.process_id == "reminder")
        .map(|d| d.process_key)
        .unwrap();

    let mut document = downgrade(&original.engine.marshal().unwrap());
    let index = reference_index(&document, "reminder");
    let data = document["processReferences"][index]["data"]
        .as_str()
        .unwrap()
        .replacen("PT5S", "PT6S", 1);
    document["processReferences"][index]["data"] = Value::String(data);

    let restored = restore(&serde_json::to_vec(&document).unwrap());
    let engine = &restored.engine;

    let checksum_errors: Vec<_> = restored
        .errors
        .iter()
        .filter(|e| matches!(e.cause, RestoreCause::ChecksumMismatch { .. }))
        .collect();
    assert_eq!(checksum_errors.len(), 1);
    assert!(matches!(
        checksum_errors[0].cause,
        RestoreCause::ChecksumMismatch { process_key, .. } if process_key == reminder_key
    ));
    assert!(restored.errors.iter().any(|e| matches!(
        e.cause,
        RestoreCause::DanglingInstanceReference { instance_key, .. }
            if instance_key == original.timer
    )));

    assert!(engine.find_process(reminder_key).is_none());
    assert_eq!(engine.definitions().len(), 3);

    let dangling = engine.find_instance(original.timer).unwrap();
    assert!(!dangling.is_linked());
    assert!(matches!(
        engine.run_instance(original.timer),
        Err(EngineError::Fault(EngineFault::UnlinkedDefinition(_)))
    ));

    assert!(engine.find_instance(original.message).unwrap().is_linked());
    assert!(engine.find_instance(original.job).unwrap().is_linked());
    assert!(engine.publish_message("orderPaid", Some("42")).failures.is_empty());
}

#[test]
fn corrupted_compressed_payload_is_a_checksum_mismatch() {
    let original = populated();
    let mut document: Value = serde_json::from_slice(&original.engine.marshal().unwrap()).unwrap();

    // One character changed inside the base64 text
    let reminder = reference_index(&document, "reminder");
    let data = document["processReferences"][reminder]["data"]
        .as_str()
        .unwrap()
        .to_string();
    let middle = data.len() / 2;
    let replacement = if &data[middle..middle + 1] == "A" { "B" } else { "A" };
    let flipped = format!("{}{}{}", &data[..middle], replacement, &data[middle + 1..]);
    document["processReferences"][reminder]["data"] = Value::String(flipped);

    // Not base64 at all
    let review = reference_index(&document, "review");
    document["processReferences"][review]["data"] = json!("%%% not base64 %%%");

    let restored = restore(&serde_json::to_vec(&document).unwrap());
    let skipped: Vec<ProcessKey> = restored
        .errors
        .iter()
        .filter_map(|e| match &e.cause {
            RestoreCause::ChecksumMismatch { process_key, .. } => Some(*process_key),
            _ => None,
        })
        .collect();

    let key_of = |process_id: &str| {
        original
            .engine
            .definitions()
            .iter()
            .find(|d| d.process_id == process_id)
            .map(|d| d.process_key)
            .unwrap()
    };
    assert_eq!(skipped, vec![key_of("reminder"), key_of("review")]);
    assert!(restored
        .errors
        .iter()
        .all(|e| !matches!(e.cause, RestoreCause::DefinitionLoad { .. })));
    assert_eq!(restored.engine.definitions().len(), 2);
    assert!(restored.engine.find_process(key_of("payment")).is_some());
    assert!(restored.engine.find_process(key_of("audit")).is_some());
}

#[test]
fn skipped_definition_keeps_later_version_numbers() {
    let (engine, _) = engine();
    let first = engine
        .register_definition(&single_task("order", "pack"), None)
        .unwrap();
    let second = engine
        .register_new_version(&single_task("order", "ship"), None)
        .unwrap();
    assert_eq!(second.version, 2);

    let mut document: Value = serde_json::from_slice(&engine.marshal().unwrap()).unwrap();
    let index = document["processReferences"]
        .as_array()
        .unwrap()
        .iter()
        .position(|r| r["processKey"] == json!(first.process_key.0))
        .unwrap();
    document["processReferences"][index]["checksumHex"] = json!("0".repeat(64));

    let restored = restore(&serde_json::to_vec(&document).unwrap());
    assert_eq!(restored.errors.len(), 1);
    let engine = restored.engine;

    let versions: Vec<u32> = engine.definitions().iter().map(|d| d.version).collect();
    assert_eq!(versions, vec![2]);
    let instance = engine
        .create_instance("order", VersionSelector::Version(2), Map::new())
        .unwrap();
    assert_eq!(instance.process_key, second.process_key);
    assert!(engine
        .create_instance("order", VersionSelector::Version(1), Map::new())
        .is_err());

    let third = engine
        .register_new_version(&single_task("order", "deliver"), None)
        .unwrap();
    assert_eq!(third.version, 3);
    assert!(third.process_key.0 > second.process_key.0);
    assert!(third.process_key.0 > instance.key.0);
}

#[test]
fn float_variables_survive_exactly() {
    let (engine, _) = engine();
    engine
        .register_definition(&single_task("review", "manual"), None)
        .unwrap();
    let variables = vars(json!({
        "tiny": 1.0715660391465826e-75,
        "tenth": 0.1,
        "third": 1.0 / 3.0,
        "max": f64::MAX,
        "min": f64::MIN_POSITIVE,
        "negative": -2.5e-300
    }));
    let key = engine
        .create_instance("review", VersionSelector::Latest, variables.clone())
        .unwrap()
        .key;

    let restored = restore(&engine.marshal().unwrap());
    assert!(restored.errors.is_empty());
    let instance = restored.engine.find_instance(key).unwrap();
    assert_eq!(instance.variables, engine.find_instance(key).unwrap().variables);
    for (name, value) in &variables {
        assert_eq!(
            instance.variables.get(name).and_then(Value::as_f64),
            value.as_f64(),
            "{name}"
        );
    }
}

#[test]
fn instance_of_missing_definition_is_dangling() {
    let document = json!({
        "version": 2,
        "name": "orphans",
        "processInstances": [{
            "instanceKey": 7,
            "processKey": 3,
            "status": "ACTIVE",
            "variables": {"a": 1},
            "tokens": [{"elementId": "work", "state": "WAITING_JOB"}],
            "createdAt": "2024-03-01T09:00:00Z"
        }]
    });
    let restored = restore(&serde_json::to_vec(&document).unwrap());

    assert_eq!(restored.errors.len(), 1);
    assert!(matches!(
        restored.errors[0].cause,
        RestoreCause::DanglingInstanceReference {
            instance_key: InstanceKey(7),
            process_key: ProcessKey(3)
        }
    ));

    let engine = restored.engine;
    assert_eq!(engine.name(), "orphans");
    let instance = engine.find_instance(InstanceKey(7)).unwrap();
    assert_eq!(instance.variables.get("a"), Some(&json!(1)));
    assert_eq!(instance.active_elements(), vec![ElementId::new("work")]);
}
