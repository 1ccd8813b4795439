//! Shared helpers for the engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use process_engine::{EngineConfig, ManualClock, ProcessEngine};
use serde_json::{json, Map, Value};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

/// An engine on a manual clock starting at [`t0`]
pub fn engine() -> (ProcessEngine, Arc<ManualClock>) {
    init_tracing();
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = ProcessEngine::new(EngineConfig::named("test-engine")).with_clock(clock.clone());
    (engine, clock)
}

/// Definition bytes from element and flow lists
pub fn definition(process_id: &str, elements: Value, flows: Value) -> Vec<u8> {
    serde_json::to_vec_pretty(&json!({
        "process_id": process_id,
        "elements": elements,
        "flows": flows,
    }))
    .unwrap()
}

pub fn vars(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

/// Start → task → end, where the task has the given type
pub fn single_task(process_id: &str, task_type: &str) -> Vec<u8> {
    definition(
        process_id,
        json!([
            {"id": "start", "type": "start_event"},
            {"id": "work", "type": "service_task", "task_type": task_type},
            {"id": "end", "type": "end_event"}
        ]),
        json!([
            {"id": "f1", "source": "start", "target": "work"},
            {"id": "f2", "source": "work", "target": "end"}
        ]),
    )
}

/// Start → timer(duration) → end
pub fn timer_process(process_id: &str, duration: &str) -> Vec<u8> {
    definition(
        process_id,
        json!([
            {"id": "start", "type": "start_event"},
            {"id": "wait", "type": "timer_catch_event", "duration": duration},
            {"id": "end", "type": "end_event"}
        ]),
        json!([
            {"id": "f1", "source": "start", "target": "wait"},
            {"id": "f2", "source": "wait", "target": "end"}
        ]),
    )
}

/// Start → message(name, correlation expression) → end
pub fn message_process(process_id: &str, message_name: &str, correlation: &str) -> Vec<u8> {
    definition(
        process_id,
        json!([
            {"id": "start", "type": "start_event"},
            {"id": "paid", "type": "message_catch_event",
             "message_name": message_name, "correlation_key": correlation},
            {"id": "end", "type": "end_event"}
        ]),
        json!([
            {"id": "f1", "source": "start", "target": "paid"},
            {"id": "f2", "source": "paid", "target": "end"}
        ]),
    )
}
