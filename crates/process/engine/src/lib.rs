//! Process Execution Engine
//!
//! Drives instances of declarative process definitions (graphs of tasks,
//! gateways and events) forward one token-driven step at a time, reacting
//! to elapsed timers and correlated messages, and persisting its full
//! runtime state as a versioned, checksum-validated snapshot.
//!
//! # Architecture
//!
//! The [`ProcessEngine`] composes specialized components:
//!
//! - [`DefinitionRegistry`] — Append-only store of versioned definitions
//! - [`StateMachine`] — Applies element semantics to an instance's tokens
//! - [`ConditionEvaluator`] — Evaluates flow conditions and correlation keys
//! - [`TimerScheduler`] — Pull-based timers for timer catch events
//! - [`SubscriptionRegistry`] — Outstanding message correlations
//! - [`snapshot`] — Encodes and decodes the full [`EngineState`]
//!
//! # Example
//!
//! ```rust
//! use process_engine::{EngineConfig, JobOutcome, ProcessEngine, VersionSelector};
//! use process_types::InstanceStatus;
//!
//! let engine = ProcessEngine::new(EngineConfig::default());
//!
//! let definition = br#"{
//!     "process_id": "order",
//!     "elements": [
//!         {"id": "start", "type": "start_event"},
//!         {"id": "charge", "type": "service_task", "task_type": "payment"},
//!         {"id": "end", "type": "end_event"}
//!     ],
//!     "flows": [
//!         {"id": "f1", "source": "start", "target": "charge"},
//!         {"id": "f2", "source": "charge", "target": "end"}
//!     ]
//! }"#;
//! engine.register_definition(definition, Some("order.json")).unwrap();
//!
//! engine.register_handler("payment", |job| {
//!     job.set_variable("charged", true);
//!     Ok(JobOutcome::Completed)
//! });
//!
//! let instance = engine
//!     .create_instance("order", VersionSelector::Latest, Default::default())
//!     .unwrap();
//! assert_eq!(instance.status, InstanceStatus::Completed);
//! ```

#![deny(unsafe_code)]

mod behavior;
pub mod clock;
pub mod condition;
pub mod config;
pub mod definition_registry;
pub mod error;
pub mod handler;
pub mod keys;
pub mod orchestrator;
pub mod snapshot;
pub mod state;
pub mod state_machine;
pub mod subscription_registry;
pub mod timer_scheduler;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use condition::ConditionEvaluator;
pub use config::{EngineConfig, VersionPolicy};
pub use definition_registry::{DefinitionRegistry, VersionSelector};
pub use error::{EngineError, EngineFault, EngineResult};
pub use handler::{HandlerRegistry, Job, JobOutcome, TaskFailure, TaskHandler};
pub use keys::KeyGenerator;
pub use orchestrator::{Delivery, ProcessEngine, RestoredEngine};
pub use snapshot::{Restored, RestoreCause, SnapshotError, UnmarshallingError};
pub use state::EngineState;
pub use state_machine::{StateMachine, StepResult, WaitRef, WaitRegistry};
pub use subscription_registry::SubscriptionRegistry;
pub use timer_scheduler::TimerScheduler;
