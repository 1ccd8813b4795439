//! Process engine: the main entry point
//!
//! The engine owns the definition registry, the instances, the timer
//! scheduler and the subscription registry. It:
//! 1. Registers versioned process definitions
//! 2. Creates instances and drives them until they wait or end
//! 3. Delivers timer ticks and message publications to waiting instances
//! 4. Snapshots and restores its whole state
//!
//! Each instance sits behind its own mutex, so one instance is only ever
//! stepped by one caller while different instances progress in parallel.
//! Locks are always taken instance first, then timers or subscriptions.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use process_types::{
    Checksum, DefinitionParser, ElementId, InstanceKey, JsonDefinitionParser, MessageSubscription,
    ProcessDefinition, ProcessInstance, ProcessKey, SubscriptionKey, Timer, TimerKey,
    ValidationError,
};
use serde_json::{Map, Value};

use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, VersionPolicy};
use crate::definition_registry::{DefinitionRegistry, VersionSelector};
use crate::error::{EngineError, EngineResult};
use crate::handler::{HandlerRegistry, Job, JobOutcome, TaskFailure, TaskHandler};
use crate::keys::KeyGenerator;
use crate::snapshot::{self, SnapshotError, UnmarshallingError};
use crate::state::EngineState;
use crate::state_machine::{StateMachine, StepResult, WaitRef, WaitRegistry};
use crate::subscription_registry::SubscriptionRegistry;
use crate::timer_scheduler::TimerScheduler;

type InstanceCell = Arc<Mutex<ProcessInstance>>;

/// What a trigger delivery did
#[derive(Debug, Default)]
pub struct Delivery {
    /// Instances that had a token waiting for the trigger
    pub resumed: BTreeSet<InstanceKey>,
    /// Errors raised while driving resumed instances
    pub failures: Vec<EngineError>,
}

impl Delivery {
    pub fn is_empty(&self) -> bool {
        self.resumed.is_empty() && self.failures.is_empty()
    }
}

/// An engine rebuilt from a snapshot, with the problems met on the way
#[derive(Debug)]
pub struct RestoredEngine {
    pub engine: ProcessEngine,
    pub errors: Vec<UnmarshallingError>,
}

/// The process engine
pub struct ProcessEngine {
    config: EngineConfig,
    keys: Arc<KeyGenerator>,
    clock: Arc<dyn Clock>,
    parser: Arc<dyn DefinitionParser>,
    definitions: RwLock<DefinitionRegistry>,
    instances: DashMap<InstanceKey, InstanceCell>,
    timers: Mutex<TimerScheduler>,
    subscriptions: Mutex<SubscriptionRegistry>,
    handlers: HandlerRegistry,
    state_machine: StateMachine,
}

impl ProcessEngine {
    /// Create an empty engine
    pub fn new(config: EngineConfig) -> Self {
        Self::from_state(EngineState::new(config.name.clone()), config)
    }

    /// Use a different time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different definition parser
    pub fn with_parser(mut self, parser: Arc<dyn DefinitionParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Definition Management ────────────────────────────────────────

    /// Register a process definition.
    ///
    /// Registering identical bytes again returns the existing definition.
    /// Different content under a known process ID follows the configured
    /// [`VersionPolicy`].
    pub fn register_definition(
        &self,
        raw: &[u8],
        resource_name: Option<&str>,
    ) -> EngineResult<Arc<ProcessDefinition>> {
        self.register(raw, resource_name, self.config.version_policy)
    }

    /// Register changed content as the next version of its process
    pub fn register_new_version(
        &self,
        raw: &[u8],
        resource_name: Option<&str>,
    ) -> EngineResult<Arc<ProcessDefinition>> {
        self.register(raw, resource_name, VersionPolicy::AutoIncrement)
    }

    fn register(
        &self,
        raw: &[u8],
        resource_name: Option<&str>,
        policy: VersionPolicy,
    ) -> EngineResult<Arc<ProcessDefinition>> {
        let graph = self.parser.parse(raw)?;
        let checksum = Checksum::of(raw);

        let mut definitions = self.definitions.write();
        if let Some(existing) = definitions.find_by_checksum(&graph.process_id, &checksum) {
            tracing::debug!(
                process_key = %existing.process_key,
                process_id = %existing.process_id,
                "Process definition already registered"
            );
            return Ok(existing.clone());
        }

        if policy == VersionPolicy::Strict && definitions.latest(&graph.process_id).is_some() {
            return Err(ValidationError::VersionConflict {
                process_id: graph.process_id,
            }
            .into());
        }

        let version = definitions.next_version(&graph.process_id);
        let definition = Arc::new(ProcessDefinition::new(
            ProcessKey(self.keys.next()),
            version,
            raw.to_vec(),
            resource_name.map(str::to_string),
            graph,
        ));
        definitions.insert(definition.clone());
        Ok(definition)
    }

    /// Get a definition by version key
    pub fn find_process(&self, key: ProcessKey) -> Option<Arc<ProcessDefinition>> {
        self.definitions.read().get(key).ok().cloned()
    }

    /// All definitions in key order
    pub fn definitions(&self) -> Vec<Arc<ProcessDefinition>> {
        self.definitions.read().list().into_iter().cloned().collect()
    }

    // ── Task Handlers ────────────────────────────────────────────────

    /// Register a closure as the handler for a task type or element ID
    pub fn register_handler<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&mut Job<'_>) -> Result<JobOutcome, TaskFailure> + Send + Sync + 'static,
    {
        self.handlers.register(name, Arc::new(handler));
    }

    /// Register a handler object for a task type or element ID
    pub fn register_task_handler(&self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.register(name, handler);
    }

    // ── Instance Lifecycle ───────────────────────────────────────────

    /// Create an instance and drive it until it waits, fails or completes.
    ///
    /// Returns a copy of the instance as it stands afterwards. If a task
    /// fails on the way the instance stays registered as FAILED and the
    /// error is returned.
    pub fn create_instance(
        &self,
        process_id: &str,
        selector: VersionSelector,
        variables: Map<String, Value>,
    ) -> EngineResult<ProcessInstance> {
        let definition = self
            .definitions
            .read()
            .select(process_id, selector)?
            .clone();

        let key = InstanceKey(self.keys.next());
        let mut instance =
            ProcessInstance::new(key, definition.clone(), variables.into(), self.clock.now());
        self.state_machine.initialize(&mut instance)?;

        tracing::info!(
            instance_key = %key,
            process_id = %definition.process_id,
            process_key = %definition.process_key,
            version = definition.version,
            "Process instance created"
        );

        let cell = Arc::new(Mutex::new(instance));
        let mut instance = cell.lock();
        self.instances.insert(key, cell.clone());

        self.drive(&mut instance)?;
        Ok(instance.clone())
    }

    /// A copy of an instance
    pub fn find_instance(&self, key: InstanceKey) -> Option<ProcessInstance> {
        let cell = self.cell(key).ok()?;
        let instance = cell.lock();
        Some(instance.clone())
    }

    /// Copies of all instances, in key order
    pub fn instances(&self) -> Vec<ProcessInstance> {
        self.cells()
            .into_iter()
            .map(|(_, cell)| {
                let instance = cell.lock();
                instance.clone()
            })
            .collect()
    }

    /// Run a single step of an instance
    pub fn step_instance(&self, key: InstanceKey) -> EngineResult<StepResult> {
        let cell = self.cell(key)?;
        let mut instance = cell.lock();
        let mut waits = self.waits();
        self.state_machine
            .step(&mut instance, &self.handlers, &mut waits, self.clock.now())
    }

    /// Step an instance until it waits, fails or completes
    pub fn run_instance(&self, key: InstanceKey) -> EngineResult<StepResult> {
        let cell = self.cell(key)?;
        let mut instance = cell.lock();
        self.drive(&mut instance)
    }

    /// Put a FAILED instance back to ACTIVE and re-run the failed element
    pub fn retry_instance(&self, key: InstanceKey) -> EngineResult<StepResult> {
        let cell = self.cell(key)?;
        let mut instance = cell.lock();
        if instance.status != process_types::InstanceStatus::Failed {
            return Err(ValidationError::NotFailed(key).into());
        }

        instance.reactivate();
        tracing::info!(instance_key = %key, "Process instance retried");
        self.drive(&mut instance)
    }

    /// Complete a task that is waiting for external work.
    ///
    /// `variables` are merged into the instance scope before the token
    /// moves on.
    pub fn complete_job(
        &self,
        key: InstanceKey,
        element_id: &str,
        variables: Map<String, Value>,
    ) -> EngineResult<StepResult> {
        let element_id = ElementId::new(element_id);
        let cell = self.cell(key)?;
        let mut instance = cell.lock();
        if !instance.is_active() || instance.job_token(&element_id).is_none() {
            return Err(ValidationError::NotWaiting {
                instance_key: key,
                element_id,
            }
            .into());
        }

        instance.variables.merge(variables);
        let mut waits = self.waits();
        self.state_machine
            .resume(&mut instance, &WaitRef::Job(element_id.clone()), &mut waits);

        tracing::debug!(instance_key = %key, element_id = %element_id, "Job completed");
        self.drive(&mut instance)
    }

    /// Stop an instance for good; its timers and subscriptions are dropped
    pub fn terminate_instance(&self, key: InstanceKey) -> EngineResult<()> {
        let cell = self.cell(key)?;
        let mut instance = cell.lock();
        if instance.is_terminal() {
            return Ok(());
        }

        let cancelled = self.timers.lock().cancel_instance(key);
        let withdrawn = self.subscriptions.lock().withdraw_instance(key);
        instance.terminate();

        tracing::info!(
            instance_key = %key,
            cancelled_timers = cancelled,
            withdrawn_subscriptions = withdrawn,
            "Process instance terminated"
        );
        Ok(())
    }

    // ── Triggers ─────────────────────────────────────────────────────

    /// Fire every timer due at `now` and drive the instances it resumes
    pub fn deliver_timer_tick(&self, now: DateTime<Utc>) -> Delivery {
        let due = self.timers.lock().due_timers(now);
        let mut delivery = Delivery::default();

        for timer in due {
            let Ok(cell) = self.cell(timer.instance_key) else {
                self.timers.lock().trigger(timer.key);
                continue;
            };
            let mut instance = cell.lock();

            let triggered = self.timers.lock().trigger(timer.key);
            if triggered.is_none() {
                continue;
            }
            if instance.is_terminal() {
                tracing::debug!(
                    timer_key = %timer.key,
                    instance_key = %timer.instance_key,
                    "Timer fired for finished instance"
                );
                continue;
            }

            let mut waits = self.waits();
            if !self
                .state_machine
                .resume(&mut instance, &WaitRef::Timer(timer.key), &mut waits)
            {
                continue;
            }

            delivery.resumed.insert(instance.key);
            if let Err(error) = self.drive(&mut instance) {
                delivery.failures.push(error);
            }
        }

        delivery
    }

    /// Publish a message to every subscription matching name and key
    pub fn publish_message(&self, message_name: &str, correlation_key: Option<&str>) -> Delivery {
        self.publish_message_with_variables(message_name, correlation_key, Map::new())
    }

    /// Publish a message carrying variables into each resumed instance
    pub fn publish_message_with_variables(
        &self,
        message_name: &str,
        correlation_key: Option<&str>,
        variables: Map<String, Value>,
    ) -> Delivery {
        let consumed = self
            .subscriptions
            .lock()
            .publish(message_name, correlation_key);
        let mut delivery = Delivery::default();

        if consumed.is_empty() {
            tracing::debug!(
                message_name = %message_name,
                correlation_key = ?correlation_key,
                "Message matched no subscription"
            );
            return delivery;
        }

        for subscription in consumed {
            let Ok(cell) = self.cell(subscription.instance_key) else {
                continue;
            };
            let mut instance = cell.lock();
            if instance.is_terminal() {
                continue;
            }

            let mut waits = self.waits();
            if !self.state_machine.resume(
                &mut instance,
                &WaitRef::Message(subscription.key),
                &mut waits,
            ) {
                continue;
            }

            instance.variables.merge(variables.clone());
            delivery.resumed.insert(instance.key);
            if let Err(error) = self.drive(&mut instance) {
                delivery.failures.push(error);
            }
        }

        delivery
    }

    /// Timers due at `now` that have not fired yet
    pub fn due_timers(&self, now: DateTime<Utc>) -> Vec<Timer> {
        self.timers.lock().due_timers(now)
    }

    /// All timers in any state
    pub fn timers(&self) -> Vec<Timer> {
        self.timers.lock().all()
    }

    /// All active subscriptions
    pub fn subscriptions(&self) -> Vec<MessageSubscription> {
        self.subscriptions.lock().all()
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// A consistent copy of the whole engine state
    pub fn snapshot(&self) -> EngineState {
        let cells = self.cells();
        let guards: Vec<_> = cells.iter().map(|(_, cell)| cell.lock()).collect();
        let timers = self.timers.lock().all();
        let subscriptions = self.subscriptions.lock().all();

        EngineState {
            name: self.config.name.clone(),
            definitions: self.definitions.read().clone(),
            instances: guards.iter().map(|i| (i.key, (**i).clone())).collect(),
            subscriptions,
            timers,
        }
    }

    /// Build an engine around existing state; new keys continue after it
    pub fn from_state(state: EngineState, config: EngineConfig) -> Self {
        let keys = Arc::new(KeyGenerator::starting_after(state.max_key()));
        let config = EngineConfig {
            name: state.name,
            ..config
        };

        Self {
            config,
            keys: keys.clone(),
            clock: Arc::new(SystemClock),
            parser: Arc::new(JsonDefinitionParser),
            definitions: RwLock::new(state.definitions),
            instances: state
                .instances
                .into_iter()
                .map(|(key, instance)| (key, Arc::new(Mutex::new(instance))))
                .collect(),
            timers: Mutex::new(TimerScheduler::from_timers(keys.clone(), state.timers)),
            subscriptions: Mutex::new(SubscriptionRegistry::from_subscriptions(
                keys,
                state.subscriptions,
            )),
            handlers: HandlerRegistry::new(),
            state_machine: StateMachine::new(),
        }
    }

    /// Encode the whole engine state
    pub fn marshal(&self) -> Result<Vec<u8>, SnapshotError> {
        snapshot::encode(&self.snapshot())
    }

    /// Rebuild an engine from snapshot bytes using the JSON definition parser
    pub fn unmarshal(data: &[u8], config: EngineConfig) -> Result<RestoredEngine, SnapshotError> {
        Self::unmarshal_with_parser(data, config, Arc::new(JsonDefinitionParser))
    }

    /// Rebuild an engine from snapshot bytes
    pub fn unmarshal_with_parser(
        data: &[u8],
        config: EngineConfig,
        parser: Arc<dyn DefinitionParser>,
    ) -> Result<RestoredEngine, SnapshotError> {
        let restored = snapshot::decode(data, parser.as_ref())?;
        let engine = Self::from_state(restored.state, config).with_parser(parser);
        Ok(RestoredEngine {
            engine,
            errors: restored.errors,
        })
    }

    // ── Internals ────────────────────────────────────────────────────

    fn cell(&self, key: InstanceKey) -> EngineResult<InstanceCell> {
        self.instances
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ValidationError::InstanceNotFound(key).into())
    }

    fn cells(&self) -> Vec<(InstanceKey, InstanceCell)> {
        let mut cells: Vec<_> = self
            .instances
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        cells.sort_by_key(|(key, _)| *key);
        cells
    }

    fn waits(&self) -> SharedWaits<'_> {
        SharedWaits {
            timers: &self.timers,
            subscriptions: &self.subscriptions,
        }
    }

    /// Step until the instance waits, fails or completes
    fn drive(&self, instance: &mut ProcessInstance) -> EngineResult<StepResult> {
        let mut waits = self.waits();
        for _ in 0..self.config.max_steps_per_run {
            match self
                .state_machine
                .step(instance, &self.handlers, &mut waits, self.clock.now())?
            {
                StepResult::Advanced { .. } => continue,
                settled => return Ok(settled),
            }
        }

        tracing::warn!(
            instance_key = %instance.key,
            limit = self.config.max_steps_per_run,
            "Process instance hit the step limit"
        );
        Err(EngineError::StepLimitExceeded {
            instance_key: instance.key,
            limit: self.config.max_steps_per_run,
        })
    }
}

impl std::fmt::Debug for ProcessEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessEngine")
            .field("name", &self.config.name)
            .field("definitions", &self.definitions.read().count())
            .field("instances", &self.instances.len())
            .field("handlers", &self.handlers)
            .finish()
    }
}

/// The engine's timers and subscriptions seen through the state machine's
/// wait interface; each call takes the lock it needs
struct SharedWaits<'a> {
    timers: &'a Mutex<TimerScheduler>,
    subscriptions: &'a Mutex<SubscriptionRegistry>,
}

impl WaitRegistry for SharedWaits<'_> {
    fn register_timer(
        &mut self,
        instance_key: InstanceKey,
        element_id: &ElementId,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> TimerKey {
        self.timers
            .lock()
            .register_timer(instance_key, element_id, duration, now)
            .key
    }

    fn subscribe(
        &mut self,
        instance_key: InstanceKey,
        element_id: &ElementId,
        message_name: &str,
        correlation_key: Option<String>,
        now: DateTime<Utc>,
    ) -> SubscriptionKey {
        self.subscriptions
            .lock()
            .subscribe(instance_key, element_id, message_name, correlation_key, now)
            .key
    }

    fn cancel_timer(&mut self, key: TimerKey) {
        self.timers.lock().cancel(key);
    }

    fn withdraw_subscription(&mut self, key: SubscriptionKey) {
        self.subscriptions.lock().withdraw(key);
    }
}
