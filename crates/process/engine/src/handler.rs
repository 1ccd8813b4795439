//! Task handlers: the business logic behind service and user tasks
//!
//! The engine never knows what a task does. It looks a handler up by the
//! task's type (falling back to the element ID), hands it a [`Job`] and
//! continues, waits or fails according to the outcome.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use process_types::{ElementId, InstanceKey, VariableScope};
use serde_json::Value;

/// What a handler reports after running
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// Work done; the token continues
    Completed,
    /// Work continues elsewhere; the token waits for `complete_job`
    Pending,
}

/// A handler failure; moves the instance to FAILED
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TaskFailure {
    pub message: String,
}

impl TaskFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The unit of work handed to a task handler
pub struct Job<'a> {
    instance_key: InstanceKey,
    element_id: &'a ElementId,
    element_name: &'a str,
    task_type: Option<&'a str>,
    headers: &'a BTreeMap<String, String>,
    variables: &'a mut VariableScope,
}

impl<'a> Job<'a> {
    pub(crate) fn new(
        instance_key: InstanceKey,
        element_id: &'a ElementId,
        element_name: &'a str,
        task_type: Option<&'a str>,
        headers: &'a BTreeMap<String, String>,
        variables: &'a mut VariableScope,
    ) -> Self {
        Self {
            instance_key,
            element_id,
            element_name,
            task_type,
            headers,
            variables,
        }
    }

    pub fn instance_key(&self) -> InstanceKey {
        self.instance_key
    }

    pub fn element_id(&self) -> &ElementId {
        self.element_id
    }

    pub fn element_name(&self) -> &str {
        self.element_name
    }

    pub fn task_type(&self) -> Option<&str> {
        self.task_type
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        self.headers
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.variables.set(name, value);
    }

    pub fn variables(&self) -> &VariableScope {
        self.variables
    }
}

/// Executes the work of a task element
pub trait TaskHandler: Send + Sync {
    fn execute(&self, job: &mut Job<'_>) -> Result<JobOutcome, TaskFailure>;
}

impl<F> TaskHandler for F
where
    F: Fn(&mut Job<'_>) -> Result<JobOutcome, TaskFailure> + Send + Sync,
{
    fn execute(&self, job: &mut Job<'_>) -> Result<JobOutcome, TaskFailure> {
        self(job)
    }
}

/// Handlers by task type or element ID
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the handler for a task type or element ID
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let name = name.into();
        tracing::debug!(handler = %name, "Task handler registered");
        self.handlers.write().insert(name, handler);
    }

    /// Handler for a task: by task type first, then by element ID
    pub fn resolve(&self, task_type: Option<&str>, element_id: &ElementId) -> Option<Arc<dyn TaskHandler>> {
        let handlers = self.handlers.read();
        task_type
            .and_then(|t| handlers.get(t))
            .or_else(|| handlers.get(element_id.as_str()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("HandlerRegistry").field("handlers", &names).finish()
    }
}
