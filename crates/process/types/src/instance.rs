//! Process instances: running executions of process definitions
//!
//! An instance tracks which elements carry tokens, what each token is
//! waiting for, the variable scope, and the arrival bookkeeping of
//! parallel joins. It keeps a runtime link to its shared definition that is
//! never persisted and is rebuilt on restore.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ElementId, FlowId, InstanceKey, ProcessDefinition, ProcessKey, SubscriptionKey, TimerKey};

// ── Instance Status ──────────────────────────────────────────────────

/// Lifecycle status of a process instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Active,
    Completed,
    Failed,
    Terminated,
}

impl InstanceStatus {
    /// COMPLETED and TERMINATED never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Terminated)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Terminated => "TERMINATED",
        };
        f.write_str(label)
    }
}

// ── Variable Scope ───────────────────────────────────────────────────

/// Per-instance variables
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableScope(Map<String, Value>);

impl VariableScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Overwrite with every entry of `other`
    pub fn merge(&mut self, other: Map<String, Value>) {
        for (name, value) in other {
            self.0.insert(name, value);
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for VariableScope {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// ── Tokens ───────────────────────────────────────────────────────────

/// What a token is doing at its element
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenState {
    /// Arrived; the element has not run yet
    Ready,
    /// The awaited trigger fired; continue past the element
    Triggered,
    /// A task is waiting for external completion
    WaitingJob,
    /// A timer catch event is waiting for its timer
    WaitingTimer { timer: TimerKey },
    /// A message catch event is waiting for its subscription
    WaitingMessage { subscription: SubscriptionKey },
    /// An event-based gateway is racing its catch events
    WaitingEvent {
        timers: Vec<(ElementId, TimerKey)>,
        subscriptions: Vec<(ElementId, SubscriptionKey)>,
    },
}

impl TokenState {
    /// Whether the next step will do work on this token
    pub fn is_runnable(&self) -> bool {
        matches!(self, Self::Ready | Self::Triggered)
    }
}

/// A marker of control flow sitting on one element
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub element_id: ElementId,
    /// The flow the token arrived on; `None` at the start event
    pub via: Option<FlowId>,
    pub state: TokenState,
}

impl Token {
    pub fn ready(element_id: ElementId, via: Option<FlowId>) -> Self {
        Self {
            element_id,
            via,
            state: TokenState::Ready,
        }
    }
}

// ── Process Instance ─────────────────────────────────────────────────

/// A running instance of a process definition
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessInstance {
    /// Unique instance key
    pub key: InstanceKey,
    /// Version key of the definition this instance runs
    pub process_key: ProcessKey,
    /// Current lifecycle status
    pub status: InstanceStatus,
    /// Variable scope
    pub variables: VariableScope,
    /// Live tokens, in activation order
    pub tokens: Vec<Token>,
    /// Parallel joins: arrivals counted per incoming flow
    pub join_arrivals: BTreeMap<ElementId, BTreeMap<FlowId, u32>>,
    /// When the instance was created
    pub created_at: DateTime<Utc>,
    /// Why the instance failed, while FAILED
    pub failure: Option<String>,
    definition: Option<Arc<ProcessDefinition>>,
}

impl ProcessInstance {
    pub fn new(
        key: InstanceKey,
        definition: Arc<ProcessDefinition>,
        variables: VariableScope,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut instance = Self::unlinked(key, definition.process_key, created_at);
        instance.variables = variables;
        instance.definition = Some(definition);
        instance
    }

    /// An instance without a definition link, as rebuilt from persisted state
    pub fn unlinked(key: InstanceKey, process_key: ProcessKey, created_at: DateTime<Utc>) -> Self {
        Self {
            key,
            process_key,
            status: InstanceStatus::Active,
            variables: VariableScope::new(),
            tokens: Vec::new(),
            join_arrivals: BTreeMap::new(),
            created_at,
            failure: None,
            definition: None,
        }
    }

    /// Attach the shared definition this instance runs
    pub fn link(&mut self, definition: Arc<ProcessDefinition>) {
        self.definition = Some(definition);
    }

    pub fn definition(&self) -> Option<&Arc<ProcessDefinition>> {
        self.definition.as_ref()
    }

    pub fn is_linked(&self) -> bool {
        self.definition.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.status == InstanceStatus::Active
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Element IDs currently carrying tokens
    pub fn active_elements(&self) -> Vec<ElementId> {
        let mut ids: Vec<ElementId> = self.tokens.iter().map(|t| t.element_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Index of a token waiting for a job at the given element
    pub fn job_token(&self, element_id: &ElementId) -> Option<usize> {
        self.tokens
            .iter()
            .position(|t| &t.element_id == element_id && t.state == TokenState::WaitingJob)
    }

    pub fn complete(&mut self) {
        self.status = InstanceStatus::Completed;
        self.tokens.clear();
        self.join_arrivals.clear();
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = InstanceStatus::Failed;
        self.failure = Some(reason.into());
    }

    /// Back to ACTIVE after a failure; the tokens are where they failed
    pub fn reactivate(&mut self) {
        self.status = InstanceStatus::Active;
        self.failure = None;
    }

    pub fn terminate(&mut self) {
        self.status = InstanceStatus::Terminated;
        self.tokens.clear();
        self.join_arrivals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Element, ProcessGraph};

    fn definition() -> Arc<ProcessDefinition> {
        let graph = ProcessGraph::new("p")
            .with_element(Element::start("start"))
            .with_element(Element::end("end"));
        Arc::new(ProcessDefinition::new(ProcessKey(1), 1, b"p".to_vec(), None, graph))
    }

    #[test]
    fn test_new_instance_is_active_and_linked() {
        let instance = ProcessInstance::new(
            InstanceKey(2),
            definition(),
            VariableScope::new(),
            Utc::now(),
        );
        assert!(instance.is_active());
        assert!(instance.is_linked());
        assert_eq!(instance.process_key, ProcessKey(1));
    }

    #[test]
    fn test_status_transitions() {
        let mut instance = ProcessInstance::unlinked(InstanceKey(2), ProcessKey(1), Utc::now());
        instance
            .tokens
            .push(Token::ready(ElementId::new("start"), None));

        instance.fail("boom");
        assert_eq!(instance.status, InstanceStatus::Failed);
        assert!(!instance.is_terminal());
        assert_eq!(instance.tokens.len(), 1);

        instance.reactivate();
        assert!(instance.is_active());
        assert!(instance.failure.is_none());

        instance.terminate();
        assert!(instance.is_terminal());
        assert!(instance.active_elements().is_empty());
    }

    #[test]
    fn test_variable_scope_merge() {
        let mut scope = VariableScope::new();
        scope.set("a", 1);
        let mut payload = Map::new();
        payload.insert("a".into(), Value::from(2));
        payload.insert("b".into(), Value::from("x"));
        scope.merge(payload);
        assert_eq!(scope.get("a"), Some(&Value::from(2)));
        assert_eq!(scope.len(), 2);
    }

    #[test]
    fn test_status_serializes_upper_case() {
        let json = serde_json::to_string(&InstanceStatus::Terminated).unwrap();
        assert_eq!(json, "\"TERMINATED\"");
    }
}
