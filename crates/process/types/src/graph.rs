//! Process element graphs.
//!
//! A [`ProcessGraph`] is the validated, executable form of a process
//! definition document: a closed set of element kinds connected by
//! sequence flows. Flows are kept in declaration order because exclusive
//! gateways evaluate their conditions in that order.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ProcessResult, ValidationError};

// ── Identifiers ──────────────────────────────────────────────────────

/// Identifier of an element within a process graph
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a sequence flow within a process graph
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(pub String);

impl FlowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FlowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Process Graph ────────────────────────────────────────────────────

/// The executable element graph of one process
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessGraph {
    /// Process identifier, stable across versions
    pub process_id: String,
    /// Human-readable name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// All elements of the process
    pub elements: Vec<Element>,
    /// Sequence flows, in declaration order
    #[serde(default)]
    pub flows: Vec<SequenceFlow>,
}

impl ProcessGraph {
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            name: String::new(),
            elements: Vec::new(),
            flows: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_element(mut self, element: Element) -> Self {
        self.elements.push(element);
        self
    }

    pub fn with_flow(mut self, flow: SequenceFlow) -> Self {
        self.flows.push(flow);
        self
    }

    /// Get an element by ID
    pub fn element(&self, id: &ElementId) -> Option<&Element> {
        self.elements.iter().find(|e| &e.id == id)
    }

    /// Get a sequence flow by ID
    pub fn flow(&self, id: &FlowId) -> Option<&SequenceFlow> {
        self.flows.iter().find(|f| &f.id == id)
    }

    /// The single start event
    pub fn start_event(&self) -> Option<&Element> {
        self.elements
            .iter()
            .find(|e| matches!(e.kind, ElementKind::StartEvent))
    }

    /// Flows leaving an element, in declaration order
    pub fn outgoing(&self, id: &ElementId) -> Vec<&SequenceFlow> {
        self.flows.iter().filter(|f| &f.source == id).collect()
    }

    /// Flows entering an element, in declaration order
    pub fn incoming(&self, id: &ElementId) -> Vec<&SequenceFlow> {
        self.flows.iter().filter(|f| &f.target == id).collect()
    }

    /// Check structural correctness
    pub fn validate(&self) -> ProcessResult<()> {
        if self.process_id.trim().is_empty() {
            return Err(ValidationError::InvalidDefinition(
                "process identifier must not be empty".into(),
            ));
        }

        let mut seen = HashSet::new();
        for element in &self.elements {
            if !seen.insert(&element.id) {
                return Err(ValidationError::DuplicateElement(element.id.clone()));
            }
        }

        let mut seen_flows = HashSet::new();
        for flow in &self.flows {
            if !seen_flows.insert(&flow.id) {
                return Err(ValidationError::DuplicateFlow(flow.id.clone()));
            }
            for end in [&flow.source, &flow.target] {
                if !seen.contains(end) {
                    return Err(ValidationError::DanglingFlow {
                        flow: flow.id.clone(),
                        element: end.clone(),
                    });
                }
            }
        }

        let starts = self
            .elements
            .iter()
            .filter(|e| matches!(e.kind, ElementKind::StartEvent))
            .count();
        match starts {
            0 => return Err(ValidationError::NoStartEvent),
            1 => {}
            _ => return Err(ValidationError::MultipleStartEvents),
        }
        if !self
            .elements
            .iter()
            .any(|e| matches!(e.kind, ElementKind::EndEvent))
        {
            return Err(ValidationError::NoEndEvent);
        }

        for element in &self.elements {
            match &element.kind {
                ElementKind::ExclusiveGateway {
                    default_flow: Some(default),
                } => {
                    let leaves = self
                        .flow(default)
                        .map(|f| f.source == element.id)
                        .unwrap_or(false);
                    if !leaves {
                        return Err(ValidationError::InvalidDefaultFlow {
                            gateway: element.id.clone(),
                            flow: default.clone(),
                        });
                    }
                }
                ElementKind::EventBasedGateway => {
                    for flow in self.outgoing(&element.id) {
                        let is_catch = self
                            .element(&flow.target)
                            .map(|t| t.kind.is_catch_event())
                            .unwrap_or(false);
                        if !is_catch {
                            return Err(ValidationError::InvalidEventGatewayTarget {
                                gateway: element.id.clone(),
                                target: flow.target.clone(),
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        if let Some(start) = self.start_event() {
            let reachable = self.reachable_from(&start.id);
            if let Some(orphan) = self.elements.iter().find(|e| !reachable.contains(&e.id)) {
                return Err(ValidationError::Unreachable(orphan.id.clone()));
            }
        }

        Ok(())
    }

    fn reachable_from(&self, start: &ElementId) -> HashSet<ElementId> {
        let mut visited = HashSet::new();
        let mut queue = vec![start.clone()];

        while let Some(current) = queue.pop() {
            if visited.insert(current.clone()) {
                for flow in self.outgoing(&current) {
                    if !visited.contains(&flow.target) {
                        queue.push(flow.target.clone());
                    }
                }
            }
        }

        visited
    }
}

// ── Elements ─────────────────────────────────────────────────────────

/// A node of the process graph
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(flatten)]
    pub kind: ElementKind,
}

impl Element {
    pub fn new(id: impl Into<String>, kind: ElementKind) -> Self {
        Self {
            id: ElementId::new(id),
            name: String::new(),
            kind,
        }
    }

    pub fn start(id: impl Into<String>) -> Self {
        Self::new(id, ElementKind::StartEvent)
    }

    pub fn end(id: impl Into<String>) -> Self {
        Self::new(id, ElementKind::EndEvent)
    }

    /// A service task whose handler is looked up by `task_type`
    pub fn service_task(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self::new(
            id,
            ElementKind::ServiceTask {
                task_type: Some(task_type.into()),
                headers: BTreeMap::new(),
            },
        )
    }

    /// A service task whose handler is looked up by its element ID
    pub fn task(id: impl Into<String>) -> Self {
        Self::new(
            id,
            ElementKind::ServiceTask {
                task_type: None,
                headers: BTreeMap::new(),
            },
        )
    }

    pub fn user_task(id: impl Into<String>) -> Self {
        Self::new(
            id,
            ElementKind::UserTask {
                assignee: None,
                headers: BTreeMap::new(),
            },
        )
    }

    pub fn exclusive_gateway(id: impl Into<String>, default_flow: Option<&str>) -> Self {
        Self::new(
            id,
            ElementKind::ExclusiveGateway {
                default_flow: default_flow.map(FlowId::new),
            },
        )
    }

    pub fn parallel_gateway(id: impl Into<String>) -> Self {
        Self::new(id, ElementKind::ParallelGateway)
    }

    pub fn event_gateway(id: impl Into<String>) -> Self {
        Self::new(id, ElementKind::EventBasedGateway)
    }

    pub fn timer(id: impl Into<String>, duration: Duration) -> Self {
        Self::new(id, ElementKind::TimerCatchEvent { duration })
    }

    pub fn message(
        id: impl Into<String>,
        message_name: impl Into<String>,
        correlation_key: Option<&str>,
    ) -> Self {
        Self::new(
            id,
            ElementKind::MessageCatchEvent {
                message_name: message_name.into(),
                correlation_key: correlation_key.map(str::to_string),
            },
        )
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attach a static header to a task element; ignored for other kinds
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self.kind {
            ElementKind::ServiceTask { headers, .. } | ElementKind::UserTask { headers, .. } => {
                headers.insert(key.into(), value.into());
            }
            _ => {}
        }
        self
    }
}

/// The closed set of element kinds the engine executes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementKind {
    /// Entry point of the process
    StartEvent,
    /// Consumes the arriving token
    EndEvent,
    /// Runs an external handler
    ServiceTask {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_type: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    /// Human work; executed like a service task keyed by element ID
    UserTask {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assignee: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    /// Follows the first outgoing flow whose condition holds
    ExclusiveGateway {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_flow: Option<FlowId>,
    },
    /// Splits into all outgoing flows; joins all incoming flows
    ParallelGateway,
    /// Races the catch events that follow it
    EventBasedGateway,
    /// Suspends until its duration has elapsed
    TimerCatchEvent {
        #[serde(with = "crate::duration::serde_iso8601")]
        duration: Duration,
    },
    /// Suspends until a correlated message arrives
    MessageCatchEvent {
        message_name: String,
        /// Expression evaluated against the variable scope
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_key: Option<String>,
    },
}

impl ElementKind {
    pub fn is_catch_event(&self) -> bool {
        matches!(
            self,
            Self::TimerCatchEvent { .. } | Self::MessageCatchEvent { .. }
        )
    }

    pub fn is_task(&self) -> bool {
        matches!(self, Self::ServiceTask { .. } | Self::UserTask { .. })
    }

    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::StartEvent => "start_event",
            Self::EndEvent => "end_event",
            Self::ServiceTask { .. } => "service_task",
            Self::UserTask { .. } => "user_task",
            Self::ExclusiveGateway { .. } => "exclusive_gateway",
            Self::ParallelGateway => "parallel_gateway",
            Self::EventBasedGateway => "event_based_gateway",
            Self::TimerCatchEvent { .. } => "timer_catch_event",
            Self::MessageCatchEvent { .. } => "message_catch_event",
        }
    }
}

// ── Sequence Flows ───────────────────────────────────────────────────

/// A directed connection between two elements
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceFlow {
    pub id: FlowId,
    pub source: ElementId,
    pub target: ElementId,
    /// Guard expression, evaluated when leaving an exclusive gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl SequenceFlow {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: FlowId::new(id),
            source: ElementId::new(source),
            target: ElementId::new(target),
            condition: None,
        }
    }

    pub fn conditional(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        Self {
            condition: Some(condition.into()),
            ..Self::new(id, source, target)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> ProcessGraph {
        ProcessGraph::new("order")
            .with_element(Element::start("start"))
            .with_element(Element::service_task("charge", "payment"))
            .with_element(Element::end("end"))
            .with_flow(SequenceFlow::new("f1", "start", "charge"))
            .with_flow(SequenceFlow::new("f2", "charge", "end"))
    }

    #[test]
    fn test_valid_graph() {
        let graph = linear();
        graph.validate().unwrap();
        assert_eq!(graph.start_event().unwrap().id, ElementId::new("start"));
        assert_eq!(graph.outgoing(&ElementId::new("start")).len(), 1);
        assert_eq!(graph.incoming(&ElementId::new("end")).len(), 1);
    }

    #[test]
    fn test_missing_start_and_end() {
        let graph = ProcessGraph::new("p").with_element(Element::end("end"));
        assert_eq!(graph.validate(), Err(ValidationError::NoStartEvent));

        let graph = ProcessGraph::new("p").with_element(Element::start("start"));
        assert_eq!(graph.validate(), Err(ValidationError::NoEndEvent));
    }

    #[test]
    fn test_duplicate_element() {
        let graph = linear().with_element(Element::end("end"));
        assert!(matches!(
            graph.validate(),
            Err(ValidationError::DuplicateElement(_))
        ));
    }

    #[test]
    fn test_dangling_flow() {
        let graph = linear().with_flow(SequenceFlow::new("f3", "charge", "nowhere"));
        assert!(matches!(
            graph.validate(),
            Err(ValidationError::DanglingFlow { .. })
        ));
    }

    #[test]
    fn test_unreachable_element() {
        let graph = linear().with_element(Element::task("orphan"));
        assert_eq!(
            graph.validate(),
            Err(ValidationError::Unreachable(ElementId::new("orphan")))
        );
    }

    #[test]
    fn test_default_flow_must_leave_gateway() {
        let graph = ProcessGraph::new("p")
            .with_element(Element::start("start"))
            .with_element(Element::exclusive_gateway("gw", Some("f1")))
            .with_element(Element::end("end"))
            .with_flow(SequenceFlow::new("f1", "start", "gw"))
            .with_flow(SequenceFlow::new("f2", "gw", "end"));
        assert!(matches!(
            graph.validate(),
            Err(ValidationError::InvalidDefaultFlow { .. })
        ));
    }

    #[test]
    fn test_event_gateway_targets_catch_events_only() {
        let graph = ProcessGraph::new("p")
            .with_element(Element::start("start"))
            .with_element(Element::event_gateway("race"))
            .with_element(Element::task("oops"))
            .with_element(Element::end("end"))
            .with_flow(SequenceFlow::new("f1", "start", "race"))
            .with_flow(SequenceFlow::new("f2", "race", "oops"))
            .with_flow(SequenceFlow::new("f3", "oops", "end"));
        assert!(matches!(
            graph.validate(),
            Err(ValidationError::InvalidEventGatewayTarget { .. })
        ));
    }

    #[test]
    fn test_element_kind_json_shape() {
        let element: Element = serde_json::from_value(serde_json::json!({
            "id": "wait",
            "type": "timer_catch_event",
            "duration": "PT5S"
        }))
        .unwrap();
        assert_eq!(
            element.kind,
            ElementKind::TimerCatchEvent {
                duration: Duration::from_secs(5)
            }
        );

        let element: Element = serde_json::from_value(serde_json::json!({
            "id": "end",
            "type": "end_event"
        }))
        .unwrap();
        assert_eq!(element.kind, ElementKind::EndEvent);
    }
}
