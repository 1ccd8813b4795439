//! Error types for the process layer

use crate::{ElementId, FlowId, InstanceKey, ProcessKey};

/// Business-level validation failures surfaced to the caller.
///
/// None of these leave partial state behind: a definition that fails
/// validation is not registered and an instance that fails to resolve its
/// definition is not created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid process definition: {0}")]
    InvalidDefinition(String),

    #[error("Process '{process_id}' is already registered with different content")]
    VersionConflict { process_id: String },

    #[error("Unknown process: {0}")]
    UnknownProcess(String),

    #[error("Process '{process_id}' has no version {version}")]
    UnknownVersion { process_id: String, version: u32 },

    #[error("Process definition not found: {0}")]
    ProcessNotFound(ProcessKey),

    #[error("Process instance not found: {0}")]
    InstanceNotFound(InstanceKey),

    #[error("Element not found: {0}")]
    ElementNotFound(ElementId),

    #[error("Duplicate element ID: {0}")]
    DuplicateElement(ElementId),

    #[error("Duplicate sequence flow ID: {0}")]
    DuplicateFlow(FlowId),

    #[error("Sequence flow '{flow}' references unknown element '{element}'")]
    DanglingFlow { flow: FlowId, element: ElementId },

    #[error("No start event defined")]
    NoStartEvent,

    #[error("Process must have exactly one start event")]
    MultipleStartEvents,

    #[error("No end event defined")]
    NoEndEvent,

    #[error("Element '{0}' is not reachable from the start event")]
    Unreachable(ElementId),

    #[error("Default flow '{flow}' does not leave gateway '{gateway}'")]
    InvalidDefaultFlow { gateway: ElementId, flow: FlowId },

    #[error("Event-based gateway '{gateway}' must only lead to catch events, found '{target}'")]
    InvalidEventGatewayTarget { gateway: ElementId, target: ElementId },

    #[error("Invalid duration '{0}'")]
    InvalidDuration(String),

    #[error("Instance {instance_key} is not waiting at element '{element_id}'")]
    NotWaiting {
        instance_key: InstanceKey,
        element_id: ElementId,
    },

    #[error("Instance {0} has not failed")]
    NotFailed(InstanceKey),
}

/// Result type alias for process operations
pub type ProcessResult<T> = Result<T, ValidationError>;
