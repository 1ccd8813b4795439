//! Engine error types

use process_types::{ElementId, FlowId, InstanceKey, ProcessKey, ValidationError};

/// Errors surfaced by engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A task handler failed; the instance is FAILED
    #[error("Task '{element_id}' failed in instance {instance_key}: {message}")]
    TaskExecution {
        instance_key: InstanceKey,
        element_id: ElementId,
        message: String,
    },

    /// An exclusive gateway had no true condition and no default flow
    #[error("No outgoing flow of gateway '{element_id}' matched in instance {instance_key}")]
    NoMatchingFlow {
        instance_key: InstanceKey,
        element_id: ElementId,
    },

    #[error("Expression '{expression}' could not be evaluated: {message}")]
    Expression { expression: String, message: String },

    /// The instance kept advancing without reaching a wait or the end
    #[error("Instance {instance_key} exceeded {limit} steps in one run")]
    StepLimitExceeded { instance_key: InstanceKey, limit: usize },

    #[error(transparent)]
    Fault(#[from] EngineFault),
}

/// Internal invariant violations; they abort only the current operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineFault {
    #[error("Instance {0} has no linked process definition")]
    UnlinkedDefinition(InstanceKey),

    #[error("Element '{element_id}' is missing from process {process_key}")]
    MissingElement {
        process_key: ProcessKey,
        element_id: ElementId,
    },

    #[error("Sequence flow '{flow_id}' is missing from process {process_key}")]
    MissingFlow {
        process_key: ProcessKey,
        flow_id: FlowId,
    },
}

impl EngineError {
    /// Whether this error moved an instance to FAILED
    pub fn fails_instance(&self) -> bool {
        matches!(
            self,
            Self::TaskExecution { .. } | Self::NoMatchingFlow { .. } | Self::Expression { .. }
        )
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
