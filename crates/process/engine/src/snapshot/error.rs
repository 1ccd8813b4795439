//! Snapshot error types

use process_types::{InstanceKey, ProcessKey, ValidationError};

/// Failures that abort decoding entirely; nothing is restored
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported snapshot version {found} (supported up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Snapshot encoding failed: {0}")]
    Encoding(#[from] std::io::Error),
}

/// A recoverable problem found while restoring; reported next to the
/// partial state
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct UnmarshallingError {
    pub message: String,
    #[source]
    pub cause: RestoreCause,
}

impl UnmarshallingError {
    pub fn new(message: impl Into<String>, cause: RestoreCause) -> Self {
        Self {
            message: message.into(),
            cause,
        }
    }
}

/// What went wrong for one restored entity
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RestoreCause {
    #[error("checksum mismatch for process {process_key}: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        process_key: ProcessKey,
        expected: String,
        actual: String,
    },

    #[error("instance {instance_key} references unknown process {process_key}")]
    DanglingInstanceReference {
        instance_key: InstanceKey,
        process_key: ProcessKey,
    },

    #[error("process {process_key} could not be loaded: {source}")]
    DefinitionLoad {
        process_key: ProcessKey,
        #[source]
        source: ValidationError,
    },
}
