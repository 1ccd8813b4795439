//! Snapshot codec: versioned wire format for the full engine state
//!
//! Definitions are stored by reference (process ID, version key, payload,
//! resource name and SHA-256 checksum) and re-parsed on restore. Decoding
//! verifies every checksum, re-links every instance to its definition and
//! reports recoverable problems next to whatever state could be rebuilt.
//! Only a malformed document or an unknown version tag fails outright.

mod error;
mod payload;
mod records;

use std::sync::Arc;

use process_types::{Checksum, DefinitionParser, ProcessDefinition, ValidationError};

use crate::state::EngineState;

pub use error::{RestoreCause, SnapshotError, UnmarshallingError};
use records::{
    InstanceRecord, ProcessReferenceRecord, SnapshotRecord, SubscriptionRecord, TimerRecord,
    VersionHeader,
};

/// The version every snapshot is written with
pub const CURRENT_VERSION: u32 = 2;

/// Oldest version still readable
pub const OLDEST_VERSION: u32 = 1;

/// State rebuilt from a snapshot, with the problems met on the way
#[derive(Debug)]
pub struct Restored {
    pub state: EngineState,
    pub errors: Vec<UnmarshallingError>,
}

impl Restored {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Serialize an engine state in the current format
pub fn encode(state: &EngineState) -> Result<Vec<u8>, SnapshotError> {
    let process_references = state
        .definitions
        .list()
        .into_iter()
        .map(|definition| {
            Ok(ProcessReferenceRecord {
                bpmn_process_id: definition.process_id.clone(),
                process_key: definition.process_key,
                data: payload::pack(&definition.raw)?,
                resource_name: definition.resource_name.clone(),
                checksum_hex: definition.checksum.to_hex(),
            })
        })
        .collect::<Result<Vec<_>, std::io::Error>>()?;

    let record = SnapshotRecord {
        version: CURRENT_VERSION,
        name: state.name.clone(),
        process_references,
        process_instances: state.instances.values().map(InstanceRecord::from).collect(),
        message_subscriptions: state
            .subscriptions
            .iter()
            .map(SubscriptionRecord::from)
            .collect(),
        timers: state.timers.iter().map(TimerRecord::from).collect(),
    };

    Ok(serde_json::to_vec(&record)?)
}

/// Rebuild an engine state from snapshot bytes
pub fn decode(data: &[u8], parser: &dyn DefinitionParser) -> Result<Restored, SnapshotError> {
    let header: VersionHeader = serde_json::from_slice(data)?;
    if !(OLDEST_VERSION..=CURRENT_VERSION).contains(&header.version) {
        return Err(SnapshotError::UnsupportedVersion {
            found: header.version,
            supported: CURRENT_VERSION,
        });
    }

    let mut record: SnapshotRecord = serde_json::from_slice(data)?;
    let mut restored = Restored {
        state: EngineState::new(record.name.clone()),
        errors: Vec::new(),
    };

    // Versions count every reference of a process ID in key order, so a
    // skipped definition still holds its number
    record.process_references.sort_by_key(|r| r.process_key);
    for reference in record.process_references {
        let version = restored
            .state
            .definitions
            .next_version(&reference.bpmn_process_id);
        restored.state.definitions.reserve(
            &reference.bpmn_process_id,
            version,
            reference.process_key,
        );
        match load_definition(reference, record.version, parser) {
            Ok(definition) => {
                let definition = ProcessDefinition { version, ..definition };
                restored.state.definitions.insert(Arc::new(definition));
            }
            Err(LoadFailure::Skip(error)) => {
                tracing::warn!(error = %error, "Skipping process definition from snapshot");
                restored.errors.push(error);
            }
            Err(LoadFailure::Stop(error)) => {
                tracing::warn!(error = %error, "Snapshot decoding stopped");
                restored.errors.push(error);
                return Ok(restored);
            }
        }
    }

    for record in record.process_instances {
        let mut instance = record.into_instance();
        match restored.state.definitions.get(instance.process_key) {
            Ok(definition) => instance.link(definition.clone()),
            Err(_) => {
                let cause = RestoreCause::DanglingInstanceReference {
                    instance_key: instance.key,
                    process_key: instance.process_key,
                };
                restored.errors.push(UnmarshallingError::new(
                    format!(
                        "process instance {} could not be linked to its definition",
                        instance.key
                    ),
                    cause,
                ));
            }
        }
        restored.state.instances.insert(instance.key, instance);
    }

    restored.state.subscriptions = record
        .message_subscriptions
        .into_iter()
        .map(Into::into)
        .collect();
    restored.state.timers = record.timers.into_iter().map(Into::into).collect();

    tracing::info!(
        name = %restored.state.name,
        version = record.version,
        definitions = restored.state.definitions.count(),
        instances = restored.state.instances.len(),
        errors = restored.errors.len(),
        "Snapshot decoded"
    );
    Ok(restored)
}

enum LoadFailure {
    /// Leave this definition out and carry on
    Skip(UnmarshallingError),
    /// Return what was restored so far
    Stop(UnmarshallingError),
}

fn load_definition(
    reference: ProcessReferenceRecord,
    version: u32,
    parser: &dyn DefinitionParser,
) -> Result<ProcessDefinition, LoadFailure> {
    let process_key = reference.process_key;

    // An undecodable payload cannot match any checksum
    let raw = match payload::unpack(&reference.data, version) {
        Ok(raw) => raw,
        Err(message) => {
            return Err(LoadFailure::Skip(UnmarshallingError::new(
                format!(
                    "payload of process '{}' ({}) is unreadable: {}",
                    reference.bpmn_process_id, process_key, message
                ),
                RestoreCause::ChecksumMismatch {
                    process_key,
                    expected: reference.checksum_hex,
                    actual: Checksum::of(&[]).to_hex(),
                },
            )));
        }
    };

    let actual = Checksum::of(&raw);
    if Checksum::from_hex(&reference.checksum_hex) != Some(actual) {
        return Err(LoadFailure::Skip(UnmarshallingError::new(
            format!(
                "checksum of process '{}' ({}) does not match its data",
                reference.bpmn_process_id, process_key
            ),
            RestoreCause::ChecksumMismatch {
                process_key,
                expected: reference.checksum_hex,
                actual: actual.to_hex(),
            },
        )));
    }

    let load_error = |source: ValidationError| {
        LoadFailure::Stop(UnmarshallingError::new(
            format!(
                "process '{}' ({}) could not be parsed",
                reference.bpmn_process_id, process_key
            ),
            RestoreCause::DefinitionLoad {
                process_key,
                source,
            },
        ))
    };

    let graph = parser.parse(&raw).map_err(load_error)?;
    if graph.process_id != reference.bpmn_process_id {
        return Err(load_error(ValidationError::InvalidDefinition(format!(
            "payload declares process '{}'",
            graph.process_id
        ))));
    }

    Ok(ProcessDefinition::new(
        process_key,
        0,
        raw,
        reference.resource_name,
        graph,
    ))
}
