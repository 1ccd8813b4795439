//! Definition registry: stores and retrieves process definitions
//!
//! Definitions are immutable once registered and the registry is
//! append-only. A changed process is registered as a new version; every
//! version stays reachable by its key for the instances still running it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use process_types::{Checksum, ProcessDefinition, ProcessKey, ProcessResult, ValidationError};

/// Which version of a process to instantiate
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VersionSelector {
    /// The most recently registered version
    #[default]
    Latest,
    /// A per-process version number (1, 2, …)
    Version(u32),
    /// An exact version key
    Key(ProcessKey),
}

/// Registry of process definitions
#[derive(Clone, Debug, Default)]
pub struct DefinitionRegistry {
    /// All registered definitions, keyed by version key
    definitions: BTreeMap<ProcessKey, Arc<ProcessDefinition>>,
    /// Index by process ID → version keys in version order
    by_process_id: HashMap<String, Vec<ProcessKey>>,
    /// Highest version number issued per process ID, including versions
    /// that are no longer present
    issued: HashMap<String, u32>,
    /// Highest version key issued, present or not
    highest_key: Option<ProcessKey>,
}

impl DefinitionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition; its version must not have been issued before
    pub fn insert(&mut self, definition: Arc<ProcessDefinition>) {
        let key = definition.process_key;
        self.reserve(&definition.process_id, definition.version, key);
        self.by_process_id
            .entry(definition.process_id.clone())
            .or_default()
            .push(key);

        tracing::info!(
            process_key = %key,
            process_id = %definition.process_id,
            version = definition.version,
            "Process definition registered"
        );
        self.definitions.insert(key, definition);
    }

    /// Get a definition by version key
    pub fn get(&self, key: ProcessKey) -> ProcessResult<&Arc<ProcessDefinition>> {
        self.definitions
            .get(&key)
            .ok_or(ValidationError::ProcessNotFound(key))
    }

    /// A version of `process_id` registered from identical bytes
    pub fn find_by_checksum(
        &self,
        process_id: &str,
        checksum: &Checksum,
    ) -> Option<&Arc<ProcessDefinition>> {
        self.versions(process_id)
            .into_iter()
            .find(|d| &d.checksum == checksum)
    }

    /// Most recent version of a process
    pub fn latest(&self, process_id: &str) -> Option<&Arc<ProcessDefinition>> {
        self.by_process_id
            .get(process_id)
            .and_then(|keys| keys.last())
            .and_then(|key| self.definitions.get(key))
    }

    /// A specific version number of a process
    pub fn version(&self, process_id: &str, version: u32) -> Option<&Arc<ProcessDefinition>> {
        self.versions(process_id)
            .into_iter()
            .find(|d| d.version == version)
    }

    /// All versions of a process, oldest first
    pub fn versions(&self, process_id: &str) -> Vec<&Arc<ProcessDefinition>> {
        self.by_process_id
            .get(process_id)
            .map(|keys| keys.iter().filter_map(|k| self.definitions.get(k)).collect())
            .unwrap_or_default()
    }

    /// Resolve a selector to a definition
    pub fn select(
        &self,
        process_id: &str,
        selector: VersionSelector,
    ) -> ProcessResult<&Arc<ProcessDefinition>> {
        match selector {
            VersionSelector::Latest => self
                .latest(process_id)
                .ok_or_else(|| ValidationError::UnknownProcess(process_id.to_string())),
            VersionSelector::Version(version) => {
                if !self.by_process_id.contains_key(process_id) {
                    return Err(ValidationError::UnknownProcess(process_id.to_string()));
                }
                self.version(process_id, version)
                    .ok_or_else(|| ValidationError::UnknownVersion {
                        process_id: process_id.to_string(),
                        version,
                    })
            }
            VersionSelector::Key(key) => {
                let definition = self.get(key)?;
                if definition.process_id != process_id {
                    return Err(ValidationError::ProcessNotFound(key));
                }
                Ok(definition)
            }
        }
    }

    /// Version number the next registration of `process_id` receives
    pub fn next_version(&self, process_id: &str) -> u32 {
        self.issued.get(process_id).copied().unwrap_or(0) + 1
    }

    /// Mark a version number and key as used even though no definition
    /// holds them
    pub fn reserve(&mut self, process_id: &str, version: u32, key: ProcessKey) {
        let issued = self.issued.entry(process_id.to_string()).or_insert(0);
        *issued = (*issued).max(version);
        self.highest_key = self.highest_key.max(Some(key));
    }

    /// All definitions in key order
    pub fn list(&self) -> Vec<&Arc<ProcessDefinition>> {
        self.definitions.values().collect()
    }

    /// Total number of registered definitions
    pub fn count(&self) -> usize {
        self.definitions.len()
    }

    pub fn contains(&self, key: ProcessKey) -> bool {
        self.definitions.contains_key(&key)
    }

    /// Largest version key issued
    pub fn max_key(&self) -> Option<ProcessKey> {
        self.highest_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use process_types::{Element, ProcessGraph, SequenceFlow};

    fn definition(key: i64, process_id: &str, version: u32, raw: &str) -> Arc<ProcessDefinition> {
        let graph = ProcessGraph::new(process_id)
            .with_element(Element::start("start"))
            .with_element(Element::end("end"))
            .with_flow(SequenceFlow::new("f1", "start", "end"));
        Arc::new(ProcessDefinition::new(
            ProcessKey(key),
            version,
            raw.as_bytes().to_vec(),
            None,
            graph,
        ))
    }

    #[test]
    fn test_insert_and_get() {
        let mut registry = DefinitionRegistry::new();
        registry.insert(definition(1, "order", 1, "v1"));

        assert_eq!(registry.get(ProcessKey(1)).unwrap().process_id, "order");
        assert_eq!(registry.count(), 1);
        assert!(matches!(
            registry.get(ProcessKey(9)),
            Err(ValidationError::ProcessNotFound(_))
        ));
    }

    #[test]
    fn test_versions_and_selectors() {
        let mut registry = DefinitionRegistry::new();
        registry.insert(definition(1, "order", 1, "v1"));
        registry.insert(definition(4, "order", 2, "v2"));

        assert_eq!(registry.next_version("order"), 3);
        assert_eq!(registry.next_version("other"), 1);
        assert_eq!(
            registry.select("order", VersionSelector::Latest).unwrap().process_key,
            ProcessKey(4)
        );
        assert_eq!(
            registry.select("order", VersionSelector::Version(1)).unwrap().process_key,
            ProcessKey(1)
        );
        assert_eq!(
            registry.select("order", VersionSelector::Key(ProcessKey(4))).unwrap().version,
            2
        );
        assert!(matches!(
            registry.select("order", VersionSelector::Version(7)),
            Err(ValidationError::UnknownVersion { version: 7, .. })
        ));
        assert!(matches!(
            registry.select("missing", VersionSelector::Latest),
            Err(ValidationError::UnknownProcess(_))
        ));
    }

    #[test]
    fn test_reserved_version_is_not_reissued() {
        let mut registry = DefinitionRegistry::new();
        registry.reserve("order", 1, ProcessKey(5));
        registry.insert(definition(2, "order", 2, "v2"));

        assert_eq!(registry.next_version("order"), 3);
        assert_eq!(
            registry.select("order", VersionSelector::Version(2)).unwrap().process_key,
            ProcessKey(2)
        );
        assert!(registry.select("order", VersionSelector::Version(1)).is_err());

        registry.reserve("order", 2, ProcessKey(2));
        assert_eq!(registry.next_version("order"), 3);
        assert_eq!(registry.max_key(), Some(ProcessKey(5)));
    }

    #[test]
    fn test_find_by_checksum() {
        let mut registry = DefinitionRegistry::new();
        registry.insert(definition(1, "order", 1, "v1"));

        let found = registry.find_by_checksum("order", &Checksum::of(b"v1"));
        assert_eq!(found.map(|d| d.process_key), Some(ProcessKey(1)));
        assert!(registry
            .find_by_checksum("order", &Checksum::of(b"v2"))
            .is_none());
        assert_eq!(registry.max_key(), Some(ProcessKey(1)));
    }
}
