//! The full runtime state of an engine, as one value

use std::collections::BTreeMap;

use process_types::{InstanceKey, MessageSubscription, ProcessInstance, Timer};

use crate::definition_registry::DefinitionRegistry;

/// Everything a snapshot persists and a restore rebuilds
#[derive(Clone, Debug, Default)]
pub struct EngineState {
    pub name: String,
    pub definitions: DefinitionRegistry,
    pub instances: BTreeMap<InstanceKey, ProcessInstance>,
    /// Active subscriptions
    pub subscriptions: Vec<MessageSubscription>,
    /// Timers in any state
    pub timers: Vec<Timer>,
}

impl EngineState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Largest key in use by any entity, 0 when empty
    pub fn max_key(&self) -> i64 {
        let definitions = self.definitions.max_key().map(|k| k.value());
        let instances = self.instances.keys().next_back().map(|k| k.value());
        let referenced = self
            .instances
            .values()
            .map(|i| i.process_key.value())
            .max();
        let subscriptions = self.subscriptions.iter().map(|s| s.key.value()).max();
        let timers = self.timers.iter().map(|t| t.key.value()).max();

        [definitions, instances, referenced, subscriptions, timers]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(0)
    }
}
