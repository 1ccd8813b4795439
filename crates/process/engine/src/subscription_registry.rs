//! Message subscription registry: outstanding correlations
//!
//! Each (instance, element) holds at most one subscription. Publishing
//! consumes every exact match at once; a publication nobody waits for is
//! dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use process_types::{ElementId, InstanceKey, MessageSubscription, SubscriptionKey};

use crate::keys::KeyGenerator;

#[derive(Debug)]
pub struct SubscriptionRegistry {
    keys: Arc<KeyGenerator>,
    subscriptions: BTreeMap<SubscriptionKey, MessageSubscription>,
}

impl SubscriptionRegistry {
    pub fn new(keys: Arc<KeyGenerator>) -> Self {
        Self {
            keys,
            subscriptions: BTreeMap::new(),
        }
    }

    /// Rebuild from persisted subscriptions
    pub fn from_subscriptions(
        keys: Arc<KeyGenerator>,
        subscriptions: impl IntoIterator<Item = MessageSubscription>,
    ) -> Self {
        Self {
            keys,
            subscriptions: subscriptions.into_iter().map(|s| (s.key, s)).collect(),
        }
    }

    /// Open a subscription, or return the one this element already holds
    pub fn subscribe(
        &mut self,
        instance_key: InstanceKey,
        element_id: &ElementId,
        message_name: &str,
        correlation_key: Option<String>,
        now: DateTime<Utc>,
    ) -> MessageSubscription {
        if let Some(existing) = self
            .subscriptions
            .values()
            .find(|s| s.instance_key == instance_key && &s.element_id == element_id)
        {
            return existing.clone();
        }

        let key = SubscriptionKey(self.keys.next());
        let subscription = MessageSubscription {
            key,
            instance_key,
            element_id: element_id.clone(),
            message_name: message_name.to_string(),
            correlation_key,
            created_at: now,
        };

        tracing::debug!(
            subscription_key = %key,
            instance_key = %instance_key,
            message_name = %message_name,
            correlation_key = ?subscription.correlation_key,
            "Message subscription opened"
        );

        self.subscriptions.insert(key, subscription.clone());
        subscription
    }

    /// Consume and return every subscription matching exactly
    pub fn publish(
        &mut self,
        message_name: &str,
        correlation_key: Option<&str>,
    ) -> Vec<MessageSubscription> {
        let matched: Vec<SubscriptionKey> = self
            .subscriptions
            .values()
            .filter(|s| s.matches(message_name, correlation_key))
            .map(|s| s.key)
            .collect();

        matched
            .into_iter()
            .filter_map(|key| self.subscriptions.remove(&key))
            .collect()
    }

    /// Remove a subscription without delivering anything
    pub fn withdraw(&mut self, key: SubscriptionKey) -> Option<MessageSubscription> {
        let removed = self.subscriptions.remove(&key);
        if removed.is_some() {
            tracing::debug!(subscription_key = %key, "Message subscription withdrawn");
        }
        removed
    }

    /// Withdraw every subscription of an instance
    pub fn withdraw_instance(&mut self, instance_key: InstanceKey) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions
            .retain(|_, s| s.instance_key != instance_key);
        before - self.subscriptions.len()
    }

    pub fn get(&self, key: SubscriptionKey) -> Option<&MessageSubscription> {
        self.subscriptions.get(&key)
    }

    /// All active subscriptions in key order
    pub fn all(&self) -> Vec<MessageSubscription> {
        self.subscriptions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SubscriptionRegistry {
        SubscriptionRegistry::new(Arc::new(KeyGenerator::new()))
    }

    #[test]
    fn test_publish_consumes_all_matches_once() {
        let mut registry = registry();
        let element = ElementId::new("paid");
        registry.subscribe(InstanceKey(1), &element, "orderPaid", Some("42".into()), Utc::now());
        registry.subscribe(InstanceKey(2), &element, "orderPaid", Some("42".into()), Utc::now());
        registry.subscribe(InstanceKey(3), &element, "orderPaid", Some("43".into()), Utc::now());

        let consumed = registry.publish("orderPaid", Some("42"));
        assert_eq!(consumed.len(), 2);
        assert!(registry.publish("orderPaid", Some("42")).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unmatched_publish_is_noop() {
        let mut registry = registry();
        registry.subscribe(InstanceKey(1), &ElementId::new("paid"), "orderPaid", None, Utc::now());
        assert!(registry.publish("orderShipped", None).is_empty());
        assert!(registry.publish("orderPaid", Some("1")).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_subscribe_is_idempotent_per_element() {
        let mut registry = registry();
        let element = ElementId::new("paid");
        let first = registry.subscribe(InstanceKey(1), &element, "orderPaid", None, Utc::now());
        let again = registry.subscribe(InstanceKey(1), &element, "orderPaid", None, Utc::now());
        assert_eq!(first.key, again.key);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_withdraw() {
        let mut registry = registry();
        let subscription =
            registry.subscribe(InstanceKey(1), &ElementId::new("paid"), "orderPaid", None, Utc::now());
        assert!(registry.withdraw(subscription.key).is_some());
        assert!(registry.withdraw(subscription.key).is_none());
        assert!(registry.is_empty());
    }
}
