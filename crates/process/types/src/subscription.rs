//! Message subscriptions backing message catch events

use chrono::{DateTime, Utc};

use crate::{ElementId, InstanceKey, SubscriptionKey};

/// An outstanding wait for a correlated message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageSubscription {
    pub key: SubscriptionKey,
    pub instance_key: InstanceKey,
    pub element_id: ElementId,
    pub message_name: String,
    /// Evaluated from the variable scope when the subscription was opened
    pub correlation_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MessageSubscription {
    /// Exact match on name and correlation key
    pub fn matches(&self, message_name: &str, correlation_key: Option<&str>) -> bool {
        self.message_name == message_name && self.correlation_key.as_deref() == correlation_key
    }
}
