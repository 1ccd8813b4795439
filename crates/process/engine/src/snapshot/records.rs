//! Wire records, one per persisted entity

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use process_types::{
    ElementId, FlowId, InstanceKey, InstanceStatus, MessageSubscription, ProcessInstance,
    ProcessKey, SubscriptionKey, Timer, TimerKey, TimerState, Token, TokenState, VariableScope,
};
use serde::{Deserialize, Serialize};

/// Reads only the version tag, before committing to a layout
#[derive(Debug, Deserialize)]
pub(crate) struct VersionHeader {
    pub version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SnapshotRecord {
    pub version: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub process_references: Vec<ProcessReferenceRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub process_instances: Vec<InstanceRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message_subscriptions: Vec<SubscriptionRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timers: Vec<TimerRecord>,
}

// ── Definitions ──────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProcessReferenceRecord {
    pub bpmn_process_id: String,
    pub process_key: ProcessKey,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    pub checksum_hex: String,
}

// ── Instances ────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InstanceRecord {
    pub instance_key: InstanceKey,
    pub process_key: ProcessKey,
    pub status: InstanceStatus,
    #[serde(default)]
    pub variables: VariableScope,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<TokenRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub join_arrivals: BTreeMap<ElementId, BTreeMap<FlowId, u32>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl From<&ProcessInstance> for InstanceRecord {
    fn from(instance: &ProcessInstance) -> Self {
        Self {
            instance_key: instance.key,
            process_key: instance.process_key,
            status: instance.status,
            variables: instance.variables.clone(),
            tokens: instance.tokens.iter().map(TokenRecord::from).collect(),
            join_arrivals: instance.join_arrivals.clone(),
            created_at: instance.created_at,
            failure: instance.failure.clone(),
        }
    }
}

impl InstanceRecord {
    /// The instance without its definition link
    pub fn into_instance(self) -> ProcessInstance {
        let mut instance =
            ProcessInstance::unlinked(self.instance_key, self.process_key, self.created_at);
        instance.status = self.status;
        instance.variables = self.variables;
        instance.tokens = self.tokens.into_iter().map(Token::from).collect();
        instance.join_arrivals = self.join_arrivals;
        instance.failure = self.failure;
        instance
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TokenRecord {
    pub element_id: ElementId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<FlowId>,
    #[serde(flatten)]
    pub wait: WaitRecord,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum WaitRecord {
    Ready,
    Triggered,
    WaitingJob,
    WaitingTimer {
        timer: TimerKey,
    },
    WaitingMessage {
        subscription: SubscriptionKey,
    },
    WaitingEvent {
        #[serde(default)]
        timers: Vec<EventWaitRecord<TimerKey>>,
        #[serde(default)]
        subscriptions: Vec<EventWaitRecord<SubscriptionKey>>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EventWaitRecord<K> {
    pub element_id: ElementId,
    pub key: K,
}

impl From<&Token> for TokenRecord {
    fn from(token: &Token) -> Self {
        let wait = match &token.state {
            TokenState::Ready => WaitRecord::Ready,
            TokenState::Triggered => WaitRecord::Triggered,
            TokenState::WaitingJob => WaitRecord::WaitingJob,
            TokenState::WaitingTimer { timer } => WaitRecord::WaitingTimer { timer: *timer },
            TokenState::WaitingMessage { subscription } => WaitRecord::WaitingMessage {
                subscription: *subscription,
            },
            TokenState::WaitingEvent {
                timers,
                subscriptions,
            } => WaitRecord::WaitingEvent {
                timers: timers
                    .iter()
                    .map(|(element_id, key)| EventWaitRecord {
                        element_id: element_id.clone(),
                        key: *key,
                    })
                    .collect(),
                subscriptions: subscriptions
                    .iter()
                    .map(|(element_id, key)| EventWaitRecord {
                        element_id: element_id.clone(),
                        key: *key,
                    })
                    .collect(),
            },
        };
        Self {
            element_id: token.element_id.clone(),
            via: token.via.clone(),
            wait,
        }
    }
}

impl From<TokenRecord> for Token {
    fn from(record: TokenRecord) -> Self {
        let state = match record.wait {
            WaitRecord::Ready => TokenState::Ready,
            WaitRecord::Triggered => TokenState::Triggered,
            WaitRecord::WaitingJob => TokenState::WaitingJob,
            WaitRecord::WaitingTimer { timer } => TokenState::WaitingTimer { timer },
            WaitRecord::WaitingMessage { subscription } => {
                TokenState::WaitingMessage { subscription }
            }
            WaitRecord::WaitingEvent {
                timers,
                subscriptions,
            } => TokenState::WaitingEvent {
                timers: timers.into_iter().map(|w| (w.element_id, w.key)).collect(),
                subscriptions: subscriptions
                    .into_iter()
                    .map(|w| (w.element_id, w.key))
                    .collect(),
            },
        };
        Token {
            element_id: record.element_id,
            via: record.via,
            state,
        }
    }
}

// ── Subscriptions ────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubscriptionRecord {
    pub key: SubscriptionKey,
    pub instance_key: InstanceKey,
    pub element_id: ElementId,
    pub message_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&MessageSubscription> for SubscriptionRecord {
    fn from(subscription: &MessageSubscription) -> Self {
        Self {
            key: subscription.key,
            instance_key: subscription.instance_key,
            element_id: subscription.element_id.clone(),
            message_name: subscription.message_name.clone(),
            correlation_key: subscription.correlation_key.clone(),
            created_at: subscription.created_at,
        }
    }
}

impl From<SubscriptionRecord> for MessageSubscription {
    fn from(record: SubscriptionRecord) -> Self {
        Self {
            key: record.key,
            instance_key: record.instance_key,
            element_id: record.element_id,
            message_name: record.message_name,
            correlation_key: record.correlation_key,
            created_at: record.created_at,
        }
    }
}

// ── Timers ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TimerRecord {
    pub key: TimerKey,
    pub instance_key: InstanceKey,
    pub element_id: ElementId,
    pub created_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub due_at: DateTime<Utc>,
    pub state: TimerState,
}

impl From<&Timer> for TimerRecord {
    fn from(timer: &Timer) -> Self {
        Self {
            key: timer.key,
            instance_key: timer.instance_key,
            element_id: timer.element_id.clone(),
            created_at: timer.created_at,
            duration_ms: u64::try_from(timer.duration.as_millis()).unwrap_or(u64::MAX),
            due_at: timer.due_at,
            state: timer.state,
        }
    }
}

impl From<TimerRecord> for Timer {
    fn from(record: TimerRecord) -> Self {
        Self {
            key: record.key,
            instance_key: record.instance_key,
            element_id: record.element_id,
            created_at: record.created_at,
            duration: Duration::from_millis(record.duration_ms),
            due_at: record.due_at,
            state: record.state,
        }
    }
}
