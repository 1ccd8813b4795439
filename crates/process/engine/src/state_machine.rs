//! State machine: moves an instance's tokens through its element graph
//!
//! One call to [`StateMachine::step`] gives every token that is ready (or
//! whose wait was satisfied) one unit of work. Tokens that reach a catch
//! event or an unfinished task park in a waiting state; external triggers
//! flip them to `Triggered` through [`StateMachine::resume`] and the next
//! step carries them on.

use std::time::Duration;

use chrono::{DateTime, Utc};
use process_types::{
    ElementId, FlowId, InstanceKey, ProcessInstance, SubscriptionKey, TimerKey, Token, TokenState,
};

use crate::behavior::{behavior_for, Advance, ExecutionContext};
use crate::condition::ConditionEvaluator;
use crate::error::{EngineFault, EngineResult};
use crate::handler::HandlerRegistry;

/// Where the state machine parks waits
pub trait WaitRegistry {
    fn register_timer(
        &mut self,
        instance_key: InstanceKey,
        element_id: &ElementId,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> TimerKey;

    fn subscribe(
        &mut self,
        instance_key: InstanceKey,
        element_id: &ElementId,
        message_name: &str,
        correlation_key: Option<String>,
        now: DateTime<Utc>,
    ) -> SubscriptionKey;

    fn cancel_timer(&mut self, key: TimerKey);

    fn withdraw_subscription(&mut self, key: SubscriptionKey);
}

/// Outcome of a single step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepResult {
    /// Work was done; these elements received new tokens
    Advanced { activated: Vec<ElementId> },
    /// Every token is parked on a wait
    Waiting,
    /// The last token was consumed
    Completed,
    /// The instance is not ACTIVE; nothing happened
    Inactive,
}

/// A satisfied wait, as delivered to [`StateMachine::resume`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitRef {
    Timer(TimerKey),
    Message(SubscriptionKey),
    Job(ElementId),
}

/// Executes element semantics for process instances
#[derive(Debug, Default)]
pub struct StateMachine {
    conditions: ConditionEvaluator,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put the initial token on the start event
    pub fn initialize(&self, instance: &mut ProcessInstance) -> EngineResult<()> {
        let definition = instance
            .definition()
            .cloned()
            .ok_or(EngineFault::UnlinkedDefinition(instance.key))?;
        let start = definition
            .graph
            .start_event()
            .ok_or(process_types::ValidationError::NoStartEvent)?;
        instance.tokens.push(Token::ready(start.id.clone(), None));
        Ok(())
    }

    /// Give every runnable token one unit of work.
    ///
    /// A task failure, an expression error or a gateway without a matching
    /// flow moves the instance to FAILED and is returned; the failing token
    /// stays where it was so a retry re-runs it.
    pub fn step(
        &self,
        instance: &mut ProcessInstance,
        handlers: &HandlerRegistry,
        waits: &mut dyn WaitRegistry,
        now: DateTime<Utc>,
    ) -> EngineResult<StepResult> {
        if !instance.is_active() {
            return Ok(StepResult::Inactive);
        }

        let definition = instance
            .definition()
            .cloned()
            .ok_or(EngineFault::UnlinkedDefinition(instance.key))?;
        let graph = &definition.graph;

        if !instance.tokens.iter().any(|t| t.state.is_runnable()) {
            if instance.tokens.is_empty() {
                self.complete(instance);
                return Ok(StepResult::Completed);
            }
            return Ok(StepResult::Waiting);
        }

        let pending = std::mem::take(&mut instance.tokens);
        let mut next = Vec::with_capacity(pending.len());
        let mut activated = Vec::new();
        let mut remaining = pending.into_iter();

        while let Some(token) = remaining.next() {
            if !token.state.is_runnable() {
                next.push(token);
                continue;
            }

            let Some(element) = graph.element(&token.element_id) else {
                let element_id = token.element_id.clone();
                next.push(token);
                next.extend(remaining);
                instance.tokens = next;
                return Err(EngineFault::MissingElement {
                    process_key: definition.process_key,
                    element_id,
                }
                .into());
            };

            tracing::trace!(
                instance_key = %instance.key,
                element_id = %element.id,
                kind = element.kind.label(),
                "Executing element"
            );

            let mut ctx = ExecutionContext {
                instance: &mut *instance,
                graph,
                handlers,
                conditions: &self.conditions,
                waits: &mut *waits,
                now,
            };
            let advance = behavior_for(&element.kind).execute(&mut ctx, element, &token);

            match advance {
                Ok(Advance::Continue(flows)) => {
                    for flow_id in flows {
                        let Some(flow) = graph.flow(&flow_id) else {
                            next.push(token);
                            next.extend(remaining);
                            instance.tokens = next;
                            return Err(EngineFault::MissingFlow {
                                process_key: definition.process_key,
                                flow_id,
                            }
                            .into());
                        };
                        activated.push(flow.target.clone());
                        next.push(Token::ready(flow.target.clone(), Some(flow.id.clone())));
                    }
                }
                Ok(Advance::Wait(state)) => next.push(Token { state, ..token }),
                Ok(Advance::Absorb) => {}
                Err(error) => {
                    next.push(token);
                    next.extend(remaining);
                    instance.tokens = next;
                    if error.fails_instance() {
                        instance.fail(error.to_string());
                        tracing::warn!(
                            instance_key = %instance.key,
                            element_id = %element.id,
                            error = %error,
                            "Process instance failed"
                        );
                    }
                    return Err(error);
                }
            }
        }

        instance.tokens = next;
        if instance.tokens.is_empty() {
            self.complete(instance);
            return Ok(StepResult::Completed);
        }
        Ok(StepResult::Advanced { activated })
    }

    /// Mark a satisfied wait on the instance's tokens.
    ///
    /// Returns whether a token was waiting for it. For an event-based
    /// gateway the losing waits are cancelled and the token moves onto the
    /// catch event that fired.
    pub fn resume(
        &self,
        instance: &mut ProcessInstance,
        wait: &WaitRef,
        waits: &mut dyn WaitRegistry,
    ) -> bool {
        if instance.is_terminal() {
            return false;
        }

        for index in 0..instance.tokens.len() {
            let winner = match (&instance.tokens[index].state, wait) {
                (TokenState::WaitingTimer { timer }, WaitRef::Timer(key)) if timer == key => None,
                (TokenState::WaitingMessage { subscription }, WaitRef::Message(key))
                    if subscription == key =>
                {
                    None
                }
                (TokenState::WaitingJob, WaitRef::Job(element_id))
                    if &instance.tokens[index].element_id == element_id =>
                {
                    None
                }
                (
                    TokenState::WaitingEvent {
                        timers,
                        subscriptions,
                    },
                    _,
                ) => match event_winner(timers, subscriptions, wait) {
                    Some(element_id) => {
                        for (_, timer) in timers {
                            if !matches!(wait, WaitRef::Timer(key) if key == timer) {
                                waits.cancel_timer(*timer);
                            }
                        }
                        for (_, subscription) in subscriptions {
                            if !matches!(wait, WaitRef::Message(key) if key == subscription) {
                                waits.withdraw_subscription(*subscription);
                            }
                        }
                        Some(element_id)
                    }
                    None => continue,
                },
                _ => continue,
            };

            match winner {
                None => instance.tokens[index].state = TokenState::Triggered,
                Some(element_id) => {
                    let via = gateway_flow(instance, &instance.tokens[index].element_id, &element_id);
                    instance.tokens[index] = Token {
                        element_id,
                        via,
                        state: TokenState::Triggered,
                    };
                }
            }
            return true;
        }

        false
    }

    fn complete(&self, instance: &mut ProcessInstance) {
        instance.complete();
        tracing::info!(
            instance_key = %instance.key,
            process_key = %instance.process_key,
            "Process instance completed"
        );
    }
}

fn event_winner(
    timers: &[(ElementId, TimerKey)],
    subscriptions: &[(ElementId, SubscriptionKey)],
    wait: &WaitRef,
) -> Option<ElementId> {
    match wait {
        WaitRef::Timer(key) => timers
            .iter()
            .find(|(_, t)| t == key)
            .map(|(e, _)| e.clone()),
        WaitRef::Message(key) => subscriptions
            .iter()
            .find(|(_, s)| s == key)
            .map(|(e, _)| e.clone()),
        WaitRef::Job(_) => None,
    }
}

fn gateway_flow(instance: &ProcessInstance, gateway: &ElementId, target: &ElementId) -> Option<FlowId> {
    let definition = instance.definition()?;
    definition
        .graph
        .outgoing(gateway)
        .into_iter()
        .find(|f| &f.target == target)
        .map(|f| f.id.clone())
}
