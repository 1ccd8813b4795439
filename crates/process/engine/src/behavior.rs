//! Element behaviors: what each element kind does with an arriving token
//!
//! Dispatch is over the closed [`ElementKind`] set. Every behavior gets the
//! token, the instance it belongs to and the engine services it may need,
//! and answers with an [`Advance`] telling the state machine where the token
//! goes next.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use process_types::{
    Element, ElementKind, FlowId, ProcessGraph, ProcessInstance, Token, TokenState,
};

use crate::condition::ConditionEvaluator;
use crate::error::{EngineError, EngineResult};
use crate::handler::{HandlerRegistry, Job, JobOutcome};
use crate::state_machine::WaitRegistry;

/// Where a token goes after its element ran
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Advance {
    /// Leave along these flows, one new token each
    Continue(Vec<FlowId>),
    /// Stay on the element in this state
    Wait(TokenState),
    /// The token is consumed
    Absorb,
}

/// Everything a behavior may touch while handling one token
pub(crate) struct ExecutionContext<'a> {
    pub instance: &'a mut ProcessInstance,
    pub graph: &'a ProcessGraph,
    pub handlers: &'a HandlerRegistry,
    pub conditions: &'a ConditionEvaluator,
    pub waits: &'a mut dyn WaitRegistry,
    pub now: DateTime<Utc>,
}

impl ExecutionContext<'_> {
    fn all_outgoing(&self, element: &Element) -> Advance {
        Advance::Continue(
            self.graph
                .outgoing(&element.id)
                .into_iter()
                .map(|f| f.id.clone())
                .collect(),
        )
    }
}

pub(crate) trait ElementBehavior: Send + Sync {
    fn execute(
        &self,
        ctx: &mut ExecutionContext<'_>,
        element: &Element,
        token: &Token,
    ) -> EngineResult<Advance>;
}

/// The behavior for an element kind
pub(crate) fn behavior_for(kind: &ElementKind) -> &'static dyn ElementBehavior {
    match kind {
        ElementKind::StartEvent => &StartEventBehavior,
        ElementKind::EndEvent => &EndEventBehavior,
        ElementKind::ServiceTask { .. } => &ServiceTaskBehavior,
        ElementKind::UserTask { .. } => &UserTaskBehavior,
        ElementKind::ExclusiveGateway { .. } => &ExclusiveGatewayBehavior,
        ElementKind::ParallelGateway => &ParallelGatewayBehavior,
        ElementKind::EventBasedGateway => &EventGatewayBehavior,
        ElementKind::TimerCatchEvent { .. } => &TimerEventBehavior,
        ElementKind::MessageCatchEvent { .. } => &MessageEventBehavior,
    }
}

// ── Events ───────────────────────────────────────────────────────────

struct StartEventBehavior;

impl ElementBehavior for StartEventBehavior {
    fn execute(
        &self,
        ctx: &mut ExecutionContext<'_>,
        element: &Element,
        _token: &Token,
    ) -> EngineResult<Advance> {
        Ok(ctx.all_outgoing(element))
    }
}

struct EndEventBehavior;

impl ElementBehavior for EndEventBehavior {
    fn execute(
        &self,
        _ctx: &mut ExecutionContext<'_>,
        _element: &Element,
        _token: &Token,
    ) -> EngineResult<Advance> {
        Ok(Advance::Absorb)
    }
}

struct TimerEventBehavior;

impl ElementBehavior for TimerEventBehavior {
    fn execute(
        &self,
        ctx: &mut ExecutionContext<'_>,
        element: &Element,
        token: &Token,
    ) -> EngineResult<Advance> {
        if token.state == TokenState::Triggered {
            return Ok(ctx.all_outgoing(element));
        }
        let ElementKind::TimerCatchEvent { duration } = &element.kind else {
            return Ok(Advance::Wait(token.state.clone()));
        };
        let timer = register_timer(ctx, element, *duration);
        Ok(Advance::Wait(TokenState::WaitingTimer { timer }))
    }
}

struct MessageEventBehavior;

impl ElementBehavior for MessageEventBehavior {
    fn execute(
        &self,
        ctx: &mut ExecutionContext<'_>,
        element: &Element,
        token: &Token,
    ) -> EngineResult<Advance> {
        if token.state == TokenState::Triggered {
            return Ok(ctx.all_outgoing(element));
        }
        let subscription = subscribe(ctx, element)?;
        Ok(Advance::Wait(TokenState::WaitingMessage { subscription }))
    }
}

fn register_timer(
    ctx: &mut ExecutionContext<'_>,
    element: &Element,
    duration: Duration,
) -> process_types::TimerKey {
    ctx.waits
        .register_timer(ctx.instance.key, &element.id, duration, ctx.now)
}

fn subscribe(
    ctx: &mut ExecutionContext<'_>,
    element: &Element,
) -> EngineResult<process_types::SubscriptionKey> {
    let (message_name, key) = correlation(ctx, element)?;
    Ok(ctx
        .waits
        .subscribe(ctx.instance.key, &element.id, message_name, key, ctx.now))
}

/// Message name and evaluated correlation key of a message catch event
fn correlation<'e>(
    ctx: &ExecutionContext<'_>,
    element: &'e Element,
) -> EngineResult<(&'e str, Option<String>)> {
    let ElementKind::MessageCatchEvent {
        message_name,
        correlation_key,
    } = &element.kind
    else {
        return Err(EngineError::Expression {
            expression: element.id.to_string(),
            message: "not a message catch event".into(),
        });
    };
    let key = match correlation_key {
        Some(expression) => ctx
            .conditions
            .correlation_key(expression, &ctx.instance.variables)?,
        None => None,
    };
    Ok((message_name.as_str(), key))
}

// ── Tasks ────────────────────────────────────────────────────────────

struct ServiceTaskBehavior;

impl ServiceTaskBehavior {
    fn run(
        &self,
        ctx: &mut ExecutionContext<'_>,
        element: &Element,
        token: &Token,
        task_type: Option<&str>,
        headers: &BTreeMap<String, String>,
    ) -> EngineResult<Advance> {
        if token.state == TokenState::Triggered {
            return Ok(ctx.all_outgoing(element));
        }

        let Some(handler) = ctx.handlers.resolve(task_type, &element.id) else {
            tracing::debug!(
                instance_key = %ctx.instance.key,
                element_id = %element.id,
                "No handler registered, waiting for job completion"
            );
            return Ok(Advance::Wait(TokenState::WaitingJob));
        };

        let instance_key = ctx.instance.key;
        let mut job = Job::new(
            instance_key,
            &element.id,
            &element.name,
            task_type,
            headers,
            &mut ctx.instance.variables,
        );
        match handler.execute(&mut job) {
            Ok(JobOutcome::Completed) => Ok(ctx.all_outgoing(element)),
            Ok(JobOutcome::Pending) => Ok(Advance::Wait(TokenState::WaitingJob)),
            Err(failure) => Err(EngineError::TaskExecution {
                instance_key,
                element_id: element.id.clone(),
                message: failure.message,
            }),
        }
    }
}

impl ElementBehavior for ServiceTaskBehavior {
    fn execute(
        &self,
        ctx: &mut ExecutionContext<'_>,
        element: &Element,
        token: &Token,
    ) -> EngineResult<Advance> {
        match &element.kind {
            ElementKind::ServiceTask { task_type, headers } => {
                self.run(ctx, element, token, task_type.as_deref(), headers)
            }
            _ => self.run(ctx, element, token, None, &BTreeMap::new()),
        }
    }
}

/// User tasks run through the service-task path, keyed by element ID
struct UserTaskBehavior;

impl ElementBehavior for UserTaskBehavior {
    fn execute(
        &self,
        ctx: &mut ExecutionContext<'_>,
        element: &Element,
        token: &Token,
    ) -> EngineResult<Advance> {
        let mut headers = match &element.kind {
            ElementKind::UserTask { headers, .. } => headers.clone(),
            _ => BTreeMap::new(),
        };
        if let ElementKind::UserTask {
            assignee: Some(assignee),
            ..
        } = &element.kind
        {
            headers
                .entry("assignee".to_string())
                .or_insert_with(|| assignee.clone());
        }
        ServiceTaskBehavior.run(ctx, element, token, None, &headers)
    }
}

// ── Gateways ─────────────────────────────────────────────────────────

struct ExclusiveGatewayBehavior;

impl ElementBehavior for ExclusiveGatewayBehavior {
    fn execute(
        &self,
        ctx: &mut ExecutionContext<'_>,
        element: &Element,
        _token: &Token,
    ) -> EngineResult<Advance> {
        let default_flow = match &element.kind {
            ElementKind::ExclusiveGateway { default_flow } => default_flow.as_ref(),
            _ => None,
        };

        for flow in ctx.graph.outgoing(&element.id) {
            if Some(&flow.id) == default_flow {
                continue;
            }
            let taken = match &flow.condition {
                Some(condition) => ctx.conditions.evaluate(condition, &ctx.instance.variables)?,
                None => true,
            };
            if taken {
                return Ok(Advance::Continue(vec![flow.id.clone()]));
            }
        }

        match default_flow {
            Some(flow) => Ok(Advance::Continue(vec![flow.clone()])),
            None => Err(EngineError::NoMatchingFlow {
                instance_key: ctx.instance.key,
                element_id: element.id.clone(),
            }),
        }
    }
}

struct ParallelGatewayBehavior;

impl ElementBehavior for ParallelGatewayBehavior {
    fn execute(
        &self,
        ctx: &mut ExecutionContext<'_>,
        element: &Element,
        token: &Token,
    ) -> EngineResult<Advance> {
        let incoming = ctx.graph.incoming(&element.id);
        let Some(via) = token.via.clone().filter(|_| incoming.len() > 1) else {
            return Ok(ctx.all_outgoing(element));
        };

        let arrivals = ctx
            .instance
            .join_arrivals
            .entry(element.id.clone())
            .or_default();
        *arrivals.entry(via).or_insert(0) += 1;

        let complete = incoming
            .iter()
            .all(|f| arrivals.get(&f.id).copied().unwrap_or(0) > 0);
        if !complete {
            return Ok(Advance::Absorb);
        }

        for flow in &incoming {
            if let Some(count) = arrivals.get_mut(&flow.id) {
                *count -= 1;
            }
        }
        arrivals.retain(|_, count| *count > 0);
        if arrivals.is_empty() {
            ctx.instance.join_arrivals.remove(&element.id);
        }

        tracing::debug!(
            instance_key = %ctx.instance.key,
            element_id = %element.id,
            "Parallel join completed"
        );
        Ok(ctx.all_outgoing(element))
    }
}

struct EventGatewayBehavior;

impl ElementBehavior for EventGatewayBehavior {
    fn execute(
        &self,
        ctx: &mut ExecutionContext<'_>,
        element: &Element,
        _token: &Token,
    ) -> EngineResult<Advance> {
        // Every correlation key is evaluated before any wait is parked
        let graph = ctx.graph;
        let mut timer_targets = Vec::new();
        let mut message_targets = Vec::new();
        for flow in graph.outgoing(&element.id) {
            let Some(target) = graph.element(&flow.target) else {
                continue;
            };
            match &target.kind {
                ElementKind::TimerCatchEvent { duration } => {
                    timer_targets.push((target, *duration));
                }
                ElementKind::MessageCatchEvent { .. } => {
                    let (message_name, key) = correlation(ctx, target)?;
                    message_targets.push((target, message_name, key));
                }
                _ => {}
            }
        }

        let mut timers = Vec::new();
        for (target, duration) in timer_targets {
            let timer = register_timer(ctx, target, duration);
            timers.push((target.id.clone(), timer));
        }
        let mut subscriptions = Vec::new();
        for (target, message_name, key) in message_targets {
            let subscription =
                ctx.waits
                    .subscribe(ctx.instance.key, &target.id, message_name, key, ctx.now);
            subscriptions.push((target.id.clone(), subscription));
        }

        Ok(Advance::Wait(TokenState::WaitingEvent {
            timers,
            subscriptions,
        }))
    }
}
