//! Timer scheduler: pull-based timers for timer catch events
//!
//! The scheduler never reads a clock. Callers pass `now` in and ask which
//! timers are due; each timer leaves CREATED at most once.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use process_types::{ElementId, InstanceKey, Timer, TimerKey, TimerState};

use crate::keys::KeyGenerator;

/// Holds every timer the engine created, in any state
#[derive(Debug)]
pub struct TimerScheduler {
    keys: Arc<KeyGenerator>,
    timers: BTreeMap<TimerKey, Timer>,
}

impl TimerScheduler {
    pub fn new(keys: Arc<KeyGenerator>) -> Self {
        Self {
            keys,
            timers: BTreeMap::new(),
        }
    }

    /// Rebuild from persisted timers
    pub fn from_timers(keys: Arc<KeyGenerator>, timers: impl IntoIterator<Item = Timer>) -> Self {
        Self {
            keys,
            timers: timers.into_iter().map(|t| (t.key, t)).collect(),
        }
    }

    /// Create a timer, or return the pending one this element already has
    pub fn register_timer(
        &mut self,
        instance_key: InstanceKey,
        element_id: &ElementId,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Timer {
        if let Some(existing) = self.timers.values().find(|t| {
            t.instance_key == instance_key
                && &t.element_id == element_id
                && t.state == TimerState::Created
        }) {
            return existing.clone();
        }

        let key = TimerKey(self.keys.next());
        let timer = Timer::new(key, instance_key, element_id.clone(), duration, now);

        tracing::debug!(
            timer_key = %key,
            instance_key = %instance_key,
            element_id = %element_id,
            due_at = %timer.due_at,
            "Timer registered"
        );

        self.timers.insert(key, timer.clone());
        timer
    }

    /// CREATED timers with `due_at <= now`, by due time then creation order
    pub fn due_timers(&self, now: DateTime<Utc>) -> Vec<Timer> {
        let mut due: Vec<Timer> = self
            .timers
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|t| (t.due_at, t.key));
        due
    }

    /// Move a timer to TRIGGERED; `None` if it was not CREATED
    pub fn trigger(&mut self, key: TimerKey) -> Option<Timer> {
        let timer = self.timers.get_mut(&key)?;
        if timer.trigger() {
            tracing::debug!(timer_key = %key, instance_key = %timer.instance_key, "Timer triggered");
            Some(timer.clone())
        } else {
            None
        }
    }

    /// Move a timer to CANCELLED; false if it was not CREATED
    pub fn cancel(&mut self, key: TimerKey) -> bool {
        match self.timers.get_mut(&key) {
            Some(timer) => {
                let cancelled = timer.cancel();
                if cancelled {
                    tracing::debug!(timer_key = %key, "Timer cancelled");
                }
                cancelled
            }
            None => false,
        }
    }

    /// Cancel every pending timer of an instance
    pub fn cancel_instance(&mut self, instance_key: InstanceKey) -> usize {
        let mut cancelled = 0;
        for timer in self.timers.values_mut() {
            if timer.instance_key == instance_key && timer.cancel() {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn get(&self, key: TimerKey) -> Option<&Timer> {
        self.timers.get(&key)
    }

    /// All timers in key order
    pub fn all(&self) -> Vec<Timer> {
        self.timers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
