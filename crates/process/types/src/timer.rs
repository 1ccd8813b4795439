//! Timers backing timer catch events

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{ElementId, InstanceKey, TimerKey};

/// Lifecycle of a timer; transitions only move forward
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerState {
    Created,
    Triggered,
    Cancelled,
}

impl std::fmt::Display for TimerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Created => "CREATED",
            Self::Triggered => "TRIGGERED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(label)
    }
}

/// A scheduled wake-up for one timer catch event of one instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timer {
    pub key: TimerKey,
    pub instance_key: InstanceKey,
    pub element_id: ElementId,
    pub created_at: DateTime<Utc>,
    pub duration: Duration,
    /// Fixed at creation: `created_at + duration`
    pub due_at: DateTime<Utc>,
    pub state: TimerState,
}

impl Timer {
    pub fn new(
        key: TimerKey,
        instance_key: InstanceKey,
        element_id: ElementId,
        duration: Duration,
        created_at: DateTime<Utc>,
    ) -> Self {
        let due_at = TimeDelta::from_std(duration)
            .ok()
            .and_then(|delta| created_at.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            key,
            instance_key,
            element_id,
            created_at,
            duration,
            due_at,
            state: TimerState::Created,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == TimerState::Created && self.due_at <= now
    }

    /// CREATED → TRIGGERED; false if the timer already left CREATED
    pub fn trigger(&mut self) -> bool {
        self.advance(TimerState::Triggered)
    }

    /// CREATED → CANCELLED; false if the timer already left CREATED
    pub fn cancel(&mut self) -> bool {
        self.advance(TimerState::Cancelled)
    }

    fn advance(&mut self, next: TimerState) -> bool {
        if self.state != TimerState::Created {
            return false;
        }
        self.state = next;
        true
    }
}

impl std::fmt::Display for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "State     : {}", self.state)?;
        writeln!(f, "CreatedAt : {}", self.created_at.to_rfc3339())?;
        writeln!(f, "Duration  : {}", crate::duration::format_iso8601(self.duration))?;
        write!(f, "DueAt     : {}", self.due_at.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn timer() -> Timer {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Timer::new(
            TimerKey(5),
            InstanceKey(2),
            ElementId::new("wait"),
            Duration::from_secs(5),
            created,
        )
    }

    #[test]
    fn test_due_at_is_created_plus_duration() {
        let timer = timer();
        assert_eq!(timer.due_at - timer.created_at, TimeDelta::seconds(5));
        assert!(!timer.is_due(timer.created_at + TimeDelta::seconds(4)));
        assert!(timer.is_due(timer.created_at + TimeDelta::seconds(5)));
    }

    #[test]
    fn test_transitions_only_move_forward() {
        let mut timer = timer();
        assert!(timer.trigger());
        assert!(!timer.trigger());
        assert!(!timer.cancel());
        assert_eq!(timer.state, TimerState::Triggered);
        assert!(!timer.is_due(timer.due_at));
    }

    #[test]
    fn test_display_layout() {
        let rendered = timer().to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "State     : CREATED");
        assert!(lines[1].starts_with("CreatedAt : 2024-01-01T00:00:00"));
        assert_eq!(lines[2], "Duration  : PT5S");
        assert!(lines[3].starts_with("DueAt     : 2024-01-01T00:00:05"));
    }
}
