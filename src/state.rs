use crate::error::{ControllerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle phase the controller wants the workload to be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl DesiredState {
    pub const ALL: [DesiredState; 4] = [
        DesiredState::Stopped,
        DesiredState::Starting,
        DesiredState::Running,
        DesiredState::Stopping,
    ];

    /// Whether `self -> next` is one of the permitted edges
    pub fn can_transition_to(self, next: DesiredState) -> bool {
        use DesiredState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// Validate an edge, returning the new state
    pub fn transition_to(self, next: DesiredState) -> Result<DesiredState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ControllerError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Starting and Stopping are in-flight phases that a crashed actor can leave behind
    pub fn is_transitional(self) -> bool {
        matches!(self, DesiredState::Starting | DesiredState::Stopping)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DesiredState::Stopped => "stopped",
            DesiredState::Starting => "starting",
            DesiredState::Running => "running",
            DesiredState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed workload activity, written by the watchdog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub last_active_at: DateTime<Utc>,
    pub active_count: u32,
    pub consecutive_probe_failures: u32,
    /// Start of the current run without activity evidence
    #[serde(default)]
    pub idle_since: Option<DateTime<Utc>>,
    /// First failure of the current probe failure streak
    #[serde(default)]
    pub failing_since: Option<DateTime<Utc>>,
}

impl ActivityRecord {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            last_active_at: now,
            active_count: 0,
            consecutive_probe_failures: 0,
            idle_since: None,
            failing_since: None,
        }
    }
}

impl Default for ActivityRecord {
    fn default() -> Self {
        Self::fresh(DateTime::<Utc>::default())
    }
}

/// Exclusive claim on the right to change [`DesiredState`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionLock {
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TransitionLock {
    pub fn new(owner: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            owner: owner.into(),
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_held_by(&self, owner: &str) -> bool {
        self.owner == owner
    }
}

/// The single durable record shared by every launcher and watchdog instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub desired: DesiredState,
    /// When `desired` last changed
    pub changed_at: DateTime<Utc>,
    /// When the current cycle reached Running
    #[serde(default)]
    pub launched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub activity: ActivityRecord,
    #[serde(default)]
    pub lock: Option<TransitionLock>,
    /// Bumped by the store on every successful swap
    #[serde(default)]
    pub revision: u64,
}

impl StateRecord {
    /// The record a store starts from when nothing has been persisted yet
    pub fn initial() -> Self {
        Self {
            desired: DesiredState::Stopped,
            changed_at: DateTime::<Utc>::default(),
            launched_at: None,
            activity: ActivityRecord::default(),
            lock: None,
            revision: 0,
        }
    }

    /// The lock if one is held and not yet expired
    pub fn live_lock(&self, now: DateTime<Utc>) -> Option<&TransitionLock> {
        self.lock.as_ref().filter(|lock| !lock.is_expired(now))
    }

    /// Whether `owner` may change this record without contending with a lock holder
    pub fn is_writable_by(&self, owner: &str, now: DateTime<Utc>) -> bool {
        match self.live_lock(now) {
            Some(lock) => lock.is_held_by(owner),
            None => true,
        }
    }

    /// A copy moved along `self.desired -> to`; fails without side effects on an invalid edge
    pub fn transitioned(&self, to: DesiredState, now: DateTime<Utc>) -> Result<StateRecord> {
        let desired = self.desired.transition_to(to)?;
        let mut next = self.clone();
        next.desired = desired;
        next.changed_at = now;
        Ok(next)
    }

    /// How long the record has sat in its current phase
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.changed_at).to_std().unwrap_or(Duration::ZERO)
    }
}

impl Default for StateRecord {
    fn default() -> Self {
        Self::initial()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_set_is_exactly_the_declared_one() {
        use DesiredState::*;
        let allowed = [
            (Stopped, Starting),
            (Starting, Running),
            (Starting, Stopped),
            (Running, Stopping),
            (Stopping, Stopped),
        ];

        for from in DesiredState::ALL {
            for to in DesiredState::ALL {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "edge {} -> {}",
                    from,
                    to
                );
                assert_eq!(from.transition_to(to).is_ok(), expected);
            }
        }
    }

    #[test]
    fn test_invalid_transition_leaves_record_untouched() {
        let record = StateRecord::initial();
        let now = Utc::now();

        let err = record.transitioned(DesiredState::Running, now).unwrap_err();
        assert!(matches!(
            err,
            ControllerError::InvalidTransition {
                from: DesiredState::Stopped,
                to: DesiredState::Running
            }
        ));
        assert_eq!(record, StateRecord::initial());
    }

    #[test]
    fn test_lock_expiry() {
        let now = Utc::now();
        let lock = TransitionLock::new("launcher-1", now, Duration::from_secs(30));

        assert!(!lock.is_expired(now));
        assert!(lock.is_expired(now + chrono::Duration::seconds(30)));
        assert!(lock.is_held_by("launcher-1"));
        assert!(!lock.is_held_by("watchdog-1"));
    }

    #[test]
    fn test_writable_by_respects_live_lock() {
        let now = Utc::now();
        let mut record = StateRecord::initial();
        record.lock = Some(TransitionLock::new("a", now, Duration::from_secs(10)));

        assert!(record.is_writable_by("a", now));
        assert!(!record.is_writable_by("b", now));
        assert!(record.is_writable_by("b", now + chrono::Duration::seconds(11)));
    }

    #[test]
    fn test_record_serializes_with_snake_case_state() {
        let record = StateRecord::initial();
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"desired\":\"stopped\""));

        let back: StateRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
