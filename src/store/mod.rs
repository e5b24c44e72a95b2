//! Durable lifecycle state shared by every launcher and watchdog instance.
//!
//! Backends only implement [`StateStore::read`] and
//! [`StateStore::compare_and_swap`]. Everything else, including the
//! transition lock, is layered on top of the swap by [`StateCoordinator`].

mod file;
mod memory;

#[cfg(feature = "aws")]
mod dynamo;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

#[cfg(feature = "aws")]
pub use dynamo::DynamoStateStore;

use crate::clock::Clock;
use crate::error::{ControllerError, Result, StoreError};
use crate::state::{DesiredState, StateRecord, TransitionLock};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};
use uuid::Uuid;

const MAX_SWAP_ATTEMPTS: usize = 32;

/// Storage backend for the single [`StateRecord`]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Current record, or [`StateRecord::initial`] if nothing was persisted yet
    async fn read(&self) -> std::result::Result<StateRecord, StoreError>;

    /// Replace the stored record with `next` if its revision still equals
    /// `expected.revision`. Returns false when another writer got there first.
    async fn compare_and_swap(
        &self,
        expected: &StateRecord,
        next: StateRecord,
    ) -> std::result::Result<bool, StoreError>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// Generate an owner id for locks, e.g. `launcher-3f2a...`
pub fn owner_id(role: &str) -> String {
    format!("{}-{}", role, Uuid::new_v4().simple())
}

/// Lock and transition primitives built on a [`StateStore`] swap
#[derive(Clone)]
pub struct StateCoordinator {
    store: Arc<dyn StateStore>,
    clock: Clock,
    owner: String,
    lock_ttl: Duration,
}

impl StateCoordinator {
    pub fn new(
        store: Arc<dyn StateStore>,
        clock: Clock,
        owner: String,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            owner,
            lock_ttl,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Same store and clock under a different lock owner
    pub fn for_owner(&self, owner: String) -> Self {
        Self {
            owner,
            ..self.clone()
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub async fn read(&self) -> Result<StateRecord> {
        Ok(self.store.read().await?)
    }

    /// Swap `expected` for `next`, returning the stored record on success
    async fn swap(
        &self,
        expected: &StateRecord,
        mut next: StateRecord,
    ) -> Result<Option<StateRecord>> {
        next.revision = expected.revision + 1;
        if self.store.compare_and_swap(expected, next.clone()).await? {
            trace!(revision = next.revision, owner = %self.owner, "state swapped");
            Ok(Some(next))
        } else {
            trace!(revision = expected.revision, owner = %self.owner, "swap lost, retrying");
            Ok(None)
        }
    }

    /// Try to take the transition lock.
    ///
    /// Returns the locked record, or `None` when another owner holds a live lock.
    pub async fn try_acquire_lock(&self) -> Result<Option<StateRecord>> {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let current = self.read().await?;
            let now = self.clock.now();

            if let Some(lock) = current.live_lock(now) {
                if !lock.is_held_by(&self.owner) {
                    debug!(holder = %lock.owner, owner = %self.owner, "transition lock busy");
                    return Ok(None);
                }
            }
            if let Some(lock) = current.lock.as_ref().filter(|l| l.is_expired(now)) {
                warn!(holder = %lock.owner, "taking over expired transition lock");
            }

            let mut next = current.clone();
            next.lock = Some(TransitionLock::new(self.owner.clone(), now, self.lock_ttl));
            if let Some(locked) = self.swap(&current, next).await? {
                debug!(owner = %self.owner, "transition lock acquired");
                return Ok(Some(locked));
            }
        }
        Err(contention())
    }

    /// Release the lock if this owner still holds it
    pub async fn release_lock(&self) -> Result<()> {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let current = self.read().await?;
            match &current.lock {
                Some(lock) if lock.is_held_by(&self.owner) => {}
                _ => return Ok(()),
            }

            let mut next = current.clone();
            next.lock = None;
            if self.swap(&current, next).await?.is_some() {
                debug!(owner = %self.owner, "transition lock released");
                return Ok(());
            }
        }
        Err(contention())
    }

    /// Move `from -> to`, applying `mutate` to the new record in the same swap.
    ///
    /// Fails with `InvalidTransition` for an undeclared edge and with
    /// `StateConflict` when the stored state is no longer `from`; neither
    /// writes anything.
    pub async fn transition<F>(
        &self,
        from: DesiredState,
        to: DesiredState,
        mutate: F,
    ) -> Result<StateRecord>
    where
        F: Fn(&mut StateRecord),
    {
        from.transition_to(to)?;

        for _ in 0..MAX_SWAP_ATTEMPTS {
            let current = self.read().await?;
            if current.desired != from {
                return Err(ControllerError::StateConflict {
                    expected: from,
                    actual: current.desired,
                });
            }

            let mut next = current.transitioned(to, self.clock.now())?;
            mutate(&mut next);
            next.desired = to;
            if let Some(stored) = self.swap(&current, next).await? {
                debug!(%from, %to, owner = %self.owner, "desired state changed");
                return Ok(stored);
            }
        }
        Err(contention())
    }

    /// Read-modify-write that keeps `desired` unchanged, used for activity updates
    pub async fn update_in<F>(&self, expected: DesiredState, mutate: F) -> Result<StateRecord>
    where
        F: Fn(&mut StateRecord),
    {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let current = self.read().await?;
            if current.desired != expected {
                return Err(ControllerError::StateConflict {
                    expected,
                    actual: current.desired,
                });
            }

            let mut next = current.clone();
            mutate(&mut next);
            next.desired = current.desired;
            if let Some(stored) = self.swap(&current, next).await? {
                return Ok(stored);
            }
        }
        Err(contention())
    }
}

fn contention() -> ControllerError {
    StoreError::Lock {
        details: format!("gave up after {} contended swaps", MAX_SWAP_ATTEMPTS),
    }
    .into()
}
