//! Lock manager: newest invocation always wins.
//!
//! `acquire()` never fails and never waits. Whatever owner it finds is
//! sent a kill request regardless of the record's age, its record is
//! discarded, and the caller's id is written in its place. A run that is
//! killed before `release()` leaves its record behind; the next run's
//! preemption clears it.

pub mod store;

use std::path::PathBuf;

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::clock::Clock;
use crate::events::TriggerEvent;
use crate::reaper::ProcessTerminator;
use store::{LockStore, StoredRecord};

/// Exclusive-create attempts before the record is overwritten outright.
pub const MAX_CLAIM_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock {op} failed at {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A parsed lock record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRecord {
    pub owner: i32,
    pub created_at: Option<DateTime<Local>>,
}

impl LockRecord {
    /// Parse the first whitespace-delimited token as the owner pid.
    ///
    /// Returns the raw contents on failure. Non-positive ids are rejected
    /// since they can never name a single live process.
    pub fn parse(stored: &StoredRecord) -> Result<Self, String> {
        stored
            .contents
            .split_whitespace()
            .next()
            .and_then(|token| token.parse::<i32>().ok())
            .filter(|owner| *owner > 0)
            .map(|owner| Self {
                owner,
                created_at: stored.modified,
            })
            .ok_or_else(|| stored.contents.trim().to_string())
    }
}

/// What `acquire()` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acquisition {
    /// Exclusive-create attempts made.
    pub attempts: u32,
    /// Owners that were sent a termination request, in order.
    pub preempted: Vec<i32>,
    pub events: Vec<TriggerEvent>,
}

impl Acquisition {
    pub fn acquired(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, TriggerEvent::LockAcquired { .. }))
    }
}

/// Arbitrates the single lock record between racing invocations.
pub struct LockManager<S, T, C> {
    store: S,
    terminator: T,
    clock: C,
}

impl<S: LockStore, T: ProcessTerminator, C: Clock> LockManager<S, T, C> {
    pub fn new(store: S, terminator: T, clock: C) -> Self {
        Self {
            store,
            terminator,
            clock,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Claim the lock for `self_id`, preempting any current owner.
    pub fn acquire(&self, self_id: i32) -> Acquisition {
        let mut acquisition = Acquisition::default();
        let mut create_failed = false;

        for attempt in 1..=MAX_CLAIM_ATTEMPTS {
            acquisition.attempts = attempt;
            match self.store.create_exclusive(self_id) {
                Ok(true) => {
                    acquisition.events.push(TriggerEvent::LockAcquired {
                        owner: self_id,
                        attempts: attempt,
                    });
                    return acquisition;
                }
                Ok(false) => self.preempt(self_id, &mut acquisition),
                Err(e) => {
                    acquisition.events.push(TriggerEvent::LockStoreFailed {
                        op: "create",
                        error: e.to_string(),
                    });
                    create_failed = true;
                    break;
                }
            }
        }

        // Racers kept winning the exclusive create, or the store is
        // misbehaving. The newest run still claims the slot, and an owner
        // named in the record is still preempted first.
        if create_failed {
            self.preempt(self_id, &mut acquisition);
        }
        match self.store.overwrite(self_id) {
            Ok(()) => acquisition.events.push(TriggerEvent::LockAcquired {
                owner: self_id,
                attempts: acquisition.attempts,
            }),
            Err(e) => acquisition.events.push(TriggerEvent::LockStoreFailed {
                op: "overwrite",
                error: e.to_string(),
            }),
        }
        acquisition
    }

    /// Kill whatever owner the current record names and delete it.
    ///
    /// The record is left alone if it changed while the owner was being
    /// killed; the next claim attempt deals with the newer owner.
    fn preempt(&self, self_id: i32, acquisition: &mut Acquisition) {
        let seen = match self.store.read() {
            // Released between our create and read.
            Ok(None) => return,
            Ok(Some(stored)) => {
                match LockRecord::parse(&stored) {
                    Ok(record) if record.owner == self_id => {}
                    Ok(record) => {
                        let age_ms = record
                            .created_at
                            .map(|at| (self.clock.now() - at).num_milliseconds());
                        acquisition.events.push(TriggerEvent::Preempted {
                            previous: record.owner,
                            age_ms,
                        });
                        if let Err(e) = self.terminator.terminate(record.owner) {
                            acquisition.events.push(TriggerEvent::TerminationFailed {
                                pid: record.owner,
                                reason: e.to_string(),
                            });
                        }
                        acquisition.preempted.push(record.owner);
                    }
                    Err(raw) => acquisition
                        .events
                        .push(TriggerEvent::StaleOwnerUnparsable { raw }),
                }
                Some(stored.contents)
            }
            Err(e) => {
                acquisition.events.push(TriggerEvent::LockStoreFailed {
                    op: "read",
                    error: e.to_string(),
                });
                None
            }
        };

        if seen.as_deref().is_some_and(|seen| self.replaced(seen)) {
            tracing::debug!("lock record replaced during preemption, keeping it");
            return;
        }
        if let Err(e) = self.store.remove() {
            acquisition.events.push(TriggerEvent::LockStoreFailed {
                op: "remove",
                error: e.to_string(),
            });
        }
    }

    /// Whether the record now holds something other than `seen`.
    fn replaced(&self, seen: &str) -> bool {
        matches!(self.store.read(), Ok(Some(now)) if now.contents != seen)
    }

    /// Delete the lock record unconditionally.
    pub fn release(&self) -> Result<(), LockError> {
        self.store.remove()
    }
}
