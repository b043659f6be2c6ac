//! Structured run events.
//!
//! Every observable outcome of a run, including each swallowed failure,
//! is a [`TriggerEvent`]. Events render as a single `name key=value ...`
//! line so the journal stays human-readable while remaining greppable.

use std::fmt;
use std::path::PathBuf;

use crate::action::ActionStatus;
use crate::trigger::Phase;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    RunStarted {
        pid: i32,
        run: String,
    },
    PhaseEntered(Phase),
    /// The lock record now names `owner`.
    LockAcquired {
        owner: i32,
        attempts: u32,
    },
    /// A previous owner was found and asked to terminate.
    Preempted {
        previous: i32,
        age_ms: Option<i64>,
    },
    /// The lock record existed but held no usable process id.
    StaleOwnerUnparsable {
        raw: String,
    },
    TerminationFailed {
        pid: i32,
        reason: String,
    },
    LockStoreFailed {
        op: &'static str,
        error: String,
    },
    LogWriteBlocked {
        path: PathBuf,
        error: String,
    },
    BindingResolved {
        key: String,
        value: PathBuf,
    },
    BindingAbsent {
        dir: PathBuf,
    },
    BindingAmbiguous {
        count: usize,
        chosen: PathBuf,
    },
    ActionFailed {
        attempt: u32,
        status: ActionStatus,
    },
    /// Final status of the focus action for this run.
    ActionCompleted {
        status: ActionStatus,
    },
    LockReleased,
    RunFinished {
        pid: i32,
    },
}

impl TriggerEvent {
    /// Stable event name, used as the first token of the rendered line.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::PhaseEntered(_) => "phase",
            Self::LockAcquired { .. } => "lock_acquired",
            Self::Preempted { .. } => "lock_preempted",
            Self::StaleOwnerUnparsable { .. } => "stale_owner_unparsable",
            Self::TerminationFailed { .. } => "termination_failed",
            Self::LockStoreFailed { .. } => "lock_store_failed",
            Self::LogWriteBlocked { .. } => "log_write_blocked",
            Self::BindingResolved { .. } => "binding_resolved",
            Self::BindingAbsent { .. } => "binding_absent",
            Self::BindingAmbiguous { .. } => "binding_ambiguous",
            Self::ActionFailed { .. } => "action_failed",
            Self::ActionCompleted { .. } => "action_completed",
            Self::LockReleased => "lock_released",
            Self::RunFinished { .. } => "run_finished",
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        match self {
            Self::RunStarted { pid, run } => write!(f, " pid={pid} run={run}"),
            Self::PhaseEntered(phase) => write!(f, " state={phase}"),
            Self::LockAcquired { owner, attempts } => {
                write!(f, " owner={owner} attempts={attempts}")
            }
            Self::Preempted { previous, age_ms } => {
                write!(f, " previous={previous}")?;
                match age_ms {
                    Some(ms) => write!(f, " age_ms={ms}"),
                    None => f.write_str(" age_ms=unknown"),
                }
            }
            Self::StaleOwnerUnparsable { raw } => write!(f, " raw={raw:?}"),
            Self::TerminationFailed { pid, reason } => {
                write!(f, " pid={pid} reason={reason:?}")
            }
            Self::LockStoreFailed { op, error } => write!(f, " op={op} error={error:?}"),
            Self::LogWriteBlocked { path, error } => {
                write!(f, " path={} error={error:?}", path.display())
            }
            Self::BindingResolved { key, value } => {
                write!(f, " key={key} value={}", value.display())
            }
            Self::BindingAbsent { dir } => write!(f, " dir={}", dir.display()),
            Self::BindingAmbiguous { count, chosen } => {
                write!(f, " count={count} chosen={}", chosen.display())
            }
            Self::ActionFailed { attempt, status } => {
                write!(f, " attempt={attempt} status={status}")
            }
            Self::ActionCompleted { status } => write!(f, " status={status}"),
            Self::LockReleased => Ok(()),
            Self::RunFinished { pid } => write!(f, " pid={pid}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_name_first() {
        let event = TriggerEvent::LockAcquired {
            owner: 9999,
            attempts: 1,
        };
        assert_eq!(event.to_string(), "lock_acquired owner=9999 attempts=1");
    }

    #[test]
    fn preempted_with_unknown_age() {
        let event = TriggerEvent::Preempted {
            previous: 4321,
            age_ms: None,
        };
        assert_eq!(event.to_string(), "lock_preempted previous=4321 age_ms=unknown");
    }

    #[test]
    fn unparsable_owner_is_quoted() {
        let event = TriggerEvent::StaleOwnerUnparsable {
            raw: "not a pid".into(),
        };
        assert_eq!(event.to_string(), r#"stale_owner_unparsable raw="not a pid""#);
    }

    #[test]
    fn final_status_line() {
        let event = TriggerEvent::ActionCompleted {
            status: ActionStatus::Exited(3),
        };
        assert_eq!(event.to_string(), "action_completed status=exit:3");
    }

    #[test]
    fn lock_released_has_no_fields() {
        assert_eq!(TriggerEvent::LockReleased.to_string(), "lock_released");
    }
}
