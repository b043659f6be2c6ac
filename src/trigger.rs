//! Trigger: one run of the notification-click handler.
//!
//! `Start → LockAcquiring → EnvironmentResolving → ActionRunning →
//! (ActionRetrying)? → LockReleasing → Done`. No transition aborts the
//! run; `release()` always happens.

use std::fmt;

use crate::action::binding::{EnvironmentBinding, SocketSearch};
use crate::action::{ActionInvoker, ActionOutcome, FocusAction};
use crate::clock::Clock;
use crate::events::TriggerEvent;
use crate::journal::{Channel, Journal};
use crate::lock::store::LockStore;
use crate::lock::{Acquisition, LockManager};
use crate::reaper::ProcessTerminator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    LockAcquiring,
    EnvironmentResolving,
    ActionRunning,
    ActionRetrying,
    LockReleasing,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::LockAcquiring => "lock_acquiring",
            Self::EnvironmentResolving => "environment_resolving",
            Self::ActionRunning => "action_running",
            Self::ActionRetrying => "action_retrying",
            Self::LockReleasing => "lock_releasing",
            Self::Done => "done",
        })
    }
}

/// Everything a run did, for inspection in tests.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub phases: Vec<Phase>,
    pub acquisition: Acquisition,
    pub binding: EnvironmentBinding,
    pub outcome: ActionOutcome,
    pub released: bool,
}

pub struct Trigger<S, T, C> {
    lock: LockManager<S, T, C>,
    journal: Journal<C>,
    search: SocketSearch,
    action: FocusAction,
}

impl<S: LockStore, T: ProcessTerminator, C: Clock> Trigger<S, T, C> {
    pub fn new(
        lock: LockManager<S, T, C>,
        journal: Journal<C>,
        search: SocketSearch,
        action: FocusAction,
    ) -> Self {
        Self {
            lock,
            journal,
            search,
            action,
        }
    }

    async fn enter(&self, phases: &mut Vec<Phase>, phase: Phase) {
        tracing::debug!(%phase, "entering phase");
        phases.push(phase);
        self.journal
            .record(Channel::Debug, &TriggerEvent::PhaseEntered(phase))
            .await;
    }

    pub async fn run(&self, self_id: i32, run_id: &str) -> RunReport {
        let mut phases = Vec::new();

        self.enter(&mut phases, Phase::Start).await;
        self.journal
            .record(
                Channel::Primary,
                &TriggerEvent::RunStarted {
                    pid: self_id,
                    run: run_id.to_string(),
                },
            )
            .await;

        self.enter(&mut phases, Phase::LockAcquiring).await;
        let acquisition = self.lock.acquire(self_id);
        for event in &acquisition.events {
            self.journal.record(Channel::Debug, event).await;
        }

        self.enter(&mut phases, Phase::EnvironmentResolving).await;
        let resolution = self.search.discover();
        let binding = resolution.binding;
        match &binding.value {
            None => {
                self.journal
                    .record(
                        Channel::Primary,
                        &TriggerEvent::BindingAbsent {
                            dir: self.search.dir().to_path_buf(),
                        },
                    )
                    .await;
            }
            Some(value) => {
                if resolution.matched > 1 {
                    self.journal
                        .record(
                            Channel::Debug,
                            &TriggerEvent::BindingAmbiguous {
                                count: resolution.matched,
                                chosen: value.clone(),
                            },
                        )
                        .await;
                }
                self.journal
                    .record(
                        Channel::Primary,
                        &TriggerEvent::BindingResolved {
                            key: binding.key.clone(),
                            value: value.clone(),
                        },
                    )
                    .await;
            }
        }

        self.enter(&mut phases, Phase::ActionRunning).await;
        let outcome = ActionInvoker::new(&self.action, &self.journal)
            .run(&binding)
            .await;
        if outcome.retried() {
            phases.push(Phase::ActionRetrying);
        }
        self.journal.flush_diagnosis().await;

        self.enter(&mut phases, Phase::LockReleasing).await;
        let released = match self.lock.release() {
            Ok(()) => {
                self.journal
                    .record(Channel::Debug, &TriggerEvent::LockReleased)
                    .await;
                true
            }
            Err(e) => {
                self.journal
                    .record(
                        Channel::Debug,
                        &TriggerEvent::LockStoreFailed {
                            op: "release",
                            error: e.to_string(),
                        },
                    )
                    .await;
                false
            }
        };

        self.enter(&mut phases, Phase::Done).await;
        self.journal
            .record(Channel::Primary, &TriggerEvent::RunFinished { pid: self_id })
            .await;
        self.journal.flush_diagnosis().await;

        RunReport {
            phases,
            acquisition,
            binding,
            outcome,
            released,
        }
    }
}
