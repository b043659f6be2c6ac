//! Action invoker: run the delegated focus action.
//!
//! The first attempt appends the action's stdout and stderr to the primary
//! log. A failed first attempt gets exactly one retry with every stream
//! discarded, so a held log artifact cannot block it. Only the final
//! status is recorded on the primary channel.

pub mod binding;

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use crate::clock::Clock;
use crate::events::TriggerEvent;
use crate::journal::{Channel, Journal};
use crate::trigger::Phase;
use binding::EnvironmentBinding;

/// Outcome of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Exited(i32),
    Signaled(i32),
    /// Killed after exceeding the action timeout.
    TimedOut,
    /// The executable could not be started or waited on.
    SpawnFailed,
    /// The logged attempt was skipped because the primary log could not
    /// be opened.
    LogUnavailable,
}

impl ActionStatus {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl From<ExitStatus> for ActionStatus {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Exited(code),
            (None, Some(signal)) => Self::Signaled(signal),
            (None, None) => Self::Exited(-1),
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit:{code}"),
            Self::Signaled(signal) => write!(f, "signal:{signal}"),
            Self::TimedOut => f.write_str("timeout"),
            Self::SpawnFailed => f.write_str("spawn_failed"),
            Self::LogUnavailable => f.write_str("log_unavailable"),
        }
    }
}

/// Where an attempt's output goes.
pub enum Output {
    /// Appended to an already-open log file.
    Logged(std::fs::File),
    Discarded,
}

/// The external focus executable.
#[derive(Debug, Clone)]
pub struct FocusAction {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl FocusAction {
    /// Run once and wait, killing the child if it outlives the timeout.
    pub async fn execute(&self, binding: &EnvironmentBinding, output: Output) -> ActionStatus {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(value) = &binding.value {
            cmd.env(&binding.key, value);
        }
        match output {
            Output::Logged(file) => {
                let stderr = file
                    .try_clone()
                    .map(Stdio::from)
                    .unwrap_or_else(|_| Stdio::null());
                cmd.stdout(Stdio::from(file)).stderr(stderr);
            }
            Output::Discarded => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(program = %self.program.display(), error = %e, "focus action spawn failed");
                return ActionStatus::SpawnFailed;
            }
        };

        let waited = tokio::time::timeout(self.timeout, child.wait()).await;
        match waited {
            Ok(Ok(status)) => status.into(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "focus action wait failed");
                ActionStatus::SpawnFailed
            }
            Err(_) => {
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "focus action timed out");
                let _ = child.start_kill();
                let _ = child.wait().await;
                ActionStatus::TimedOut
            }
        }
    }
}

/// Statuses of every attempt, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub attempts: Vec<ActionStatus>,
}

impl ActionOutcome {
    pub fn status(&self) -> ActionStatus {
        self.attempts
            .last()
            .copied()
            .unwrap_or(ActionStatus::SpawnFailed)
    }

    pub fn retried(&self) -> bool {
        self.attempts.len() > 1
    }
}

pub struct ActionInvoker<'a, C> {
    action: &'a FocusAction,
    journal: &'a Journal<C>,
}

impl<'a, C: Clock> ActionInvoker<'a, C> {
    pub fn new(action: &'a FocusAction, journal: &'a Journal<C>) -> Self {
        Self { action, journal }
    }

    pub async fn run(&self, binding: &EnvironmentBinding) -> ActionOutcome {
        let first = match self.journal.open_primary().await {
            Ok(file) => self.action.execute(binding, Output::Logged(file)).await,
            Err(_) => ActionStatus::LogUnavailable,
        };
        let mut attempts = vec![first];

        if !first.success() {
            self.failed(1, first).await;
            self.journal
                .record(Channel::Debug, &TriggerEvent::PhaseEntered(Phase::ActionRetrying))
                .await;
            let second = self.action.execute(binding, Output::Discarded).await;
            if !second.success() {
                self.failed(2, second).await;
            }
            attempts.push(second);
        }

        let outcome = ActionOutcome { attempts };
        self.journal
            .record(
                Channel::Primary,
                &TriggerEvent::ActionCompleted {
                    status: outcome.status(),
                },
            )
            .await;
        outcome
    }

    async fn failed(&self, attempt: u32, status: ActionStatus) {
        self.journal
            .record(Channel::Debug, &TriggerEvent::ActionFailed { attempt, status })
            .await;
    }
}
