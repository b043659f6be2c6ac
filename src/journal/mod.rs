//! Journal: append-only primary and debug log channels.
//!
//! Writes are best-effort and never delay the action path. A failed
//! primary write is not retried: it is downgraded to a `log_write_blocked`
//! line on the debug channel. The first failure also schedules one lock
//! diagnosis of the primary artifact, which only runs when the owner calls
//! `flush_diagnosis`. Debug writes have no fallback.

pub mod diagnose;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::clock::Clock;
use crate::events::TriggerEvent;
use diagnose::LockDiagnoser;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Primary,
    Debug,
}

#[derive(Debug, Error)]
pub enum JournalError {
    /// The artifact could not be opened or written, typically because
    /// another process holds it.
    #[error("cannot write {path}: {source}")]
    Blocked {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One timestamped log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl LogEvent {
    /// `[YYYY-MM-DD HH:MM:SS] message\n`
    pub fn line(&self) -> String {
        format!("[{}] {}\n", self.timestamp.format(TIMESTAMP_FORMAT), self.message)
    }
}

/// Lock diagnosis of the primary artifact; runs at most once.
#[derive(Debug)]
enum Diagnosis {
    Clear,
    Pending(PathBuf),
    Done,
}

pub struct Journal<C> {
    primary: PathBuf,
    debug: PathBuf,
    clock: C,
    diagnoser: LockDiagnoser,
    diagnosis: Mutex<Diagnosis>,
}

impl<C: Clock> Journal<C> {
    pub fn new(primary: PathBuf, debug: PathBuf, clock: C, diagnoser: LockDiagnoser) -> Self {
        Self {
            primary,
            debug,
            clock,
            diagnoser,
            diagnosis: Mutex::new(Diagnosis::Clear),
        }
    }

    pub fn path(&self, channel: Channel) -> &Path {
        match channel {
            Channel::Primary => &self.primary,
            Channel::Debug => &self.debug,
        }
    }

    pub fn event(&self, message: impl Into<String>) -> LogEvent {
        LogEvent {
            timestamp: self.clock.now(),
            message: message.into(),
        }
    }

    /// Append one event to `channel`.
    ///
    /// A primary failure records the blocked write before returning the
    /// error. Debug failures are returned without any further fallback.
    pub async fn append(&self, channel: Channel, event: &LogEvent) -> Result<(), JournalError> {
        let path = self.path(channel);
        let result = append_bytes(path, event.line().as_bytes()).await;
        if let (Channel::Primary, Err(e)) = (channel, &result) {
            self.primary_blocked(e).await;
        }
        result
    }

    /// Render `event` into `channel`, ignoring write failures.
    pub async fn record(&self, channel: Channel, event: &TriggerEvent) {
        tracing::debug!(?channel, event = event.name(), "{event}");
        let _ = self.append(channel, &self.event(event.to_string())).await;
    }

    /// Open the primary artifact for a child process's output.
    ///
    /// Takes the blocked-write path on failure.
    pub async fn open_primary(&self) -> Result<std::fs::File, JournalError> {
        let result = open_append(&self.primary).await;
        match result {
            Ok(file) => Ok(file.into_std().await),
            Err(e) => {
                self.primary_blocked(&e).await;
                Err(e)
            }
        }
    }

    /// Record a primary-channel failure and schedule the lock diagnosis.
    async fn primary_blocked(&self, error: &JournalError) {
        let JournalError::Blocked { path, source } = error;
        tracing::warn!(path = %path.display(), error = %source, "primary log blocked");

        {
            let mut state = self.diagnosis.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(*state, Diagnosis::Clear) {
                *state = Diagnosis::Pending(path.clone());
            }
        }

        let blocked = TriggerEvent::LogWriteBlocked {
            path: path.clone(),
            error: source.to_string(),
        };
        let _ = append_bytes(&self.debug, self.event(blocked.to_string()).line().as_bytes()).await;
    }

    /// Run the scheduled lock diagnosis, if any, into the debug channel.
    ///
    /// Only the first call after a blocked primary write does any work.
    pub async fn flush_diagnosis(&self) {
        let path = {
            let mut state = self.diagnosis.lock().unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *state, Diagnosis::Done) {
                Diagnosis::Pending(path) => path,
                other => {
                    *state = other;
                    return;
                }
            }
        };

        let mut text = self.event("lock_diagnosis").line();
        let report = self.diagnoser.diagnose(&path).await;
        text.push_str(&report);
        if !report.ends_with('\n') {
            text.push('\n');
        }
        let _ = append_bytes(&self.debug, text.as_bytes()).await;
    }
}

async fn open_append(path: &Path) -> Result<tokio::fs::File, JournalError> {
    let blocked = |source| JournalError::Blocked {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(blocked)?;
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(blocked)
}

async fn append_bytes(path: &Path, bytes: &[u8]) -> Result<(), JournalError> {
    let mut file = open_append(path).await?;
    file.write_all(bytes)
        .await
        .map_err(|source| JournalError::Blocked {
            path: path.to_path_buf(),
            source,
        })?;
    file.flush().await.map_err(|source| JournalError::Blocked {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::TimeZone;
    use std::time::Duration;

    fn clock() -> FixedClock {
        FixedClock(Local.with_ymd_and_hms(2026, 10, 14, 9, 5, 7).unwrap())
    }

    fn journal(dir: &Path, diagnoser: LockDiagnoser) -> Journal<FixedClock> {
        Journal::new(
            dir.join("logs/wezfocus.log"),
            dir.join("logs/debug.log"),
            clock(),
            diagnoser,
        )
    }

    #[test]
    fn line_format() {
        let event = LogEvent {
            timestamp: clock().0,
            message: "hello".into(),
        };
        assert_eq!(event.line(), "[2026-10-14 09:05:07] hello\n");
    }

    #[tokio::test]
    async fn appends_without_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(dir.path(), LockDiagnoser::Proc);

        journal.append(Channel::Primary, &journal.event("one")).await.unwrap();
        journal.append(Channel::Primary, &journal.event("two")).await.unwrap();

        let text = std::fs::read_to_string(journal.path(Channel::Primary)).unwrap();
        assert_eq!(text, "[2026-10-14 09:05:07] one\n[2026-10-14 09:05:07] two\n");
        assert!(!journal.path(Channel::Debug).exists());
    }

    #[tokio::test]
    async fn blocked_primary_goes_to_debug_with_diagnosis() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(
            dir.path(),
            LockDiagnoser::Command {
                program: "echo".into(),
                timeout: Duration::from_secs(5),
            },
        );
        // A directory cannot be opened for append.
        std::fs::create_dir_all(journal.path(Channel::Primary)).unwrap();

        let result = journal.append(Channel::Primary, &journal.event("lost")).await;
        assert!(matches!(result, Err(JournalError::Blocked { .. })));
        journal.flush_diagnosis().await;

        let debug = std::fs::read_to_string(journal.path(Channel::Debug)).unwrap();
        let primary = journal.path(Channel::Primary).display().to_string();
        assert!(debug.contains("log_write_blocked path="), "{debug}");
        assert!(debug.contains("lock_diagnosis\n"), "{debug}");
        assert!(debug.ends_with(&format!("{primary}\n")), "{debug}");
        assert!(!debug.contains("lost"));
    }

    #[tokio::test]
    async fn debug_failure_has_no_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(dir.path(), LockDiagnoser::Proc);
        std::fs::create_dir_all(journal.path(Channel::Debug)).unwrap();

        let result = journal.append(Channel::Debug, &journal.event("x")).await;
        assert!(result.is_err());
        assert!(!journal.path(Channel::Primary).exists());
    }

    #[tokio::test]
    async fn record_renders_event() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(dir.path(), LockDiagnoser::Proc);

        journal.record(Channel::Debug, &TriggerEvent::LockReleased).await;

        let text = std::fs::read_to_string(journal.path(Channel::Debug)).unwrap();
        assert_eq!(text, "[2026-10-14 09:05:07] lock_released\n");
    }

    #[tokio::test]
    async fn open_primary_blocked_reports() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(dir.path(), LockDiagnoser::Proc);
        std::fs::create_dir_all(journal.path(Channel::Primary)).unwrap();

        assert!(journal.open_primary().await.is_err());
        let debug = std::fs::read_to_string(journal.path(Channel::Debug)).unwrap();
        assert!(debug.contains("log_write_blocked"));
    }

    #[tokio::test]
    async fn diagnosis_waits_for_flush_and_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(
            dir.path(),
            LockDiagnoser::Command {
                program: "echo".into(),
                timeout: Duration::from_secs(5),
            },
        );
        std::fs::create_dir_all(journal.path(Channel::Primary)).unwrap();

        for message in ["one", "two", "three"] {
            let _ = journal.append(Channel::Primary, &journal.event(message)).await;
        }
        assert!(journal.open_primary().await.is_err());

        let debug = std::fs::read_to_string(journal.path(Channel::Debug)).unwrap();
        assert_eq!(debug.matches("log_write_blocked").count(), 4, "{debug}");
        assert!(!debug.contains("lock_diagnosis"), "{debug}");

        journal.flush_diagnosis().await;
        journal.flush_diagnosis().await;
        let _ = journal.append(Channel::Primary, &journal.event("four")).await;
        journal.flush_diagnosis().await;

        let debug = std::fs::read_to_string(journal.path(Channel::Debug)).unwrap();
        assert_eq!(debug.matches("lock_diagnosis").count(), 1, "{debug}");
    }

    #[tokio::test]
    async fn flush_without_blocked_write_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(dir.path(), LockDiagnoser::Proc);

        journal.append(Channel::Primary, &journal.event("ok")).await.unwrap();
        journal.flush_diagnosis().await;

        assert!(!journal.path(Channel::Debug).exists());
    }
}
