//! Process reaper: forced termination by pid.
//!
//! Callers treat every failure as success: the guarantee being protected
//! is that the newest run owns the lock, not that the old run is provably
//! dead. Errors are still returned so they can be recorded.

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::{Pid, getpid};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReapError {
    /// The id would signal a process group, init, or ourselves.
    #[error("refusing to signal pid {0}")]
    Refused(i32),
    #[error("kill({pid}) failed: {errno}")]
    Signal { pid: i32, errno: Errno },
}

/// Requests termination of another process.
pub trait ProcessTerminator {
    fn terminate(&self, pid: i32) -> Result<(), ReapError>;
}

impl<T: ProcessTerminator + ?Sized> ProcessTerminator for &T {
    fn terminate(&self, pid: i32) -> Result<(), ReapError> {
        (**self).terminate(pid)
    }
}

/// Sends `SIGKILL` via `kill(2)`.
#[derive(Debug, Clone, Copy)]
pub struct SignalReaper {
    own_pid: i32,
}

impl SignalReaper {
    pub fn new() -> Self {
        Self {
            own_pid: getpid().as_raw(),
        }
    }
}

impl Default for SignalReaper {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTerminator for SignalReaper {
    fn terminate(&self, pid: i32) -> Result<(), ReapError> {
        // pid 0 and negatives address process groups; 1 is init.
        if pid <= 1 || pid == self.own_pid {
            return Err(ReapError::Refused(pid));
        }
        match kill(Pid::from_raw(pid), Signal::SIGKILL) {
            Ok(()) => {
                tracing::debug!(pid, "sent SIGKILL");
                Ok(())
            }
            Err(errno) => {
                tracing::debug!(pid, %errno, "SIGKILL failed");
                Err(ReapError::Signal { pid, errno })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn kills_a_live_child() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id() as i32;

        SignalReaper::new().terminate(pid).expect("kill live child");

        let status = child.wait().expect("wait child");
        assert_eq!(status.signal(), Some(Signal::SIGKILL as i32));
    }

    #[test]
    fn missing_process_reports_esrch() {
        // Above any configurable pid_max.
        let pid = i32::MAX;
        assert_eq!(
            SignalReaper::new().terminate(pid),
            Err(ReapError::Signal {
                pid,
                errno: Errno::ESRCH
            })
        );
    }

    #[test]
    fn refuses_group_and_init_ids() {
        let reaper = SignalReaper::new();
        for pid in [-1, 0, 1] {
            assert_eq!(reaper.terminate(pid), Err(ReapError::Refused(pid)));
        }
    }

    #[test]
    fn refuses_own_pid() {
        let own = std::process::id() as i32;
        assert_eq!(
            SignalReaper::new().terminate(own),
            Err(ReapError::Refused(own))
        );
    }
}
