//! Lock diagnosis: who is holding a log artifact open.
//!
//! Either runs an external helper with the blocked path as its only
//! argument and keeps its stdout verbatim, or walks `/proc/{pid}/fd`
//! looking for descriptors that resolve to the path.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

/// A process with an open descriptor on the inspected path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holder {
    pub pid: i32,
    pub comm: String,
}

#[derive(Debug, Clone)]
pub enum LockDiagnoser {
    /// External helper: `<program> <path>`, stdout captured.
    Command { program: PathBuf, timeout: Duration },
    /// Built-in `/proc` descriptor scan.
    Proc,
}

impl LockDiagnoser {
    /// Describe who holds `path`. Never fails; errors become the report.
    pub async fn diagnose(&self, path: &Path) -> String {
        match self {
            Self::Command { program, timeout } => run_helper(program, path, *timeout).await,
            Self::Proc => {
                let holders = holders(path);
                if holders.is_empty() {
                    return format!("no process holds {} open\n", path.display());
                }
                let list: Vec<String> = holders
                    .iter()
                    .map(|h| format!("{} (PID: {})", h.comm, h.pid))
                    .collect();
                format!("{} held open by: {}\n", path.display(), list.join(", "))
            }
        }
    }
}

async fn run_helper(program: &Path, path: &Path, timeout: Duration) -> String {
    let child = tokio::process::Command::new(program)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => String::from_utf8_lossy(&output.stdout).into_owned(),
        Ok(Err(e)) => format!("lock diagnosis helper {} failed: {e}\n", program.display()),
        Err(_) => format!(
            "lock diagnosis helper {} timed out after {}ms\n",
            program.display(),
            timeout.as_millis()
        ),
    }
}

/// Read a process's command name from `/proc/{pid}/comm`.
pub fn process_comm(pid: i32) -> Option<String> {
    let comm = fs::read_to_string(format!("/proc/{pid}/comm")).ok()?;
    Some(comm.trim_end().to_string())
}

/// List processes with an open descriptor resolving to `path`.
///
/// Processes whose `fd` directory is unreadable (other users, already
/// exited) are skipped. Returns an empty list when `/proc` is missing.
pub fn holders(path: &Path) -> Vec<Holder> {
    let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let Ok(procs) = fs::read_dir("/proc") else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for entry in procs.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) else {
            continue;
        };
        let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        let holds = fds
            .flatten()
            .filter_map(|fd| fs::read_link(fd.path()).ok())
            .any(|link| link == target);
        if holds {
            let comm = process_comm(pid).unwrap_or_else(|| "?".to_string());
            found.push(Holder { pid, comm });
        }
    }
    found.sort_by_key(|h| h.pid);
    found
}
