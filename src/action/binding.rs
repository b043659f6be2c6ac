//! Environment binding: locate the terminal's GUI socket.
//!
//! Scans one directory for entries whose file name matches the socket
//! pattern. Zero matches leave the binding empty. With several matches the
//! most recently modified wins, ties going to the lexicographically last
//! name.

use std::cmp::Ordering;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use regex::Regex;

/// The key/value pair handed to the focus action's environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentBinding {
    pub key: String,
    /// `None` when no socket matched; the key is then not injected.
    pub value: Option<PathBuf>,
}

/// Result of one directory scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub binding: EnvironmentBinding,
    /// Number of entries that matched the pattern.
    pub matched: usize,
}

#[derive(Debug, Clone)]
pub struct SocketSearch {
    pub dir: PathBuf,
    pub pattern: Regex,
    pub key: String,
}

struct Candidate {
    modified: SystemTime,
    name: OsString,
    path: PathBuf,
}

impl Candidate {
    fn order(&self, other: &Self) -> Ordering {
        self.modified
            .cmp(&other.modified)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl SocketSearch {
    pub fn new(dir: impl Into<PathBuf>, pattern: Regex, key: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            pattern,
            key: key.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scan the directory. A missing or unreadable directory counts as
    /// zero matches.
    pub fn discover(&self) -> Resolution {
        let candidates: Vec<Candidate> = match fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .flatten()
                .filter(|entry| {
                    entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| self.pattern.is_match(name))
                })
                .map(|entry| Candidate {
                    modified: entry
                        .metadata()
                        .and_then(|m| m.modified())
                        .unwrap_or(SystemTime::UNIX_EPOCH),
                    name: entry.file_name(),
                    path: entry.path(),
                })
                .collect(),
            Err(e) => {
                tracing::debug!(dir = %self.dir.display(), error = %e, "socket dir unreadable");
                Vec::new()
            }
        };

        let matched = candidates.len();
        let value = candidates
            .into_iter()
            .max_by(Candidate::order)
            .map(|c| c.path);

        Resolution {
            binding: EnvironmentBinding {
                key: self.key.clone(),
                value,
            },
            matched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn search(dir: &Path) -> SocketSearch {
        SocketSearch::new(
            dir,
            Regex::new(r"^gui-sock-\d+$").unwrap(),
            "WEZTERM_UNIX_SOCKET",
        )
    }

    fn touch(path: &Path, mtime: SystemTime) {
        let file = fs::File::create(path).unwrap();
        file.set_modified(mtime).unwrap();
    }

    #[test]
    fn zero_matches_is_empty_binding() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sock"), b"").unwrap();
        fs::write(dir.path().join("gui-sock-abc"), b"").unwrap();

        let resolution = search(dir.path()).discover();
        assert_eq!(resolution.matched, 0);
        assert_eq!(resolution.binding.value, None);
        assert_eq!(resolution.binding.key, "WEZTERM_UNIX_SOCKET");
    }

    #[test]
    fn missing_dir_is_empty_binding() {
        let dir = tempfile::tempdir().unwrap();
        let resolution = search(&dir.path().join("absent")).discover();
        assert_eq!(resolution.matched, 0);
        assert_eq!(resolution.binding.value, None);
    }

    #[test]
    fn single_match() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("gui-sock-1234");
        fs::write(&sock, b"").unwrap();

        let resolution = search(dir.path()).discover();
        assert_eq!(resolution.matched, 1);
        assert_eq!(resolution.binding.value, Some(sock));
    }

    #[test]
    fn newest_match_wins() {
        let dir = tempfile::tempdir().unwrap();
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_800_000_000);
        touch(&dir.path().join("gui-sock-900"), base);
        touch(&dir.path().join("gui-sock-100"), base + Duration::from_secs(60));

        let resolution = search(dir.path()).discover();
        assert_eq!(resolution.matched, 2);
        assert_eq!(
            resolution.binding.value,
            Some(dir.path().join("gui-sock-100"))
        );
    }

    #[test]
    fn equal_mtime_takes_last_name() {
        let dir = tempfile::tempdir().unwrap();
        let at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_800_000_000);
        touch(&dir.path().join("gui-sock-1"), at);
        touch(&dir.path().join("gui-sock-2"), at);

        let resolution = search(dir.path()).discover();
        assert_eq!(resolution.binding.value, Some(dir.path().join("gui-sock-2")));
    }
}
