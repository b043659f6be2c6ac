//! Command-line and environment configuration.
//!
//! Every flag can also be set through a `WEZFOCUS_*` variable, since the
//! notification launcher usually cannot pass arguments. Paths left unset
//! fall back to XDG locations.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use regex::Regex;
use thiserror::Error;

pub const DEFAULT_SOCKET_PATTERN: &str = r"^gui-sock-\d+$";
pub const DEFAULT_SOCKET_ENV: &str = "WEZTERM_UNIX_SOCKET";
pub const DEFAULT_ACTION: &str = "wezfocus-action";
pub const DEFAULT_ACTION_TIMEOUT_SECS: u64 = 5;
const APP_DIR: &str = "wezfocus";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid socket pattern {pattern:?}: {source}")]
    SocketPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Bring the WezTerm window into focus after a notification click.
#[derive(Debug, Parser)]
#[command(name = "wezfocus", version)]
pub struct Cli {
    /// Lock record path.
    #[arg(long, env = "WEZFOCUS_LOCK_FILE")]
    pub lock_file: Option<PathBuf>,

    /// Primary event log.
    #[arg(long, env = "WEZFOCUS_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Debug log.
    #[arg(long, env = "WEZFOCUS_DEBUG_LOG")]
    pub debug_log: Option<PathBuf>,

    /// Directory holding the terminal's GUI sockets.
    #[arg(long, env = "WEZFOCUS_SOCKET_DIR")]
    pub socket_dir: Option<PathBuf>,

    /// Regex matched against socket file names.
    #[arg(long, env = "WEZFOCUS_SOCKET_PATTERN", default_value = DEFAULT_SOCKET_PATTERN)]
    pub socket_pattern: String,

    /// Environment variable the socket path is exported as.
    #[arg(long, env = "WEZFOCUS_SOCKET_ENV", default_value = DEFAULT_SOCKET_ENV)]
    pub socket_env: String,

    /// Focus action executable.
    #[arg(long, env = "WEZFOCUS_ACTION", default_value = DEFAULT_ACTION)]
    pub action: PathBuf,

    /// Lock-diagnosis helper, run with the blocked log path.
    #[arg(long, env = "WEZFOCUS_DIAGNOSE")]
    pub diagnose: Option<PathBuf>,

    /// Seconds before the focus action or diagnosis helper is killed.
    #[arg(long, env = "WEZFOCUS_ACTION_TIMEOUT", default_value_t = DEFAULT_ACTION_TIMEOUT_SECS)]
    pub action_timeout: u64,

    /// Increase stderr diagnostics (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Arguments passed through to the focus action.
    #[arg(last = true)]
    pub action_args: Vec<String>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub lock_file: PathBuf,
    pub log_file: PathBuf,
    pub debug_log: PathBuf,
    pub socket_dir: PathBuf,
    pub socket_pattern: Regex,
    pub socket_env: String,
    pub action: PathBuf,
    pub action_args: Vec<String>,
    pub diagnose: Option<PathBuf>,
    pub action_timeout: Duration,
}

pub fn parse_socket_pattern(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::SocketPattern {
        pattern: pattern.to_string(),
        source,
    })
}

impl Config {
    /// Resolve defaults using `env` for XDG lookups.
    ///
    /// An invalid socket pattern falls back to the default one; no
    /// configuration problem stops a run.
    pub fn resolve(cli: Cli, env: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| env(key).filter(|v| !v.is_empty()).map(PathBuf::from);
        let home = lookup("HOME");
        let runtime = lookup("XDG_RUNTIME_DIR");
        let state = lookup("XDG_STATE_HOME")
            .or_else(|| home.as_ref().map(|h| h.join(".local/state")))
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR);

        let socket_pattern = parse_socket_pattern(&cli.socket_pattern).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "using default socket pattern");
            Regex::new(DEFAULT_SOCKET_PATTERN).expect("default socket pattern is valid")
        });

        let socket_dir = cli.socket_dir.unwrap_or_else(|| match (&runtime, &home) {
            (Some(run), _) => run.join("wezterm"),
            (None, Some(home)) => home.join(".local/share/wezterm"),
            (None, None) => std::env::temp_dir().join("wezterm"),
        });

        Self {
            lock_file: cli.lock_file.unwrap_or_else(|| {
                runtime
                    .clone()
                    .unwrap_or_else(std::env::temp_dir)
                    .join("wezfocus.lock")
            }),
            log_file: cli.log_file.unwrap_or_else(|| state.join("wezfocus.log")),
            debug_log: cli.debug_log.unwrap_or_else(|| state.join("debug.log")),
            socket_dir,
            socket_pattern,
            socket_env: cli.socket_env,
            action: cli.action,
            action_args: cli.action_args,
            diagnose: cli.diagnose,
            action_timeout: Duration::from_secs(cli.action_timeout),
        }
    }
}
