//! wezfocus: notification-click trigger that focuses the WezTerm window.
//!
//! Only the newest invocation stays alive: each run preempts whatever
//! owner the lock record names, focuses the terminal through the
//! configured action, and releases the lock. The exit status is always
//! success; outcomes live in the primary and debug logs.

mod action;
mod clock;
mod config;
mod events;
mod journal;
mod lock;
mod reaper;
mod trigger;

use std::process::ExitCode;

use clap::Parser;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;

use action::FocusAction;
use action::binding::SocketSearch;
use clock::SystemClock;
use config::{Cli, Config};
use journal::Journal;
use journal::diagnose::LockDiagnoser;
use lock::LockManager;
use lock::store::FileLockStore;
use reaper::SignalReaper;
use trigger::Trigger;

/// Filter used when `RUST_LOG` is unset: `-v` is info, `-vv` debug.
fn default_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = Config::resolve(cli, |key| std::env::var(key).ok());

    let self_id = nix::unistd::getpid().as_raw();
    let run_id = uuid::Uuid::new_v4().simple().to_string();
    let run_id = &run_id[..8];

    let diagnoser = match config.diagnose {
        Some(program) => LockDiagnoser::Command {
            program,
            timeout: config.action_timeout,
        },
        None => LockDiagnoser::Proc,
    };

    let trigger = Trigger::new(
        LockManager::new(
            FileLockStore::new(config.lock_file),
            SignalReaper::new(),
            SystemClock,
        ),
        Journal::new(config.log_file, config.debug_log, SystemClock, diagnoser),
        SocketSearch::new(config.socket_dir, config.socket_pattern, config.socket_env),
        FocusAction {
            program: config.action,
            args: config.action_args,
            timeout: config.action_timeout,
        },
    );

    let span = tracing::info_span!("run", run = run_id, pid = self_id);
    let report = trigger.run(self_id, run_id).instrument(span).await;
    tracing::info!(
        acquired = report.acquisition.acquired(),
        preempted = ?report.acquisition.preempted,
        socket = ?report.binding.value,
        phases = report.phases.len(),
        status = %report.outcome.status(),
        retried = report.outcome.retried(),
        released = report.released,
        "run finished"
    );

    ExitCode::SUCCESS
}
