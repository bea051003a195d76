// src/lib.rs

pub mod bus;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod icon_cache;
pub mod logging;
pub mod msglog;
pub mod notice;
pub mod procs;
pub mod signals;
pub mod types;

use std::ffi::OsString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::bus::{BusStatus, MessagingSession, SocketConnection};
use crate::config::{resolve_tunables, Environment};
use crate::engine::linger::{effective_policy, final_linger, wall_clock_secs};
use crate::engine::{LingerDecision, Reactor, ReactorExit, ReactorSetup};
use crate::errors::DtexecError;
use crate::exec::{LaunchOutcome, RealSpawner};
use crate::fs::{FileSystem, RealFileSystem};
use crate::msglog::{ErrorLogSink, MessageSink, SUPERVISOR_TAG};
use crate::notice::{NoticePlan, NoticeScheduler};
use crate::signals::SIGNALS;
use crate::types::CallerIdentity;

/// Cleared from a debugger to let a `_DTEXEC_DEBUG` run continue.
static DEBUG_HOLD: AtomicBool = AtomicBool::new(true);

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - argument parsing and the tunables
/// - signal routing
/// - the child launch
/// - the messaging session with our caller
/// - the reactor, then the final-linger policy
///
/// `argv` includes the program name. The returned decision tells `main`
/// whether to exit (and with which code) or to linger.
pub fn run(argv: Vec<OsString>) -> Result<LingerDecision> {
    let env = Environment::from_process();
    let program = argv.first().cloned().unwrap_or_else(|| OsString::from("dtexec"));

    if env.debug_spin && argv.len() > 1 {
        debug_spin();
    }

    let request = match cli::parse_args(argv.into_iter().skip(1)) {
        Ok(request) => request,
        Err(DtexecError::Usage { exit_code }) => {
            eprint!("{}", cli::usage(&program));
            return Ok(LingerDecision::Exit(exit_code));
        }
        Err(err) => return Err(err.into()),
    };

    // Diagnostics are optional; a log file we cannot open means silence.
    let _ = logging::init_logging(env.notifier_log.as_deref(), env.log_level.as_deref());
    info!(
        command = ?request.command,
        policy = ?request.policy,
        caller = ?request.caller,
        temp_files = request.temp_files.len(),
        "dtexec starting"
    );

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let tunables = resolve_tunables(fs.as_ref(), &env);

    let wake_rx = match signals::install(&request.temp_files) {
        Ok(router) => Some(router.wake_rx),
        Err(err) => {
            warn!(error = %err, "signal routing incomplete; relying on the poll timeout");
            None
        }
    };

    let launch = exec::launch(&mut RealSpawner, &request, &tunables);
    match launch.outcome {
        // Behave as if the child came and went.
        LaunchOutcome::NoCommand => SIGNALS.mark_child_exited(),
        // Behave as if we were killed; the caller hears about a failure.
        LaunchOutcome::Failed => SIGNALS.raise_urgent(),
        LaunchOutcome::Spawned(_) => {}
    }

    let start_secs = wall_clock_secs().unwrap_or_default();
    let notice = NoticeScheduler::new(NoticePlan::for_launch(
        launch.outcome,
        request.caller.as_ref(),
        request.command_name(),
        Instant::now(),
        tunables.notice_delay,
    ));

    let mut sink = ErrorLogSink::new(fs.clone(), env.dt_dir());
    let session = request
        .caller
        .clone()
        .and_then(|caller| attach(caller, &env, &mut sink));

    let stderr_tag = msglog::stderr_tag(
        &program.to_string_lossy(),
        &request.command_name().unwrap_or_default(),
    );

    let policy = request.policy;
    let temp_files = request.temp_files.clone();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building the reactor runtime")?;

    let exit = runtime.block_on(async move {
        let reactor = Reactor::new(ReactorSetup {
            tunables,
            signals: &SIGNALS,
            wake_rx,
            session,
            stderr: launch.stderr,
            stderr_tag,
            sink: Box::new(sink),
            notice,
            fs,
            temp_files,
        })?;
        Ok::<_, DtexecError>(reactor.run().await)
    })?;

    match exit {
        ReactorExit::Panicked => Ok(LingerDecision::Exit(0)),
        ReactorExit::Completed => {
            let policy = effective_policy(policy, SIGNALS.force_transient());
            Ok(final_linger(policy, start_secs))
        }
    }
}

/// Connect to the bus, join the session and introduce ourselves. Any
/// failure leaves us standalone.
fn attach(
    caller: CallerIdentity,
    env: &Environment,
    sink: &mut dyn MessageSink,
) -> Option<MessagingSession<SocketConnection>> {
    let conn = match env.bus_socket.as_deref() {
        Some(path) => SocketConnection::connect(path),
        None => Err(BusStatus::NotConnected(
            "no messaging bus endpoint configured".to_string(),
        )),
    };

    match conn {
        Ok(conn) => {
            let mut session = MessagingSession::new(conn, caller);
            session.join();
            session.identify();
            debug!(attached = session.is_attached(), "messaging session ready");
            Some(session)
        }
        Err(err) => {
            warn!(error = %err, "running standalone");
            let text = format!("Could not connect to the messaging bus:\n{err}\n");
            sink.log(SUPERVISOR_TAG, text.as_bytes());
            None
        }
    }
}

fn debug_spin() {
    while DEBUG_HOLD.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }
}
