// src/signals/handlers.rs

//! The `extern "C"` side of signal routing.
//!
//! Everything reachable from a handler here is async-signal-safe: atomics,
//! `waitpid`, `write`, `chmod`, `unlink` and `_exit`. Temp-file paths are
//! turned into C strings before any handler is installed so the panic path
//! never allocates.

use std::ffi::CString;
use std::os::fd::{IntoRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::OnceLock;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::libc;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{pipe2, Pid};
use tracing::debug;

use super::{ChildWait, HandlerAction, ROUTED_SIGNALS, SIGNALS};
use crate::errors::Result;

/// Write end of the self-pipe, or -1 before [`install`].
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

/// Temp files the panic handler scrubs when no caller can be told.
static SCRUB_PATHS: OnceLock<Vec<CString>> = OnceLock::new();

/// Read end of the self-pipe; the reactor turns it into an async receiver.
#[derive(Debug)]
pub struct SignalRouter {
    pub wake_rx: OwnedFd,
}

/// Register the temp files, create the self-pipe and install every handler.
pub fn install(temp_files: &[PathBuf]) -> Result<SignalRouter> {
    let paths = temp_files
        .iter()
        .filter_map(|p| CString::new(p.as_os_str().as_bytes()).ok())
        .collect();
    if SCRUB_PATHS.set(paths).is_err() {
        debug!("scrub paths already registered; keeping the first set");
    }

    let (wake_rx, wake_tx) = pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)?;
    // The write end lives for the rest of the process.
    WAKE_FD.store(wake_tx.into_raw_fd(), Ordering::SeqCst);

    let routes: [(Signal, extern "C" fn(libc::c_int)); 6] = [
        (Signal::SIGCHLD, graceful_handler),
        (Signal::SIGTERM, urgent_handler),
        (Signal::SIGINT, panic_handler),
        (Signal::SIGUSR1, ignorable_handler),
        (Signal::SIGUSR2, ignorable_handler),
        (Signal::SIGHUP, ignorable_handler),
    ];

    for (signal, handler) in routes {
        let action = SigAction::new(
            SigHandler::Handler(handler),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        // SAFETY: every handler only touches atomics and async-signal-safe
        // syscalls.
        unsafe { sigaction(signal, &action) }?;
    }

    debug!(signals = ?ROUTED_SIGNALS, "signal handlers installed");
    Ok(SignalRouter { wake_rx })
}

/// Set of every routed signal, blocked around `fork`.
pub fn routed_sigset() -> SigSet {
    let mut set = SigSet::empty();
    for signal in ROUTED_SIGNALS {
        set.add(signal);
    }
    set
}

/// Give the child default dispositions for every routed signal, plus
/// `SIGPIPE`, which the Rust runtime ignores in the supervisor.
///
/// Runs between `fork` and `exec`; errors are ignored because nothing can be
/// reported from there anyway.
pub fn reset_in_child() {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for signal in ROUTED_SIGNALS.into_iter().chain([Signal::SIGPIPE]) {
        // SAFETY: installing SIG_DFL has no handler invariants to uphold.
        let _ = unsafe { sigaction(signal, &default) };
    }
}

extern "C" fn graceful_handler(_: libc::c_int) {
    let saved = Errno::last_raw();
    let wait = match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => ChildWait::Terminated,
        Ok(WaitStatus::StillAlive) => ChildWait::StillRunning,
        Ok(_) => ChildWait::Stopped,
        Err(Errno::ECHILD) => ChildWait::NoChildren,
        Err(_) => ChildWait::Failed,
    };
    apply(SIGNALS.on_graceful(wait));
    Errno::set_raw(saved);
}

extern "C" fn urgent_handler(_: libc::c_int) {
    let saved = Errno::last_raw();
    apply(SIGNALS.on_urgent());
    Errno::set_raw(saved);
}

extern "C" fn ignorable_handler(_: libc::c_int) {
    let saved = Errno::last_raw();
    apply(SIGNALS.on_ignorable());
    Errno::set_raw(saved);
}

extern "C" fn panic_handler(_: libc::c_int) {
    let saved = Errno::last_raw();
    apply(SIGNALS.on_panic());
    Errno::set_raw(saved);
}

fn apply(action: HandlerAction) {
    match action {
        HandlerAction::Continue => wake(),
        HandlerAction::Exit => exit_now(),
        HandlerAction::ScrubAndExit => {
            scrub_registered();
            exit_now();
        }
    }
}

fn wake() {
    let fd = WAKE_FD.load(Ordering::SeqCst);
    if fd < 0 {
        return;
    }
    let byte = [1u8];
    // SAFETY: `fd` is the non-blocking write end of the self-pipe; a full
    // pipe just drops the byte, which is fine because the reader only needs
    // one.
    unsafe {
        libc::write(fd, byte.as_ptr().cast(), 1);
    }
}

fn scrub_registered() {
    let Some(paths) = SCRUB_PATHS.get() else {
        return;
    };
    for path in paths {
        // SAFETY: `path` is a valid NUL-terminated string owned by a static.
        unsafe {
            libc::chmod(path.as_ptr(), libc::S_IRUSR | libc::S_IWUSR);
            libc::unlink(path.as_ptr());
        }
    }
}

fn exit_now() -> ! {
    // SAFETY: `_exit` is async-signal-safe and never returns.
    unsafe { libc::_exit(0) }
}
