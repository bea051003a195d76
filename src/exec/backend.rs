// src/exec/backend.rs

//! Pluggable fork/exec backend.
//!
//! The launcher talks to a `ProcessSpawner` instead of calling `fork`
//! directly. Production uses [`RealSpawner`]; tests provide a scripted
//! spawner that returns canned results and records the backoff pauses so the
//! retry policy can be checked without forking or sleeping.

use std::ffi::{CStr, CString, OsString};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::time::Duration;

use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow};
use nix::unistd::{fork, ForkResult, Pid};

use super::launcher::StderrPipe;
use crate::errors::{DtexecError, Result};
use crate::signals;

/// Trait abstracting how the child process is created.
pub trait ProcessSpawner {
    /// Fork and exec `plan`, returning the child's pid in the parent.
    fn spawn(&mut self, plan: &ExecPlan) -> std::result::Result<Pid, Errno>;

    /// Wait between fork attempts.
    fn pause(&mut self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Everything the child needs, prepared before `fork`.
///
/// Between `fork` and `exec` the child may only make async-signal-safe
/// calls, so argv, the descriptor list and the failure message are all built
/// up front.
#[derive(Debug)]
pub struct ExecPlan {
    argv: Vec<CString>,
    argv_ptrs: Vec<*const libc::c_char>,
    stderr_write: Option<RawFd>,
    stderr_read: Option<RawFd>,
    inherited_fds: Vec<RawFd>,
    exec_failure: Vec<u8>,
}

impl ExecPlan {
    pub fn new(command: &[OsString], stderr: Option<&StderrPipe>) -> Result<Self> {
        if command.is_empty() {
            return Err(DtexecError::LaunchFailed("empty command vector".to_string()));
        }

        let argv = command
            .iter()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| DtexecError::LaunchFailed(format!("argument contains NUL: {e}")))?;

        let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|a| a.as_ptr()).collect();
        argv_ptrs.push(std::ptr::null());

        let exec_failure =
            format!("Cannot execute \"{}\".\n", command[0].to_string_lossy()).into_bytes();

        Ok(Self {
            argv,
            argv_ptrs,
            stderr_write: stderr.map(|p| p.write_fd()),
            stderr_read: stderr.map(|p| p.read_fd()),
            inherited_fds: open_descriptors(),
            exec_failure,
        })
    }

    pub fn program(&self) -> &CStr {
        &self.argv[0]
    }

    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    pub fn captures_stderr(&self) -> bool {
        self.stderr_write.is_some()
    }

    /// Child side of `fork`. Never returns.
    fn exec_in_child(&self, mask: &SigSet) -> ! {
        if let (Some(write), Some(read)) = (self.stderr_write, self.stderr_read) {
            // SAFETY: both descriptors belong to the pipe created before fork.
            unsafe {
                libc::dup2(write, libc::STDERR_FILENO);
                libc::close(read);
            }
        }

        signals::reset_in_child();
        let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(mask), None);

        for &fd in &self.inherited_fds {
            if Some(fd) != self.stderr_write {
                // SAFETY: setting a descriptor flag; failures on closed fds
                // are harmless.
                unsafe {
                    libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
                }
            }
        }

        // SAFETY: argv_ptrs is NUL-terminated and points into `self.argv`,
        // which outlives the call.
        unsafe {
            libc::execvp(self.argv_ptrs[0], self.argv_ptrs.as_ptr());
            libc::write(
                libc::STDERR_FILENO,
                self.exec_failure.as_ptr().cast(),
                self.exec_failure.len(),
            );
            libc::_exit(1)
        }
    }
}

/// Descriptors above stderr that are open right now.
fn open_descriptors() -> Vec<RawFd> {
    match std::fs::read_dir("/proc/self/fd") {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse::<RawFd>().ok()))
            .filter(|fd| *fd > libc::STDERR_FILENO)
            .collect(),
        Err(_) => (3..256).collect(),
    }
}

/// Real spawner used in production: `fork` + `execvp`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealSpawner;

impl ProcessSpawner for RealSpawner {
    fn spawn(&mut self, plan: &ExecPlan) -> std::result::Result<Pid, Errno> {
        // Block routed signals so the child never runs our handlers before it
        // resets them.
        let mut previous = SigSet::empty();
        sigprocmask(
            SigmaskHow::SIG_BLOCK,
            Some(&signals::routed_sigset()),
            Some(&mut previous),
        )?;

        // SAFETY: dtexec forks before starting any other thread, and the
        // child only makes async-signal-safe calls before exec.
        let forked = unsafe { fork() };

        match forked {
            Ok(ForkResult::Child) => plan.exec_in_child(&previous),
            Ok(ForkResult::Parent { child }) => {
                sigprocmask(SigmaskHow::SIG_SETMASK, Some(&previous), None)?;
                Ok(child)
            }
            Err(errno) => {
                let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&previous), None);
                Err(errno)
            }
        }
    }
}

impl StderrPipe {
    fn write_fd(&self) -> RawFd {
        self.write.as_raw_fd()
    }

    fn read_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }
}
