// src/exec/launcher.rs

use std::os::fd::{AsRawFd, OwnedFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::{pipe2, Pid};
use tracing::{error, info, warn};

use super::backend::{ExecPlan, ProcessSpawner};
use crate::cli::LaunchRequest;
use crate::config::Tunables;
use crate::errors::Result;

/// Pipe carrying the child's stderr back to the supervisor.
#[derive(Debug)]
pub struct StderrPipe {
    pub(super) read: OwnedFd,
    pub(super) write: OwnedFd,
}

impl StderrPipe {
    /// Both ends close on exec; the child's copy lives on as fd 2. The read
    /// end is non-blocking so the reactor can drain it.
    pub fn new() -> Result<Self> {
        let (read, write) = pipe2(OFlag::O_CLOEXEC)?;
        fcntl(read.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
        Ok(Self { read, write })
    }

    /// Close the write end (the parent only reads) and keep the read end.
    pub fn into_read_end(self) -> OwnedFd {
        drop(self.write);
        self.read
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Spawned(Pid),
    /// Every fork attempt failed, or the command could not be prepared.
    Failed,
    /// Options consumed the whole command line.
    NoCommand,
}

#[derive(Debug)]
pub struct Launch {
    pub outcome: LaunchOutcome,
    /// Read end of the stderr pipe, when stderr is captured.
    pub stderr: Option<OwnedFd>,
}

/// Start the requested command.
///
/// Never fails outright: problems are folded into [`LaunchOutcome`] so the
/// caller still receives a completion notice.
pub fn launch(
    spawner: &mut dyn ProcessSpawner,
    request: &LaunchRequest,
    tunables: &Tunables,
) -> Launch {
    let Some(command) = request.command.as_deref() else {
        info!("no command given; treating the child as already done");
        return Launch {
            outcome: LaunchOutcome::NoCommand,
            stderr: None,
        };
    };

    let pipe = if request.policy.captures_stderr() {
        match StderrPipe::new() {
            Ok(pipe) => Some(pipe),
            Err(err) => {
                warn!(error = %err, "could not create stderr pipe; stderr not captured");
                None
            }
        }
    } else {
        None
    };

    let plan = match ExecPlan::new(command, pipe.as_ref()) {
        Ok(plan) => plan,
        Err(err) => {
            error!(error = %err, "cannot prepare command");
            return Launch {
                outcome: LaunchOutcome::Failed,
                stderr: None,
            };
        }
    };

    match fork_with_retry(spawner, &plan, tunables.fork_attempts, tunables.fork_backoff) {
        Ok(pid) => {
            info!(
                pid = pid.as_raw(),
                cmd = %plan.program().to_string_lossy(),
                captured = plan.captures_stderr(),
                "child started"
            );
            Launch {
                outcome: LaunchOutcome::Spawned(pid),
                stderr: pipe.map(StderrPipe::into_read_end),
            }
        }
        Err(errno) => {
            error!(error = %errno, "fork failed; reporting the launch as failed");
            Launch {
                outcome: LaunchOutcome::Failed,
                stderr: None,
            }
        }
    }
}

/// Fork up to `attempts` times, pausing `backoff` between attempts. Only
/// `EAGAIN` is retried; any other error gives up immediately.
pub fn fork_with_retry(
    spawner: &mut dyn ProcessSpawner,
    plan: &ExecPlan,
    attempts: u32,
    backoff: Duration,
) -> std::result::Result<Pid, Errno> {
    let mut last = Errno::EAGAIN;

    for attempt in 1..=attempts {
        match spawner.spawn(plan) {
            Ok(pid) => return Ok(pid),
            Err(Errno::EAGAIN) => {
                warn!(attempt, attempts, "fork hit a resource limit");
                last = Errno::EAGAIN;
                // Nothing left to wait for after the final attempt.
                if attempt < attempts {
                    spawner.pause(backoff);
                }
            }
            Err(errno) => return Err(errno),
        }
    }

    Err(last)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::ffi::OsString;

    use super::*;
    use crate::types::OpenPolicy;

    #[derive(Default)]
    struct Canned {
        results: VecDeque<std::result::Result<Pid, Errno>>,
        attempts: usize,
        pauses: Vec<Duration>,
    }

    impl ProcessSpawner for Canned {
        fn spawn(&mut self, _plan: &ExecPlan) -> std::result::Result<Pid, Errno> {
            self.attempts += 1;
            self.results.pop_front().unwrap_or(Err(Errno::EAGAIN))
        }

        fn pause(&mut self, delay: Duration) {
            self.pauses.push(delay);
        }
    }

    fn request(command: &[&str], policy: OpenPolicy) -> LaunchRequest {
        LaunchRequest {
            policy,
            command: Some(command.iter().map(OsString::from).collect()),
            ..LaunchRequest::default()
        }
    }

    #[test]
    fn no_command_short_circuits() {
        let mut spawner = Canned::default();
        let launch = launch(&mut spawner, &LaunchRequest::default(), &Tunables::default());
        assert_eq!(launch.outcome, LaunchOutcome::NoCommand);
        assert_eq!(spawner.attempts, 0);
    }

    #[test]
    fn gives_up_after_configured_attempts() {
        let mut spawner = Canned::default();
        let launch = launch(
            &mut spawner,
            &request(&["true"], OpenPolicy::Transient),
            &Tunables::default(),
        );

        assert_eq!(launch.outcome, LaunchOutcome::Failed);
        assert!(launch.stderr.is_none());
        assert_eq!(spawner.attempts, 10);
        assert_eq!(spawner.pauses.len(), 9);
    }

    #[test]
    fn transient_policy_keeps_the_read_end() {
        let mut spawner = Canned {
            results: VecDeque::from([Ok(Pid::from_raw(4242))]),
            ..Canned::default()
        };
        let launch = launch(
            &mut spawner,
            &request(&["true"], OpenPolicy::Transient),
            &Tunables::default(),
        );

        assert_eq!(launch.outcome, LaunchOutcome::Spawned(Pid::from_raw(4242)));
        assert!(launch.stderr.is_some());
    }

    #[test]
    fn windowed_policy_does_not_capture() {
        let mut spawner = Canned {
            results: VecDeque::from([Ok(Pid::from_raw(7))]),
            ..Canned::default()
        };
        let launch = launch(
            &mut spawner,
            &request(&["xterm"], OpenPolicy::PermanentTerm),
            &Tunables::default(),
        );
        assert!(launch.stderr.is_none());
    }
}
