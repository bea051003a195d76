use std::collections::VecDeque;
use std::time::Duration;

use dtexec::exec::{ExecPlan, ProcessSpawner};
use nix::errno::Errno;
use nix::unistd::Pid;

/// A spawner that never forks:
/// - returns the scripted results in order (then `EAGAIN` forever)
/// - records every attempt and every backoff pause instead of sleeping.
#[derive(Debug, Default)]
pub struct ScriptedSpawner {
    results: VecDeque<Result<Pid, Errno>>,
    pub attempts: usize,
    pub pauses: Vec<Duration>,
    /// argv[0] of every plan we were asked to run.
    pub programs: Vec<String>,
}

impl ScriptedSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with `errno` on the next attempt.
    pub fn then_fail(mut self, errno: Errno) -> Self {
        self.results.push_back(Err(errno));
        self
    }

    /// Succeed with `pid` on the next attempt.
    pub fn then_spawn(mut self, pid: i32) -> Self {
        self.results.push_back(Ok(Pid::from_raw(pid)));
        self
    }
}

impl ProcessSpawner for ScriptedSpawner {
    fn spawn(&mut self, plan: &ExecPlan) -> Result<Pid, Errno> {
        self.attempts += 1;
        self.programs
            .push(plan.program().to_string_lossy().into_owned());
        self.results.pop_front().unwrap_or(Err(Errno::EAGAIN))
    }

    fn pause(&mut self, delay: Duration) {
        self.pauses.push(delay);
    }
}
