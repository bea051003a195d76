// src/notice.rs

//! One-shot action-icon-cache notice.
//!
//! A few seconds after launch the supervisor tells the window manager which
//! programs the action turned into, so it can show the action's icon for
//! their windows. Purely best effort: nothing here can affect the shutdown.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::bus::{BusConnection, MessagingSession};
use crate::exec::LaunchOutcome;
use crate::fs::FileSystem;
use crate::procs;
use crate::types::CallerIdentity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticePlan {
    pub pid: i32,
    /// The action's command, i.e. the argv[0] we exec'd.
    pub action: String,
    pub deadline: Instant,
}

impl NoticePlan {
    /// A plan exists only for a child we actually started on behalf of a
    /// known caller.
    pub fn for_launch(
        outcome: LaunchOutcome,
        caller: Option<&CallerIdentity>,
        action: Option<String>,
        start: Instant,
        delay: Duration,
    ) -> Option<Self> {
        if caller.is_none() {
            return None;
        }
        let LaunchOutcome::Spawned(pid) = outcome else {
            return None;
        };
        let pid = pid.as_raw();
        let action = action.filter(|a| !a.is_empty())?;
        (pid > 0).then(|| Self {
            pid,
            action,
            deadline: start + delay,
        })
    }
}

#[derive(Debug, Default)]
pub struct NoticeScheduler {
    plan: Option<NoticePlan>,
    fired: bool,
}

impl NoticeScheduler {
    pub fn new(plan: Option<NoticePlan>) -> Self {
        Self { plan, fired: false }
    }

    pub fn is_done(&self) -> bool {
        self.fired || self.plan.is_none()
    }

    /// The plan, once its deadline has passed and it has not fired yet.
    pub fn due(&self, now: Instant) -> Option<&NoticePlan> {
        if self.fired {
            return None;
        }
        self.plan.as_ref().filter(|plan| now >= plan.deadline)
    }

    pub fn mark_done(&mut self) {
        self.fired = true;
    }

    /// Shorten `timeout` so the reactor wakes up in time for the deadline.
    pub fn clamp_timeout(&self, now: Instant, timeout: Duration) -> Duration {
        match (&self.plan, self.fired) {
            (Some(plan), false) => timeout.min(plan.deadline.saturating_duration_since(now)),
            _ => timeout,
        }
    }

    /// Snapshot the child's process tree and send the notice if due.
    ///
    /// Marks the notice done whatever happens.
    pub fn run_if_due<C: BusConnection>(
        &mut self,
        now: Instant,
        session: Option<&mut MessagingSession<C>>,
        fs: &dyn FileSystem,
    ) {
        let Some(plan) = self.due(now) else {
            return;
        };
        info!(action = %plan.action, pid = plan.pid, "action icon cache update triggered");

        let commands = procs::snapshot(fs, plan.pid);
        match commands.first() {
            Some(first) => debug!(
                count = commands.len(),
                pid = plan.pid,
                first,
                "collected child commands"
            ),
            None => debug!(pid = plan.pid, "no child commands found"),
        }

        match session {
            _ if commands.is_empty() => {}
            Some(session) if session.is_attached() => {
                let list = commands.join();
                debug!(action = %plan.action, children = %list, "sending icon cache notice");
                match session.notice_icon_cache(&plan.action, &list) {
                    Ok(()) => info!(action = %plan.action, "notice sent"),
                    Err(err) => warn!(action = %plan.action, error = %err, "notice send failed"),
                }
            }
            _ => debug!("no messaging session; notice skipped"),
        }

        self.mark_done();
    }
}
