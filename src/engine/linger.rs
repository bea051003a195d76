// src/engine/linger.rs

//! What happens after shutdown: exit, or keep the terminal open.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use tracing::{debug, info};

use crate::errors::{DtexecError, Result};
use crate::types::OpenPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LingerDecision {
    Exit(i32),
    /// Block forever so the terminal window stays up.
    Linger,
}

/// Any urgent or ignorable signal during the run means "do not linger".
pub fn effective_policy(requested: OpenPolicy, force_transient: bool) -> OpenPolicy {
    if force_transient {
        OpenPolicy::Transient
    } else {
        requested
    }
}

/// Decide how the run ends.
///
/// `now` is only consulted for `ShortWindow`; failing to read the clock
/// there is fatal.
pub fn decide_linger(policy: OpenPolicy, start_secs: i64, now: Result<i64>) -> LingerDecision {
    match policy {
        OpenPolicy::PermanentTerm => LingerDecision::Linger,
        OpenPolicy::Transient => LingerDecision::Exit(0),
        OpenPolicy::ShortWindow(window) => match now {
            Ok(now) => {
                let elapsed = now - start_secs;
                if elapsed < i64::try_from(window).unwrap_or(i64::MAX) {
                    LingerDecision::Linger
                } else {
                    LingerDecision::Exit(0)
                }
            }
            Err(_) => LingerDecision::Exit(1),
        },
    }
}

/// Seconds since the epoch.
pub fn wall_clock_secs() -> Result<i64> {
    let since = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| DtexecError::Clock(e.to_string()))?;
    i64::try_from(since.as_secs()).map_err(|e| DtexecError::Clock(e.to_string()))
}

/// Reap the child if the signal handler has not already done so.
pub fn reap_child() {
    match waitpid(Pid::from_raw(-1), None) {
        Ok(status) => debug!(?status, "reaped child"),
        Err(errno) => debug!(%errno, "nothing left to reap"),
    }
}

/// Run the final-linger policy for a completed shutdown.
pub fn final_linger(policy: OpenPolicy, start_secs: i64) -> LingerDecision {
    reap_child();
    let decision = decide_linger(policy, start_secs, wall_clock_secs());
    info!(?policy, ?decision, "final linger");
    decision
}

/// Never returns.
pub fn linger_forever() -> ! {
    loop {
        std::thread::sleep(Duration::from_secs(u64::from(u32::MAX)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_and_transient_ignore_the_clock() {
        let broken = || Err(DtexecError::Clock("no clock".into()));
        assert_eq!(
            decide_linger(OpenPolicy::PermanentTerm, 0, broken()),
            LingerDecision::Linger
        );
        assert_eq!(
            decide_linger(OpenPolicy::Transient, 0, broken()),
            LingerDecision::Exit(0)
        );
    }

    #[test]
    fn short_window_lingers_only_for_fast_exits() {
        let policy = OpenPolicy::ShortWindow(7);
        assert_eq!(decide_linger(policy, 100, Ok(103)), LingerDecision::Linger);
        assert_eq!(decide_linger(policy, 100, Ok(107)), LingerDecision::Exit(0));
        assert_eq!(decide_linger(policy, 100, Ok(110)), LingerDecision::Exit(0));
    }

    #[test]
    fn zero_window_exits() {
        assert_eq!(
            decide_linger(OpenPolicy::ShortWindow(0), 100, Ok(100)),
            LingerDecision::Exit(0)
        );
    }

    #[test]
    fn clock_failure_in_short_window_is_fatal() {
        let now = Err(DtexecError::Clock("gone".into()));
        assert_eq!(
            decide_linger(OpenPolicy::ShortWindow(5), 0, now),
            LingerDecision::Exit(1)
        );
    }

    #[test]
    fn forced_transient_overrides_request() {
        assert_eq!(
            effective_policy(OpenPolicy::PermanentTerm, true),
            OpenPolicy::Transient
        );
        assert_eq!(
            effective_policy(OpenPolicy::ShortWindow(3), false),
            OpenPolicy::ShortWindow(3)
        );
    }
}
