// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What happens to the supervisor (and its terminal window) once the child
/// has exited.
///
/// - `PermanentTerm`: linger forever so the terminal stays open.
/// - `Transient`: exit as soon as shutdown completes.
/// - `ShortWindow(n)`: linger only if the child exited within `n` seconds of
///   launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenPolicy {
    PermanentTerm,
    Transient,
    ShortWindow(u64),
}

impl OpenPolicy {
    /// Map the integer argument of `-open` onto a policy.
    pub fn from_open_arg(n: i64) -> Self {
        match n {
            n if n < 0 => OpenPolicy::PermanentTerm,
            0 => OpenPolicy::Transient,
            n => OpenPolicy::ShortWindow(n as u64),
        }
    }

    /// Only commands without a visible console get their stderr captured.
    pub fn captures_stderr(self) -> bool {
        matches!(self, OpenPolicy::Transient)
    }
}

/// Without `-open` the supervisor neither captures stderr nor lingers: it
/// behaves like a zero-second window.
impl Default for OpenPolicy {
    fn default() -> Self {
        OpenPolicy::ShortWindow(0)
    }
}

/// Identity of the launcher that started us, taken from `-ttprocid`.
///
/// Formatted on the command line as `<procid>_<invocation>_<child>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    /// The caller's own messaging-bus process id.
    pub procid: String,
    pub invocation_id: i32,
    pub child_id: i32,
}

impl FromStr for CallerIdentity {
    type Err = String;

    /// Split from the right on `_`; both trailing integers must be non-zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (rest, child) = s
            .rsplit_once('_')
            .ok_or_else(|| format!("caller token '{s}' has no '_' separators"))?;
        let (procid, invocation) = rest
            .rsplit_once('_')
            .ok_or_else(|| format!("caller token '{s}' has only one '_' separator"))?;

        let invocation_id = atoi(invocation) as i32;
        let child_id = atoi(child) as i32;

        if invocation_id == 0 || child_id == 0 {
            return Err(format!(
                "caller token '{s}' needs two non-zero ids (got {invocation_id} and {child_id})"
            ));
        }

        Ok(CallerIdentity {
            procid: procid.to_string(),
            invocation_id,
            child_id,
        })
    }
}

/// C-style `atoi`: optional leading whitespace and sign, then as many digits
/// as are present. Anything unparsable yields 0.
pub fn atoi(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        value = value.saturating_mul(10).saturating_add(i64::from(b - b'0'));
    }

    if negative { -value } else { value }
}

/// Completion codes reported to the launcher.
///
/// These are protocol values shared with the launcher and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ChildStatus {
    Unknown = 1,
    PendingStart = 2,
    AliveUnknown = 4,
    Alive = 8,
    Done = 16,
    Failed = 32,
    Canceled = 64,
}

impl ChildStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Phases of the shutdown sequence, in the only order they may be visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ShutdownPhase {
    Starting = 1,
    ReplyWait = 2,
    Replied = 3,
    PanicCleanup = 4,
    FinalLinger = 5,
}

impl ShutdownPhase {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(ShutdownPhase::Starting),
            2 => Some(ShutdownPhase::ReplyWait),
            3 => Some(ShutdownPhase::Replied),
            4 => Some(ShutdownPhase::PanicCleanup),
            5 => Some(ShutdownPhase::FinalLinger),
            _ => None,
        }
    }
}

impl fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownPhase::Starting => "starting",
            ShutdownPhase::ReplyWait => "reply-wait",
            ShutdownPhase::Replied => "replied",
            ShutdownPhase::PanicCleanup => "panic-cleanup",
            ShutdownPhase::FinalLinger => "final-linger",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_arg_maps_sign_to_policy() {
        assert_eq!(OpenPolicy::from_open_arg(-5), OpenPolicy::PermanentTerm);
        assert_eq!(OpenPolicy::from_open_arg(0), OpenPolicy::Transient);
        assert_eq!(OpenPolicy::from_open_arg(7), OpenPolicy::ShortWindow(7));
    }

    #[test]
    fn atoi_matches_c_semantics() {
        assert_eq!(atoi("12"), 12);
        assert_eq!(atoi("  -3x"), -3);
        assert_eq!(atoi("+4"), 4);
        assert_eq!(atoi("abc"), 0);
        assert_eq!(atoi(""), 0);
    }

    #[test]
    fn caller_identity_parses_from_the_right() {
        let id: CallerIdentity = "host_1_2_12_34".parse().unwrap();
        assert_eq!(id.procid, "host_1_2");
        assert_eq!(id.invocation_id, 12);
        assert_eq!(id.child_id, 34);
    }

    #[test]
    fn caller_identity_rejects_zero_and_missing_ids() {
        assert!("foo_12_0".parse::<CallerIdentity>().is_err());
        assert!("foo_0_9".parse::<CallerIdentity>().is_err());
        assert!("nodashes".parse::<CallerIdentity>().is_err());
        assert!("one_5".parse::<CallerIdentity>().is_err());
    }

    #[test]
    fn phase_round_trips_through_raw_value() {
        for phase in [
            ShutdownPhase::Starting,
            ShutdownPhase::ReplyWait,
            ShutdownPhase::Replied,
            ShutdownPhase::PanicCleanup,
            ShutdownPhase::FinalLinger,
        ] {
            assert_eq!(ShutdownPhase::from_u8(phase.as_u8()), Some(phase));
        }
        assert_eq!(ShutdownPhase::from_u8(0), None);
    }
}
