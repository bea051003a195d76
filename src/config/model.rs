// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

/// Timing and sizing overrides as read from a TOML file.
///
/// ```toml
/// short_poll_ms = 20
/// long_poll_secs = 86400
/// urgent_grace_ms = 5000
/// reply_wait_ms = 300000
/// notice_delay_ms = 5000
/// stderr_flush_ceiling = 65535
/// fork_attempts = 10
/// fork_backoff_ms = 2000
/// ```
///
/// Every key is optional; a missing key keeps the built-in value.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTunables {
    #[serde(default = "default_short_poll_ms")]
    pub short_poll_ms: u64,

    #[serde(default = "default_long_poll_secs")]
    pub long_poll_secs: u64,

    /// How long an urgent signal may go without the child exiting before the
    /// supervisor gives up and panics.
    #[serde(default = "default_urgent_grace_ms")]
    pub urgent_grace_ms: u64,

    /// How long to wait for the launcher to acknowledge the Done request.
    #[serde(default = "default_reply_wait_ms")]
    pub reply_wait_ms: u64,

    #[serde(default = "default_notice_delay_ms")]
    pub notice_delay_ms: u64,

    /// Collected stderr is flushed to the message log once it grows past
    /// this many bytes.
    #[serde(default = "default_stderr_flush_ceiling")]
    pub stderr_flush_ceiling: usize,

    #[serde(default = "default_fork_attempts")]
    pub fork_attempts: u32,

    #[serde(default = "default_fork_backoff_ms")]
    pub fork_backoff_ms: u64,
}

fn default_short_poll_ms() -> u64 {
    20
}

fn default_long_poll_secs() -> u64 {
    86_400
}

fn default_urgent_grace_ms() -> u64 {
    5_000
}

fn default_reply_wait_ms() -> u64 {
    300_000
}

fn default_notice_delay_ms() -> u64 {
    5_000
}

fn default_stderr_flush_ceiling() -> usize {
    65_535
}

fn default_fork_attempts() -> u32 {
    10
}

fn default_fork_backoff_ms() -> u64 {
    2_000
}

impl Default for RawTunables {
    fn default() -> Self {
        Self {
            short_poll_ms: default_short_poll_ms(),
            long_poll_secs: default_long_poll_secs(),
            urgent_grace_ms: default_urgent_grace_ms(),
            reply_wait_ms: default_reply_wait_ms(),
            notice_delay_ms: default_notice_delay_ms(),
            stderr_flush_ceiling: default_stderr_flush_ceiling(),
            fork_attempts: default_fork_attempts(),
            fork_backoff_ms: default_fork_backoff_ms(),
        }
    }
}

/// Validated timing constants used by the launcher and the reactor.
///
/// Build one with `Tunables::try_from(raw)` or take `Tunables::default()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tunables {
    pub short_poll: Duration,
    pub long_poll: Duration,
    pub urgent_grace: Duration,
    pub reply_wait: Duration,
    pub notice_delay: Duration,
    pub stderr_flush_ceiling: usize,
    pub fork_attempts: u32,
    pub fork_backoff: Duration,
}

impl Tunables {
    pub(crate) fn new_unchecked(raw: &RawTunables) -> Self {
        Self {
            short_poll: Duration::from_millis(raw.short_poll_ms),
            long_poll: Duration::from_secs(raw.long_poll_secs),
            urgent_grace: Duration::from_millis(raw.urgent_grace_ms),
            reply_wait: Duration::from_millis(raw.reply_wait_ms),
            notice_delay: Duration::from_millis(raw.notice_delay_ms),
            stderr_flush_ceiling: raw.stderr_flush_ceiling,
            fork_attempts: raw.fork_attempts,
            fork_backoff: Duration::from_millis(raw.fork_backoff_ms),
        }
    }

    /// Short-timeout ticks the reactor waits after an urgent signal before
    /// panicking.
    pub fn urgent_ticks(&self) -> u32 {
        self.ticks_for(self.urgent_grace)
    }

    /// Short-timeout ticks the reactor waits for the Done reply.
    pub fn reply_ticks(&self) -> u32 {
        self.ticks_for(self.reply_wait)
    }

    fn ticks_for(&self, window: Duration) -> u32 {
        let short = self.short_poll.as_millis().max(1);
        u32::try_from(window.as_millis() / short).unwrap_or(u32::MAX)
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self::new_unchecked(&RawTunables::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tick_bounds_match_twenty_ms_polling() {
        let t = Tunables::default();
        assert_eq!(t.short_poll, Duration::from_millis(20));
        assert_eq!(t.urgent_ticks(), 250);
        assert_eq!(t.reply_ticks(), 15_000);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let raw: RawTunables = toml::from_str("fork_attempts = 3").unwrap();
        assert_eq!(raw.fork_attempts, 3);
        assert_eq!(raw.short_poll_ms, 20);
        assert_eq!(raw.stderr_flush_ceiling, 65_535);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = toml::from_str::<RawTunables>("short_pol_ms = 5").unwrap_err();
        assert!(err.to_string().contains("short_pol_ms"));
    }
}
