#![allow(dead_code)]

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use dtexec::cli::LaunchRequest;
use dtexec::config::Tunables;
use dtexec::types::{CallerIdentity, OpenPolicy};

/// Tunables scaled down so a whole shutdown runs in milliseconds.
pub fn fast_tunables() -> Tunables {
    TunablesBuilder::new().build()
}

/// Builder for `Tunables`, starting from fast test timings.
pub struct TunablesBuilder {
    tunables: Tunables,
}

impl TunablesBuilder {
    pub fn new() -> Self {
        Self {
            tunables: Tunables {
                short_poll: Duration::from_millis(2),
                long_poll: Duration::from_millis(20),
                urgent_grace: Duration::from_millis(20),
                reply_wait: Duration::from_millis(40),
                notice_delay: Duration::from_millis(5),
                fork_backoff: Duration::from_millis(1),
                ..Tunables::default()
            },
        }
    }

    pub fn reply_wait(mut self, wait: Duration) -> Self {
        self.tunables.reply_wait = wait;
        self
    }

    pub fn urgent_grace(mut self, grace: Duration) -> Self {
        self.tunables.urgent_grace = grace;
        self
    }

    pub fn short_poll(mut self, poll: Duration) -> Self {
        self.tunables.short_poll = poll;
        self
    }

    pub fn notice_delay(mut self, delay: Duration) -> Self {
        self.tunables.notice_delay = delay;
        self
    }

    pub fn fork_attempts(mut self, attempts: u32) -> Self {
        self.tunables.fork_attempts = attempts;
        self
    }

    pub fn stderr_flush_ceiling(mut self, ceiling: usize) -> Self {
        self.tunables.stderr_flush_ceiling = ceiling;
        self
    }

    pub fn build(self) -> Tunables {
        self.tunables
    }
}

impl Default for TunablesBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `LaunchRequest`.
pub struct LaunchRequestBuilder {
    request: LaunchRequest,
}

impl LaunchRequestBuilder {
    pub fn new() -> Self {
        Self {
            request: LaunchRequest::default(),
        }
    }

    pub fn command(mut self, argv: &[&str]) -> Self {
        self.request.command = Some(argv.iter().map(OsString::from).collect());
        self
    }

    pub fn policy(mut self, policy: OpenPolicy) -> Self {
        self.request.policy = policy;
        self
    }

    pub fn caller(mut self, caller: CallerIdentity) -> Self {
        self.request.caller = Some(caller);
        self
    }

    pub fn temp_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.request.temp_files.push(path.into());
        self
    }

    pub fn build(self) -> LaunchRequest {
        self.request
    }
}

impl Default for LaunchRequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The caller identity `launcher.1_12_34` used across tests.
pub fn caller() -> CallerIdentity {
    CallerIdentity {
        procid: "launcher.1".to_string(),
        invocation_id: 12,
        child_id: 34,
    }
}
