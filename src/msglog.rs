// src/msglog.rs

//! Desktop message log.
//!
//! Captured child stderr and the few user-visible supervisor errors end up in
//! `$HOME/.dt/errorlog`, one entry per block:
//!
//! ```text
//! *** 2026-10-18 09:41:07
//! *** (dtexec) xterm(4242): stderr
//! xterm: cannot load font ...
//! ```
//!
//! Without a home directory (or when the log cannot be written) entries go
//! to our own stderr instead.

use std::fmt::Debug;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use tracing::debug;

use crate::fs::FileSystem;

/// Tag used for the supervisor's own entries.
pub const SUPERVISOR_TAG: &str = "Dtexec";

/// Destination for message-log entries.
pub trait MessageSink: Debug {
    fn log(&mut self, tag: &str, body: &[u8]);
}

/// Tag identifying a child's stderr: both our argv[0] and the exec'd name.
pub fn stderr_tag(argv0: &str, command: &str) -> String {
    format!("({argv0}) {command}")
}

/// Render one entry.
pub fn format_entry(timestamp: &str, tag: &str, pid: u32, body: &[u8]) -> Vec<u8> {
    let mut entry = format!("*** {timestamp}\n*** {tag}({pid}): stderr\n").into_bytes();
    entry.extend_from_slice(body);
    if !body.ends_with(b"\n") {
        entry.push(b'\n');
    }
    entry
}

/// Appends to the per-user error log through a [`FileSystem`].
#[derive(Debug)]
pub struct ErrorLogSink {
    fs: Arc<dyn FileSystem>,
    path: Option<PathBuf>,
    pid: u32,
}

impl ErrorLogSink {
    /// `dt_dir` is `$HOME/.dt`; `None` sends everything to stderr.
    pub fn new(fs: Arc<dyn FileSystem>, dt_dir: Option<PathBuf>) -> Self {
        Self {
            fs,
            path: dt_dir.map(|dir| dir.join("errorlog")),
            pid: std::process::id(),
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    fn write_file(&self, entry: &[u8]) -> anyhow::Result<()> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no home directory"))?;
        if let Some(dir) = path.parent() {
            self.fs.create_dir_owner_only(dir)?;
        }
        self.fs.append(path, entry)
    }
}

impl MessageSink for ErrorLogSink {
    fn log(&mut self, tag: &str, body: &[u8]) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let entry = format_entry(&timestamp, tag, self.pid, body);

        if let Err(err) = self.write_file(&entry) {
            debug!(error = %err, "message log unavailable; using stderr");
            let _ = std::io::stderr().write_all(&entry);
        }
    }
}
