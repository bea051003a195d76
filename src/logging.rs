// src/logging.rs

//! Logging setup for `dtexec` using `tracing` + `tracing-subscriber`.
//!
//! Diagnostics are opt-in: a subscriber is only installed when a log path is
//! configured (`DTEXEC_ACTION_ICON_CACHE_LOG` for the supervisor,
//! `DTWM_ACTION_ICON_CACHE_LOG` for `dtaction-cache`). Lines are appended to
//! that file with a local `%Y-%m-%d %H:%M:%S` timestamp. Our stdout/stderr
//! belong to the child and the user, so nothing is ever logged there.
//!
//! Level comes from `DTEXEC_LOG` (e.g. "info", "debug"), default `info`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::ChronoLocal;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Initialise the global logging subscriber.
///
/// Returns `Ok(false)` without installing anything when `path` is `None`.
/// Safe to call once at startup.
pub fn init_logging(path: Option<&Path>, level: Option<&str>) -> Result<bool> {
    let Some(path) = path else {
        return Ok(false);
    };

    let file = open_log(path)?;
    let level = level
        .and_then(parse_level_str)
        .unwrap_or(tracing::Level::INFO);

    fmt()
        .with_max_level(level)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_ansi(false)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| anyhow!("logging already initialised: {e}"))?;

    Ok(true)
}

/// Append a `pid=<pid> exe=<path>` line so interleaved runs can be told
/// apart.
pub fn write_banner(path: &Path) -> Result<()> {
    let exe = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "(unknown)".to_string());
    let mut file = open_log(path)?;
    writeln!(file, "{}", banner_line(std::process::id(), &exe))
        .with_context(|| format!("writing banner to {}", path.display()))
}

fn banner_line(pid: u32, exe: &str) -> String {
    format!("pid={pid} exe={exe}")
}

fn open_log(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_are_case_insensitive() {
        assert_eq!(parse_level_str(" Debug "), Some(tracing::Level::DEBUG));
        assert_eq!(parse_level_str("WARNING"), Some(tracing::Level::WARN));
        assert_eq!(parse_level_str("loud"), None);
    }

    #[test]
    fn no_path_installs_nothing() {
        assert!(!init_logging(None, Some("trace")).unwrap());
    }

    #[test]
    fn banner_names_pid_and_executable() {
        assert_eq!(banner_line(42, "/usr/bin/x"), "pid=42 exe=/usr/bin/x");
    }

    #[test]
    fn banner_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.log");
        std::fs::write(&path, "earlier\n").unwrap();

        write_banner(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("earlier\npid="));
    }
}
