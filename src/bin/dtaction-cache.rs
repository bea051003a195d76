// src/bin/dtaction-cache.rs

//! Companion tool for the persisted action icon cache.
//!
//! `update` is what the window manager runs when it receives the
//! supervisor's icon-cache notice; `lookup` and `list` are for humans.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use dtexec::config::Environment;
use dtexec::fs::RealFileSystem;
use dtexec::icon_cache::ActionIconCache;
use dtexec::logging;
use tracing::error;

/// Command-line arguments for `dtaction-cache`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dtaction-cache",
    version,
    about = "Maintain and query the action icon cache.",
    long_about = None
)]
struct CacheCli {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// Only used when `DTWM_ACTION_ICON_CACHE_LOG` names a log file. If
    /// omitted, `DTEXEC_LOG` or `info` is used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum CacheCommand {
    /// Record the programs an action started.
    Update {
        /// The action's command.
        action: String,
        /// Newline-separated child commands.
        child_list: String,
    },
    /// Print the icon for a window's command.
    Lookup { command: String },
    /// Print every cached `child<TAB>action` mapping.
    List,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

fn main() -> ExitCode {
    let args = CacheCli::parse();
    match run_main(args) {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "dtaction-cache failed");
            eprintln!("dtaction-cache error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run_main(args: CacheCli) -> Result<ExitCode> {
    let env = Environment::from_process();
    if let Some(path) = env.cache_log.as_deref() {
        // A log that cannot be opened just means no diagnostics.
        if logging::write_banner(path).is_ok() {
            let level = args.log_level.map(LogLevel::as_str).or(env.log_level.as_deref());
            let _ = logging::init_logging(Some(path), level);
        }
    }

    let mut cache = ActionIconCache::open(Arc::new(RealFileSystem), &env);

    match args.command {
        CacheCommand::Update { action, child_list } => {
            let updated = cache.update(&action, &child_list)?;
            println!("{}", if updated { "updated" } else { "unchanged" });
        }
        CacheCommand::Lookup { command } => match cache.find_icon(&command) {
            Some(icon) => println!("{icon}"),
            None => return Ok(ExitCode::FAILURE),
        },
        CacheCommand::List => {
            for entry in cache.store().entries() {
                println!("{}\t{}", entry.command, entry.action);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_takes_action_and_child_list() {
        let args =
            CacheCli::try_parse_from(["dtaction-cache", "update", "dtterm", "sh\nvim"]).unwrap();
        match args.command {
            CacheCommand::Update { action, child_list } => {
                assert_eq!(action, "dtterm");
                assert_eq!(child_list, "sh\nvim");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn log_level_is_global_option() {
        let args =
            CacheCli::try_parse_from(["dtaction-cache", "--log-level", "debug", "list"]).unwrap();
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert!(matches!(args.command, CacheCommand::List));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(CacheCli::try_parse_from(["dtaction-cache"]).is_err());
    }
}
