// src/config/env.rs

use std::path::PathBuf;

/// Snapshot of the environment variables the supervisor reacts to.
///
/// Empty values are treated the same as unset ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    /// `_DTEXEC_DEBUG`: spin at startup so a debugger can attach.
    pub debug_spin: bool,
    /// `DTEXEC_ACTION_ICON_CACHE_LOG`: diagnostic log of the supervisor.
    pub notifier_log: Option<PathBuf>,
    /// `DTWM_ACTION_ICON_CACHE_LOG`: diagnostic log of `dtaction-cache`.
    pub cache_log: Option<PathBuf>,
    /// `DTEXEC_LOG`: level filter for the diagnostic log.
    pub log_level: Option<String>,
    /// `DTEXEC_CONFIG`: optional TOML tunables override.
    pub config_path: Option<PathBuf>,
    /// `DTEXEC_BUS_SOCKET`: messaging-bus endpoint.
    pub bus_socket: Option<PathBuf>,
    pub home: Option<PathBuf>,
    pub lang: Option<String>,
}

impl Environment {
    pub fn from_process() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        Self {
            debug_spin: get("_DTEXEC_DEBUG").is_some(),
            notifier_log: get("DTEXEC_ACTION_ICON_CACHE_LOG").map(PathBuf::from),
            cache_log: get("DTWM_ACTION_ICON_CACHE_LOG").map(PathBuf::from),
            log_level: get("DTEXEC_LOG"),
            config_path: get("DTEXEC_CONFIG").map(PathBuf::from),
            bus_socket: get("DTEXEC_BUS_SOCKET").map(PathBuf::from),
            home: get("HOME").map(PathBuf::from),
            lang: get("LANG"),
        }
    }

    /// `$HOME/.dt`, where the message log and the icon cache live.
    pub fn dt_dir(&self) -> Option<PathBuf> {
        self.home.as_ref().map(|home| home.join(".dt"))
    }
}
