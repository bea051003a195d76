// src/config/loader.rs

use std::path::Path;

use tracing::{debug, warn};

use crate::config::env::Environment;
use crate::config::model::{RawTunables, Tunables};
use crate::errors::Result;
use crate::fs::FileSystem;

/// Load a tunables file from a given path and return the raw `RawTunables`.
///
/// This only performs TOML deserialization; use [`load_and_validate`] to get
/// checked [`Tunables`].
pub fn load_from_path(fs: &dyn FileSystem, path: impl AsRef<Path>) -> Result<RawTunables> {
    let contents = fs.read_to_string(path.as_ref())?;
    let raw: RawTunables = toml::from_str(&contents)?;
    Ok(raw)
}

pub fn load_and_validate(fs: &dyn FileSystem, path: impl AsRef<Path>) -> Result<Tunables> {
    let raw = load_from_path(fs, path)?;
    Tunables::try_from(raw)
}

/// Resolve the tunables for this run.
///
/// A broken override file must never stop the command from being launched,
/// so every failure here falls back to the built-in values.
pub fn resolve_tunables(fs: &dyn FileSystem, env: &Environment) -> Tunables {
    let Some(path) = env.config_path.as_deref() else {
        return Tunables::default();
    };

    match load_and_validate(fs, path) {
        Ok(tunables) => {
            debug!(path = %path.display(), ?tunables, "loaded tunables override");
            tunables
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring tunables override");
            Tunables::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn env_with_config(path: &str) -> Environment {
        Environment {
            config_path: Some(PathBuf::from(path)),
            ..Environment::default()
        }
    }

    #[test]
    fn override_file_is_applied() {
        let fs = MockFileSystem::new();
        fs.add_file("/etc/dtexec.toml", "short_poll_ms = 5\nfork_attempts = 2\n");

        let t = resolve_tunables(&fs, &env_with_config("/etc/dtexec.toml"));
        assert_eq!(t.short_poll, Duration::from_millis(5));
        assert_eq!(t.fork_attempts, 2);
        assert_eq!(t.urgent_ticks(), 1000);
    }

    #[test]
    fn invalid_override_degrades_to_defaults() {
        let fs = MockFileSystem::new();
        fs.add_file("/etc/dtexec.toml", "short_poll_ms = 0\n");

        let t = resolve_tunables(&fs, &env_with_config("/etc/dtexec.toml"));
        assert_eq!(t, Tunables::default());
    }

    #[test]
    fn missing_override_degrades_to_defaults() {
        let fs = MockFileSystem::new();
        let t = resolve_tunables(&fs, &env_with_config("/nowhere.toml"));
        assert_eq!(t, Tunables::default());
    }
}
