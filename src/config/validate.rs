// src/config/validate.rs

use crate::config::model::{RawTunables, Tunables};
use crate::errors::{DtexecError, Result};

impl TryFrom<RawTunables> for Tunables {
    type Error = DtexecError;

    fn try_from(raw: RawTunables) -> std::result::Result<Self, Self::Error> {
        validate_raw_tunables(&raw)?;
        Ok(Tunables::new_unchecked(&raw))
    }
}

fn validate_raw_tunables(raw: &RawTunables) -> Result<()> {
    if raw.short_poll_ms == 0 {
        return Err(DtexecError::ConfigError(
            "short_poll_ms must be >= 1 (got 0)".to_string(),
        ));
    }

    if raw.fork_attempts == 0 {
        return Err(DtexecError::ConfigError(
            "fork_attempts must be >= 1 (got 0)".to_string(),
        ));
    }

    if raw.long_poll_secs.saturating_mul(1000) < raw.short_poll_ms {
        return Err(DtexecError::ConfigError(format!(
            "long_poll_secs ({}s) must not be shorter than short_poll_ms ({}ms)",
            raw.long_poll_secs, raw.short_poll_ms
        )));
    }

    if raw.stderr_flush_ceiling == 0 {
        return Err(DtexecError::ConfigError(
            "stderr_flush_ceiling must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}
