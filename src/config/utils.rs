//! Configuration loading and validation

use super::schemas::Config;
use crate::errors::{SyncError, SyncResult};
use crate::logger::{self, LogTag};
use std::path::Path;

/// Default configuration file path
pub const CONFIG_FILE_PATH: &str = "data/walletsync.toml";

/// Load configuration from a TOML file
///
/// A missing file yields defaults; an unreadable or malformed one is an error.
pub fn load_config_from_path(path: impl AsRef<Path>) -> SyncResult<Config> {
    let path = path.as_ref();
    let config = if path.exists() {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::configuration(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        load_config_from_str(&contents)?
    } else {
        logger::warning(
            LogTag::Config,
            &format!("Config file '{}' not found, using default values", path.display()),
        );
        Config::default()
    };

    validate_config(&config)?;
    Ok(config)
}

pub fn load_config_from_str(contents: &str) -> SyncResult<Config> {
    let config: Config = toml::from_str(contents)?;
    Ok(config)
}

/// Reject settings the synchronization core cannot run with
pub fn validate_config(config: &Config) -> SyncResult<()> {
    let invalid = |field: &str, reason: &str| {
        Err(SyncError::configuration(format!(
            "Invalid config field '{}': {}",
            field, reason
        )))
    };

    if config.discovery.gap_limit == 0 {
        return invalid("discovery.gap_limit", "must be at least 1");
    }
    if config.discovery.batch_size == 0 {
        return invalid("discovery.batch_size", "must be at least 1");
    }
    if config.discovery.group_count == 0 {
        return invalid("discovery.group_count", "must be at least 1");
    }
    if config.gateway.max_addresses_per_request == 0 || config.gateway.max_tokens_per_request == 0 {
        return invalid("gateway.max_*_per_request", "ceilings must be at least 1");
    }
    if config.gateway.page_size == 0 || config.gateway.page_window == 0 {
        return invalid("gateway.page_size", "page size and window must be at least 1");
    }
    if config.retry.multiplier < 1.0 {
        return invalid("retry.multiplier", "must be >= 1.0");
    }
    if config.retry.max_attempts == 0 {
        return invalid("retry.max_attempts", "must be at least 1");
    }
    if config.pending.poll_interval_ms == 0 {
        return invalid("pending.poll_interval_ms", "must be positive");
    }
    Ok(())
}
