//! Logger runtime configuration
//!
//! Built from the `[logging]` config section and the command-line flags,
//! then stored process-wide so that any module can log without plumbing.

use super::levels::LogLevel;
use super::tags::LogTag;
use crate::arguments;
use crate::config::LoggingConfig;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub min_level: LogLevel,
    /// Tags with debug output enabled from config (flags are checked separately)
    pub debug_tags: HashSet<String>,
    /// When non-empty, only these tags are printed below error level
    pub enabled_tags: HashSet<String>,
    pub file_path: Option<PathBuf>,
    pub console: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
            enabled_tags: HashSet::new(),
            file_path: None,
            console: true,
        }
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> =
    Lazy::new(|| RwLock::new(LoggerConfig::default()));

pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG.read().clone()
}

pub fn set_logger_config(config: LoggerConfig) {
    *LOGGER_CONFIG.write() = config;
}

pub fn update_logger_config<F: FnOnce(&mut LoggerConfig)>(f: F) {
    f(&mut LOGGER_CONFIG.write());
}

/// Build the logger configuration from settings plus command-line flags
pub fn init_from_settings(settings: &LoggingConfig) {
    let mut config = LoggerConfig::default();

    if let Some(level) = LogLevel::parse(&settings.min_level) {
        config.min_level = level;
    }
    if arguments::is_verbose_enabled() {
        config.min_level = LogLevel::Verbose;
    } else if arguments::has_arg("--quiet") {
        config.min_level = LogLevel::Warning;
    }

    config.debug_tags = settings
        .debug_tags
        .iter()
        .map(|t| t.to_lowercase())
        .collect();
    config.enabled_tags = settings
        .enabled_tags
        .iter()
        .map(|t| t.to_lowercase())
        .collect();
    config.file_path = settings.file_path.as_ref().map(PathBuf::from);
    config.console = settings.console;

    set_logger_config(config);
}

pub fn is_debug_enabled_for_tag(tag: &LogTag) -> bool {
    let key = tag.as_key();
    arguments::is_debug_flag_enabled(key) || LOGGER_CONFIG.read().debug_tags.contains(key)
}

pub fn is_verbose_enabled_for_tag(tag: &LogTag) -> bool {
    arguments::is_verbose_flag_enabled(tag.as_key())
}
