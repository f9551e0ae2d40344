//! Structured, tag-based logging
//!
//! ```rust,ignore
//! use walletsync::logger::{self, LogTag};
//!
//! logger::error(LogTag::Gateway, "Explorer unreachable");
//! logger::warning(LogTag::Discovery, "Batch 3 failed, keeping confirmed prefix");
//! logger::info(LogTag::Wallet, "Wallet unlocked");
//! logger::debug(LogTag::Cache, "Node balance:abc:mainnet refreshed"); // only with --debug-cache
//! logger::verbose(LogTag::Gateway, "Raw response: ..."); // only with --verbose
//! ```
//!
//! Call [`init`] once at startup with the `[logging]` settings.

mod bridge;
mod config;
mod core;
mod file;
mod format;
mod levels;
mod tags;

pub use config::{get_logger_config, set_logger_config, update_logger_config, LoggerConfig};
pub use levels::LogLevel;
pub use tags::LogTag;

use crate::config::LoggingConfig;

/// Initialize the logger from settings and command-line flags
///
/// Opens the log file if one is configured and routes `log` facade
/// records from dependencies through the same output.
pub fn init(settings: &LoggingConfig) {
    config::init_from_settings(settings);
    file::init_file_logging();
    bridge::install();
}

/// Log at ERROR level (always shown)
pub fn error(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level
pub fn warning(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level
pub fn info(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level, shown only with `--debug-<tag>` or a matching `debug_tags` entry
pub fn debug(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Debug, message);
}

/// Log at VERBOSE level, shown only with `--verbose`
pub fn verbose(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Verbose, message);
}

/// Flush pending file writes; call during shutdown
pub fn flush() {
    file::flush_file_logging();
}
