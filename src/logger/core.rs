//! Core filtering logic shared by every log call

use super::config::{get_logger_config, is_debug_enabled_for_tag, is_verbose_enabled_for_tag};
use super::levels::LogLevel;
use super::tags::LogTag;

/// Check if a log message should be displayed
///
/// Filtering rules:
/// 1. Errors are always shown
/// 2. Levels above the configured threshold are dropped
/// 3. Debug requires debug mode for that specific tag
/// 4. Verbose requires --verbose or --verbose-<tag>
/// 5. A non-empty enabled tag set restricts the remaining output
pub fn should_log(tag: &LogTag, level: LogLevel) -> bool {
    if level == LogLevel::Error {
        return true;
    }

    let config = get_logger_config();

    if level == LogLevel::Debug {
        return is_debug_enabled_for_tag(tag) || config.min_level >= LogLevel::Debug;
    }

    if level == LogLevel::Verbose {
        return config.min_level == LogLevel::Verbose || is_verbose_enabled_for_tag(tag);
    }

    if level > config.min_level {
        return false;
    }

    if !config.enabled_tags.is_empty() && !config.enabled_tags.contains(tag.as_key()) {
        return false;
    }

    true
}

pub fn log_internal(tag: LogTag, level: LogLevel, message: &str) {
    if !should_log(&tag, level) {
        return;
    }

    super::format::format_and_log(tag, level, message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::config::{set_logger_config, LoggerConfig};

    #[test]
    fn errors_always_pass_and_levels_respect_threshold() {
        set_logger_config(LoggerConfig {
            min_level: LogLevel::Warning,
            console: false,
            ..LoggerConfig::default()
        });

        assert!(should_log(&LogTag::Cache, LogLevel::Error));
        assert!(should_log(&LogTag::Cache, LogLevel::Warning));
        assert!(!should_log(&LogTag::Cache, LogLevel::Info));

        set_logger_config(LoggerConfig::default());
    }
}
