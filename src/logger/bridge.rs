//! Routes records from the `log` facade (reqwest, hyper, rusqlite) into
//! the tagged logger under `LogTag::System`.

use super::core::log_internal;
use super::levels::LogLevel;
use super::tags::LogTag;

struct FacadeBridge;

static BRIDGE: FacadeBridge = FacadeBridge;

impl log::Log for FacadeBridge {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        // Dependency debug chatter is dropped
        metadata.level() <= log::Level::Info
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = LogLevel::from(record.level());
        let message = format!("{}: {}", record.target(), record.args());
        log_internal(LogTag::System, level, &message);
    }

    fn flush(&self) {
        super::file::flush_file_logging();
    }
}

/// Install the bridge; a second call (or another installed logger) is ignored
pub fn install() {
    if log::set_logger(&BRIDGE).is_ok() {
        log::set_max_level(log::LevelFilter::Info);
    }
}
