use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::Write;
use std::str::FromStr;
use std::sync::OnceLock;

/// Environment variable selecting the log level.
pub const LOG_LEVEL_VAR: &str = "CM_LOG";

pub struct StderrLogger {
    max_level: LevelFilter,
}

impl StderrLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Level from [`LOG_LEVEL_VAR`]; `info` if unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(parse_level(std::env::var(LOG_LEVEL_VAR).ok().as_deref()))
    }

    /// Call this once, early in `main`.
    #[allow(clippy::missing_errors_doc)]
    pub fn init(self) -> Result<(), SetLoggerError> {
        static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

        let logger = LOGGER.get_or_init(|| self);
        log::set_logger(logger)?;
        log::set_max_level(logger.max_level);
        Ok(())
    }
}

fn parse_level(value: Option<&str>) -> LevelFilter {
    value
        .and_then(|v| LevelFilter::from_str(v.trim()).ok())
        .unwrap_or(LevelFilter::Info)
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Format: "[LEVEL] target: message\n"
        let _ = writeln!(
            std::io::stderr().lock(),
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_defaults_to_info() {
        assert_eq!(parse_level(None), LevelFilter::Info);
        assert_eq!(parse_level(Some("nonsense")), LevelFilter::Info);
    }

    #[test]
    fn level_names_are_case_insensitive() {
        assert_eq!(parse_level(Some("debug")), LevelFilter::Debug);
        assert_eq!(parse_level(Some("TRACE")), LevelFilter::Trace);
        assert_eq!(parse_level(Some(" off ")), LevelFilter::Off);
    }
}
