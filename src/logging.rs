use std::sync::OnceLock;

use chrono::Local;
use log::{Level, Metadata, Record, SetLoggerError};

static LOGGER: OnceLock<LampLogger> = OnceLock::new();

/// Writes timestamped records to stderr
pub struct LampLogger {
    level: Level,
}

impl LampLogger {
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Installs the logger. When `RUST_LOG` is set, `env_logger` is used instead
    /// so its filter syntax applies.
    pub fn init(level: Level) -> Result<(), SetLoggerError> {
        if std::env::var_os("RUST_LOG").is_some() {
            return env_logger::Builder::from_default_env().try_init();
        }

        let logger = LOGGER.get_or_init(|| LampLogger::new(level));
        log::set_logger(logger).map(|()| log::set_max_level(level.to_level_filter()))
    }

    fn format(&self, record: &Record) -> String {
        format!(
            "[{} {} {}] {}",
            Local::now().to_rfc3339(),
            record.level(),
            record.target(),
            record.args()
        )
    }
}

impl log::Log for LampLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{}", self.format(record));
        }
    }

    fn flush(&self) {}
}

/// Maps `--quiet` and a `-v` count to a level: info by default, debug, then trace.
pub fn level_for_verbosity(quiet: bool, verbose: u8) -> Level {
    match verbose {
        _ if quiet => Level::Warn,
        0 => Level::Info,
        1 => Level::Debug,
        _ => Level::Trace,
    }
}
