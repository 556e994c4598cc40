//! Component logger with simulator timestamps.
//!
//! Lines follow `{time:>9.2}{unit}   LEVEL component  message`. The
//! timestamp comes from the installed engine's gateway; outside a run the
//! time column shows `------`. `println!` serializes concurrent writers at
//! the stdout boundary, which is the only locking this crate needs.

use crate::engine::Engine;
use kairos_gpi::TimeUnit;

/// Severity of a log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    /// Informational progress.
    Info,
    /// Suspicious but recoverable.
    Warn,
    /// An error the run continues past.
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// A named logging component.
#[derive(Clone, Copy, Debug)]
pub struct Logger {
    component: &'static str,
}

impl Logger {
    /// Creates a logger for a component name such as `"kairos.scheduler"`.
    pub const fn new(component: &'static str) -> Self {
        Self { component }
    }

    /// Logs at info level.
    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message.as_ref());
    }

    /// Logs at warn level.
    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warn, message.as_ref());
    }

    /// Logs at error level.
    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message.as_ref());
    }

    /// Logs a message at the given level.
    pub fn log(&self, level: LogLevel, message: &str) {
        println!(
            "{:>12}   {:<5} {:<24}   {}",
            timestamp(),
            level.as_str(),
            self.component,
            message
        );
    }
}

fn timestamp() -> String {
    match Engine::current() {
        Some(engine) => {
            let ticks = engine.sim_time();
            let unit = TimeUnit::from_exponent(engine.sim_precision())
                .map(|u| u.to_string())
                .unwrap_or_default();
            format!("{:>9.2}{}", ticks as f64, unit)
        }
        None => "------".to_string(),
    }
}
