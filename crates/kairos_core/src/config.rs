//! Environment-driven configuration.
//!
//! The runner lives inside the simulator process, so there is no command
//! line to parse; everything configurable comes from the environment, read
//! once at start-of-sim.

use std::env;
use std::path::PathBuf;

/// Settings read from the environment at start-of-sim.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    /// `TOPLEVEL`: overrides the simulator-provided design root name.
    pub toplevel: Option<String>,
    /// `KAIROS_RESULTS_FILE`: path for a JSON copy of the test results.
    pub results_file: Option<PathBuf>,
    /// `KAIROS_DEBUG`: extra engine and bridge logging when nonempty.
    pub debug: bool,
}

impl EnvConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self {
            toplevel: nonempty(env::var("TOPLEVEL").ok()),
            results_file: nonempty(env::var("KAIROS_RESULTS_FILE").ok()).map(PathBuf::from),
            debug: nonempty(env::var("KAIROS_DEBUG").ok()).is_some(),
        }
    }
}

fn nonempty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_empty() {
        let config = EnvConfig::default();
        assert!(config.toplevel.is_none());
        assert!(config.results_file.is_none());
        assert!(!config.debug);
    }

    #[test]
    fn empty_strings_are_ignored() {
        assert_eq!(nonempty(Some(String::new())), None);
        assert_eq!(nonempty(Some("top".into())), Some("top".into()));
        assert_eq!(nonempty(None), None);
    }
}
