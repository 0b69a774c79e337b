//! Startup options resolved from a service command line
//!
//! Each service parses its own clap `Args` and converts into [`ServiceArgs`];
//! everything after parsing only sees this type.

use tracing::Level;

#[derive(Debug, Clone, Default)]
pub struct ServiceArgs {
    /// `--log-level` when given
    pub log_level: Option<String>,
    /// `--bind` override, e.g. `0.0.0.0:5001`
    pub bind_address: Option<String>,
    pub config: Option<String>,
    pub debug: bool,
    pub no_color: bool,
    /// Load and validate the configuration, then exit
    pub validate: bool,
}

impl ServiceArgs {
    /// Console level: `--debug`, then `--log-level`, then the configured level
    ///
    /// `None` leaves the logging defaults in place.
    pub fn console_level(&self, configured: Option<&str>) -> Option<Level> {
        if self.debug {
            return Some(Level::DEBUG);
        }
        self.log_level
            .as_deref()
            .or(configured)
            .filter(|name| !name.trim().is_empty())
            .map(parse_level)
    }

    pub fn show_banner(&self) -> bool {
        !self.no_color
    }
}

/// Level by name; unknown names fall back to INFO
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level(" WARN "), Level::WARN);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }

    #[test]
    fn test_console_level_precedence() {
        let args = ServiceArgs::default();
        assert_eq!(args.console_level(None), None);
        assert_eq!(args.console_level(Some("")), None);
        assert_eq!(args.console_level(Some("error")), Some(Level::ERROR));

        let args = ServiceArgs {
            log_level: Some("trace".to_string()),
            ..Default::default()
        };
        assert_eq!(args.console_level(Some("error")), Some(Level::TRACE));

        let args = ServiceArgs {
            log_level: Some("trace".to_string()),
            debug: true,
            ..Default::default()
        };
        assert_eq!(args.console_level(Some("error")), Some(Level::DEBUG));
        assert!(args.show_banner());
    }
}
