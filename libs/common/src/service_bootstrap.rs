//! Service bootstrap utilities
//!
//! Startup banner, logging initialization and development environment setup.

use crate::logging::{self, LogConfig};
use std::path::PathBuf;
use tracing::{info, Level};

/// Service metadata for startup
pub struct ServiceInfo {
    /// Service name (e.g., "trackersrv")
    pub name: String,
    /// Service version from Cargo.toml
    pub version: String,
    pub description: String,
    /// Default listening port
    pub default_port: u16,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>, default_port: u16) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: description.into(),
            default_port,
        }
    }
}

/// Print startup banner for a service
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = match service.name.as_str() {
        "trackersrv" => {
            r#"
████████╗██████╗  █████╗  ██████╗██╗  ██╗███████╗██████╗
╚══██╔══╝██╔══██╗██╔══██╗██╔════╝██║ ██╔╝██╔════╝██╔══██╗
   ██║   ██████╔╝███████║██║     █████╔╝ █████╗  ██████╔╝
   ██║   ██╔══██╗██╔══██║██║     ██╔═██╗ ██╔══╝  ██╔══██╗
   ██║   ██║  ██║██║  ██║╚██████╗██║  ██╗███████╗██║  ██║
   ╚═╝   ╚═╝  ╚═╝╚═╝  ╚═╝ ╚═════╝╚═╝  ╚═╝╚══════╝╚═╝  ╚═╝
            "#
        },
        _ => {
            r#"
███████╗██╗     ███████╗███████╗████████╗
██╔════╝██║     ██╔════╝██╔════╝╚══██╔══╝
█████╗  ██║     █████╗  █████╗     ██║
██╔══╝  ██║     ██╔══╝  ██╔══╝     ██║
██║     ███████╗███████╗███████╗   ██║
╚═╝     ╚══════╝╚══════╝╚══════╝   ╚═╝
            "#
        },
    };

    info!("{}", banner);
    info!("");
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!(" Default Port: {}", service.default_port);
    info!("");
}

/// Logging options coming from the service configuration file
#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Log root directory
    pub dir: Option<String>,
    /// Console level; `RUST_LOG` still takes precedence
    pub level: Option<Level>,
    pub json: bool,
    pub max_files: Option<usize>,
}

/// Initialize logging for a service
///
/// Log root directory priority:
/// 1. `TRACKERSRV_LOG_DIR` environment variable
/// 2. `options.dir`
/// 3. `"logs"`
pub fn init_logging(service: &ServiceInfo, options: &LoggingOptions) -> anyhow::Result<()> {
    logging::init_log_root(options.dir.as_deref());

    let console_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<Level>().ok())
        .or(options.level)
        .unwrap_or(Level::INFO);

    let log_config = LogConfig {
        service_name: service.name.clone(),
        log_dir: service_log_dir(service),
        console_level,
        file_level: Level::DEBUG,
        enable_json: options.json,
        max_log_files: options.max_files.unwrap_or(30),
    };

    logging::init_with_config(log_config).map_err(|e| anyhow::anyhow!("{}", e))?;

    Ok(())
}

/// `{log_root}/{service}`
pub fn service_log_dir(service: &ServiceInfo) -> PathBuf {
    logging::get_log_root().join(&service.name)
}

/// Load `.env` variables in debug builds; no-op in release builds
pub fn load_development_env() {
    #[cfg(debug_assertions)]
    {
        if let Ok(content) = std::fs::read_to_string(".env") {
            for (key, value) in parse_env_lines(&content) {
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
    }
}

/// Parse `KEY=VALUE` lines, skipping comments and blanks
fn parse_env_lines(content: &str) -> Vec<(&str, &str)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_service_info_creation() {
        let service = ServiceInfo::new("trackersrv", "Tracker fleet service", 5001);
        assert_eq!(service.name, "trackersrv");
        assert_eq!(service.description, "Tracker fleet service");
        assert_eq!(service.default_port, 5001);
        assert!(!service.version.is_empty());
    }

    #[test]
    fn test_parse_env_lines() {
        let parsed = parse_env_lines("# comment\n\nA=1\n B = two \nbroken\n");
        assert_eq!(parsed, vec![("A", "1"), ("B", "two")]);
    }

    #[test]
    fn test_service_log_dir_uses_service_name() {
        let service = ServiceInfo::new("trackersrv", "x", 5001);
        assert!(service_log_dir(&service).ends_with("trackersrv"));
    }
}
