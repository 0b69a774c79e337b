//! Service bootstrap
//!
//! Command line, logging and configuration validation. Shared pieces come
//! from `common`.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{LoggingConfig, TrackerConfig};
use crate::error::{Result, TrackerError};
use common::service_bootstrap::{LoggingOptions, ServiceInfo};

pub use common::bootstrap_args::ServiceArgs;

/// Listening port of the TCP device link
pub const DEFAULT_PORT: u16 = 5001;

/// Command-line arguments for trackersrv
#[derive(Parser, Clone, Debug)]
#[command(
    name = "trackersrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "GPS/GSM Tracker Fleet Service",
    long_about = None
)]
pub struct Args {
    /// Configuration file (YAML)
    #[arg(short = 'c', long)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides `logging.level`
    #[arg(short = 'l', long, env = "TRACKERSRV_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Bind address for the tracker TCP listener
    #[arg(short = 'b', long = "bind")]
    pub bind_address: Option<String>,

    /// Enable debug mode
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Disable colored output and the startup banner
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - load and validate the configuration, then exit
    #[arg(long)]
    pub validate: bool,
}

impl From<Args> for ServiceArgs {
    fn from(args: Args) -> Self {
        ServiceArgs {
            log_level: args.log_level,
            bind_address: args.bind_address,
            config: args.config,
            debug: args.debug,
            no_color: args.no_color,
            validate: args.validate,
        }
    }
}

/// Initialize logging; the config file level applies unless `-l` was given
pub fn initialize_logging(
    args: &ServiceArgs,
    service_info: &ServiceInfo,
    logging: &LoggingConfig,
) -> Result<()> {
    common::service_bootstrap::load_development_env();

    let options = LoggingOptions {
        dir: logging.dir.clone(),
        level: args.console_level(logging.level.as_deref()),
        json: logging.json,
        max_files: logging.max_files,
    };

    common::service_bootstrap::init_logging(service_info, &options)
        .map_err(|e| TrackerError::config(format!("Failed to init logging: {}", e)))
}

/// Validate `config` and return the resolved bind address
pub fn validate_configuration(args: &ServiceArgs, config: &TrackerConfig) -> Result<String> {
    let bind = config.resolve_bind(args.bind_address.clone());
    config.validate(&bind)?;
    debug!("Configuration valid, bind address {}", bind);
    Ok(bind)
}

/// Re-read `logging.level` from the config file on every SIGHUP
pub async fn reload_log_level_on_hangup(config_path: Option<String>, cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(sig) => sig,
            Err(e) => {
                warn!("Failed to install SIGHUP handler: {}", e);
                return;
            },
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    apply_configured_level(config_path.as_deref());
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = config_path;
        cancel.cancelled().await;
    }
}

fn apply_configured_level(config_path: Option<&str>) {
    let config = match TrackerConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            warn!("Log level reload skipped: {}", e);
            return;
        },
    };
    let Some(level) = config.logging.level else {
        info!(
            "No logging.level configured, keeping {}",
            common::logging::get_log_level()
        );
        return;
    };
    if let Err(e) = common::logging::set_log_level(&level) {
        warn!("Log level reload failed: {}", e);
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_args_conversion() {
        let args = Args::parse_from([
            "trackersrv",
            "--config",
            "custom.yaml",
            "-b",
            "127.0.0.1:6001",
            "--validate",
        ]);
        let service: ServiceArgs = args.into();
        assert_eq!(service.config.as_deref(), Some("custom.yaml"));
        assert_eq!(service.bind_address.as_deref(), Some("127.0.0.1:6001"));
        assert!(service.validate);
        assert!(service.log_level.is_none());
        assert!(service.show_banner());

        let args = Args::parse_from(["trackersrv", "-l", "warn", "--no-color"]);
        let service: ServiceArgs = args.into();
        assert_eq!(
            service.console_level(Some("debug")),
            Some(tracing::Level::WARN)
        );
        assert!(!service.show_banner());
    }

    #[test]
    fn test_cli_bind_is_validated() {
        let config = TrackerConfig::default();
        let args = ServiceArgs {
            bind_address: Some("127.0.0.1:6001".to_string()),
            ..Default::default()
        };
        assert_eq!(
            validate_configuration(&args, &config).unwrap(),
            "127.0.0.1:6001"
        );

        let args = ServiceArgs {
            bind_address: Some("not an address".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            validate_configuration(&args, &config),
            Err(TrackerError::Config(_))
        ));
    }

    #[test]
    #[traced_test]
    fn test_reload_with_missing_file_keeps_level() {
        apply_configured_level(Some("/nonexistent/trackersrv.yaml"));
        assert!(logs_contain("Log level reload skipped"));
    }
}
