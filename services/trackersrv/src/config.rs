//! trackersrv configuration
//!
//! Layered with figment: built-in defaults, then the YAML file, then
//! `TRACKERSRV_` environment variables (`__` separates nested keys, e.g.
//! `TRACKERSRV_MODEM__PORT=/dev/ttyUSB1`).

use crate::error::{Result, TrackerError};
use crate::sms::{AssemblyLimits, SmsEncoding};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/trackersrv.yaml";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:5001";
pub const BIND_ENV: &str = "TRACKERSRV_BIND";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub service: ServiceConfig,
    pub modem: ModemConfig,
    pub tcp: TcpConfig,
    pub reconcile: ReconcileConfig,
    pub assembly: AssemblyConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Server name recorded on stored SMS documents
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "trackersrv".to_string(),
        }
    }
}

/// Serial GSM modem
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    pub enabled: bool,
    pub port: String,
    pub baud_rate: u32,
    /// Stripped from phone numbers before identity matching
    pub country_code: String,
    pub command_timeout_secs: u64,
    /// Relative validity period of outbound SMS
    pub validity_secs: u32,
    pub encoding: SmsEncoding,
    pub reopen_delay_secs: u64,
    /// Error counter value above which the link is closed and reset
    pub error_threshold: u32,
    pub max_line_len: usize,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            country_code: "55".to_string(),
            command_timeout_secs: 50,
            validity_secs: 300,
            encoding: SmsEncoding::Ucs2,
            reopen_delay_secs: 30,
            error_threshold: 15,
            max_line_len: 4096,
        }
    }
}

impl ModemConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn reopen_delay(&self) -> Duration {
        Duration::from_secs(self.reopen_delay_secs)
    }
}

/// Socket listener for GPRS devices
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub enabled: bool,
    /// Empty means `TRACKERSRV_BIND` or the default
    pub bind_address: String,
    /// Unknown frames up to this length are heartbeat noise
    pub min_frame_len: usize,
    pub max_frame_len: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: String::new(),
            min_frame_len: 5,
            max_frame_len: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// A PENDING pass older than this is restarted
    pub stale_after_secs: u64,
    /// Fixes closer than this to the last coordinate count as stopped
    pub movement_threshold_m: f64,
    /// Mobile country code used for cell tower lookups
    pub mcc: u16,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 3600,
            movement_threshold_m: 50.0,
            mcc: 724,
        }
    }
}

impl ReconcileConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    pub max_age_secs: u64,
    pub max_pending: usize,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        let limits = AssemblyLimits::default();
        Self {
            max_age_secs: limits.max_age.as_secs(),
            max_pending: limits.max_pending,
        }
    }
}

impl AssemblyConfig {
    pub fn limits(&self) -> AssemblyLimits {
        AssemblyLimits {
            max_age: Duration::from_secs(self.max_age_secs),
            max_pending: self.max_pending,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON document tree loaded into the in-memory store at startup
    pub seed_file: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: Option<String>,
    pub level: Option<String>,
    pub json: bool,
    pub max_files: Option<usize>,
}

impl TrackerConfig {
    /// Load from `path` (or the default location) plus environment overrides
    pub fn load(path: Option<&str>) -> Result<Self> {
        let path = path.unwrap_or(DEFAULT_CONFIG_PATH);
        let mut figment = Figment::from(Serialized::defaults(TrackerConfig::default()));
        if Path::new(path).exists() {
            figment = figment.merge(Yaml::file(path));
        } else if path != DEFAULT_CONFIG_PATH {
            return Err(TrackerError::config(format!(
                "Configuration file not found: {}",
                path
            )));
        }
        let config: TrackerConfig = figment
            .merge(Env::prefixed("TRACKERSRV_").split("__"))
            .extract()?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config = Figment::from(Serialized::defaults(TrackerConfig::default()))
            .merge(Yaml::string(text))
            .extract()?;
        Ok(config)
    }

    /// Bind address: CLI > config file > `TRACKERSRV_BIND` > default
    pub fn resolve_bind(&self, cli: Option<String>) -> String {
        common::config_loader::get_string_config(
            cli,
            Some(self.tcp.bind_address.clone()),
            BIND_ENV,
            DEFAULT_BIND_ADDRESS,
        )
    }

    pub fn validate(&self, bind: &str) -> Result<()> {
        if self.modem.enabled {
            if self.modem.port.trim().is_empty() {
                return Err(TrackerError::config(
                    "modem.port cannot be empty when the modem is enabled",
                ));
            }
            if self.modem.baud_rate == 0 {
                return Err(TrackerError::config("modem.baud_rate must be greater than zero"));
            }
        }
        if self.tcp.enabled && bind.parse::<SocketAddr>().is_err() {
            return Err(TrackerError::config(format!("Invalid bind address: {}", bind)));
        }
        if self.assembly.max_pending == 0 {
            return Err(TrackerError::config(
                "assembly.max_pending must be greater than zero",
            ));
        }
        if self.tcp.max_frame_len <= self.tcp.min_frame_len {
            return Err(TrackerError::config(
                "tcp.max_frame_len must exceed tcp.min_frame_len",
            ));
        }
        Ok(())
    }
}
