//! Tracker service errors

use errors::{ErrorCategory, FleetError, FleetErrorTrait};
use thiserror::Error;

/// Tracker service error type
#[derive(Error, Debug, Clone)]
pub enum TrackerError {
    /// A command got no response within its budget
    #[error("Transport timeout: {0}")]
    TransportTimeout(String),

    /// The device or modem answered with an error token
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Undecodable protocol data unit
    #[error("Malformed unit: {0}")]
    MalformedUnit(String),

    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("Link closed: {0}")]
    LinkClosed(String),

    /// At least one unit of an outbound message failed
    #[error("Send error: {0}")]
    SendError(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Geolocation error: {0}")]
    Geolocation(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

impl TrackerError {
    pub fn transport_timeout(msg: impl Into<String>) -> Self {
        Self::TransportTimeout(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportError(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedUnit(msg.into())
    }

    pub fn unknown_identity(msg: impl Into<String>) -> Self {
        Self::UnknownIdentity(msg.into())
    }

    pub fn link_closed(msg: impl Into<String>) -> Self {
        Self::LinkClosed(msg.into())
    }

    pub fn send(msg: impl Into<String>) -> Self {
        Self::SendError(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn geolocation(msg: impl Into<String>) -> Self {
        Self::Geolocation(msg.into())
    }

    pub fn notification(msg: impl Into<String>) -> Self {
        Self::Notification(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the link this error came from must be considered dead
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Self::LinkClosed(_) | Self::Io(_))
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for TrackerError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<figment::Error> for TrackerError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<tokio_serial::Error> for TrackerError {
    fn from(err: tokio_serial::Error) -> Self {
        Self::Io(format!("serial: {}", err))
    }
}

// ============================================================================
// FleetError conversion
// ============================================================================

impl From<TrackerError> for FleetError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::Config(msg) => FleetError::Configuration(msg),
            TrackerError::TransportTimeout(msg) => FleetError::Timeout(msg),
            TrackerError::TransportError(msg) | TrackerError::SendError(msg) => {
                FleetError::Communication(msg)
            },
            TrackerError::MalformedUnit(msg) => FleetError::Protocol {
                protocol: "sms-pdu".to_string(),
                message: msg,
            },
            TrackerError::UnknownIdentity(msg) => FleetError::NotFound { resource: msg },
            TrackerError::LinkClosed(msg) => FleetError::LinkClosed(msg),
            TrackerError::Store(msg) => FleetError::Storage(msg),
            TrackerError::Geolocation(msg) => FleetError::ExternalService {
                service: "geolocation".to_string(),
                message: msg,
            },
            TrackerError::Notification(msg) => FleetError::ExternalService {
                service: "notification".to_string(),
                message: msg,
            },
            TrackerError::Io(msg) => FleetError::Internal(format!("IO: {}", msg)),
            TrackerError::Serialization(msg) => FleetError::Serialization(msg),
            TrackerError::Internal(msg) => FleetError::Internal(msg),
        }
    }
}

impl FleetErrorTrait for TrackerError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::TransportTimeout(_) => "TRACKERSRV_TRANSPORT_TIMEOUT",
            Self::TransportError(_) => "TRACKERSRV_TRANSPORT_ERROR",
            Self::MalformedUnit(_) => "TRACKERSRV_MALFORMED_UNIT",
            Self::UnknownIdentity(_) => "TRACKERSRV_UNKNOWN_IDENTITY",
            Self::LinkClosed(_) => "TRACKERSRV_LINK_CLOSED",
            Self::SendError(_) => "TRACKERSRV_SEND_ERROR",
            Self::Store(_) => "TRACKERSRV_STORE_ERROR",
            Self::Geolocation(_) => "TRACKERSRV_GEOLOCATION_ERROR",
            Self::Notification(_) => "TRACKERSRV_NOTIFICATION_ERROR",
            Self::Config(_) => "TRACKERSRV_CONFIG_ERROR",
            Self::Io(_) => "TRACKERSRV_IO_ERROR",
            Self::Serialization(_) => "TRACKERSRV_SERIALIZATION_ERROR",
            Self::Internal(_) => "TRACKERSRV_INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::TransportTimeout(_) => ErrorCategory::Timeout,
            Self::TransportError(_) | Self::SendError(_) | Self::MalformedUnit(_) => {
                ErrorCategory::Protocol
            },
            Self::UnknownIdentity(_) => ErrorCategory::NotFound,
            Self::LinkClosed(_) => ErrorCategory::Connection,
            Self::Store(_) => ErrorCategory::Storage,
            Self::Geolocation(_) | Self::Notification(_) => ErrorCategory::Network,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Validation,
            Self::Io(_) | Self::Internal(_) => ErrorCategory::Internal,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_link_failure_classification() {
        assert!(TrackerError::link_closed("serial").is_link_failure());
        assert!(TrackerError::from(std::io::Error::other("broken pipe")).is_link_failure());
        assert!(!TrackerError::transport("ERROR").is_link_failure());
        assert!(!TrackerError::transport_timeout("AT+CMGS").is_link_failure());
    }

    #[test]
    fn test_fleet_error_conversion() {
        let fleet: FleetError = TrackerError::config("empty port").into();
        assert!(matches!(fleet, FleetError::Configuration(ref m) if m == "empty port"));

        let fleet: FleetError = TrackerError::transport_timeout("ATZ").into();
        assert!(fleet.is_retryable());
    }

    #[test]
    fn test_error_codes() {
        let err = TrackerError::malformed("short");
        assert_eq!(err.error_code(), "TRACKERSRV_MALFORMED_UNIT");
        assert_eq!(err.category(), ErrorCategory::Protocol);
        assert_eq!(err.to_string(), "Malformed unit: short");
    }
}
