//! Unified error handling for tracker fleet services
//!
//! Service crates keep their own domain error enums and convert into
//! [`FleetError`] at the process boundary. [`FleetErrorTrait`] gives every
//! error a stable code and a category for logging and retry decisions.

use thiserror::Error;

// ============================================================================
// FleetError - Main error type
// ============================================================================

/// Main error type returned by service binaries
#[derive(Debug, Error)]
pub enum FleetError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ======================================
    // Storage Errors
    // ======================================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    // ======================================
    // Transport & Protocol Errors
    // ======================================
    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Link closed: {0}")]
    LinkClosed(String),

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    // ======================================
    // External Service Errors
    // ======================================
    #[error("External service error: {service}: {message}")]
    ExternalService { service: String, message: String },

    // ======================================
    // Validation Errors
    // ======================================
    #[error("Validation failed: {0}")]
    Validation(String),

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ======================================
    // Service & Runtime Errors
    // ======================================
    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using FleetError
pub type FleetResult<T> = Result<T, FleetError>;

impl FleetError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::Communication(_)
                | Self::LinkClosed(_)
                | Self::ExternalService { .. }
        )
    }
}

// Conversion traits for common error types
impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for FleetError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::FleetError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::FleetError::Configuration(format!($fmt, $($arg)*))
    };
}

// ============================================================================
// FleetError implements FleetErrorTrait
// ============================================================================

impl FleetErrorTrait for FleetError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::Communication(_) => "COMMUNICATION_ERROR",
            Self::LinkClosed(_) => "LINK_CLOSED",
            Self::Timeout(_) => "TIMEOUT",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::StartupFailed(_) => "STARTUP_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Other(_) => "OTHER_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::InvalidConfig { .. } => ErrorCategory::Configuration,
            Self::Storage(_) => ErrorCategory::Storage,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::Communication(_) | Self::ExternalService { .. } => ErrorCategory::Network,
            Self::LinkClosed(_) => ErrorCategory::Connection,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Io(_)
            | Self::Serialization(_)
            | Self::StartupFailed(_)
            | Self::Internal(_) => ErrorCategory::Internal,
            Self::Other(_) => ErrorCategory::Unknown,
        }
    }
}

// ============================================================================
// Fleet Error Trait - Architectural layer
// ============================================================================

/// Error category enum - used for classification and log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    // Infrastructure layer
    Configuration,
    Storage,
    Network,
    Timeout,

    // Business logic layer
    Validation,
    NotFound,

    // Transport layer (modem, TCP devices)
    Protocol,
    Connection,

    // System level
    Internal,
    Unknown,
}

/// Error capability trait shared by all service error types
///
/// Each service keeps its own domain error (e.g. `TrackerError`) and gains a
/// common interface by implementing this trait.
pub trait FleetErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Get error code (for logs and monitoring)
    fn error_code(&self) -> &'static str;

    /// Get error category
    fn category(&self) -> ErrorCategory;

    /// Whether the error is retryable (default implementation is category-based)
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Connection
        )
    }

    /// Recommended retry delay in milliseconds
    fn retry_delay_ms(&self) -> u64 {
        match self.category() {
            ErrorCategory::Network => 1000,
            ErrorCategory::Timeout => 500,
            ErrorCategory::Connection => 1500,
            _ => 0,
        }
    }

    /// Get log level
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::Storage => Level::ERROR,
            ErrorCategory::Network
            | ErrorCategory::Timeout
            | ErrorCategory::Connection
            | ErrorCategory::Protocol => Level::WARN,
            ErrorCategory::Validation | ErrorCategory::NotFound => Level::INFO,
            _ => Level::WARN,
        }
    }
}

// Tests
#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(FleetError::Timeout("modem".into()).is_retryable());
        assert!(FleetError::LinkClosed("serial".into()).is_retryable());
        assert!(!FleetError::Validation("bad".into()).is_retryable());
        assert!(!FleetError::NotFound {
            resource: "Trackers/1".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_error_codes_and_categories() {
        let err = FleetError::InvalidConfig {
            field: "modem.port".into(),
            reason: "empty".into(),
        };
        assert_eq!(err.error_code(), "INVALID_CONFIG");
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(
            FleetError::Storage("down".into()).log_level(),
            tracing::Level::ERROR
        );
    }

    #[test]
    fn test_config_error_macro() {
        let err = config_error!("missing {}", "tcp.bind_address");
        assert_eq!(
            err.to_string(),
            "Configuration error: missing tcp.bind_address"
        );
    }
}
