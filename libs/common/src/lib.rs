//! Shared foundation for the tracker fleet services
//!
//! - logging setup and runtime level changes
//! - service bootstrap (banner, `.env`, logging options, startup options)
//! - configuration value resolution
//! - graceful shutdown

pub mod bootstrap_args;
pub mod config_loader;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

// Re-export common dependencies
pub use anyhow;
pub use tokio;
