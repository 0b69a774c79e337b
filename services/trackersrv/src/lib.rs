//! Tracker fleet service
//!
//! Links a fleet of GPS/GSM trackers to a document store: SMS through a serial
//! GSM modem, GPRS frames through a TCP listener, and configuration intent
//! reconciled against what each device confirms.

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod geo;
pub mod models;
pub mod modem;
pub mod notify;
pub mod router;
pub mod sms;
pub mod store;
pub mod tcp;

pub use context::EngineContext;
pub use error::{Result, TrackerError};
pub use router::MessageRouter;
