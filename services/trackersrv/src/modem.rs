//! GSM modem over a serial port
//!
//! - `queue`: one-in-flight AT command arbiter
//! - `link`: bootstrap, notifications and SMS transfer over one byte stream
//! - `supervisor`: link ownership, error threshold and fixed-delay reopen

pub mod codec;
pub mod link;
pub mod queue;
pub mod reopen;
pub mod response;
pub mod supervisor;

pub use link::{ModemEvent, ModemLink, SentMessage};
pub use queue::{CommandQueue, CommandResponse, CommandTimeout, Terminator};
pub use supervisor::{ModemSlot, ModemSupervisor};

use crate::error::Result;
use async_trait::async_trait;

/// SMS capability handed to modem-configured devices
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send_sms(&self, recipient: &str, text: &str) -> Result<SentMessage>;

    /// Free modem store slots
    fn delete_indexes(&self, indexes: &[u32]);

    /// Number of the SIM in the modem, once known
    fn phone_number(&self) -> Option<String>;
}
