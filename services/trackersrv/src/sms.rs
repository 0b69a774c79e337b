//! SMS PDU codec
//!
//! [`PduCodec`] owns the outbound reference counter and the reassembly state for
//! one modem.

pub mod gsm7;
pub mod pdu;
pub mod reassembly;

pub use pdu::{DeliveryReport, PartInfo, PduMessage, PduUnit, SmsEncoding, STATUS_DELIVERED};
pub use reassembly::{AssemblyLimits, Reassembler};

use crate::error::Result;

pub struct PduCodec {
    next_reference: u8,
    validity_secs: u32,
    reassembler: Reassembler,
}

impl PduCodec {
    pub fn new(validity_secs: u32, limits: AssemblyLimits) -> Self {
        Self {
            next_reference: 1,
            validity_secs,
            reassembler: Reassembler::new(limits),
        }
    }

    /// Encode `text` for `recipient` into as few units as the payload limits allow
    pub fn encode(
        &mut self,
        text: &str,
        recipient: &str,
        encoding: SmsEncoding,
    ) -> Result<Vec<PduUnit>> {
        let units = pdu::encode_submit(
            text,
            recipient,
            encoding,
            self.validity_secs,
            self.next_reference,
        )?;
        if units.len() > 1 {
            self.next_reference = self.next_reference.wrapping_add(1);
        }
        Ok(units)
    }

    pub fn decode(raw: &str) -> Result<PduMessage> {
        pdu::decode_message(raw)
    }

    pub fn decode_status_report(raw: &str) -> Result<DeliveryReport> {
        pdu::decode_status_report(raw)
    }

    /// `Some` once all parts sharing sender and reference are present
    pub fn reassemble(&mut self, message: PduMessage) -> Option<PduMessage> {
        self.reassembler.reassemble(message)
    }

    pub fn evict_expired(&mut self) -> Vec<PduMessage> {
        self.reassembler.evict_expired()
    }

    pub fn take_evicted(&mut self) -> Vec<PduMessage> {
        self.reassembler.take_evicted()
    }

    pub fn pending_assemblies(&self) -> usize {
        self.reassembler.pending()
    }
}

impl Default for PduCodec {
    fn default() -> Self {
        Self::new(300, AssemblyLimits::default())
    }
}
