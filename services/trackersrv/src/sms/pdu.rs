//! GSM 03.40 transfer units
//!
//! Encodes SMS-SUBMIT units and decodes SMS-DELIVER, SMS-SUBMIT and
//! SMS-STATUS-REPORT units. Every unit handled here starts with an SMSC
//! address block, as modems in PDU mode (`AT+CMGF=0`) read and write them.

use super::gsm7::{self, Septet};
use crate::error::{Result, TrackerError};
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

pub const GSM7_SINGLE_LIMIT: usize = 160;
pub const GSM7_PART_LIMIT: usize = 153;
pub const UCS2_SINGLE_LIMIT: usize = 70;
pub const UCS2_PART_LIMIT: usize = 67;
const MAX_PARTS: usize = 255;

/// Status octet of a successful delivery
pub const STATUS_DELIVERED: u8 = 0x00;

// TP-MTI
const MTI_DELIVER: u8 = 0x00;
const MTI_SUBMIT: u8 = 0x01;
const MTI_STATUS_REPORT: u8 = 0x02;

// SMS-SUBMIT first octet bits
const VPF_RELATIVE: u8 = 0x10;
const SRR: u8 = 0x20;
const UDHI: u8 = 0x40;

// Concatenation information elements
const IEI_CONCAT_8BIT: u8 = 0x00;
const IEI_CONCAT_16BIT: u8 = 0x08;

/// Alphabet used for outbound text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmsEncoding {
    /// GSM 7-bit when the text allows it, UCS2 otherwise
    #[default]
    Auto,
    Gsm7,
    Ucs2,
}

impl SmsEncoding {
    fn resolve(self, text: &str) -> Self {
        match self {
            SmsEncoding::Auto if gsm7::is_gsm7(text) => SmsEncoding::Gsm7,
            SmsEncoding::Auto => SmsEncoding::Ucs2,
            other => other,
        }
    }
}

/// Concatenation header values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartInfo {
    pub reference: u16,
    /// 1-based
    pub index: u8,
    pub count: u8,
}

/// One encoded outbound unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduUnit {
    /// Hex PDU including the SMSC block
    pub hex: String,
    /// Octet count announced with `AT+CMGS` (SMSC block excluded)
    pub tpdu_len: usize,
    pub part: Option<PartInfo>,
    pub validity_secs: u32,
}

/// One inbound unit, or a reassembled message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PduMessage {
    pub sender: String,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub text: String,
    pub reference: Option<u16>,
    pub part_index: Option<u8>,
    pub part_count: Option<u8>,
    /// Modem store slots holding this message
    pub raw_indexes: Vec<u32>,
}

impl PduMessage {
    pub fn is_multipart(&self) -> bool {
        self.part_count.is_some_and(|count| count > 1)
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.raw_indexes.push(index);
        self
    }
}

/// Decoded SMS-STATUS-REPORT
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// Message reference of the outbound unit
    pub reference: u8,
    pub status: u8,
    /// Recipient address of the outbound unit
    pub sender: String,
    pub submitted_at: Option<DateTime<FixedOffset>>,
    pub discharged_at: Option<DateTime<FixedOffset>>,
    pub raw_indexes: Vec<u32>,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        self.status == STATUS_DELIVERED
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.raw_indexes.push(index);
        self
    }
}

// ============================================================================
// Encoding
// ============================================================================

enum Chunk {
    Gsm7(Vec<Septet>),
    Ucs2(Vec<u16>),
}

/// Split `text` into SMS-SUBMIT units
///
/// `reference` is only written when more than one unit is needed.
pub fn encode_submit(
    text: &str,
    recipient: &str,
    encoding: SmsEncoding,
    validity_secs: u32,
    reference: u8,
) -> Result<Vec<PduUnit>> {
    let address = encode_address(recipient)?;
    let (dcs, chunks) = match encoding.resolve(text) {
        SmsEncoding::Ucs2 => (0x08, split_ucs2(text)),
        _ => {
            let chars = gsm7::char_septets(text).map_err(|c| {
                TrackerError::send(format!("character {:?} is not in the GSM 7-bit alphabet", c))
            })?;
            (0x00, split_gsm7(chars))
        },
    };

    if chunks.len() > MAX_PARTS {
        return Err(TrackerError::send(format!(
            "message needs {} units, limit is {}",
            chunks.len(),
            MAX_PARTS
        )));
    }

    let count = chunks.len();
    let validity = encode_validity(validity_secs);
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let part = (count > 1).then(|| PartInfo {
                reference: u16::from(reference),
                index: (i + 1) as u8,
                count: count as u8,
            });
            Ok(build_submit(&address, dcs, validity, validity_secs, part, chunk))
        })
        .collect()
}

fn split_gsm7(chars: Vec<Septet>) -> Vec<Chunk> {
    let total: usize = chars.iter().map(|s| s.width()).sum();
    if total <= GSM7_SINGLE_LIMIT {
        return vec![Chunk::Gsm7(chars)];
    }

    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut used = 0;
    for septet in chars {
        if used + septet.width() > GSM7_PART_LIMIT {
            chunks.push(Chunk::Gsm7(std::mem::take(&mut current)));
            used = 0;
        }
        used += septet.width();
        current.push(septet);
    }
    if !current.is_empty() {
        chunks.push(Chunk::Gsm7(current));
    }
    chunks
}

fn split_ucs2(text: &str) -> Vec<Chunk> {
    if text.encode_utf16().count() <= UCS2_SINGLE_LIMIT {
        return vec![Chunk::Ucs2(text.encode_utf16().collect())];
    }

    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut buf = [0u16; 2];
    for c in text.chars() {
        let units = c.encode_utf16(&mut buf);
        if current.len() + units.len() > UCS2_PART_LIMIT {
            chunks.push(Chunk::Ucs2(std::mem::take(&mut current)));
        }
        current.extend_from_slice(units);
    }
    if !current.is_empty() {
        chunks.push(Chunk::Ucs2(current));
    }
    chunks
}

fn build_submit(
    address: &[u8],
    dcs: u8,
    validity: u8,
    validity_secs: u32,
    part: Option<PartInfo>,
    chunk: Chunk,
) -> PduUnit {
    let mut tpdu = Vec::with_capacity(160);
    let first = MTI_SUBMIT | VPF_RELATIVE | SRR | if part.is_some() { UDHI } else { 0 };
    tpdu.push(first);
    tpdu.push(0x00); // TP-MR, assigned by the modem
    tpdu.extend_from_slice(address);
    tpdu.push(0x00); // TP-PID
    tpdu.push(dcs);
    tpdu.push(validity);

    let udh = part.map(|p| [0x05, IEI_CONCAT_8BIT, 0x03, p.reference as u8, p.count, p.index]);
    match chunk {
        Chunk::Gsm7(chars) => {
            let septets = gsm7::flatten(&chars);
            match udh {
                Some(header) => {
                    // 6 header octets + 1 fill bit = 7 septets
                    tpdu.push((7 + septets.len()) as u8);
                    tpdu.extend_from_slice(&header);
                    tpdu.extend(gsm7::pack_septets(&septets, 1));
                },
                None => {
                    tpdu.push(septets.len() as u8);
                    tpdu.extend(gsm7::pack_septets(&septets, 0));
                },
            }
        },
        Chunk::Ucs2(units) => {
            let header_len = udh.map_or(0, |h| h.len());
            tpdu.push((header_len + units.len() * 2) as u8);
            if let Some(header) = udh {
                tpdu.extend_from_slice(&header);
            }
            for unit in units {
                tpdu.extend_from_slice(&unit.to_be_bytes());
            }
        },
    }

    PduUnit {
        hex: format!("00{}", to_hex(&tpdu)),
        tpdu_len: tpdu.len(),
        part,
        validity_secs,
    }
}

/// Destination address block: digit count, type of address, swapped semi-octets
fn encode_address(number: &str) -> Result<Vec<u8>> {
    let trimmed = number.trim();
    let international = trimmed.starts_with('+');
    let digits: Vec<u8> = trimmed
        .bytes()
        .filter(u8::is_ascii_digit)
        .map(|b| b - b'0')
        .collect();
    if digits.is_empty() {
        return Err(TrackerError::send(format!(
            "recipient {:?} has no digits",
            number
        )));
    }

    let mut out = Vec::with_capacity(2 + digits.len().div_ceil(2));
    out.push(digits.len() as u8);
    out.push(if international { 0x91 } else { 0x81 });
    for pair in digits.chunks(2) {
        let lo = pair[0];
        let hi = pair.get(1).copied().unwrap_or(0x0F);
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

/// Relative validity period octet (TP-VP)
pub fn encode_validity(secs: u32) -> u8 {
    let minutes = secs.div_ceil(60);
    if minutes <= 720 {
        minutes.div_ceil(5).saturating_sub(1) as u8
    } else if minutes <= 1440 {
        (143 + (minutes - 720).div_ceil(30)) as u8
    } else {
        let days = minutes.div_ceil(1440);
        if days <= 30 {
            (166 + days) as u8
        } else {
            (192 + days.div_ceil(7)).min(255) as u8
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        let value = *self
            .data
            .get(self.pos)
            .ok_or_else(|| TrackerError::malformed(format!("unit ends before {}", what)))?;
        self.pos += 1;
        Ok(value)
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let slice = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or_else(|| TrackerError::malformed(format!("unit ends inside {}", what)))?;
        self.pos += len;
        Ok(slice)
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    fn skip_smsc(&mut self) -> Result<()> {
        let len = self.u8("SMSC length")? as usize;
        self.take(len, "SMSC address")?;
        Ok(())
    }

    fn address(&mut self, what: &str) -> Result<String> {
        let len = self.u8(what)? as usize;
        let toa = self.u8(what)?;
        let data = self.take(len.div_ceil(2), what)?;
        decode_address(len, toa, data)
    }

    fn timestamp(&mut self, what: &str) -> Result<DateTime<FixedOffset>> {
        decode_timestamp(self.take(7, what)?)
    }
}

fn decode_address(len: usize, toa: u8, data: &[u8]) -> Result<String> {
    match (toa >> 4) & 0x07 {
        // Alphanumeric, packed 7-bit; `len` counts semi-octets
        0x05 => {
            let septets = gsm7::unpack_septets(data, len * 4 / 7, 0)
                .ok_or_else(|| TrackerError::malformed("short alphanumeric address"))?;
            Ok(gsm7::septets_to_string(&septets))
        },
        ton => {
            let mut out = String::with_capacity(len + 1);
            if ton == 0x01 {
                out.push('+');
            }
            for byte in data {
                for nibble in [byte & 0x0F, byte >> 4] {
                    if nibble == 0x0F {
                        continue;
                    }
                    out.push(match nibble {
                        0..=9 => char::from(b'0' + nibble),
                        0x0A => '*',
                        0x0B => '#',
                        _ => char::from(b'a' + nibble - 0x0C),
                    });
                }
            }
            let digits = out.len() - usize::from(ton == 0x01);
            if digits < len {
                return Err(TrackerError::malformed("address shorter than announced"));
            }
            Ok(out)
        },
    }
}

fn decode_timestamp(raw: &[u8]) -> Result<DateTime<FixedOffset>> {
    let semi = |b: u8| u32::from(b & 0x0F) * 10 + u32::from(b >> 4);
    let tz = raw[6];
    let quarters = i32::from(tz & 0x07) * 10 + i32::from(tz >> 4);
    let sign = if tz & 0x08 != 0 { -1 } else { 1 };

    let offset = FixedOffset::east_opt(sign * quarters * 15 * 60)
        .ok_or_else(|| TrackerError::malformed("timezone out of range"))?;
    let naive = NaiveDate::from_ymd_opt(2000 + semi(raw[0]) as i32, semi(raw[1]), semi(raw[2]))
        .and_then(|date| date.and_hms_opt(semi(raw[3]), semi(raw[4]), semi(raw[5])))
        .ok_or_else(|| TrackerError::malformed("invalid timestamp"))?;
    offset
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| TrackerError::malformed("ambiguous timestamp"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alphabet {
    Gsm7,
    Eight,
    Ucs2,
}

fn alphabet(dcs: u8) -> Alphabet {
    match dcs & 0xF0 {
        0x00..=0x30 => match (dcs >> 2) & 0x03 {
            0x01 => Alphabet::Eight,
            0x02 => Alphabet::Ucs2,
            _ => Alphabet::Gsm7,
        },
        0xE0 => Alphabet::Ucs2,
        0xF0 if dcs & 0x04 != 0 => Alphabet::Eight,
        _ => Alphabet::Gsm7,
    }
}

/// First recognized concatenation element; other elements are ignored
fn parse_udh(header: &[u8]) -> Option<PartInfo> {
    let mut i = 0;
    while i + 1 < header.len() {
        let iei = header[i];
        let len = header[i + 1] as usize;
        let data = header.get(i + 2..i + 2 + len)?;
        let part = match (iei, len) {
            (IEI_CONCAT_8BIT, 3) => Some(PartInfo {
                reference: u16::from(data[0]),
                count: data[1],
                index: data[2],
            }),
            (IEI_CONCAT_16BIT, 4) => Some(PartInfo {
                reference: u16::from_be_bytes([data[0], data[1]]),
                count: data[2],
                index: data[3],
            }),
            _ => None,
        };
        if let Some(p) = part.filter(|p| p.count > 0 && p.index > 0 && p.index <= p.count) {
            return Some(p);
        }
        i += 2 + len;
    }
    None
}

fn decode_user_data(
    with_header: bool,
    dcs: u8,
    udl: usize,
    ud: &[u8],
) -> Result<(String, Option<PartInfo>)> {
    let (part, header_octets) = if with_header {
        let udhl = *ud
            .first()
            .ok_or_else(|| TrackerError::malformed("missing user data header"))?
            as usize;
        let header = ud
            .get(1..1 + udhl)
            .ok_or_else(|| TrackerError::malformed("user data header overruns unit"))?;
        (parse_udh(header), udhl + 1)
    } else {
        (None, 0)
    };

    let text = match alphabet(dcs) {
        Alphabet::Gsm7 => {
            let header_septets = (header_octets * 8).div_ceil(7);
            let fill = header_septets * 7 - header_octets * 8;
            let count = udl.saturating_sub(header_septets);
            let septets = gsm7::unpack_septets(&ud[header_octets..], count, fill)
                .ok_or_else(|| TrackerError::malformed("user data shorter than announced"))?;
            gsm7::septets_to_string(&septets)
        },
        Alphabet::Ucs2 => {
            let body = ud
                .get(header_octets..udl)
                .ok_or_else(|| TrackerError::malformed("user data shorter than announced"))?;
            let units: Vec<u16> = body
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        },
        Alphabet::Eight => {
            let body = ud
                .get(header_octets..udl)
                .ok_or_else(|| TrackerError::malformed("user data shorter than announced"))?;
            String::from_utf8_lossy(body).into_owned()
        },
    };
    Ok((text, part))
}

/// Decode an SMS-DELIVER (or SMS-SUBMIT) unit
pub fn decode_message(raw: &str) -> Result<PduMessage> {
    let bytes = from_hex(raw)?;
    let mut reader = Reader::new(&bytes);
    reader.skip_smsc()?;

    let first = reader.u8("first octet")?;
    let (sender, timestamp, dcs) = match first & 0x03 {
        MTI_DELIVER => {
            let sender = reader.address("originator address")?;
            reader.u8("protocol identifier")?;
            let dcs = reader.u8("data coding scheme")?;
            let timestamp = reader.timestamp("service centre timestamp")?;
            (sender, Some(timestamp), dcs)
        },
        MTI_SUBMIT => {
            reader.u8("message reference")?;
            let recipient = reader.address("destination address")?;
            reader.u8("protocol identifier")?;
            let dcs = reader.u8("data coding scheme")?;
            match (first >> 3) & 0x03 {
                0x00 => {},
                0x02 => {
                    reader.u8("validity period")?;
                },
                _ => {
                    reader.take(7, "validity period")?;
                },
            }
            (recipient, None, dcs)
        },
        other => {
            return Err(TrackerError::malformed(format!(
                "unexpected message type indicator {}",
                other
            )))
        },
    };

    let udl = reader.u8("user data length")? as usize;
    let (text, part) = decode_user_data(first & UDHI != 0, dcs, udl, reader.rest())?;

    Ok(PduMessage {
        sender,
        timestamp,
        text,
        reference: part.map(|p| p.reference),
        part_index: part.map(|p| p.index),
        part_count: part.map(|p| p.count),
        raw_indexes: Vec::new(),
    })
}

/// Decode an SMS-STATUS-REPORT unit
pub fn decode_status_report(raw: &str) -> Result<DeliveryReport> {
    let bytes = from_hex(raw)?;
    let mut reader = Reader::new(&bytes);
    reader.skip_smsc()?;

    let first = reader.u8("first octet")?;
    if first & 0x03 != MTI_STATUS_REPORT {
        return Err(TrackerError::malformed(format!(
            "not a status report (first octet {:02X})",
            first
        )));
    }
    let reference = reader.u8("message reference")?;
    let sender = reader.address("recipient address")?;
    let submitted_at = reader.timestamp("service centre timestamp")?;
    let discharged_at = reader.timestamp("discharge time")?;
    let status = reader.u8("status")?;

    Ok(DeliveryReport {
        reference,
        status,
        sender,
        submitted_at: Some(submitted_at),
        discharged_at: Some(discharged_at),
        raw_indexes: Vec::new(),
    })
}

// ============================================================================
// Hex helpers
// ============================================================================

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

pub fn from_hex(raw: &str) -> Result<Vec<u8>> {
    let raw = raw.trim();
    if raw.is_empty() || raw.len() % 2 != 0 {
        return Err(TrackerError::malformed(format!(
            "hex length {} is not a positive even number",
            raw.len()
        )));
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| {
            raw.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| TrackerError::malformed(format!("invalid hex at offset {}", i)))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    const DELIVER_HELLO: &str =
        "07917283010010F5040BC87238880900F10000620141214365800AE8329BFD4697D9EC37";

    #[test]
    fn test_decode_deliver() {
        let msg = decode_message(DELIVER_HELLO).unwrap();
        assert_eq!(msg.sender, "27838890001");
        assert_eq!(msg.text, "hellohello");
        assert!(!msg.is_multipart());

        let ts = msg.timestamp.unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2026, 10, 14));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (12, 34, 56));
        assert_eq!(ts.offset().local_minus_utc(), 2 * 3600);
    }

    #[test]
    fn test_negative_timezone() {
        let ts = decode_timestamp(&[0x62, 0x01, 0x41, 0x21, 0x43, 0x65, 0x29]).unwrap();
        assert_eq!(ts.offset().local_minus_utc(), -3 * 3600);
    }

    #[test]
    fn test_alphanumeric_address() {
        let sender = decode_address(10, 0xD0, &[0x43, 0x76, 0x58, 0xFE, 0x06]).unwrap();
        assert_eq!(sender, "Claro");
    }

    #[test]
    fn test_encode_single_gsm7() {
        let units = encode_submit("hello", "+5567998035423", SmsEncoding::Auto, 300, 7).unwrap();
        assert_eq!(units.len(), 1);
        let unit = &units[0];
        assert!(unit.part.is_none());
        // SMSC, first octet, MR, address, PID, DCS, VP (300 s), UDL, packed "hello"
        assert_eq!(unit.hex, "0031000D91557699085324F300000005E8329BFD06");
        assert_eq!(unit.tpdu_len, 20);
    }

    #[test]
    fn test_encode_national_address() {
        let units = encode_submit("x", "67998035423", SmsEncoding::Gsm7, 300, 0).unwrap();
        assert!(units[0].hex.starts_with("0031000B817699085324F3"));
    }

    #[test]
    fn test_encode_multipart_sets_udh() {
        let text = "a".repeat(200);
        let units = encode_submit(&text, "+5567998035423", SmsEncoding::Gsm7, 300, 42).unwrap();
        assert_eq!(units.len(), 2);
        assert!(units[0].hex.starts_with("0071"));
        assert_eq!(
            units[1].part,
            Some(PartInfo {
                reference: 42,
                index: 2,
                count: 2
            })
        );
    }

    #[test]
    fn test_gsm7_split_keeps_escape_pairs() {
        // 152 plain septets then an escaped character that would straddle the limit
        let text = format!("{}€{}", "a".repeat(152), "t".repeat(10));
        let units = encode_submit(&text, "+551199", SmsEncoding::Gsm7, 300, 1).unwrap();
        let first = decode_message(&units[0].hex).unwrap();
        assert_eq!(first.text, "a".repeat(152));
        let second = decode_message(&units[1].hex).unwrap();
        assert_eq!(second.text, format!("€{}", "t".repeat(10)));
    }

    #[test]
    fn test_ucs2_split_keeps_surrogate_pairs() {
        let text = format!("{}😀end", "é".repeat(66));
        let units = encode_submit(&text, "+551199", SmsEncoding::Ucs2, 300, 1).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(decode_message(&units[0].hex).unwrap().text, "é".repeat(66));
        assert_eq!(decode_message(&units[1].hex).unwrap().text, "😀end");
    }

    #[test]
    fn test_auto_falls_back_to_ucs2() {
        let units = encode_submit("Endereço ção", "+551199", SmsEncoding::Auto, 300, 1).unwrap();
        let msg = decode_message(&units[0].hex).unwrap();
        assert_eq!(msg.text, "Endereço ção");
        assert!(units[0].hex.contains("0008"));
    }

    #[test]
    fn test_gsm7_rejects_unrepresentable() {
        let err = encode_submit("日本", "+551199", SmsEncoding::Gsm7, 300, 1).unwrap_err();
        assert!(matches!(err, TrackerError::SendError(_)));
    }

    #[test]
    fn test_unknown_iei_is_not_concatenation() {
        // Port addressing IE (0x05) only
        assert!(parse_udh(&[0x05, 0x04, 0x0B, 0x84, 0x23, 0xF0]).is_none());
        // 16-bit reference concatenation
        let part = parse_udh(&[0x08, 0x04, 0x12, 0x34, 0x03, 0x02]).unwrap();
        assert_eq!(part.reference, 0x1234);
        assert_eq!((part.index, part.count), (2, 3));
    }

    #[test]
    fn test_decode_status_report() {
        let report = decode_status_report(
            "00062A0C91557699085324620141214365806201412153658000",
        )
        .unwrap();
        assert_eq!(report.reference, 42);
        assert_eq!(report.sender, "+556799803542");
        assert!(report.is_delivered());
        assert_eq!(report.discharged_at.unwrap().minute(), 35);
    }

    #[test]
    fn test_status_report_failure_code() {
        let report = decode_status_report(
            "00062A0C91557699085324620141214365806201412153658046",
        )
        .unwrap();
        assert_eq!(report.status, 0x46);
        assert!(!report.is_delivered());
    }

    #[test]
    fn test_malformed_units() {
        assert!(matches!(
            decode_message("0791"),
            Err(TrackerError::MalformedUnit(_))
        ));
        assert!(decode_message("ZZ").is_err());
        assert!(decode_message("").is_err());
        // Status report fed to the message decoder
        assert!(decode_message("00062A0C91557699085324620141214365806201412153658000").is_err());
    }

    #[test]
    fn test_validity_encoding() {
        assert_eq!(encode_validity(300), 0x00);
        assert_eq!(encode_validity(3600), 11);
        assert_eq!(encode_validity(86_400), 167);
        assert_eq!(encode_validity(7 * 86_400), 173);
    }
}
