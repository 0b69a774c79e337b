//! Stateless frame classifier
//!
//! Works on shape only: fixed markers, fixed-length numeric identities and the
//! field separator. Model specific decoding happens later in `models`.

use serde::Serialize;

const IMEI_LEN: usize = 15;

/// Originating protocol of a frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TcpModel {
    Tk102b,
    St940,
    /// Test client session used while provisioning new hardware
    Client,
    /// `;`-framed record from a model with no handler
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameKind {
    /// GPRS session start (TK102B)
    Connection,
    Heartbeat,
    /// Comma-separated position report (TK102B)
    Report,
    /// `;`-separated record (Suntech, test client)
    Record,
}

/// A recognized frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TcpEvent {
    pub model: TcpModel,
    /// IMEI for TK102B, protocol id for Suntech, auth token for the test client
    pub identity: String,
    pub kind: FrameKind,
    pub fields: Vec<String>,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Event(TcpEvent),
    /// Longer than the noise threshold but of no known shape
    Unrecognized(String),
    Noise,
}

/// Classify one frame
pub fn classify(frame: &str, min_len: usize) -> Classification {
    let frame = frame.trim();

    if let Some(event) = tk102b_frame(frame) {
        return Classification::Event(event);
    }

    let fields: Vec<String> = frame.split(';').map(|f| f.trim().to_string()).collect();
    if fields.len() > 2 && !fields[2].is_empty() {
        let model = match fields[0].to_ascii_uppercase().as_str() {
            "ST910" | "ST940" => TcpModel::St940,
            "CLIENT" => TcpModel::Client,
            other => TcpModel::Other(other.to_string()),
        };
        return Classification::Event(TcpEvent {
            model,
            identity: fields[2].clone(),
            kind: FrameKind::Record,
            fields,
            raw: frame.to_string(),
        });
    }

    if frame.len() > min_len {
        Classification::Unrecognized(frame.to_string())
    } else {
        Classification::Noise
    }
}

fn tk102b_frame(frame: &str) -> Option<TcpEvent> {
    let event = |identity: &str, kind: FrameKind, fields: Vec<String>| TcpEvent {
        model: TcpModel::Tk102b,
        identity: identity.to_string(),
        kind,
        fields,
        raw: frame.to_string(),
    };

    // ##,imei:359586015829802,A
    if let Some(rest) = frame.strip_prefix("##,") {
        let fields: Vec<String> = rest
            .trim_end_matches(';')
            .split(',')
            .map(str::to_string)
            .collect();
        let imei = fields.first()?.strip_prefix("imei:")?;
        return is_imei(imei).then(|| event(imei, FrameKind::Connection, fields.clone()));
    }

    let bare = frame.trim_end_matches(';');
    if is_imei(bare) {
        return Some(event(bare, FrameKind::Heartbeat, vec![bare.to_string()]));
    }

    // imei:359586015829802,tracker,0809231929,,F,112909.397,A,2234.4669,N,11354.3287,E,0.11,
    if frame.starts_with("imei:") {
        let fields: Vec<String> = bare.split(',').map(|f| f.trim().to_string()).collect();
        let imei = fields.first()?.strip_prefix("imei:")?;
        if is_imei(imei) && fields.len() > 1 {
            return Some(event(imei, FrameKind::Report, fields.clone()));
        }
    }
    None
}

fn is_imei(text: &str) -> bool {
    text.len() == IMEI_LEN && text.bytes().all(|b| b.is_ascii_digit())
}
