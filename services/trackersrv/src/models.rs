//! Device model capabilities
//!
//! Each supported hardware model turns configuration intent into transport
//! commands and decodes what the device sends back into typed
//! [`DeviceAction`]s. The reconciler and runtime only see this interface.

pub mod st940;
pub mod tk102b;

pub use st940::St940;
pub use tk102b::Tk102b;

use crate::device::{Configuration, DeviceProfile};
use crate::geo::GeoPoint;
use crate::notify::{Notification, NotificationOverride};
use crate::tcp::TcpEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Configuration names shared by the models
pub const BEGIN: &str = "Begin";
pub const TIME_ZONE: &str = "TimeZone";
pub const STATUS_CHECK: &str = "StatusCheck";
pub const IMEI: &str = "IMEI";
pub const RESET: &str = "Reset";
pub const ACCESS_POINT: &str = "AccessPoint";
pub const APN_USER_PASS: &str = "APNUserPass";
pub const ADMIN_IP: &str = "AdminIP";
pub const GPRS: &str = "GPRS";
pub const LESS_GPRS: &str = "LessGPRS";
pub const SMS: &str = "SMS";
pub const ADMIN: &str = "Admin";
pub const PERIODIC_UPDATE: &str = "PeriodicUpdate";
pub const SLEEP: &str = "Sleep";
pub const SCHEDULE: &str = "Schedule";
pub const MOVE: &str = "Move";
pub const SPEED: &str = "Speed";
pub const SHOCK: &str = "Shock";
pub const LOCATION: &str = "Location";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Tk102b,
    St940,
}

static TK102B: Tk102b = Tk102b;
static ST940: St940 = St940;

impl ModelKind {
    pub fn parse(model: &str) -> Option<Self> {
        match model.trim().to_ascii_lowercase().as_str() {
            "tk102b" => Some(Self::Tk102b),
            "st940" => Some(Self::St940),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tk102b => "tk102b",
            Self::St940 => "st940",
        }
    }

    pub fn model(&self) -> &'static dyn DeviceModel {
        match self {
            Self::Tk102b => &TK102B,
            Self::St940 => &ST940,
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport configuration commands travel on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Sms,
    Tcp,
}

/// One transport command standing for one or more configurations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommand {
    pub names: Vec<String>,
    pub text: String,
    /// Echo tag for models that acknowledge by command name
    pub tag: Option<String>,
}

impl PlannedCommand {
    pub fn single(name: &str, text: impl Into<String>) -> Self {
        Self {
            names: vec![name.to_string()],
            text: text.into(),
            tag: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandPlan {
    Transmit(PlannedCommand),
    /// Nothing to send; the configuration holds as soon as it is applied
    ConfirmLocally { name: String, enabled: bool },
}

/// Classification of an observed reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// `value` is stored on the configuration when present
    Success { value: Option<String> },
    PasswordRefused,
    DeviceFailure,
    Unrecognized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FixSource {
    Gps,
    Gsm,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Position {
    Point(GeoPoint),
    /// Needs a cell tower lookup first; the country code comes from configuration
    Cell { mnc: u16, lac: u32, cid: u32 },
}

/// A position report decoded from a device message
#[derive(Debug, Clone, PartialEq)]
pub struct Fix {
    pub position: Position,
    pub source: FixSource,
    pub datetime: DateTime<Utc>,
    pub speed: Option<String>,
    pub battery: Option<String>,
    /// Message text or report keyword; alert words in it pick the notification
    pub alert_text: String,
}

/// What an inbound message asks the device runtime to do
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceAction {
    Confirm {
        name: String,
        enabled: bool,
        observed: String,
    },
    ConfirmCommand {
        tag: String,
    },
    /// Store the fix, then confirm `confirm` once it is stored
    Locate {
        fix: Fix,
        confirm: Vec<String>,
    },
    /// Write back on the connection the message came from
    Reply(String),
    SendSms(String),
    Notify {
        topic: String,
        notification: Notification,
    },
    /// Merge into the device document
    UpdateProfile(Map<String, Value>),
}

impl DeviceAction {
    pub fn confirm(name: &str, enabled: bool, observed: impl Into<String>) -> Self {
        Self::Confirm {
            name: name.to_string(),
            enabled,
            observed: observed.into(),
        }
    }

    pub fn notify(topic: &str, notification: Notification) -> Self {
        Self::Notify {
            topic: topic.to_string(),
            notification,
        }
    }
}

/// Typed input handed to [`DeviceModel::classify_response`]
#[derive(Debug, Clone, Copy)]
pub enum DeviceInput<'a> {
    Sms(&'a str),
    Tcp(&'a TcpEvent),
}

pub trait DeviceModel: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn channel(&self) -> Channel;

    /// Command for the head of `pending`; `all` gives composite commands the
    /// values of configurations outside this pass
    fn plan_command(
        &self,
        profile: &DeviceProfile,
        pending: &[&Configuration],
        all: &[Configuration],
    ) -> Option<CommandPlan>;

    fn classify_response(&self, profile: &DeviceProfile, input: DeviceInput<'_>)
        -> Vec<DeviceAction>;

    fn verdict(&self, name: &str, observed: &str) -> Verdict {
        default_verdict(name, observed)
    }

    /// Alert notification replacing the movement/permanence one
    fn coordinate_override(&self, alert_text: &str) -> Option<NotificationOverride>;
}

/// Token based verdict shared by the models
pub fn default_verdict(name: &str, observed: &str) -> Verdict {
    let observed = observed.to_lowercase();
    if observed.contains("ok") {
        Verdict::Success { value: None }
    } else if observed.contains("password err") || observed.contains("pwd fail") {
        Verdict::PasswordRefused
    } else if observed.contains("fail") {
        Verdict::DeviceFailure
    } else if name == IMEI || name == STATUS_CHECK {
        Verdict::Success {
            value: Some(observed.trim().to_string()),
        }
    } else {
        Verdict::Unrecognized
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_model_kind_parse() {
        assert_eq!(ModelKind::parse("TK102B"), Some(ModelKind::Tk102b));
        assert_eq!(ModelKind::parse(" st940 "), Some(ModelKind::St940));
        assert_eq!(ModelKind::parse("spot"), None);
        assert_eq!(ModelKind::St940.model().kind(), ModelKind::St940);
        assert_eq!(ModelKind::Tk102b.model().channel(), Channel::Sms);
    }

    #[test]
    fn test_default_verdict() {
        assert_eq!(
            default_verdict(BEGIN, "begin ok"),
            Verdict::Success { value: None }
        );
        assert_eq!(
            default_verdict(BEGIN, "password err"),
            Verdict::PasswordRefused
        );
        assert_eq!(default_verdict(ADMIN, "PWD FAIL"), Verdict::PasswordRefused);
        assert_eq!(default_verdict(SLEEP, "set fail"), Verdict::DeviceFailure);
        assert_eq!(
            default_verdict(IMEI, "359586015829802"),
            Verdict::Success {
                value: Some("359586015829802".to_string())
            }
        );
        assert_eq!(default_verdict(BEGIN, "???"), Verdict::Unrecognized);
    }
}
