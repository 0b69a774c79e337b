//! Live device state
//!
//! A [`Device`] caches one `Trackers/<id>` document, its configuration
//! intent and the transport it is reachable on. The store stays the source of
//! truth; every state change is written back through the reconciler.
//!
//! - `reconciler`: configuration passes
//! - `runtime`: inbound SMS, delivery reports, TCP frames and positions

pub mod reconciler;
pub mod runtime;

pub use reconciler::ConfigReconciler;
pub use runtime::DeviceSession;

use crate::models::{ModelKind, PlannedCommand};
use crate::tcp::TcpLink;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

pub const TRACKERS: &str = "Trackers";
pub const CONFIGURATIONS: &str = "Configurations";
pub const COORDINATES: &str = "Coordinates";
pub const SMS_SENT: &str = "SMS_Sent";
pub const SMS_RECEIVED: &str = "SMS_Received";

/// Lifecycle of one configuration item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigStep {
    #[default]
    Requested,
    Pending,
    #[serde(alias = "SMS_SENT")]
    Sent,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigStatus {
    pub step: ConfigStep,
    pub description: String,
    pub datetime: Option<DateTime<Utc>>,
    pub finished: bool,
    /// Transport command that carried it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Configuration {
    pub name: String,
    pub enabled: bool,
    pub value: Option<String>,
    pub priority: i64,
    pub status: ConfigStatus,
}

impl Configuration {
    pub fn new(name: &str, enabled: bool, value: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            enabled,
            value: value.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_finished(&self) -> bool {
        self.status.finished || matches!(self.status.step, ConfigStep::Success | ConfigStep::Error)
    }

    /// Configured value, or `default` when empty
    pub fn value_or<'a>(&'a self, default: &'a str) -> &'a str {
        match self.value.as_deref().map(str::trim) {
            Some(value) if !value.is_empty() => value,
            _ => default,
        }
    }
}

/// Overall state of a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PassStep {
    Pending,
    Success,
    Error,
    /// Set by operators to request a fresh pass
    Canceled,
}

/// `lastConfiguration` of a device document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub step: PassStep,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
    /// 0 to 100
    #[serde(default)]
    pub progress: u8,
    /// Configurations planned when the pass started
    #[serde(default)]
    pub pending: usize,
    #[serde(default)]
    pub server: String,
    pub datetime: DateTime<Utc>,
}

/// Typed view of a `Trackers/<id>` document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceProfile {
    pub name: String,
    pub model: String,
    /// Phone number for SMS models, protocol id for TCP models
    pub identification: String,
    pub password: String,
    pub imei: Option<String>,
    /// Operator name of the SIM
    pub network: Option<String>,
    pub battery_level: Option<String>,
    pub signal_level: Option<String>,
    pub last_configuration: Option<Progress>,
}

impl DeviceProfile {
    pub fn from_document(data: &serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(data.clone())
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.identification
        } else {
            &self.name
        }
    }
}

/// Store record of an outbound SMS, kept until its delivery report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub doc_id: String,
    pub text: String,
}

pub struct Device {
    pub id: String,
    pub model: ModelKind,
    pub profile: DeviceProfile,
    /// Ordered by priority, highest first
    pub configurations: Vec<Configuration>,
    /// Names still to apply in this pass, in application order
    pub pending: Vec<String>,
    /// Command transmitted and not yet confirmed
    pub planned: Option<PlannedCommand>,
    /// Outbound SMS by message reference
    pub sent: HashMap<u8, SentRecord>,
    tcp: Option<TcpLink>,
}

impl Device {
    pub fn new(id: impl Into<String>, model: ModelKind, profile: DeviceProfile) -> Self {
        Self {
            id: id.into(),
            model,
            profile,
            configurations: Vec::new(),
            pending: Vec::new(),
            planned: None,
            sent: HashMap::new(),
            tcp: None,
        }
    }

    pub fn name(&self) -> &str {
        self.profile.display_name()
    }

    /// Store path of this device's document
    pub fn path(&self) -> String {
        format!("{}/{}", TRACKERS, self.id)
    }

    pub fn subcollection(&self, name: &str) -> String {
        format!("{}/{}/{}", TRACKERS, self.id, name)
    }

    pub fn progress(&self) -> Option<&Progress> {
        self.profile.last_configuration.as_ref()
    }

    /// Identities the router resolves this device by
    pub fn identities(&self) -> Vec<String> {
        let mut identities = vec![self.id.clone()];
        if !self.profile.identification.is_empty() {
            identities.push(self.profile.identification.clone());
        }
        if let Some(imei) = self.profile.imei.as_ref().filter(|imei| !imei.is_empty()) {
            identities.push(imei.clone());
        }
        identities
    }

    pub fn config(&self, name: &str) -> Option<&Configuration> {
        self.configurations.iter().find(|c| c.name == name)
    }

    pub fn config_mut(&mut self, name: &str) -> Option<&mut Configuration> {
        self.configurations.iter_mut().find(|c| c.name == name)
    }

    pub fn pending_configs(&self) -> Vec<&Configuration> {
        self.pending
            .iter()
            .filter_map(|name| self.config(name))
            .collect()
    }

    /// Replace configuration intent; everything not yet successful is pending
    pub fn set_configurations(&mut self, mut configurations: Vec<Configuration>) {
        configurations.sort_by(|a, b| b.priority.cmp(&a.priority));
        self.pending = configurations
            .iter()
            .filter(|c| c.status.step != ConfigStep::Success)
            .map(|c| c.name.clone())
            .collect();
        self.configurations = configurations;
        self.planned = None;
        debug!(
            "Tracker {} has {} configuration(s), {} pending",
            self.name(),
            self.configurations.len(),
            self.pending.len()
        );
    }

    /// Drop `names` from the pending list and from the outstanding command
    pub fn settle(&mut self, names: &[String]) {
        self.pending.retain(|name| !names.contains(name));
        if let Some(planned) = self.planned.as_mut() {
            planned.names.retain(|name| !names.contains(name));
            if planned.names.is_empty() {
                self.planned = None;
            }
        }
    }

    /// Abandon the rest of the pass
    pub fn abandon(&mut self) {
        if !self.pending.is_empty() {
            info!(
                "Tracker {}: abandoning {} pending configuration(s)",
                self.name(),
                self.pending.len()
            );
        }
        self.pending.clear();
        self.planned = None;
    }

    pub fn tcp(&self) -> Option<&TcpLink> {
        self.tcp.as_ref().filter(|link| !link.is_closed())
    }

    /// Attach a connection; a different previous connection is closed
    pub fn bind_tcp(&mut self, link: TcpLink) {
        if let Some(previous) = self.tcp.take() {
            if previous.same_connection(&link) {
                self.tcp = Some(previous);
                return;
            }
            info!(
                "Tracker {} moved from {} to {}",
                self.name(),
                previous.peer(),
                link.peer()
            );
            previous.close();
        }
        self.tcp = Some(link);
    }

    /// Close and forget the transport
    pub fn release(&mut self) {
        if let Some(link) = self.tcp.take() {
            link.close();
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("pending", &self.pending)
            .field("planned", &self.planned)
            .field("tcp", &self.tcp)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn link(id: u64, port: u16) -> TcpLink {
        let peer = format!("127.0.0.1:{}", port).parse().unwrap();
        TcpLink::new(id, peer, CancellationToken::new()).0
    }

    #[test]
    fn test_configuration_document_shape() {
        let config: Configuration = serde_json::from_value(json!({
            "name": "Begin",
            "enabled": true,
            "priority": 3,
            "status": {"step": "SMS_SENT", "description": "x"}
        }))
        .unwrap();
        assert_eq!(config.status.step, ConfigStep::Sent);
        assert!(!config.is_finished());

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["status"]["step"], "SENT");
    }

    #[test]
    fn test_pending_follows_priority() {
        let mut device = Device::new("t1", ModelKind::Tk102b, DeviceProfile::default());
        let mut done = Configuration::new("IMEI", true, None).with_priority(9);
        done.status.step = ConfigStep::Success;
        device.set_configurations(vec![
            Configuration::new("Begin", true, None).with_priority(1),
            done,
            Configuration::new("AdminIP", true, Some("1.2.3.4 5001")).with_priority(5),
        ]);
        assert_eq!(device.pending, vec!["AdminIP", "Begin"]);
        assert_eq!(device.configurations[0].name, "IMEI");
        assert_eq!(device.config("AdminIP").unwrap().value_or("x"), "1.2.3.4 5001");
    }

    #[test]
    fn test_rebinding_closes_previous_connection() {
        let mut device = Device::new("907", ModelKind::St940, DeviceProfile::default());
        let first = link(1, 40000);
        device.bind_tcp(first.clone());
        device.bind_tcp(first.clone());
        assert!(!first.is_closed());

        let second = link(2, 40001);
        device.bind_tcp(second.clone());
        assert!(first.is_closed());
        assert!(device.tcp().unwrap().same_connection(&second));

        device.release();
        assert!(second.is_closed());
        assert!(device.tcp().is_none());
    }

    #[test]
    fn test_profile_identities() {
        let profile = DeviceProfile::from_document(&json!({
            "name": "Car",
            "identification": "67998035423",
            "imei": "359586015829802",
            "backgroundColor": "#99ff0000"
        }))
        .unwrap();
        let device = Device::new("t1", ModelKind::Tk102b, profile);
        assert_eq!(
            device.identities(),
            vec!["t1", "67998035423", "359586015829802"]
        );
    }
}
