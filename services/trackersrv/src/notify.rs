//! Notification collaborator
//!
//! Publishing is fire-and-forget: callers log failures and move on.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const NOTIFY_AVAILABLE: &str = "Notify_Available";
pub const NOTIFY_MOVEMENT: &str = "Notify_Movement";
pub const NOTIFY_STOPPED: &str = "Notify_Stopped";
pub const NOTIFY_STATUS_CHECK: &str = "Notify_StatusCheck";
pub const NOTIFY_MOVE_OUT: &str = "Notify_MoveOut";
pub const NOTIFY_OVER_SPEED: &str = "Notify_OverSpeed";
pub const NOTIFY_SHOCK: &str = "Notify_Shock";
pub const NOTIFY_LOW_BATTERY: &str = "Notify_LowBattery";
pub const TRACKER_SOS: &str = "Tracker_SOS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expanded: Option<String>,
    /// `lat,lon` of the fix that triggered it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<String>,
    pub datetime: String,
}

impl Notification {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            expanded: None,
            coordinates: None,
            datetime: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn expanded(mut self, text: impl Into<String>) -> Self {
        self.expanded = Some(text.into());
        self
    }

    pub fn coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.coordinates = Some(format!("{},{}", latitude, longitude));
        self
    }
}

/// Alert that replaces a movement or permanence notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOverride {
    pub topic: String,
    pub title: String,
    pub content: String,
}

impl NotificationOverride {
    pub fn new(topic: &str, title: &str, content: &str) -> Self {
        Self {
            topic: topic.to_string(),
            title: title.to_string(),
            content: content.to_string(),
        }
    }
}

/// Topic and payload actually delivered once an override is applied
pub fn resolve(
    topic: &str,
    mut notification: Notification,
    override_with: Option<&NotificationOverride>,
) -> (String, Notification) {
    match override_with {
        Some(alert) => {
            notification.title = alert.title.clone();
            notification.content = alert.content.clone();
            (alert.topic.clone(), notification)
        },
        None => (topic.to_string(), notification),
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(
        &self,
        device_id: &str,
        topic: &str,
        notification: Notification,
        override_with: Option<NotificationOverride>,
    ) -> Result<()>;
}

/// Writes notifications to the service log
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(
        &self,
        device_id: &str,
        topic: &str,
        notification: Notification,
        override_with: Option<NotificationOverride>,
    ) -> Result<()> {
        let (topic, notification) = resolve(topic, notification, override_with.as_ref());
        info!(
            "Notification {} for {}: {} / {}",
            topic, device_id, notification.title, notification.content
        );
        Ok(())
    }
}
