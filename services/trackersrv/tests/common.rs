//! Test Common Utilities
//!
//! Recording collaborators and store fixtures shared by the trackersrv
//! integration tests

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use trackersrv::device::{Configuration, Device, DeviceProfile, CONFIGURATIONS, TRACKERS};
use trackersrv::error::{Result, TrackerError};
use trackersrv::geo::OfflineGeolocator;
use trackersrv::models::ModelKind;
use trackersrv::modem::{SentMessage, SmsGateway};
use trackersrv::notify::{Notification, NotificationOverride, Notifier};
use trackersrv::sms::{DeliveryReport, PduMessage, STATUS_DELIVERED};
use trackersrv::store::{DocumentStore, MemoryStore};
use trackersrv::EngineContext;

pub const PHONE: &str = "+5567998035423";
pub const PASSWORD: &str = "123456";
pub const MODEM_NUMBER: &str = "+5567999990000";

/// SMS gateway that records every send
#[derive(Default)]
pub struct RecordingGateway {
    pub sent: Mutex<Vec<(String, String)>>,
    pub deleted: Mutex<Vec<u32>>,
    /// Sends whose text starts with this prefix fail
    pub fail_prefix: Mutex<Option<String>>,
    next_reference: Mutex<u8>,
}

impl RecordingGateway {
    pub fn failing_on(prefix: &str) -> Self {
        let gateway = Self::default();
        *gateway.fail_prefix.lock() = Some(prefix.to_string());
        gateway
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, text)| text.clone()).collect()
    }

    /// Reference handed out for the most recent send
    pub fn last_reference(&self) -> u8 {
        *self.next_reference.lock()
    }
}

#[async_trait]
impl SmsGateway for RecordingGateway {
    async fn send_sms(&self, recipient: &str, text: &str) -> Result<SentMessage> {
        if let Some(prefix) = self.fail_prefix.lock().as_deref() {
            if text.starts_with(prefix) {
                return Err(TrackerError::send(format!(
                    "modem rejected [{}]",
                    text
                )));
            }
        }
        self.sent
            .lock()
            .push((recipient.to_string(), text.to_string()));
        let mut reference = self.next_reference.lock();
        *reference = reference.wrapping_add(1);
        Ok(SentMessage {
            reference: *reference,
            references: vec![*reference],
        })
    }

    fn delete_indexes(&self, indexes: &[u32]) {
        self.deleted.lock().extend_from_slice(indexes);
    }

    fn phone_number(&self) -> Option<String> {
        Some(MODEM_NUMBER.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Published {
    pub device_id: String,
    pub topic: String,
    pub title: String,
    pub override_with: Option<NotificationOverride>,
}

/// Notifier that keeps what it was asked to publish
#[derive(Default)]
pub struct RecordingNotifier {
    pub published: Mutex<Vec<Published>>,
}

impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .map(|p| p.title.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(
        &self,
        device_id: &str,
        topic: &str,
        notification: Notification,
        override_with: Option<NotificationOverride>,
    ) -> Result<()> {
        self.published.lock().push(Published {
            device_id: device_id.to_string(),
            topic: topic.to_string(),
            title: notification.title,
            override_with,
        });
        Ok(())
    }
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub sms: Arc<RecordingGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub ctx: EngineContext,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_gateway(RecordingGateway::default())
    }

    pub fn with_gateway(gateway: RecordingGateway) -> Self {
        let store = Arc::new(MemoryStore::new());
        let sms = Arc::new(gateway);
        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = EngineContext::new(
            store.clone(),
            notifier.clone(),
            Arc::new(OfflineGeolocator),
            sms.clone(),
            "test-server",
        );
        Self {
            store,
            sms,
            notifier,
            ctx,
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    /// Write a TK102B tracker document and its configurations
    pub async fn seed_tk102b(&self, id: &str, configurations: &[Configuration]) -> Device {
        let doc = json!({
            "name": "Carro",
            "model": "tk102b",
            "identification": PHONE,
            "password": PASSWORD,
        });
        self.seed(id, ModelKind::Tk102b, doc, configurations).await
    }

    /// Write an ST940 tracker document whose protocol id is `id`
    pub async fn seed_st940(&self, id: &str, configurations: &[Configuration]) -> Device {
        let doc = json!({
            "name": format!("ST940 - ID({})", id),
            "model": "st940",
            "identification": id,
        });
        self.seed(id, ModelKind::St940, doc, configurations).await
    }

    async fn seed(
        &self,
        id: &str,
        kind: ModelKind,
        doc: Value,
        configurations: &[Configuration],
    ) -> Device {
        self.store
            .set(&format!("{}/{}", TRACKERS, id), doc.clone(), false)
            .await
            .unwrap();
        for config in configurations {
            self.store
                .set(
                    &format!("{}/{}/{}/{}", TRACKERS, id, CONFIGURATIONS, config.name),
                    serde_json::to_value(config).unwrap(),
                    false,
                )
                .await
                .unwrap();
        }
        let profile = DeviceProfile::from_document(&doc).unwrap();
        Device::new(id, kind, profile)
    }

    pub async fn tracker_doc(&self, id: &str) -> Value {
        self.store
            .get(&format!("{}/{}", TRACKERS, id))
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn config_doc(&self, id: &str, name: &str) -> Value {
        self.store
            .get(&format!("{}/{}/{}/{}", TRACKERS, id, CONFIGURATIONS, name))
            .await
            .unwrap()
            .unwrap()
    }
}

/// A complete SMS from `sender` stored in modem slot `index`
pub fn sms_from(sender: &str, text: &str, index: u32) -> PduMessage {
    PduMessage {
        sender: sender.to_string(),
        timestamp: None,
        text: text.to_string(),
        reference: None,
        part_index: None,
        part_count: None,
        raw_indexes: vec![index],
    }
}

pub fn report(sender: &str, reference: u8, status: u8, index: u32) -> DeliveryReport {
    DeliveryReport {
        reference,
        status,
        sender: sender.to_string(),
        submitted_at: None,
        discharged_at: None,
        raw_indexes: vec![index],
    }
}

pub fn delivered(sender: &str, reference: u8, index: u32) -> DeliveryReport {
    report(sender, reference, STATUS_DELIVERED, index)
}
