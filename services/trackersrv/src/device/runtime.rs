//! Inbound traffic of one device
//!
//! [`DeviceSession`] takes whatever the router resolved to this device, lets
//! the model decode it and executes the resulting actions in order.

use super::reconciler::clock;
use super::{ConfigReconciler, Device, DeviceProfile, COORDINATES, SMS_RECEIVED, SMS_SENT};
use crate::context::EngineContext;
use crate::error::Result;
use crate::geo::{CellTower, GeoPoint, ADDRESS_UNAVAILABLE};
use crate::models::{DeviceAction, DeviceInput, Fix, Position};
use crate::notify::{Notification, NOTIFY_AVAILABLE, NOTIFY_MOVEMENT, NOTIFY_STOPPED};
use crate::sms::{DeliveryReport, PduMessage};
use crate::store::merge_value;
use crate::tcp::TcpEvent;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

pub struct DeviceSession<'a> {
    device: &'a mut Device,
    ctx: &'a EngineContext,
}

impl<'a> DeviceSession<'a> {
    pub fn new(device: &'a mut Device, ctx: &'a EngineContext) -> Self {
        Self { device, ctx }
    }

    pub fn reconciler(&mut self) -> ConfigReconciler<'_> {
        ConfigReconciler::new(&mut *self.device, self.ctx)
    }

    /// A complete SMS from the device
    pub async fn on_sms(&mut self, message: PduMessage) -> Result<()> {
        let text = message.text.trim();
        if text.is_empty() || text.to_lowercase().contains("entregue") {
            debug!(
                "Tracker {}: discarding operator notice {:?}",
                self.device.name(),
                text
            );
            self.ctx.sms.delete_indexes(&message.raw_indexes);
            return Ok(());
        }
        info!("Tracker {} sent SMS: {}", self.device.name(), text);

        let record = json!({
            "server": self.ctx.server,
            "from": message.sender,
            "to": self.ctx.sms.phone_number(),
            "text": text,
            "sentTime": message.timestamp,
            "receivedTime": Utc::now(),
        });
        match self
            .ctx
            .store
            .collection(self.device.subcollection(SMS_RECEIVED))
            .add(record)
            .await
        {
            Ok(_) => self.ctx.sms.delete_indexes(&message.raw_indexes),
            Err(e) => error!(
                "Tracker {}: failed to store SMS, kept on modem: {}",
                self.device.name(),
                e
            ),
        }

        self.ctx
            .notify(
                &self.device.id,
                NOTIFY_AVAILABLE,
                Notification::new(
                    "Recebimento de SMS",
                    "SMS enviado pelo rastreador foi recebido",
                )
                .expanded(text),
                None,
            )
            .await;

        let actions = self
            .device
            .model
            .model()
            .classify_response(&self.device.profile, DeviceInput::Sms(&message.text));
        self.execute(actions).await
    }

    /// Status report for an SMS sent to the device
    pub async fn on_delivery_report(&mut self, report: DeliveryReport) -> Result<()> {
        let delivered = report.is_delivered();
        let record = self.device.sent.remove(&report.reference);
        // a report with no record predates the running process
        let for_command = match (&record, &self.device.planned) {
            (Some(record), Some(planned)) => record.text == planned.text,
            (None, Some(_)) => true,
            _ => false,
        };

        let notification = if delivered {
            Notification::new(
                "Alerta de disponibilidade",
                "Confirmou o recebimento de SMS",
            )
        } else {
            Notification::new(
                "Alerta de indisponibilidade",
                "Rastreador não disponível para receber SMS",
            )
        };
        self.ctx
            .notify(&self.device.id, NOTIFY_AVAILABLE, notification, None)
            .await;

        if let Some(record) = record {
            let fields = json!({
                "status": if delivered { "DELIVERED" } else { "FAILED" },
                "receivedTime": report.discharged_at,
            });
            if let Err(e) = self
                .ctx
                .store
                .collection(self.device.subcollection(SMS_SENT))
                .doc(&record.doc_id)
                .update(fields)
                .await
            {
                warn!(
                    "Tracker {}: failed to update sent SMS {}: {}",
                    self.device.name(),
                    record.doc_id,
                    e
                );
            }
        }

        let outcome = if delivered {
            if for_command {
                self.reconciler().note_delivery().await
            } else {
                Ok(())
            }
        } else {
            self.reconciler()
                .fail_outstanding(format!("Dispositivo indisponível às {}", clock()))
                .await
                .map(|_| ())
        };
        self.ctx.sms.delete_indexes(&report.raw_indexes);
        outcome
    }

    /// A classified frame from the device's connection
    pub async fn on_tcp(&mut self, event: &TcpEvent) -> Result<()> {
        let actions = self
            .device
            .model
            .model()
            .classify_response(&self.device.profile, DeviceInput::Tcp(event));
        self.execute(actions).await
    }

    pub async fn execute(&mut self, actions: Vec<DeviceAction>) -> Result<()> {
        for action in actions {
            match action {
                DeviceAction::Confirm {
                    name,
                    enabled,
                    observed,
                } => {
                    self.reconciler()
                        .confirm_configuration(&name, enabled, &observed)
                        .await?
                },
                DeviceAction::ConfirmCommand { tag } => {
                    self.reconciler().confirm_command(&tag).await?
                },
                DeviceAction::Locate { fix, confirm } => {
                    if self.locate(fix).await? {
                        for name in confirm {
                            let enabled = self.device.config(&name).map_or(true, |c| c.enabled);
                            self.reconciler()
                                .confirm_configuration(&name, enabled, "ok")
                                .await?;
                        }
                    }
                },
                DeviceAction::Reply(text) => match self.device.tcp() {
                    Some(link) => {
                        if let Err(e) = link.write(&text) {
                            warn!("Tracker {}: reply failed: {}", self.device.name(), e);
                        }
                    },
                    None => warn!(
                        "Tracker {}: no connection for reply {}",
                        self.device.name(),
                        text
                    ),
                },
                DeviceAction::SendSms(text) => {
                    if let Err(e) = self.reconciler().send_sms(&text).await {
                        warn!(
                            "Failed to send {} to tracker {}: {}",
                            text,
                            self.device.name(),
                            e
                        );
                    }
                },
                DeviceAction::Notify {
                    topic,
                    notification,
                } => {
                    self.ctx
                        .notify(&self.device.id, &topic, notification, None)
                        .await
                },
                DeviceAction::UpdateProfile(fields) => self.update_profile(fields).await?,
            }
        }
        Ok(())
    }

    // ========================================================================
    // Positions
    // ========================================================================

    /// Resolve and store a fix; false when it carried no usable position
    async fn locate(&mut self, fix: Fix) -> Result<bool> {
        let point = match fix.position {
            Position::Point(point) => point,
            Position::Cell { mnc, lac, cid } => {
                let tower = CellTower {
                    mcc: self.ctx.reconcile.mcc,
                    mnc,
                    lac,
                    cid,
                };
                match self.ctx.geolocator.resolve_cell_tower(tower).await {
                    Ok(point) => point,
                    Err(e) => {
                        warn!(
                            "Tracker {}: cell {:?} not resolved: {}",
                            self.device.name(),
                            tower,
                            e
                        );
                        return Ok(false);
                    },
                }
            },
        };
        if !point.is_plausible() {
            warn!(
                "Tracker {}: discarding implausible position {:?}",
                self.device.name(),
                point
            );
            return Ok(false);
        }
        self.insert_coordinates(&fix, point).await?;
        Ok(true)
    }

    async fn insert_coordinates(&mut self, fix: &Fix, point: GeoPoint) -> Result<()> {
        let mut last = json!({
            "lastCoordinate": {
                "type": fix.source,
                "location": point,
                "datetime": fix.datetime,
            },
            "lastUpdate": Utc::now(),
        });
        if let Some(battery) = &fix.battery {
            last["batteryLevel"] = json!(battery);
        }
        self.ctx
            .store
            .doc(self.device.path())
            .set(last, true)
            .await?;

        let coordinates = self
            .ctx
            .store
            .collection(self.device.subcollection(COORDINATES));
        let previous = coordinates
            .list()
            .await?
            .into_iter()
            .filter_map(|(id, doc)| {
                let datetime: DateTime<Utc> = doc.get("datetime")?.as_str()?.parse().ok()?;
                let location: GeoPoint = serde_json::from_value(doc.get("location")?.clone()).ok()?;
                (datetime <= fix.datetime).then_some((id, datetime, location))
            })
            .max_by_key(|(_, datetime, _)| *datetime);

        let model = self.device.model.model();
        let override_with = model.coordinate_override(&fix.alert_text);
        let threshold = self.ctx.reconcile.movement_threshold_m;

        match previous {
            Some((id, _, location)) if location.distance_m(&point) <= threshold => {
                debug!(
                    "Tracker {} stays at {},{}",
                    self.device.name(),
                    point.latitude,
                    point.longitude
                );
                coordinates
                    .doc(&id)
                    .update(json!({ "lastDatetime": fix.datetime }))
                    .await?;
                self.ctx
                    .notify(
                        &self.device.id,
                        NOTIFY_STOPPED,
                        Notification::new(
                            "Alerta de permanência",
                            "Rastreador permanece na mesma posição.",
                        )
                        .coordinates(point.latitude, point.longitude),
                        override_with,
                    )
                    .await;
            },
            _ => {
                let (address, content) = match self.ctx.geolocator.reverse_geocode(point).await {
                    Ok(address) => (address.clone(), address),
                    Err(e) => {
                        debug!("Reverse geocoding failed: {}", e);
                        (
                            ADDRESS_UNAVAILABLE.to_string(),
                            format!("Coordenadas: {},{}", point.latitude, point.longitude),
                        )
                    },
                };
                coordinates
                    .add(json!({
                        "datetime": fix.datetime,
                        "lastDatetime": fix.datetime,
                        "location": point,
                        "address": address,
                        "type": fix.source,
                        "speed": fix.speed,
                        "batteryLevel": fix.battery,
                        "server": self.ctx.server,
                    }))
                    .await?;
                info!(
                    "Tracker {} moved to {},{}",
                    self.device.name(),
                    point.latitude,
                    point.longitude
                );
                self.ctx
                    .notify(
                        &self.device.id,
                        NOTIFY_MOVEMENT,
                        Notification::new("Alerta de movimentação", content)
                            .coordinates(point.latitude, point.longitude),
                        override_with,
                    )
                    .await;
            },
        }
        Ok(())
    }

    async fn update_profile(&mut self, fields: Map<String, Value>) -> Result<()> {
        let patch = Value::Object(fields);
        self.ctx
            .store
            .doc(self.device.path())
            .set(patch.clone(), true)
            .await?;
        let mut current = serde_json::to_value(&self.device.profile)?;
        merge_value(&mut current, patch);
        match DeviceProfile::from_document(&current) {
            Ok(profile) => self.device.profile = profile,
            Err(e) => warn!(
                "Tracker {}: profile update not applied locally: {}",
                self.device.name(),
                e
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use crate::geo::OfflineGeolocator;
    use crate::models::{FixSource, ModelKind};
    use crate::modem::{SentMessage, SmsGateway};
    use crate::notify::LogNotifier;
    use crate::store::{DocumentStore, MemoryStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Slots {
        deleted: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl SmsGateway for Slots {
        async fn send_sms(&self, _recipient: &str, _text: &str) -> Result<SentMessage> {
            Err(TrackerError::link_closed("modem not available"))
        }

        fn delete_indexes(&self, indexes: &[u32]) {
            self.deleted.lock().extend_from_slice(indexes);
        }

        fn phone_number(&self) -> Option<String> {
            Some("+5567999990000".to_string())
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<Slots>, EngineContext, Device) {
        let store = Arc::new(MemoryStore::new());
        let slots = Arc::new(Slots::default());
        let ctx = EngineContext::new(
            store.clone(),
            Arc::new(LogNotifier),
            Arc::new(OfflineGeolocator),
            slots.clone(),
            "test",
        );
        let profile = DeviceProfile {
            name: "Car".to_string(),
            identification: "+5567998035423".to_string(),
            ..Default::default()
        };
        (store, slots, ctx, Device::new("t1", ModelKind::Tk102b, profile))
    }

    fn fix(latitude: f64, longitude: f64, minute: u32) -> Fix {
        Fix {
            position: Position::Point(GeoPoint::new(latitude, longitude)),
            source: FixSource::Gps,
            datetime: format!("2024-05-01T10:{:02}:00Z", minute).parse().unwrap(),
            speed: None,
            battery: None,
            alert_text: String::new(),
        }
    }

    #[tokio::test]
    async fn test_nearby_fix_extends_last_coordinate() {
        let (store, _, ctx, mut device) = setup();
        let mut session = DeviceSession::new(&mut device, &ctx);

        assert!(session.locate(fix(-20.4697, -54.6201, 0)).await.unwrap());
        assert!(session.locate(fix(-20.4698, -54.6201, 5)).await.unwrap());
        assert_eq!(store.count("Trackers/t1/Coordinates"), 1);

        assert!(session.locate(fix(-20.4800, -54.6201, 10)).await.unwrap());
        assert_eq!(store.count("Trackers/t1/Coordinates"), 2);

        let docs = store.list("Trackers/t1/Coordinates").await.unwrap();
        let first = docs
            .iter()
            .find(|(_, doc)| doc["datetime"] == "2024-05-01T10:00:00Z")
            .unwrap();
        assert_eq!(first.1["lastDatetime"], "2024-05-01T10:05:00Z");
        assert_eq!(first.1["address"], ADDRESS_UNAVAILABLE);

        let tracker = store.get("Trackers/t1").await.unwrap().unwrap();
        assert_eq!(tracker["lastCoordinate"]["type"], "GPS");
    }

    #[tokio::test]
    async fn test_unresolved_cell_is_not_stored() {
        let (store, _, ctx, mut device) = setup();
        let mut session = DeviceSession::new(&mut device, &ctx);
        let mut cell = fix(0.0, 0.0, 0);
        cell.position = Position::Cell {
            mnc: 6,
            lac: 0x2b1c,
            cid: 0x5e4f,
        };
        assert!(!session.locate(cell).await.unwrap());
        assert_eq!(store.count("Trackers/t1/Coordinates"), 0);
    }

    #[tokio::test]
    async fn test_operator_notice_is_only_deleted() {
        let (store, slots, ctx, mut device) = setup();
        let message = PduMessage {
            sender: "+5567998035423".to_string(),
            timestamp: None,
            text: "Sua mensagem foi entregue".to_string(),
            reference: None,
            part_index: None,
            part_count: None,
            raw_indexes: vec![4],
        };
        DeviceSession::new(&mut device, &ctx)
            .on_sms(message)
            .await
            .unwrap();
        assert_eq!(*slots.deleted.lock(), vec![4]);
        assert_eq!(store.count("Trackers/t1/SMS_Received"), 0);
    }

    #[tokio::test]
    async fn test_status_reply_updates_profile() {
        let (store, slots, ctx, mut device) = setup();
        let message = PduMessage {
            sender: "+5567998035423".to_string(),
            timestamp: None,
            text: "bat: 100%\nGSM: 24".to_string(),
            reference: None,
            part_index: None,
            part_count: None,
            raw_indexes: vec![1, 2],
        };
        DeviceSession::new(&mut device, &ctx)
            .on_sms(message)
            .await
            .unwrap();
        assert_eq!(*slots.deleted.lock(), vec![1, 2]);
        assert_eq!(store.count("Trackers/t1/SMS_Received"), 1);
        assert!(device.profile.battery_level.is_some());
    }
}
