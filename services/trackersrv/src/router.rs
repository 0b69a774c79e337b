//! Message routing
//!
//! [`MessageRouter`] owns the live devices and test client sessions. Modem
//! events resolve by sender (device, then test client, then the unknown inbox);
//! TCP frames resolve by protocol identity. The `Trackers` change feed keeps
//! the repository in step with the store.
//!
//! Events for one sender, connection identity or document are handled in
//! arrival order; distinct keys proceed in parallel.
//!
//! - `repository`: devices by id and identity
//! - `client`: provisioning test clients
//! - `lanes`: ordered dispatch per key

pub mod client;
pub mod lanes;
pub mod repository;

pub use client::{ClientSessions, TestClient};
pub use lanes::Lanes;
pub use repository::{DeviceRepository, SharedDevice};

use crate::context::EngineContext;
use crate::device::{
    ConfigReconciler, Device, DeviceProfile, DeviceSession, PassStep, Progress, SMS_RECEIVED,
    TRACKERS,
};
use crate::error::Result;
use crate::models::ModelKind;
use crate::modem::response::normalize_phone;
use crate::modem::ModemEvent;
use crate::sms::{DeliveryReport, PduMessage};
use crate::store::{ChangeKind, DocChange};
use crate::tcp::{TcpInbound, TcpModel};
use chrono::Utc;
use rand::seq::SliceRandom;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How often every device is asked whether a pass is due
pub const CHECK_INTERVAL: Duration = Duration::from_secs(60);

const BACKGROUND_COLORS: [&str; 5] = [
    "#99ff0000",
    "#99ffe600",
    "#99049f1e",
    "#99009dff",
    "#9900ffee",
];

fn background_color() -> &'static str {
    BACKGROUND_COLORS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(BACKGROUND_COLORS[0])
}

pub struct MessageRouter {
    ctx: EngineContext,
    devices: DeviceRepository,
    clients: ClientSessions,
    lanes: Lanes,
    country_code: String,
}

impl MessageRouter {
    pub fn new(ctx: EngineContext, country_code: &str) -> Self {
        Self {
            ctx,
            devices: DeviceRepository::new(country_code),
            clients: ClientSessions::new(country_code),
            lanes: Lanes::new(),
            country_code: country_code.to_string(),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn devices(&self) -> &DeviceRepository {
        &self.devices
    }

    pub fn clients(&self) -> &ClientSessions {
        &self.clients
    }

    // ========================================================================
    // Modem events
    // ========================================================================

    pub async fn handle_modem_event(&self, event: ModemEvent) -> Result<()> {
        match event {
            ModemEvent::MessageReceived(message) => self.route_sms(message).await,
            ModemEvent::DeliveryReport(report) => self.route_report(report).await,
            ModemEvent::Ready {
                manufacturer,
                phone_number,
            } => {
                info!(
                    "Modem {} ready, number {}",
                    manufacturer,
                    phone_number.as_deref().unwrap_or("unknown")
                );
                Ok(())
            },
            ModemEvent::Ring(caller) => {
                info!("Incoming call from {}", caller);
                Ok(())
            },
            ModemEvent::MemoryFull => {
                warn!("Modem message store is full");
                Ok(())
            },
            ModemEvent::DeviceInfo(info) => {
                debug!("Modem status: {:?}", info);
                Ok(())
            },
            ModemEvent::LinkClosed(reason) => {
                warn!("Modem link closed: {}", reason);
                Ok(())
            },
        }
    }

    async fn route_sms(&self, message: PduMessage) -> Result<()> {
        if let Some(shared) = self.devices.find(&message.sender) {
            let mut device = shared.lock().await;
            let outcome = DeviceSession::new(&mut device, &self.ctx)
                .on_sms(message)
                .await;
            self.devices.reindex(&device);
            return outcome;
        }

        if let Some(client) = self.clients.find_by_phone(&message.sender) {
            client.relay_sms(&message.text);
            self.clients.remove(&client.id);
            self.ctx.sms.delete_indexes(&message.raw_indexes);
            return Ok(());
        }

        warn!(
            "SMS from unknown number {}: {}",
            message.sender, message.text
        );
        let record = json!({
            "server": self.ctx.server,
            "from": message.sender,
            "to": self.ctx.sms.phone_number(),
            "text": message.text,
            "sentTime": message.timestamp,
            "receivedTime": Utc::now(),
        });
        self.ctx
            .store
            .collection(SMS_RECEIVED)
            .add(record)
            .await?;
        self.ctx.sms.delete_indexes(&message.raw_indexes);
        Ok(())
    }

    async fn route_report(&self, report: DeliveryReport) -> Result<()> {
        if let Some(shared) = self.devices.find(&report.sender) {
            let mut device = shared.lock().await;
            return DeviceSession::new(&mut device, &self.ctx)
                .on_delivery_report(report)
                .await;
        }

        if let Some(client) = self.clients.find_by_phone(&report.sender) {
            client.relay_report();
        } else {
            error!(
                "Delivery report {} for unknown number {}",
                report.reference, report.sender
            );
        }
        self.ctx.sms.delete_indexes(&report.raw_indexes);
        Ok(())
    }

    // ========================================================================
    // TCP frames
    // ========================================================================

    pub async fn handle_tcp(&self, inbound: TcpInbound) -> Result<()> {
        let TcpInbound { event, link } = inbound;
        if event.model == TcpModel::Client {
            return self
                .clients
                .handle(&event, link, self.ctx.sms.as_ref())
                .await;
        }

        if let Some(shared) = self.devices.find(&event.identity) {
            let mut device = shared.lock().await;
            device.bind_tcp(link);
            let outcome = DeviceSession::new(&mut device, &self.ctx)
                .on_tcp(&event)
                .await;
            self.devices.reindex(&device);
            return outcome;
        }

        match &event.model {
            TcpModel::St940 => {
                let Some(shared) = self.provision_st940(&event.identity).await? else {
                    return Ok(());
                };
                let mut device = shared.lock().await;
                device.bind_tcp(link);
                let mut session = DeviceSession::new(&mut device, &self.ctx);
                session.on_tcp(&event).await?;
                session.reconciler().load_configurations().await
            },
            other => {
                info!(
                    "Data from unknown tracker {} ({:?}) ignored",
                    event.identity, other
                );
                Ok(())
            },
        }
    }

    /// Create the document of an unknown ST940 that announced itself
    async fn provision_st940(&self, identity: &str) -> Result<Option<SharedDevice>> {
        let path = format!("{}/{}", TRACKERS, identity);
        if self.ctx.store.get(&path).await?.is_some() {
            debug!(
                "Tracker ST940@{} exists in the store and is not loaded",
                identity
            );
            return Ok(None);
        }

        let doc = json!({
            "name": format!("ST940 - ID({})", identity),
            "model": ModelKind::St940.as_str(),
            "description": "Adicionado automaticamente",
            "identification": identity,
            "lastUpdate": Utc::now(),
            "backgroundColor": background_color(),
        });
        self.ctx.store.set(&path, doc.clone(), false).await?;
        info!("Tracker ST940@{} added automatically", identity);

        let profile = DeviceProfile::from_document(&doc)?;
        let device = Device::new(identity, ModelKind::St940, profile);
        Ok(Some(self.devices.insert(device)))
    }

    // ========================================================================
    // Change feed
    // ========================================================================

    pub async fn handle_store_change(&self, change: DocChange) -> Result<()> {
        if change.kind == ChangeKind::Removed {
            if let Some(shared) = self.devices.remove(&change.id) {
                let mut device = shared.lock().await;
                device.release();
                info!("Tracker {} removed", device.name());
            }
            return Ok(());
        }

        let profile = match DeviceProfile::from_document(&change.data) {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Tracker {} has an unreadable document: {}", change.id, e);
                return Ok(());
            },
        };
        let Some(kind) = ModelKind::parse(&profile.model) else {
            debug!(
                "Tracker {} has unsupported model {:?}",
                change.id, profile.model
            );
            if let Some(shared) = self.devices.remove(&change.id) {
                shared.lock().await.release();
            }
            return Ok(());
        };

        let shared = match self.devices.get(&change.id) {
            Some(shared) => {
                refresh_profile(&mut *shared.lock().await, kind, profile);
                shared
            },
            None => {
                info!("Tracker {} loaded", profile.display_name());
                self.devices
                    .insert(Device::new(change.id.clone(), kind, profile))
            },
        };

        let mut device = shared.lock().await;
        self.devices.reindex(&device);
        let needs_load = device.configurations.is_empty()
            || device
                .progress()
                .map_or(true, |progress| progress.step == PassStep::Canceled);
        if needs_load {
            ConfigReconciler::new(&mut device, &self.ctx)
                .load_configurations()
                .await?;
        }
        Ok(())
    }

    /// Ask every device whether a pass is due, one task per device
    ///
    /// A device that is busy skips this round.
    pub fn check_all(&self) -> JoinSet<()> {
        let mut checks = JoinSet::new();
        for shared in self.devices.all() {
            let ctx = self.ctx.clone();
            checks.spawn(async move {
                let Ok(mut device) = shared.try_lock() else {
                    debug!("Tracker busy, configuration check deferred");
                    return;
                };
                if let Err(e) = ConfigReconciler::new(&mut device, &ctx)
                    .check_configurations()
                    .await
                {
                    error!(
                        "Configuration check of tracker {} failed: {}",
                        device.name(),
                        e
                    );
                }
            });
        }
        checks
    }

    /// Lane of a modem event: its phone number, or the modem itself
    fn modem_lane(&self, event: &ModemEvent) -> String {
        let sender = match event {
            ModemEvent::MessageReceived(message) => &message.sender,
            ModemEvent::DeliveryReport(report) => &report.sender,
            _ => return "modem".to_string(),
        };
        format!("sms:{}", normalize_phone(sender, &self.country_code))
    }

    pub async fn run(
        self: Arc<Self>,
        mut modem: mpsc::UnboundedReceiver<ModemEvent>,
        mut tcp: mpsc::UnboundedReceiver<TcpInbound>,
        mut changes: mpsc::UnboundedReceiver<DocChange>,
        cancel: CancellationToken,
    ) {
        let mut check = tokio::time::interval(CHECK_INTERVAL);
        check.tick().await;
        info!("Message router started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(change) = changes.recv() => {
                    let router = Arc::clone(&self);
                    let id = change.id.clone();
                    self.lanes.dispatch(format!("doc:{}", id), async move {
                        if let Err(e) = router.handle_store_change(change).await {
                            error!("Failed to apply change of tracker {}: {}", id, e);
                        }
                    });
                },
                Some(event) = modem.recv() => {
                    let router = Arc::clone(&self);
                    self.lanes.dispatch(self.modem_lane(&event), async move {
                        if let Err(e) = router.handle_modem_event(event).await {
                            error!("Failed to handle modem event: {}", e);
                        }
                    });
                },
                Some(inbound) = tcp.recv() => {
                    let router = Arc::clone(&self);
                    let lane = format!("tcp:{}", inbound.event.identity);
                    self.lanes.dispatch(lane, async move {
                        let peer = inbound.link.peer();
                        if let Err(e) = router.handle_tcp(inbound).await {
                            error!("Failed to handle data from {}: {}", peer, e);
                        }
                    });
                },
                _ = check.tick() => self.check_all().detach_all(),
                else => break,
            }
        }
        info!("Message router stopped");
    }
}

/// Take a new document version; a newer local pass record wins over an
/// echo of an older write
fn refresh_profile(device: &mut Device, kind: ModelKind, mut profile: DeviceProfile) {
    let newer_local = match (device.progress(), profile.last_configuration.as_ref()) {
        (Some(local), Some(stored)) => newer(local, stored),
        _ => false,
    };
    if newer_local {
        profile.last_configuration = device.profile.last_configuration.take();
    }
    device.profile = profile;
    device.model = kind;
}

fn newer(local: &Progress, stored: &Progress) -> bool {
    local.datetime > stored.datetime
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_background_color_is_from_palette() {
        for _ in 0..10 {
            assert!(BACKGROUND_COLORS.contains(&background_color()));
        }
    }
}
