//! Collaborators shared by every device

use crate::config::ReconcileConfig;
use crate::geo::Geolocator;
use crate::modem::SmsGateway;
use crate::notify::{Notification, NotificationOverride, Notifier};
use crate::store::DocumentStore;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn DocumentStore>,
    pub notifier: Arc<dyn Notifier>,
    pub geolocator: Arc<dyn Geolocator>,
    pub sms: Arc<dyn SmsGateway>,
    /// Written into every progress and SMS record
    pub server: String,
    pub reconcile: ReconcileConfig,
}

impl EngineContext {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        geolocator: Arc<dyn Geolocator>,
        sms: Arc<dyn SmsGateway>,
        server: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            geolocator,
            sms,
            server: server.into(),
            reconcile: ReconcileConfig::default(),
        }
    }

    pub fn with_reconcile(mut self, reconcile: ReconcileConfig) -> Self {
        self.reconcile = reconcile;
        self
    }

    /// Publish and log a failure; notifications are never retried
    pub async fn notify(
        &self,
        device_id: &str,
        topic: &str,
        notification: Notification,
        override_with: Option<NotificationOverride>,
    ) {
        if let Err(e) = self
            .notifier
            .publish(device_id, topic, notification, override_with)
            .await
        {
            warn!("Notification {} for {} failed: {}", topic, device_id, e);
        }
    }
}
