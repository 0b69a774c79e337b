//! Modem ownership
//!
//! [`ModemSupervisor`] opens the link, forwards its events, closes it when the
//! error counter passes the configured threshold and reopens it after a fixed
//! delay. Devices reach the current link through the shared [`ModemSlot`].

use super::link::{ModemEvent, ModemLink, SentMessage};
use super::reopen::{ReopenHelper, ReopenPolicy};
use super::SmsGateway;
use crate::config::ModemConfig;
use crate::error::{Result, TrackerError};
use crate::sms::AssemblyLimits;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Builds a link; the flag asks for a modem reset after bootstrap
pub type LinkOpener =
    Arc<dyn Fn(bool) -> (ModemLink, mpsc::UnboundedReceiver<ModemEvent>) + Send + Sync>;

/// The currently open link, if any
#[derive(Default)]
pub struct ModemSlot {
    link: RwLock<Option<ModemLink>>,
}

impl ModemSlot {
    pub fn set(&self, link: Option<ModemLink>) {
        *self.link.write() = link;
    }

    pub fn current(&self) -> Option<ModemLink> {
        self.link.read().clone()
    }
}

#[async_trait]
impl SmsGateway for ModemSlot {
    async fn send_sms(&self, recipient: &str, text: &str) -> Result<SentMessage> {
        let link = self
            .current()
            .ok_or_else(|| TrackerError::link_closed("modem not available"))?;
        link.send(recipient, text).await
    }

    fn delete_indexes(&self, indexes: &[u32]) {
        match self.current() {
            Some(link) => link.delete_indexes(indexes),
            None => debug!("Modem not available, slots {:?} kept", indexes),
        }
    }

    fn phone_number(&self) -> Option<String> {
        self.current().and_then(|link| link.phone_number())
    }
}

pub struct ModemSupervisor {
    config: ModemConfig,
    opener: LinkOpener,
    slot: Arc<ModemSlot>,
    reopen: ReopenHelper,
    output: mpsc::UnboundedSender<ModemEvent>,
}

impl ModemSupervisor {
    /// Supervise the configured serial port
    pub fn new(
        config: ModemConfig,
        limits: AssemblyLimits,
        output: mpsc::UnboundedSender<ModemEvent>,
    ) -> Self {
        let serial = config.clone();
        let opener: LinkOpener =
            Arc::new(move |reset| ModemLink::open(serial.clone(), limits, reset));
        Self::with_opener(config, opener, output)
    }

    pub fn with_opener(
        config: ModemConfig,
        opener: LinkOpener,
        output: mpsc::UnboundedSender<ModemEvent>,
    ) -> Self {
        let reopen = ReopenHelper::new(ReopenPolicy {
            delay: config.reopen_delay(),
            max_attempts: 0,
        });
        Self {
            config,
            opener,
            slot: Arc::new(ModemSlot::default()),
            reopen,
            output,
        }
    }

    pub fn slot(&self) -> Arc<ModemSlot> {
        self.slot.clone()
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut reset = false;
        loop {
            let (link, mut events) = (self.opener)(reset);
            self.slot.set(Some(link.clone()));

            let mut opened = false;
            let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);
            health.tick().await;

            let reason = loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        link.close("shutdown");
                        self.slot.set(None);
                        info!("Modem supervisor stopped");
                        return;
                    }
                    _ = health.tick() => {
                        let errors = link.error_counter();
                        if errors > self.config.error_threshold {
                            warn!(
                                "Modem error counter {} above threshold {}, resetting link",
                                errors, self.config.error_threshold
                            );
                            link.close("error threshold exceeded");
                        }
                    }
                    event = events.recv() => match event {
                        Some(ModemEvent::LinkClosed(reason)) => break reason,
                        Some(event) => {
                            if matches!(event, ModemEvent::Ready { .. }) {
                                opened = true;
                                self.reopen.mark_open();
                            }
                            self.forward(event);
                        }
                        None => break "event feed ended".to_string(),
                    }
                }
            };

            self.slot.set(None);
            if opened {
                self.reopen.mark_closed(&reason);
            } else {
                self.reopen.mark_failed(&reason);
            }
            self.forward(ModemEvent::LinkClosed(reason));

            reset = true;
            if !self.reopen.wait(&cancel).await {
                break;
            }
        }
        info!("Modem supervisor stopped");
    }

    fn forward(&self, event: ModemEvent) {
        if self.output.send(event).is_err() {
            debug!("Modem event dropped, router is gone");
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::io::DuplexStream;

    fn opener_with(
        keep_alive: bool,
        calls: Arc<Mutex<Vec<bool>>>,
        config: ModemConfig,
    ) -> (LinkOpener, Arc<Mutex<Vec<DuplexStream>>>) {
        let peers = Arc::new(Mutex::new(Vec::new()));
        let held = peers.clone();
        let opener: LinkOpener = Arc::new(move |reset| {
            calls.lock().push(reset);
            let (ours, theirs) = tokio::io::duplex(8192);
            if keep_alive {
                held.lock().push(theirs);
            }
            ModemLink::attach(ours, config.clone(), AssemblyLimits::default(), reset)
        });
        (opener, peers)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopens_after_fixed_delay_with_reset() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let config = ModemConfig::default();
        let (opener, _peers) = opener_with(false, calls.clone(), config.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = ModemSupervisor::with_opener(config, opener, tx);
        let slot = supervisor.slot();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        assert!(matches!(rx.recv().await, Some(ModemEvent::LinkClosed(_))));
        assert!(slot.current().is_none());

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(calls.lock().clone(), vec![false]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.lock().clone(), vec![false, true]);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_threshold_closes_link() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let config = ModemConfig {
            command_timeout_secs: 1,
            error_threshold: 2,
            ..ModemConfig::default()
        };
        let (opener, _peers) = opener_with(true, calls.clone(), config.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = ModemSupervisor::with_opener(config, opener, tx);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        let closed = tokio::time::timeout(Duration::from_secs(20), rx.recv())
            .await
            .unwrap();
        assert_eq!(
            closed,
            Some(ModemEvent::LinkClosed("error threshold exceeded".to_string()))
        );

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(calls.lock().first(), Some(&false));
        assert!(calls.lock().len() >= 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_slot_without_link() {
        let slot = ModemSlot::default();
        let result = slot.send_sms("5567", "hi").await;
        assert!(matches!(result, Err(TrackerError::LinkClosed(_))));
        assert!(slot.phone_number().is_none());
        slot.delete_indexes(&[1, 2]);
    }
}
