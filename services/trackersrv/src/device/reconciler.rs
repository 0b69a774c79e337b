//! Configuration passes
//!
//! A pass starts when the device has pending configurations and no recent
//! pass in progress. One command is outstanding at a time: the next one is
//! planned only after the previous one is confirmed. Any error ends the pass
//! and abandons whatever is still pending.

use super::{
    ConfigStatus, ConfigStep, Configuration, Device, PassStep, Progress, SentRecord,
    CONFIGURATIONS, SMS_SENT,
};
use crate::context::EngineContext;
use crate::error::{Result, TrackerError};
use crate::models::{Channel, CommandPlan, PlannedCommand, Verdict};
use chrono::{Local, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};

/// Per configuration credit once its command is on the wire
pub const SENT_CREDIT: f64 = 0.5;
/// Per configuration credit once the device confirmed it
pub const CONFIRMED_CREDIT: f64 = 1.0;

/// `(planned - remaining + credit) / planned`, as a percentage
pub fn progress_percent(planned: usize, remaining: usize, credit: f64) -> u8 {
    if planned == 0 {
        return 100;
    }
    let done = planned.saturating_sub(remaining) as f64 + credit;
    (done / planned as f64 * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Wall clock as shown in status texts
pub(crate) fn clock() -> String {
    Local::now().format("%H:%M - %d/%m").to_string()
}

pub struct ConfigReconciler<'a> {
    device: &'a mut Device,
    ctx: &'a EngineContext,
}

impl<'a> ConfigReconciler<'a> {
    pub fn new(device: &'a mut Device, ctx: &'a EngineContext) -> Self {
        Self { device, ctx }
    }

    /// Replace the configuration intent with the stored one, then check it
    pub async fn load_configurations(&mut self) -> Result<()> {
        let docs = self
            .ctx
            .store
            .collection(self.device.subcollection(CONFIGURATIONS))
            .list()
            .await?;
        let mut configurations = Vec::with_capacity(docs.len());
        for (id, doc) in docs {
            match serde_json::from_value::<Configuration>(doc) {
                Ok(mut config) => {
                    if config.name.is_empty() {
                        config.name = id;
                    }
                    configurations.push(config);
                },
                Err(e) => warn!(
                    "Tracker {}: skipping configuration {}: {}",
                    self.device.name(),
                    id,
                    e
                ),
            }
        }
        self.device.set_configurations(configurations);
        self.evaluate().await
    }

    /// Start a pass when one is due
    pub async fn check_configurations(&mut self) -> Result<()> {
        if self.device.configurations.is_empty() {
            debug!(
                "Tracker {} has no configuration yet, requesting from store",
                self.device.name()
            );
            return self.load_configurations().await;
        }
        self.evaluate().await
    }

    async fn evaluate(&mut self) -> Result<()> {
        let stale_after = self.ctx.reconcile.stale_after();
        let stale = self.device.progress().is_some_and(|progress| {
            progress.step == PassStep::Pending
                && (Utc::now() - progress.datetime)
                    .to_std()
                    .is_ok_and(|age| age > stale_after)
        });
        if stale {
            info!(
                "Tracker {}: configuration pass went stale, restarting",
                self.device.name()
            );
            let configurations = std::mem::take(&mut self.device.configurations);
            self.device.set_configurations(configurations);
        } else if self.device.planned.is_some() {
            debug!("Tracker {} is waiting for a confirmation", self.device.name());
            return Ok(());
        }

        let due = stale || !self.pass_running();
        if !due {
            debug!(
                "Tracker {} configuration is not currently required",
                self.device.name()
            );
            return Ok(());
        }

        if self.device.pending.is_empty() {
            if self.device.progress().is_none() {
                self.write_progress(self.finished(PassStep::Success, String::new()))
                    .await?;
            } else {
                debug!("Tracker {}: no updates required", self.device.name());
            }
            return Ok(());
        }

        let planned = self.device.pending.len();
        info!(
            "Tracker {}: starting configuration of {} item(s)",
            self.device.name(),
            planned
        );
        let description = format!("Configuração pendente desde {}", clock());
        for name in self.device.pending.clone() {
            if let Some(config) = self.device.config_mut(&name) {
                config.status = ConfigStatus {
                    step: ConfigStep::Pending,
                    description: description.clone(),
                    datetime: Some(Utc::now()),
                    finished: false,
                    command: None,
                };
            }
            self.persist_config(&name).await?;
        }
        self.write_progress(Progress {
            step: PassStep::Pending,
            description: "Preparando configurações para envio".to_string(),
            status: format!("Processo iniciado às {}", clock()),
            progress: 0,
            pending: planned,
            server: self.ctx.server.clone(),
            datetime: Utc::now(),
        })
        .await?;
        self.apply_configurations().await
    }

    /// Transmit the next command of the running pass, or close the pass
    pub async fn apply_configurations(&mut self) -> Result<()> {
        loop {
            if self.device.planned.is_some() || !self.pass_running() {
                return Ok(());
            }

            let plan = {
                let pending = self.device.pending_configs();
                self.device.model.model().plan_command(
                    &self.device.profile,
                    &pending,
                    &self.device.configurations,
                )
            };

            match plan {
                None => {
                    self.device.pending.clear();
                    return self.finish_pass().await;
                },
                Some(CommandPlan::ConfirmLocally { name, enabled }) => {
                    debug!(
                        "Tracker {}: {} needs no transmission",
                        self.device.name(),
                        name
                    );
                    self.accept(&[name], Some(enabled), None).await?;
                },
                Some(CommandPlan::Transmit(command)) => return self.transmit(command).await,
            }
        }
    }

    /// Apply an observed answer for `name`
    pub async fn confirm_configuration(
        &mut self,
        name: &str,
        enabled: bool,
        observed: &str,
    ) -> Result<()> {
        let Some(config) = self.device.config(name) else {
            debug!("Tracker {}: {} is not configured", self.device.name(), name);
            return Ok(());
        };
        if config.is_finished() {
            debug!(
                "Tracker {}: {} already finished, answer ignored",
                self.device.name(),
                name
            );
            return Ok(());
        }

        let names = [name.to_string()];
        match self.device.model.model().verdict(name, observed) {
            Verdict::Success { value } => {
                self.accept(&names, Some(enabled), value).await?;
                self.apply_configurations().await
            },
            Verdict::PasswordRefused => {
                self.fail(&names, format!("Dispositivo recusou a senha em {}", clock()))
                    .await
            },
            Verdict::DeviceFailure => {
                self.fail(&names, format!("Dispositivo indicou erro às {}", clock()))
                    .await
            },
            Verdict::Unrecognized => {
                warn!(
                    "Tracker {}: unrecognized answer for {}: {}",
                    self.device.name(),
                    name,
                    observed
                );
                Ok(())
            },
        }
    }

    /// Apply an echo acknowledgement
    pub async fn confirm_command(&mut self, tag: &str) -> Result<()> {
        let Some(planned) = self.device.planned.as_ref() else {
            debug!(
                "Tracker {}: acknowledgement {} with no outstanding command",
                self.device.name(),
                tag
            );
            return Ok(());
        };
        if !planned
            .tag
            .as_deref()
            .is_some_and(|expected| expected.eq_ignore_ascii_case(tag))
        {
            debug!(
                "Tracker {}: acknowledgement {} does not match {:?}",
                self.device.name(),
                tag,
                planned.tag
            );
            return Ok(());
        }
        let names = planned.names.clone();
        self.accept(&names, None, None).await?;
        self.device.planned = None;
        self.apply_configurations().await
    }

    /// A delivery report reached the outstanding command
    pub async fn note_delivery(&mut self) -> Result<()> {
        if self.device.planned.is_none() {
            return Ok(());
        }
        let credit = self.outstanding_credit(SENT_CREDIT);
        self.update_progress(credit, format!("Configuração recebida em {}", clock()))
            .await
    }

    /// End the pass with the outstanding configuration in ERROR
    ///
    /// Returns false when nothing was pending.
    pub async fn fail_outstanding(&mut self, description: String) -> Result<bool> {
        let names = match &self.device.planned {
            Some(planned) => planned.names.clone(),
            None => match self.device.pending.first() {
                Some(name) => vec![name.clone()],
                None => return Ok(false),
            },
        };
        self.fail(&names, description).await?;
        Ok(true)
    }

    /// Send an SMS to the device and record it under `SMS_Sent`
    pub async fn send_sms(&mut self, text: &str) -> Result<()> {
        let recipient = self.device.profile.identification.clone();
        if recipient.is_empty() {
            return Err(TrackerError::transport(format!(
                "tracker {} has no phone number",
                self.device.name()
            )));
        }
        let sent = self.ctx.sms.send_sms(&recipient, text).await?;
        let record = json!({
            "server": self.ctx.server,
            "from": self.ctx.sms.phone_number(),
            "to": recipient,
            "text": text,
            "reference": sent.reference,
            "sentTime": Utc::now(),
            "receivedTime": null,
            "status": "ENROUTE",
        });
        match self
            .ctx
            .store
            .collection(self.device.subcollection(SMS_SENT))
            .add(record)
            .await
        {
            Ok(doc_id) => {
                self.device.sent.insert(
                    sent.reference,
                    SentRecord {
                        doc_id,
                        text: text.to_string(),
                    },
                );
            },
            Err(e) => warn!(
                "Tracker {}: failed to record sent SMS: {}",
                self.device.name(),
                e
            ),
        }
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn transmit(&mut self, command: PlannedCommand) -> Result<()> {
        debug!(
            "Executing tracker {} config {:?}: {}",
            self.device.name(),
            command.names,
            command.text
        );
        let outcome = match self.device.model.model().channel() {
            Channel::Sms => self.send_sms(&command.text).await,
            Channel::Tcp => match self.device.tcp() {
                Some(link) => link.write(&command.text),
                None => Err(TrackerError::link_closed(format!(
                    "tracker {} has no connection",
                    self.device.name()
                ))),
            },
        };
        if let Err(e) = outcome {
            error!(
                "Tracker {} config {:?} failed: {}",
                self.device.name(),
                command.names,
                e
            );
            return self
                .fail(
                    &command.names,
                    format!("Falha no envio ocorrida às {}", clock()),
                )
                .await;
        }

        let description = format!("Configuração enviada às {}", clock());
        for name in &command.names {
            if let Some(config) = self.device.config_mut(name) {
                config.status = ConfigStatus {
                    step: ConfigStep::Sent,
                    description: description.clone(),
                    datetime: Some(Utc::now()),
                    finished: false,
                    command: Some(command.text.clone()),
                };
            }
            self.persist_config(name).await?;
        }
        let credit = SENT_CREDIT * command.names.len() as f64;
        self.device.planned = Some(command);
        self.update_progress(credit, description).await
    }

    /// Mark `names` SUCCESS and drop them from the pass
    async fn accept(
        &mut self,
        names: &[String],
        enabled: Option<bool>,
        value: Option<String>,
    ) -> Result<()> {
        let mut in_pass = 0;
        let mut last_description = String::new();
        for name in names {
            let counted = self.device.pending.contains(name);
            let Some(config) = self.device.config_mut(name) else {
                continue;
            };
            if config.status.step == ConfigStep::Success {
                continue;
            }
            if let Some(enabled) = enabled {
                config.enabled = enabled;
            }
            if let Some(value) = &value {
                config.value = Some(value.clone());
            }
            last_description = format!(
                "Configuração {} às {}",
                if config.enabled {
                    "ativada"
                } else {
                    "desativada"
                },
                clock()
            );
            config.status = ConfigStatus {
                step: ConfigStep::Success,
                description: last_description.clone(),
                datetime: Some(Utc::now()),
                finished: true,
                command: config.status.command.take(),
            };
            if counted {
                in_pass += 1;
            }
            self.persist_config(name).await?;
        }

        if in_pass > 0 {
            // counted before the names leave the pending list
            self.update_progress(CONFIRMED_CREDIT * in_pass as f64, last_description)
                .await?;
        }
        self.device.settle(names);
        Ok(())
    }

    async fn fail(&mut self, names: &[String], description: String) -> Result<()> {
        warn!(
            "Tracker {}: {:?} failed: {}",
            self.device.name(),
            names,
            description
        );
        for name in names {
            if let Some(config) = self.device.config_mut(name) {
                config.status = ConfigStatus {
                    step: ConfigStep::Error,
                    description: description.clone(),
                    datetime: Some(Utc::now()),
                    finished: true,
                    command: config.status.command.take(),
                };
            }
            self.persist_config(name).await?;
        }
        self.device.abandon();
        self.finish_pass().await
    }

    async fn finish_pass(&mut self) -> Result<()> {
        if !self.pass_running() {
            return Ok(());
        }
        let failed = self
            .device
            .configurations
            .iter()
            .find(|c| c.status.step == ConfigStep::Error)
            .map(|c| c.status.description.clone());
        let progress = match failed {
            Some(status) => self.finished(PassStep::Error, status),
            None => self.finished(PassStep::Success, String::new()),
        };
        info!(
            "Tracker {}: configuration finished with {:?}",
            self.device.name(),
            progress.step
        );
        self.write_progress(progress).await
    }

    fn finished(&self, step: PassStep, status: String) -> Progress {
        let previous = self.device.progress();
        let (description, status, percent) = match step {
            PassStep::Error => (
                "Erro ao configurar rastreador".to_string(),
                status,
                previous.map_or(0, |p| p.progress),
            ),
            _ => (
                "Configuração bem sucedida".to_string(),
                format!("Processo finalizado às {}", clock()),
                100,
            ),
        };
        Progress {
            step,
            description,
            status,
            progress: percent,
            pending: previous.map_or(0, |p| p.pending),
            server: self.ctx.server.clone(),
            datetime: Utc::now(),
        }
    }

    fn pass_running(&self) -> bool {
        self.device
            .progress()
            .is_some_and(|p| p.step == PassStep::Pending)
    }

    fn outstanding_credit(&self, per_name: f64) -> f64 {
        let names = self
            .device
            .planned
            .as_ref()
            .map_or(0, |planned| planned.names.len());
        per_name * names as f64
    }

    async fn update_progress(&mut self, credit: f64, status: String) -> Result<()> {
        let Some(current) = self
            .device
            .progress()
            .filter(|p| p.step == PassStep::Pending && p.pending > 0)
        else {
            return Ok(());
        };
        let percent = progress_percent(current.pending, self.device.pending.len(), credit);
        let progress = Progress {
            step: PassStep::Pending,
            description: "Aplicando configurações".to_string(),
            status,
            progress: percent,
            pending: current.pending,
            server: self.ctx.server.clone(),
            datetime: Utc::now(),
        };
        debug!(
            "Tracker {} configuration at {}%",
            self.device.name(),
            percent
        );
        self.write_progress(progress).await
    }

    async fn write_progress(&mut self, progress: Progress) -> Result<()> {
        let fields = json!({
            "lastConfiguration": progress,
            "lastUpdate": Utc::now(),
        });
        self.ctx
            .store
            .doc(self.device.path())
            .set(fields, true)
            .await?;
        self.device.profile.last_configuration = Some(progress);
        Ok(())
    }

    async fn persist_config(&self, name: &str) -> Result<()> {
        let Some(config) = self.device.config(name) else {
            return Ok(());
        };
        let doc = serde_json::to_value(config)?;
        self.ctx
            .store
            .collection(self.device.subcollection(CONFIGURATIONS))
            .doc(name)
            .set(doc, false)
            .await
    }
}
