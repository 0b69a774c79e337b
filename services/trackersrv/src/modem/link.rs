//! Serial modem link
//!
//! Binds a [`CommandQueue`] and a [`PduCodec`] to one serial byte stream. The
//! link bootstraps the modem, turns unsolicited notifications into
//! [`ModemEvent`]s and sends SMS through the `AT+CMGS` prompt sequence. A link
//! never reopens itself: once closed, the owner builds a new one.

use super::codec::LineBuffer;
use super::queue::{CommandQueue, CommandTimeout, LineOutcome, OnComplete, Terminator};
use super::response::{self, MemoryUsage, StoreSlot, SysInfo};
use crate::config::ModemConfig;
use crate::error::{Result, TrackerError};
use crate::sms::{AssemblyLimits, DeliveryReport, PduCodec, PduMessage, PduUnit};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Vendor notification prefixes; never taken as command output
pub const UNSOLICITED_TAGS: &[&str] = &[
    "+CMTI",
    "+CDSI",
    "+CDS:",
    "+CLIP",
    "+CREG",
    "^SMMEMFULL",
    "^SYSINFO",
];

const BOOTSTRAP: &[&str] = &[
    "ATZ",
    "ATE0",
    "AT+CFUN=1",
    "AT+CMGF=0",
    "AT+CMEE=2",
    "AT+CREG=1",
    "AT+CSMP=49,167,0,0",
];
const RESET: &[&str] = &["AT+CFUN=0,1", "AT+CFUN=1,1"];
const DELETE_ALL: &str = "AT+CMGD=1,4";
const CTRL_Z: char = '\u{1a}';

/// Event feed of one link
#[derive(Debug, Clone, PartialEq)]
pub enum ModemEvent {
    /// Bootstrap finished
    Ready {
        manufacturer: String,
        phone_number: Option<String>,
    },
    /// Complete (reassembled) message
    MessageReceived(PduMessage),
    DeliveryReport(DeliveryReport),
    /// Incoming call, with the caller id
    Ring(String),
    MemoryFull,
    DeviceInfo(SysInfo),
    /// Sent exactly once per link
    LinkClosed(String),
}

/// Outcome of [`ModemLink::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Reference of the first unit; delivery reports carry it
    pub reference: u8,
    pub references: Vec<u8>,
}

#[derive(Debug, Default)]
struct LinkInfo {
    manufacturer: Option<String>,
    phone_number: Option<String>,
    sys_info: Option<SysInfo>,
}

struct LinkInner {
    queue: CommandQueue,
    codec: Mutex<PduCodec>,
    events: mpsc::UnboundedSender<ModemEvent>,
    config: ModemConfig,
    info: Mutex<LinkInfo>,
    /// `+CDS:` seen; the next line is the status report PDU
    awaiting_report: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct ModemLink {
    inner: Arc<LinkInner>,
}

enum SlotKind {
    Message,
    Report,
}

impl ModemLink {
    /// Open the configured serial port
    ///
    /// An open failure is reported as the single `LinkClosed` event of a link
    /// that is already closed.
    pub fn open(
        config: ModemConfig,
        limits: AssemblyLimits,
        reset: bool,
    ) -> (Self, mpsc::UnboundedReceiver<ModemEvent>) {
        match tokio_serial::new(&config.port, config.baud_rate).open_native_async() {
            Ok(port) => {
                info!("Modem port {} opened at {} baud", config.port, config.baud_rate);
                Self::attach(port, config, limits, reset)
            },
            Err(e) => {
                let reason = format!("Failed to open serial port {}: {}", config.port, e);
                error!("{}", reason);
                let (link, _writes, events) = Self::build(config, limits);
                link.close(&reason);
                (link, events)
            },
        }
    }

    /// Run the link over an already open byte stream
    pub fn attach<S>(
        stream: S,
        config: ModemConfig,
        limits: AssemblyLimits,
        reset: bool,
    ) -> (Self, mpsc::UnboundedReceiver<ModemEvent>)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (link, writes, events) = Self::build(config, limits);
        let (reader, writer) = tokio::io::split(stream);
        tokio::spawn(link.clone().write_loop(writer, writes));
        tokio::spawn(link.clone().read_loop(reader));
        link.bootstrap(reset);
        (link, events)
    }

    fn build(
        config: ModemConfig,
        limits: AssemblyLimits,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedReceiver<ModemEvent>,
    ) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let queue = CommandQueue::new(write_tx, config.command_timeout(), UNSOLICITED_TAGS);
        let codec = PduCodec::new(config.validity_secs, limits);
        let link = Self {
            inner: Arc::new(LinkInner {
                queue,
                codec: Mutex::new(codec),
                events: event_tx,
                config,
                info: Mutex::new(LinkInfo::default()),
                awaiting_report: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        };
        (link, write_rx, event_rx)
    }

    fn downgrade(&self) -> Weak<LinkInner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(weak: &Weak<LinkInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    async fn write_loop<W>(self, mut writer: W, mut writes: mpsc::UnboundedReceiver<String>)
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            let line = tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                line = writes.recv() => line,
            };
            let Some(line) = line else { break };

            let written = async {
                writer.write_all(line.as_bytes()).await?;
                writer.flush().await
            }
            .await;
            if let Err(e) = written {
                self.close(&format!("Serial write failed: {}", e));
                break;
            }
        }
    }

    async fn read_loop<R>(self, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = LineBuffer::new(self.inner.config.max_line_len);
        let mut buf = vec![0u8; 1024];
        loop {
            let read = tokio::select! {
                _ = self.inner.cancel.cancelled() => return,
                read = reader.read(&mut buf) => read,
            };
            match read {
                Ok(0) => {
                    self.close("Serial port closed");
                    return;
                },
                Ok(n) => {
                    lines.extend(&buf[..n]);
                    while let Some(line) = lines.next_line() {
                        self.handle_line(&line);
                    }
                },
                Err(e) => {
                    self.close(&format!("Serial read failed: {}", e));
                    return;
                },
            }
        }
    }

    fn bootstrap(&self, reset: bool) {
        let queue = &self.inner.queue;
        for command in BOOTSTRAP {
            queue.execute(*command, None, false, CommandTimeout::Default);
        }

        let weak = self.downgrade();
        queue.execute(
            "AT+CGMI",
            Some(Box::new(move |reply| {
                let Some(link) = Self::upgrade(&weak) else { return };
                if matches!(reply.terminator, Terminator::Closed(_)) {
                    return;
                }
                let manufacturer = reply.data.join(" ");
                let notify = if manufacturer.to_ascii_lowercase().contains("huawei") {
                    "AT+CNMI=2,1,0,2,0"
                } else {
                    "AT+CNMI=2,1,0,1,0"
                };
                link.inner
                    .queue
                    .execute(notify, None, false, CommandTimeout::Default);
                link.inner.info.lock().manufacturer = Some(manufacturer);
            })),
            false,
            CommandTimeout::Default,
        );

        let weak = self.downgrade();
        queue.execute(
            "AT+CNUM",
            Some(Box::new(move |reply| {
                let Some(link) = Self::upgrade(&weak) else { return };
                if matches!(reply.terminator, Terminator::Closed(_)) {
                    return;
                }
                let phone_number =
                    response::own_number(&reply.data, &link.inner.config.country_code);
                match &phone_number {
                    Some(number) => info!("Modem successfully initialized: {}", number),
                    None => error!("Error retrieving phone number: {:?}", reply.data),
                }
                let manufacturer = {
                    let mut info = link.inner.info.lock();
                    info.phone_number = phone_number.clone();
                    info.manufacturer.clone().unwrap_or_default()
                };
                link.emit(ModemEvent::Ready {
                    manufacturer,
                    phone_number,
                });
            })),
            false,
            CommandTimeout::Default,
        );

        if reset {
            warn!("Modem reset requested, initializing");
            for command in RESET {
                queue.execute(*command, None, false, CommandTimeout::Default);
            }
        }

        // Caller id for ring events
        queue.execute("AT+CLIP=1", None, false, CommandTimeout::Default);
    }

    fn handle_line(&self, line: &str) {
        debug!("Modem -> [{}]", line);
        if self.inner.awaiting_report.swap(false, Ordering::SeqCst) {
            self.process_report(line, None);
            return;
        }
        if let LineOutcome::Unsolicited(line) = self.inner.queue.accept_line(line) {
            self.on_unsolicited(&line);
        }
    }

    fn on_unsolicited(&self, line: &str) {
        if line.starts_with("+CMTI") || line.starts_with("+CDSI") {
            let kind = if line.starts_with("+CMTI") {
                SlotKind::Message
            } else {
                SlotKind::Report
            };
            match StoreSlot::parse(line) {
                Some(slot) => self.read_slot(slot, kind),
                None => warn!("Unparsable store notification: {}", line),
            }
        } else if line.starts_with("+CDS:") {
            self.inner.awaiting_report.store(true, Ordering::SeqCst);
        } else if line.starts_with("+CLIP") {
            let caller = response::parse_response(line)
                .into_iter()
                .next()
                .unwrap_or_default();
            self.emit(ModemEvent::Ring(caller));
        } else if line.starts_with("^SMMEMFULL") {
            self.on_memory_full();
        } else if line.starts_with("^SYSINFO") {
            let info = SysInfo::parse(line);
            self.inner.info.lock().sys_info = Some(info.clone());
            self.emit(ModemEvent::DeviceInfo(info));
        } else if line.starts_with("+CREG") {
            debug!("Network registration changed: {}", line);
        } else {
            debug!("Unsolicited modem line ignored: {}", line);
        }
    }

    fn read_slot(&self, slot: StoreSlot, kind: SlotKind) {
        let queue = &self.inner.queue;

        let weak = self.downgrade();
        queue.execute(
            format!("AT+CPMS=\"{}\"", slot.memory),
            Some(Box::new(move |reply| {
                let Some(link) = Self::upgrade(&weak) else { return };
                let usage = reply.line_with("+CPMS").and_then(MemoryUsage::parse);
                if usage.is_some_and(|usage| usage.is_full()) {
                    link.on_memory_full();
                }
            })),
            false,
            CommandTimeout::Default,
        );

        let weak = self.downgrade();
        let index = slot.index;
        queue.execute(
            format!("AT+CMGR={}", index),
            Some(Box::new(move |reply| {
                let Some(link) = Self::upgrade(&weak) else { return };
                if !reply.is_ok() {
                    warn!("Reading store slot {} failed: {}", index, reply.terminator);
                    return;
                }
                let Some(raw) = line_after(&reply.data, "+CMGR") else {
                    warn!("Store slot {} is empty", index);
                    return;
                };
                match kind {
                    SlotKind::Message => link.process_message(raw, index),
                    SlotKind::Report => link.process_report(raw, Some(index)),
                }
            })),
            false,
            CommandTimeout::Default,
        );
    }

    fn process_message(&self, raw: &str, index: u32) {
        match PduCodec::decode(raw) {
            Ok(message) => self.accept_message(message.with_index(index)),
            Err(e) => warn!("Dropping malformed PDU in slot {}: {}", index, e),
        }
    }

    fn accept_message(&self, message: PduMessage) {
        let (assembled, evicted) = {
            let mut codec = self.inner.codec.lock();
            let mut evicted = codec.evict_expired();
            let assembled = codec.reassemble(message);
            evicted.extend(codec.take_evicted());
            (assembled, evicted)
        };
        for part in &evicted {
            self.delete_message(part);
        }
        if let Some(message) = assembled {
            self.emit(ModemEvent::MessageReceived(message));
        }
    }

    fn process_report(&self, raw: &str, index: Option<u32>) {
        match PduCodec::decode_status_report(raw) {
            Ok(report) => {
                let report = match index {
                    Some(index) => report.with_index(index),
                    None => report,
                };
                self.emit(ModemEvent::DeliveryReport(report));
            },
            Err(e) => warn!("Dropping malformed status report: {}", e),
        }
    }

    fn on_memory_full(&self) {
        self.emit(ModemEvent::MemoryFull);
        self.inner.queue.execute(
            DELETE_ALL,
            Some(Box::new(|reply| {
                info!("Modem memory full, erasing SMS: {}", reply.terminator);
            })),
            false,
            CommandTimeout::Default,
        );
    }

    fn emit(&self, event: ModemEvent) {
        if self.inner.events.send(event).is_err() {
            debug!("Modem event dropped, feed has no listener");
        }
    }

    // ========================================================================
    // Capability surface
    // ========================================================================

    /// Enqueue a raw command
    pub fn execute(
        &self,
        text: impl Into<String>,
        on_complete: Option<OnComplete>,
        priority: bool,
        timeout: CommandTimeout,
    ) -> u64 {
        self.inner.queue.execute(text, on_complete, priority, timeout)
    }

    /// Run a raw command and return its data lines
    pub async fn command(&self, text: &str) -> Result<Vec<String>> {
        self.inner
            .queue
            .submit(text, false, CommandTimeout::Default)
            .await
            .into_result(text)
    }

    /// Send `text` to `recipient`, one `AT+CMGS` round per unit
    ///
    /// Units after the first are issued from the previous unit's completion as
    /// priority commands, so parts of one message are never interleaved with
    /// other traffic.
    pub async fn send(&self, recipient: &str, text: &str) -> Result<SentMessage> {
        if self.is_closed() {
            return Err(TrackerError::link_closed("modem link is closed"));
        }
        let units = self
            .inner
            .codec
            .lock()
            .encode(text, recipient, self.inner.config.encoding)?;
        debug!("Sending {} unit(s) to {}", units.len(), recipient);

        let (tx, rx) = oneshot::channel();
        let transfer = Arc::new(Transfer {
            units,
            references: Mutex::new(Vec::new()),
            done: Mutex::new(Some(tx)),
        });
        send_unit(self.inner.queue.clone(), transfer, 0, false);

        rx.await
            .map_err(|_| TrackerError::link_closed("modem link dropped while sending"))?
    }

    /// Delete every store slot the message occupies
    pub fn delete_message(&self, message: &PduMessage) {
        self.delete_indexes(&message.raw_indexes);
    }

    pub fn delete_indexes(&self, indexes: &[u32]) {
        for index in indexes {
            self.inner.queue.execute(
                format!("AT+CMGD={}", index),
                None,
                false,
                CommandTimeout::Default,
            );
        }
    }

    /// Read every stored unit and feed it through the event feed
    ///
    /// Returns the number of listed slots.
    pub async fn list_messages(&self) -> Result<usize> {
        let data = self.command("AT+CMGL=4").await?;
        let mut listed = 0;
        let mut lines = data.iter();
        while let Some(line) = lines.next() {
            let Some(index) = response::listing_index(line) else {
                continue;
            };
            let Some(raw) = lines.next() else { break };
            listed += 1;
            match PduCodec::decode(raw) {
                Ok(message) => self.accept_message(message.with_index(index)),
                Err(_) => self.process_report(raw, Some(index)),
            }
        }
        Ok(listed)
    }

    /// Close the link; every queued command fails with `LinkClosed`
    pub fn close(&self, reason: &str) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("Modem link closed: {}", reason);
        self.inner.cancel.cancel();
        self.inner.queue.close(reason);
        self.emit(ModemEvent::LinkClosed(reason.to_string()));
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn error_counter(&self) -> u32 {
        self.inner.queue.error_counter()
    }

    pub fn reset_error_counter(&self) {
        self.inner.queue.reset_error_counter();
    }

    pub fn phone_number(&self) -> Option<String> {
        self.inner.info.lock().phone_number.clone()
    }

    pub fn manufacturer(&self) -> Option<String> {
        self.inner.info.lock().manufacturer.clone()
    }

    pub fn sys_info(&self) -> Option<SysInfo> {
        self.inner.info.lock().sys_info.clone()
    }

    pub fn pending_assemblies(&self) -> usize {
        self.inner.codec.lock().pending_assemblies()
    }
}

struct Transfer {
    units: Vec<PduUnit>,
    references: Mutex<Vec<u8>>,
    done: Mutex<Option<oneshot::Sender<Result<SentMessage>>>>,
}

impl Transfer {
    fn finish(&self, result: Result<SentMessage>) {
        if let Some(tx) = self.done.lock().take() {
            let _ = tx.send(result);
        }
    }
}

fn send_unit(queue: CommandQueue, transfer: Arc<Transfer>, index: usize, priority: bool) {
    let Some(unit) = transfer.units.get(index) else {
        return;
    };
    let total = transfer.units.len();
    let prepare = format!("AT+CMGS={}", unit.tpdu_len);
    let body = format!("{}{}", unit.hex, CTRL_Z);
    let body_queue = queue.clone();

    queue.execute(
        prepare,
        Some(Box::new(move |reply| {
            if reply.terminator != Terminator::Prompt {
                transfer.finish(Err(TrackerError::send(format!(
                    "unit {}/{} not accepted: {}",
                    index + 1,
                    total,
                    reply.terminator
                ))));
                return;
            }

            let next_queue = body_queue.clone();
            body_queue.execute(
                body,
                Some(Box::new(move |reply| {
                    if reply.terminator != Terminator::Ok {
                        transfer.finish(Err(TrackerError::send(format!(
                            "unit {}/{} failed: {}",
                            index + 1,
                            total,
                            reply.terminator
                        ))));
                        return;
                    }

                    let reference = reply
                        .line_with("+CMGS")
                        .and_then(|line| response::parse_response(line).first()?.parse().ok());
                    match reference {
                        Some(reference) => transfer.references.lock().push(reference),
                        None => warn!("No message reference for unit {}/{}", index + 1, total),
                    }

                    if index + 1 < total {
                        send_unit(next_queue, transfer, index + 1, true);
                        return;
                    }
                    let references = transfer.references.lock().clone();
                    match references.first() {
                        Some(&reference) => transfer.finish(Ok(SentMessage {
                            reference,
                            references,
                        })),
                        None => transfer.finish(Err(TrackerError::send(
                            "modem returned no message reference",
                        ))),
                    }
                })),
                true,
                CommandTimeout::Default,
            );
        })),
        priority,
        CommandTimeout::Default,
    );
}

/// Line following the `tag` header in a read response
fn line_after<'a>(data: &'a [String], tag: &str) -> Option<&'a str> {
    let pos = data.iter().position(|line| line.starts_with(tag))?;
    data.get(pos + 1).map(String::as_str)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    const DELIVER: &str = "07917283010010F5040BC87238880900F10000620141214365800AE8329BFD4697D9EC37";
    const REPORT: &str = "00062A0C91557699085324620141214365806201412153658000";

    /// Scripted modem on the far end of a duplex pipe
    struct FakeModem {
        commands: Arc<Mutex<Vec<String>>>,
        inject: mpsc::UnboundedSender<String>,
    }

    impl FakeModem {
        fn spawn(stream: DuplexStream) -> Self {
            let commands = Arc::new(Mutex::new(Vec::new()));
            let (inject, mut injected) = mpsc::unbounded_channel::<String>();
            let seen = commands.clone();
            tokio::spawn(async move {
                let (mut reader, mut writer) = tokio::io::split(stream);
                let mut pending = Vec::new();
                let mut buf = [0u8; 512];
                let mut reference = 0u8;
                loop {
                    tokio::select! {
                        Some(text) = injected.recv() => {
                            if writer.write_all(text.as_bytes()).await.is_err() { return; }
                        }
                        read = reader.read(&mut buf) => {
                            let n = match read { Ok(0) | Err(_) => return, Ok(n) => n };
                            pending.extend_from_slice(&buf[..n]);
                            while let Some(pos) = pending.iter().position(|b| *b == b'\r') {
                                let line: Vec<u8> = pending.drain(..=pos).collect();
                                let command = String::from_utf8_lossy(&line[..line.len() - 1]).to_string();
                                seen.lock().push(command.clone());
                                let reply = if command == "AT+CGMI" {
                                    "\r\nhuawei\r\n\r\nOK\r\n".to_string()
                                } else if command == "AT+CNUM" {
                                    "\r\n+CNUM: \"\",\"+5567991234567\",145\r\n\r\nOK\r\n".to_string()
                                } else if command.starts_with("AT+CMGS=") {
                                    "\r\n> ".to_string()
                                } else if command.ends_with(CTRL_Z) {
                                    reference += 1;
                                    format!("\r\n+CMGS: {}\r\n\r\nOK\r\n", reference)
                                } else if command.starts_with("AT+CPMS") {
                                    "\r\n+CPMS: 1,30,1,30,1,30\r\n\r\nOK\r\n".to_string()
                                } else if command == "AT+CMGR=3" {
                                    format!("\r\n+CMGR: 0,,27\r\n{}\r\n\r\nOK\r\n", DELIVER)
                                } else {
                                    "\r\nOK\r\n".to_string()
                                };
                                if writer.write_all(reply.as_bytes()).await.is_err() { return; }
                            }
                        }
                    }
                }
            });
            Self { commands, inject }
        }

        fn commands(&self) -> Vec<String> {
            self.commands.lock().clone()
        }
    }

    fn attach() -> (ModemLink, mpsc::UnboundedReceiver<ModemEvent>, FakeModem) {
        let (ours, theirs) = tokio::io::duplex(8192);
        let fake = FakeModem::spawn(theirs);
        let (link, events) =
            ModemLink::attach(ours, ModemConfig::default(), AssemblyLimits::default(), false);
        (link, events, fake)
    }

    async fn next_event<F>(events: &mut mpsc::UnboundedReceiver<ModemEvent>, mut pred: F) -> ModemEvent
    where
        F: FnMut(&ModemEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_bootstrap_sequence() {
        let (link, mut events, fake) = attach();
        let ready = next_event(&mut events, |e| matches!(e, ModemEvent::Ready { .. })).await;
        assert_eq!(
            ready,
            ModemEvent::Ready {
                manufacturer: "huawei".to_string(),
                phone_number: Some("67991234567".to_string()),
            }
        );
        assert_eq!(link.phone_number().as_deref(), Some("67991234567"));

        let commands = fake.commands();
        assert_eq!(&commands[..BOOTSTRAP.len()], BOOTSTRAP);
        assert_eq!(commands[BOOTSTRAP.len()], "AT+CGMI");
        assert_eq!(commands[BOOTSTRAP.len() + 1], "AT+CNUM");
    }

    #[tokio::test]
    async fn test_multipart_send_is_not_interleaved() {
        let (link, mut events, fake) = attach();
        next_event(&mut events, |e| matches!(e, ModemEvent::Ready { .. })).await;

        // 150 UCS2 units need three parts
        let text = "x".repeat(150);
        let sender = link.clone();
        let send = tokio::spawn(async move { sender.send("+5567998035423", &text).await });
        link.execute("AT+CSQ", None, false, CommandTimeout::Default);

        let sent = send.await.unwrap().unwrap();
        assert_eq!(sent.references.len(), 3);
        assert_eq!(sent.reference, sent.references[0]);

        let commands = fake.commands();
        let first = commands.iter().position(|c| c.starts_with("AT+CMGS=")).unwrap();
        let chain = &commands[first..first + 6];
        for pair in chain.chunks(2) {
            assert!(pair[0].starts_with("AT+CMGS="));
            assert!(pair[1].ends_with(CTRL_Z));
        }
    }

    #[tokio::test]
    async fn test_new_message_read_from_store() {
        let (_link, mut events, fake) = attach();
        next_event(&mut events, |e| matches!(e, ModemEvent::Ready { .. })).await;

        fake.inject.send("\r\n+CMTI: \"SM\",3\r\n".to_string()).unwrap();
        let event = next_event(&mut events, |e| matches!(e, ModemEvent::MessageReceived(_))).await;
        let ModemEvent::MessageReceived(message) = event else { unreachable!() };
        assert_eq!(message.text, "hellohello");
        assert_eq!(message.raw_indexes, vec![3]);
        assert!(fake.commands().contains(&"AT+CPMS=\"SM\"".to_string()));
    }

    #[tokio::test]
    async fn test_status_report_on_following_line() {
        let (_link, mut events, fake) = attach();
        next_event(&mut events, |e| matches!(e, ModemEvent::Ready { .. })).await;

        fake.inject
            .send(format!("\r\n+CDS: 25\r\n{}\r\n", REPORT))
            .unwrap();
        let event = next_event(&mut events, |e| matches!(e, ModemEvent::DeliveryReport(_))).await;
        let ModemEvent::DeliveryReport(report) = event else { unreachable!() };
        assert_eq!(report.reference, 42);
        assert!(report.is_delivered());
        assert!(report.raw_indexes.is_empty());
    }

    #[tokio::test]
    async fn test_memory_full_deletes_all() {
        let (_link, mut events, fake) = attach();
        next_event(&mut events, |e| matches!(e, ModemEvent::Ready { .. })).await;

        fake.inject.send("\r\n^SMMEMFULL: \"SM\"\r\n".to_string()).unwrap();
        next_event(&mut events, |e| matches!(e, ModemEvent::MemoryFull)).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while !fake.commands().contains(&DELETE_ALL.to_string()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_stream_end_closes_link_once() {
        let (ours, theirs) = tokio::io::duplex(1024);
        drop(theirs);
        let (link, mut events) =
            ModemLink::attach(ours, ModemConfig::default(), AssemblyLimits::default(), false);

        let event = next_event(&mut events, |_| true).await;
        assert!(matches!(event, ModemEvent::LinkClosed(_)));
        assert!(link.is_closed());

        let result = link.send("+5511", "ping").await;
        assert!(matches!(result, Err(TrackerError::LinkClosed(_))));
        link.close("again");
        assert!(events.try_recv().is_err());
    }
}
