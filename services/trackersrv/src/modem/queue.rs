//! AT command queue
//!
//! Serializes commands over the half-duplex modem link. At most one command is
//! in flight; the next one is only written once the current one completes,
//! times out or the queue is closed. The in-flight slot is released before the
//! completion callback runs, so a callback that executes a priority command
//! gets it written next.

use crate::error::{Result, TrackerError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(50);

/// Added to the error counter when a command times out
pub const TIMEOUT_PENALTY: u32 = 3;
/// Added to the error counter when a command ends with an error line
pub const ERROR_PENALTY: u32 = 1;

/// Per-command timeout selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandTimeout {
    /// The queue default
    #[default]
    Default,
    After(Duration),
    /// Never time out
    Disabled,
}

/// How a command ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Ok,
    /// Line matching `error` (e.g. `+CMS ERROR: 500`)
    Error(String),
    /// The `>` prompt asking for a PDU body
    Prompt,
    Timeout,
    /// Queue closed before or while the command ran
    Closed(String),
}

impl std::fmt::Display for Terminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Terminator::Ok => write!(f, "OK"),
            Terminator::Error(line) => write!(f, "{}", line),
            Terminator::Prompt => write!(f, ">"),
            Terminator::Timeout => write!(f, "timeout"),
            Terminator::Closed(reason) => write!(f, "link closed: {}", reason),
        }
    }
}

/// Accumulated data lines plus terminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub data: Vec<String>,
    pub terminator: Terminator,
}

impl CommandResponse {
    fn timeout() -> Self {
        Self {
            data: vec!["timeout".to_string()],
            terminator: Terminator::Timeout,
        }
    }

    fn closed(reason: &str) -> Self {
        Self {
            data: Vec::new(),
            terminator: Terminator::Closed(reason.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.terminator, Terminator::Ok | Terminator::Prompt)
    }

    /// First data line starting with `prefix`
    pub fn line_with(&self, prefix: &str) -> Option<&str> {
        self.data
            .iter()
            .map(String::as_str)
            .find(|line| line.starts_with(prefix))
    }

    /// Map non-success terminators onto the error taxonomy
    pub fn into_result(self, command: &str) -> Result<Vec<String>> {
        match self.terminator {
            Terminator::Ok | Terminator::Prompt => Ok(self.data),
            Terminator::Error(line) => Err(TrackerError::transport(format!("{}: {}", command, line))),
            Terminator::Timeout => Err(TrackerError::transport_timeout(command.to_string())),
            Terminator::Closed(reason) => Err(TrackerError::link_closed(reason)),
        }
    }
}

pub type OnComplete = Box<dyn FnOnce(CommandResponse) + Send + 'static>;

/// A queued command
pub struct Command {
    pub id: u64,
    pub text: String,
    pub enqueued_at: Instant,
    pub executed_at: Option<Instant>,
    pub timeout: Option<Duration>,
    pub priority: bool,
    on_complete: Option<OnComplete>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("text", &self.text)
            .field("timeout", &self.timeout)
            .field("priority", &self.priority)
            .finish()
    }
}

/// What the queue did with an incoming line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Echo, blank line, vendor notice or stray terminator
    Ignored,
    /// Appended to the in-flight command's data
    Accumulated,
    Completed(Terminator),
    /// Not part of any command; goes to the event feed
    Unsolicited(String),
}

struct QueueState {
    pending: VecDeque<Command>,
    in_flight: Option<Command>,
    next_id: u64,
    error_counter: u32,
    data: Vec<String>,
    timer: Option<JoinHandle<()>>,
    closed: Option<String>,
}

struct Inner {
    state: Mutex<QueueState>,
    writer: mpsc::UnboundedSender<String>,
    default_timeout: Duration,
    unsolicited: &'static [&'static str],
}

/// Shared handle to one modem's command queue
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<Inner>,
}

impl CommandQueue {
    /// `writer` receives each command text already terminated with `\r`;
    /// lines starting with an `unsolicited` prefix are never taken as command output.
    pub fn new(
        writer: mpsc::UnboundedSender<String>,
        default_timeout: Duration,
        unsolicited: &'static [&'static str],
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    in_flight: None,
                    next_id: 1,
                    error_counter: 0,
                    data: Vec::new(),
                    timer: None,
                    closed: None,
                }),
                writer,
                default_timeout,
                unsolicited,
            }),
        }
    }

    /// Enqueue a command; never blocks
    ///
    /// Priority commands are prepended. Returns the command id.
    pub fn execute(
        &self,
        text: impl Into<String>,
        on_complete: Option<OnComplete>,
        priority: bool,
        timeout: CommandTimeout,
    ) -> u64 {
        let text = text.into();
        let timeout = match timeout {
            CommandTimeout::Default => Some(self.inner.default_timeout),
            CommandTimeout::After(d) => Some(d),
            CommandTimeout::Disabled => None,
        };

        let mut state = self.inner.state.lock();
        let id = state.next_id;
        state.next_id += 1;

        if let Some(reason) = state.closed.clone() {
            drop(state);
            debug!("Modem queue closed, rejecting [{}]", text);
            if let Some(callback) = on_complete {
                callback(CommandResponse::closed(&reason));
            }
            return id;
        }

        let command = Command {
            id,
            text,
            enqueued_at: Instant::now(),
            executed_at: None,
            timeout,
            priority,
            on_complete,
        };
        if priority {
            state.pending.push_front(command);
        } else {
            state.pending.push_back(command);
        }
        drop(state);

        self.dispatch_next();
        id
    }

    /// Enqueue and wait for the response
    pub async fn submit(
        &self,
        text: impl Into<String>,
        priority: bool,
        timeout: CommandTimeout,
    ) -> CommandResponse {
        let (tx, rx) = oneshot::channel();
        self.execute(
            text,
            Some(Box::new(move |response| {
                let _ = tx.send(response);
            })),
            priority,
            timeout,
        );
        rx.await
            .unwrap_or_else(|_| CommandResponse::closed("command queue dropped"))
    }

    fn dispatch_next(&self) {
        let mut state = self.inner.state.lock();
        if state.in_flight.is_some() || state.closed.is_some() {
            return;
        }
        let Some(mut command) = state.pending.pop_front() else {
            return;
        };

        command.executed_at = Some(Instant::now());
        let id = command.id;
        let line = format!("{}\r", command.text);
        trace!(
            "Modem command {} waited {:?}",
            id,
            command.enqueued_at.elapsed()
        );
        debug!("Modem <- [{}]", command.text);

        if let Some(after) = command.timeout {
            let weak = Arc::downgrade(&self.inner);
            state.timer = Some(tokio::spawn(fire_timeout(weak, id, after)));
        }
        state.data.clear();
        state.in_flight = Some(command);

        // Written under the lock so transmission order matches dispatch order
        let written = self.inner.writer.send(line).is_ok();
        drop(state);

        if !written {
            self.close("transport writer closed");
        }
    }

    /// Classify one line read from the modem
    pub fn accept_line(&self, line: &str) -> LineOutcome {
        let line = line.trim();
        if line.is_empty() {
            return LineOutcome::Ignored;
        }

        let mut state = self.inner.state.lock();
        let body = match &state.in_flight {
            Some(command) => match strip_echo(command.text.trim(), line) {
                Some(rest) => rest,
                None => return LineOutcome::Ignored,
            },
            None => line,
        };

        if self.inner.unsolicited.iter().any(|p| body.starts_with(p)) {
            return LineOutcome::Unsolicited(body.to_string());
        }

        let terminator = classify_terminator(body);
        if state.in_flight.is_none() {
            return match terminator {
                Some(_) => LineOutcome::Ignored,
                None => LineOutcome::Unsolicited(body.to_string()),
            };
        }

        if let Some(terminator) = terminator {
            drop(state);
            self.complete(None, terminator.clone());
            return LineOutcome::Completed(terminator);
        }

        if body.starts_with('^') {
            trace!("Modem notice ignored: {}", body);
            return LineOutcome::Ignored;
        }

        state.data.push(body.to_string());
        LineOutcome::Accumulated
    }

    /// Complete the in-flight command; `expected` guards against stale timers
    fn complete(&self, expected: Option<u64>, terminator: Terminator) {
        let (command, data) = {
            let mut state = self.inner.state.lock();
            match (&state.in_flight, expected) {
                (None, _) => return,
                (Some(current), Some(id)) if current.id != id => return,
                _ => {},
            }
            let Some(command) = state.in_flight.take() else {
                return;
            };
            let timer = state.timer.take();
            if expected.is_none() {
                if let Some(timer) = timer {
                    timer.abort();
                }
            }
            match terminator {
                Terminator::Error(_) => state.error_counter += ERROR_PENALTY,
                Terminator::Timeout => state.error_counter += TIMEOUT_PENALTY,
                _ => {},
            }
            let data = std::mem::take(&mut state.data);
            (command, data)
        };

        let response = match terminator {
            Terminator::Timeout => {
                warn!("Modem command timed out: [{}]", command.text);
                CommandResponse::timeout()
            },
            terminator => CommandResponse { data, terminator },
        };
        if let Some(callback) = command.on_complete {
            callback(response);
        }

        self.dispatch_next();
    }

    /// Fail the in-flight and every queued command; later commands fail immediately
    pub fn close(&self, reason: &str) {
        let (in_flight, pending, timer) = {
            let mut state = self.inner.state.lock();
            if state.closed.is_some() {
                return;
            }
            state.closed = Some(reason.to_string());
            state.data.clear();
            (
                state.in_flight.take(),
                std::mem::take(&mut state.pending),
                state.timer.take(),
            )
        };
        if let Some(timer) = timer {
            timer.abort();
        }

        debug!(
            "Modem queue closed ({}), failing {} commands",
            reason,
            pending.len() + usize::from(in_flight.is_some())
        );
        for command in in_flight.into_iter().chain(pending) {
            if let Some(callback) = command.on_complete {
                callback(CommandResponse::closed(reason));
            }
        }
    }

    /// Text of the in-flight command
    pub fn in_flight(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .in_flight
            .as_ref()
            .map(|c| c.text.clone())
    }

    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn error_counter(&self) -> u32 {
        self.inner.state.lock().error_counter
    }

    pub fn reset_error_counter(&self) {
        self.inner.state.lock().error_counter = 0;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed.is_some()
    }
}

async fn fire_timeout(inner: Weak<Inner>, id: u64, after: Duration) {
    tokio::time::sleep(after).await;
    if let Some(inner) = inner.upgrade() {
        CommandQueue { inner }.complete(Some(id), Terminator::Timeout);
    }
}

/// `None` for a pure echo, otherwise the line with any echoed prefix removed
fn strip_echo<'a>(command: &str, line: &'a str) -> Option<&'a str> {
    if command.starts_with(line) {
        return None;
    }
    match line.strip_prefix(command) {
        Some(rest) if rest.trim().is_empty() => None,
        Some(rest) => Some(rest.trim()),
        None => Some(line),
    }
}

fn classify_terminator(line: &str) -> Option<Terminator> {
    if line == "OK" {
        Some(Terminator::Ok)
    } else if line.starts_with('>') {
        Some(Terminator::Prompt)
    } else if line.to_ascii_lowercase().contains("error") {
        Some(Terminator::Error(line.to_string()))
    } else {
        None
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TAGS: &[&str] = &["+CMTI", "+CLIP"];

    fn queue() -> (CommandQueue, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CommandQueue::new(tx, DEFAULT_COMMAND_TIMEOUT, TAGS), rx)
    }

    fn recorder() -> (OnComplete, Arc<Mutex<Vec<CommandResponse>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Box::new(move |r| sink.lock().push(r)), seen)
    }

    #[tokio::test]
    async fn test_commands_written_one_at_a_time() {
        let (queue, mut rx) = queue();
        queue.execute("ATZ", None, false, CommandTimeout::Default);
        queue.execute("ATE0", None, false, CommandTimeout::Default);

        assert_eq!(rx.try_recv().unwrap(), "ATZ\r");
        assert!(rx.try_recv().is_err());
        assert_eq!(queue.pending_len(), 1);

        assert_eq!(queue.accept_line("OK"), LineOutcome::Completed(Terminator::Ok));
        assert_eq!(rx.try_recv().unwrap(), "ATE0\r");
    }

    #[tokio::test]
    async fn test_data_lines_accumulate() {
        let (queue, _rx) = queue();
        let (cb, seen) = recorder();
        queue.execute("AT+CGMI", Some(cb), false, CommandTimeout::Default);

        assert_eq!(queue.accept_line("huawei"), LineOutcome::Accumulated);
        assert_eq!(queue.accept_line("^RSSI:12"), LineOutcome::Ignored);
        queue.accept_line("OK");

        let seen = seen.lock();
        assert_eq!(seen[0].data, vec!["huawei".to_string()]);
        assert!(seen[0].is_ok());
    }

    #[tokio::test]
    async fn test_echo_is_stripped() {
        let (queue, _rx) = queue();
        let (cb, seen) = recorder();
        queue.execute("AT+CNUM", Some(cb), false, CommandTimeout::Default);

        assert_eq!(queue.accept_line("AT+CNUM"), LineOutcome::Ignored);
        assert_eq!(
            queue.accept_line("AT+CNUM+CNUM: \"\",\"5567\",129"),
            LineOutcome::Accumulated
        );
        queue.accept_line("OK");
        assert_eq!(seen.lock()[0].data, vec!["+CNUM: \"\",\"5567\",129".to_string()]);
    }

    #[tokio::test]
    async fn test_unsolicited_while_in_flight() {
        let (queue, _rx) = queue();
        queue.execute("AT+CPMS?", None, false, CommandTimeout::Default);
        assert_eq!(
            queue.accept_line("+CMTI: \"SM\",3"),
            LineOutcome::Unsolicited("+CMTI: \"SM\",3".to_string())
        );
        assert_eq!(queue.in_flight().as_deref(), Some("AT+CPMS?"));
    }

    #[tokio::test]
    async fn test_idle_lines() {
        let (queue, _rx) = queue();
        assert_eq!(queue.accept_line("OK"), LineOutcome::Ignored);
        assert_eq!(
            queue.accept_line("07911326"),
            LineOutcome::Unsolicited("07911326".to_string())
        );
    }

    #[tokio::test]
    async fn test_priority_from_callback_runs_next() {
        let (queue, mut rx) = queue();
        let q = queue.clone();
        queue.execute(
            "AT+CMGS=20",
            Some(Box::new(move |response| {
                assert_eq!(response.terminator, Terminator::Prompt);
                q.execute("BODY\u{1a}", None, true, CommandTimeout::Default);
            })),
            false,
            CommandTimeout::Default,
        );
        queue.execute("AT+CPMS?", None, false, CommandTimeout::Default);

        assert_eq!(rx.try_recv().unwrap(), "AT+CMGS=20\r");
        queue.accept_line(">");
        assert_eq!(rx.try_recv().unwrap(), "BODY\u{1a}\r");
        queue.accept_line("OK");
        assert_eq!(rx.try_recv().unwrap(), "AT+CPMS?\r");
    }

    #[tokio::test]
    async fn test_error_increments_counter() {
        let (queue, _rx) = queue();
        let (cb, seen) = recorder();
        queue.execute("AT+CMGD=9", Some(cb), false, CommandTimeout::Default);
        queue.accept_line("+CMS ERROR: 321");

        assert_eq!(queue.error_counter(), ERROR_PENALTY);
        assert_eq!(
            seen.lock()[0].terminator,
            Terminator::Error("+CMS ERROR: 321".to_string())
        );
        queue.reset_error_counter();
        assert_eq!(queue.error_counter(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_once() {
        let (queue, mut rx) = queue();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        queue.execute(
            "AT+CMGR=1",
            Some(Box::new(move |r| {
                assert_eq!(r.data, vec!["timeout".to_string()]);
                assert_eq!(r.terminator, Terminator::Timeout);
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            false,
            CommandTimeout::After(Duration::from_secs(5)),
        );
        queue.execute("AT", None, false, CommandTimeout::Disabled);
        rx.try_recv().unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.error_counter(), TIMEOUT_PENALTY);
        assert_eq!(rx.try_recv().unwrap(), "AT\r");

        // A late OK completes the next command, not the timed-out one
        queue.accept_line("OK");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(queue.in_flight().is_none());
    }

    #[tokio::test]
    async fn test_close_fails_everything() {
        let (queue, _rx) = queue();
        let (a, seen_a) = recorder();
        let (b, seen_b) = recorder();
        queue.execute("ATZ", Some(a), false, CommandTimeout::Default);
        queue.execute("ATE0", Some(b), false, CommandTimeout::Default);
        queue.close("port gone");

        assert_eq!(
            seen_a.lock()[0].terminator,
            Terminator::Closed("port gone".to_string())
        );
        assert_eq!(seen_b.lock().len(), 1);

        let response = queue.submit("AT", false, CommandTimeout::Default).await;
        assert!(matches!(
            response.into_result("AT"),
            Err(TrackerError::LinkClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_writer_gone_closes_queue() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let queue = CommandQueue::new(tx, DEFAULT_COMMAND_TIMEOUT, TAGS);
        let (cb, seen) = recorder();
        queue.execute("ATZ", Some(cb), false, CommandTimeout::Default);
        assert!(queue.is_closed());
        assert!(matches!(seen.lock()[0].terminator, Terminator::Closed(_)));
    }
}
