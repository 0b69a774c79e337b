//! Write side of one accepted device connection

use crate::error::{Result, TrackerError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct TcpLinkInner {
    id: u64,
    peer: SocketAddr,
    writer: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

/// Handle to a device connection
///
/// Writes are queued to the connection's writer task. Clones share the
/// connection; `close` from any clone tears it down.
#[derive(Clone)]
pub struct TcpLink {
    inner: Arc<TcpLinkInner>,
}

impl std::fmt::Debug for TcpLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpLink")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl TcpLink {
    /// Returns the handle and the queue the writer task drains
    pub fn new(
        id: u64,
        peer: SocketAddr,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (writer, writes) = mpsc::unbounded_channel();
        let link = Self {
            inner: Arc::new(TcpLinkInner {
                id,
                peer,
                writer,
                cancel,
                closed: AtomicBool::new(false),
            }),
        };
        (link, writes)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.inner.peer
    }

    /// Queue `text` as is
    pub fn write(&self, text: &str) -> Result<()> {
        if self.is_closed() {
            return Err(TrackerError::link_closed(format!(
                "connection {} is closed",
                self.inner.peer
            )));
        }
        info!("TCP ({}) <- [{}]", self.inner.peer, text);
        self.inner.writer.send(text.to_string()).map_err(|_| {
            self.inner.closed.store(true, Ordering::SeqCst);
            TrackerError::link_closed(format!("connection {} writer gone", self.inner.peer))
        })
    }

    /// Queue `text` followed by a newline
    pub fn write_line(&self, text: &str) -> Result<()> {
        self.write(&format!("{}\n", text))
    }

    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!("Closing TCP connection {}", self.inner.peer);
            self.inner.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst) || self.inner.cancel.is_cancelled()
    }

    pub fn same_connection(&self, other: &TcpLink) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40100".parse().unwrap()
    }

    #[test]
    fn test_write_line_queues_with_newline() {
        let (link, mut writes) = TcpLink::new(1, peer(), CancellationToken::new());
        link.write_line("AUTH: OK").unwrap();
        link.write("LOAD").unwrap();
        assert_eq!(writes.try_recv().unwrap(), "AUTH: OK\n");
        assert_eq!(writes.try_recv().unwrap(), "LOAD");
    }

    #[test]
    fn test_write_after_close_fails() {
        let cancel = CancellationToken::new();
        let (link, _writes) = TcpLink::new(1, peer(), cancel.clone());
        let clone = link.clone();
        clone.close();
        assert!(cancel.is_cancelled());
        let err = link.write("ON").unwrap_err();
        assert!(err.is_link_failure());
        assert!(link.same_connection(&clone));
    }

    #[test]
    fn test_dropped_writer_marks_closed() {
        let (link, writes) = TcpLink::new(2, peer(), CancellationToken::new());
        drop(writes);
        assert!(link.write("ON").is_err());
        assert!(link.is_closed());
    }
}
