//! Accept loop for GPRS device connections

use super::classifier::{classify, Classification, TcpEvent};
use super::codec::FrameBuffer;
use super::link::TcpLink;
use crate::config::TcpConfig;
use crate::error::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

const READ_CHUNK: usize = 1024;

/// A classified frame together with the connection it arrived on
#[derive(Debug, Clone)]
pub struct TcpInbound {
    pub event: TcpEvent,
    pub link: TcpLink,
}

pub struct TcpServer {
    listener: TcpListener,
    config: TcpConfig,
    output: mpsc::UnboundedSender<TcpInbound>,
    next_id: Arc<AtomicU64>,
}

impl TcpServer {
    pub async fn bind(
        address: &str,
        config: TcpConfig,
        output: mpsc::UnboundedSender<TcpInbound>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(address).await?;
        info!("TCP server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            config,
            output,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until `cancel` fires; every connection gets its own task
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("TCP server stopped");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                        tokio::spawn(serve_connection(
                            stream,
                            peer,
                            id,
                            self.config.clone(),
                            self.output.clone(),
                            cancel.child_token(),
                        ));
                    },
                    Err(e) => error!("TCP accept failed: {}", e),
                },
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    id: u64,
    config: TcpConfig,
    output: mpsc::UnboundedSender<TcpInbound>,
    cancel: CancellationToken,
) {
    info!("TCP ({}) -> Connected", peer);
    let (mut reader, mut writer) = stream.into_split();
    let (link, mut writes) = TcpLink::new(id, peer, cancel.clone());

    let writer_cancel = cancel.clone();
    let writer_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                next = writes.recv() => match next {
                    Some(text) => {
                        if let Err(e) = writer.write_all(text.as_bytes()).await {
                            warn!("TCP ({}) write failed: {}", peer, e);
                            break;
                        }
                    },
                    None => break,
                },
            }
        }
        // replies queued right before a close still go out
        while let Ok(text) = writes.try_recv() {
            if writer.write_all(text.as_bytes()).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut frames = FrameBuffer::new(config.max_frame_len);
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read(&mut chunk) => read,
        };
        match read {
            Ok(0) => {
                if let Some(frame) = frames.flush() {
                    dispatch(&frame, &link, &config, &output);
                }
                break;
            },
            Ok(n) => {
                frames.extend(&chunk[..n]);
                while let Some(frame) = frames.next_frame() {
                    dispatch(&frame, &link, &config, &output);
                }
            },
            Err(e) => {
                debug!("TCP ({}) read failed: {}", peer, e);
                break;
            },
        }
    }

    link.close();
    let _ = writer_task.await;
    info!("TCP ({}) -> Disconnected", peer);
}

fn dispatch(
    frame: &str,
    link: &TcpLink,
    config: &TcpConfig,
    output: &mpsc::UnboundedSender<TcpInbound>,
) {
    info!("TCP ({}) -> [{}]", link.peer(), frame);
    match classify(frame, config.min_frame_len) {
        Classification::Event(event) => {
            let inbound = TcpInbound {
                event,
                link: link.clone(),
            };
            if output.send(inbound).is_err() {
                warn!("TCP event dropped, router is gone");
            }
        },
        Classification::Unrecognized(line) => {
            warn!(
                "Unknown data structure received from TCP connection ({}): {}",
                link.peer(),
                line
            );
        },
        Classification::Noise => trace!("TCP ({}) noise ignored", link.peer()),
    }
}
