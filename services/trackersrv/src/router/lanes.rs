//! Ordered dispatch per key
//!
//! Jobs sharing a key run one after another in submission order; jobs with
//! different keys run concurrently. A lane task exits after sitting idle for
//! [`LANE_IDLE`] and is recreated by the next job for its key.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub const LANE_IDLE: Duration = Duration::from_secs(300);

#[derive(Clone, Default)]
pub struct Lanes {
    lanes: Arc<DashMap<String, mpsc::UnboundedSender<Job>>>,
}

impl Lanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `job` behind every earlier job with the same `key`
    pub fn dispatch<F>(&self, key: impl Into<String>, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let job: Job = Box::pin(job);
        match self.lanes.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if let Err(mpsc::error::SendError(job)) = entry.get().send(job) {
                    entry.insert(self.open(key, job));
                }
            },
            Entry::Vacant(entry) => {
                entry.insert(self.open(key, job));
            },
        }
    }

    /// Open lanes
    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    fn open(&self, key: String, first: Job) -> mpsc::UnboundedSender<Job> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _ = tx.send(first);
        let lanes = Arc::clone(&self.lanes);
        tokio::spawn(async move {
            loop {
                match tokio::time::timeout(LANE_IDLE, rx.recv()).await {
                    Ok(Some(job)) => job.await,
                    Ok(None) => break,
                    Err(_) => {
                        rx.close();
                        while let Some(job) = rx.recv().await {
                            job.await;
                        }
                        break;
                    },
                }
            }
            lanes.remove_if(&key, |_, tx| tx.is_closed());
            trace!("Lane {} closed", key);
        });
        tx
    }
}
