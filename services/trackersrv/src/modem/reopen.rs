//! Fixed-delay reopen policy for the modem link

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Link lifecycle as seen by the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Bootstrap finished
    Open,
    Closed,
    /// Waiting out the reopen delay
    Reopening,
    /// Attempts exhausted
    Failed,
}

#[derive(Debug, Clone)]
pub struct ReopenPolicy {
    pub delay: Duration,
    /// 0 means unlimited
    pub max_attempts: u32,
}

impl Default for ReopenPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(30),
            max_attempts: 0,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ReopenStats {
    pub total_attempts: u64,
    pub successful_opens: u64,
    pub failed_opens: u64,
    pub last_opened: Option<Instant>,
    pub last_closed: Option<Instant>,
    pub last_reason: Option<String>,
}

#[derive(Debug)]
pub struct ReopenHelper {
    policy: ReopenPolicy,
    state: LinkState,
    /// Consecutive attempts since the last successful open
    attempt: u32,
    stats: ReopenStats,
}

impl ReopenHelper {
    pub fn new(policy: ReopenPolicy) -> Self {
        Self {
            policy,
            state: LinkState::Closed,
            attempt: 0,
            stats: ReopenStats::default(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn stats(&self) -> &ReopenStats {
        &self.stats
    }

    pub fn mark_open(&mut self) {
        self.state = LinkState::Open;
        self.attempt = 0;
        self.stats.successful_opens += 1;
        self.stats.last_opened = Some(Instant::now());
        debug!("Modem link marked as open");
    }

    /// Link closed after a successful open
    pub fn mark_closed(&mut self, reason: &str) {
        self.state = LinkState::Closed;
        self.stats.last_closed = Some(Instant::now());
        self.stats.last_reason = Some(reason.to_string());
    }

    /// Link closed before bootstrap finished
    pub fn mark_failed(&mut self, reason: &str) {
        self.stats.failed_opens += 1;
        self.mark_closed(reason);
        warn!(
            "Modem open attempt {} failed: {}",
            self.attempt.max(1),
            reason
        );
    }

    /// Delay before the next attempt, `None` once attempts are exhausted
    pub fn next_delay(&self) -> Option<Duration> {
        if self.policy.max_attempts > 0 && self.attempt >= self.policy.max_attempts {
            return None;
        }
        Some(self.policy.delay)
    }

    /// Sleep out the delay; `false` when cancelled or out of attempts
    pub async fn wait(&mut self, cancel: &CancellationToken) -> bool {
        let Some(delay) = self.next_delay() else {
            self.state = LinkState::Failed;
            warn!(
                "Maximum modem reopen attempts ({}) exceeded",
                self.policy.max_attempts
            );
            return false;
        };

        self.state = LinkState::Reopening;
        self.attempt += 1;
        self.stats.total_attempts += 1;
        info!(
            "Trying to open modem again in {:?} (attempt {}/{})",
            delay,
            self.attempt,
            if self.policy.max_attempts == 0 {
                "∞".to_string()
            } else {
                self.policy.max_attempts.to_string()
            }
        );

        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay() {
        let mut helper = ReopenHelper::new(ReopenPolicy::default());
        let cancel = CancellationToken::new();

        let start = tokio::time::Instant::now();
        assert!(helper.wait(&cancel).await);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
        assert!(helper.wait(&cancel).await);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(helper.state(), LinkState::Reopening);
        assert_eq!(helper.stats().total_attempts, 2);
    }

    #[tokio::test]
    async fn test_max_attempts() {
        let mut helper = ReopenHelper::new(ReopenPolicy {
            delay: Duration::from_millis(1),
            max_attempts: 2,
        });
        let cancel = CancellationToken::new();

        assert!(helper.wait(&cancel).await);
        helper.mark_failed("no port");
        assert!(helper.wait(&cancel).await);
        helper.mark_failed("no port");
        assert!(!helper.wait(&cancel).await);
        assert_eq!(helper.state(), LinkState::Failed);
        assert_eq!(helper.stats().failed_opens, 2);

        helper.mark_open();
        assert_eq!(helper.next_delay(), Some(Duration::from_millis(1)));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let mut helper = ReopenHelper::new(ReopenPolicy::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!helper.wait(&cancel).await);
    }
}
