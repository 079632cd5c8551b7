//! Ping-as-liveness-probe bookkeeping. A "ping" here is a `tools/list`
//! call raced against a timeout, not MCP's own `ping` method — this system
//! serves that separately to its upstream clients (see message_handler).

use crate::config::PingPolicy;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;

pub struct PingTracker {
    policy: PingPolicy,
    failure_count: AtomicU32,
    last_ping_time: Mutex<Option<std::time::Instant>>,
}

impl PingTracker {
    pub fn new(policy: PingPolicy) -> Self {
        Self { policy, failure_count: AtomicU32::new(0), last_ping_time: Mutex::new(None) }
    }

    /// Resets the counter and stamps `lastPingTime`.
    pub async fn record_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        *self.last_ping_time.lock().await = Some(std::time::Instant::now());
    }

    /// Returns true once consecutive failures reach `maxFailures`, at which
    /// point the caller should synthesise a connection error and reconnect.
    pub fn record_failure(&self) -> bool {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        count >= self.policy.max_failures
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
    }

    pub fn enabled(&self) -> bool {
        self.policy.enabled
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.policy.interval)
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.policy.timeout)
    }

    pub fn start_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.policy.start_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PingPolicy {
        PingPolicy { enabled: true, interval: 100, timeout: 50, max_failures: 3, start_delay: 0 }
    }

    #[test]
    fn three_consecutive_failures_trip_threshold() {
        let tracker = PingTracker::new(policy());
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(tracker.record_failure());
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let tracker = PingTracker::new(policy());
        tracker.record_failure();
        tracker.record_failure();
        tracker.record_success().await;
        assert_eq!(tracker.failure_count(), 0);
    }
}
