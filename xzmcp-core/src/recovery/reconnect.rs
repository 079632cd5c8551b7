//! Reconnect state machine: tracks attempts and computes the next backoff
//! delay for fixed, linear, and exponential strategies.

use crate::config::{BackoffStrategy, ReconnectPolicy};
use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectState {
    Connected,
    Reconnecting { attempt: u32 },
    Disconnected,
    Failed { attempts: u32 },
}

impl ReconnectState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ReconnectState::Connected)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ReconnectState::Failed { .. })
    }
}

/// `attempts` is 1-indexed going into the formula: the first retry is
/// attempt 1. Capped at `max_interval`, then jitter of ±10% applied, floored
/// at 1s when jitter is enabled.
pub fn calculate_backoff_delay(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let raw_ms = match policy.backoff_strategy {
        BackoffStrategy::Fixed => policy.initial_interval as f64,
        BackoffStrategy::Linear => {
            policy.initial_interval as f64 + (attempt as f64) * policy.backoff_multiplier * 1000.0
        }
        BackoffStrategy::Exponential => {
            policy.initial_interval as f64 * policy.backoff_multiplier.powi(attempt as i32 - 1)
        }
    };
    let capped_ms = raw_ms.min(policy.max_interval as f64);
    let final_ms = if policy.jitter {
        let mut rng = rand::thread_rng();
        let jitter_factor = rng.gen_range(-0.1..=0.1);
        (capped_ms * (1.0 + jitter_factor)).max(1000.0)
    } else {
        capped_ms
    };
    Duration::from_millis(final_ms.round() as u64)
}

/// Owns the reconnect bookkeeping for one MCP Service or Endpoint Connection.
/// Manual disconnect vetoes reconnection until the next explicit `connect()`
/// — tracked as a plain bool guarded by the same mutex as the state.
pub struct ReconnectManager {
    policy: ReconnectPolicy,
    inner: Mutex<Inner>,
}

struct Inner {
    state: ReconnectState,
    attempts: u32,
    manual_disconnect: bool,
}

impl ReconnectManager {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, inner: Mutex::new(Inner { state: ReconnectState::Disconnected, attempts: 0, manual_disconnect: false }) }
    }

    pub async fn state(&self) -> ReconnectState {
        self.inner.lock().await.state.clone()
    }

    pub async fn mark_connected(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = ReconnectState::Connected;
        inner.attempts = 0;
        inner.manual_disconnect = false;
    }

    pub async fn mark_manual_disconnect(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = ReconnectState::Disconnected;
        inner.manual_disconnect = true;
    }

    /// Called on a connection-affecting failure. Returns the delay to wait
    /// before the next attempt, or `None` if reconnection should not proceed
    /// (disabled, manually disconnected, or attempts exhausted).
    pub async fn on_failure(&self) -> Option<Duration> {
        let mut inner = self.inner.lock().await;
        if inner.manual_disconnect || !self.policy.enabled {
            inner.state = ReconnectState::Disconnected;
            return None;
        }
        if inner.attempts >= self.policy.max_attempts {
            inner.state = ReconnectState::Failed { attempts: inner.attempts };
            return None;
        }
        inner.attempts += 1;
        inner.state = ReconnectState::Reconnecting { attempt: inner.attempts };
        Some(calculate_backoff_delay(&self.policy, inner.attempts))
    }

    pub async fn attempts(&self) -> u32 {
        self.inner.lock().await.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectPolicy;

    fn policy(strategy: BackoffStrategy) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: true,
            max_attempts: 20,
            initial_interval: 1000,
            max_interval: 30_000,
            backoff_strategy: strategy,
            backoff_multiplier: 2.0,
            timeout: 10_000,
            jitter: false,
        }
    }

    #[test]
    fn exponential_backoff_matches_formula() {
        let p = policy(BackoffStrategy::Exponential);
        assert_eq!(calculate_backoff_delay(&p, 0), Duration::ZERO);
        assert_eq!(calculate_backoff_delay(&p, 1), Duration::from_millis(1000));
        assert_eq!(calculate_backoff_delay(&p, 2), Duration::from_millis(2000));
        assert_eq!(calculate_backoff_delay(&p, 3), Duration::from_millis(4000));
        assert_eq!(calculate_backoff_delay(&p, 10), Duration::from_millis(30_000));
    }

    #[test]
    fn boundary_clamp_with_jitter_stays_within_bound() {
        let mut p = policy(BackoffStrategy::Exponential);
        p.initial_interval = 3000;
        p.max_interval = 30_000;
        p.backoff_multiplier = 1.5;
        p.jitter = true;
        let delay = calculate_backoff_delay(&p, 20);
        let ms = delay.as_millis() as i64;
        assert!(ms >= 27_000 && ms <= 33_000, "expected within +-3000 of 30000, got {ms}");
    }

    #[test]
    fn fixed_strategy_never_grows() {
        let p = policy(BackoffStrategy::Fixed);
        assert_eq!(calculate_backoff_delay(&p, 1), calculate_backoff_delay(&p, 5));
    }

    #[test]
    fn linear_strategy_grows_additively() {
        let p = policy(BackoffStrategy::Linear);
        let d1 = calculate_backoff_delay(&p, 1).as_millis();
        let d2 = calculate_backoff_delay(&p, 2).as_millis();
        assert_eq!(d2 - d1, 2000);
    }

    #[tokio::test]
    async fn manual_disconnect_vetoes_reconnect_until_connect() {
        let manager = ReconnectManager::new(policy(BackoffStrategy::Fixed));
        manager.mark_manual_disconnect().await;
        assert!(manager.on_failure().await.is_none());
        manager.mark_connected().await;
        assert!(manager.on_failure().await.is_some());
    }

    #[tokio::test]
    async fn attempts_resets_to_zero_on_reconnect() {
        let manager = ReconnectManager::new(policy(BackoffStrategy::Fixed));
        manager.on_failure().await;
        manager.on_failure().await;
        assert_eq!(manager.attempts().await, 2);
        manager.mark_connected().await;
        assert_eq!(manager.attempts().await, 0);
    }

    #[tokio::test]
    async fn exceeding_max_attempts_enters_failed() {
        let mut p = policy(BackoffStrategy::Fixed);
        p.max_attempts = 2;
        let manager = ReconnectManager::new(p);
        manager.on_failure().await;
        manager.on_failure().await;
        assert!(manager.on_failure().await.is_none());
        assert!(manager.state().await.is_failed());
    }
}
