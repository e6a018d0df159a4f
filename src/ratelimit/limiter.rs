//! Admission decisions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::accountant::WindowAccountant;
use super::identity::ClientIdentity;
use super::policy::{Policy, StoreFallback};
use crate::clock;
use crate::error::Result;

/// The verdict for one request. Created per request and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Ceiling of the policy that decided
    pub limit: u64,
    /// Requests left in the active window
    pub remaining: u64,
    /// When the active window ends
    pub reset_at: DateTime<Utc>,
    /// Time from the decision until `reset_at`
    pub reset_after: Duration,
    /// Set when the store was unreachable and the fallback decided
    pub degraded: bool,
}

/// Fixed-window admission controller shared by all requests of a route group.
///
/// Holds only immutable configuration; every per-identity count lives in the
/// shared store, so any number of instances can decide for the same client.
#[derive(Clone)]
pub struct AdmissionController {
    policy: Policy,
    fallback: StoreFallback,
    accountant: WindowAccountant,
}

impl AdmissionController {
    pub fn new(policy: Policy, fallback: StoreFallback, accountant: WindowAccountant) -> Self {
        Self {
            policy,
            fallback,
            accountant,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn fallback(&self) -> StoreFallback {
        self.fallback
    }

    pub fn accountant(&self) -> &WindowAccountant {
        &self.accountant
    }

    /// Record the attempt and decide, propagating `StoreUnavailable`.
    ///
    /// Denied attempts are still counted, so being rejected never frees quota.
    pub async fn evaluate(&self, identity: &ClientIdentity) -> Result<Decision> {
        let tally = self.accountant.record_attempt(&self.policy, identity).await?;
        let limit = self.policy.max_requests();
        let now = self.accountant.clock().now();

        let decision = Decision {
            allowed: tally.count <= limit,
            limit,
            remaining: limit.saturating_sub(tally.count),
            reset_at: tally.reset_at,
            reset_after: clock::until(now, tally.reset_at),
            degraded: false,
        };

        if !decision.allowed {
            debug!(
                identity = %identity,
                count = tally.count,
                limit,
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }

    /// Decide for `identity`, resolving store failures through the
    /// configured fallback. Never fails.
    pub async fn decide(&self, identity: &ClientIdentity) -> Decision {
        match self.evaluate(identity).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    identity = %identity,
                    error = %e,
                    fallback = %self.fallback,
                    "Counter store unavailable, applying fallback"
                );
                self.fallback_decision()
            }
        }
    }

    fn fallback_decision(&self) -> Decision {
        let limit = self.policy.max_requests();
        let window = self.policy.window();
        let reset_at = self.accountant.clock().now() + clock::to_offset(window);

        let (allowed, remaining) = match self.fallback {
            StoreFallback::FailOpen => (true, limit),
            StoreFallback::FailClosed => (false, 0),
        };

        Decision {
            allowed,
            limit,
            remaining,
            reset_at,
            reset_after: window,
            degraded: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::error::TurnstileError;
    use crate::store::{CounterStore, MemoryCounterStore, Tally};
    use async_trait::async_trait;
    use std::sync::Arc;

    /// A store whose every call fails as if the network were down.
    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn increment(&self, _key: &str, _window: Duration) -> Result<Tally> {
            Err(TurnstileError::StoreUnavailable("connection refused".to_string()))
        }

        async fn ping(&self) -> Result<()> {
            Err(TurnstileError::StoreUnavailable("connection refused".to_string()))
        }

        fn name(&self) -> &'static str {
            "down"
        }
    }

    fn controller(max_requests: u64, window: Duration) -> (AdmissionController, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let store = Arc::new(MemoryCounterStore::new(Arc::new(clock.clone())));
        let accountant = WindowAccountant::new(store, Arc::new(clock.clone()));
        let policy = Policy::new(window, max_requests, "rl:").unwrap();
        (
            AdmissionController::new(policy, StoreFallback::FailClosed, accountant),
            clock,
        )
    }

    fn outage_controller(fallback: StoreFallback) -> AdmissionController {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let accountant = WindowAccountant::new(Arc::new(DownStore), clock);
        AdmissionController::new(Policy::default(), fallback, accountant)
    }

    #[tokio::test]
    async fn test_within_limit_remaining_decreases() {
        let (controller, _) = controller(5, Duration::from_secs(60));
        let identity = ClientIdentity::new("a");

        for expected in (0..5).rev() {
            let decision = controller.decide(&identity).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
            assert!(!decision.degraded);
        }
    }

    #[tokio::test]
    async fn test_over_limit_denied_for_rest_of_window() {
        let (controller, _) = controller(3, Duration::from_secs(60));
        let identity = ClientIdentity::new("a");

        for _ in 0..3 {
            assert!(controller.decide(&identity).await.allowed);
        }
        for _ in 0..4 {
            let decision = controller.decide(&identity).await;
            assert!(!decision.allowed);
            assert_eq!(decision.remaining, 0);
        }
    }

    #[tokio::test]
    async fn test_fixed_window_scenario() {
        let (controller, clock) = controller(3, Duration::from_secs(60));
        let identity = ClientIdentity::new("A");
        let start = clock.now();

        let mut remaining = Vec::new();
        for _ in 0..3 {
            let decision = controller.decide(&identity).await;
            assert!(decision.allowed);
            remaining.push(decision.remaining);
            clock.advance(Duration::from_secs(2));
        }
        assert_eq!(remaining, vec![2, 1, 0]);

        clock.set(start + chrono::Duration::seconds(10));
        let fourth = controller.decide(&identity).await;
        assert!(!fourth.allowed);
        assert_eq!(fourth.reset_at, start + chrono::Duration::seconds(60));
        assert_eq!(fourth.reset_after, Duration::from_secs(50));

        clock.set(start + chrono::Duration::seconds(61));
        let fifth = controller.decide(&identity).await;
        assert!(fifth.allowed);
        assert_eq!(fifth.remaining, 2);
    }

    #[tokio::test]
    async fn test_denials_still_consume_window() {
        let (controller, clock) = controller(1, Duration::from_secs(10));
        let identity = ClientIdentity::new("a");
        let start = clock.now();

        assert!(controller.decide(&identity).await.allowed);
        for _ in 0..10 {
            clock.advance(Duration::from_millis(500));
            assert!(!controller.decide(&identity).await.allowed);
        }

        // Denials never push the boundary forward.
        clock.set(start + chrono::Duration::seconds(10));
        let decision = controller.decide(&identity).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_identities_do_not_share_quota() {
        let (controller, _) = controller(2, Duration::from_secs(60));
        let a = ClientIdentity::new("a");
        let b = ClientIdentity::new("b");

        for _ in 0..5 {
            controller.decide(&a).await;
        }
        assert!(!controller.decide(&a).await.allowed);

        let decision = controller.decide(&b).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[tokio::test]
    async fn test_concurrent_attempts_never_exceed_ceiling() {
        let (controller, _) = controller(10, Duration::from_secs(60));
        let identity = ClientIdentity::new("burst");

        let attempts = (0..50).map(|_| {
            let controller = controller.clone();
            let identity = identity.clone();
            tokio::spawn(async move { controller.decide(&identity).await })
        });
        let decisions = futures::future::join_all(attempts).await;

        let allowed = decisions
            .into_iter()
            .map(|d| d.unwrap())
            .filter(|d| d.allowed)
            .count();
        assert_eq!(allowed, 10);
    }

    #[tokio::test]
    async fn test_evaluate_propagates_store_unavailable() {
        let controller = outage_controller(StoreFallback::FailOpen);
        let result = controller.evaluate(&ClientIdentity::new("a")).await;
        let err = tokio_test::assert_err!(result);
        assert!(err.is_store_unavailable());
    }

    #[tokio::test]
    async fn test_fail_closed_denies_during_outage() {
        let controller = outage_controller(StoreFallback::FailClosed);
        for i in 0..5 {
            let decision = controller.decide(&ClientIdentity::new(format!("client-{}", i))).await;
            assert!(!decision.allowed);
            assert_eq!(decision.remaining, 0);
            assert!(decision.degraded);
        }
    }

    #[tokio::test]
    async fn test_fail_open_allows_during_outage() {
        let controller = outage_controller(StoreFallback::FailOpen);
        for _ in 0..10 {
            let decision = controller.decide(&ClientIdentity::new("a")).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 3);
            assert_eq!(decision.reset_after, Duration::from_secs(60));
            assert!(decision.degraded);
        }
    }
}
