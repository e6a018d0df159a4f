//! Window accounting against the shared counter store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::trace;

use super::identity::ClientIdentity;
use super::policy::Policy;
use crate::clock::{self, Clock};
use crate::error::{Result, TurnstileError};
use crate::store::CounterStore;

/// Default bound on one store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// Result of recording one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTally {
    /// Attempts counted in the active window, this one included
    pub count: u64,
    /// When the active window ends
    pub reset_at: DateTime<Utc>,
}

/// Records attempts in fixed windows held by the shared store.
///
/// Holds no per-identity state and takes no local lock; the store's atomic
/// increment is the only synchronisation.
#[derive(Clone)]
pub struct WindowAccountant {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl WindowAccountant {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Bound each store round trip by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Count one attempt by `identity` and report the active window.
    ///
    /// The round trip runs on its own task: if the caller is dropped midway
    /// (client disconnect) the increment still lands, since the attempt
    /// already happened. Failures and timeouts surface as
    /// `StoreUnavailable`; nothing is retried here.
    pub async fn record_attempt(&self, policy: &Policy, identity: &ClientIdentity) -> Result<WindowTally> {
        let key = policy.counter_key(identity.as_str());
        let window = policy.window();
        let store = Arc::clone(&self.store);
        let timeout = self.timeout;

        trace!(key = %key, window_ms = window.as_millis() as u64, "Recording attempt");

        let round_trip = tokio::spawn(async move {
            match tokio::time::timeout(timeout, store.increment(&key, window)).await {
                Ok(result) => result,
                Err(_) => Err(TurnstileError::StoreUnavailable(format!(
                    "{} store did not answer within {:?}",
                    store.name(),
                    timeout
                ))),
            }
        });

        let tally = round_trip
            .await
            .map_err(|e| TurnstileError::StoreUnavailable(format!("store task failed: {}", e)))??;

        let now = self.clock.now();
        Ok(WindowTally {
            count: tally.count,
            reset_at: now + clock::to_offset(tally.ttl),
        })
    }
}
