//! In-process counter store.
//!
//! Mirrors the Redis key semantics (increment, expiry on creation, lazy
//! restart after expiry) on a sharded concurrent map. Counts are not shared
//! between processes, so this backend suits single-instance deployments and
//! tests.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::trace;

use super::{CounterStore, Tally};
use crate::clock::{self, Clock};
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u64,
    expires_at: DateTime<Utc>,
}

/// Counter store backed by a `DashMap`.
#[derive(Debug)]
pub struct MemoryCounterStore {
    entries: DashMap<String, WindowEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Current count for `key`, ignoring expired windows.
    pub fn count(&self, key: &str) -> Option<u64> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.count)
    }

    /// Number of keys held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired window. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Periodically purge expired windows until the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let removed = store.purge_expired();
                if removed > 0 {
                    trace!(removed, "Purged expired counter windows");
                }
            }
        })
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<Tally> {
        let now = self.clock.now();
        let fresh = || WindowEntry {
            count: 0,
            expires_at: now + clock::to_offset(window),
        };

        // The entry guard holds the shard lock, making read-modify-write atomic.
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(fresh);
        if entry.expires_at <= now {
            *entry = fresh();
        }
        entry.count += 1;

        Ok(Tally {
            count: entry.count,
            ttl: clock::until(now, entry.expires_at),
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
