// Per-id restore claims and the process-scoped moderation state.
//
// Two restores of the same log entry must never run at once. Each restore
// claims its id first; a second caller waits a short, bounded time and then
// gives up with Conflict. Different ids never contend.

use super::moderation_service::ModerationError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Set of log ids currently being restored.
///
/// Each claim carries a generation number, so a claim that outlived a
/// `clear` cannot release the id out from under its next holder.
#[derive(Default)]
pub struct ClaimRegistry {
    claimed: Arc<DashMap<i64, u64>>,
    generation: AtomicU64,
}

impl ClaimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id`, waiting at most `timeout` for a concurrent holder.
    pub async fn claim(&self, id: i64, timeout: Duration) -> Result<Claim, ModerationError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(claim) = self.try_claim(id) {
                return Ok(claim);
            }
            if Instant::now() >= deadline {
                tracing::warn!(log_id = id, "Restore claim timed out");
                return Err(ModerationError::Conflict(id));
            }
            sleep(CLAIM_POLL_INTERVAL).await;
        }
    }

    pub fn try_claim(&self, id: i64) -> Option<Claim> {
        match self.claimed.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                slot.insert(generation);
                Some(Claim {
                    id,
                    generation,
                    claimed: Arc::clone(&self.claimed),
                })
            }
        }
    }

    pub fn is_claimed(&self, id: i64) -> bool {
        self.claimed.contains_key(&id)
    }

    fn clear(&self) {
        self.claimed.clear();
    }
}

/// Held for the duration of one restore; releases the id on drop.
#[derive(Debug)]
pub struct Claim {
    id: i64,
    generation: u64,
    claimed: Arc<DashMap<i64, u64>>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.claimed.remove_if(&self.id, |_, holder| *holder == self.generation);
    }
}

/// Counters for the lifetime of the process.
#[derive(Debug, Default)]
pub struct RestoreStats {
    restored: AtomicU64,
    failed: AtomicU64,
}

impl RestoreStats {
    pub fn record_restored(&self) {
        self.restored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn restored(&self) -> u64 {
        self.restored.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Mutable state shared by every restore in this process.
///
/// Created once by the composition root and handed to the coordinator by
/// `Arc`. `reset` puts it back to the freshly-started state; claims still
/// held by running restores become stale and release nothing when dropped.
#[derive(Default)]
pub struct ModerationState {
    pub claims: ClaimRegistry,
    pub stats: RestoreStats,
}

impl ModerationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.claims.clear();
        self.stats.restored.store(0, Ordering::Relaxed);
        self.stats.failed.store(0, Ordering::Relaxed);
    }
}
