//! Bounded, expiring store of the last status payload per run.
//!
//! [`JobStore`] is shared via `Arc<JobStore>` between the job runners
//! (writers, through the dispatcher) and status-polling handlers (readers).
//! Entries expire `ttl` after their last update; when the store grows past
//! its capacity the least-recently-updated entries are evicted, terminal
//! ones before in-flight ones.

use std::collections::HashMap;
use std::sync::Arc;

use relay_core::clock::Clock;
use relay_core::error::CoreError;
use relay_core::job::{CallbackPayload, JobStatus};
use relay_core::types::{RunId, Timestamp};
use tokio::sync::RwLock;

/// Default time an entry survives after its last update (24 h).
pub const DEFAULT_TTL_SECS: i64 = 86_400;

/// Default maximum number of tracked runs.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Result of [`JobStore::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The payload is a status change and should be delivered.
    Changed,
    /// Same status and progress as before; stored but not delivered.
    Unchanged,
    /// The run already reached a terminal status; the payload was dropped.
    Rejected,
}

struct Entry {
    payload: CallbackPayload,
    updated_at: Timestamp,
}

/// Process-wide map of run id to last stored payload.
pub struct JobStore {
    entries: RwLock<HashMap<RunId, Entry>>,
    ttl: chrono::Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl JobStore {
    pub fn new(ttl: chrono::Duration, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
            clock,
        }
    }

    /// Seed a new run. Fails if a live entry already exists for the id.
    pub async fn begin(&self, payload: CallbackPayload) -> Result<(), CoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;

        if let Some(existing) = entries.get(&payload.run_id) {
            if !self.is_expired(existing, now) {
                return Err(CoreError::Conflict(format!(
                    "Run {} is already tracked",
                    payload.run_id
                )));
            }
        }

        let run_id = payload.run_id.clone();
        entries.insert(
            run_id.clone(),
            Entry {
                payload,
                updated_at: now,
            },
        );
        self.enforce_capacity(&mut entries, &run_id, now);
        Ok(())
    }

    /// Store `payload` as the latest state of its run and classify it.
    ///
    /// A `processing` payload whose progress equals the stored one is
    /// [`RecordOutcome::Unchanged`]; it still replaces the stored payload
    /// so differences outside `(status, progress)` are kept. Anything
    /// recorded after a terminal payload is [`RecordOutcome::Rejected`].
    pub async fn record(&self, payload: CallbackPayload) -> RecordOutcome {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;

        let outcome = match entries.get(&payload.run_id) {
            Some(existing) if !self.is_expired(existing, now) => {
                let previous = &existing.payload;
                if previous.status.is_terminal() {
                    return RecordOutcome::Rejected;
                }
                if payload.status == JobStatus::Processing
                    && previous.status == JobStatus::Processing
                    && payload.progress() == previous.progress()
                {
                    RecordOutcome::Unchanged
                } else {
                    RecordOutcome::Changed
                }
            }
            _ => RecordOutcome::Changed,
        };

        let run_id = payload.run_id.clone();
        entries.insert(
            run_id.clone(),
            Entry {
                payload,
                updated_at: now,
            },
        );
        self.enforce_capacity(&mut entries, &run_id, now);
        outcome
    }

    /// Last payload stored for `run_id`, unless unknown or expired.
    pub async fn get(&self, run_id: &str) -> Option<CallbackPayload> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        entries
            .get(run_id)
            .filter(|entry| !self.is_expired(entry, now))
            .map(|entry| entry.payload.clone())
    }

    /// Number of live (non-expired) entries.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|entry| !self.is_expired(entry, now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every expired entry, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed, "Purged expired job status entries");
        }
        removed
    }

    // ---- private helpers ----

    fn is_expired(&self, entry: &Entry, now: Timestamp) -> bool {
        now - entry.updated_at >= self.ttl
    }

    /// Evict down to capacity, never touching `keep`.
    fn enforce_capacity(&self, entries: &mut HashMap<RunId, Entry>, keep: &str, now: Timestamp) {
        if entries.len() <= self.capacity {
            return;
        }

        entries.retain(|_, entry| !self.is_expired(entry, now));
        if entries.len() <= self.capacity {
            return;
        }

        // Terminal first, then oldest update first.
        let mut candidates: Vec<(bool, Timestamp, RunId)> = entries
            .iter()
            .filter(|(id, _)| id.as_str() != keep)
            .map(|(id, entry)| {
                (
                    !entry.payload.status.is_terminal(),
                    entry.updated_at,
                    id.clone(),
                )
            })
            .collect();
        candidates.sort();

        let excess = entries.len() - self.capacity;
        for (in_flight, _, run_id) in candidates.into_iter().take(excess) {
            if in_flight {
                tracing::warn!(run_id = %run_id, "Evicting in-flight job status, store is full");
            }
            entries.remove(&run_id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
