//! Per-resource bookkeeping

use std::sync::Arc;
use std::time::Instant;

use crate::scope::ScopeKey;

/// State of a pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryState {
    /// Parked in the pool, ready to be handed out
    Available,
    /// Checked out by a holder
    InUse,
    /// Marked for destruction; will never be handed out again
    Retiring,
}

/// One live resource and its usage accounting.
///
/// The pool keeps the `Arc<T>` even while the resource is checked out, so
/// the housekeeper can still reach the object (e.g. to interrupt a
/// long-held one via the closer hook).
pub(crate) struct Entry<T> {
    pub(crate) obj: Arc<T>,
    /// Monotonically increasing creation index, also passed to the factory
    pub(crate) id: u64,
    pub(crate) state: EntryState,
    pub(crate) created: Instant,
    /// Most recent return to the pool; a fresh top-up carries its creation
    /// time so age-based eviction works uniformly
    pub(crate) last_ret: Option<Instant>,
    /// Most recent acquisition; `None` while available
    pub(crate) last_get: Option<Instant>,
    /// Count of successful acquisitions
    pub(crate) uses: u64,
    /// Scope key of the current holder; `None` while available
    pub(crate) holder: Option<ScopeKey>,
}

impl<T> Entry<T> {
    /// Entry freshly constructed on behalf of an acquiring caller.
    pub(crate) fn acquired(obj: Arc<T>, id: u64, holder: ScopeKey, now: Instant) -> Self {
        Self {
            obj,
            id,
            state: EntryState::InUse,
            created: now,
            last_ret: None,
            last_get: Some(now),
            uses: 1,
            holder: Some(holder),
        }
    }

    /// Entry freshly constructed by the housekeeper top-up.
    pub(crate) fn parked(obj: Arc<T>, id: u64, now: Instant) -> Self {
        Self {
            obj,
            id,
            state: EntryState::Available,
            created: now,
            last_ret: Some(now),
            last_get: None,
            uses: 0,
            holder: None,
        }
    }

    /// Time the entry has been parked, measured from its last return.
    pub(crate) fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_ret.unwrap_or(self.created))
    }

    /// Time the entry has been held, measured from its last acquisition.
    pub(crate) fn held_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_get.unwrap_or(self.created))
    }
}

/// Monotonically non-decreasing pool counters.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub(crate) n_created: u64,
    pub(crate) n_destroyed: u64,
    pub(crate) n_acquisitions: u64,
    pub(crate) n_returns: u64,
    pub(crate) n_timeouts: u64,
    pub(crate) n_health_fail: u64,
    pub(crate) n_killed: u64,
    pub(crate) n_bad_returns: u64,
}
