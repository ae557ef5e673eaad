//! Observable pool statistics.
//!
//! [`PoolStats`] is a point-in-time snapshot: raw data is gathered under
//! the pool lock, tracer hooks and formatting run outside it. No
//! happens-before relation is guaranteed between two snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::PoolConfig;

/// Snapshot of one pool entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntryStats {
    /// Creation index of the resource
    pub id: u64,
    /// When the resource was constructed
    pub created_at: DateTime<Utc>,
    /// Most recent acquisition, if ever acquired
    pub last_get_at: Option<DateTime<Utc>>,
    /// Most recent return to the pool, if ever returned
    pub last_ret_at: Option<DateTime<Utc>>,
    /// Number of successful acquisitions
    pub uses: u64,
    /// Scope key of the current holder, if checked out
    pub holder: Option<String>,
    /// Tracer hook annotation, if a tracer is configured
    pub trace: Option<String>,
}

/// Snapshot of a pool's counters, configuration and entries.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Process-unique pool identifier
    pub pool_id: u64,
    /// Crate version that produced the snapshot
    pub version: &'static str,
    /// When the pool was created
    pub started_at: DateTime<Utc>,
    /// When the snapshot was taken
    pub now: DateTime<Utc>,
    /// Seconds since pool creation
    pub running_secs: f64,
    /// Live resources (available + busy); constructions in flight are
    /// reported separately in `n_creating`
    pub n_total: usize,
    /// Resources parked in the pool
    pub n_avail: usize,
    /// Resources checked out
    pub n_busy: usize,
    /// Constructions in flight
    pub n_creating: usize,
    /// Resources ever constructed
    pub n_created: u64,
    /// Resources ever destroyed
    pub n_destroyed: u64,
    /// Successful acquisitions
    pub n_acquisitions: u64,
    /// Successful returns
    pub n_returns: u64,
    /// Acquisitions that timed out on the capacity gate
    pub n_timeouts: u64,
    /// Health probe failures
    pub n_health_fail: u64,
    /// Resources forcibly reclaimed from long holders
    pub n_killed: u64,
    /// Returns of unknown or already-returned resources
    pub n_bad_returns: u64,
    /// The pool configuration
    pub config: PoolConfig,
    /// Per-entry records for available resources, oldest-returned first
    pub avail: Vec<EntryStats>,
    /// Per-entry records for checked-out resources
    pub busy: Vec<EntryStats>,
    /// User counters from the stats hook
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<serde_json::Value>,
}

impl PoolStats {
    /// Render the snapshot as a JSON value.
    ///
    /// # Panics
    /// Never panics: every field serializes infallibly.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("PoolStats is always serializable")
    }
}
