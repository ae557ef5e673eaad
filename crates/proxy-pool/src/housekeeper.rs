//! Background housekeeping: idle and use-count eviction, long-hold
//! warnings and kills, health probes, and top-up to the minimum size.
//!
//! One sweep per period. Each sweep briefly takes the registry lock to
//! build worklists, then acts outside it, so user hooks never run under
//! the lock. Any failure inside a sweep affects only the entry at hand;
//! the sweep carries on.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::Level;

use crate::entry::{Entry, EntryState};
use crate::pool::{PoolInner, State};

/// Wakes and stops the housekeeper thread. Shared separately from the
/// pool so the sleeping thread holds no strong reference to it.
#[derive(Default)]
pub(crate) struct HkSignal {
    pub(crate) stop: Mutex<bool>,
    pub(crate) wake: Condvar,
}

/// Housekeeper thread body.
pub(crate) fn run<T: Send + Sync + 'static>(
    pool: Weak<PoolInner<T>>,
    signal: Arc<HkSignal>,
    period: Duration,
) {
    tracing::debug!(period_ms = period.as_millis() as u64, "housekeeper running");
    loop {
        // Sweep first so the minimum fill happens promptly after start.
        {
            let Some(pool) = pool.upgrade() else { break };
            if !pool.sweep() {
                break;
            }
        }

        let mut stop = signal.stop.lock();
        if *stop {
            break;
        }
        let deadline = Instant::now() + period;
        while !*stop {
            if signal.wake.wait_until(&mut stop, deadline).timed_out() {
                break;
            }
        }
        if *stop {
            break;
        }
    }
    tracing::debug!("housekeeper exiting");
}

impl<T: Send + Sync + 'static> PoolInner<T> {
    /// One housekeeping sweep. Returns `false` once the pool is shut down.
    pub(crate) fn sweep(&self) -> bool {
        let now = Instant::now();
        let cfg = &self.config;

        let mut evicted: Vec<Entry<T>> = Vec::new();
        let mut long_held: Vec<(u64, Option<crate::scope::ScopeKey>, Duration)> = Vec::new();
        let mut killed: Vec<(Entry<T>, Duration)> = Vec::new();
        let mut probe: Vec<(u64, Arc<T>)> = Vec::new();

        {
            let mut state = self.state.lock();
            if state.shutdown {
                return false;
            }
            state.sweeps += 1;

            // Idle and use-count eviction over the parked queue.
            if cfg.max_avail_delay > Duration::ZERO || cfg.max_use > 0 {
                let mut kept = VecDeque::with_capacity(state.avail.len());
                while let Some(mut entry) = state.avail.pop_front() {
                    let idle_out = cfg.max_avail_delay > Duration::ZERO
                        && entry.idle_for(now) > cfg.max_avail_delay;
                    let worn_out = cfg.max_use > 0 && entry.uses >= cfg.max_use;
                    if idle_out || worn_out {
                        entry.state = EntryState::Retiring;
                        evicted.push(entry);
                    } else {
                        kept.push_back(entry);
                    }
                }
                state.avail = kept;
            }

            // Long holders: warn, then kill past the hard deadline.
            if cfg.max_using_delay > Duration::ZERO {
                for entry in state.busy.values() {
                    let held = entry.held_for(now);
                    if held > cfg.max_using_delay {
                        long_held.push((entry.id, entry.holder.clone(), held));
                    }
                }
            }
            if cfg.max_using_delay_kill > Duration::ZERO {
                let overdue: Vec<u64> = state
                    .busy
                    .values()
                    .filter(|e| e.held_for(now) > cfg.max_using_delay_kill)
                    .map(|e| e.id)
                    .collect();
                for id in overdue {
                    if let Some(mut entry) = state.busy.remove(&id) {
                        entry.state = EntryState::Retiring;
                        let held = entry.held_for(now);
                        killed.push((entry, held));
                    }
                }
            }

            // Health probes run on shared handles so the entries stay in
            // the registry; an entry acquired mid-probe is simply skipped
            // when the verdict comes back.
            if state.sweeps % cfg.health_freq == 0 {
                probe = state
                    .avail
                    .iter()
                    .map(|e| (e.id, Arc::clone(&e.obj)))
                    .collect();
            }

            self.log_status(&state);
        }

        // Act outside the lock.
        for (id, holder, held) in &long_held {
            tracing::warn!(
                pool_id = self.pool_id,
                id,
                holder = ?holder,
                held_secs = held.as_secs_f64(),
                "resource held for a long time"
            );
        }

        for entry in &evicted {
            self.hooks.on_close(&entry.obj);
            tracing::debug!(
                pool_id = self.pool_id,
                id = entry.id,
                uses = entry.uses,
                "evicted parked resource"
            );
        }

        for (entry, held) in &killed {
            tracing::warn!(
                pool_id = self.pool_id,
                id = entry.id,
                holder = ?entry.holder,
                held_secs = held.as_secs_f64(),
                "killing long-held resource"
            );
            // The closer doubles as the interrupt primitive here.
            self.hooks.on_close(&entry.obj);
        }

        let failed: Vec<u64> = probe
            .into_iter()
            .filter(|(_, obj)| !self.hooks.check(obj))
            .map(|(id, _)| id)
            .collect();
        let mut unhealthy: Vec<Entry<T>> = Vec::with_capacity(failed.len());
        if !failed.is_empty() {
            let mut state = self.state.lock();
            // Entries acquired (or evicted) since the probe are left alone;
            // a bad one that slipped out is re-checked on its return.
            for id in failed {
                if let Some(pos) = state.avail.iter().position(|e| e.id == id) {
                    if let Some(mut entry) = state.avail.remove(pos) {
                        entry.state = EntryState::Retiring;
                        unhealthy.push(entry);
                    }
                }
            }
        }
        for entry in &unhealthy {
            tracing::warn!(
                pool_id = self.pool_id,
                id = entry.id,
                "health probe failed; destroying resource"
            );
            self.hooks.on_close(&entry.obj);
        }

        let destroyed = evicted.len() as u64 + killed.len() as u64 + unhealthy.len() as u64;
        {
            let mut state = self.state.lock();
            state.counters.n_destroyed += destroyed;
            state.counters.n_killed += killed.len() as u64;
            state.counters.n_health_fail += unhealthy.len() as u64;
        }

        // Killed entries held capacity permits; evicted parked ones did not.
        if let Some(gate) = &self.gate {
            for _ in &killed {
                gate.release();
            }
        }
        if destroyed > 0 {
            self.returned.notify_all();
        }

        self.top_up();
        true
    }

    /// Construct resources until the pool holds `min_size` again. A
    /// factory failure aborts the top-up for this sweep.
    ///
    /// Each construction is admitted through the capacity gate exactly
    /// like an acquirer's, so a refill racing acquirers can never push
    /// the live count past `max_size`. With no permit free the refill
    /// simply waits for a later sweep.
    fn top_up(&self) {
        loop {
            {
                let state = self.state.lock();
                if state.shutdown || state.total() >= self.config.min_size {
                    return;
                }
            }
            if let Some(gate) = &self.gate {
                if !gate.try_acquire() {
                    return;
                }
            }
            let id = {
                let mut state = self.state.lock();
                if state.shutdown || state.total() >= self.config.min_size {
                    // An acquirer claimed the gap while we were admitted.
                    drop(state);
                    self.release_permit();
                    return;
                }
                let id = state.next_id;
                state.next_id += 1;
                state.creating += 1;
                id
            };
            match (self.factory)(id) {
                Ok(obj) => {
                    let obj = Arc::new(obj);
                    if let Err(err) = self.hooks.on_open(&obj) {
                        tracing::warn!(
                            pool_id = self.pool_id,
                            id,
                            error = %err,
                            "opener hook failed"
                        );
                    }
                    let mut state = self.state.lock();
                    state.creating -= 1;
                    state.counters.n_created += 1;
                    state.avail.push_back(Entry::parked(obj, id, Instant::now()));
                    drop(state);
                    // Parked entries hold no permit; free it only now that
                    // the entry is visible to admitted acquirers.
                    self.release_permit();
                    tracing::debug!(pool_id = self.pool_id, id, "topped up resource");
                }
                Err(err) => {
                    let mut state = self.state.lock();
                    state.creating -= 1;
                    state.counters.n_health_fail += 1;
                    drop(state);
                    self.release_permit();
                    tracing::warn!(
                        pool_id = self.pool_id,
                        id,
                        error = %err,
                        "factory failed during top-up; giving up for this sweep"
                    );
                    return;
                }
            }
        }
    }

    fn release_permit(&self) {
        if let Some(gate) = &self.gate {
            gate.release();
        }
    }

    /// Periodic status line at the configured level.
    fn log_status(&self, state: &State<T>) {
        let o = state.avail.len() + state.busy.len();
        let u = state.counters.n_acquisitions;
        let a = state.avail.len();
        let i = state.busy.len();
        let pool_id = self.pool_id;
        let level = self.config.log_level.unwrap_or(Level::DEBUG);
        if level == Level::ERROR {
            tracing::error!(pool_id, "o={o} u={u} a={a} i={i}");
        } else if level == Level::WARN {
            tracing::warn!(pool_id, "o={o} u={u} a={a} i={i}");
        } else if level == Level::INFO {
            tracing::info!(pool_id, "o={o} u={u} a={a} i={i}");
        } else if level == Level::TRACE {
            tracing::trace!(pool_id, "o={o} u={u} a={a} i={i}");
        } else {
            tracing::debug!(pool_id, "o={o} u={u} a={a} i={i}");
        }
    }
}
