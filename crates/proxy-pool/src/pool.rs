//! Thread-safe resource pool.
//!
//! `Pool<T>` amortises the cost of creating expensive resources across
//! many threads: a bounded, self-healing container with capacity
//! admission, timed waits, usage accounting and a background housekeeper.
//! Resources are created on demand by a user factory and handed out as
//! RAII [`Guard`]s that return them on drop.
//!
//! Locking discipline: the capacity gate is taken before the registry
//! lock and released after it is dropped, so the registry lock is never
//! held across user code (factory or hooks) or blocking waits.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Condvar, Mutex};

use crate::config::PoolConfig;
use crate::entry::{Counters, Entry, EntryState};
use crate::error::{BoxError, Error, Result};
use crate::gate::{Gate, GateAcquire};
use crate::hooks::{NoOpHooks, PoolHooks};
use crate::housekeeper::{self, HkSignal};
use crate::scope::ScopeKey;
use crate::stats::{EntryStats, PoolStats};

/// User factory: builds a resource from its creation index.
pub(crate) type FactoryFn<T> =
    dyn Fn(u64) -> std::result::Result<T, BoxError> + Send + Sync;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Registry state
// ---------------------------------------------------------------------------

/// Everything guarded by the single registry lock.
pub(crate) struct State<T> {
    /// Parked resources, oldest-returned first
    pub(crate) avail: VecDeque<Entry<T>>,
    /// Checked-out resources by creation index
    pub(crate) busy: HashMap<u64, Entry<T>>,
    /// Next creation index handed to the factory
    pub(crate) next_id: u64,
    /// Constructions in flight; counted so capacity intent is visible
    pub(crate) creating: usize,
    pub(crate) shutdown: bool,
    pub(crate) hk_running: bool,
    /// Housekeeper sweep counter, drives `health_freq`
    pub(crate) sweeps: u64,
    pub(crate) counters: Counters,
}

impl<T> State<T> {
    pub(crate) fn total(&self) -> usize {
        self.avail.len() + self.busy.len() + self.creating
    }
}

pub(crate) struct PoolInner<T> {
    pub(crate) pool_id: u64,
    pub(crate) config: PoolConfig,
    pub(crate) factory: Arc<FactoryFn<T>>,
    pub(crate) hooks: Arc<dyn PoolHooks<T>>,
    pub(crate) state: Mutex<State<T>>,
    /// Signalled on returns and destructions; shutdown drains wait on it
    pub(crate) returned: Condvar,
    /// Capacity gate; `None` when the pool is unbounded
    pub(crate) gate: Option<Gate>,
    pub(crate) started: Instant,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) hk_signal: Arc<HkSignal>,
    hk_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<T> PoolInner<T> {
    /// Map a monotonic instant to wall-clock time for display.
    pub(crate) fn wall(&self, t: Instant) -> DateTime<Utc> {
        let delta = t.saturating_duration_since(self.started);
        self.started_at + TimeDelta::from_std(delta).unwrap_or_else(|_| TimeDelta::zero())
    }
}

impl<T: Send + Sync + 'static> PoolInner<T> {
    /// Return a checked-out resource to the pool; called from guard drop.
    pub(crate) fn release(&self, id: u64) {
        // Is this a live checked-out entry? (snapshot the object for hooks)
        let obj = {
            let mut state = self.state.lock();
            match state.busy.get(&id) {
                Some(entry) => Arc::clone(&entry.obj),
                None => {
                    state.counters.n_bad_returns += 1;
                    drop(state);
                    self.returned.notify_all();
                    tracing::warn!(
                        pool_id = self.pool_id,
                        id,
                        "return of unknown resource ignored"
                    );
                    return;
                }
            }
        };

        // Hooks run outside the lock.
        let ret_ok = match self.hooks.on_ret(&obj) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    pool_id = self.pool_id,
                    id,
                    error = %err,
                    "retter hook failed; retiring resource"
                );
                false
            }
        };
        let healthy = self.hooks.check(&obj);

        // Decide the entry's fate.
        let retired = {
            let mut state = self.state.lock();
            // The housekeeper may have reclaimed the entry while hooks ran.
            let Some(mut entry) = state.busy.remove(&id) else {
                state.counters.n_bad_returns += 1;
                drop(state);
                self.returned.notify_all();
                tracing::warn!(
                    pool_id = self.pool_id,
                    id,
                    "resource was reclaimed while being returned"
                );
                return;
            };
            state.counters.n_returns += 1;
            if !healthy {
                state.counters.n_health_fail += 1;
            }
            let worn_out = self.config.max_use > 0 && entry.uses >= self.config.max_use;
            if state.shutdown || !ret_ok || !healthy || worn_out {
                entry.state = EntryState::Retiring;
                Some(entry)
            } else {
                entry.state = EntryState::Available;
                entry.holder = None;
                entry.last_get = None;
                entry.last_ret = Some(Instant::now());
                state.avail.push_back(entry);
                None
            }
        };

        if let Some(entry) = retired {
            self.hooks.on_close(&entry.obj);
            let mut state = self.state.lock();
            state.counters.n_destroyed += 1;
            drop(state);
            tracing::debug!(
                pool_id = self.pool_id,
                id,
                uses = entry.uses,
                "retired resource"
            );
        }

        if let Some(gate) = &self.gate {
            gate.release();
        }
        self.returned.notify_all();
    }

    /// Destroy a checked-out entry that must not reach its caller
    /// (getter hook rejected it). The capacity permit stays with the
    /// caller, which rolls it back.
    fn destroy_rejected(&self, id: u64) {
        let entry = self.state.lock().busy.remove(&id);
        let Some(mut entry) = entry else { return };
        entry.state = EntryState::Retiring;
        self.hooks.on_close(&entry.obj);
        self.state.lock().counters.n_destroyed += 1;
        self.returned.notify_all();
        tracing::debug!(pool_id = self.pool_id, id, "destroyed rejected resource");
    }

    fn stop_housekeeper(&self) {
        *self.hk_signal.stop.lock() = true;
        self.hk_signal.wake.notify_all();
        let handle = self.hk_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl<T> Drop for PoolInner<T> {
    fn drop(&mut self) {
        // Wake the housekeeper so it exits promptly; never join here (the
        // last handle may be dropped on the housekeeper's own thread).
        *self.hk_signal.stop.lock() = true;
        self.hk_signal.wake.notify_all();

        let state = self.state.get_mut();
        if !state.shutdown {
            for entry in state.avail.drain(..) {
                self.hooks.on_close(&entry.obj);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// RAII handle to a pooled resource.
///
/// Dereferences to the resource; dropping the guard returns it to the
/// pool, where it is recycled or retired according to pool policy.
pub struct Guard<T: Send + Sync + 'static> {
    id: u64,
    obj: Arc<T>,
    inner: Arc<PoolInner<T>>,
}

impl<T: Send + Sync + 'static> Guard<T> {
    /// Creation index of the held resource.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// A shared handle to the resource. The handle may outlive the
    /// guard, but the pool is free to retire the resource once the
    /// guard is dropped.
    #[must_use]
    pub fn share(&self) -> Arc<T> {
        Arc::clone(&self.obj)
    }
}

impl<T: Send + Sync + 'static> std::ops::Deref for Guard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.obj
    }
}

impl<T: Send + Sync + 'static> Drop for Guard<T> {
    fn drop(&mut self) {
        self.inner.release(self.id);
    }
}

impl<T: Send + Sync + fmt::Debug + 'static> fmt::Debug for Guard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("id", &self.id)
            .field("resource", &*self.obj)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Generic thread-safe resource pool.
///
/// Cloning is cheap and shares the same pool.
pub struct Pool<T: Send + Sync + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Send + Sync + 'static> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Pool<T> {
    /// Create a pool with no hooks.
    ///
    /// # Errors
    /// Returns an error if `config` is invalid.
    pub fn new<F>(config: PoolConfig, factory: F) -> Result<Self>
    where
        F: Fn(u64) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        Self::with_hooks(config, factory, Arc::new(NoOpHooks))
    }

    /// Create a pool with lifecycle hooks.
    ///
    /// # Errors
    /// Returns an error if `config` is invalid.
    pub fn with_hooks<F>(
        config: PoolConfig,
        factory: F,
        hooks: Arc<dyn PoolHooks<T>>,
    ) -> Result<Self>
    where
        F: Fn(u64) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        Self::from_parts(config, Arc::new(factory), hooks)
    }

    pub(crate) fn from_parts(
        config: PoolConfig,
        factory: Arc<FactoryFn<T>>,
        hooks: Arc<dyn PoolHooks<T>>,
    ) -> Result<Self> {
        config.validate()?;
        let pool_id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let gate = (config.max_size > 0).then(|| Gate::new(config.max_size));
        let eager = config.min_size > 0;

        let pool = Self {
            inner: Arc::new(PoolInner {
                pool_id,
                config,
                factory,
                hooks,
                state: Mutex::new(State {
                    avail: VecDeque::new(),
                    busy: HashMap::new(),
                    next_id: 0,
                    creating: 0,
                    shutdown: false,
                    hk_running: false,
                    sweeps: 0,
                    counters: Counters::default(),
                }),
                returned: Condvar::new(),
                gate,
                started: Instant::now(),
                started_at: Utc::now(),
                hk_signal: Arc::new(HkSignal::default()),
                hk_handle: Mutex::new(None),
            }),
        };

        tracing::debug!(
            pool_id,
            min_size = pool.inner.config.min_size,
            max_size = pool.inner.config.max_size,
            "created resource pool"
        );

        // The housekeeper starts eagerly when a minimum must be kept
        // filled, lazily on first acquisition otherwise.
        if eager {
            pool.ensure_housekeeper();
        }
        Ok(pool)
    }

    /// Process-unique identifier of this pool.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.pool_id
    }

    /// Whether the pool has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().shutdown
    }

    /// Acquire a resource on behalf of the calling thread, waiting at
    /// most the configured `timeout` for a capacity slot.
    ///
    /// # Errors
    /// [`Error::Timeout`] when the capacity wait expires, [`Error::Closed`]
    /// after shutdown, [`Error::Factory`] when construction fails,
    /// [`Error::Hook`] when the getter hook rejects the resource.
    pub fn acquire(&self) -> Result<Guard<T>> {
        self.acquire_as(ScopeKey::current_thread(), None)
    }

    /// Acquire with a per-call wait bound overriding the configured one.
    ///
    /// # Errors
    /// As for [`acquire`](Self::acquire).
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<Guard<T>> {
        self.acquire_as(ScopeKey::current_thread(), Some(timeout))
    }

    /// Acquire on behalf of an explicit holder identity.
    ///
    /// # Errors
    /// As for [`acquire`](Self::acquire).
    pub fn acquire_as(&self, key: ScopeKey, timeout: Option<Duration>) -> Result<Guard<T>> {
        let inner = &self.inner;
        if inner.state.lock().shutdown {
            return Err(Error::Closed {
                pool_id: inner.pool_id,
            });
        }
        self.ensure_housekeeper();

        // Capacity admission happens before the registry lock so the
        // lock never bounds concurrent construction. An explicit zero
        // override waits forever, like a zero configured timeout.
        let wait = match timeout {
            Some(t) => (t > Duration::ZERO).then_some(t),
            None => inner.config.acquire_timeout(),
        };
        if let Some(gate) = &inner.gate {
            let started = Instant::now();
            match gate.acquire(wait) {
                GateAcquire::Acquired => {}
                GateAcquire::TimedOut => {
                    let waited = started.elapsed();
                    inner.state.lock().counters.n_timeouts += 1;
                    tracing::debug!(
                        pool_id = inner.pool_id,
                        waited_ms = waited.as_millis() as u64,
                        "acquire timed out on the capacity gate"
                    );
                    return Err(Error::Timeout { waited });
                }
                GateAcquire::Closed => {
                    return Err(Error::Closed {
                        pool_id: inner.pool_id,
                    });
                }
            }
        }

        match self.checkout(key) {
            Ok(guard) => Ok(guard),
            Err(err) => {
                // Creation intent was already rolled back; free the slot.
                if let Some(gate) = &inner.gate {
                    gate.release();
                }
                Err(err)
            }
        }
    }

    /// Pick a parked resource or construct a new one. The caller holds a
    /// capacity permit; on error the caller rolls it back.
    fn checkout(&self, key: ScopeKey) -> Result<Guard<T>> {
        let inner = &self.inner;
        let now = Instant::now();

        let mut state = inner.state.lock();
        if state.shutdown {
            return Err(Error::Closed {
                pool_id: inner.pool_id,
            });
        }

        if let Some(mut entry) = state.avail.pop_front() {
            entry.state = EntryState::InUse;
            entry.holder = Some(key);
            entry.last_get = Some(now);
            entry.uses += 1;
            let id = entry.id;
            let obj = Arc::clone(&entry.obj);
            state.busy.insert(id, entry);
            drop(state);
            tracing::trace!(pool_id = inner.pool_id, id, "recycled parked resource");
            return self.handout(id, obj);
        }

        // Nothing parked: record creation intent, then build without the lock.
        let id = state.next_id;
        state.next_id += 1;
        state.creating += 1;
        drop(state);

        tracing::debug!(pool_id = inner.pool_id, id, "creating resource");
        let obj = match (inner.factory)(id) {
            Ok(obj) => Arc::new(obj),
            Err(source) => {
                inner.state.lock().creating -= 1;
                inner.returned.notify_all();
                tracing::warn!(
                    pool_id = inner.pool_id,
                    id,
                    error = %source,
                    "factory failed"
                );
                return Err(Error::Factory { index: id, source });
            }
        };
        if let Err(err) = inner.hooks.on_open(&obj) {
            tracing::warn!(pool_id = inner.pool_id, id, error = %err, "opener hook failed");
        }

        let mut state = inner.state.lock();
        state.creating -= 1;
        state.counters.n_created += 1;
        state
            .busy
            .insert(id, Entry::acquired(Arc::clone(&obj), id, key, now));
        drop(state);

        self.handout(id, obj)
    }

    /// Run the getter hook and wrap the resource in a guard.
    ///
    /// Only a handout the getter accepts counts as an acquisition, so
    /// `n_acquisitions` stays equal to `n_returns` at quiescence.
    fn handout(&self, id: u64, obj: Arc<T>) -> Result<Guard<T>> {
        if let Err(source) = self.inner.hooks.on_get(&obj) {
            tracing::warn!(
                pool_id = self.inner.pool_id,
                id,
                error = %source,
                "getter hook rejected resource; destroying it"
            );
            self.inner.destroy_rejected(id);
            return Err(Error::Hook {
                hook: "getter",
                source,
            });
        }
        self.inner.state.lock().counters.n_acquisitions += 1;
        Ok(Guard {
            id,
            obj,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Acquire a resource, run `f` on it, and always return it.
    ///
    /// # Errors
    /// As for [`acquire`](Self::acquire).
    pub fn with_resource<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let guard = self.acquire()?;
        Ok(f(&guard))
    }

    /// Take a snapshot of counters, configuration and per-entry records.
    ///
    /// Raw data is gathered under the registry lock; tracer hooks and
    /// timestamp formatting run outside it.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;

        struct Raw<T> {
            id: u64,
            created: Instant,
            last_get: Option<Instant>,
            last_ret: Option<Instant>,
            uses: u64,
            holder: Option<String>,
            obj: Arc<T>,
        }

        fn raw<T>(entry: &Entry<T>) -> Raw<T> {
            Raw {
                id: entry.id,
                created: entry.created,
                last_get: entry.last_get,
                last_ret: entry.last_ret,
                uses: entry.uses,
                holder: entry.holder.as_ref().map(ToString::to_string),
                obj: Arc::clone(&entry.obj),
            }
        }

        let (avail_raw, busy_raw, counters, creating) = {
            let state = inner.state.lock();
            let avail: Vec<Raw<T>> = state.avail.iter().map(raw).collect();
            let mut busy: Vec<Raw<T>> = state.busy.values().map(raw).collect();
            busy.sort_by_key(|r| r.id);
            (avail, busy, state.counters, state.creating)
        };

        let describe = |r: &Raw<T>| EntryStats {
            id: r.id,
            created_at: inner.wall(r.created),
            last_get_at: r.last_get.map(|t| inner.wall(t)),
            last_ret_at: r.last_ret.map(|t| inner.wall(t)),
            uses: r.uses,
            holder: r.holder.clone(),
            trace: inner.hooks.trace(&r.obj),
        };

        let avail: Vec<EntryStats> = avail_raw.iter().map(describe).collect();
        let busy: Vec<EntryStats> = busy_raw.iter().map(describe).collect();

        PoolStats {
            pool_id: inner.pool_id,
            version: env!("CARGO_PKG_VERSION"),
            started_at: inner.started_at,
            now: Utc::now(),
            running_secs: inner.started.elapsed().as_secs_f64(),
            n_total: avail.len() + busy.len(),
            n_avail: avail.len(),
            n_busy: busy.len(),
            n_creating: creating,
            n_created: counters.n_created,
            n_destroyed: counters.n_destroyed,
            n_acquisitions: counters.n_acquisitions,
            n_returns: counters.n_returns,
            n_timeouts: counters.n_timeouts,
            n_health_fail: counters.n_health_fail,
            n_killed: counters.n_killed,
            n_bad_returns: counters.n_bad_returns,
            config: inner.config.clone(),
            avail,
            busy,
            user: inner.hooks.stats(),
        }
    }

    /// Shut down the pool: reject new acquisitions, stop the housekeeper,
    /// destroy parked resources, wait up to `grace` for holders to return
    /// theirs, then forcibly destroy whatever is still outstanding.
    ///
    /// Idempotent; later calls return immediately.
    pub fn shutdown(&self, grace: Duration) {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
        }
        tracing::info!(pool_id = inner.pool_id, "pool shutting down");

        if let Some(gate) = &inner.gate {
            gate.close();
        }
        // Join the housekeeper first so no sweep is mid-flight while we
        // drain the registry.
        inner.stop_housekeeper();

        // Parked resources go first.
        let parked: Vec<Entry<T>> = {
            let mut state = inner.state.lock();
            state
                .avail
                .drain(..)
                .map(|mut entry| {
                    entry.state = EntryState::Retiring;
                    entry
                })
                .collect()
        };
        for entry in &parked {
            inner.hooks.on_close(&entry.obj);
        }
        inner.state.lock().counters.n_destroyed += parked.len() as u64;

        // Give holders until the deadline to come back.
        let deadline = Instant::now() + grace;
        let mut state = inner.state.lock();
        while !state.busy.is_empty() {
            if inner.returned.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        let stragglers: Vec<Entry<T>> = state
            .busy
            .drain()
            .map(|(_, mut entry)| {
                entry.state = EntryState::Retiring;
                entry
            })
            .collect();
        drop(state);

        for entry in &stragglers {
            tracing::warn!(
                pool_id = inner.pool_id,
                id = entry.id,
                holder = ?entry.holder,
                "destroying resource still held at shutdown"
            );
            inner.hooks.on_close(&entry.obj);
        }

        let mut state = inner.state.lock();
        state.counters.n_destroyed += stragglers.len() as u64;
        state.counters.n_killed += stragglers.len() as u64;
        let counters = state.counters;
        drop(state);
        tracing::info!(
            pool_id = inner.pool_id,
            n_created = counters.n_created,
            n_destroyed = counters.n_destroyed,
            n_killed = counters.n_killed,
            n_bad_returns = counters.n_bad_returns,
            "pool shut down"
        );
    }

    /// Start the housekeeper if it is not running yet.
    fn ensure_housekeeper(&self) {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if state.hk_running || state.shutdown {
                return;
            }
            state.hk_running = true;
        }
        let weak = Arc::downgrade(inner);
        let signal = Arc::clone(&inner.hk_signal);
        let period = inner.config.housekeeper_period();
        let spawned = thread::Builder::new()
            .name(format!("proxy-pool-{}", inner.pool_id))
            .spawn(move || housekeeper::run(weak, signal, period));
        match spawned {
            Ok(handle) => *inner.hk_handle.lock() = Some(handle),
            Err(err) => {
                inner.state.lock().hk_running = false;
                tracing::error!(
                    pool_id = inner.pool_id,
                    error = %err,
                    "failed to start housekeeper thread"
                );
            }
        }
    }
}

impl<T: Send + Sync + 'static> fmt::Display for Pool<T> {
    /// Compact status line: total objects, uses, available, in use.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        write!(
            f,
            "o={} u={} a={} i={}",
            state.avail.len() + state.busy.len(),
            state.counters.n_acquisitions,
            state.avail.len(),
            state.busy.len()
        )
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Pool")
            .field("pool_id", &self.inner.pool_id)
            .field("n_avail", &state.avail.len())
            .field("n_busy", &state.busy.len())
            .field("counters", &state.counters)
            .finish()
    }
}
