//! Scoped proxy: per-caller access to a pooled resource.
//!
//! A [`Proxy`] maps the calling scope (process, OS thread, or injected
//! lightweight-task identity) to a resource borrowed from an internal
//! [`Pool`]. The first access in a scope borrows a resource; repeated
//! accesses see the same one until [`ret`](Proxy::ret) hands it back.
//!
//! The proxy *uses* the pool; the pool knows nothing about the proxy.
//! Binding may happen after construction (`set_obj` / `set_factory`),
//! so a proxy can be created at import time and wired up later.

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::error::{BoxError, Error, Result};
use crate::hooks::{NoOpHooks, PoolHooks};
use crate::pool::{FactoryFn, Guard, Pool};
use crate::scope::{KeySource, Scope, ScopeKey, TaskKeyFn};
use crate::stats::PoolStats;

// ---------------------------------------------------------------------------
// Debug-reloader workaround
// ---------------------------------------------------------------------------

/// Environment variable enabling the debug-reloader workaround.
///
/// Debug-reloading frameworks instantiate the application twice; with the
/// variable set to `1`/`true`/`yes`/`on`, the first factory binding in the
/// process defers pool construction until the first actual acquisition,
/// so the throwaway instance never builds a pool. No effect otherwise.
pub const RELOADER_WORKAROUND_ENV: &str = "PROXY_POOL_RELOADER_WORKAROUND";

static FIRST_FACTORY_BIND: AtomicBool = AtomicBool::new(true);

fn truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn reloader_workaround_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| std::env::var(RELOADER_WORKAROUND_ENV).is_ok_and(|v| truthy(&v)))
}

/// Whether this factory binding should defer pool construction.
fn defer_first_bind() -> bool {
    reloader_workaround_enabled() && FIRST_FACTORY_BIND.swap(false, Ordering::SeqCst)
}

// ---------------------------------------------------------------------------
// Proxy internals
// ---------------------------------------------------------------------------

/// Where the proxy's resources come from.
enum Source<T: Send + Sync + 'static> {
    /// Nothing bound yet
    Unbound,
    /// One fixed object for everyone; no pool involved
    Shared(Arc<T>),
    /// Factory without a pool: one object per scope key, never returned
    Direct(Arc<FactoryFn<T>>),
    /// Factory behind a pool
    Pooled(Pool<T>),
    /// Pool construction deferred by the reloader workaround
    Deferred(Arc<FactoryFn<T>>),
}

/// One scope's checked-out resource.
enum Holding<T: Send + Sync + 'static> {
    Leased(Guard<T>),
    Owned(Arc<T>),
}

impl<T: Send + Sync + 'static> Holding<T> {
    fn object(&self) -> Arc<T> {
        match self {
            Self::Leased(guard) => guard.share(),
            Self::Owned(obj) => Arc::clone(obj),
        }
    }
}

/// What `get` must do once the binding lock is released.
enum Plan<T: Send + Sync + 'static> {
    Ready(Arc<T>),
    FromPool(Pool<T>),
    Direct(Arc<FactoryFn<T>>),
}

// ---------------------------------------------------------------------------
// Proxy
// ---------------------------------------------------------------------------

/// Polymorphic access layer over a [`Pool`] (or a single shared object).
pub struct Proxy<T: Send + Sync + 'static> {
    source: Mutex<Source<T>>,
    /// Pool parameters; `None` means unpooled direct mode
    pool_cfg: Mutex<Option<PoolConfig>>,
    hooks: Arc<dyn PoolHooks<T>>,
    keys: KeySource,
    held: DashMap<ScopeKey, Holding<T>>,
    /// Creation index for unpooled direct mode
    made: AtomicU64,
}

impl<T: Send + Sync + 'static> Proxy<T> {
    /// Proxy over one fixed shared object (no pool).
    #[must_use]
    pub fn shared(obj: T) -> Self {
        Self {
            source: Mutex::new(Source::Shared(Arc::new(obj))),
            pool_cfg: Mutex::new(None),
            hooks: Arc::new(NoOpHooks),
            keys: KeySource::new(Scope::Shared, None),
            held: DashMap::new(),
            made: AtomicU64::new(0),
        }
    }

    /// Start building a proxy.
    #[must_use]
    pub fn builder() -> ProxyBuilder<T> {
        ProxyBuilder::new()
    }

    /// The scope this proxy derives caller keys for.
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.keys.scope()
    }

    /// Bind (or rebind) a fixed shared object. Any held resources are
    /// returned first.
    pub fn set_obj(&self, obj: T) {
        self.held.clear();
        *self.source.lock() = Source::Shared(Arc::new(obj));
    }

    /// Bind (or rebind) the factory. Builds the internal pool when pool
    /// parameters are configured, unless the reloader workaround defers
    /// that to the first acquisition.
    ///
    /// # Errors
    /// Propagates pool construction failures.
    pub fn set_factory<F>(&self, factory: F) -> Result<()>
    where
        F: Fn(u64) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        self.held.clear();
        let factory: Arc<FactoryFn<T>> = Arc::new(factory);
        let cfg = self.pool_cfg.lock().clone();
        let source = match cfg {
            None => Source::Direct(factory),
            Some(cfg) => {
                if defer_first_bind() {
                    tracing::info!(
                        "deferring pool construction on first factory binding \
                         (reloader workaround)"
                    );
                    Source::Deferred(factory)
                } else {
                    Source::Pooled(self.build_pool(cfg, factory)?)
                }
            }
        };
        *self.source.lock() = source;
        Ok(())
    }

    /// Override the pool parameters before a factory is bound.
    ///
    /// # Errors
    /// Fails if a factory is already bound: the pool exists (or is about
    /// to) and its parameters are fixed.
    pub fn set_pool_config(&self, config: PoolConfig) -> Result<()> {
        let source = self.source.lock();
        match &*source {
            Source::Unbound | Source::Shared(_) => {
                *self.pool_cfg.lock() = Some(config);
                Ok(())
            }
            _ => Err(Error::proxy(
                "pool parameters cannot change after a factory is bound",
            )),
        }
    }

    /// Get the current scope's resource, borrowing one on first access.
    ///
    /// # Errors
    /// [`Error::Proxy`] when nothing is bound; otherwise as the pool's
    /// acquire.
    pub fn get(&self) -> Result<Arc<T>> {
        self.get_inner(None)
    }

    /// As [`get`](Self::get), bounding the capacity wait for this call.
    ///
    /// # Errors
    /// As for [`get`](Self::get).
    pub fn get_timeout(&self, timeout: Duration) -> Result<Arc<T>> {
        self.get_inner(Some(timeout))
    }

    fn get_inner(&self, timeout: Option<Duration>) -> Result<Arc<T>> {
        let plan = {
            let mut source = self.source.lock();
            match &*source {
                Source::Unbound => {
                    return Err(Error::proxy("no object or factory bound"));
                }
                Source::Shared(obj) => Plan::Ready(Arc::clone(obj)),
                Source::Direct(factory) => Plan::Direct(Arc::clone(factory)),
                Source::Pooled(pool) => Plan::FromPool(pool.clone()),
                Source::Deferred(factory) => {
                    // First acquisition after a deferred binding: build now.
                    let factory = Arc::clone(factory);
                    let cfg = self.pool_cfg.lock().clone().unwrap_or_default();
                    let pool = self.build_pool(cfg, factory)?;
                    *source = Source::Pooled(pool.clone());
                    Plan::FromPool(pool)
                }
            }
        };

        match plan {
            Plan::Ready(obj) => Ok(obj),
            Plan::FromPool(pool) => {
                let key = self.keys.key();
                if let Some(holding) = self.held.get(&key) {
                    return Ok(holding.object());
                }
                let guard = pool.acquire_as(key.clone(), timeout)?;
                match self.held.entry(key) {
                    MapEntry::Occupied(existing) => {
                        // Lost a same-scope race; our borrow goes straight back.
                        let obj = existing.get().object();
                        drop(existing);
                        drop(guard);
                        Ok(obj)
                    }
                    MapEntry::Vacant(slot) => {
                        let obj = guard.share();
                        slot.insert(Holding::Leased(guard));
                        Ok(obj)
                    }
                }
            }
            Plan::Direct(factory) => {
                let key = self.keys.key();
                if let Some(holding) = self.held.get(&key) {
                    return Ok(holding.object());
                }
                let index = self.made.fetch_add(1, Ordering::SeqCst);
                let obj = Arc::new(
                    factory(index).map_err(|source| Error::Factory { index, source })?,
                );
                match self.held.entry(key) {
                    MapEntry::Occupied(existing) => Ok(existing.get().object()),
                    MapEntry::Vacant(slot) => {
                        slot.insert(Holding::Owned(Arc::clone(&obj)));
                        Ok(obj)
                    }
                }
            }
        }
    }

    /// Return the current scope's resource to the pool. A no-op when the
    /// scope holds nothing (or the proxy wraps a fixed shared object).
    pub fn ret(&self) {
        self.held.remove(&self.keys.key());
    }

    /// Whether the current scope already holds a resource, without
    /// acquiring one. A bound shared object counts as held.
    #[must_use]
    pub fn has(&self) -> bool {
        match &*self.source.lock() {
            Source::Unbound => false,
            Source::Shared(_) => true,
            _ => self.held.contains_key(&self.keys.key()),
        }
    }

    /// Scoped access: acquire on entry, run `f`, always return on exit.
    ///
    /// # Errors
    /// As for [`get`](Self::get).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let obj = self.get()?;
        let out = f(&obj);
        self.ret();
        Ok(out)
    }

    /// Statistics of the internal pool, when one exists.
    #[must_use]
    pub fn stats(&self) -> Option<PoolStats> {
        match &*self.source.lock() {
            Source::Pooled(pool) => Some(pool.stats()),
            _ => None,
        }
    }

    /// Shut down the internal pool, when one exists. Held resources are
    /// returned first.
    pub fn shutdown(&self, grace: Duration) {
        self.held.clear();
        if let Source::Pooled(pool) = &*self.source.lock() {
            pool.shutdown(grace);
        }
    }

    fn build_pool(&self, config: PoolConfig, factory: Arc<FactoryFn<T>>) -> Result<Pool<T>> {
        Pool::from_parts(config, factory, Arc::clone(&self.hooks))
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for Proxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &*self.source.lock() {
            Source::Unbound => "unbound",
            Source::Shared(_) => "shared",
            Source::Direct(_) => "direct",
            Source::Pooled(_) => "pooled",
            Source::Deferred(_) => "deferred",
        };
        f.debug_struct("Proxy")
            .field("source", &source)
            .field("scope", &self.keys.scope())
            .field("held", &self.held.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ProxyBuilder
// ---------------------------------------------------------------------------

/// Builder for [`Proxy`].
///
/// Exactly one of an immediate object or a factory may be supplied; both
/// may also be omitted and bound later. The default scope follows the
/// binding: a fixed object is process-shared, a factory is per-thread.
pub struct ProxyBuilder<T: Send + Sync + 'static> {
    obj: Option<T>,
    factory: Option<Arc<FactoryFn<T>>>,
    scope: Option<Scope>,
    pool: Option<PoolConfig>,
    hooks: Arc<dyn PoolHooks<T>>,
    task_key: Option<Arc<TaskKeyFn>>,
}

impl<T: Send + Sync + 'static> ProxyBuilder<T> {
    fn new() -> Self {
        Self {
            obj: None,
            factory: None,
            scope: None,
            pool: None,
            hooks: Arc::new(NoOpHooks),
            task_key: None,
        }
    }

    /// Wrap this fixed object (exclusive with [`factory`](Self::factory)).
    #[must_use]
    pub fn obj(mut self, obj: T) -> Self {
        self.obj = Some(obj);
        self
    }

    /// Create resources with this factory.
    #[must_use]
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(u64) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Select the sharing scope explicitly.
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Pool the factory's resources with these parameters. Without this,
    /// a factory-bound proxy creates one resource per scope key and never
    /// returns it.
    #[must_use]
    pub fn pool(mut self, config: PoolConfig) -> Self {
        self.pool = Some(config);
        self
    }

    /// Lifecycle hooks for the internal pool.
    #[must_use]
    pub fn hooks(mut self, hooks: Arc<dyn PoolHooks<T>>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Identity provider for [`Scope::Task`] callers.
    #[must_use]
    pub fn task_key<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Option<u64> + Send + Sync + 'static,
    {
        self.task_key = Some(Arc::new(provider));
        self
    }

    /// Build the proxy.
    ///
    /// # Errors
    /// Fails when both an object and a factory are supplied, or when pool
    /// construction fails.
    pub fn build(self) -> Result<Proxy<T>> {
        if self.obj.is_some() && self.factory.is_some() {
            return Err(Error::proxy("cannot bind both an object and a factory"));
        }
        let scope = self.scope.unwrap_or(if self.obj.is_some() {
            Scope::Shared
        } else {
            Scope::Thread
        });

        let proxy = Proxy {
            source: Mutex::new(Source::Unbound),
            pool_cfg: Mutex::new(self.pool),
            hooks: self.hooks,
            keys: KeySource::new(scope, self.task_key),
            held: DashMap::new(),
            made: AtomicU64::new(0),
        };

        if let Some(obj) = self.obj {
            proxy.set_obj(obj);
        } else if let Some(factory) = self.factory {
            let cfg = proxy.pool_cfg.lock().clone();
            let source = match cfg {
                None => Source::Direct(factory),
                Some(cfg) => {
                    if defer_first_bind() {
                        tracing::info!(
                            "deferring pool construction on first factory binding \
                             (reloader workaround)"
                        );
                        Source::Deferred(factory)
                    } else {
                        Source::Pooled(proxy.build_pool(cfg, factory)?)
                    }
                }
            };
            *proxy.source.lock() = source;
        }
        Ok(proxy)
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for ProxyBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyBuilder")
            .field("has_obj", &self.obj.is_some())
            .field("has_factory", &self.factory.is_some())
            .field("scope", &self.scope)
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory(n: u64) -> std::result::Result<String, BoxError> {
        Ok(format!("R{n}"))
    }

    fn pool_config() -> PoolConfig {
        PoolConfig {
            min_size: 0,
            max_size: 4,
            ..Default::default()
        }
    }

    #[test]
    fn truthy_values() {
        assert!(truthy("1"));
        assert!(truthy("TRUE"));
        assert!(truthy("yes"));
        assert!(truthy("On"));
        assert!(!truthy("0"));
        assert!(!truthy("off"));
        assert!(!truthy(""));
    }

    #[test]
    fn shared_proxy_returns_same_object() {
        let proxy = Proxy::shared("conn".to_string());
        assert_eq!(proxy.scope(), Scope::Shared);
        assert!(proxy.has());
        let a = proxy.get().unwrap();
        let b = proxy.get().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        proxy.ret(); // no-op
        assert!(proxy.has());
    }

    #[test]
    fn unbound_proxy_fails_until_set() {
        let proxy: Proxy<String> = Proxy::builder().build().unwrap();
        assert!(!proxy.has());
        assert!(matches!(proxy.get(), Err(Error::Proxy { .. })));

        proxy.set_obj("late".to_string());
        assert_eq!(*proxy.get().unwrap(), "late");
    }

    #[test]
    fn factory_defaults_to_thread_scope() {
        let proxy = Proxy::builder().factory(factory).build().unwrap();
        assert_eq!(proxy.scope(), Scope::Thread);
    }

    #[test]
    fn pooled_gets_are_sticky_until_ret() {
        let proxy = Proxy::builder()
            .factory(factory)
            .pool(pool_config())
            .build()
            .unwrap();

        assert!(!proxy.has());
        let a = proxy.get().unwrap();
        assert!(proxy.has());
        let b = proxy.get().unwrap();
        assert!(Arc::ptr_eq(&a, &b), "repeated gets see the same resource");

        proxy.ret();
        assert!(!proxy.has());
        let stats = proxy.stats().unwrap();
        assert_eq!(stats.n_avail, 1, "resource went back to the pool");
    }

    #[test]
    fn direct_mode_creates_one_object_per_scope() {
        let proxy = Proxy::builder().factory(factory).build().unwrap();
        let here = proxy.get().unwrap();
        assert_eq!(*here, "R0");
        assert!(proxy.stats().is_none(), "no pool in direct mode");
    }

    #[test]
    fn with_returns_resource_afterwards() {
        let proxy = Proxy::builder()
            .factory(factory)
            .pool(pool_config())
            .build()
            .unwrap();
        let len = proxy.with(|s| s.len()).unwrap();
        assert_eq!(len, 2);
        assert!(!proxy.has(), "scoped access returns on exit");
    }

    #[test]
    fn both_obj_and_factory_is_an_error() {
        let result = Proxy::builder()
            .obj("x".to_string())
            .factory(factory)
            .build();
        assert!(matches!(result, Err(Error::Proxy { .. })));
    }

    #[test]
    fn pool_config_is_frozen_once_factory_bound() {
        let proxy = Proxy::builder()
            .factory(factory)
            .pool(pool_config())
            .build()
            .unwrap();
        assert!(proxy.set_pool_config(PoolConfig::default()).is_err());

        let unbound: Proxy<String> = Proxy::builder().build().unwrap();
        assert!(unbound.set_pool_config(pool_config()).is_ok());
        unbound.set_factory(factory).unwrap();
        assert!(unbound.stats().is_some(), "late config produced a pool");
    }

    #[test]
    fn task_scope_separates_holdings_by_provider_key() {
        use std::sync::atomic::AtomicU64;
        static CURRENT: AtomicU64 = AtomicU64::new(1);

        let proxy = Proxy::builder()
            .factory(factory)
            .pool(pool_config())
            .scope(Scope::Task)
            .task_key(|| Some(CURRENT.load(Ordering::SeqCst)))
            .build()
            .unwrap();

        let one = proxy.get().unwrap();
        CURRENT.store(2, Ordering::SeqCst);
        let two = proxy.get().unwrap();
        assert!(!Arc::ptr_eq(&one, &two), "distinct tasks get distinct resources");

        CURRENT.store(1, Ordering::SeqCst);
        let one_again = proxy.get().unwrap();
        assert!(Arc::ptr_eq(&one, &one_again));
    }
}
