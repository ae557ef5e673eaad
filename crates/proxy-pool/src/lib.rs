//! # proxy-pool
//!
//! Thread-safe pooling of expensive, reusable resources (database
//! connections, authentication sessions, search clients), plus a thin
//! scoped proxy that hands each caller its own resource.
//!
//! The pool is a bounded, self-healing container of opaque resources:
//! capacity admission with timed waits, usage accounting, a background
//! housekeeper (idle/age/health eviction, forced reclaim of long-held
//! resources, top-up to a minimum), lifecycle hooks, and an observable
//! JSON-shaped statistics snapshot. The pool never interprets the
//! resources it holds; it only counts and times them and calls the
//! user-supplied hooks.
//!
//! ```
//! use std::time::Duration;
//! use proxy_pool::{Pool, PoolConfig};
//!
//! let config = PoolConfig {
//!     min_size: 0,
//!     max_size: 2,
//!     timeout: Duration::from_millis(500),
//!     ..Default::default()
//! };
//! let pool = Pool::new(config, |n| Ok(format!("conn-{n}"))).unwrap();
//!
//! let conn = pool.acquire().unwrap();
//! assert_eq!(*conn, "conn-0");
//! drop(conn); // returns to the pool
//!
//! // The same resource is recycled, oldest-returned first.
//! assert_eq!(*pool.acquire().unwrap(), "conn-0");
//! ```
//!
//! The [`Proxy`] adds per-scope stickiness on top: one resource per OS
//! thread (or per injected lightweight-task key), held across calls until
//! explicitly returned.
//!
//! ```
//! use proxy_pool::{PoolConfig, Proxy};
//!
//! let proxy = Proxy::builder()
//!     .factory(|n| Ok(format!("session-{n}")))
//!     .pool(PoolConfig { min_size: 0, max_size: 4, ..Default::default() })
//!     .build()
//!     .unwrap();
//!
//! let mine = proxy.get().unwrap();   // borrows for this thread
//! let same = proxy.get().unwrap();   // sticky: the same resource
//! assert!(std::sync::Arc::ptr_eq(&mine, &same));
//! proxy.ret();                       // back to the pool
//! ```

pub mod config;
pub mod error;
mod entry;
mod gate;
pub mod hooks;
mod housekeeper;
pub mod pool;
pub mod proxy;
pub mod scope;
pub mod stats;

pub use config::PoolConfig;
pub use error::{BoxError, Error, Result};
pub use hooks::{NoOpHooks, PoolHooks};
pub use pool::{Guard, Pool};
pub use proxy::{Proxy, ProxyBuilder, RELOADER_WORKAROUND_ENV};
pub use scope::{KeySource, Scope, ScopeKey, TaskKeyFn};
pub use stats::{EntryStats, PoolStats};
