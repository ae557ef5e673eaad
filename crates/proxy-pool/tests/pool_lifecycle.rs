//! End-to-end lifecycle tests: capacity admission, recycling order,
//! wear-out, idle eviction, and shutdown accounting.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use proxy_pool::{BoxError, Pool, PoolConfig, PoolHooks};

fn factory(n: u64) -> Result<String, BoxError> {
    Ok(format!("R{n}"))
}

/// Hooks that count closer invocations.
#[derive(Default)]
struct CloseCounter {
    closed: AtomicUsize,
}

impl PoolHooks<String> for CloseCounter {
    fn on_close(&self, _obj: &String) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn bounded_pool_admits_then_times_out() {
    let config = PoolConfig {
        min_size: 2,
        max_size: 2,
        timeout: Duration::from_millis(500),
        ..Default::default()
    };
    let pool = Pool::new(config, factory).unwrap();

    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    assert_ne!(a.id(), b.id(), "concurrent holders get distinct resources");
    assert!(a.starts_with('R') && b.starts_with('R'));

    // Saturated: the third acquire fails within the configured wait.
    let start = Instant::now();
    let err = pool.acquire().unwrap_err();
    let elapsed = start.elapsed();
    assert!(err.is_timeout());
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(900), "bounded wait law");

    // Releasing frees exactly one slot, and the freed resource is reused.
    let a_id = a.id();
    drop(a);
    let c = pool.acquire().unwrap();
    assert_eq!(c.id(), a_id);
}

#[test]
fn recycle_law_same_thread_same_resource() {
    let pool = Pool::new(
        PoolConfig {
            min_size: 0,
            ..Default::default()
        },
        factory,
    )
    .unwrap();
    let first = pool.acquire().unwrap();
    let id = first.id();
    drop(first);
    for _ in 0..5 {
        let again = pool.acquire().unwrap();
        assert_eq!(again.id(), id, "recycle law: nothing ages the resource out");
        drop(again);
    }
    assert_eq!(pool.stats().n_created, 1);
}

#[test]
fn max_use_destroys_after_k_acquisitions() {
    let hooks = Arc::new(CloseCounter::default());
    let config = PoolConfig {
        min_size: 0,
        max_use: 2,
        ..Default::default()
    };
    let pool = Pool::with_hooks(config, factory, hooks.clone()).unwrap();

    let first_id = {
        let g = pool.acquire().unwrap();
        g.id()
    };
    {
        let g = pool.acquire().unwrap();
        assert_eq!(g.id(), first_id, "second use recycles the same resource");
    }
    // Two uses reached: the resource was retired on its second return.
    let third = pool.acquire().unwrap();
    assert_ne!(third.id(), first_id, "retire-on-use law");
    assert_eq!(hooks.closed.load(Ordering::SeqCst), 1);
    assert_eq!(pool.stats().n_destroyed, 1);
}

#[test]
fn idle_resources_are_evicted_and_closed_once() {
    let hooks = Arc::new(CloseCounter::default());
    let config = PoolConfig {
        min_size: 0,
        max_avail_delay: Duration::from_millis(200),
        hk_delay: Duration::from_millis(100),
        ..Default::default()
    };
    let pool = Pool::with_hooks(config, factory, hooks.clone()).unwrap();

    let old_id = {
        let g = pool.acquire().unwrap();
        g.id()
    };
    std::thread::sleep(Duration::from_millis(500));

    // Idle-retire law: the entry is gone well before now.
    let stats = pool.stats();
    assert_eq!(stats.n_avail, 0);
    assert_eq!(stats.n_destroyed, 1);
    assert_eq!(hooks.closed.load(Ordering::SeqCst), 1);

    let fresh = pool.acquire().unwrap();
    assert_ne!(fresh.id(), old_id);
}

#[test]
fn stats_snapshot_has_the_documented_shape() {
    let config = PoolConfig {
        min_size: 0,
        max_size: 3,
        timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let pool = Pool::new(config, factory).unwrap();
    let _held = pool.acquire().unwrap();
    drop(pool.acquire().unwrap());

    let json = pool.stats().to_json();
    for field in [
        "pool_id",
        "version",
        "started_at",
        "now",
        "n_total",
        "n_avail",
        "n_busy",
        "n_created",
        "n_destroyed",
        "n_acquisitions",
        "n_returns",
        "n_timeouts",
        "n_health_fail",
        "n_killed",
        "n_bad_returns",
        "config",
        "avail",
        "busy",
    ] {
        assert!(json.get(field).is_some(), "missing stats field {field}");
    }
    assert_eq!(json["n_busy"], 1);
    assert_eq!(json["n_avail"], 1);
    assert_eq!(json["config"]["max_size"], 3);
    assert!(json["busy"][0]["holder"].as_str().unwrap().starts_with("thread:"));
    // ISO-8601 timestamps
    assert!(json["now"].as_str().unwrap().contains('T'));
}

#[test]
fn user_stats_hook_is_merged_into_snapshot() {
    struct UserStats;
    impl PoolHooks<String> for UserStats {
        fn stats(&self) -> Option<serde_json::Value> {
            Some(serde_json::json!({"hits": 3}))
        }
        fn trace(&self, obj: &String) -> Option<String> {
            Some(format!("<{obj}>"))
        }
    }

    let pool = Pool::with_hooks(
        PoolConfig {
            min_size: 0,
            ..Default::default()
        },
        factory,
        Arc::new(UserStats),
    )
    .unwrap();
    let _g = pool.acquire().unwrap();

    let json = pool.stats().to_json();
    assert_eq!(json["user"]["hits"], 3);
    assert_eq!(json["busy"][0]["trace"], "<R0>");
}

#[test]
fn shutdown_destroys_everything_and_rejects_callers() {
    let hooks = Arc::new(CloseCounter::default());
    let config = PoolConfig {
        min_size: 2,
        max_size: 4,
        hk_delay: Duration::from_millis(50),
        ..Default::default()
    };
    let pool = Pool::with_hooks(config, factory, hooks.clone()).unwrap();
    let held = pool.acquire().unwrap();
    std::thread::sleep(Duration::from_millis(150)); // let the top-up land

    let returner = {
        let pool = pool.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            drop(held);
        })
    };
    pool.shutdown(Duration::from_secs(5));
    returner.join().unwrap();

    let stats = pool.stats();
    assert_eq!(stats.n_total, 0);
    assert_eq!(stats.n_created, stats.n_destroyed);
    assert_eq!(
        hooks.closed.load(Ordering::SeqCst) as u64,
        stats.n_destroyed,
        "every destruction went through the closer"
    );
    assert!(pool.acquire().unwrap_err().is_closed());
}
