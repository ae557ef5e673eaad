//! Scope isolation tests for the proxy: per-thread stickiness, reuse
//! after return, and task-key isolation.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use proxy_pool::{BoxError, PoolConfig, Proxy, Scope};

fn factory(n: u64) -> Result<String, BoxError> {
    Ok(format!("R{n}"))
}

fn pooled() -> PoolConfig {
    PoolConfig {
        min_size: 0,
        max_size: 4,
        timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

#[test]
fn two_threads_hold_distinct_resources() {
    let proxy = Arc::new(
        Proxy::builder()
            .factory(factory)
            .scope(Scope::Thread)
            .pool(pooled())
            .build()
            .unwrap(),
    );
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let proxy = Arc::clone(&proxy);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let first = proxy.get().unwrap();
                // Both threads hold simultaneously before comparing.
                barrier.wait();
                let second = proxy.get().unwrap();
                assert!(
                    Arc::ptr_eq(&first, &second),
                    "a scope sees one resource across calls"
                );
                barrier.wait();
                let value = first.clone();
                proxy.ret();
                value
            })
        })
        .collect();

    let values: Vec<Arc<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_ne!(values[0], values[1], "threads are isolated from each other");

    // Both resources are back and reusable by anyone.
    let stats = proxy.stats().unwrap();
    assert_eq!(stats.n_busy, 0);
    assert_eq!(stats.n_avail, 2);
    let reused = proxy.get().unwrap();
    assert!(values.contains(&reused), "returned resources are recycled");
}

#[test]
fn returned_resource_is_reusable_by_another_thread() {
    let proxy = Arc::new(
        Proxy::builder()
            .factory(factory)
            .pool(PoolConfig {
                min_size: 0,
                max_size: 1,
                timeout: Duration::from_secs(2),
                ..Default::default()
            })
            .build()
            .unwrap(),
    );

    let value = {
        let obj = proxy.get().unwrap();
        let value = obj.clone();
        proxy.ret();
        value
    };

    let other = {
        let proxy = Arc::clone(&proxy);
        thread::spawn(move || {
            let obj = proxy.get().unwrap();
            let got = obj.clone();
            proxy.ret();
            got
        })
    };
    assert_eq!(
        other.join().unwrap(),
        value,
        "with max_size=1 the other thread must reuse the same resource"
    );
}

#[test]
fn ret_is_idempotent_per_scope() {
    let proxy = Proxy::builder()
        .factory(factory)
        .pool(pooled())
        .build()
        .unwrap();

    proxy.ret(); // nothing held: no-op
    let _ = proxy.get().unwrap();
    proxy.ret();
    proxy.ret(); // second return: no-op, no bad-return recorded
    let stats = proxy.stats().unwrap();
    assert_eq!(stats.n_bad_returns, 0);
    assert_eq!(stats.n_returns, 1);
}

#[test]
fn task_scope_isolates_cooperative_tasks_on_one_thread() {
    thread_local! {
        static CURRENT_TASK: std::cell::Cell<u64> = const { std::cell::Cell::new(0) };
    }

    let proxy = Proxy::builder()
        .factory(factory)
        .scope(Scope::Task)
        .task_key(|| Some(CURRENT_TASK.with(std::cell::Cell::get)))
        .pool(pooled())
        .build()
        .unwrap();

    CURRENT_TASK.with(|t| t.set(1));
    let task_one = proxy.get().unwrap();

    CURRENT_TASK.with(|t| t.set(2));
    let task_two = proxy.get().unwrap();
    assert!(!Arc::ptr_eq(&task_one, &task_two));

    // Switching back resumes the first task's resource.
    CURRENT_TASK.with(|t| t.set(1));
    assert!(Arc::ptr_eq(&task_one, &proxy.get().unwrap()));
    proxy.ret();

    // Only task 1's holding was returned.
    let stats = proxy.stats().unwrap();
    assert_eq!(stats.n_busy, 1);
    assert_eq!(stats.n_avail, 1);
}

#[test]
fn shutdown_via_proxy_returns_holdings_first() {
    let proxy = Proxy::builder()
        .factory(factory)
        .pool(pooled())
        .build()
        .unwrap();
    let _obj = proxy.get().unwrap();

    proxy.shutdown(Duration::from_millis(200));
    let stats = proxy.stats().unwrap();
    assert_eq!(stats.n_total, 0);
    assert_eq!(stats.n_killed, 0, "holdings were returned, not killed");
    assert!(proxy.get().unwrap_err().is_closed());
}
