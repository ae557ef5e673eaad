//! Per-thread proxy usage: each worker thread transparently sees its own
//! pooled resource across calls, then hands it back.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use proxy_pool::{PoolConfig, Proxy, Scope};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("proxy_pool=debug")),
        )
        .init();

    let proxy = Arc::new(
        Proxy::builder()
            .factory(|n| Ok(format!("session-{n}")))
            .scope(Scope::Thread)
            .pool(PoolConfig {
                min_size: 0,
                max_size: 4,
                timeout: Duration::from_secs(1),
                ..Default::default()
            })
            .build()
            .expect("valid proxy"),
    );

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let proxy = Arc::clone(&proxy);
            thread::spawn(move || {
                // Both calls see the same session: the proxy is sticky
                // within a thread until ret().
                let first = proxy.get().expect("acquire");
                let second = proxy.get().expect("reuse");
                assert!(Arc::ptr_eq(&first, &second));
                println!("worker {worker} used {first}");
                proxy.ret();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    if let Some(stats) = proxy.stats() {
        println!(
            "pool after workers: total={} avail={} acquisitions={}",
            stats.n_total, stats.n_avail, stats.n_acquisitions
        );
    }
    proxy.shutdown(Duration::from_secs(1));
}
