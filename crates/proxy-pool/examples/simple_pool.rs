//! Minimal pool usage: bounded capacity, recycling, and stats.

use std::time::Duration;

use proxy_pool::{Pool, PoolConfig};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("proxy_pool=debug")),
        )
        .init();

    let config = PoolConfig {
        min_size: 1,
        max_size: 3,
        timeout: Duration::from_secs(1),
        max_use: 5,
        ..Default::default()
    };

    // The "resource" stands in for a database connection or session.
    let pool = Pool::new(config, |n| Ok(format!("connection-{n}"))).expect("valid config");

    for round in 0..8 {
        let conn = pool.acquire().expect("acquire within timeout");
        println!("round {round}: using {} (entry {})", *conn, conn.id());
        // Dropping the guard returns the connection; every fifth use the
        // pool retires it and constructs a replacement on demand.
    }

    println!("status: {pool}");
    println!(
        "stats: {}",
        serde_json::to_string_pretty(&pool.stats().to_json()).unwrap()
    );

    pool.shutdown(Duration::from_secs(1));
}
