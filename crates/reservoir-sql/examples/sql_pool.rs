//! SQL session pool example.
//!
//! This example runs the SQL policy against the in-memory backend from
//! `reservoir-testing`, so no database server is needed. It shows
//! blocking and async checkouts, pool status, and how the pool reacts
//! when the server goes away and comes back.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=debug cargo run -p reservoir-sql --example sql_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use reservoir::{CancellationToken, PoolError};
use reservoir_sql::{SqlPolicy, SqlPool, SqlSession};
use reservoir_testing::{MockBackend, MockFactory};

fn print_status(pool: &SqlPool<MockFactory>) {
    let status = pool.status();
    println!(
        "  idle={} in_use={} total={}/{} waiting={} available={}",
        status.idle, status.in_use, status.total, status.max, status.waiting, status.is_available
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let backend = MockBackend::new();
    let pool = Arc::new(
        SqlPolicy::builder(MockFactory::new(Arc::clone(&backend)))
            .connection_string("Server=localhost;Database=orders;User Id=app;Password=secret;Max Pool Size=4")
            .name("orders")
            .check_available_interval(Duration::from_millis(100))
            .on_unavailable(|| println!("  >> orders database went away"))
            .on_available(|| println!("  >> orders database is back"))
            .build_pool()?,
    );

    println!("=== SQL Session Pool Example ===\n");
    println!("Prewarmed pool:");
    print_status(&pool);

    // Example 1: Blocking checkout
    println!("\n1. Blocking checkout:");
    {
        let session = pool.acquire()?;
        println!("  session {} is {:?}", session.id(), session.state());
        print_status(&pool);
    }
    print_status(&pool);

    // Example 2: Concurrent async checkouts (more tasks than sessions)
    println!("\n2. Eight tasks sharing four sessions:");
    let mut tasks = Vec::new();
    for task in 0..8 {
        let pool = Arc::clone(&pool);
        tasks.push(tokio::spawn(async move {
            let session = pool.acquire_async(&CancellationToken::new()).await?;
            tokio::time::sleep(Duration::from_millis(20)).await;
            println!("  task {task} used session {}", session.id());
            Ok::<_, PoolError>(())
        }));
    }
    for task in tasks {
        task.await??;
    }
    print_status(&pool);

    // Example 3: Outage and recovery
    println!("\n3. Server outage:");
    backend.set_down(true);
    // Idle sessions fail to reopen; each failure counts toward the threshold.
    for attempt in 1..=4 {
        match pool.try_acquire() {
            Ok(_) => println!("  attempt {attempt}: unexpected success"),
            Err(e) => println!("  attempt {attempt}: {e}"),
        }
    }
    print_status(&pool);

    backend.set_down(false);
    while !pool.is_available() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    println!("  recovered");
    print_status(&pool);

    let stats = pool.stats();
    println!(
        "\nStats: created={} destroyed={} acquisitions={} timeouts={}",
        stats.created, stats.destroyed, stats.acquisitions, stats.timeouts
    );

    pool.close();
    Ok(())
}
