//! Common utilities for integration tests.
//!
//! Helpers for connecting to Redis through `redis-cli`, cleaning up keys, and
//! wiring up tracing output. Tests against a live server are `#[ignore]`d and
//! skip themselves when `redis-cli PING` fails.
//!
//! ## Environment Variables
//!
//! - `REDIS_URL`: Redis connection URL (default: `redis://localhost:6379`)
//! - `REDIS_PORT`: Redis port for CLI commands (default: `6379`)
//! - `RUST_LOG`: tracing filter for test output (default: `warn`)

#![allow(dead_code)]

use std::process::Command;
use std::sync::Once;
use std::time::Duration;

use redis_stream_poller::{AUTO_ID, Batch, EntryId, MemoryStreamStore, StreamStore};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install a test-friendly tracing subscriber once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Get the Redis URL from environment or default.
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

/// Default Redis port for CLI commands.
/// Override with REDIS_PORT env var for CI.
pub fn redis_port() -> u16 {
    std::env::var("REDIS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(6379)
}

/// Check if Redis is available at the test port.
pub fn redis_available() -> bool {
    let port = redis_port();
    let output = Command::new("redis-cli")
        .args(["-p", &port.to_string(), "PING"])
        .output();

    match output {
        Ok(o) => o.status.success() && String::from_utf8_lossy(&o.stdout).trim() == "PONG",
        Err(_) => false,
    }
}

/// Run a redis-cli command and return success status.
pub fn redis_cli(args: &[&str]) -> bool {
    let port_str = redis_port().to_string();
    let mut full_args = vec!["-p", &port_str];
    full_args.extend(args);

    Command::new("redis-cli")
        .args(&full_args)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run a redis-cli command and return the output as a string.
pub fn redis_cli_output(args: &[&str]) -> Option<String> {
    let port_str = redis_port().to_string();
    let mut full_args = vec!["-p", &port_str];
    full_args.extend(args);

    Command::new("redis-cli")
        .args(&full_args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
}

/// Clean up all keys matching a pattern.
pub fn cleanup_keys(pattern: &str) {
    let port_str = redis_port().to_string();

    let output = Command::new("redis-cli")
        .args(["-p", &port_str, "KEYS", pattern])
        .output()
        .ok();

    if let Some(o) = output {
        let stdout = String::from_utf8_lossy(&o.stdout);
        for key in stdout.lines().filter(|s| !s.is_empty()) {
            let _ = Command::new("redis-cli")
                .args(["-p", &port_str, "DEL", key])
                .output();
        }
    }
}

/// Append `count` entries with fields `n` (1-based) and `kind`.
pub fn setup_test_stream(stream: &str, count: usize) {
    for i in 1..=count {
        redis_cli(&["XADD", stream, "*", "n", &i.to_string(), "kind", "test"]);
    }
}

/// Build a field list from string pairs.
pub fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Append `count` numbered entries to an in-memory stream.
pub async fn append_numbered(store: &MemoryStreamStore, stream: &str, count: usize) -> Vec<EntryId> {
    let mut conn = store.connect();
    let mut ids = Vec::with_capacity(count);
    for i in 1..=count {
        let id = conn
            .append(stream, AUTO_ID, &fields(&[("n", &i.to_string())]))
            .await
            .expect("append failed");
        ids.push(id);
    }
    ids
}

/// The `n` field of every entry in a batch.
pub fn numbers(batch: &Batch) -> Vec<u32> {
    batch
        .iter()
        .filter_map(|e| e.fields.get("n").and_then(|n| n.parse().ok()))
        .collect()
}

/// Poll `check` every 10ms until it returns true or `timeout` elapses.
pub async fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
