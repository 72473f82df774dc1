//! Blocking consumer group administration.
//!
//! Convenience functions for scripts and setup code that don't run inside a
//! tokio runtime. Each call opens its own connection and closes it again.

use tokio::runtime::Runtime;

use super::redis_store::RedisStreamStore;
use super::store::StreamStore;
use crate::error::{Error, Result};

fn runtime() -> Result<Runtime> {
    Runtime::new().map_err(|e| Error::Runtime(format!("Failed to create runtime: {}", e)))
}

/// Create a consumer group, creating the stream if needed.
///
/// # Arguments
/// * `url` - Redis connection URL
/// * `stream` - Stream key
/// * `group` - Consumer group name
/// * `start_id` - Starting ID (`"0"` for the beginning, `"$"` for new entries only)
///
/// # Returns
/// `true` if the group was created, `false` if it already existed.
pub fn create_consumer_group(url: &str, stream: &str, group: &str, start_id: &str) -> Result<bool> {
    let runtime = runtime()?;
    runtime.block_on(async {
        let mut store = RedisStreamStore::connect_url(url).await?;
        let result = store.create_group(stream, group, start_id).await;
        store.close().await?;

        match result {
            Ok(()) => Ok(true),
            Err(Error::AlreadyExists { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    })
}

/// Destroy a consumer group.
///
/// # Returns
/// `true` if the group existed.
pub fn destroy_consumer_group(url: &str, stream: &str, group: &str) -> Result<bool> {
    let runtime = runtime()?;
    runtime.block_on(async {
        let mut store = RedisStreamStore::connect_url(url).await?;
        let result = store.destroy_group(stream, group).await;
        store.close().await?;
        result
    })
}

/// Number of delivered but unacknowledged entries in a group.
pub fn pending_count(url: &str, stream: &str, group: &str) -> Result<u64> {
    let runtime = runtime()?;
    runtime.block_on(async {
        let mut store = RedisStreamStore::connect_url(url).await?;
        let result = store.pending_count(stream, group).await;
        store.close().await?;
        result
    })
}
