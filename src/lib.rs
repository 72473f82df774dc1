//! # redis-stream-poller
//!
//! Publish to Redis Streams and consume them through consumer groups.
//!
//! This crate provides two halves that share one stream store abstraction:
//!
//! | Component | Redis commands | Description |
//! |-----------|----------------|-------------|
//! | [`StreamProducer`] | XADD, XTRIM MINID | Append entries with optional age-based trimming |
//! | [`GroupConsumerLoop`] | XGROUP CREATE, XREADGROUP, XACK | Batched at-least-once delivery to a [`BatchSink`] |
//!
//! ## Quick Start
//!
//! ### Publishing
//!
//! ```no_run
//! use redis_stream_poller::{ProducerConfig, RedisStreamStore, StreamProducer, TrimPolicy};
//!
//! # async fn example() -> redis_stream_poller::Result<()> {
//! let store = RedisStreamStore::connect_url("redis://localhost:6379").await?;
//! let config = ProducerConfig::new("events").with_trim(TrimPolicy::days(7));
//! let mut producer = StreamProducer::new(store, config)?;
//!
//! let result = producer
//!     .send(&[("action".to_string(), "login".to_string())])
//!     .await?;
//! println!("appended {}", result.id);
//! producer.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Consuming
//!
//! ```no_run
//! use redis_stream_poller::{
//!     Batch, ConsumerConfig, ConsumerIdentity, FnSink, GroupConsumerLoop, RedisStreamStore,
//! };
//!
//! # async fn example() -> redis_stream_poller::Result<()> {
//! let store = RedisStreamStore::connect_url("redis://localhost:6379").await?;
//! let sink = FnSink::new(|batch: &Batch| {
//!     println!("{}", batch.to_json());
//!     Ok(())
//! });
//!
//! let consumer = GroupConsumerLoop::new(
//!     store,
//!     ConsumerIdentity::new("events", "workers", "worker-1"),
//!     ConsumerConfig::new().with_batch_size(100),
//!     sink,
//! )?;
//! let handle = consumer.start().await?;
//! // ...
//! handle.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Delivery Guarantees
//!
//! Entries are acknowledged only after the sink accepted the batch. A failed
//! batch stays in the group's pending entry list and is delivered again to the
//! same consumer, so sinks must tolerate duplicates.

mod connection;
mod error;
pub mod stream;

pub use connection::{ConnectionConfig, RedisConnection};
pub use error::{Error, Result, SinkError};
pub use stream::{
    AUTO_ID, AppendResult, Batch, BatchSink, ChannelSink, ConsumerConfig, ConsumerHandle,
    ConsumerIdentity, ConsumerStats, CycleOutcome, EntryId, Fields, FnSink, GroupConsumerLoop,
    GroupStatus, LoopController, LoopState, MemoryStreamStore, MessageSource, ProducerConfig,
    ReadCursor, ReadFrom, ReadReply, RedisStreamStore, RunMode, StreamEntry, StreamProducer,
    StreamStore, TrimMode, TrimOutcome, TrimPolicy, create_consumer_group, destroy_consumer_group,
    pending_count, publish_records, publish_to_redis,
};
