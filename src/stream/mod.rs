//! Redis Stream producer and consumer group support.
//!
//! The `producer` submodule appends entries (XADD) with optional MINID
//! trimming. The `consumer` submodule runs a consumer group read loop that
//! delivers batches to a [`BatchSink`] and acknowledges them afterwards.
//!
//! Both talk to Redis through the [`StreamStore`] trait; [`MemoryStreamStore`]
//! implements the same semantics in process.

mod consumer;
mod entry;
mod group;
mod memory;
mod payload;
mod producer;
mod redis_store;
mod sink;
mod store;

pub use consumer::{
    ConsumerConfig, ConsumerHandle, ConsumerIdentity, ConsumerStats, CycleOutcome,
    GroupConsumerLoop, GroupStatus, LoopController, LoopState, ReadFrom, RunMode,
};
pub use entry::{Batch, EntryId, Fields, StreamEntry};
pub use group::{create_consumer_group, destroy_consumer_group, pending_count};
pub use memory::MemoryStreamStore;
pub use payload::{MessageSource, flatten_object};
pub use producer::{
    AppendResult, ProducerConfig, StreamProducer, TrimMode, TrimOutcome, TrimPolicy,
    publish_records, publish_to_redis,
};
pub use redis_store::RedisStreamStore;
pub use sink::{BatchSink, ChannelSink, FnSink};
pub use store::{AUTO_ID, ReadCursor, ReadReply, StreamStore};
