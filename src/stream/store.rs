//! The stream store seam.
//!
//! Producer and consumer loop talk to the store only through [`StreamStore`].
//! [`RedisStreamStore`](super::RedisStreamStore) speaks the Redis protocol;
//! [`MemoryStreamStore`](super::MemoryStreamStore) keeps everything in process
//! for tests and development.

use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;

use super::consumer::ConsumerIdentity;
use super::entry::{EntryId, StreamEntry};
use super::producer::TrimMode;
use crate::error::Result;

/// Id that asks the store to assign the next entry id.
pub const AUTO_ID: &str = "*";

/// Which part of the group's history a read addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCursor {
    /// Entries never delivered to any consumer of the group (`>`).
    New,
    /// Entries already delivered to this consumer but not acknowledged (`0`).
    Pending,
}

impl ReadCursor {
    /// The id argument for XREADGROUP.
    pub fn as_arg(&self) -> &'static str {
        match self {
            ReadCursor::New => ">",
            ReadCursor::Pending => "0",
        }
    }
}

/// Result of one group read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadReply {
    /// Entries with their payload, in store order.
    pub entries: Vec<StreamEntry>,
    /// Pending ids whose entry was deleted from the stream (no payload left).
    pub deleted: Vec<EntryId>,
}

impl ReadReply {
    /// Whether the read returned nothing at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.deleted.is_empty()
    }
}

/// Operations the producer and consumer loop need from a stream store.
///
/// An implementation represents one exclusively owned connection: commands
/// are issued sequentially and acknowledgments go over the same connection as
/// the read that produced the ids.
#[async_trait]
pub trait StreamStore: Send {
    /// Append an entry (`id` is [`AUTO_ID`] or an explicit id) and return the assigned id.
    async fn append(&mut self, stream: &str, id: &str, fields: &[(String, String)])
    -> Result<EntryId>;

    /// Remove entries with ids below `min_id`; returns the number removed.
    async fn trim_before(&mut self, stream: &str, min_id: EntryId, mode: TrimMode) -> Result<u64>;

    /// Create a consumer group (creating the stream if needed).
    ///
    /// Fails with [`Error::AlreadyExists`](crate::Error::AlreadyExists) when
    /// the group is already there.
    async fn create_group(&mut self, stream: &str, group: &str, start_id: &str) -> Result<()>;

    /// Read entries for a consumer of a group.
    ///
    /// With `block` set, waits up to that long for new entries and returns an
    /// empty reply when none arrive.
    async fn read_group(
        &mut self,
        identity: &ConsumerIdentity,
        cursor: ReadCursor,
        count: Option<NonZeroUsize>,
        block: Option<Duration>,
    ) -> Result<ReadReply>;

    /// Acknowledge ids; returns how many were pending.
    async fn ack(&mut self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64>;

    /// Number of entries pending (delivered, unacknowledged) in the group.
    async fn pending_count(&mut self, stream: &str, group: &str) -> Result<u64>;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Whether the connection is still usable.
    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_args() {
        assert_eq!(ReadCursor::New.as_arg(), ">");
        assert_eq!(ReadCursor::Pending.as_arg(), "0");
    }

    #[test]
    fn test_empty_reply() {
        assert!(ReadReply::default().is_empty());
        let reply = ReadReply {
            entries: Vec::new(),
            deleted: vec![EntryId::new(1, 0)],
        };
        assert!(!reply.is_empty());
    }
}
