//! Redis-backed stream store.
//!
//! Issues XADD, XTRIM, XGROUP CREATE, XREADGROUP, XACK and XPENDING over one
//! exclusively owned connection.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::debug;

use super::consumer::ConsumerIdentity;
use super::entry::{EntryId, StreamEntry};
use super::producer::TrimMode;
use super::store::{ReadCursor, ReadReply, StreamStore};
use crate::connection::{ConnectionConfig, RedisConnection};
use crate::error::{Error, Result};

// Type aliases for complex Redis response types
type XReadGroupResponse =
    Option<Vec<(String, Vec<(String, Option<HashMap<String, String>>)>)>>;
type XPendingResponse = (
    u64,
    Option<String>,
    Option<String>,
    Option<Vec<(String, u64)>>,
);

/// Extra time allowed past the BLOCK timeout before a read counts as hung.
const DEFAULT_READ_GRACE: Duration = Duration::from_secs(5);

/// A [`StreamStore`] on a dedicated Redis connection.
pub struct RedisStreamStore {
    /// `None` once closed or after the connection dropped.
    conn: Option<MultiplexedConnection>,
    read_grace: Duration,
}

impl RedisStreamStore {
    /// Connect using connection settings.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let connection = RedisConnection::from_config(config)?;
        let conn = connection.get_async_connection().await?;
        debug!(config = ?config, "opened stream store connection");
        Ok(Self::from_connection(conn))
    }

    /// Connect using a URL.
    pub async fn connect_url(url: &str) -> Result<Self> {
        Self::connect(&ConnectionConfig::from_url(url)).await
    }

    /// Wrap an already open connection. The store takes ownership of it.
    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn: Some(conn),
            read_grace: DEFAULT_READ_GRACE,
        }
    }

    /// Set how long past the BLOCK timeout a read may take before it fails.
    pub fn with_read_grace(mut self, grace: Duration) -> Self {
        self.read_grace = grace;
        self
    }

    fn connection(&mut self) -> Result<&mut MultiplexedConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::ConnectionClosed("stream store connection is closed".to_string()))
    }

    /// Map a Redis error, dropping the connection when the socket is gone.
    fn fail(&mut self, err: redis::RedisError) -> Error {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            self.conn = None;
        }
        Error::Connection(err)
    }

    /// Destroy a consumer group; returns whether it existed.
    pub async fn destroy_group(&mut self, stream: &str, group: &str) -> Result<bool> {
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("DESTROY").arg(stream).arg(group);
        let destroyed: i64 = self.query(cmd).await?;
        Ok(destroyed > 0)
    }

    async fn query<T: redis::FromRedisValue + Send>(&mut self, cmd: redis::Cmd) -> Result<T> {
        let result = {
            let conn = self.connection()?;
            cmd.query_async::<T>(conn).await
        };
        result.map_err(|e| self.fail(e))
    }
}

/// Convert an XREADGROUP reply into entries, keeping store order.
fn parse_read_reply(response: XReadGroupResponse) -> Result<ReadReply> {
    let mut reply = ReadReply::default();
    for (_stream_key, stream_entries) in response.unwrap_or_default() {
        for (id, fields) in stream_entries {
            let id: EntryId = id.parse()?;
            match fields {
                Some(fields) => reply.entries.push(StreamEntry::new(id, fields)),
                None => reply.deleted.push(id),
            }
        }
    }
    Ok(reply)
}

#[async_trait]
impl StreamStore for RedisStreamStore {
    async fn append(
        &mut self,
        stream: &str,
        id: &str,
        fields: &[(String, String)],
    ) -> Result<EntryId> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg(id);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }

        let assigned: String = match self.query(cmd).await {
            Err(Error::Connection(e)) if Error::is_invalid_stream_id(&e) => {
                return Err(Error::InvalidArgument(format!(
                    "Entry id '{}' rejected by stream '{}': {}",
                    id,
                    stream,
                    e.detail().unwrap_or("must be greater than the last id")
                )));
            },
            other => other?,
        };
        assigned.parse()
    }

    async fn trim_before(&mut self, stream: &str, min_id: EntryId, mode: TrimMode) -> Result<u64> {
        // XTRIM stream MINID [=|~] threshold
        let mut cmd = redis::cmd("XTRIM");
        cmd.arg(stream)
            .arg("MINID")
            .arg(mode.as_arg())
            .arg(min_id.to_string());
        self.query(cmd).await
    }

    async fn create_group(&mut self, stream: &str, group: &str, start_id: &str) -> Result<()> {
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg(start_id)
            .arg("MKSTREAM");

        match self.query::<()>(cmd).await {
            Err(Error::Connection(e)) if Error::is_busy_group(&e) => Err(Error::AlreadyExists {
                stream: stream.to_string(),
                group: group.to_string(),
            }),
            other => other,
        }
    }

    async fn read_group(
        &mut self,
        identity: &ConsumerIdentity,
        cursor: ReadCursor,
        count: Option<NonZeroUsize>,
        block: Option<Duration>,
    ) -> Result<ReadReply> {
        // XREADGROUP GROUP group consumer [COUNT count] [BLOCK ms] STREAMS stream id
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(&identity.group).arg(&identity.consumer);
        if let Some(count) = count {
            cmd.arg("COUNT").arg(count.get());
        }
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(&identity.stream).arg(cursor.as_arg());

        let response: XReadGroupResponse = match block {
            Some(block) => {
                let limit = block + self.read_grace;
                let outcome = tokio::time::timeout(limit, self.query(cmd)).await;
                match outcome {
                    Ok(result) => result?,
                    Err(_) => {
                        // The reply may still arrive later; the connection is no longer trusted.
                        self.conn = None;
                        return Err(Error::timeout(
                            limit.as_millis() as u64,
                            Some(format!("reading from group '{}'", identity.group)),
                        ));
                    },
                }
            },
            None => self.query(cmd).await?,
        };

        parse_read_reply(response)
    }

    async fn ack(&mut self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(group);
        for id in ids {
            cmd.arg(id.to_string());
        }
        self.query(cmd).await
    }

    async fn pending_count(&mut self, stream: &str, group: &str) -> Result<u64> {
        // XPENDING stream group
        let mut cmd = redis::cmd("XPENDING");
        cmd.arg(stream).arg(group);
        let result: XPendingResponse = self.query(cmd).await?;
        Ok(result.0)
    }

    async fn close(&mut self) -> Result<()> {
        if self.conn.take().is_some() {
            debug!("closed stream store connection");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_read_reply_nil() {
        let reply = parse_read_reply(None).unwrap();
        assert!(reply.is_empty());
    }

    #[test]
    fn test_parse_read_reply_entries_and_deleted() {
        let response = Some(vec![(
            "events".to_string(),
            vec![
                ("1-0".to_string(), Some(fields(&[("a", "1")]))),
                ("1-1".to_string(), None),
                ("2-0".to_string(), Some(fields(&[("a", "2")]))),
            ],
        )]);

        let reply = parse_read_reply(response).unwrap();
        assert_eq!(reply.entries.len(), 2);
        assert_eq!(reply.entries[0].id, EntryId::new(1, 0));
        assert_eq!(reply.entries[1].id, EntryId::new(2, 0));
        assert_eq!(reply.deleted, vec![EntryId::new(1, 1)]);
    }

    #[test]
    fn test_parse_read_reply_bad_id() {
        let response = Some(vec![(
            "events".to_string(),
            vec![("not-an-id".to_string(), Some(fields(&[("a", "1")])))],
        )]);
        assert!(matches!(
            parse_read_reply(response),
            Err(Error::InvalidArgument(_))
        ));
    }
}
