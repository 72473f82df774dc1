//! In-process stream store for testing and development.
//!
//! Streams, consumer groups and pending entry lists live in memory and are
//! lost when the process exits. Every [`MemoryStreamStore::connect`] returns a
//! new connection to the same data, so a producer and a consumer loop can run
//! side by side. Blocking group reads wake up as soon as an entry is appended.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::consumer::ConsumerIdentity;
use super::entry::{EntryId, StreamEntry};
use super::producer::TrimMode;
use super::store::{AUTO_ID, ReadCursor, ReadReply, StreamStore};
use crate::error::{Error, Result};

/// Entries per node; approximate trimming only drops whole nodes.
const APPROX_NODE_SIZE: usize = 100;

#[derive(Debug, Default)]
struct PendingEntry {
    consumer: String,
    deliveries: u64,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingEntry>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: BTreeMap<EntryId, Vec<(String, String)>>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

#[derive(Debug)]
struct Shared {
    streams: Mutex<HashMap<String, StreamState>>,
    /// Woken on every append and when the store goes offline.
    changed: Notify,
    online: AtomicBool,
}

/// A [`StreamStore`] that keeps everything in memory.
#[derive(Debug)]
pub struct MemoryStreamStore {
    shared: Arc<Shared>,
    open: bool,
}

impl Default for MemoryStreamStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStreamStore {
    /// Create an empty store with one open connection.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                streams: Mutex::new(HashMap::new()),
                changed: Notify::new(),
                online: AtomicBool::new(true),
            }),
            open: true,
        }
    }

    /// Open another connection to the same data.
    pub fn connect(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            open: true,
        }
    }

    /// Simulate the server going away (`false`) or coming back (`true`).
    ///
    /// While offline every command fails and blocked reads return an error.
    pub fn set_online(&self, online: bool) {
        self.shared.online.store(online, Ordering::Release);
        self.shared.changed.notify_waiters();
    }

    /// Number of entries in a stream (0 if it doesn't exist).
    pub fn len(&self, stream: &str) -> Result<usize> {
        let streams = self.lock()?;
        Ok(streams.get(stream).map(|s| s.entries.len()).unwrap_or(0))
    }

    /// All entries of a stream in id order.
    pub fn range(&self, stream: &str) -> Result<Vec<StreamEntry>> {
        let streams = self.lock()?;
        Ok(streams
            .get(stream)
            .map(|s| {
                s.entries
                    .iter()
                    .map(|(id, fields)| StreamEntry::new(*id, fields.iter().cloned().collect()))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Remove a single entry (XDEL); pending references to it remain.
    pub fn delete_entry(&self, stream: &str, id: EntryId) -> Result<bool> {
        let mut streams = self.lock()?;
        Ok(streams
            .get_mut(stream)
            .map(|s| s.entries.remove(&id).is_some())
            .unwrap_or(false))
    }

    /// Whether a consumer group exists.
    pub fn group_exists(&self, stream: &str, group: &str) -> Result<bool> {
        let streams = self.lock()?;
        Ok(streams
            .get(stream)
            .is_some_and(|s| s.groups.contains_key(group)))
    }

    /// Number of times a pending entry has been delivered.
    pub fn delivery_count(&self, stream: &str, group: &str, id: EntryId) -> Result<Option<u64>> {
        let streams = self.lock()?;
        Ok(streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .and_then(|g| g.pending.get(&id))
            .map(|p| p.deliveries))
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, StreamState>>> {
        self.shared
            .streams
            .lock()
            .map_err(|e| Error::Runtime(format!("Failed to acquire stream lock: {}", e)))
    }

    fn check_usable(&self) -> Result<()> {
        if !self.open {
            return Err(Error::ConnectionClosed(
                "memory store connection is closed".to_string(),
            ));
        }
        if !self.shared.online.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed("memory store is offline".to_string()));
        }
        Ok(())
    }

    /// One non-blocking XREADGROUP pass.
    fn read_now(
        &self,
        identity: &ConsumerIdentity,
        cursor: ReadCursor,
        count: Option<NonZeroUsize>,
    ) -> Result<ReadReply> {
        let limit = count.map(NonZeroUsize::get).unwrap_or(usize::MAX);
        let mut streams = self.lock()?;
        let no_group = || {
            Error::InvalidArgument(format!(
                "NOGROUP No such key '{}' or consumer group '{}'",
                identity.stream, identity.group
            ))
        };
        let state = streams.get_mut(&identity.stream).ok_or_else(no_group)?;
        let StreamState {
            entries, groups, ..
        } = state;
        let group = groups.get_mut(&identity.group).ok_or_else(no_group)?;

        let mut reply = ReadReply::default();
        match cursor {
            ReadCursor::New => {
                let fresh: Vec<EntryId> = entries
                    .range(group.last_delivered.successor().unwrap_or(EntryId::ZERO)..)
                    .map(|(id, _)| *id)
                    .filter(|id| *id > group.last_delivered)
                    .take(limit)
                    .collect();
                for id in fresh {
                    let fields = entries.get(&id).cloned().unwrap_or_default();
                    let pending = group.pending.entry(id).or_default();
                    pending.consumer = identity.consumer.clone();
                    pending.deliveries += 1;
                    group.last_delivered = id;
                    reply
                        .entries
                        .push(StreamEntry::new(id, fields.into_iter().collect()));
                }
            },
            ReadCursor::Pending => {
                for (id, pending) in group
                    .pending
                    .iter_mut()
                    .filter(|(_, p)| p.consumer == identity.consumer)
                    .take(limit)
                {
                    pending.deliveries += 1;
                    match entries.get(id) {
                        Some(fields) => reply
                            .entries
                            .push(StreamEntry::new(*id, fields.iter().cloned().collect())),
                        None => reply.deleted.push(*id),
                    }
                }
            },
        }
        Ok(reply)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn append(
        &mut self,
        stream: &str,
        id: &str,
        fields: &[(String, String)],
    ) -> Result<EntryId> {
        self.check_usable()?;
        if fields.is_empty() {
            return Err(Error::InvalidArgument(
                "wrong number of arguments for XADD".to_string(),
            ));
        }

        let assigned = {
            let mut streams = self.lock()?;
            let state = streams.entry(stream.to_string()).or_default();
            let last = state.last_id;

            let assigned = if id == AUTO_ID {
                let now = now_ms();
                if now > last.ms {
                    EntryId::new(now, 0)
                } else {
                    last.successor().ok_or_else(|| {
                        Error::InvalidArgument(format!("Stream '{}' has exhausted its ids", stream))
                    })?
                }
            } else {
                let explicit: EntryId = id.parse()?;
                if explicit == EntryId::ZERO || explicit <= last {
                    return Err(Error::InvalidArgument(format!(
                        "Entry id '{}' rejected by stream '{}': The ID specified in XADD is equal or smaller than the target stream top item",
                        id, stream
                    )));
                }
                explicit
            };

            state.entries.insert(assigned, fields.to_vec());
            state.last_id = assigned;
            assigned
        };

        self.shared.changed.notify_waiters();
        Ok(assigned)
    }

    async fn trim_before(&mut self, stream: &str, min_id: EntryId, mode: TrimMode) -> Result<u64> {
        self.check_usable()?;
        let mut streams = self.lock()?;
        let Some(state) = streams.get_mut(stream) else {
            return Ok(0);
        };

        let mut expired: Vec<EntryId> = state.entries.range(..min_id).map(|(id, _)| *id).collect();
        if mode == TrimMode::Approximate {
            expired.truncate(expired.len() - expired.len() % APPROX_NODE_SIZE);
        }
        for id in &expired {
            state.entries.remove(id);
        }
        Ok(expired.len() as u64)
    }

    async fn create_group(&mut self, stream: &str, group: &str, start_id: &str) -> Result<()> {
        self.check_usable()?;
        let mut streams = self.lock()?;
        let state = streams.entry(stream.to_string()).or_default();
        if state.groups.contains_key(group) {
            return Err(Error::AlreadyExists {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        }

        let last_delivered = match start_id {
            "$" => state.last_id,
            other => other.parse()?,
        };
        state.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn read_group(
        &mut self,
        identity: &ConsumerIdentity,
        cursor: ReadCursor,
        count: Option<NonZeroUsize>,
        block: Option<Duration>,
    ) -> Result<ReadReply> {
        let deadline = match (cursor, block) {
            (ReadCursor::New, Some(block)) => Some(tokio::time::Instant::now() + block),
            _ => None,
        };

        loop {
            let shared = Arc::clone(&self.shared);
            let notified = shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.check_usable()?;
            let reply = self.read_now(identity, cursor, count)?;
            let Some(deadline) = deadline else {
                return Ok(reply);
            };
            if !reply.is_empty() {
                return Ok(reply);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(ReadReply::default());
            }
        }
    }

    async fn ack(&mut self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64> {
        self.check_usable()?;
        let mut streams = self.lock()?;
        let Some(group) = streams.get_mut(stream).and_then(|s| s.groups.get_mut(group)) else {
            return Ok(0);
        };
        Ok(ids
            .iter()
            .filter(|id| group.pending.remove(*id).is_some())
            .count() as u64)
    }

    async fn pending_count(&mut self, stream: &str, group: &str) -> Result<u64> {
        self.check_usable()?;
        let streams = self.lock()?;
        streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len() as u64)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "NOGROUP No such key '{}' or consumer group '{}'",
                    stream, group
                ))
            })
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn identity() -> ConsumerIdentity {
        ConsumerIdentity::new("s", "g", "c1")
    }

    #[tokio::test]
    async fn test_auto_ids_increase() {
        let mut store = MemoryStreamStore::new();
        let a = store.append("s", AUTO_ID, &pairs(&[("k", "1")])).await.unwrap();
        let b = store.append("s", AUTO_ID, &pairs(&[("k", "2")])).await.unwrap();
        assert!(b > a);
        assert_eq!(store.len("s").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_explicit_id_must_increase() {
        let mut store = MemoryStreamStore::new();
        store.append("s", "5-0", &pairs(&[("k", "v")])).await.unwrap();

        for id in ["5-0", "4-9", "0-0"] {
            let err = store.append("s", id, &pairs(&[("k", "v")])).await.unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)), "{}", id);
        }
        assert_eq!(store.len("s").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_group_twice() {
        let mut store = MemoryStreamStore::new();
        store.create_group("s", "g", "0").await.unwrap();
        let err = store.create_group("s", "g", "0").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_group_start_at_end_skips_history() {
        let mut store = MemoryStreamStore::new();
        store.append("s", "1-0", &pairs(&[("k", "old")])).await.unwrap();
        store.create_group("s", "g", "$").await.unwrap();
        store.append("s", "2-0", &pairs(&[("k", "new")])).await.unwrap();

        let reply = store
            .read_group(&identity(), ReadCursor::New, None, None)
            .await
            .unwrap();
        assert_eq!(reply.entries.len(), 1);
        assert_eq!(reply.entries[0].id, EntryId::new(2, 0));
    }

    #[tokio::test]
    async fn test_pending_reread_and_ack() {
        let mut store = MemoryStreamStore::new();
        store.create_group("s", "g", "0").await.unwrap();
        for i in 1..=3 {
            store
                .append("s", &format!("{}-0", i), &pairs(&[("n", "x")]))
                .await
                .unwrap();
        }

        let first = store
            .read_group(&identity(), ReadCursor::New, NonZeroUsize::new(2), None)
            .await
            .unwrap();
        assert_eq!(first.entries.len(), 2);
        assert_eq!(store.pending_count("s", "g").await.unwrap(), 2);

        let again = store
            .read_group(&identity(), ReadCursor::Pending, None, None)
            .await
            .unwrap();
        assert_eq!(again.entries, first.entries);
        assert_eq!(
            store.delivery_count("s", "g", EntryId::new(1, 0)).unwrap(),
            Some(2)
        );

        // Another consumer never sees c1's pending entries.
        let other = ConsumerIdentity::new("s", "g", "c2");
        let theirs = store
            .read_group(&other, ReadCursor::Pending, None, None)
            .await
            .unwrap();
        assert!(theirs.is_empty());

        let acked = store
            .ack("s", "g", &[EntryId::new(1, 0), EntryId::new(2, 0)])
            .await
            .unwrap();
        assert_eq!(acked, 2);
        assert_eq!(store.pending_count("s", "g").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_deleted_pending_entry_reported() {
        let mut store = MemoryStreamStore::new();
        store.create_group("s", "g", "0").await.unwrap();
        let id = store.append("s", "1-0", &pairs(&[("k", "v")])).await.unwrap();
        store
            .read_group(&identity(), ReadCursor::New, None, None)
            .await
            .unwrap();
        assert!(store.delete_entry("s", id).unwrap());

        let reply = store
            .read_group(&identity(), ReadCursor::Pending, None, None)
            .await
            .unwrap();
        assert!(reply.entries.is_empty());
        assert_eq!(reply.deleted, vec![id]);
    }

    #[tokio::test]
    async fn test_blocking_read_times_out_empty() {
        let mut store = MemoryStreamStore::new();
        store.create_group("s", "g", "$").await.unwrap();

        let reply = store
            .read_group(
                &identity(),
                ReadCursor::New,
                None,
                Some(Duration::from_millis(20)),
            )
            .await
            .unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn test_blocking_read_wakes_on_append() {
        let mut store = MemoryStreamStore::new();
        store.create_group("s", "g", "$").await.unwrap();
        let mut producer = store.connect();

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.append("s", AUTO_ID, &pairs(&[("k", "v")])).await
        });

        let reply = store
            .read_group(&identity(), ReadCursor::New, None, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(reply.entries.len(), 1);
        writer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_offline_fails_blocked_read() {
        let mut store = MemoryStreamStore::new();
        store.create_group("s", "g", "$").await.unwrap();
        let control = store.connect();

        let killer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            control.set_online(false);
        });

        let err = store
            .read_group(&identity(), ReadCursor::New, None, Some(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed(_)));
        killer.await.unwrap();
    }

    #[tokio::test]
    async fn test_trim_exact_and_approximate() {
        let mut store = MemoryStreamStore::new();
        for i in 1..=250u64 {
            store
                .append("s", &format!("{}-0", i), &pairs(&[("n", "x")]))
                .await
                .unwrap();
        }

        // 239 entries are below 240-0; approximate drops whole nodes only.
        let removed = store
            .trim_before("s", EntryId::new(240, 0), TrimMode::Approximate)
            .await
            .unwrap();
        assert_eq!(removed, 200);
        assert_eq!(store.len("s").unwrap(), 50);

        let removed = store
            .trim_before("s", EntryId::new(240, 0), TrimMode::Exact)
            .await
            .unwrap();
        assert_eq!(removed, 39);
        assert_eq!(store.range("s").unwrap()[0].id, EntryId::new(240, 0));
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_commands() {
        let mut store = MemoryStreamStore::new();
        store.close().await.unwrap();
        store.close().await.unwrap();
        assert!(!store.is_open());
        let err = store.append("s", AUTO_ID, &pairs(&[("k", "v")])).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed(_)));
    }
}
