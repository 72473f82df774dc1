//! Stream entry ids, entries and delivered batches.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

/// Field/value pairs of one stream entry.
pub type Fields = HashMap<String, String>;

/// A stream entry id: `<milliseconds>-<sequence>`.
///
/// Ids are assigned by the store and strictly increase within a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntryId {
    /// Millisecond timestamp part.
    pub ms: u64,
    /// Sequence number within the millisecond.
    pub seq: u64,
}

impl EntryId {
    /// The smallest id; no entry may be appended with it.
    pub const ZERO: EntryId = EntryId { ms: 0, seq: 0 };

    /// Create an id from its parts.
    pub const fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Smallest id strictly greater than this one.
    pub fn successor(self) -> Option<Self> {
        if self.seq < u64::MAX {
            Some(Self::new(self.ms, self.seq + 1))
        } else {
            self.ms.checked_add(1).map(|ms| Self::new(ms, 0))
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = Error;

    /// Parse `<ms>-<seq>` or a bare `<ms>` (sequence 0).
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidArgument(format!("Invalid stream entry id '{}'", s));
        match s.split_once('-') {
            Some((ms, seq)) => Ok(Self::new(
                ms.parse().map_err(|_| invalid())?,
                seq.parse().map_err(|_| invalid())?,
            )),
            None => Ok(Self::new(s.parse().map_err(|_| invalid())?, 0)),
        }
    }
}

/// One entry read from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Store-assigned id.
    pub id: EntryId,
    /// Entry fields.
    pub fields: Fields,
}

impl StreamEntry {
    /// Create an entry.
    pub fn new(id: EntryId, fields: Fields) -> Self {
        Self { id, fields }
    }

    /// Render as `{"id": ..., "message": {...}}`.
    pub fn to_json(&self) -> Value {
        let message: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        json!({ "id": self.id.to_string(), "message": message })
    }
}

/// The entries delivered to a sink by one poll cycle, in store order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// Stream the entries were read from.
    pub stream: String,
    entries: Vec<StreamEntry>,
}

impl Batch {
    /// Create a batch from already ordered entries.
    pub fn new(stream: &str, entries: Vec<StreamEntry>) -> Self {
        Self {
            stream: stream.to_string(),
            entries,
        }
    }

    /// Flatten per-stream replies into one batch, preserving reply order.
    pub fn flatten<I>(stream: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = Vec<StreamEntry>>,
    {
        Self::new(stream, replies.into_iter().flatten().collect())
    }

    /// Entries in delivery order.
    pub fn entries(&self) -> &[StreamEntry] {
        &self.entries
    }

    /// Consume the batch, returning its entries.
    pub fn into_entries(self) -> Vec<StreamEntry> {
        self.entries
    }

    /// Ids of all entries, in delivery order.
    pub fn ids(&self) -> Vec<EntryId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    /// Id of the last entry.
    pub fn last_id(&self) -> Option<EntryId> {
        self.entries.last().map(|e| e.id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StreamEntry> {
        self.entries.iter()
    }

    /// Field maps only, in delivery order.
    pub fn messages(&self) -> Vec<&Fields> {
        self.entries.iter().map(|e| &e.fields).collect()
    }

    /// Render as a JSON array of `{"id", "message"}` items.
    pub fn to_json(&self) -> Value {
        Value::Array(self.entries.iter().map(StreamEntry::to_json).collect())
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a StreamEntry;
    type IntoIter = std::slice::Iter<'a, StreamEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
