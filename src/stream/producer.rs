//! Appending entries to a stream, with optional retention trimming.
//!
//! # Example
//!
//! ```ignore
//! use redis_stream_poller::{ProducerConfig, RedisStreamStore, StreamProducer, TrimPolicy, AUTO_ID};
//!
//! let store = RedisStreamStore::connect_url("redis://localhost:6379").await?;
//! let config = ProducerConfig::new("events").with_trim(TrimPolicy::days(7));
//! let mut producer = StreamProducer::new(store, config)?;
//!
//! let result = producer
//!     .append("events", AUTO_ID, &[("action".to_string(), "login".to_string())])
//!     .await?;
//! println!("appended {}", result.id);
//! producer.close().await?;
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::entry::EntryId;
use super::payload::MessageSource;
use super::store::{AUTO_ID, StreamStore};
use crate::connection::ConnectionConfig;
use crate::error::{Error, Result};

const MS_PER_DAY: u64 = 24 * 60 * 60 * 1000;

/// How precisely a trim honors its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimMode {
    /// Remove every entry below the threshold (`=`).
    Exact,
    /// Let the store keep extra entries when that is cheaper (`~`).
    #[default]
    Approximate,
}

impl TrimMode {
    /// The XTRIM strategy modifier.
    pub fn as_arg(&self) -> &'static str {
        match self {
            TrimMode::Exact => "=",
            TrimMode::Approximate => "~",
        }
    }
}

/// Retention window applied after each append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimPolicy {
    /// Entries older than this many days are removed.
    pub retention_days: u32,
    /// Exactness of the trim.
    pub mode: TrimMode,
}

impl Default for TrimPolicy {
    fn default() -> Self {
        Self {
            retention_days: 7,
            mode: TrimMode::Approximate,
        }
    }
}

impl TrimPolicy {
    /// Keep `days` days of entries, trimming approximately.
    pub fn days(days: u32) -> Self {
        Self {
            retention_days: days,
            ..Self::default()
        }
    }

    /// Set the trim mode.
    pub fn with_mode(mut self, mode: TrimMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set exact trimming on or off.
    pub fn exact(self, exact: bool) -> Self {
        self.with_mode(if exact {
            TrimMode::Exact
        } else {
            TrimMode::Approximate
        })
    }

    /// Retention as a duration.
    pub fn retention(&self) -> Duration {
        Duration::from_millis(u64::from(self.retention_days) * MS_PER_DAY)
    }

    /// Smallest id that survives a trim performed at `now_ms`.
    pub fn threshold(&self, now_ms: u64) -> EntryId {
        EntryId::new(
            now_ms.saturating_sub(u64::from(self.retention_days) * MS_PER_DAY),
            0,
        )
    }
}

/// Producer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Stream to append to.
    pub stream: String,
    /// Entry id, [`AUTO_ID`] by default.
    #[serde(default = "default_entry_id")]
    pub entry_id: String,
    /// Where a record's fields come from.
    #[serde(default)]
    pub source: MessageSource,
    /// Optional retention trimming.
    #[serde(default)]
    pub trim: Option<TrimPolicy>,
}

fn default_entry_id() -> String {
    AUTO_ID.to_string()
}

impl ProducerConfig {
    /// Create a configuration for a stream.
    pub fn new(stream: &str) -> Self {
        Self {
            stream: stream.to_string(),
            entry_id: default_entry_id(),
            source: MessageSource::default(),
            trim: None,
        }
    }

    /// Pin the entry id (an empty id means auto-generate).
    pub fn with_entry_id(mut self, id: &str) -> Self {
        self.entry_id = if id.is_empty() {
            default_entry_id()
        } else {
            id.to_string()
        };
        self
    }

    /// Set the message source.
    pub fn with_source(mut self, source: MessageSource) -> Self {
        self.source = source;
        self
    }

    /// Enable retention trimming.
    pub fn with_trim(mut self, policy: TrimPolicy) -> Self {
        self.trim = Some(policy);
        self
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.stream.is_empty() {
            return Err(Error::InvalidArgument("stream name must not be empty".to_string()));
        }
        if let Some(trim) = &self.trim
            && trim.retention_days == 0
        {
            return Err(Error::InvalidArgument(
                "retention period must be at least 1 day".to_string(),
            ));
        }
        Ok(())
    }
}

/// What happened to the trim step of an append.
#[derive(Debug)]
pub enum TrimOutcome {
    /// No trim policy configured.
    Skipped,
    /// Trim ran; number of entries removed.
    Trimmed(u64),
    /// Trim failed; the append stands.
    Failed(Error),
}

/// Result of one append.
#[derive(Debug)]
pub struct AppendResult {
    /// Stream appended to.
    pub stream: String,
    /// Id assigned by the store.
    pub id: EntryId,
    /// Outcome of the trim that followed.
    pub trim: TrimOutcome,
}

impl AppendResult {
    /// Render as `{"success", "operation", "stream", "id"}`.
    pub fn to_json(&self) -> Value {
        json!({
            "success": true,
            "operation": "xadd",
            "stream": self.stream,
            "id": self.id.to_string(),
        })
    }

    /// The trim error, if the trim step failed.
    pub fn trim_error(&self) -> Option<&Error> {
        match &self.trim {
            TrimOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Appends entries to streams, trimming after each append when configured.
///
/// Holds no state across calls besides the connection.
pub struct StreamProducer<S: StreamStore> {
    store: S,
    config: ProducerConfig,
}

impl<S: StreamStore> StreamProducer<S> {
    /// Create a producer over an open store connection.
    pub fn new(store: S, config: ProducerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    /// Producer settings.
    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Append one entry with the configured id.
    pub async fn send(&mut self, fields: &[(String, String)]) -> Result<AppendResult> {
        let stream = self.config.stream.clone();
        let id = self.config.entry_id.clone();
        self.append(&stream, &id, fields).await
    }

    /// Append one entry to `stream`.
    ///
    /// An empty `fields` slice is rejected before anything is sent. When a
    /// trim policy is configured the stream is trimmed afterwards; a failed
    /// trim is reported in [`AppendResult::trim`] and never undoes the append.
    pub async fn append(
        &mut self,
        stream: &str,
        id: &str,
        fields: &[(String, String)],
    ) -> Result<AppendResult> {
        if stream.is_empty() {
            return Err(Error::InvalidArgument("stream name must not be empty".to_string()));
        }
        if fields.is_empty() {
            return Err(Error::InvalidArgument(
                "Empty payload cannot be sent to a stream".to_string(),
            ));
        }

        let id = if id.is_empty() { AUTO_ID } else { id };
        let assigned = self.store.append(stream, id, fields).await?;
        debug!(stream, id = %assigned, fields = fields.len(), "appended entry");

        let trim = match self.config.trim {
            None => TrimOutcome::Skipped,
            Some(policy) => self.trim(stream, policy).await,
        };

        Ok(AppendResult {
            stream: stream.to_string(),
            id: assigned,
            trim,
        })
    }

    async fn trim(&mut self, stream: &str, policy: TrimPolicy) -> TrimOutcome {
        let threshold = policy.threshold(now_ms());
        match self.store.trim_before(stream, threshold, policy.mode).await {
            Ok(removed) => {
                debug!(stream, min_id = %threshold, removed, "trimmed stream");
                TrimOutcome::Trimmed(removed)
            },
            Err(e) => {
                warn!(stream, min_id = %threshold, error = %e, "trim failed after append");
                TrimOutcome::Failed(Error::TrimFailure {
                    stream: stream.to_string(),
                    source: Box::new(e),
                })
            },
        }
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<()> {
        self.store.close().await
    }

    /// Consume the producer, returning the store.
    pub fn into_store(self) -> S {
        self.store
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Append one entry per record, then close the connection.
///
/// Fields are taken from each record according to `config.source`. The
/// connection is closed whether or not every append succeeded; the first
/// error is returned after closing.
pub async fn publish_records<S: StreamStore>(
    store: S,
    config: ProducerConfig,
    records: &[Value],
) -> Result<Vec<AppendResult>> {
    let mut producer = StreamProducer::new(store, config)?;
    let outcome = publish_all(&mut producer, records).await;
    let closed = producer.close().await;
    let results = outcome?;
    closed?;
    Ok(results)
}

async fn publish_all<S: StreamStore>(
    producer: &mut StreamProducer<S>,
    records: &[Value],
) -> Result<Vec<AppendResult>> {
    let mut results = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let fields = producer.config.source.extract(record).map_err(|e| match e {
            Error::InvalidArgument(msg) => {
                Error::InvalidArgument(format!("record {}: {}", index, msg))
            },
            other => other,
        })?;
        results.push(producer.send(&fields).await?);
    }
    Ok(results)
}

/// Connect to Redis and publish records (see [`publish_records`]).
pub async fn publish_to_redis(
    connection: &ConnectionConfig,
    config: ProducerConfig,
    records: &[Value],
) -> Result<Vec<AppendResult>> {
    config.validate()?;
    let store = super::RedisStreamStore::connect(connection).await?;
    publish_records(store, config, records).await
}
