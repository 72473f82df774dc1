//! Consumer group read loop.
//!
//! [`GroupConsumerLoop`] makes sure a consumer group exists, then repeatedly
//! blocks on XREADGROUP for entries addressed to one consumer, hands each
//! batch to a [`BatchSink`] and acknowledges the batch (XACK) once the sink
//! succeeded.
//!
//! ```text
//! Idle -> Bootstrapping -> Polling -> (Delivering -> Polling)* -> Stopped
//! ```
//!
//! # Example
//!
//! ```ignore
//! use redis_stream_poller::{
//!     ChannelSink, ConsumerConfig, ConsumerIdentity, GroupConsumerLoop, ReadFrom, RedisStreamStore,
//! };
//!
//! let store = RedisStreamStore::connect_url("redis://localhost:6379").await?;
//! let (sink, mut batches) = ChannelSink::channel(16);
//! let config = ConsumerConfig::new()
//!     .with_batch_size(100)
//!     .with_read_from(ReadFrom::Beginning);
//!
//! let consumer = GroupConsumerLoop::new(
//!     store,
//!     ConsumerIdentity::new("events", "workers", "worker-1"),
//!     config,
//!     sink,
//! )?;
//! let handle = consumer.start().await?;
//!
//! while let Some(batch) = batches.recv().await {
//!     println!("got {} entries", batch.len());
//! }
//! handle.stop().await?;
//! ```

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::entry::{Batch, EntryId};
use super::sink::BatchSink;
use super::store::{ReadCursor, ReadReply, StreamStore};
use crate::error::{Error, Result};

// ============================================================================
// Identity and Configuration
// ============================================================================

/// The (stream, group, consumer) triple naming one logical reader.
///
/// Keep the consumer name stable across restarts so unacknowledged entries
/// are picked up again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerIdentity {
    /// Stream key.
    pub stream: String,
    /// Consumer group name.
    pub group: String,
    /// Consumer name within the group.
    pub consumer: String,
}

impl ConsumerIdentity {
    pub fn new(stream: &str, group: &str, consumer: &str) -> Self {
        Self {
            stream: stream.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
        }
    }

    /// Reject empty names.
    pub fn validate(&self) -> Result<()> {
        for (what, value) in [
            ("stream name", &self.stream),
            ("consumer group name", &self.group),
            ("consumer name", &self.consumer),
        ] {
            if value.is_empty() {
                return Err(Error::InvalidArgument(format!("{} must not be empty", what)));
            }
        }
        Ok(())
    }
}

/// Where a newly created group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadFrom {
    /// Every entry in the stream (`0`).
    #[serde(rename = "beginning", alias = "0")]
    Beginning,
    /// Only entries appended after the group was created (`$`).
    #[default]
    #[serde(rename = "group-creation-time", alias = "$")]
    GroupCreation,
}

impl ReadFrom {
    /// The start id for XGROUP CREATE.
    pub fn as_start_id(&self) -> &'static str {
        match self {
            ReadFrom::Beginning => "0",
            ReadFrom::GroupCreation => "$",
        }
    }
}

/// Whether the loop keeps polling or stops after one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Poll until stopped or the connection fails.
    #[default]
    Continuous,
    /// Run exactly one poll-deliver cycle.
    Once,
}

/// Configuration for the consumer loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Maximum entries per batch (`None` = unbounded).
    pub batch_size: Option<NonZeroUsize>,
    /// Block timeout in milliseconds for each read.
    pub block_ms: u64,
    /// Pause in milliseconds after a failed batch before polling again.
    pub backoff_ms: u64,
    /// Start offset used when the group is created.
    pub read_from: ReadFrom,
    /// Continuous or one-shot.
    pub mode: RunMode,
    /// Re-read this consumer's pending entries before reading new ones.
    pub recover_pending: bool,
    /// Back off and retry failed reads instead of stopping (only while the
    /// connection is still open).
    pub retry_read_errors: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            block_ms: 5000,
            backoff_ms: 5000,
            read_from: ReadFrom::GroupCreation,
            mode: RunMode::Continuous,
            recover_pending: true,
            retry_read_errors: false,
        }
    }
}

impl ConsumerConfig {
    /// Create a new consumer configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the batch size (0 = unbounded).
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = NonZeroUsize::new(size);
        self
    }

    /// Set the block timeout in milliseconds.
    pub fn with_block_ms(mut self, ms: u64) -> Self {
        self.block_ms = ms;
        self
    }

    /// Set the backoff after a handler failure in milliseconds.
    pub fn with_backoff_ms(mut self, ms: u64) -> Self {
        self.backoff_ms = ms;
        self
    }

    /// Set where a newly created group starts.
    pub fn with_read_from(mut self, read_from: ReadFrom) -> Self {
        self.read_from = read_from;
        self
    }

    /// Set the run mode.
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set whether pending entries are re-read on start.
    pub fn with_recover_pending(mut self, recover: bool) -> Self {
        self.recover_pending = recover;
        self
    }

    /// Set whether failed reads are retried.
    pub fn with_retry_read_errors(mut self, retry: bool) -> Self {
        self.retry_read_errors = retry;
        self
    }

    /// Block timeout as a duration.
    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    /// Backoff as a duration.
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Check the configuration.
    ///
    /// A zero block timeout would block forever and is rejected.
    pub fn validate(&self) -> Result<()> {
        if self.block_ms == 0 {
            return Err(Error::InvalidArgument(
                "block timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Consumer Statistics
// ============================================================================

/// Statistics about stream consumption.
#[derive(Debug, Clone, Default)]
pub struct ConsumerStats {
    /// Number of batches handed to the sink successfully.
    pub batches_delivered: u64,
    /// Total number of entries handed to the sink successfully.
    pub entries_delivered: u64,
    /// Entries acknowledged (including deleted pending entries).
    pub entries_acked: u64,
    /// Reads that timed out without new entries.
    pub empty_polls: u64,
    /// Batches the sink rejected.
    pub handler_failures: u64,
    /// Last entry id that was delivered.
    pub last_entry_id: Option<EntryId>,
    /// Time when consumption started.
    pub started_at: Option<Instant>,
    /// Total time spent reading from the store.
    pub read_time: Duration,
    /// Total time spent in the sink.
    pub process_time: Duration,
}

impl ConsumerStats {
    /// Create new empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get entries delivered per second.
    pub fn entries_per_second(&self) -> f64 {
        if let Some(started) = self.started_at {
            let elapsed = started.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                return self.entries_delivered as f64 / elapsed;
            }
        }
        0.0
    }

    /// Get the total elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|s| s.elapsed()).unwrap_or_default()
    }
}

// ============================================================================
// Loop State and Control
// ============================================================================

/// Lifecycle state of a consumer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Bootstrapping,
    Polling,
    Delivering,
    Stopped,
}

/// Outcome of consumer group bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    /// The group was created.
    Created,
    /// The group was already there.
    AlreadyExisted,
}

/// Outcome of one poll cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The block timeout elapsed without new entries.
    Empty,
    /// A batch was handed to the sink and acknowledged.
    Delivered { entries: usize, acked: u64 },
    /// The sink failed; the batch stays pending.
    HandlerFailed { entries: usize, error: Error },
    /// A stop was requested while waiting.
    Stopped,
}

/// State shared between a loop and its controllers.
#[derive(Debug)]
struct LoopControl {
    running: AtomicBool,
    connection_open: AtomicBool,
    cancel: CancellationToken,
    state: watch::Sender<LoopState>,
}

impl LoopControl {
    fn new(connection_open: bool) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            running: AtomicBool::new(true),
            connection_open: AtomicBool::new(connection_open),
            cancel: CancellationToken::new(),
            state,
        }
    }

    fn should_continue(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Cheap, cloneable control over a consumer loop.
///
/// Usable before the loop starts, while it runs and after it stopped.
#[derive(Debug, Clone)]
pub struct LoopController {
    control: Arc<LoopControl>,
}

impl LoopController {
    /// Ask the loop to stop and interrupt any in-flight read or backoff.
    ///
    /// Safe to call any number of times, before or after the loop ran.
    pub fn request_stop(&self) {
        if self.control.running.swap(false, Ordering::AcqRel) {
            debug!("stop requested");
        }
        self.control.cancel.cancel();
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        !self.control.should_continue()
    }

    /// Whether the loop's connection is still open.
    pub fn is_connection_open(&self) -> bool {
        self.control.connection_open.load(Ordering::Acquire)
    }

    /// Current loop state.
    pub fn state(&self) -> LoopState {
        *self.control.state.borrow()
    }

    /// Wait until the loop reaches `target`.
    pub async fn wait_for_state(&self, target: LoopState) -> Result<()> {
        let mut rx = self.control.state.subscribe();
        rx.wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| Error::Runtime("consumer loop state channel closed".to_string()))
    }
}

/// Handle to a loop running on a tokio task.
#[derive(Debug)]
pub struct ConsumerHandle {
    controller: LoopController,
    task: Mutex<Option<JoinHandle<Result<ConsumerStats>>>>,
}

impl ConsumerHandle {
    /// Controller for the running loop.
    pub fn controller(&self) -> LoopController {
        self.controller.clone()
    }

    /// Current loop state.
    pub fn state(&self) -> LoopState {
        self.controller.state()
    }

    /// Stop the loop and wait for it to close its connection.
    ///
    /// Returns the final statistics the first time, `None` on later calls.
    /// If the loop had already ended with a fatal error, that error is
    /// returned instead.
    pub async fn stop(&self) -> Result<Option<ConsumerStats>> {
        self.controller.request_stop();
        self.join().await
    }

    /// Wait for the loop to end on its own (one-shot mode or fatal error).
    pub async fn join(&self) -> Result<Option<ConsumerStats>> {
        let task = self.task.lock().await.take();
        match task {
            None => Ok(None),
            Some(task) => match task.await {
                Ok(result) => result.map(Some),
                Err(e) => Err(Error::Runtime(format!("consumer task failed: {}", e))),
            },
        }
    }
}

// ============================================================================
// Group Consumer Loop
// ============================================================================

/// Reads a stream through a consumer group and feeds batches to a sink.
///
/// The loop owns its store connection exclusively. At most one batch is in
/// flight: a batch is acknowledged only after the sink returned, and the next
/// read happens only after that.
pub struct GroupConsumerLoop<S: StreamStore, K: BatchSink> {
    store: S,
    sink: K,
    identity: ConsumerIdentity,
    config: ConsumerConfig,
    control: Arc<LoopControl>,
    stats: ConsumerStats,
    cursor: ReadCursor,
    bootstrapped: bool,
}

impl<S, K> GroupConsumerLoop<S, K>
where
    S: StreamStore + 'static,
    K: BatchSink + 'static,
{
    /// Create a loop over an open store connection.
    pub fn new(store: S, identity: ConsumerIdentity, config: ConsumerConfig, sink: K) -> Result<Self> {
        identity.validate()?;
        config.validate()?;
        let control = Arc::new(LoopControl::new(store.is_open()));
        let cursor = if config.recover_pending {
            ReadCursor::Pending
        } else {
            ReadCursor::New
        };

        Ok(Self {
            store,
            sink,
            identity,
            config,
            control,
            stats: ConsumerStats::new(),
            cursor,
            bootstrapped: false,
        })
    }

    /// Controller that can stop this loop from another task.
    pub fn controller(&self) -> LoopController {
        LoopController {
            control: Arc::clone(&self.control),
        }
    }

    /// Get the consumption statistics.
    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    /// Get the consumer identity.
    pub fn identity(&self) -> &ConsumerIdentity {
        &self.identity
    }

    /// Get the configuration.
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Number of pending entries in the group.
    pub async fn pending_count(&mut self) -> Result<u64> {
        self.store
            .pending_count(&self.identity.stream, &self.identity.group)
            .await
    }

    fn transition(&self, state: LoopState) {
        let previous = self.control.state.send_replace(state);
        if previous == state {
            return;
        }
        match (previous, state) {
            (_, LoopState::Bootstrapping | LoopState::Stopped)
            | (LoopState::Idle | LoopState::Bootstrapping, LoopState::Polling) => info!(
                stream = %self.identity.stream,
                group = %self.identity.group,
                consumer = %self.identity.consumer,
                from = ?previous,
                "consumer loop {:?}",
                state
            ),
            _ => debug!(from = ?previous, to = ?state, "consumer loop transition"),
        }
    }

    /// Create the consumer group if it doesn't exist.
    ///
    /// An existing group counts as success; any other failure is returned.
    pub async fn bootstrap(&mut self) -> Result<GroupStatus> {
        self.transition(LoopState::Bootstrapping);
        let status = match self
            .store
            .create_group(
                &self.identity.stream,
                &self.identity.group,
                self.config.read_from.as_start_id(),
            )
            .await
        {
            Ok(()) => {
                info!(group = %self.identity.group, start = self.config.read_from.as_start_id(), "created consumer group");
                GroupStatus::Created
            },
            Err(Error::AlreadyExists { .. }) => {
                debug!(group = %self.identity.group, "consumer group already exists");
                GroupStatus::AlreadyExisted
            },
            Err(e) => return Err(e),
        };
        self.bootstrapped = true;
        Ok(status)
    }

    /// Read with the current cursor, interrupted by a stop request.
    ///
    /// Returns `None` when stopped. Switches from pending to new entries once
    /// the pending list is drained.
    async fn read(&mut self, cancel: &CancellationToken) -> Result<Option<ReadReply>> {
        loop {
            let cursor = self.cursor;
            let block = match cursor {
                ReadCursor::New => Some(self.config.block()),
                ReadCursor::Pending => None,
            };

            let started = Instant::now();
            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                reply = self.store.read_group(&self.identity, cursor, self.config.batch_size, block) => reply?,
            };
            self.stats.read_time += started.elapsed();

            if !reply.deleted.is_empty() {
                // Entries deleted while pending can never be delivered.
                let acked = self
                    .store
                    .ack(&self.identity.stream, &self.identity.group, &reply.deleted)
                    .await?;
                self.stats.entries_acked += acked;
                warn!(count = reply.deleted.len(), "acknowledged pending entries that were deleted from the stream");
            }

            if cursor == ReadCursor::Pending && reply.entries.is_empty() {
                if reply.deleted.is_empty() {
                    debug!("pending entries drained, reading new entries");
                    self.cursor = ReadCursor::New;
                }
                continue;
            }
            return Ok(Some(reply));
        }
    }

    /// Run one poll-deliver-acknowledge cycle.
    ///
    /// Bootstraps the group first if that hasn't happened yet. The
    /// connection stays open; call [`close`](Self::close) when done.
    pub async fn poll_once(&mut self) -> Result<CycleOutcome> {
        if !self.bootstrapped {
            self.bootstrap().await?;
        }
        if self.stats.started_at.is_none() {
            self.stats.started_at = Some(Instant::now());
        }

        let cancel = self.control.cancel.clone();
        if !self.control.should_continue() {
            return Ok(CycleOutcome::Stopped);
        }

        self.transition(LoopState::Polling);
        let Some(reply) = self.read(&cancel).await? else {
            return Ok(CycleOutcome::Stopped);
        };

        if reply.entries.is_empty() {
            self.stats.empty_polls += 1;
            debug!(empty_polls = self.stats.empty_polls, "no new entries within block timeout");
            return Ok(CycleOutcome::Empty);
        }

        self.transition(LoopState::Delivering);
        let batch = Batch::new(&self.identity.stream, reply.entries);
        let entries = batch.len();
        let started = Instant::now();
        let emitted = self.sink.emit(&batch).await;
        self.stats.process_time += started.elapsed();

        if let Err(e) = emitted {
            self.stats.handler_failures += 1;
            // Redeliver the same entries on the next cycle.
            self.cursor = ReadCursor::Pending;
            self.transition(LoopState::Polling);
            return Ok(CycleOutcome::HandlerFailed {
                entries,
                error: Error::Handler(e),
            });
        }

        let ids = batch.ids();
        let acked = self
            .store
            .ack(&self.identity.stream, &self.identity.group, &ids)
            .await?;
        debug!(entries, acked, last_id = ?batch.last_id(), "acknowledged batch");

        self.stats.batches_delivered += 1;
        self.stats.entries_delivered += entries as u64;
        self.stats.entries_acked += acked;
        self.stats.last_entry_id = batch.last_id();
        self.transition(LoopState::Polling);

        Ok(CycleOutcome::Delivered { entries, acked })
    }

    async fn poll_loop(&mut self) -> Result<()> {
        let cancel = self.control.cancel.clone();

        while self.control.should_continue() {
            match self.poll_once().await {
                Ok(CycleOutcome::Stopped) => break,
                Ok(CycleOutcome::Empty) | Ok(CycleOutcome::Delivered { .. }) => {},
                Ok(CycleOutcome::HandlerFailed { entries, error }) => {
                    warn!(
                        entries,
                        backoff_ms = self.config.backoff_ms,
                        error = %error,
                        "batch handler failed, entries left pending"
                    );
                    if self.config.mode == RunMode::Once {
                        return Err(error);
                    }
                    self.sink.on_error(&error).await;
                    backoff(self.config.backoff(), &cancel).await;
                },
                Err(e) if self.config.retry_read_errors && self.store.is_open() && self.bootstrapped => {
                    warn!(error = %e, backoff_ms = self.config.backoff_ms, "read failed, retrying");
                    backoff(self.config.backoff(), &cancel).await;
                },
                Err(e) => return Err(e),
            }

            if self.config.mode == RunMode::Once {
                break;
            }
        }
        Ok(())
    }

    /// Close the connection. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        let result = self.store.close().await;
        self.control.connection_open.store(false, Ordering::Release);
        self.transition(LoopState::Stopped);
        result
    }

    /// Run the loop to completion and close the connection.
    ///
    /// In continuous mode this returns once a stop is requested or a fatal
    /// error occurs; in one-shot mode after a single cycle. The connection
    /// is closed in every case.
    pub async fn run(mut self) -> Result<ConsumerStats> {
        let outcome = if self.control.should_continue() {
            self.poll_loop().await
        } else {
            Ok(())
        };

        if let Err(e) = self.close().await {
            warn!(error = %e, "failed to close consumer connection");
        }

        match outcome {
            Ok(()) => {
                info!(
                    stream = %self.identity.stream,
                    consumer = %self.identity.consumer,
                    batches = self.stats.batches_delivered,
                    entries = self.stats.entries_delivered,
                    empty_polls = self.stats.empty_polls,
                    "consumer loop finished"
                );
                Ok(self.stats)
            },
            Err(e) => {
                error!(
                    stream = %self.identity.stream,
                    consumer = %self.identity.consumer,
                    error = %e,
                    "consumer loop stopped on error"
                );
                Err(e)
            },
        }
    }

    /// Spawn the loop on a tokio task without waiting for bootstrap.
    pub fn spawn(self) -> ConsumerHandle {
        let controller = self.controller();
        let task = tokio::spawn(self.run());
        ConsumerHandle {
            controller,
            task: Mutex::new(Some(task)),
        }
    }

    /// Bootstrap the group, then spawn the polling loop.
    ///
    /// Bootstrap failures are returned here, after the connection has been
    /// closed, and no task is spawned.
    pub async fn start(mut self) -> Result<ConsumerHandle> {
        if self.control.should_continue()
            && let Err(e) = self.bootstrap().await
        {
            if let Err(close_err) = self.close().await {
                warn!(error = %close_err, "failed to close consumer connection");
            }
            return Err(e);
        }
        Ok(self.spawn())
    }
}

/// Sleep for `delay`, returning early on a stop request.
async fn backoff(delay: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {},
        _ = tokio::time::sleep(delay) => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_config_builder() {
        let config = ConsumerConfig::new()
            .with_batch_size(500)
            .with_block_ms(1000)
            .with_backoff_ms(250)
            .with_read_from(ReadFrom::Beginning)
            .with_mode(RunMode::Once)
            .with_recover_pending(false)
            .with_retry_read_errors(true);

        assert_eq!(config.batch_size, NonZeroUsize::new(500));
        assert_eq!(config.block(), Duration::from_secs(1));
        assert_eq!(config.backoff(), Duration::from_millis(250));
        assert_eq!(config.read_from, ReadFrom::Beginning);
        assert_eq!(config.mode, RunMode::Once);
        assert!(!config.recover_pending);
        assert!(config.retry_read_errors);
    }

    #[test]
    fn test_batch_size_zero_is_unbounded() {
        let config = ConsumerConfig::new().with_batch_size(0);
        assert_eq!(config.batch_size, None);
    }

    #[test]
    fn test_zero_block_rejected() {
        assert!(ConsumerConfig::new().with_block_ms(0).validate().is_err());
        assert!(ConsumerConfig::new().validate().is_ok());
    }

    #[test]
    fn test_identity_validation() {
        assert!(ConsumerIdentity::new("s", "g", "c").validate().is_ok());
        let err = ConsumerIdentity::new("s", "", "c").validate().unwrap_err();
        assert!(err.to_string().contains("consumer group name"));
        assert!(ConsumerIdentity::new("", "g", "c").validate().is_err());
        assert!(ConsumerIdentity::new("s", "g", "").validate().is_err());
    }

    #[test]
    fn test_read_from_start_ids() {
        assert_eq!(ReadFrom::Beginning.as_start_id(), "0");
        assert_eq!(ReadFrom::GroupCreation.as_start_id(), "$");
    }

    #[test]
    fn test_config_deserialize() {
        let config: ConsumerConfig = serde_json::from_str(
            r#"{"batch_size": 8, "read_from": "beginning", "mode": "once"}"#,
        )
        .unwrap();
        assert_eq!(config.batch_size, NonZeroUsize::new(8));
        assert_eq!(config.read_from, ReadFrom::Beginning);
        assert_eq!(config.mode, RunMode::Once);
        assert_eq!(config.block_ms, 5000);

        let config: ConsumerConfig =
            serde_json::from_str(r#"{"read_from": "$", "batch_size": null}"#).unwrap();
        assert_eq!(config.read_from, ReadFrom::GroupCreation);
        assert_eq!(config.batch_size, None);

        let config: ConsumerConfig =
            serde_json::from_str(r#"{"read_from": "group-creation-time"}"#).unwrap();
        assert_eq!(config.read_from, ReadFrom::GroupCreation);
    }

    #[test]
    fn test_consumer_stats() {
        let mut stats = ConsumerStats::new();
        stats.started_at = Some(Instant::now());
        stats.entries_delivered = 100;

        assert!(stats.entries_per_second() >= 0.0);
        assert!(stats.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_controller_stop_is_idempotent() {
        let controller = LoopController {
            control: Arc::new(LoopControl::new(true)),
        };
        assert!(!controller.is_stop_requested());
        assert_eq!(controller.state(), LoopState::Idle);

        controller.request_stop();
        controller.request_stop();
        assert!(controller.is_stop_requested());
        assert!(controller.control.cancel.is_cancelled());
        assert!(controller.is_connection_open());
    }
}
