//! Where delivered batches go.
//!
//! The consumer loop hands every non-empty batch to a [`BatchSink`] and only
//! acknowledges the batch once the sink returns `Ok`.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::entry::Batch;
use crate::error::{Error, SinkError};

/// Receiver of delivered batches, injected by the host.
#[async_trait]
pub trait BatchSink: Send {
    /// Process one batch. Returning an error leaves the batch unacknowledged.
    async fn emit(&mut self, batch: &Batch) -> std::result::Result<(), SinkError>;

    /// Called with errors the loop recovers from (handler failures).
    async fn on_error(&mut self, _error: &Error) {}
}

/// Adapts a synchronous closure into a [`BatchSink`].
pub struct FnSink<F> {
    f: F,
}

impl<F> FnSink<F>
where
    F: FnMut(&Batch) -> std::result::Result<(), SinkError> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> BatchSink for FnSink<F>
where
    F: FnMut(&Batch) -> std::result::Result<(), SinkError> + Send,
{
    async fn emit(&mut self, batch: &Batch) -> std::result::Result<(), SinkError> {
        (self.f)(batch)
    }
}

/// Forwards batches into a tokio channel.
///
/// Waits for channel capacity, so a slow receiver applies backpressure to the
/// loop. Fails once the receiver is dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Batch>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Batch>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiving half of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Batch>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl BatchSink for ChannelSink {
    async fn emit(&mut self, batch: &Batch) -> std::result::Result<(), SinkError> {
        self.tx
            .send(batch.clone())
            .await
            .map_err(|_| "batch receiver was dropped".into())
    }
}

#[async_trait]
impl<T: BatchSink + ?Sized> BatchSink for Box<T> {
    async fn emit(&mut self, batch: &Batch) -> std::result::Result<(), SinkError> {
        (**self).emit(batch).await
    }

    async fn on_error(&mut self, error: &Error) {
        (**self).on_error(error).await
    }
}
