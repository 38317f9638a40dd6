//! Bounded sample queue
//!
//! Single-producer/single-consumer FIFO between the sampling and publishing
//! tasks, backed by a bounded `tokio::sync::mpsc` channel. Pushing never
//! blocks: a full queue rejects the new record and leaves the buffered ones
//! untouched (drop-newest).

use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tremor_shared::SampleRecord;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue full, record dropped")]
    Full,

    #[error("Queue closed")]
    Closed,

    #[error("Queue capacity must be non-zero")]
    ZeroCapacity,
}

/// Allocate a queue with a fixed capacity
pub fn sample_queue(capacity: usize) -> Result<(SampleProducer, SampleConsumer), QueueError> {
    if capacity == 0 {
        return Err(QueueError::ZeroCapacity);
    }
    let (tx, rx) = mpsc::channel(capacity);
    Ok((SampleProducer { tx }, SampleConsumer { rx }))
}

/// Producer half, owned by the sampling task
pub struct SampleProducer {
    tx: mpsc::Sender<SampleRecord>,
}

impl SampleProducer {
    /// Push without waiting; fails with `Full` when no slot is free
    pub fn try_push(&self, record: SampleRecord) -> Result<(), QueueError> {
        self.tx.try_send(record).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Records currently buffered
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Consumer half, owned by the publishing task
pub struct SampleConsumer {
    rx: mpsc::Receiver<SampleRecord>,
}

impl SampleConsumer {
    /// Wait up to `wait` for the next record
    ///
    /// `Ok(None)` means the wait timed out with the queue still empty.
    pub async fn pop_timeout(&mut self, wait: Duration) -> Result<Option<SampleRecord>, QueueError> {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(record)) => Ok(Some(record)),
            Ok(None) => Err(QueueError::Closed),
            Err(_) => Ok(None),
        }
    }

    /// Take the next record if one is buffered
    #[cfg(test)]
    pub fn try_pop(&mut self) -> Result<Option<SampleRecord>, QueueError> {
        use tokio::sync::mpsc::error::TryRecvError;

        match self.rx.try_recv() {
            Ok(record) => Ok(Some(record)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(QueueError::Closed),
        }
    }
}
