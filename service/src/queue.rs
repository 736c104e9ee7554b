//! Bounded refresh queue between the recorder and the worker pool.
//!
//! A thin layer over a tokio mpsc channel that ties both ends to the
//! service's cancellation token. Producers wait while the queue is full;
//! consumers share one receiver.

use std::sync::Arc;

use fxrefresh_common::{Record, RefreshError, Result};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Create a queue holding at most `capacity` records.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn refresh_queue(capacity: usize, shutdown: CancellationToken) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);

    let sender = QueueSender {
        tx,
        shutdown: shutdown.clone(),
    };
    let receiver = QueueReceiver {
        rx: Arc::new(Mutex::new(rx)),
        shutdown,
    };

    (sender, receiver)
}

/// Producer side of the refresh queue.
#[derive(Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<Record>,
    shutdown: CancellationToken,
}

impl QueueSender {
    /// Enqueue a record, waiting for a free slot.
    ///
    /// Fails with `QueueClosed` once shutdown has been requested or every
    /// receiver is gone. A record that loses the race against shutdown is
    /// dropped.
    pub async fn push(&self, record: Record) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(RefreshError::QueueClosed);
        }

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(RefreshError::QueueClosed),
            sent = self.tx.send(record) => sent.map_err(|_| RefreshError::QueueClosed),
        }
    }

    /// Records currently waiting.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of waiting records.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Consumer side of the refresh queue, shared by all workers.
#[derive(Clone)]
pub struct QueueReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Record>>>,
    shutdown: CancellationToken,
}

impl QueueReceiver {
    /// Wait for the next record.
    ///
    /// Returns `None` once shutdown has been requested, even if records are
    /// still waiting, or when every sender is gone and the queue is drained.
    pub async fn pop(&self) -> Option<Record> {
        if self.shutdown.is_cancelled() {
            return None;
        }

        let mut rx = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return None,
            rx = self.rx.lock() => rx,
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            record = rx.recv() => record,
        }
    }
}
