//! # Task Bus
//!
//! Bounded FIFO queue connecting the watcher to the executor.
//!
//! The bus is split into a cloneable [`BusSender`] and a single [`BusReceiver`]
//! so that exactly one consumer can exist. `push` waits while the bus is full
//! and `pop` waits while it is empty; both return as soon as the shared
//! cancellation token fires.

use crate::task::ExecutionTask;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("task bus operation cancelled")]
    Cancelled,
    #[error("task bus closed: the other side has gone away")]
    Closed,
}

/// Bounded task queue, created once and split into its two halves
#[derive(Debug)]
pub struct TaskBus {
    sender: BusSender,
    receiver: BusReceiver,
}

impl TaskBus {
    /// Create a bus holding at most `capacity` queued tasks
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. Configuration validation rejects that value.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            sender: BusSender { tx, capacity },
            receiver: BusReceiver { rx },
        }
    }

    pub fn split(self) -> (BusSender, BusReceiver) {
        (self.sender, self.receiver)
    }
}

/// Producer half of the bus
#[derive(Debug, Clone)]
pub struct BusSender {
    tx: mpsc::Sender<ExecutionTask>,
    capacity: usize,
}

impl BusSender {
    /// Queue a task, waiting for room when the bus is full
    pub async fn push(
        &self,
        task: ExecutionTask,
        cancel: &CancellationToken,
    ) -> Result<(), BusError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(BusError::Cancelled),
            sent = self.tx.send(task) => sent.map_err(|_closed| BusError::Closed),
        }
    }

    /// Number of tasks currently queued
    pub(crate) fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Whether the next push has to wait for the executor
    pub(crate) fn is_full(&self) -> bool {
        self.tx.capacity() == 0
    }
}

/// Consumer half of the bus; not cloneable
#[derive(Debug)]
pub struct BusReceiver {
    rx: mpsc::Receiver<ExecutionTask>,
}

impl BusReceiver {
    /// Take the oldest task, waiting while the bus is empty
    ///
    /// Returns `Closed` once every sender is dropped and the queue is drained.
    pub async fn pop(&mut self, cancel: &CancellationToken) -> Result<ExecutionTask, BusError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(BusError::Cancelled),
            task = self.rx.recv() => task.ok_or(BusError::Closed),
        }
    }
}
