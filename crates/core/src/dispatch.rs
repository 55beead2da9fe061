//! Sequential dispatch queue.
//!
//! Webhooks arrive concurrently but every call-outcome pipeline talks to the
//! same rate-sensitive, token-authenticated platform, so they are funnelled
//! through a FIFO drained by exactly one worker task. Each queued item owns a
//! one-shot completion that is resolved exactly once, whatever the pipeline
//! outcome, and the worker always moves on to the next item.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{OverflowPolicy, QueueConfig, MAX_QUEUE_CAPACITY};
use crate::domain::call::CallId;
use crate::errors::PipelineError;

/// The per-item pipeline run by the worker. `correlation_id` is the queued
/// item's id, so pipeline logs join the dispatch logs for the same event.
#[async_trait]
pub trait CallProcessor: Send + Sync {
    async fn process(&self, correlation_id: &str, call_id: &CallId) -> Result<(), PipelineError>;
}

pub type DispatchOutcome = Result<(), PipelineError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("dispatch queue is full ({capacity} items pending)")]
    Full { capacity: usize },
    #[error("dispatch queue is closed")]
    Closed,
}

#[derive(Debug)]
pub struct QueueItem {
    pub correlation_id: String,
    pub call_id: CallId,
    pub enqueued_at: DateTime<Utc>,
    responder: oneshot::Sender<DispatchOutcome>,
}

impl QueueItem {
    pub fn new(call_id: CallId) -> (Self, Completion) {
        let (responder, receiver) = oneshot::channel();
        let item = Self {
            correlation_id: format!("CALLEV-{}", Uuid::new_v4().simple()),
            call_id,
            enqueued_at: Utc::now(),
            responder,
        };
        (item, Completion { receiver })
    }
}

/// Caller side of a queued item's response handle.
#[derive(Debug)]
pub struct Completion {
    receiver: oneshot::Receiver<DispatchOutcome>,
}

impl Completion {
    pub async fn wait(self) -> DispatchOutcome {
        self.receiver.await.unwrap_or_else(|_| {
            Err(PipelineError::Aborted(
                "dispatch worker stopped before completing the item".to_string(),
            ))
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub busy: bool,
    pub pending: usize,
    pub in_flight: usize,
    pub processed: u64,
    pub failed: u64,
    pub capacity: Option<usize>,
}

#[derive(Debug, Default)]
struct QueueState {
    counters: Mutex<QueueStats>,
}

impl QueueState {
    fn update<R>(&self, apply: impl FnOnce(&mut QueueStats) -> R) -> R {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut counters)
    }

    fn snapshot(&self) -> QueueStats {
        self.update(|counters| counters.clone())
    }
}

/// Counts an item as pending while its send is in progress. Dropped
/// uncommitted (send failed, or the enqueue future was cancelled mid-wait),
/// it takes the count back.
struct PendingSlot<'a> {
    state: &'a QueueState,
    committed: bool,
}

impl<'a> PendingSlot<'a> {
    fn reserve(state: &'a QueueState) -> Self {
        state.update(|counters| counters.pending += 1);
        Self { state, committed: false }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.state.update(|counters| counters.pending = counters.pending.saturating_sub(1));
        }
    }
}

enum QueueSender {
    Unbounded(mpsc::UnboundedSender<QueueItem>),
    Bounded(mpsc::Sender<QueueItem>),
}

impl Clone for QueueSender {
    fn clone(&self) -> Self {
        match self {
            Self::Unbounded(sender) => Self::Unbounded(sender.clone()),
            Self::Bounded(sender) => Self::Bounded(sender.clone()),
        }
    }
}

enum QueueReceiver {
    Unbounded(mpsc::UnboundedReceiver<QueueItem>),
    Bounded(mpsc::Receiver<QueueItem>),
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<QueueItem> {
        match self {
            Self::Unbounded(receiver) => receiver.recv().await,
            Self::Bounded(receiver) => receiver.recv().await,
        }
    }
}

/// Cloneable enqueue handle. The worker exits once every handle is dropped
/// and the remaining items are drained.
#[derive(Clone)]
pub struct DispatchQueue {
    sender: QueueSender,
    overflow: OverflowPolicy,
    state: Arc<QueueState>,
}

impl DispatchQueue {
    pub fn spawn(
        config: &QueueConfig,
        processor: Arc<dyn CallProcessor>,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = match config.capacity {
            Some(capacity) => {
                let (sender, receiver) = mpsc::channel(capacity.clamp(1, MAX_QUEUE_CAPACITY));
                (QueueSender::Bounded(sender), QueueReceiver::Bounded(receiver))
            }
            None => {
                let (sender, receiver) = mpsc::unbounded_channel();
                (QueueSender::Unbounded(sender), QueueReceiver::Unbounded(receiver))
            }
        };

        let state = Arc::new(QueueState::default());
        state.update(|counters| counters.capacity = config.capacity);

        let worker = DispatchWorker { receiver, processor, state: state.clone() };
        let handle = tokio::spawn(worker.run());

        (Self { sender, overflow: config.overflow, state }, handle)
    }

    /// Appends an item to the tail. Only suspends when a capacity is
    /// configured with [`OverflowPolicy::Wait`] and the queue is full.
    pub async fn enqueue(&self, item: QueueItem) -> Result<(), EnqueueError> {
        let correlation_id = item.correlation_id.clone();
        let call_id = item.call_id.clone();
        let slot = PendingSlot::reserve(&self.state);

        let result = match &self.sender {
            QueueSender::Unbounded(sender) => sender.send(item).map_err(|_| EnqueueError::Closed),
            QueueSender::Bounded(sender) => match self.overflow {
                OverflowPolicy::Reject => sender.try_send(item).map_err(|error| match error {
                    mpsc::error::TrySendError::Full(_) => {
                        EnqueueError::Full { capacity: sender.max_capacity() }
                    }
                    mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
                }),
                OverflowPolicy::Wait => sender.send(item).await.map_err(|_| EnqueueError::Closed),
            },
        };

        match &result {
            Ok(()) => {
                slot.commit();
                debug!(
                    event_name = "dispatch.item.enqueued",
                    correlation_id = %correlation_id,
                    call_id = %call_id,
                    "call event queued"
                );
            }
            Err(enqueue_error) => {
                drop(slot);
                warn!(
                    event_name = "dispatch.item.rejected",
                    correlation_id = %correlation_id,
                    call_id = %call_id,
                    error = %enqueue_error,
                    "call event was not queued"
                );
            }
        }

        result
    }

    pub fn stats(&self) -> QueueStats {
        self.state.snapshot()
    }

    /// False once the worker task has gone away.
    pub fn is_running(&self) -> bool {
        match &self.sender {
            QueueSender::Unbounded(sender) => !sender.is_closed(),
            QueueSender::Bounded(sender) => !sender.is_closed(),
        }
    }
}

struct DispatchWorker {
    receiver: QueueReceiver,
    processor: Arc<dyn CallProcessor>,
    state: Arc<QueueState>,
}

impl DispatchWorker {
    async fn run(mut self) {
        info!(
            event_name = "dispatch.worker.started",
            correlation_id = "dispatch",
            "dispatch worker started"
        );

        while let Some(item) = self.receiver.recv().await {
            let QueueItem { correlation_id, call_id, enqueued_at, responder } = item;
            self.state.update(|counters| {
                counters.pending = counters.pending.saturating_sub(1);
                counters.busy = true;
                counters.in_flight = 1;
            });

            let waited_ms = (Utc::now() - enqueued_at).num_milliseconds();
            info!(
                event_name = "dispatch.item.started",
                correlation_id = %correlation_id,
                call_id = %call_id,
                waited_ms,
                "processing call event"
            );

            let outcome = self.process_isolated(&correlation_id, &call_id).await;
            match &outcome {
                Ok(()) => info!(
                    event_name = "dispatch.item.completed",
                    correlation_id = %correlation_id,
                    call_id = %call_id,
                    "call event processed"
                ),
                Err(pipeline_error) => error!(
                    event_name = "dispatch.item.failed",
                    correlation_id = %correlation_id,
                    call_id = %call_id,
                    error_class = pipeline_error.error_class(),
                    error = %pipeline_error,
                    "call event processing failed; continuing with next item"
                ),
            }

            let idle = self.state.update(|counters| {
                counters.busy = false;
                counters.in_flight = 0;
                if outcome.is_ok() {
                    counters.processed += 1;
                } else {
                    counters.failed += 1;
                }
                counters.pending == 0
            });

            if responder.send(outcome).is_err() {
                debug!(
                    event_name = "dispatch.item.unobserved",
                    correlation_id = %correlation_id,
                    call_id = %call_id,
                    "caller stopped waiting; result discarded"
                );
            }

            if idle {
                debug!(
                    event_name = "dispatch.worker.idle",
                    correlation_id = "dispatch",
                    "all queued call events processed"
                );
            }
        }

        info!(
            event_name = "dispatch.worker.stopped",
            correlation_id = "dispatch",
            "dispatch worker stopped"
        );
    }

    /// Runs one pipeline in its own task so a panic is reported as a failed
    /// item instead of unwinding the worker.
    async fn process_isolated(&self, correlation_id: &str, call_id: &CallId) -> DispatchOutcome {
        let processor = self.processor.clone();
        let task_correlation_id = correlation_id.to_owned();
        let task_call_id = call_id.clone();
        let task = tokio::spawn(async move {
            processor.process(&task_correlation_id, &task_call_id).await
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(join_error) if join_error.is_panic() => {
                Err(PipelineError::Aborted("call processing panicked".to_string()))
            }
            Err(join_error) => Err(PipelineError::Aborted(join_error.to_string())),
        }
    }
}
