use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::runtime::{InboundMessage, PipelineEngine, RunReport};

/// Upper bound on concurrent runs, matching `pipeline.workers` validation.
pub const MAX_WORKERS: usize = 1_024;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatch queue is full")]
    QueueFull,
    #[error("dispatcher is shut down")]
    Closed,
    #[error("run ended without producing a report")]
    RunDropped,
}

struct Job {
    message: InboundMessage,
    done: oneshot::Sender<RunReport>,
}

/// Completion signal for one submitted run.
#[derive(Debug)]
pub struct RunHandle {
    receiver: oneshot::Receiver<RunReport>,
}

impl RunHandle {
    pub async fn wait(self) -> Result<RunReport, DispatchError> {
        self.receiver.await.map_err(|_| DispatchError::RunDropped)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub submitted: u64,
    pub rejected: u64,
    pub completed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
}

/// Bounded pool of pipeline runs. Submission never blocks: a full queue is
/// reported to the caller instead. At most `workers` runs execute at once;
/// runs for the same session still serialize on the session lock.
pub struct RunDispatcher {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl RunDispatcher {
    /// Worker and queue sizes are clamped into what the runtime's semaphore
    /// and channel can represent.
    pub fn spawn(engine: Arc<PipelineEngine>, workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.clamp(1, MAX_WORKERS);
        let queue_capacity = queue_capacity.clamp(1, Semaphore::MAX_PERMITS);
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let counters = Arc::new(Counters::default());
        let supervisor =
            tokio::spawn(supervise(engine, receiver, workers, Arc::clone(&counters)));

        info!(event_name = "dispatch.started", workers, queue_capacity, "run dispatcher started");
        Self {
            sender: Mutex::new(Some(sender)),
            supervisor: Mutex::new(Some(supervisor)),
            counters,
        }
    }

    pub fn submit(&self, message: InboundMessage) -> Result<RunHandle, DispatchError> {
        let sender = match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
        .ok_or(DispatchError::Closed)?;

        let (done, receiver) = oneshot::channel();
        match sender.try_send(Job { message, done }) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(RunHandle { receiver })
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_name = "dispatch.queue_full",
                    correlation_id = %job.message.transport_message_id,
                    "run rejected, dispatch queue full"
                );
                Err(DispatchError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::Closed),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
        }
    }

    pub fn is_accepting(&self) -> bool {
        match self.sender.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    /// Stops accepting work, then waits for queued and in-flight runs.
    pub async fn shutdown(&self) {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);

        let supervisor = match self.supervisor.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(supervisor) = supervisor {
            if let Err(error) = supervisor.await {
                warn!(
                    event_name = "dispatch.supervisor_failed",
                    error = %error,
                    "dispatcher ended abnormally"
                );
            }
        }
        info!(event_name = "dispatch.stopped", "run dispatcher drained");
    }
}

async fn supervise(
    engine: Arc<PipelineEngine>,
    mut receiver: mpsc::Receiver<Job>,
    workers: usize,
    counters: Arc<Counters>,
) {
    let permits = Arc::new(Semaphore::new(workers));

    while let Some(Job { message, done }) = receiver.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let engine = Arc::clone(&engine);
        let counters = Arc::clone(&counters);
        tokio::spawn(async move {
            let report = engine.run(message).await;
            counters.completed.fetch_add(1, Ordering::Relaxed);
            if done.send(report).is_err() {
                debug!(event_name = "dispatch.report_unclaimed", "run finished with no waiter");
            }
            drop(permit);
        });
    }

    // Every permit back means every spawned run has finished.
    let total = u32::try_from(workers).unwrap_or(u32::MAX);
    if let Ok(all) = permits.acquire_many(total).await {
        drop(all);
    };
}
