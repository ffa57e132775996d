//! Bounded task queue feeding a fixed set of workers.
//!
//! Producers block once the queue is full. Each worker owns its own state
//! and runs one task at a time; with a single worker, tasks run strictly in
//! queue order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{StreamExt, StreamMap};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WorkerLimits;
use crate::error::PoolError;
use crate::types::PoolTask;

/// A long-lived consumer of pool tasks.
#[async_trait]
pub trait Worker: Send + 'static {
    async fn run(&mut self, task: PoolTask);

    /// Called once after the worker has taken its last task.
    async fn shutdown(&mut self) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolMetrics {
    pub workers_current: usize,
    pub workers_min: usize,
    pub workers_max: usize,
    pub queued: u64,
    pub dispatched: u64,
    pub finished: u64,
    /// Accepted tasks dropped at shutdown without being dispatched.
    pub discarded: u64,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    dispatched: AtomicU64,
    finished: AtomicU64,
    discarded: AtomicU64,
}

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub struct WorkerPool {
    limits: WorkerLimits,
    sender: mpsc::Sender<PoolTask>,
    receiver: Arc<AsyncMutex<mpsc::Receiver<PoolTask>>>,
    closing: CancellationToken,
    started: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    pub fn new(limits: WorkerLimits, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            limits,
            sender,
            receiver: Arc::new(AsyncMutex::new(receiver)),
            closing: CancellationToken::new(),
            started: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn limits(&self) -> WorkerLimits {
        self.limits
    }

    pub fn is_closed(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Enqueue a task, waiting for room if the queue is full.
    pub async fn submit(&self, task: PoolTask) -> Result<(), PoolError> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        enqueue(&self.sender, &self.closing, &self.counters, task).await
    }

    /// Spawn the workers. Each worker value is moved into its own task.
    /// A rejected start hands the workers back so the caller can release
    /// whatever they hold.
    pub fn start<W: Worker>(&self, workers: Vec<W>) -> Result<(), (PoolError, Vec<W>)> {
        if self.is_closed() {
            return Err((PoolError::PoolClosed, workers));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err((PoolError::AlreadyStarted, workers));
        }

        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        for (id, worker) in workers.into_iter().enumerate() {
            handles.push(tokio::spawn(worker_loop(
                id,
                worker,
                self.receiver.clone(),
                self.closing.clone(),
                self.counters.clone(),
            )));
        }

        let metrics = self.metrics();
        info!(
            workers_current = metrics.workers_current,
            workers_min = metrics.workers_min,
            workers_max = metrics.workers_max,
            "pool started"
        );
        Ok(())
    }

    /// Merge several submission channels into the queue. Order across
    /// sources is unspecified; nothing is dropped while the pool is open.
    pub fn attach_sources(&self, sources: Vec<mpsc::Receiver<PoolTask>>) {
        if sources.is_empty() {
            return;
        }
        let mut merged = StreamMap::new();
        for (idx, source) in sources.into_iter().enumerate() {
            merged.insert(idx, ReceiverStream::new(source));
        }

        let sender = self.sender.clone();
        let closing = self.closing.clone();
        let counters = self.counters.clone();
        let handle = tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = closing.cancelled() => break,
                    next = merged.next() => next,
                };
                let Some((source, task)) = next else { break };
                debug!(source, task_id = %task.id, "forwarding task");
                if enqueue(&sender, &closing, &counters, task).await.is_err() {
                    counters.discarded.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }

            // Whatever the sources still hold was accepted but never queued.
            let mut stranded = 0u64;
            for stream in merged.values_mut() {
                let source = stream.as_mut();
                source.close();
                while source.try_recv().is_ok() {
                    stranded += 1;
                }
            }
            counters.discarded.fetch_add(stranded, Ordering::Relaxed);
            debug!(stranded, "task sources exited");
        });
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Stop dispatching. Tasks already running finish; tasks that were
    /// accepted but never dispatched are discarded. Returns how many were
    /// discarded in total.
    pub async fn stop(&self) -> u64 {
        self.closing.cancel();

        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "pool task panicked");
            }
        }

        let mut receiver = self.receiver.lock().await;
        receiver.close();
        let mut queued = 0u64;
        while receiver.try_recv().is_ok() {
            queued += 1;
        }
        self.counters.discarded.fetch_add(queued, Ordering::Relaxed);

        let discarded = self.counters.discarded.load(Ordering::Relaxed);
        if discarded > 0 {
            warn!(discarded, "discarded undispatched tasks on shutdown");
        }
        info!("pool stopped");
        discarded
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            workers_current: self.limits.current,
            workers_min: self.limits.min,
            workers_max: self.limits.max,
            queued: self.counters.queued.load(Ordering::Relaxed),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            finished: self.counters.finished.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }
}

async fn enqueue(
    sender: &mpsc::Sender<PoolTask>,
    closing: &CancellationToken,
    counters: &Counters,
    task: PoolTask,
) -> Result<(), PoolError> {
    tokio::select! {
        sent = sender.send(task) => sent.map_err(|_| PoolError::PoolClosed)?,
        _ = closing.cancelled() => return Err(PoolError::PoolClosed),
    }
    increment(&counters.queued);
    Ok(())
}

async fn worker_loop<W: Worker>(
    id: usize,
    mut worker: W,
    receiver: Arc<AsyncMutex<mpsc::Receiver<PoolTask>>>,
    closing: CancellationToken,
    counters: Arc<Counters>,
) {
    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = closing.cancelled() => None,
                task = receiver.recv() => task,
            }
        };
        let Some(task) = next else { break };

        increment(&counters.dispatched);
        debug!(worker = id, task_id = %task.id, "dispatching task");
        worker.run(task).await;
        increment(&counters.finished);
    }

    worker.shutdown().await;
    debug!(worker = id, "worker exited");
}
