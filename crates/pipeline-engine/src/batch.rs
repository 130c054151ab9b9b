//! Batch processing: one node applied to many files.
//!
//! A fixed number of workers share a queue of files. Each worker checks
//! cancellation before taking the next file; a file already being
//! processed is allowed to finish. Results come back in input order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::constants::defaults;
use crate::events::{EventSink, PipelineEvent};
use crate::executor::{ProgressReporter, StepExecutor};
use crate::types::{ArtifactRef, PipelineNode};

/// Result for one file of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchItemResult {
    /// The step produced these artifacts
    Succeeded(Vec<ArtifactRef>),
    /// The step failed with this message
    Failed(String),
    /// The step started but stopped on cancellation
    Cancelled,
    /// Never started because the batch was cancelled first
    Skipped,
}

impl BatchItemResult {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchItemResult::Succeeded(_))
    }
}

/// Results of a batch, indexed like the input files
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub items: Vec<BatchItemResult>,
    pub cancelled: bool,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|item| item.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item, BatchItemResult::Failed(_)))
            .count()
    }

    /// All produced artifacts, in input order
    pub fn outputs(&self) -> Vec<ArtifactRef> {
        self.items
            .iter()
            .filter_map(|item| match item {
                BatchItemResult::Succeeded(outputs) => Some(outputs.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

/// Fixed-size worker pool for batch operations
pub struct BatchRunner {
    concurrency: usize,
    cancel: CancellationToken,
    batch_id: String,
}

impl BatchRunner {
    pub fn new() -> Self {
        Self {
            concurrency: defaults::BATCH_CONCURRENCY,
            cancel: CancellationToken::new(),
            batch_id: format!("batch-{}", uuid::Uuid::new_v4()),
        }
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        Self::new().with_concurrency(config.batch_concurrency)
    }

    /// Set the number of workers (at least one)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop dequeuing files; in-flight files finish
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run `node` once per file, with at most `concurrency` files in flight
    pub async fn run<E>(
        &self,
        executor: &E,
        node: &PipelineNode,
        files: Vec<ArtifactRef>,
        event_sink: Arc<dyn EventSink>,
    ) -> BatchOutcome
    where
        E: StepExecutor + ?Sized,
    {
        let total = files.len();
        let workers = self.concurrency.min(total);
        log::info!(
            "Batch '{}': running node '{}' on {} file(s) with {} worker(s)",
            self.batch_id,
            node.id,
            total,
            workers
        );

        let ctx = BatchContext {
            executor,
            node,
            batch_id: &self.batch_id,
            cancel: &self.cancel,
            event_sink,
            queue: Mutex::new(files.into_iter().enumerate().collect()),
            results: Mutex::new((0..total).map(|_| BatchItemResult::Skipped).collect()),
            completed: AtomicUsize::new(0),
            total,
        };

        join_all((0..workers).map(|worker| ctx.work(worker))).await;

        let cancelled = self.cancel.is_cancelled();
        let items = ctx.results.into_inner();
        if cancelled {
            let skipped = items.iter().filter(|i| matches!(i, BatchItemResult::Skipped)).count();
            log::info!("Batch '{}' cancelled; {} file(s) skipped", self.batch_id, skipped);
        }
        BatchOutcome { items, cancelled }
    }
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new()
    }
}

struct BatchContext<'a, E: ?Sized> {
    executor: &'a E,
    node: &'a PipelineNode,
    batch_id: &'a str,
    cancel: &'a CancellationToken,
    event_sink: Arc<dyn EventSink>,
    queue: Mutex<VecDeque<(usize, ArtifactRef)>>,
    results: Mutex<Vec<BatchItemResult>>,
    completed: AtomicUsize,
    total: usize,
}

impl<E: StepExecutor + ?Sized> BatchContext<'_, E> {
    async fn work(&self, worker: usize) {
        loop {
            if self.cancel.is_cancelled() {
                log::debug!("Batch worker {} stopping on cancellation", worker);
                return;
            }
            let next = self.queue.lock().pop_front();
            let Some((index, file)) = next else {
                return;
            };

            let reporter = ProgressReporter::new(
                self.node.id.as_str(),
                format!("{}-{}", self.batch_id, index),
                self.cancel.clone(),
                self.event_sink.clone(),
            );
            let item = match self.executor.execute_step(self.node, vec![file], &reporter).await {
                Ok(outputs) => BatchItemResult::Succeeded(outputs),
                Err(e) if e.is_cancelled() => BatchItemResult::Cancelled,
                Err(e) => {
                    log::warn!("Batch file {} failed on node '{}': {}", index, self.node.id, e);
                    BatchItemResult::Failed(e.to_string())
                }
            };

            let success = item.is_success();
            self.results.lock()[index] = item;
            let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
            let event = PipelineEvent::BatchItemFinished {
                node_id: self.node.id.clone(),
                index,
                completed,
                total: self.total,
                success,
            };
            if let Err(e) = self.event_sink.send(event) {
                log::trace!("Dropped batch event for file {}: {}", index, e);
            }
        }
    }
}
