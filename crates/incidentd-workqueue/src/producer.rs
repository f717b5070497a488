//! Batch producer.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::QueueError;
use crate::queue::TaskQueue;
use crate::task::TaskEnvelope;

/// How a batch reacts to a failed enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchPolicy {
    /// Keep enqueueing the remaining tasks.
    #[default]
    ContinueOnError,
    /// Stop at the first failure; remaining tasks are reported as skipped.
    FailFast,
}

/// Result of enqueueing one task.
#[derive(Debug)]
pub enum EnqueueOutcome {
    Enqueued(Uuid),
    Failed(QueueError),
    Skipped,
}

/// Outcome of one task in a batch.
#[derive(Debug)]
pub struct TaskOutcome {
    /// Tag of the task description.
    pub task: String,
    pub outcome: EnqueueOutcome,
}

/// Per-task report of a producer batch, in submission order.
#[derive(Debug, Default)]
pub struct ProducerReport {
    pub outcomes: Vec<TaskOutcome>,
}

impl ProducerReport {
    /// IDs of the tasks that were enqueued.
    pub fn enqueued_ids(&self) -> Vec<Uuid> {
        self.outcomes
            .iter()
            .filter_map(|o| match o.outcome {
                EnqueueOutcome::Enqueued(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Tasks whose enqueue failed.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &QueueError)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            EnqueueOutcome::Failed(e) => Some((o.task.as_str(), e)),
            _ => None,
        })
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, EnqueueOutcome::Skipped))
            .count()
    }

    /// True when every task was enqueued.
    pub fn is_complete(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o.outcome, EnqueueOutcome::Enqueued(_)))
    }
}

/// Hands an ordered batch of task descriptions to the queue.
pub struct Producer {
    tasks: Vec<TaskEnvelope>,
    policy: BatchPolicy,
}

impl Producer {
    /// Create a producer for the given batch.
    pub fn new(tasks: Vec<TaskEnvelope>) -> Self {
        Self {
            tasks,
            policy: BatchPolicy::default(),
        }
    }

    /// Set the batch failure policy.
    pub fn with_policy(mut self, policy: BatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Start enqueueing on a dedicated tokio task.
    pub fn start(self, queue: Arc<TaskQueue>) -> ProducerHandle {
        let handle = tokio::spawn(async move { self.run(&queue).await });
        ProducerHandle { handle }
    }

    /// Enqueue the batch on the current task.
    ///
    /// Per-task failures are logged and reported, never returned.
    pub async fn run(self, queue: &TaskQueue) -> ProducerReport {
        let total = self.tasks.len();
        let mut report = ProducerReport::default();
        let mut halted = false;

        for task in self.tasks {
            if halted {
                report.outcomes.push(TaskOutcome {
                    task: task.task,
                    outcome: EnqueueOutcome::Skipped,
                });
                continue;
            }

            let outcome = match queue.enqueue_task(&task).await {
                Ok(id) => {
                    debug!("Producer enqueued '{}' as {}", task.task, id);
                    EnqueueOutcome::Enqueued(id)
                }
                Err(e) => {
                    error!("Producer failed to enqueue '{}': {}", task.task, e);
                    halted = self.policy == BatchPolicy::FailFast;
                    EnqueueOutcome::Failed(e)
                }
            };
            report.outcomes.push(TaskOutcome {
                task: task.task,
                outcome,
            });
        }

        info!(
            "Producer batch finished: {}/{} enqueued",
            report.enqueued_ids().len(),
            total
        );
        report
    }
}

/// Handle to a running producer batch.
pub struct ProducerHandle {
    handle: JoinHandle<ProducerReport>,
}

impl ProducerHandle {
    /// Wait for every enqueue of the batch to complete.
    pub async fn join(self) -> Result<ProducerReport, QueueError> {
        self.handle
            .await
            .map_err(|e| QueueError::Producer(e.to_string()))
    }
}
