//! Queue inspection and enqueue subcommands.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use incidentd_config::Config;
use incidentd_handler_notify::{NotificationLedger, NotificationStatus};
use incidentd_workqueue::{
    BatchPolicy, EnqueueOutcome, Producer, SqliteTaskStore, TaskEnvelope, TaskQueue, TaskStatus,
};

/// Open the configured queue database.
pub(crate) async fn open_queue(config: &Config) -> anyhow::Result<Arc<TaskQueue>> {
    let path = config.database.resolved_path();
    let store = SqliteTaskStore::open(&path, config.database.busy_timeout())
        .await
        .with_context(|| format!("Failed to open queue database {}", path.display()))?;
    Ok(Arc::new(TaskQueue::new(Arc::new(store))))
}

/// Pair `--task` tags with `--data` documents by position.
pub(crate) fn parse_batch(tasks: Vec<String>, data: Vec<String>) -> anyhow::Result<Vec<TaskEnvelope>> {
    if data.len() > tasks.len() {
        bail!("{} --data values given for {} tasks", data.len(), tasks.len());
    }

    let mut data = data.into_iter();
    tasks
        .into_iter()
        .map(|task| {
            let value = match data.next() {
                Some(raw) => serde_json::from_str(&raw)
                    .with_context(|| format!("Invalid JSON data for task '{}'", task))?,
                None => Value::Object(Default::default()),
            };
            Ok(TaskEnvelope::new(task, value))
        })
        .collect()
}

pub(crate) async fn enqueue(
    queue: Arc<TaskQueue>,
    batch: Vec<TaskEnvelope>,
    fail_fast: bool,
) -> anyhow::Result<()> {
    let policy = if fail_fast {
        BatchPolicy::FailFast
    } else {
        BatchPolicy::ContinueOnError
    };

    let report = Producer::new(batch).with_policy(policy).start(queue).join().await?;

    for outcome in &report.outcomes {
        match &outcome.outcome {
            EnqueueOutcome::Enqueued(id) => println!("{}\t{}", id, outcome.task),
            EnqueueOutcome::Failed(e) => eprintln!("failed\t{}\t{}", outcome.task, e),
            EnqueueOutcome::Skipped => eprintln!("skipped\t{}", outcome.task),
        }
    }

    if !report.is_complete() {
        let total = report.outcomes.len();
        bail!(
            "{} of {} tasks were not enqueued",
            total - report.enqueued_ids().len(),
            total
        );
    }
    Ok(())
}

pub(crate) async fn stats(queue: &TaskQueue) -> anyhow::Result<()> {
    let counts = queue.get_stats().await?;
    for status in [TaskStatus::Pending, TaskStatus::Processed, TaskStatus::Failed] {
        println!("{:<10} {}", status, counts.get(&status).copied().unwrap_or(0));
    }
    Ok(())
}

pub(crate) async fn list(queue: &TaskQueue, status: &str, limit: usize) -> anyhow::Result<()> {
    let status = TaskStatus::parse(status).ok_or_else(|| anyhow!("Unknown task status '{}'", status))?;
    let records = queue.list(status, limit).await?;

    if records.is_empty() {
        println!("No {} tasks", status);
        return Ok(());
    }

    for record in records {
        let tag = match record.envelope() {
            Ok(envelope) => envelope.task,
            Err(_) => "<malformed>".to_string(),
        };
        println!(
            "{}\t{}\t{}\tretries={}{}",
            record.id,
            tag,
            record.created_at.to_rfc3339(),
            record.retry_count,
            record
                .last_error
                .map(|e| format!("\terror={}", e))
                .unwrap_or_default()
        );
    }
    Ok(())
}

pub(crate) async fn show(queue: &TaskQueue, id: &str) -> anyhow::Result<()> {
    let id = Uuid::parse_str(id).with_context(|| format!("Invalid task ID '{}'", id))?;
    let record = queue
        .get(&id)
        .await?
        .ok_or_else(|| anyhow!("Task {} not found", id))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub(crate) async fn notifications(
    config: &Config,
    status: Option<&str>,
    limit: usize,
) -> anyhow::Result<()> {
    let path = config.handlers.notify.resolved_ledger_path();
    if !path.exists() {
        warn!("Notification ledger {} does not exist yet", path.display());
        return Ok(());
    }
    let ledger = NotificationLedger::open(&path, config.database.busy_timeout()).await?;

    let notifications = match status {
        Some(raw) => {
            let status = NotificationStatus::parse(raw)
                .ok_or_else(|| anyhow!("Unknown notification status '{}'", raw))?;
            ledger.list_by_status(status, limit).await?
        }
        None => ledger.list(limit).await?,
    };

    for n in notifications {
        println!(
            "{}\t{}\t{}\t{}\t{}\tretries={}",
            n.id,
            n.notification_type,
            n.status,
            n.recipient,
            n.subject.as_deref().unwrap_or("-"),
            n.retry_count
        );
    }
    Ok(())
}
