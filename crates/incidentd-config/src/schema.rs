//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::loader::ConfigLoader;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub handlers: HandlersConfig,
}

/// Base directory for incidentd state (`~/.incidentd`).
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".incidentd"))
        .unwrap_or_else(|| PathBuf::from(".incidentd"))
}

fn expand(path: &std::path::Path) -> PathBuf {
    PathBuf::from(ConfigLoader::expand_path(&path.to_string_lossy()))
}

/// Task record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file holding the queue table.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// How long a writer waits on a locked database before failing.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    default_data_dir().join("queue.db")
}

fn default_busy_timeout() -> u64 {
    5000
}

impl DatabaseConfig {
    /// Database path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        expand(&self.path)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// When a handler's task is acknowledged (marked processed) relative to its execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Mark processed first, then run the handler. At-most-once.
    BeforeExecute,
    /// Run the handler, mark processed on success. At-least-once.
    #[default]
    AfterExecute,
}

/// What the watcher does with tasks whose tag has no registered handler
/// or whose payload cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownTaskPolicy {
    /// Mark processed without running anything.
    #[default]
    Drop,
    /// Move to the `failed` status so the record stands out for inspection.
    DeadLetter,
}

/// Queue and watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Delay between polls when the queue is empty.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Redeliveries allowed for a failing ack-after-execute task before it is dead-lettered.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub unknown_task_policy: UnknownTaskPolicy,

    /// Upper bound on a single handler invocation (None = unbounded).
    #[serde(default)]
    pub handler_timeout_secs: Option<u64>,

    /// Per-tag overrides of the handler's default acknowledgement policy.
    #[serde(default)]
    pub ack_policies: HashMap<String, AckPolicy>,
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_retries: default_max_retries(),
            unknown_task_policy: UnknownTaskPolicy::default(),
            handler_timeout_secs: None,
            ack_policies: HashMap::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rolling log files (None = `~/.incidentd/logs`).
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub file_enabled: bool,

    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    30
}

pub(crate) fn default_true() -> bool {
    true
}

impl LoggingConfig {
    pub fn resolved_log_dir(&self) -> PathBuf {
        self.log_dir
            .as_deref()
            .map(expand)
            .unwrap_or_else(|| default_data_dir().join("logs"))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
            file_enabled: default_true(),
            max_log_files: default_max_log_files(),
        }
    }
}

/// Settings for the built-in task handlers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlersConfig {
    #[serde(default)]
    pub llm: LlmHandlerConfig,

    #[serde(default)]
    pub corrective: CorrectiveHandlerConfig,

    #[serde(default)]
    pub notify: NotifyHandlerConfig,
}

fn default_handler_timeout() -> u64 {
    60
}

/// `llm_invoke` handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmHandlerConfig {
    /// LLM pipeline endpoint receiving the task data. The handler is not
    /// registered when unset.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_handler_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmHandlerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_handler_timeout(),
        }
    }
}

/// `set_corrective_action` handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectiveHandlerConfig {
    /// Corrective-action advisor (RAG service) endpoint. The handler is not
    /// registered when unset.
    #[serde(default)]
    pub advisor_url: Option<String>,

    /// Database holding `classifier_outputs` (None = the queue database).
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default = "default_handler_timeout")]
    pub timeout_secs: u64,
}

impl CorrectiveHandlerConfig {
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path.as_deref().map(expand)
    }
}

impl Default for CorrectiveHandlerConfig {
    fn default() -> Self {
        Self {
            advisor_url: None,
            database_path: None,
            timeout_secs: default_handler_timeout(),
        }
    }
}

/// `send_notification` handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyHandlerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Notification ledger database.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Webhook receiving notifications. Notifications are only logged when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
}

fn default_ledger_path() -> PathBuf {
    default_data_dir().join("notifications.db")
}

fn default_notify_timeout() -> u64 {
    30
}

impl NotifyHandlerConfig {
    pub fn resolved_ledger_path(&self) -> PathBuf {
        expand(&self.ledger_path)
    }
}

impl Default for NotifyHandlerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            ledger_path: default_ledger_path(),
            webhook_url: None,
            timeout_secs: default_notify_timeout(),
        }
    }
}
