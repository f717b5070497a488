//! # incidentd Notify Handler Extension
//!
//! Handles `send_notification` tasks. Every notification is recorded in a
//! SQLite ledger with a status history, then delivered through a channel.
//!
//! ## Channels
//!
//! - [`WebhookChannel`]: POSTs the notification as JSON (Slack-compatible `text` field)
//! - [`LogChannel`]: writes the notification to the log only

pub mod channel;
pub mod error;
pub mod handler;
pub mod ledger;

pub use channel::{LogChannel, NotificationChannel, WebhookChannel};
pub use error::LedgerError;
pub use handler::{NotificationHandler, NotificationRequest, TASK_TAG};
pub use ledger::{
    HistoryEntry, NewNotification, Notification, NotificationLedger, NotificationStatus,
    NotificationType,
};
