//! # incidentd Corrective Action Handler Extension
//!
//! Handles `set_corrective_action` tasks: asks an advisor service for a
//! corrective action for the incident and stores it on the matching
//! `classifier_outputs` row.
//!
//! ## Components
//!
//! - [`CorrectiveActionAdvisor`]: source of corrective actions ([`HttpAdvisor`] calls the RAG service)
//! - [`ClassifierOutputs`]: the `classifier_outputs` table
//! - [`CorrectiveActionHandler`]: the task handler

pub mod advisor;
pub mod handler;
pub mod outputs;

pub use advisor::{CorrectiveActionAdvisor, HttpAdvisor};
pub use handler::{CorrectiveActionHandler, CorrectiveRequest, TASK_TAG};
pub use outputs::ClassifierOutputs;
