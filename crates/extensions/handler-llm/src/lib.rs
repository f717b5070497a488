//! # incidentd LLM Handler Extension
//!
//! Handles `llm_invoke` tasks by forwarding the task data to the LLM
//! pipeline's HTTP endpoint.

pub mod handler;

pub use handler::{LlmInvokeHandler, TASK_TAG};
