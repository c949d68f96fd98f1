//! Errors surfaced synchronously by the webhook engine.
//!
//! Delivery failures are never errors here; they live on the task records.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("session '{0}' has no webhook url configured")]
    NotConfigured(String),

    #[error("invalid webhook url: {0}")]
    InvalidUrl(String),

    #[error("invalid event name: {0:?}")]
    InvalidEventName(String),

    #[error("batch is empty")]
    EmptyBatch,

    #[error("batch of {len} events exceeds the maximum of {max}")]
    BatchTooLarge { len: usize, max: usize },

    #[error("no event in the batch was accepted")]
    BatchRejected,
}
