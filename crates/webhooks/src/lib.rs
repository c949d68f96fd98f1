//! Webhook delivery engine.
//!
//! Turns internal events into at-least-once, retried, rate-bounded HTTP
//! notifications. Enqueueing never blocks on network I/O; delivery failures
//! are recorded on the task and observable through statistics, never thrown
//! back at the emitter. Consumers must tolerate duplicate deliveries.

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod stats;
pub mod task;

pub use {
    dispatcher::{
        BatchEntry, BatchReport, DispatcherConfig, Endpoint, EndpointLookup, EndpointSource,
        TestOutcome, WebhookDispatcher,
    },
    error::WebhookError,
    event::{WebhookBody, WebhookEvent},
    stats::DeliveryStats,
    task::{DeliveryStatus, DeliveryTask},
};
