//! Service facade for the gateway.
//!
//! Exposes the session and webhook operations as JSON-in/JSON-out services
//! so an HTTP layer can bind routes directly. Route definitions themselves
//! live outside this workspace.

pub mod services;
pub mod session;
pub mod webhook;

pub use {
    services::{ServiceResult, SessionService, WebhookService},
    session::LiveSessionService,
    webhook::LiveWebhookService,
};
