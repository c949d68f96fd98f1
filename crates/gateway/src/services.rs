//! Service traits the HTTP layer binds to.
//!
//! Every operation takes loosely-typed JSON params and returns a JSON value
//! or a caller-facing error string; the transport maps those onto HTTP
//! status codes.

use {async_trait::async_trait, serde_json::Value};

pub type ServiceResult = Result<Value, String>;

/// Session lifecycle and outbound send operations.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Register a session. `{sessionId?, config?}` -> `{sessionId}`.
    async fn create(&self, params: Value) -> ServiceResult;

    /// Start (or restart) the session's connection loop.
    async fn connect(&self, params: Value) -> ServiceResult;

    /// Current state, config and last error for one session.
    async fn status(&self, params: Value) -> ServiceResult;

    /// All registered sessions, compact form.
    async fn list(&self) -> ServiceResult;

    /// The latest handshake artifact (QR image or pairing code).
    async fn artifact(&self, params: Value) -> ServiceResult;

    /// Request a pairing code for phone-number login.
    async fn pairing_code(&self, params: Value) -> ServiceResult;

    /// Merge a partial config update. `{sessionId, config}`.
    async fn update_config(&self, params: Value) -> ServiceResult;

    /// Stop the connection loop; the session stays registered.
    async fn disconnect(&self, params: Value) -> ServiceResult;

    /// Remove the session, its webhook tasks and stored credentials.
    async fn delete(&self, params: Value) -> ServiceResult;

    /// Paced send to one or more recipients.
    /// `{sessionId, to, content, options?}` -> per-recipient report.
    async fn send(&self, params: Value) -> ServiceResult;
}

/// Webhook delivery operations.
#[async_trait]
pub trait WebhookService: Send + Sync {
    /// One-off test delivery. `{sessionId, url?}`.
    async fn test(&self, params: Value) -> ServiceResult;

    /// Aggregate delivery statistics for one session.
    async fn stats(&self, params: Value) -> ServiceResult;

    /// Cancel queued/retrying tasks. Returns the count cleared.
    async fn clear_pending(&self, params: Value) -> ServiceResult;

    /// Queue a caller-supplied event. `{sessionId, event, data?}`.
    async fn send_custom(&self, params: Value) -> ServiceResult;

    /// Queue a bounded batch of caller-supplied events.
    /// `{sessionId, events: [{event, data?}]}`.
    async fn send_batch(&self, params: Value) -> ServiceResult;
}

/// Extract a required string field from JSON params.
pub(crate) fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing '{key}'"))
}
