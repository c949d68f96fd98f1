//! The opaque connection object owned by the external client library.

use {anyhow::Result, async_trait::async_trait, tokio::sync::mpsc};

use crate::types::{ClientEvent, OutboundContent, Presence};

/// A live connection to the messaging network for one session.
///
/// Exclusively owned by that session's supervisor; other components borrow
/// it for the duration of a single call. Implementations wrap whatever the
/// external library hands out.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Tear the connection down. Idempotent.
    async fn disconnect(&self) -> Result<()>;

    /// Dispatch content to a normalized recipient, returning the network
    /// message id.
    async fn send_content(&self, to: &str, content: &OutboundContent) -> Result<String>;

    /// Whether the recipient exists on the network.
    async fn check_exists(&self, to: &str) -> Result<bool>;

    /// Signal composing/paused presence toward a recipient.
    async fn set_presence(&self, to: &str, presence: Presence) -> Result<()>;

    /// Mark messages in a chat as read.
    async fn mark_read(&self, chat_id: &str, message_ids: &[String]) -> Result<()>;

    /// Request a pairing code for phone-number login instead of a QR scan.
    async fn request_pairing_code(&self, phone: &str) -> Result<String>;

    /// Export the connection's cached contacts/chats state for snapshots.
    async fn export_state(&self) -> Result<serde_json::Value>;
}

/// A freshly opened connection plus its event stream.
pub struct ConnectionHandle {
    pub conn: std::sync::Arc<dyn Connection>,
    pub events: mpsc::Receiver<ClientEvent>,
}

/// Opens connections. Injected so supervisors can be driven by test doubles.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a new connection for the session, loading any stored
    /// credentials. The returned stream yields events in transport order.
    async fn open(&self, session_id: &str) -> Result<ConnectionHandle>;
}
