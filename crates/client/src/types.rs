//! Event and content types crossing the client-library boundary.

use serde::{Deserialize, Serialize};

/// Events yielded by a live connection's event stream.
///
/// The external library multiplexes everything onto one stream; waplex
/// consumes it in order, one stream per session.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A QR code must be scanned to complete the handshake.
    Qr { data: String },
    /// The handshake completed; the connection is live.
    Opened { identity: String },
    /// The transport closed.
    Closed { reason: DisconnectReason },
    /// An inbound message arrived.
    Message(IncomingMessage),
}

/// Why a connection closed, reduced to a fixed vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The account was explicitly logged out on another device.
    LoggedOut,
    /// Stored credentials are no longer valid.
    BadSession,
    /// The transport dropped for a transient reason.
    ConnectionLost,
    /// The connection timed out.
    TimedOut,
    /// The library asks for an immediate, non-error restart.
    RestartRequired,
}

impl DisconnectReason {
    /// Whether a reconnect attempt is worthwhile.
    ///
    /// `RestartRequired` is retryable but handled specially: the supervisor
    /// reconnects immediately without counting an attempt.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::LoggedOut | Self::BadSession)
    }

    /// Stable string tag used in webhook payloads and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoggedOut => "logged_out",
            Self::BadSession => "bad_session",
            Self::ConnectionLost => "connection_lost",
            Self::TimedOut => "timed_out",
            Self::RestartRequired => "restart_required",
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound message from the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(rename = "chatId")]
    pub chat_id: String,
    #[serde(rename = "senderId")]
    pub sender_id: String,
    #[serde(rename = "senderName")]
    pub sender_name: Option<String>,
    #[serde(rename = "isGroup")]
    pub is_group: bool,
    pub body: String,
    pub timestamp: f64,
}

/// Content variants the connection can dispatch.
///
/// All variants share the pacing pipeline; media is carried as bytes so it
/// is resident in memory before any send loop begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundContent {
    Text {
        body: String,
    },
    Media {
        bytes: Vec<u8>,
        #[serde(rename = "mimeType")]
        mime_type: String,
        caption: Option<String>,
        filename: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        name: Option<String>,
    },
    Contact {
        name: String,
        phone: String,
    },
    Reaction {
        #[serde(rename = "messageId")]
        message_id: String,
        emoji: String,
    },
}

impl OutboundContent {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Media { .. } => "media",
            Self::Location { .. } => "location",
            Self::Contact { .. } => "contact",
            Self::Reaction { .. } => "reaction",
        }
    }
}

/// Presence signals used for typing simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Composing,
    Paused,
    Available,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_reasons() {
        assert!(DisconnectReason::ConnectionLost.is_retryable());
        assert!(DisconnectReason::TimedOut.is_retryable());
        assert!(DisconnectReason::RestartRequired.is_retryable());
        assert!(!DisconnectReason::LoggedOut.is_retryable());
        assert!(!DisconnectReason::BadSession.is_retryable());
    }

    #[test]
    fn reason_tags_are_stable() {
        assert_eq!(DisconnectReason::LoggedOut.as_str(), "logged_out");
        assert_eq!(DisconnectReason::ConnectionLost.as_str(), "connection_lost");
        assert_eq!(DisconnectReason::RestartRequired.as_str(), "restart_required");
    }

    #[test]
    fn content_serializes_tagged() {
        let json = serde_json::to_value(OutboundContent::Text {
            body: "hi".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["body"], "hi");
    }
}
