//! Internal event kinds and their wire representation.

use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    serde_json::{Value, json},
};

/// Closed set of events the gateway emits.
///
/// Internal code works with these variants; the stringly `{event, data}`
/// shape only exists at the HTTP boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    /// A fresh QR code is waiting to be scanned.
    QrUpdated { qr: String },
    /// A pairing code was issued for phone-number login.
    PairingCode { code: String },
    /// The session handshake completed.
    Connected { identity: String },
    /// The transport closed with a retryable reason.
    Disconnected { reason: String },
    /// The session hit a terminal failure and will not reconnect.
    Banned { reason: String },
    /// The transport asked for an immediate restart.
    RestartRequired,
    /// An outbound message was dispatched.
    MessageSent {
        to: String,
        message_id: String,
        kind: String,
    },
    /// An inbound message arrived.
    MessageReceived { message: Value },
    /// Caller-supplied event, passed through verbatim.
    Custom { name: String, data: Value },
}

impl WebhookEvent {
    /// The `event` tag on the wire.
    pub fn name(&self) -> &str {
        match self {
            Self::QrUpdated { .. } => "qr_updated",
            Self::PairingCode { .. } => "pairing_code",
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Banned { .. } => "banned",
            Self::RestartRequired => "restart_required",
            Self::MessageSent { .. } => "message_sent",
            Self::MessageReceived { .. } => "message_received",
            Self::Custom { name, .. } => name,
        }
    }

    /// The `data` object on the wire.
    pub fn data(&self) -> Value {
        match self {
            Self::QrUpdated { qr } => json!({ "qr": qr }),
            Self::PairingCode { code } => json!({ "code": code }),
            Self::Connected { identity } => json!({ "identity": identity }),
            Self::Disconnected { reason } | Self::Banned { reason } => {
                json!({ "reason": reason })
            },
            Self::RestartRequired => json!({}),
            Self::MessageSent {
                to,
                message_id,
                kind,
            } => json!({ "to": to, "messageId": message_id, "kind": kind }),
            Self::MessageReceived { message } => message.clone(),
            Self::Custom { data, .. } => data.clone(),
        }
    }
}

/// The HTTP request body delivered to consumers.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookBody {
    pub event: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl WebhookBody {
    pub fn new(session_id: &str, event: &WebhookEvent, timestamp: DateTime<Utc>) -> Self {
        Self {
            event: event.name().to_string(),
            session_id: session_id.to_string(),
            timestamp,
            data: event.data(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_matches_wire_contract() {
        let event = WebhookEvent::Connected {
            identity: "15551234567@s.whatsapp.net".into(),
        };
        let body = WebhookBody::new("s1", &event, Utc::now());
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["event"], "connected");
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["data"]["identity"], "15551234567@s.whatsapp.net");
        // chrono serializes DateTime<Utc> as RFC 3339 / ISO 8601.
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn custom_event_passes_name_and_data_through() {
        let event = WebhookEvent::Custom {
            name: "invoice_paid".into(),
            data: json!({ "amount": 42 }),
        };
        assert_eq!(event.name(), "invoice_paid");
        assert_eq!(event.data()["amount"], 42);
    }

    #[test]
    fn message_sent_data_shape() {
        let event = WebhookEvent::MessageSent {
            to: "15551234567@s.whatsapp.net".into(),
            message_id: "ABCD".into(),
            kind: "text".into(),
        };
        let data = event.data();
        assert_eq!(data["messageId"], "ABCD");
        assert_eq!(data["kind"], "text");
    }
}
