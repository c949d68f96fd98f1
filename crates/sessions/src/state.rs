//! The session lifecycle state machine.
//!
//! `transition` is a pure function from (state, attempts, event) to the next
//! state plus a list of effects. The supervisor applies the effects; nothing
//! here touches a registry, a timer, or the network, which keeps the machine
//! independently testable.

use std::time::Duration;

use {
    serde::{Deserialize, Serialize},
    waplex_client::DisconnectReason,
    waplex_webhooks::WebhookEvent,
};

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Connecting,
    QrGenerated,
    Pairing,
    Connected,
    Disconnected,
    RestartRequired,
    Banned,
}

impl SessionState {
    /// Banned is the only terminal state: no automatic reconnection, and
    /// the id must be deleted before reuse.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Banned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::QrGenerated => "qr_generated",
            Self::Pairing => "pairing",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::RestartRequired => "restart_required",
            Self::Banned => "banned",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconnect policy: linear backoff (`attempt_index * base_interval`),
/// unlike the webhook engine's exponential retry backoff.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_interval: Duration::from_millis(2000),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt_index` (1-based).
    pub fn delay(&self, attempt_index: u32) -> Duration {
        self.base_interval * attempt_index
    }
}

/// Connection-lifecycle inputs to the state machine.
#[derive(Debug, Clone)]
pub enum ConnEvent {
    /// An explicit connect request, or a reconnect timer firing.
    ConnectRequested,
    /// The handshake produced a QR code to scan.
    QrIssued { qr: String },
    /// A pairing code was issued for phone-number login.
    PairingIssued { code: String },
    /// The handshake completed.
    Opened { identity: String },
    /// The transport closed.
    Closed { reason: DisconnectReason },
}

/// Side effects the supervisor must apply after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Notify the webhook delivery engine.
    Emit(WebhookEvent),
    /// Store a fresh QR artifact on the record.
    StoreQr { qr: String },
    /// Store a fresh pairing-code artifact on the record.
    StorePairingCode { code: String },
    /// Record the connected endpoint identity.
    RecordIdentity { identity: String },
    /// Record the latest error description.
    RecordError { message: String },
    /// Reset the reconnect attempt counter to zero.
    ResetAttempts,
    /// Schedule a reconnect after `delay`; the counter moves to
    /// `attempt_index` when the timer fires and the attempt is made.
    ScheduleReconnect { delay: Duration, attempt_index: u32 },
    /// Reconnect immediately without counting an attempt.
    ReconnectNow,
    /// Tear down the live connection handle.
    TearDownConnection,
    /// Purge stored credentials and artifacts for the session.
    PurgeCredentials,
}

/// Result of one transition.
#[derive(Debug, Clone)]
pub struct Transition {
    pub next: SessionState,
    pub effects: Vec<Effect>,
}

/// Apply one connection event to the session's current state.
///
/// `attempts` is the current reconnect counter. Banned absorbs everything;
/// the supervisor never acts on a banned session again.
pub fn transition(
    state: SessionState,
    attempts: u32,
    event: ConnEvent,
    policy: &ReconnectPolicy,
) -> Transition {
    if state.is_terminal() {
        return Transition {
            next: state,
            effects: Vec::new(),
        };
    }

    match event {
        ConnEvent::ConnectRequested => Transition {
            next: SessionState::Connecting,
            effects: vec![Effect::TearDownConnection],
        },
        ConnEvent::QrIssued { qr } => Transition {
            next: SessionState::QrGenerated,
            effects: vec![
                Effect::StoreQr { qr: qr.clone() },
                Effect::Emit(WebhookEvent::QrUpdated { qr }),
            ],
        },
        ConnEvent::PairingIssued { code } => Transition {
            next: SessionState::Pairing,
            effects: vec![
                Effect::StorePairingCode { code: code.clone() },
                Effect::Emit(WebhookEvent::PairingCode { code }),
            ],
        },
        ConnEvent::Opened { identity } => Transition {
            next: SessionState::Connected,
            effects: vec![
                Effect::RecordIdentity {
                    identity: identity.clone(),
                },
                Effect::ResetAttempts,
                Effect::Emit(WebhookEvent::Connected { identity }),
            ],
        },
        ConnEvent::Closed { reason } => closed(attempts, reason, policy),
    }
}

fn closed(attempts: u32, reason: DisconnectReason, policy: &ReconnectPolicy) -> Transition {
    if reason == DisconnectReason::RestartRequired {
        return Transition {
            next: SessionState::RestartRequired,
            effects: vec![Effect::Emit(WebhookEvent::RestartRequired), Effect::ReconnectNow],
        };
    }

    if !reason.is_retryable() {
        return banned(reason);
    }

    let attempt_index = attempts + 1;
    if attempt_index > policy.max_attempts {
        return banned(reason);
    }

    Transition {
        next: SessionState::Disconnected,
        effects: vec![
            Effect::RecordError {
                message: reason.as_str().to_string(),
            },
            Effect::Emit(WebhookEvent::Disconnected {
                reason: reason.as_str().to_string(),
            }),
            Effect::ScheduleReconnect {
                delay: policy.delay(attempt_index),
                attempt_index,
            },
        ],
    }
}

fn banned(reason: DisconnectReason) -> Transition {
    Transition {
        next: SessionState::Banned,
        effects: vec![
            Effect::RecordError {
                message: reason.as_str().to_string(),
            },
            Effect::Emit(WebhookEvent::Banned {
                reason: reason.as_str().to_string(),
            }),
            Effect::TearDownConnection,
            Effect::PurgeCredentials,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: 3,
            base_interval: Duration::from_millis(1000),
        }
    }

    fn scheduled(t: &Transition) -> Option<(Duration, u32)> {
        t.effects.iter().find_map(|e| match e {
            Effect::ScheduleReconnect {
                delay,
                attempt_index,
            } => Some((*delay, *attempt_index)),
            _ => None,
        })
    }

    #[test]
    fn qr_and_open_path() {
        let p = policy();
        let t = transition(
            SessionState::Connecting,
            0,
            ConnEvent::QrIssued { qr: "qr-data".into() },
            &p,
        );
        assert_eq!(t.next, SessionState::QrGenerated);
        assert!(t.effects.iter().any(|e| matches!(e, Effect::StoreQr { .. })));

        let t = transition(
            SessionState::QrGenerated,
            2,
            ConnEvent::Opened {
                identity: "u@s.whatsapp.net".into(),
            },
            &p,
        );
        assert_eq!(t.next, SessionState::Connected);
        assert!(t.effects.contains(&Effect::ResetAttempts));
    }

    #[test]
    fn pairing_path() {
        let t = transition(
            SessionState::Connecting,
            0,
            ConnEvent::PairingIssued { code: "ABCD-1234".into() },
            &policy(),
        );
        assert_eq!(t.next, SessionState::Pairing);
        assert!(
            t.effects
                .iter()
                .any(|e| matches!(e, Effect::StorePairingCode { code } if code == "ABCD-1234"))
        );
    }

    #[test]
    fn linear_backoff_schedule() {
        // max_attempts=3, base=1000ms: three transient closes schedule
        // 1000/2000/3000ms; the fourth goes straight to banned.
        let p = policy();
        let close = || ConnEvent::Closed {
            reason: DisconnectReason::ConnectionLost,
        };

        let t = transition(SessionState::Connected, 0, close(), &p);
        assert_eq!(t.next, SessionState::Disconnected);
        assert_eq!(scheduled(&t), Some((Duration::from_millis(1000), 1)));

        let t = transition(SessionState::Connected, 1, close(), &p);
        assert_eq!(scheduled(&t), Some((Duration::from_millis(2000), 2)));

        let t = transition(SessionState::Connected, 2, close(), &p);
        assert_eq!(scheduled(&t), Some((Duration::from_millis(3000), 3)));

        let t = transition(SessionState::Connected, 3, close(), &p);
        assert_eq!(t.next, SessionState::Banned);
        assert_eq!(scheduled(&t), None);
        assert!(t.effects.contains(&Effect::PurgeCredentials));
    }

    #[test]
    fn logged_out_is_terminal_regardless_of_attempts() {
        let t = transition(
            SessionState::Connected,
            0,
            ConnEvent::Closed {
                reason: DisconnectReason::LoggedOut,
            },
            &policy(),
        );
        assert_eq!(t.next, SessionState::Banned);
        assert!(t.effects.contains(&Effect::TearDownConnection));
        assert!(t.effects.contains(&Effect::PurgeCredentials));
    }

    #[test]
    fn restart_required_skips_the_counter() {
        let t = transition(
            SessionState::Connected,
            2,
            ConnEvent::Closed {
                reason: DisconnectReason::RestartRequired,
            },
            &policy(),
        );
        assert_eq!(t.next, SessionState::RestartRequired);
        assert!(t.effects.contains(&Effect::ReconnectNow));
        assert_eq!(scheduled(&t), None);
    }

    #[test]
    fn banned_absorbs_everything() {
        let t = transition(
            SessionState::Banned,
            5,
            ConnEvent::Opened {
                identity: "u@s.whatsapp.net".into(),
            },
            &policy(),
        );
        assert_eq!(t.next, SessionState::Banned);
        assert!(t.effects.is_empty());
    }
}
