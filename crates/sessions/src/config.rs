//! Per-session configuration.

use serde::{Deserialize, Serialize};

/// Recognized options for one session.
///
/// Everything is optional on the wire; unspecified fields take the defaults
/// below. Delays are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Default country code prepended to bare national numbers.
    pub country_code: Option<String>,

    /// Webhook consumer URL. Empty or absent means webhooks are off.
    pub webhook_url: Option<String>,

    /// Hold before the first delivery attempt of each webhook task.
    pub webhook_delay_ms: u64,

    /// Pause between recipients in a multi-recipient send.
    pub message_delay_ms: u64,

    /// How long the "composing" presence is held before dispatch.
    pub typing_delay_ms: u64,

    /// How long the "paused" presence is held after dispatch.
    pub pause_delay_ms: u64,

    /// Delay before auto-marking an inbound message as read.
    pub read_message_delay_ms: u64,

    /// Whether to simulate typing around each dispatch.
    pub show_typing: bool,

    /// Whether to auto-mark inbound messages as read.
    pub auto_read: bool,

    /// Whether to verify a recipient exists before sending.
    pub check_number_before_send: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            country_code: None,
            webhook_url: None,
            webhook_delay_ms: 0,
            message_delay_ms: 1000,
            typing_delay_ms: 2000,
            pause_delay_ms: 500,
            read_message_delay_ms: 0,
            show_typing: true,
            auto_read: false,
            check_number_before_send: false,
        }
    }
}

impl SessionConfig {
    /// The configured webhook URL, treating the empty string as unset so a
    /// patch can turn webhooks off.
    pub fn webhook_url(&self) -> Option<&str> {
        self.webhook_url.as_deref().filter(|u| !u.is_empty())
    }

    /// Merge a partial update into this config. Absent fields keep their
    /// current values; the patch never replaces the whole config.
    pub fn apply(&mut self, patch: SessionConfigPatch) {
        if let Some(v) = patch.country_code {
            self.country_code = Some(v);
        }
        if let Some(v) = patch.webhook_url {
            self.webhook_url = Some(v);
        }
        if let Some(v) = patch.webhook_delay_ms {
            self.webhook_delay_ms = v;
        }
        if let Some(v) = patch.message_delay_ms {
            self.message_delay_ms = v;
        }
        if let Some(v) = patch.typing_delay_ms {
            self.typing_delay_ms = v;
        }
        if let Some(v) = patch.pause_delay_ms {
            self.pause_delay_ms = v;
        }
        if let Some(v) = patch.read_message_delay_ms {
            self.read_message_delay_ms = v;
        }
        if let Some(v) = patch.show_typing {
            self.show_typing = v;
        }
        if let Some(v) = patch.auto_read {
            self.auto_read = v;
        }
        if let Some(v) = patch.check_number_before_send {
            self.check_number_before_send = v;
        }
    }
}

/// Partial config update. Mirrors [`SessionConfig`] with every field
/// optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfigPatch {
    pub country_code: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_delay_ms: Option<u64>,
    pub message_delay_ms: Option<u64>,
    pub typing_delay_ms: Option<u64>,
    pub pause_delay_ms: Option<u64>,
    pub read_message_delay_ms: Option<u64>,
    pub show_typing: Option<bool>,
    pub auto_read: Option<bool>,
    pub check_number_before_send: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.message_delay_ms, 1000);
        assert_eq!(cfg.typing_delay_ms, 2000);
        assert!(cfg.show_typing);
        assert!(!cfg.auto_read);
        assert!(cfg.webhook_url().is_none());
    }

    #[test]
    fn deserialize_partial_json() {
        let json = r#"{
            "countryCode": "55",
            "webhookUrl": "https://consumer.example/hook",
            "messageDelayMs": 250,
            "autoRead": true
        }"#;
        let cfg: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.country_code.as_deref(), Some("55"));
        assert_eq!(cfg.webhook_url(), Some("https://consumer.example/hook"));
        assert_eq!(cfg.message_delay_ms, 250);
        assert!(cfg.auto_read);
        // untouched defaults
        assert_eq!(cfg.typing_delay_ms, 2000);
    }

    #[test]
    fn patch_merges_without_replacing() {
        let mut cfg = SessionConfig {
            country_code: Some("55".into()),
            webhook_url: Some("https://a.example".into()),
            ..Default::default()
        };
        cfg.apply(SessionConfigPatch {
            message_delay_ms: Some(50),
            ..Default::default()
        });
        assert_eq!(cfg.message_delay_ms, 50);
        assert_eq!(cfg.country_code.as_deref(), Some("55"));
        assert_eq!(cfg.webhook_url(), Some("https://a.example"));
    }

    #[test]
    fn empty_webhook_url_disables_webhooks() {
        let mut cfg = SessionConfig {
            webhook_url: Some("https://a.example".into()),
            ..Default::default()
        };
        cfg.apply(SessionConfigPatch {
            webhook_url: Some(String::new()),
            ..Default::default()
        });
        assert!(cfg.webhook_url().is_none());
    }
}
