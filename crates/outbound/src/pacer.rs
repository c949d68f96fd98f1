//! Sequential per-recipient send loop with human-like cadence.

use std::{sync::Arc, time::Duration};

use {
    chrono::{DateTime, Utc},
    serde::Deserialize,
    tracing::{debug, warn},
    waplex_client::{Connection, OutboundContent, Presence},
    waplex_sessions::{SessionConfig, SessionError, SessionRegistry, SessionState},
    waplex_webhooks::{WebhookDispatcher, WebhookEvent},
};

use crate::normalize::normalize_recipient;

/// Per-call overrides for the pacing toggles and delays. Unset fields fall
/// back to the session config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SendOptions {
    pub message_delay_ms: Option<u64>,
    pub typing_delay_ms: Option<u64>,
    pub pause_delay_ms: Option<u64>,
    pub show_typing: Option<bool>,
    pub check_number: Option<bool>,
}

/// Effective pacing for one send call.
#[derive(Debug, Clone)]
struct Pacing {
    message_delay: Duration,
    typing_delay: Duration,
    pause_delay: Duration,
    show_typing: bool,
    check_number: bool,
}

impl Pacing {
    fn resolve(config: &SessionConfig, options: &SendOptions) -> Self {
        Self {
            message_delay: Duration::from_millis(
                options.message_delay_ms.unwrap_or(config.message_delay_ms),
            ),
            typing_delay: Duration::from_millis(
                options.typing_delay_ms.unwrap_or(config.typing_delay_ms),
            ),
            pause_delay: Duration::from_millis(
                options.pause_delay_ms.unwrap_or(config.pause_delay_ms),
            ),
            show_typing: options.show_typing.unwrap_or(config.show_typing),
            check_number: options
                .check_number
                .unwrap_or(config.check_number_before_send),
        }
    }
}

/// Outcome for one recipient.
#[derive(Debug, Clone)]
pub struct RecipientReport {
    /// The recipient as submitted by the caller.
    pub recipient: String,
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl RecipientReport {
    fn ok(recipient: &str, message_id: String) -> Self {
        Self {
            recipient: recipient.to_string(),
            success: true,
            message_id: Some(message_id),
            error: None,
            sent_at: Some(Utc::now()),
        }
    }

    fn failed(recipient: &str, error: String) -> Self {
        Self {
            recipient: recipient.to_string(),
            success: false,
            message_id: None,
            error: Some(error),
            sent_at: None,
        }
    }
}

/// Result of one send call. `success` holds only when every recipient
/// succeeded; the per-recipient reports are always complete.
#[derive(Debug, Clone)]
pub struct SendReport {
    pub success: bool,
    pub results: Vec<RecipientReport>,
}

/// Paces outbound sends over a session's live connection.
///
/// The connection is borrowed from the registry per call step, never
/// retained; the supervisor stays its sole owner.
pub struct MessagePacer {
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<WebhookDispatcher>,
}

impl MessagePacer {
    pub fn new(registry: Arc<SessionRegistry>, dispatcher: Arc<WebhookDispatcher>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            dispatcher,
        })
    }

    /// Send `content` to each recipient in order.
    ///
    /// Registry and state problems surface synchronously; per-recipient
    /// failures land in the report. If the session disconnects or is
    /// deleted mid-loop, the remaining recipients are aborted with an
    /// error rather than silently skipped.
    pub async fn send(
        &self,
        session_id: &str,
        recipients: &[String],
        content: &OutboundContent,
        options: &SendOptions,
    ) -> Result<SendReport, SessionError> {
        if recipients.is_empty() {
            return Err(SessionError::Validation("no recipients given".into()));
        }
        let view = self.registry.get(session_id)?;
        if view.state != SessionState::Connected {
            return Err(SessionError::NotConnected(session_id.to_string()));
        }
        let pacing = Pacing::resolve(&view.config, options);
        let country_code = view.config.country_code.clone();

        let mut results = Vec::with_capacity(recipients.len());
        let mut aborted = false;
        for (i, recipient) in recipients.iter().enumerate() {
            if aborted {
                results.push(RecipientReport::failed(
                    recipient,
                    "aborted: session no longer connected".into(),
                ));
                continue;
            }

            // Re-check between recipients: the session may have been
            // disconnected or deleted while this loop was sleeping.
            let conn = match self.live_connection(session_id) {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(session_id, error = %e, "send loop aborted");
                    aborted = true;
                    results.push(RecipientReport::failed(recipient, format!("aborted: {e}")));
                    continue;
                },
            };

            let report = self
                .send_one(&conn, recipient, country_code.as_deref(), &pacing, content)
                .await;
            if report.success {
                self.dispatcher.enqueue(session_id, WebhookEvent::MessageSent {
                    to: recipient.clone(),
                    message_id: report.message_id.clone().unwrap_or_default(),
                    kind: content.kind().to_string(),
                });
            }
            results.push(report);

            if i + 1 < recipients.len() {
                tokio::time::sleep(pacing.message_delay).await;
            }
        }

        Ok(SendReport {
            success: results.iter().all(|r| r.success),
            results,
        })
    }

    fn live_connection(&self, session_id: &str) -> Result<Arc<dyn Connection>, SessionError> {
        let view = self.registry.get(session_id)?;
        if view.state != SessionState::Connected {
            return Err(SessionError::NotConnected(session_id.to_string()));
        }
        self.registry.connection(session_id)
    }

    async fn send_one(
        &self,
        conn: &Arc<dyn Connection>,
        recipient: &str,
        country_code: Option<&str>,
        pacing: &Pacing,
        content: &OutboundContent,
    ) -> RecipientReport {
        let to = match normalize_recipient(recipient, country_code) {
            Ok(to) => to,
            Err(e) => return RecipientReport::failed(recipient, e.to_string()),
        };

        if pacing.check_number {
            match conn.check_exists(&to).await {
                Ok(true) => {},
                Ok(false) => {
                    return RecipientReport::failed(
                        recipient,
                        format!("{to} is not on the network"),
                    );
                },
                Err(e) => {
                    return RecipientReport::failed(recipient, format!("existence check: {e}"));
                },
            }
        }

        if pacing.show_typing {
            if let Err(e) = conn.set_presence(&to, Presence::Composing).await {
                debug!(to, error = %e, "composing presence failed");
            }
            tokio::time::sleep(pacing.typing_delay).await;
        }

        let outcome = conn.send_content(&to, content).await;

        if pacing.show_typing {
            if let Err(e) = conn.set_presence(&to, Presence::Paused).await {
                debug!(to, error = %e, "paused presence failed");
            }
            tokio::time::sleep(pacing.pause_delay).await;
        }

        match outcome {
            Ok(message_id) => {
                debug!(to, message_id, kind = content.kind(), "message dispatched");
                RecipientReport::ok(recipient, message_id)
            },
            Err(e) => RecipientReport::failed(recipient, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use {
        async_trait::async_trait,
        tokio::sync::mpsc,
        waplex_client::{
            ClientEvent, ConnectionFactory, ConnectionHandle, MemorySessionStore,
        },
        waplex_sessions::{ConnectionSupervisor, SupervisorConfig},
        waplex_webhooks::{DispatcherConfig, EndpointSource},
    };

    use super::*;

    struct RecordingConnection {
        sent: Mutex<Vec<String>>,
        presences: Mutex<Vec<(String, Presence)>>,
        missing: Vec<String>,
        fail_sends_to: Vec<String>,
        disconnects: AtomicUsize,
    }

    impl RecordingConnection {
        fn new(missing: Vec<String>, fail_sends_to: Vec<String>) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                presences: Mutex::new(Vec::new()),
                missing,
                fail_sends_to,
                disconnects: AtomicUsize::new(0),
            })
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Connection for RecordingConnection {
        async fn disconnect(&self) -> anyhow::Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send_content(
            &self,
            to: &str,
            _content: &OutboundContent,
        ) -> anyhow::Result<String> {
            if self.fail_sends_to.iter().any(|t| to.starts_with(t.as_str())) {
                anyhow::bail!("transport rejected send");
            }
            self.sent.lock().unwrap().push(to.to_string());
            Ok(format!("MSG-{}", self.sent.lock().unwrap().len()))
        }

        async fn check_exists(&self, to: &str) -> anyhow::Result<bool> {
            Ok(!self.missing.iter().any(|m| to.starts_with(m.as_str())))
        }

        async fn set_presence(&self, to: &str, presence: Presence) -> anyhow::Result<()> {
            self.presences.lock().unwrap().push((to.to_string(), presence));
            Ok(())
        }

        async fn mark_read(&self, _chat_id: &str, _message_ids: &[String]) -> anyhow::Result<()> {
            Ok(())
        }

        async fn request_pairing_code(&self, _phone: &str) -> anyhow::Result<String> {
            Ok("ABCD-1234".into())
        }

        async fn export_state(&self) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::json!({}))
        }
    }

    /// Factory handing out one prepared connection that opens immediately.
    struct OneShotFactory {
        conn: Arc<RecordingConnection>,
        held: Mutex<Vec<mpsc::Sender<ClientEvent>>>,
    }

    #[async_trait]
    impl ConnectionFactory for OneShotFactory {
        async fn open(&self, _session_id: &str) -> anyhow::Result<ConnectionHandle> {
            let (tx, rx) = mpsc::channel(4);
            tx.send(ClientEvent::Opened {
                identity: "me@s.whatsapp.net".into(),
            })
            .await
            .ok();
            self.held.lock().unwrap().push(tx);
            Ok(ConnectionHandle {
                conn: self.conn.clone(),
                events: rx,
            })
        }
    }

    struct Harness {
        registry: Arc<SessionRegistry>,
        dispatcher: Arc<WebhookDispatcher>,
        supervisor: Arc<ConnectionSupervisor>,
        pacer: Arc<MessagePacer>,
        conn: Arc<RecordingConnection>,
    }

    async fn connected_harness(config: SessionConfig, conn: Arc<RecordingConnection>) -> Harness {
        let registry = SessionRegistry::new();
        let dispatcher = WebhookDispatcher::new(
            registry.clone() as Arc<dyn EndpointSource>,
            DispatcherConfig::default(),
        );
        let supervisor = ConnectionSupervisor::new(
            registry.clone(),
            dispatcher.clone(),
            Arc::new(OneShotFactory {
                conn: conn.clone(),
                held: Mutex::new(Vec::new()),
            }),
            MemorySessionStore::new(),
            None,
            SupervisorConfig::default(),
        );
        let pacer = MessagePacer::new(registry.clone(), dispatcher.clone());

        registry.create(Some("s1".into()), config).unwrap();
        supervisor.connect("s1").await.unwrap();
        wait_for(|| {
            registry
                .get("s1")
                .is_ok_and(|v| v.state == SessionState::Connected)
        })
        .await;

        Harness {
            registry,
            dispatcher,
            supervisor,
            pacer,
            conn,
        }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn text() -> OutboundContent {
        OutboundContent::Text { body: "hi".into() }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_existence_check_is_isolated() {
        // Three recipients with the middle one not on the network: the
        // other two still go out, spaced by the inter-message delay.
        let conn = RecordingConnection::new(vec!["5511222".into()], Vec::new());
        let h = connected_harness(
            SessionConfig {
                country_code: Some("55".into()),
                message_delay_ms: 100,
                show_typing: false,
                check_number_before_send: true,
                webhook_url: Some("http://127.0.0.1:9/hook".into()),
                ..Default::default()
            },
            conn,
        )
        .await;

        let recipients: Vec<String> =
            vec!["11111111111".into(), "11222222222".into(), "11333333333".into()];
        let started = tokio::time::Instant::now();
        let report = h
            .pacer
            .send("s1", &recipients, &text(), &SendOptions::default())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert!(!report.success);
        assert_eq!(report.results.len(), 3);
        assert!(report.results[0].success);
        assert!(!report.results[1].success);
        assert!(report.results[1].error.as_deref().unwrap().contains("not on the network"));
        assert!(report.results[2].success);

        assert_eq!(h.conn.sent(), vec![
            "5511111111111@s.whatsapp.net".to_string(),
            "5511333333333@s.whatsapp.net".to_string(),
        ]);
        // Two inter-message waits regardless of the middle failure.
        assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?}");

        // One message_sent event per successful dispatch.
        assert_eq!(h.dispatcher.stats("s1").total, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_simulation_brackets_the_dispatch() {
        let conn = RecordingConnection::new(Vec::new(), Vec::new());
        let h = connected_harness(
            SessionConfig {
                typing_delay_ms: 2000,
                pause_delay_ms: 500,
                ..Default::default()
            },
            conn,
        )
        .await;

        let started = tokio::time::Instant::now();
        let report = h
            .pacer
            .send(
                "s1",
                &["15551234567".into()],
                &text(),
                &SendOptions::default(),
            )
            .await
            .unwrap();
        assert!(report.success);
        assert!(started.elapsed() >= Duration::from_millis(2500));

        let presences = h.conn.presences.lock().unwrap().clone();
        assert_eq!(presences.len(), 2);
        assert_eq!(presences[0].1, Presence::Composing);
        assert_eq!(presences[1].1, Presence::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn per_call_options_override_session_config() {
        let conn = RecordingConnection::new(Vec::new(), Vec::new());
        let h = connected_harness(SessionConfig::default(), conn).await;

        let report = h
            .pacer
            .send(
                "s1",
                &["15551234567".into()],
                &text(),
                &SendOptions {
                    show_typing: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(report.success);
        assert!(h.conn.presences.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn synchronous_errors_for_bad_calls() {
        let conn = RecordingConnection::new(Vec::new(), Vec::new());
        let h = connected_harness(SessionConfig::default(), conn).await;

        assert!(matches!(
            h.pacer
                .send("missing", &["1".into()], &text(), &SendOptions::default())
                .await,
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            h.pacer.send("s1", &[], &text(), &SendOptions::default()).await,
            Err(SessionError::Validation(_))
        ));

        h.supervisor.disconnect("s1").await.unwrap();
        assert!(matches!(
            h.pacer
                .send("s1", &["1".into()], &text(), &SendOptions::default())
                .await,
            Err(SessionError::NotConnected(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_is_per_recipient() {
        let conn = RecordingConnection::new(Vec::new(), vec!["15551111111".into()]);
        let h = connected_harness(
            SessionConfig {
                message_delay_ms: 10,
                show_typing: false,
                ..Default::default()
            },
            conn,
        )
        .await;

        let report = h
            .pacer
            .send(
                "s1",
                &["15551111111".into(), "15552222222".into()],
                &text(),
                &SendOptions::default(),
            )
            .await
            .unwrap();
        assert!(!report.success);
        assert!(!report.results[0].success);
        assert!(report.results[0].error.as_deref().unwrap().contains("rejected"));
        assert!(report.results[1].success);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_mid_loop_aborts_the_remainder() {
        let conn = RecordingConnection::new(Vec::new(), Vec::new());
        let h = connected_harness(
            SessionConfig {
                message_delay_ms: 60_000,
                show_typing: false,
                ..Default::default()
            },
            conn,
        )
        .await;

        let pacer = h.pacer.clone();
        let send = tokio::spawn(async move {
            pacer
                .send(
                    "s1",
                    &["15551111111".into(), "15552222222".into(), "15553333333".into()],
                    &OutboundContent::Text { body: "hi".into() },
                    &SendOptions::default(),
                )
                .await
        });

        // First dispatch goes out, then the loop sleeps for a minute;
        // disconnect while it waits.
        wait_for(|| h.conn.sent().len() == 1).await;
        h.supervisor.disconnect("s1").await.unwrap();

        let report = send.await.unwrap().unwrap();
        assert!(!report.success);
        assert!(report.results[0].success);
        assert!(!report.results[1].success);
        assert!(report.results[1].error.as_deref().unwrap().starts_with("aborted"));
        assert!(!report.results[2].success);
        assert_eq!(h.conn.sent().len(), 1);
        // Registry untouched: the session survives for a later reconnect.
        assert!(h.registry.contains("s1"));
    }
}
