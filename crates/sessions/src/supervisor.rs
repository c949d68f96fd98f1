//! Drives each session's connection lifecycle.
//!
//! The supervisor owns one event loop per session: it opens connections
//! through the injected factory, feeds transport events through the state
//! machine, applies the resulting effects, and runs the reconnect timers.
//! Inbound messages and periodic state snapshots are handled here too, off
//! the state machine's path.

use std::{sync::Arc, time::Duration};

use {
    dashmap::DashMap,
    serde_json::Value,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    waplex_client::{
        ClientEvent, Connection, ConnectionFactory, DisconnectReason, SessionStore, SnapshotSink,
    },
    waplex_webhooks::{WebhookDispatcher, WebhookEvent},
};

use crate::{
    artifact::Artifact,
    error::SessionError,
    registry::SessionRegistry,
    state::{ConnEvent, Effect, ReconnectPolicy, SessionState, Transition, transition},
};

/// Supervisor tunables.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub policy: ReconnectPolicy,
    /// How often a connected session's contacts/chats state is snapshotted.
    pub snapshot_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            policy: ReconnectPolicy::default(),
            snapshot_interval: Duration::from_secs(300),
        }
    }
}

/// What the event loop should do after a transition's effects are applied.
enum Flow {
    Continue,
    Reconnect { delay: Duration },
    ReconnectNow,
    Stop,
}

pub struct ConnectionSupervisor {
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<WebhookDispatcher>,
    factory: Arc<dyn ConnectionFactory>,
    store: Arc<dyn SessionStore>,
    snapshots: Option<Arc<dyn SnapshotSink>>,
    config: SupervisorConfig,
    /// One cancellation token per running event loop.
    loops: DashMap<String, CancellationToken>,
    shutdown: CancellationToken,
}

impl ConnectionSupervisor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        dispatcher: Arc<WebhookDispatcher>,
        factory: Arc<dyn ConnectionFactory>,
        store: Arc<dyn SessionStore>,
        snapshots: Option<Arc<dyn SnapshotSink>>,
        config: SupervisorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            dispatcher,
            factory,
            store,
            snapshots,
            config,
            loops: DashMap::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Start (or restart) the session's connection loop.
    ///
    /// An explicit connect resets the reconnect counter: the caller is
    /// asking for a fresh ladder, not a continuation of an old one.
    pub async fn connect(self: &Arc<Self>, session_id: &str) -> Result<(), SessionError> {
        let view = self.registry.get(session_id)?;
        if view.state.is_terminal() {
            return Err(SessionError::Banned(session_id.to_string()));
        }

        if let Some((_, previous)) = self.loops.remove(session_id) {
            previous.cancel();
        }
        let cancel = self.shutdown.child_token();
        self.loops.insert(session_id.to_string(), cancel.clone());

        let t = transition(
            view.state,
            view.reconnect_attempts,
            ConnEvent::ConnectRequested,
            &self.config.policy,
        );
        self.apply(session_id, t).await;
        self.registry.set_attempts(session_id, 0);

        info!(session_id, "connection loop starting");
        let supervisor = Arc::clone(self);
        let id = session_id.to_string();
        tokio::spawn(supervisor.run_session(id, cancel));
        Ok(())
    }

    /// Stop the session's loop and tear down its connection. The session
    /// stays registered and can be reconnected later.
    pub async fn disconnect(&self, session_id: &str) -> Result<(), SessionError> {
        self.registry.get(session_id)?;
        if let Some((_, cancel)) = self.loops.remove(session_id) {
            cancel.cancel();
        }
        if let Some(conn) = self.registry.take_connection(session_id) {
            if let Err(e) = conn.disconnect().await {
                warn!(session_id, error = %e, "disconnect failed");
            }
        }
        self.registry.set_state(session_id, SessionState::Disconnected);
        info!(session_id, "session disconnected");
        Ok(())
    }

    /// Remove the session entirely: stop the loop, tear down the
    /// connection, drop its webhook tasks, and purge stored credentials.
    pub async fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        if let Some((_, cancel)) = self.loops.remove(session_id) {
            cancel.cancel();
        }
        let record = self.registry.remove(session_id)?;
        if let Some(conn) = record.connection {
            if let Err(e) = conn.disconnect().await {
                warn!(session_id, error = %e, "disconnect during delete failed");
            }
        }
        let cleared = self.dispatcher.clear_session(session_id);
        if let Err(e) = self.store.delete(session_id).await {
            warn!(session_id, error = %e, "credential purge failed");
        }
        info!(session_id, cleared_webhook_tasks = cleared, "session deleted");
        Ok(())
    }

    /// Ask the live connection for a pairing code instead of a QR scan.
    /// Only meaningful while a handshake is in progress.
    pub async fn request_pairing_code(
        &self,
        session_id: &str,
        phone: &str,
    ) -> Result<String, SessionError> {
        let conn = self.registry.connection(session_id)?;
        let code = conn
            .request_pairing_code(phone)
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        let view = self.registry.get(session_id)?;
        let t = transition(
            view.state,
            view.reconnect_attempts,
            ConnEvent::PairingIssued { code: code.clone() },
            &self.config.policy,
        );
        self.apply(session_id, t).await;
        Ok(code)
    }

    /// Cancel every session loop. Connections are torn down by the loops
    /// as they observe the cancellation.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn run_session(self: Arc<Self>, session_id: String, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            self.registry.set_state(&session_id, SessionState::Connecting);

            let flow = match self.factory.open(&session_id).await {
                Ok(handle) => {
                    if let Some(old) = self.registry.attach_connection(&session_id, handle.conn.clone())
                    {
                        if let Err(e) = old.disconnect().await {
                            warn!(session_id = %session_id, error = %e, "stale connection teardown failed");
                        }
                    }
                    self.consume_events(&session_id, handle.conn, handle.events, &cancel)
                        .await
                },
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "connection open failed");
                    let flow = self
                        .close_transition(&session_id, DisconnectReason::ConnectionLost)
                        .await;
                    self.registry.record_error(&session_id, &e.to_string());
                    flow
                },
            };

            match flow {
                Flow::Continue | Flow::ReconnectNow => {},
                Flow::Stop => return,
                Flow::Reconnect { delay } => {
                    debug!(
                        session_id = %session_id,
                        delay_ms = delay.as_millis() as u64,
                        "reconnect scheduled"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {},
                    }
                },
            }
        }
    }

    /// Consume one connection's event stream until it closes or the loop is
    /// cancelled. Returns how the outer loop should proceed.
    async fn consume_events(
        &self,
        session_id: &str,
        conn: Arc<dyn Connection>,
        mut events: mpsc::Receiver<ClientEvent>,
        cancel: &CancellationToken,
    ) -> Flow {
        let mut snapshot_cancel: Option<CancellationToken> = None;

        let flow = loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break Flow::Stop,
                event = events.recv() => event,
            };

            let Some(event) = event else {
                // Stream ended without a close event: treat as a drop.
                break self
                    .close_transition(session_id, DisconnectReason::ConnectionLost)
                    .await;
            };

            match event {
                ClientEvent::Qr { data } => {
                    let flow = self
                        .apply_event(session_id, ConnEvent::QrIssued { qr: data })
                        .await;
                    if !matches!(flow, Flow::Continue) {
                        break flow;
                    }
                },
                ClientEvent::Opened { identity } => {
                    let flow = self
                        .apply_event(session_id, ConnEvent::Opened { identity })
                        .await;
                    if !matches!(flow, Flow::Continue) {
                        break flow;
                    }
                    if snapshot_cancel.is_none() {
                        let token = cancel.child_token();
                        self.spawn_snapshots(session_id, Arc::clone(&conn), token.clone());
                        snapshot_cancel = Some(token);
                    }
                },
                ClientEvent::Closed { reason } => {
                    break self.close_transition(session_id, reason).await;
                },
                ClientEvent::Message(message) => {
                    self.handle_inbound(session_id, &conn, message, cancel);
                },
            }
        };

        if let Some(token) = snapshot_cancel {
            token.cancel();
        }
        flow
    }

    async fn apply_event(&self, session_id: &str, event: ConnEvent) -> Flow {
        let Ok(view) = self.registry.get(session_id) else {
            // Session deleted out from under the loop.
            return Flow::Stop;
        };
        let t = transition(view.state, view.reconnect_attempts, event, &self.config.policy);
        self.apply(session_id, t).await
    }

    async fn close_transition(&self, session_id: &str, reason: DisconnectReason) -> Flow {
        self.apply_event(session_id, ConnEvent::Closed { reason }).await
    }

    /// Apply one transition: commit the new state, then each effect in
    /// order.
    async fn apply(&self, session_id: &str, t: Transition) -> Flow {
        self.registry.set_state(session_id, t.next);
        let mut flow = if t.next.is_terminal() {
            Flow::Stop
        } else {
            Flow::Continue
        };

        for effect in t.effects {
            match effect {
                Effect::Emit(event) => {
                    self.dispatcher.enqueue(session_id, event);
                },
                Effect::StoreQr { qr } => match Artifact::qr(&qr) {
                    Ok(artifact) => self.registry.record_artifact(session_id, artifact),
                    Err(e) => warn!(session_id, error = %e, "qr render failed"),
                },
                Effect::StorePairingCode { code } => {
                    self.registry
                        .record_artifact(session_id, Artifact::pairing_code(&code));
                },
                Effect::RecordIdentity { identity } => {
                    self.registry.record_identity(session_id, &identity);
                },
                Effect::RecordError { message } => {
                    self.registry.record_error(session_id, &message);
                },
                Effect::ResetAttempts => {
                    self.registry.set_attempts(session_id, 0);
                },
                Effect::ScheduleReconnect {
                    delay,
                    attempt_index,
                } => {
                    self.registry.set_attempts(session_id, attempt_index);
                    flow = Flow::Reconnect { delay };
                },
                Effect::ReconnectNow => {
                    flow = Flow::ReconnectNow;
                },
                Effect::TearDownConnection => {
                    if let Some(conn) = self.registry.take_connection(session_id) {
                        if let Err(e) = conn.disconnect().await {
                            warn!(session_id, error = %e, "connection teardown failed");
                        }
                    }
                },
                Effect::PurgeCredentials => {
                    self.registry.clear_artifact(session_id);
                    if let Err(e) = self.store.delete(session_id).await {
                        warn!(session_id, error = %e, "credential purge failed");
                    }
                },
            }
        }
        flow
    }

    /// Inbound message handling: notify the webhook engine and, when the
    /// session opts in, auto-mark the message as read after its delay.
    fn handle_inbound(
        &self,
        session_id: &str,
        conn: &Arc<dyn Connection>,
        message: waplex_client::IncomingMessage,
        cancel: &CancellationToken,
    ) {
        let payload = serde_json::to_value(&message).unwrap_or(Value::Null);
        self.dispatcher
            .enqueue(session_id, WebhookEvent::MessageReceived { message: payload });

        let Ok(view) = self.registry.get(session_id) else {
            return;
        };
        if !view.config.auto_read {
            return;
        }

        let delay = Duration::from_millis(view.config.read_message_delay_ms);
        let conn = Arc::clone(conn);
        let cancel = cancel.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {},
            }
            if let Err(e) = conn
                .mark_read(&message.chat_id, std::slice::from_ref(&message.message_id))
                .await
            {
                warn!(session_id = %session_id, error = %e, "auto-read failed");
            }
        });
    }

    fn spawn_snapshots(
        &self,
        session_id: &str,
        conn: Arc<dyn Connection>,
        cancel: CancellationToken,
    ) {
        let Some(sink) = self.snapshots.clone() else {
            return;
        };
        let interval = self.config.snapshot_interval;
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            // The first tick fires immediately; the connection has nothing
            // worth snapshotting yet.
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {},
                }
                match conn.export_state().await {
                    Ok(snapshot) => {
                        if let Err(e) = sink.persist(&session_id, snapshot).await {
                            warn!(session_id = %session_id, error = %e, "snapshot persist failed");
                        }
                    },
                    Err(e) => warn!(session_id = %session_id, error = %e, "state export failed"),
                }
            }
        });
    }
}
