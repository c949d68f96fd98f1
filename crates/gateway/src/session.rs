//! Live session service wiring the registry, supervisor and pacer.

use std::sync::Arc;

use {
    async_trait::async_trait,
    serde_json::{Value, json},
    tracing::{error, info},
    waplex_client::OutboundContent,
    waplex_outbound::{MessagePacer, SendOptions, SendReport},
    waplex_sessions::{
        ConnectionSupervisor, SessionConfig, SessionConfigPatch, SessionRegistry, SessionView,
    },
};

use crate::services::{ServiceResult, SessionService, require_str};

pub struct LiveSessionService {
    registry: Arc<SessionRegistry>,
    supervisor: Arc<ConnectionSupervisor>,
    pacer: Arc<MessagePacer>,
}

impl LiveSessionService {
    pub fn new(
        registry: Arc<SessionRegistry>,
        supervisor: Arc<ConnectionSupervisor>,
        pacer: Arc<MessagePacer>,
    ) -> Self {
        Self {
            registry,
            supervisor,
            pacer,
        }
    }
}

fn view_json(view: &SessionView) -> Value {
    let mut entry = json!({
        "sessionId": &view.id,
        "state": view.state.as_str(),
        "config": &view.config,
        "reconnectAttempts": view.reconnect_attempts,
        "createdAt": view.created_at,
    });
    if let Some(identity) = &view.identity {
        entry["identity"] = json!(identity);
    }
    if let Some(last_error) = &view.last_error {
        entry["lastError"] = json!(last_error);
    }
    entry
}

fn recipients_from(params: &Value) -> Result<Vec<String>, String> {
    match params.get("to") {
        Some(Value::String(to)) => Ok(vec![to.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| "'to' entries must be strings".to_string())
            })
            .collect(),
        _ => Err("missing 'to'".to_string()),
    }
}

fn report_json(report: &SendReport) -> Value {
    let results: Vec<Value> = report
        .results
        .iter()
        .map(|r| {
            let mut entry = json!({
                "recipient": &r.recipient,
                "success": r.success,
            });
            if let Some(id) = &r.message_id {
                entry["messageId"] = json!(id);
            }
            if let Some(err) = &r.error {
                entry["error"] = json!(err);
            }
            if let Some(sent_at) = &r.sent_at {
                entry["sentAt"] = json!(sent_at);
            }
            entry
        })
        .collect();
    json!({ "success": report.success, "results": results })
}

#[async_trait]
impl SessionService for LiveSessionService {
    async fn create(&self, params: Value) -> ServiceResult {
        let id = params
            .get("sessionId")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let config: SessionConfig = match params.get("config") {
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| format!("invalid config: {e}"))?,
            None => SessionConfig::default(),
        };

        let id = self.registry.create(id, config).map_err(|e| e.to_string())?;
        info!(session_id = %id, "session created");
        Ok(json!({ "sessionId": id }))
    }

    async fn connect(&self, params: Value) -> ServiceResult {
        let id = require_str(&params, "sessionId")?;
        self.supervisor.connect(id).await.map_err(|e| {
            error!(session_id = id, error = %e, "connect failed");
            e.to_string()
        })?;
        Ok(json!({ "connecting": id }))
    }

    async fn status(&self, params: Value) -> ServiceResult {
        let id = require_str(&params, "sessionId")?;
        let view = self.registry.get(id).map_err(|e| e.to_string())?;
        Ok(view_json(&view))
    }

    async fn list(&self) -> ServiceResult {
        let sessions = self.registry.list_all();
        Ok(json!({ "sessions": sessions }))
    }

    async fn artifact(&self, params: Value) -> ServiceResult {
        let id = require_str(&params, "sessionId")?;
        let view = self.registry.get(id).map_err(|e| e.to_string())?;
        match view.last_artifact {
            Some(artifact) => Ok(artifact.to_json()),
            None => Err(format!("session '{id}' has no handshake artifact")),
        }
    }

    async fn pairing_code(&self, params: Value) -> ServiceResult {
        let id = require_str(&params, "sessionId")?;
        let phone = require_str(&params, "phone")?;
        let code = self
            .supervisor
            .request_pairing_code(id, phone)
            .await
            .map_err(|e| {
                error!(session_id = id, error = %e, "pairing code request failed");
                e.to_string()
            })?;
        Ok(json!({ "pairingCode": code }))
    }

    async fn update_config(&self, params: Value) -> ServiceResult {
        let id = require_str(&params, "sessionId")?;
        let patch: SessionConfigPatch = match params.get("config") {
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| format!("invalid config: {e}"))?,
            None => return Err("missing 'config'".to_string()),
        };
        let merged = self
            .registry
            .update_config(id, patch)
            .map_err(|e| e.to_string())?;
        info!(session_id = id, "session config updated");
        Ok(json!({ "sessionId": id, "config": merged }))
    }

    async fn disconnect(&self, params: Value) -> ServiceResult {
        let id = require_str(&params, "sessionId")?;
        self.supervisor.disconnect(id).await.map_err(|e| e.to_string())?;
        Ok(json!({ "disconnected": id }))
    }

    async fn delete(&self, params: Value) -> ServiceResult {
        let id = require_str(&params, "sessionId")?;
        self.supervisor.delete(id).await.map_err(|e| e.to_string())?;
        Ok(json!({ "deleted": id }))
    }

    async fn send(&self, params: Value) -> ServiceResult {
        let id = require_str(&params, "sessionId")?;
        let recipients = recipients_from(&params)?;
        let content: OutboundContent = params
            .get("content")
            .cloned()
            .ok_or_else(|| "missing 'content'".to_string())
            .and_then(|raw| {
                serde_json::from_value(raw).map_err(|e| format!("invalid content: {e}"))
            })?;
        let options: SendOptions = match params.get("options") {
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| format!("invalid options: {e}"))?,
            None => SendOptions::default(),
        };

        let report = self
            .pacer
            .send(id, &recipients, &content, &options)
            .await
            .map_err(|e| {
                error!(session_id = id, error = %e, "send rejected");
                e.to_string()
            })?;
        Ok(report_json(&report))
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use {
        async_trait::async_trait,
        tokio::sync::mpsc,
        waplex_client::{
            ClientEvent, Connection, ConnectionFactory, ConnectionHandle, MemorySessionStore,
            Presence,
        },
        waplex_sessions::{SessionState, SupervisorConfig},
        waplex_webhooks::{DispatcherConfig, EndpointSource, WebhookDispatcher},
    };

    use super::*;

    struct StubConnection {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Connection for StubConnection {
        async fn disconnect(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn send_content(
            &self,
            to: &str,
            _content: &OutboundContent,
        ) -> anyhow::Result<String> {
            self.sent.lock().unwrap().push(to.to_string());
            Ok("MSG-1".into())
        }

        async fn check_exists(&self, _to: &str) -> anyhow::Result<bool> {
            Ok(true)
        }

        async fn set_presence(&self, _to: &str, _presence: Presence) -> anyhow::Result<()> {
            Ok(())
        }

        async fn mark_read(&self, _chat_id: &str, _message_ids: &[String]) -> anyhow::Result<()> {
            Ok(())
        }

        async fn request_pairing_code(&self, _phone: &str) -> anyhow::Result<String> {
            Ok("WXYZ-9876".into())
        }

        async fn export_state(&self) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
    }

    struct StubFactory {
        held: Mutex<Vec<mpsc::Sender<ClientEvent>>>,
    }

    #[async_trait]
    impl ConnectionFactory for StubFactory {
        async fn open(&self, _session_id: &str) -> anyhow::Result<ConnectionHandle> {
            let (tx, rx) = mpsc::channel(4);
            tx.send(ClientEvent::Qr { data: "2@stub-qr".into() }).await.ok();
            tx.send(ClientEvent::Opened {
                identity: "me@s.whatsapp.net".into(),
            })
            .await
            .ok();
            self.held.lock().unwrap().push(tx);
            Ok(ConnectionHandle {
                conn: Arc::new(StubConnection {
                    sent: Mutex::new(Vec::new()),
                }),
                events: rx,
            })
        }
    }

    fn service() -> LiveSessionService {
        let registry = SessionRegistry::new();
        let dispatcher = WebhookDispatcher::new(
            registry.clone() as Arc<dyn EndpointSource>,
            DispatcherConfig::default(),
        );
        let supervisor = ConnectionSupervisor::new(
            registry.clone(),
            dispatcher.clone(),
            Arc::new(StubFactory {
                held: Mutex::new(Vec::new()),
            }),
            MemorySessionStore::new(),
            None,
            SupervisorConfig::default(),
        );
        let pacer = MessagePacer::new(registry.clone(), dispatcher);
        LiveSessionService::new(registry, supervisor, pacer)
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

    #[tokio::test]
    async fn create_status_and_list() {
        let svc = service();
        let created = svc
            .create(json!({ "sessionId": "s1", "config": { "countryCode": "55" } }))
            .await
            .unwrap();
        assert_eq!(created["sessionId"], "s1");

        // Duplicate ids are rejected with a caller-facing message.
        let err = svc.create(json!({ "sessionId": "s1" })).await.unwrap_err();
        assert!(err.contains("already exists"));

        let status = svc.status(json!({ "sessionId": "s1" })).await.unwrap();
        assert_eq!(status["state"], "uninitialized");
        assert_eq!(status["config"]["countryCode"], "55");

        let listed = svc.list().await.unwrap();
        assert_eq!(listed["sessions"].as_array().unwrap().len(), 1);

        assert!(svc.status(json!({})).await.unwrap_err().contains("sessionId"));
    }

    #[tokio::test]
    async fn update_config_merges_and_validates() {
        let svc = service();
        svc.create(json!({ "sessionId": "s1" })).await.unwrap();

        let updated = svc
            .update_config(json!({
                "sessionId": "s1",
                "config": { "messageDelayMs": 10 }
            }))
            .await
            .unwrap();
        assert_eq!(updated["config"]["messageDelayMs"], 10);

        let err = svc
            .update_config(json!({
                "sessionId": "s1",
                "config": { "webhookUrl": "not a url" }
            }))
            .await
            .unwrap_err();
        assert!(err.contains("webhook url"));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_then_send_flow() {
        let svc = service();
        svc.create(json!({
            "sessionId": "s1",
            "config": { "showTyping": false, "messageDelayMs": 10 }
        }))
        .await
        .unwrap();

        svc.connect(json!({ "sessionId": "s1" })).await.unwrap();
        wait_for(|| {
            svc.registry
                .get("s1")
                .is_ok_and(|v| v.state == SessionState::Connected)
        })
        .await;

        // The QR from the handshake survives as the artifact.
        let artifact = svc.artifact(json!({ "sessionId": "s1" })).await.unwrap();
        assert_eq!(artifact["kind"], "qr");
        assert_eq!(artifact["qr"], "2@stub-qr");

        let report = svc
            .send(json!({
                "sessionId": "s1",
                "to": "15551234567",
                "content": { "type": "text", "body": "hi" }
            }))
            .await
            .unwrap();
        assert_eq!(report["success"], true);
        assert_eq!(report["results"][0]["messageId"], "MSG-1");

        let deleted = svc.delete(json!({ "sessionId": "s1" })).await.unwrap();
        assert_eq!(deleted["deleted"], "s1");
        assert!(svc.status(json!({ "sessionId": "s1" })).await.is_err());
    }

    #[tokio::test]
    async fn artifact_and_send_report_missing_pieces() {
        let svc = service();
        svc.create(json!({ "sessionId": "s1" })).await.unwrap();

        let err = svc.artifact(json!({ "sessionId": "s1" })).await.unwrap_err();
        assert!(err.contains("no handshake artifact"));

        let err = svc
            .send(json!({ "sessionId": "s1", "to": "1" }))
            .await
            .unwrap_err();
        assert!(err.contains("content"));

        // Not connected yet: surfaced synchronously.
        let err = svc
            .send(json!({
                "sessionId": "s1",
                "to": "1",
                "content": { "type": "text", "body": "hi" }
            }))
            .await
            .unwrap_err();
        assert!(err.contains("not connected"));
    }
}
