//! Live webhook service delegating to the delivery engine.

use std::sync::Arc;

use {
    async_trait::async_trait,
    serde_json::{Value, json},
    tracing::info,
    waplex_webhooks::WebhookDispatcher,
};

use crate::services::{ServiceResult, WebhookService, require_str};

pub struct LiveWebhookService {
    dispatcher: Arc<WebhookDispatcher>,
}

impl LiveWebhookService {
    pub fn new(dispatcher: Arc<WebhookDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl WebhookService for LiveWebhookService {
    async fn test(&self, params: Value) -> ServiceResult {
        let id = require_str(&params, "sessionId")?;
        let override_url = params.get("url").and_then(|v| v.as_str());
        let outcome = self
            .dispatcher
            .test(id, override_url)
            .await
            .map_err(|e| e.to_string())?;

        let mut entry = json!({
            "success": outcome.success,
            "responseTimeMs": outcome.response_time_ms,
        });
        if let Some(status) = outcome.status_code {
            entry["statusCode"] = json!(status);
        }
        if let Some(error) = outcome.error {
            entry["error"] = json!(error);
        }
        Ok(entry)
    }

    async fn stats(&self, params: Value) -> ServiceResult {
        let id = require_str(&params, "sessionId")?;
        let stats = self.dispatcher.stats(id);
        Ok(json!({
            "total": stats.total,
            "success": stats.success,
            "failed": stats.failed,
            "pending": stats.pending,
            "avgResponseTimeMs": stats.avg_response_time_ms,
            "successRate": stats.success_rate,
        }))
    }

    async fn clear_pending(&self, params: Value) -> ServiceResult {
        let id = require_str(&params, "sessionId")?;
        let cleared = self.dispatcher.clear_pending(id);
        info!(session_id = id, cleared, "pending webhook tasks cleared");
        Ok(json!({ "cleared": cleared }))
    }

    async fn send_custom(&self, params: Value) -> ServiceResult {
        let id = require_str(&params, "sessionId")?;
        let event = require_str(&params, "event")?;
        let data = params.get("data").cloned().unwrap_or(json!({}));
        let task_id = self
            .dispatcher
            .send_custom(id, event, data)
            .map_err(|e| e.to_string())?;
        Ok(json!({ "taskId": task_id }))
    }

    async fn send_batch(&self, params: Value) -> ServiceResult {
        let id = require_str(&params, "sessionId")?;
        let events = params
            .get("events")
            .and_then(|v| v.as_array())
            .ok_or_else(|| "missing 'events'".to_string())?;

        let mut batch = Vec::with_capacity(events.len());
        for entry in events {
            let name = entry
                .get("event")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let data = entry.get("data").cloned().unwrap_or(json!({}));
            batch.push((name, data));
        }

        let report = self
            .dispatcher
            .send_batch(id, batch)
            .map_err(|e| e.to_string())?;
        let entries: Vec<Value> = report
            .entries
            .iter()
            .map(|e| {
                let mut entry = json!({
                    "event": &e.event,
                    "accepted": e.accepted,
                });
                if let Some(task_id) = e.task_id {
                    entry["taskId"] = json!(task_id);
                }
                if let Some(error) = &e.error {
                    entry["error"] = json!(error);
                }
                entry
            })
            .collect();
        Ok(json!({ "accepted": report.accepted, "results": entries }))
    }
}
