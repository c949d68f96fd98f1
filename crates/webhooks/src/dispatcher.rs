//! Scheduling and HTTP delivery of webhook tasks.

use std::{sync::Arc, time::Duration};

use {
    chrono::Utc,
    dashmap::DashMap,
    serde_json::{Value, json},
    tokio::time::{Instant, MissedTickBehavior},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
    url::Url,
    uuid::Uuid,
};

use crate::{
    error::WebhookError,
    event::{WebhookBody, WebhookEvent},
    stats::DeliveryStats,
    task::{AttemptOutcome, DeliveryStatus, DeliveryTask},
};

/// Where a session's notifications go.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    /// Initial hold before the first attempt, to coalesce bursts.
    pub delay: Duration,
}

/// Result of resolving a session id to its webhook endpoint.
#[derive(Debug, Clone)]
pub enum EndpointLookup {
    UnknownSession,
    /// The session exists but webhooks are not configured (opt-in).
    NotConfigured,
    Configured(Endpoint),
}

/// Resolves session ids to endpoints. Implemented by the session registry.
pub trait EndpointSource: Send + Sync {
    fn lookup(&self, session_id: &str) -> EndpointLookup;
}

/// Tunables for the delivery engine.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_retries: u32,
    pub base_retry_delay: Duration,
    pub request_timeout: Duration,
    pub scan_interval: Duration,
    /// Terminal tasks older than this are pruned.
    pub retention: Duration,
    pub max_batch: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_retry_delay: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(10),
            scan_interval: Duration::from_millis(250),
            retention: Duration::from_secs(3600),
            max_batch: 50,
        }
    }
}

/// Outcome of a one-off test delivery.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub success: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

/// Per-event result of a batch submission.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub event: String,
    pub accepted: bool,
    pub task_id: Option<Uuid>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub accepted: usize,
    pub entries: Vec<BatchEntry>,
}

/// The webhook delivery engine.
///
/// Owns every task record; no other component mutates them. `enqueue` is
/// synchronous and infallible for internal events; the background scanner
/// performs the actual HTTP calls.
pub struct WebhookDispatcher {
    tasks: DashMap<Uuid, DeliveryTask>,
    /// Sessions with an attempt batch currently in flight, so one slow
    /// consumer never reorders its own events or stalls other sessions.
    busy: DashMap<String, ()>,
    client: reqwest::Client,
    endpoints: Arc<dyn EndpointSource>,
    config: DispatcherConfig,
    cancel: CancellationToken,
}

impl WebhookDispatcher {
    pub fn new(endpoints: Arc<dyn EndpointSource>, config: DispatcherConfig) -> Arc<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Arc::new(Self {
            tasks: DashMap::new(),
            busy: DashMap::new(),
            client,
            endpoints,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Spawn the background scanner that attempts due tasks.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(dispatcher.config.scan_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = dispatcher.cancel.cancelled() => break,
                    _ = tick.tick() => dispatcher.scan_due(),
                }
            }
        })
    }

    /// Stop the background scanner.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Queue an internal event for delivery. Never blocks, never fails:
    /// sessions without a configured URL are silently skipped.
    pub fn enqueue(&self, session_id: &str, event: WebhookEvent) -> Option<Uuid> {
        match self.endpoints.lookup(session_id) {
            EndpointLookup::UnknownSession => {
                debug!(session_id, event = event.name(), "dropping event for unknown session");
                None
            },
            EndpointLookup::NotConfigured => {
                debug!(session_id, event = event.name(), "no webhook url configured, skipping");
                None
            },
            EndpointLookup::Configured(endpoint) => {
                Some(self.push_task(session_id, &endpoint, &event))
            },
        }
    }

    /// Queue a caller-supplied event. Configuration problems surface here,
    /// synchronously; delivery failures still only show up in statistics.
    pub fn send_custom(
        &self,
        session_id: &str,
        event_name: &str,
        data: Value,
    ) -> Result<Uuid, WebhookError> {
        if event_name.trim().is_empty() {
            return Err(WebhookError::InvalidEventName(event_name.to_string()));
        }
        let endpoint = self.resolve(session_id, None)?;
        let event = WebhookEvent::Custom {
            name: event_name.to_string(),
            data,
        };
        Ok(self.push_task(session_id, &endpoint, &event))
    }

    /// Queue up to `max_batch` caller-supplied events. Each event is
    /// validated independently; the call succeeds if at least one was
    /// accepted.
    pub fn send_batch(
        &self,
        session_id: &str,
        events: Vec<(String, Value)>,
    ) -> Result<BatchReport, WebhookError> {
        if events.is_empty() {
            return Err(WebhookError::EmptyBatch);
        }
        if events.len() > self.config.max_batch {
            return Err(WebhookError::BatchTooLarge {
                len: events.len(),
                max: self.config.max_batch,
            });
        }

        let mut entries = Vec::with_capacity(events.len());
        let mut accepted = 0;
        for (name, data) in events {
            match self.send_custom(session_id, &name, data) {
                Ok(task_id) => {
                    accepted += 1;
                    entries.push(BatchEntry {
                        event: name,
                        accepted: true,
                        task_id: Some(task_id),
                        error: None,
                    });
                },
                Err(e) => entries.push(BatchEntry {
                    event: name,
                    accepted: false,
                    task_id: None,
                    error: Some(e.to_string()),
                }),
            }
        }

        if accepted == 0 {
            return Err(WebhookError::BatchRejected);
        }
        Ok(BatchReport { accepted, entries })
    }

    /// Perform a single test delivery right now, bypassing the hold and the
    /// retry machinery, and report the outcome directly.
    pub async fn test(
        &self,
        session_id: &str,
        override_url: Option<&str>,
    ) -> Result<TestOutcome, WebhookError> {
        let endpoint = self.resolve(session_id, override_url)?;
        let event = WebhookEvent::Custom {
            name: "webhook_test".to_string(),
            data: json!({ "test": true }),
        };
        let body = WebhookBody::new(session_id, &event, Utc::now());
        let outcome = self.perform(reqwest::Method::POST, &endpoint.url, &body).await;
        Ok(TestOutcome {
            success: outcome.is_success(),
            status_code: outcome.status_code,
            response_time_ms: outcome.response_time_ms,
            error: outcome.transport_error,
        })
    }

    /// Aggregate delivery statistics for one session.
    pub fn stats(&self, session_id: &str) -> DeliveryStats {
        let tasks: Vec<DeliveryTask> = self
            .tasks
            .iter()
            .filter(|t| t.session_id == session_id)
            .map(|t| t.value().clone())
            .collect();
        DeliveryStats::from_tasks(tasks.iter())
    }

    /// Cancel every non-terminal task for the session. Returns the number
    /// of tasks cleared.
    pub fn clear_pending(&self, session_id: &str) -> usize {
        let ids: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|t| t.session_id == session_id && !t.status.is_terminal())
            .map(|t| t.id)
            .collect();
        for id in &ids {
            self.tasks.remove(id);
        }
        ids.len()
    }

    /// Drop every task for the session, terminal or not. Used when the
    /// session itself is deleted.
    pub fn clear_session(&self, session_id: &str) -> usize {
        let ids: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|t| t.session_id == session_id)
            .map(|t| t.id)
            .collect();
        for id in &ids {
            self.tasks.remove(id);
        }
        ids.len()
    }

    /// Status snapshot of a task, mainly for diagnostics and tests.
    pub fn task_status(&self, task_id: Uuid) -> Option<DeliveryStatus> {
        self.tasks.get(&task_id).map(|t| t.status)
    }

    fn resolve(
        &self,
        session_id: &str,
        override_url: Option<&str>,
    ) -> Result<Endpoint, WebhookError> {
        if let Some(url) = override_url {
            Url::parse(url).map_err(|e| WebhookError::InvalidUrl(format!("{url}: {e}")))?;
            return Ok(Endpoint {
                url: url.to_string(),
                delay: Duration::ZERO,
            });
        }
        match self.endpoints.lookup(session_id) {
            EndpointLookup::UnknownSession => {
                Err(WebhookError::SessionNotFound(session_id.to_string()))
            },
            EndpointLookup::NotConfigured => {
                Err(WebhookError::NotConfigured(session_id.to_string()))
            },
            EndpointLookup::Configured(endpoint) => {
                Url::parse(&endpoint.url)
                    .map_err(|e| WebhookError::InvalidUrl(format!("{}: {e}", endpoint.url)))?;
                Ok(endpoint)
            },
        }
    }

    fn push_task(&self, session_id: &str, endpoint: &Endpoint, event: &WebhookEvent) -> Uuid {
        let body = WebhookBody::new(session_id, event, Utc::now());
        let task = DeliveryTask::new(
            session_id,
            endpoint.url.clone(),
            body,
            self.config.max_retries,
            endpoint.delay,
        );
        let id = task.id;
        debug!(session_id, event = event.name(), task_id = %id, "webhook task queued");
        self.tasks.insert(id, task);
        id
    }

    /// One scheduler pass: prune old terminal tasks, then kick off attempts
    /// for every due task, sequentially within a session and concurrently
    /// across sessions.
    fn scan_due(self: &Arc<Self>) {
        self.prune();

        let now = Utc::now();
        let mut due: std::collections::HashMap<String, Vec<(chrono::DateTime<Utc>, Uuid)>> =
            std::collections::HashMap::new();
        for task in self.tasks.iter() {
            if task.in_flight || !task.is_due(now) || self.busy.contains_key(&task.session_id) {
                continue;
            }
            due.entry(task.session_id.clone())
                .or_default()
                .push((task.created_at, task.id));
        }

        for (session_id, mut ids) in due {
            if self.busy.insert(session_id.clone(), ()).is_some() {
                continue;
            }
            ids.sort();
            for (_, id) in &ids {
                if let Some(mut task) = self.tasks.get_mut(id) {
                    task.in_flight = true;
                }
            }
            let dispatcher = Arc::clone(self);
            tokio::spawn(async move {
                for (_, id) in ids {
                    dispatcher.attempt(id).await;
                }
                dispatcher.busy.remove(&session_id);
            });
        }
    }

    async fn attempt(&self, task_id: Uuid) {
        // Task may have been cleared between scheduling and the attempt.
        let Some((method, url, body)) = self
            .tasks
            .get(&task_id)
            .map(|t| (t.method.clone(), t.url.clone(), t.body.clone()))
        else {
            return;
        };

        let outcome = self.perform(method, &url, &body).await;

        let Some(mut task) = self.tasks.get_mut(&task_id) else {
            return;
        };
        task.record_attempt(outcome, self.config.base_retry_delay);
        task.in_flight = false;
        match task.status {
            DeliveryStatus::Success => {
                debug!(
                    session_id = %task.session_id,
                    event = %task.body.event,
                    status = ?task.status_code,
                    "webhook delivered"
                );
            },
            DeliveryStatus::Retrying => {
                warn!(
                    session_id = %task.session_id,
                    event = %task.body.event,
                    retry_count = task.retry_count,
                    error = ?task.last_error,
                    "webhook delivery failed, retry scheduled"
                );
            },
            DeliveryStatus::Failed => {
                warn!(
                    session_id = %task.session_id,
                    event = %task.body.event,
                    retry_count = task.retry_count,
                    error = ?task.last_error,
                    "webhook delivery failed terminally"
                );
            },
            DeliveryStatus::Pending => {},
        }
    }

    async fn perform(
        &self,
        method: reqwest::Method,
        url: &str,
        body: &WebhookBody,
    ) -> AttemptOutcome {
        let started = Instant::now();
        let result = self.client.request(method, url).json(body).send().await;
        let response_time_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(response) => AttemptOutcome {
                status_code: Some(response.status().as_u16()),
                response_time_ms,
                transport_error: None,
            },
            Err(e) => AttemptOutcome {
                status_code: None,
                response_time_ms,
                transport_error: Some(e.to_string()),
            },
        }
    }

    fn prune(&self) {
        let cutoff =
            Utc::now() - chrono::Duration::from_std(self.config.retention).unwrap_or_default();
        let stale: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|t| {
                t.status.is_terminal() && t.completed_at.is_some_and(|done| done < cutoff)
            })
            .map(|t| t.id)
            .collect();
        for id in stale {
            self.tasks.remove(&id);
        }
    }
}
