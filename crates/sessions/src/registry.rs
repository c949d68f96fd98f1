//! The authoritative session id -> record map.

use std::{sync::Arc, time::Duration};

use {
    chrono::{DateTime, Utc},
    dashmap::{DashMap, mapref::entry::Entry},
    serde::Serialize,
    url::Url,
    uuid::Uuid,
    waplex_client::Connection,
    waplex_webhooks::{Endpoint, EndpointLookup, EndpointSource},
};

use crate::{
    artifact::Artifact,
    config::{SessionConfig, SessionConfigPatch},
    error::SessionError,
    state::SessionState,
};

/// One session's record. The connection handle lives here but is owned by
/// the supervisor: only supervisor code attaches or takes it.
pub struct SessionRecord {
    pub id: String,
    pub config: SessionConfig,
    pub state: SessionState,
    pub reconnect_attempts: u32,
    pub identity: Option<String>,
    pub last_artifact: Option<Artifact>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub(crate) connection: Option<Arc<dyn Connection>>,
}

/// Read-only snapshot of a record, without the connection handle.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub id: String,
    pub config: SessionConfig,
    pub state: SessionState,
    pub reconnect_attempts: u32,
    pub identity: Option<String>,
    pub last_artifact: Option<Artifact>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Compact listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub state: SessionState,
    pub identity: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Concurrency-safe session map. Mutating one session never blocks reads
/// of another; the map is sharded, not a single lock.
pub struct SessionRegistry {
    sessions: DashMap<String, SessionRecord>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
        })
    }

    /// Create a session, generating an id when none is supplied.
    pub fn create(
        &self,
        id: Option<String>,
        config: SessionConfig,
    ) -> Result<String, SessionError> {
        let id = match id {
            Some(id) => {
                if id.trim().is_empty() || id.trim() != id {
                    return Err(SessionError::Validation(format!("invalid session id {id:?}")));
                }
                id
            },
            None => Uuid::new_v4().to_string(),
        };
        validate_webhook_url(config.webhook_url())?;

        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => Err(SessionError::Duplicate(id)),
            Entry::Vacant(slot) => {
                slot.insert(SessionRecord {
                    id: id.clone(),
                    config,
                    state: SessionState::Uninitialized,
                    reconnect_attempts: 0,
                    identity: None,
                    last_artifact: None,
                    last_error: None,
                    created_at: Utc::now(),
                    connection: None,
                });
                Ok(id)
            },
        }
    }

    pub fn get(&self, id: &str) -> Result<SessionView, SessionError> {
        let record = self
            .sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok(SessionView {
            id: record.id.clone(),
            config: record.config.clone(),
            state: record.state,
            reconnect_attempts: record.reconnect_attempts,
            identity: record.identity.clone(),
            last_artifact: record.last_artifact.clone(),
            last_error: record.last_error.clone(),
            created_at: record.created_at,
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Merge a partial config update. Returns the merged config.
    pub fn update_config(
        &self,
        id: &str,
        patch: SessionConfigPatch,
    ) -> Result<SessionConfig, SessionError> {
        if let Some(url) = patch.webhook_url.as_deref().filter(|u| !u.is_empty()) {
            validate_webhook_url(Some(url))?;
        }
        let mut record = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        record.config.apply(patch);
        Ok(record.config.clone())
    }

    pub fn list_all(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|r| SessionSummary {
                id: r.id.clone(),
                state: r.state,
                identity: r.identity.clone(),
                created_at: r.created_at,
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Borrow the live connection handle for the duration of one call.
    pub fn connection(&self, id: &str) -> Result<Arc<dyn Connection>, SessionError> {
        let record = self
            .sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        record
            .connection
            .clone()
            .ok_or_else(|| SessionError::NotConnected(id.to_string()))
    }

    pub(crate) fn remove(&self, id: &str) -> Result<SessionRecord, SessionError> {
        self.sessions
            .remove(id)
            .map(|(_, record)| record)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    pub(crate) fn set_state(&self, id: &str, state: SessionState) {
        if let Some(mut record) = self.sessions.get_mut(id) {
            record.state = state;
        }
    }

    pub(crate) fn set_attempts(&self, id: &str, attempts: u32) {
        if let Some(mut record) = self.sessions.get_mut(id) {
            record.reconnect_attempts = attempts;
        }
    }

    pub(crate) fn record_identity(&self, id: &str, identity: &str) {
        if let Some(mut record) = self.sessions.get_mut(id) {
            record.identity = Some(identity.to_string());
        }
    }

    pub(crate) fn record_error(&self, id: &str, message: &str) {
        if let Some(mut record) = self.sessions.get_mut(id) {
            record.last_error = Some(message.to_string());
        }
    }

    pub(crate) fn record_artifact(&self, id: &str, artifact: Artifact) {
        if let Some(mut record) = self.sessions.get_mut(id) {
            record.last_artifact = Some(artifact);
        }
    }

    pub(crate) fn clear_artifact(&self, id: &str) {
        if let Some(mut record) = self.sessions.get_mut(id) {
            record.last_artifact = None;
        }
    }

    /// Attach a freshly opened handle, returning any previous one so the
    /// caller can tear it down. At most one live handle exists per session.
    pub(crate) fn attach_connection(
        &self,
        id: &str,
        conn: Arc<dyn Connection>,
    ) -> Option<Arc<dyn Connection>> {
        self.sessions
            .get_mut(id)
            .and_then(|mut record| record.connection.replace(conn))
    }

    pub(crate) fn take_connection(&self, id: &str) -> Option<Arc<dyn Connection>> {
        self.sessions
            .get_mut(id)
            .and_then(|mut record| record.connection.take())
    }
}

fn validate_webhook_url(url: Option<&str>) -> Result<(), SessionError> {
    if let Some(url) = url {
        Url::parse(url)
            .map_err(|e| SessionError::Validation(format!("webhook url {url:?}: {e}")))?;
    }
    Ok(())
}

impl EndpointSource for SessionRegistry {
    fn lookup(&self, session_id: &str) -> EndpointLookup {
        let Some(record) = self.sessions.get(session_id) else {
            return EndpointLookup::UnknownSession;
        };
        match record.config.webhook_url() {
            Some(url) => EndpointLookup::Configured(Endpoint {
                url: url.to_string(),
                delay: Duration::from_millis(record.config.webhook_delay_ms),
            }),
            None => EndpointLookup::NotConfigured,
        }
    }
}
