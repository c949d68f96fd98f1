//! Collaborator stores: credential blobs and periodic state snapshots.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use {anyhow::Result, async_trait::async_trait};

/// Persistent store for session credential material.
///
/// The blob is opaque to waplex; the external client library owns its
/// format. Deleting a session with purge removes the blob so the id starts
/// from a clean handshake next time.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<Vec<u8>>>;
    async fn save(&self, session_id: &str, blob: &[u8]) -> Result<()>;
    async fn delete(&self, session_id: &str) -> Result<()>;
}

/// Sink for periodic session-scoped state snapshots (contacts/chats).
///
/// A side collaborator: the supervisor pushes snapshots while a session is
/// connected, nothing in the core contract reads them back.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn persist(&self, session_id: &str, snapshot: serde_json::Value) -> Result<()>;
}

/// In-memory [`SessionStore`], used in tests and single-process setups.
#[derive(Default)]
pub struct MemorySessionStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| anyhow::anyhow!("credential store poisoned"))?;
        Ok(blobs.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, blob: &[u8]) -> Result<()> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| anyhow::anyhow!("credential store poisoned"))?;
        blobs.insert(session_id.to_string(), blob.to_vec());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| anyhow::anyhow!("credential store poisoned"))?;
        blobs.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemorySessionStore::new();
        assert!(store.load("s1").await.unwrap().is_none());

        store.save("s1", b"creds").await.unwrap();
        assert_eq!(store.load("s1").await.unwrap(), Some(b"creds".to_vec()));

        store.delete("s1").await.unwrap();
        assert!(store.load("s1").await.unwrap().is_none());
    }
}
