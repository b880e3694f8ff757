use crate::error::{Error, Result};
use crate::session::Session;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Storage abstraction for sessions, keyed by DID.
///
/// The backing store is opaque to this crate. Persistence after a refresh is
/// best-effort: a crash between refresh and persist only costs one extra
/// refresh next time.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Get the stored session for a DID
    async fn get_session(&self, did: &str) -> Result<Option<Session>>;

    /// Store or replace the session for its DID
    async fn put_session(&self, session: &Session) -> Result<()>;

    /// Delete the session for a DID
    async fn delete_session(&self, did: &str) -> Result<()>;
}

/// In-memory session store for tests and single-process deployments.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_session(&self, did: &str) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .map_err(|e| Error::StorageError(e.to_string()))?
            .get(did)
            .cloned())
    }

    async fn put_session(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .map_err(|e| Error::StorageError(e.to_string()))?
            .insert(session.did.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, did: &str) -> Result<()> {
        self.sessions
            .write()
            .map_err(|e| Error::StorageError(e.to_string()))?
            .remove(did);
        Ok(())
    }
}
