//! Connection registry
//!
//! Maps the identity of each live WebSocket connection to its session. The
//! map is shared by every connection task; each session sits behind its own
//! async mutex so frames of one connection are applied one at a time.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::Session;

/// Identity of one accepted WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub type SharedSession = Arc<Mutex<Session>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Connection {0} already has a session")]
    AlreadyRegistered(ConnectionId),

    #[error("No session registered for connection {0}")]
    NotFound(ConnectionId),
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, SharedSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` under its connection id.
    pub fn create(&self, session: Session) -> Result<SharedSession, RegistryError> {
        let connection_id = session.connection_id();
        match self.sessions.entry(connection_id) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyRegistered(connection_id)),
            Entry::Vacant(slot) => {
                let shared = Arc::new(Mutex::new(session));
                slot.insert(shared.clone());
                Ok(shared)
            }
        }
    }

    pub fn lookup(&self, connection_id: ConnectionId) -> Result<SharedSession, RegistryError> {
        self.sessions
            .get(&connection_id)
            .map(|entry| entry.value().clone())
            .ok_or(RegistryError::NotFound(connection_id))
    }

    /// Remove the session for `connection_id`.
    ///
    /// Exactly one caller receives the session; everyone else gets `NotFound`.
    pub fn remove(&self, connection_id: ConnectionId) -> Result<SharedSession, RegistryError> {
        self.sessions
            .remove(&connection_id)
            .map(|(_, session)| session)
            .ok_or(RegistryError::NotFound(connection_id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
