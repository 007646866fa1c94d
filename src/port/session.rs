use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::{DashMap, Entry};
use uuid::Uuid;

use super::error::{SessionAlreadyActive, SessionNotFound};

#[derive(Clone, Hash, PartialEq, Eq)]
pub struct SessionId(Arc<Uuid>);

impl SessionId {
    pub fn generate() -> Self {
        Self(Arc::new(Uuid::new_v4()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct ConnectionSession {
    pub session_id: SessionId,
    pub peer: SocketAddr,
}

/// Accepted TCP connections of one server port, keyed by peer address.
#[derive(Debug, Default)]
pub struct ConnectionMap {
    sessions: DashMap<SocketAddr, ConnectionSession, ahash::RandomState>,
}

impl ConnectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, peer: SocketAddr) -> Result<SessionId, SessionAlreadyActive> {
        match self.sessions.entry(peer) {
            Entry::Occupied(_) => Err(SessionAlreadyActive { peer }),
            Entry::Vacant(slot) => {
                let session_id = SessionId::generate();
                slot.insert(ConnectionSession {
                    session_id: session_id.clone(),
                    peer,
                });
                Ok(session_id)
            }
        }
    }

    pub fn close(&self, peer: &SocketAddr) -> Result<ConnectionSession, SessionNotFound> {
        self.sessions
            .remove(peer)
            .map(|(_, session)| session)
            .ok_or(SessionNotFound { peer: *peer })
    }

    pub fn session_id(&self, peer: &SocketAddr) -> Option<SessionId> {
        self.sessions.get(peer).map(|entry| entry.session_id.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
