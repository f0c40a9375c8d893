//! Per-connection session state.
//!
//! A connection has no session until CLIENT_READY succeeds. Until then
//! every other message is dropped.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

/// What a connection is attached to once CLIENT_READY succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub pad_id: String,
    pub read_only_pad_id: String,
    pub author: String,
    pub read_only: bool,
    /// Newest revision this session has been sent.
    pub revision: u64,
}

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, SessionInfo>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `conn`, replacing any earlier session it had.
    pub fn insert(&self, conn: Uuid, info: SessionInfo) -> Option<SessionInfo> {
        self.sessions.write().insert(conn, info)
    }

    pub fn get(&self, conn: &Uuid) -> Option<SessionInfo> {
        self.sessions.read().get(conn).cloned()
    }

    pub fn remove(&self, conn: &Uuid) -> Option<SessionInfo> {
        self.sessions.write().remove(conn)
    }

    /// Raise the session's revision; never moves it backwards.
    pub fn advance_revision(&self, conn: &Uuid, rev: u64) {
        if let Some(info) = self.sessions.write().get_mut(conn) {
            info.revision = info.revision.max(rev);
        }
    }

    /// Connections attached to `pad_id`.
    pub fn connections_on_pad(&self, pad_id: &str) -> Vec<Uuid> {
        self.sessions
            .read()
            .iter()
            .filter(|(_, info)| info.pad_id == pad_id)
            .map(|(conn, _)| *conn)
            .collect()
    }

    /// Whether any other connection on `pad_id` belongs to `author`.
    pub fn author_has_other_connection(&self, pad_id: &str, author: &str, except: &Uuid) -> bool {
        self.sessions
            .read()
            .iter()
            .any(|(conn, info)| conn != except && info.pad_id == pad_id && info.author == author)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
