//! Persistence contract for pads, revisions, chat, authors and aliases.
//!
//! Architecture:
//! ```text
//! ┌─────────────┐   records    ┌──────────────────────────────────┐
//! │ Pad /       │ ───────────► │ dyn DataStore                    │
//! │ PadManager /│              │                                  │
//! │ AuthorMgr   │ ◄─────────── │  MemoryDataStore (RwLock maps)   │
//! └─────────────┘              │  RocksDataStore  (column fams)   │
//!                              └──────────────────────────────────┘
//! ```
//!
//! Revisions and chat messages are write-once: a second insert for the
//! same `(pad, rev)` or `(pad, seq)` is ignored. Removing a pad removes
//! its revisions and chat but never its authors.

pub mod memory;
#[cfg(feature = "rocksdb")]
pub mod rocks;

use std::collections::BTreeSet;

use scribe_core::{AText, AttributePool};
use serde::{Deserialize, Serialize};

pub use memory::MemoryDataStore;
#[cfg(feature = "rocksdb")]
pub use rocks::{RocksDataStore, StoreConfig};

/// Stored head state of a pad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PadRecord {
    pub head: u64,
    pub atext: AText,
    pub pool: AttributePool,
    /// Sequence number of the newest chat message, -1 when there is none.
    pub chat_head: i64,
    pub saved_revisions: BTreeSet<u64>,
    pub read_only_id: Option<String>,
    pub public_status: bool,
}

/// One committed revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub rev: u64,
    /// Packed changeset against the previous revision's text.
    pub changeset: String,
    /// Document state after this revision.
    pub atext: AText,
    /// Pool snapshot, present on key revisions.
    pub pool: Option<AttributePool>,
    pub author: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub seq: u64,
    pub text: String,
    pub author: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorRecord {
    pub id: String,
    pub name: Option<String>,
    /// `#rrggbb` or `#rgb`.
    pub color: String,
    pub pad_ids: BTreeSet<String>,
    pub timestamp: i64,
}

/// An API session granting an author access to a group's pads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub group_id: String,
    pub author_id: String,
    /// Seconds since the Unix epoch.
    pub valid_until: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: String,
    pub pad_ids: BTreeSet<String>,
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// Backend failure
    Database(String),
    /// No record under the given key
    NotFound(String),
    Serialization(String),
    Deserialization(String),
    Compression(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {e}"),
            StoreError::NotFound(key) => write!(f, "Record not found: {key}"),
            StoreError::Serialization(e) => write!(f, "Serialization error: {e}"),
            StoreError::Deserialization(e) => write!(f, "Deserialization error: {e}"),
            StoreError::Compression(e) => write!(f, "Compression error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Abstract persistence used by the pad engine.
///
/// Implementations are internally synchronized; every method may be
/// called concurrently from any thread.
pub trait DataStore: Send + Sync {
    // ─── Pads ─────────────────────────────────────────────────────────

    fn get_pad(&self, pad_id: &str) -> Result<PadRecord, StoreError>;
    /// Insert or overwrite the pad record.
    fn create_pad(&self, pad_id: &str, record: &PadRecord) -> Result<(), StoreError>;
    fn does_pad_exist(&self, pad_id: &str) -> Result<bool, StoreError>;
    fn remove_pad(&self, pad_id: &str) -> Result<(), StoreError>;
    fn list_pad_ids(&self) -> Result<Vec<String>, StoreError>;

    // ─── Revisions ────────────────────────────────────────────────────

    /// Write-once on `(pad_id, record.rev)`.
    fn save_revision(&self, pad_id: &str, record: &RevisionRecord) -> Result<(), StoreError>;
    fn get_revision(&self, pad_id: &str, rev: u64) -> Result<RevisionRecord, StoreError>;
    /// Revisions `start..=end`; fails unless every one is present.
    fn get_revisions(&self, pad_id: &str, start: u64, end: u64)
        -> Result<Vec<RevisionRecord>, StoreError>;
    fn remove_revisions_of_pad(&self, pad_id: &str) -> Result<(), StoreError>;

    // ─── Chat ─────────────────────────────────────────────────────────

    /// Write-once on `(pad_id, message.seq)`.
    fn save_chat_message(&self, pad_id: &str, message: &ChatMessage) -> Result<(), StoreError>;
    /// Messages with `start <= seq <= end` in ascending order.
    fn get_chats_of_pad(&self, pad_id: &str, start: u64, end: u64)
        -> Result<Vec<ChatMessage>, StoreError>;
    fn remove_chat(&self, pad_id: &str) -> Result<(), StoreError>;

    // ─── Authors ──────────────────────────────────────────────────────

    fn save_author(&self, author: &AuthorRecord) -> Result<(), StoreError>;
    fn get_author(&self, author_id: &str) -> Result<AuthorRecord, StoreError>;
    fn get_author_for_token(&self, token: &str) -> Result<String, StoreError>;
    fn set_author_for_token(&self, token: &str, author_id: &str) -> Result<(), StoreError>;

    // ─── Read-only aliases ────────────────────────────────────────────

    /// Stores both `pad -> alias` and `alias -> pad`.
    fn save_read_only_id(&self, pad_id: &str, read_only_id: &str) -> Result<(), StoreError>;
    fn get_read_only_id(&self, pad_id: &str) -> Result<String, StoreError>;
    fn get_pad_id_for_read_only(&self, read_only_id: &str) -> Result<String, StoreError>;
    fn remove_read_only_id(&self, pad_id: &str) -> Result<(), StoreError>;

    // ─── Sessions and groups ──────────────────────────────────────────

    fn save_session(&self, session: &SessionRecord) -> Result<(), StoreError>;
    fn get_session(&self, session_id: &str) -> Result<SessionRecord, StoreError>;
    fn remove_session(&self, session_id: &str) -> Result<(), StoreError>;

    fn save_group(&self, group: &GroupRecord) -> Result<(), StoreError>;
    fn get_group(&self, group_id: &str) -> Result<GroupRecord, StoreError>;
    fn remove_group(&self, group_id: &str) -> Result<(), StoreError>;
}
