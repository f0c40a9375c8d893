//! Error taxonomy for pads, sessions and the message handler.
//!
//! Every failure maps onto one [`ErrorKind`], which in turn has a thin
//! HTTP status mapping for front ends that need one.

use scribe_core::ChangesetError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StoreError;

/// Coarse classification of a [`PadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Bad changeset, id, color or range.
    Malformed,
    NotFound,
    /// Pad exists, session missing, or similar state mismatch.
    Conflict,
    Unauthorized,
    Unavailable,
    Internal,
}

impl ErrorKind {
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Malformed => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Unauthorized => 403,
            ErrorKind::Unavailable => 503,
            ErrorKind::Internal => 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum PadError {
    #[error(transparent)]
    Changeset(#[from] ChangesetError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid pad id: {0:?}")]
    InvalidPadId(String),

    #[error("invalid read-only id: {0:?}")]
    InvalidReadOnlyId(String),

    #[error("invalid color: {0:?}")]
    InvalidColor(String),

    #[error("pad already exists: {0}")]
    PadExists(String),

    #[error("pad not found: {0}")]
    PadNotFound(String),

    #[error("revision {rev} of pad {pad_id} not found")]
    RevisionNotFound { pad_id: String, rev: u64 },

    #[error("author not found: {0}")]
    AuthorNotFound(String),

    #[error("session not initialized")]
    SessionNotInitialized,

    #[error("read-only session cannot modify the pad")]
    ReadOnly,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("bad revision: {0}")]
    BadRevision(String),

    #[error("range too large: {len} exceeds {max}")]
    RangeTooLarge { len: usize, max: usize },

    #[error("text too long: {len} chars exceeds {max}")]
    TextTooLong { len: usize, max: usize },

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl PadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PadError::Changeset(_)
            | PadError::InvalidPadId(_)
            | PadError::InvalidReadOnlyId(_)
            | PadError::InvalidColor(_)
            | PadError::BadRevision(_)
            | PadError::RangeTooLarge { .. }
            | PadError::TextTooLong { .. } => ErrorKind::Malformed,
            PadError::PadNotFound(_)
            | PadError::RevisionNotFound { .. }
            | PadError::AuthorNotFound(_) => ErrorKind::NotFound,
            PadError::PadExists(_) | PadError::SessionNotInitialized => ErrorKind::Conflict,
            PadError::ReadOnly | PadError::Unauthorized(_) => ErrorKind::Unauthorized,
            PadError::Unavailable(_) => ErrorKind::Unavailable,
            PadError::Store(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, PadError>;
