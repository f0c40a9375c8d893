//! Errors raised by the changeset algebra.

use thiserror::Error;

/// Everything that can go wrong while parsing, validating or combining
/// changesets and attribution strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChangesetError {
    #[error("Not a changeset: {0}")]
    MalformedHeader(String),

    #[error("Invalid operation: {0}")]
    InvalidOp(String),

    #[error("Invalid base36 number: {0:?}")]
    InvalidNumber(String),

    #[error("Invalid attribute string: {0:?}")]
    InvalidAttributeString(String),

    #[error("Attribute {0} is not in the pool")]
    MissingAttribute(usize),

    #[error("Invalid attribute pool: {0}")]
    InvalidPool(String),

    #[error("Length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Newline count is wrong in op {opcode}")]
    NewlineMismatch { opcode: char },

    #[error("Not enough characters: wanted {wanted}, {remaining} remaining")]
    NotEnoughChars { wanted: usize, remaining: usize },

    #[error("Operation runs past the end of the document ({pos} > {len})")]
    PastEnd { pos: usize, len: usize },

    #[error("Changeset is not in canonical form: {0}")]
    NonCanonical(String),

    #[error("Excess characters in the charBank")]
    ExcessCharBank,

    #[error("Multiline insert does not end with a newline")]
    MultilineInsertWithoutNewline,

    #[error("Mismatched composition: first changeset produces {new_len} chars, second expects {old_len}")]
    ComposeMismatch { new_len: usize, old_len: usize },

    #[error("Mismatched follow: changesets apply to {left} and {right} chars")]
    FollowMismatch { left: usize, right: usize },

    #[error("Line count mismatch between {0} and {1}")]
    LineCountMismatch(String, String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, ChangesetError>;
