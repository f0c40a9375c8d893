//! A single `(key, value)` styling tuple.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Attribute tuple. An empty value means "remove this key" when the
/// attribute is applied as a mutation.
///
/// Ordering is lexicographic on `(key, value)`. On the wire an attribute
/// is a two-element JSON array `[key, value]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The `author` attribute used to track who typed which characters.
    pub fn author(author_id: impl Into<String>) -> Self {
        Self::new("author", author_id)
    }

    /// True when the value is empty.
    pub fn is_removal(&self) -> bool {
        self.value.is_empty()
    }
}

impl From<(String, String)> for Attribute {
    fn from((key, value): (String, String)) -> Self {
        Self { key, value }
    }
}

impl From<Attribute> for (String, String) {
    fn from(attr: Attribute) -> Self {
        (attr.key, attr.value)
    }
}

impl From<(&str, &str)> for Attribute {
    fn from((key, value): (&str, &str)) -> Self {
        Self::new(key, value)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}
