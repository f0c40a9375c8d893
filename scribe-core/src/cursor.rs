//! Scalar-value indexing over `&str`.
//!
//! All lengths in the changeset format count Unicode scalar values, never
//! UTF-8 bytes. These helpers translate between the two.

use crate::error::{ChangesetError, Result};

/// Number of scalar values in `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `n`-th scalar value, or `s.len()` past the end.
pub fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

/// First `n` scalar values of `s`.
pub fn char_prefix(s: &str, n: usize) -> &str {
    &s[..byte_offset(s, n)]
}

/// `s` without its first `n` scalar values.
pub fn char_suffix(s: &str, n: usize) -> &str {
    &s[byte_offset(s, n)..]
}

/// Scalar values `[start, end)` of `s`, clamped to its length.
pub fn char_slice(s: &str, start: usize, end: usize) -> &str {
    let from = byte_offset(s, start);
    let rest = &s[from..];
    &rest[..byte_offset(rest, end.saturating_sub(start))]
}

/// Forward-only reader that hands out slices by scalar count.
#[derive(Debug, Clone)]
pub struct CharCursor<'a> {
    rest: &'a str,
    remaining: usize,
}

impl<'a> CharCursor<'a> {
    pub fn new(s: &'a str) -> Self {
        Self {
            rest: s,
            remaining: char_len(s),
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn rest(&self) -> &'a str {
        self.rest
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if n > self.remaining {
            return Err(ChangesetError::NotEnoughChars {
                wanted: n,
                remaining: self.remaining,
            });
        }
        Ok(())
    }

    pub fn peek(&self, n: usize) -> Result<&'a str> {
        self.ensure(n)?;
        Ok(char_prefix(self.rest, n))
    }

    pub fn peek_char(&self) -> Option<char> {
        self.rest.chars().next()
    }

    pub fn take(&mut self, n: usize) -> Result<&'a str> {
        self.ensure(n)?;
        let (head, tail) = self.rest.split_at(byte_offset(self.rest, n));
        self.rest = tail;
        self.remaining -= n;
        Ok(head)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Scalar count up to and including the next newline.
    pub fn chars_through_newline(&self) -> Option<usize> {
        self.rest
            .find('\n')
            .map(|pos| char_len(&self.rest[..=pos]))
    }
}
