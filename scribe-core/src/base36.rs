//! Lowercase base-36 numbers, the only numeric encoding in the wire format.

use crate::error::{ChangesetError, Result};

/// Returns true for characters allowed in a base-36 number (`0-9a-z`).
pub fn is_base36_char(c: char) -> bool {
    c.is_ascii_digit() || c.is_ascii_lowercase()
}

/// Parse a lowercase base-36 number.
pub fn parse_num(s: &str) -> Result<usize> {
    if s.is_empty() || !s.chars().all(is_base36_char) {
        return Err(ChangesetError::InvalidNumber(s.to_string()));
    }
    usize::from_str_radix(s, 36).map_err(|_| ChangesetError::InvalidNumber(s.to_string()))
}

/// Encode a number as lowercase base-36.
pub fn num_to_string(mut n: usize) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::with_capacity(8);
    while n > 0 {
        buf.push(DIGITS[n % 36]);
        n /= 36;
    }
    buf.reverse();
    // Only ASCII digits were pushed.
    buf.into_iter().map(char::from).collect()
}
