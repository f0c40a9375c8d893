//! Ops: the unit of a changeset.
//!
//! Wire grammar of one op:
//! ```text
//!   (*<attr>)* (|<lines>)? <opcode> <chars>      all numbers base-36
//!   opcode: '=' keep   '+' insert   '-' delete
//! ```

use std::fmt;

use crate::base36::{is_base36_char, num_to_string, parse_num};
use crate::error::{ChangesetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Keep,
    Insert,
    Delete,
}

impl OpKind {
    pub fn symbol(self) -> char {
        match self {
            OpKind::Keep => '=',
            OpKind::Insert => '+',
            OpKind::Delete => '-',
        }
    }

    pub fn from_symbol(c: char) -> Option<Self> {
        match c {
            '=' => Some(OpKind::Keep),
            '+' => Some(OpKind::Insert),
            '-' => Some(OpKind::Delete),
            _ => None,
        }
    }
}

/// One op. `chars` counts Unicode scalar values; `lines` counts the
/// newlines among them. When `lines > 0` the covered text ends in `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Op {
    pub kind: OpKind,
    pub chars: usize,
    pub lines: usize,
    pub attribs: String,
}

impl Op {
    pub fn new(kind: OpKind, chars: usize, lines: usize, attribs: impl Into<String>) -> Self {
        Self {
            kind,
            chars,
            lines,
            attribs: attribs.into(),
        }
    }

    pub fn keep(chars: usize, lines: usize) -> Self {
        Self::new(OpKind::Keep, chars, lines, "")
    }

    pub fn insert(chars: usize, lines: usize, attribs: impl Into<String>) -> Self {
        Self::new(OpKind::Insert, chars, lines, attribs)
    }

    pub fn delete(chars: usize, lines: usize) -> Self {
        Self::new(OpKind::Delete, chars, lines, "")
    }

    /// Remove a consumed prefix of `chars`/`lines` from this op.
    pub(crate) fn shrink(&mut self, chars: usize, lines: usize) -> Result<()> {
        match (self.chars.checked_sub(chars), self.lines.checked_sub(lines)) {
            (Some(c), Some(l)) => {
                self.chars = c;
                self.lines = l;
                Ok(())
            }
            _ => Err(ChangesetError::LineCountMismatch(
                self.to_string(),
                format!("|{lines}={chars}"),
            )),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.attribs)?;
        if self.lines > 0 {
            write!(f, "|{}", num_to_string(self.lines))?;
        }
        write!(f, "{}{}", self.kind.symbol(), num_to_string(self.chars))
    }
}

/// Parse an op stream. Parsing stops at a `$` (start of the char bank)
/// or at the end of input; anything else that is not an op is an error.
pub fn parse_ops(ops: &str) -> Result<Vec<Op>> {
    let mut out = Vec::new();
    let mut rest = ops;
    while let Some(first) = rest.chars().next() {
        if first == '$' {
            break;
        }
        let (op, tail) = parse_one(rest).ok_or_else(|| ChangesetError::InvalidOp(rest.to_string()))?;
        out.push(op?);
        rest = tail;
    }
    Ok(out)
}

fn take_number(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !is_base36_char(c)).unwrap_or(s.len());
    s.split_at(end)
}

/// Returns `None` when `s` does not start with an op.
fn parse_one(s: &str) -> Option<(Result<Op>, &str)> {
    let attribs_end = {
        let mut pos = 0;
        while s[pos..].starts_with('*') {
            let (num, _) = take_number(&s[pos + 1..]);
            if num.is_empty() {
                return None;
            }
            pos += 1 + num.len();
        }
        pos
    };
    let attribs = &s[..attribs_end];
    let mut rest = &s[attribs_end..];

    let mut lines = None;
    if let Some(after_bar) = rest.strip_prefix('|') {
        let (num, tail) = take_number(after_bar);
        if num.is_empty() {
            return None;
        }
        lines = Some(num);
        rest = tail;
    }

    let kind = OpKind::from_symbol(rest.chars().next()?)?;
    let (chars, tail) = take_number(&rest[1..]);
    if chars.is_empty() {
        return None;
    }

    Some((build_op(kind, attribs, lines, chars), tail))
}

fn build_op(kind: OpKind, attribs: &str, lines: Option<&str>, chars: &str) -> Result<Op> {
    Ok(Op {
        kind,
        chars: parse_num(chars)?,
        lines: lines.map(parse_num).transpose()?.unwrap_or(0),
        attribs: attribs.to_string(),
    })
}

/// Serialize ops verbatim.
pub fn serialize_ops(ops: &[Op]) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    for op in ops {
        // Writing to a String cannot fail.
        let _ = write!(out, "{op}");
    }
    out
}

/// Ops of `kind` covering `text`: at most one op through the last
/// newline and one for the trailing partial line. Empty text yields none.
pub fn ops_from_text(kind: OpKind, text: &str, attribs: &str) -> Vec<Op> {
    let mut ops = Vec::with_capacity(2);
    let total = text.chars().count();
    match text.rfind('\n') {
        None => {
            if total > 0 {
                ops.push(Op::new(kind, total, 0, attribs));
            }
        }
        Some(byte_pos) => {
            let through_newline = text[..=byte_pos].chars().count();
            let lines = text.matches('\n').count();
            ops.push(Op::new(kind, through_newline, lines, attribs));
            if total > through_newline {
                ops.push(Op::new(kind, total - through_newline, 0, attribs));
            }
        }
    }
    ops
}
