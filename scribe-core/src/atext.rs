//! Attributed text: a document body paired with its attribution.
//!
//! ```text
//!   text     "ab\ncd\n"
//!   attribs  "*0|1+3*1|1+3"      one op per run, covering every char
//!
//!   split by line:
//!     lines   ["ab\n", "cd\n"]
//!     alines  ["*0|1+3", "*1|1+3"]
//! ```

use serde::{Deserialize, Serialize};

use crate::assembler::MergingOpAssembler;
use crate::cursor::{char_len, CharCursor};
use crate::error::{ChangesetError, Result};
use crate::op::{ops_from_text, parse_ops, serialize_ops, Op, OpKind};

pub use crate::mutator::split_text_lines;

/// A text together with the attribution ops covering it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AText {
    pub text: String,
    pub attribs: String,
}

impl AText {
    /// Wrap `text`; without explicit attribs every char is a plain insert.
    pub fn new(text: impl Into<String>, attribs: Option<String>) -> Self {
        let text = text.into();
        let attribs = attribs.unwrap_or_else(|| make_attribution(&text));
        Self { text, attribs }
    }

    /// The empty document: a single newline.
    pub fn initial() -> Self {
        Self::new("\n", None)
    }

    pub fn len(&self) -> usize {
        char_len(&self.text)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// The text ends in `\n` and the attribution covers it exactly
    /// with inserts only.
    pub fn check(&self) -> Result<()> {
        if !self.text.ends_with('\n') {
            return Err(ChangesetError::InvalidArgument(
                "document text must end with a newline".into(),
            ));
        }
        let mut covered = 0;
        for op in parse_ops(&self.attribs)? {
            if op.kind != OpKind::Insert {
                return Err(ChangesetError::InvalidOp(op.to_string()));
            }
            covered += op.chars;
        }
        let len = self.len();
        if covered != len {
            return Err(ChangesetError::LengthMismatch {
                expected: len,
                actual: covered,
            });
        }
        Ok(())
    }
}

impl Default for AText {
    fn default() -> Self {
        Self::initial()
    }
}

/// Attribution for unattributed `text`.
pub fn make_attribution(text: &str) -> String {
    serialize_ops(&ops_from_text(OpKind::Insert, text, ""))
}

/// Break a document attribution into one op string per line of `text`.
/// Ops spanning several lines are cut at each newline.
pub fn split_attribution_lines(attribs: &str, text: &str) -> Result<Vec<String>> {
    let mut assem = MergingOpAssembler::new();
    let mut lines = Vec::new();
    let mut cursor = CharCursor::new(text);

    for mut op in parse_ops(attribs)? {
        let mut chars = op.chars;
        let mut nl = op.lines;
        while nl > 1 {
            let through = cursor.chars_through_newline().ok_or_else(|| {
                ChangesetError::LineCountMismatch(op.to_string(), "end of text".into())
            })?;
            let mut line = op.clone();
            line.chars = through;
            line.lines = 1;
            push_line_op(line, &mut assem, &mut lines, &mut cursor)?;
            chars = chars.saturating_sub(through);
            nl -= 1;
        }
        op.chars = chars;
        op.lines = nl;
        push_line_op(op, &mut assem, &mut lines, &mut cursor)?;
    }
    Ok(lines)
}

fn push_line_op(
    op: Op,
    assem: &mut MergingOpAssembler,
    lines: &mut Vec<String>,
    cursor: &mut CharCursor<'_>,
) -> Result<()> {
    let chars = op.chars;
    let ends_line = op.lines > 0;
    assem.append(op);
    if ends_line {
        lines.push(serialize_ops(&assem.take()));
    }
    cursor.skip(chars)
}

/// Concatenate per-line attributions back into one op string.
pub fn join_attribution_lines<S: AsRef<str>>(alines: &[S]) -> Result<String> {
    let mut assem = MergingOpAssembler::new();
    for aline in alines {
        for op in parse_ops(aline.as_ref())? {
            assem.append(op);
        }
    }
    Ok(assem.serialize())
}

/// The attribution ops of `atext` minus its final newline.
pub fn ops_from_atext(atext: &AText) -> Result<Vec<Op>> {
    let mut ops = parse_ops(&atext.attribs)?;
    let Some(mut last) = ops.pop() else {
        return Ok(ops);
    };
    if last.lines <= 1 {
        last.lines = 0;
        last.chars = last.chars.saturating_sub(1);
    } else {
        let body = atext.text.strip_suffix('\n').unwrap_or(&atext.text);
        let last_line_len = match body.rfind('\n') {
            Some(pos) => char_len(&body[pos + 1..]),
            None => char_len(body),
        };
        let mut head = last.clone();
        head.lines -= 1;
        head.chars = head.chars.saturating_sub(last_line_len + 1);
        ops.push(head);
        last.lines = 0;
        last.chars = last_line_len;
    }
    if last.chars > 0 {
        ops.push(last);
    }
    Ok(ops)
}
