//! Incremental changeset construction against a document of known length.

use crate::assembler::SmartOpAssembler;
use crate::attribs::attribs_for_op;
use crate::attribute::Attribute;
use crate::changeset::Changeset;
use crate::error::{ChangesetError, Result};
use crate::op::{ops_from_text, Op, OpKind};
use crate::pool::AttributePool;

/// Collects keeps, inserts and removes in document order.
///
/// ```text
///   Builder::new(6).keep(2, 0).remove(1, 0).insert("xy").build()
///     → Z:6>1=2-1+2$xy
/// ```
#[derive(Debug, Clone)]
pub struct Builder {
    old_len: usize,
    ops: Vec<Op>,
    char_bank: String,
}

impl Builder {
    pub fn new(old_len: usize) -> Self {
        Self {
            old_len,
            ops: Vec::new(),
            char_bank: String::new(),
        }
    }

    pub fn keep(&mut self, chars: usize, lines: usize) -> &mut Self {
        self.keep_attribs(chars, lines, "")
    }

    /// Keep `chars` chars while applying an encoded attribute string.
    pub fn keep_attribs(&mut self, chars: usize, lines: usize, attribs: impl Into<String>) -> &mut Self {
        self.ops.push(Op::new(OpKind::Keep, chars, lines, attribs));
        self
    }

    /// Keep the span covered by `text`, setting `attribs` on it. Empty
    /// values remove the key.
    pub fn keep_text(&mut self, text: &str, attribs: &[Attribute], pool: &mut AttributePool) -> &mut Self {
        let encoded = attribs_for_op(OpKind::Keep, attribs, pool);
        self.ops.extend(ops_from_text(OpKind::Keep, text, &encoded));
        self
    }

    pub fn insert(&mut self, text: &str) -> &mut Self {
        self.insert_attribs(text, "")
    }

    pub fn insert_with(&mut self, text: &str, attribs: &[Attribute], pool: &mut AttributePool) -> &mut Self {
        let encoded = attribs_for_op(OpKind::Insert, attribs, pool);
        self.insert_attribs(text, &encoded)
    }

    /// Insert `text` carrying an already encoded attribute string.
    pub fn insert_attribs(&mut self, text: &str, attribs: &str) -> &mut Self {
        self.ops.extend(ops_from_text(OpKind::Insert, text, attribs));
        self.char_bank.push_str(text);
        self
    }

    pub fn remove(&mut self, chars: usize, lines: usize) -> &mut Self {
        self.ops.push(Op::delete(chars, lines));
        self
    }

    /// Assemble into canonical form.
    pub fn build(&self) -> Result<Changeset> {
        let mut assem = SmartOpAssembler::new();
        for op in &self.ops {
            assem.append(op.clone());
        }
        assem.end_document();
        let new_len = self
            .old_len
            .checked_add_signed(assem.length_change())
            .ok_or_else(|| {
                ChangesetError::InvalidArgument(format!(
                    "builder removes more than the {} chars it started with",
                    self.old_len
                ))
            })?;
        Ok(Changeset::new(
            self.old_len,
            new_len,
            assem.finish(),
            self.char_bank.clone(),
        ))
    }
}
