//! Op writers.
//!
//! ```text
//!   OpAssembler          verbatim
//!   MergingOpAssembler   coalesces runs with equal opcode + attribs
//!   SmartOpAssembler     buffers '-', '+' and '=' separately and flushes
//!                        them in that order, producing canonical streams
//! ```

use crate::op::{serialize_ops, Op, OpKind};

/// Collects ops exactly as given.
#[derive(Debug, Clone, Default)]
pub struct OpAssembler {
    ops: Vec<Op>,
}

impl OpAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, op: Op) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn into_ops(self) -> Vec<Op> {
        self.ops
    }

    pub fn serialize(&self) -> String {
        serialize_ops(&self.ops)
    }
}

/// Merges consecutive ops that share opcode and attributes.
///
/// A merged op with `lines > 0` must still end on a newline, so chars
/// appended after the last newline are held back and emitted as a separate
/// op on flush.
#[derive(Debug, Clone, Default)]
pub struct MergingOpAssembler {
    assem: OpAssembler,
    buf: Option<Op>,
    chars_after_newline: usize,
}

impl MergingOpAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, op: Op) {
        if op.chars == 0 {
            return;
        }
        if let Some(buf) = self.buf.as_mut() {
            if buf.kind == op.kind && buf.attribs == op.attribs {
                if op.lines > 0 {
                    buf.chars += self.chars_after_newline + op.chars;
                    buf.lines += op.lines;
                    self.chars_after_newline = 0;
                } else if buf.lines == 0 {
                    buf.chars += op.chars;
                } else {
                    self.chars_after_newline += op.chars;
                }
                return;
            }
        }
        self.flush(false);
        self.buf = Some(op);
    }

    fn flush(&mut self, end_document: bool) {
        let Some(mut buf) = self.buf.take() else {
            return;
        };
        let trailing = std::mem::take(&mut self.chars_after_newline);
        // A final plain keep is implicit.
        if end_document && buf.kind == OpKind::Keep && buf.attribs.is_empty() {
            return;
        }
        self.assem.append(buf.clone());
        if trailing > 0 {
            buf.chars = trailing;
            buf.lines = 0;
            self.assem.append(buf);
        }
    }

    /// Flush, dropping a trailing attribute-less keep.
    pub fn end_document(&mut self) {
        self.flush(true);
    }

    /// Flush and drain everything assembled so far, leaving the
    /// assembler empty.
    pub fn take(&mut self) -> Vec<Op> {
        self.flush(false);
        std::mem::take(&mut self.assem).into_ops()
    }

    pub fn finish(mut self) -> Vec<Op> {
        self.take()
    }

    pub fn serialize(&mut self) -> String {
        self.flush(false);
        self.assem.serialize()
    }

    pub fn clear(&mut self) {
        self.assem.clear();
        self.buf = None;
        self.chars_after_newline = 0;
    }
}

/// Produces canonical op streams: within each stretch between keeps,
/// deletes come before inserts, and like ops are merged.
#[derive(Debug, Clone, Default)]
pub struct SmartOpAssembler {
    minus: MergingOpAssembler,
    plus: MergingOpAssembler,
    keep: MergingOpAssembler,
    assem: MergingOpAssembler,
    last_kind: Option<OpKind>,
    length_change: isize,
}

impl SmartOpAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, op: Op) {
        if op.chars == 0 {
            return;
        }
        let kind = op.kind;
        match kind {
            OpKind::Delete => {
                if self.last_kind == Some(OpKind::Keep) {
                    self.flush_keeps();
                }
                self.length_change -= op.chars as isize;
                self.minus.append(op);
            }
            OpKind::Insert => {
                if self.last_kind == Some(OpKind::Keep) {
                    self.flush_keeps();
                }
                self.length_change += op.chars as isize;
                self.plus.append(op);
            }
            OpKind::Keep => {
                if self.last_kind != Some(OpKind::Keep) {
                    self.flush_plus_minus();
                }
                self.keep.append(op);
            }
        }
        self.last_kind = Some(kind);
    }

    fn flush_keeps(&mut self) {
        for op in self.keep.take() {
            self.assem.append(op);
        }
    }

    fn flush_plus_minus(&mut self) {
        for op in self.minus.take() {
            self.assem.append(op);
        }
        for op in self.plus.take() {
            self.assem.append(op);
        }
    }

    /// Drop a trailing attribute-less keep.
    pub fn end_document(&mut self) {
        self.keep.end_document();
    }

    /// Net change in document length of everything appended.
    pub fn length_change(&self) -> isize {
        self.length_change
    }

    pub fn finish(mut self) -> Vec<Op> {
        self.flush_plus_minus();
        self.flush_keeps();
        log::trace!("smart assembler finished, length change {}", self.length_change);
        self.assem.finish()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::parse_ops;

    fn smart(ops: &str, end: bool) -> String {
        let mut assem = SmartOpAssembler::new();
        for op in parse_ops(ops).unwrap() {
            assem.append(op);
        }
        if end {
            assem.end_document();
        }
        serialize_ops(&assem.finish())
    }

    fn merging(ops: &str, end: bool) -> String {
        let mut assem = MergingOpAssembler::new();
        for op in parse_ops(ops).unwrap() {
            assem.append(op);
        }
        if end {
            assem.end_document();
        }
        serialize_ops(&assem.finish())
    }

    #[test]
    fn test_merging_coalesces_runs() {
        assert_eq!(merging("=1=2", false), "=3");
        assert_eq!(merging("|1+2|1+3", false), "|2+5");
        assert_eq!(merging("*0+1*1+1", false), "*0+1*1+1");
    }

    #[test]
    fn test_merging_holds_back_chars_after_newline() {
        // "a\n" then "bc": the merged op can't claim to end in a newline
        assert_eq!(merging("|1+2+2", false), "|1+2+2");
        assert_eq!(merging("|1+2+2|1+3", false), "|2+7");
    }

    #[test]
    fn test_merging_end_document_drops_plain_keep() {
        assert_eq!(merging("+1=5", true), "+1");
        assert_eq!(merging("+1*0=5", true), "+1*0=5");
    }

    #[test]
    fn test_smart_orders_minus_before_plus() {
        assert_eq!(smart("+2-1", false), "-1+2");
        assert_eq!(smart("=1+2-1+1=3", true), "=1-1+3");
    }

    #[test]
    fn test_smart_length_change() {
        let mut assem = SmartOpAssembler::new();
        for op in parse_ops("=2-3+1").unwrap() {
            assem.append(op);
        }
        assert_eq!(assem.length_change(), -2);
    }

    #[test]
    fn test_zero_char_ops_dropped() {
        assert_eq!(smart("=0+0-0", false), "");
    }
}
