//! Changesets and the operations that combine them.
//!
//! ```text
//!   Z:<oldLen> <'>'|'<'> <|delta|> <ops> $ <charBank>
//!
//!   "Z:5>3|1=2=1+3$abc"
//!     old length 5, new length 8
//!     keep 2 chars (1 newline), keep 1, insert "abc"
//! ```
//!
//! A changeset is parsed once into [`Changeset`] and serialized back only
//! at the edges. Every function here is pure apart from interning new
//! attributes into the pool it is handed.

use std::fmt;
use std::str::FromStr;

use std::collections::VecDeque;

use crate::assembler::{MergingOpAssembler, SmartOpAssembler};
use crate::atext::AText;
use crate::attribs::{
    attribs_for_op, compose_attributes, decode_attribs, encode_attribs, follow_attributes,
    AttributeTester,
};
use crate::attribute::Attribute;
use crate::base36::{num_to_string, parse_num};
use crate::cursor::{char_len, char_prefix, char_slice, CharCursor};
use crate::error::{ChangesetError, Result};
use crate::mutator::TextLinesMutator;
use crate::op::{ops_from_text, parse_ops, serialize_ops, Op, OpKind};
use crate::pool::AttributePool;

/// A parsed changeset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    pub old_len: usize,
    pub new_len: usize,
    pub ops: Vec<Op>,
    pub char_bank: String,
}

impl Changeset {
    pub fn new(old_len: usize, new_len: usize, ops: Vec<Op>, char_bank: impl Into<String>) -> Self {
        Self {
            old_len,
            new_len,
            ops,
            char_bank: char_bank.into(),
        }
    }

    /// The changeset that leaves a document of `len` chars untouched.
    pub fn identity(len: usize) -> Self {
        Self::new(len, len, Vec::new(), "")
    }

    pub fn is_identity(&self) -> bool {
        self.ops.is_empty() && self.old_len == self.new_len
    }

    /// Parse the wire form. Only the header and op grammar are checked;
    /// use [`check_rep`] for full validation.
    pub fn unpack(cs: &str) -> Result<Self> {
        let malformed = || ChangesetError::MalformedHeader(cs.to_string());

        let body = cs.strip_prefix("Z:").ok_or_else(malformed)?;
        let sign_pos = body.find(|c: char| c == '>' || c == '<').ok_or_else(malformed)?;
        let old_len = parse_num(&body[..sign_pos]).map_err(|_| malformed())?;
        let grows = body[sign_pos..].starts_with('>');
        let after_sign = &body[sign_pos + 1..];
        let mag_end = after_sign
            .find(|c: char| !c.is_ascii_digit() && !c.is_ascii_lowercase())
            .unwrap_or(after_sign.len());
        let mag = parse_num(&after_sign[..mag_end]).map_err(|_| malformed())?;
        let new_len = if grows {
            old_len.checked_add(mag)
        } else {
            old_len.checked_sub(mag)
        }
        .ok_or_else(malformed)?;

        let rest = &after_sign[mag_end..];
        let dollar = rest.find('$').ok_or_else(malformed)?;
        let ops = parse_ops(&rest[..dollar])?;
        let char_bank = rest[dollar + 1..].to_string();

        Ok(Self::new(old_len, new_len, ops, char_bank))
    }

    /// Serialize to the wire form.
    pub fn pack(&self) -> String {
        let (sign, mag) = if self.new_len >= self.old_len {
            ('>', self.new_len - self.old_len)
        } else {
            ('<', self.old_len - self.new_len)
        };
        format!(
            "Z:{}{}{}{}${}",
            num_to_string(self.old_len),
            sign,
            num_to_string(mag),
            serialize_ops(&self.ops),
            self.char_bank
        )
    }

    /// Parse and validate, also requiring that `cs` is exactly the
    /// canonical serialization of what it describes.
    pub fn unpack_checked(cs: &str) -> Result<Self> {
        let parsed = Self::unpack(cs)?;
        check_rep(&parsed)?;
        if parsed.pack() != cs {
            return Err(ChangesetError::NonCanonical(cs.to_string()));
        }
        Ok(parsed)
    }

    pub fn ops_string(&self) -> String {
        serialize_ops(&self.ops)
    }
}

impl fmt::Display for Changeset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pack())
    }
}

impl FromStr for Changeset {
    type Err = ChangesetError;

    fn from_str(s: &str) -> Result<Self> {
        Self::unpack(s)
    }
}

fn count_newlines(s: &str) -> usize {
    s.bytes().filter(|&b| b == b'\n').count()
}

// ─── Validation ─────────────────────────────────────────────────────

/// Validate a changeset: bank usage, newline counts, bounds, claimed
/// length and canonical op order.
pub fn check_rep(cs: &Changeset) -> Result<()> {
    let mut bank = CharCursor::new(&cs.char_bank);
    let mut assem = SmartOpAssembler::new();
    let mut old_pos = 0usize;
    let mut calc_new_len = 0usize;

    for op in &cs.ops {
        match op.kind {
            OpKind::Keep | OpKind::Delete => {
                old_pos += op.chars;
                if old_pos > cs.old_len {
                    return Err(ChangesetError::PastEnd {
                        pos: old_pos,
                        len: cs.old_len,
                    });
                }
                if op.kind == OpKind::Keep {
                    calc_new_len += op.chars;
                }
            }
            OpKind::Insert => {
                let chars = bank.take(op.chars)?;
                if count_newlines(chars) != op.lines {
                    return Err(ChangesetError::NewlineMismatch { opcode: '+' });
                }
                if op.lines > 0 && !chars.ends_with('\n') {
                    return Err(ChangesetError::MultilineInsertWithoutNewline);
                }
                calc_new_len += op.chars;
                if calc_new_len > cs.new_len {
                    return Err(ChangesetError::LengthMismatch {
                        expected: cs.new_len,
                        actual: calc_new_len,
                    });
                }
            }
        }
        assem.append(op.clone());
    }

    calc_new_len += cs.old_len - old_pos;
    if calc_new_len != cs.new_len {
        return Err(ChangesetError::LengthMismatch {
            expected: cs.new_len,
            actual: calc_new_len,
        });
    }
    if bank.remaining() > 0 {
        return Err(ChangesetError::ExcessCharBank);
    }
    assem.end_document();
    if assem.finish() != cs.ops {
        return Err(ChangesetError::NonCanonical(cs.pack()));
    }
    Ok(())
}

// ─── Applying to text ───────────────────────────────────────────────

/// Apply `cs` to `text`.
pub fn apply_to_text(cs: &Changeset, text: &str) -> Result<String> {
    let len = char_len(text);
    if len != cs.old_len {
        return Err(ChangesetError::LengthMismatch {
            expected: cs.old_len,
            actual: len,
        });
    }
    let mut bank = CharCursor::new(&cs.char_bank);
    let mut input = CharCursor::new(text);
    let mut out = String::with_capacity(text.len() + cs.char_bank.len());

    for op in &cs.ops {
        let source = match op.kind {
            OpKind::Insert => bank.take(op.chars)?,
            OpKind::Keep | OpKind::Delete => input.take(op.chars)?,
        };
        if count_newlines(source) != op.lines {
            return Err(ChangesetError::NewlineMismatch {
                opcode: op.kind.symbol(),
            });
        }
        if op.kind != OpKind::Delete {
            out.push_str(source);
        }
    }
    out.push_str(input.rest());
    Ok(out)
}

/// Apply `cs` to a document held as lines, in place.
pub fn mutate_text_lines(cs: &Changeset, lines: &mut Vec<String>) -> Result<()> {
    let mut bank = CharCursor::new(&cs.char_bank);
    let mut m = TextLinesMutator::new(lines);
    for op in &cs.ops {
        match op.kind {
            OpKind::Insert => m.insert(bank.take(op.chars)?, op.lines),
            OpKind::Delete => {
                m.remove(op.chars, op.lines);
            }
            OpKind::Keep => m.skip(op.chars, op.lines, !op.attribs.is_empty()),
        }
    }
    m.close();
    Ok(())
}

// ─── Zipping ────────────────────────────────────────────────────────

/// Walk two op streams in lockstep. `func` inspects the current op of
/// each side, consumes from at least one of them (setting a slot to
/// `None` once it is used up) and may emit an op.
fn apply_zip<F>(ops1: Vec<Op>, ops2: Vec<Op>, mut func: F) -> Result<Vec<Op>>
where
    F: FnMut(&mut Option<Op>, &mut Option<Op>) -> Result<Option<Op>>,
{
    let mut iter1 = ops1.into_iter();
    let mut iter2 = ops2.into_iter();
    let mut op1 = None;
    let mut op2 = None;
    let mut assem = SmartOpAssembler::new();
    loop {
        if op1.is_none() {
            op1 = iter1.next();
        }
        if op2.is_none() {
            op2 = iter2.next();
        }
        if op1.is_none() && op2.is_none() {
            break;
        }
        if let Some(out) = func(&mut op1, &mut op2)? {
            assem.append(out);
        }
    }
    assem.end_document();
    let ops = assem.finish();
    log::trace!("zip produced {} ops", ops.len());
    Ok(ops)
}

/// Combine one attribution op (`att`) with one changeset op (`cs`).
///
/// | att \ cs | none | =              | -              | +       |
/// |----------|------|----------------|----------------|---------|
/// | none     | none | cs             | cs             | cs      |
/// | =        | att  | = (composed)   | - (cs attribs) | cs      |
/// | +        | att  | + (composed)   | dropped        | cs      |
/// | -        | att  | att            | att            | att     |
///
/// The shorter side is consumed entirely and the longer one shrunk.
pub(crate) fn slicer_zipper(
    att_slot: &mut Option<Op>,
    cs_slot: &mut Option<Op>,
    pool: &mut AttributePool,
) -> Result<Option<Op>> {
    let att_kind = att_slot.as_ref().map(|op| op.kind);
    let cs_kind = cs_slot.as_ref().map(|op| op.kind);
    match (att_kind, cs_kind) {
        (None, _) => return Ok(cs_slot.take()),
        (_, None) => return Ok(att_slot.take()),
        (Some(OpKind::Delete), _) => return Ok(att_slot.take()),
        (_, Some(OpKind::Insert)) => return Ok(cs_slot.take()),
        _ => {}
    }
    let (Some(att), Some(cs)) = (att_slot.as_mut(), cs_slot.as_mut()) else {
        return Ok(None);
    };

    let mismatch = || ChangesetError::LineCountMismatch(att.to_string(), cs.to_string());
    if att.chars < att.lines || cs.chars < cs.lines {
        return Err(mismatch());
    }
    let lines_agree = match att.chars.cmp(&cs.chars) {
        std::cmp::Ordering::Less => att.lines <= cs.lines,
        std::cmp::Ordering::Greater => att.lines >= cs.lines,
        std::cmp::Ordering::Equal => att.lines == cs.lines,
    };
    if !lines_agree {
        return Err(mismatch());
    }

    let kind = match (att.kind, cs.kind) {
        (OpKind::Insert, OpKind::Keep) => Some(OpKind::Insert),
        (OpKind::Keep, OpKind::Delete) => Some(OpKind::Delete),
        (OpKind::Keep, OpKind::Keep) => Some(OpKind::Keep),
        _ => None,
    };
    let attribs = match kind {
        None => String::new(),
        Some(OpKind::Delete) => cs.attribs.clone(),
        Some(_) => compose_attributes(&att.attribs, &cs.attribs, att.kind == OpKind::Keep, pool)?,
    };

    // ties consume the attribution side
    let att_consumed = att.chars <= cs.chars;
    let (chars, lines) = if att_consumed {
        (att.chars, att.lines)
    } else {
        (cs.chars, cs.lines)
    };
    if att_consumed {
        cs.shrink(chars, lines)?;
        let exhausted = cs.chars == 0;
        *att_slot = None;
        if exhausted {
            *cs_slot = None;
        }
    } else {
        att.shrink(chars, lines)?;
        *cs_slot = None;
    }

    Ok(kind.map(|kind| Op::new(kind, chars, lines, attribs)))
}

// ─── Applying to attribution ────────────────────────────────────────

/// Apply `cs` to the attribution string of the document it edits.
pub fn apply_to_attribution(cs: &Changeset, astr: &str, pool: &mut AttributePool) -> Result<String> {
    let ops = apply_zip(parse_ops(astr)?, cs.ops.clone(), |att, op| {
        slicer_zipper(att, op, pool)
    })?;
    Ok(serialize_ops(&ops))
}

/// Apply `cs` to both the text and the attribution of `atext`.
pub fn apply_to_atext(cs: &Changeset, atext: &AText, pool: &mut AttributePool) -> Result<AText> {
    Ok(AText {
        text: apply_to_text(cs, &atext.text)?,
        attribs: apply_to_attribution(cs, &atext.attribs, pool)?,
    })
}

/// Apply `cs` to per-line attribution strings, in place. Untouched
/// lines are skipped without being parsed.
pub fn mutate_attribution_lines(
    cs: &Changeset,
    alines: &mut Vec<String>,
    pool: &mut AttributePool,
) -> Result<()> {
    let mut cs_ops = cs.ops.iter().cloned().peekable();
    let mut bank = CharCursor::new(&cs.char_bank);
    let mut m = TextLinesMutator::new(alines);
    let mut line_ops: VecDeque<Op> = VecDeque::new();
    let mut line_assem: Option<MergingOpAssembler> = None;
    let mut cs_op: Option<Op> = None;
    let mut att_op: Option<Op> = None;

    while cs_op.is_some()
        || cs_ops.peek().is_some()
        || att_op.is_some()
        || !line_ops.is_empty()
        || m.has_more()
    {
        if cs_op.is_none() {
            cs_op = cs_ops.next();
        }
        if cs_op.is_none() && att_op.is_none() && line_assem.is_none() && line_ops.is_empty() {
            break;
        }
        let idle = att_op.is_none() && line_assem.is_none() && line_ops.is_empty();
        match cs_op.as_mut() {
            Some(op)
                if op.kind == OpKind::Keep && op.lines > 0 && op.attribs.is_empty() && idle =>
            {
                m.skip_lines(op.lines, false);
                cs_op = None;
            }
            Some(op) if op.kind == OpKind::Insert => {
                let mut out = op.clone();
                if op.lines > 1 {
                    let first_line = bank.chars_through_newline().ok_or_else(|| {
                        ChangesetError::MultilineInsertWithoutNewline
                    })?;
                    op.shrink(first_line, 1)?;
                    out.chars = first_line;
                    out.lines = 1;
                } else {
                    cs_op = None;
                }
                bank.skip(out.chars)?;
                push_attribution_op(out, &mut line_assem, &mut m)?;
            }
            _ => {
                if att_op.is_none() {
                    att_op = next_attribution_op(&mut line_ops, &mut m)?;
                }
                if let Some(out) = slicer_zipper(&mut att_op, &mut cs_op, pool)? {
                    push_attribution_op(out, &mut line_assem, &mut m)?;
                }
            }
        }
    }

    if line_assem.is_some() {
        return Err(ChangesetError::InvalidArgument(format!(
            "attribution line left unterminated by {cs}"
        )));
    }
    m.close();
    Ok(())
}

fn next_attribution_op(
    line_ops: &mut VecDeque<Op>,
    m: &mut TextLinesMutator<'_>,
) -> Result<Option<Op>> {
    if line_ops.is_empty() && m.has_more() {
        let line = m.remove_lines(1);
        line_ops.extend(parse_ops(&line)?);
    }
    Ok(line_ops.pop_front())
}

fn push_attribution_op(
    op: Op,
    line_assem: &mut Option<MergingOpAssembler>,
    m: &mut TextLinesMutator<'_>,
) -> Result<()> {
    let lines = op.lines;
    let serialized = op.to_string();
    let assem = line_assem.get_or_insert_with(MergingOpAssembler::new);
    assem.append(op);
    match lines {
        0 => Ok(()),
        1 => {
            let line = assem.serialize();
            *line_assem = None;
            m.insert(&line, 1);
            Ok(())
        }
        _ => Err(ChangesetError::LineCountMismatch(
            serialized,
            "a single attribution line".into(),
        )),
    }
}

// ─── Compose and follow ─────────────────────────────────────────────

/// A changeset equivalent to applying `cs1` and then `cs2`.
pub fn compose(cs1: &Changeset, cs2: &Changeset, pool: &mut AttributePool) -> Result<Changeset> {
    if cs1.new_len != cs2.old_len {
        return Err(ChangesetError::ComposeMismatch {
            new_len: cs1.new_len,
            old_len: cs2.old_len,
        });
    }
    let mut bank1 = CharCursor::new(&cs1.char_bank);
    let mut bank2 = CharCursor::new(&cs2.char_bank);
    let mut bank = String::new();

    let ops = apply_zip(cs1.ops.clone(), cs2.ops.clone(), |op1, op2| {
        let kind1 = op1.as_ref().map(|op| op.kind);
        let kind2 = op2.as_ref().map(|op| op.kind);
        if kind1 == Some(OpKind::Insert) && kind2 == Some(OpKind::Delete) {
            // deleted before it was ever seen
            let chars1 = op1.as_ref().map_or(0, |op| op.chars);
            let chars2 = op2.as_ref().map_or(0, |op| op.chars);
            bank1.skip(chars1.min(chars2))?;
        }
        let out = slicer_zipper(op1, op2, pool)?;
        if let Some(op) = &out {
            if op.kind == OpKind::Insert {
                let source = if kind2 == Some(OpKind::Insert) {
                    &mut bank2
                } else {
                    &mut bank1
                };
                bank.push_str(source.take(op.chars)?);
            }
        }
        Ok(out)
    })?;

    Ok(Changeset::new(cs1.old_len, cs2.new_len, ops, bank))
}

struct Follower<'a> {
    chars1: CharCursor<'a>,
    chars2: CharCursor<'a>,
    insert_first: AttributeTester,
    reverse_insert_order: bool,
    old_pos: usize,
    new_len: usize,
}

impl Follower<'_> {
    /// Which insert goes first when both sides insert at one position.
    fn side_one_first(&self, op1: Option<&Op>, op2: Option<&Op>) -> bool {
        let (op1, op2) = match (op1, op2) {
            (Some(a), Some(b)) if a.kind == OpKind::Insert && b.kind == OpKind::Insert => (a, b),
            (_, op2) => return op2.map_or(true, |op| op.kind != OpKind::Insert),
        };
        let first1 = self.insert_first.matches(&op1.attribs);
        let first2 = self.insert_first.matches(&op2.attribs);
        if first1 != first2 {
            return first1;
        }
        // keep lines whole: text not starting with a newline goes first
        let newline1 = self.chars1.peek_char() == Some('\n');
        let newline2 = self.chars2.peek_char() == Some('\n');
        if newline1 != newline2 {
            return newline2;
        }
        !self.reverse_insert_order
    }

    fn step(
        &mut self,
        slot1: &mut Option<Op>,
        slot2: &mut Option<Op>,
        pool: &mut AttributePool,
    ) -> Result<Option<Op>> {
        let kind1 = slot1.as_ref().map(|op| op.kind);
        let kind2 = slot2.as_ref().map(|op| op.kind);

        let out = if kind1 == Some(OpKind::Insert) || kind2 == Some(OpKind::Insert) {
            if self.side_one_first(slot1.as_ref(), slot2.as_ref()) {
                let Some(op1) = slot1.take() else {
                    return Ok(None);
                };
                self.chars1.skip(op1.chars)?;
                Some(Op::keep(op1.chars, op1.lines))
            } else {
                let Some(op2) = slot2.take() else {
                    return Ok(None);
                };
                self.chars2.skip(op2.chars)?;
                Some(op2)
            }
        } else if kind1 == Some(OpKind::Delete) {
            let (chars1, lines1) = chars_and_lines(slot1);
            match slot2.as_mut() {
                None => *slot1 = None,
                Some(op2) if chars1 <= op2.chars => {
                    op2.shrink(chars1, lines1)?;
                    let exhausted = op2.chars == 0;
                    *slot1 = None;
                    if exhausted {
                        *slot2 = None;
                    }
                }
                Some(op2) => {
                    let (chars2, lines2) = (op2.chars, op2.lines);
                    *slot2 = None;
                    if let Some(op1) = slot1.as_mut() {
                        op1.shrink(chars2, lines2)?;
                    }
                }
            }
            None
        } else if kind2 == Some(OpKind::Delete) {
            let Some(mut out) = slot2.clone() else {
                return Ok(None);
            };
            match slot1.as_mut() {
                None => *slot2 = None,
                Some(op1) if out.chars <= op1.chars => {
                    op1.shrink(out.chars, out.lines)?;
                    let exhausted = op1.chars == 0;
                    *slot2 = None;
                    if exhausted {
                        *slot1 = None;
                    }
                }
                Some(op1) => {
                    let (chars1, lines1) = (op1.chars, op1.lines);
                    *slot1 = None;
                    out.chars = chars1;
                    out.lines = lines1;
                    if let Some(op2) = slot2.as_mut() {
                        op2.shrink(chars1, lines1)?;
                    }
                }
            }
            Some(out)
        } else if kind1.is_none() {
            slot2.take()
        } else if kind2.is_none() {
            // keeps past the end of the other side carry no attributes
            *slot1 = None;
            None
        } else {
            let (Some(op1), Some(op2)) = (slot1.as_mut(), slot2.as_mut()) else {
                return Ok(None);
            };
            let attribs = follow_attributes(&op1.attribs, &op2.attribs, pool)?;
            if op1.chars <= op2.chars {
                let out = Op::new(OpKind::Keep, op1.chars, op1.lines, attribs);
                op2.shrink(op1.chars, op1.lines)?;
                let exhausted = op2.chars == 0;
                *slot1 = None;
                if exhausted {
                    *slot2 = None;
                }
                Some(out)
            } else {
                let out = Op::new(OpKind::Keep, op2.chars, op2.lines, attribs);
                op1.shrink(op2.chars, op2.lines)?;
                *slot2 = None;
                Some(out)
            }
        };

        if let Some(op) = &out {
            match op.kind {
                OpKind::Keep => {
                    self.old_pos += op.chars;
                    self.new_len += op.chars;
                }
                OpKind::Delete => self.old_pos += op.chars,
                OpKind::Insert => self.new_len += op.chars,
            }
        }
        Ok(out)
    }
}

fn chars_and_lines(slot: &Option<Op>) -> (usize, usize) {
    slot.as_ref().map_or((0, 0), |op| (op.chars, op.lines))
}

/// Rebase `cs2` so it applies after `cs1`; both must start from the
/// same document. When both insert at one position, `reverse_insert_order`
/// places `cs2`'s text first.
pub fn follow(
    cs1: &Changeset,
    cs2: &Changeset,
    reverse_insert_order: bool,
    pool: &mut AttributePool,
) -> Result<Changeset> {
    if cs1.old_len != cs2.old_len {
        return Err(ChangesetError::FollowMismatch {
            left: cs1.old_len,
            right: cs2.old_len,
        });
    }
    let old_len = cs1.new_len;
    let mut follower = Follower {
        chars1: CharCursor::new(&cs1.char_bank),
        chars2: CharCursor::new(&cs2.char_bank),
        insert_first: AttributeTester::new(&Attribute::new("insertorder", "first"), pool),
        reverse_insert_order,
        old_pos: 0,
        new_len: 0,
    };

    let ops = apply_zip(cs1.ops.clone(), cs2.ops.clone(), |op1, op2| {
        follower.step(op1, op2, pool)
    })?;

    let tail = old_len
        .checked_sub(follower.old_pos)
        .ok_or(ChangesetError::PastEnd {
            pos: follower.old_pos,
            len: old_len,
        })?;
    Ok(Changeset::new(
        old_len,
        follower.new_len + tail,
        ops,
        cs2.char_bank.clone(),
    ))
}

// ─── Construction helpers ───────────────────────────────────────────

/// Replace `ndel` chars of `orig` at `start` with `ins` carrying
/// `attribs`. `start` and `ndel` are clamped to the text.
pub fn make_splice(
    orig: &str,
    start: usize,
    ndel: usize,
    ins: &str,
    attribs: &[Attribute],
    pool: &mut AttributePool,
) -> Result<Changeset> {
    let orig_len = char_len(orig);
    let start = start.min(orig_len);
    let ndel = ndel.min(orig_len - start);
    let ins_len = char_len(ins);

    let insert_attribs = attribs_for_op(OpKind::Insert, attribs, pool);
    let mut assem = SmartOpAssembler::new();
    for op in ops_from_text(OpKind::Keep, char_prefix(orig, start), "")
        .into_iter()
        .chain(ops_from_text(OpKind::Delete, char_slice(orig, start, start + ndel), ""))
        .chain(ops_from_text(OpKind::Insert, ins, &insert_attribs))
    {
        assem.append(op);
    }
    assem.end_document();

    Ok(Changeset::new(
        orig_len,
        orig_len + ins_len - ndel,
        assem.finish(),
        ins,
    ))
}

/// Re-key an attribute string from `old_pool` into `new_pool`. References
/// missing from `old_pool` are dropped.
pub fn move_attribs_to_new_pool(
    attribs: &str,
    old_pool: &AttributePool,
    new_pool: &mut AttributePool,
) -> Result<String> {
    if attribs.is_empty() {
        return Ok(String::new());
    }
    let mut nums = Vec::new();
    for num in decode_attribs(attribs)? {
        if let Ok(attr) = old_pool.get_attrib(num) {
            nums.push(new_pool.put_attrib(attr.clone()));
        }
    }
    Ok(encode_attribs(&nums))
}

/// Re-key every op of `cs` from `old_pool` into `new_pool`, keeping the
/// order of attributes within each op.
pub fn move_ops_to_new_pool(
    cs: &Changeset,
    old_pool: &AttributePool,
    new_pool: &mut AttributePool,
) -> Result<Changeset> {
    let mut moved = cs.clone();
    for op in &mut moved.ops {
        op.attribs = move_attribs_to_new_pool(&op.attribs, old_pool, new_pool)?;
    }
    Ok(moved)
}

/// Translate `cs` into a fresh pool holding only what it references.
pub fn prepare_for_wire(cs: &Changeset, pool: &AttributePool) -> Result<(Changeset, AttributePool)> {
    let mut wire_pool = AttributePool::new();
    let translated = move_ops_to_new_pool(cs, pool, &mut wire_pool)?;
    Ok((translated, wire_pool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atext::{split_attribution_lines, split_text_lines};

    fn cs(s: &str) -> Changeset {
        s.parse().unwrap()
    }

    fn bold_pool() -> AttributePool {
        let mut pool = AttributePool::new();
        pool.put_attrib(Attribute::new("bold", ""));
        pool.put_attrib(Attribute::new("bold", "true"));
        pool
    }

    #[test]
    fn test_unpack_and_pack() {
        let parsed = cs("Z:5>3|1=2=1+3$abc");
        assert_eq!(parsed.old_len, 5);
        assert_eq!(parsed.new_len, 8);
        assert_eq!(parsed.char_bank, "abc");
        assert_eq!(parsed.pack(), "Z:5>3|1=2=1+3$abc");

        let shrink = cs("Z:a<4-4$");
        assert_eq!(shrink.new_len, 6);
        assert_eq!(shrink.to_string(), "Z:a<4-4$");
    }

    #[test]
    fn test_unpack_rejects_bad_header() {
        for bad in ["", "Y:1>0$", "Z:1>0", "Z:>0$", "Z:1<2$", "Z:1!0$"] {
            assert!(
                matches!(Changeset::unpack(bad), Err(ChangesetError::MalformedHeader(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_bank_may_contain_dollar() {
        let parsed = cs("Z:1>2+2$$a");
        assert_eq!(parsed.char_bank, "$a");
        assert_eq!(apply_to_text(&parsed, "\n").unwrap(), "$a\n");
    }

    #[test]
    fn test_identity() {
        let id = Changeset::identity(7);
        assert!(id.is_identity());
        assert_eq!(id.pack(), "Z:7>0$");
        assert_eq!(apply_to_text(&id, "abcdef\n").unwrap(), "abcdef\n");
    }

    #[test]
    fn test_check_rep_accepts_canonical() {
        for ok in ["Z:5>3|1=2=1+3$abc", "Z:1>3+3$abc", "Z:4<2=1-2$", "Z:2>1+1*0|1=2$x"] {
            check_rep(&cs(ok)).unwrap();
            assert_eq!(Changeset::unpack_checked(ok).unwrap().pack(), ok);
        }
    }

    #[test]
    fn test_check_rep_failures() {
        assert_eq!(
            check_rep(&cs("Z:1>3+3$ab")),
            Err(ChangesetError::NotEnoughChars { wanted: 3, remaining: 2 })
        );
        assert_eq!(
            check_rep(&cs("Z:1>2+2$a\n")),
            Err(ChangesetError::NewlineMismatch { opcode: '+' })
        );
        assert_eq!(
            check_rep(&cs("Z:1>2|1+2$\na")),
            Err(ChangesetError::MultilineInsertWithoutNewline)
        );
        assert!(matches!(check_rep(&cs("Z:2>0=3$")), Err(ChangesetError::PastEnd { .. })));
        assert!(matches!(
            check_rep(&cs("Z:2>2+1$a")),
            Err(ChangesetError::LengthMismatch { .. })
        ));
        assert_eq!(check_rep(&cs("Z:2>1+1$ab")), Err(ChangesetError::ExcessCharBank));
        // insert before delete and a trailing keep are both non-canonical
        assert!(matches!(
            check_rep(&cs("Z:2>0+1-1$a")),
            Err(ChangesetError::NonCanonical(_))
        ));
        assert!(matches!(
            check_rep(&cs("Z:2>1+1=2$a")),
            Err(ChangesetError::NonCanonical(_))
        ));
        assert!(matches!(
            Changeset::unpack_checked("Z:02>1+1$a"),
            Err(ChangesetError::NonCanonical(_))
        ));
    }

    #[test]
    fn test_apply_to_text() {
        assert_eq!(
            apply_to_text(&cs("Z:5>3|1=2=1+3$abc"), "x\nyz\n").unwrap(),
            "x\nyabcz\n"
        );
        assert_eq!(apply_to_text(&cs("Z:4<2=1-2$"), "abcd").unwrap(), "ad");
    }

    #[test]
    fn test_apply_to_text_errors() {
        assert_eq!(
            apply_to_text(&cs("Z:3>0$"), "ab"),
            Err(ChangesetError::LengthMismatch { expected: 3, actual: 2 })
        );
        assert_eq!(
            apply_to_text(&cs("Z:3<1-1$"), "\nab"),
            Err(ChangesetError::NewlineMismatch { opcode: '-' })
        );
        assert_eq!(
            apply_to_text(&cs("Z:3>0|1=2$"), "abc"),
            Err(ChangesetError::NewlineMismatch { opcode: '=' })
        );
    }

    #[test]
    fn test_apply_counts_scalar_values() {
        let splice = cs("Z:3>2=1+2$ßü");
        assert_eq!(apply_to_text(&splice, "äö\n").unwrap(), "äßüö\n");
    }

    #[test]
    fn test_mutate_text_lines_matches_apply() {
        let text = "abc\ndef\nghi\n";
        let change = cs("Z:c>2=1-2+1|1=1=1|1+2+1$x1\n2");
        let expected = apply_to_text(&change, text).unwrap();
        let mut lines = split_text_lines(text);
        mutate_text_lines(&change, &mut lines).unwrap();
        assert_eq!(lines.concat(), expected);
        assert_eq!(lines, vec!["ax\n", "d1\n", "2ef\n", "ghi\n"]);
    }

    #[test]
    fn test_apply_to_attribution() {
        let mut pool = bold_pool();
        let bolded = apply_to_attribution(&cs("Z:4>0*1=2$"), "|1+4", &mut pool).unwrap();
        assert_eq!(bolded, "*1+2|1+2");
        let unbolded = apply_to_attribution(&cs("Z:4>0=1*0=1$"), &bolded, &mut pool).unwrap();
        assert_eq!(unbolded, "*1+1|1+3");
    }

    #[test]
    fn test_mutate_attribution_lines_matches_flat_apply() {
        let mut pool = bold_pool();
        let atext = AText::new("ab\ncd\nef\n", Some("|3+9".into()));
        let change = cs("Z:9>2|1=3=1*1+2*1=1$xy");
        let flat = apply_to_atext(&change, &atext, &mut pool).unwrap();

        let mut alines = split_attribution_lines(&atext.attribs, &atext.text).unwrap();
        mutate_attribution_lines(&change, &mut alines, &mut pool).unwrap();
        assert_eq!(
            alines,
            split_attribution_lines(&flat.attribs, &flat.text).unwrap()
        );
    }

    #[test]
    fn test_compose_attribute_flip() {
        let mut pool = bold_pool();
        let composed = compose(&cs("Z:2>1*1+1*1=1$x"), &cs("Z:3>0*0|1=3$"), &mut pool).unwrap();
        assert_eq!(composed.pack(), "Z:2>1+1*0|1=2$x");
    }

    #[test]
    fn test_compose_insert_then_delete() {
        let mut pool = AttributePool::new();
        let a = cs("Z:1>3+3$abc");
        let b = cs("Z:4<2=1-2$");
        let composed = compose(&a, &b, &mut pool).unwrap();
        assert_eq!(composed.pack(), "Z:1>1+1$a");
        assert_eq!(apply_to_text(&composed, "\n").unwrap(), "a\n");
    }

    #[test]
    fn test_compose_length_mismatch() {
        let mut pool = AttributePool::new();
        assert_eq!(
            compose(&cs("Z:1>1+1$a"), &cs("Z:3>0$"), &mut pool),
            Err(ChangesetError::ComposeMismatch { new_len: 2, old_len: 3 })
        );
    }

    #[test]
    fn test_follow_concurrent_inserts() {
        let mut pool = AttributePool::new();
        let a = cs("Z:6>3|2=4=1+3$def");
        let b = cs("Z:6>3|2=4=1+3$ghi");

        let b_after_a = follow(&a, &b, false, &mut pool).unwrap();
        assert_eq!(b_after_a.pack(), "Z:9>3|2=4=4+3$ghi");
        let a_after_b = follow(&b, &a, true, &mut pool).unwrap();
        assert_eq!(a_after_b.pack(), "Z:9>3|2=4=1+3$def");

        let left = compose(&a, &b_after_a, &mut pool).unwrap();
        let right = compose(&b, &a_after_b, &mut pool).unwrap();
        assert_eq!(left, right);
        assert_eq!(left.pack(), "Z:6>6|2=4=1+6$defghi");
    }

    #[test]
    fn test_follow_delete_overlap() {
        let mut pool = AttributePool::new();
        let base = "abcdef\n";
        let a = cs("Z:7<3=1-3$");
        let b = cs("Z:7<2=2-2$");
        let b2 = follow(&a, &b, false, &mut pool).unwrap();
        let a2 = follow(&b, &a, true, &mut pool).unwrap();
        let left = apply_to_text(&b2, &apply_to_text(&a, base).unwrap()).unwrap();
        let right = apply_to_text(&a2, &apply_to_text(&b, base).unwrap()).unwrap();
        assert_eq!(left, "aef\n");
        assert_eq!(left, right);
    }

    #[test]
    fn test_follow_newline_insert_goes_last() {
        let mut pool = AttributePool::new();
        let a = cs("Z:1>1|1+1$\n");
        let b = cs("Z:1>1+1$x");
        let b2 = follow(&a, &b, false, &mut pool).unwrap();
        let text = apply_to_text(&b2, &apply_to_text(&a, "\n").unwrap()).unwrap();
        assert_eq!(text, "x\n\n");
    }

    #[test]
    fn test_follow_insertorder_first_wins() {
        let mut pool = AttributePool::new();
        let first = pool.put_attrib(Attribute::new("insertorder", "first"));
        let a = cs("Z:1>1+1$a");
        let b = cs(&format!("Z:1>1*{}+1$b", num_to_string(first)));
        let b2 = follow(&a, &b, false, &mut pool).unwrap();
        let text = apply_to_text(&b2, &apply_to_text(&a, "\n").unwrap()).unwrap();
        assert_eq!(text, "ba\n");
    }

    #[test]
    fn test_follow_mismatch() {
        let mut pool = AttributePool::new();
        assert_eq!(
            follow(&cs("Z:1>0$"), &cs("Z:2>0$"), false, &mut pool),
            Err(ChangesetError::FollowMismatch { left: 1, right: 2 })
        );
    }

    #[test]
    fn test_make_splice_at_end() {
        let mut pool = AttributePool::new();
        let splice = make_splice("123", 3, 0, "456", &[], &mut pool).unwrap();
        assert_eq!(splice.old_len, 3);
        assert_eq!(splice.new_len, 6);
        assert_eq!(apply_to_text(&splice, "123").unwrap(), "123456");
        check_rep(&splice).unwrap();
        assert_eq!(splice.pack(), "Z:3>3=3+3$456");
    }

    #[test]
    fn test_make_splice_clamps_and_attributes() {
        let mut pool = AttributePool::new();
        let splice = make_splice(
            "ab\ncd\n",
            1,
            100,
            "Z\n",
            &[Attribute::author("a.x")],
            &mut pool,
        )
        .unwrap();
        assert_eq!(splice.pack(), "Z:6<3=1|2-5*0|1+2$Z\n");
        assert_eq!(apply_to_text(&splice, "ab\ncd\n").unwrap(), "aZ\n");
        assert_eq!(pool.get_attrib(0).unwrap(), &Attribute::author("a.x"));
    }

    #[test]
    fn test_move_ops_to_new_pool() {
        let mut old = AttributePool::new();
        old.put_attrib(Attribute::new("bold", "true"));
        old.put_attrib(Attribute::author("a.1"));
        let mut new = AttributePool::new();
        new.put_attrib(Attribute::author("a.1"));

        let moved = move_ops_to_new_pool(&cs("Z:1>1*0*1+1*5=1$x"), &old, &mut new).unwrap();
        assert_eq!(moved.pack(), "Z:1>1*1*0+1=1$x");
        assert_eq!(new.get_attrib(1).unwrap(), &Attribute::new("bold", "true"));
    }

    #[test]
    fn test_prepare_for_wire_only_referenced() {
        let mut pool = AttributePool::new();
        for i in 0..5 {
            pool.put_attrib(Attribute::new("k", i.to_string()));
        }
        let (wire, wire_pool) = prepare_for_wire(&cs("Z:1>1*4+1$x"), &pool).unwrap();
        assert_eq!(wire.pack(), "Z:1>1*0+1$x");
        assert_eq!(wire_pool.len(), 1);
        assert_eq!(wire_pool.get_attrib(0).unwrap(), &Attribute::new("k", "4"));
    }
}
