//! Undo: the changeset that reverts another one.

use std::collections::{HashMap, VecDeque};

use crate::attribute_map::AttributeMap;
use crate::builder::Builder;
use crate::changeset::{check_rep, Changeset};
use crate::cursor::{char_len, char_prefix, char_suffix};
use crate::error::{ChangesetError, Result};
use crate::op::{parse_ops, Op, OpKind};
use crate::pool::AttributePool;

/// Walks the per-line attribution of the document a changeset applies
/// to, handing out attribute runs as the changeset consumes chars.
struct AttribRunReader<'a> {
    alines: &'a [String],
    cur_line: usize,
    cur_char: usize,
    loaded_line: Option<usize>,
    line_ops: VecDeque<Op>,
    next_op: Op,
}

impl<'a> AttribRunReader<'a> {
    fn new(alines: &'a [String]) -> Self {
        Self {
            alines,
            cur_line: 0,
            cur_char: 0,
            loaded_line: None,
            line_ops: VecDeque::new(),
            next_op: Op::insert(0, 0, ""),
        }
    }

    fn load_line(&mut self, line: usize) -> Result<()> {
        let aline = self.alines.get(line).map(String::as_str).unwrap_or("");
        self.line_ops = parse_ops(aline)?.into();
        self.loaded_line = Some(line);
        Ok(())
    }

    /// Feed the next `chars` chars to `f` as `(len, attribs, ends_line)`
    /// runs.
    fn consume<F>(&mut self, mut chars: usize, mut f: F) -> Result<()>
    where
        F: FnMut(usize, &str, bool) -> Result<()>,
    {
        if self.loaded_line != Some(self.cur_line) {
            self.load_line(self.cur_line)?;
            let mut index = 0;
            while let Some(op) = self.line_ops.pop_front() {
                self.next_op = op;
                if index + self.next_op.chars >= self.cur_char {
                    self.next_op.chars -= self.cur_char - index;
                    break;
                }
                index += self.next_op.chars;
            }
        }

        while chars > 0 {
            if self.next_op.chars == 0 && self.line_ops.is_empty() {
                self.cur_line += 1;
                self.cur_char = 0;
                self.load_line(self.cur_line)?;
            }
            if self.next_op.chars == 0 {
                self.next_op = self
                    .line_ops
                    .pop_front()
                    .unwrap_or_else(|| Op::insert(0, 0, ""));
            }
            let used = chars.min(self.next_op.chars);
            if used == 0 {
                return Err(ChangesetError::NotEnoughChars {
                    wanted: chars,
                    remaining: 0,
                });
            }
            let ends_line = used == self.next_op.chars && self.next_op.lines > 0;
            f(used, &self.next_op.attribs, ends_line)?;
            chars -= used;
            self.next_op.chars -= used;
            self.cur_char += used;
        }

        if self.next_op.chars == 0 && self.line_ops.is_empty() {
            self.cur_line += 1;
            self.cur_char = 0;
        }
        Ok(())
    }

    fn skip(&mut self, chars: usize, lines: usize) -> Result<()> {
        if lines > 0 {
            self.cur_line += lines;
            self.cur_char = 0;
        } else if self.loaded_line == Some(self.cur_line) {
            self.consume(chars, |_, _, _| Ok(()))?;
        } else {
            self.cur_char += chars;
        }
        Ok(())
    }
}

/// The next `chars` chars of `lines` from (`line`, `col`).
fn next_text(lines: &[String], line: usize, col: usize, chars: usize) -> Result<String> {
    let first = lines.get(line).map(String::as_str).unwrap_or("");
    let mut text = char_suffix(first, col).to_string();
    let mut len = char_len(&text);
    let mut line_num = line + 1;
    while len < chars {
        let next = lines.get(line_num).ok_or(ChangesetError::NotEnoughChars {
            wanted: chars,
            remaining: len,
        })?;
        len += char_len(next);
        text.push_str(next);
        line_num += 1;
    }
    Ok(char_prefix(&text, chars).to_string())
}

/// Build the changeset that undoes `cs` on the document given as text
/// `lines` and matching attribution `alines` (the state before `cs`).
///
/// Inserts become removals, removals re-insert the original text with its
/// original attributes, and attribute changes on keeps are reverted to the
/// previous values (an empty value where the key was unset).
pub fn inverse(
    cs: &Changeset,
    lines: &[String],
    alines: &[String],
    pool: &mut AttributePool,
) -> Result<Changeset> {
    let mut reader = AttribRunReader::new(alines);
    let mut builder = Builder::new(cs.new_len);

    for op in &cs.ops {
        match op.kind {
            OpKind::Keep if !op.attribs.is_empty() => {
                let applied = AttributeMap::from_attribs(&op.attribs, pool)?;
                let mut undo_cache: HashMap<String, String> = HashMap::new();
                reader.consume(op.chars, |len, old_attribs, ends_line| {
                    let undo = match undo_cache.get(old_attribs) {
                        Some(undo) => undo.clone(),
                        None => {
                            let old = AttributeMap::from_attribs(old_attribs, pool)?;
                            let mut back = AttributeMap::new();
                            for (key, value) in applied.iter() {
                                let old_value = old.get(key).unwrap_or("");
                                if old_value != value {
                                    back.set(key, old_value);
                                }
                            }
                            let undo = back.to_attribs(pool);
                            undo_cache.insert(old_attribs.to_string(), undo.clone());
                            undo
                        }
                    };
                    builder.keep_attribs(len, usize::from(ends_line), undo);
                    Ok(())
                })?;
            }
            OpKind::Keep => {
                reader.skip(op.chars, op.lines)?;
                builder.keep(op.chars, op.lines);
            }
            OpKind::Insert => {
                builder.remove(op.chars, op.lines);
            }
            OpKind::Delete => {
                let text = next_text(lines, reader.cur_line, reader.cur_char, op.chars)?;
                let mut offset = 0;
                reader.consume(op.chars, |len, attribs, _| {
                    let piece = char_prefix(char_suffix(&text, offset), len);
                    builder.insert_attribs(piece, attribs);
                    offset += len;
                    Ok(())
                })?;
            }
        }
    }

    let undo = builder.build()?;
    check_rep(&undo)?;
    Ok(undo)
}
