//! In-place editing of a line array.
//!
//! ```text
//!   lines:  [ l0 ][ l1 ][ l2 ][ l3 ][ l4 ]
//!                   ▲ start
//!                   ├── delete_count ──┤
//!   splice:         [ n0 ][ n1 ]            replacement lines
//! ```
//!
//! Edits accumulate in a single staged splice that is written back when the
//! cursor leaves it or on [`TextLinesMutator::close`]. Each line ends in
//! `\n` except possibly the last. Columns count scalar values.

use crate::cursor::{char_len, char_prefix, char_suffix};

/// Split text into lines, each keeping its trailing `\n`.
pub fn split_text_lines(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(str::to_string).collect()
}

#[derive(Debug, Default)]
struct Splice {
    start: usize,
    delete_count: usize,
    lines: Vec<String>,
}

pub struct TextLinesMutator<'a> {
    lines: &'a mut Vec<String>,
    splice: Splice,
    in_splice: bool,
    cur_line: usize,
    cur_col: usize,
}

impl<'a> TextLinesMutator<'a> {
    pub fn new(lines: &'a mut Vec<String>) -> Self {
        Self {
            lines,
            splice: Splice::default(),
            in_splice: false,
            cur_line: 0,
            cur_col: 0,
        }
    }

    fn line_at(&self, idx: usize) -> String {
        self.lines.get(idx).cloned().unwrap_or_default()
    }

    fn lines_concat(&self, start: usize, count: usize) -> String {
        let from = start.min(self.lines.len());
        let to = (start + count).min(self.lines.len());
        self.lines[from..to].concat()
    }

    fn enter_splice(&mut self) {
        self.splice.start = self.cur_line;
        self.splice.delete_count = 0;
        self.splice.lines.clear();
        if self.cur_col > 0 {
            self.put_cur_line_in_splice();
        }
        self.in_splice = true;
    }

    fn leave_splice(&mut self) {
        let splice = std::mem::take(&mut self.splice);
        let from = splice.start.min(self.lines.len());
        let to = (splice.start + splice.delete_count).min(self.lines.len());
        self.lines.splice(from..to, splice.lines);
        self.in_splice = false;
    }

    fn is_cur_line_in_splice(&self) -> bool {
        self.cur_line >= self.splice.start
            && self.cur_line - self.splice.start < self.splice.lines.len()
    }

    /// Make sure the current line is staged; returns its index in the splice.
    fn put_cur_line_in_splice(&mut self) -> usize {
        if !self.is_cur_line_in_splice() {
            let line = self.line_at(self.splice.start + self.splice.delete_count);
            self.splice.lines.push(line);
            self.splice.delete_count += 1;
        }
        let idx = self.cur_line.saturating_sub(self.splice.start);
        while self.splice.lines.len() <= idx {
            self.splice.lines.push(String::new());
        }
        idx
    }

    pub fn skip_lines(&mut self, count: usize, include_in_splice: bool) {
        if count == 0 {
            return;
        }
        if include_in_splice {
            if !self.in_splice {
                self.enter_splice();
            }
            for _ in 0..count {
                self.cur_col = 0;
                self.put_cur_line_in_splice();
                self.cur_line += 1;
            }
        } else {
            if self.in_splice {
                if count > 1 {
                    self.leave_splice();
                } else {
                    self.put_cur_line_in_splice();
                }
            }
            self.cur_line += count;
            self.cur_col = 0;
        }
    }

    pub fn skip(&mut self, chars: usize, lines: usize, include_in_splice: bool) {
        if chars == 0 {
            return;
        }
        if lines > 0 {
            self.skip_lines(lines, include_in_splice);
        } else {
            if include_in_splice && !self.in_splice {
                self.enter_splice();
            }
            if self.in_splice {
                // the line is staged but the cursor stays on it
                self.put_cur_line_in_splice();
            }
            self.cur_col += chars;
        }
    }

    /// Remove `count` whole lines starting at the cursor column.
    pub fn remove_lines(&mut self, count: usize) -> String {
        if count == 0 {
            return String::new();
        }
        if !self.in_splice {
            self.enter_splice();
        }
        let next_start = self.splice.start + self.splice.delete_count;
        if self.is_cur_line_in_splice() {
            if self.cur_col == 0 {
                let mut removed = self.splice.lines.pop().unwrap_or_default();
                removed.push_str(&self.lines_concat(next_start, count - 1));
                self.splice.delete_count += count - 1;
                removed
            } else {
                let tail = self.lines_concat(next_start, count - 1);
                self.splice.delete_count += count - 1;
                let joined = self.line_at(self.splice.start + self.splice.delete_count);
                let col = self.cur_col;
                let last = self.splice.lines.len() - 1;
                let line = std::mem::take(&mut self.splice.lines[last]);
                let mut removed = char_suffix(&line, col).to_string();
                removed.push_str(&tail);
                self.splice.lines[last] = format!("{}{}", char_prefix(&line, col), joined);
                self.splice.delete_count += 1;
                removed
            }
        } else {
            let removed = self.lines_concat(next_start, count);
            self.splice.delete_count += count;
            removed
        }
    }

    /// Remove `chars` characters spanning `lines` newlines.
    pub fn remove(&mut self, chars: usize, lines: usize) -> String {
        if chars == 0 {
            return String::new();
        }
        if lines > 0 {
            return self.remove_lines(lines);
        }
        if !self.in_splice {
            self.enter_splice();
        }
        let idx = self.put_cur_line_in_splice();
        let col = self.cur_col;
        let line = std::mem::take(&mut self.splice.lines[idx]);
        let removed = crate::cursor::char_slice(&line, col, col + chars).to_string();
        self.splice.lines[idx] = format!(
            "{}{}",
            char_prefix(&line, col),
            char_suffix(&line, col + chars)
        );
        removed
    }

    /// Insert `text` containing `lines` newlines at the cursor.
    pub fn insert(&mut self, text: &str, lines: usize) {
        if text.is_empty() {
            return;
        }
        if !self.in_splice {
            self.enter_splice();
        }
        if lines > 0 {
            let mut new_lines = split_text_lines(text);
            if self.is_cur_line_in_splice() {
                let last = self.splice.lines.len() - 1;
                let the_line = std::mem::take(&mut self.splice.lines[last]);
                let col = self.cur_col;
                let first = new_lines.remove(0);
                self.splice.lines[last] = format!("{}{}", char_prefix(&the_line, col), first);
                self.cur_line += 1;
                self.cur_line += new_lines.len();
                self.splice.lines.extend(new_lines);
                self.splice.lines.push(char_suffix(&the_line, col).to_string());
                self.cur_col = 0;
            } else {
                self.cur_line += new_lines.len();
                self.splice.lines.extend(new_lines);
            }
        } else {
            let idx = self.put_cur_line_in_splice();
            let col = self.cur_col;
            let line = std::mem::take(&mut self.splice.lines[idx]);
            self.splice.lines[idx] = format!(
                "{}{}{}",
                char_prefix(&line, col),
                text,
                char_suffix(&line, col)
            );
            self.cur_col += char_len(text);
        }
    }

    /// True while lines remain at or after the cursor.
    pub fn has_more(&self) -> bool {
        let mut doc_lines = self.lines.len();
        if self.in_splice {
            doc_lines = (doc_lines + self.splice.lines.len()).saturating_sub(self.splice.delete_count);
        }
        self.cur_line < doc_lines
    }

    /// Write back any staged splice.
    pub fn close(mut self) {
        if self.in_splice {
            self.leave_splice();
        }
    }
}
