//! Character sources for the lexer, parser, and regex front-end.
//!
//! A [`Source`] wraps a raw [`InputStream`] with pushback, line/column
//! tracking, and periodic location stubs that let diagnostics reopen the
//! stream near any line without rescanning from the start.

pub mod file_input;
pub mod prompt;
pub mod string_input;

use std::io;

pub use file_input::FileInput;
pub use string_input::StringInput;

/// One read from an input.
///
/// `End` and `Err` are deliberately distinct sentinels: end-of-input is not
/// the same condition as a byte sequence the decoder rejected, and callers
/// react differently to each. An `Err` is reported once at the first
/// undecodable position; reading past it continues with whatever content
/// the decoder recovered.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Chr {
    Char(char),
    End,
    Err,
}

impl Chr {
    #[inline]
    pub fn char(self) -> Option<char> {
        match self {
            Chr::Char(c) => Some(c),
            _ => None,
        }
    }

    #[inline]
    pub fn is_end(self) -> bool {
        matches!(self, Chr::End)
    }
}

/// A span in the source, 1-based lines and columns.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Location {
    pub first_line: u32,
    pub first_column: u32,
    pub last_line: u32,
    pub last_column: u32,
}

impl Default for Location {
    fn default() -> Self {
        Location {
            first_line: 1,
            first_column: 0,
            last_line: 1,
            last_column: 0,
        }
    }
}

impl Location {
    pub fn merge(a: &Location, b: &Location) -> Location {
        Location {
            first_line: a.first_line,
            first_column: a.first_column,
            last_line: b.last_line,
            last_column: b.last_column,
        }
    }
}

/// The raw character producer behind a [`Source`].
pub trait InputStream {
    /// Next decoded character, [`Chr::End`] at end of data, [`Chr::Err`]
    /// once where undecodable bytes were skipped.
    fn next_char(&mut self) -> Chr;

    /// Current byte offset into the decoded text.
    fn tell(&self) -> u64;

    /// A fresh stream over the same data starting at `offset`, used to
    /// render diagnostics.
    fn reopen(&self, offset: u64) -> io::Result<Box<dyn InputStream>>;
}

/// A recorded restart point.
#[derive(Clone, Copy, Debug)]
struct LocStub {
    line: u32,
    column: u32,
    offset: u64,
}

/// Record a stub roughly every this many characters.
const LOC_STUB_INTERVAL: u64 = 4096;

/// Width of a rendered diagnostic line.
const TEXT_LINE_WIDTH: usize = 72;

/// A positioned, pushback-capable character source.
pub struct Source {
    inner: Box<dyn InputStream>,
    name: String,
    pushback: Vec<Chr>,
    line: u32,
    column: u32,
    counter: u64,
    lf_pending: bool,
    stubs: Vec<LocStub>,
    closed: bool,
}

impl Source {
    pub fn new(name: impl Into<String>, inner: Box<dyn InputStream>) -> Self {
        Source {
            inner,
            name: name.into(),
            pushback: Vec::new(),
            line: 1,
            column: 0,
            counter: 0,
            lf_pending: false,
            stubs: Vec::new(),
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads one character, maintaining the line/column counters. A newline
    /// bumps the line lazily, on the read that follows it, so the newline
    /// itself is still reported on the line it ends.
    pub fn get_char(&mut self) -> Chr {
        debug_assert!(!self.closed);

        if self.lf_pending {
            self.lf_pending = false;
            self.line += 1;
            self.column = 0;
        }

        let (c, offset) = match self.pushback.pop() {
            Some(c) => (c, 0),
            None => {
                let record = (self.counter + 1) % LOC_STUB_INTERVAL == 0;
                let off = if record { self.inner.tell() } else { 0 };
                (self.inner.next_char(), off)
            }
        };

        if let Chr::Char(ch) = c {
            self.column += 1;
            self.counter += 1;

            if offset != 0 {
                self.add_stub(offset);
            }

            if ch == '\n' {
                self.lf_pending = true;
            }
        }

        c
    }

    /// Pushes a character back; the next [`Source::get_char`] returns it.
    /// Sentinels are ignored, like the C runtime ignored negative pushback.
    pub fn unget_char(&mut self, c: Chr) {
        if let Chr::Char(_) = c {
            self.lf_pending = false;
            self.column = self.column.saturating_sub(1);
            self.counter = self.counter.saturating_sub(1);
            self.pushback.push(c);
        }
    }

    /// Current (line, column) of the last read character.
    pub fn loc(&self) -> (u32, u32) {
        (self.line, self.column)
    }

    pub fn store_first_loc(&self, loc: &mut Location) {
        let (l, c) = self.loc();
        loc.first_line = l;
        loc.first_column = c;
    }

    pub fn store_last_loc(&self, loc: &mut Location) {
        let (l, c) = self.loc();
        loc.last_line = l;
        loc.last_column = c;
    }

    pub fn here(&self) -> Location {
        let (l, c) = self.loc();
        Location {
            first_line: l,
            first_column: c,
            last_line: l,
            last_column: c,
        }
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    fn add_stub(&mut self, offset: u64) {
        if let Some(last) = self.stubs.last()
            && last.line == self.line
            && last.column == self.column
        {
            return;
        }
        self.stubs.push(LocStub {
            line: self.line,
            column: self.column,
            offset,
        });
    }

    /// Closest recorded restart point at or before (line, col).
    fn lookup_stub(&self, line: u32, col: u32) -> (u32, u32, u64) {
        let at = self
            .stubs
            .partition_point(|s| (s.line, s.column) <= (line, col));
        match at.checked_sub(1).and_then(|i| self.stubs.get(i)) {
            Some(s) => (s.line, s.column, s.offset),
            None => (1, 0, 0),
        }
    }

    /// Renders the source line of `loc` plus a `~~~` cursor line, for
    /// diagnostics. Returns nothing when the input cannot be reopened.
    pub fn excerpt(&self, loc: &Location) -> Option<(String, String)> {
        let has_cursor = loc.first_column != 0;
        let sline = loc.first_line;
        let mut scol = if has_cursor { loc.first_column } else { 1 };

        if has_cursor {
            if loc.first_line == loc.last_line {
                if loc.last_column.saturating_sub(loc.first_column) as usize >= TEXT_LINE_WIDTH {
                    scol = loc.first_column;
                } else if loc.last_column as usize > TEXT_LINE_WIDTH {
                    scol = loc.last_column - TEXT_LINE_WIDTH as u32;
                } else {
                    scol = 1;
                }
            } else if scol as usize > TEXT_LINE_WIDTH {
                scol -= TEXT_LINE_WIDTH as u32;
            } else {
                scol = 1;
            }
        }

        let (mut cline, mut ccol, offset) = self.lookup_stub(sline, scol);
        let mut reader = self.inner.reopen(offset).ok()?;

        let cstart = loc.first_column;
        let cend = if loc.first_line == loc.last_line {
            loc.last_column
        } else {
            u32::MAX
        };

        let mut text = String::new();
        let mut cursor = String::new();

        loop {
            let c = reader.next_char();

            if cline < sline || ccol < scol {
                match c {
                    Chr::Char('\n') => {
                        cline += 1;
                        ccol = 1;
                    }
                    Chr::Char(_) => ccol += 1,
                    _ => return None,
                }
                continue;
            }

            if let Chr::Char(ch) = c {
                if ch.is_whitespace() {
                    text.push(' ');
                } else if !ch.is_control() {
                    text.push(ch);
                } else {
                    text.push('X');
                }
            }

            if has_cursor {
                if ccol >= cstart && ccol <= cend {
                    cursor.push('~');
                } else {
                    cursor.push(' ');
                }
            }

            match c {
                Chr::Char('\n') | Chr::End | Chr::Err => break,
                _ => {}
            }

            ccol += 1;
            if ccol.saturating_sub(cstart) as usize >= TEXT_LINE_WIDTH {
                break;
            }
        }

        Some((
            format!("{sline:5} | {}", text.trim_end()),
            if has_cursor {
                format!("      | {}", cursor.trim_end())
            } else {
                String::new()
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_lines_and_columns() {
        let mut src = StringInput::source("t", "ab\ncd");
        assert_eq!(src.get_char(), Chr::Char('a'));
        assert_eq!(src.loc(), (1, 1));
        assert_eq!(src.get_char(), Chr::Char('b'));
        assert_eq!(src.get_char(), Chr::Char('\n'));
        assert_eq!(src.loc(), (1, 3));
        assert_eq!(src.get_char(), Chr::Char('c'));
        assert_eq!(src.loc(), (2, 1));
        assert_eq!(src.get_char(), Chr::Char('d'));
        assert_eq!(src.get_char(), Chr::End);
    }

    #[test]
    fn pushback_restores_position() {
        let mut src = StringInput::source("t", "xy");
        let c = src.get_char();
        assert_eq!(src.loc(), (1, 1));
        src.unget_char(c);
        assert_eq!(src.loc(), (1, 0));
        assert_eq!(src.get_char(), Chr::Char('x'));
        assert_eq!(src.get_char(), Chr::Char('y'));
    }

    #[test]
    fn excerpt_points_at_span() {
        let src = StringInput::source("t", "let x = 1\nlet yy = 2\n");
        let loc = Location {
            first_line: 2,
            first_column: 5,
            last_line: 2,
            last_column: 6,
        };
        let (text, cursor) = src.excerpt(&loc).unwrap();
        assert!(text.contains("let yy = 2"));
        assert!(cursor.contains("~~"));
    }
}
