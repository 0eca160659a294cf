//! The backtracking matcher: a small VM over the compiled command array.

use crate::regex::compile::Cmd;
use crate::regex::{RE_FL_DOT_ALL, RE_FL_IGNORE_CASE, RE_FL_MULTILINE, RE_FL_PERFECT, RE_FL_UNICODE};

/// Byte span of one group; -1/-1 until the group participated.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Slice {
    pub start: isize,
    pub end: isize,
}

impl Slice {
    pub const UNSET: Slice = Slice { start: -1, end: -1 };
}

/// A successful match: byte offsets plus per-group slices.
#[derive(Clone, Debug)]
pub struct ExecMatch {
    pub start: usize,
    pub end: usize,
    pub slices: Vec<Slice>,
}

/// The input contained bytes the unicode mode could not decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadUnicode;

/// A saved backtrack point: cursor, slice-stack window base, resume pc.
#[derive(Clone, Copy, Debug)]
struct State {
    pos: usize,
    sp: usize,
    cp: usize,
}

struct ExecCtxt<'a> {
    cmds: &'a [Cmd],
    group_num: usize,
    flags: u32,
    bytes: &'a [u8],
    start: usize,
    pos: usize,
    /// Current character: a byte, or a code point in unicode mode.
    c: u32,
    slice_stack: Vec<Slice>,
    state_stack: Vec<State>,
}

impl ExecCtxt<'_> {
    fn next_char(&mut self) -> Result<bool, BadUnicode> {
        if self.pos >= self.bytes.len() {
            return Ok(false);
        }

        if self.flags & RE_FL_UNICODE != 0 {
            let rest = &self.bytes[self.pos..];
            let (c, len) = decode_utf8(rest).ok_or(BadUnicode)?;
            self.c = c;
            self.pos += len;
        } else {
            self.c = self.bytes[self.pos] as u32;
            self.pos += 1;
        }
        Ok(true)
    }

    fn prev_char(&mut self) -> Result<bool, BadUnicode> {
        if self.pos == 0 {
            return Ok(false);
        }

        if self.flags & RE_FL_UNICODE != 0 {
            // Step back over continuation bytes to the code point head.
            loop {
                self.pos -= 1;
                if self.bytes[self.pos] & 0xc0 != 0x80 || self.pos == 0 {
                    break;
                }
            }
            let (c, _) = decode_utf8(&self.bytes[self.pos..]).ok_or(BadUnicode)?;
            self.c = c;
        } else {
            self.pos -= 1;
            self.c = self.bytes[self.pos] as u32;
        }
        Ok(true)
    }

    fn match_all(&self) -> bool {
        self.flags & RE_FL_DOT_ALL != 0 || self.c != '\n' as u32
    }

    fn match_char(&self, c: char) -> bool {
        if self.flags & RE_FL_IGNORE_CASE != 0 {
            to_upper(self.c) == to_upper(c as u32)
        } else {
            self.c == c as u32
        }
    }

    fn match_range(&self, min: char, max: char) -> bool {
        let (min, max) = (min as u32, max as u32);
        let alpha = char::from_u32(self.c).is_some_and(|ch| ch.is_alphabetic());
        if self.flags & RE_FL_IGNORE_CASE != 0 && alpha {
            let l = to_lower(self.c);
            if l >= min && l <= max {
                return true;
            }
            let u = to_upper(self.c);
            u >= min && u <= max
        } else {
            self.c >= min && self.c <= max
        }
    }

    fn match_line_start(&self) -> bool {
        if self.pos == 0 {
            return true;
        }
        self.flags & RE_FL_MULTILINE != 0 && self.bytes[self.pos - 1] == b'\n'
    }

    fn match_line_end(&self) -> bool {
        if self.pos == self.bytes.len() {
            return true;
        }
        self.flags & RE_FL_MULTILINE != 0 && self.bytes[self.pos] == b'\n'
    }

    fn match_blank(&self) -> bool {
        let p = if self.pos > 0 {
            is_word(self.bytes[self.pos - 1] as u32)
        } else {
            false
        };
        let n = if self.pos < self.bytes.len() {
            is_word(self.bytes[self.pos] as u32)
        } else {
            false
        };
        p != n
    }

    fn match_back_ref(&mut self, id: usize) -> bool {
        let top = self.state_stack.last().expect("state stack");
        let slice = self.slice_stack[top.sp + id];
        if slice.start < 0 || slice.end < 0 {
            return true;
        }

        let len = (slice.end - slice.start) as usize;
        if self.bytes.len() - self.pos < len {
            return false;
        }
        let a = &self.bytes[slice.start as usize..slice.end as usize];
        let b = &self.bytes[self.pos..self.pos + len];
        if a == b {
            self.pos += len;
            true
        } else {
            false
        }
    }

    fn group_start(&mut self, id: usize) {
        let top = self.state_stack.last().expect("state stack");
        self.slice_stack[top.sp + id].start = self.pos as isize;
    }

    fn group_end(&mut self, id: usize) {
        let top = self.state_stack.last().expect("state stack");
        self.slice_stack[top.sp + id].end = self.pos as isize;
    }

    fn push_state(&mut self, cp: usize) {
        let sp = self.slice_stack.len();
        let prev_sp = self.state_stack.last().map(|s| s.sp);
        self.state_stack.push(State {
            pos: self.pos,
            sp,
            cp,
        });

        match prev_sp {
            None => self
                .slice_stack
                .extend(std::iter::repeat_n(Slice::UNSET, self.group_num)),
            Some(base) => {
                for i in 0..self.group_num {
                    let s = self.slice_stack[base + i];
                    self.slice_stack.push(s);
                }
            }
        }
    }

    fn pop_state(&mut self) {
        debug_assert!(self.state_stack.len() >= 2);
        let st = self.state_stack.pop().expect("state stack");
        self.pos = st.pos;
        self.slice_stack.truncate(st.sp);
    }

    fn push_pos(&mut self) {
        let sp = self.state_stack.last().expect("state stack").sp;
        self.state_stack.push(State {
            pos: self.pos,
            sp,
            cp: 0,
        });
    }

    fn pop_pos(&mut self) {
        debug_assert!(self.state_stack.len() >= 2);
        let st = self.state_stack.pop().expect("state stack");
        self.pos = st.pos;
    }

    /// One anchored attempt from `self.start`.
    fn run(&mut self) -> Result<bool, BadUnicode> {
        let mut cp = 0usize;

        self.pos = self.start;
        self.state_stack.clear();
        self.slice_stack.clear();
        self.push_state(0);

        loop {
            let cmd = self.cmds[cp];
            let step = |ok: bool, cp: &mut usize, miss: usize| {
                if ok {
                    *cp += 1;
                } else {
                    *cp = miss;
                }
            };

            match cmd {
                Cmd::Next { miss } => {
                    let ok = self.next_char()?;
                    step(ok, &mut cp, miss);
                }
                Cmd::Prev { miss } => {
                    let ok = self.prev_char()?;
                    step(ok, &mut cp, miss);
                }
                Cmd::MatchAll { miss } => step(self.match_all(), &mut cp, miss),
                Cmd::MatchChar { c, miss } => step(self.match_char(c), &mut cp, miss),
                Cmd::MatchRange { min, max, miss } => {
                    step(self.match_range(min, max), &mut cp, miss)
                }
                Cmd::MatchLineStart { miss } => step(self.match_line_start(), &mut cp, miss),
                Cmd::MatchLineEnd { miss } => step(self.match_line_end(), &mut cp, miss),
                Cmd::MatchSpace { miss } => step(is_space(self.c), &mut cp, miss),
                Cmd::MatchNotSpace { miss } => step(!is_space(self.c), &mut cp, miss),
                Cmd::MatchDigit { miss } => step(is_digit(self.c), &mut cp, miss),
                Cmd::MatchNotDigit { miss } => step(!is_digit(self.c), &mut cp, miss),
                Cmd::MatchWord { miss } => step(is_word(self.c), &mut cp, miss),
                Cmd::MatchNotWord { miss } => step(!is_word(self.c), &mut cp, miss),
                Cmd::MatchBlank { miss } => step(self.match_blank(), &mut cp, miss),
                Cmd::MatchNotBlank { miss } => step(!self.match_blank(), &mut cp, miss),
                Cmd::MatchBackRef { id, miss } => {
                    let ok = self.match_back_ref(id);
                    step(ok, &mut cp, miss);
                }
                Cmd::GroupStart { id } => {
                    self.group_start(id);
                    cp += 1;
                }
                Cmd::GroupEnd { id } => {
                    self.group_end(id);
                    cp += 1;
                }
                Cmd::Push { to } => {
                    self.push_state(to);
                    cp += 1;
                }
                Cmd::Pop => {
                    self.pop_state();
                    cp += 1;
                }
                Cmd::PushPos => {
                    self.push_pos();
                    cp += 1;
                }
                Cmd::PopPos => {
                    self.pop_pos();
                    cp += 1;
                }
                Cmd::Jmp { to } => cp = to,
                Cmd::Accept => {
                    if self.flags & RE_FL_PERFECT != 0 && self.pos != self.bytes.len() {
                        // Not the whole string: backtrack instead.
                        if self.state_stack.len() > 1 {
                            cp = self.state_stack.last().expect("state stack").cp;
                            continue;
                        }
                        return Ok(false);
                    }
                    return Ok(true);
                }
                Cmd::Reject => {
                    if self.state_stack.len() > 1 {
                        cp = self.state_stack.last().expect("state stack").cp;
                    } else {
                        return Ok(false);
                    }
                }
            }
        }
    }
}

/// Matches `s` against the compiled commands starting at byte `start`. In
/// the default mode the attempt is retried from every following offset; in
/// perfect mode only the anchored attempt counts.
pub fn exec(
    cmds: &[Cmd],
    group_num: usize,
    flags: u32,
    s: &str,
    start: usize,
) -> Result<Option<ExecMatch>, BadUnicode> {
    let mut ec = ExecCtxt {
        cmds,
        group_num,
        flags,
        bytes: s.as_bytes(),
        start,
        pos: start,
        c: 0,
        slice_stack: Vec::new(),
        state_stack: Vec::new(),
    };

    while ec.start <= ec.bytes.len() {
        if ec.run()? {
            let top = ec.state_stack.last().expect("state stack");
            let slices = ec.slice_stack[top.sp..top.sp + group_num].to_vec();
            return Ok(Some(ExecMatch {
                start: ec.start,
                end: ec.pos,
                slices,
            }));
        }
        if flags & RE_FL_PERFECT != 0 {
            break;
        }
        ec.start += 1;
    }

    Ok(None)
}

fn decode_utf8(bytes: &[u8]) -> Option<(u32, usize)> {
    let len = match bytes.first()? {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => return None,
    };
    let s = std::str::from_utf8(bytes.get(..len)?).ok()?;
    let c = s.chars().next()?;
    Some((c as u32, len))
}

fn is_space(c: u32) -> bool {
    char::from_u32(c).is_some_and(|ch| ch.is_whitespace())
}

fn is_digit(c: u32) -> bool {
    c.wrapping_sub('0' as u32) <= 9
}

fn is_word(c: u32) -> bool {
    c == '_' as u32 || char::from_u32(c).is_some_and(|ch| ch.is_alphanumeric())
}

fn to_upper(c: u32) -> u32 {
    match char::from_u32(c) {
        Some(ch) => {
            let mut up = ch.to_uppercase();
            let first = up.next().unwrap_or(ch);
            if up.next().is_some() { c } else { first as u32 }
        }
        None => c,
    }
}

fn to_lower(c: u32) -> u32 {
    match char::from_u32(c) {
        Some(ch) => {
            let mut lo = ch.to_lowercase();
            let first = lo.next().unwrap_or(ch);
            if lo.next().is_some() { c } else { first as u32 }
        }
        None => c,
    }
}
