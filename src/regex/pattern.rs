//! Regular-expression pattern AST and its parser.
//!
//! The parser reads from a positioned [`Source`], so the same code handles
//! both string-built regexes and literals scanned inline out of script
//! source (where the consumed text is captured to reconstruct the source
//! form).

use crate::input::prompt::Prompter;
use crate::input::{Chr, Source};

/// A single matchable character or a shorthand class.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CcChar {
    Char(char),
    Space,
    NotSpace,
    Digit,
    NotDigit,
    Word,
    NotWord,
}

/// One item of a character class.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CcItem {
    Single(CcChar),
    Range(char, char),
}

/// Repetition applies to a term; `max` of `None` means unbounded.
#[derive(Clone, Debug)]
pub struct Term {
    pub kind: TermKind,
    pub min: u32,
    pub max: Option<u32>,
    pub greedy: bool,
}

#[derive(Clone, Debug)]
pub enum TermKind {
    /// `.`
    All,
    Char(CcChar),
    /// `^`
    LineStart,
    /// `$`
    LineEnd,
    /// `\b`
    Blank,
    /// `\B`
    NotBlank,
    Class { rev: bool, items: Vec<CcItem> },
    /// `(?:...)`
    Pat(Pattern),
    Group { id: usize, pat: Pattern },
    LookAhead { negative: bool, pat: Pattern },
    LookBehind { negative: bool, pat: Pattern },
    BackRef(usize),
}

#[derive(Clone, Debug, Default)]
pub struct Alter {
    pub terms: Vec<Term>,
}

#[derive(Clone, Debug, Default)]
pub struct Pattern {
    pub alters: Vec<Alter>,
}

/// A parsed pattern plus what was consumed to build it.
pub struct ParsedPattern {
    pub pattern: Pattern,
    /// Total group count including the implicit whole-match group 0.
    pub group_count: usize,
    /// The source text, captured when scanning inline literals.
    pub source: String,
}

/// Where the pattern ends: a delimiter character (`/` for literals) or the
/// end of the input (string-built regexes).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PatEnd {
    Delim(char),
    InputEnd,
}

struct PatParser<'a> {
    src: &'a mut Source,
    prompter: &'a mut Prompter,
    end: PatEnd,
    group_count: usize,
    capture: bool,
    captured: String,
    failed: bool,
}

/// Parses a pattern from `src` up to `end`. Errors are reported through the
/// prompter; `None` is returned when any occurred.
pub fn parse(
    src: &mut Source,
    prompter: &mut Prompter,
    end: PatEnd,
    capture: bool,
) -> Option<ParsedPattern> {
    let mut p = PatParser {
        src,
        prompter,
        end,
        group_count: 1,
        capture,
        captured: String::new(),
        failed: false,
    };

    let pattern = p.pattern()?;

    // The terminator itself.
    let c = p.src.get_char();
    match (p.end, c) {
        (PatEnd::Delim(d), Chr::Char(ch)) if ch == d => {}
        (PatEnd::InputEnd, Chr::End) => {}
        (PatEnd::Delim(d), Chr::End) => {
            p.error(format!("expect `{d}' at end of regular expression"));
        }
        _ => p.error("unexpected character"),
    }

    if p.failed {
        return None;
    }

    Some(ParsedPattern {
        pattern,
        group_count: p.group_count,
        source: p.captured,
    })
}

impl PatParser<'_> {
    fn get(&mut self) -> Chr {
        let c = self.src.get_char();
        if self.capture && let Chr::Char(ch) = c {
            self.captured.push(ch);
        }
        c
    }

    fn unget(&mut self, c: Chr) {
        if let Chr::Char(ch) = c {
            if self.capture {
                let new_len = self.captured.len() - ch.len_utf8();
                self.captured.truncate(new_len);
            }
            self.src.unget_char(c);
        }
    }

    fn error(&mut self, msg: impl Into<String>) {
        let loc = self.src.here();
        self.prompter.error(self.src, loc, msg);
        self.failed = true;
    }

    fn is_end_char(&self, c: Chr) -> bool {
        match (self.end, c) {
            (_, Chr::End) | (_, Chr::Err) => true,
            (PatEnd::Delim(d), Chr::Char(ch)) => ch == d,
            _ => false,
        }
    }

    fn pattern(&mut self) -> Option<Pattern> {
        let mut pat = Pattern::default();
        pat.alters.push(self.alternative()?);

        loop {
            let c = self.get();
            if c != Chr::Char('|') {
                self.unget(c);
                break;
            }
            pat.alters.push(self.alternative()?);
        }

        Some(pat)
    }

    fn alternative(&mut self) -> Option<Alter> {
        let mut alter = Alter::default();

        loop {
            let c = self.get();
            if self.is_end_char(c) || c == Chr::Char('|') || c == Chr::Char(')') {
                self.unget(c);
                break;
            }
            self.unget(c);
            alter.terms.push(self.term()?);
        }

        Some(alter)
    }

    fn term(&mut self) -> Option<Term> {
        let c = self.get();
        let kind = match c {
            Chr::Char('.') => TermKind::All,
            Chr::Char('^') => TermKind::LineStart,
            Chr::Char('$') => TermKind::LineEnd,
            Chr::Char('\\') => {
                let nc = self.get();
                match nc {
                    Chr::Char('b') => TermKind::Blank,
                    Chr::Char('B') => TermKind::NotBlank,
                    Chr::Char(d @ '1'..='9') => {
                        self.unget(Chr::Char(d));
                        TermKind::BackRef(self.number()? as usize)
                    }
                    _ => {
                        self.unget(nc);
                        TermKind::Char(self.escape_char()?)
                    }
                }
            }
            Chr::Char('[') => self.char_class()?,
            Chr::Char('(') => self.group_or_assertion()?,
            Chr::Char('\n') => {
                self.error("`\\n' cannot be used in regular expression");
                return None;
            }
            Chr::Char(ch) => TermKind::Char(CcChar::Char(ch)),
            Chr::End | Chr::Err => {
                self.error("unexpected end of regular expression");
                return None;
            }
        };

        let anchor = matches!(kind, TermKind::LineStart | TermKind::LineEnd);
        let mut term = Term {
            kind,
            min: 1,
            max: Some(1),
            greedy: true,
        };

        if !anchor {
            self.repetition(&mut term)?;
        }

        Some(term)
    }

    fn repetition(&mut self, term: &mut Term) -> Option<()> {
        let c = self.get();
        match c {
            Chr::Char('?') => {
                term.min = 0;
                term.max = Some(1);
            }
            Chr::Char('*') => {
                term.min = 0;
                term.max = None;
            }
            Chr::Char('+') => {
                term.min = 1;
                term.max = None;
            }
            Chr::Char('{') => {
                let mut c = self.get();
                if c == Chr::Char(',') {
                    term.min = 0;
                } else {
                    self.unget(c);
                    term.min = self.number()?;
                    c = self.get();
                }

                if c == Chr::Char(',') {
                    let nc = self.get();
                    if nc == Chr::Char('}') {
                        term.max = None;
                        c = nc;
                    } else {
                        self.unget(nc);
                        term.max = Some(self.number()?);
                        c = self.get();
                    }
                } else {
                    term.max = Some(term.min);
                }

                if c != Chr::Char('}') {
                    self.error("expect `}' here");
                    return None;
                }
            }
            _ => {
                self.unget(c);
                return Some(());
            }
        }

        if Some(term.min) != term.max {
            let c = self.get();
            if c == Chr::Char('?') {
                term.greedy = false;
            } else {
                self.unget(c);
            }
        }

        Some(())
    }

    fn group_or_assertion(&mut self) -> Option<TermKind> {
        let c = self.get();
        let kind = if c == Chr::Char('?') {
            let c = self.get();
            match c {
                Chr::Char(':') => {
                    let pat = self.pattern()?;
                    TermKind::Pat(pat)
                }
                Chr::Char('=') => TermKind::LookAhead {
                    negative: false,
                    pat: self.pattern()?,
                },
                Chr::Char('!') => TermKind::LookAhead {
                    negative: true,
                    pat: self.pattern()?,
                },
                Chr::Char('<') => {
                    let c = self.get();
                    let negative = match c {
                        Chr::Char('=') => false,
                        Chr::Char('!') => true,
                        _ => {
                            self.error("expect `=' or `!' here");
                            return None;
                        }
                    };
                    TermKind::LookBehind {
                        negative,
                        pat: self.pattern()?,
                    }
                }
                _ => {
                    self.error("expect `:', `=' or `!' here");
                    return None;
                }
            }
        } else {
            self.unget(c);
            let id = self.group_count;
            self.group_count += 1;
            TermKind::Group {
                id,
                pat: self.pattern()?,
            }
        };

        let c = self.get();
        if c != Chr::Char(')') {
            self.error("expect `)' here");
            return None;
        }

        Some(kind)
    }

    fn char_class(&mut self) -> Option<TermKind> {
        let mut rev = false;
        let mut items = Vec::new();

        let c = self.get();
        if c == Chr::Char('^') {
            rev = true;
        } else {
            self.unget(c);
        }

        loop {
            let c = self.get();
            if c == Chr::Char(']') {
                break;
            }
            if matches!(c, Chr::End | Chr::Err) {
                self.error("expect `]' at end of character class");
                return None;
            }
            self.unget(c);

            let min = self.character()?;

            let c = self.get();
            if c == Chr::Char('-') {
                let CcChar::Char(lo) = min else {
                    self.error("character group cannot be used in range");
                    return None;
                };
                let max = self.character()?;
                let CcChar::Char(hi) = max else {
                    self.error("character group cannot be used in range");
                    return None;
                };
                // Normalize so min <= max.
                let (lo, hi) = if hi < lo { (hi, lo) } else { (lo, hi) };
                items.push(CcItem::Range(lo, hi));
            } else {
                self.unget(c);
                items.push(CcItem::Single(min));
            }
        }

        Some(TermKind::Class { rev, items })
    }

    fn character(&mut self) -> Option<CcChar> {
        let c = self.get();
        match c {
            Chr::Char('\\') => self.escape_char(),
            Chr::Char('\n') => {
                self.error("`\\n' cannot be used in regular expression");
                None
            }
            Chr::Char(ch) => Some(CcChar::Char(ch)),
            _ => {
                self.error("unexpected end of regular expression");
                None
            }
        }
    }

    fn escape_char(&mut self) -> Option<CcChar> {
        let c = self.get();
        let out = match c {
            Chr::Char('s') => CcChar::Space,
            Chr::Char('S') => CcChar::NotSpace,
            Chr::Char('w') => CcChar::Word,
            Chr::Char('W') => CcChar::NotWord,
            Chr::Char('d') => CcChar::Digit,
            Chr::Char('D') => CcChar::NotDigit,
            Chr::Char('n') => CcChar::Char('\n'),
            Chr::Char('r') => CcChar::Char('\r'),
            Chr::Char('t') => CcChar::Char('\t'),
            Chr::Char('v') => CcChar::Char('\u{b}'),
            Chr::Char('f') => CcChar::Char('\u{c}'),
            Chr::Char('a') => CcChar::Char('\u{7}'),
            Chr::Char('b') => CcChar::Char('\u{8}'),
            Chr::Char('x') => CcChar::Char(self.hex_escape()?),
            Chr::Char('u') => CcChar::Char(self.unicode_escape()?),
            Chr::Char('\n') => {
                self.error("`\\n' cannot be used in regular expression");
                return None;
            }
            Chr::Char(ch) => CcChar::Char(ch),
            Chr::End | Chr::Err => {
                self.error("illegal escape character");
                return None;
            }
        };
        Some(out)
    }

    fn hex_digit(&mut self) -> Option<u32> {
        let c = self.get();
        match c.char().and_then(|ch| ch.to_digit(16)) {
            Some(d) => Some(d),
            None => {
                self.error("expect a hexadecimal character here");
                None
            }
        }
    }

    fn hex_escape(&mut self) -> Option<char> {
        let hi = self.hex_digit()?;
        let lo = self.hex_digit()?;
        char::from_u32((hi << 4) | lo)
    }

    fn unicode_escape(&mut self) -> Option<char> {
        let c = self.get();
        let mut v: u32 = 0;

        if c == Chr::Char('{') {
            let mut overflow = false;
            loop {
                let c = self.get();
                if c == Chr::Char('}') {
                    break;
                }
                let Some(d) = c.char().and_then(|ch| ch.to_digit(16)) else {
                    self.error("expect a hexadecimal character here");
                    return None;
                };
                v = (v << 4) | d;
                if !overflow && v > 0x10ffff {
                    overflow = true;
                    self.error("unicode value overflow");
                }
            }
            if overflow {
                return None;
            }
        } else {
            self.unget(c);
            for _ in 0..4 {
                v = (v << 4) | self.hex_digit()?;
            }

            // UTF-16 surrogate pair merging.
            if (0xd800..0xdc00).contains(&v) {
                let mut buf = Vec::new();
                let merged = self.try_trailing_surrogate(&mut buf);
                match merged {
                    Some(t) => v = 0x10000 + ((v - 0xd800) << 10) + (t - 0xdc00),
                    None => {
                        while let Some(c) = buf.pop() {
                            self.unget(Chr::Char(c));
                        }
                    }
                }
            }
        }

        char::from_u32(v).or_else(|| {
            self.error("unicode value overflow");
            None
        })
    }

    fn try_trailing_surrogate(&mut self, buf: &mut Vec<char>) -> Option<u32> {
        let mut read = |p: &mut Self| -> Option<char> {
            let c = p.get();
            let ch = c.char()?;
            buf.push(ch);
            Some(ch)
        };

        if read(self)? != '\\' {
            return None;
        }
        if read(self)? != 'u' {
            return None;
        }

        let mut t: u32 = 0;
        for _ in 0..4 {
            let ch = read(self)?;
            t = (t << 4) | ch.to_digit(16)?;
        }

        if (0xdc00..0xe000).contains(&t) {
            buf.clear();
            Some(t)
        } else {
            None
        }
    }

    fn number(&mut self) -> Option<u32> {
        let c = self.get();
        let Some(d) = c.char().and_then(|ch| ch.to_digit(10)) else {
            self.error("expect a digit character here");
            return None;
        };
        let mut n = d;

        loop {
            let c = self.get();
            match c.char().and_then(|ch| ch.to_digit(10)) {
                Some(d) => n = n * 10 + d,
                None => {
                    self.unget(c);
                    break;
                }
            }
        }

        Some(n)
    }
}
