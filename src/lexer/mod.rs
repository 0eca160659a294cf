//! The lexical analyzer.
//!
//! Tokens are pulled one at a time under caller-supplied flags: the parser
//! decides whether `/` starts a division or a regex literal, whether a
//! string-format word is expected, and whether embedded expressions are
//! allowed, and feeds that back per call. Errors report through the prompt
//! channel and scanning continues so downstream keeps finding structure.

pub mod token;

pub use token::{Keyword, Punct, Token, TokenKind};

use crate::input::prompt::Prompter;
use crate::input::{Chr, Location, Source};
use crate::regex::Compiled;
use crate::runtime::format::{
    SOUT_FL_ALIGN_HEAD, SOUT_FL_ZERO, SOUT_PREC_DEFAULT, SOUT_WIDTH_DEFAULT, SoutFormat, sout_make,
};

/// Parse a string-format word instead of a normal token.
pub const FL_STR_FMT: u32 = 1 << 0;
/// `/` and `/=` are operators here (otherwise `/` opens a regex literal).
pub const FL_DIV: u32 = 1 << 1;
/// Braces inside string literals do not split the literal.
pub const FL_NO_EMBED_EXPR: u32 = 1 << 2;

/// Lexer error flag.
const ST_ERR: u32 = 1 << 0;
/// Past any leading shebang line.
const ST_BODY: u32 = 1 << 1;
/// Collect doc comments as tokens instead of skipping them.
const ST_DOC: u32 = 1 << 3;

/// Which quote style an embedded expression interrupted.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum StrQuote {
    Double,
    Single,
}

#[derive(Clone, Copy, Debug)]
struct StrState {
    quote: StrQuote,
    brace: i32,
}

pub struct Lexer {
    src: Source,
    pub prompter: Prompter,
    status: u32,
    brace_level: i32,
    str_stack: Vec<StrState>,
    text: String,
    newline_pending: bool,
}

impl Lexer {
    pub fn new(src: Source) -> Self {
        Lexer {
            src,
            prompter: Prompter::new(),
            status: 0,
            brace_level: 0,
            str_stack: Vec::new(),
            text: String::new(),
            newline_pending: false,
        }
    }

    pub fn source(&self) -> &Source {
        &self.src
    }

    pub fn report_error(&mut self, loc: Location, msg: impl Into<String>) {
        self.prompter.error(&self.src, loc, msg);
    }

    pub fn report_note(&mut self, loc: Location, msg: impl Into<String>) {
        self.prompter.note(&self.src, loc, msg);
    }

    pub fn has_errors(&self) -> bool {
        self.status & ST_ERR != 0
    }

    /// Enables doc-comment collection (`/*? … */`, `//? …`).
    pub fn enable_doc(&mut self) {
        self.status |= ST_DOC;
    }

    fn get(&mut self) -> Chr {
        self.src.get_char()
    }

    fn unget(&mut self, c: Chr) {
        self.src.unget_char(c);
    }

    fn error_at(&mut self, loc: Location, msg: impl Into<String>) {
        self.status |= ST_ERR;
        self.prompter.error(&self.src, loc, msg);
    }

    fn error_here(&mut self, msg: impl Into<String>) {
        let loc = self.src.here();
        self.error_at(loc, msg);
    }

    fn expect_digit_error(&mut self) {
        self.error_here("expect a digit character here");
    }

    fn expect_hex_error(&mut self) {
        self.error_here("expect a hexadecimal character here");
    }

    // ---- comments -------------------------------------------------------

    fn comment_line(&mut self) {
        loop {
            match self.get() {
                Chr::Char('\n') => {
                    self.newline_pending = true;
                    break;
                }
                Chr::End | Chr::Err => break,
                _ => {}
            }
        }
    }

    fn comment_block(&mut self) {
        loop {
            match self.get() {
                Chr::Char('*') => {
                    let nc = self.get();
                    if nc == Chr::Char('/') {
                        break;
                    }
                    self.unget(nc);
                }
                Chr::Char('\n') => self.newline_pending = true,
                Chr::End | Chr::Err => {
                    self.error_here("expect `*/' at end of comment block");
                    break;
                }
                _ => {}
            }
        }
    }

    // ---- numbers --------------------------------------------------------

    fn number_literal(&mut self) -> TokenKind {
        let mut base = 10u32;

        let c = self.get();
        if c == Chr::Char('0') {
            let nc = self.get();
            match nc {
                Chr::Char('b') | Chr::Char('B') => base = 2,
                Chr::Char('o') | Chr::Char('O') => base = 8,
                Chr::Char('x') | Chr::Char('X') => base = 16,
                _ => {
                    self.unget(nc);
                    self.unget(c);
                }
            }
        } else {
            self.unget(c);
        }

        self.text.clear();
        let mut is_float = false;

        let mut last = self.digits(base);
        if self.text.is_empty() {
            if base == 16 {
                self.expect_hex_error();
            } else {
                self.expect_digit_error();
            }
            return TokenKind::Number(0.0);
        }

        if base == 10 {
            if last == Chr::Char('.') {
                let nc = self.get();
                let fractional = matches!(nc, Chr::Char(d) if d.is_ascii_digit());
                self.unget(nc);

                if fractional {
                    self.text.push('.');
                    last = self.digits(10);
                    is_float = true;
                } else {
                    // `1.` is the number 1 followed by `.`.
                    self.unget(last);
                    return self.number_value(base, is_float);
                }
            }

            if matches!(last, Chr::Char('e') | Chr::Char('E')) {
                self.text.push('e');

                let c = self.get();
                if let Chr::Char(s @ ('+' | '-')) = c {
                    self.text.push(s);
                } else {
                    self.unget(c);
                }

                let before = self.text.len();
                last = self.digits(10);
                if self.text.len() == before {
                    self.expect_digit_error();
                    return TokenKind::Number(0.0);
                }
                is_float = true;
            }
        }

        self.unget(last);
        self.number_value(base, is_float)
    }

    /// Consumes digits of `base` (skipping `_`) into the text buffer and
    /// returns the first non-digit.
    fn digits(&mut self, base: u32) -> Chr {
        loop {
            let c = self.get();
            match c {
                Chr::Char('_') => continue,
                Chr::Char(d) if d.is_digit(base) => self.text.push(d),
                other => return other,
            }
        }
    }

    fn number_value(&mut self, base: u32, is_float: bool) -> TokenKind {
        if is_float {
            match self.text.parse::<f64>() {
                Ok(d) if d.is_finite() => TokenKind::Number(d),
                _ => {
                    let loc = self.src.here();
                    self.error_at(loc, "number value overflow");
                    TokenKind::Number(0.0)
                }
            }
        } else {
            match i64::from_str_radix(&self.text, base) {
                Ok(i) => TokenKind::Number(i as f64),
                Err(_) => {
                    let loc = self.src.here();
                    self.error_at(loc, "number value overflow");
                    TokenKind::Number(0.0)
                }
            }
        }
    }

    // ---- escapes --------------------------------------------------------

    fn hex_digit(&mut self) -> Option<u32> {
        let c = self.get();
        match c.char().and_then(|ch| ch.to_digit(16)) {
            Some(d) => Some(d),
            None => {
                self.unget(c);
                self.expect_hex_error();
                None
            }
        }
    }

    fn escape_x_char(&mut self) -> Option<char> {
        let hi = self.hex_digit()?;
        let lo = self.hex_digit()?;
        char::from_u32((hi << 4) | lo)
    }

    fn escape_u_char(&mut self) -> Option<char> {
        let c = self.get();
        let mut v: u32 = 0;

        if c == Chr::Char('{') {
            let mut any = false;
            let mut overflow = false;
            loop {
                let c = self.get();
                if c == Chr::Char('}') {
                    if !any {
                        self.expect_hex_error();
                    }
                    break;
                }
                let Some(d) = c.char().and_then(|ch| ch.to_digit(16)) else {
                    self.unget(c);
                    self.expect_hex_error();
                    break;
                };
                any = true;
                v = (v << 4) | d;
                if !overflow && v > 0x10ffff {
                    overflow = true;
                    self.error_here("unicode value overflow");
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

            if (0xd800..0xdc00).contains(&v) {
                // Try to merge a trailing UTF-16 surrogate.
                let mut consumed: Vec<char> = Vec::new();
                let trailing = self.surrogate_trailing(&mut consumed);
                match trailing {
                    Some(t) => v = 0x10000 + ((v - 0xd800) << 10) + (t - 0xdc00),
                    None => {
                        while let Some(ch) = consumed.pop() {
                            self.unget(Chr::Char(ch));
                        }
                    }
                }
            }
        }

        char::from_u32(v)
    }

    fn surrogate_trailing(&mut self, consumed: &mut Vec<char>) -> Option<u32> {
        let mut read = |lx: &mut Self| -> Option<char> {
            let c = lx.get();
            let ch = c.char()?;
            consumed.push(ch);
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
            t = (t << 4) | read(self)?.to_digit(16)?;
        }

        if (0xdc00..0xe000).contains(&t) {
            consumed.clear();
            Some(t)
        } else {
            None
        }
    }

    fn octal_escape(&mut self, first: char) -> char {
        let mut v = first.to_digit(8).unwrap_or(0);
        for _ in 0..2 {
            let c = self.get();
            match c.char().and_then(|ch| ch.to_digit(8)) {
                Some(d) => v = (v << 3) | d,
                None => {
                    self.unget(c);
                    break;
                }
            }
        }
        char::from_u32(v).unwrap_or('\0')
    }

    fn escape_char(&mut self, c: char) -> Option<char> {
        Some(match c {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'v' => '\u{b}',
            'f' => '\u{c}',
            'a' => '\u{7}',
            'b' => '\u{8}',
            'x' => return self.escape_x_char(),
            'u' => return self.escape_u_char(),
            '0'..='7' => self.octal_escape(c),
            _ => {
                if c.is_control() {
                    self.error_here("illegal escape character");
                    return None;
                }
                c
            }
        })
    }

    // ---- characters and strings -----------------------------------------

    fn char_literal(&mut self) -> TokenKind {
        let mut value = 0u32;

        let c = self.get();
        match c {
            Chr::Char('\'') => {
                self.error_here("expect a character data in `'' and `''");
                return TokenKind::Number(0.0);
            }
            Chr::Char('\\') => {
                let nc = self.get();
                if let Some(ch) = nc.char().and_then(|ch| self.escape_char(ch)) {
                    value = ch as u32;
                }
            }
            Chr::Char(ch) => value = ch as u32,
            Chr::End | Chr::Err => {
                self.error_here("expect a `'' at end of character");
                return TokenKind::Number(0.0);
            }
        }

        let nc = self.get();
        if nc != Chr::Char('\'') {
            self.unget(nc);
            self.error_here("expect a `'' at end of character");
            value = 0;
        }

        TokenKind::Number(value as f64)
    }

    /// Double-quoted string (or a middle/tail part re-entered at `}`).
    /// `head` distinguishes a fresh literal from a continuation.
    fn string_literal(&mut self, head: bool, flags: u32) -> TokenKind {
        self.text.clear();

        loop {
            let c = self.get();
            match c {
                Chr::Char('"') => {
                    return if head {
                        TokenKind::Str(std::mem::take(&mut self.text))
                    } else {
                        self.str_stack.pop();
                        TokenKind::StrTail(std::mem::take(&mut self.text))
                    };
                }
                Chr::Char('{') if flags & FL_NO_EMBED_EXPR == 0 => {
                    let part = std::mem::take(&mut self.text);
                    return if head {
                        self.str_stack.push(StrState {
                            quote: StrQuote::Double,
                            brace: self.brace_level,
                        });
                        TokenKind::StrHead(part)
                    } else {
                        TokenKind::StrMid(part)
                    };
                }
                Chr::Char('\\') => {
                    let nc = self.get();
                    match nc {
                        // A backslash-newline joins lines.
                        Chr::Char('\n') => {}
                        Chr::Char(ch) => {
                            if let Some(e) = self.escape_char(ch) {
                                self.text.push(e);
                            }
                        }
                        Chr::End | Chr::Err => {
                            self.error_here("expect a `\"' at end of string");
                            break;
                        }
                    }
                }
                Chr::Char(ch) => self.text.push(ch),
                Chr::End | Chr::Err => {
                    self.error_here("expect a `\"' at end of string");
                    break;
                }
            }
        }

        if !head {
            self.str_stack.pop();
        }
        if head {
            TokenKind::Str(std::mem::take(&mut self.text))
        } else {
            TokenKind::StrTail(std::mem::take(&mut self.text))
        }
    }

    /// Triple-style `''…''` string; `{{` opens an embedded expression.
    /// Leading and trailing blank runs up to a newline are trimmed off the
    /// head and tail parts.
    fn single_string_literal(&mut self, head: bool, flags: u32) -> TokenKind {
        self.text.clear();
        let mut terminated = false;

        loop {
            let c = self.get();
            match c {
                Chr::End | Chr::Err => {
                    self.error_here("expect `''' at end of string");
                    break;
                }
                Chr::Char('\'') => {
                    let nc = self.get();
                    if nc == Chr::Char('\'') {
                        terminated = true;
                        break;
                    }
                    self.unget(nc);
                    self.text.push('\'');
                }
                Chr::Char('{') if flags & FL_NO_EMBED_EXPR == 0 => {
                    let nc = self.get();
                    if nc == Chr::Char('{') {
                        break;
                    }
                    self.unget(nc);
                    self.text.push('{');
                }
                Chr::Char(ch) => self.text.push(ch),
            }
        }

        let is_head_part = head;
        let is_tail_part = terminated;

        let mut start = 0usize;
        let mut end = self.text.len();
        let bytes = self.text.as_bytes();

        if is_head_part {
            // Drop a leading blank run that ends in a newline.
            let mut i = 0;
            while i < end {
                let b = bytes[i];
                if b == b'\n' {
                    start = i + 1;
                    break;
                }
                if !(b as char).is_whitespace() {
                    break;
                }
                i += 1;
            }
        }

        if is_tail_part {
            // Drop a trailing blank run that starts after a newline.
            let mut i = end;
            while i > start {
                let b = bytes[i - 1];
                if b == b'\n' {
                    end = i - 1;
                    break;
                }
                if !(b as char).is_whitespace() {
                    break;
                }
                i -= 1;
            }
        }

        let part = self.text[start..end].to_owned();

        match (head, terminated) {
            (true, true) => TokenKind::Str(part),
            (true, false) => {
                self.str_stack.push(StrState {
                    quote: StrQuote::Single,
                    brace: self.brace_level,
                });
                TokenKind::StrHead(part)
            }
            (false, true) => {
                self.str_stack.pop();
                TokenKind::StrTail(part)
            }
            (false, false) => TokenKind::StrMid(part),
        }
    }

    // ---- identifiers ----------------------------------------------------

    fn is_id_start(c: char) -> bool {
        c == '_' || c == '$' || unicode_ident::is_xid_start(c)
    }

    fn is_id_cont(c: char) -> bool {
        c == '$' || unicode_ident::is_xid_continue(c)
    }

    fn identifier(&mut self) -> String {
        self.text.clear();
        loop {
            let c = self.get();
            match c {
                Chr::Char(ch) if Self::is_id_cont(ch) => self.text.push(ch),
                other => {
                    self.unget(other);
                    break;
                }
            }
        }
        std::mem::take(&mut self.text)
    }

    // ---- string format --------------------------------------------------

    /// `[-][0][width][.prec][kind]`, packed into the format word.
    fn string_format(&mut self) -> TokenKind {
        let mut flags = 0u32;
        let mut width = SOUT_WIDTH_DEFAULT;
        let mut prec = SOUT_PREC_DEFAULT;
        let mut fmt = SoutFormat::Str;

        let mut c = self.get();
        if c == Chr::Char('-') {
            flags |= SOUT_FL_ALIGN_HEAD;
            c = self.get();
        }
        if c == Chr::Char('0') {
            flags |= SOUT_FL_ZERO;
            c = self.get();
        }

        if let Chr::Char(d) = c
            && d.is_ascii_digit()
        {
            let loc = self.src.here();
            let mut n = d.to_digit(10).unwrap_or(0);
            loop {
                c = self.get();
                match c.char().and_then(|ch| ch.to_digit(10)) {
                    Some(d) => n = n * 10 + d,
                    None => break,
                }
            }
            if n >= 255 {
                self.error_at(loc, "string's output width should < 255");
            } else {
                width = n;
            }
        }

        if c == Chr::Char('.') {
            c = self.get();
            if let Chr::Char(d) = c
                && d.is_ascii_digit()
            {
                let loc = self.src.here();
                let mut n = d.to_digit(10).unwrap_or(0);
                loop {
                    c = self.get();
                    match c.char().and_then(|ch| ch.to_digit(10)) {
                        Some(d) => n = n * 10 + d,
                        None => break,
                    }
                }
                if n >= 255 {
                    self.error_at(loc, "number's output precision should < 255");
                } else {
                    prec = n;
                }
            }
        }

        match c {
            Chr::Char('o') => fmt = SoutFormat::Oct,
            Chr::Char('d') => fmt = SoutFormat::Dec,
            Chr::Char('u') => fmt = SoutFormat::UDec,
            Chr::Char('x') => fmt = SoutFormat::Hex,
            Chr::Char('f') => fmt = SoutFormat::Float,
            Chr::Char('e') => fmt = SoutFormat::Exp,
            Chr::Char('n') => fmt = SoutFormat::Number,
            Chr::Char('s') => fmt = SoutFormat::Str,
            Chr::Char('c') => fmt = SoutFormat::Char,
            other => self.unget(other),
        }

        TokenKind::Number(sout_make(flags, width, prec, fmt) as f64)
    }

    // ---- regex literals -------------------------------------------------

    fn regular_expr(&mut self) -> TokenKind {
        let compiled = Compiled::from_input(&mut self.src, &mut self.prompter);
        if compiled.is_none() {
            self.status |= ST_ERR;
        }

        // Flag letters directly after the closing `/`.
        let mut flags = 0u32;
        loop {
            let c = self.get();
            match c {
                Chr::Char(ch) if ch.is_alphanumeric() => {
                    flags |= crate::regex::flags_from_str(&ch.to_string());
                }
                other => {
                    self.unget(other);
                    break;
                }
            }
        }

        let mut compiled = compiled.unwrap_or(Compiled {
            source: String::new(),
            group_count: 1,
            cmds: Vec::new(),
            flags: 0,
        });
        compiled.flags |= flags;
        TokenKind::Regex(compiled)
    }

    // ---- doc comments ---------------------------------------------------

    fn document(&mut self, oneline: bool) -> TokenKind {
        self.text.clear();
        self.text.push_str("   ");

        if oneline {
            loop {
                let c = self.get();
                match c {
                    Chr::End | Chr::Err => break,
                    Chr::Char(ch) => {
                        self.text.push(ch);
                        if ch != '\n' {
                            continue;
                        }
                    }
                }

                // A following `//?` on the very next line continues the doc.
                let len = self.text.len();
                let mut ended = true;
                loop {
                    let c = self.get();
                    match c {
                        Chr::Char(ch) if ch == ' ' || ch == '\t' => self.text.push(ch),
                        Chr::Char('/') => {
                            let n1 = self.get();
                            let n2 = self.get();
                            if n1 == Chr::Char('/') && n2 == Chr::Char('?') {
                                self.text.push_str("   ");
                                ended = false;
                            } else {
                                self.unget(n2);
                                self.unget(n1);
                                self.unget(Chr::Char('/'));
                            }
                            break;
                        }
                        other => {
                            self.unget(other);
                            break;
                        }
                    }
                }

                if ended {
                    self.text.truncate(len);
                    break;
                }
            }
        } else {
            let mut skip = false;
            loop {
                let c = self.get();
                match c {
                    Chr::End | Chr::Err => {
                        self.error_here("expect `*/' at end of comment block");
                        break;
                    }
                    Chr::Char('*') => {
                        let nc = self.get();
                        if nc == Chr::Char('/') {
                            break;
                        }
                        self.unget(nc);

                        if skip {
                            // A leading `*` (or `*?`) on a continuation
                            // line becomes spacing.
                            let nc = self.get();
                            if nc == Chr::Char('?') {
                                self.text.push_str("  ");
                            } else {
                                self.text.push(' ');
                                self.unget(nc);
                            }
                            skip = false;
                        } else {
                            self.text.push('*');
                        }
                    }
                    Chr::Char(ch) => {
                        self.text.push(ch);
                        if ch == '\n' {
                            skip = true;
                        } else if !ch.is_whitespace() {
                            skip = false;
                        }
                    }
                }
            }
        }

        TokenKind::Doc(std::mem::take(&mut self.text))
    }

    // ---- punctuation ----------------------------------------------------

    fn eat(&mut self, want: char) -> bool {
        let c = self.get();
        if c == Chr::Char(want) {
            true
        } else {
            self.unget(c);
            false
        }
    }

    /// Compound-assignment tail after `.`: `.+=`, `.<<=`, ... Returns the
    /// dot form or pushes everything back.
    fn dot_punct(&mut self) -> Punct {
        let probes: [(&str, Punct); 15] = [
            ("**=", Punct::DotStarStarAssign),
            ("<<=", Punct::DotShlAssign),
            (">>>=", Punct::DotUShrAssign),
            (">>=", Punct::DotShrAssign),
            ("&&=", Punct::DotAmpAmpAssign),
            ("||=", Punct::DotPipePipeAssign),
            ("+=", Punct::DotPlusAssign),
            ("-=", Punct::DotMinusAssign),
            ("*=", Punct::DotStarAssign),
            ("/=", Punct::DotSlashAssign),
            ("%=", Punct::DotPercentAssign),
            ("~=", Punct::DotTildeAssign),
            ("&=", Punct::DotAmpAssign),
            ("|=", Punct::DotPipeAssign),
            ("^=", Punct::DotCaretAssign),
        ];

        'probe: for (text, punct) in probes {
            let mut taken: Vec<char> = Vec::new();
            for want in text.chars() {
                let c = self.get();
                if c == Chr::Char(want) {
                    taken.push(want);
                } else {
                    self.unget(c);
                    while let Some(ch) = taken.pop() {
                        self.unget(Chr::Char(ch));
                    }
                    continue 'probe;
                }
            }
            return punct;
        }

        if self.eat('.') {
            if self.eat('.') {
                return Punct::Ellipsis;
            }
            self.unget(Chr::Char('.'));
        }
        Punct::Dot
    }

    fn punctuation(&mut self, c: char) -> Option<Punct> {
        let p = match c {
            '+' => {
                if self.eat('=') {
                    Punct::PlusAssign
                } else {
                    Punct::Plus
                }
            }
            '-' => {
                if self.eat('=') {
                    Punct::MinusAssign
                } else {
                    Punct::Minus
                }
            }
            '*' => {
                if self.eat('*') {
                    if self.eat('=') {
                        Punct::StarStarAssign
                    } else {
                        Punct::StarStar
                    }
                } else if self.eat('=') {
                    Punct::StarAssign
                } else {
                    Punct::Star
                }
            }
            '/' => {
                if self.eat('=') {
                    Punct::SlashAssign
                } else {
                    Punct::Slash
                }
            }
            '%' => {
                if self.eat('=') {
                    Punct::PercentAssign
                } else {
                    Punct::Percent
                }
            }
            '~' => {
                if self.eat('=') {
                    Punct::TildeAssign
                } else {
                    Punct::Tilde
                }
            }
            '!' => {
                if self.eat('=') {
                    Punct::Ne
                } else {
                    Punct::Bang
                }
            }
            '=' => {
                if self.eat('=') {
                    Punct::Eq
                } else if self.eat('>') {
                    Punct::FatArrow
                } else {
                    Punct::Assign
                }
            }
            '<' => {
                if self.eat('<') {
                    if self.eat('=') {
                        Punct::ShlAssign
                    } else {
                        Punct::Shl
                    }
                } else if self.eat('=') {
                    Punct::Le
                } else {
                    Punct::Lt
                }
            }
            '>' => {
                if self.eat('>') {
                    if self.eat('>') {
                        if self.eat('=') {
                            Punct::UShrAssign
                        } else {
                            Punct::UShr
                        }
                    } else if self.eat('=') {
                        Punct::ShrAssign
                    } else {
                        Punct::Shr
                    }
                } else if self.eat('=') {
                    Punct::Ge
                } else {
                    Punct::Gt
                }
            }
            '&' => {
                if self.eat('&') {
                    if self.eat('=') {
                        Punct::AmpAmpAssign
                    } else {
                        Punct::AmpAmp
                    }
                } else if self.eat('=') {
                    Punct::AmpAssign
                } else {
                    Punct::Amp
                }
            }
            '|' => {
                if self.eat('|') {
                    if self.eat('=') {
                        Punct::PipePipeAssign
                    } else {
                        Punct::PipePipe
                    }
                } else if self.eat('=') {
                    Punct::PipeAssign
                } else {
                    Punct::Pipe
                }
            }
            '^' => {
                if self.eat('=') {
                    Punct::CaretAssign
                } else {
                    Punct::Caret
                }
            }
            '?' => Punct::Question,
            ':' => {
                if self.eat('>') {
                    Punct::ColonGt
                } else {
                    Punct::Colon
                }
            }
            ';' => Punct::Semicolon,
            ',' => Punct::Comma,
            '.' => self.dot_punct(),
            '(' => Punct::LParen,
            ')' => Punct::RParen,
            '[' => Punct::LBracket,
            ']' => Punct::RBracket,
            '@' => Punct::At,
            '#' => Punct::Hash,
            _ => return None,
        };
        Some(p)
    }

    // ---- the scanner ----------------------------------------------------

    /// Scans the next token under the given flags.
    pub fn token(&mut self, flags: u32) -> Token {
        let mut newline = std::mem::take(&mut self.newline_pending);
        let mut loc = Location::default();

        let kind = 'scan: loop {
            // Eat whitespace and comments.
            let c = loop {
                let c = self.get();
                match c {
                    Chr::Char('\n') => {
                        newline = true;
                    }
                    // A skipped undecodable byte: report and keep scanning
                    // the recovered content.
                    Chr::Err => {
                        self.error_here("illegal character");
                    }
                    Chr::Char(ch) if ch.is_whitespace() => {}
                    Chr::Char('#') if self.status & ST_BODY == 0 => {
                        let nc = self.get();
                        if nc == Chr::Char('!') {
                            self.comment_line();
                            newline = true;
                        } else {
                            self.unget(nc);
                            break c;
                        }
                    }
                    Chr::Char('/') => {
                        let nc = self.get();
                        match nc {
                            Chr::Char(k @ ('/' | '*')) => {
                                let nnc = self.get();
                                if nnc == Chr::Char('?') && self.status & ST_DOC != 0 {
                                    self.status |= ST_BODY;
                                    self.src.store_first_loc(&mut loc);
                                    let doc = self.document(k == '/');
                                    self.src.store_last_loc(&mut loc);
                                    break 'scan doc;
                                }
                                self.unget(nnc);
                                if k == '/' {
                                    self.comment_line();
                                    newline = true;
                                } else {
                                    self.comment_block();
                                }
                            }
                            _ => {
                                self.unget(nc);
                                break c;
                            }
                        }
                    }
                    _ => break c,
                }
            };

            self.status |= ST_BODY;
            self.src.store_first_loc(&mut loc);

            if flags & FL_STR_FMT != 0 {
                self.unget(c);
                break self.string_format();
            }

            break match c {
                Chr::End | Chr::Err => {
                    loc.first_column += 1;
                    TokenKind::End
                }
                Chr::Char('\'') => {
                    let nc = self.get();
                    if nc == Chr::Char('\'') {
                        self.single_string_literal(true, flags)
                    } else {
                        self.unget(nc);
                        self.char_literal()
                    }
                }
                Chr::Char('"') => self.string_literal(true, flags),
                Chr::Char('{') => {
                    self.brace_level += 1;
                    TokenKind::Punct(Punct::LBrace)
                }
                Chr::Char('}') => {
                    if let Some(top) = self.str_stack.last().copied()
                        && top.brace == self.brace_level
                    {
                        match top.quote {
                            StrQuote::Double => {
                                // The embedded expression ended: scan the
                                // middle or tail part.
                                break self.string_literal(false, flags);
                            }
                            StrQuote::Single => {
                                let nc = self.get();
                                if nc == Chr::Char('}') {
                                    break self.single_string_literal(false, flags);
                                }
                                self.unget(nc);
                            }
                        }
                    }
                    if self.brace_level > 0 {
                        self.brace_level -= 1;
                    }
                    TokenKind::Punct(Punct::RBrace)
                }
                Chr::Char('/') => {
                    if flags & FL_DIV != 0 {
                        TokenKind::Punct(self.punctuation('/').expect("slash punct"))
                    } else {
                        self.regular_expr()
                    }
                }
                Chr::Char('@') => {
                    let nc = self.get();
                    self.unget(nc);
                    if matches!(nc, Chr::Char(ch) if Self::is_id_start(ch)) {
                        TokenKind::AtId(self.identifier())
                    } else {
                        TokenKind::Punct(Punct::At)
                    }
                }
                Chr::Char('#') => {
                    let nc = self.get();
                    self.unget(nc);
                    if matches!(nc, Chr::Char(ch) if Self::is_id_start(ch)) {
                        TokenKind::HashId(self.identifier())
                    } else {
                        TokenKind::Punct(Punct::Hash)
                    }
                }
                Chr::Char(ch) if ch.is_ascii_digit() => {
                    self.unget(Chr::Char(ch));
                    self.number_literal()
                }
                Chr::Char(ch) if Self::is_id_start(ch) => {
                    self.unget(Chr::Char(ch));
                    let text = self.identifier();
                    match text.as_str() {
                        "null" => TokenKind::Null,
                        "true" => TokenKind::Bool(true),
                        "false" => TokenKind::Bool(false),
                        _ => TokenKind::Id(text),
                    }
                }
                Chr::Char(ch) => match self.punctuation(ch) {
                    Some(p) => TokenKind::Punct(p),
                    None => {
                        self.error_here("illegal character");
                        continue 'scan;
                    }
                },
            };
        };

        self.src.store_last_loc(&mut loc);
        if matches!(kind, TokenKind::End) {
            loc.last_column += 1;
        }

        let keyword = match &kind {
            TokenKind::Id(name) => Keyword::lookup(name),
            _ => None,
        };

        Token {
            kind,
            keyword,
            loc,
            newline_before: newline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::StringInput;

    fn lex_all(text: &str) -> Vec<TokenKind> {
        let mut lx = Lexer::new(StringInput::source("t", text));
        lx.prompter.quiet = true;
        let mut out = Vec::new();
        loop {
            let t = lx.token(FL_DIV);
            if t.kind.is_end() {
                break;
            }
            out.push(t.kind);
        }
        out
    }

    fn num(k: &TokenKind) -> f64 {
        match k {
            TokenKind::Number(n) => *n,
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn numbers_in_all_bases() {
        let toks = lex_all("42 0x2a 0b101010 0o52 1_000 3.5 1e3 2.5e-1");
        assert_eq!(num(&toks[0]), 42.0);
        assert_eq!(num(&toks[1]), 42.0);
        assert_eq!(num(&toks[2]), 42.0);
        assert_eq!(num(&toks[3]), 42.0);
        assert_eq!(num(&toks[4]), 1000.0);
        assert_eq!(num(&toks[5]), 3.5);
        assert_eq!(num(&toks[6]), 1000.0);
        assert_eq!(num(&toks[7]), 0.25);
    }

    #[test]
    fn dot_after_integer_stays_punct() {
        let toks = lex_all("1.foo");
        assert_eq!(num(&toks[0]), 1.0);
        assert!(matches!(toks[1], TokenKind::Punct(Punct::Dot)));
        assert!(matches!(&toks[2], TokenKind::Id(s) if s == "foo"));
    }

    #[test]
    fn string_escapes() {
        let toks = lex_all(r#""a\tb\x41\u{1F600}\101""#);
        match &toks[0] {
            TokenKind::Str(s) => assert_eq!(s, "a\tbA\u{1F600}A"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn char_literal_is_number() {
        let toks = lex_all("'A' '\\n'");
        assert_eq!(num(&toks[0]), 65.0);
        assert_eq!(num(&toks[1]), 10.0);
    }

    #[test]
    fn embedded_expression_splits_string() {
        let mut lx = Lexer::new(StringInput::source("t", "\"hello {1+2} world\""));
        lx.prompter.quiet = true;

        let t = lx.token(0);
        match &t.kind {
            TokenKind::StrHead(s) => assert_eq!(s, "hello "),
            other => panic!("{other:?}"),
        }
        assert_eq!(num(&lx.token(FL_DIV).kind), 1.0);
        assert!(lx.token(FL_DIV).is_punct(Punct::Plus));
        assert_eq!(num(&lx.token(FL_DIV).kind), 2.0);
        let t = lx.token(FL_DIV);
        match &t.kind {
            TokenKind::StrTail(s) => assert_eq!(s, " world"),
            other => panic!("{other:?}"),
        }
        assert!(lx.token(FL_DIV).kind.is_end());
    }

    #[test]
    fn nested_braces_inside_embedded_expression() {
        let mut lx = Lexer::new(StringInput::source("t", "\"a{ {b: 1}.b }c\""));
        lx.prompter.quiet = true;

        assert!(matches!(lx.token(0).kind, TokenKind::StrHead(_)));
        assert!(lx.token(FL_DIV).is_punct(Punct::LBrace));
        assert!(matches!(lx.token(FL_DIV).kind, TokenKind::Id(_)));
        assert!(lx.token(FL_DIV).is_punct(Punct::Colon));
        assert_eq!(num(&lx.token(FL_DIV).kind), 1.0);
        // This `}` closes the inner brace, not the string.
        assert!(lx.token(FL_DIV).is_punct(Punct::RBrace));
        assert!(lx.token(FL_DIV).is_punct(Punct::Dot));
        assert!(matches!(lx.token(FL_DIV).kind, TokenKind::Id(_)));
        assert!(matches!(lx.token(FL_DIV).kind, TokenKind::StrTail(_)));
    }

    #[test]
    fn triple_string_trims_blank_edges() {
        let mut lx = Lexer::new(StringInput::source("t", "''\n  body\n''"));
        lx.prompter.quiet = true;
        match lx.token(0).kind {
            TokenKind::Str(s) => assert_eq!(s, "  body"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn triple_string_embedded_expression() {
        let mut lx = Lexer::new(StringInput::source("t", "''a{{1}}b''"));
        lx.prompter.quiet = true;
        match lx.token(0).kind {
            TokenKind::StrHead(s) => assert_eq!(s, "a"),
            other => panic!("{other:?}"),
        }
        assert_eq!(num(&lx.token(FL_DIV).kind), 1.0);
        match lx.token(FL_DIV).kind {
            TokenKind::StrTail(s) => assert_eq!(s, "b"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn identifiers_and_keywords() {
        let mut lx = Lexer::new(StringInput::source("t", "for foo $x _y true null"));
        lx.prompter.quiet = true;

        let t = lx.token(FL_DIV);
        assert!(t.is_keyword(Keyword::For));
        assert!(matches!(lx.token(FL_DIV).kind, TokenKind::Id(s) if s == "foo"));
        assert!(matches!(lx.token(FL_DIV).kind, TokenKind::Id(s) if s == "$x"));
        assert!(matches!(lx.token(FL_DIV).kind, TokenKind::Id(s) if s == "_y"));
        assert!(matches!(lx.token(FL_DIV).kind, TokenKind::Bool(true)));
        assert!(matches!(lx.token(FL_DIV).kind, TokenKind::Null));
    }

    #[test]
    fn at_and_hash_identifiers() {
        let toks = lex_all("@outer #priv");
        assert!(matches!(&toks[0], TokenKind::AtId(s) if s == "outer"));
        assert!(matches!(&toks[1], TokenKind::HashId(s) if s == "priv"));
    }

    #[test]
    fn compound_punctuation() {
        let toks = lex_all("** >>> <<= .+= ... => :> && ||=");
        let expected = [
            Punct::StarStar,
            Punct::UShr,
            Punct::ShlAssign,
            Punct::DotPlusAssign,
            Punct::Ellipsis,
            Punct::FatArrow,
            Punct::ColonGt,
            Punct::AmpAmp,
            Punct::PipePipeAssign,
        ];
        for (t, e) in toks.iter().zip(expected) {
            assert!(matches!(t, TokenKind::Punct(p) if *p == e), "{t:?} != {e:?}");
        }
    }

    #[test]
    fn regex_literal_with_flags() {
        let mut lx = Lexer::new(StringInput::source("t", "/[a-z]+[0-9]*/ip"));
        lx.prompter.quiet = true;
        match lx.token(0).kind {
            TokenKind::Regex(c) => {
                assert_eq!(c.source, "[a-z]+[0-9]*");
                assert_eq!(
                    c.flags,
                    crate::regex::RE_FL_IGNORE_CASE | crate::regex::RE_FL_PERFECT
                );
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn slash_is_division_under_div_flag() {
        let toks = lex_all("6 / 2");
        assert!(matches!(toks[1], TokenKind::Punct(Punct::Slash)));
    }

    #[test]
    fn comments_are_skipped_and_newlines_tracked() {
        let mut lx = Lexer::new(StringInput::source("t", "a // c\nb /* x */ c"));
        lx.prompter.quiet = true;
        assert!(matches!(lx.token(FL_DIV).kind, TokenKind::Id(_)));
        let b = lx.token(FL_DIV);
        assert!(b.newline_before);
        let c = lx.token(FL_DIV);
        assert!(!c.newline_before);
    }

    #[test]
    fn doc_comments_collected_when_enabled() {
        let mut lx = Lexer::new(StringInput::source("t", "//? first line\n//? second\nx"));
        lx.prompter.quiet = true;
        lx.enable_doc();

        let t = lx.token(FL_DIV);
        match &t.kind {
            TokenKind::Doc(s) => {
                assert!(s.contains("first line"));
                assert!(s.contains("second"));
            }
            other => panic!("{other:?}"),
        }
        assert!(matches!(lx.token(FL_DIV).kind, TokenKind::Id(_)));
    }

    #[test]
    fn string_format_word() {
        let mut lx = Lexer::new(StringInput::source("t", "-10.3f"));
        lx.prompter.quiet = true;
        let t = lx.token(FL_STR_FMT);
        let word = num(&t.kind) as u32;
        assert_eq!(crate::runtime::format::sout_format(word), SoutFormat::Float);
        assert_eq!(crate::runtime::format::sout_width(word), 10);
        assert_eq!(crate::runtime::format::sout_prec(word), 3);
        assert_ne!(word & SOUT_FL_ALIGN_HEAD, 0);
    }

    #[test]
    fn shebang_skipped_before_body() {
        let toks = lex_all("#!/usr/bin/ox\n1");
        assert_eq!(num(&toks[0]), 1.0);
    }

    #[test]
    fn illegal_character_reports_and_continues() {
        let mut lx = Lexer::new(StringInput::source("t", "\u{1}  7"));
        lx.prompter.quiet = true;
        let t = lx.token(FL_DIV);
        assert_eq!(num(&t.kind), 7.0);
        assert!(lx.has_errors());
    }

    #[test]
    fn decode_error_reports_and_scanning_resumes() {
        // A stream whose source had an undecodable byte between tokens:
        // the error reports once and the recovered content still lexes.
        let stream = StringInput::with_error_at("1 2".into(), Some(2));
        let src = crate::input::Source::new("t", Box::new(stream));
        let mut lx = Lexer::new(src);
        lx.prompter.quiet = true;

        assert_eq!(num(&lx.token(FL_DIV).kind), 1.0);
        assert_eq!(num(&lx.token(FL_DIV).kind), 2.0);
        assert!(lx.token(FL_DIV).kind.is_end());
        assert!(lx.has_errors());
    }
}
