//! Regular expressions: pattern parsing, command compilation, and the
//! backtracking matcher. The value-level surface (the `Re` class, match
//! objects) lives in the runtime builtins; this module is self-contained
//! over plain Rust data so the lexer can compile literals without a VM.

pub mod compile;
pub mod exec;
pub mod match_result;
pub mod pattern;

use crate::input::prompt::Prompter;
use crate::input::{Source, StringInput};
use crate::regex::compile::Cmd;
use crate::regex::pattern::{ParsedPattern, PatEnd};
use crate::values::object::{Object, push_ref};
use crate::values::value::{ObjRef, Value};

pub const RE_FL_IGNORE_CASE: u32 = 1 << 0;
pub const RE_FL_MULTILINE: u32 = 1 << 1;
pub const RE_FL_DOT_ALL: u32 = 1 << 2;
pub const RE_FL_UNICODE: u32 = 1 << 3;
/// The whole string must be consumed.
pub const RE_FL_PERFECT: u32 = 1 << 4;

/// Flag letters in their canonical order.
const FLAG_LETTERS: [(u32, char); 5] = [
    (RE_FL_IGNORE_CASE, 'i'),
    (RE_FL_MULTILINE, 'm'),
    (RE_FL_DOT_ALL, 'd'),
    (RE_FL_UNICODE, 'u'),
    (RE_FL_PERFECT, 'p'),
];

/// Parses a flag-letter string (`"imdup"`); unknown letters are ignored.
pub fn flags_from_str(s: &str) -> u32 {
    let mut flags = 0;
    for c in s.chars() {
        for (bit, letter) in FLAG_LETTERS {
            if c == letter {
                flags |= bit;
            }
        }
    }
    flags
}

/// Renders flags as letters in the fixed `i m d u p` order.
pub fn flags_to_str(flags: u32) -> String {
    FLAG_LETTERS
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, letter)| *letter)
        .collect()
}

/// A compiled pattern, independent of any VM: the lexer carries these in
/// regex-literal tokens.
#[derive(Clone, Debug)]
pub struct Compiled {
    pub source: String,
    pub group_count: usize,
    pub cmds: Vec<Cmd>,
    pub flags: u32,
}

impl Compiled {
    /// Compiles `source` as a pattern. Diagnostics go to the prompter; a
    /// `None` means errors were reported.
    pub fn from_str(source: &str, flags: u32, prompter: &mut Prompter) -> Option<Compiled> {
        let mut src = StringInput::source("<regex>", source);
        let parsed = pattern::parse(&mut src, prompter, PatEnd::InputEnd, false)?;
        Some(Compiled::finish(parsed, source.to_owned(), flags))
    }

    /// Compiles a regex literal inline: the source cursor sits right after
    /// the opening `/`; the consumed text is captured as the source form.
    pub fn from_input(src: &mut Source, prompter: &mut Prompter) -> Option<Compiled> {
        let parsed = pattern::parse(src, prompter, PatEnd::Delim('/'), true)?;
        let mut source = parsed.source.clone();
        // The captured text includes the closing delimiter.
        if source.ends_with('/') {
            source.pop();
        }
        Some(Compiled::finish(parsed, source, 0))
    }

    fn finish(parsed: ParsedPattern, source: String, flags: u32) -> Compiled {
        let cmds = compile::compile(&parsed.pattern);
        Compiled {
            source,
            group_count: parsed.group_count,
            cmds,
            flags,
        }
    }

    /// `"/" + source + "/" + flags` in canonical flag order.
    pub fn display_form(&self) -> String {
        format!("/{}/{}", self.source, flags_to_str(self.flags))
    }

    /// Matches `s` from byte offset `start`. `extra_flags` are OR-ed onto
    /// the compiled flags for this one application.
    pub fn exec(
        &self,
        s: &str,
        start: usize,
        extra_flags: u32,
    ) -> Result<Option<exec::ExecMatch>, exec::BadUnicode> {
        exec::exec(
            &self.cmds,
            self.group_count,
            self.flags | extra_flags,
            s,
            start,
        )
    }
}

/// The managed regex value: immutable after construction.
#[derive(Debug)]
pub struct Regex {
    pub obj: Object,
    pub src: Value,
    pub flags: u32,
    pub group_count: usize,
    pub cmds: Vec<Cmd>,
}

impl Regex {
    pub fn empty(obj: Object) -> Self {
        Regex {
            obj,
            src: Value::Null,
            flags: 0,
            group_count: 1,
            cmds: Vec::new(),
        }
    }

    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        self.obj.trace(out);
        push_ref(self.src, out);
    }

    pub fn size_hint(&self) -> usize {
        self.cmds.len() * size_of::<Cmd>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ok(src: &str, flags: u32) -> Compiled {
        let mut prompter = Prompter::new();
        prompter.quiet = true;
        Compiled::from_str(src, flags, &mut prompter).expect("pattern compiles")
    }

    fn find(c: &Compiled, s: &str) -> Option<(usize, usize)> {
        c.exec(s, 0, 0).unwrap().map(|m| (m.start, m.end))
    }

    #[test]
    fn literal_sequence() {
        let c = compile_ok("abc", 0);
        assert_eq!(find(&c, "xxabcyy"), Some((2, 5)));
        assert_eq!(find(&c, "ab"), None);
    }

    #[test]
    fn alternation_and_grouping() {
        let c = compile_ok("a(b|c)d", 0);
        assert_eq!(find(&c, "abd"), Some((0, 3)));
        assert_eq!(find(&c, "acd"), Some((0, 3)));
        assert_eq!(find(&c, "aed"), None);
    }

    #[test]
    fn greedy_and_lazy_star() {
        let c = compile_ok("a.*b", 0);
        assert_eq!(find(&c, "axxbxxb"), Some((0, 7)));

        let lazy = compile_ok("a.*?b", 0);
        assert_eq!(find(&lazy, "axxbxxb"), Some((0, 4)));
    }

    #[test]
    fn bounded_repetition() {
        let c = compile_ok("a{2,3}", 0);
        assert_eq!(find(&c, "aaaa"), Some((0, 3)));
        assert_eq!(find(&c, "a"), None);
    }

    #[test]
    fn character_classes() {
        let c = compile_ok("[a-z0-9]+", 0);
        assert_eq!(find(&c, "--ab12--"), Some((2, 6)));

        let rev = compile_ok("[^0-9]+", 0);
        assert_eq!(find(&rev, "12ab34"), Some((2, 4)));
    }

    #[test]
    fn groups_capture_slices() {
        let c = compile_ok("([a-z]+)([0-9]+)", 0);
        let m = c.exec("abc012", 0, 0).unwrap().unwrap();
        assert_eq!((m.start, m.end), (0, 6));
        assert_eq!(m.slices.len(), 3);
        assert_eq!((m.slices[0].start, m.slices[0].end), (0, 6));
        assert_eq!((m.slices[1].start, m.slices[1].end), (0, 3));
        assert_eq!((m.slices[2].start, m.slices[2].end), (3, 6));
    }

    #[test]
    fn anchors_and_multiline() {
        let c = compile_ok("^b", 0);
        assert_eq!(find(&c, "a\nb"), None);

        let m = compile_ok("^b", RE_FL_MULTILINE);
        assert_eq!(find(&m, "a\nb"), Some((2, 3)));

        let e = compile_ok("a$", 0);
        assert_eq!(find(&e, "ba"), Some((1, 2)));
    }

    #[test]
    fn word_boundaries() {
        let c = compile_ok(r"\bfoo\b", 0);
        assert_eq!(find(&c, "a foo b"), Some((2, 5)));
        assert_eq!(find(&c, "afoob"), None);
    }

    #[test]
    fn back_reference() {
        let c = compile_ok(r"(ab)\1", 0);
        assert_eq!(find(&c, "xabab"), Some((1, 5)));
        assert_eq!(find(&c, "abac"), None);
    }

    #[test]
    fn lookahead() {
        let c = compile_ok("a(?=b)", 0);
        assert_eq!(find(&c, "ab"), Some((0, 1)));
        assert_eq!(find(&c, "ac"), None);

        let n = compile_ok("a(?!b)", 0);
        assert_eq!(find(&n, "ac"), Some((0, 1)));
        assert_eq!(find(&n, "ab"), None);
    }

    #[test]
    fn lookbehind() {
        let c = compile_ok("(?<=a)b", 0);
        assert_eq!(find(&c, "ab"), Some((1, 2)));
        assert_eq!(find(&c, "cb"), None);

        let n = compile_ok("(?<!a)b", 0);
        assert_eq!(find(&n, "cb"), Some((1, 2)));
        assert_eq!(find(&n, "ab"), None);
    }

    #[test]
    fn ignore_case() {
        let c = compile_ok("abc", RE_FL_IGNORE_CASE);
        assert_eq!(find(&c, "xAbCx"), Some((1, 4)));

        let r = compile_ok("[a-z]+", RE_FL_IGNORE_CASE);
        assert_eq!(find(&r, "XYZ"), Some((0, 3)));
    }

    #[test]
    fn perfect_requires_whole_string() {
        let c = compile_ok("[0-9]+", RE_FL_PERFECT);
        assert_eq!(find(&c, "123"), Some((0, 3)));
        assert_eq!(find(&c, "123x"), None);
        assert_eq!(find(&c, "x123"), None);
    }

    #[test]
    fn dot_all_and_unicode() {
        let d = compile_ok("a.b", 0);
        assert_eq!(find(&d, "a\nb"), None);
        let d2 = compile_ok("a.b", RE_FL_DOT_ALL);
        assert_eq!(find(&d2, "a\nb"), Some((0, 3)));

        let u = compile_ok("é+", RE_FL_UNICODE);
        assert_eq!(find(&u, "ééx"), Some((0, 4)));
    }

    #[test]
    fn flag_letters_roundtrip() {
        let flags = flags_from_str("pi");
        assert_eq!(flags, RE_FL_IGNORE_CASE | RE_FL_PERFECT);
        assert_eq!(flags_to_str(flags), "ip");
    }

    #[test]
    fn display_form_is_slash_wrapped() {
        let c = compile_ok("a+b", RE_FL_IGNORE_CASE | RE_FL_UNICODE);
        assert_eq!(c.display_form(), "/a+b/iu");
    }

    #[test]
    fn syntax_error_reports() {
        let mut prompter = Prompter::new();
        prompter.quiet = true;
        assert!(Compiled::from_str("a(b", 0, &mut prompter).is_none());
        assert!(prompter.has_errors());
    }
}
