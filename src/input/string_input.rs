use std::io;

use crate::input::{Chr, InputStream, Source};

/// An in-memory input over UTF-8 text.
pub struct StringInput {
    text: std::rc::Rc<str>,
    pos: usize,
    /// Offset in the decoded text where an undecodable source byte was
    /// skipped. Crossing it yields one [`Chr::Err`]; reading then resumes
    /// with the recovered content.
    err_at: Option<usize>,
    err_reported: bool,
}

impl StringInput {
    pub fn new(text: impl Into<std::rc::Rc<str>>) -> Self {
        StringInput {
            text: text.into(),
            pos: 0,
            err_at: None,
            err_reported: false,
        }
    }

    pub(crate) fn with_error_at(text: std::rc::Rc<str>, err_at: Option<usize>) -> Self {
        StringInput {
            text,
            pos: 0,
            err_at,
            err_reported: false,
        }
    }

    /// Convenience constructor producing a positioned [`Source`].
    pub fn source(name: impl Into<String>, text: impl Into<std::rc::Rc<str>>) -> Source {
        Source::new(name, Box::new(StringInput::new(text)))
    }
}

impl InputStream for StringInput {
    fn next_char(&mut self) -> Chr {
        if let Some(at) = self.err_at
            && !self.err_reported
            && self.pos >= at
        {
            self.err_reported = true;
            return Chr::Err;
        }

        match self.text[self.pos..].chars().next() {
            Some(c) => {
                self.pos += c.len_utf8();
                Chr::Char(c)
            }
            None => Chr::End,
        }
    }

    fn tell(&self) -> u64 {
        self.pos as u64
    }

    fn reopen(&self, offset: u64) -> io::Result<Box<dyn InputStream>> {
        let mut input = StringInput::with_error_at(self.text.clone(), self.err_at);
        input.pos = (offset as usize).min(self.text.len());
        // Do not split a code point.
        while input.pos > 0 && !self.text.is_char_boundary(input.pos) {
            input.pos -= 1;
        }
        // An error position already behind the reopen point was reported
        // by the original stream.
        input.err_reported = self.err_at.is_some_and(|at| input.pos >= at);
        Ok(Box::new(input))
    }
}
