use crate::input::{Location, Source};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PromptKind {
    Error,
    Warning,
    Note,
}

/// One diagnostic emitted by the lexer, parser, or regex front-end.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub kind: PromptKind,
    pub loc: Location,
    pub message: String,
}

/// The prompt channel: diagnostics are logged with a rendered source
/// excerpt and collected for the embedder. Analysis continues after an
/// error so downstream can keep finding structure.
#[derive(Default)]
pub struct Prompter {
    diagnostics: Vec<Diagnostic>,
    errors: usize,
    /// Suppresses output (used when speculatively re-scanning).
    pub quiet: bool,
}

impl Prompter {
    pub fn new() -> Self {
        Prompter::default()
    }

    pub fn emit(&mut self, src: &Source, kind: PromptKind, loc: Location, message: impl Into<String>) {
        let message = message.into();
        if kind == PromptKind::Error {
            self.errors += 1;
        }
        if !self.quiet {
            let head = format!(
                "{}:{}:{}: {}",
                src.name(),
                loc.first_line,
                loc.first_column,
                message
            );
            match kind {
                PromptKind::Error => log::error!("{head}"),
                PromptKind::Warning => log::warn!("{head}"),
                PromptKind::Note => log::info!("{head}"),
            }
            if let Some((text, cursor)) = src.excerpt(&loc) {
                log::debug!("{text}");
                if !cursor.is_empty() {
                    log::debug!("{cursor}");
                }
            }
        }
        self.diagnostics.push(Diagnostic { kind, loc, message });
    }

    pub fn error(&mut self, src: &Source, loc: Location, message: impl Into<String>) {
        self.emit(src, PromptKind::Error, loc, message);
    }

    pub fn warning(&mut self, src: &Source, loc: Location, message: impl Into<String>) {
        self.emit(src, PromptKind::Warning, loc, message);
    }

    pub fn note(&mut self, src: &Source, loc: Location, message: impl Into<String>) {
        self.emit(src, PromptKind::Note, loc, message);
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}
