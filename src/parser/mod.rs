//! Recursive-descent parser with an operator-precedence ladder for
//! expressions.
//!
//! The parser drives the lexer token by token, feeding back whether `/` is
//! a division, whether a string-format word follows, and collecting doc
//! comments. Per function it tracks a declaration map with the conflict
//! rules; errors recover to caller-chosen synchronization points so one
//! mistake does not drown the rest of the file.

pub mod ast;

use crate::input::prompt::Diagnostic;
use crate::input::{Location, Source};
use crate::lexer::{FL_DIV, FL_STR_FMT, Keyword, Lexer, Punct, Token, TokenKind};
use crate::parser::ast::*;
use crate::runtime::script::DeclKind;

// Expression priorities, lowest binding first.
const PRIO_LOWEST: u8 = 0;
const PRIO_COMMA: u8 = 1;
const PRIO_ASSI: u8 = 2;
const PRIO_LOGIC_OR: u8 = 3;
const PRIO_LOGIC_AND: u8 = 4;
const PRIO_BIT_OR: u8 = 5;
const PRIO_BIT_XOR: u8 = 6;
const PRIO_BIT_AND: u8 = 7;
const PRIO_EQ: u8 = 8;
const PRIO_REL: u8 = 9;
const PRIO_SHIFT: u8 = 10;
const PRIO_ADD: u8 = 11;
const PRIO_MUL: u8 = 12;
const PRIO_EXP: u8 = 13;
const PRIO_UNARY: u8 = 14;
const PRIO_HIGHEST: u8 = 16;

// Error-recovery synchronization categories.
const RECOVER_LF: u32 = 1 << 0;
const RECOVER_SEMICOLON: u32 = 1 << 1;
const RECOVER_BLOCK: u32 = 1 << 2;
const RECOVER_COMMA: u32 = 1 << 3;
const RECOVER_RP: u32 = 1 << 4;
const RECOVER_RSB: u32 = 1 << 5;
const RECOVER_RB: u32 = 1 << 6;
const RECOVER_STR_PART: u32 = 1 << 7;

// Context flags gating productions.
const FL_RETURN: u32 = 1 << 0;
const FL_BREAK: u32 = 1 << 1;
const FL_CONTINUE: u32 = 1 << 2;
const FL_PUBLIC: u32 = 1 << 3;
const FL_TEXTDOMAIN: u32 = 1 << 4;

/// Which kind of literal a `{ … }` / `[ … ]` block is building.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ItemCtx {
    Array,
    Object,
}

/// Outcome of a parse: the AST plus collected diagnostics. The AST is
/// usable even when errors were reported, for tooling that keeps going.
pub struct ParseResult {
    pub ast: ScriptAst,
    pub diagnostics: Vec<Diagnostic>,
    pub ok: bool,
}

pub struct Parser {
    lx: Lexer,
    tok: Token,
    pushback: Option<Token>,
    last_value: bool,
    script: ScriptAst,
    cur: FuncId,
    flags: u32,
    flag_stack: Vec<u32>,
    doc: Option<String>,
    errors: usize,
}

/// Parses a whole compilation unit from a character source.
pub fn parse_source(src: Source) -> ParseResult {
    let mut lx = Lexer::new(src);
    lx.enable_doc();
    Parser::new(lx).parse()
}

/// Convenience entry over in-memory text.
pub fn parse_str(name: &str, text: &str) -> ParseResult {
    parse_source(crate::input::StringInput::source(name, text))
}

impl Parser {
    pub fn new(lx: Lexer) -> Self {
        let mut script = ScriptAst::default();
        script.funcs.push(FuncAst::default());

        Parser {
            lx,
            tok: Token::end(),
            pushback: None,
            last_value: false,
            script,
            cur: 0,
            flags: FL_PUBLIC | FL_TEXTDOMAIN,
            flag_stack: Vec::new(),
            doc: None,
            errors: 0,
        }
    }

    pub fn parse(mut self) -> ParseResult {
        let mut stmts = Vec::new();

        loop {
            self.next();
            if self.tok.kind.is_end() {
                break;
            }
            self.unget();

            match self.statement() {
                Ok(Stmt::Empty) => {}
                Ok(stmt) => stmts.push(stmt),
                Err(()) => {
                    if self
                        .recover(RECOVER_LF | RECOVER_SEMICOLON | RECOVER_BLOCK)
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }

        self.script.funcs[0].body = Block {
            stmts,
            loc: self.tok.loc,
        };

        let ok = self.errors == 0 && !self.lx.has_errors();
        ParseResult {
            ast: self.script,
            diagnostics: self.lx.prompter.diagnostics().to_vec(),
            ok,
        }
    }

    // ---- token plumbing -------------------------------------------------

    fn next_flags(&mut self, extra: u32) {
        if let Some(t) = self.pushback.take() {
            self.tok = t;
        } else {
            loop {
                let mut flags = extra;
                if self.last_value {
                    flags |= FL_DIV;
                }
                let t = self.lx.token(flags);
                if let TokenKind::Doc(text) = &t.kind {
                    self.store_doc(text.clone());
                    continue;
                }
                self.tok = t;
                break;
            }
        }
        self.last_value = token_is_value(&self.tok);
    }

    fn next(&mut self) {
        self.next_flags(0);
    }

    fn unget(&mut self) {
        debug_assert!(self.pushback.is_none());
        self.pushback = Some(self.tok.clone());
        self.last_value = false;
    }

    fn store_doc(&mut self, text: String) {
        if is_doc_block_command(&text) {
            self.script.docs.push(text);
        } else {
            match &mut self.doc {
                Some(doc) => {
                    doc.push('\n');
                    doc.push_str(&text);
                }
                None => self.doc = Some(text),
            }
        }
    }

    fn error(&mut self, loc: Location, msg: impl Into<String>) {
        self.errors += 1;
        self.lx.report_error(loc, msg);
    }

    fn note(&mut self, loc: Location, msg: impl Into<String>) {
        self.lx.report_note(loc, msg);
    }

    fn unexpected(&mut self, expected: &str) {
        let desc = self.tok.kind.describe();
        let loc = self.tok.loc;
        self.error(loc, format!("expect {expected} but found {desc}"));
    }

    fn expect_punct(&mut self, p: Punct) -> Result<(), ()> {
        self.next();
        if self.tok.is_punct(p) {
            Ok(())
        } else {
            self.unexpected(&format!("`{p}'"));
            self.unget();
            Err(())
        }
    }

    fn eat_punct(&mut self, p: Punct) -> bool {
        self.next();
        if self.tok.is_punct(p) {
            true
        } else {
            self.unget();
            false
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        self.next();
        if self.tok.is_keyword(kw) {
            true
        } else {
            self.unget();
            false
        }
    }

    /// Skips to a synchronization point requested by the caller, tracking
    /// bracket balance so recovery never stops inside nested structure.
    fn recover(&mut self, flags: u32) -> Result<(), ()> {
        let mut braces = 0i32;
        let mut brackets = 0i32;
        let mut parens = 0i32;

        loop {
            self.next();

            match self.tok.kind.punct() {
                Some(Punct::LBrace) => braces += 1,
                Some(Punct::RBrace) => braces -= 1,
                Some(Punct::LBracket) => brackets += 1,
                Some(Punct::RBracket) => brackets -= 1,
                Some(Punct::LParen) => parens += 1,
                Some(Punct::RParen) => parens -= 1,
                _ => {}
            }

            if self.tok.kind.is_end() {
                return Err(());
            }

            if flags & RECOVER_LF != 0 && self.tok.newline_before {
                self.unget();
                return Ok(());
            }
            if flags & RECOVER_COMMA != 0 && self.tok.is_punct(Punct::Comma) {
                return Ok(());
            }
            if flags & RECOVER_SEMICOLON != 0 && self.tok.is_punct(Punct::Semicolon) {
                return Ok(());
            }
            if flags & RECOVER_BLOCK != 0 && self.tok.is_punct(Punct::RBrace) && braces == 0 {
                return Ok(());
            }
            if flags & RECOVER_RP != 0 && self.tok.is_punct(Punct::RParen) && parens == -1 {
                return Err(());
            }
            if flags & RECOVER_RSB != 0 && self.tok.is_punct(Punct::RBracket) && brackets == -1 {
                return Err(());
            }
            if flags & RECOVER_RB != 0 && self.tok.is_punct(Punct::RBrace) && braces == -1 {
                return Err(());
            }
            if flags & RECOVER_STR_PART != 0 {
                if matches!(self.tok.kind, TokenKind::StrMid(_)) {
                    return Ok(());
                }
                if matches!(self.tok.kind, TokenKind::StrTail(_)) {
                    return Err(());
                }
            }
        }
    }

    // ---- declarations ---------------------------------------------------

    /// Adds a declaration with the conflict rules: same kind is a no-op,
    /// var upgrades to param, const and ref never redeclare, anything else
    /// conflicts. Both sites are cited on error.
    fn add_decl(&mut self, name: &str, kind: DeclKind, loc: Location) {
        let func = &mut self.script.funcs[self.cur];
        match func.decls.get(name) {
            None => {
                func.decls.insert(
                    name.to_owned(),
                    DeclInfo {
                        kind,
                        loc,
                        auto_close: false,
                    },
                );
            }
            Some(old) => {
                let old_kind = old.kind;
                let old_loc = old.loc;
                // Constants and references never redeclare, not even under
                // the same kind.
                if old_kind == DeclKind::Const || old_kind == DeclKind::Ref {
                    let what = if old_kind == DeclKind::Const {
                        "a constant"
                    } else {
                        "a reference"
                    };
                    self.error(
                        loc,
                        format!("\"{name}\" has already been declared as {what}"),
                    );
                    self.note(old_loc, format!("previous declaration of \"{name}\" is here"));
                    return;
                }
                if old_kind == kind {
                    return;
                }
                if old_kind == DeclKind::Var && kind == DeclKind::Param {
                    func.decls.get_mut(name).expect("decl").kind = DeclKind::Param;
                    return;
                }
                if old_kind == DeclKind::Param && kind == DeclKind::Var {
                    // Assigning to a parameter is fine.
                    return;
                }
                self.error(
                    loc,
                    format!("\"{name}\" has been declared as a different kind"),
                );
                self.note(old_loc, format!("previous declaration of \"{name}\" is here"));
            }
        }
    }

    /// Resolves a used identifier: unseen names found in an enclosing
    /// function become outer declarations so the compiler can build the
    /// capture list.
    fn reference_id(&mut self, name: &str, loc: Location) {
        if self.script.funcs[self.cur].decls.contains_key(name) {
            return;
        }

        let mut scope = self.script.funcs[self.cur].outer;
        while let Some(f) = scope {
            if self.script.funcs[f].decls.contains_key(name) {
                self.add_decl(name, DeclKind::Outer, loc);
                return;
            }
            scope = self.script.funcs[f].outer;
        }
    }

    /// Declares every binding inside an assignment target (identifier or
    /// destructuring pattern).
    fn declare_pattern(&mut self, target: &Expr, kind: DeclKind, loc: Location) {
        match target {
            Expr::Id(name) => self.add_decl(&name.clone(), kind, loc),
            Expr::Array(items) | Expr::ObjectLit(items) => {
                for item in items.clone() {
                    match item {
                        Item::Value(e) | Item::Spread(e) => self.declare_pattern(&e, kind, loc),
                        Item::Prop { value, .. } => self.declare_pattern(&value, kind, loc),
                        _ => {}
                    }
                }
            }
            Expr::Assign { target, .. } => self.declare_pattern(&target.clone(), kind, loc),
            _ => {}
        }
    }

    // ---- statements -----------------------------------------------------

    /// A statement terminates at `;`, a newline, a closing brace, or the
    /// end of input.
    fn stmt_end(&mut self) -> Result<(), ()> {
        self.next();
        match &self.tok.kind {
            TokenKind::End => Ok(()),
            TokenKind::Punct(Punct::Semicolon) => Ok(()),
            TokenKind::Punct(Punct::RBrace) => {
                self.unget();
                Ok(())
            }
            _ if self.tok.newline_before => {
                self.unget();
                Ok(())
            }
            _ => {
                self.unexpected("end of statement");
                self.unget();
                Err(())
            }
        }
    }

    fn statement(&mut self) -> Result<Stmt, ()> {
        let doc = self.doc.take();
        self.next();

        if self.tok.is_punct(Punct::Semicolon) || self.tok.kind.is_end() {
            return Ok(Stmt::Empty);
        }

        if matches!(self.tok.kind, TokenKind::Id(_)) {
            match self.tok.keyword {
                Some(Keyword::If) => return self.if_stmt(),
                Some(Keyword::Do) => return self.do_while_stmt(),
                Some(Keyword::While) => return self.while_stmt(),
                Some(Keyword::For) => return self.for_stmt(),
                Some(Keyword::Sched) => return self.sched_stmt(),
                Some(Keyword::Case) => return self.case_stmt(),
                Some(Keyword::Try) => return self.try_stmt(),
                Some(Keyword::Return) => return self.return_stmt(),
                Some(Keyword::Throw) => return self.throw_stmt(),
                Some(Keyword::Break) => return self.break_stmt(),
                Some(Keyword::Continue) => return self.continue_stmt(),
                Some(Keyword::Public) if self.flags & FL_PUBLIC != 0 => {
                    return self.public_stmt();
                }
                Some(Keyword::Ref) => return self.ref_stmt(),
                Some(Keyword::Textdomain) if self.flags & FL_TEXTDOMAIN != 0 => {
                    return self.textdomain_stmt();
                }
                _ => {}
            }
        }

        self.unget();
        let expr = self.expression()?;
        self.stmt_end()?;
        Ok(Stmt::Expr { expr, doc })
    }

    fn stmt_block(&mut self) -> Result<Block, ()> {
        self.expect_punct(Punct::LBrace)?;
        let start = self.tok.loc;
        let old_flags = self.flags;
        self.flags &= !(FL_PUBLIC | FL_TEXTDOMAIN);

        let mut stmts = Vec::new();
        loop {
            self.next();
            if self.tok.is_punct(Punct::RBrace) {
                break;
            }
            if self.tok.kind.is_end() {
                self.unexpected("`}'");
                break;
            }
            self.unget();

            match self.statement() {
                Ok(Stmt::Empty) => {}
                Ok(s) => stmts.push(s),
                Err(()) => {
                    if self
                        .recover(RECOVER_LF | RECOVER_SEMICOLON | RECOVER_BLOCK)
                        .is_err()
                    {
                        break;
                    }
                    if self.tok.is_punct(Punct::RBrace) {
                        break;
                    }
                }
            }
        }

        self.flags = old_flags;
        Ok(Block {
            stmts,
            loc: Location::merge(&start, &self.tok.loc),
        })
    }

    fn loop_block(&mut self) -> Result<Block, ()> {
        let old = self.flags;
        self.flags |= FL_BREAK | FL_CONTINUE;
        let block = self.stmt_block();
        self.flags = old;
        block
    }

    fn if_arms(&mut self) -> Result<(Vec<(Expr, Block)>, Option<Block>), ()> {
        let mut arms = Vec::new();
        let mut default = None;

        loop {
            let cond = self.expression_prio(PRIO_COMMA)?;
            let block = self.stmt_block()?;
            arms.push((cond, block));

            self.next();
            if self.tok.is_keyword(Keyword::Elif) {
                continue;
            }
            if self.tok.is_keyword(Keyword::Else) {
                default = Some(self.stmt_block()?);
                break;
            }
            self.unget();
            break;
        }

        Ok((arms, default))
    }

    fn if_stmt(&mut self) -> Result<Stmt, ()> {
        let (arms, default) = self.if_arms()?;
        Ok(Stmt::If { arms, default })
    }

    fn do_while_stmt(&mut self) -> Result<Stmt, ()> {
        let body = self.loop_block()?;
        self.next();
        if !self.tok.is_keyword(Keyword::While) {
            self.unexpected("`while'");
            self.unget();
            return Err(());
        }
        let cond = self.expression_prio(PRIO_COMMA)?;
        self.stmt_end()?;
        Ok(Stmt::DoWhile { body, cond })
    }

    fn while_stmt(&mut self) -> Result<Stmt, ()> {
        let cond = self.expression_prio(PRIO_COMMA)?;
        let body = self.loop_block()?;
        Ok(Stmt::While { cond, body })
    }

    /// `for init; cond; step { }` and `for pattern as iterable { }`.
    fn for_stmt(&mut self) -> Result<Stmt, ()> {
        // Empty init: `for ; cond; step`.
        if self.eat_punct(Punct::Semicolon) {
            return self.for_tail(None);
        }

        let first = self.expression_prio(PRIO_COMMA)?;

        if self.eat_keyword(Keyword::As) {
            self.declare_pattern(&first, DeclKind::Var, self.tok.loc);
            let iter = self.expression_prio(PRIO_COMMA)?;
            let body = self.loop_block()?;
            return Ok(Stmt::ForAs {
                pattern: first,
                iter,
                body,
            });
        }

        self.expect_punct(Punct::Semicolon)?;
        self.for_tail(Some(first))
    }

    fn for_tail(&mut self, init: Option<Expr>) -> Result<Stmt, ()> {
        let cond = if self.eat_punct(Punct::Semicolon) {
            None
        } else {
            let c = self.expression_prio(PRIO_COMMA)?;
            self.expect_punct(Punct::Semicolon)?;
            Some(c)
        };

        let step = {
            self.next();
            if self.tok.is_punct(Punct::LBrace) {
                self.unget();
                None
            } else {
                self.unget();
                Some(self.expression()?)
            }
        };

        let body = self.loop_block()?;
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
        })
    }

    fn sched_stmt(&mut self) -> Result<Stmt, ()> {
        let body = self.stmt_block()?;
        Ok(Stmt::Sched(body))
    }

    fn case_arms_blocks(&mut self) -> Result<(Vec<(Vec<Expr>, Block)>, Option<Block>), ()> {
        self.expect_punct(Punct::LBrace)?;

        let mut arms = Vec::new();
        let mut default = None;

        loop {
            self.next();
            if self.tok.is_punct(Punct::RBrace) {
                break;
            }
            if self.tok.kind.is_end() {
                self.unexpected("`}'");
                break;
            }
            if self.tok.is_keyword(Keyword::Else) {
                default = Some(self.stmt_block()?);
                continue;
            }
            self.unget();

            let mut values = vec![self.expression_prio(PRIO_COMMA)?];
            while self.eat_punct(Punct::Comma) {
                values.push(self.expression_prio(PRIO_COMMA)?);
            }
            let block = self.stmt_block()?;
            arms.push((values, block));
        }

        Ok((arms, default))
    }

    fn case_stmt(&mut self) -> Result<Stmt, ()> {
        let subject = self.expression_prio(PRIO_COMMA)?;
        let (arms, default) = self.case_arms_blocks()?;
        Ok(Stmt::Case {
            subject,
            arms,
            default,
        })
    }

    fn try_stmt(&mut self) -> Result<Stmt, ()> {
        let body = self.stmt_block()?;

        let catch = if self.eat_keyword(Keyword::Catch) {
            // Optional error binding.
            let name = {
                self.next();
                match (&self.tok.kind, self.tok.keyword) {
                    (TokenKind::Id(n), None) => {
                        let n = n.clone();
                        self.add_decl(&n, DeclKind::Var, self.tok.loc);
                        Some(n)
                    }
                    _ => {
                        self.unget();
                        None
                    }
                }
            };
            Some((name, self.stmt_block()?))
        } else {
            None
        };

        let finally = if self.eat_keyword(Keyword::Finally) {
            Some(self.stmt_block()?)
        } else {
            None
        };

        if catch.is_none() && finally.is_none() {
            self.unexpected("`catch' or `finally'");
        }

        Ok(Stmt::Try {
            body,
            catch,
            finally,
        })
    }

    fn return_stmt(&mut self) -> Result<Stmt, ()> {
        if self.flags & FL_RETURN == 0 {
            let loc = self.tok.loc;
            self.error(loc, "`return' cannot be used here");
        }

        self.next();
        let has_value = !self.tok.newline_before
            && !self.tok.kind.is_end()
            && !self.tok.is_punct(Punct::Semicolon)
            && !self.tok.is_punct(Punct::RBrace);
        self.unget();

        let value = if has_value {
            Some(self.expression()?)
        } else {
            None
        };
        self.stmt_end()?;
        Ok(Stmt::Return(value))
    }

    fn throw_stmt(&mut self) -> Result<Stmt, ()> {
        self.next();
        let has_value = !self.tok.newline_before
            && !self.tok.kind.is_end()
            && !self.tok.is_punct(Punct::Semicolon)
            && !self.tok.is_punct(Punct::RBrace);
        self.unget();

        let value = if has_value {
            Some(self.expression()?)
        } else {
            None
        };
        self.stmt_end()?;
        Ok(Stmt::Throw(value))
    }

    fn break_stmt(&mut self) -> Result<Stmt, ()> {
        if self.flags & FL_BREAK == 0 {
            let loc = self.tok.loc;
            self.error(loc, "`break' cannot be used here");
        }
        self.stmt_end()?;
        Ok(Stmt::Break)
    }

    fn continue_stmt(&mut self) -> Result<Stmt, ()> {
        if self.flags & FL_CONTINUE == 0 {
            let loc = self.tok.loc;
            self.error(loc, "`continue' cannot be used here");
        }
        self.stmt_end()?;
        Ok(Stmt::Continue)
    }

    fn public_stmt(&mut self) -> Result<Stmt, ()> {
        let inner = self.statement()?;
        self.collect_publics(&inner);
        Ok(Stmt::Public(Box::new(inner)))
    }

    fn collect_publics(&mut self, stmt: &Stmt) {
        let mut names = Vec::new();
        if let Stmt::Expr { expr, .. } = stmt {
            collect_declared_names(expr, &mut names);
            if let Expr::Func(id) = expr
                && let Some(n) = &self.script.funcs[*id].name
            {
                names.push(n.clone());
            }
        }
        if let Stmt::Ref(r) = stmt {
            for (orig, local, _) in &r.items {
                names.push(local.clone().unwrap_or_else(|| orig.clone()));
            }
        }
        self.script.publics.extend(names);
    }

    fn ref_stmt(&mut self) -> Result<Stmt, ()> {
        self.next();
        let file = match &self.tok.kind {
            TokenKind::Str(s) => s.clone(),
            _ => {
                self.unexpected("a file name string");
                self.unget();
                return Err(());
            }
        };

        let mut items = Vec::new();
        self.expect_punct(Punct::LBrace)?;

        loop {
            self.next();
            if self.tok.is_punct(Punct::RBrace) {
                break;
            }
            if self.tok.kind.is_end() {
                self.unexpected("`}'");
                break;
            }

            let orig = match &self.tok.kind {
                TokenKind::Id(n) => n.clone(),
                TokenKind::Punct(Punct::Comma) => continue,
                _ => {
                    self.unexpected("an identifier");
                    continue;
                }
            };

            let local = if self.eat_keyword(Keyword::As) {
                self.next();
                match &self.tok.kind {
                    TokenKind::Id(n) => Some(n.clone()),
                    _ => {
                        self.unexpected("an identifier");
                        self.unget();
                        None
                    }
                }
            } else {
                None
            };

            let name = local.clone().unwrap_or_else(|| orig.clone());
            let loc = self.tok.loc;
            self.add_decl(&name, DeclKind::Ref, loc);
            items.push((orig, local, false));
        }

        self.stmt_end()?;
        Ok(Stmt::Ref(RefDecl { file, items }))
    }

    fn textdomain_stmt(&mut self) -> Result<Stmt, ()> {
        self.next();
        let domain = match &self.tok.kind {
            TokenKind::Str(s) => s.clone(),
            _ => {
                self.unexpected("a text domain string");
                self.unget();
                return Err(());
            }
        };
        self.stmt_end()?;
        self.script.text_domain = Some(domain.clone());
        Ok(Stmt::Textdomain(domain))
    }

    // ---- expressions ----------------------------------------------------

    fn expression(&mut self) -> Result<Expr, ()> {
        self.expression_prio(PRIO_LOWEST)
    }

    fn expression_prio(&mut self, prio: u8) -> Result<Expr, ()> {
        self.next();

        let expr = match self.tok.kind.clone() {
            TokenKind::Null => Expr::Lit(Lit::Null),
            TokenKind::Bool(b) => Expr::Lit(Lit::Bool(b)),
            TokenKind::Number(n) => Expr::Lit(Lit::Number(n)),
            TokenKind::Str(s) => Expr::Str(s),
            TokenKind::Regex(c) => Expr::Regex(c),
            TokenKind::StrHead(head) => self.multipart_string(Some(head), None)?,
            TokenKind::Punct(Punct::LBracket) => self.array_literal()?,
            TokenKind::Punct(Punct::LBrace) => self.object_literal()?,
            TokenKind::Punct(Punct::LParen) => self.paren_expr()?,
            TokenKind::Punct(Punct::Plus) => self.unary(UnaryOp::Plus)?,
            TokenKind::Punct(Punct::Minus) => self.unary(UnaryOp::Minus)?,
            TokenKind::Punct(Punct::Tilde) => self.unary(UnaryOp::BitRev)?,
            TokenKind::Punct(Punct::Bang) => self.unary(UnaryOp::LogicNot)?,
            TokenKind::Punct(Punct::Amp) => self.unary(UnaryOp::GetPtr)?,
            TokenKind::Punct(Punct::Star) => self.unary(UnaryOp::GetValue)?,
            TokenKind::AtId(name) => {
                let loc = self.tok.loc;
                self.outer_identifier(&name, loc);
                Expr::OuterId(name)
            }
            TokenKind::HashId(name) => Expr::PrivId(name),
            TokenKind::Id(name) => match self.tok.keyword {
                Some(Keyword::Func) => self.func_decl()?,
                Some(Keyword::Class) => self.class_decl()?,
                Some(Keyword::Enum) => Expr::Enum(self.enum_decl()?),
                Some(Keyword::Bitfield) => Expr::Bitfield(self.enum_decl()?),
                Some(Keyword::If) => self.if_expr()?,
                Some(Keyword::Case) => self.case_expr()?,
                Some(Keyword::This) => {
                    self.script.funcs[self.cur].has_this = true;
                    Expr::This
                }
                Some(Keyword::Argv) => Expr::Argv,
                Some(Keyword::Typeof) => self.unary(UnaryOp::Typeof)?,
                Some(Keyword::Global) => self.unary(UnaryOp::Global)?,
                Some(Keyword::Owned) => self.unary(UnaryOp::Owned)?,
                Some(Keyword::Yield) => self.yield_expr()?,
                _ => {
                    let loc = self.tok.loc;
                    self.reference_id(&name, loc);
                    Expr::Id(name)
                }
            },
            _ => {
                self.unexpected("an expression");
                self.unget();
                return Err(());
            }
        };

        if prio == PRIO_HIGHEST {
            return Ok(expr);
        }

        self.expression_tail_prio(expr, prio)
    }

    fn unary(&mut self, op: UnaryOp) -> Result<Expr, ()> {
        let operand = self.expression_prio(PRIO_UNARY)?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn outer_identifier(&mut self, name: &str, loc: Location) {
        self.add_decl(name, DeclKind::Outer, loc);
    }

    fn yield_expr(&mut self) -> Result<Expr, ()> {
        self.next();
        let has_value = !self.tok.newline_before
            && !self.tok.kind.is_end()
            && !self.tok.is_punct(Punct::Semicolon)
            && !self.tok.is_punct(Punct::RBrace)
            && !self.tok.is_punct(Punct::RParen)
            && !self.tok.is_punct(Punct::RBracket)
            && !self.tok.is_punct(Punct::Comma);
        self.unget();

        let value = if has_value {
            Some(Box::new(self.expression_prio(PRIO_ASSI)?))
        } else {
            None
        };
        Ok(Expr::Yield(value))
    }

    fn if_expr(&mut self) -> Result<Expr, ()> {
        let (arms, default) = self.if_arms()?;
        Ok(Expr::If { arms, default })
    }

    fn case_expr(&mut self) -> Result<Expr, ()> {
        let subject = self.expression_prio(PRIO_COMMA)?;
        let (arms, default) = self.case_arms_blocks()?;
        Ok(Expr::Case {
            subject: Box::new(subject),
            arms,
            default,
        })
    }

    /// `"head {expr} mid {expr!fmt} tail"`: parts alternate between text
    /// and embedded expressions until the tail arrives.
    fn multipart_string(
        &mut self,
        head: Option<String>,
        first: Option<Expr>,
    ) -> Result<Expr, ()> {
        let mut parts = Vec::new();
        if let Some(e) = first {
            parts.push(StrPart::Expr {
                expr: Box::new(e),
                format: None,
            });
        }
        if let Some(h) = head {
            parts.push(StrPart::Str(h));
        }

        loop {
            let expr = match self.expression() {
                Ok(e) => e,
                Err(()) => {
                    if self.recover(RECOVER_STR_PART).is_err() {
                        return Err(());
                    }
                    // Recovery landed on a middle part: keep going.
                    match self.tok.kind.clone() {
                        TokenKind::StrMid(s) => {
                            parts.push(StrPart::Str(s));
                            continue;
                        }
                        _ => return Err(()),
                    }
                }
            };

            // `!` introduces a format word for this part.
            let format = if self.eat_punct(Punct::Bang) {
                self.next_flags(FL_STR_FMT);
                match self.tok.kind.clone() {
                    TokenKind::Number(n) => Some(n as u32),
                    _ => {
                        self.unexpected("a string format");
                        None
                    }
                }
            } else {
                None
            };

            parts.push(StrPart::Expr {
                expr: Box::new(expr),
                format,
            });

            self.next();
            match self.tok.kind.clone() {
                TokenKind::StrMid(s) => {
                    parts.push(StrPart::Str(s));
                }
                TokenKind::StrTail(s) => {
                    parts.push(StrPart::Str(s));
                    break;
                }
                _ => {
                    self.unexpected("the string's continuation");
                    self.unget();
                    return Err(());
                }
            }
        }

        Ok(Expr::StrTemplate(parts))
    }

    /// `(expr)`, or a lambda when `=>` follows the closing parenthesis.
    fn paren_expr(&mut self) -> Result<Expr, ()> {
        let mut exprs = Vec::new();

        if !self.eat_punct(Punct::RParen) {
            loop {
                // A rest parameter only makes sense if this turns out to be
                // a lambda; keep it as a spread-ish marker.
                let e = self.expression_prio(PRIO_COMMA)?;
                exprs.push(e);
                if self.eat_punct(Punct::Comma) {
                    continue;
                }
                if self.expect_punct(Punct::RParen).is_err() {
                    let _ = self.recover(RECOVER_RP);
                    return Err(());
                }
                break;
            }
        }

        if self.eat_punct(Punct::FatArrow) {
            return self.lambda_body(exprs);
        }

        Ok(match exprs.len() {
            0 => {
                self.unexpected("an expression");
                Expr::Error
            }
            1 => exprs.pop().expect("single expression"),
            _ => Expr::Comma(exprs),
        })
    }

    /// `(params) => expr-or-block`: sugar for an anonymous function.
    fn lambda_body(&mut self, params: Vec<Expr>) -> Result<Expr, ()> {
        let func = self.enter_func(None);

        for p in &params {
            match p {
                Expr::Id(name) => {
                    let loc = self.tok.loc;
                    self.add_decl(name, DeclKind::Param, loc);
                    self.script.funcs[func].params.push(Param {
                        pattern: p.clone(),
                        default: None,
                        rest: false,
                    });
                }
                Expr::Assign { target, value, .. } => {
                    let loc = self.tok.loc;
                    self.declare_pattern(target, DeclKind::Param, loc);
                    self.script.funcs[func].params.push(Param {
                        pattern: (**target).clone(),
                        default: Some((**value).clone()),
                        rest: false,
                    });
                }
                other => {
                    let loc = self.tok.loc;
                    self.declare_pattern(other, DeclKind::Param, loc);
                    self.script.funcs[func].params.push(Param {
                        pattern: other.clone(),
                        default: None,
                        rest: false,
                    });
                }
            }
        }

        self.next();
        let body = if self.tok.is_punct(Punct::LBrace) {
            self.unget();
            self.stmt_block()?
        } else {
            self.unget();
            let value = self.expression_prio(PRIO_ASSI)?;
            Block {
                stmts: vec![Stmt::Return(Some(value))],
                loc: self.tok.loc,
            }
        };

        self.script.funcs[func].body = body;
        self.leave_func(func);
        Ok(Expr::Func(func))
    }

    // ---- functions and classes ------------------------------------------

    fn enter_func(&mut self, name: Option<String>) -> FuncId {
        let id = self.script.funcs.len();
        self.script.funcs.push(FuncAst {
            name,
            outer: Some(self.cur),
            doc: self.doc.take(),
            loc: self.tok.loc,
            ..FuncAst::default()
        });
        self.cur = id;
        self.flag_stack.push(self.flags);
        self.flags |= FL_RETURN;
        self.flags &= !(FL_BREAK | FL_CONTINUE | FL_PUBLIC | FL_TEXTDOMAIN);
        id
    }

    fn leave_func(&mut self, id: FuncId) {
        debug_assert_eq!(self.cur, id);
        self.cur = self.script.funcs[id].outer.unwrap_or(0);
        if let Some(saved) = self.flag_stack.pop() {
            self.flags = saved;
        }
    }

    fn param_list(&mut self, func: FuncId) -> Result<(), ()> {
        self.expect_punct(Punct::LParen)?;

        if self.eat_punct(Punct::RParen) {
            return Ok(());
        }

        loop {
            let rest = self.eat_punct(Punct::Ellipsis);

            let pattern = self.expression_prio(PRIO_UNARY)?;
            let loc = self.tok.loc;
            self.declare_pattern(&pattern, DeclKind::Param, loc);

            let default = if self.eat_punct(Punct::Assign) {
                Some(self.expression_prio(PRIO_COMMA)?)
            } else {
                None
            };

            self.script.funcs[func].params.push(Param {
                pattern,
                default,
                rest,
            });

            if rest {
                break;
            }
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }

        if self.expect_punct(Punct::RParen).is_err() {
            let _ = self.recover(RECOVER_RP);
            return Err(());
        }
        Ok(())
    }

    /// `func [name](params) { body }`. A named function declares its name
    /// as a constant in the enclosing scope.
    fn func_decl(&mut self) -> Result<Expr, ()> {
        self.next();
        let name = match (&self.tok.kind, self.tok.keyword) {
            (TokenKind::Id(n), None) => {
                let n = n.clone();
                let loc = self.tok.loc;
                self.add_decl(&n, DeclKind::Const, loc);
                Some(n)
            }
            _ => {
                self.unget();
                None
            }
        };

        let func = self.enter_func(name);
        let result = (|| {
            self.param_list(func)?;
            let body = self.stmt_block()?;
            self.script.funcs[func].body = body;
            Ok(())
        })();
        self.leave_func(func);

        result?;
        Ok(Expr::Func(func))
    }

    /// `class [name] [: parent] { items }`.
    fn class_decl(&mut self) -> Result<Expr, ()> {
        let start = self.tok.loc;

        self.next();
        let name = match (&self.tok.kind, self.tok.keyword) {
            (TokenKind::Id(n), None) => {
                let n = n.clone();
                let loc = self.tok.loc;
                self.add_decl(&n, DeclKind::Const, loc);
                Some(n)
            }
            _ => {
                self.unget();
                None
            }
        };

        let parent = if self.eat_punct(Punct::Colon) {
            Some(Box::new(self.expression_prio(PRIO_UNARY)?))
        } else {
            None
        };

        self.expect_punct(Punct::LBrace)?;

        let mut items = Vec::new();
        loop {
            self.next();
            if self.tok.is_punct(Punct::RBrace) {
                break;
            }
            if self.tok.kind.is_end() {
                self.unexpected("`}'");
                break;
            }
            if self.tok.is_punct(Punct::Semicolon) || self.tok.is_punct(Punct::Comma) {
                continue;
            }

            let is_static = if self.tok.is_keyword(Keyword::Static) {
                self.next();
                true
            } else {
                false
            };
            self.unget();

            match self.class_item(is_static) {
                Ok(item) => items.push(item),
                Err(()) => {
                    if self
                        .recover(RECOVER_LF | RECOVER_SEMICOLON | RECOVER_BLOCK)
                        .is_err()
                    {
                        break;
                    }
                    if self.tok.is_punct(Punct::RBrace) {
                        break;
                    }
                }
            }
        }

        Ok(Expr::Class(ClassDecl {
            name,
            parent,
            items,
            loc: Location::merge(&start, &self.tok.loc),
        }))
    }

    fn prop_name(&mut self) -> Result<PropName, ()> {
        self.next();
        match self.tok.kind.clone() {
            TokenKind::Id(n) => Ok(PropName::Id(n)),
            TokenKind::Str(s) => Ok(PropName::Str(s)),
            TokenKind::Number(n) => Ok(PropName::Num(n)),
            TokenKind::HashId(n) => Ok(PropName::Priv(n)),
            _ => {
                self.unexpected("a property name");
                self.unget();
                Err(())
            }
        }
    }

    /// Reads an optional `get`/`set` accessor marker plus the property
    /// name; a lone `get`/`set` is itself a valid name.
    fn accessor_and_name(&mut self) -> Result<(Option<AccessorKind>, PropName), ()> {
        self.next();
        let marker = match &self.tok.kind {
            TokenKind::Id(n) if n == "get" => Some((AccessorKind::Get, n.clone())),
            TokenKind::Id(n) if n == "set" => Some((AccessorKind::Set, n.clone())),
            _ => None,
        };

        match marker {
            None => {
                self.unget();
                Ok((None, self.prop_name()?))
            }
            Some((acc, word)) => {
                self.next();
                let is_name = matches!(
                    self.tok.kind,
                    TokenKind::Id(_) | TokenKind::Str(_) | TokenKind::HashId(_)
                );
                self.unget();
                if is_name {
                    Ok((Some(acc), self.prop_name()?))
                } else {
                    Ok((None, PropName::Id(word)))
                }
            }
        }
    }

    fn class_item(&mut self, is_static: bool) -> Result<ClassItem, ()> {
        let (accessor, name) = self.accessor_and_name()?;

        self.next();
        match self.tok.kind.punct() {
            Some(Punct::LParen) => {
                self.unget();
                let func_name = prop_name_text(&name);
                let func = self.enter_func(func_name);
                self.script.funcs[func].has_this = true;
                let result = (|| {
                    self.param_list(func)?;
                    let body = self.stmt_block()?;
                    self.script.funcs[func].body = body;
                    Ok(())
                })();
                self.leave_func(func);
                result?;

                Ok(ClassItem::Method {
                    name,
                    func,
                    accessor,
                    is_static,
                })
            }
            Some(Punct::Colon) => {
                let value = self.expression_prio(PRIO_COMMA)?;
                self.stmt_end()?;
                Ok(ClassItem::Prop {
                    name,
                    value,
                    constant: true,
                    is_static,
                })
            }
            Some(Punct::Assign) => {
                let value = self.expression_prio(PRIO_COMMA)?;
                self.stmt_end()?;
                Ok(ClassItem::Prop {
                    name,
                    value,
                    constant: false,
                    is_static,
                })
            }
            _ => {
                self.unexpected("`(', `:' or `='");
                self.unget();
                Err(())
            }
        }
    }

    fn enum_decl(&mut self) -> Result<EnumDecl, ()> {
        let start = self.tok.loc;

        self.next();
        let name = match (&self.tok.kind, self.tok.keyword) {
            (TokenKind::Id(n), None) => {
                let n = n.clone();
                let loc = self.tok.loc;
                self.add_decl(&n, DeclKind::Const, loc);
                Some(n)
            }
            _ => {
                self.unget();
                None
            }
        };

        self.expect_punct(Punct::LBrace)?;

        let mut items = Vec::new();
        loop {
            self.next();
            if self.tok.is_punct(Punct::RBrace) {
                break;
            }
            if self.tok.kind.is_end() {
                self.unexpected("`}'");
                break;
            }
            if self.tok.is_punct(Punct::Comma) {
                continue;
            }

            let item_name = match &self.tok.kind {
                TokenKind::Id(n) => n.clone(),
                _ => {
                    self.unexpected("an identifier");
                    if self.recover(RECOVER_COMMA | RECOVER_BLOCK).is_err() {
                        break;
                    }
                    continue;
                }
            };

            let value = if self.eat_punct(Punct::Assign) {
                Some(self.expression_prio(PRIO_COMMA)?)
            } else {
                None
            };

            items.push((item_name, value));
        }

        Ok(EnumDecl {
            name,
            items,
            loc: Location::merge(&start, &self.tok.loc),
        })
    }

    // ---- literals -------------------------------------------------------

    fn array_literal(&mut self) -> Result<Expr, ()> {
        let mut items = Vec::new();

        loop {
            self.next();
            if self.tok.is_punct(Punct::RBracket) {
                break;
            }
            if self.tok.kind.is_end() {
                self.unexpected("`]'");
                break;
            }
            if self.tok.is_punct(Punct::Comma) {
                continue;
            }
            self.unget();

            match self.item(ItemCtx::Array) {
                Ok(item) => items.push(item),
                Err(()) => {
                    if self.recover(RECOVER_COMMA | RECOVER_RSB).is_err() {
                        break;
                    }
                }
            }
        }

        Ok(Expr::Array(items))
    }

    fn object_literal(&mut self) -> Result<Expr, ()> {
        let mut items = Vec::new();

        loop {
            self.next();
            if self.tok.is_punct(Punct::RBrace) {
                break;
            }
            if self.tok.kind.is_end() {
                self.unexpected("`}'");
                break;
            }
            if self.tok.is_punct(Punct::Comma) || self.tok.is_punct(Punct::Semicolon) {
                continue;
            }
            self.unget();

            match self.item(ItemCtx::Object) {
                Ok(item) => items.push(item),
                Err(()) => {
                    if self
                        .recover(RECOVER_LF | RECOVER_COMMA | RECOVER_BLOCK)
                        .is_err()
                    {
                        break;
                    }
                    if self.tok.is_punct(Punct::RBrace) {
                        break;
                    }
                }
            }
        }

        Ok(Expr::ObjectLit(items))
    }

    fn item_list(&mut self, ctx: ItemCtx) -> Result<Vec<Item>, ()> {
        self.expect_punct(Punct::LBrace)?;
        let mut items = Vec::new();

        loop {
            self.next();
            if self.tok.is_punct(Punct::RBrace) {
                break;
            }
            if self.tok.kind.is_end() {
                self.unexpected("`}'");
                break;
            }
            if self.tok.is_punct(Punct::Comma) {
                continue;
            }
            self.unget();

            match self.item(ctx) {
                Ok(item) => items.push(item),
                Err(()) => {
                    if self
                        .recover(RECOVER_LF | RECOVER_COMMA | RECOVER_BLOCK)
                        .is_err()
                    {
                        break;
                    }
                    if self.tok.is_punct(Punct::RBrace) {
                        break;
                    }
                }
            }
        }

        Ok(items)
    }

    fn item(&mut self, ctx: ItemCtx) -> Result<Item, ()> {
        self.next();

        // Items shared by both literal kinds.
        if self.tok.is_punct(Punct::Ellipsis) {
            let e = self.expression_prio(PRIO_COMMA)?;
            return Ok(Item::Spread(e));
        }
        if self.tok.is_keyword(Keyword::If) {
            return self.item_if(ctx);
        }
        if self.tok.is_keyword(Keyword::Case) {
            return self.item_case(ctx);
        }
        if ctx == ItemCtx::Object {
            if self.tok.is_keyword(Keyword::Enum) {
                return Ok(Item::Enum(self.enum_decl()?));
            }
            if self.tok.is_keyword(Keyword::Bitfield) {
                return Ok(Item::Bitfield(self.enum_decl()?));
            }
        }

        if ctx == ItemCtx::Array {
            self.unget();
            let e = self.expression_prio(PRIO_COMMA)?;
            return Ok(Item::Value(e));
        }

        self.object_prop_item()
    }

    fn item_if(&mut self, ctx: ItemCtx) -> Result<Item, ()> {
        let mut arms = Vec::new();
        let mut default = None;

        loop {
            let cond = self.expression_prio(PRIO_COMMA)?;
            let items = self.item_list(ctx)?;
            arms.push((cond, items));

            self.next();
            if self.tok.is_keyword(Keyword::Elif) {
                continue;
            }
            if self.tok.is_keyword(Keyword::Else) {
                default = Some(self.item_list(ctx)?);
                break;
            }
            self.unget();
            break;
        }

        Ok(Item::If { arms, default })
    }

    fn item_case(&mut self, ctx: ItemCtx) -> Result<Item, ()> {
        let subject = self.expression_prio(PRIO_COMMA)?;
        self.expect_punct(Punct::LBrace)?;

        let mut arms = Vec::new();
        let mut default = None;

        loop {
            self.next();
            if self.tok.is_punct(Punct::RBrace) {
                break;
            }
            if self.tok.kind.is_end() {
                self.unexpected("`}'");
                break;
            }
            if self.tok.is_keyword(Keyword::Else) {
                default = Some(self.item_list(ctx)?);
                continue;
            }
            self.unget();

            let mut values = vec![self.expression_prio(PRIO_COMMA)?];
            while self.eat_punct(Punct::Comma) {
                values.push(self.expression_prio(PRIO_COMMA)?);
            }
            let items = self.item_list(ctx)?;
            arms.push((values, items));
        }

        Ok(Item::Case {
            subject: Box::new(subject),
            arms,
            default,
        })
    }

    /// A property/method item of an object literal.
    fn object_prop_item(&mut self) -> Result<Item, ()> {
        self.unget();
        let (accessor, name) = self.accessor_and_name()?;

        self.next();
        match self.tok.kind.punct() {
            Some(Punct::LParen) => {
                self.unget();
                let func_name = prop_name_text(&name);
                let func = self.enter_func(func_name);
                self.script.funcs[func].has_this = true;
                let result = (|| {
                    self.param_list(func)?;
                    let body = self.stmt_block()?;
                    self.script.funcs[func].body = body;
                    Ok(())
                })();
                self.leave_func(func);
                result?;

                Ok(Item::Method {
                    name,
                    func,
                    accessor,
                })
            }
            Some(Punct::Colon) => {
                let value = self.expression_prio(PRIO_COMMA)?;
                Ok(Item::Prop {
                    name,
                    value,
                    constant: true,
                })
            }
            Some(Punct::Assign) => {
                let value = self.expression_prio(PRIO_COMMA)?;
                Ok(Item::Prop {
                    name,
                    value,
                    constant: false,
                })
            }
            _ => {
                self.unexpected("`(', `:' or `='");
                self.unget();
                Err(())
            }
        }
    }

    // ---- expression tails -----------------------------------------------

    fn expression_tail_prio(&mut self, mut expr: Expr, prio: u8) -> Result<Expr, ()> {
        loop {
            self.next();

            // Adjacent string literal: concatenating template.
            match self.tok.kind.clone() {
                TokenKind::Str(s) => {
                    expr = Expr::StrTemplate(vec![
                        StrPart::Expr {
                            expr: Box::new(expr),
                            format: None,
                        },
                        StrPart::Str(s),
                    ]);
                    continue;
                }
                TokenKind::StrHead(h) => {
                    expr = self.multipart_string(Some(h), Some(expr))?;
                    continue;
                }
                TokenKind::Id(_) if self.tok.is_keyword(Keyword::Instof) => {
                    if prio >= PRIO_REL {
                        self.unget();
                        return Ok(expr);
                    }
                    let rhs = self.expression_prio(PRIO_REL)?;
                    expr = Expr::Binary(BinaryOp::Instof, Box::new(expr), Box::new(rhs));
                    continue;
                }
                _ => {}
            }

            let Some(p) = self.tok.kind.punct() else {
                self.unget();
                return Ok(expr);
            };

            match p {
                Punct::Dot => {
                    expr = self.dot_expr(expr, false)?;
                }
                Punct::LBracket => {
                    let index = self.expression()?;
                    if self.expect_punct(Punct::RBracket).is_err() {
                        let _ = self.recover(RECOVER_RSB);
                        return Err(());
                    }
                    expr = Expr::Index {
                        obj: Box::new(expr),
                        index: Box::new(index),
                        optional: false,
                    };
                }
                Punct::LParen => {
                    let args = self.arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: false,
                    };
                }
                Punct::Question => {
                    expr = self.ques_expr(expr)?;
                }
                Punct::Comma => {
                    if prio >= PRIO_COMMA {
                        self.unget();
                        return Ok(expr);
                    }
                    let mut exprs = vec![expr];
                    loop {
                        exprs.push(self.expression_prio(PRIO_COMMA)?);
                        if !self.eat_punct(Punct::Comma) {
                            break;
                        }
                    }
                    expr = Expr::Comma(exprs);
                }
                _ => {
                    // Binary operators.
                    if let Some((op_prio, op)) = binary_op(p) {
                        if prio >= op_prio {
                            self.unget();
                            return Ok(expr);
                        }
                        let rhs = self.expression_prio(op_prio)?;
                        expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
                        continue;
                    }

                    // Assignments (right associative).
                    if let Some((decl, op, owned)) = assign_op(p) {
                        if prio > PRIO_ASSI {
                            self.unget();
                            return Ok(expr);
                        }
                        let loc = self.tok.loc;
                        let value = self.expression_prio(PRIO_ASSI)?;
                        if op.is_none() {
                            self.declare_pattern(&expr, decl, loc);
                        }
                        expr = Expr::Assign {
                            target: Box::new(expr),
                            value: Box::new(value),
                            decl,
                            op,
                            owned,
                        };
                        continue;
                    }

                    // Reverse assignment: `value => target`.
                    if p == Punct::FatArrow || p == Punct::ColonGt {
                        if prio > PRIO_ASSI {
                            self.unget();
                            return Ok(expr);
                        }
                        let decl = if p == Punct::ColonGt {
                            DeclKind::Const
                        } else {
                            DeclKind::Var
                        };
                        let loc = self.tok.loc;
                        let target = self.expression_prio(PRIO_ASSI)?;
                        self.declare_pattern(&target, decl, loc);
                        expr = Expr::Assign {
                            target: Box::new(target),
                            value: Box::new(expr),
                            decl,
                            op: None,
                            owned: false,
                        };
                        continue;
                    }

                    self.unget();
                    return Ok(expr);
                }
            }
        }
    }

    fn dot_expr(&mut self, obj: Expr, optional: bool) -> Result<Expr, ()> {
        self.next();
        let name = match self.tok.kind.clone() {
            TokenKind::Id(n) => n,
            TokenKind::HashId(n) => n,
            _ => {
                self.unexpected("a property name");
                self.unget();
                return Err(());
            }
        };
        Ok(Expr::Member {
            obj: Box::new(obj),
            name,
            optional,
        })
    }

    /// Conditional chains: `?.name`, `?(args)`, `?[index]`.
    fn ques_expr(&mut self, obj: Expr) -> Result<Expr, ()> {
        self.next();
        match self.tok.kind.punct() {
            Some(Punct::Dot) => self.dot_expr(obj, true),
            Some(Punct::LParen) => {
                let args = self.arguments()?;
                Ok(Expr::Call {
                    callee: Box::new(obj),
                    args,
                    optional: true,
                })
            }
            Some(Punct::LBracket) => {
                let index = self.expression()?;
                if self.expect_punct(Punct::RBracket).is_err() {
                    let _ = self.recover(RECOVER_RSB);
                    return Err(());
                }
                Ok(Expr::Index {
                    obj: Box::new(obj),
                    index: Box::new(index),
                    optional: true,
                })
            }
            _ => {
                self.unexpected("`.', `(' or `['");
                self.unget();
                Err(())
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ()> {
        let mut args = Vec::new();

        if self.eat_punct(Punct::RParen) {
            return Ok(args);
        }

        loop {
            self.next();
            if self.tok.is_punct(Punct::Ellipsis) {
                let e = self.expression_prio(PRIO_COMMA)?;
                args.push(Expr::Unary(UnaryOp::GetValue, Box::new(e)));
            } else {
                self.unget();
                args.push(self.expression_prio(PRIO_COMMA)?);
            }

            if self.eat_punct(Punct::Comma) {
                continue;
            }
            if self.expect_punct(Punct::RParen).is_err() {
                let _ = self.recover(RECOVER_RP);
                return Err(());
            }
            break;
        }

        Ok(args)
    }
}

fn token_is_value(tok: &Token) -> bool {
    match &tok.kind {
        TokenKind::Null
        | TokenKind::Bool(_)
        | TokenKind::Number(_)
        | TokenKind::Str(_)
        | TokenKind::StrTail(_)
        | TokenKind::Regex(_)
        | TokenKind::AtId(_)
        | TokenKind::HashId(_) => true,
        // Keywords are not values, so a `/` after `return` or `case` still
        // opens a regex literal.
        TokenKind::Id(_) => matches!(tok.keyword, None | Some(Keyword::This) | Some(Keyword::Argv)),
        TokenKind::Punct(p) => {
            matches!(p, Punct::RParen | Punct::RBracket | Punct::RBrace)
        }
        _ => false,
    }
}

fn is_doc_block_command(text: &str) -> bool {
    let trimmed = text.trim_start();
    ["@package", "@module", "@lib", "@exe"]
        .iter()
        .any(|cmd| trimmed.starts_with(cmd))
}

fn prop_name_text(name: &PropName) -> Option<String> {
    match name {
        PropName::Id(n) | PropName::Str(n) | PropName::Priv(n) => Some(n.clone()),
        PropName::Num(_) => None,
    }
}

fn binary_op(p: Punct) -> Option<(u8, BinaryOp)> {
    Some(match p {
        Punct::StarStar => (PRIO_EXP, BinaryOp::Exp),
        Punct::Star => (PRIO_MUL, BinaryOp::Mul),
        Punct::Slash => (PRIO_MUL, BinaryOp::Div),
        Punct::Percent => (PRIO_MUL, BinaryOp::Mod),
        Punct::Plus => (PRIO_ADD, BinaryOp::Add),
        Punct::Minus => (PRIO_ADD, BinaryOp::Sub),
        Punct::Tilde => (PRIO_ADD, BinaryOp::Match),
        Punct::Shl => (PRIO_SHIFT, BinaryOp::Shl),
        Punct::Shr => (PRIO_SHIFT, BinaryOp::Shr),
        Punct::UShr => (PRIO_SHIFT, BinaryOp::UShr),
        Punct::Lt => (PRIO_REL, BinaryOp::Lt),
        Punct::Gt => (PRIO_REL, BinaryOp::Gt),
        Punct::Le => (PRIO_REL, BinaryOp::Le),
        Punct::Ge => (PRIO_REL, BinaryOp::Ge),
        Punct::Eq => (PRIO_EQ, BinaryOp::Eq),
        Punct::Ne => (PRIO_EQ, BinaryOp::Ne),
        Punct::Amp => (PRIO_BIT_AND, BinaryOp::BitAnd),
        Punct::Caret => (PRIO_BIT_XOR, BinaryOp::BitXor),
        Punct::Pipe => (PRIO_BIT_OR, BinaryOp::BitOr),
        Punct::AmpAmp => (PRIO_LOGIC_AND, BinaryOp::LogicAnd),
        Punct::PipePipe => (PRIO_LOGIC_OR, BinaryOp::LogicOr),
        _ => return None,
    })
}

fn assign_op(p: Punct) -> Option<(DeclKind, Option<BinaryOp>, bool)> {
    Some(match p {
        Punct::Assign => (DeclKind::Var, None, false),
        Punct::Colon => (DeclKind::Const, None, false),
        Punct::PlusAssign => (DeclKind::Var, Some(BinaryOp::Add), false),
        Punct::MinusAssign => (DeclKind::Var, Some(BinaryOp::Sub), false),
        Punct::StarAssign => (DeclKind::Var, Some(BinaryOp::Mul), false),
        Punct::SlashAssign => (DeclKind::Var, Some(BinaryOp::Div), false),
        Punct::PercentAssign => (DeclKind::Var, Some(BinaryOp::Mod), false),
        Punct::StarStarAssign => (DeclKind::Var, Some(BinaryOp::Exp), false),
        Punct::TildeAssign => (DeclKind::Var, Some(BinaryOp::Match), false),
        Punct::ShlAssign => (DeclKind::Var, Some(BinaryOp::Shl), false),
        Punct::ShrAssign => (DeclKind::Var, Some(BinaryOp::Shr), false),
        Punct::UShrAssign => (DeclKind::Var, Some(BinaryOp::UShr), false),
        Punct::AmpAssign => (DeclKind::Var, Some(BinaryOp::BitAnd), false),
        Punct::PipeAssign => (DeclKind::Var, Some(BinaryOp::BitOr), false),
        Punct::CaretAssign => (DeclKind::Var, Some(BinaryOp::BitXor), false),
        Punct::AmpAmpAssign => (DeclKind::Var, Some(BinaryOp::LogicAnd), false),
        Punct::PipePipeAssign => (DeclKind::Var, Some(BinaryOp::LogicOr), false),
        Punct::DotPlusAssign => (DeclKind::Var, Some(BinaryOp::Add), true),
        Punct::DotMinusAssign => (DeclKind::Var, Some(BinaryOp::Sub), true),
        Punct::DotStarAssign => (DeclKind::Var, Some(BinaryOp::Mul), true),
        Punct::DotSlashAssign => (DeclKind::Var, Some(BinaryOp::Div), true),
        Punct::DotPercentAssign => (DeclKind::Var, Some(BinaryOp::Mod), true),
        Punct::DotStarStarAssign => (DeclKind::Var, Some(BinaryOp::Exp), true),
        Punct::DotTildeAssign => (DeclKind::Var, Some(BinaryOp::Match), true),
        Punct::DotShlAssign => (DeclKind::Var, Some(BinaryOp::Shl), true),
        Punct::DotShrAssign => (DeclKind::Var, Some(BinaryOp::Shr), true),
        Punct::DotUShrAssign => (DeclKind::Var, Some(BinaryOp::UShr), true),
        Punct::DotAmpAssign => (DeclKind::Var, Some(BinaryOp::BitAnd), true),
        Punct::DotPipeAssign => (DeclKind::Var, Some(BinaryOp::BitOr), true),
        Punct::DotCaretAssign => (DeclKind::Var, Some(BinaryOp::BitXor), true),
        Punct::DotAmpAmpAssign => (DeclKind::Var, Some(BinaryOp::LogicAnd), true),
        Punct::DotPipePipeAssign => (DeclKind::Var, Some(BinaryOp::LogicOr), true),
        _ => return None,
    })
}

fn collect_declared_names(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Assign { target, .. } => {
            if let Expr::Id(n) = &**target {
                out.push(n.clone());
            }
        }
        Expr::Func(_) => {}
        Expr::Class(c) => {
            if let Some(n) = &c.name {
                out.push(n.clone());
            }
        }
        Expr::Enum(e) | Expr::Bitfield(e) => {
            if let Some(n) = &e.name {
                out.push(n.clone());
            }
        }
        Expr::Comma(list) => {
            for e in list {
                collect_declared_names(e, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(text: &str) -> ScriptAst {
        let r = parse_str("test.ox", text);
        assert!(
            r.ok,
            "parse failed: {:?}",
            r.diagnostics
                .iter()
                .map(|d| d.message.clone())
                .collect::<Vec<_>>()
        );
        r.ast
    }

    fn top_stmts(ast: &ScriptAst) -> &[Stmt] {
        &ast.top_level().body.stmts
    }

    #[test]
    fn assignment_declares_variable() {
        let ast = parse_ok("x = 1\ny : 2\n");
        let top = ast.top_level();
        assert_eq!(top.decls.get("x").map(|d| d.kind), Some(DeclKind::Var));
        assert_eq!(top.decls.get("y").map(|d| d.kind), Some(DeclKind::Const));
    }

    #[test]
    fn const_redeclaration_conflicts() {
        let r = parse_str("t", "x : 1\nx = 2\n");
        assert!(!r.ok);
        assert!(
            r.diagnostics
                .iter()
                .any(|d| d.message.contains("declared as a constant"))
        );
    }

    #[test]
    fn const_redeclared_as_const_still_conflicts() {
        let r = parse_str("t", "x : 1\nx : 2\n");
        assert!(!r.ok);
        assert!(
            r.diagnostics
                .iter()
                .any(|d| d.message.contains("declared as a constant"))
        );
    }

    #[test]
    fn ref_redeclaration_conflicts() {
        let r = parse_str("t", "ref \"lib.ox\" { h }\nh = 1\n");
        assert!(!r.ok);
        assert!(
            r.diagnostics
                .iter()
                .any(|d| d.message.contains("declared as a reference"))
        );
    }

    #[test]
    fn var_to_param_upgrade_is_silent() {
        let r = parse_str("t", "func f(a) { a = 3\n }\n");
        assert!(r.ok);
    }

    #[test]
    fn precedence_ladder() {
        let ast = parse_ok("r = 1 + 2 * 3 ** 4\n");
        let Stmt::Expr { expr, .. } = &top_stmts(&ast)[0] else {
            panic!("expected expression statement");
        };
        // r = (1 + (2 * (3 ** 4)))
        let Expr::Assign { value, .. } = expr else {
            panic!("expected assignment");
        };
        let Expr::Binary(BinaryOp::Add, _, rhs) = &**value else {
            panic!("expected addition at the top");
        };
        let Expr::Binary(BinaryOp::Mul, _, rhs) = &**rhs else {
            panic!("expected multiplication under addition");
        };
        assert!(matches!(&**rhs, Expr::Binary(BinaryOp::Exp, _, _)));
    }

    #[test]
    fn logic_binds_loosest() {
        let ast = parse_ok("r = a == 1 && b < 2 || c\n");
        let Stmt::Expr { expr, .. } = &top_stmts(&ast)[0] else {
            panic!()
        };
        let Expr::Assign { value, .. } = expr else { panic!() };
        assert!(matches!(&**value, Expr::Binary(BinaryOp::LogicOr, _, _)));
    }

    #[test]
    fn function_declaration_and_nesting() {
        let ast = parse_ok("func outer(a, b = 1) {\n  inner = func (c) { return c }\n}\n");
        assert_eq!(ast.funcs.len(), 3);

        let outer = &ast.funcs[1];
        assert_eq!(outer.name.as_deref(), Some("outer"));
        assert_eq!(outer.params.len(), 2);
        assert!(outer.params[1].default.is_some());
        assert_eq!(outer.decls.get("a").map(|d| d.kind), Some(DeclKind::Param));

        let inner = &ast.funcs[2];
        assert_eq!(inner.outer, Some(1));
        // The top-level sees `outer` as a const declaration.
        assert_eq!(
            ast.top_level().decls.get("outer").map(|d| d.kind),
            Some(DeclKind::Const)
        );
    }

    #[test]
    fn outer_reference_recorded() {
        let ast = parse_ok("x = 1\nfunc f() { return @x }\n");
        let f = &ast.funcs[1];
        assert_eq!(f.decls.get("x").map(|d| d.kind), Some(DeclKind::Outer));
    }

    #[test]
    fn implicit_outer_capture() {
        let ast = parse_ok("x = 1\nfunc f() { return x + 1 }\n");
        let f = &ast.funcs[1];
        assert_eq!(f.decls.get("x").map(|d| d.kind), Some(DeclKind::Outer));
    }

    #[test]
    fn class_with_method() {
        let ast = parse_ok("class C {\n  f() { return 1 }\n}\nC().f()\n");
        let Stmt::Expr { expr, .. } = &top_stmts(&ast)[0] else {
            panic!()
        };
        let Expr::Class(c) = expr else {
            panic!("expected class declaration")
        };
        assert_eq!(c.name.as_deref(), Some("C"));
        assert_eq!(c.items.len(), 1);
        let ClassItem::Method { func, .. } = &c.items[0] else {
            panic!("expected method");
        };
        assert!(ast.funcs[*func].has_this);
    }

    #[test]
    fn class_accessor_and_static() {
        let ast = parse_ok("class C {\n  get size() { return 1 }\n  static kind : 2\n}\n");
        let Stmt::Expr { expr, .. } = &top_stmts(&ast)[0] else {
            panic!()
        };
        let Expr::Class(c) = expr else { panic!() };
        assert!(matches!(
            &c.items[0],
            ClassItem::Method {
                accessor: Some(AccessorKind::Get),
                ..
            }
        ));
        assert!(matches!(
            &c.items[1],
            ClassItem::Prop {
                is_static: true,
                constant: true,
                ..
            }
        ));
    }

    #[test]
    fn for_as_and_control_flow() {
        let ast = parse_ok("for x as [1, 2, 3] {\n  if x == 2 { break }\n}\n");
        let Stmt::ForAs { pattern, .. } = &top_stmts(&ast)[0] else {
            panic!("expected for-as");
        };
        assert!(matches!(pattern, Expr::Id(n) if n == "x"));
    }

    #[test]
    fn classic_for_loop() {
        let ast = parse_ok("for i = 0; i < 10; i += 1 {\n  j = i\n}\n");
        assert!(matches!(&top_stmts(&ast)[0], Stmt::For { init: Some(_), cond: Some(_), step: Some(_), .. }));
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let r = parse_str("t", "break\n");
        assert!(!r.ok);
    }

    #[test]
    fn try_catch_finally() {
        let ast = parse_ok("try {\n  throw 1\n} catch e {\n  x = e\n} finally {\n  y = 2\n}\n");
        let Stmt::Try { catch, finally, .. } = &top_stmts(&ast)[0] else {
            panic!()
        };
        assert_eq!(catch.as_ref().and_then(|(n, _)| n.as_deref()), Some("e"));
        assert!(finally.is_some());
    }

    #[test]
    fn string_template_expression() {
        let ast = parse_ok("s = \"hello {1+2} world\"\n");
        let Stmt::Expr { expr, .. } = &top_stmts(&ast)[0] else {
            panic!()
        };
        let Expr::Assign { value, .. } = expr else { panic!() };
        let Expr::StrTemplate(parts) = &**value else {
            panic!("expected template, got {value:?}");
        };
        assert!(matches!(&parts[0], StrPart::Str(s) if s == "hello "));
        assert!(matches!(&parts[1], StrPart::Expr { .. }));
        assert!(matches!(&parts[2], StrPart::Str(s) if s == " world"));
    }

    #[test]
    fn string_template_with_format() {
        let ast = parse_ok("s = \"v={x!5d}\"\n");
        let Stmt::Expr { expr, .. } = &top_stmts(&ast)[0] else {
            panic!()
        };
        let Expr::Assign { value, .. } = expr else { panic!() };
        let Expr::StrTemplate(parts) = &**value else { panic!() };
        let StrPart::Expr { format, .. } = &parts[1] else {
            panic!()
        };
        let word = format.expect("format word");
        assert_eq!(crate::runtime::format::sout_width(word), 5);
    }

    #[test]
    fn array_and_object_literals() {
        let ast = parse_ok("a = [1, 2, ...rest]\no = { x: 1, y = 2, m() { return 3 } }\n");
        let Stmt::Expr { expr, .. } = &top_stmts(&ast)[0] else {
            panic!()
        };
        let Expr::Assign { value, .. } = expr else { panic!() };
        let Expr::Array(items) = &**value else { panic!() };
        assert_eq!(items.len(), 3);
        assert!(matches!(items[2], Item::Spread(_)));

        let Stmt::Expr { expr, .. } = &top_stmts(&ast)[1] else {
            panic!()
        };
        let Expr::Assign { value, .. } = expr else { panic!() };
        let Expr::ObjectLit(items) = &**value else { panic!() };
        assert!(matches!(&items[0], Item::Prop { constant: true, .. }));
        assert!(matches!(&items[1], Item::Prop { constant: false, .. }));
        assert!(matches!(&items[2], Item::Method { .. }));
    }

    #[test]
    fn conditional_items_in_array_literal() {
        let ast = parse_ok("a = [1, if big { 2, 3 } else { 4 }]\n");
        let Stmt::Expr { expr, .. } = &top_stmts(&ast)[0] else {
            panic!()
        };
        let Expr::Assign { value, .. } = expr else { panic!() };
        let Expr::Array(items) = &**value else { panic!() };
        assert!(matches!(&items[1], Item::If { .. }));
    }

    #[test]
    fn optional_chains() {
        let ast = parse_ok("v = o?.p?[1]?(2)\n");
        let Stmt::Expr { expr, .. } = &top_stmts(&ast)[0] else {
            panic!()
        };
        let Expr::Assign { value, .. } = expr else { panic!() };
        let Expr::Call { optional: true, callee, .. } = &**value else {
            panic!("expected optional call, got {value:?}");
        };
        assert!(matches!(&**callee, Expr::Index { optional: true, .. }));
    }

    #[test]
    fn regex_literal_in_expression() {
        let ast = parse_ok("m = /[a-z]+/i ~ s\n");
        let Stmt::Expr { expr, .. } = &top_stmts(&ast)[0] else {
            panic!()
        };
        let Expr::Assign { value, .. } = expr else { panic!() };
        assert!(matches!(&**value, Expr::Binary(BinaryOp::Match, _, _)));
    }

    #[test]
    fn yield_expression() {
        let ast = parse_ok("func g() {\n  yield 1\n  yield\n}\n");
        let g = &ast.funcs[1];
        assert!(matches!(
            &g.body.stmts[0],
            Stmt::Expr {
                expr: Expr::Yield(Some(_)),
                ..
            }
        ));
        assert!(matches!(
            &g.body.stmts[1],
            Stmt::Expr {
                expr: Expr::Yield(None),
                ..
            }
        ));
    }

    #[test]
    fn lambda_sugar() {
        let ast = parse_ok("f = (a, b) => a + b\n");
        assert_eq!(ast.funcs.len(), 2);
        let f = &ast.funcs[1];
        assert_eq!(f.params.len(), 2);
        assert!(matches!(&f.body.stmts[0], Stmt::Return(Some(_))));
    }

    #[test]
    fn public_and_ref_and_textdomain() {
        let ast = parse_ok(
            "textdomain \"demo\"\npublic x = 1\nref \"lib.ox\" { helper as h }\n",
        );
        assert_eq!(ast.text_domain.as_deref(), Some("demo"));
        assert!(ast.publics.contains(&"x".to_owned()));
        assert_eq!(ast.refs.len(), 0); // the ref statement is kept in the body
        let has_ref = top_stmts(&ast)
            .iter()
            .any(|s| matches!(s, Stmt::Ref(r) if r.file == "lib.ox"));
        assert!(has_ref);
        assert_eq!(
            ast.top_level().decls.get("h").map(|d| d.kind),
            Some(DeclKind::Ref)
        );
    }

    #[test]
    fn enum_declaration() {
        let ast = parse_ok("enum Color { RED, GREEN = 5, BLUE }\n");
        let Stmt::Expr { expr, .. } = &top_stmts(&ast)[0] else {
            panic!()
        };
        let Expr::Enum(e) = expr else { panic!() };
        assert_eq!(e.name.as_deref(), Some("Color"));
        assert_eq!(e.items.len(), 3);
        assert!(e.items[1].1.is_some());
    }

    #[test]
    fn case_statement() {
        let ast = parse_ok("case v {\n  1, 2 { a = 1 }\n  3 { a = 2 }\n  else { a = 3 }\n}\n");
        let Stmt::Case { arms, default, .. } = &top_stmts(&ast)[0] else {
            panic!()
        };
        assert_eq!(arms.len(), 2);
        assert_eq!(arms[0].0.len(), 2);
        assert!(default.is_some());
    }

    #[test]
    fn sched_statement() {
        let ast = parse_ok("sched {\n  x = 1\n}\n");
        assert!(matches!(&top_stmts(&ast)[0], Stmt::Sched(_)));
    }

    #[test]
    fn doc_comment_attaches_to_next_statement() {
        let ast = parse_ok("//? adds one\nf = func (x) { return x + 1 }\n");
        let Stmt::Expr { doc, .. } = &top_stmts(&ast)[0] else {
            panic!()
        };
        assert!(doc.as_deref().is_some_and(|d| d.contains("adds one")));
    }

    #[test]
    fn script_level_doc_commands() {
        let ast = parse_ok("/*? @module demo utilities */\nx = 1\n");
        assert!(ast.docs.iter().any(|d| d.contains("@module")));
    }

    #[test]
    fn error_recovery_keeps_parsing() {
        let r = parse_str("t", "x = ) bad\ny = 2\n");
        assert!(!r.ok);
        // The second statement still parsed.
        assert!(
            r.ast
                .top_level()
                .decls
                .contains_key("y")
        );
    }

    #[test]
    fn division_vs_regex_disambiguation() {
        let ast = parse_ok("a = 6 / 2\nb = /ab/ ~ s\n");
        let Stmt::Expr { expr, .. } = &top_stmts(&ast)[0] else {
            panic!()
        };
        let Expr::Assign { value, .. } = expr else { panic!() };
        assert!(matches!(&**value, Expr::Binary(BinaryOp::Div, _, _)));
    }
}
