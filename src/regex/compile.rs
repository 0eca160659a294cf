//! Lowers a pattern AST to the linear command array the backtracking
//! matcher executes.
//!
//! Generation is continuation-passing: after each term's match commands,
//! the continuation emits the rest of the sequence, which is how bounded
//! repetition unrolls and how alternatives and lookarounds thread their
//! backtrack labels. Look-behind compiles the same terms in reverse with
//! `Prev` cursor movement.

use std::cell::Cell;

use crate::regex::pattern::{Alter, CcChar, CcItem, Pattern, Term, TermKind};

/// One matcher command. `miss`/`to` are command-array indices after label
/// resolution.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Cmd {
    /// Advance the cursor; jump on end of input.
    Next { miss: usize },
    /// Retreat the cursor (look-behind); jump at offset zero.
    Prev { miss: usize },
    MatchAll { miss: usize },
    MatchChar { c: char, miss: usize },
    MatchRange { min: char, max: char, miss: usize },
    MatchLineStart { miss: usize },
    MatchLineEnd { miss: usize },
    MatchSpace { miss: usize },
    MatchNotSpace { miss: usize },
    MatchDigit { miss: usize },
    MatchNotDigit { miss: usize },
    MatchWord { miss: usize },
    MatchNotWord { miss: usize },
    MatchBlank { miss: usize },
    MatchNotBlank { miss: usize },
    MatchBackRef { id: usize, miss: usize },
    GroupStart { id: usize },
    GroupEnd { id: usize },
    /// Push a backtrack state resuming at `to`.
    Push { to: usize },
    Pop,
    /// Save only the cursor (zero-width assertions).
    PushPos,
    PopPos,
    Jmp { to: usize },
    Accept,
    Reject,
}

const NO_LABEL: usize = usize::MAX;

/// A command while labels are still symbolic.
#[derive(Clone, Copy, Debug)]
struct RawCmd {
    op: RawOp,
    label: usize,
    dead: bool,
}

#[derive(Clone, Copy, Debug)]
enum RawOp {
    Next,
    Prev,
    MatchAll,
    MatchChar(char),
    MatchRange(char, char),
    MatchLineStart,
    MatchLineEnd,
    MatchSpace,
    MatchNotSpace,
    MatchDigit,
    MatchNotDigit,
    MatchWord,
    MatchNotWord,
    MatchBlank,
    MatchNotBlank,
    MatchBackRef(usize),
    GroupStart(usize),
    GroupEnd(usize),
    Push,
    Pop,
    PushPos,
    PopPos,
    Jmp,
    Accept,
    Reject,
}

/// The continuation chain threaded through generation. Each node lives on
/// the Rust stack of the emit call that created it; `miss` is a cell so
/// repetition can temporarily redirect a continuation's backtrack label,
/// exactly like the original generator did.
struct ContOp<'a> {
    kind: ContKind<'a>,
    next: Option<&'a ContOp<'a>>,
    miss: Cell<usize>,
}

enum ContKind<'a> {
    Accept,
    /// Remaining terms of the alternative (direction depends on rev mode).
    Terms { terms: &'a [Term], index: usize },
    GroupEnd { id: usize },
    /// End of a lookaround body: restore the cursor and accept or refute.
    LookEnd { negative: bool },
    /// Re-enter a term's repetition with the bumped count.
    Repeat {
        term: &'a Term,
        times: i32,
        loop_label: usize,
    },
}

struct Gen {
    cmds: Vec<RawCmd>,
    labels: Vec<usize>,
    rev: bool,
}

impl Gen {
    fn cmd(&mut self, op: RawOp) -> usize {
        self.cmds.push(RawCmd {
            op,
            label: NO_LABEL,
            dead: false,
        });
        self.cmds.len() - 1
    }

    fn cmd_l(&mut self, op: RawOp, label: usize) {
        self.cmds.push(RawCmd {
            op,
            label,
            dead: false,
        });
    }

    fn label(&mut self) -> usize {
        self.labels.push(usize::MAX);
        self.labels.len() - 1
    }

    fn place(&mut self, label: usize) {
        self.labels[label] = self.cmds.len();
    }

    fn advance(&mut self, miss: usize) {
        if self.rev {
            self.cmd_l(RawOp::Prev, miss);
        } else {
            self.cmd_l(RawOp::Next, miss);
        }
    }

    fn match_char(&mut self, c: CcChar, miss: usize) {
        let op = match c {
            CcChar::Char(ch) => RawOp::MatchChar(ch),
            CcChar::Space => RawOp::MatchSpace,
            CcChar::NotSpace => RawOp::MatchNotSpace,
            CcChar::Digit => RawOp::MatchDigit,
            CcChar::NotDigit => RawOp::MatchNotDigit,
            CcChar::Word => RawOp::MatchWord,
            CcChar::NotWord => RawOp::MatchNotWord,
        };
        self.cmd_l(op, miss);
    }

    fn cc_item(&mut self, item: &CcItem, miss: usize) {
        match item {
            CcItem::Single(c) => self.match_char(*c, miss),
            CcItem::Range(min, max) => self.cmd_l(RawOp::MatchRange(*min, *max), miss),
        }
    }

    fn emit_cont(&mut self, cont: &ContOp<'_>) {
        match &cont.kind {
            ContKind::Accept => {
                self.cmd(RawOp::GroupEnd(0));
                self.cmd(RawOp::Accept);
            }
            ContKind::Terms { terms, index } => {
                let term = if self.rev {
                    // Reverse mode walks the sequence from the tail.
                    terms.len().checked_sub(index + 1).map(|i| &terms[i])
                } else {
                    terms.get(*index)
                };
                match term {
                    None => {
                        if let Some(next) = cont.next {
                            self.emit_cont(next);
                        }
                    }
                    Some(t) => {
                        let rest = ContOp {
                            kind: ContKind::Terms {
                                terms,
                                index: index + 1,
                            },
                            next: cont.next,
                            miss: Cell::new(cont.miss.get()),
                        };
                        self.emit_term(t, 0, &rest, cont.miss.get(), NO_LABEL);
                    }
                }
            }
            ContKind::GroupEnd { id } => {
                self.cmd(RawOp::GroupEnd(*id));
                if let Some(next) = cont.next {
                    self.emit_cont(next);
                }
            }
            ContKind::LookEnd { negative } => {
                self.cmd(RawOp::PopPos);
                let old_rev = self.rev;
                self.rev = false;
                if *negative {
                    self.cmd_l(RawOp::Jmp, cont.miss.get());
                } else if let Some(next) = cont.next {
                    self.emit_cont(next);
                }
                self.rev = old_rev;
            }
            ContKind::Repeat {
                term,
                times,
                loop_label,
            } => {
                self.emit_term(term, *times, cont.next.expect("repeat tail"), cont.miss.get(), *loop_label);
            }
        }
    }

    /// Emits one term with its repetition, then the continuation.
    /// `times` counts completed iterations; -1 flags the shared loop body
    /// of an unbounded repeat (which jumps back to `loop_label`).
    fn emit_term(&mut self, t: &Term, times: i32, next: &ContOp<'_>, miss: usize, loop_label: usize) {
        let max = t.max.map(|m| m as i32).unwrap_or(-1);
        let min = t.min as i32;

        if min == 1 && max == 1 {
            self.emit_match(t, next, miss);
        } else if times >= 0 && times < min {
            let rep = ContOp {
                kind: ContKind::Repeat {
                    term: t,
                    times: times + 1,
                    loop_label,
                },
                next: Some(next),
                miss: Cell::new(miss),
            };
            self.emit_match(t, &rep, miss);
        } else if times == -1 {
            self.cmd_l(RawOp::Jmp, loop_label);
        } else if times == max {
            self.emit_cont(next);
        } else if max == -1 && t.greedy {
            let lp = self.label();
            self.place(lp);

            let l_next = self.label();
            self.cmd_l(RawOp::Push, l_next);
            let rep = ContOp {
                kind: ContKind::Repeat {
                    term: t,
                    times: -1,
                    loop_label: lp,
                },
                next: Some(next),
                miss: Cell::new(miss),
            };
            self.emit_match(t, &rep, l_next);

            self.place(l_next);
            self.cmd(RawOp::Pop);

            let l_after = self.label();
            let saved = next.miss.replace(l_after);
            self.emit_cont(next);
            next.miss.set(saved);

            self.place(l_after);
            self.cmd(RawOp::Reject);
        } else if max == -1 {
            let lp = self.label();
            self.place(lp);

            let l_next = self.label();
            let saved = next.miss.replace(l_next);
            self.cmd_l(RawOp::Push, l_next);
            self.emit_cont(next);
            next.miss.set(saved);

            self.place(l_next);
            self.cmd(RawOp::Pop);

            let rep = ContOp {
                kind: ContKind::Repeat {
                    term: t,
                    times: -1,
                    loop_label: lp,
                },
                next: Some(next),
                miss: Cell::new(miss),
            };
            self.emit_match(t, &rep, miss);
        } else if t.greedy {
            let l_next = self.label();
            self.cmd_l(RawOp::Push, l_next);
            let rep = ContOp {
                kind: ContKind::Repeat {
                    term: t,
                    times: times + 1,
                    loop_label,
                },
                next: Some(next),
                miss: Cell::new(miss),
            };
            self.emit_match(t, &rep, l_next);

            self.place(l_next);
            self.cmd(RawOp::Pop);

            let l_after = self.label();
            let saved = next.miss.replace(l_after);
            self.emit_cont(next);
            next.miss.set(saved);

            self.place(l_after);
            self.cmd(RawOp::Reject);
        } else {
            let l_next = self.label();
            let saved = next.miss.replace(l_next);
            self.cmd_l(RawOp::Push, l_next);
            self.emit_cont(next);
            next.miss.set(saved);

            self.place(l_next);
            self.cmd(RawOp::Pop);

            let rep = ContOp {
                kind: ContKind::Repeat {
                    term: t,
                    times: times + 1,
                    loop_label,
                },
                next: Some(next),
                miss: Cell::new(miss),
            };
            self.emit_match(t, &rep, miss);
        }
    }

    /// One match of the term itself, then the continuation.
    fn emit_match(&mut self, t: &Term, next: &ContOp<'_>, miss: usize) {
        match &t.kind {
            TermKind::LineStart => {
                self.cmd_l(RawOp::MatchLineStart, miss);
                self.emit_cont(next);
            }
            TermKind::LineEnd => {
                self.cmd_l(RawOp::MatchLineEnd, miss);
                self.emit_cont(next);
            }
            TermKind::All => {
                self.advance(miss);
                self.cmd_l(RawOp::MatchAll, miss);
                self.emit_cont(next);
            }
            TermKind::Char(c) => {
                self.advance(miss);
                self.match_char(*c, miss);
                self.emit_cont(next);
            }
            TermKind::Blank => {
                self.cmd_l(RawOp::MatchBlank, miss);
                self.emit_cont(next);
            }
            TermKind::NotBlank => {
                self.cmd_l(RawOp::MatchNotBlank, miss);
                self.emit_cont(next);
            }
            TermKind::BackRef(id) => {
                self.cmd_l(RawOp::MatchBackRef(*id), miss);
                self.emit_cont(next);
            }
            TermKind::Class { rev, items } => {
                self.advance(miss);
                if *rev {
                    // Every item must fail: match -> overall mismatch.
                    for item in items {
                        let l_next = self.label();
                        self.cc_item(item, l_next);
                        self.cmd_l(RawOp::Jmp, miss);
                        self.place(l_next);
                    }
                } else {
                    // First success wins.
                    let l_end = self.label();
                    let count = items.len();
                    for (i, item) in items.iter().enumerate() {
                        let l_next = if i == count - 1 { miss } else { self.label() };
                        self.cc_item(item, l_next);
                        self.cmd_l(RawOp::Jmp, l_end);
                        if l_next != miss {
                            self.place(l_next);
                        }
                    }
                    self.place(l_end);
                }
                self.emit_cont(next);
            }
            TermKind::Pat(pat) => {
                self.emit_pat(pat, next, miss);
            }
            TermKind::Group { id, pat } => {
                self.cmd(RawOp::GroupStart(*id));
                let ge = ContOp {
                    kind: ContKind::GroupEnd { id: *id },
                    next: Some(next),
                    miss: Cell::new(miss),
                };
                self.emit_pat(pat, &ge, miss);
            }
            TermKind::LookAhead { negative, pat } | TermKind::LookBehind { negative, pat } => {
                let behind = matches!(t.kind, TermKind::LookBehind { .. });

                self.cmd(RawOp::PushPos);
                if behind {
                    self.rev = true;
                }

                let le = ContOp {
                    kind: ContKind::LookEnd { negative: *negative },
                    next: Some(next),
                    miss: Cell::new(miss),
                };
                let l_inner_miss = self.label();
                self.emit_pat(pat, &le, l_inner_miss);

                if behind {
                    self.rev = false;
                }

                // The body failed to match.
                self.place(l_inner_miss);
                self.cmd(RawOp::PopPos);
                if *negative {
                    self.emit_cont(next);
                } else {
                    self.cmd_l(RawOp::Jmp, miss);
                }
            }
        }
    }

    fn emit_pat(&mut self, pat: &Pattern, next: &ContOp<'_>, miss: usize) {
        if pat.alters.is_empty() {
            self.emit_cont(next);
            return;
        }

        let count = pat.alters.len();
        for (i, alter) in pat.alters.iter().enumerate() {
            let last = i == count - 1;
            let l = if last { miss } else { self.label() };
            if !last {
                self.cmd_l(RawOp::Push, l);
            }

            self.emit_alter(alter, next, l);

            if !last {
                self.place(l);
                self.cmd(RawOp::Pop);
            }
        }
    }

    fn emit_alter(&mut self, alter: &Alter, next: &ContOp<'_>, miss: usize) {
        if alter.terms.is_empty() {
            self.emit_cont(next);
            return;
        }

        let cont = ContOp {
            kind: ContKind::Terms {
                terms: &alter.terms,
                index: 1,
            },
            next: Some(next),
            miss: Cell::new(miss),
        };
        let first = if self.rev {
            &alter.terms[alter.terms.len() - 1]
        } else {
            &alter.terms[0]
        };
        self.emit_term(first, 0, &cont, miss, NO_LABEL);
    }
}

/// Compiles a pattern into the final command array: commands whose label
/// resolves to the immediately following command are elided, then every
/// label is rewritten to a command index.
pub fn compile(pat: &Pattern) -> Vec<Cmd> {
    let mut g = Gen {
        cmds: Vec::new(),
        labels: Vec::new(),
        rev: false,
    };

    g.cmd(RawOp::GroupStart(0));

    let l_reject = g.label();
    let accept = ContOp {
        kind: ContKind::Accept,
        next: None,
        miss: Cell::new(l_reject),
    };
    g.emit_pat(pat, &accept, l_reject);

    g.place(l_reject);
    g.cmd(RawOp::Reject);

    resolve(g)
}

fn resolve(mut g: Gen) -> Vec<Cmd> {
    // Elide dead jumps and build the old-index -> new-index map.
    let mut cp_map = vec![0usize; g.cmds.len()];
    let mut out_len = 0;
    for i in 0..g.cmds.len() {
        cp_map[i] = out_len;
        let cmd = &mut g.cmds[i];
        if cmd.label != NO_LABEL && g.labels[cmd.label] == i + 1 {
            cmd.dead = true;
        } else {
            out_len += 1;
        }
    }

    let target = |labels: &[usize], cp_map: &[usize], label: usize| -> usize {
        let cp = labels[label];
        if cp >= cp_map.len() {
            // Label placed at the very end of the array.
            out_len
        } else {
            cp_map[cp]
        }
    };

    let mut out = Vec::with_capacity(out_len);
    for cmd in &g.cmds {
        if cmd.dead {
            continue;
        }
        let miss = if cmd.label != NO_LABEL {
            target(&g.labels, &cp_map, cmd.label)
        } else {
            0
        };
        out.push(match cmd.op {
            RawOp::Next => Cmd::Next { miss },
            RawOp::Prev => Cmd::Prev { miss },
            RawOp::MatchAll => Cmd::MatchAll { miss },
            RawOp::MatchChar(c) => Cmd::MatchChar { c, miss },
            RawOp::MatchRange(min, max) => Cmd::MatchRange { min, max, miss },
            RawOp::MatchLineStart => Cmd::MatchLineStart { miss },
            RawOp::MatchLineEnd => Cmd::MatchLineEnd { miss },
            RawOp::MatchSpace => Cmd::MatchSpace { miss },
            RawOp::MatchNotSpace => Cmd::MatchNotSpace { miss },
            RawOp::MatchDigit => Cmd::MatchDigit { miss },
            RawOp::MatchNotDigit => Cmd::MatchNotDigit { miss },
            RawOp::MatchWord => Cmd::MatchWord { miss },
            RawOp::MatchNotWord => Cmd::MatchNotWord { miss },
            RawOp::MatchBlank => Cmd::MatchBlank { miss },
            RawOp::MatchNotBlank => Cmd::MatchNotBlank { miss },
            RawOp::MatchBackRef(id) => Cmd::MatchBackRef { id, miss },
            RawOp::GroupStart(id) => Cmd::GroupStart { id },
            RawOp::GroupEnd(id) => Cmd::GroupEnd { id },
            RawOp::Push => Cmd::Push { to: miss },
            RawOp::Pop => Cmd::Pop,
            RawOp::PushPos => Cmd::PushPos,
            RawOp::PopPos => Cmd::PopPos,
            RawOp::Jmp => Cmd::Jmp { to: miss },
            RawOp::Accept => Cmd::Accept,
            RawOp::Reject => Cmd::Reject,
        });
    }
    out
}
