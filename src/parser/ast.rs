//! The abstract syntax tree the parser produces and the external bytecode
//! compiler consumes.

use indexmap::IndexMap;

use crate::input::Location;
use crate::regex::Compiled;
use crate::runtime::script::DeclKind;

/// Dense index of a function within the script's function array.
pub type FuncId = usize;

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Lit {
    Null,
    Bool(bool),
    Number(f64),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnaryOp {
    Plus,
    Minus,
    BitRev,
    LogicNot,
    GetPtr,
    GetValue,
    Typeof,
    Global,
    Owned,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinaryOp {
    Exp,
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    /// `~`, the regex-match operator.
    Match,
    Shl,
    Shr,
    UShr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    LogicAnd,
    LogicOr,
    Instof,
}

/// One piece of a string literal with embedded expressions.
#[derive(Clone, Debug)]
pub enum StrPart {
    Str(String),
    /// `{expr}` or `{expr!fmt}`; the format is the packed word.
    Expr { expr: Box<Expr>, format: Option<u32> },
}

/// Property names in object literals and class bodies.
#[derive(Clone, Debug)]
pub enum PropName {
    Id(String),
    Str(String),
    Num(f64),
    /// `#name`, a private property.
    Priv(String),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessorKind {
    Get,
    Set,
}

/// Items of array/object literal blocks; conditional and declaration items
/// expand during construction.
#[derive(Clone, Debug)]
pub enum Item {
    Value(Expr),
    /// `...expr`
    Spread(Expr),
    /// `if cond { items } elif … else { items }`
    If {
        arms: Vec<(Expr, Vec<Item>)>,
        default: Option<Vec<Item>>,
    },
    /// `case subject { v: items … }`
    Case {
        subject: Box<Expr>,
        arms: Vec<(Vec<Expr>, Vec<Item>)>,
        default: Option<Vec<Item>>,
    },
    /// Object property `key: value` / `key = value`.
    Prop {
        name: PropName,
        value: Expr,
        constant: bool,
    },
    /// Method or accessor definition inside an object literal.
    Method {
        name: PropName,
        func: FuncId,
        accessor: Option<AccessorKind>,
    },
    Enum(EnumDecl),
    Bitfield(EnumDecl),
    /// Placeholder produced by error recovery.
    Skip,
}

/// `enum`/`bitfield` declaration: names with optional explicit values.
#[derive(Clone, Debug)]
pub struct EnumDecl {
    pub name: Option<String>,
    pub items: Vec<(String, Option<Expr>)>,
    pub loc: Location,
}

#[derive(Clone, Debug)]
pub struct ClassDecl {
    pub name: Option<String>,
    pub parent: Option<Box<Expr>>,
    pub items: Vec<ClassItem>,
    pub loc: Location,
}

#[derive(Clone, Debug)]
pub enum ClassItem {
    Method {
        name: PropName,
        func: FuncId,
        accessor: Option<AccessorKind>,
        is_static: bool,
    },
    Prop {
        name: PropName,
        value: Expr,
        constant: bool,
        is_static: bool,
    },
}

#[derive(Clone, Debug)]
pub enum Expr {
    Lit(Lit),
    Str(String),
    /// Multi-part string with embedded expressions.
    StrTemplate(Vec<StrPart>),
    Regex(Compiled),
    Id(String),
    /// `@name`: explicitly an enclosing function's binding.
    OuterId(String),
    /// `#name`: private property name.
    PrivId(String),
    This,
    Argv,
    Array(Vec<Item>),
    ObjectLit(Vec<Item>),
    Func(FuncId),
    Class(ClassDecl),
    Enum(EnumDecl),
    Bitfield(EnumDecl),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `target = value` (var) or `target : value` (const); assignment is
    /// also declaration. `op` marks compound forms, `owned` the
    /// dot-compound forms that operate on the referenced value.
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        decl: DeclKind,
        op: Option<BinaryOp>,
        owned: bool,
    },
    Member {
        obj: Box<Expr>,
        name: String,
        optional: bool,
    },
    Index {
        obj: Box<Expr>,
        index: Box<Expr>,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        optional: bool,
    },
    /// `if` in expression position.
    If {
        arms: Vec<(Expr, Block)>,
        default: Option<Block>,
    },
    Case {
        subject: Box<Expr>,
        arms: Vec<(Vec<Expr>, Block)>,
        default: Option<Block>,
    },
    Yield(Option<Box<Expr>>),
    Comma(Vec<Expr>),
    /// Recovery placeholder.
    Error,
}

#[derive(Clone, Debug)]
pub enum Stmt {
    Expr { expr: Expr, doc: Option<String> },
    If {
        arms: Vec<(Expr, Block)>,
        default: Option<Block>,
    },
    DoWhile { body: Block, cond: Expr },
    While { cond: Expr, body: Block },
    For {
        init: Option<Expr>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Block,
    },
    ForAs {
        pattern: Expr,
        iter: Expr,
        body: Block,
    },
    Sched(Block),
    Case {
        subject: Expr,
        arms: Vec<(Vec<Expr>, Block)>,
        default: Option<Block>,
    },
    Try {
        body: Block,
        catch: Option<(Option<String>, Block)>,
        finally: Option<Block>,
    },
    Return(Option<Expr>),
    Throw(Option<Expr>),
    Break,
    Continue,
    Textdomain(String),
    /// `public …` wrapping a declaring statement.
    Public(Box<Stmt>),
    /// `ref "file" { orig as local, … }`
    Ref(RefDecl),
    Empty,
}

#[derive(Clone, Debug, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub loc: Location,
}

#[derive(Clone, Debug)]
pub struct RefDecl {
    pub file: String,
    /// (original name, local alias, re-exported).
    pub items: Vec<(String, Option<String>, bool)>,
}

/// A parameter: a binding pattern with an optional default; at most one
/// trailing rest parameter.
#[derive(Clone, Debug)]
pub struct Param {
    pub pattern: Expr,
    pub default: Option<Expr>,
    pub rest: bool,
}

/// Per-declaration record in a function's scope map.
#[derive(Clone, Debug)]
pub struct DeclInfo {
    pub kind: DeclKind,
    pub loc: Location,
    pub auto_close: bool,
}

/// One function of the script: parameters, body, and the declaration map
/// the compiler allocates frame slots from. `outer` links to the enclosing
/// function so captures can be computed.
#[derive(Clone, Debug, Default)]
pub struct FuncAst {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub body: Block,
    pub decls: IndexMap<String, DeclInfo>,
    pub outer: Option<FuncId>,
    pub has_this: bool,
    pub doc: Option<String>,
    pub loc: Location,
}

/// The parsed compilation unit. Function 0 is the top-level body.
#[derive(Clone, Debug, Default)]
pub struct ScriptAst {
    pub funcs: Vec<FuncAst>,
    pub refs: Vec<RefDecl>,
    pub publics: Vec<String>,
    pub text_domain: Option<String>,
    /// Script-level documentation (`@package`, `@module`, `@lib`, …).
    pub docs: Vec<String>,
}

impl ScriptAst {
    pub fn top_level(&self) -> &FuncAst {
        &self.funcs[0]
    }
}
