use indexmap::IndexMap;

use crate::values::object::push_ref;
use crate::values::value::{ObjRef, Value};

/// Declaration kinds tracked per script function. The parser uses the same
/// set for its scope maps.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DeclKind {
    Const,
    Param,
    Var,
    /// Reference to another script's public declaration.
    Ref,
    /// Reference to an identifier of an enclosing function.
    Outer,
}

/// One declaration entry: kind, frame slot, and whether scope exit should
/// auto-close the value.
#[derive(Clone, Copy, Debug)]
pub struct ScriptDecl {
    pub kind: DeclKind,
    pub slot: u16,
    pub auto_close: bool,
}

/// ip → line pair of the location table.
#[derive(Clone, Copy, Debug)]
pub struct ScriptLoc {
    pub line: u16,
    pub ip: u16,
}

/// Per-function record inside a bytecode script.
#[derive(Debug, Default)]
pub struct ScriptFunc {
    pub decls: IndexMap<Box<str>, ScriptDecl>,
    pub loc_start: usize,
    pub loc_len: usize,
    pub bc_start: usize,
    pub bc_len: usize,
    /// Number of enclosing frames a closure of this function captures.
    pub frame_count: u8,
    /// Registers the dispatch loop needs.
    pub reg_count: u8,
    pub has_this: bool,
}

impl ScriptFunc {
    /// Adds a declaration, allocating the next frame slot. Re-adding an
    /// existing name returns its slot unchanged.
    pub fn add_decl(&mut self, name: &str, kind: DeclKind) -> u16 {
        if let Some(d) = self.decls.get(name) {
            return d.slot;
        }
        let slot = self.decls.len() as u16;
        self.decls.insert(
            name.into(),
            ScriptDecl {
                kind,
                slot,
                auto_close: false,
            },
        );
        slot
    }

    pub fn decl(&self, name: &str) -> Option<&ScriptDecl> {
        self.decls.get(name)
    }

    /// Line of the instruction, by binary search over this function's span
    /// of the script location table.
    pub fn lookup_line(&self, locs: &[ScriptLoc], ip: u16) -> Option<u16> {
        let span = locs.get(self.loc_start..self.loc_start + self.loc_len)?;
        if span.is_empty() {
            return None;
        }
        let at = span.partition_point(|l| l.ip <= ip);
        if at == 0 {
            None
        } else {
            Some(span[at - 1].line)
        }
    }
}

/// One imported item of a script reference: the exporter's name, the local
/// alias, and whether the import is re-exported.
#[derive(Debug)]
pub struct ScriptRefItem {
    pub orig: Value,
    pub local: Value,
    pub public: bool,
}

/// An import edge to another script file.
#[derive(Debug)]
pub struct ScriptRef {
    pub filename: Value,
    pub script: Value,
    pub items: Vec<ScriptRefItem>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ScriptState {
    Error,
    Uninit,
    Inited,
    Called,
}

/// Bytecode payload of a compiled script.
#[derive(Debug, Default)]
pub struct BcScript {
    pub consts: Vec<Value>,
    pub priv_props: Vec<Value>,
    pub texts: Vec<Value>,
    pub localized_texts: Vec<Value>,
    pub templates: Vec<Value>,
    pub localized_templates: Vec<Value>,
    pub funcs: Vec<ScriptFunc>,
    pub bytecode: Vec<u8>,
    pub locs: Vec<ScriptLoc>,
}

/// Concrete script variants: compiled bytecode or a host-registered native
/// module (the loading itself is the host's concern).
#[derive(Debug)]
pub enum ScriptBody {
    Bytecode(BcScript),
    Native { frame_size: usize },
}

/// A top-level compilation unit: the body function, module-scope bindings,
/// public declarations, imports, and the localization text domain.
#[derive(Debug)]
pub struct Script {
    pub state: ScriptState,
    pub error: Value,
    pub path: Value,
    pub publics: IndexMap<Box<str>, usize>,
    pub func: Value,
    /// The bottom frame holding module-scope bindings.
    pub frame: Option<ObjRef>,
    pub refs: Vec<ScriptRef>,
    pub text_domain: Value,
    pub body: ScriptBody,
}

impl Script {
    pub fn new(path: Value, body: ScriptBody) -> Self {
        Script {
            state: ScriptState::Uninit,
            error: Value::Null,
            path,
            publics: IndexMap::new(),
            func: Value::Null,
            frame: None,
            refs: Vec::new(),
            text_domain: Value::Null,
            body,
        }
    }

    /// Registers a public declaration. `slot` of `None` allocates the next
    /// index, mirroring the C `id == -1` convention.
    pub fn add_public(&mut self, name: &str, slot: Option<usize>) -> usize {
        if let Some(p) = self.publics.get(name) {
            return *p;
        }
        let id = slot.unwrap_or(self.publics.len());
        self.publics.insert(name.into(), id);
        id
    }

    pub fn public(&self, name: &str) -> Option<usize> {
        self.publics.get(name).copied()
    }

    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        push_ref(self.error, out);
        push_ref(self.path, out);
        push_ref(self.func, out);
        push_ref(self.text_domain, out);
        if let Some(f) = self.frame {
            out.push(f);
        }
        for r in &self.refs {
            push_ref(r.filename, out);
            push_ref(r.script, out);
            for item in &r.items {
                push_ref(item.orig, out);
                push_ref(item.local, out);
            }
        }
        if let ScriptBody::Bytecode(bc) = &self.body {
            for v in bc
                .consts
                .iter()
                .chain(&bc.priv_props)
                .chain(&bc.texts)
                .chain(&bc.localized_texts)
                .chain(&bc.templates)
                .chain(&bc.localized_templates)
            {
                push_ref(*v, out);
            }
        }
    }

    pub fn size_hint(&self) -> usize {
        match &self.body {
            ScriptBody::Bytecode(bc) => {
                bc.bytecode.len()
                    + bc.consts.len() * size_of::<Value>()
                    + bc.locs.len() * size_of::<ScriptLoc>()
                    + bc.funcs.len() * size_of::<ScriptFunc>()
            }
            ScriptBody::Native { .. } => 0,
        }
    }
}
