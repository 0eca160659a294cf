//! The value model: the uniform value cell and every managed object kind.

pub mod array;
pub mod class;
pub mod dict;
pub mod function;
pub mod interface;
pub mod object;
pub mod property;
pub mod set;
pub mod string;
pub mod value;

use strum_macros::Display;

use crate::regex::match_result::Match;
use crate::regex::Regex;
use crate::runtime::fiber::Fiber;
use crate::runtime::frame::Frame;
use crate::runtime::script::Script;
use crate::values::array::Array;
use crate::values::class::Class;
use crate::values::dict::{Dict, DictIter};
use crate::values::function::{Function, NativeFunc};
use crate::values::interface::Interface;
use crate::values::object::Object;
use crate::values::set::{Set, SetIter};
use crate::values::string::OxStr;
use crate::values::value::ObjRef;

/// A managed heap object: the tagged union the object-ops vtable of the C
/// runtime maps onto. The kind decides how the generic property protocol,
/// the collector's `trace`, and `call` behave.
#[derive(Debug)]
pub enum HeapObj {
    Str(OxStr),
    Array(Array),
    Object(Object),
    Interface(Interface),
    Class(Class),
    Function(Function),
    NativeFunc(NativeFunc),
    Frame(Frame),
    Script(Script),
    Fiber(Fiber),
    Dict(Dict),
    DictIter(DictIter),
    Set(Set),
    SetIter(SetIter),
    Regex(Regex),
    Match(Match),
}

/// Object kind tag, mostly for diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ObjKind {
    Str,
    Array,
    Object,
    Interface,
    Class,
    Function,
    NativeFunc,
    Frame,
    Script,
    Fiber,
    Dict,
    DictIter,
    Set,
    SetIter,
    Regex,
    Match,
}

impl HeapObj {
    pub fn kind(&self) -> ObjKind {
        match self {
            HeapObj::Str(_) => ObjKind::Str,
            HeapObj::Array(_) => ObjKind::Array,
            HeapObj::Object(_) => ObjKind::Object,
            HeapObj::Interface(_) => ObjKind::Interface,
            HeapObj::Class(_) => ObjKind::Class,
            HeapObj::Function(_) => ObjKind::Function,
            HeapObj::NativeFunc(_) => ObjKind::NativeFunc,
            HeapObj::Frame(_) => ObjKind::Frame,
            HeapObj::Script(_) => ObjKind::Script,
            HeapObj::Fiber(_) => ObjKind::Fiber,
            HeapObj::Dict(_) => ObjKind::Dict,
            HeapObj::DictIter(_) => ObjKind::DictIter,
            HeapObj::Set(_) => ObjKind::Set,
            HeapObj::SetIter(_) => ObjKind::SetIter,
            HeapObj::Regex(_) => ObjKind::Regex,
            HeapObj::Match(_) => ObjKind::Match,
        }
    }

    /// The object base carrying the property map, for kinds that have one.
    pub fn base_object(&self) -> Option<&Object> {
        match self {
            HeapObj::Object(o) => Some(o),
            HeapObj::Array(a) => Some(&a.obj),
            HeapObj::Interface(i) => Some(&i.obj),
            HeapObj::Class(c) => Some(&c.obj),
            HeapObj::Function(f) => Some(&f.obj),
            HeapObj::NativeFunc(f) => Some(&f.obj),
            HeapObj::Fiber(f) => Some(&f.obj),
            HeapObj::Dict(d) => Some(&d.obj),
            HeapObj::DictIter(d) => Some(&d.obj),
            HeapObj::Set(s) => Some(&s.obj),
            HeapObj::SetIter(s) => Some(&s.obj),
            HeapObj::Regex(r) => Some(&r.obj),
            HeapObj::Match(m) => Some(&m.obj),
            HeapObj::Str(_) | HeapObj::Frame(_) | HeapObj::Script(_) => None,
        }
    }

    pub fn base_object_mut(&mut self) -> Option<&mut Object> {
        match self {
            HeapObj::Object(o) => Some(o),
            HeapObj::Array(a) => Some(&mut a.obj),
            HeapObj::Interface(i) => Some(&mut i.obj),
            HeapObj::Class(c) => Some(&mut c.obj),
            HeapObj::Function(f) => Some(&mut f.obj),
            HeapObj::NativeFunc(f) => Some(&mut f.obj),
            HeapObj::Fiber(f) => Some(&mut f.obj),
            HeapObj::Dict(d) => Some(&mut d.obj),
            HeapObj::DictIter(d) => Some(&mut d.obj),
            HeapObj::Set(s) => Some(&mut s.obj),
            HeapObj::SetIter(s) => Some(&mut s.obj),
            HeapObj::Regex(r) => Some(&mut r.obj),
            HeapObj::Match(m) => Some(&mut m.obj),
            HeapObj::Str(_) | HeapObj::Frame(_) | HeapObj::Script(_) => None,
        }
    }

    /// Appends every strong reference this object holds, the collector's
    /// `scan` hook. Weak bookkeeping (container-to-iterator lists) is
    /// deliberately skipped.
    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        match self {
            HeapObj::Str(_) => {}
            HeapObj::Array(a) => a.trace(out),
            HeapObj::Object(o) => o.trace(out),
            HeapObj::Interface(i) => i.trace(out),
            HeapObj::Class(c) => c.trace(out),
            HeapObj::Function(f) => f.trace(out),
            HeapObj::NativeFunc(f) => f.trace(out),
            HeapObj::Frame(f) => f.trace(out),
            HeapObj::Script(s) => s.trace(out),
            HeapObj::Fiber(f) => f.trace(out),
            HeapObj::Dict(d) => d.trace(out),
            HeapObj::DictIter(d) => d.trace(out),
            HeapObj::Set(s) => s.trace(out),
            HeapObj::SetIter(s) => s.trace(out),
            HeapObj::Regex(r) => r.trace(out),
            HeapObj::Match(m) => m.trace(out),
        }
    }

    /// Rough byte estimate used by the allocation accounting.
    pub fn size_hint(&self) -> usize {
        let base = size_of::<HeapObj>();
        base + match self {
            HeapObj::Str(s) => s.len(),
            HeapObj::Array(a) => a.items.len() * size_of::<crate::values::value::Value>(),
            HeapObj::Object(o) => o.len() * 48,
            HeapObj::Interface(i) => i.obj.len() * 48 + i.implemented.len() * 8,
            HeapObj::Class(c) => c.obj.len() * 48,
            HeapObj::Function(f) => f.obj.len() * 48 + f.frames.len() * 8,
            HeapObj::NativeFunc(f) => f.obj.len() * 48,
            HeapObj::Frame(f) => f.regs.len() * size_of::<crate::values::value::Value>(),
            HeapObj::Script(s) => s.size_hint(),
            HeapObj::Fiber(f) => f.size_hint(),
            HeapObj::Dict(d) => d.len() * 64,
            HeapObj::DictIter(_) | HeapObj::SetIter(_) => 0,
            HeapObj::Set(s) => s.len() * 48,
            HeapObj::Regex(r) => r.size_hint(),
            HeapObj::Match(m) => m.size_hint(),
        }
    }
}
