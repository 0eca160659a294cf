use indexmap::IndexMap;

use crate::values::object::{Object, push_ref};
use crate::values::property::NumKey;
use crate::values::value::{ObjRef, Value};

/// A dictionary key: any value, hashed by kind.
///
/// Strings hash by content (the text is copied out of the heap when the key
/// is formed), numbers through the integer conversion documented on
/// [`NumKey`], heap references by identity.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum DictKey {
    Null,
    Bool(bool),
    Num(NumKey),
    Str(Box<str>),
    Ref(ObjRef),
}

impl DictKey {
    /// The value form of the key. String keys re-enter the heap on demand,
    /// so this returns what was captured at insertion for the other kinds.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            DictKey::Null => Some(Value::Null),
            DictKey::Bool(b) => Some(Value::Bool(*b)),
            DictKey::Num(NumKey(n)) => Some(Value::Number(*n)),
            DictKey::Ref(r) => Some(Value::Ref(*r)),
            DictKey::Str(_) => None,
        }
    }
}

/// What a dictionary (or set) iterator yields.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EntryIterKind {
    Key,
    Value,
    KeyValue,
}

/// Insertion-ordered key/value container.
///
/// Live iterators register themselves in `iters`; the list is weak (the
/// collector does not trace it) and dead entries are tombstoned away
/// whenever the container mutates.
#[derive(Debug)]
pub struct Dict {
    pub obj: Object,
    pub(crate) entries: IndexMap<DictKey, Value>,
    pub(crate) iters: Vec<ObjRef>,
}

impl Dict {
    pub fn new(obj: Object) -> Self {
        Dict {
            obj,
            entries: IndexMap::new(),
            iters: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        self.obj.trace(out);
        for (k, v) in &self.entries {
            if let DictKey::Ref(r) = k {
                out.push(*r);
            }
            push_ref(*v, out);
        }
        // `iters` is a weak list on purpose.
    }
}

/// Iterator over a dictionary's entries.
///
/// `pos` indexes the entry order; removing the entry under the cursor
/// leaves `pos` in place, which lands on the following entry after the
/// shift, matching the in-place advance of the original runtime.
#[derive(Debug)]
pub struct DictIter {
    pub obj: Object,
    pub dict: Value,
    pub kind: EntryIterKind,
    pub pos: usize,
    pub closed: bool,
}

impl DictIter {
    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        self.obj.trace(out);
        push_ref(self.dict, out);
    }
}
