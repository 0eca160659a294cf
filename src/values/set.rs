use indexmap::IndexSet;

use crate::values::dict::DictKey;
use crate::values::object::{Object, push_ref};
use crate::values::value::{ObjRef, Value};

/// Insertion-ordered set of values, keyed like dictionary entries.
#[derive(Debug)]
pub struct Set {
    pub obj: Object,
    pub(crate) entries: IndexSet<DictKey>,
    pub(crate) iters: Vec<ObjRef>,
}

impl Set {
    pub fn new(obj: Object) -> Self {
        Set {
            obj,
            entries: IndexSet::new(),
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
        for k in &self.entries {
            if let DictKey::Ref(r) = k {
                out.push(*r);
            }
        }
    }
}

/// Iterator over a set's members; cursor semantics match [`super::dict::DictIter`].
#[derive(Debug)]
pub struct SetIter {
    pub obj: Object,
    pub set: Value,
    pub pos: usize,
    pub closed: bool,
}

impl SetIter {
    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        self.obj.trace(out);
        push_ref(self.set, out);
    }
}
