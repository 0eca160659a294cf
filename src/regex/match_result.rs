use crate::regex::exec::Slice;
use crate::values::object::{Object, push_ref};
use crate::values::value::{ObjRef, Value};

/// The result of a successful regex application.
///
/// Carries the source string, the match's byte offsets, and the per-group
/// slice array; the matched substring and the groups/slices arrays
/// materialize lazily on first access and are cached here.
#[derive(Debug)]
pub struct Match {
    pub obj: Object,
    pub s: Value,
    pub start: usize,
    pub end: usize,
    pub slices: Vec<Slice>,
    /// Cached matched substring.
    pub sub: Value,
    /// Cached array of group substrings.
    pub group_strs: Value,
    /// Cached array of `[start, end]` pairs.
    pub group_slices: Value,
}

impl Match {
    pub fn new(obj: Object, s: Value, start: usize, end: usize, slices: Vec<Slice>) -> Self {
        Match {
            obj,
            s,
            start,
            end,
            slices,
            sub: Value::Null,
            group_strs: Value::Null,
            group_slices: Value::Null,
        }
    }

    pub fn group_count(&self) -> usize {
        self.slices.len()
    }

    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        self.obj.trace(out);
        push_ref(self.s, out);
        push_ref(self.sub, out);
        push_ref(self.group_strs, out);
        push_ref(self.group_slices, out);
    }

    pub fn size_hint(&self) -> usize {
        self.slices.len() * size_of::<Slice>()
    }
}
