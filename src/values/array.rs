use crate::values::object::{Object, push_ref};
use crate::values::value::{ObjRef, Value};

/// Growable vector of values.
///
/// Item set beyond the end back-fills the gap with nulls; reads beyond the
/// end yield null. `length` is exposed through an accessor on the array
/// interface.
#[derive(Debug)]
pub struct Array {
    pub obj: Object,
    pub items: Vec<Value>,
}

impl Array {
    pub fn new(obj: Object, len: usize) -> Self {
        Array {
            obj,
            items: vec![Value::Null; len],
        }
    }

    pub fn get_item(&self, idx: usize) -> Value {
        self.items.get(idx).copied().unwrap_or(Value::Null)
    }

    pub fn set_item(&mut self, idx: usize, v: Value) {
        if idx >= self.items.len() {
            self.items.resize(idx + 1, Value::Null);
        }
        self.items[idx] = v;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        self.obj.trace(out);
        for v in &self.items {
            push_ref(*v, out);
        }
    }
}
