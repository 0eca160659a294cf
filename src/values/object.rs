use indexmap::IndexMap;

use crate::values::property::{PropKey, Property};
use crate::values::value::{ObjRef, Value};

/// Native-side private payload attached to an object.
///
/// Mirrors the private-data wrapper of built-in classes: the payload is
/// invisible to script property access but is traced by the collector.
#[derive(Debug)]
pub enum PrivData {
    /// Lazy `map`/`select` wrapper: the inner iterator plus the function.
    FuncIter { iter: Value, f: Value },
    /// Iterator over an array's items.
    ArrayIter { arr: Value, idx: usize },
    /// Snapshot iterator over an object's own keys.
    KeysIter { owner: Value, keys: Vec<Value>, idx: usize },
}

impl PrivData {
    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        match self {
            PrivData::FuncIter { iter, f } => {
                push_ref(*iter, out);
                push_ref(*f, out);
            }
            PrivData::ArrayIter { arr, .. } => push_ref(*arr, out),
            PrivData::KeysIter { owner, keys, .. } => {
                push_ref(*owner, out);
                for k in keys {
                    push_ref(*k, out);
                }
            }
        }
    }
}

#[inline]
pub(crate) fn push_ref(v: Value, out: &mut Vec<ObjRef>) {
    if let Value::Ref(r) = v {
        out.push(r);
    }
}

/// An ordered property map plus an optional interface (shared prototype).
///
/// Most heap kinds embed an `Object` as their base so the generic property
/// protocol applies to them uniformly.
#[derive(Debug, Default)]
pub struct Object {
    /// The interface (prototype) value, or null.
    pub inf: Value,
    pub(crate) props: IndexMap<PropKey, Property>,
    pub(crate) priv_data: Option<PrivData>,
}

impl Object {
    pub fn new(inf: Value) -> Self {
        Object {
            inf,
            props: IndexMap::new(),
            priv_data: None,
        }
    }

    /// Own-property fast path; no interface walk, no getter invocation.
    pub fn lookup(&self, key: &PropKey) -> Option<&Property> {
        self.props.get(key)
    }

    /// Inserts or replaces a property. Replacing keeps the original
    /// insertion position; inserting appends.
    pub fn put(&mut self, key: PropKey, prop: Property) {
        self.props.insert(key, prop);
    }

    /// Removes a property, preserving the order of the remaining ones.
    pub fn remove(&mut self, key: &PropKey) -> Option<Property> {
        self.props.shift_remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &PropKey> {
        self.props.keys()
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn set_priv(&mut self, data: PrivData) {
        self.priv_data = Some(data);
    }

    pub fn priv_data(&self) -> Option<&PrivData> {
        self.priv_data.as_ref()
    }

    pub fn priv_data_mut(&mut self) -> Option<&mut PrivData> {
        self.priv_data.as_mut()
    }

    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        push_ref(self.inf, out);
        for prop in self.props.values() {
            prop.trace(out);
        }
        if let Some(p) = &self.priv_data {
            p.trace(out);
        }
    }
}
