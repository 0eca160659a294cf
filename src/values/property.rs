use std::hash::{Hash, Hasher};

use crate::values::value::Value;

/// A number usable as a hash-map key.
///
/// Hashing goes through the pointer-sized integer conversion (`f64 as i64`)
/// the C runtime used, which differs from IEEE hashing at edge cases: -0.0
/// collides with 0.0 and values outside the i64 range saturate. Equality
/// stays IEEE except that NaN equals NaN so the `Eq` laws hold.
#[derive(Clone, Copy, Debug)]
pub struct NumKey(pub f64);

impl PartialEq for NumKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0 || (self.0.is_nan() && other.0.is_nan())
    }
}

impl Eq for NumKey {}

impl Hash for NumKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.0 as i64).hash(state);
    }
}

/// Property key: a string (by content) or a number.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum PropKey {
    Str(Box<str>),
    Num(NumKey),
}

impl PropKey {
    pub fn str(s: impl Into<Box<str>>) -> Self {
        PropKey::Str(s.into())
    }

    pub fn num(n: f64) -> Self {
        PropKey::Num(NumKey(n))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropKey::Str(s) => Some(s),
            PropKey::Num(_) => None,
        }
    }

    /// The index form of the key, when it is a non-negative integral number.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            PropKey::Num(NumKey(n)) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
            _ => None,
        }
    }
}

impl From<&str> for PropKey {
    fn from(s: &str) -> Self {
        PropKey::Str(s.into())
    }
}

impl From<f64> for PropKey {
    fn from(n: f64) -> Self {
        PropKey::Num(NumKey(n))
    }
}

impl From<usize> for PropKey {
    fn from(n: usize) -> Self {
        PropKey::Num(NumKey(n as f64))
    }
}

/// A property slot in an object's ordered map.
#[derive(Clone, Debug)]
pub enum Property {
    /// Assignment is rejected.
    Const(Value),
    /// Plain mutable slot.
    Var(Value),
    /// Getter plus optional setter function pair.
    Accessor { get: Value, set: Value },
}

impl Property {
    /// Strong references held by this property, for the collector.
    pub fn trace(&self, out: &mut Vec<crate::values::value::ObjRef>) {
        match self {
            Property::Const(v) | Property::Var(v) => {
                if let Value::Ref(r) = v {
                    out.push(*r);
                }
            }
            Property::Accessor { get, set } => {
                if let Value::Ref(r) = get {
                    out.push(*r);
                }
                if let Value::Ref(r) = set {
                    out.push(*r);
                }
            }
        }
    }
}
