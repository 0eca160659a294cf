use crate::values::object::push_ref;
use crate::values::value::{ObjRef, Value};

/// A single activation record.
///
/// Frames are heap objects so closures and fibers can keep them alive past
/// the call that created them. `bot` links to the caller's frame.
#[derive(Debug)]
pub struct Frame {
    /// The callee function value.
    pub func: Value,
    /// Instruction pointer, -1 before the first dispatch.
    pub ip: i32,
    /// Register array sized by the function's declaration count.
    pub regs: Vec<Value>,
    pub this: Value,
    pub bot: Option<ObjRef>,
}

impl Frame {
    pub fn new(func: Value, len: usize, bot: Option<ObjRef>) -> Self {
        Frame {
            func,
            ip: -1,
            regs: vec![Value::Null; len],
            this: Value::Null,
            bot,
        }
    }

    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        push_ref(self.func, out);
        push_ref(self.this, out);
        if let Some(b) = self.bot {
            out.push(b);
        }
        for v in &self.regs {
            push_ref(*v, out);
        }
    }
}
