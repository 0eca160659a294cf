use crate::runtime::context::ContextId;
use crate::runtime::error::Thrown;
use crate::runtime::vm::Vm;
use crate::values::object::{Object, push_ref};
use crate::values::value::{ObjRef, Value};

/// Native function pointer: `(vm, ctx, f, this, args) -> value`.
pub type NativeFn = fn(&mut Vm, ContextId, Value, Value, &[Value]) -> Result<Value, Thrown>;

/// A script function value.
///
/// The body lives in the owning script's function array (`sfunc` is the
/// dense index assigned by the parser); `frames` are the captured enclosing
/// frames a closure carries.
#[derive(Debug)]
pub struct Function {
    pub obj: Object,
    /// The script owning the function's bytecode.
    pub script: Value,
    /// Index into the script's function array.
    pub sfunc: usize,
    /// Captured frames, outermost last.
    pub frames: Vec<ObjRef>,
}

impl Function {
    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        self.obj.trace(out);
        push_ref(self.script, out);
        out.extend(self.frames.iter().copied());
    }
}

/// A function implemented by the host.
pub struct NativeFunc {
    pub obj: Object,
    /// The script this function belongs to, or null for built-ins.
    pub script: Value,
    pub f: NativeFn,
}

impl NativeFunc {
    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        self.obj.trace(out);
        push_ref(self.script, out);
    }
}

impl std::fmt::Debug for NativeFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunc").finish_non_exhaustive()
    }
}
