use crate::runtime::context::ContextId;
use crate::runtime::error::Thrown;
use crate::runtime::vm::Vm;
use crate::values::value::{ObjRef, Value};

/// One invocation request handed to the bytecode engine.
#[derive(Debug)]
pub struct DispatchCall {
    /// The script function value being invoked.
    pub func: Value,
    /// The frame already pushed for the activation (registers null-filled,
    /// `this` installed).
    pub frame: ObjRef,
    pub args: Vec<Value>,
    /// Set when the activation runs inside a fiber; the engine resumes at
    /// the frame's saved instruction pointer.
    pub fiber: Option<ObjRef>,
}

/// How a dispatched activation came back.
#[derive(Debug, Clone, Copy)]
pub enum DispatchOutcome {
    Return(Value),
    /// A `yield` suspended the fiber. `resume_slot` is the logical index in
    /// the fiber's value stack where the next `next(x)` argument belongs.
    Yield { value: Value, resume_slot: usize },
}

/// The external bytecode engine.
///
/// The core owns values, frames, stacks and fibers; executing compiled
/// script functions is delegated through this hook. Hosts without an engine
/// can still use every native-function path.
pub trait Dispatch {
    fn run(
        &self,
        vm: &mut Vm,
        ctx: ContextId,
        call: DispatchCall,
    ) -> Result<DispatchOutcome, Thrown>;
}
