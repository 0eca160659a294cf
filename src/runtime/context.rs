use crate::runtime::status::StatusEntry;
use crate::values::value::{ObjRef, Value};

/// Handle of a per-thread execution context inside a VM.
pub type ContextId = usize;

/// The caller's stacks and frame chain, parked while a fiber's private
/// stacks are active. Kept inside the context so the collector still sees
/// everything the suspended caller holds.
#[derive(Debug)]
pub(crate) struct SuspendedWorld {
    pub v_stack: Vec<Value>,
    pub s_stack: Vec<StatusEntry>,
    pub frames: Option<ObjRef>,
    pub fiber: Value,
}

/// Per-thread execution state.
///
/// The value and status stacks here are whatever is currently active: when
/// a fiber runs, its private stacks are swapped in and the previous
/// contents wait inside the fiber object.
#[derive(Debug, Default)]
pub struct Context {
    pub(crate) v_stack: Vec<Value>,
    pub(crate) s_stack: Vec<StatusEntry>,
    /// The current frame chain.
    pub(crate) frames: Option<ObjRef>,
    /// Frame chain captured at the last throw, for stack traces.
    pub(crate) error_frames: Option<ObjRef>,
    /// Frame chain used to unwind to module scope.
    pub(crate) main_frames: Option<ObjRef>,
    pub(crate) error: Value,
    pub(crate) curr_script: Value,
    pub(crate) sched_count: i32,
    pub(crate) lock_count: i32,
    /// Worlds parked by active fiber resumptions, innermost last.
    pub(crate) suspended: Vec<SuspendedWorld>,
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    pub fn value_stack(&self) -> &[Value] {
        &self.v_stack
    }

    pub fn status_depth(&self) -> usize {
        self.s_stack.len()
    }

    pub fn current_error(&self) -> Value {
        self.error
    }

    pub fn sched_count(&self) -> i32 {
        self.sched_count
    }

    pub fn lock_count(&self) -> i32 {
        self.lock_count
    }
}
