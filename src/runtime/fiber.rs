use std::mem;

use crate::runtime::context::{ContextId, SuspendedWorld};
use crate::runtime::dispatch::{DispatchCall, DispatchOutcome};
use crate::runtime::error::{Thrown, throw_type_error, throw_value};
use crate::runtime::status::StatusEntry;
use crate::runtime::vm::Vm;
use crate::values::HeapObj;
use crate::values::object::{Object, push_ref};
use crate::values::value::{ObjRef, Value};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FiberState {
    Init,
    Run,
    End,
    Error,
}

/// The run-status record saved across suspensions: the resume frame plus
/// the logical stack depths the dispatcher left behind.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunStatus {
    pub frame: Option<ObjRef>,
    pub vp: usize,
    pub sp: usize,
}

/// A suspendable cooperative computation.
///
/// The fiber owns private value and status stacks; resuming swaps them with
/// the context's active stacks, so a suspended fiber's whole world is
/// carried by this one object. `yield_slot` is a logical index into the
/// fiber's value stack where the next `next(x)` argument lands: an index,
/// not a pointer, so stack reallocation cannot invalidate it.
#[derive(Debug)]
pub struct Fiber {
    pub obj: Object,
    pub state: FiberState,
    pub func: Value,
    /// Last yielded value, the return value once ended, or the stored
    /// error after a failure.
    pub rv: Value,
    pub args: Vec<Value>,
    pub yield_slot: Option<usize>,
    pub v_stack: Vec<Value>,
    pub s_stack: Vec<StatusEntry>,
    pub rsr: RunStatus,
}

impl Fiber {
    pub fn new(obj: Object, func: Value, args: Vec<Value>) -> Self {
        Fiber {
            obj,
            state: FiberState::Init,
            func,
            rv: Value::Null,
            args,
            yield_slot: None,
            v_stack: Vec::new(),
            s_stack: Vec::new(),
            rsr: RunStatus::default(),
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self.state, FiberState::End | FiberState::Error)
    }

    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        self.obj.trace(out);
        push_ref(self.func, out);
        push_ref(self.rv, out);
        for v in &self.args {
            push_ref(*v, out);
        }
        if let Some(f) = self.rsr.frame {
            out.push(f);
        }
        for v in &self.v_stack {
            push_ref(*v, out);
        }
        for e in &self.s_stack {
            e.trace(out);
        }
    }

    pub fn size_hint(&self) -> usize {
        self.v_stack.len() * size_of::<Value>() + self.s_stack.len() * size_of::<StatusEntry>()
    }
}

/// Drives a fiber one step: the `next(x)` operation.
///
/// First resume moves the fiber from init to run; later resumes deposit the
/// argument into the yield-target slot. The value of each step is the
/// yielded value, then the entry function's return value, then null once
/// the fiber is finished. A failed fiber stores its error and re-throws it
/// on every further resume.
pub fn fiber_next(vm: &mut Vm, ctx: ContextId, fiber: Value, arg: Value) -> Result<Value, Thrown> {
    let Some(fr) = fiber.as_ref() else {
        return Err(throw_type_error(vm, ctx, "the value is not a fiber"));
    };
    let state = match vm.heap().get(fr) {
        HeapObj::Fiber(f) => f.state,
        _ => return Err(throw_type_error(vm, ctx, "the value is not a fiber")),
    };

    match state {
        FiberState::Init => resume(vm, ctx, fiber, fr, None),
        FiberState::Run => resume(vm, ctx, fiber, fr, Some(arg)),
        FiberState::End => Ok(Value::Null),
        FiberState::Error => {
            let err = match vm.heap().get(fr) {
                HeapObj::Fiber(f) => f.rv,
                _ => Value::Null,
            };
            Err(throw_value(vm, ctx, err))
        }
    }
}

/// Swaps the fiber's stacks in, dispatches, and swaps back, interpreting
/// the engine's outcome. The caller's world is parked inside the context so
/// a collection during the run still sees it.
fn resume(
    vm: &mut Vm,
    ctx: ContextId,
    fiber: Value,
    fr: ObjRef,
    arg: Option<Value>,
) -> Result<Value, Thrown> {
    let Some(engine) = vm.dispatch() else {
        return Err(throw_type_error(vm, ctx, "no bytecode engine registered"));
    };

    let frame = match vm.heap().get(fr) {
        HeapObj::Fiber(f) => f.rsr.frame,
        _ => None,
    };
    let Some(frame) = frame else {
        return Err(throw_type_error(vm, ctx, "the fiber has no activation frame"));
    };

    let (func, args, mut fv_stack, fs_stack, yield_slot) = match vm.heap_mut().get_mut(fr) {
        HeapObj::Fiber(f) => {
            f.state = FiberState::Run;
            (
                f.func,
                f.args.clone(),
                mem::take(&mut f.v_stack),
                mem::take(&mut f.s_stack),
                f.yield_slot.take(),
            )
        }
        _ => return Err(throw_type_error(vm, ctx, "the value is not a fiber")),
    };

    if let (Some(a), Some(slot)) = (arg, yield_slot)
        && slot < fv_stack.len()
    {
        fv_stack[slot] = a;
    }

    // Park the caller's world and install the fiber's.
    {
        let c = vm.context_mut(ctx);
        let v_stack = mem::replace(&mut c.v_stack, fv_stack);
        let s_stack = mem::replace(&mut c.s_stack, fs_stack);
        let frames = mem::replace(&mut c.frames, Some(frame));
        c.suspended.push(SuspendedWorld {
            v_stack,
            s_stack,
            frames,
            fiber,
        });
    }

    let result = engine.run(
        vm,
        ctx,
        DispatchCall {
            func,
            frame,
            args,
            fiber: Some(fr),
        },
    );

    // Restore the caller's world; whatever the fiber left goes back into
    // the fiber object.
    let (new_v, new_s, new_frames) = {
        let c = vm.context_mut(ctx);
        let world = c.suspended.pop().expect("suspended world");
        let new_v = mem::replace(&mut c.v_stack, world.v_stack);
        let new_s = mem::replace(&mut c.s_stack, world.s_stack);
        let new_frames = mem::replace(&mut c.frames, world.frames);
        (new_v, new_s, new_frames)
    };

    let error = vm.current_error(ctx);
    let store =
        |f: &mut Fiber, state: FiberState, rv: Value, yield_slot: Option<usize>| {
            f.state = state;
            f.rv = rv;
            f.yield_slot = yield_slot;
        };

    match result {
        Ok(DispatchOutcome::Yield { value, resume_slot }) => {
            if let HeapObj::Fiber(f) = vm.heap_mut().get_mut(fr) {
                store(f, FiberState::Run, value, Some(resume_slot));
                f.v_stack = new_v;
                f.s_stack = new_s;
                f.rsr.frame = new_frames;
                f.rsr.vp = f.v_stack.len();
                f.rsr.sp = f.s_stack.len();
            }
            Ok(value)
        }
        Ok(DispatchOutcome::Return(value)) => {
            if let HeapObj::Fiber(f) = vm.heap_mut().get_mut(fr) {
                store(f, FiberState::End, value, None);
                f.v_stack = new_v;
                f.s_stack = new_s;
                f.rsr.frame = None;
            }
            Ok(value)
        }
        Err(t) => {
            if let HeapObj::Fiber(f) = vm.heap_mut().get_mut(fr) {
                store(f, FiberState::Error, error, None);
                f.v_stack = new_v;
                f.s_stack = new_s;
                f.rsr.frame = None;
            }
            Err(t)
        }
    }
}
