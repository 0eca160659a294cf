//! Fiber semantics, driven through a toy dispatcher that advances the
//! saved instruction pointer exactly the way the real bytecode engine
//! does around `yield`.

use std::rc::Rc;

use ox_core::runtime::dispatch::{Dispatch, DispatchCall, DispatchOutcome};
use ox_core::runtime::error::{Thrown, throw_error};
use ox_core::runtime::fiber::FiberState;
use ox_core::runtime::operation::{call, call_method, get, instance_of};
use ox_core::runtime::script::{BcScript, Script, ScriptBody, ScriptFunc};
use ox_core::runtime::vm::ObjId;
use ox_core::values::HeapObj;
use ox_core::values::function::Function;
use ox_core::values::object::Object;
use ox_core::{ContextId, ErrorKind, Value, Vm};

fn setup() -> (Vm, ContextId) {
    ox_core::logger::init_logger();
    let mut vm = Vm::new();
    let ctx = vm.acquire_context();
    (vm, ctx)
}

/// Builds a script function value backed by a one-function bytecode script.
fn make_function(vm: &mut Vm, reg_count: u8) -> Value {
    let mut bc = BcScript::default();
    bc.funcs.push(ScriptFunc {
        reg_count,
        ..Default::default()
    });

    let script = Value::Ref(vm.alloc(HeapObj::Script(Script::new(
        Value::Null,
        ScriptBody::Bytecode(bc),
    ))));

    let inf = vm.object_id(ObjId::FunctionInf);
    Value::Ref(vm.alloc(HeapObj::Function(Function {
        obj: Object::new(inf),
        script,
        sfunc: 0,
        frames: Vec::new(),
    })))
}

fn frame_ip(vm: &Vm, frame: ox_core::ObjRef) -> i32 {
    match vm.heap().get(frame) {
        HeapObj::Frame(f) => f.ip,
        _ => panic!("not a frame"),
    }
}

fn set_frame_ip(vm: &mut Vm, frame: ox_core::ObjRef, ip: i32) {
    if let HeapObj::Frame(f) = vm.heap_mut().get_mut(frame) {
        f.ip = ip;
    }
}

/// A generator of two yields: `yield 1; yield 2; return <resumed arg>`.
struct TwoYields;

impl Dispatch for TwoYields {
    fn run(
        &self,
        vm: &mut Vm,
        ctx: ContextId,
        call: DispatchCall,
    ) -> Result<DispatchOutcome, Thrown> {
        match frame_ip(vm, call.frame) {
            0 => {
                set_frame_ip(vm, call.frame, 3);
                Ok(DispatchOutcome::Yield {
                    value: Value::Number(1.0),
                    resume_slot: 0,
                })
            }
            3 => {
                set_frame_ip(vm, call.frame, 6);
                Ok(DispatchOutcome::Yield {
                    value: Value::Number(2.0),
                    resume_slot: 0,
                })
            }
            _ => {
                // The resumed argument landed in the fiber's value stack,
                // which is the active stack while the fiber runs.
                let arg = vm.context(ctx).value_stack().first().copied();
                Ok(DispatchOutcome::Return(arg.unwrap_or(Value::Null)))
            }
        }
    }
}

/// Fails on the second resume.
struct FailsOnResume;

impl Dispatch for FailsOnResume {
    fn run(
        &self,
        vm: &mut Vm,
        ctx: ContextId,
        call: DispatchCall,
    ) -> Result<DispatchOutcome, Thrown> {
        match frame_ip(vm, call.frame) {
            0 => {
                set_frame_ip(vm, call.frame, 3);
                Ok(DispatchOutcome::Yield {
                    value: Value::Number(1.0),
                    resume_slot: 0,
                })
            }
            _ => Err(throw_error(vm, ctx, ErrorKind::Range, "fiber exploded")),
        }
    }
}

fn new_fiber(vm: &mut Vm, ctx: ContextId, func: Value) -> Value {
    let fiber_class = vm.object_id(ObjId::Fiber);
    call(vm, ctx, fiber_class, Value::Null, &[func]).unwrap()
}

fn next(vm: &mut Vm, ctx: ContextId, fiber: Value, arg: &[Value]) -> Result<Value, Thrown> {
    let name = vm.new_string("next");
    call_method(vm, ctx, fiber, name, arg)
}

fn fiber_state(vm: &Vm, fiber: Value) -> FiberState {
    match vm.heap().get(fiber.as_ref().unwrap()) {
        HeapObj::Fiber(f) => f.state,
        _ => panic!("not a fiber"),
    }
}

#[test]
fn generator_yields_then_ends() {
    let (mut vm, ctx) = setup();
    vm.set_dispatch(Rc::new(TwoYields));

    let func = make_function(&mut vm, 1);
    let fiber = new_fiber(&mut vm, ctx, func);
    assert_eq!(fiber_state(&vm, fiber), FiberState::Init);

    // n yields → n+1 `next`s reach the end state.
    assert_eq!(next(&mut vm, ctx, fiber, &[]).unwrap(), Value::Number(1.0));
    assert_eq!(fiber_state(&vm, fiber), FiberState::Run);
    assert_eq!(next(&mut vm, ctx, fiber, &[]).unwrap(), Value::Number(2.0));
    assert_eq!(next(&mut vm, ctx, fiber, &[]).unwrap(), Value::Null);
    assert_eq!(fiber_state(&vm, fiber), FiberState::End);

    // The (n+2)nd returns null.
    assert_eq!(next(&mut vm, ctx, fiber, &[]).unwrap(), Value::Null);

    let end_key = vm.new_string("end");
    assert_eq!(get(&mut vm, ctx, fiber, end_key).unwrap(), Value::Bool(true));
}

#[test]
fn resume_argument_lands_in_the_yield_slot() {
    let (mut vm, ctx) = setup();
    vm.set_dispatch(Rc::new(TwoYields));

    let func = make_function(&mut vm, 1);
    let fiber = new_fiber(&mut vm, ctx, func);

    assert_eq!(next(&mut vm, ctx, fiber, &[]).unwrap(), Value::Number(1.0));
    assert_eq!(
        next(&mut vm, ctx, fiber, &[Value::Number(42.0)]).unwrap(),
        Value::Number(2.0)
    );
    // The last resume's argument is what the generator returns.
    assert_eq!(
        next(&mut vm, ctx, fiber, &[Value::Number(99.0)]).unwrap(),
        Value::Number(99.0)
    );

    let value_key = vm.new_string("value");
    assert_eq!(
        get(&mut vm, ctx, fiber, value_key).unwrap(),
        Value::Number(99.0)
    );
}

#[test]
fn caller_stacks_survive_fiber_runs() {
    let (mut vm, ctx) = setup();
    vm.set_dispatch(Rc::new(TwoYields));

    let marker = vm.new_string("caller marker");
    let slot = vm.stack_push(ctx, marker);

    let func = make_function(&mut vm, 1);
    let fiber = new_fiber(&mut vm, ctx, func);
    let fiber_slot = vm.stack_push(ctx, fiber);
    next(&mut vm, ctx, fiber, &[]).unwrap();

    // The caller's rooted value is still there and still alive after a
    // collection that ran with the fiber suspended.
    vm.collect();
    assert_eq!(vm.stack_get(ctx, slot), marker);
    assert!(vm.heap().is_live(marker.as_ref().unwrap()));
    assert!(vm.heap().is_live(fiber.as_ref().unwrap()));

    vm.stack_pop(ctx, fiber_slot);
    vm.stack_pop(ctx, slot);
}

#[test]
fn failed_fiber_stores_and_rethrows_its_error() {
    let (mut vm, ctx) = setup();
    vm.set_dispatch(Rc::new(FailsOnResume));

    let func = make_function(&mut vm, 1);
    let fiber = new_fiber(&mut vm, ctx, func);

    assert_eq!(next(&mut vm, ctx, fiber, &[]).unwrap(), Value::Number(1.0));

    // The failing resume propagates...
    assert!(next(&mut vm, ctx, fiber, &[]).is_err());
    assert_eq!(fiber_state(&vm, fiber), FiberState::Error);
    let first_error = vm.current_error(ctx);
    let range_error = vm.object_id(ObjId::RangeError);
    assert!(instance_of(&mut vm, ctx, first_error, range_error).unwrap());
    vm.clear_error(ctx);

    // ...and every later next re-throws the stored error.
    assert!(next(&mut vm, ctx, fiber, &[]).is_err());
    let again = vm.current_error(ctx);
    assert_eq!(again, first_error);

    let end_key = vm.new_string("end");
    assert_eq!(get(&mut vm, ctx, fiber, end_key).unwrap(), Value::Bool(true));
}

#[test]
fn fiber_requires_a_script_function() {
    let (mut vm, ctx) = setup();
    vm.set_dispatch(Rc::new(TwoYields));

    let fiber_class = vm.object_id(ObjId::Fiber);
    let not_a_function = vm.new_string("nope");
    assert!(call(&mut vm, ctx, fiber_class, Value::Null, &[not_a_function]).is_err());
    vm.clear_error(ctx);
}

#[test]
fn plain_script_function_call_goes_through_dispatch() {
    struct ReturnsSeven;
    impl Dispatch for ReturnsSeven {
        fn run(
            &self,
            _vm: &mut Vm,
            _ctx: ContextId,
            _call: DispatchCall,
        ) -> Result<DispatchOutcome, Thrown> {
            Ok(DispatchOutcome::Return(Value::Number(7.0)))
        }
    }

    let (mut vm, ctx) = setup();
    vm.set_dispatch(Rc::new(ReturnsSeven));

    let func = make_function(&mut vm, 0);
    let rv = call(&mut vm, ctx, func, Value::Null, &[]).unwrap();
    assert_eq!(rv, Value::Number(7.0));
}
