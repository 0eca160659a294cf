//! Script values: public declarations resolve through the bottom frame,
//! the registry deduplicates by path, and location tables answer line
//! lookups.

use ox_core::runtime::operation::{get, set};
use ox_core::runtime::script::{BcScript, Script, ScriptBody, ScriptFunc, ScriptLoc, ScriptState};
use ox_core::values::HeapObj;
use ox_core::{Value, Vm};

fn setup() -> Vm {
    ox_core::logger::init_logger();
    Vm::new()
}

#[test]
fn publics_read_and_write_the_bottom_frame() {
    let mut vm = setup();
    let ctx = vm.acquire_context();

    let path = vm.new_string("demo.ox");
    let mut script = Script::new(path, ScriptBody::Bytecode(BcScript::default()));
    script.add_public("answer", None);
    script.add_public("other", None);

    let frame = vm.frame_push(ctx, Value::Null, 2);
    vm.frame_pop(ctx);
    script.frame = Some(frame);

    let sv = Value::Ref(vm.alloc(HeapObj::Script(script)));
    let slot = vm.stack_push(ctx, sv);

    let key = vm.new_string("answer");
    set(&mut vm, ctx, sv, key, Value::Number(42.0)).unwrap();
    assert_eq!(get(&mut vm, ctx, sv, key).unwrap(), Value::Number(42.0));

    // Unknown names resolve to null, not an error.
    let missing = vm.new_string("missing");
    assert_eq!(get(&mut vm, ctx, sv, missing).unwrap(), Value::Null);

    // The frame itself carries the value.
    match vm.heap().get(frame) {
        HeapObj::Frame(f) => assert_eq!(f.regs[0], Value::Number(42.0)),
        _ => panic!("expected frame"),
    }

    vm.stack_pop(ctx, slot);
}

#[test]
fn registry_is_keyed_by_path() {
    let mut vm = setup();
    let ctx = vm.acquire_context();

    let path = vm.new_string("lib/util.ox");
    let script = Script::new(path, ScriptBody::Bytecode(BcScript::default()));
    assert_eq!(script.state, ScriptState::Uninit);

    let sv = Value::Ref(vm.alloc(HeapObj::Script(script)));
    let slot = vm.stack_push(ctx, sv);
    vm.register_script("lib/util.ox", sv);

    assert_eq!(vm.lookup_script("lib/util.ox"), Some(sv));
    assert_eq!(vm.lookup_script("lib/other.ox"), None);

    // Registered scripts are collector roots.
    vm.stack_pop(ctx, slot);
    vm.collect();
    assert!(vm.heap().is_live(sv.as_ref().unwrap()));
}

#[test]
fn function_line_lookup_uses_the_location_table() {
    let mut bc = BcScript::default();
    bc.locs = vec![
        ScriptLoc { line: 10, ip: 0 },
        ScriptLoc { line: 11, ip: 8 },
        ScriptLoc { line: 14, ip: 20 },
    ];
    let mut f = ScriptFunc::default();
    f.loc_start = 0;
    f.loc_len = 3;

    assert_eq!(f.lookup_line(&bc.locs, 0), Some(10));
    assert_eq!(f.lookup_line(&bc.locs, 7), Some(10));
    assert_eq!(f.lookup_line(&bc.locs, 8), Some(11));
    assert_eq!(f.lookup_line(&bc.locs, 19), Some(11));
    assert_eq!(f.lookup_line(&bc.locs, 21), Some(14));
}
