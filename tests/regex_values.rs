//! The value-level regex surface: the Re class, match objects with lazy
//! groups and slices, and the flag rendering contract.

use ox_core::runtime::operation::{call, call_method, get, instance_of, to_string};
use ox_core::runtime::vm::ObjId;
use ox_core::{ContextId, Value, Vm};

fn setup() -> (Vm, ContextId) {
    ox_core::logger::init_logger();
    let mut vm = Vm::new();
    let ctx = vm.acquire_context();
    (vm, ctx)
}

fn new_re(vm: &mut Vm, ctx: ContextId, src: &str, flags: &str) -> Value {
    let re_class = vm.object_id(ObjId::Re);
    let src_v = vm.new_string(src);
    let flags_v = if flags.is_empty() {
        Value::Null
    } else {
        vm.new_string(flags)
    };
    call(vm, ctx, re_class, Value::Null, &[src_v, flags_v]).unwrap()
}

fn match_str(vm: &mut Vm, ctx: ContextId, re: Value, s: &str) -> Value {
    let s_v = vm.new_string(s);
    let name = vm.new_string("match");
    call_method(vm, ctx, re, name, &[s_v]).unwrap()
}

fn num(v: Value) -> f64 {
    v.as_number().expect("number")
}

#[test]
fn groups_and_slices_scenario() {
    let (mut vm, ctx) = setup();

    let re = new_re(&mut vm, ctx, "([a-z]+)([0-9]+)", "");
    let m = match_str(&mut vm, ctx, re, "abc012");
    assert!(!m.is_null());

    let start_key = vm.new_string("start");
    let end_key = vm.new_string("end");
    assert_eq!(num(get(&mut vm, ctx, m, start_key).unwrap()), 0.0);
    assert_eq!(num(get(&mut vm, ctx, m, end_key).unwrap()), 6.0);

    // groups = ["abc012", "abc", "012"]
    let groups_key = vm.new_string("groups");
    let groups = get(&mut vm, ctx, m, groups_key).unwrap();
    let expect = ["abc012", "abc", "012"];
    for (i, want) in expect.iter().enumerate() {
        let g = get(&mut vm, ctx, groups, Value::Number(i as f64)).unwrap();
        assert_eq!(vm.str_value(g), Some(*want));
    }

    // slices = [[0,6],[0,3],[3,6]]
    let slices_key = vm.new_string("slices");
    let slices = get(&mut vm, ctx, m, slices_key).unwrap();
    let expect = [(0.0, 6.0), (0.0, 3.0), (3.0, 6.0)];
    for (i, (s, e)) in expect.iter().enumerate() {
        let pair = get(&mut vm, ctx, slices, Value::Number(i as f64)).unwrap();
        assert_eq!(num(get(&mut vm, ctx, pair, Value::Number(0.0)).unwrap()), *s);
        assert_eq!(num(get(&mut vm, ctx, pair, Value::Number(1.0)).unwrap()), *e);
    }

    // Lazy caches hand back the same arrays.
    let groups_key = vm.new_string("groups");
    let again = get(&mut vm, ctx, m, groups_key).unwrap();
    assert_eq!(again, groups);

    // The match renders as its substring.
    let s = to_string(&mut vm, ctx, m).unwrap();
    assert_eq!(vm.str_value(s), Some("abc012"));
}

#[test]
fn match_is_a_match_instance_or_null() {
    let (mut vm, ctx) = setup();

    let re = new_re(&mut vm, ctx, "[0-9]+", "");
    let m = match_str(&mut vm, ctx, re, "abc");
    assert!(m.is_null());

    let m = match_str(&mut vm, ctx, re, "abc42");
    let match_class = vm.object_id(ObjId::Match);
    assert!(instance_of(&mut vm, ctx, m, match_class).unwrap());
}

#[test]
fn to_str_renders_source_and_flags_in_fixed_order() {
    let (mut vm, ctx) = setup();

    // Flags are given shuffled; the rendering is canonical.
    let re = new_re(&mut vm, ctx, "a+b", "pmi");
    let s = to_string(&mut vm, ctx, re).unwrap();
    assert_eq!(vm.str_value(s), Some("/a+b/imp"));
}

#[test]
fn numeric_flags_through_class_constants() {
    let (mut vm, ctx) = setup();

    let re_class = vm.object_id(ObjId::Re);
    let key = vm.new_string("PERFECT");
    let perfect = get(&mut vm, ctx, re_class, key).unwrap();

    let src = vm.new_string("[0-9]+");
    let re = call(&mut vm, ctx, re_class, Value::Null, &[src, perfect]).unwrap();

    assert!(match_str(&mut vm, ctx, re, "123").is_null() == false);
    assert!(match_str(&mut vm, ctx, re, "123x").is_null());
    assert!(match_str(&mut vm, ctx, re, "x123").is_null());
}

#[test]
fn negative_start_counts_from_the_end() {
    let (mut vm, ctx) = setup();

    let re = new_re(&mut vm, ctx, "[a-z]+", "");
    let s_v = vm.new_string("abcdef");
    let name = vm.new_string("match");
    let m = call_method(&mut vm, ctx, re, name, &[s_v, Value::Number(-2.0)]).unwrap();

    let start_key = vm.new_string("start");
    assert_eq!(num(get(&mut vm, ctx, m, start_key).unwrap()), 4.0);
    let s = to_string(&mut vm, ctx, m).unwrap();
    assert_eq!(vm.str_value(s), Some("ef"));
}

#[test]
fn bad_pattern_is_a_syntax_error() {
    let (mut vm, ctx) = setup();

    let re_class = vm.object_id(ObjId::Re);
    let src = vm.new_string("a(b");
    assert!(call(&mut vm, ctx, re_class, Value::Null, &[src]).is_err());

    let err = vm.current_error(ctx);
    let syntax_error = vm.object_id(ObjId::SyntaxError);
    assert!(instance_of(&mut vm, ctx, err, syntax_error).unwrap());
}

#[test]
fn ignore_case_and_unicode_matching() {
    let (mut vm, ctx) = setup();

    let re = new_re(&mut vm, ctx, "abc", "i");
    assert!(!match_str(&mut vm, ctx, re, "xABCx").is_null());

    let re = new_re(&mut vm, ctx, "é+", "u");
    let m = match_str(&mut vm, ctx, re, "ééz");
    let end_key = vm.new_string("end");
    assert_eq!(num(get(&mut vm, ctx, m, end_key).unwrap()), 4.0);
}
