//! Dictionaries, sets, and the iterator protocol, including the lazy
//! map/select wrappers and in-place iterator fix-up on removal.

use ox_core::runtime::builtins::add_method;
use ox_core::runtime::operation::{
    call, call_method, get, iterator_end, iterator_new, iterator_next, iterator_value, set,
    to_string,
};
use ox_core::runtime::vm::ObjId;
use ox_core::{ContextId, Thrown, Value, Vm};

fn setup() -> (Vm, ContextId) {
    ox_core::logger::init_logger();
    let mut vm = Vm::new();
    let ctx = vm.acquire_context();
    (vm, ctx)
}

fn new_array(vm: &mut Vm, ctx: ContextId, items: &[f64]) -> Value {
    let class = vm.object_id(ObjId::Array);
    let args: Vec<Value> = items.iter().map(|n| Value::Number(*n)).collect();
    call(vm, ctx, class, Value::Null, &args).unwrap()
}

/// Drives the whole protocol, collecting values.
fn drain(vm: &mut Vm, ctx: ContextId, iter: Value) -> Vec<Value> {
    let mut out = Vec::new();
    loop {
        if iterator_end(vm, ctx, iter).unwrap() {
            break;
        }
        out.push(iterator_value(vm, ctx, iter).unwrap());
        iterator_next(vm, ctx, iter).unwrap();
    }
    out
}

#[test]
fn array_iteration_in_order() {
    let (mut vm, ctx) = setup();
    let arr = new_array(&mut vm, ctx, &[1.0, 2.0, 3.0]);
    let iter = iterator_new(&mut vm, ctx, arr).unwrap();
    let values = drain(&mut vm, ctx, iter);
    assert_eq!(
        values,
        [Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]
    );
}

#[test]
fn dict_keeps_insertion_order_and_set_of_existing_does_not_reorder() {
    let (mut vm, ctx) = setup();
    let dict_class = vm.object_id(ObjId::Dict);
    let dict = call(&mut vm, ctx, dict_class, Value::Null, &[]).unwrap();

    for (k, v) in [("one", 1.0), ("two", 2.0), ("three", 3.0)] {
        let key = vm.new_string(k);
        set(&mut vm, ctx, dict, key, Value::Number(v)).unwrap();
    }
    // Overwrite an existing entry.
    let key = vm.new_string("one");
    set(&mut vm, ctx, dict, key, Value::Number(10.0)).unwrap();

    let keys_name = vm.new_string("keys");
    let iter = call_method(&mut vm, ctx, dict, keys_name, &[]).unwrap();
    let keys: Vec<String> = drain(&mut vm, ctx, iter)
        .iter()
        .map(|k| vm.str_value(*k).unwrap().to_owned())
        .collect();
    assert_eq!(keys, ["one", "two", "three"]);

    // Index-protocol read goes through the entries.
    let key = vm.new_string("one");
    assert_eq!(get(&mut vm, ctx, dict, key).unwrap(), Value::Number(10.0));

    let len_key = vm.new_string("length");
    assert_eq!(get(&mut vm, ctx, dict, len_key).unwrap(), Value::Number(3.0));
}

#[test]
fn removing_current_entry_advances_live_iterator() {
    let (mut vm, ctx) = setup();
    let dict_class = vm.object_id(ObjId::Dict);
    let dict = call(&mut vm, ctx, dict_class, Value::Null, &[]).unwrap();

    for (k, v) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
        let key = vm.new_string(k);
        set(&mut vm, ctx, dict, key, Value::Number(v)).unwrap();
    }

    let keys_name = vm.new_string("keys");
    let iter = call_method(&mut vm, ctx, dict, keys_name, &[]).unwrap();

    // Position the iterator on "b".
    iterator_next(&mut vm, ctx, iter).unwrap();
    let at = iterator_value(&mut vm, ctx, iter).unwrap();
    assert_eq!(vm.str_value(at), Some("b"));

    // Remove the entry under the cursor: the iterator lands on "c".
    let remove = vm.new_string("remove");
    let key_b = vm.new_string("b");
    call_method(&mut vm, ctx, dict, remove, &[key_b]).unwrap();

    assert!(!iterator_end(&mut vm, ctx, iter).unwrap());
    let at = iterator_value(&mut vm, ctx, iter).unwrap();
    assert_eq!(vm.str_value(at), Some("c"));

    // Removing an entry before the cursor shifts it in place.
    let remove = vm.new_string("remove");
    let key_a = vm.new_string("a");
    call_method(&mut vm, ctx, dict, remove, &[key_a]).unwrap();
    let at = iterator_value(&mut vm, ctx, iter).unwrap();
    assert_eq!(vm.str_value(at), Some("c"));

    iterator_next(&mut vm, ctx, iter).unwrap();
    assert!(iterator_end(&mut vm, ctx, iter).unwrap());
}

#[test]
fn dict_entries_iterator_yields_pairs() {
    let (mut vm, ctx) = setup();
    let dict_class = vm.object_id(ObjId::Dict);
    let dict = call(&mut vm, ctx, dict_class, Value::Null, &[]).unwrap();

    let key = vm.new_string("k");
    set(&mut vm, ctx, dict, key, Value::Number(5.0)).unwrap();

    let iter = iterator_new(&mut vm, ctx, dict).unwrap();
    let pairs = drain(&mut vm, ctx, iter);
    assert_eq!(pairs.len(), 1);

    let pair = pairs[0];
    let k = get(&mut vm, ctx, pair, Value::Number(0.0)).unwrap();
    let v = get(&mut vm, ctx, pair, Value::Number(1.0)).unwrap();
    assert_eq!(vm.str_value(k), Some("k"));
    assert_eq!(v, Value::Number(5.0));
}

#[test]
fn set_membership_and_iteration() {
    let (mut vm, ctx) = setup();
    let set_class = vm.object_id(ObjId::Set);
    let s = call(&mut vm, ctx, set_class, Value::Null, &[]).unwrap();

    let add = vm.new_string("add");
    for v in [1.0, 2.0, 1.0, 3.0] {
        call_method(&mut vm, ctx, s, add, &[Value::Number(v)]).unwrap();
    }

    let len_key = vm.new_string("length");
    assert_eq!(get(&mut vm, ctx, s, len_key).unwrap(), Value::Number(3.0));

    let has = vm.new_string("has");
    assert_eq!(
        call_method(&mut vm, ctx, s, has, &[Value::Number(2.0)]).unwrap(),
        Value::Bool(true)
    );

    let remove = vm.new_string("remove");
    call_method(&mut vm, ctx, s, remove, &[Value::Number(2.0)]).unwrap();
    assert_eq!(
        call_method(&mut vm, ctx, s, has, &[Value::Number(2.0)]).unwrap(),
        Value::Bool(false)
    );

    let iter = iterator_new(&mut vm, ctx, s).unwrap();
    let values = drain(&mut vm, ctx, iter);
    assert_eq!(values, [Value::Number(1.0), Value::Number(3.0)]);
}

#[test]
fn map_wrapper_is_lazy_and_forwards() {
    let (mut vm, ctx) = setup();
    let arr = new_array(&mut vm, ctx, &[1.0, 2.0, 3.0]);
    let inner = iterator_new(&mut vm, ctx, arr).unwrap();

    fn double(_vm: &mut Vm, _c: ContextId, _f: Value, _t: Value, a: &[Value]) -> Result<Value, Thrown> {
        match a.first() {
            Some(Value::Number(n)) => Ok(Value::Number(n * 2.0)),
            _ => Ok(Value::Null),
        }
    }
    let holder = Value::Ref(vm.alloc_object(Value::Null));
    add_method(&mut vm, holder, "double", double);
    let dkey = vm.new_string("double");
    let f = get(&mut vm, ctx, holder, dkey).unwrap();

    let map_name = vm.new_string("map");
    let mapped = call_method(&mut vm, ctx, inner, map_name, &[f]).unwrap();
    let values = drain(&mut vm, ctx, mapped);
    assert_eq!(
        values,
        [Value::Number(2.0), Value::Number(4.0), Value::Number(6.0)]
    );
}

#[test]
fn select_wrapper_skips_rejected_elements() {
    let (mut vm, ctx) = setup();
    let arr = new_array(&mut vm, ctx, &[1.0, 2.0, 3.0, 4.0, 5.0]);
    let inner = iterator_new(&mut vm, ctx, arr).unwrap();

    fn is_even(_vm: &mut Vm, _c: ContextId, _f: Value, _t: Value, a: &[Value]) -> Result<Value, Thrown> {
        match a.first() {
            Some(Value::Number(n)) => Ok(Value::Bool(n % 2.0 == 0.0)),
            _ => Ok(Value::Bool(false)),
        }
    }
    let holder = Value::Ref(vm.alloc_object(Value::Null));
    add_method(&mut vm, holder, "even", is_even);
    let ekey = vm.new_string("even");
    let f = get(&mut vm, ctx, holder, ekey).unwrap();

    let select_name = vm.new_string("select");
    let selected = call_method(&mut vm, ctx, inner, select_name, &[f]).unwrap();
    let values = drain(&mut vm, ctx, selected);
    assert_eq!(values, [Value::Number(2.0), Value::Number(4.0)]);
}

#[test]
fn to_array_collects_and_iter_returns_self() {
    let (mut vm, ctx) = setup();
    let arr = new_array(&mut vm, ctx, &[7.0, 8.0]);
    let iter = iterator_new(&mut vm, ctx, arr).unwrap();

    // $iter on an iterator is the iterator itself.
    let again = iterator_new(&mut vm, ctx, iter).unwrap();
    assert_eq!(again, iter);

    let to_array = vm.new_string("to_array");
    let collected = call_method(&mut vm, ctx, iter, to_array, &[]).unwrap();
    assert_eq!(
        get(&mut vm, ctx, collected, Value::Number(0.0)).unwrap(),
        Value::Number(7.0)
    );
    assert_eq!(
        get(&mut vm, ctx, collected, Value::Number(1.0)).unwrap(),
        Value::Number(8.0)
    );
}

#[test]
fn iterator_join_to_string() {
    let (mut vm, ctx) = setup();
    let arr = new_array(&mut vm, ctx, &[1.0, 2.0, 3.0]);
    let iter = iterator_new(&mut vm, ctx, arr).unwrap();

    let to_str = vm.new_string("$to_str");
    let sep = vm.new_string(", ");
    let head = vm.new_string("[");
    let tail = vm.new_string("]");
    let s = call_method(&mut vm, ctx, iter, to_str, &[sep, head, tail]).unwrap();
    assert_eq!(vm.str_value(s), Some("[1, 2, 3]"));
}

#[test]
fn object_keys_iterate_in_insertion_order() {
    let (mut vm, ctx) = setup();
    let object_class = vm.object_id(ObjId::Object);
    let obj = call(&mut vm, ctx, object_class, Value::Null, &[]).unwrap();

    for k in ["first", "second"] {
        let key = vm.new_string(k);
        set(&mut vm, ctx, obj, key, Value::Bool(true)).unwrap();
    }

    let iter = iterator_new(&mut vm, ctx, obj).unwrap();
    let keys: Vec<String> = drain(&mut vm, ctx, iter)
        .iter()
        .map(|k| vm.str_value(*k).unwrap().to_owned())
        .collect();
    assert_eq!(keys, ["first", "second"]);
}

#[test]
fn fiber_class_is_an_iterator_subclass() {
    let (mut vm, ctx) = setup();
    // Inheritance copied Iterator's helpers onto the fiber interface.
    let fiber_inf = vm.object_id(ObjId::FiberInf);
    let to_array = vm.new_string("to_array");
    let f = get(&mut vm, ctx, fiber_inf, to_array).unwrap();
    assert!(!f.is_null());

    let map_name = vm.new_string("map");
    let m = get(&mut vm, ctx, fiber_inf, map_name).unwrap();
    assert!(!m.is_null());

    let fiber_class = vm.object_id(ObjId::Fiber);
    let s = to_string(&mut vm, ctx, fiber_class).unwrap();
    // Classes have no $to_str; they fall back to their full name.
    assert_eq!(vm.str_value(s), Some("Object:Fiber"));
}
