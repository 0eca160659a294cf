//! Object model semantics: property kinds, insertion order, interfaces,
//! classes, dispatch, and conversions.

use ox_core::runtime::builtins::{add_accessor, add_const, add_method, class_inherit, named_class_new, object_alloc};
use ox_core::runtime::operation::{
    call, call_method, del, equal, get, get_full_name, get_opt, get_throw, instance_of, keys, set,
    to_number, to_string, type_of,
};
use ox_core::runtime::vm::ObjId;
use ox_core::values::HeapObj;
use ox_core::{ContextId, Thrown, Value, Vm};

fn setup() -> (Vm, ContextId) {
    ox_core::logger::init_logger();
    let mut vm = Vm::new();
    let ctx = vm.acquire_context();
    (vm, ctx)
}

fn str_of(vm: &Vm, v: Value) -> String {
    vm.str_value(v).expect("string value").to_owned()
}

#[test]
fn set_get_roundtrip_and_insertion_order() {
    let (mut vm, ctx) = setup();
    let obj = Value::Ref(vm.alloc_object(Value::Null));

    for (k, v) in [("b", 1.0), ("a", 2.0), ("c", 3.0)] {
        let key = vm.new_string(k);
        set(&mut vm, ctx, obj, key, Value::Number(v)).unwrap();
    }

    let key_a = vm.new_string("a");
    assert_eq!(get(&mut vm, ctx, obj, key_a).unwrap(), Value::Number(2.0));

    // Replacing an existing key keeps its position.
    let key_b = vm.new_string("b");
    set(&mut vm, ctx, obj, key_b, Value::Number(9.0)).unwrap();

    let ks = keys(&mut vm, obj);
    let names: Vec<String> = ks.iter().map(|k| str_of(&vm, *k)).collect();
    assert_eq!(names, ["b", "a", "c"]);
}

#[test]
fn delete_preserves_remaining_order() {
    let (mut vm, ctx) = setup();
    let obj = Value::Ref(vm.alloc_object(Value::Null));

    for k in ["x", "y", "z"] {
        let key = vm.new_string(k);
        set(&mut vm, ctx, obj, key, Value::Bool(true)).unwrap();
    }
    let key_y = vm.new_string("y");
    del(&mut vm, ctx, obj, key_y).unwrap();

    let names: Vec<String> = keys(&mut vm, obj).iter().map(|k| str_of(&vm, *k)).collect();
    assert_eq!(names, ["x", "z"]);
}

#[test]
fn absent_property_is_null_but_get_throw_raises() {
    let (mut vm, ctx) = setup();
    let obj = Value::Ref(vm.alloc_object(Value::Null));

    let key = vm.new_string("missing");
    assert_eq!(get(&mut vm, ctx, obj, key).unwrap(), Value::Null);
    assert_eq!(get_opt(&mut vm, ctx, obj, key).unwrap(), None);
    assert_eq!(get_throw(&mut vm, ctx, obj, key), Err(Thrown));

    let err = vm.current_error(ctx);
    let null_error = vm.object_id(ObjId::NullError);
    assert!(instance_of(&mut vm, ctx, err, null_error).unwrap());
}

#[test]
fn const_property_rejects_assignment() {
    let (mut vm, ctx) = setup();
    let obj = Value::Ref(vm.alloc_object(Value::Null));
    add_const(&mut vm, obj, "pi", Value::Number(3.14));

    let key = vm.new_string("pi");
    assert!(set(&mut vm, ctx, obj, key, Value::Number(3.0)).is_err());
    assert_eq!(get(&mut vm, ctx, obj, key).unwrap(), Value::Number(3.14));
}

#[test]
fn accessor_runs_getter_and_setter() {
    let (mut vm, ctx) = setup();
    let obj = Value::Ref(vm.alloc_object(Value::Null));

    fn getter(vm: &mut Vm, ctx: ContextId, _f: Value, this: Value, _a: &[Value]) -> Result<Value, Thrown> {
        let backing = vm.new_string("__x");
        get(vm, ctx, this, backing)
    }
    fn setter(vm: &mut Vm, ctx: ContextId, _f: Value, this: Value, a: &[Value]) -> Result<Value, Thrown> {
        let backing = vm.new_string("__x");
        let doubled = match a.first().copied() {
            Some(Value::Number(n)) => Value::Number(n * 2.0),
            other => other.unwrap_or(Value::Null),
        };
        set(vm, ctx, this, backing, doubled)?;
        Ok(Value::Null)
    }

    add_accessor(&mut vm, obj, "x", Some(getter), Some(setter));

    let key = vm.new_string("x");
    set(&mut vm, ctx, obj, key, Value::Number(21.0)).unwrap();
    assert_eq!(get(&mut vm, ctx, obj, key).unwrap(), Value::Number(42.0));
}

#[test]
fn interface_chain_resolves_methods() {
    let (mut vm, ctx) = setup();

    fn answer(_vm: &mut Vm, _ctx: ContextId, _f: Value, _t: Value, _a: &[Value]) -> Result<Value, Thrown> {
        Ok(Value::Number(1.0))
    }

    let (class, inf) = named_class_new(&mut vm, "C", Value::Null, object_alloc);
    add_method(&mut vm, inf, "f", answer);

    // Instantiate by calling the class.
    let instance = call(&mut vm, ctx, class, Value::Null, &[]).unwrap();
    let name = vm.new_string("f");
    let rv = call_method(&mut vm, ctx, instance, name, &[]).unwrap();
    assert_eq!(rv, Value::Number(1.0));

    assert!(instance_of(&mut vm, ctx, instance, class).unwrap());
    let t = type_of(&mut vm, ctx, instance).unwrap();
    assert!(equal(&vm, t, class));
}

#[test]
fn class_init_receives_arguments() {
    let (mut vm, ctx) = setup();

    fn init(vm: &mut Vm, ctx: ContextId, _f: Value, this: Value, args: &[Value]) -> Result<Value, Thrown> {
        let key = vm.new_string("v");
        set(vm, ctx, this, key, args.first().copied().unwrap_or(Value::Null))?;
        Ok(Value::Null)
    }

    let (class, inf) = named_class_new(&mut vm, "Box", Value::Null, object_alloc);
    add_method(&mut vm, inf, "$init", init);

    let instance = call(&mut vm, ctx, class, Value::Null, &[Value::Number(7.0)]).unwrap();
    let key = vm.new_string("v");
    assert_eq!(get(&mut vm, ctx, instance, key).unwrap(), Value::Number(7.0));
}

#[test]
fn inheritance_copies_methods_and_instance_of_walks_parents() {
    let (mut vm, ctx) = setup();

    fn base_m(_vm: &mut Vm, _c: ContextId, _f: Value, _t: Value, _a: &[Value]) -> Result<Value, Thrown> {
        Ok(Value::Number(10.0))
    }

    let (base, base_inf) = named_class_new(&mut vm, "Base", Value::Null, object_alloc);
    add_method(&mut vm, base_inf, "m", base_m);

    let (child, _child_inf) = named_class_new(&mut vm, "Child", Value::Null, object_alloc);
    class_inherit(&mut vm, child, base);

    let instance = call(&mut vm, ctx, child, Value::Null, &[]).unwrap();
    let name = vm.new_string("m");
    assert_eq!(
        call_method(&mut vm, ctx, instance, name, &[]).unwrap(),
        Value::Number(10.0)
    );

    assert!(instance_of(&mut vm, ctx, instance, child).unwrap());
    assert!(instance_of(&mut vm, ctx, instance, base).unwrap());
    let array_class = vm.object_id(ObjId::Array);
    assert!(!instance_of(&mut vm, ctx, instance, array_class).unwrap());
}

#[test]
fn primitives_answer_their_builtin_classes() {
    let (mut vm, ctx) = setup();

    let bool_class = vm.object_id(ObjId::Bool);
    let number_class = vm.object_id(ObjId::Number);
    let string_class = vm.object_id(ObjId::String);

    assert!(instance_of(&mut vm, ctx, Value::Bool(true), bool_class).unwrap());
    assert!(instance_of(&mut vm, ctx, Value::Number(1.5), number_class).unwrap());
    let s = vm.new_string("hi");
    assert!(instance_of(&mut vm, ctx, s, string_class).unwrap());
    assert!(!instance_of(&mut vm, ctx, Value::Null, number_class).unwrap());

    // Primitive get forwards to the class interface.
    let len_key = vm.new_string("length");
    assert_eq!(get(&mut vm, ctx, s, len_key).unwrap(), Value::Number(2.0));

    // Setting on a primitive is rejected.
    assert!(set(&mut vm, ctx, s, len_key, Value::Number(0.0)).is_err());
}

#[test]
fn array_index_beyond_end_back_fills_nulls() {
    let (mut vm, ctx) = setup();
    let array_class = vm.object_id(ObjId::Array);
    let arr = call(&mut vm, ctx, array_class, Value::Null, &[]).unwrap();

    assert_eq!(get(&mut vm, ctx, arr, Value::Number(5.0)).unwrap(), Value::Null);

    set(&mut vm, ctx, arr, Value::Number(4.0), Value::Number(1.0)).unwrap();

    let len_key = vm.new_string("length");
    assert_eq!(get(&mut vm, ctx, arr, len_key).unwrap(), Value::Number(5.0));
    for i in 0..4 {
        assert_eq!(
            get(&mut vm, ctx, arr, Value::Number(i as f64)).unwrap(),
            Value::Null
        );
    }
    assert_eq!(get(&mut vm, ctx, arr, Value::Number(4.0)).unwrap(), Value::Number(1.0));
}

#[test]
fn equality_rules() {
    let (mut vm, _ctx) = setup();

    let a = vm.new_string("same");
    let b = vm.new_string("same");
    assert_ne!(a, b);
    assert!(equal(&vm, a, b));

    assert!(equal(&vm, Value::Number(2.0), Value::Number(2.0)));
    assert!(!equal(&vm, Value::Number(f64::NAN), Value::Number(f64::NAN)));
    assert!(equal(&vm, Value::Null, Value::Null));
    assert!(!equal(&vm, Value::Bool(true), Value::Number(1.0)));

    let o1 = Value::Ref(vm.alloc_object(Value::Null));
    let o2 = Value::Ref(vm.alloc_object(Value::Null));
    assert!(equal(&vm, o1, o1));
    assert!(!equal(&vm, o1, o2));
}

#[test]
fn to_string_protocol_and_fallback() {
    let (mut vm, ctx) = setup();

    // Primitives.
    let s = to_string(&mut vm, ctx, Value::Number(3.0)).unwrap();
    assert_eq!(str_of(&vm, s), "3");
    let s = to_string(&mut vm, ctx, Value::Bool(true)).unwrap();
    assert_eq!(str_of(&vm, s), "true");
    let s = to_string(&mut vm, ctx, Value::Null).unwrap();
    assert_eq!(str_of(&vm, s), "");

    // $to_str wins.
    fn to_str(vm: &mut Vm, _c: ContextId, _f: Value, _t: Value, _a: &[Value]) -> Result<Value, Thrown> {
        Ok(vm.new_string("custom"))
    }
    let obj = Value::Ref(vm.alloc_object(Value::Null));
    add_method(&mut vm, obj, "$to_str", to_str);
    let s = to_string(&mut vm, ctx, obj).unwrap();
    assert_eq!(str_of(&vm, s), "custom");

    // $to_num as second choice.
    fn to_num(_vm: &mut Vm, _c: ContextId, _f: Value, _t: Value, _a: &[Value]) -> Result<Value, Thrown> {
        Ok(Value::Number(8.0))
    }
    let obj2 = Value::Ref(vm.alloc_object(Value::Null));
    add_method(&mut vm, obj2, "$to_num", to_num);
    let s = to_string(&mut vm, ctx, obj2).unwrap();
    assert_eq!(str_of(&vm, s), "8");
    assert_eq!(to_number(&mut vm, ctx, obj2).unwrap(), 8.0);

    // Fallback names the value through $scope/$name.
    let named = Value::Ref(vm.alloc_object(Value::Null));
    let scope = Value::Ref(vm.alloc_object(Value::Null));
    let scope_name = vm.new_string("pkg");
    let own_name = vm.new_string("thing");
    add_const(&mut vm, scope, "$name", scope_name);
    add_const(&mut vm, named, "$scope", scope);
    add_const(&mut vm, named, "$name", own_name);

    let s = to_string(&mut vm, ctx, named).unwrap();
    assert_eq!(str_of(&vm, s), "Object:pkg.thing");

    let full = get_full_name(&mut vm, ctx, named).unwrap();
    assert_eq!(str_of(&vm, full), "pkg.thing");
}

#[test]
fn circular_scope_is_a_reference_error() {
    let (mut vm, ctx) = setup();

    let a = Value::Ref(vm.alloc_object(Value::Null));
    let b = Value::Ref(vm.alloc_object(Value::Null));
    add_const(&mut vm, a, "$scope", b);
    add_const(&mut vm, b, "$scope", a);
    let name = vm.new_string("x");
    add_const(&mut vm, a, "$name", name);
    add_const(&mut vm, b, "$name", name);

    assert!(get_full_name(&mut vm, ctx, a).is_err());
    let err = vm.current_error(ctx);
    let reference_error = vm.object_id(ObjId::ReferenceError);
    assert!(instance_of(&mut vm, ctx, err, reference_error).unwrap());
}

#[test]
fn to_number_protocol_defaults_to_nan() {
    let (mut vm, ctx) = setup();
    let obj = Value::Ref(vm.alloc_object(Value::Null));
    assert!(to_number(&mut vm, ctx, obj).unwrap().is_nan());

    let s = vm.new_string("  2.5 ");
    assert_eq!(to_number(&mut vm, ctx, s).unwrap(), 2.5);
    let junk = vm.new_string("abc");
    assert!(to_number(&mut vm, ctx, junk).unwrap().is_nan());
}

#[test]
fn strings_survive_as_heap_objects() {
    let (mut vm, _ctx) = setup();
    let v = vm.new_string("payload");
    match vm.heap().get(v.as_ref().unwrap()) {
        HeapObj::Str(s) => assert_eq!(s.as_str(), "payload"),
        other => panic!("unexpected kind: {other:?}"),
    }
}
