//! The built-in global classes and their native methods: Bool, Number,
//! String, Array, Object, Iterator (with the lazy map/select wrappers),
//! the error hierarchy, Re and Match, Dict and Set with their iterators,
//! and Fiber.

use crate::regex::match_result::Match;
use crate::regex::{Compiled, Regex};
use crate::runtime::context::ContextId;
use crate::runtime::error::{ErrorKind, Thrown, throw_range_error, throw_syntax_error, throw_type_error};
use crate::runtime::fiber::fiber_next;
use crate::runtime::frame::Frame;
use crate::runtime::operation::{
    self, call, dict_key_of, get, get_s, iterator_end, iterator_next, iterator_value, to_number,
    to_string, type_of,
};
use crate::runtime::script::ScriptBody;
use crate::runtime::vm::{ObjId, StrId, Vm};
use crate::values::HeapObj;
use crate::values::array::Array;
use crate::values::class::{AllocFn, Class};
use crate::values::dict::{Dict, DictIter, DictKey, EntryIterKind};
use crate::values::function::{NativeFn, NativeFunc};
use crate::values::interface::Interface;
use crate::values::object::{Object, PrivData};
use crate::values::property::{PropKey, Property};
use crate::values::set::{Set, SetIter};
use crate::values::value::{ObjRef, Value};

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).copied().unwrap_or(Value::Null)
}

// ---- construction helpers ----------------------------------------------

fn put_prop(vm: &mut Vm, target: Value, key: PropKey, prop: Property) {
    if let Some(r) = target.as_ref()
        && let Some(obj) = vm.heap_mut().get_mut(r).base_object_mut()
    {
        obj.put(key, prop);
    }
}

pub fn add_const(vm: &mut Vm, target: Value, name: &str, v: Value) {
    put_prop(vm, target, PropKey::str(name), Property::Const(v));
}

fn new_native_func(vm: &mut Vm, name: &str, f: NativeFn) -> Value {
    let inf = vm.object_id(ObjId::FunctionInf);
    let mut obj = Object::new(inf);
    let name_v = vm.intern(name);
    // Pin the name across the function's own allocation.
    vm.global_ref(name_v);
    obj.put(PropKey::str("$name"), Property::Const(name_v));
    let func = Value::Ref(vm.alloc(HeapObj::NativeFunc(NativeFunc {
        obj,
        script: Value::Null,
        f,
    })));
    vm.global_unref(name_v);
    func
}

pub fn add_method(vm: &mut Vm, target: Value, name: &str, f: NativeFn) {
    let func = new_native_func(vm, name, f);
    put_prop(vm, target, PropKey::str(name), Property::Const(func));
}

pub fn add_accessor(
    vm: &mut Vm,
    target: Value,
    name: &str,
    getter: Option<NativeFn>,
    setter: Option<NativeFn>,
) {
    let get = getter
        .map(|g| new_native_func(vm, name, g))
        .unwrap_or(Value::Null);
    vm.global_ref(get);
    let set = setter
        .map(|s| new_native_func(vm, name, s))
        .unwrap_or(Value::Null);
    vm.global_unref(get);
    put_prop(vm, target, PropKey::str(name), Property::Accessor { get, set });
}

/// Creates a class with its instance interface: `$name`/`$inf` on the
/// class, the `$class` backlink on the interface, `$scope` when given.
pub fn named_class_new(
    vm: &mut Vm,
    name: &str,
    scope: Value,
    alloc: AllocFn,
) -> (Value, Value) {
    let inf = Value::Ref(vm.alloc(HeapObj::Interface(Interface::new(Object::new(Value::Null)))));
    // Keep the half-built pair alive across the remaining allocations.
    vm.global_ref(inf);
    let class = Value::Ref(vm.alloc(HeapObj::Class(Class::new(Object::new(Value::Null), alloc))));
    vm.global_ref(class);

    let name_v = vm.intern(name);
    put_prop(vm, class, PropKey::str("$name"), Property::Const(name_v));
    put_prop(vm, class, PropKey::str("$inf"), Property::Const(inf));
    if !scope.is_null() {
        put_prop(vm, class, PropKey::str("$scope"), Property::Const(scope));
    }
    put_prop(vm, inf, PropKey::str("$class"), Property::Const(class));

    vm.global_unref(class);
    vm.global_unref(inf);
    (class, inf)
}

/// Copies the parent interface's properties (except `$class`/`$scope`) into
/// the child and records the parent in the child's implemented set.
pub fn interface_inherit(vm: &mut Vm, inf: Value, parent_inf: Value) {
    let (Some(ir), Some(pr)) = (inf.as_ref(), parent_inf.as_ref()) else {
        return;
    };

    let (props, parents): (Vec<(PropKey, Property)>, Vec<ObjRef>) =
        match vm.heap().get(pr) {
            HeapObj::Interface(p) => (
                p.obj
                    .props
                    .iter()
                    .filter(|(k, _)| {
                        k.as_str() != Some("$class") && k.as_str() != Some("$scope")
                    })
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                p.implemented.iter().copied().collect(),
            ),
            _ => return,
        };

    if let HeapObj::Interface(child) = vm.heap_mut().get_mut(ir) {
        for (k, p) in props {
            child.obj.put(k, p);
        }
        child.add_implemented(pr);
        for parent in parents {
            child.add_implemented(parent);
        }
    }
}

/// Inherits a parent class: the child's interface takes the parent
/// interface's properties and membership.
pub fn class_inherit(vm: &mut Vm, class: Value, parent: Value) {
    let inf_key = PropKey::str("$inf");
    let read_inf = |vm: &Vm, c: Value| -> Value {
        c.as_ref()
            .and_then(|r| vm.heap().get(r).base_object())
            .and_then(|o| o.lookup(&inf_key))
            .and_then(|p| match p {
                Property::Const(v) | Property::Var(v) => Some(*v),
                _ => None,
            })
            .unwrap_or(Value::Null)
    };

    let child_inf = read_inf(vm, class);
    let parent_inf = read_inf(vm, parent);
    interface_inherit(vm, child_inf, parent_inf);
}

/// Default instance allocator: a plain object with the class's interface.
pub fn object_alloc(vm: &mut Vm, _ctx: ContextId, inf: Value) -> Result<Value, Thrown> {
    Ok(Value::Ref(vm.alloc_object(inf)))
}

fn array_alloc(vm: &mut Vm, _ctx: ContextId, inf: Value) -> Result<Value, Thrown> {
    Ok(Value::Ref(
        vm.alloc(HeapObj::Array(Array::new(Object::new(inf), 0))),
    ))
}

fn re_alloc(vm: &mut Vm, _ctx: ContextId, inf: Value) -> Result<Value, Thrown> {
    Ok(Value::Ref(
        vm.alloc(HeapObj::Regex(Regex::empty(Object::new(inf)))),
    ))
}

fn dict_alloc(vm: &mut Vm, _ctx: ContextId, inf: Value) -> Result<Value, Thrown> {
    Ok(Value::Ref(vm.alloc(HeapObj::Dict(Dict::new(Object::new(inf))))))
}

fn set_alloc(vm: &mut Vm, _ctx: ContextId, inf: Value) -> Result<Value, Thrown> {
    Ok(Value::Ref(vm.alloc(HeapObj::Set(Set::new(Object::new(inf))))))
}

fn fiber_alloc(vm: &mut Vm, _ctx: ContextId, inf: Value) -> Result<Value, Thrown> {
    Ok(Value::Ref(vm.alloc(HeapObj::Fiber(
        crate::runtime::fiber::Fiber::new(Object::new(inf), Value::Null, Vec::new()),
    ))))
}

// ---- init ---------------------------------------------------------------

/// Builds the whole built-in surface. Collection stays off until the named
/// tables root everything created here.
pub(crate) fn init(vm: &mut Vm) {
    vm.set_gc_enabled(false);

    let global = Value::Ref(vm.alloc_object(Value::Null));
    vm.set_object_id(ObjId::Global, global);

    // Function first: every native function's interface hangs off it.
    let (func_class, func_inf) = named_class_new(vm, "Function", Value::Null, object_alloc);
    vm.set_object_id(ObjId::Function, func_class);
    vm.set_object_id(ObjId::FunctionInf, func_inf);
    add_const(vm, global, "Function", func_class);

    init_iterator(vm, global);
    init_primitives(vm, global);
    init_array(vm, global);
    init_object(vm, global);
    init_errors(vm, global);
    init_re(vm, global);
    init_match(vm, global);
    init_dict(vm, global);
    init_set(vm, global);
    init_fiber(vm, global);

    vm.set_gc_enabled(true);
}

fn init_iterator(vm: &mut Vm, global: Value) {
    let (class, inf) = named_class_new(vm, "Iterator", Value::Null, object_alloc);
    vm.set_object_id(ObjId::Iterator, class);
    vm.set_object_id(ObjId::IteratorInf, inf);
    add_const(vm, global, "Iterator", class);

    add_method(vm, inf, "$iter", iterator_inf_iter);
    add_method(vm, inf, "to_array", iterator_inf_to_array);
    add_method(vm, inf, "map", iterator_inf_map);
    add_method(vm, inf, "select", iterator_inf_select);
    add_method(vm, inf, "$to_str", iterator_inf_to_str);

    // MapIterator / SelectIterator: objects wrapping an inner iterator and
    // a function.
    let (map_class, map_inf) = named_class_new(vm, "MapIterator", Value::Null, object_alloc);
    class_inherit(vm, map_class, class);
    vm.set_object_id(ObjId::MapIteratorInf, map_inf);
    add_accessor(vm, map_inf, "end", Some(func_iter_end_get), None);
    add_accessor(vm, map_inf, "value", Some(map_iter_value_get), None);
    add_method(vm, map_inf, "next", map_iter_next);
    add_method(vm, map_inf, "$close", func_iter_close);

    let (sel_class, sel_inf) = named_class_new(vm, "SelectIterator", Value::Null, object_alloc);
    class_inherit(vm, sel_class, class);
    vm.set_object_id(ObjId::SelectIteratorInf, sel_inf);
    add_accessor(vm, sel_inf, "end", Some(func_iter_end_get), None);
    add_accessor(vm, sel_inf, "value", Some(select_iter_value_get), None);
    add_method(vm, sel_inf, "next", select_iter_next);
    add_method(vm, sel_inf, "$close", func_iter_close);

    // Iterator over an object's own keys.
    let (keys_class, keys_inf) = named_class_new(vm, "KeysIterator", Value::Null, object_alloc);
    class_inherit(vm, keys_class, class);
    vm.set_object_id(ObjId::KeysIteratorInf, keys_inf);
    add_accessor(vm, keys_inf, "end", Some(keys_iter_end_get), None);
    add_accessor(vm, keys_inf, "value", Some(keys_iter_value_get), None);
    add_method(vm, keys_inf, "next", keys_iter_next);

    // Iterator over an array's items.
    let (arr_class, arr_inf) = named_class_new(vm, "ArrayIterator", Value::Null, object_alloc);
    class_inherit(vm, arr_class, class);
    vm.set_object_id(ObjId::ArrayIteratorInf, arr_inf);
    add_accessor(vm, arr_inf, "end", Some(array_iter_end_get), None);
    add_accessor(vm, arr_inf, "value", Some(array_iter_value_get), None);
    add_method(vm, arr_inf, "next", array_iter_next);
}

fn init_primitives(vm: &mut Vm, global: Value) {
    let (bool_class, bool_inf) = named_class_new(vm, "Bool", Value::Null, object_alloc);
    vm.set_object_id(ObjId::Bool, bool_class);
    vm.set_object_id(ObjId::BoolInf, bool_inf);
    add_const(vm, global, "Bool", bool_class);

    let (num_class, num_inf) = named_class_new(vm, "Number", Value::Null, object_alloc);
    vm.set_object_id(ObjId::Number, num_class);
    vm.set_object_id(ObjId::NumberInf, num_inf);
    add_const(vm, global, "Number", num_class);

    let (str_class, str_inf) = named_class_new(vm, "String", Value::Null, object_alloc);
    vm.set_object_id(ObjId::String, str_class);
    vm.set_object_id(ObjId::StringInf, str_inf);
    add_const(vm, global, "String", str_class);
    add_accessor(vm, str_inf, "length", Some(string_length_get), None);
    add_method(vm, str_inf, "$to_num", string_to_num);
}

fn init_array(vm: &mut Vm, global: Value) {
    let (class, inf) = named_class_new(vm, "Array", Value::Null, array_alloc);
    vm.set_object_id(ObjId::Array, class);
    vm.set_object_id(ObjId::ArrayInf, inf);
    add_const(vm, global, "Array", class);

    add_method(vm, inf, "$init", array_inf_init);
    add_accessor(vm, inf, "length", Some(array_length_get), Some(array_length_set));
    add_method(vm, inf, "$iter", array_inf_iter);
}

fn init_object(vm: &mut Vm, global: Value) {
    let (class, inf) = named_class_new(vm, "Object", Value::Null, object_alloc);
    vm.set_object_id(ObjId::Object, class);
    vm.set_object_id(ObjId::ObjectInf, inf);
    add_const(vm, global, "Object", class);

    add_method(vm, inf, "$iter", object_inf_iter);
}

fn init_errors(vm: &mut Vm, global: Value) {
    let (base, base_inf) = named_class_new(vm, "Error", Value::Null, object_alloc);
    vm.set_object_id(ObjId::Error, base);
    vm.set_object_id(ObjId::ErrorInf, base_inf);
    add_const(vm, global, "Error", base);
    add_method(vm, base_inf, "$init", error_inf_init);
    add_method(vm, base_inf, "$to_str", error_inf_to_str);

    for kind in [
        ErrorKind::Type,
        ErrorKind::Range,
        ErrorKind::Reference,
        ErrorKind::Syntax,
        ErrorKind::Null,
        ErrorKind::System,
        ErrorKind::NoMem,
    ] {
        let (class, inf) = named_class_new(vm, kind.class_name(), Value::Null, object_alloc);
        class_inherit(vm, class, base);
        vm.set_object_id(kind.class_id(), class);
        vm.set_object_id(kind.inf_id(), inf);
        add_const(vm, global, kind.class_name(), class);
    }
}

fn init_re(vm: &mut Vm, global: Value) {
    let (class, inf) = named_class_new(vm, "Re", Value::Null, re_alloc);
    vm.set_object_id(ObjId::Re, class);
    vm.set_object_id(ObjId::ReInf, inf);
    add_const(vm, global, "Re", class);

    for (name, flag) in [
        ("IGNORE_CASE", crate::regex::RE_FL_IGNORE_CASE),
        ("MULTILINE", crate::regex::RE_FL_MULTILINE),
        ("DOT_ALL", crate::regex::RE_FL_DOT_ALL),
        ("UNICODE", crate::regex::RE_FL_UNICODE),
        ("PERFECT", crate::regex::RE_FL_PERFECT),
    ] {
        add_const(vm, class, name, Value::Number(flag as f64));
    }

    add_method(vm, inf, "$init", re_inf_init);
    add_method(vm, inf, "match", re_inf_match);
    add_method(vm, inf, "$to_str", re_inf_to_str);
}

fn init_match(vm: &mut Vm, global: Value) {
    let (class, inf) = named_class_new(vm, "Match", Value::Null, object_alloc);
    vm.set_object_id(ObjId::Match, class);
    vm.set_object_id(ObjId::MatchInf, inf);
    add_const(vm, global, "Match", class);

    add_accessor(vm, inf, "start", Some(match_start_get), None);
    add_accessor(vm, inf, "end", Some(match_end_get), None);
    add_accessor(vm, inf, "groups", Some(match_groups_get), None);
    add_accessor(vm, inf, "slices", Some(match_slices_get), None);
    add_method(vm, inf, "$to_str", match_to_str);
}

fn init_dict(vm: &mut Vm, global: Value) {
    let (class, inf) = named_class_new(vm, "Dict", Value::Null, dict_alloc);
    vm.set_object_id(ObjId::Dict, class);
    vm.set_object_id(ObjId::DictInf, inf);
    add_const(vm, global, "Dict", class);

    add_method(vm, inf, "get", dict_inf_get);
    add_method(vm, inf, "set", dict_inf_set);
    add_method(vm, inf, "has", dict_inf_has);
    add_method(vm, inf, "remove", dict_inf_remove);
    add_accessor(vm, inf, "length", Some(dict_length_get), None);
    add_method(vm, inf, "keys", dict_inf_keys);
    add_method(vm, inf, "values", dict_inf_values);
    add_method(vm, inf, "entries", dict_inf_entries);
    add_method(vm, inf, "$iter", dict_inf_entries);

    // The entry iterator: a class named Iterator scoped under Dict.
    let (iter_class, iter_inf) = named_class_new(vm, "Iterator", class, object_alloc);
    let iterator_class = vm.object_id(ObjId::Iterator);
    class_inherit(vm, iter_class, iterator_class);
    vm.set_object_id(ObjId::DictIteratorInf, iter_inf);
    add_accessor(vm, iter_inf, "end", Some(dict_iter_end_get), None);
    add_accessor(vm, iter_inf, "value", Some(dict_iter_value_get), None);
    add_method(vm, iter_inf, "next", dict_iter_next);
    add_method(vm, iter_inf, "$close", dict_iter_close);
}

fn init_set(vm: &mut Vm, global: Value) {
    let (class, inf) = named_class_new(vm, "Set", Value::Null, set_alloc);
    vm.set_object_id(ObjId::Set, class);
    vm.set_object_id(ObjId::SetInf, inf);
    add_const(vm, global, "Set", class);

    add_method(vm, inf, "add", set_inf_add);
    add_method(vm, inf, "has", set_inf_has);
    add_method(vm, inf, "remove", set_inf_remove);
    add_accessor(vm, inf, "length", Some(set_length_get), None);
    add_method(vm, inf, "$iter", set_inf_iter);

    let (iter_class, iter_inf) = named_class_new(vm, "Iterator", class, object_alloc);
    let iterator_class = vm.object_id(ObjId::Iterator);
    class_inherit(vm, iter_class, iterator_class);
    vm.set_object_id(ObjId::SetIteratorInf, iter_inf);
    add_accessor(vm, iter_inf, "end", Some(set_iter_end_get), None);
    add_accessor(vm, iter_inf, "value", Some(set_iter_value_get), None);
    add_method(vm, iter_inf, "next", set_iter_next);
    add_method(vm, iter_inf, "$close", set_iter_close);
}

fn init_fiber(vm: &mut Vm, global: Value) {
    let (class, inf) = named_class_new(vm, "Fiber", Value::Null, fiber_alloc);
    let iterator_class = vm.object_id(ObjId::Iterator);
    class_inherit(vm, class, iterator_class);
    vm.set_object_id(ObjId::Fiber, class);
    vm.set_object_id(ObjId::FiberInf, inf);
    add_const(vm, global, "Fiber", class);

    add_method(vm, inf, "$init", fiber_inf_init);
    add_method(vm, inf, "next", fiber_inf_next);
    add_accessor(vm, inf, "end", Some(fiber_end_get), None);
    add_accessor(vm, inf, "value", Some(fiber_value_get), None);
}

// ---- Iterator natives ---------------------------------------------------

fn iterator_inf_iter(
    _vm: &mut Vm,
    _ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    Ok(this)
}

fn iterator_inf_to_array(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let inf = vm.object_id(ObjId::ArrayInf);
    let array = array_alloc(vm, ctx, inf)?;
    let slot = vm.stack_push(ctx, array);

    let result = (|| {
        let mut i = 0usize;
        loop {
            if iterator_end(vm, ctx, this)? {
                break;
            }
            let item = iterator_value(vm, ctx, this)?;
            if let Some(r) = array.as_ref()
                && let HeapObj::Array(a) = vm.heap_mut().get_mut(r)
            {
                a.set_item(i, item);
            }
            i += 1;
            iterator_next(vm, ctx, this)?;
        }
        Ok(array)
    })();

    let closed = operation::close(vm, ctx, this);
    vm.stack_pop(ctx, slot);
    result.and(closed.map(|_| array))
}

fn iterator_inf_map(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    func_iter_new(vm, ctx, this, arg(args, 0), ObjId::MapIteratorInf)
}

fn iterator_inf_select(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    let fi = func_iter_new(vm, ctx, this, arg(args, 0), ObjId::SelectIteratorInf)?;
    let slot = vm.stack_push(ctx, fi);
    let r = select_advance(vm, ctx, fi);
    vm.stack_pop(ctx, slot);
    r.map(|_| fi)
}

fn iterator_inf_to_str(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    let sep = string_of(vm, ctx, arg(args, 0))?;
    let head = string_of(vm, ctx, arg(args, 1))?;
    let tail = string_of(vm, ctx, arg(args, 2))?;

    let mut out = head;
    let mut first = true;
    loop {
        if iterator_end(vm, ctx, this)? {
            break;
        }
        let v = iterator_value(vm, ctx, this)?;
        let s = string_of(vm, ctx, v)?;
        if !first {
            out.push_str(&sep);
        }
        first = false;
        out.push_str(&s);
        iterator_next(vm, ctx, this)?;
    }
    out.push_str(&tail);

    Ok(vm.new_string(&out))
}

fn string_of(vm: &mut Vm, ctx: ContextId, v: Value) -> Result<String, Thrown> {
    let s = to_string(vm, ctx, v)?;
    Ok(vm.str_value(s).unwrap_or("").to_owned())
}

// ---- map/select wrappers ------------------------------------------------

fn func_iter_new(
    vm: &mut Vm,
    _ctx: ContextId,
    iter: Value,
    f: Value,
    inf: ObjId,
) -> Result<Value, Thrown> {
    let inf_v = vm.object_id(inf);
    let obj_ref = vm.alloc_object(inf_v);
    if let Some(obj) = vm.heap_mut().get_mut(obj_ref).base_object_mut() {
        obj.set_priv(PrivData::FuncIter { iter, f });
    }
    Ok(Value::Ref(obj_ref))
}

fn func_iter_get(vm: &mut Vm, ctx: ContextId, v: Value) -> Result<(Value, Value), Thrown> {
    let data = v
        .as_ref()
        .and_then(|r| vm.heap().get(r).base_object())
        .and_then(|o| match o.priv_data() {
            Some(PrivData::FuncIter { iter, f }) => Some((*iter, *f)),
            _ => None,
        });
    match data {
        Some(pair) => Ok(pair),
        None => Err(throw_type_error(vm, ctx, "the value is not an iterator with function")),
    }
}

fn select_advance(vm: &mut Vm, ctx: ContextId, fi: Value) -> Result<(), Thrown> {
    let (iter, f) = func_iter_get(vm, ctx, fi)?;
    loop {
        if iterator_end(vm, ctx, iter)? {
            return Ok(());
        }
        let item = iterator_value(vm, ctx, iter)?;
        let keep = call(vm, ctx, f, Value::Null, &[item])?;
        if keep.truthy() {
            return Ok(());
        }
        iterator_next(vm, ctx, iter)?;
    }
}

fn func_iter_end_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let (iter, _) = func_iter_get(vm, ctx, this)?;
    Ok(Value::Bool(iterator_end(vm, ctx, iter)?))
}

fn func_iter_close(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let (iter, _) = func_iter_get(vm, ctx, this)?;
    operation::close(vm, ctx, iter)?;
    Ok(Value::Null)
}

fn map_iter_value_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let (iter, f) = func_iter_get(vm, ctx, this)?;
    let v = iterator_value(vm, ctx, iter)?;
    call(vm, ctx, f, Value::Null, &[v])
}

fn map_iter_next(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let (iter, _) = func_iter_get(vm, ctx, this)?;
    iterator_next(vm, ctx, iter)?;
    Ok(Value::Null)
}

fn select_iter_value_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let (iter, _) = func_iter_get(vm, ctx, this)?;
    iterator_value(vm, ctx, iter)
}

fn select_iter_next(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let (iter, _) = func_iter_get(vm, ctx, this)?;
    iterator_next(vm, ctx, iter)?;
    select_advance(vm, ctx, this)?;
    Ok(Value::Null)
}

// ---- keys / array iterators --------------------------------------------

fn object_inf_iter(
    vm: &mut Vm,
    _ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let keys = operation::keys(vm, this);
    let inf = vm.object_id(ObjId::KeysIteratorInf);
    let obj_ref = vm.alloc_object(inf);
    if let Some(obj) = vm.heap_mut().get_mut(obj_ref).base_object_mut() {
        obj.set_priv(PrivData::KeysIter {
            owner: this,
            keys,
            idx: 0,
        });
    }
    Ok(Value::Ref(obj_ref))
}

fn keys_iter_state(vm: &Vm, v: Value) -> Option<(usize, usize, Value)> {
    let obj = v.as_ref().and_then(|r| vm.heap().get(r).base_object())?;
    match obj.priv_data() {
        Some(PrivData::KeysIter { keys, idx, .. }) => {
            Some((*idx, keys.len(), keys.get(*idx).copied().unwrap_or(Value::Null)))
        }
        _ => None,
    }
}

fn keys_iter_end_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    match keys_iter_state(vm, this) {
        Some((idx, len, _)) => Ok(Value::Bool(idx >= len)),
        None => Err(throw_type_error(vm, ctx, "the value is not a key iterator")),
    }
}

fn keys_iter_value_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    match keys_iter_state(vm, this) {
        Some((_, _, v)) => Ok(v),
        None => Err(throw_type_error(vm, ctx, "the value is not a key iterator")),
    }
}

fn keys_iter_next(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let ok = this
        .as_ref()
        .and_then(|r| vm.heap_mut().get_mut(r).base_object_mut())
        .and_then(|o| match o.priv_data_mut() {
            Some(PrivData::KeysIter { idx, .. }) => {
                *idx += 1;
                Some(())
            }
            _ => None,
        });
    match ok {
        Some(()) => Ok(Value::Null),
        None => Err(throw_type_error(vm, ctx, "the value is not a key iterator")),
    }
}

fn array_inf_iter(
    vm: &mut Vm,
    _ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let inf = vm.object_id(ObjId::ArrayIteratorInf);
    let obj_ref = vm.alloc_object(inf);
    if let Some(obj) = vm.heap_mut().get_mut(obj_ref).base_object_mut() {
        obj.set_priv(PrivData::ArrayIter { arr: this, idx: 0 });
    }
    Ok(Value::Ref(obj_ref))
}

fn array_iter_state(vm: &Vm, v: Value) -> Option<(Value, usize)> {
    let obj = v.as_ref().and_then(|r| vm.heap().get(r).base_object())?;
    match obj.priv_data() {
        Some(PrivData::ArrayIter { arr, idx }) => Some((*arr, *idx)),
        _ => None,
    }
}

fn array_iter_end_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let Some((arr, idx)) = array_iter_state(vm, this) else {
        return Err(throw_type_error(vm, ctx, "the value is not an array iterator"));
    };
    let len = match arr.as_ref().map(|r| vm.heap().get(r)) {
        Some(HeapObj::Array(a)) => a.len(),
        _ => 0,
    };
    Ok(Value::Bool(idx >= len))
}

fn array_iter_value_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let Some((arr, idx)) = array_iter_state(vm, this) else {
        return Err(throw_type_error(vm, ctx, "the value is not an array iterator"));
    };
    let v = match arr.as_ref().map(|r| vm.heap().get(r)) {
        Some(HeapObj::Array(a)) => a.get_item(idx),
        _ => Value::Null,
    };
    Ok(v)
}

fn array_iter_next(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let ok = this
        .as_ref()
        .and_then(|r| vm.heap_mut().get_mut(r).base_object_mut())
        .and_then(|o| match o.priv_data_mut() {
            Some(PrivData::ArrayIter { idx, .. }) => {
                *idx += 1;
                Some(())
            }
            _ => None,
        });
    match ok {
        Some(()) => Ok(Value::Null),
        None => Err(throw_type_error(vm, ctx, "the value is not an array iterator")),
    }
}

// ---- primitives ---------------------------------------------------------

fn string_length_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    match vm.str_value(this) {
        Some(s) => Ok(Value::Number(s.len() as f64)),
        None => Err(throw_type_error(vm, ctx, "the value is not a string")),
    }
}

fn string_to_num(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    match vm.str_value(this) {
        Some(s) => {
            let n = s.trim().parse::<f64>().unwrap_or(f64::NAN);
            Ok(Value::Number(n))
        }
        None => Err(throw_type_error(vm, ctx, "the value is not a string")),
    }
}

// ---- Array --------------------------------------------------------------

fn this_array(vm: &mut Vm, ctx: ContextId, this: Value) -> Result<ObjRef, Thrown> {
    match this.as_ref() {
        Some(r) if matches!(vm.heap().get(r), HeapObj::Array(_)) => Ok(r),
        _ => Err(throw_type_error(vm, ctx, "the value is not an array")),
    }
}

fn array_inf_init(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_array(vm, ctx, this)?;
    if let HeapObj::Array(a) = vm.heap_mut().get_mut(r) {
        a.items = args.to_vec();
    }
    Ok(Value::Null)
}

fn array_length_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_array(vm, ctx, this)?;
    let len = match vm.heap().get(r) {
        HeapObj::Array(a) => a.len(),
        _ => 0,
    };
    Ok(Value::Number(len as f64))
}

fn array_length_set(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_array(vm, ctx, this)?;
    let n = to_number(vm, ctx, arg(args, 0))?;
    if !(n >= 0.0) || n.fract() != 0.0 {
        return Err(throw_range_error(vm, ctx, "illegal array length"));
    }
    if let HeapObj::Array(a) = vm.heap_mut().get_mut(r) {
        a.items.resize(n as usize, Value::Null);
    }
    Ok(Value::Null)
}

// ---- errors -------------------------------------------------------------

fn error_inf_init(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    let msg = arg(args, 0);
    if !msg.is_null() {
        let s = to_string(vm, ctx, msg)?;
        let key = vm.string_id(StrId::Message);
        operation::set(vm, ctx, this, key, s)?;
    }
    Ok(Value::Null)
}

fn error_inf_to_str(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let key = vm.string_id(StrId::Message);
    let msg = get(vm, ctx, this, key)?;
    let class = type_of(vm, ctx, this)?;
    let name = if class.is_null() {
        "Error".to_owned()
    } else {
        let name_v = get_s(vm, ctx, class, StrId::Name)?;
        vm.str_value(name_v).unwrap_or("Error").to_owned()
    };

    let text = if msg.is_null() {
        name
    } else {
        let m = string_of(vm, ctx, msg)?;
        format!("{name}: {m}")
    };
    Ok(vm.new_string(&text))
}

// ---- Re -----------------------------------------------------------------

fn this_regex(vm: &mut Vm, ctx: ContextId, this: Value) -> Result<ObjRef, Thrown> {
    match this.as_ref() {
        Some(r) if matches!(vm.heap().get(r), HeapObj::Regex(_)) => Ok(r),
        _ => Err(throw_type_error(vm, ctx, "the value is not a regular expression")),
    }
}

fn re_inf_init(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_regex(vm, ctx, this)?;

    let src = to_string(vm, ctx, arg(args, 0))?;
    let src_slot = vm.stack_push(ctx, src);

    let flags_arg = arg(args, 1);
    let flags = if flags_arg.is_null() {
        0
    } else if let Some(s) = vm.str_value(flags_arg) {
        crate::regex::flags_from_str(s)
    } else {
        to_number(vm, ctx, flags_arg)? as u32
    };

    let source = vm.str_value(src).unwrap_or("").to_owned();
    let mut prompter = crate::input::prompt::Prompter::new();
    let compiled = Compiled::from_str(&source, flags, &mut prompter);
    vm.stack_pop(ctx, src_slot);

    let Some(compiled) = compiled else {
        let detail = prompter
            .diagnostics()
            .first()
            .map(|d| d.message.clone())
            .unwrap_or_else(|| "bad pattern".to_owned());
        return Err(throw_syntax_error(
            vm,
            ctx,
            format!("regular expression: {detail}"),
        ));
    };

    if let HeapObj::Regex(re) = vm.heap_mut().get_mut(r) {
        re.src = src;
        re.flags = compiled.flags;
        re.group_count = compiled.group_count;
        re.cmds = compiled.cmds;
    }
    Ok(Value::Null)
}

/// Matches a string against a regex value: the core public match operation.
pub fn re_match(
    vm: &mut Vm,
    ctx: ContextId,
    re: Value,
    s: Value,
    start: usize,
    extra_flags: u32,
) -> Result<Value, Thrown> {
    let rr = this_regex(vm, ctx, re)?;

    let exec_result = {
        let text = vm.str_value(s).unwrap_or("");
        match vm.heap().get(rr) {
            HeapObj::Regex(rx) => crate::regex::exec::exec(
                &rx.cmds,
                rx.group_count,
                rx.flags | extra_flags,
                text,
                start,
            ),
            _ => unreachable!(),
        }
    };

    match exec_result {
        Err(_) => Err(throw_range_error(vm, ctx, "illegal unicode character")),
        Ok(None) => Ok(Value::Null),
        Ok(Some(m)) => {
            let inf = vm.object_id(ObjId::MatchInf);
            let mr = vm.alloc(HeapObj::Match(Match::new(
                Object::new(inf),
                s,
                m.start,
                m.end,
                m.slices,
            )));
            Ok(Value::Ref(mr))
        }
    }
}

fn re_inf_match(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    let s = to_string(vm, ctx, arg(args, 0))?;
    let slot = vm.stack_push(ctx, s);

    let result = (|| {
        let len = vm.str_value(s).map(|t| t.len()).unwrap_or(0);
        let pos_arg = arg(args, 1);
        let pos = if pos_arg.is_null() {
            0
        } else {
            let p = to_number(vm, ctx, pos_arg)?;
            if p < 0.0 {
                (len as f64 + p).max(0.0) as usize
            } else {
                p as usize
            }
        };
        re_match(vm, ctx, this, s, pos, 0)
    })();

    vm.stack_pop(ctx, slot);
    result
}

fn re_inf_to_str(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_regex(vm, ctx, this)?;
    let (src, flags) = match vm.heap().get(r) {
        HeapObj::Regex(re) => (re.src, re.flags),
        _ => unreachable!(),
    };
    let source = vm.str_value(src).unwrap_or("").to_owned();
    let text = format!("/{}/{}", source, crate::regex::flags_to_str(flags));
    Ok(vm.new_string(&text))
}

// ---- Match --------------------------------------------------------------

fn this_match(vm: &mut Vm, ctx: ContextId, this: Value) -> Result<ObjRef, Thrown> {
    match this.as_ref() {
        Some(r) if matches!(vm.heap().get(r), HeapObj::Match(_)) => Ok(r),
        _ => Err(throw_type_error(
            vm,
            ctx,
            "the value is not a regular expression match result",
        )),
    }
}

fn match_start_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_match(vm, ctx, this)?;
    match vm.heap().get(r) {
        HeapObj::Match(m) => Ok(Value::Number(m.start as f64)),
        _ => unreachable!(),
    }
}

fn match_end_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_match(vm, ctx, this)?;
    match vm.heap().get(r) {
        HeapObj::Match(m) => Ok(Value::Number(m.end as f64)),
        _ => unreachable!(),
    }
}

fn match_substring(vm: &mut Vm, r: ObjRef, start: usize, end: usize) -> Value {
    let text = match vm.heap().get(r) {
        HeapObj::Match(m) => vm
            .str_value(m.s)
            .and_then(|s| s.get(start..end))
            .map(|s| s.to_owned()),
        _ => None,
    };
    match text {
        Some(t) => vm.new_string(&t),
        None => Value::Null,
    }
}

fn match_to_str(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_match(vm, ctx, this)?;
    let (cached, start, end) = match vm.heap().get(r) {
        HeapObj::Match(m) => (m.sub, m.start, m.end),
        _ => unreachable!(),
    };
    if !cached.is_null() {
        return Ok(cached);
    }

    let sub = match_substring(vm, r, start, end);
    if let HeapObj::Match(m) = vm.heap_mut().get_mut(r) {
        m.sub = sub;
    }
    Ok(sub)
}

fn match_groups_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_match(vm, ctx, this)?;
    let (cached, slices) = match vm.heap().get(r) {
        HeapObj::Match(m) => (m.group_strs, m.slices.clone()),
        _ => unreachable!(),
    };
    if !cached.is_null() {
        return Ok(cached);
    }

    let inf = vm.object_id(ObjId::ArrayInf);
    let array = Value::Ref(vm.alloc(HeapObj::Array(Array::new(Object::new(inf), 0))));
    let slot = vm.stack_push(ctx, array);

    for (i, s) in slices.iter().enumerate() {
        let item = if s.start < 0 || s.end < 0 {
            Value::Null
        } else {
            match_substring(vm, r, s.start as usize, s.end as usize)
        };
        if let Some(ar) = array.as_ref()
            && let HeapObj::Array(a) = vm.heap_mut().get_mut(ar)
        {
            a.set_item(i, item);
        }
    }

    vm.stack_pop(ctx, slot);
    if let HeapObj::Match(m) = vm.heap_mut().get_mut(r) {
        m.group_strs = array;
    }
    Ok(array)
}

fn match_slices_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_match(vm, ctx, this)?;
    let (cached, slices) = match vm.heap().get(r) {
        HeapObj::Match(m) => (m.group_slices, m.slices.clone()),
        _ => unreachable!(),
    };
    if !cached.is_null() {
        return Ok(cached);
    }

    let inf = vm.object_id(ObjId::ArrayInf);
    let array = Value::Ref(vm.alloc(HeapObj::Array(Array::new(Object::new(inf), 0))));
    let slot = vm.stack_push(ctx, array);

    for (i, s) in slices.iter().enumerate() {
        let item = if s.start < 0 || s.end < 0 {
            Value::Null
        } else {
            let pair = {
                let mut a = Array::new(Object::new(inf), 2);
                a.items[0] = Value::Number(s.start as f64);
                a.items[1] = Value::Number(s.end as f64);
                a
            };
            Value::Ref(vm.alloc(HeapObj::Array(pair)))
        };
        if let Some(ar) = array.as_ref()
            && let HeapObj::Array(a) = vm.heap_mut().get_mut(ar)
        {
            a.set_item(i, item);
        }
    }

    vm.stack_pop(ctx, slot);
    if let HeapObj::Match(m) = vm.heap_mut().get_mut(r) {
        m.group_slices = array;
    }
    Ok(array)
}

// ---- Dict ---------------------------------------------------------------

fn this_dict(vm: &mut Vm, ctx: ContextId, this: Value) -> Result<ObjRef, Thrown> {
    match this.as_ref() {
        Some(r) if matches!(vm.heap().get(r), HeapObj::Dict(_)) => Ok(r),
        _ => Err(throw_type_error(vm, ctx, "the value is not a dictionary")),
    }
}

fn dict_inf_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_dict(vm, ctx, this)?;
    let key = dict_key_of(vm, arg(args, 0));
    let v = match vm.heap().get(r) {
        HeapObj::Dict(d) => d.entries.get(&key).copied().unwrap_or(Value::Null),
        _ => Value::Null,
    };
    Ok(v)
}

fn dict_inf_set(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_dict(vm, ctx, this)?;
    let key = dict_key_of(vm, arg(args, 0));
    let v = arg(args, 1);
    if let HeapObj::Dict(d) = vm.heap_mut().get_mut(r) {
        d.entries.insert(key, v);
    }
    Ok(Value::Null)
}

fn dict_inf_has(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_dict(vm, ctx, this)?;
    let key = dict_key_of(vm, arg(args, 0));
    let has = match vm.heap().get(r) {
        HeapObj::Dict(d) => d.entries.contains_key(&key),
        _ => false,
    };
    Ok(Value::Bool(has))
}

/// Removes an entry, advancing any live iterator that sits on it before the
/// physical removal (the shift makes the following entry take its index).
pub(crate) fn dict_remove_entry(vm: &mut Vm, dict: ObjRef, key: &DictKey) -> bool {
    let Some(idx) = (match vm.heap().get(dict) {
        HeapObj::Dict(d) => d.entries.get_index_of(key),
        _ => None,
    }) else {
        return false;
    };

    let iters: Vec<ObjRef> = match vm.heap_mut().get_mut(dict) {
        HeapObj::Dict(d) => {
            d.entries.shift_remove_index(idx);
            std::mem::take(&mut d.iters)
        }
        _ => Vec::new(),
    };

    // Tombstone pass: fix live iterators, drop dead references.
    let mut alive = Vec::with_capacity(iters.len());
    for ir in iters {
        if !vm.heap().is_live(ir) {
            continue;
        }
        if let HeapObj::DictIter(it) = vm.heap_mut().get_mut(ir) {
            if it.pos > idx {
                it.pos -= 1;
            }
            alive.push(ir);
        }
    }

    if let HeapObj::Dict(d) = vm.heap_mut().get_mut(dict) {
        d.iters = alive;
    }
    true
}

fn dict_inf_remove(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_dict(vm, ctx, this)?;
    let key = dict_key_of(vm, arg(args, 0));
    let removed = dict_remove_entry(vm, r, &key);
    Ok(Value::Bool(removed))
}

fn dict_length_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_dict(vm, ctx, this)?;
    let len = match vm.heap().get(r) {
        HeapObj::Dict(d) => d.len(),
        _ => 0,
    };
    Ok(Value::Number(len as f64))
}

fn dict_iter_new(
    vm: &mut Vm,
    ctx: ContextId,
    this: Value,
    kind: EntryIterKind,
) -> Result<Value, Thrown> {
    let r = this_dict(vm, ctx, this)?;
    let inf = vm.object_id(ObjId::DictIteratorInf);
    let iter = vm.alloc(HeapObj::DictIter(DictIter {
        obj: Object::new(inf),
        dict: this,
        kind,
        pos: 0,
        closed: false,
    }));
    if let HeapObj::Dict(d) = vm.heap_mut().get_mut(r) {
        d.iters.push(iter);
    }
    Ok(Value::Ref(iter))
}

fn dict_inf_keys(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    dict_iter_new(vm, ctx, this, EntryIterKind::Key)
}

fn dict_inf_values(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    dict_iter_new(vm, ctx, this, EntryIterKind::Value)
}

fn dict_inf_entries(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    dict_iter_new(vm, ctx, this, EntryIterKind::KeyValue)
}

fn this_dict_iter(vm: &mut Vm, ctx: ContextId, this: Value) -> Result<ObjRef, Thrown> {
    match this.as_ref() {
        Some(r) if matches!(vm.heap().get(r), HeapObj::DictIter(_)) => Ok(r),
        _ => Err(throw_type_error(vm, ctx, "the value is not a dictionary iterator")),
    }
}

fn dict_iter_end_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_dict_iter(vm, ctx, this)?;
    let (dict, pos, closed) = match vm.heap().get(r) {
        HeapObj::DictIter(it) => (it.dict, it.pos, it.closed),
        _ => unreachable!(),
    };
    let len = match dict.as_ref().map(|d| vm.heap().get(d)) {
        Some(HeapObj::Dict(d)) => d.len(),
        _ => 0,
    };
    Ok(Value::Bool(closed || pos >= len))
}

fn dict_iter_value_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_dict_iter(vm, ctx, this)?;
    let (dict, pos, kind) = match vm.heap().get(r) {
        HeapObj::DictIter(it) => (it.dict, it.pos, it.kind),
        _ => unreachable!(),
    };
    let entry = match dict.as_ref().map(|d| vm.heap().get(d)) {
        Some(HeapObj::Dict(d)) => d.entries.get_index(pos).map(|(k, v)| (k.clone(), *v)),
        _ => None,
    };
    let Some((key, value)) = entry else {
        return Ok(Value::Null);
    };

    let key_value = |vm: &mut Vm, key: &DictKey| match key {
        DictKey::Str(s) => vm.new_string(s),
        other => other.to_value().unwrap_or(Value::Null),
    };

    match kind {
        EntryIterKind::Key => Ok(key_value(vm, &key)),
        EntryIterKind::Value => Ok(value),
        EntryIterKind::KeyValue => {
            let inf = vm.object_id(ObjId::ArrayInf);
            let k = key_value(vm, &key);
            let slot = vm.stack_push(ctx, k);
            let pair = {
                let mut a = Array::new(Object::new(inf), 2);
                a.items[0] = k;
                a.items[1] = value;
                a
            };
            let pair = Value::Ref(vm.alloc(HeapObj::Array(pair)));
            vm.stack_pop(ctx, slot);
            Ok(pair)
        }
    }
}

fn dict_iter_next(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_dict_iter(vm, ctx, this)?;
    if let HeapObj::DictIter(it) = vm.heap_mut().get_mut(r) {
        it.pos += 1;
    }
    Ok(Value::Null)
}

fn dict_iter_close(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_dict_iter(vm, ctx, this)?;
    let dict = match vm.heap_mut().get_mut(r) {
        HeapObj::DictIter(it) => {
            it.closed = true;
            it.dict
        }
        _ => Value::Null,
    };
    if let Some(dr) = dict.as_ref()
        && let HeapObj::Dict(d) = vm.heap_mut().get_mut(dr)
    {
        d.iters.retain(|i| *i != r);
    }
    Ok(Value::Null)
}

// ---- Set ----------------------------------------------------------------

fn this_set(vm: &mut Vm, ctx: ContextId, this: Value) -> Result<ObjRef, Thrown> {
    match this.as_ref() {
        Some(r) if matches!(vm.heap().get(r), HeapObj::Set(_)) => Ok(r),
        _ => Err(throw_type_error(vm, ctx, "the value is not a set")),
    }
}

fn set_inf_add(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_set(vm, ctx, this)?;
    let key = dict_key_of(vm, arg(args, 0));
    if let HeapObj::Set(s) = vm.heap_mut().get_mut(r) {
        s.entries.insert(key);
    }
    Ok(Value::Null)
}

fn set_inf_has(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_set(vm, ctx, this)?;
    let key = dict_key_of(vm, arg(args, 0));
    let has = match vm.heap().get(r) {
        HeapObj::Set(s) => s.entries.contains(&key),
        _ => false,
    };
    Ok(Value::Bool(has))
}

fn set_inf_remove(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_set(vm, ctx, this)?;
    let key = dict_key_of(vm, arg(args, 0));

    let Some(idx) = (match vm.heap().get(r) {
        HeapObj::Set(s) => s.entries.get_index_of(&key),
        _ => None,
    }) else {
        return Ok(Value::Bool(false));
    };

    let iters: Vec<ObjRef> = match vm.heap_mut().get_mut(r) {
        HeapObj::Set(s) => {
            s.entries.shift_remove_index(idx);
            std::mem::take(&mut s.iters)
        }
        _ => Vec::new(),
    };

    let mut alive = Vec::with_capacity(iters.len());
    for ir in iters {
        if !vm.heap().is_live(ir) {
            continue;
        }
        if let HeapObj::SetIter(it) = vm.heap_mut().get_mut(ir) {
            if it.pos > idx {
                it.pos -= 1;
            }
            alive.push(ir);
        }
    }
    if let HeapObj::Set(s) = vm.heap_mut().get_mut(r) {
        s.iters = alive;
    }

    Ok(Value::Bool(true))
}

fn set_length_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_set(vm, ctx, this)?;
    let len = match vm.heap().get(r) {
        HeapObj::Set(s) => s.len(),
        _ => 0,
    };
    Ok(Value::Number(len as f64))
}

fn set_inf_iter(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_set(vm, ctx, this)?;
    let inf = vm.object_id(ObjId::SetIteratorInf);
    let iter = vm.alloc(HeapObj::SetIter(SetIter {
        obj: Object::new(inf),
        set: this,
        pos: 0,
        closed: false,
    }));
    if let HeapObj::Set(s) = vm.heap_mut().get_mut(r) {
        s.iters.push(iter);
    }
    Ok(Value::Ref(iter))
}

fn this_set_iter(vm: &mut Vm, ctx: ContextId, this: Value) -> Result<ObjRef, Thrown> {
    match this.as_ref() {
        Some(r) if matches!(vm.heap().get(r), HeapObj::SetIter(_)) => Ok(r),
        _ => Err(throw_type_error(vm, ctx, "the value is not a set iterator")),
    }
}

fn set_iter_end_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_set_iter(vm, ctx, this)?;
    let (set, pos, closed) = match vm.heap().get(r) {
        HeapObj::SetIter(it) => (it.set, it.pos, it.closed),
        _ => unreachable!(),
    };
    let len = match set.as_ref().map(|s| vm.heap().get(s)) {
        Some(HeapObj::Set(s)) => s.len(),
        _ => 0,
    };
    Ok(Value::Bool(closed || pos >= len))
}

fn set_iter_value_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_set_iter(vm, ctx, this)?;
    let (set, pos) = match vm.heap().get(r) {
        HeapObj::SetIter(it) => (it.set, it.pos),
        _ => unreachable!(),
    };
    let key = match set.as_ref().map(|s| vm.heap().get(s)) {
        Some(HeapObj::Set(s)) => s.entries.get_index(pos).cloned(),
        _ => None,
    };
    match key {
        Some(DictKey::Str(s)) => Ok(vm.new_string(&s)),
        Some(other) => Ok(other.to_value().unwrap_or(Value::Null)),
        None => Ok(Value::Null),
    }
}

fn set_iter_next(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_set_iter(vm, ctx, this)?;
    if let HeapObj::SetIter(it) = vm.heap_mut().get_mut(r) {
        it.pos += 1;
    }
    Ok(Value::Null)
}

fn set_iter_close(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_set_iter(vm, ctx, this)?;
    let set = match vm.heap_mut().get_mut(r) {
        HeapObj::SetIter(it) => {
            it.closed = true;
            it.set
        }
        _ => Value::Null,
    };
    if let Some(sr) = set.as_ref()
        && let HeapObj::Set(s) = vm.heap_mut().get_mut(sr)
    {
        s.iters.retain(|i| *i != r);
    }
    Ok(Value::Null)
}

// ---- Fiber --------------------------------------------------------------

fn this_fiber(vm: &mut Vm, ctx: ContextId, this: Value) -> Result<ObjRef, Thrown> {
    match this.as_ref() {
        Some(r) if matches!(vm.heap().get(r), HeapObj::Fiber(_)) => Ok(r),
        _ => Err(throw_type_error(vm, ctx, "the value is not a fiber")),
    }
}

fn fiber_inf_init(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_fiber(vm, ctx, this)?;

    let func = arg(args, 0);
    let targ = arg(args, 1);
    let rest: Vec<Value> = args.get(2..).map(|a| a.to_vec()).unwrap_or_default();

    let (decl_len, reg_count) = match func.as_ref().map(|fr| vm.heap().get(fr)) {
        Some(HeapObj::Function(f)) => {
            let info = f
                .script
                .as_ref()
                .and_then(|sr| match vm.heap().get(sr) {
                    HeapObj::Script(s) => match &s.body {
                        ScriptBody::Bytecode(bc) => bc
                            .funcs
                            .get(f.sfunc)
                            .map(|sf| (sf.decls.len(), sf.reg_count as usize)),
                        _ => None,
                    },
                    _ => None,
                })
                .unwrap_or((0, 0));
            info
        }
        _ => return Err(throw_type_error(vm, ctx, "the value is not a function")),
    };

    // The entry frame: not installed on the context, just saved for the
    // first resume.
    let bot = vm.current_frame(ctx);
    let frame = vm.alloc(HeapObj::Frame(Frame::new(func, decl_len, bot)));
    if let HeapObj::Frame(fr) = vm.heap_mut().get_mut(frame) {
        fr.this = targ;
        fr.ip = 0;
    }

    if let HeapObj::Fiber(fiber) = vm.heap_mut().get_mut(r) {
        fiber.func = func;
        fiber.args = rest;
        fiber.rsr.frame = Some(frame);
        fiber.v_stack = vec![Value::Null; reg_count + 1];
    }
    Ok(Value::Null)
}

fn fiber_inf_next(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    this_fiber(vm, ctx, this)?;
    fiber_next(vm, ctx, this, arg(args, 0))
}

fn fiber_end_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_fiber(vm, ctx, this)?;
    let end = match vm.heap().get(r) {
        HeapObj::Fiber(f) => f.is_end(),
        _ => false,
    };
    Ok(Value::Bool(end))
}

fn fiber_value_get(
    vm: &mut Vm,
    ctx: ContextId,
    _f: Value,
    this: Value,
    _args: &[Value],
) -> Result<Value, Thrown> {
    let r = this_fiber(vm, ctx, this)?;
    let rv = match vm.heap().get(r) {
        HeapObj::Fiber(f) => f.rv,
        _ => Value::Null,
    };
    Ok(rv)
}
