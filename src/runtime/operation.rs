//! Generic operations over values: the property protocol, calls,
//! conversions, equality and the iterator protocol. Every script-visible
//! behavior funnels through here, dispatching on the heap-object kind.

use crate::runtime::context::ContextId;
use crate::runtime::dispatch::{DispatchCall, DispatchOutcome};
use crate::runtime::error::{
    Thrown, throw_null_property_error, throw_reference_error, throw_type_error,
};
use crate::runtime::format::{
    SOUT_FL_ALIGN_HEAD, SOUT_FL_ZERO, SOUT_PREC_DEFAULT, SOUT_WIDTH_DEFAULT, SoutFormat,
    sout_format, sout_prec, sout_width,
};
use crate::runtime::script::ScriptBody;
use crate::runtime::vm::{ObjId, StrId, Vm};
use crate::values::HeapObj;
use crate::values::dict::DictKey;
use crate::values::property::{NumKey, PropKey, Property};
use crate::values::value::Value;

// ---- keys ---------------------------------------------------------------

/// Converts a value into a property-map key. Only strings and numbers key
/// property maps; other kinds are dictionary territory.
pub fn prop_key_of(vm: &Vm, key: Value) -> Option<PropKey> {
    match key {
        Value::Number(n) => Some(PropKey::Num(NumKey(n))),
        Value::Ref(_) => vm.str_value(key).map(PropKey::str),
        _ => None,
    }
}

/// Converts a value into a dictionary key; strings are captured by content.
pub fn dict_key_of(vm: &Vm, key: Value) -> DictKey {
    match key {
        Value::Null => DictKey::Null,
        Value::Bool(b) => DictKey::Bool(b),
        Value::Number(n) => DictKey::Num(NumKey(n)),
        Value::Ref(r) => match vm.str_value(key) {
            Some(s) => DictKey::Str(s.into()),
            None => DictKey::Ref(r),
        },
    }
}

// ---- property protocol --------------------------------------------------

/// The prototype a lookup continues on after `v`'s own properties:
/// primitives forward to their class interface, heap kinds to their base
/// object's interface.
pub fn interface_of(vm: &Vm, v: Value) -> Value {
    match v {
        Value::Null => Value::Null,
        Value::Bool(_) => vm.object_id(ObjId::BoolInf),
        Value::Number(_) => vm.object_id(ObjId::NumberInf),
        Value::Ref(r) => match vm.heap().get(r) {
            HeapObj::Str(_) => vm.object_id(ObjId::StringInf),
            obj => obj.base_object().map(|o| o.inf).unwrap_or(Value::Null),
        },
    }
}

fn own_prop(vm: &Vm, v: Value, key: &PropKey) -> Option<Property> {
    let r = v.as_ref()?;
    vm.heap().get(r).base_object()?.lookup(key).cloned()
}

/// Own-property resolution: no interface walk. Accessors run their getter
/// with `v` as `this`.
pub fn lookup(vm: &mut Vm, ctx: ContextId, v: Value, key: Value) -> Result<Value, Thrown> {
    let Some(pk) = prop_key_of(vm, key) else {
        return Ok(Value::Null);
    };
    match own_prop(vm, v, &pk) {
        Some(Property::Const(x)) | Some(Property::Var(x)) => Ok(x),
        Some(Property::Accessor { get, .. }) => {
            if get.is_null() {
                Ok(Value::Null)
            } else {
                call(vm, ctx, get, v, &[])
            }
        }
        None => Ok(Value::Null),
    }
}

/// Full resolution; `Ok(None)` means the property does not exist anywhere
/// on the chain (distinct from an existing null-valued property).
pub fn get_opt(vm: &mut Vm, ctx: ContextId, v: Value, key: Value) -> Result<Option<Value>, Thrown> {
    // Kind-specific fast paths first.
    if let Some(r) = v.as_ref() {
        match vm.heap().get(r) {
            HeapObj::Array(a) => {
                if let Value::Number(n) = key {
                    if n >= 0.0 && n.fract() == 0.0 {
                        return Ok(Some(a.get_item(n as usize)));
                    }
                    return Ok(Some(Value::Null));
                }
            }
            HeapObj::Dict(d) => {
                let dk = dict_key_of(vm, key);
                if let Some(x) = d.entries.get(&dk) {
                    return Ok(Some(*x));
                }
            }
            HeapObj::Script(s) => {
                if let Some(name) = vm.str_value(key)
                    && let Some(slot) = s.public(name)
                {
                    let frame = s.frame;
                    let value = frame
                        .map(|f| match vm.heap().get(f) {
                            HeapObj::Frame(fr) => {
                                fr.regs.get(slot).copied().unwrap_or(Value::Null)
                            }
                            _ => Value::Null,
                        })
                        .unwrap_or(Value::Null);
                    return Ok(Some(value));
                }
            }
            _ => {}
        }
    }

    let Some(pk) = prop_key_of(vm, key) else {
        return Ok(None);
    };

    let mut cur = v;
    loop {
        match own_prop(vm, cur, &pk) {
            Some(Property::Const(x)) | Some(Property::Var(x)) => return Ok(Some(x)),
            Some(Property::Accessor { get, .. }) => {
                if get.is_null() {
                    return Ok(Some(Value::Null));
                }
                return call(vm, ctx, get, v, &[]).map(Some);
            }
            None => {
                let next = interface_of(vm, cur);
                if next.is_null() || next == cur {
                    return Ok(None);
                }
                cur = next;
            }
        }
    }
}

/// Full resolution, null when absent; the caller decides whether absence
/// matters.
pub fn get(vm: &mut Vm, ctx: ContextId, v: Value, key: Value) -> Result<Value, Thrown> {
    Ok(get_opt(vm, ctx, v, key)?.unwrap_or(Value::Null))
}

pub fn get_s(vm: &mut Vm, ctx: ContextId, v: Value, name: StrId) -> Result<Value, Thrown> {
    let key = vm.string_id(name);
    get(vm, ctx, v, key)
}

/// Like [`get`], but raises a null error when the property is absent.
pub fn get_throw(vm: &mut Vm, ctx: ContextId, v: Value, key: Value) -> Result<Value, Thrown> {
    match get_opt(vm, ctx, v, key)? {
        Some(x) => Ok(x),
        None => {
            let pk = prop_key_of(vm, key).unwrap_or_else(|| PropKey::str("?"));
            Err(throw_null_property_error(vm, ctx, &pk))
        }
    }
}

/// Store protocol: own const rejects, own accessor runs its setter, own
/// var stores; an accessor found on the interface chain also runs; anything
/// else inserts a new own var, preserving insertion order.
pub fn set(vm: &mut Vm, ctx: ContextId, v: Value, key: Value, value: Value) -> Result<(), Thrown> {
    let Some(r) = v.as_ref() else {
        return Err(throw_type_error(vm, ctx, "cannot set a property on this value"));
    };

    // Kind-specific stores.
    match vm.heap().get(r).kind() {
        crate::values::ObjKind::Str => {
            return Err(throw_type_error(vm, ctx, "cannot set a property on a string"));
        }
        crate::values::ObjKind::Array => {
            if let Value::Number(n) = key {
                if n < 0.0 || n.fract() != 0.0 {
                    return Err(throw_type_error(vm, ctx, "illegal array index"));
                }
                let idx = n as usize;
                if let HeapObj::Array(a) = vm.heap_mut().get_mut(r) {
                    a.set_item(idx, value);
                }
                return Ok(());
            }
        }
        crate::values::ObjKind::Dict => {
            let dk = dict_key_of(vm, key);
            if let HeapObj::Dict(d) = vm.heap_mut().get_mut(r) {
                d.entries.insert(dk, value);
            }
            return Ok(());
        }
        crate::values::ObjKind::Script => {
            let found = match vm.heap().get(r) {
                HeapObj::Script(s) => vm
                    .str_value(key)
                    .and_then(|name| s.public(name))
                    .map(|slot| (s.frame, slot)),
                _ => None,
            };
            if let Some((frame, slot)) = found {
                if let Some(f) = frame
                    && let HeapObj::Frame(fr) = vm.heap_mut().get_mut(f)
                {
                    if fr.regs.len() <= slot {
                        fr.regs.resize(slot + 1, Value::Null);
                    }
                    fr.regs[slot] = value;
                }
                return Ok(());
            }
        }
        _ => {}
    }

    let Some(pk) = prop_key_of(vm, key) else {
        return Err(throw_type_error(vm, ctx, "illegal property key"));
    };

    // Own property.
    match own_prop(vm, v, &pk) {
        Some(Property::Const(_)) => {
            return Err(throw_type_error(vm, ctx, "cannot assign to a constant property"));
        }
        Some(Property::Accessor { set: setter, .. }) => {
            if setter.is_null() {
                return Err(throw_type_error(vm, ctx, "the property has no setter"));
            }
            return call(vm, ctx, setter, v, &[value]).map(|_| ());
        }
        Some(Property::Var(_)) => {
            if let Some(obj) = vm.heap_mut().get_mut(r).base_object_mut() {
                obj.put(pk, Property::Var(value));
            }
            return Ok(());
        }
        None => {}
    }

    // Accessors inherited through the interface chain still fire.
    let mut cur = interface_of(vm, v);
    while !cur.is_null() {
        match own_prop(vm, cur, &pk) {
            Some(Property::Accessor { set: setter, .. }) => {
                if setter.is_null() {
                    return Err(throw_type_error(vm, ctx, "the property has no setter"));
                }
                return call(vm, ctx, setter, v, &[value]).map(|_| ());
            }
            Some(_) => break,
            None => {
                let next = interface_of(vm, cur);
                if next == cur {
                    break;
                }
                cur = next;
            }
        }
    }

    if let Some(obj) = vm.heap_mut().get_mut(r).base_object_mut() {
        obj.put(pk, Property::Var(value));
        Ok(())
    } else {
        Err(throw_type_error(vm, ctx, "cannot set a property on this value"))
    }
}

/// Deletes an own property (or dictionary entry / array slot), preserving
/// the order of the remaining entries.
pub fn del(vm: &mut Vm, ctx: ContextId, v: Value, key: Value) -> Result<(), Thrown> {
    let Some(r) = v.as_ref() else {
        return Err(throw_type_error(vm, ctx, "cannot delete a property of this value"));
    };

    match vm.heap().get(r).kind() {
        crate::values::ObjKind::Dict => {
            let dk = dict_key_of(vm, key);
            crate::runtime::builtins::dict_remove_entry(vm, r, &dk);
            return Ok(());
        }
        crate::values::ObjKind::Array => {
            if let Value::Number(n) = key
                && n >= 0.0
                && n.fract() == 0.0
            {
                if let HeapObj::Array(a) = vm.heap_mut().get_mut(r)
                    && (n as usize) < a.items.len()
                {
                    let idx = n as usize;
                    a.items[idx] = Value::Null;
                }
                return Ok(());
            }
        }
        _ => {}
    }

    let Some(pk) = prop_key_of(vm, key) else {
        return Ok(());
    };
    if let Some(obj) = vm.heap_mut().get_mut(r).base_object_mut() {
        obj.remove(&pk);
    }
    Ok(())
}

/// Own keys, in insertion order, as values.
pub fn keys(vm: &mut Vm, v: Value) -> Vec<Value> {
    let Some(r) = v.as_ref() else {
        return Vec::new();
    };

    enum Plan {
        Props(Vec<PropKey>),
        Indices(usize),
        DictKeys(Vec<DictKey>),
    }

    let plan = match vm.heap().get(r) {
        HeapObj::Array(a) => Plan::Indices(a.len()),
        HeapObj::Dict(d) => Plan::DictKeys(d.entries.keys().cloned().collect()),
        obj => Plan::Props(
            obj.base_object()
                .map(|o| o.keys().cloned().collect())
                .unwrap_or_default(),
        ),
    };

    // The result vector is not a collector root; keep collection out of
    // the batch so earlier keys survive the later allocations.
    vm.set_gc_enabled(false);
    let out = match plan {
        Plan::Indices(n) => (0..n).map(|i| Value::Number(i as f64)).collect(),
        Plan::Props(keys) => keys
            .into_iter()
            .map(|k| match k {
                PropKey::Str(s) => vm.new_string(&s),
                PropKey::Num(NumKey(n)) => Value::Number(n),
            })
            .collect(),
        Plan::DictKeys(keys) => keys
            .into_iter()
            .map(|k| match k {
                DictKey::Str(s) => vm.new_string(&s),
                other => other.to_value().unwrap_or(Value::Null),
            })
            .collect(),
    };
    vm.set_gc_enabled(true);
    out
}

// ---- calls --------------------------------------------------------------

/// Invokes a callable: native functions directly, script functions through
/// the dispatch hook, classes by allocating an instance and running
/// `$init`.
pub fn call(vm: &mut Vm, ctx: ContextId, f: Value, this: Value, args: &[Value]) -> Result<Value, Thrown> {
    let Some(r) = f.as_ref() else {
        return Err(throw_type_error(vm, ctx, "the value is not a function"));
    };

    enum Callee {
        Native(crate::values::function::NativeFn),
        Script { script: Value, sfunc: usize },
        Class,
        Other,
    }

    let callee = match vm.heap().get(r) {
        HeapObj::NativeFunc(nf) => Callee::Native(nf.f),
        HeapObj::Function(func) => Callee::Script {
            script: func.script,
            sfunc: func.sfunc,
        },
        HeapObj::Class(_) => Callee::Class,
        _ => Callee::Other,
    };

    match callee {
        Callee::Native(native) => native(vm, ctx, f, this, args),
        Callee::Script { script, sfunc } => {
            let Some(engine) = vm.dispatch() else {
                return Err(throw_type_error(vm, ctx, "no bytecode engine registered"));
            };

            let len = script
                .as_ref()
                .and_then(|sr| match vm.heap().get(sr) {
                    HeapObj::Script(s) => match &s.body {
                        ScriptBody::Bytecode(bc) => bc.funcs.get(sfunc).map(|sf| sf.decls.len()),
                        _ => None,
                    },
                    _ => None,
                })
                .unwrap_or(0);

            let saved_frames = vm.context(ctx).frames;
            let frame = vm.frame_push(ctx, f, len);
            if let HeapObj::Frame(fr) = vm.heap_mut().get_mut(frame) {
                fr.this = this;
                fr.ip = 0;
            }

            // Park the callee and arguments on the value stack for the
            // duration of the dispatch; a call entry releases them on any
            // exit, including unwinding.
            let depth = vm.status_depth(ctx);
            let base = vm.stack_push(ctx, f);
            vm.stack_push(ctx, this);
            for a in args {
                vm.stack_push(ctx, *a);
            }
            vm.status_push(ctx, crate::runtime::status::StatusEntry::Call { base });

            let result = engine.run(
                vm,
                ctx,
                DispatchCall {
                    func: f,
                    frame,
                    args: args.to_vec(),
                    fiber: None,
                },
            );

            // On success the call entry is still ours to pop; unwinding
            // already released it on the error path.
            while vm.status_depth(ctx) > depth {
                let _ = crate::runtime::status::pop_entry(vm, ctx);
            }
            vm.context_mut(ctx).frames = saved_frames;

            match result? {
                DispatchOutcome::Return(v) => Ok(v),
                DispatchOutcome::Yield { .. } => {
                    Err(throw_type_error(vm, ctx, "yield outside of a fiber"))
                }
            }
        }
        Callee::Class => class_call(vm, ctx, f, args),
        Callee::Other => Err(throw_type_error(vm, ctx, "the value is not a function")),
    }
}

/// Calling a class allocates an instance through the class's allocator and
/// invokes `$init` on it; the instance is the call's value.
fn class_call(vm: &mut Vm, ctx: ContextId, class: Value, args: &[Value]) -> Result<Value, Thrown> {
    let r = class.as_ref().expect("class value");
    let alloc = match vm.heap().get(r) {
        HeapObj::Class(c) => c.alloc,
        _ => unreachable!(),
    };
    let inf = get_s(vm, ctx, class, StrId::Inf)?;

    let instance = alloc(vm, ctx, inf)?;
    let slot = vm.stack_push(ctx, instance);

    let result = (|| {
        let init_key = vm.string_id(StrId::Init);
        let init = get(vm, ctx, instance, init_key)?;
        if !init.is_null() {
            call(vm, ctx, init, instance, args)?;
        }
        Ok(instance)
    })();

    vm.stack_pop(ctx, slot);
    result
}

/// `get` then call, with `v` as `this`. A missing method is a type error.
pub fn call_method(vm: &mut Vm, ctx: ContextId, v: Value, name: Value, args: &[Value]) -> Result<Value, Thrown> {
    let f = get(vm, ctx, v, name)?;
    if f.is_null() {
        let shown = vm.str_value(name).unwrap_or("?").to_owned();
        return Err(throw_type_error(vm, ctx, format!("\"{shown}\" is not a function")));
    }
    call(vm, ctx, f, v, args)
}

/// Like [`call_method`], tolerating absence: a missing method yields null.
pub fn try_call_method(vm: &mut Vm, ctx: ContextId, v: Value, name: Value, args: &[Value]) -> Result<Value, Thrown> {
    let f = get(vm, ctx, v, name)?;
    if f.is_null() {
        return Ok(Value::Null);
    }
    call(vm, ctx, f, v, args)
}

// ---- equality and type tests -------------------------------------------

/// Value equality: strings by content, numbers by IEEE comparison, other
/// heap references by identity.
pub fn equal(vm: &Vm, v1: Value, v2: Value) -> bool {
    if let (Some(s1), Some(s2)) = (vm.str_value(v1), vm.str_value(v2)) {
        return s1 == s2;
    }

    match (v1, v2) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Ref(a), Value::Ref(b)) => a == b,
        _ => false,
    }
}

/// The class of a value: built-in classes for primitives, the interface's
/// `$class` backlink for objects.
pub fn type_of(vm: &mut Vm, ctx: ContextId, v: Value) -> Result<Value, Thrown> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Bool(_) => Ok(vm.object_id(ObjId::Bool)),
        Value::Number(_) => Ok(vm.object_id(ObjId::Number)),
        Value::Ref(r) => {
            if matches!(vm.heap().get(r), HeapObj::Str(_)) {
                return Ok(vm.object_id(ObjId::String));
            }
            let inf = interface_of(vm, v);
            if inf.is_null() {
                return Ok(Value::Null);
            }
            get_s(vm, ctx, inf, StrId::Class)
        }
    }
}

/// `instance_of`: primitives compare against their built-in class; objects
/// check whether their interface is, or has implemented, the class's
/// instance interface.
pub fn instance_of(vm: &mut Vm, ctx: ContextId, v: Value, class: Value) -> Result<bool, Thrown> {
    let Some(cr) = class.as_ref() else {
        return Ok(false);
    };
    if !matches!(vm.heap().get(cr), HeapObj::Class(_)) {
        return Ok(false);
    }

    match v {
        Value::Null => Ok(false),
        Value::Bool(_) => Ok(equal(vm, class, vm.object_id(ObjId::Bool))),
        Value::Number(_) => Ok(equal(vm, class, vm.object_id(ObjId::Number))),
        Value::Ref(r) => {
            if matches!(vm.heap().get(r), HeapObj::Str(_)) {
                return Ok(equal(vm, class, vm.object_id(ObjId::String)));
            }
            let inf = interface_of(vm, v);
            let cinf = get_s(vm, ctx, class, StrId::Inf)?;
            if inf.is_null() || cinf.is_null() {
                return Ok(false);
            }
            if inf == cinf {
                return Ok(true);
            }
            let (Some(ir), Some(cir)) = (inf.as_ref(), cinf.as_ref()) else {
                return Ok(false);
            };
            match vm.heap().get(ir) {
                HeapObj::Interface(i) => Ok(i.implements(cir)),
                _ => Ok(false),
            }
        }
    }
}

// ---- conversions --------------------------------------------------------

pub fn to_bool(v: Value) -> bool {
    v.truthy()
}

/// `to_number`: numbers pass through; everything else asks `$to_num`, and
/// silence means NaN.
pub fn to_number(vm: &mut Vm, ctx: ContextId, v: Value) -> Result<f64, Thrown> {
    if let Value::Number(n) = v {
        return Ok(n);
    }

    let key = vm.string_id(StrId::ToNum);
    let f = get(vm, ctx, v, key)?;
    if f.is_null() {
        return Ok(f64::NAN);
    }
    let n = call(vm, ctx, f, v, &[])?;
    match n {
        Value::Number(x) => Ok(x),
        _ => Err(throw_type_error(vm, ctx, "result of \"$to_num\" must be a number")),
    }
}

/// Default textual form of a number: integral values print without a
/// fraction, everything else uses the shortest round-trip form.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "nan".to_owned()
    } else if n.is_infinite() {
        if n > 0.0 { "inf".to_owned() } else { "-inf".to_owned() }
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// `to_string` protocol: primitives convert directly; objects try
/// `$to_str`, then `$to_num`, then fall back to `Object:<full name>`.
pub fn to_string(vm: &mut Vm, ctx: ContextId, v: Value) -> Result<Value, Thrown> {
    match v {
        Value::Null => Ok(vm.string_id(StrId::Empty)),
        Value::Bool(b) => Ok(vm.intern(if b { "true" } else { "false" })),
        Value::Number(n) => {
            let s = number_to_string(n);
            Ok(vm.new_string(&s))
        }
        Value::Ref(r) => {
            if matches!(vm.heap().get(r), HeapObj::Str(_)) {
                return Ok(v);
            }

            let key = vm.string_id(StrId::ToStr);
            let f = get(vm, ctx, v, key)?;
            if !f.is_null() {
                let s = call(vm, ctx, f, v, &[])?;
                if !vm.is_string(s) {
                    return Err(throw_type_error(vm, ctx, "result of \"$to_str\" must be a string"));
                }
                return Ok(s);
            }

            let key = vm.string_id(StrId::ToNum);
            let f = get(vm, ctx, v, key)?;
            if !f.is_null() {
                let n = call(vm, ctx, f, v, &[])?;
                let Value::Number(x) = n else {
                    return Err(throw_type_error(vm, ctx, "result of \"$to_num\" must be a number"));
                };
                let s = number_to_string(x);
                return Ok(vm.new_string(&s));
            }

            to_string_default(vm, ctx, v)
        }
    }
}

fn to_string_default(vm: &mut Vm, ctx: ContextId, v: Value) -> Result<Value, Thrown> {
    let name = full_name(vm, ctx, v, &mut Vec::new())?;
    let text = match name {
        Some(n) if !n.is_empty() => format!("Object:{n}"),
        _ => "Object".to_owned(),
    };
    Ok(vm.new_string(&text))
}

/// Dotted `$scope` path plus `$name`, with circular-reference detection.
fn full_name(vm: &mut Vm, ctx: ContextId, v: Value, seen: &mut Vec<Value>) -> Result<Option<String>, Thrown> {
    if seen.iter().any(|s| equal(vm, *s, v)) {
        return Err(throw_reference_error(vm, ctx, "circular reference"));
    }
    seen.push(v);

    let scope_key = vm.string_id(StrId::Scope);
    let scope = lookup(vm, ctx, v, scope_key)?;
    let mut out = String::new();
    if !scope.is_null()
        && let Some(outer) = full_name(vm, ctx, scope, seen)?
    {
        out.push_str(&outer);
        out.push('.');
    }

    let name_key = vm.string_id(StrId::Name);
    let name = lookup(vm, ctx, v, name_key)?;
    if name.is_null() && out.is_empty() {
        seen.pop();
        return Ok(None);
    }
    let name_str = to_string(vm, ctx, name)?;
    if let Some(s) = vm.str_value(name_str) {
        out.push_str(s);
    }

    seen.pop();
    Ok(Some(out))
}

/// Public form of the full-name walk.
pub fn get_full_name(vm: &mut Vm, ctx: ContextId, v: Value) -> Result<Value, Thrown> {
    let name = full_name(vm, ctx, v, &mut Vec::new())?.unwrap_or_default();
    Ok(vm.new_string(&name))
}

/// Formats a value through a packed format word (see
/// [`crate::runtime::format`]).
pub fn to_string_format(vm: &mut Vm, ctx: ContextId, v: Value, word: u32) -> Result<Value, Thrown> {
    let fmt = sout_format(word);
    let width = sout_width(word);
    let prec = sout_prec(word);

    let body = match fmt {
        SoutFormat::Str => {
            let s = to_string(vm, ctx, v)?;
            vm.str_value(s).unwrap_or("").to_owned()
        }
        SoutFormat::Char => {
            let n = to_number(vm, ctx, v)?;
            if !(0.0..=0x10ffff as f64).contains(&n) {
                return Err(throw_type_error(vm, ctx, "illegal unicode character"));
            }
            match char::from_u32(n as u32) {
                Some(c) => c.to_string(),
                None => {
                    return Err(throw_type_error(vm, ctx, "illegal unicode character"));
                }
            }
        }
        SoutFormat::Dec => {
            let n = to_number(vm, ctx, v)?;
            format!("{}", n as i64)
        }
        SoutFormat::UDec => {
            let n = to_number(vm, ctx, v)?;
            format!("{}", n as u64)
        }
        SoutFormat::Oct => {
            let n = to_number(vm, ctx, v)?;
            format!("{:o}", n as i64)
        }
        SoutFormat::Hex => {
            let n = to_number(vm, ctx, v)?;
            format!("{:x}", n as i64)
        }
        SoutFormat::Float => {
            let n = to_number(vm, ctx, v)?;
            let p = if prec == SOUT_PREC_DEFAULT { 6 } else { prec as usize };
            format!("{n:.p$}")
        }
        SoutFormat::Exp => {
            let n = to_number(vm, ctx, v)?;
            let p = if prec == SOUT_PREC_DEFAULT { 6 } else { prec as usize };
            format!("{n:.p$e}")
        }
        SoutFormat::Number => {
            let n = to_number(vm, ctx, v)?;
            number_to_string(n)
        }
    };

    let text = pad(body, width, word);
    Ok(vm.new_string(&text))
}

fn pad(body: String, width: u32, word: u32) -> String {
    if width == SOUT_WIDTH_DEFAULT || body.chars().count() >= width as usize {
        return body;
    }
    let fill = width as usize - body.chars().count();
    if word & SOUT_FL_ALIGN_HEAD != 0 {
        let mut out = body;
        out.extend(std::iter::repeat_n(' ', fill));
        out
    } else if word & SOUT_FL_ZERO != 0 {
        // Zeros go after the sign.
        let (sign, digits) = match body.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", body.as_str()),
        };
        let mut out = String::from(sign);
        out.extend(std::iter::repeat_n('0', fill));
        out.push_str(digits);
        out
    } else {
        let mut out = String::new();
        out.extend(std::iter::repeat_n(' ', fill));
        out.push_str(&body);
        out
    }
}

/// Invokes `$close`, tolerating its absence; used for iterators, inputs and
/// other scope-bound resources.
pub fn close(vm: &mut Vm, ctx: ContextId, v: Value) -> Result<(), Thrown> {
    if v.is_null() {
        return Ok(());
    }
    let key = vm.string_id(StrId::Close);
    try_call_method(vm, ctx, v, key, &[]).map(|_| ())
}

// ---- iterator protocol --------------------------------------------------

/// Produces an iterator for `v` through `$iter`; null iterates as empty.
pub fn iterator_new(vm: &mut Vm, ctx: ContextId, v: Value) -> Result<Value, Thrown> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let key = vm.string_id(StrId::Iter);
    call_method(vm, ctx, v, key, &[])
}

pub fn iterator_end(vm: &mut Vm, ctx: ContextId, iter: Value) -> Result<bool, Thrown> {
    if iter.is_null() {
        return Ok(true);
    }
    let key = vm.string_id(StrId::End);
    let v = get_throw(vm, ctx, iter, key)?;
    Ok(to_bool(v))
}

pub fn iterator_value(vm: &mut Vm, ctx: ContextId, iter: Value) -> Result<Value, Thrown> {
    let key = vm.string_id(StrId::Value);
    get_throw(vm, ctx, iter, key)
}

pub fn iterator_next(vm: &mut Vm, ctx: ContextId, iter: Value) -> Result<(), Thrown> {
    let key = vm.string_id(StrId::Next);
    call_method(vm, ctx, iter, key, &[]).map(|_| ())
}
