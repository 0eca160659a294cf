use thiserror::Error;

use crate::runtime::context::ContextId;
use crate::runtime::status::unwind_throw;
use crate::runtime::vm::{ObjId, Vm};
use crate::values::property::{PropKey, Property};
use crate::values::value::Value;

/// Marker for a raised script error.
///
/// The error value itself lives on the context (`Vm::current_error`); this
/// mirrors the C tri-state where `OX_ERR` meant "an error value has been set
/// on the context".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("script error raised")]
pub struct Thrown;

/// Built-in error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Error,
    Type,
    Range,
    Reference,
    Syntax,
    Null,
    System,
    NoMem,
}

impl ErrorKind {
    pub fn class_name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::Type => "TypeError",
            ErrorKind::Range => "RangeError",
            ErrorKind::Reference => "ReferenceError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Null => "NullError",
            ErrorKind::System => "SystemError",
            ErrorKind::NoMem => "NoMemError",
        }
    }

    pub(crate) fn class_id(self) -> ObjId {
        match self {
            ErrorKind::Error => ObjId::Error,
            ErrorKind::Type => ObjId::TypeError,
            ErrorKind::Range => ObjId::RangeError,
            ErrorKind::Reference => ObjId::ReferenceError,
            ErrorKind::Syntax => ObjId::SyntaxError,
            ErrorKind::Null => ObjId::NullError,
            ErrorKind::System => ObjId::SystemError,
            ErrorKind::NoMem => ObjId::NoMemError,
        }
    }

    pub(crate) fn inf_id(self) -> ObjId {
        match self {
            ErrorKind::Error => ObjId::ErrorInf,
            ErrorKind::Type => ObjId::TypeErrorInf,
            ErrorKind::Range => ObjId::RangeErrorInf,
            ErrorKind::Reference => ObjId::ReferenceErrorInf,
            ErrorKind::Syntax => ObjId::SyntaxErrorInf,
            ErrorKind::Null => ObjId::NullErrorInf,
            ErrorKind::System => ObjId::SystemErrorInf,
            ErrorKind::NoMem => ObjId::NoMemErrorInf,
        }
    }
}

/// Raises an arbitrary value: records it (and the frame chain, for stack
/// traces) on the context and unwinds the status stack to the nearest armed
/// `try` entry, running every cleanup on the way.
pub fn throw_value(vm: &mut Vm, ctx: ContextId, v: Value) -> Thrown {
    vm.set_error(ctx, v);
    unwind_throw(vm, ctx);
    Thrown
}

/// Builds an instance of the built-in error class for `kind` and raises it.
///
/// The instance carries `message` plus `file`/`line`/`function` metadata
/// when the active frame chain provides them.
pub fn throw_error(vm: &mut Vm, ctx: ContextId, kind: ErrorKind, message: impl Into<String>) -> Thrown {
    let message = message.into();
    log::debug!("throw {}: {}", kind.class_name(), message);

    let inf = vm.object_id(kind.inf_id());
    let obj_ref = vm.alloc_object(inf);
    let err = Value::Ref(obj_ref);
    // Root the error while the message string is created.
    let slot = vm.stack_push(ctx, err);

    let msg = vm.new_string(&message);
    if let Some(obj) = vm.heap_mut().get_mut(obj_ref).base_object_mut() {
        obj.put(PropKey::str("message"), Property::Var(msg));
    }

    if let Some((file, line, func)) = vm.frame_location(ctx) {
        // Write each piece as it is created; the error object roots them.
        let file_v = file.map(|f| vm.new_string(&f)).unwrap_or(Value::Null);
        if let Some(obj) = vm.heap_mut().get_mut(obj_ref).base_object_mut() {
            obj.put(PropKey::str("file"), Property::Var(file_v));
            obj.put(
                PropKey::str("line"),
                Property::Var(line.map(|l| Value::Number(l as f64)).unwrap_or(Value::Null)),
            );
        }
        let func_v = func.map(|f| vm.new_string(&f)).unwrap_or(Value::Null);
        if let Some(obj) = vm.heap_mut().get_mut(obj_ref).base_object_mut() {
            obj.put(PropKey::str("function"), Property::Var(func_v));
        }
    }

    vm.stack_pop(ctx, slot);
    throw_value(vm, ctx, err)
}

pub fn throw_type_error(vm: &mut Vm, ctx: ContextId, msg: impl Into<String>) -> Thrown {
    throw_error(vm, ctx, ErrorKind::Type, msg)
}

pub fn throw_range_error(vm: &mut Vm, ctx: ContextId, msg: impl Into<String>) -> Thrown {
    throw_error(vm, ctx, ErrorKind::Range, msg)
}

pub fn throw_reference_error(vm: &mut Vm, ctx: ContextId, msg: impl Into<String>) -> Thrown {
    throw_error(vm, ctx, ErrorKind::Reference, msg)
}

pub fn throw_syntax_error(vm: &mut Vm, ctx: ContextId, msg: impl Into<String>) -> Thrown {
    throw_error(vm, ctx, ErrorKind::Syntax, msg)
}

pub fn throw_null_error(vm: &mut Vm, ctx: ContextId, msg: impl Into<String>) -> Thrown {
    throw_error(vm, ctx, ErrorKind::Null, msg)
}

pub fn throw_system_error(vm: &mut Vm, ctx: ContextId, msg: impl Into<String>) -> Thrown {
    throw_error(vm, ctx, ErrorKind::System, msg)
}

pub fn throw_no_mem_error(vm: &mut Vm, ctx: ContextId) -> Thrown {
    throw_error(vm, ctx, ErrorKind::NoMem, "out of memory")
}

/// "the property \"k\" does not exist"
pub fn throw_null_property_error(vm: &mut Vm, ctx: ContextId, key: &PropKey) -> Thrown {
    let text = match key {
        PropKey::Str(s) => format!("the property \"{s}\" does not exist"),
        PropKey::Num(n) => format!("the property \"{}\" does not exist", n.0),
    };
    throw_error(vm, ctx, ErrorKind::Null, text)
}
