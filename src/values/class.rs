use crate::runtime::context::ContextId;
use crate::runtime::error::Thrown;
use crate::runtime::vm::Vm;
use crate::values::object::Object;
use crate::values::value::{ObjRef, Value};

/// Instance allocator used when the class is called.
///
/// Built-in classes install allocators producing their concrete kind (plain
/// object, array, regex, dictionary, ...); the argument is the class's
/// instance interface.
pub type AllocFn = fn(&mut Vm, ContextId, Value) -> Result<Value, Thrown>;

/// A callable value that allocates instances and invokes `$init` on them.
///
/// The class object carries `$inf` (its instance interface), `$name`, and
/// optionally `$scope` as ordinary properties; the interface carries the
/// `$class` backlink, so a class and its interface form a circular pair
/// reachable from either side.
#[derive(Debug)]
pub struct Class {
    pub obj: Object,
    pub(crate) alloc: AllocFn,
}

impl Class {
    pub fn new(obj: Object, alloc: AllocFn) -> Self {
        Class { obj, alloc }
    }

    pub fn set_alloc(&mut self, alloc: AllocFn) {
        self.alloc = alloc;
    }

    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        self.obj.trace(out);
    }
}
