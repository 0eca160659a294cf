use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::memory::Heap;
use crate::runtime::builtins;
use crate::runtime::context::{Context, ContextId};
use crate::runtime::dispatch::Dispatch;
use crate::runtime::frame::Frame;
use crate::values::HeapObj;
use crate::values::object::Object;
use crate::values::string::OxStr;
use crate::values::value::{ObjRef, Value};

/// Pre-created strings the runtime itself needs on hot paths.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(usize)]
pub enum StrId {
    Empty,
    Class,
    Scope,
    Name,
    Inf,
    Init,
    Iter,
    ToStr,
    ToNum,
    Close,
    Next,
    End,
    Value,
    Length,
    Message,
}

impl StrId {
    pub const COUNT: usize = StrId::Message as usize + 1;

    pub fn text(self) -> &'static str {
        match self {
            StrId::Empty => "",
            StrId::Class => "$class",
            StrId::Scope => "$scope",
            StrId::Name => "$name",
            StrId::Inf => "$inf",
            StrId::Init => "$init",
            StrId::Iter => "$iter",
            StrId::ToStr => "$to_str",
            StrId::ToNum => "$to_num",
            StrId::Close => "$close",
            StrId::Next => "next",
            StrId::End => "end",
            StrId::Value => "value",
            StrId::Length => "length",
            StrId::Message => "message",
        }
    }

    fn all() -> [StrId; StrId::COUNT] {
        [
            StrId::Empty,
            StrId::Class,
            StrId::Scope,
            StrId::Name,
            StrId::Inf,
            StrId::Init,
            StrId::Iter,
            StrId::ToStr,
            StrId::ToNum,
            StrId::Close,
            StrId::Next,
            StrId::End,
            StrId::Value,
            StrId::Length,
            StrId::Message,
        ]
    }
}

/// Pre-created global objects: classes, their instance interfaces, and the
/// global namespace object.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(usize)]
pub enum ObjId {
    Global,
    Bool,
    BoolInf,
    Number,
    NumberInf,
    String,
    StringInf,
    Array,
    ArrayInf,
    ArrayIteratorInf,
    Object,
    ObjectInf,
    KeysIteratorInf,
    Iterator,
    IteratorInf,
    MapIteratorInf,
    SelectIteratorInf,
    Function,
    FunctionInf,
    Error,
    ErrorInf,
    TypeError,
    TypeErrorInf,
    RangeError,
    RangeErrorInf,
    ReferenceError,
    ReferenceErrorInf,
    SyntaxError,
    SyntaxErrorInf,
    NullError,
    NullErrorInf,
    SystemError,
    SystemErrorInf,
    NoMemError,
    NoMemErrorInf,
    Re,
    ReInf,
    Match,
    MatchInf,
    Dict,
    DictInf,
    DictIteratorInf,
    Set,
    SetInf,
    SetIteratorInf,
    Fiber,
    FiberInf,
}

impl ObjId {
    pub const COUNT: usize = ObjId::FiberInf as usize + 1;
}

/// The process-wide container: heap, interned strings, named tables, script
/// registry, global references, and the contexts operating on them.
///
/// A `Vm` is deliberately single-thread affine; the embedder serializes
/// access (one context per OS thread, quiesced around collection), which is
/// the VM-mutex model of the original runtime expressed through ownership.
pub struct Vm {
    heap: Heap,
    singleton_strings: HashMap<Box<str>, ObjRef>,
    strings: Vec<Value>,
    objects: Vec<Value>,
    scripts: HashMap<Box<str>, Value>,
    global_refs: HashMap<ObjRef, usize>,
    contexts: Vec<Option<Context>>,
    dispatch: Option<Rc<dyn Dispatch>>,
    collecting: bool,
    gc_enabled: bool,
    package_dirs: Vec<String>,
    install_dir: Option<String>,
    file_encoding: Option<String>,
    /// Host-populated package information map, scanned as a root.
    packages: Value,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        let mut vm = Vm {
            heap: Heap::new(),
            singleton_strings: HashMap::new(),
            strings: vec![Value::Null; StrId::COUNT],
            objects: vec![Value::Null; ObjId::COUNT],
            scripts: HashMap::new(),
            global_refs: HashMap::new(),
            contexts: Vec::new(),
            dispatch: None,
            collecting: false,
            gc_enabled: true,
            package_dirs: Vec::new(),
            install_dir: None,
            file_encoding: None,
            packages: Value::Null,
        };

        for id in StrId::all() {
            let v = vm.intern(id.text());
            vm.strings[id as usize] = v;
        }

        builtins::init(&mut vm);

        // Baseline the accounting: the built-in surface is what "survived
        // the previous collection" from here on.
        vm.collect();
        vm
    }

    // ---- contexts -------------------------------------------------------

    /// Acquires a context for the calling thread.
    pub fn acquire_context(&mut self) -> ContextId {
        for (i, c) in self.contexts.iter_mut().enumerate() {
            if c.is_none() {
                *c = Some(Context::new());
                return i;
            }
        }
        self.contexts.push(Some(Context::new()));
        self.contexts.len() - 1
    }

    pub fn release_context(&mut self, ctx: ContextId) {
        if let Some(slot) = self.contexts.get_mut(ctx) {
            *slot = None;
        }
    }

    pub fn context(&self, ctx: ContextId) -> &Context {
        self.contexts[ctx].as_ref().expect("released context")
    }

    pub fn context_mut(&mut self, ctx: ContextId) -> &mut Context {
        self.contexts[ctx].as_mut().expect("released context")
    }

    // ---- dispatch hook --------------------------------------------------

    /// Registers the external bytecode engine.
    pub fn set_dispatch(&mut self, d: Rc<dyn Dispatch>) {
        self.dispatch = Some(d);
    }

    pub(crate) fn dispatch(&self) -> Option<Rc<dyn Dispatch>> {
        self.dispatch.clone()
    }

    // ---- heap -----------------------------------------------------------

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Allocates a managed object, collecting first when the accounting
    /// threshold has been reached (so the unrooted newborn survives).
    pub fn alloc(&mut self, obj: HeapObj) -> ObjRef {
        if self.gc_enabled && !self.collecting && self.heap.wants_collect() {
            self.collect();
        }
        self.heap.alloc(obj)
    }

    /// Collection happens only at allocation points while enabled; the
    /// bootstrap disables it until the named tables hold every root.
    pub(crate) fn set_gc_enabled(&mut self, enabled: bool) {
        self.gc_enabled = enabled;
    }

    /// Allocates a plain object with the given interface.
    pub fn alloc_object(&mut self, inf: Value) -> ObjRef {
        self.alloc(HeapObj::Object(Object::new(inf)))
    }

    /// Runs a full collection: root scan, mark closure, sweep, then purges
    /// singleton-table entries whose string did not survive.
    pub fn collect(&mut self) {
        let before = self.heap.allocated();
        self.collecting = true;
        self.heap.begin_collect();

        // Global references.
        let pinned: Vec<ObjRef> = self.global_refs.keys().copied().collect();
        for r in pinned {
            self.heap.mark(r);
        }

        // Contexts: stacks (active and suspended), frame chains, current
        // error.
        for i in 0..self.contexts.len() {
            let Some(c) = &self.contexts[i] else { continue };
            let mut values: Vec<Value> = c.v_stack.clone();
            let mut frames = vec![c.frames, c.error_frames, c.main_frames];
            values.push(c.error);
            values.push(c.curr_script);
            let mut entry_refs = Vec::new();
            for e in &c.s_stack {
                e.trace(&mut entry_refs);
            }
            for world in &c.suspended {
                values.extend_from_slice(&world.v_stack);
                values.push(world.fiber);
                frames.push(world.frames);
                for e in &world.s_stack {
                    e.trace(&mut entry_refs);
                }
            }

            self.heap.mark_values(&values);
            for f in frames.into_iter().flatten() {
                self.heap.mark(f);
            }
            for r in entry_refs {
                self.heap.mark(r);
            }
        }

        // Named tables, the script registry, and the package state.
        let named: Vec<Value> = self
            .strings
            .iter()
            .chain(self.objects.iter())
            .chain(self.scripts.values())
            .chain(std::iter::once(&self.packages))
            .copied()
            .collect();
        self.heap.mark_values(&named);

        self.heap.scan_marked();
        self.heap.sweep();

        // Entries referenced only through the pool go away with their slot.
        let heap = &self.heap;
        self.singleton_strings.retain(|_, r| heap.is_live(*r));

        self.collecting = false;
        debug!(
            "gc: {} -> {} bytes, {} live objects",
            before,
            self.heap.allocated(),
            self.heap.live_count()
        );
    }

    // ---- strings --------------------------------------------------------

    /// Creates a fresh (non-interned) string value.
    pub fn new_string(&mut self, s: &str) -> Value {
        Value::Ref(self.alloc(HeapObj::Str(OxStr::new(s))))
    }

    /// Returns the interned string for `s`, creating it on first use.
    /// Interned strings compare equal by reference.
    pub fn intern(&mut self, s: &str) -> Value {
        if let Some(r) = self.singleton_strings.get(s) {
            return Value::Ref(*r);
        }
        let mut obj = OxStr::new(s);
        obj.singleton = true;
        let r = self.alloc(HeapObj::Str(obj));
        self.singleton_strings.insert(s.into(), r);
        Value::Ref(r)
    }

    /// Interns an existing string value in place, returning the canonical
    /// reference.
    pub fn intern_value(&mut self, v: Value) -> Value {
        match self.str_value(v) {
            Some(s) => {
                let owned = s.to_owned();
                self.intern(&owned)
            }
            None => v,
        }
    }

    pub fn str_value(&self, v: Value) -> Option<&str> {
        match self.heap.get(v.as_ref()?) {
            HeapObj::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_string(&self, v: Value) -> bool {
        self.str_value(v).is_some()
    }

    pub fn string_id(&self, id: StrId) -> Value {
        self.strings[id as usize]
    }

    pub fn object_id(&self, id: ObjId) -> Value {
        self.objects[id as usize]
    }

    pub(crate) fn set_object_id(&mut self, id: ObjId, v: Value) {
        self.objects[id as usize] = v;
    }

    // ---- global references ---------------------------------------------

    /// Pins a heap value as a collector root; each call nests.
    pub fn global_ref(&mut self, v: Value) {
        if let Value::Ref(r) = v {
            *self.global_refs.entry(r).or_insert(0) += 1;
        }
    }

    pub fn global_unref(&mut self, v: Value) {
        if let Value::Ref(r) = v
            && let Some(count) = self.global_refs.get_mut(&r)
        {
            *count -= 1;
            if *count == 0 {
                self.global_refs.remove(&r);
            }
        }
    }

    // ---- script registry ------------------------------------------------

    pub fn register_script(&mut self, path: &str, script: Value) {
        self.scripts.insert(path.into(), script);
    }

    pub fn lookup_script(&self, path: &str) -> Option<Value> {
        self.scripts.get(path).copied()
    }

    // ---- package state --------------------------------------------------
    //
    // Search directories, install root, and source encoding come from the
    // host; the core only carries them as data.

    pub fn add_package_dir(&mut self, dir: impl Into<String>) {
        self.package_dirs.push(dir.into());
    }

    pub fn package_dirs(&self) -> &[String] {
        &self.package_dirs
    }

    pub fn set_install_dir(&mut self, dir: impl Into<String>) {
        self.install_dir = Some(dir.into());
    }

    pub fn install_dir(&self) -> Option<&str> {
        self.install_dir.as_deref()
    }

    /// Source encoding for file inputs; `None` means UTF-8.
    pub fn set_file_encoding(&mut self, enc: Option<String>) {
        self.file_encoding = enc;
    }

    pub fn file_encoding(&self) -> Option<&str> {
        self.file_encoding.as_deref()
    }

    pub fn set_packages(&mut self, packages: Value) {
        self.packages = packages;
    }

    pub fn packages(&self) -> Value {
        self.packages
    }

    // ---- embedding value-stack API --------------------------------------

    /// Reserves a rooted variable on the context's value stack, returning
    /// its logical index.
    pub fn stack_push(&mut self, ctx: ContextId, v: Value) -> usize {
        let stack = &mut self.context_mut(ctx).v_stack;
        stack.push(v);
        stack.len() - 1
    }

    /// Reserves `n` rooted variables, returning the index of the first.
    pub fn stack_push_n(&mut self, ctx: ContextId, n: usize) -> usize {
        let stack = &mut self.context_mut(ctx).v_stack;
        let base = stack.len();
        stack.resize(base + n, Value::Null);
        base
    }

    /// Releases stack variables down to (and including) `idx`. Indices pop
    /// in reverse order of reservation.
    pub fn stack_pop(&mut self, ctx: ContextId, idx: usize) {
        let stack = &mut self.context_mut(ctx).v_stack;
        debug_assert!(idx < stack.len());
        stack.truncate(idx);
    }

    pub fn stack_get(&self, ctx: ContextId, idx: usize) -> Value {
        self.context(ctx).v_stack[idx]
    }

    pub fn stack_set(&mut self, ctx: ContextId, idx: usize, v: Value) {
        self.context_mut(ctx).v_stack[idx] = v;
    }

    // ---- frames ---------------------------------------------------------

    /// Pushes a new frame for `func` with `len` registers and makes it
    /// current.
    pub fn frame_push(&mut self, ctx: ContextId, func: Value, len: usize) -> ObjRef {
        let bot = self.context(ctx).frames;
        let frame = self.alloc(HeapObj::Frame(Frame::new(func, len, bot)));
        self.context_mut(ctx).frames = Some(frame);
        frame
    }

    pub fn frame_pop(&mut self, ctx: ContextId) {
        let Some(top) = self.context(ctx).frames else {
            return;
        };
        let bot = match self.heap.get(top) {
            HeapObj::Frame(f) => f.bot,
            _ => None,
        };
        self.context_mut(ctx).frames = bot;
    }

    pub fn current_frame(&self, ctx: ContextId) -> Option<ObjRef> {
        self.context(ctx).frames
    }

    /// The innermost frame whose callee is a script function, skipping
    /// native activations.
    pub fn function_frame(&self, ctx: ContextId) -> Option<ObjRef> {
        let mut cur = self.context(ctx).frames;
        while let Some(r) = cur {
            let HeapObj::Frame(f) = self.heap.get(r) else {
                return None;
            };
            if let Some(fr) = f.func.as_ref()
                && matches!(self.heap.get(fr), HeapObj::Function(_))
            {
                return Some(r);
            }
            cur = f.bot;
        }
        None
    }

    /// (file, line, function-name) metadata of the active script frame,
    /// when one exists.
    pub fn frame_location(
        &self,
        ctx: ContextId,
    ) -> Option<(Option<String>, Option<u16>, Option<String>)> {
        let frame_ref = self.function_frame(ctx)?;
        let HeapObj::Frame(frame) = self.heap.get(frame_ref) else {
            return None;
        };
        let ip = frame.ip.max(0) as u16;
        let HeapObj::Function(func) = self.heap.get(frame.func.as_ref()?) else {
            return None;
        };
        let name = func
            .obj
            .lookup(&crate::values::property::PropKey::str("$name"))
            .and_then(|p| match p {
                crate::values::property::Property::Const(v)
                | crate::values::property::Property::Var(v) => Some(*v),
                _ => None,
            })
            .and_then(|v| self.str_value(v).map(|s| s.to_owned()));

        let script_ref = func.script.as_ref()?;
        let HeapObj::Script(script) = self.heap.get(script_ref) else {
            return Some((None, None, name));
        };
        let file = self.str_value(script.path).map(|s| s.to_owned());
        let line = match &script.body {
            crate::runtime::script::ScriptBody::Bytecode(bc) => bc
                .funcs
                .get(func.sfunc)
                .and_then(|sf| sf.lookup_line(&bc.locs, ip)),
            _ => None,
        };
        Some((file, line, name))
    }

    // ---- status stack ---------------------------------------------------

    /// Registers a lifetime record to honor on scope exit; the external
    /// dispatch loop drives these around try blocks, iterators, and
    /// containers under construction.
    pub fn status_push(&mut self, ctx: ContextId, entry: crate::runtime::status::StatusEntry) {
        self.context_mut(ctx).s_stack.push(entry);
    }

    /// Pops the top status entry, running its cleanup.
    pub fn status_pop(&mut self, ctx: ContextId) -> Result<(), crate::runtime::error::Thrown> {
        crate::runtime::status::pop_entry(self, ctx)
    }

    pub fn status_depth(&self, ctx: ContextId) -> usize {
        self.context(ctx).s_stack.len()
    }

    pub fn status_top(&self, ctx: ContextId) -> Option<&crate::runtime::status::StatusEntry> {
        self.context(ctx).s_stack.last()
    }

    pub fn status_top_mut(
        &mut self,
        ctx: ContextId,
    ) -> Option<&mut crate::runtime::status::StatusEntry> {
        self.context_mut(ctx).s_stack.last_mut()
    }

    /// Enters a scheduling section; the matching `Sched` status entry
    /// decrements the counter when it pops.
    pub fn sched_enter(&mut self, ctx: ContextId) {
        self.context_mut(ctx).sched_count += 1;
    }

    // ---- errors ---------------------------------------------------------

    /// Records the thrown value and snapshots the frame chain for stack
    /// traces.
    pub fn set_error(&mut self, ctx: ContextId, v: Value) {
        let frames = self.context(ctx).frames;
        let c = self.context_mut(ctx);
        c.error = v;
        c.error_frames = frames;
    }

    pub fn current_error(&self, ctx: ContextId) -> Value {
        self.context(ctx).error
    }

    pub fn clear_error(&mut self, ctx: ContextId) {
        let c = self.context_mut(ctx);
        c.error = Value::Null;
        c.error_frames = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_identity_stable() {
        let mut vm = Vm::new();
        let a = vm.intern("hello");
        let b = vm.intern("hello");
        assert_eq!(a, b);

        let c = vm.new_string("hello");
        assert_ne!(a, c);
        assert_eq!(vm.str_value(a), vm.str_value(c));
    }

    #[test]
    fn collection_reclaims_unrooted_but_keeps_rooted() {
        let mut vm = Vm::new();
        let ctx = vm.acquire_context();

        let kept = vm.new_string("kept");
        let slot = vm.stack_push(ctx, kept);
        let lost = vm.new_string("lost");
        let lost_ref = lost.as_ref().unwrap();

        vm.collect();
        assert!(vm.heap().is_live(kept.as_ref().unwrap()));
        assert!(!vm.heap().is_live(lost_ref));

        vm.stack_pop(ctx, slot);
    }

    #[test]
    fn singleton_purged_when_pool_is_sole_referent() {
        let mut vm = Vm::new();
        let v = vm.intern("transient-singleton");
        let r = v.as_ref().unwrap();
        assert!(vm.heap().is_live(r));

        vm.collect();
        // Nothing but the pool referenced it: slot gone, pool entry gone.
        assert!(!vm.heap().is_live(r));
        let again = vm.intern("transient-singleton");
        assert_eq!(vm.str_value(again), Some("transient-singleton"));
    }

    #[test]
    fn global_ref_pins_across_collection() {
        let mut vm = Vm::new();
        let v = vm.new_string("pinned");
        vm.global_ref(v);
        vm.collect();
        assert!(vm.heap().is_live(v.as_ref().unwrap()));

        vm.global_unref(v);
        vm.collect();
        assert!(!vm.heap().is_live(v.as_ref().unwrap()));
    }
}
