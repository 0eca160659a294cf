use log::debug;

use crate::values::HeapObj;
use crate::values::value::{ObjRef, Value};

/// Memory size at which collection first becomes eligible.
const GC_START_SIZE: usize = 64 * 1024;
/// Initial capacity of the marked-object stack.
const MARK_STACK_INIT: usize = 64;
/// Full passes over the heap before the mark stack grows.
const MARK_OVERFLOW_LIMIT: u32 = 5;

struct Slot {
    obj: Option<Box<HeapObj>>,
    marked: bool,
    scanned: bool,
    size: usize,
}

/// The accounted object arena.
///
/// Slots are reused through a free list; an [`ObjRef`] is a slot index and
/// stays valid for the object's whole lifetime. Collection itself lives
/// here; root discovery is the VM's job (see [`crate::runtime::vm::Vm::collect`]).
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    mem_allocated: usize,
    mem_peak: usize,
    gc_start_size: usize,
    gc_last_size: usize,
    mark_stack: Vec<ObjRef>,
    mark_capacity: usize,
    mark_overflow: bool,
    scan_count: u32,
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            mem_allocated: 0,
            mem_peak: 0,
            gc_start_size: GC_START_SIZE,
            gc_last_size: 0,
            mark_stack: Vec::with_capacity(MARK_STACK_INIT),
            mark_capacity: MARK_STACK_INIT,
            mark_overflow: false,
            scan_count: 0,
        }
    }

    /// Currently accounted bytes.
    pub fn allocated(&self) -> usize {
        self.mem_allocated
    }

    /// High-water mark of accounted bytes.
    pub fn peak_allocated(&self) -> usize {
        self.mem_peak
    }

    /// Number of live objects.
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// True when the accounting says a collection is due: the current size
    /// passed the start threshold and grew past 4/3 of what survived the
    /// previous collection.
    pub fn wants_collect(&self) -> bool {
        self.mem_allocated >= self.gc_start_size
            && self.mem_allocated * 3 > self.gc_last_size * 4
    }

    pub fn alloc(&mut self, obj: HeapObj) -> ObjRef {
        let size = obj.size_hint();
        self.mem_allocated += size;
        if self.mem_allocated > self.mem_peak {
            self.mem_peak = self.mem_allocated;
        }

        if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.obj = Some(Box::new(obj));
            slot.marked = false;
            slot.scanned = false;
            slot.size = size;
            ObjRef(idx)
        } else {
            self.slots.push(Slot {
                obj: Some(Box::new(obj)),
                marked: false,
                scanned: false,
                size,
            });
            ObjRef((self.slots.len() - 1) as u32)
        }
    }

    pub fn get(&self, r: ObjRef) -> &HeapObj {
        self.slots[r.index()]
            .obj
            .as_deref()
            .expect("dangling heap reference")
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut HeapObj {
        self.slots[r.index()]
            .obj
            .as_deref_mut()
            .expect("dangling heap reference")
    }

    pub fn is_live(&self, r: ObjRef) -> bool {
        self.slots
            .get(r.index())
            .is_some_and(|s| s.obj.is_some())
    }

    /// Moves the object out of its slot, leaving the slot live but empty.
    /// Used by the fiber machinery to sidestep aliasing while its stacks are
    /// swapped in; callers must put the object back with [`Heap::restore`].
    pub(crate) fn take(&mut self, r: ObjRef) -> Box<HeapObj> {
        self.slots[r.index()]
            .obj
            .take()
            .expect("dangling heap reference")
    }

    pub(crate) fn restore(&mut self, r: ObjRef, obj: Box<HeapObj>) {
        let slot = &mut self.slots[r.index()];
        debug_assert!(slot.obj.is_none());
        slot.obj = Some(obj);
    }

    /// Marks one object, pushing it for scanning when the mark stack has
    /// room. A full stack only sets the overflow flag; the scan loop
    /// compensates with extra passes, so marking never recurses and deep
    /// graphs cannot overflow the call stack.
    pub(crate) fn mark(&mut self, r: ObjRef) {
        let slot = &mut self.slots[r.index()];
        if slot.obj.is_none() || slot.marked {
            return;
        }
        slot.marked = true;

        if self.mark_stack.len() < self.mark_capacity {
            self.mark_stack.push(r);
        } else {
            self.mark_overflow = true;
        }
    }

    pub(crate) fn mark_value(&mut self, v: Value) {
        if let Value::Ref(r) = v {
            self.mark(r);
        }
    }

    pub(crate) fn mark_values(&mut self, vs: &[Value]) {
        for v in vs {
            if let Value::Ref(r) = v {
                self.mark(*r);
            }
        }
    }

    pub(crate) fn begin_collect(&mut self) {
        self.mark_overflow = false;
        self.scan_count = 0;
        self.mark_stack.clear();
    }

    /// Mark closure: drains the mark stack, tracing each object once. When
    /// the stack overflowed, walks the whole heap for marked-but-unscanned
    /// objects and repeats; repeated overflows double the stack capacity.
    pub(crate) fn scan_marked(&mut self) {
        let mut scratch: Vec<ObjRef> = Vec::new();

        loop {
            while let Some(r) = self.mark_stack.pop() {
                let slot = &mut self.slots[r.index()];
                slot.scanned = true;

                scratch.clear();
                if let Some(obj) = slot.obj.as_deref() {
                    obj.trace(&mut scratch);
                }
                for child in &scratch {
                    self.mark(*child);
                }
            }

            if !self.mark_overflow {
                break;
            }

            self.mark_overflow = false;
            self.scan_count += 1;

            if self.scan_count > MARK_OVERFLOW_LIMIT {
                self.mark_capacity *= 2;
                debug!("expand GC mark stack to {} entries", self.mark_capacity);
                self.scan_count = 0;
            }

            for idx in 0..self.slots.len() {
                let slot = &self.slots[idx];
                if slot.obj.is_some() && slot.marked && !slot.scanned {
                    self.slots[idx].scanned = true;

                    scratch.clear();
                    if let Some(obj) = self.slots[idx].obj.as_deref() {
                        obj.trace(&mut scratch);
                    }
                    for child in &scratch {
                        self.mark(*child);
                    }
                }
            }
        }
    }

    /// Frees every unmarked object and clears the flag bits on survivors.
    pub(crate) fn sweep(&mut self) {
        for idx in 0..self.slots.len() {
            let slot = &mut self.slots[idx];
            if slot.obj.is_none() {
                continue;
            }
            if slot.marked {
                slot.marked = false;
                slot.scanned = false;
            } else {
                slot.obj = None;
                self.mem_allocated = self.mem_allocated.saturating_sub(slot.size);
                slot.size = 0;
                self.free.push(idx as u32);
            }
        }
        self.gc_last_size = self.mem_allocated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::object::Object;
    use crate::values::string::OxStr;

    #[test]
    fn alloc_reuses_free_slots() {
        let mut heap = Heap::new();
        let a = heap.alloc(HeapObj::Str(OxStr::new("a")));
        let b = heap.alloc(HeapObj::Str(OxStr::new("b")));
        assert_ne!(a, b);

        // Nothing marked: everything goes away.
        heap.begin_collect();
        heap.scan_marked();
        heap.sweep();
        assert_eq!(heap.live_count(), 0);

        let c = heap.alloc(HeapObj::Str(OxStr::new("c")));
        assert!(c == a || c == b);
    }

    #[test]
    fn mark_keeps_reachable_graph() {
        let mut heap = Heap::new();
        let child = heap.alloc(HeapObj::Str(OxStr::new("kept")));
        let mut obj = Object::new(Value::Null);
        obj.put(
            crate::values::property::PropKey::str("k"),
            crate::values::property::Property::Var(Value::Ref(child)),
        );
        let parent = heap.alloc(HeapObj::Object(obj));
        let garbage = heap.alloc(HeapObj::Str(OxStr::new("gone")));

        heap.begin_collect();
        heap.mark(parent);
        heap.scan_marked();
        heap.sweep();

        assert!(heap.is_live(parent));
        assert!(heap.is_live(child));
        assert!(!heap.is_live(garbage));
    }

    #[test]
    fn mark_stack_overflow_recovers() {
        let mut heap = Heap::new();
        // One object fanning out to far more children than the mark stack
        // holds, forcing the overflow pass.
        let mut obj = Object::new(Value::Null);
        for i in 0..(MARK_STACK_INIT * 4) {
            let child = heap.alloc(HeapObj::Str(OxStr::new(format!("c{i}"))));
            obj.put(
                crate::values::property::PropKey::from(i),
                crate::values::property::Property::Var(Value::Ref(child)),
            );
        }
        let head = heap.alloc(HeapObj::Object(obj));
        let live_before = heap.live_count();

        heap.begin_collect();
        heap.mark(head);
        heap.scan_marked();
        heap.sweep();

        assert_eq!(heap.live_count(), live_before);
    }
}
