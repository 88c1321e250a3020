use super::object::{ObjClosure, ObjFunction, ObjNative, ObjString, ObjUpvalue, Object};
use super::Value;
use crate::config::RuntimeConfig;

// =============================================================================
// GcRef - Reference to heap object
// =============================================================================

/// A reference to a heap object: the index of its slot in the heap.
///
/// Handles compare by identity. A handle to an object that has been swept
/// is stale; the slot may later be reused by a new allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcRef {
    index: usize,
}

impl GcRef {
    pub fn from_index(index: usize) -> Self {
        Self { index }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

// =============================================================================
// Heap - Slab of objects
// =============================================================================

#[derive(Debug)]
struct Slot {
    marked: bool,
    object: Object,
}

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub freed_objects: usize,
    pub freed_bytes: usize,
    pub live_bytes: usize,
}

/// The garbage-collected heap.
///
/// Objects live in a slab of slots. Iterating the slab enumerates every
/// allocation, which is all the sweep phase needs. Freed slots go on a free
/// list and are reused by later allocations.
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free_slots: Vec<usize>,
    /// Marked but not yet traced.
    gray: Vec<GcRef>,
    /// Bytes allocated (for GC threshold)
    bytes_allocated: usize,
    /// Collect once `bytes_allocated` exceeds this
    next_gc: usize,
    grow_factor: usize,
    min_threshold: usize,
    /// Hard limit on heap size (None = unlimited)
    heap_limit: Option<usize>,
    gc_enabled: bool,
    stress_gc: bool,
}

impl Heap {
    pub fn new() -> Self {
        Self::new_with_config(&RuntimeConfig::default())
    }

    pub fn new_with_config(config: &RuntimeConfig) -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            gray: Vec::new(),
            bytes_allocated: 0,
            next_gc: config.gc_min_threshold,
            grow_factor: config.gc_grow_factor.max(1),
            min_threshold: config.gc_min_threshold,
            heap_limit: config.heap_limit,
            gc_enabled: config.gc_enabled,
            stress_gc: config.stress_gc,
        }
    }

    /// Place an object in the heap. Never collects; callers decide that
    /// beforehand with [`should_gc`](Self::should_gc).
    pub fn insert(&mut self, object: Object) -> GcRef {
        let size = object.heap_size();
        let kind = object.object_type();
        self.bytes_allocated += size;

        let slot = Slot {
            marked: false,
            object,
        };
        let index = match self.free_slots.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        log::trace!(target: "npa::gc", "{} allocate {} for {}", index, size, kind.name());
        GcRef { index }
    }

    /// Record that an object's out-of-line buffers grew or shrank.
    pub fn account(&mut self, old_size: usize, new_size: usize) {
        self.bytes_allocated = (self.bytes_allocated + new_size).saturating_sub(old_size);
    }

    /// Check if GC should be triggered.
    pub fn should_gc(&self) -> bool {
        self.gc_enabled && (self.stress_gc || self.bytes_allocated > self.next_gc)
    }

    /// Whether allocating `additional` more bytes would cross the hard limit.
    pub fn would_exceed_limit(&self, additional: usize) -> bool {
        self.heap_limit
            .is_some_and(|limit| self.bytes_allocated + additional > limit)
    }

    pub fn heap_limit(&self) -> Option<usize> {
        self.heap_limit
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn next_gc(&self) -> usize {
        self.next_gc
    }

    pub fn gc_enabled(&self) -> bool {
        self.gc_enabled
    }

    /// Number of live (not yet swept) objects.
    pub fn object_count(&self) -> usize {
        self.slots.len() - self.free_slots.len()
    }

    pub fn contains(&self, r: GcRef) -> bool {
        self.slot(r).is_some()
    }

    /// Every allocated object, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (GcRef, &Object)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref().map(|slot| (GcRef { index }, &slot.object))
        })
    }

    fn slot(&self, r: GcRef) -> Option<&Slot> {
        self.slots.get(r.index).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, r: GcRef) -> Option<&mut Slot> {
        self.slots.get_mut(r.index).and_then(Option::as_mut)
    }

    pub fn get(&self, r: GcRef) -> Option<&Object> {
        self.slot(r).map(|slot| &slot.object)
    }

    pub fn get_mut(&mut self, r: GcRef) -> Option<&mut Object> {
        self.slot_mut(r).map(|slot| &mut slot.object)
    }

    pub fn string(&self, r: GcRef) -> Option<&ObjString> {
        match self.get(r)? {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn function(&self, r: GcRef) -> Option<&ObjFunction> {
        match self.get(r)? {
            Object::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn function_mut(&mut self, r: GcRef) -> Option<&mut ObjFunction> {
        match self.get_mut(r)? {
            Object::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn native(&self, r: GcRef) -> Option<&ObjNative> {
        match self.get(r)? {
            Object::Native(n) => Some(n),
            _ => None,
        }
    }

    pub fn closure(&self, r: GcRef) -> Option<&ObjClosure> {
        match self.get(r)? {
            Object::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn closure_mut(&mut self, r: GcRef) -> Option<&mut ObjClosure> {
        match self.get_mut(r)? {
            Object::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn upvalue(&self, r: GcRef) -> Option<&ObjUpvalue> {
        match self.get(r)? {
            Object::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn upvalue_mut(&mut self, r: GcRef) -> Option<&mut ObjUpvalue> {
        match self.get_mut(r)? {
            Object::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    /// Hash used when `r` is a table key: the cached content hash for
    /// strings, the handle itself for anything else.
    pub fn hash_of(&self, r: GcRef) -> u32 {
        match self.string(r) {
            Some(s) => s.hash(),
            None => (r.index as u32).wrapping_mul(0x9E37_79B9),
        }
    }

    // =========================================================================
    // Mark and sweep primitives
    // =========================================================================

    pub fn is_marked(&self, r: GcRef) -> bool {
        self.slot(r).is_some_and(|slot| slot.marked)
    }

    /// Gray an object. Stale handles and already marked objects are ignored.
    pub fn mark_object(&mut self, r: GcRef) {
        let Some(slot) = self.slot_mut(r) else {
            return;
        };
        if slot.marked {
            return;
        }
        slot.marked = true;
        self.gray.push(r);
        log::trace!(target: "npa::gc", "{} mark", r.index);
    }

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(r) = value {
            self.mark_object(r);
        }
    }

    /// Drain the gray worklist, blackening each object by marking what it
    /// refers to.
    pub fn trace_references(&mut self) {
        while let Some(r) = self.gray.pop() {
            let children = match self.get(r) {
                Some(object) => object.references(),
                None => continue,
            };
            log::trace!(target: "npa::gc", "{} blacken", r.index);
            for child in children {
                self.mark_object(child);
            }
        }
    }

    /// Free every unmarked object and clear the mark on survivors.
    ///
    /// `retained_bytes` covers buffers the heap accounts for but does not
    /// own (the intern and globals tables). They survive the cycle, so they
    /// count toward the live size the next threshold is computed from.
    pub fn sweep(&mut self, retained_bytes: usize) -> SweepReport {
        let mut report = SweepReport::default();

        for index in 0..self.slots.len() {
            let Some(slot) = self.slots[index].as_mut() else {
                continue;
            };
            let size = slot.object.heap_size();
            if slot.marked {
                slot.marked = false;
                report.live_bytes += size;
            } else {
                log::trace!(
                    target: "npa::gc",
                    "{} free type {}",
                    index,
                    slot.object.object_type().name()
                );
                self.slots[index] = None;
                self.free_slots.push(index);
                report.freed_objects += 1;
                report.freed_bytes += size;
            }
        }

        self.bytes_allocated = report.live_bytes + retained_bytes;
        self.next_gc = (self.bytes_allocated * self.grow_factor).max(self.min_threshold);
        report
    }

    // =========================================================================
    // Printing
    // =========================================================================

    /// Render a value the way `print` shows it.
    pub fn format_value(&self, value: Value) -> String {
        match value {
            Value::Obj(r) => self.format_object(r),
            other => other.to_string(),
        }
    }

    fn format_object(&self, r: GcRef) -> String {
        match self.get(r) {
            Some(Object::String(s)) => s.as_str().to_string(),
            Some(Object::Function(f)) => self.format_function(f),
            Some(Object::Native(_)) => "<native fn>".to_string(),
            Some(Object::Closure(c)) => match self.function(c.function) {
                Some(f) => self.format_function(f),
                None => "<fn ?>".to_string(),
            },
            Some(Object::Upvalue(_)) => "upvalue".to_string(),
            None => format!("<freed {}>", r.index),
        }
    }

    fn format_function(&self, function: &ObjFunction) -> String {
        match function.name.and_then(|name| self.string(name)) {
            Some(name) => format!("<fn {}>", name.as_str()),
            None => "<script>".to_string(),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
