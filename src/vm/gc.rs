//! Stop-the-world mark-and-sweep collection.
//!
//! White objects are unmarked, gray objects are marked and waiting on the
//! heap's worklist, black objects are marked and traced. A cycle marks the
//! roots, traces until no gray object is left, drops dead strings from the
//! intern table, and sweeps.

use std::time::Instant;

use serde::Serialize;

use super::{GcRef, Heap, Table, Value};

/// Enumerates the mutator's roots.
///
/// The collector knows nothing about the layout of the operand stack or the
/// call frames; it only walks these four sets.
pub trait RootSource {
    fn visit_stack(&self, visit: &mut dyn FnMut(Value));
    /// The closure of every active call frame.
    fn visit_frames(&self, visit: &mut dyn FnMut(GcRef));
    fn visit_open_upvalues(&self, visit: &mut dyn FnMut(GcRef));
    fn visit_globals(&self, visit: &mut dyn FnMut(GcRef, Value));

    /// Bytes of root-side buffers (such as the globals table) that count
    /// toward the heap size but are not objects.
    fn retained_bytes(&self) -> usize {
        0
    }
}

/// GC statistics accumulated across cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcStats {
    pub cycles: usize,
    pub objects_freed: usize,
    pub bytes_freed: usize,
    pub total_pause_us: u64,
    pub max_pause_us: u64,
}

/// Run one full collection cycle.
pub fn collect(heap: &mut Heap, roots: &dyn RootSource, strings: &mut Table, stats: &mut GcStats) {
    let start = Instant::now();
    let before = heap.bytes_allocated();
    log::debug!(target: "npa::gc", "-- gc begin");

    mark_roots(heap, roots);
    heap.trace_references();
    strings.remove_white(heap);
    let report = heap.sweep(strings.heap_size() + roots.retained_bytes());

    let pause_us = start.elapsed().as_micros() as u64;
    stats.cycles += 1;
    stats.objects_freed += report.freed_objects;
    stats.bytes_freed += report.freed_bytes;
    stats.total_pause_us += pause_us;
    stats.max_pause_us = stats.max_pause_us.max(pause_us);

    log::debug!(
        target: "npa::gc",
        "-- gc end: collected {} bytes (from {} to {}) next at {}",
        before.saturating_sub(heap.bytes_allocated()),
        before,
        heap.bytes_allocated(),
        heap.next_gc()
    );
}

fn mark_roots(heap: &mut Heap, roots: &dyn RootSource) {
    roots.visit_stack(&mut |value| heap.mark_value(value));
    roots.visit_frames(&mut |closure| heap.mark_object(closure));
    roots.visit_open_upvalues(&mut |upvalue| heap.mark_object(upvalue));
    roots.visit_globals(&mut |key, value| {
        heap.mark_object(key);
        heap.mark_value(value);
    });
}
