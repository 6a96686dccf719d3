//! gc.rs — tri-color mark-and-sweep over the heap's object arena (§4.3).
//!
//! `collect` is the only entry point; it marks every root (the heap's own
//! modules map, primitive-class pointers, handle list, and temp-ref stack,
//! plus whatever extra roots the caller supplies via [`GcRoots`] — e.g. the
//! active fiber and compiler chain, which `pocket-core` doesn't know
//! about), then sweeps unmarked slots.

use crate::heap::{Heap, Obj, ObjRef};
use tracing::debug;

/// Extra GC roots the owner of a [`Heap`] contributes beyond what the heap
/// tracks itself (the active fiber's stack/frames, a compiler's in-progress
/// module and lexer tokens, …). `pocket-vm`/`pocket-compiler` implement
/// this; `pocket-core` stays unaware of either.
pub trait GcRoots {
    fn mark_roots(&self, push: &mut dyn FnMut(ObjRef));
}

/// No extra roots — useful for tests that only exercise the heap's own
/// root set (modules/handles/primitive classes/temp-refs).
pub struct NoExtraRoots;
impl GcRoots for NoExtraRoots {
    fn mark_roots(&self, _push: &mut dyn FnMut(ObjRef)) {}
}

/// Percentage over `bytes_allocated` used to compute the next collection
/// threshold (§4.3: `next_gc = max(MIN_HEAP, bytes_allocated*(100+fill)/100)`).
pub const DEFAULT_FILL_PERCENT: u64 = 75;

/// Run one full mark-and-sweep cycle. Returns the number of objects freed.
pub fn collect(heap: &mut Heap, extra_roots: &dyn GcRoots, fill_percent: u64) -> usize {
    collect_inner(heap, extra_roots, fill_percent)
}

fn collect_inner(heap: &mut Heap, extra_roots: &dyn GcRoots, fill_percent: u64) -> usize {
    let mut working_set: Vec<ObjRef> = Vec::new();

    // Root #3: handle list.
    for slot in 0..heap.handle_slots.len() as u32 {
        if let Some(r) = heap.handle_get(slot) {
            working_set.push(r);
        }
    }
    // Root #4: loaded modules.
    working_set.extend(heap.modules.values().copied());
    // Root #5: primitive-type class pointers.
    working_set.extend(heap.primitive_classes.iter().flatten().copied());
    // Root #2: temp-ref stack.
    working_set.extend(heap.temp_refs.iter().copied());
    // Root #1 and #6 (fiber/compiler chain): caller-supplied.
    extra_roots.mark_roots(&mut |r| working_set.push(r));

    // Tri-color sweep of the working set: pop, mark if unmarked, push
    // unmarked referents (§4.3 "Marking").
    let mut children_buf = Vec::new();
    while let Some(r) = working_set.pop() {
        if !heap.mark(r) {
            continue; // already marked — nothing new to trace
        }
        let Some(obj) = heap.get(r) else { continue };
        children_buf.clear();
        heap.children_of(obj, &mut children_buf);
        for child in children_buf.drain(..) {
            working_set.push(child);
        }
    }

    // Sweep: unmarked occupied slots are freed; marked ones are unmarked
    // for the next cycle.
    let occupied: Vec<u32> = heap.iter_occupied().map(|(i, _)| i).collect();
    let mut freed = 0usize;
    for index in occupied {
        if heap.is_marked(index) {
            heap.unmark(index);
        } else {
            let obj = heap.free_slot(index);
            finalize(obj);
            freed += 1;
        }
    }

    let bytes = heap.bytes_allocated() as u64;
    let next = (bytes * (100 + fill_percent) / 100).max(crate::heap::MIN_HEAP as u64);
    heap.set_next_gc(next as usize);

    debug!(freed, bytes_allocated = bytes, next_gc = next, "gc cycle");
    freed
}

/// Kind-specific teardown run during sweep, before the slot is reused
/// (§4.3 "Sweep": "kind-specific freeing ... runs foreign `delete_fn` for
/// Instances").
///
/// A foreign instance's `delete_fn` lives on its *class*, not on the
/// instance itself, and the class may already have been swept in this same
/// cycle by the time an instance slot is freed. `pocket-vm` resolves the
/// class and calls `native_delete` eagerly, before an instance becomes
/// unreachable, via its own teardown hook — mirroring the embedding ABI's
/// `delete_instance_fn` contract (§6.1) rather than reaching across
/// objects from inside the arena during sweep.
fn finalize(obj: Obj) {
    drop(obj);
}

/// A GC-root stack guard: pushes an [`ObjRef`] onto the heap's temp-ref
/// stack on construction, pops it on drop — including on an early return
/// or a `?`-propagated error (§9 "Manual temp-ref rooting": "The guard
/// must release on every exit path").
pub struct TempRefGuard<'h> {
    heap: &'h mut Heap,
}

impl<'h> TempRefGuard<'h> {
    pub fn new(heap: &'h mut Heap, r: ObjRef) -> Self {
        heap.push_temp_ref(r);
        Self { heap }
    }
}

impl Drop for TempRefGuard<'_> {
    fn drop(&mut self) {
        self.heap.pop_temp_ref();
    }
}

/// A host-held reference that keeps a value alive via the GC root set
/// (§4.3 "Handles", GLOSSARY "Handle"). Only meaningful for `Value::Obj`;
/// other value kinds don't need rooting and `Handle::new` is a no-op slot
/// for them.
pub struct Handle {
    slot: u32,
}

impl Handle {
    #[must_use]
    pub fn new(heap: &mut Heap, r: ObjRef) -> Self {
        Self {
            slot: heap.handle_alloc(r),
        }
    }

    #[must_use]
    pub fn get(&self, heap: &Heap) -> Option<ObjRef> {
        heap.handle_get(self.slot)
    }

    /// Unlink and free the handle's slot. Must be called by the host, or
    /// the referenced object is kept alive indefinitely (§4.3: "the host
    /// must release handles or leak").
    pub fn release(self, heap: &mut Heap) {
        heap.handle_release(self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{Obj, PkString};

    #[test]
    fn unreachable_object_is_swept() {
        let mut heap = Heap::new();
        let _r = heap.alloc(Obj::Str(PkString::new("garbage")));
        assert_eq!(heap.live_count(), 1);
        let freed = collect(&mut heap, &NoExtraRoots, DEFAULT_FILL_PERCENT);
        assert_eq!(freed, 1);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn handle_keeps_object_alive_across_collection() {
        let mut heap = Heap::new();
        let r = heap.alloc(Obj::Str(PkString::new("kept")));
        let handle = Handle::new(&mut heap, r);
        collect(&mut heap, &NoExtraRoots, DEFAULT_FILL_PERCENT);
        assert!(heap.get(r).is_some());
        handle.release(&mut heap);
        collect(&mut heap, &NoExtraRoots, DEFAULT_FILL_PERCENT);
        assert!(heap.get(r).is_none());
    }

    #[test]
    fn temp_ref_guard_survives_one_collection_then_releases() {
        let mut heap = Heap::new();
        let r = heap.alloc(Obj::Str(PkString::new("temp")));
        {
            let _guard = TempRefGuard::new(&mut heap, r);
            collect(&mut heap, &NoExtraRoots, DEFAULT_FILL_PERCENT);
            assert!(heap.get(r).is_some());
        }
        collect(&mut heap, &NoExtraRoots, DEFAULT_FILL_PERCENT);
        assert!(heap.get(r).is_none());
    }

    #[test]
    fn reachable_graph_survives() {
        let mut heap = Heap::new();
        let a = heap.alloc(Obj::Str(PkString::new("a")));
        let list = heap.alloc(Obj::List(crate::heap::PkList::with_values(vec![
            crate::value::Value::Obj(a),
        ])));
        let handle = Handle::new(&mut heap, list);
        collect(&mut heap, &NoExtraRoots, DEFAULT_FILL_PERCENT);
        assert!(heap.get(list).is_some());
        assert!(heap.get(a).is_some(), "list's element must be traced");
        handle.release(&mut heap);
    }

    proptest::proptest! {
        #[test]
        fn collection_keeps_exactly_the_rooted_objects(
            rooted in proptest::collection::vec(proptest::bool::ANY, 1..40)
        ) {
            let mut heap = Heap::new();
            let mut refs = Vec::with_capacity(rooted.len());
            let mut handles = Vec::new();
            for (i, &is_rooted) in rooted.iter().enumerate() {
                let r = heap.alloc(Obj::Str(PkString::new(format!("obj{i}"))));
                refs.push(r);
                if is_rooted {
                    handles.push(Handle::new(&mut heap, r));
                }
            }
            collect(&mut heap, &NoExtraRoots, DEFAULT_FILL_PERCENT);
            for (r, &is_rooted) in refs.iter().zip(rooted.iter()) {
                proptest::prop_assert_eq!(heap.get(*r).is_some(), is_rooted);
            }
            for h in handles {
                h.release(&mut heap);
            }
        }
    }
}
