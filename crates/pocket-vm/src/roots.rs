//! roots.rs — GC root #1 (active fiber chain) and #6 (compiler chain).
//!
//! Root #6 is a runtime no-op: by the time `pocket-vm` ever calls
//! `pocket_core::gc::collect`, compilation has already finished and no
//! compiler state exists to trace.

use pocket_core::gc::GcRoots;
use pocket_core::heap::ObjRef;

/// Every fiber currently on the Rust call stack (the top-level fiber a
/// host resumed, plus any it in turn resumed via `.run()`/`.resume()`).
/// Each ref is still resolvable through the heap — fibers are never
/// removed from their arena slot while running — so `heap.children_of`
/// does the actual tracing; this type only supplies the starting refs.
pub struct ActiveFiberRoots<'a> {
    pub fibers: &'a [ObjRef],
}

impl GcRoots for ActiveFiberRoots<'_> {
    fn mark_roots(&self, push: &mut dyn FnMut(ObjRef)) {
        for &r in self.fibers {
            push(r);
        }
    }
}
