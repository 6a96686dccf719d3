//! handle.rs — host-held value handles (§4.3 "Handles", GLOSSARY
//! "Handle": "host-held reference to a Value that keeps it alive via the
//! GC root set").
//!
//! `pocket-core` already provides the root-set plumbing (`gc::Handle`,
//! wrapping a bare `ObjRef`); this module is the thin `Value`-level
//! wrapper `Vm`'s embedders actually want, since a primitive `Value`
//! (`Null`, `Bool`, a `Number`) isn't heap-allocated and needs no rooting
//! at all. Releasing a handle is an explicit call, not a `Drop` guard — a
//! guard would need a live `&mut Heap` to release itself against, which a
//! value already moved out of scope doesn't have without an `Rc<RefCell<_>>`
//! `Heap`, which the single-owner `Vm` design doesn't use.

use crate::Vm;
use pocket_core::value::Value;

/// A live reference to a `Value`, keeping it alive across calls into the
/// VM until [`Vm::release_handle`] is called.
pub struct ValueHandle {
    value: Value,
    root: Option<pocket_core::gc::Handle>,
}

impl Vm {
    /// Roots `value` against collection (if it's an `Obj`) and returns a
    /// handle that can recover it later via [`Vm::handle_value`].
    pub fn create_handle(&mut self, value: Value) -> ValueHandle {
        let root = match value {
            Value::Obj(r) => Some(pocket_core::gc::Handle::new(self.heap_mut(), r)),
            _ => None,
        };
        ValueHandle { value, root }
    }

    /// The value a handle was created from.
    #[must_use]
    pub fn handle_value(&self, handle: &ValueHandle) -> Value {
        handle.value
    }

    /// Releases a handle's root, if it held one.
    pub fn release_handle(&mut self, handle: ValueHandle) {
        if let Some(root) = handle.root {
            root.release(self.heap_mut());
        }
    }
}
