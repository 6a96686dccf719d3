//! abi.rs — the slot-based embedding surface (§6.1) a Rust host uses to
//! call into scripts, inspect/construct values, and register foreign
//! (host-backed) classes.
//!
//! A dedicated [`Abi`] type covers §6.1's listed operation groups
//! (argument inspection, slot allocation, containers, call/attribute,
//! foreign classes). Slots here are a scratch value buffer owned by the
//! `Abi` itself, not a live fiber's data stack — a deliberate
//! simplification (see `DESIGN.md`) that keeps host-side value exchange
//! decoupled from whichever fiber happens to be running.
//!
//! Dynamic-library module loading (§6.2) is out of scope: this crate
//! `#![forbid(unsafe_code)]`, and `dlopen`-ing a shared object and trusting
//! its exported symbols is inherently unsafe. A host that needs native
//! modules registers them directly through [`Abi::register_foreign_class`]
//! and `Vm::heap_mut()` instead of loading them from a `.so`/`.dll`.

use crate::error::RuntimeError;
use crate::interp::{self, Ctx};
use crate::value_ops;
use crate::Vm;
use pocket_core::heap::class::{NativeDeleteFn, NativeNewFn};
use pocket_core::heap::{ClassObj, ClassOf, FiberObj, Heap, Obj, ObjRef, PkList, PkMap, PkRange};
use pocket_core::value::Value;

/// An index into an [`Abi`]'s scratch slot array (§6.1 "Slot allocation").
pub type Slot = usize;

/// The host-facing embedding handle: value exchange slots plus the calls
/// §6.1 groups under "Call/attribute" and "Foreign classes".
pub struct Abi<'a> {
    vm: &'a mut Vm,
    slots: Vec<Value>,
}

impl<'a> Abi<'a> {
    /// Borrows `vm` for one embedding-call sequence, starting with an
    /// empty slot array.
    pub fn new(vm: &'a mut Vm) -> Self {
        Self { vm, slots: Vec::new() }
    }

    fn ctx(&mut self) -> Ctx<'_> {
        self.vm.ctx()
    }

    // ---------------------------------------------------------------
    // Slot allocation / argument inspection (§6.1)
    // ---------------------------------------------------------------

    /// Grows the slot array so indices `0..n` are valid, padding with
    /// `null`.
    pub fn ensure_slots(&mut self, n: usize) {
        if self.slots.len() < n {
            self.slots.resize(n, Value::Null);
        }
    }

    /// Current slot count (the "argc" of a host-initiated call sequence).
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn get_slot(&self, slot: Slot) -> Value {
        self.slots[slot]
    }

    pub fn set_slot(&mut self, slot: Slot, v: Value) {
        self.ensure_slots(slot + 1);
        self.slots[slot] = v;
    }

    pub fn set_slot_null(&mut self, slot: Slot) {
        self.set_slot(slot, Value::Null);
    }

    pub fn set_slot_bool(&mut self, slot: Slot, b: bool) {
        self.set_slot(slot, Value::Bool(b));
    }

    pub fn set_slot_double(&mut self, slot: Slot, n: f64) {
        self.set_slot(slot, Value::Num(n));
    }

    pub fn set_slot_string(&mut self, slot: Slot, s: &str) {
        let v = interp::str_value(&mut self.ctx(), s);
        self.set_slot(slot, v);
    }

    /// The runtime type name of `slot`'s value, as the interpreter itself
    /// reports it (`TypeError`'s `kind`, `type_of()`'s result, …).
    #[must_use]
    pub fn slot_type(&self, slot: Slot) -> String {
        value_ops::kind_name(self.vm.heap(), &self.slots[slot])
    }

    pub fn validate_number(&self, slot: Slot) -> Result<f64, RuntimeError> {
        self.slots[slot].as_num().ok_or_else(|| RuntimeError::TypeError {
            op: "expected Number".into(),
            kind: self.slot_type(slot),
        })
    }

    pub fn validate_bool(&self, slot: Slot) -> Result<bool, RuntimeError> {
        match self.slots[slot] {
            Value::Bool(b) => Ok(b),
            _ => Err(RuntimeError::TypeError { op: "expected Bool".into(), kind: self.slot_type(slot) }),
        }
    }

    pub fn validate_string(&self, slot: Slot) -> Result<String, RuntimeError> {
        match self.slots[slot].as_obj().and_then(|r| self.vm.heap().get(r)) {
            Some(Obj::Str(s)) => Ok(s.as_str().to_string()),
            _ => Err(RuntimeError::TypeError { op: "expected String".into(), kind: self.slot_type(slot) }),
        }
    }

    pub fn validate_instance_of(&self, slot: Slot, class: ObjRef) -> Result<(), RuntimeError> {
        if value_ops::is_instance_of(self.vm.heap(), &self.slots[slot], class) {
            Ok(())
        } else {
            Err(RuntimeError::TypeError { op: "expected instance".into(), kind: self.slot_type(slot) })
        }
    }

    /// The class used for method/attribute resolution on `slot`'s value.
    #[must_use]
    pub fn get_class(&self, slot: Slot) -> Option<ObjRef> {
        interp::class_of_ref(self.vm.heap(), &self.slots[slot])
    }

    #[must_use]
    pub fn is_instance_of(&self, slot: Slot, class: ObjRef) -> bool {
        value_ops::is_instance_of(self.vm.heap(), &self.slots[slot], class)
    }

    // ---------------------------------------------------------------
    // Containers (§6.1)
    // ---------------------------------------------------------------

    pub fn new_list(&mut self, dst: Slot) {
        let r = interp::gc_alloc(&mut self.ctx(), Obj::List(PkList::new()));
        self.set_slot(dst, Value::Obj(r));
    }

    pub fn new_map(&mut self, dst: Slot) {
        let r = interp::gc_alloc(&mut self.ctx(), Obj::Map(PkMap::new()));
        self.set_slot(dst, Value::Obj(r));
    }

    pub fn new_range(&mut self, dst: Slot, from: f64, to: f64) {
        let r = interp::gc_alloc(&mut self.ctx(), Obj::Range(PkRange::new(from, to)));
        self.set_slot(dst, Value::Obj(r));
    }

    /// Appends `value_slot`'s value to the list at `list_slot`.
    pub fn list_insert(&mut self, list_slot: Slot, value_slot: Slot) -> Result<(), RuntimeError> {
        let v = self.slots[value_slot];
        let Value::Obj(r) = self.slots[list_slot] else {
            return Err(RuntimeError::TypeError { op: "list_insert".into(), kind: self.slot_type(list_slot) });
        };
        match self.vm.heap_mut().get_mut(r) {
            Some(Obj::List(l)) => {
                l.push(v);
                Ok(())
            }
            _ => Err(RuntimeError::TypeError { op: "list_insert".into(), kind: self.slot_type(list_slot) }),
        }
    }

    /// Removes and returns the element at `index` (Python-style negative
    /// indices allowed), writing it to `dst`.
    pub fn list_pop(&mut self, list_slot: Slot, index: i64, dst: Slot) -> Result<(), RuntimeError> {
        let Value::Obj(r) = self.slots[list_slot] else {
            return Err(RuntimeError::TypeError { op: "list_pop".into(), kind: self.slot_type(list_slot) });
        };
        let len = match self.vm.heap().get(r) {
            Some(Obj::List(l)) => l.len(),
            _ => return Err(RuntimeError::TypeError { op: "list_pop".into(), kind: self.slot_type(list_slot) }),
        };
        let i = if index < 0 { len as i64 + index } else { index };
        if i < 0 || i as usize >= len {
            return Err(RuntimeError::IndexOutOfBounds { index, len });
        }
        let removed = match self.vm.heap_mut().get_mut(r) {
            Some(Obj::List(l)) => l.remove(i as usize),
            _ => None,
        };
        self.set_slot(dst, removed.unwrap_or(Value::Null));
        Ok(())
    }

    pub fn list_len(&self, list_slot: Slot) -> Result<usize, RuntimeError> {
        match self.slots[list_slot].as_obj().and_then(|r| self.vm.heap().get(r)) {
            Some(Obj::List(l)) => Ok(l.len()),
            _ => Err(RuntimeError::TypeError { op: "list_len".into(), kind: self.slot_type(list_slot) }),
        }
    }

    // ---------------------------------------------------------------
    // Call / attribute (§6.1)
    // ---------------------------------------------------------------

    /// Calls the closure at `fn_slot` with `arg_slots`' values, writing
    /// the result to `dst`. Runs on a throwaway scratch fiber — §4.9
    /// fibers are cooperative and single-threaded, so a host-initiated
    /// call never races whatever fiber the VM was last driving.
    pub fn call_function(&mut self, fn_slot: Slot, arg_slots: &[Slot], dst: Slot) -> Result<(), RuntimeError> {
        let callee = self.slots[fn_slot];
        let Value::Obj(closure) = callee else {
            return Err(RuntimeError::NotCallable(self.slot_type(fn_slot)));
        };
        let args: Vec<Value> = arg_slots.iter().map(|&s| self.slots[s]).collect();
        let scratch = self.vm.heap_mut().alloc(Obj::Fiber(FiberObj::new(closure)));
        let result = {
            let mut ctx = self.ctx();
            interp::invoke(&mut ctx, scratch, closure, None, &args)
                .map(|()| interp::pop_value(&mut ctx, scratch))
        }?;
        self.set_slot(dst, result);
        Ok(())
    }

    /// Resolves and calls `name` on `recv_slot`'s value (its class's own
    /// method chain only — no intrinsic-method fallback, since those are
    /// reached through bytecode `METHOD_CALL`, not the embedding ABI).
    pub fn call_method(&mut self, recv_slot: Slot, name: &str, arg_slots: &[Slot], dst: Slot) -> Result<(), RuntimeError> {
        let recv = self.slots[recv_slot];
        let cls = interp::class_of_ref(self.vm.heap(), &recv)
            .ok_or_else(|| RuntimeError::NoSuchMethod { kind: self.slot_type(recv_slot), method: name.to_string() })?;
        let method = self
            .vm
            .heap()
            .resolve_method(cls, name)
            .ok_or_else(|| RuntimeError::NoSuchMethod { kind: self.slot_type(recv_slot), method: name.to_string() })?;
        let args: Vec<Value> = arg_slots.iter().map(|&s| self.slots[s]).collect();
        let scratch = self.vm.heap_mut().alloc(Obj::Fiber(FiberObj::new(method)));
        let result = {
            let mut ctx = self.ctx();
            interp::invoke(&mut ctx, scratch, method, Some(recv), &args)
                .map(|()| interp::pop_value(&mut ctx, scratch))
        }?;
        self.set_slot(dst, result);
        Ok(())
    }

    pub fn get_attrib(&mut self, recv_slot: Slot, name: &str, dst: Slot) -> Result<(), RuntimeError> {
        let recv = self.slots[recv_slot];
        let v = interp::get_attrib(&mut self.ctx(), recv, name)?;
        self.set_slot(dst, v);
        Ok(())
    }

    pub fn set_attrib(&mut self, recv_slot: Slot, name: &str, value_slot: Slot) -> Result<(), RuntimeError> {
        let recv = self.slots[recv_slot];
        let value = self.slots[value_slot];
        interp::set_attrib(&mut self.ctx(), recv, name, value)
    }

    /// Imports (loading and running once if not already) the module named
    /// `path`, through the installed [`crate::Host`], same as the
    /// bytecode `IMPORT` instruction.
    pub fn import_module(&mut self, path: &str, dst: Slot) -> Result<(), RuntimeError> {
        let target = if let Some(&existing) = self.vm.heap().modules.get(path) {
            existing
        } else {
            let source = self
                .vm
                .host
                .load_source(path)
                .ok_or_else(|| RuntimeError::ModuleNotFound(path.to_string()))?;
            let module = {
                let vm = &mut *self.vm;
                vm.host.compile_and_register(&mut vm.heap, path, &source)
            }
            .ok_or_else(|| RuntimeError::ModuleNotFound(path.to_string()))?;
            self.vm.heap_mut().modules.insert(path.to_string(), module);
            module
        };
        let scratch = self.vm.heap_mut().alloc(Obj::Fiber(FiberObj::new(target)));
        {
            let mut ctx = self.ctx();
            interp::ensure_module_initialized(&mut ctx, scratch, target)?;
        }
        self.set_slot(dst, Value::Obj(target));
        Ok(())
    }

    // ---------------------------------------------------------------
    // Foreign classes (§6.1 "Foreign classes")
    // ---------------------------------------------------------------

    /// Invokes `cls`'s (or its nearest foreign ancestor's) `delete_instance_fn`
    /// teardown hook on `instance_slot`'s native payload, then clears it so a
    /// second call is a no-op. Must be driven explicitly by the host — the
    /// GC's sweep pass never touches native payloads (see `DESIGN.md`).
    pub fn delete_foreign_instance(&mut self, instance_slot: Slot) -> Result<(), RuntimeError> {
        let Value::Obj(r) = self.slots[instance_slot] else {
            return Err(RuntimeError::TypeError { op: "delete_foreign_instance".into(), kind: self.slot_type(instance_slot) });
        };
        let (cls, native) = match self.vm.heap().get(r) {
            Some(Obj::Instance(inst)) => (inst.cls, inst.native),
            _ => return Err(RuntimeError::TypeError { op: "delete_foreign_instance".into(), kind: self.slot_type(instance_slot) }),
        };
        let Some(payload) = native else { return Ok(()) };
        if let Some(delete_fn) = resolve_native_delete(self.vm.heap(), cls) {
            delete_fn(payload);
        }
        if let Some(Obj::Instance(inst)) = self.vm.heap_mut().get_mut(r) {
            inst.native = None;
        }
        Ok(())
    }
}

fn resolve_native_delete(heap: &Heap, cls: ObjRef) -> Option<NativeDeleteFn> {
    let mut current = Some(cls);
    while let Some(c) = current {
        let Some(Obj::Class(co)) = heap.get(c) else { return None };
        if let Some(f) = co.native_delete {
            return Some(f);
        }
        current = co.super_class;
    }
    None
}

/// Builds a foreign (host-backed) class: a name, an optional superclass,
/// the `new_instance_fn`/`delete_instance_fn` pair (§6.1), and any
/// `@getter(name)`/`@setter(name, val)` methods routing attribute access
/// into the foreign payload — the same `@field:`/method-table mechanism
/// `interp.rs` already uses for ordinary class fields and methods, just
/// populated from Rust instead of compiled bytecode.
pub struct ForeignClassBuilder {
    name: String,
    super_class: Option<ObjRef>,
    native_new: Option<NativeNewFn>,
    native_delete: Option<NativeDeleteFn>,
}

impl ForeignClassBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_class: None,
            native_new: None,
            native_delete: None,
        }
    }

    #[must_use]
    pub fn super_class(mut self, cls: ObjRef) -> Self {
        self.super_class = Some(cls);
        self
    }

    #[must_use]
    pub fn new_instance_fn(mut self, f: NativeNewFn) -> Self {
        self.native_new = Some(f);
        self
    }

    #[must_use]
    pub fn delete_instance_fn(mut self, f: NativeDeleteFn) -> Self {
        self.native_delete = Some(f);
        self
    }

    /// Allocates the class into `vm`'s heap, installed under `owner`
    /// (typically a module being populated by a `Host::compile_and_register`
    /// override or a native-module registrar).
    pub fn build(self, vm: &mut Vm, owner: ObjRef) -> ObjRef {
        let heap = vm.heap_mut();
        let mut c = ClassObj::new(self.name, owner, ClassOf::Instance);
        c.super_class = self.super_class;
        c.native_new = self.native_new;
        c.native_delete = self.native_delete;
        heap.alloc(Obj::Class(c))
    }
}

// Re-exported so a foreign constructor can stash a boxed payload keyed by
// an opaque handle without the crate needing `unsafe` pointer casts: the
// host owns a side table (e.g. `slab::Slab<Box<dyn Any>>`) and `native_new`
// returns its key; `native_delete` looks the key back up to drop it.
pub use pocket_core::heap::class::{NativeDeleteFn as ForeignDeleteFn, NativeNewFn as ForeignNewFn};
