//! interp.rs — the byte-code dispatch loop, fiber scheduler, and operator
//! overload/constructor call machinery (§4.7 ISA, §4.8 Interpreter, §4.9
//! Fiber).
//!
//! Three tiers drive execution, all over the same per-fiber [`CallFrame`]
//! stack so ordinary calls, operator overloads, and cooperative fiber
//! resumption never fight each other for the Rust call stack:
//!
//! - [`trampoline`] drives one fiber's opcodes with no Rust-level recursion
//!   for `CALL`/`TAIL_CALL`/`METHOD_CALL`/`SUPER_CALL` — it just pushes and
//!   pops [`CallFrame`]s. `TAIL_CALL` reuses the current frame in place, so
//!   deep self-recursion never grows the frame stack (§4.8 "tail calls").
//! - [`invoke`] is a small, genuinely-recursive helper used only where the
//!   trampoline can't reach: running an overloaded operator method or a
//!   class's field-default/`_init` chain mid-instruction. Nesting here is
//!   bounded by *script-level* operator/constructor nesting, not by loop or
//!   recursion depth, so recursing in Rust is fine.
//! - [`resume_fiber`] drives a *child* fiber's own trampoline to completion
//!   or a yield, for `.run()`/`.resume(v)` on a `Fiber` receiver (§4.9).
//!
//! A fiber's stack always carries a callee slot beneath every frame's
//! locals — including the outermost frame, which is seeded with the
//! fiber's own closure as its "callee" before the first `step`. `RETURN`
//! then has one uniform rule: pop the frame, truncate to `rbp - 1`, push
//! the result. No special case for "the whole fiber is returning".

use crate::builtins::Builtins;
use crate::config::VmConfig;
use crate::error::RuntimeError;
use crate::host::Host;
use crate::roots::ActiveFiberRoots;
use crate::value_ops;
use pocket_bytecode::Op;
use pocket_core::heap::{
    CallFrame, ClassObj, ClassOf, ClosureObj, FiberObj, FiberState, FnBody, Heap, InstanceObj,
    MethodBind, Obj, ObjRef, PkList, PkMap, PkRange, PkString, UpvalueObj, UpvalueState,
};
use pocket_core::value::Value;

/// Bundles every piece of mutable state a dispatch step touches, so helper
/// functions don't carry five separate parameters.
pub struct Ctx<'a> {
    pub heap: &'a mut Heap,
    pub builtins: &'a Builtins,
    pub config: &'a VmConfig,
    pub host: &'a mut dyn Host,
    pub active: &'a mut Vec<ObjRef>,
}

/// What one `step` left behind.
enum StepSignal {
    Continue,
    Yielded(Value),
}

/// What driving a fiber to a stopping point produced.
pub enum FiberOutcome {
    Yielded(Value),
    Done(Value),
}

/// Allocates through the GC trigger policy (§4.3): collect *before*
/// allocating (not after) so the new object is never at risk of being
/// swept in the cycle that made room for it.
pub(crate) fn gc_alloc(ctx: &mut Ctx<'_>, obj: Obj) -> ObjRef {
    if ctx.heap.bytes_allocated() > ctx.heap.next_gc() {
        let roots = ActiveFiberRoots { fibers: &ctx.active[..] };
        pocket_core::gc::collect(ctx.heap, &roots, ctx.config.gc_fill_percent);
    }
    ctx.heap.alloc(obj)
}

pub(crate) fn str_value(ctx: &mut Ctx<'_>, s: &str) -> Value {
    Value::Obj(gc_alloc(ctx, Obj::Str(PkString::new(s))))
}

fn fiber_mut<'h>(heap: &'h mut Heap, fiber: ObjRef) -> &'h mut FiberObj {
    match heap.get_mut(fiber) {
        Some(Obj::Fiber(f)) => f,
        _ => unreachable!("stale or non-fiber ObjRef"),
    }
}

fn fiber_ref<'h>(heap: &'h Heap, fiber: ObjRef) -> &'h FiberObj {
    match heap.get(fiber) {
        Some(Obj::Fiber(f)) => f,
        _ => unreachable!("stale or non-fiber ObjRef"),
    }
}

pub(crate) fn push_value(ctx: &mut Ctx<'_>, fiber: ObjRef, v: Value) {
    fiber_mut(ctx.heap, fiber).push(v);
}

pub(crate) fn pop_value(ctx: &mut Ctx<'_>, fiber: ObjRef) -> Value {
    fiber_mut(ctx.heap, fiber).pop()
}

fn peek_value(ctx: &Ctx<'_>, fiber: ObjRef, depth: usize) -> Value {
    fiber_ref(ctx.heap, fiber).peek(depth)
}

fn frame_count(ctx: &Ctx<'_>, fiber: ObjRef) -> usize {
    fiber_ref(ctx.heap, fiber).frame_count()
}

fn cur_frame(ctx: &Ctx<'_>, fiber: ObjRef) -> CallFrame {
    *fiber_ref(ctx.heap, fiber).frames.last().expect("no active frame")
}

fn set_cur_ip(ctx: &mut Ctx<'_>, fiber: ObjRef, ip: usize) {
    fiber_mut(ctx.heap, fiber).frames.last_mut().unwrap().ip = ip;
}

/// Pops `argc` args (in call order) and the callee beneath them.
fn pop_call_args(ctx: &mut Ctx<'_>, fiber: ObjRef, argc: usize) -> (Value, Vec<Value>) {
    let fib = fiber_mut(ctx.heap, fiber);
    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        args.push(fib.pop());
    }
    args.reverse();
    let callee = fib.pop();
    (callee, args)
}

struct Fetched {
    op: Op,
    closure: ObjRef,
    module: ObjRef,
    rbp: usize,
    self_value: Option<Value>,
}

/// Reads the current frame's next opcode and advances its `ip`.
fn fetch(heap: &mut Heap, fiber: ObjRef) -> Fetched {
    let (ip, closure, rbp, self_value) = {
        let fr = *fiber_ref(heap, fiber).frames.last().expect("no active frame");
        (fr.ip, fr.closure, fr.rbp, fr.self_value)
    };
    let (module, op) = {
        let Some(Obj::Closure(c)) = heap.get(closure) else {
            unreachable!("frame closure is not a Closure")
        };
        let func = c.func;
        let Some(Obj::Fn(fo)) = heap.get(func) else {
            unreachable!("closure target is not an Fn")
        };
        let module = fo.owner_module;
        let op = match &fo.body {
            FnBody::Bytecode { opcodes, .. } => opcodes[ip],
            FnBody::Native(_) => unreachable!("native fn has no bytecode frame"),
        };
        (module, op)
    };
    fiber_mut(heap, fiber).frames.last_mut().unwrap().ip = ip + 1;
    Fetched { op, closure, module, rbp, self_value }
}

fn module_const(heap: &Heap, module: ObjRef, ix: u16) -> Value {
    let Some(Obj::Module(m)) = heap.get(module) else { unreachable!() };
    m.constants[ix as usize]
}

fn module_name(heap: &Heap, module: ObjRef, ix: u16) -> String {
    let Some(Obj::Module(m)) = heap.get(module) else { unreachable!() };
    m.names[ix as usize].clone()
}

/// The class used for method/attribute resolution on `v`: a primitive-type
/// class for everything but `Instance`, whose own `cls` is used directly.
pub(crate) fn class_of_ref(heap: &Heap, v: &Value) -> Option<ObjRef> {
    use pocket_core::builtins::builtin_ty_index;
    let ix = match v {
        Value::Null => builtin_ty_index("Null"),
        Value::Bool(_) => builtin_ty_index("Bool"),
        Value::Num(_) => builtin_ty_index("Number"),
        Value::Undefined | Value::Void => builtin_ty_index("Object"),
        Value::Obj(r) => match heap.get(*r)? {
            Obj::Str(_) => builtin_ty_index("String"),
            Obj::List(_) => builtin_ty_index("List"),
            Obj::Map(_) => builtin_ty_index("Map"),
            Obj::Range(_) => builtin_ty_index("Range"),
            Obj::Module(_) => builtin_ty_index("Module"),
            Obj::Fn(_) | Obj::Closure(_) | Obj::MethodBind(_) => builtin_ty_index("Function"),
            Obj::Fiber(_) => builtin_ty_index("Fiber"),
            Obj::Class(_) => builtin_ty_index("Class"),
            Obj::Instance(inst) => return Some(inst.cls),
            Obj::Upvalue(_) => builtin_ty_index("Object"),
        },
    }?;
    heap.primitive_classes.get(ix as usize).copied().flatten()
}

fn kind_name(heap: &Heap, v: &Value) -> String {
    value_ops::kind_name(heap, v)
}

fn check_arity(name: &str, arity: i32, argc: usize) -> Result<(), RuntimeError> {
    if arity >= 0 && argc != arity as usize {
        return Err(RuntimeError::ArityMismatch {
            name: name.to_string(),
            expected: arity.to_string(),
            got: argc,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Upvalues
// ---------------------------------------------------------------------

fn find_or_create_open_upvalue(ctx: &mut Ctx<'_>, fiber: ObjRef, slot: usize) -> ObjRef {
    let existing = fiber_ref(ctx.heap, fiber).open_upvalues.iter().copied().find(|&u| {
        matches!(ctx.heap.get(u), Some(Obj::Upvalue(uo)) if uo.open_slot() == Some(slot))
    });
    if let Some(u) = existing {
        return u;
    }
    let up = gc_alloc(ctx, Obj::Upvalue(UpvalueObj::open(fiber, slot)));
    // Kept sorted by descending stack slot (per `FiberObj::open_upvalues`'s
    // invariant) so a future close-from-depth walk could stop early.
    let open_list = fiber_ref(ctx.heap, fiber).open_upvalues.clone();
    let pos = open_list
        .iter()
        .position(|&u| matches!(ctx.heap.get(u), Some(Obj::Upvalue(uo)) if uo.open_slot().unwrap_or(0) < slot))
        .unwrap_or(open_list.len());
    fiber_mut(ctx.heap, fiber).open_upvalues.insert(pos, up);
    up
}

fn read_upvalue(heap: &Heap, up: ObjRef) -> Value {
    let Some(Obj::Upvalue(u)) = heap.get(up) else { unreachable!() };
    match u.state {
        UpvalueState::Open { fiber, slot } => fiber_ref(heap, fiber).stack[slot],
        UpvalueState::Closed(v) => v,
    }
}

fn write_upvalue(heap: &mut Heap, up: ObjRef, v: Value) {
    let (target_fiber, slot) = {
        let Some(Obj::Upvalue(u)) = heap.get(up) else { unreachable!() };
        match u.state {
            UpvalueState::Open { fiber, slot } => (Some(fiber), slot),
            UpvalueState::Closed(_) => (None, 0),
        }
    };
    if let Some(fiber) = target_fiber {
        fiber_mut(heap, fiber).stack[slot] = v;
    } else if let Some(Obj::Upvalue(u)) = heap.get_mut(up) {
        u.state = UpvalueState::Closed(v);
    }
}

// ---------------------------------------------------------------------
// Attribute / subscript helpers
// ---------------------------------------------------------------------

#[derive(PartialEq, Eq)]
enum AttribHolder {
    Module,
    Class,
    Instance,
    Other,
}

fn attrib_holder(heap: &Heap, r: ObjRef) -> AttribHolder {
    match heap.get(r) {
        Some(Obj::Module(_)) => AttribHolder::Module,
        Some(Obj::Class(_)) => AttribHolder::Class,
        Some(Obj::Instance(_)) => AttribHolder::Instance,
        _ => AttribHolder::Other,
    }
}

pub(crate) fn get_attrib(ctx: &mut Ctx<'_>, recv: Value, name: &str) -> Result<Value, RuntimeError> {
    if let Value::Obj(r) = recv {
        match attrib_holder(ctx.heap, r) {
            AttribHolder::Module => {
                let Some(Obj::Module(m)) = ctx.heap.get(r) else { unreachable!() };
                if let Some(ix) = m.get_global_index(name) {
                    return Ok(m.globals[ix as usize]);
                }
            }
            AttribHolder::Class => {
                let key = str_value(ctx, name);
                let Some(Obj::Class(c)) = ctx.heap.get(r) else { unreachable!() };
                if let Some(v) = c.static_attribs.get(&key, ctx.heap) {
                    return Ok(v);
                }
            }
            AttribHolder::Instance => {
                let key = str_value(ctx, name);
                let Some(Obj::Instance(inst)) = ctx.heap.get(r) else { unreachable!() };
                if let Some(v) = inst.attribs.get(&key, ctx.heap) {
                    return Ok(v);
                }
                let cls = inst.cls;
                if let Some(method) = ctx.heap.resolve_method(cls, name) {
                    let bind = gc_alloc(ctx, Obj::MethodBind(MethodBind { method, instance: recv }));
                    return Ok(Value::Obj(bind));
                }
            }
            AttribHolder::Other => {}
        }
    }
    Err(RuntimeError::NoSuchAttribute {
        kind: kind_name(ctx.heap, &recv),
        attrib: name.to_string(),
    })
}

pub(crate) fn set_attrib(ctx: &mut Ctx<'_>, recv: Value, name: &str, value: Value) -> Result<(), RuntimeError> {
    let Value::Obj(r) = recv else {
        return Err(RuntimeError::NoSuchAttribute {
            kind: kind_name(ctx.heap, &recv),
            attrib: name.to_string(),
        });
    };
    match attrib_holder(ctx.heap, r) {
        AttribHolder::Instance => {
            let key = str_value(ctx, name);
            map_insert_instance_attrib(ctx, r, key, value)?;
            Ok(())
        }
        AttribHolder::Class => {
            let key = str_value(ctx, name);
            map_insert_class_static(ctx, r, key, value)?;
            Ok(())
        }
        AttribHolder::Module => {
            let Some(Obj::Module(m)) = ctx.heap.get_mut(r) else { unreachable!() };
            if let Some(ix) = m.get_global_index(name) {
                m.globals[ix as usize] = value;
            } else {
                let name_ix = m.add_name(name);
                m.set_global(name_ix, value);
            }
            Ok(())
        }
        AttribHolder::Other => Err(RuntimeError::NoSuchAttribute {
            kind: kind_name(ctx.heap, &recv),
            attrib: name.to_string(),
        }),
    }
}

fn get_subscript(ctx: &mut Ctx<'_>, fiber: ObjRef, recv: Value, index: Value) -> Result<Value, RuntimeError> {
    match recv.as_obj().and_then(|r| ctx.heap.get(r)) {
        Some(Obj::List(l)) => {
            let len = l.values.len();
            let i = resolve_index(ctx.heap, &index, len, "[]")?;
            l.values.get(i).copied().ok_or(RuntimeError::IndexOutOfBounds { index: i as i64, len })
        }
        Some(Obj::Map(m)) => Ok(m.get(&index, ctx.heap).unwrap_or(Value::Undefined)),
        Some(Obj::Range(rg)) => {
            let values = rg.to_values();
            let len = values.len();
            let i = resolve_index(ctx.heap, &index, len, "[]")?;
            values.get(i).copied().ok_or(RuntimeError::IndexOutOfBounds { index: i as i64, len })
        }
        Some(Obj::Str(s)) => {
            let chars: Vec<char> = s.as_str().chars().collect();
            let len = chars.len();
            let i = resolve_index(ctx.heap, &index, len, "[]")?;
            let c = *chars.get(i).ok_or(RuntimeError::IndexOutOfBounds { index: i as i64, len })?;
            Ok(str_value(ctx, &c.to_string()))
        }
        Some(Obj::Instance(inst)) => {
            let cls = inst.cls;
            if let Some(method) = ctx.heap.resolve_method(cls, "[]") {
                invoke(ctx, fiber, method, Some(recv), &[index])?;
                Ok(pop_value(ctx, fiber))
            } else {
                Err(RuntimeError::NoSuchMethod { kind: kind_name(ctx.heap, &recv), method: "[]".into() })
            }
        }
        _ => Err(RuntimeError::TypeError { op: "[]".into(), kind: kind_name(ctx.heap, &recv) }),
    }
}

fn set_subscript(ctx: &mut Ctx<'_>, fiber: ObjRef, recv: Value, index: Value, value: Value) -> Result<(), RuntimeError> {
    match recv.as_obj().and_then(|r| ctx.heap.get(r)) {
        Some(Obj::List(l)) => {
            let len = l.values.len();
            let i = resolve_index(ctx.heap, &index, len, "[]=")?;
            let Value::Obj(r) = recv else { unreachable!() };
            if let Some(Obj::List(l)) = ctx.heap.get_mut(r) {
                if i < l.values.len() {
                    l.values[i] = value;
                    return Ok(());
                }
            }
            Err(RuntimeError::IndexOutOfBounds { index: i as i64, len })
        }
        Some(Obj::Map(_)) => {
            let Value::Obj(r) = recv else { unreachable!() };
            map_insert_into_map_obj(ctx, r, index, value)?;
            Ok(())
        }
        Some(Obj::Instance(inst)) => {
            let cls = inst.cls;
            if let Some(method) = ctx.heap.resolve_method(cls, "[]=") {
                invoke(ctx, fiber, method, Some(recv), &[index, value])?;
                pop_value(ctx, fiber);
                Ok(())
            } else {
                Err(RuntimeError::NoSuchMethod { kind: kind_name(ctx.heap, &recv), method: "[]=".into() })
            }
        }
        _ => Err(RuntimeError::TypeError { op: "[]=".into(), kind: kind_name(ctx.heap, &recv) }),
    }
}

/// Resolves a subscript index, allowing Python-style negative indices
/// counted from the end.
fn resolve_index(heap: &Heap, index: &Value, len: usize, op: &str) -> Result<usize, RuntimeError> {
    let n = index.as_num().ok_or_else(|| RuntimeError::TypeError { op: op.into(), kind: kind_name(heap, index) })?;
    let i = n as i64;
    if i < 0 {
        let from_end = len as i64 + i;
        if from_end < 0 {
            return Err(RuntimeError::IndexOutOfBounds { index: i, len });
        }
        Ok(from_end as usize)
    } else {
        Ok(i as usize)
    }
}

/// Inserting into a `PkMap` needs an immutable `&Heap` (to hash/compare the
/// key) at the same time as a mutable borrow of the map's owning object —
/// which itself lives inside the heap's arena. `mem::take` breaks the
/// aliasing: swap the map out, insert against a frozen heap, swap it back.
fn map_insert_into_map_obj(ctx: &mut Ctx<'_>, map_ref: ObjRef, key: Value, value: Value) -> Result<(), RuntimeError> {
    let Some(Obj::Map(m)) = ctx.heap.get_mut(map_ref) else { unreachable!() };
    let mut taken = std::mem::take(m);
    let result = taken.insert(key, value, &*ctx.heap);
    if let Some(Obj::Map(m)) = ctx.heap.get_mut(map_ref) {
        *m = taken;
    }
    result.map_err(|_| RuntimeError::Unhashable)
}

fn map_insert_instance_attrib(ctx: &mut Ctx<'_>, inst_ref: ObjRef, key: Value, value: Value) -> Result<(), RuntimeError> {
    let Some(Obj::Instance(inst)) = ctx.heap.get_mut(inst_ref) else { unreachable!() };
    let mut taken = std::mem::take(&mut inst.attribs);
    let result = taken.insert(key, value, &*ctx.heap);
    if let Some(Obj::Instance(inst)) = ctx.heap.get_mut(inst_ref) {
        inst.attribs = taken;
    }
    result.map_err(|_| RuntimeError::Unhashable)
}

fn map_insert_class_static(ctx: &mut Ctx<'_>, class_ref: ObjRef, key: Value, value: Value) -> Result<(), RuntimeError> {
    let Some(Obj::Class(c)) = ctx.heap.get_mut(class_ref) else { unreachable!() };
    let mut taken = std::mem::take(&mut c.static_attribs);
    let result = taken.insert(key, value, &*ctx.heap);
    if let Some(Obj::Class(c)) = ctx.heap.get_mut(class_ref) {
        c.static_attribs = taken;
    }
    result.map_err(|_| RuntimeError::Unhashable)
}

// ---------------------------------------------------------------------
// Class construction (§4.6 class fields: synthetic `@field:<name>` methods)
// ---------------------------------------------------------------------

/// Ancestor-to-descendant ordered list of `(field name, default-closure)`
/// pairs, so a subclass's own default shadows its ancestor's.
fn collect_field_defaults(heap: &Heap, cls: ObjRef) -> Vec<(String, ObjRef)> {
    let mut chain = Vec::new();
    let mut current = Some(cls);
    while let Some(c) = current {
        let Some(Obj::Class(co)) = heap.get(c) else { break };
        chain.push(co);
        current = co.super_class;
    }
    let mut result: Vec<(String, ObjRef)> = Vec::new();
    for co in chain.iter().rev() {
        for (name, m) in &co.methods {
            if let Some(field) = name.strip_prefix("@field:") {
                if let Some(pos) = result.iter().position(|(n, _)| n == field) {
                    result[pos] = (field.to_string(), *m);
                } else {
                    result.push((field.to_string(), *m));
                }
            }
        }
    }
    result
}

/// Nearest-ancestor-wins `native_new` lookup, mirroring method resolution:
/// a foreign subclass's own constructor hook overrides its ancestor's.
fn resolve_native_new(heap: &Heap, cls: ObjRef) -> Option<pocket_core::heap::class::NativeNewFn> {
    let mut current = Some(cls);
    while let Some(c) = current {
        let Some(Obj::Class(co)) = heap.get(c) else { return None };
        if let Some(f) = co.native_new {
            return Some(f);
        }
        current = co.super_class;
    }
    None
}

fn construct_instance(ctx: &mut Ctx<'_>, fiber: ObjRef, cls: ObjRef, args: &[Value]) -> Result<Value, RuntimeError> {
    let instance_ref = gc_alloc(ctx, Obj::Instance(InstanceObj::new(cls)));
    let instance = Value::Obj(instance_ref);

    if let Some(native_new) = resolve_native_new(ctx.heap, cls) {
        let payload = native_new(ctx.heap);
        if let Some(Obj::Instance(inst)) = ctx.heap.get_mut(instance_ref) {
            inst.native = Some(payload);
        }
    }

    for (field, default_fn) in collect_field_defaults(ctx.heap, cls) {
        invoke(ctx, fiber, default_fn, Some(instance), &[])?;
        let v = pop_value(ctx, fiber);
        set_attrib(ctx, instance, &field, v)?;
    }

    if let Some(init) = ctx.heap.resolve_method(cls, "_init") {
        invoke(ctx, fiber, init, Some(instance), args)?;
        pop_value(ctx, fiber); // `_init`'s return value is discarded
    } else if !args.is_empty() {
        return Err(RuntimeError::ArityMismatch {
            name: class_name(ctx.heap, cls),
            expected: "0".into(),
            got: args.len(),
        });
    }
    Ok(instance)
}

fn class_name(heap: &Heap, cls: ObjRef) -> String {
    match heap.get(cls) {
        Some(Obj::Class(c)) => c.name.clone(),
        _ => "<class>".to_string(),
    }
}

// ---------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------

/// Pushes a new frame calling `closure` over `args` already placed on the
/// stack with `closure`'s value directly beneath them — the universal call
/// layout every tier (trampoline, `invoke`, the seeded outermost frame)
/// shares.
fn push_call_frame(ctx: &mut Ctx<'_>, fiber: ObjRef, closure: ObjRef, self_value: Option<Value>, argc: usize) -> Result<(), RuntimeError> {
    let Some(Obj::Closure(c)) = ctx.heap.get(closure) else { unreachable!() };
    let func = c.func;
    let (name, arity) = match ctx.heap.get(func) {
        Some(Obj::Fn(f)) => (f.name.clone(), f.arity),
        _ => unreachable!(),
    };
    check_arity(&name, arity, argc)?;
    let sp = fiber_ref(ctx.heap, fiber).sp;
    let rbp = sp - argc;
    if frame_count(ctx, fiber) >= ctx.config.max_call_frames {
        return Err(RuntimeError::CallStackOverflow { limit: ctx.config.max_call_frames });
    }
    fiber_mut(ctx.heap, fiber).push_frame(CallFrame { ip: 0, closure, rbp, self_value });
    Ok(())
}

/// Dispatches a call to any legal `CALL`/`METHOD_CALL` target: a closure
/// (pushes a frame), a class (constructs an instance), or a builtin/native
/// function (including the `print`/`yield` identity special-cases).
fn dispatch_call(ctx: &mut Ctx<'_>, fiber: ObjRef, callee: Value, self_value: Option<Value>, argc: usize) -> Result<Option<StepSignal>, RuntimeError> {
    let Value::Obj(callee_ref) = callee else {
        pop_call_args(ctx, fiber, argc);
        return Err(RuntimeError::NotCallable(kind_name(ctx.heap, &callee)));
    };
    match ctx.heap.get(callee_ref) {
        Some(Obj::Closure(_)) => {
            push_call_frame(ctx, fiber, callee_ref, self_value, argc)?;
            Ok(None)
        }
        Some(Obj::Class(c)) => {
            if c.class_of == ClassOf::Fiber {
                let (_, args) = pop_call_args(ctx, fiber, argc);
                let arg0 = args.first().copied().ok_or_else(|| RuntimeError::ArityMismatch { name: "Fiber".into(), expected: "1".into(), got: 0 })?;
                let Value::Obj(inner_closure) = arg0 else {
                    return Err(RuntimeError::Custom("Fiber(fn) expects a function argument".into()));
                };
                let new_fiber = gc_alloc(ctx, Obj::Fiber(FiberObj::new(inner_closure)));
                push_value(ctx, fiber, Value::Obj(new_fiber));
            } else {
                let (_, args) = pop_call_args(ctx, fiber, argc);
                let result = construct_instance(ctx, fiber, callee_ref, &args)?;
                push_value(ctx, fiber, result);
            }
            Ok(None)
        }
        Some(Obj::Fn(_)) => {
            if callee_ref == ctx.builtins.print_fn {
                let (_, args) = pop_call_args(ctx, fiber, argc);
                let joined: Vec<String> = args.iter().map(|v| value_ops::stringify(ctx.heap, v)).collect();
                ctx.host.print(&joined.join(" "));
                push_value(ctx, fiber, Value::Null);
                return Ok(None);
            }
            if callee_ref == ctx.builtins.yield_fn {
                let (_, args) = pop_call_args(ctx, fiber, argc);
                let v = args.first().copied().unwrap_or(Value::Null);
                fiber_mut(ctx.heap, fiber).state = FiberState::Yielded;
                if ctx.config.trace {
                    tracing::debug!(?fiber, "yield builtin called");
                }
                return Ok(Some(StepSignal::Yielded(v)));
            }
            let (_, args) = pop_call_args(ctx, fiber, argc);
            let Some(Obj::Fn(f)) = ctx.heap.get(callee_ref) else { unreachable!() };
            let (name, arity, native) = match &f.body {
                FnBody::Native(nf) => (f.name.clone(), f.arity, *nf),
                FnBody::Bytecode { .. } => unreachable!("Fn with bytecode body must be wrapped in a Closure"),
            };
            check_arity(&name, arity, args.len())?;
            let result = native(ctx.heap, &args);
            push_value(ctx, fiber, result);
            Ok(None)
        }
        Some(Obj::MethodBind(mb)) => {
            let mb = *mb;
            push_call_frame(ctx, fiber, mb.method, Some(mb.instance), argc)?;
            Ok(None)
        }
        _ => {
            pop_call_args(ctx, fiber, argc);
            Err(RuntimeError::NotCallable(kind_name(ctx.heap, &callee)))
        }
    }
}

/// A small set of intrinsic methods on primitive receivers that aren't
/// backed by a user-overridable class (§4.6 "builtin registry").
fn str_contents(heap: &Heap, r: ObjRef) -> Option<String> {
    match heap.get(r) {
        Some(Obj::Str(s)) => Some(s.as_str().to_string()),
        _ => None,
    }
}

fn intrinsic_method(ctx: &mut Ctx<'_>, fiber: ObjRef, recv: Value, name: &str, args: &[Value]) -> Result<bool, RuntimeError> {
    let Some(r) = recv.as_obj() else { return Ok(false) };
    match name {
        "len" => {
            let n = match ctx.heap.get(r) {
                Some(Obj::Str(s)) => s.as_str().chars().count(),
                Some(Obj::List(l)) => l.len(),
                Some(Obj::Map(m)) => m.len(),
                _ => return Ok(false),
            };
            push_value(ctx, fiber, Value::Num(n as f64));
        }
        "upper" | "lower" | "strip" if str_contents(ctx.heap, r).is_some() => {
            let s = str_contents(ctx.heap, r).unwrap();
            let transformed = match name {
                "upper" => PkString::upper(&s),
                "lower" => PkString::lower(&s),
                _ => PkString::strip(&s),
            };
            let new_ref = gc_alloc(ctx, Obj::Str(transformed));
            push_value(ctx, fiber, Value::Obj(new_ref));
        }
        "split" if str_contents(ctx.heap, r).is_some() => {
            let s = str_contents(ctx.heap, r).unwrap();
            let sep = args
                .first()
                .and_then(|a| a.as_obj())
                .and_then(|sr| str_contents(ctx.heap, sr))
                .unwrap_or_default();
            let parts = PkString::split(&s, &sep);
            let mut values = Vec::with_capacity(parts.len());
            for p in parts {
                values.push(Value::Obj(gc_alloc(ctx, Obj::Str(p))));
            }
            let list = gc_alloc(ctx, Obj::List(PkList::with_values(values)));
            push_value(ctx, fiber, Value::Obj(list));
        }
        "push" if matches!(ctx.heap.get(r), Some(Obj::List(_))) => {
            let v = args.first().copied().unwrap_or(Value::Null);
            if let Some(Obj::List(l)) = ctx.heap.get_mut(r) {
                l.push(v);
            }
            push_value(ctx, fiber, Value::Null);
        }
        "pop" if matches!(ctx.heap.get(r), Some(Obj::List(_))) => {
            let result = if let Some(Obj::List(l)) = ctx.heap.get_mut(r) {
                let last = l.len().checked_sub(1);
                last.and_then(|i| l.remove(i))
            } else {
                None
            };
            push_value(ctx, fiber, result.unwrap_or(Value::Null));
        }
        _ => return Ok(false),
    }
    Ok(true)
}

// ---------------------------------------------------------------------
// Step dispatch
// ---------------------------------------------------------------------

/// Executes exactly one opcode. `allow_yield` is `false` inside [`invoke`]'s
/// nested loop — yielding from within an operator overload or constructor
/// call isn't supported (there's no outer trampoline frame to suspend to).
fn step(ctx: &mut Ctx<'_>, fiber: ObjRef, allow_yield: bool) -> Result<StepSignal, RuntimeError> {
    let Fetched { op, closure, module, rbp, self_value } = fetch(ctx.heap, fiber);

    macro_rules! pop {
        () => {
            pop_value(ctx, fiber)
        };
    }
    macro_rules! push {
        ($v:expr) => {
            push_value(ctx, fiber, $v)
        };
    }
    macro_rules! peek {
        ($d:expr) => {
            peek_value(ctx, fiber, $d)
        };
    }
    macro_rules! local {
        ($ix:expr) => {
            fiber_ref(ctx.heap, fiber).stack[rbp + $ix as usize]
        };
    }
    macro_rules! set_local {
        ($ix:expr, $v:expr) => {
            fiber_mut(ctx.heap, fiber).stack[rbp + $ix as usize] = $v
        };
    }

    use Op::*;
    match op {
        PushConstant(ix) => push!(module_const(ctx.heap, module, ix)),
        PushNull => push!(Value::Null),
        Push0 => push!(Value::Num(0.0)),
        PushTrue => push!(Value::Bool(true)),
        PushFalse => push!(Value::Bool(false)),
        PushSelf => push!(self_value.unwrap_or(Value::Null)),

        Swap => {
            let a = pop!();
            let b = pop!();
            push!(a);
            push!(b);
        }
        Dup => push!(peek!(0)),
        Pop => {
            pop!();
        }

        PushList(n) => {
            let n = n as usize;
            let mut values = Vec::with_capacity(n);
            for _ in 0..n {
                values.push(pop!());
            }
            values.reverse();
            let r = gc_alloc(ctx, Obj::List(PkList::with_values(values)));
            push!(Value::Obj(r));
        }
        PushMap => {
            let r = gc_alloc(ctx, Obj::Map(PkMap::new()));
            push!(Value::Obj(r));
        }
        ListAppend => {
            let v = pop!();
            let Value::Obj(r) = peek!(0) else { unreachable!("LIST_APPEND target must be a List") };
            if let Some(Obj::List(l)) = ctx.heap.get_mut(r) {
                l.push(v);
            }
        }
        MapInsert => {
            let v = pop!();
            let k = pop!();
            let Value::Obj(r) = peek!(0) else { unreachable!("MAP_INSERT target must be a Map") };
            map_insert_into_map_obj(ctx, r, k, v)?;
        }

        PushLocal0 => push!(local!(0)),
        PushLocal1 => push!(local!(1)),
        PushLocal2 => push!(local!(2)),
        PushLocal3 => push!(local!(3)),
        PushLocal4 => push!(local!(4)),
        PushLocal5 => push!(local!(5)),
        PushLocal6 => push!(local!(6)),
        PushLocal7 => push!(local!(7)),
        PushLocal8 => push!(local!(8)),
        PushLocalN(ix) => push!(local!(ix)),
        StoreLocal0 => set_local!(0, pop!()),
        StoreLocal1 => set_local!(1, pop!()),
        StoreLocal2 => set_local!(2, pop!()),
        StoreLocal3 => set_local!(3, pop!()),
        StoreLocal4 => set_local!(4, pop!()),
        StoreLocal5 => set_local!(5, pop!()),
        StoreLocal6 => set_local!(6, pop!()),
        StoreLocal7 => set_local!(7, pop!()),
        StoreLocal8 => set_local!(8, pop!()),
        StoreLocalN(ix) => set_local!(ix, pop!()),

        PushGlobal(ix) => {
            let Some(Obj::Module(m)) = ctx.heap.get(module) else { unreachable!() };
            push!(m.globals[ix as usize]);
        }
        StoreGlobal(ix) => {
            let v = pop!();
            let Some(Obj::Module(m)) = ctx.heap.get_mut(module) else { unreachable!() };
            m.globals[ix as usize] = v;
        }

        PushBuiltinFn(ix) => push!(Value::Obj(ctx.builtins.fns[ix as usize])),
        PushBuiltinTy(ix) => {
            let r = ctx.heap.primitive_classes[ix as usize].expect("primitive class installed");
            push!(Value::Obj(r));
        }

        PushUpvalue(ix) => {
            let Some(Obj::Closure(c)) = ctx.heap.get(closure) else { unreachable!() };
            let up = c.upvalues[ix as usize];
            push!(read_upvalue(ctx.heap, up));
        }
        StoreUpvalue(ix) => {
            let v = pop!();
            let Some(Obj::Closure(c)) = ctx.heap.get(closure) else { unreachable!() };
            let up = c.upvalues[ix as usize];
            write_upvalue(ctx.heap, up, v);
        }
        CloseUpvalue => {
            let slot = fiber_ref(ctx.heap, fiber).sp - 1;
            let value = pop!();
            let open_list = fiber_ref(ctx.heap, fiber).open_upvalues.clone();
            let matched = open_list.into_iter().find(|&u| {
                matches!(ctx.heap.get(u), Some(Obj::Upvalue(uo)) if uo.open_slot() == Some(slot))
            });
            if let Some(up) = matched {
                if let Some(Obj::Upvalue(u)) = ctx.heap.get_mut(up) {
                    u.state = UpvalueState::Closed(value);
                }
                fiber_mut(ctx.heap, fiber).open_upvalues.retain(|&r| r != up);
            }
        }

        PushClosure(const_ix) => {
            let Value::Obj(fn_ref) = module_const(ctx.heap, module, const_ix) else {
                unreachable!("PUSH_CLOSURE constant must be an Fn")
            };
            let r = gc_alloc(ctx, Obj::Closure(ClosureObj::new(fn_ref, Vec::new())));
            push!(Value::Obj(r));
        }
        CaptureUpvalue { is_immediate, index } => {
            let Value::Obj(closure_ref) = peek!(0) else {
                unreachable!("CAPTURE_UPVALUE with no pending closure")
            };
            let up = if is_immediate {
                find_or_create_open_upvalue(ctx, fiber, rbp + index as usize)
            } else {
                let Some(Obj::Closure(c)) = ctx.heap.get(closure) else { unreachable!() };
                c.upvalues[index as usize]
            };
            if let Some(Obj::Closure(c)) = ctx.heap.get_mut(closure_ref) {
                c.upvalues.push(up);
            }
        }
        CreateClass(name_ix) => {
            let name = module_name(ctx.heap, module, name_ix);
            let r = gc_alloc(ctx, Obj::Class(ClassObj::new(name, module, ClassOf::Instance)));
            push!(Value::Obj(r));
        }
        BindMethod => {
            let Value::Obj(closure_ref) = pop!() else { unreachable!("BIND_METHOD expects a Closure") };
            let Value::Obj(class_ref) = peek!(0) else { unreachable!("BIND_METHOD with no pending class") };
            let Some(Obj::Closure(c)) = ctx.heap.get(closure_ref) else { unreachable!() };
            let func = c.func;
            let Some(Obj::Fn(f)) = ctx.heap.get(func) else { unreachable!() };
            let name = f.name.clone();
            if let Some(Obj::Class(cls)) = ctx.heap.get_mut(class_ref) {
                cls.add_method(name, closure_ref);
            }
        }

        Import(name_ix) => {
            let path = module_name(ctx.heap, module, name_ix);
            let target = if let Some(&existing) = ctx.heap.modules.get(&path) {
                existing
            } else {
                let from = { let Some(Obj::Module(m)) = ctx.heap.get(module) else { unreachable!() }; m.name.clone() };
                let canonical = ctx
                    .host
                    .resolve_import(&from, &path)
                    .ok_or_else(|| RuntimeError::ModuleNotFound(path.clone()))?;
                let source = ctx
                    .host
                    .load_source(&canonical)
                    .ok_or_else(|| RuntimeError::ModuleNotFound(path.clone()))?;
                let new_mod = ctx
                    .host
                    .compile_and_register(ctx.heap, &path, &source)
                    .ok_or_else(|| RuntimeError::ModuleNotFound(path.clone()))?;
                ctx.heap.modules.insert(path.clone(), new_mod);
                new_mod
            };
            ensure_module_initialized(ctx, fiber, target)?;
            push!(Value::Obj(target));
        }

        Call(argc) => {
            let argc = argc as usize;
            let callee = peek!(argc);
            if let Some(signal) = dispatch_call(ctx, fiber, callee, None, argc)? {
                return Ok(signal);
            }
        }
        TailCall(argc) => {
            let argc = argc as usize;
            let callee = peek!(argc);
            do_tail_call(ctx, fiber, rbp, callee, argc)?;
        }
        MethodCall(argc, name_ix) => {
            let argc = argc as usize;
            let name = module_name(ctx.heap, module, name_ix);
            let recv = peek!(argc);
            if let Some(signal) = dispatch_method_call(ctx, fiber, recv, &name, argc)? {
                return Ok(signal);
            }
        }
        SuperCall(argc, name_ix) => {
            let argc = argc as usize;
            let name = module_name(ctx.heap, module, name_ix);
            let self_v = self_value.ok_or_else(|| RuntimeError::Custom("`super` used outside a method".into()))?;
            let own_cls = class_of_ref(ctx.heap, &self_v).ok_or_else(|| RuntimeError::Custom("super has no class".into()))?;
            let Some(Obj::Class(c)) = ctx.heap.get(own_cls) else { unreachable!() };
            let super_cls = c.super_class.ok_or_else(|| RuntimeError::Custom(format!("`{}` has no superclass", c.name)))?;
            let method = ctx
                .heap
                .resolve_method(super_cls, &name)
                .ok_or_else(|| RuntimeError::NoSuchMethod { kind: class_name(ctx.heap, super_cls), method: name.clone() })?;
            push_call_frame(ctx, fiber, method, Some(self_v), argc)?;
        }

        IterTest(var_ix) => {
            let v = local!(var_ix - 2); // @seq
            if !matches!(
                v.as_obj().and_then(|r| ctx.heap.get(r)),
                Some(Obj::List(_)) | Some(Obj::Map(_)) | Some(Obj::Range(_)) | Some(Obj::Str(_))
            ) {
                return Err(RuntimeError::TypeError { op: "for".into(), kind: kind_name(ctx.heap, &v) });
            }
        }
        Iter(var_ix, offset) => {
            let iterable = local!(var_ix - 2); // @seq
            let cursor = local!(var_ix - 1).as_num().unwrap_or(0.0) as usize; // @iter
            match advance_iterator(ctx, &iterable, cursor)? {
                Some((element, next_cursor)) => {
                    set_local!(var_ix - 1, Value::Num(next_cursor as f64));
                    set_local!(var_ix, element);
                }
                None => {
                    let ip = cur_ip(ctx, fiber);
                    set_cur_ip(ctx, fiber, ip + offset as usize);
                }
            }
        }

        Jump(off) => {
            let ip = cur_ip(ctx, fiber);
            set_cur_ip(ctx, fiber, ip + off as usize);
        }
        Loop(off) => {
            let ip = cur_ip(ctx, fiber);
            set_cur_ip(ctx, fiber, ip - off as usize);
        }
        JumpIf(off) => {
            let v = pop!();
            if v.truthy(ctx.heap) {
                let ip = cur_ip(ctx, fiber);
                set_cur_ip(ctx, fiber, ip + off as usize);
            }
        }
        JumpIfNot(off) => {
            let v = pop!();
            if !v.truthy(ctx.heap) {
                let ip = cur_ip(ctx, fiber);
                set_cur_ip(ctx, fiber, ip + off as usize);
            }
        }
        Or(off) => {
            if peek!(0).truthy(ctx.heap) {
                let ip = cur_ip(ctx, fiber);
                set_cur_ip(ctx, fiber, ip + off as usize);
            }
        }
        And(off) => {
            if !peek!(0).truthy(ctx.heap) {
                let ip = cur_ip(ctx, fiber);
                set_cur_ip(ctx, fiber, ip + off as usize);
            }
        }

        Return => {
            let v = pop!();
            perform_return(ctx, fiber, v);
        }

        GetAttrib(name_ix) => {
            let name = module_name(ctx.heap, module, name_ix);
            let recv = pop!();
            let v = get_attrib(ctx, recv, &name)?;
            push!(v);
        }
        GetAttribKeep(name_ix) => {
            let name = module_name(ctx.heap, module, name_ix);
            let recv = peek!(0);
            let v = get_attrib(ctx, recv, &name)?;
            push!(v);
        }
        SetAttrib(name_ix) => {
            let name = module_name(ctx.heap, module, name_ix);
            let value = pop!();
            let recv = pop!();
            set_attrib(ctx, recv, &name, value)?;
        }
        GetSubscript => {
            let index = pop!();
            let recv = pop!();
            let v = get_subscript(ctx, fiber, recv, index)?;
            push!(v);
        }
        GetSubscriptKeep => {
            let index = pop!();
            let recv = peek!(0);
            let v = get_subscript(ctx, fiber, recv, index)?;
            push!(v);
        }
        SetSubscript => {
            let value = pop!();
            let index = pop!();
            let recv = pop!();
            set_subscript(ctx, fiber, recv, index, value)?;
            push!(value);
        }

        Add(_) => {
            let b = pop!();
            let a = pop!();
            push!(binop_with_overload(ctx, fiber, a, b, "+", value_ops::add)?);
        }
        Subtract(_) => {
            let b = pop!();
            let a = pop!();
            push!(binop_with_overload(ctx, fiber, a, b, "-", subtract_ov)?);
        }
        Multiply(_) => {
            let b = pop!();
            let a = pop!();
            push!(binop_with_overload(ctx, fiber, a, b, "*", multiply_ov)?);
        }
        Divide(_) => {
            let b = pop!();
            let a = pop!();
            push!(binop_with_overload(ctx, fiber, a, b, "/", divide_ov)?);
        }
        Exponent(_) => {
            let b = pop!();
            let a = pop!();
            push!(binop_with_overload(ctx, fiber, a, b, "**", exponent_ov)?);
        }
        Mod(_) => {
            let b = pop!();
            let a = pop!();
            push!(binop_with_overload(ctx, fiber, a, b, "%", modulo_ov)?);
        }
        BitAnd(_) => {
            let b = pop!();
            let a = pop!();
            push!(binop_with_overload(ctx, fiber, a, b, "&", bit_and_ov)?);
        }
        BitOr(_) => {
            let b = pop!();
            let a = pop!();
            push!(binop_with_overload(ctx, fiber, a, b, "|", bit_or_ov)?);
        }
        BitXor(_) => {
            let b = pop!();
            let a = pop!();
            push!(binop_with_overload(ctx, fiber, a, b, "^", bit_xor_ov)?);
        }
        LShift(_) => {
            let b = pop!();
            let a = pop!();
            push!(binop_with_overload(ctx, fiber, a, b, "<<", lshift_ov)?);
        }
        RShift(_) => {
            let b = pop!();
            let a = pop!();
            push!(binop_with_overload(ctx, fiber, a, b, ">>", rshift_ov)?);
        }

        Positive => {
            let v = pop!();
            v.as_num().ok_or_else(|| RuntimeError::TypeError { op: "unary +".into(), kind: kind_name(ctx.heap, &v) })?;
            push!(v);
        }
        Negative => {
            let v = pop!();
            push!(value_ops::negative(ctx.heap, v)?);
        }
        Not => {
            let v = pop!();
            push!(Value::Bool(!v.truthy(ctx.heap)));
        }
        BitNot => {
            let v = pop!();
            push!(value_ops::bit_not(ctx.heap, v)?);
        }

        EqEq => {
            let b = pop!();
            let a = pop!();
            push!(Value::Bool(equal_with_overload(ctx, fiber, a, b)?));
        }
        NotEq => {
            let b = pop!();
            let a = pop!();
            push!(Value::Bool(!equal_with_overload(ctx, fiber, a, b)?));
        }
        Lt => cmp(ctx, fiber, "<", |o| o == std::cmp::Ordering::Less)?,
        LtEq => cmp(ctx, fiber, "<=", |o| o != std::cmp::Ordering::Greater)?,
        Gt => cmp(ctx, fiber, ">", |o| o == std::cmp::Ordering::Greater)?,
        GtEq => cmp(ctx, fiber, ">=", |o| o != std::cmp::Ordering::Less)?,

        Range => {
            let to = pop!();
            let from = pop!();
            let from = from.as_num().ok_or_else(|| RuntimeError::TypeError { op: "..".into(), kind: kind_name(ctx.heap, &from) })?;
            let to = to.as_num().ok_or_else(|| RuntimeError::TypeError { op: "..".into(), kind: kind_name(ctx.heap, &to) })?;
            let r = gc_alloc(ctx, Obj::Range(PkRange::new(from, to)));
            push!(Value::Obj(r));
        }
        In => {
            let haystack = pop!();
            let needle = pop!();
            push!(Value::Bool(value_ops::contains(ctx.heap, &needle, &haystack)?));
        }
        Is => {
            let class_v = pop!();
            let v = pop!();
            let Value::Obj(class_ref) = class_v else {
                return Err(RuntimeError::TypeError { op: "is".into(), kind: kind_name(ctx.heap, &class_v) });
            };
            push!(Value::Bool(value_ops::is_instance_of(ctx.heap, &v, class_ref)));
        }

        ReplPrint => {
            let v = peek!(0);
            let text = value_ops::stringify(ctx.heap, &v);
            ctx.host.print(&text);
        }
        End => {}
    }

    if !allow_yield {
        // Yielding only happens via the `yield` builtin's own early return
        // above; nothing else to check here.
    }
    Ok(StepSignal::Continue)
}

/// Pops the current frame, truncates to just under its `rbp`, and pushes
/// `v` as the single residual value — the one rule `RETURN` and a
/// non-reusable `TAIL_CALL` target both need (§4.8).
fn perform_return(ctx: &mut Ctx<'_>, fiber: ObjRef, v: Value) {
    let frame = fiber_mut(ctx.heap, fiber).pop_frame().expect("RETURN with no active frame");
    close_upvalues_from(ctx, fiber, frame.rbp);
    let fib = fiber_mut(ctx.heap, fiber);
    fib.sp = frame.rbp - 1;
    fib.push(v);
}

fn cur_ip(ctx: &Ctx<'_>, fiber: ObjRef) -> usize {
    fiber_ref(ctx.heap, fiber).frames.last().unwrap().ip
}

/// Closes every open upvalue aliasing a slot at or above `from_slot` — run
/// on `RETURN`, over the frame's own local range, so upvalues captured
/// from a dying frame keep their last value instead of dangling.
fn close_upvalues_from(ctx: &mut Ctx<'_>, fiber: ObjRef, from_slot: usize) {
    let open_list = fiber_ref(ctx.heap, fiber).open_upvalues.clone();
    let mut remaining = Vec::with_capacity(open_list.len());
    for up in open_list {
        let slot = match ctx.heap.get(up) {
            Some(Obj::Upvalue(u)) => u.open_slot(),
            _ => None,
        };
        match slot {
            Some(slot) if slot >= from_slot => {
                let value = fiber_ref(ctx.heap, fiber).stack[slot];
                if let Some(Obj::Upvalue(u)) = ctx.heap.get_mut(up) {
                    u.state = UpvalueState::Closed(value);
                }
            }
            _ => remaining.push(up),
        }
    }
    fiber_mut(ctx.heap, fiber).open_upvalues = remaining;
}

fn do_tail_call(ctx: &mut Ctx<'_>, fiber: ObjRef, rbp: usize, callee: Value, argc: usize) -> Result<(), RuntimeError> {
    let Value::Obj(callee_ref) = callee else {
        return Err(RuntimeError::NotCallable(kind_name(ctx.heap, &callee)));
    };
    let (target_closure, self_value) = match ctx.heap.get(callee_ref) {
        Some(Obj::Closure(_)) => (Some(callee_ref), None),
        Some(Obj::MethodBind(mb)) => (Some(mb.method), Some(mb.instance)),
        _ => (None, None),
    };
    let Some(target_closure) = target_closure else {
        // Not a reusable-frame target (native fn, class construction, a
        // fresh Fiber): run it synchronously, then finish the tail call by
        // returning its result from the current frame ourselves, since the
        // compiler emits nothing after a TAIL_CALL to do that for us.
        match dispatch_call(ctx, fiber, callee, None, argc)? {
            None => {
                let v = pop_value(ctx, fiber);
                perform_return(ctx, fiber, v);
            }
            Some(StepSignal::Yielded(_)) => {
                // Tail-calling `yield` itself isn't meaningful; nothing to
                // return from, so just leave the yielded value in place.
            }
            Some(StepSignal::Continue) => unreachable!("dispatch_call never returns Continue"),
        }
        return Ok(());
    };
    let Some(Obj::Closure(c)) = ctx.heap.get(target_closure) else { unreachable!() };
    let func = c.func;
    let (name, arity) = match ctx.heap.get(func) {
        Some(Obj::Fn(f)) => (f.name.clone(), f.arity),
        _ => unreachable!(),
    };
    check_arity(&name, arity, argc)?;

    let fib = fiber_mut(ctx.heap, fiber);
    let sp = fib.sp;
    for i in 0..argc {
        fib.stack[rbp + i] = fib.stack[sp - argc + i];
    }
    fib.sp = rbp + argc;
    let frame = fib.frames.last_mut().unwrap();
    frame.closure = target_closure;
    frame.ip = 0;
    frame.self_value = self_value;
    Ok(())
}

fn dispatch_method_call(ctx: &mut Ctx<'_>, fiber: ObjRef, recv: Value, name: &str, argc: usize) -> Result<Option<StepSignal>, RuntimeError> {
    if let Some(Obj::Fiber(_)) = recv.as_obj().and_then(|r| ctx.heap.get(r)) {
        if name == "run" || name == "resume" {
            let (recv_val, args) = pop_call_args(ctx, fiber, argc);
            let Value::Obj(child) = recv_val else { unreachable!() };
            let resume_value = args.first().copied();
            let outcome = resume_fiber(ctx, child, resume_value)?;
            match outcome {
                FiberOutcome::Yielded(v) | FiberOutcome::Done(v) => push_value(ctx, fiber, v),
            }
            return Ok(None);
        }
    }
    let Some(cls) = class_of_ref(ctx.heap, &recv) else {
        return Err(RuntimeError::NoSuchMethod { kind: kind_name(ctx.heap, &recv), method: name.to_string() });
    };
    if let Some(method) = ctx.heap.resolve_method(cls, name) {
        push_call_frame(ctx, fiber, method, Some(recv), argc)?;
        return Ok(None);
    }
    let (_, args) = pop_call_args(ctx, fiber, argc);
    if intrinsic_method(ctx, fiber, recv, name, &args)? {
        return Ok(None);
    }
    Err(RuntimeError::NoSuchMethod { kind: kind_name(ctx.heap, &recv), method: name.to_string() })
}

fn advance_iterator(ctx: &mut Ctx<'_>, iterable: &Value, cursor: usize) -> Result<Option<(Value, usize)>, RuntimeError> {
    let r = iterable.as_obj().ok_or_else(|| RuntimeError::TypeError { op: "for".into(), kind: kind_name(ctx.heap, iterable) })?;
    match ctx.heap.get(r) {
        Some(Obj::List(l)) => Ok(l.values.get(cursor).map(|v| (*v, cursor + 1))),
        Some(Obj::Range(rg)) => {
            let values = rg.to_values();
            Ok(values.get(cursor).map(|v| (*v, cursor + 1)))
        }
        Some(Obj::Str(s)) => {
            let chars: Vec<char> = s.as_str().chars().collect();
            match chars.get(cursor) {
                Some(c) => Ok(Some((str_value(ctx, &c.to_string()), cursor + 1))),
                None => Ok(None),
            }
        }
        Some(Obj::Map(m)) => {
            let entries: Vec<(Value, Value)> = m.iter().collect();
            match entries.get(cursor) {
                Some((k, v)) => {
                    let pair = gc_alloc(ctx, Obj::List(PkList::with_values(vec![*k, *v])));
                    Ok(Some((Value::Obj(pair), cursor + 1)))
                }
                None => Ok(None),
            }
        }
        _ => Err(RuntimeError::TypeError { op: "for".into(), kind: kind_name(ctx.heap, iterable) }),
    }
}

pub(crate) fn ensure_module_initialized(ctx: &mut Ctx<'_>, fiber: ObjRef, module: ObjRef) -> Result<(), RuntimeError> {
    let (initialized, body) = {
        let Some(Obj::Module(m)) = ctx.heap.get(module) else { unreachable!() };
        (m.initialized, m.body)
    };
    if initialized {
        return Ok(());
    }
    if let Some(body_fn) = body {
        let closure = gc_alloc(ctx, Obj::Closure(ClosureObj::new(body_fn, Vec::new())));
        invoke(ctx, fiber, closure, None, &[])?;
        pop_value(ctx, fiber);
    }
    if let Some(Obj::Module(m)) = ctx.heap.get_mut(module) {
        m.initialized = true;
    }
    Ok(())
}

// `value_ops`'s primitive binops only need `&Heap`; `binop_with_overload`
// takes `&mut Heap` uniformly (Add allocates a new Str/List), so each is
// wrapped to match — the `&mut Heap` argument reborrows as `&Heap` inside.
macro_rules! heap_binop_adapter {
    ($name:ident, $inner:path) => {
        fn $name(heap: &mut Heap, a: Value, b: Value) -> Result<Value, RuntimeError> {
            $inner(heap, a, b)
        }
    };
}
heap_binop_adapter!(subtract_ov, value_ops::subtract);
heap_binop_adapter!(multiply_ov, value_ops::multiply);
heap_binop_adapter!(divide_ov, value_ops::divide);
heap_binop_adapter!(exponent_ov, value_ops::exponent);
heap_binop_adapter!(modulo_ov, value_ops::modulo);
heap_binop_adapter!(bit_and_ov, value_ops::bit_and);
heap_binop_adapter!(bit_or_ov, value_ops::bit_or);
heap_binop_adapter!(bit_xor_ov, value_ops::bit_xor);
heap_binop_adapter!(lshift_ov, value_ops::lshift);
heap_binop_adapter!(rshift_ov, value_ops::rshift);

fn binop_with_overload(
    ctx: &mut Ctx<'_>,
    fiber: ObjRef,
    a: Value,
    b: Value,
    op_name: &str,
    primitive: fn(&mut Heap, Value, Value) -> Result<Value, RuntimeError>,
) -> Result<Value, RuntimeError> {
    if value_ops::is_instance(ctx.heap, &a) {
        let cls = class_of_ref(ctx.heap, &a).unwrap();
        if let Some(method) = ctx.heap.resolve_method(cls, op_name) {
            invoke(ctx, fiber, method, Some(a), &[b])?;
            return Ok(pop_value(ctx, fiber));
        }
    }
    primitive(ctx.heap, a, b)
}

fn equal_with_overload(ctx: &mut Ctx<'_>, fiber: ObjRef, a: Value, b: Value) -> Result<bool, RuntimeError> {
    if value_ops::is_instance(ctx.heap, &a) {
        let cls = class_of_ref(ctx.heap, &a).unwrap();
        if let Some(method) = ctx.heap.resolve_method(cls, "==") {
            invoke(ctx, fiber, method, Some(a), &[b])?;
            let v = pop_value(ctx, fiber);
            return Ok(v.truthy(ctx.heap));
        }
    }
    Ok(Value::equal(&a, &b, ctx.heap))
}

fn cmp(ctx: &mut Ctx<'_>, fiber: ObjRef, op_name: &str, accept: fn(std::cmp::Ordering) -> bool) -> Result<(), RuntimeError> {
    let b = pop_value(ctx, fiber);
    let a = pop_value(ctx, fiber);
    if value_ops::is_instance(ctx.heap, &a) {
        let cls = class_of_ref(ctx.heap, &a).unwrap();
        if let Some(method) = ctx.heap.resolve_method(cls, op_name) {
            invoke(ctx, fiber, method, Some(a), &[b])?;
            let v = pop_value(ctx, fiber);
            push_value(ctx, fiber, v);
            return Ok(());
        }
    }
    let ordering = value_ops::compare(ctx.heap, a, b, op_name)?;
    push_value(ctx, fiber, Value::Bool(accept(ordering)));
    Ok(())
}

// ---------------------------------------------------------------------
// Tiers 1-3: trampoline, invoke, run_fiber
// ---------------------------------------------------------------------

/// Tier 1: drives `fiber`'s own frames until it yields, finishes, or its
/// frame count falls back to zero (the fiber is done).
fn trampoline(ctx: &mut Ctx<'_>, fiber: ObjRef) -> Result<FiberOutcome, RuntimeError> {
    loop {
        match step(ctx, fiber, true) {
            Ok(StepSignal::Continue) => {
                if frame_count(ctx, fiber) == 0 {
                    let result = pop_value(ctx, fiber);
                    fiber_mut(ctx.heap, fiber).state = FiberState::Done;
                    return Ok(FiberOutcome::Done(result));
                }
            }
            Ok(StepSignal::Yielded(v)) => return Ok(FiberOutcome::Yielded(v)),
            Err(e) => {
                fiber_mut(ctx.heap, fiber).state = FiberState::Done;
                fiber_mut(ctx.heap, fiber).error = Some(e.to_string());
                return Err(e);
            }
        }
    }
}

/// Tier 2: runs `closure` synchronously on `fiber`'s own stack, recursing
/// through `step` only until the pushed frame (and nothing above the
/// caller's existing depth) has returned. Leaves exactly one result value
/// on the stack, same as an ordinary `CALL` would.
pub(crate) fn invoke(ctx: &mut Ctx<'_>, fiber: ObjRef, closure: ObjRef, self_value: Option<Value>, args: &[Value]) -> Result<(), RuntimeError> {
    push_value(ctx, fiber, Value::Obj(closure));
    for &a in args {
        push_value(ctx, fiber, a);
    }
    push_call_frame(ctx, fiber, closure, self_value, args.len())?;
    let base_depth = frame_count(ctx, fiber);
    loop {
        match step(ctx, fiber, false)? {
            StepSignal::Continue => {
                if frame_count(ctx, fiber) < base_depth {
                    return Ok(());
                }
            }
            StepSignal::Yielded(_) => {
                return Err(RuntimeError::Custom(
                    "yield is not supported inside an operator overload or constructor call".into(),
                ));
            }
        }
    }
}

/// Tier 3: starts or resumes a child fiber and drives its trampoline until
/// it next yields or finishes.
fn resume_fiber(ctx: &mut Ctx<'_>, fiber: ObjRef, resume_value: Option<Value>) -> Result<FiberOutcome, RuntimeError> {
    let state = fiber_ref(ctx.heap, fiber).state;
    if ctx.config.trace {
        tracing::debug!(?fiber, from_state = ?state, "fiber resume");
    }
    match state {
        FiberState::New => {
            let closure = fiber_ref(ctx.heap, fiber).closure;
            fiber_mut(ctx.heap, fiber).state = FiberState::Running;
            push_value(ctx, fiber, Value::Obj(closure));
            push_call_frame(ctx, fiber, closure, None, 0)?;
        }
        FiberState::Yielded => {
            fiber_mut(ctx.heap, fiber).state = FiberState::Running;
            push_value(ctx, fiber, resume_value.unwrap_or(Value::Null));
        }
        FiberState::Running => return Err(RuntimeError::InvalidResume { state: "RUNNING" }),
        FiberState::Done => return Err(RuntimeError::InvalidResume { state: "DONE" }),
    }
    ctx.active.push(fiber);
    let result = trampoline(ctx, fiber);
    ctx.active.pop();
    if ctx.config.trace {
        match &result {
            Ok(FiberOutcome::Yielded(_)) => tracing::debug!(?fiber, "fiber yield"),
            Ok(FiberOutcome::Done(_)) => tracing::debug!(?fiber, "fiber done"),
            Err(e) => tracing::debug!(?fiber, error = %e, "fiber error"),
        }
    }
    result
}

/// Embedding entry point: runs a fiber from scratch (used for a module's
/// top-level body and for `pocket-cli`/host `call()`s).
pub fn run_fiber_from_new(ctx: &mut Ctx<'_>, fiber: ObjRef) -> Result<Value, RuntimeError> {
    match resume_fiber(ctx, fiber, None)? {
        FiberOutcome::Done(v) => Ok(v),
        FiberOutcome::Yielded(v) => Ok(v),
    }
}

/// Embedding entry point: starts a brand-new fiber with real arguments
/// (`Vm::call_closure`'s general case — `resume_fiber`'s own `New` arm
/// hardcodes 0 args, which is right for a coroutine body but not for
/// calling an arbitrary script function from the host).
pub fn run_fiber_with_args(ctx: &mut Ctx<'_>, fiber: ObjRef, closure: ObjRef, args: &[Value]) -> Result<Value, RuntimeError> {
    debug_assert_eq!(fiber_ref(ctx.heap, fiber).state, FiberState::New);
    fiber_mut(ctx.heap, fiber).state = FiberState::Running;
    push_value(ctx, fiber, Value::Obj(closure));
    for &a in args {
        push_value(ctx, fiber, a);
    }
    push_call_frame(ctx, fiber, closure, None, args.len())?;
    ctx.active.push(fiber);
    let result = trampoline(ctx, fiber);
    ctx.active.pop();
    match result? {
        FiberOutcome::Done(v) => Ok(v),
        FiberOutcome::Yielded(v) => Ok(v),
    }
}

/// Public resumption entry point mirroring `.resume(v)` from the host side
/// (§6.1 embedding ABI "Fiber control").
pub fn resume(ctx: &mut Ctx<'_>, fiber: ObjRef, value: Option<Value>) -> Result<FiberOutcome, RuntimeError> {
    resume_fiber(ctx, fiber, value)
}
