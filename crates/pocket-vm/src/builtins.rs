//! builtins.rs — installs the builtin function/type tables (§4.6) into a
//! fresh [`Heap`], matching `pocket_core::builtins`' name→index tables.
//!
//! `print` and `yield` carry a plain [`NativeFn`] body (so arity-checking
//! and introspection work uniformly) but are never actually invoked through
//! it — the interpreter recognizes their `ObjRef`s by identity before
//! falling back to generic native dispatch, since both need capabilities a
//! bare `fn(&mut Heap, &[Value]) -> Value` can't express (host I/O and
//! fiber suspension, respectively).

use pocket_core::builtins::{BUILTIN_FN_NAMES, BUILTIN_TY_NAMES};
use pocket_core::heap::{ClassObj, ClassOf, FnObj, Heap, ModuleObj, Obj, ObjRef};
use pocket_core::value::Value;
use crate::value_ops;

/// The allocated builtin surface: native `Fn`s at `BUILTIN_FN_NAMES`
/// indices, and primitive-type `Class`es installed into
/// `heap.primitive_classes` at `BUILTIN_TY_NAMES` indices.
pub struct Builtins {
    pub fns: Vec<ObjRef>,
    pub print_fn: ObjRef,
    pub yield_fn: ObjRef,
    pub fiber_class: ObjRef,
}

fn native_clock(_heap: &mut Heap, _args: &[Value]) -> Value {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Value::Num(secs)
}

fn native_type_of(heap: &mut Heap, args: &[Value]) -> Value {
    let arg = args.first().copied().unwrap_or(Value::Null);
    let name = value_ops::kind_name(heap, &arg);
    Value::Obj(heap.alloc(Obj::Str(pocket_core::heap::PkString::new(name))))
}

fn native_unreachable(_heap: &mut Heap, _args: &[Value]) -> Value {
    Value::Void
}

/// Allocates the builtins pseudo-module, the builtin `Fn`s, and the
/// primitive-type `Class`es, wiring the latter into `heap.primitive_classes`
/// (§4.3 root #5) so they're never collected.
pub fn install(heap: &mut Heap) -> Builtins {
    let owner = heap.alloc(Obj::Module(ModuleObj::new("@builtins")));
    heap.modules.insert("@builtins".to_string(), owner);

    let mut fns = Vec::with_capacity(BUILTIN_FN_NAMES.len());
    let mut print_fn = owner;
    let mut yield_fn = owner;
    for (ix, name) in BUILTIN_FN_NAMES.iter().enumerate() {
        let (arity, native): (i32, pocket_core::heap::NativeFn) = match *name {
            "print" => (-1, native_unreachable as pocket_core::heap::NativeFn),
            "clock" => (0, native_clock as pocket_core::heap::NativeFn),
            "yield" => (1, native_unreachable as pocket_core::heap::NativeFn),
            "type_of" => (1, native_type_of as pocket_core::heap::NativeFn),
            _ => (-1, native_unreachable as pocket_core::heap::NativeFn),
        };
        let r = heap.alloc(Obj::Fn(FnObj::new_native(*name, owner, arity, native)));
        if *name == "print" {
            print_fn = r;
        }
        if *name == "yield" {
            yield_fn = r;
        }
        fns.push(r);
        debug_assert_eq!(fns.len() - 1, ix);
    }

    heap.primitive_classes = vec![None; BUILTIN_TY_NAMES.len()];
    let mut fiber_class = owner;
    for (ix, name) in BUILTIN_TY_NAMES.iter().enumerate() {
        let class_of = pocket_core::builtins::class_of_for_index(ix as u8).unwrap_or(ClassOf::Object);
        let r = heap.alloc(Obj::Class(ClassObj::new(*name, owner, class_of)));
        heap.primitive_classes[ix] = Some(r);
        if *name == "Fiber" {
            fiber_class = r;
        }
    }

    Builtins {
        fns,
        print_fn,
        yield_fn,
        fiber_class,
    }
}
