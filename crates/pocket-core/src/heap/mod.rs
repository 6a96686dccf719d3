//! heap — heap object kinds (§3.2–3.3) and the arena that owns them.

mod arena;
pub mod class;
pub mod closure;
pub mod fiber;
pub mod function;
pub mod list;
pub mod map;
pub mod module;
pub mod range;
pub mod string;

pub use arena::{Heap, Obj, ObjRef, MIN_HEAP};
pub use class::{ClassObj, ClassOf, InstanceObj};
pub use closure::{ClosureObj, MethodBind, UpvalueObj, UpvalueState};
pub use fiber::{CallFrame, FiberObj, FiberState};
pub use function::{FnBody, FnObj, NativeFn};
pub use list::PkList;
pub use map::PkMap;
pub use module::ModuleObj;
pub use range::PkRange;
pub use string::PkString;

impl Heap {
    /// Walk `super_class` links looking for a method, matching §4.6's
    /// "name resolution ... prefer the innermost" bias by checking the
    /// class itself before any ancestor.
    #[must_use]
    pub fn resolve_method(&self, class: ObjRef, name: &str) -> Option<ObjRef> {
        let mut current = Some(class);
        while let Some(c) = current {
            let Some(Obj::Class(cls)) = self.get(c) else {
                return None;
            };
            if let Some(m) = cls.own_method(name) {
                return Some(m);
            }
            current = cls.super_class;
        }
        None
    }

    /// All direct `ObjRef` children of `obj`, for GC tracing.
    pub(crate) fn children_of(&self, obj: &Obj, out: &mut Vec<ObjRef>) {
        let push_val = |v: &crate::value::Value, out: &mut Vec<ObjRef>| {
            if let Some(r) = v.as_obj() {
                out.push(r);
            }
        };
        match obj {
            Obj::Str(_) | Obj::Range(_) => {}
            Obj::List(l) => {
                for v in &l.values {
                    push_val(v, out);
                }
            }
            Obj::Map(m) => {
                for (k, v) in m.iter() {
                    push_val(&k, out);
                    push_val(&v, out);
                }
            }
            Obj::Module(m) => {
                if let Some(b) = m.body {
                    out.push(b);
                }
                for v in &m.constants {
                    push_val(v, out);
                }
                for v in &m.globals {
                    push_val(v, out);
                }
            }
            Obj::Fn(f) => {
                out.push(f.owner_module);
            }
            Obj::Closure(c) => {
                out.push(c.func);
                out.extend(c.upvalues.iter().copied());
            }
            Obj::Upvalue(u) => {
                if let UpvalueState::Closed(v) = &u.state {
                    push_val(v, out);
                }
            }
            Obj::MethodBind(m) => {
                out.push(m.method);
                push_val(&m.instance, out);
            }
            Obj::Fiber(fib) => {
                out.push(fib.closure);
                for v in &fib.stack[..fib.sp] {
                    push_val(v, out);
                }
                for frame in &fib.frames {
                    out.push(frame.closure);
                    if let Some(s) = &frame.self_value {
                        push_val(s, out);
                    }
                }
                if let Some(s) = &fib.self_value {
                    push_val(s, out);
                }
                if let Some(c) = fib.caller {
                    out.push(c);
                }
                out.extend(fib.open_upvalues.iter().copied());
            }
            Obj::Class(cls) => {
                out.push(cls.owner);
                if let Some(c) = cls.ctor {
                    out.push(c);
                }
                for (_, m) in &cls.methods {
                    out.push(*m);
                }
                for (k, v) in cls.static_attribs.iter() {
                    push_val(&k, out);
                    push_val(&v, out);
                }
                if let Some(s) = cls.super_class {
                    out.push(s);
                }
            }
            Obj::Instance(inst) => {
                out.push(inst.cls);
                for (k, v) in inst.attribs.iter() {
                    push_val(&k, out);
                    push_val(&v, out);
                }
            }
        }
    }
}
