//! pocket-vm — the byte-code interpreter, fiber scheduler, and GC trigger
//! policy for PocketLang (§4 "Runtime").
//!
//! This crate knows the concrete PocketLang opcode set ([`pocket_bytecode`])
//! and heap layout ([`pocket_core::heap`]) directly — there's exactly one
//! instruction set to execute, so [`interp::step`] dispatches it directly
//! rather than through a caller-supplied trait. A [`Vm`] is built from
//! [`VmConfig`]-driven construction, a pluggable [`Host`] for I/O and
//! module loading, and a `DefaultHost` covering the parts that don't need
//! a compiler.
//!
//! ```no_run
//! use pocket_vm::{Vm, VmConfig};
//!
//! let mut vm = Vm::new();
//! // `pocket-cli` installs a `Host` that can actually compile source and
//! // hands `vm` a module `ObjRef` to run; this crate alone can only run
//! // modules a caller has already registered into `vm.heap_mut().modules`.
//! let _ = VmConfig::default();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod abi;
mod builtins;
mod config;
mod error;
mod handle;
mod host;
mod interp;
mod roots;
mod value_ops;

pub use abi::{Abi, ForeignClassBuilder, Slot};
pub use config::VmConfig;
pub use error::{RuntimeError, VmError};
pub use handle::ValueHandle;
pub use host::{DefaultHost, Host};
pub use interp::FiberOutcome;

use builtins::Builtins;
use pocket_core::heap::{ClosureObj, FiberObj, Heap, Obj, ObjRef};
use pocket_core::value::Value;
use roots::ActiveFiberRoots;

/// The embeddable PocketLang virtual machine: a heap, the installed
/// builtin surface, tunable limits, and the active host.
///
/// PocketLang's stack and frames live per-fiber inside the heap rather
/// than on `Vm` itself — `Vm` only owns what's genuinely process-wide:
/// the heap, the builtin tables installed into it once at startup, the
/// configured limits, and the currently installed host.
pub struct Vm {
    heap: Heap,
    builtins: Builtins,
    config: VmConfig,
    host: Box<dyn Host>,
    /// Every fiber currently being driven by a Rust call on this `Vm`,
    /// innermost last — root #1 for [`pocket_core::gc::collect`] (see
    /// [`ActiveFiberRoots`]).
    active: Vec<ObjRef>,
}

impl Vm {
    /// A `Vm` with default configuration and [`DefaultHost`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    /// A `Vm` with caller-supplied limits and [`DefaultHost`].
    #[must_use]
    pub fn with_config(config: VmConfig) -> Self {
        let mut heap = Heap::new();
        let builtins = builtins::install(&mut heap);
        Self {
            heap,
            builtins,
            config,
            host: Box::new(DefaultHost),
            active: Vec::new(),
        }
    }

    /// Installs a custom [`Host`], e.g. `pocket-cli`'s compiler-backed one.
    pub fn set_host(&mut self, host: Box<dyn Host>) {
        self.host = host;
    }

    /// Direct heap access, for embedders that need to register a
    /// pre-compiled module (`heap.modules.insert(...)`) before running it.
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Read-only heap access, e.g. to inspect a finished run's globals.
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    fn ctx(&mut self) -> interp::Ctx<'_> {
        interp::Ctx {
            heap: &mut self.heap,
            builtins: &self.builtins,
            config: &self.config,
            host: &mut *self.host,
            active: &mut self.active,
        }
    }

    /// Runs a loaded module's top-level body to completion (§4.4 "a
    /// module's implicit `@main`"), on a freshly created fiber.
    ///
    /// A module that calls the `yield` builtin at its top level is legal
    /// (PocketLang allows it, per §4.9) but `run_module` has no caller to
    /// hand the yielded value to, so it surfaces as the returned value —
    /// the same way a fiber's own `.run()` would on its very first yield.
    pub fn run_module(&mut self, module: ObjRef) -> Result<Value, VmError> {
        let closure = {
            let Some(Obj::Module(m)) = self.heap.get(module) else {
                return Err(VmError::Uncaught(format!("{module:?} is not a loaded module")));
            };
            let Some(body) = m.body else {
                return Ok(Value::Null); // an empty module has nothing to run
            };
            self.heap.alloc(Obj::Closure(ClosureObj::new(body, Vec::new())))
        };
        self.call_closure(closure, &[])
    }

    /// Calls a bare (no captured upvalues) closure with `args`, driving it
    /// to completion on a fresh fiber — the entry point `pocket-cli` uses
    /// for a script's `main` or a REPL-entered expression.
    pub fn call_closure(&mut self, closure: ObjRef, args: &[Value]) -> Result<Value, VmError> {
        let fiber = self.heap.alloc(Obj::Fiber(FiberObj::new(closure)));
        let mut ctx = self.ctx();
        interp::run_fiber_with_args(&mut ctx, fiber, closure, args).map_err(VmError::from)
    }

    /// Resumes a suspended (or starts a brand-new) fiber, mirroring the
    /// embedding ABI's `.resume(v)` (§6.1).
    pub fn resume(&mut self, fiber: ObjRef, value: Option<Value>) -> Result<FiberOutcome, VmError> {
        let mut ctx = self.ctx();
        interp::resume(&mut ctx, fiber, value).map_err(VmError::from)
    }

    /// Renders `v` the same way the `print` builtin would (§4.6
    /// `BUILTIN_FN_NAMES`) — what a REPL host prints for an entered
    /// expression's result.
    #[must_use]
    pub fn display(&self, v: Value) -> String {
        value_ops::stringify(&self.heap, &v)
    }

    /// Runs one GC cycle unconditionally, bypassing the usual
    /// `bytes_allocated > next_gc` trigger (§4.3) — exposed for hosts that
    /// want to collect at a known-safe point (e.g. between REPL lines).
    pub fn collect_garbage(&mut self) -> usize {
        let roots = ActiveFiberRoots { fibers: &self.active };
        pocket_core::gc::collect(&mut self.heap, &roots, self.config.gc_fill_percent)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pocket_compiler::CompileOptions;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Collects every `print` line into a shared buffer instead of stdout,
    /// so a test can assert on a run's full output.
    struct RecordingHost {
        lines: Rc<RefCell<Vec<String>>>,
    }

    impl Host for RecordingHost {
        fn print(&mut self, text: &str) {
            self.lines.borrow_mut().push(text.to_string());
        }
    }

    /// Compiles and runs `src` as a module on a fresh `Vm`, returning its
    /// captured `print` output, one entry per call.
    fn run(src: &str) -> Vec<String> {
        let mut vm = Vm::new();
        let lines = Rc::new(RefCell::new(Vec::new()));
        vm.set_host(Box::new(RecordingHost { lines: lines.clone() }));
        let module = pocket_compiler::compile_str(vm.heap_mut(), src, "test", CompileOptions::default())
            .expect("source should compile");
        vm.run_module(module).expect("module should run to completion");
        drop(vm);
        Rc::try_unwrap(lines).expect("host outlives vm").into_inner()
    }

    #[test]
    fn fibonacci_recursion() {
        let out = run(indoc! {"
            def fib(n) if n < 2 then return n end; return fib(n-1)+fib(n-2) end
            print(fib(10))
        "});
        assert_eq!(out, vec!["55"]);
    }

    #[test]
    fn string_interpolation() {
        let out = run(indoc! {r#"
            name = "world"; print("Hello, $name! ${1+2}")
        "#});
        assert_eq!(out, vec!["Hello, world! 3"]);
    }

    #[test]
    fn closures_capture_their_defining_scope() {
        let out = run(indoc! {"
            def make(x) return func(y) return x+y end end
            add3 = make(3); print(add3(4))
        "});
        assert_eq!(out, vec!["7"]);
    }

    #[test]
    fn fiber_yield_suspends_and_resumes_across_three_calls() {
        let out = run(indoc! {"
            def gen() yield(1); yield(2); yield(3) end
            f = Fiber(gen); print(f.run()); print(f.resume()); print(f.resume())
        "});
        assert_eq!(out, vec!["1", "2", "3"]);
    }

    #[test]
    fn class_instance_field_assignment_and_read() {
        let out = run(indoc! {"
            class Box val = 0 end
            b = Box(); b.val = 42; print(b.val)
        "});
        assert_eq!(out, vec!["42"]);
    }

    #[test]
    fn map_equality_is_structural() {
        let out = run(indoc! {r#"
            m = {"a":1, "b":2}; print(m == {"a":1, "b":2})
        "#});
        assert_eq!(out, vec!["true"]);
    }

    #[test]
    fn for_loop_visits_every_list_element_in_order() {
        let out = run(indoc! {"
            for x in [10, 20, 30]
                print(x)
            end
        "});
        assert_eq!(out, vec!["10", "20", "30"]);
    }

    #[test]
    fn for_loop_over_a_range() {
        let out = run(indoc! {"
            total = 0
            for i in 1..4
                total = total + i
            end
            print(total)
        "});
        assert_eq!(out, vec!["6"]);
    }

    #[test]
    fn upvalue_captured_by_an_escaping_closure_observes_later_writes() {
        // `n` goes out of scope when `counter()` returns, but `inc` (the
        // returned closure) keeps reading/writing the same closed-over slot.
        let out = run(indoc! {"
            def counter()
                n = 0
                inc = func()
                    n = n + 1
                    return n
                end
                return inc
            end
            c = counter()
            print(c())
            print(c())
            print(c())
        "});
        assert_eq!(out, vec!["1", "2", "3"]);
    }

    #[test]
    fn deep_self_tail_recursion_does_not_overflow_the_default_frame_limit() {
        // With `VmConfig::default().max_call_frames == 512`, this only
        // completes if TAIL_CALL reuses the current frame instead of
        // pushing a new one for each of 100000 recursive calls.
        let out = run(indoc! {"
            def countdown(n, acc)
                if n == 0 then return acc end
                return countdown(n - 1, acc + 1)
            end
            print(countdown(100000, 0))
        "});
        assert_eq!(out, vec!["100000"]);
    }
}
