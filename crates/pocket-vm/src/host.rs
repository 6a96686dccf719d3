//! host.rs — embedder hooks (§6.3 "Module path resolution").
//!
//! The interpreter core never touches stdout or the filesystem directly,
//! it calls back into whatever `Host` the embedder installed. `pocket-cli`
//! supplies the concrete host that can actually read files and compile
//! source text; `DefaultHost` here only covers the pieces that don't need
//! `pocket-compiler` (which `pocket-vm` doesn't depend on).

use pocket_core::heap::{Heap, ObjRef};

/// Embedder callbacks the interpreter invokes for I/O and dynamic imports.
pub trait Host {
    /// `print` builtin output (§4.6 BUILTIN_FN_NAMES). One newline-terminated
    /// line per call, arguments already joined by the interpreter.
    fn print(&mut self, text: &str);

    /// Resolve an import path relative to the importing module (§6.3).
    /// Returns `None` to mean "no such module".
    fn resolve_import(&mut self, from: &str, path: &str) -> Option<String> {
        let _ = from;
        Some(path.to_string())
    }

    /// Load the source text at a canonical path resolved above.
    fn load_source(&mut self, canonical_path: &str) -> Option<String> {
        let _ = canonical_path;
        None
    }

    /// Compile `source` as a module named `name` and register it into
    /// `heap.modules`, returning its `ObjRef`. `pocket-vm` has no compiler
    /// dependency, so the default host can't do this; `pocket-cli`'s host
    /// overrides it with a real `pocket_compiler::compile_str` call.
    fn compile_and_register(&mut self, heap: &mut Heap, name: &str, source: &str) -> Option<ObjRef> {
        let _ = (heap, name, source);
        None
    }
}

/// A host that prints to stdout and otherwise supports no dynamic imports
/// (every module must already be pre-registered in `heap.modules`).
#[derive(Debug, Default)]
pub struct DefaultHost;

impl Host for DefaultHost {
    fn print(&mut self, text: &str) {
        println!("{text}");
    }
}
