//! host.rs — the concrete [`pocket_vm::Host`] this binary installs: actual
//! file I/O and actual compilation, the two things `pocket-vm` itself
//! can't do (§6.3 "Module path resolution").
//!
//! Reads a file relative to the script's own directory, compiles it, and
//! runs it, split into `Host::resolve_import`/`load_source`/
//! `compile_and_register`'s three-step shape instead of one inline
//! `fs::read_to_string`.

use camino::{Utf8Path, Utf8PathBuf};
use pocket_core::heap::{Heap, ObjRef};
use pocket_vm::Host;

/// Resolves `import` paths relative to `root` (the directory of the
/// entry script, or the current directory for `-c`/REPL input), and
/// compiles source text via `pocket-compiler`.
pub struct CliHost {
    root: Utf8PathBuf,
    debug: bool,
}

impl CliHost {
    #[must_use]
    pub fn new(root: Utf8PathBuf, debug: bool) -> Self {
        Self { root, debug }
    }
}

impl Host for CliHost {
    fn print(&mut self, text: &str) {
        println!("{text}");
    }

    fn resolve_import(&mut self, from: &str, path: &str) -> Option<String> {
        let base = if from.is_empty() {
            self.root.clone()
        } else {
            Utf8Path::new(from).parent().map_or_else(|| self.root.clone(), Utf8Path::to_path_buf)
        };
        let mut candidate = base.join(path);
        if candidate.extension().is_none() {
            candidate.set_extension("pk");
        }
        Some(candidate.into_string())
    }

    fn load_source(&mut self, canonical_path: &str) -> Option<String> {
        std::fs::read_to_string(canonical_path).ok()
    }

    fn compile_and_register(&mut self, heap: &mut Heap, name: &str, source: &str) -> Option<ObjRef> {
        let options = pocket_compiler::CompileOptions { debug: self.debug };
        match pocket_compiler::compile_str(heap, source, name, options) {
            Ok(module) => Some(module),
            Err(e) => {
                tracing::error!(module = name, error = %e, "compile error");
                None
            }
        }
    }
}
