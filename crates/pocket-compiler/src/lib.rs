//! pocket-compiler — single-pass Pratt parser emitting byte-code directly
//! (§4.6), with `compile_str`/`compile_file` entry points over the full
//! grammar implemented across `scope`/`precedence`/`compiler`.

#![deny(rust_2018_idioms, unused_must_use)]

mod compiler;
mod error;
mod precedence;
mod scope;

use camino::Utf8Path;
use pocket_core::heap::{Heap, ObjRef};

pub use compiler::CompileOptions;
pub use error::{CompileError, Diag, Diagnostics};

/// Compiles `source` as a module named `module_name`, returning the
/// `ObjRef` of the resulting `ModuleObj`.
pub fn compile_str(
    heap: &mut Heap,
    source: &str,
    module_name: &str,
    options: CompileOptions,
) -> Result<ObjRef, CompileError> {
    compiler::compile_module(heap, source, module_name, options)
}

/// Reads `path` and compiles it, naming the module after the file stem.
pub fn compile_file(
    heap: &mut Heap,
    path: &Utf8Path,
    options: CompileOptions,
) -> Result<ObjRef, CompileError> {
    let source = std::fs::read_to_string(path).map_err(|e| {
        CompileError::Diagnostics(vec![Diag {
            pos: pocket_lexer::Pos { line: 0, offset: 0 },
            message: format!("failed to read {path}: {e}"),
        }])
    })?;
    let module_name = path.file_stem().unwrap_or("main");
    compile_str(heap, &source, module_name, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pocket_core::heap::Obj;

    fn compiled_main_ops(src: &str) -> Vec<pocket_bytecode::Op> {
        let mut heap = Heap::new();
        let module = compile_str(&mut heap, src, "test", CompileOptions::default())
            .expect("source should compile");
        let Some(Obj::Module(m)) = heap.get(module) else {
            panic!("expected a module");
        };
        let body = m.body.expect("module body should be set");
        let Some(Obj::Fn(f)) = heap.get(body) else {
            panic!("expected the @main function");
        };
        match &f.body {
            pocket_core::heap::FnBody::Bytecode { opcodes, .. } => opcodes.clone(),
            pocket_core::heap::FnBody::Native(_) => unreachable!(),
        }
    }

    #[test]
    fn compiles_a_global_assignment() {
        let ops = compiled_main_ops("x = 1 + 2\n");
        assert!(ops.iter().any(|op| matches!(op, pocket_bytecode::Op::Add(0))));
        assert!(ops
            .iter()
            .any(|op| matches!(op, pocket_bytecode::Op::StoreGlobal(_))));
    }

    #[test]
    fn compiles_an_if_else() {
        let ops = compiled_main_ops(indoc! {"
            if 1 < 2 then
                x = 1
            else
                x = 2
            end
        "});
        assert!(ops.iter().any(|op| matches!(op, pocket_bytecode::Op::JumpIfNot(_))));
        assert!(ops.iter().any(|op| matches!(op, pocket_bytecode::Op::Jump(_))));
    }

    #[test]
    fn compiles_a_while_loop_with_break() {
        let ops = compiled_main_ops(indoc! {"
            i = 0
            while i < 10 then
                if i == 5 then
                    break
                end
                i = i + 1
            end
        "});
        assert!(ops.iter().any(|op| matches!(op, pocket_bytecode::Op::Loop(_))));
    }

    #[test]
    fn compiles_a_function_with_tail_call() {
        let ops = compiled_main_ops(indoc! {"
            def loop(n)
                return loop(n - 1)
            end
        "});
        let has_tail_call = ops.iter().any(|op| matches!(op, pocket_bytecode::Op::PushClosure(_)));
        assert!(has_tail_call);
    }

    #[test]
    fn compiles_a_class_with_a_method_and_field_default() {
        let ops = compiled_main_ops(indoc! {"
            class Point
                x = 0
                def sum()
                    return self.x
                end
            end
        "});
        assert!(ops.iter().any(|op| matches!(op, pocket_bytecode::Op::CreateClass(_))));
        assert_eq!(
            ops.iter()
                .filter(|op| matches!(op, pocket_bytecode::Op::BindMethod))
                .count(),
            2
        );
    }

    #[test]
    fn compiles_attribute_assignment() {
        let ops = compiled_main_ops("p.x = 1\n");
        assert!(ops.iter().any(|op| matches!(op, pocket_bytecode::Op::SetAttrib(_))));
    }

    #[test]
    fn compiles_subscript_compound_assignment() {
        let ops = compiled_main_ops("a[0] += 1\n");
        assert!(ops.iter().any(|op| matches!(op, pocket_bytecode::Op::GetSubscript)));
        assert!(ops.iter().any(|op| matches!(op, pocket_bytecode::Op::SetSubscript)));
    }

    #[test]
    fn reports_a_diagnostic_for_undefined_compound_assignment() {
        let mut heap = Heap::new();
        let err = compile_str(&mut heap, "x += 1\n", "test", CompileOptions::default())
            .expect_err("compound assignment to an undefined name should fail");
        assert!(matches!(err, CompileError::Diagnostics(_)));
    }
}
