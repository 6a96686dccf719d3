//! disasm.rs — human-readable listing of an opcode stream.
//!
//! A pure function from `(&[Op], &[u32])` (ops + parallel line numbers) to
//! a `String`, with no knowledge of the owning module's constant/name pools
//! beyond an optional resolver closure.

use crate::op::Op;
use std::fmt::Write as _;

/// Renders one op stream as `ip  line  MNEMONIC operands`.
///
/// `resolve_const`/`resolve_name`, when given, annotate constant-pool and
/// name-pool indices with their resolved text (e.g. `PUSH_CONSTANT 3 ; "hi"`).
#[must_use]
pub fn disassemble(
    ops: &[Op],
    lines: &[u32],
    resolve_const: Option<&dyn Fn(u16) -> Option<String>>,
    resolve_name: Option<&dyn Fn(u16) -> Option<String>>,
) -> String {
    debug_assert_eq!(ops.len(), lines.len(), "oplines must be parallel to opcodes");
    let mut out = String::new();
    for (ip, op) in ops.iter().enumerate() {
        let line = lines.get(ip).copied().unwrap_or(0);
        let _ = write!(out, "{ip:04}  {line:>5}  {:<18}", op.mnemonic());
        write_operands(&mut out, op, resolve_const, resolve_name);
        out.push('\n');
    }
    out
}

fn write_operands(
    out: &mut String,
    op: &Op,
    resolve_const: Option<&dyn Fn(u16) -> Option<String>>,
    resolve_name: Option<&dyn Fn(u16) -> Option<String>>,
) {
    let annotate_const = |out: &mut String, ix: u16| {
        let _ = write!(out, "{ix}");
        if let Some(resolve) = resolve_const {
            if let Some(text) = resolve(ix) {
                let _ = write!(out, "  ; {text}");
            }
        }
    };
    let annotate_name = |out: &mut String, ix: u16| {
        let _ = write!(out, "{ix}");
        if let Some(resolve) = resolve_name {
            if let Some(text) = resolve(ix) {
                let _ = write!(out, "  ; {text}");
            }
        }
    };
    match *op {
        Op::PushConstant(ix) | Op::PushList(ix) | Op::PushClosure(ix) | Op::CreateClass(ix)
        | Op::Import(ix) => annotate_const(out, ix),
        Op::PushLocalN(n) | Op::StoreLocalN(n) => {
            let _ = write!(out, "{n}");
        }
        Op::PushGlobal(n) | Op::StoreGlobal(n) | Op::PushBuiltinFn(n) | Op::PushBuiltinTy(n)
        | Op::PushUpvalue(n) | Op::StoreUpvalue(n) => {
            let _ = write!(out, "{n}");
        }
        Op::CaptureUpvalue { is_immediate, index } => {
            let _ = write!(out, "{index} immediate={is_immediate}");
        }
        Op::Call(n) | Op::TailCall(n) => {
            let _ = write!(out, "{n}");
        }
        Op::MethodCall(argc, name_ix) | Op::SuperCall(argc, name_ix) => {
            let _ = write!(out, "{argc} ");
            annotate_name(out, name_ix);
        }
        Op::IterTest(var_ix) => {
            let _ = write!(out, "{var_ix}");
        }
        Op::Iter(var_ix, offset) => {
            let _ = write!(out, "{var_ix} -> {offset}");
        }
        Op::Jump(off) | Op::Loop(off) | Op::JumpIf(off) | Op::JumpIfNot(off) | Op::Or(off)
        | Op::And(off) => {
            let _ = write!(out, "{off}");
        }
        Op::GetAttrib(ix) | Op::GetAttribKeep(ix) | Op::SetAttrib(ix) => annotate_name(out, ix),
        Op::Add(f) | Op::Subtract(f) | Op::Multiply(f) | Op::Divide(f) | Op::Exponent(f)
        | Op::Mod(f) | Op::BitAnd(f) | Op::BitOr(f) | Op::BitXor(f) | Op::LShift(f)
        | Op::RShift(f) => {
            let _ = write!(out, "inplace={f}");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_every_op_on_its_own_line() {
        let ops = vec![Op::PushConstant(0), Op::Add(0), Op::Return];
        let lines = vec![1, 1, 1];
        let out = disassemble(&ops, &lines, None, None);
        assert_eq!(out.lines().count(), 3);
        assert!(out.contains("PUSH_CONSTANT"));
        assert!(out.contains("RETURN"));
    }

    #[test]
    fn resolves_constant_annotation() {
        let ops = vec![Op::PushConstant(2)];
        let lines = vec![7];
        let resolve = |ix: u16| (ix == 2).then(|| "\"hi\"".to_string());
        let out = disassemble(&ops, &lines, Some(&resolve), None);
        assert!(out.contains("\"hi\""));
    }
}
