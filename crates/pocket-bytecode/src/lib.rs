//! pocket-bytecode — PocketLang's instruction set.
//!
//! Contains only the ISA: the [`Op`] enum, per-op stack-delta metadata, and
//! a disassembler. No knowledge of values, modules, or execution — those
//! live in `pocket-core`/`pocket-vm` so this crate stays a pure data
//! definition shared by the compiler and the interpreter.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

pub mod disasm;
pub mod op;

pub use disasm::disassemble;
pub use op::{Op, StackDelta};
