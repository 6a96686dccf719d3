//! pocket-core — PocketLang's data model.
//!
//! Owns the pieces that are tightly coupled through a shared object graph
//! and a uniform value representation (§2): the tagged [`value::Value`],
//! the heap object kinds (§3.2–3.3), the mark-and-sweep [`gc`], and Module
//! tables (§4.4). Knows nothing about source text, the compiler, or the
//! interpreter loop — those live in `pocket-lexer`/`pocket-compiler`/
//! `pocket-vm`.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

pub mod builtins;
pub mod error;
pub mod gc;
pub mod heap;
pub mod value;

pub use error::{ObjError, ValueError};
pub use gc::{collect, GcRoots, Handle, TempRefGuard};
pub use heap::{Heap, Obj, ObjRef};
pub use value::Value;

/// Re-exports grouped for `use pocket_core::prelude::*;`.
pub mod prelude {
    pub use crate::builtins::{BUILTIN_FN_NAMES, BUILTIN_TY_NAMES};
    pub use crate::error::{ObjError, ValueError};
    pub use crate::gc::{collect, GcRoots, Handle, TempRefGuard};
    pub use crate::heap::*;
    pub use crate::value::Value;
}
