//! error.rs — runtime error taxonomy (§7 "Runtime errors").
//!
//! Expressed with `thiserror` to match the rest of the workspace
//! (`pocket-core::error`, `pocket-compiler::error`).

use thiserror::Error;

/// Something the interpreter itself cannot recover from — as opposed to a
/// PocketLang-level runtime error, which is reported through
/// `FiberObj::error` and observed by the host (§7: "the host observes
/// `fiber.error != NULL`"), not through a Rust `Result`.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("stack overflow: exceeded {limit} call frames")]
    CallStackOverflow { limit: usize },

    #[error("data stack overflow: exceeded {limit} slots")]
    DataStackOverflow { limit: usize },

    #[error("resumed a fiber that is {state} (only NEW or YIELDED fibers can be resumed)")]
    InvalidResume { state: &'static str },

    #[error("`{name}` expected {expected} argument(s), got {got}")]
    ArityMismatch {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("`{0}` is not callable")]
    NotCallable(String),

    #[error("no attribute `{attrib}` on {kind}")]
    NoSuchAttribute { kind: String, attrib: String },

    #[error("no method `{method}` on {kind}")]
    NoSuchMethod { kind: String, method: String },

    #[error("unsupported operand type(s) for `{op}`: {kind}")]
    TypeError { op: String, kind: String },

    #[error("index out of bounds: {index} (len {len})")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("unhashable type used as a map key")]
    Unhashable,

    #[error("undefined global slot {0}")]
    UndefinedGlobal(u8),

    #[error("module `{0}` not found")]
    ModuleNotFound(String),

    #[error("{0}")]
    Custom(String),
}

/// Top-level VM error: either a [`RuntimeError`] bubbled out of a fiber that
/// had no caller to hand its `error` string back to, or a host/embedding
/// misuse.
#[derive(Debug, Error)]
pub enum VmError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("script raised an uncaught error: {0}")]
    Uncaught(String),

    #[error("no active fiber")]
    NoActiveFiber,
}
