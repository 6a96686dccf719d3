//! error.rs — structured errors for the data-model layer.
//!
//! Built with `thiserror` (one variant per failure
//! class, `#[from]` for wrapped causes).

use thiserror::Error;

/// Errors raised by operations on [`crate::value::Value`] itself (hashing,
/// conversion), independent of any particular heap-object kind.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ValueError {
    /// `hash()` called on a value kind with no defined hash
    /// (§3.1: only null/bool/number/string/range/class are hashable).
    #[error("value is not hashable")]
    Unhashable,
}

/// Errors raised by heap-object operations (map insert, string ops, …).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ObjError {
    #[error("unhashable key")]
    UnhashableKey,
    #[error("index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: i64, len: usize },
}
