//! builtins.rs — the builtin-function and builtin-type name tables (§4.6
//! "Name resolution order: locals → upvalues → module globals → builtin
//! registry").
//!
//! Shared between `pocket-compiler` (which resolves a bare name against
//! these tables once a module global lookup fails) and `pocket-vm` (which
//! installs the matching runtime values at the same indices), so the two
//! never drift out of sync.

use crate::heap::ClassOf;

/// Builtin free functions, in `PushBuiltinFn` index order.
pub const BUILTIN_FN_NAMES: &[&str] = &["print", "clock", "yield", "type_of"];

/// Builtin type names, in `PushBuiltinTy` index order — one entry per
/// [`ClassOf`] primitive kind (`Instance` excluded: it has no single name).
pub const BUILTIN_TY_NAMES: &[&str] = &[
    "Object", "Null", "Bool", "Number", "String", "List", "Map", "Range", "Module", "Function",
    "Fiber", "Class",
];

/// Index of `name` in [`BUILTIN_FN_NAMES`], if any.
#[must_use]
pub fn builtin_fn_index(name: &str) -> Option<u8> {
    BUILTIN_FN_NAMES.iter().position(|n| *n == name).map(|i| i as u8)
}

/// Index of `name` in [`BUILTIN_TY_NAMES`], if any.
#[must_use]
pub fn builtin_ty_index(name: &str) -> Option<u8> {
    BUILTIN_TY_NAMES.iter().position(|n| *n == name).map(|i| i as u8)
}

/// The [`ClassOf`] a `PushBuiltinTy` index names.
#[must_use]
pub fn class_of_for_index(ix: u8) -> Option<ClassOf> {
    match ix {
        0 => Some(ClassOf::Object),
        1 => Some(ClassOf::Null),
        2 => Some(ClassOf::Bool),
        3 => Some(ClassOf::Number),
        4 => Some(ClassOf::String),
        5 => Some(ClassOf::List),
        6 => Some(ClassOf::Map),
        7 => Some(ClassOf::Range),
        8 => Some(ClassOf::Module),
        9 => Some(ClassOf::Function),
        10 => Some(ClassOf::Fiber),
        11 => Some(ClassOf::Class),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fn_index_roundtrips() {
        assert_eq!(builtin_fn_index("print"), Some(0));
        assert_eq!(builtin_fn_index("nope"), None);
    }

    #[test]
    fn ty_index_maps_to_class_of() {
        let ix = builtin_ty_index("Fiber").unwrap();
        assert_eq!(class_of_for_index(ix), Some(ClassOf::Fiber));
    }
}
