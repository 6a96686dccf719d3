//! function.rs — a bytecode or native function (§3.3 Fn).

use crate::heap::ObjRef;
use pocket_bytecode::Op;

/// A PocketLang function. Either bytecode-backed or a native host
/// function, never both.
#[derive(Clone)]
pub struct FnObj {
    pub name: String,
    pub owner_module: ObjRef,
    /// `-1` marks a variadic function.
    pub arity: i32,
    pub upvalue_count: u16,
    pub docstring: Option<String>,
    pub body: FnBody,
}

#[derive(Clone)]
pub enum FnBody {
    Bytecode {
        opcodes: Vec<Op>,
        /// Parallel to `opcodes` (§3.4 invariant).
        oplines: Vec<u32>,
        stack_size: u32,
    },
    Native(NativeFn),
}

/// A host function pointer, called with the active fiber's argument slots.
pub type NativeFn = fn(&mut crate::heap::Heap, args: &[crate::value::Value]) -> crate::value::Value;

impl FnObj {
    #[must_use]
    pub fn new_bytecode(
        name: impl Into<String>,
        owner_module: ObjRef,
        arity: i32,
        upvalue_count: u16,
    ) -> Self {
        Self {
            name: name.into(),
            owner_module,
            arity,
            upvalue_count,
            docstring: None,
            body: FnBody::Bytecode {
                opcodes: Vec::new(),
                oplines: Vec::new(),
                stack_size: 0,
            },
        }
    }

    #[must_use]
    pub fn new_native(
        name: impl Into<String>,
        owner_module: ObjRef,
        arity: i32,
        f: NativeFn,
    ) -> Self {
        Self {
            name: name.into(),
            owner_module,
            arity,
            upvalue_count: 0,
            docstring: None,
            body: FnBody::Native(f),
        }
    }

    #[must_use]
    pub fn is_native(&self) -> bool {
        matches!(self.body, FnBody::Native(_))
    }

    #[must_use]
    pub fn is_variadic(&self) -> bool {
        self.arity == -1
    }
}

impl std::fmt::Debug for FnObj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnObj")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("native", &self.is_native())
            .finish()
    }
}
