//! class.rs — classes and instances (§3.3).

use crate::heap::map::PkMap;
use crate::heap::ObjRef;

/// What a class describes: one of the built-in primitive kinds, or a
/// user-defined instance class. Used as the "primitive-type class
/// pointers" GC root set (§4.3 root #5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassOf {
    Object,
    Null,
    Bool,
    Number,
    String,
    List,
    Map,
    Range,
    Module,
    Function,
    Fiber,
    Class,
    /// A user-defined class (`class Name … end`).
    Instance,
}

/// A native constructor/destructor pair for a foreign (host-backed) class.
pub type NativeNewFn = fn(&mut crate::heap::Heap) -> usize;
pub type NativeDeleteFn = fn(usize);

/// A PocketLang class.
pub struct ClassObj {
    pub name: String,
    pub owner: ObjRef,
    /// Zero-argument constructor closure (compiler-synthesized).
    pub ctor: Option<ObjRef>,
    /// Method name -> Closure. Includes special slots `_init`, `@getter`,
    /// `@setter`, `_repr`, and operator overloads (`+`, `==`, `>`, …).
    pub methods: Vec<(String, ObjRef)>,
    pub static_attribs: PkMap,
    /// Name-pool indices (into `owner`'s Module) for declarative fields.
    pub field_names: Vec<u32>,
    pub super_class: Option<ObjRef>,
    pub native_new: Option<NativeNewFn>,
    pub native_delete: Option<NativeDeleteFn>,
    pub class_of: ClassOf,
}

impl ClassObj {
    #[must_use]
    pub fn new(name: impl Into<String>, owner: ObjRef, class_of: ClassOf) -> Self {
        Self {
            name: name.into(),
            owner,
            ctor: None,
            methods: Vec::new(),
            static_attribs: PkMap::new(),
            field_names: Vec::new(),
            super_class: None,
            native_new: None,
            native_delete: None,
            class_of,
        }
    }

    /// Look up a method on this class only (no superclass walk — see
    /// `Heap::resolve_method` for the inherited lookup).
    #[must_use]
    pub fn own_method(&self, name: &str) -> Option<ObjRef> {
        self.methods
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| *f)
    }

    pub fn add_method(&mut self, name: impl Into<String>, closure: ObjRef) {
        self.methods.push((name.into(), closure));
    }
}

/// An instance of a user-defined class.
#[derive(Clone)]
pub struct InstanceObj {
    pub cls: ObjRef,
    pub attribs: PkMap,
    /// Opaque payload for foreign (native-backed) classes.
    pub native: Option<usize>,
}

impl InstanceObj {
    #[must_use]
    pub fn new(cls: ObjRef) -> Self {
        Self {
            cls,
            attribs: PkMap::new(),
            native: None,
        }
    }
}
