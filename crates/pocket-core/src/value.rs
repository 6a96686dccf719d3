//! value.rs — the uniform 64-bit-wide tagged `Value` (§3.1).
//!
//! Either a NaN-boxed word or a tagged-variant representation satisfies
//! the required predicates; this crate picks the tagged variant (see
//! `DESIGN.md`) because the workspace forbids `unsafe_code`, which rules
//! out the raw bit-twiddling a NaN-boxed word would need.

use crate::heap::ObjRef;
use std::fmt;

/// A PocketLang runtime value.
///
/// `Copy` — heap payloads live behind [`ObjRef`], a small `Copy` handle,
/// so a `Value` never owns heap memory directly.
#[derive(Clone, Copy, Debug)]
pub enum Value {
    Null,
    /// Sentinel distinct from `Null`: "no such key", "empty map slot", …
    Undefined,
    /// Sentinel for "this call has no return value" (distinct from `Null`,
    /// which is a value a script can observe and compare against).
    Void,
    Bool(bool),
    Num(f64),
    Obj(ObjRef),
}

impl Value {
    #[must_use]
    pub fn is_num(&self) -> bool {
        matches!(self, Value::Num(_))
    }
    #[must_use]
    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Bool(_))
    }
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    #[must_use]
    pub fn is_undef(&self) -> bool {
        matches!(self, Value::Undefined)
    }
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }
    #[must_use]
    pub fn is_obj(&self) -> bool {
        matches!(self, Value::Obj(_))
    }

    #[must_use]
    pub fn as_obj(&self) -> Option<ObjRef> {
        match self {
            Value::Obj(r) => Some(*r),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// `false` for `null`, `false`, `0` (and `-0`/`NaN` are *not* falsy —
    /// only the literal zero bit patterns count as zero here via `== 0.0`,
    /// matching IEEE equality, not `same`), empty string, empty list, empty
    /// map; `true` otherwise.
    #[must_use]
    pub fn truthy(&self, heap: &crate::heap::Heap) -> bool {
        match self {
            Value::Null | Value::Undefined | Value::Void => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            Value::Obj(r) => match heap.get(*r) {
                Some(crate::heap::Obj::Str(s)) => !s.as_str().is_empty(),
                Some(crate::heap::Obj::List(l)) => !l.values.is_empty(),
                Some(crate::heap::Obj::Map(m)) => m.count != 0,
                _ => true,
            },
        }
    }

    /// Bit-identity: distinguishes `+0.0`/`-0.0` and any two differently
    /// bit-patterned NaNs; for objects, compares the handle (so two
    /// distinct-but-equal strings are not `same`).
    #[must_use]
    pub fn same(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Null, Value::Null)
            | (Value::Undefined, Value::Undefined)
            | (Value::Void, Value::Void) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Num(x), Value::Num(y)) => x.to_bits() == y.to_bits(),
            (Value::Obj(x), Value::Obj(y)) => x == y,
            _ => false,
        }
    }

    /// Semantic equality: numeric compare (so `+0.0 == -0.0`, `NaN != NaN`),
    /// strings by content, ranges by endpoints, lists/maps element-wise,
    /// everything else (module/fn/closure/fiber/class/instance/…) by
    /// identity.
    #[must_use]
    pub fn equal(a: &Value, b: &Value, heap: &crate::heap::Heap) -> bool {
        use crate::heap::Obj;
        match (a, b) {
            (Value::Null, Value::Null)
            | (Value::Undefined, Value::Undefined)
            | (Value::Void, Value::Void) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Num(x), Value::Num(y)) => x == y,
            (Value::Obj(x), Value::Obj(y)) => {
                if x == y {
                    return true;
                }
                match (heap.get(*x), heap.get(*y)) {
                    (Some(Obj::Str(a)), Some(Obj::Str(b))) => a.as_str() == b.as_str(),
                    (Some(Obj::Range(a)), Some(Obj::Range(b))) => {
                        a.from == b.from && a.to == b.to
                    }
                    (Some(Obj::List(a)), Some(Obj::List(b))) => {
                        a.values.len() == b.values.len()
                            && a.values
                                .iter()
                                .zip(b.values.iter())
                                .all(|(x, y)| Value::equal(x, y, heap))
                    }
                    (Some(Obj::Map(a)), Some(Obj::Map(b))) => {
                        if a.count != b.count {
                            return false;
                        }
                        a.iter().all(|(k, v)| {
                            b.get(k, heap)
                                .is_some_and(|bv| Value::equal(&v, &bv, heap))
                        })
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// `hash` per §3.1: defined for null, bool, number, string, range,
    /// class; unsupported for every other object kind.
    pub fn hash(&self, heap: &crate::heap::Heap) -> Result<u64, crate::error::ValueError> {
        use crate::heap::Obj;
        use std::hash::{Hash, Hasher};
        let mut h = std::collections::hash_map::DefaultHasher::new();
        match self {
            Value::Null => 0u8.hash(&mut h),
            Value::Undefined => 1u8.hash(&mut h),
            Value::Void => 2u8.hash(&mut h),
            Value::Bool(b) => b.hash(&mut h),
            Value::Num(n) => hash_f64(*n).hash(&mut h),
            Value::Obj(r) => match heap.get(*r) {
                Some(Obj::Str(s)) => return Ok(s.hash),
                Some(Obj::Range(rg)) => {
                    hash_f64(rg.from).hash(&mut h);
                    hash_f64(rg.to).hash(&mut h);
                }
                Some(Obj::Class(_)) => r.hash(&mut h),
                _ => return Err(crate::error::ValueError::Unhashable),
            },
        }
        Ok(h.finish())
    }
}

/// `+0.0`/`-0.0` hash identically (§4.1).
fn hash_f64(n: f64) -> u64 {
    if n == 0.0 {
        0
    } else {
        n.to_bits()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Undefined => write!(f, "undefined"),
            Value::Void => write!(f, "void"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Num(n) => write!(f, "{n}"),
            Value::Obj(r) => write!(f, "<obj#{}>", r.index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    #[test]
    fn same_distinguishes_signed_zero() {
        assert!(!Value::same(&Value::Num(0.0), &Value::Num(-0.0)));
    }

    #[test]
    fn equal_treats_signed_zero_as_equal() {
        let heap = Heap::new();
        assert!(Value::equal(&Value::Num(0.0), &Value::Num(-0.0), &heap));
    }

    #[test]
    fn same_nan_with_identical_bits() {
        let n = f64::NAN;
        assert!(Value::same(&Value::Num(n), &Value::Num(n)));
    }

    #[test]
    fn equal_nan_is_never_equal() {
        let heap = Heap::new();
        assert!(!Value::equal(
            &Value::Num(f64::NAN),
            &Value::Num(f64::NAN),
            &heap
        ));
    }

    #[test]
    fn truthy_rules() {
        let heap = Heap::new();
        assert!(!Value::Null.truthy(&heap));
        assert!(!Value::Bool(false).truthy(&heap));
        assert!(!Value::Num(0.0).truthy(&heap));
        assert!(Value::Num(1.0).truthy(&heap));
        assert!(Value::Bool(true).truthy(&heap));
    }

    #[test]
    fn hash_zero_ignores_sign() {
        let heap = Heap::new();
        let a = Value::Num(0.0).hash(&heap).unwrap();
        let b = Value::Num(-0.0).hash(&heap).unwrap();
        assert_eq!(a, b);
    }

    proptest::proptest! {
        #[test]
        fn same_is_reflexive_for_any_number(x: f64) {
            let v = Value::Num(x);
            proptest::prop_assert!(Value::same(&v, &v));
        }

        #[test]
        fn equal_matches_ieee_comparison(a: f64, b: f64) {
            let heap = Heap::new();
            proptest::prop_assert_eq!(Value::equal(&Value::Num(a), &Value::Num(b), &heap), a == b);
        }

        #[test]
        fn equal_implies_same_hash_for_numbers(a: f64, b: f64) {
            let heap = Heap::new();
            if Value::equal(&Value::Num(a), &Value::Num(b), &heap) {
                let ha = Value::Num(a).hash(&heap).unwrap();
                let hb = Value::Num(b).hash(&heap).unwrap();
                proptest::prop_assert_eq!(ha, hb);
            }
        }

        #[test]
        fn equal_implies_same_hash_for_bools(a: bool, b: bool) {
            let heap = Heap::new();
            if Value::equal(&Value::Bool(a), &Value::Bool(b), &heap) {
                let ha = Value::Bool(a).hash(&heap).unwrap();
                let hb = Value::Bool(b).hash(&heap).unwrap();
                proptest::prop_assert_eq!(ha, hb);
            }
        }
    }
}
