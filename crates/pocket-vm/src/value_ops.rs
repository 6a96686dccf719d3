//! value_ops.rs — primitive arithmetic/comparison/stringification (§4.1,
//! §4.8 "arithmetic/comparison rules").
//!
//! Covers the built-in numeric/string/list/range cases directly; an
//! operand that's an `Instance` falls back to the operator-overload path
//! in `interp.rs`, which needs the call machinery this module doesn't
//! have access to.

use crate::error::RuntimeError;
use pocket_core::heap::{Heap, Obj, ObjRef, PkList, PkString};
use pocket_core::value::Value;

#[must_use]
pub fn kind_name(heap: &Heap, v: &Value) -> String {
    match v {
        Value::Null => "Null".into(),
        Value::Undefined => "Undefined".into(),
        Value::Void => "Void".into(),
        Value::Bool(_) => "Bool".into(),
        Value::Num(_) => "Number".into(),
        Value::Obj(r) => heap.get(*r).map_or("<freed>".into(), |o| o.kind_name().to_string()),
    }
}

/// `true` if `v` is an `Instance`, the one case arithmetic/comparison ops
/// must route through an overloaded method instead of handling directly.
#[must_use]
pub fn is_instance(heap: &Heap, v: &Value) -> bool {
    matches!(v.as_obj().and_then(|r| heap.get(r)), Some(Obj::Instance(_)))
}

/// `+`: overloaded for number+number, string+string, list+list (§4.8).
pub fn add(heap: &mut Heap, a: Value, b: Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::Num(x), Value::Num(y)) => Ok(Value::Num(x + y)),
        _ => {
            if let (Some(x), Some(y)) = (as_str(heap, &a), as_str(heap, &b)) {
                let s = PkString::concat(&x, &y);
                return Ok(Value::Obj(heap.alloc(Obj::Str(s))));
            }
            if let (Some(x), Some(y)) = (as_list(heap, &a), as_list(heap, &b)) {
                let mut values = x;
                values.extend(y);
                return Ok(Value::Obj(heap.alloc(Obj::List(PkList::with_values(values)))));
            }
            Err(RuntimeError::TypeError {
                op: "+".into(),
                kind: format!("{} and {}", kind_name(heap, &a), kind_name(heap, &b)),
            })
        }
    }
}

fn as_str(heap: &Heap, v: &Value) -> Option<String> {
    match v.as_obj().and_then(|r| heap.get(r)) {
        Some(Obj::Str(s)) => Some(s.as_str().to_string()),
        _ => None,
    }
}

fn as_list(heap: &Heap, v: &Value) -> Option<Vec<Value>> {
    match v.as_obj().and_then(|r| heap.get(r)) {
        Some(Obj::List(l)) => Some(l.values.clone()),
        _ => None,
    }
}

fn as_num(heap: &Heap, v: &Value, op: &str) -> Result<f64, RuntimeError> {
    v.as_num().ok_or_else(|| RuntimeError::TypeError {
        op: op.into(),
        kind: kind_name(heap, v),
    })
}

macro_rules! numeric_binop {
    ($name:ident, $op:literal, $body:expr) => {
        pub fn $name(heap: &Heap, a: Value, b: Value) -> Result<Value, RuntimeError> {
            let x = as_num(heap, &a, $op)?;
            let y = as_num(heap, &b, $op)?;
            Ok(Value::Num($body(x, y)))
        }
    };
}

numeric_binop!(subtract, "-", |x: f64, y: f64| x - y);
numeric_binop!(multiply, "*", |x: f64, y: f64| x * y);
numeric_binop!(divide, "/", |x: f64, y: f64| x / y);
numeric_binop!(modulo, "%", |x: f64, y: f64| x % y);
numeric_binop!(exponent, "**", |x: f64, y: f64| x.powf(y));

macro_rules! bitwise_binop {
    ($name:ident, $op:literal, $body:expr) => {
        pub fn $name(heap: &Heap, a: Value, b: Value) -> Result<Value, RuntimeError> {
            let x = as_num(heap, &a, $op)? as i64;
            let y = as_num(heap, &b, $op)? as i64;
            Ok(Value::Num($body(x, y) as f64))
        }
    };
}

bitwise_binop!(bit_and, "&", |x: i64, y: i64| x & y);
bitwise_binop!(bit_or, "|", |x: i64, y: i64| x | y);
bitwise_binop!(bit_xor, "^", |x: i64, y: i64| x ^ y);
bitwise_binop!(lshift, "<<", |x: i64, y: i64| x << (y & 63));
bitwise_binop!(rshift, ">>", |x: i64, y: i64| x >> (y & 63));

pub fn negative(heap: &Heap, v: Value) -> Result<Value, RuntimeError> {
    Ok(Value::Num(-as_num(heap, &v, "unary -")?))
}

pub fn bit_not(heap: &Heap, v: Value) -> Result<Value, RuntimeError> {
    Ok(Value::Num(!(as_num(heap, &v, "~")? as i64) as f64))
}

/// Ordering comparisons require numbers on both sides (§4.8: "other
/// comparisons require numbers").
pub fn compare(heap: &Heap, a: Value, b: Value, op: &str) -> Result<std::cmp::Ordering, RuntimeError> {
    let x = as_num(heap, &a, op)?;
    let y = as_num(heap, &b, op)?;
    x.partial_cmp(&y).ok_or_else(|| RuntimeError::TypeError {
        op: op.into(),
        kind: "NaN".into(),
    })
}

/// `in`: membership. Lists/ranges/maps/strings (substring) (§4.8).
pub fn contains(heap: &Heap, needle: &Value, haystack: &Value) -> Result<bool, RuntimeError> {
    match haystack.as_obj().and_then(|r| heap.get(r)) {
        Some(Obj::List(l)) => Ok(l.values.iter().any(|v| Value::equal(v, needle, heap))),
        Some(Obj::Map(m)) => Ok(m.get(needle, heap).is_some()),
        Some(Obj::Range(r)) => {
            let n = needle.as_num().ok_or_else(|| RuntimeError::TypeError {
                op: "in".into(),
                kind: kind_name(heap, needle),
            })?;
            Ok(n >= r.from && n < r.to)
        }
        Some(Obj::Str(s)) => match as_str(heap, needle) {
            Some(n) => Ok(s.as_str().contains(&n)),
            None => Err(RuntimeError::TypeError {
                op: "in".into(),
                kind: kind_name(heap, needle),
            }),
        },
        _ => Err(RuntimeError::TypeError {
            op: "in".into(),
            kind: kind_name(heap, haystack),
        }),
    }
}

/// `is`: type-identity test against a class (§4.8), including primitive
/// classes and user instance ancestry walk.
#[must_use]
pub fn is_instance_of(heap: &Heap, v: &Value, class: ObjRef) -> bool {
    let Some(Obj::Instance(inst)) = v.as_obj().and_then(|r| heap.get(r)) else {
        return false;
    };
    let mut current = Some(inst.cls);
    while let Some(c) = current {
        if c == class {
            return true;
        }
        current = match heap.get(c) {
            Some(Obj::Class(cls)) => cls.super_class,
            _ => None,
        };
    }
    false
}

/// Converts `v` to its default display form (`_repr`-less fallback; the
/// interpreter tries an overloaded `_repr` first when `v` is an Instance).
#[must_use]
pub fn stringify(heap: &Heap, v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Undefined => "undefined".to_string(),
        Value::Void => "".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Num(n) => format!("{n}"),
        Value::Obj(r) => match heap.get(*r) {
            Some(Obj::Str(s)) => s.as_str().to_string(),
            Some(Obj::List(l)) => {
                let parts: Vec<String> = l.values.iter().map(|v| stringify(heap, v)).collect();
                format!("[{}]", parts.join(", "))
            }
            Some(Obj::Map(m)) => {
                let parts: Vec<String> = m
                    .iter()
                    .map(|(k, v)| format!("{}: {}", stringify(heap, &k), stringify(heap, &v)))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Some(Obj::Range(rg)) => format!("{}..{}", rg.from, rg.to),
            Some(Obj::Class(c)) => format!("<class {}>", c.name),
            Some(Obj::Instance(i)) => match heap.get(i.cls) {
                Some(Obj::Class(c)) => format!("<instance of {}>", c.name),
                _ => "<instance>".to_string(),
            },
            Some(Obj::Fn(f)) => format!("<fn {}>", f.name),
            Some(Obj::Closure(_)) => "<closure>".to_string(),
            Some(Obj::Fiber(_)) => "<fiber>".to_string(),
            Some(Obj::Module(m)) => format!("<module {}>", m.name),
            _ => "<obj>".to_string(),
        },
    }
}
