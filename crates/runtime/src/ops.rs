//! Operator dispatch
//!
//! Prefix, infix, index and slice semantics, dispatched by operand types.
//! Boolean `&&`/`||` short-circuit in the evaluator and never reach this
//! module. Equality works across all types (different types compare
//! unequal); every other mismatch is an error citing both operand types.

use crate::value::{Object, SliceValue, Value};
use slug_core::Dec64;
use slug_syntax::ast::{InfixOp, PrefixOp};
use std::sync::Arc;

fn type_mismatch(op: impl std::fmt::Display, lhs: &Object, rhs: &Object) -> Object {
    Object::error(format!(
        "unknown operator: {} {} {}",
        lhs.type_name(),
        op,
        rhs.type_name()
    ))
}

pub fn eval_prefix(op: PrefixOp, operand: Object) -> Object {
    match (op, &operand.value) {
        (PrefixOp::Not, Value::Bool(b)) => Object::boolean(!b),
        (PrefixOp::Not, Value::Nil) => Object::boolean(true),
        (PrefixOp::Not, _) => Object::boolean(false),
        (PrefixOp::Neg, Value::Number(n)) => Object::number(n.neg()),
        (PrefixOp::BitNot, Value::Number(n)) => Object::number(n.bit_not()),
        (PrefixOp::BitNot, Value::Bytes(b)) => {
            let flipped: Vec<u8> = b.iter().map(|byte| !byte).collect();
            Object::bytes(flipped)
        }
        _ => Object::error(format!(
            "unknown operator: {}{}",
            op,
            operand.type_name()
        )),
    }
}

pub fn eval_infix(op: InfixOp, lhs: Object, rhs: Object) -> Object {
    // Equality is defined across all types; mismatched types are unequal.
    match op {
        InfixOp::Eq => return Object::boolean(lhs == rhs),
        InfixOp::Ne => return Object::boolean(lhs != rhs),
        _ => {}
    }

    match (&lhs.value, &rhs.value) {
        (Value::Number(a), Value::Number(b)) => number_infix(op, *a, *b, &lhs, &rhs),
        (Value::Str(a), Value::Str(b)) => string_infix(op, a, b, &lhs, &rhs),
        (Value::Str(a), Value::Number(n)) if op == InfixOp::Mul => repeat_string(a, *n),
        (Value::Bytes(a), Value::Bytes(b)) => bytes_infix(op, a, b, &lhs, &rhs),
        (Value::Bytes(a), Value::Number(n)) if op == InfixOp::Append => {
            match byte_of(*n) {
                Some(byte) => {
                    let mut out = a.to_vec();
                    out.push(byte);
                    Object::bytes(out)
                }
                None => Object::error(format!(
                    "byte value out of range in {} :+ {}",
                    lhs.type_name(),
                    n
                )),
            }
        }
        (Value::Number(n), Value::Bytes(b)) if op == InfixOp::Prepend => {
            match byte_of(*n) {
                Some(byte) => {
                    let mut out = Vec::with_capacity(b.len() + 1);
                    out.push(byte);
                    out.extend_from_slice(b);
                    Object::bytes(out)
                }
                None => Object::error(format!(
                    "byte value out of range in {} +: {}",
                    n,
                    rhs.type_name()
                )),
            }
        }
        (Value::List(a), _) if op == InfixOp::Append => {
            let mut out = a.as_ref().clone();
            out.push(rhs);
            Object::list(out)
        }
        (_, Value::List(b)) if op == InfixOp::Prepend => {
            let mut out = Vec::with_capacity(b.len() + 1);
            out.push(lhs);
            out.extend(b.iter().cloned());
            Object::list(out)
        }
        (Value::List(a), Value::List(b)) if op == InfixOp::Add => {
            let mut out = a.as_ref().clone();
            out.extend(b.iter().cloned());
            Object::list(out)
        }
        // String concatenation with any operand falls back to inspect
        (Value::Str(a), _) if op == InfixOp::Add => {
            Object::string(format!("{}{}", a, rhs.inspect()))
        }
        (_, Value::Str(b)) if op == InfixOp::Add => {
            Object::string(format!("{}{}", lhs.inspect(), b))
        }
        _ => type_mismatch(op, &lhs, &rhs),
    }
}

fn number_infix(op: InfixOp, a: Dec64, b: Dec64, lhs: &Object, rhs: &Object) -> Object {
    let num = |n: Dec64| Object::number(n);
    match op {
        InfixOp::Add => num(a + b),
        InfixOp::Sub => num(a - b),
        InfixOp::Mul => num(a * b),
        InfixOp::Div => num(a / b),
        InfixOp::Rem => num(a.rem(b)),
        InfixOp::BitAnd => num(a.bit_and(b)),
        InfixOp::BitOr => num(a.bit_or(b)),
        InfixOp::BitXor => num(a.bit_xor(b)),
        InfixOp::Shl => num(a.shl(b)),
        InfixOp::Shr => num(a.shr(b)),
        InfixOp::Lt => Object::boolean(a.partial_cmp(&b).is_some_and(|o| o.is_lt())),
        InfixOp::Le => Object::boolean(a.partial_cmp(&b).is_some_and(|o| o.is_le())),
        InfixOp::Gt => Object::boolean(a.partial_cmp(&b).is_some_and(|o| o.is_gt())),
        InfixOp::Ge => Object::boolean(a.partial_cmp(&b).is_some_and(|o| o.is_ge())),
        _ => type_mismatch(op, lhs, rhs),
    }
}

fn string_infix(op: InfixOp, a: &Arc<str>, b: &Arc<str>, lhs: &Object, rhs: &Object) -> Object {
    match op {
        InfixOp::Add => Object::string(format!("{}{}", a, b)),
        InfixOp::Lt => Object::boolean(a < b),
        InfixOp::Le => Object::boolean(a <= b),
        InfixOp::Gt => Object::boolean(a > b),
        InfixOp::Ge => Object::boolean(a >= b),
        _ => type_mismatch(op, lhs, rhs),
    }
}

fn repeat_string(s: &Arc<str>, n: Dec64) -> Object {
    if n.is_nan() || !n.is_exact_integer() || n.coefficient() < 0 {
        return Object::error(format!(
            "string repetition needs a non-negative integer, got {}",
            n
        ));
    }
    Object::string(s.repeat(n.coefficient() as usize))
}

fn bytes_infix(op: InfixOp, a: &Arc<[u8]>, b: &Arc<[u8]>, lhs: &Object, rhs: &Object) -> Object {
    match op {
        InfixOp::Add | InfixOp::Append => {
            let mut out = a.to_vec();
            out.extend_from_slice(b);
            Object::bytes(out)
        }
        InfixOp::Prepend => {
            let mut out = a.to_vec();
            out.extend_from_slice(b);
            Object::bytes(out)
        }
        // The shorter operand wraps (index modulo its length) so the result
        // is as long as the longer operand.
        InfixOp::BitAnd => Object::bytes(zip_bytes(a, b, |x, y| x & y)),
        InfixOp::BitOr => Object::bytes(zip_bytes(a, b, |x, y| x | y)),
        InfixOp::BitXor => Object::bytes(zip_bytes(a, b, |x, y| x ^ y)),
        InfixOp::Lt => Object::boolean(a < b),
        InfixOp::Le => Object::boolean(a <= b),
        InfixOp::Gt => Object::boolean(a > b),
        InfixOp::Ge => Object::boolean(a >= b),
        _ => type_mismatch(op, lhs, rhs),
    }
}

fn zip_bytes(a: &[u8], b: &[u8], f: impl Fn(u8, u8) -> u8) -> Vec<u8> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| f(a[i % a.len()], b[i % b.len()]))
        .collect()
}

fn byte_of(n: Dec64) -> Option<u8> {
    if n.is_exact_integer() && (0..=255).contains(&n.coefficient()) {
        Some(n.coefficient() as u8)
    } else {
        None
    }
}

/// Normalize a possibly negative index against `len`. Out of range is None.
fn resolve_index(n: Dec64, len: usize) -> Option<usize> {
    if n.is_nan() || !n.is_exact_integer() {
        return None;
    }
    let raw = n.coefficient();
    let idx = if raw < 0 { raw + len as i64 } else { raw };
    if (0..len as i64).contains(&idx) {
        Some(idx as usize)
    } else {
        None
    }
}

pub fn eval_index(target: &Object, index: &Object) -> Object {
    if let Value::Slice(slice) = &index.value {
        return eval_slice(target, slice);
    }
    match (&target.value, &index.value) {
        (Value::Str(s), Value::Number(n)) => {
            let chars: Vec<char> = s.chars().collect();
            match resolve_index(*n, chars.len()) {
                Some(i) => Object::string(chars[i].to_string()),
                None => Object::nil(),
            }
        }
        (Value::List(items), Value::Number(n)) => match resolve_index(*n, items.len()) {
            Some(i) => items[i].clone(),
            None => Object::nil(),
        },
        (Value::Bytes(bytes), Value::Number(n)) => match resolve_index(*n, bytes.len()) {
            Some(i) => Object::int(bytes[i] as i64),
            None => Object::nil(),
        },
        (Value::Map(map), _) => {
            if !index.is_hashable() {
                return Object::error(format!("unusable as map key: {}", index.type_name()));
            }
            map.get(index).cloned().unwrap_or_else(Object::nil)
        }
        _ => Object::error(format!(
            "index operator not supported: {}[{}]",
            target.type_name(),
            index.type_name()
        )),
    }
}

/// Slice with normalized negative bounds, clamped to length. A nil step
/// defaults to 1; step <= 0 is an error.
pub fn eval_slice(target: &Object, slice: &SliceValue) -> Object {
    let len = match &target.value {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Bytes(bytes) => bytes.len(),
        _ => {
            return Object::error(format!(
                "slice operator not supported: {}",
                target.type_name()
            ));
        }
    };

    let step = match slice.step {
        None => 1,
        Some(n) if n.is_exact_integer() && n.coefficient() > 0 => n.coefficient(),
        Some(n) => return Object::error(format!("slice step must be a positive integer, got {}", n)),
    };
    let clamp_bound = |n: Dec64, default: i64| -> i64 {
        if n.is_nan() || !n.is_exact_integer() {
            return default;
        }
        let raw = n.coefficient();
        let v = if raw < 0 { raw + len as i64 } else { raw };
        v.clamp(0, len as i64)
    };
    let start = slice.start.map_or(0, |n| clamp_bound(n, 0));
    let end = slice.end.map_or(len as i64, |n| clamp_bound(n, len as i64));

    let indices = (start..end.max(start)).step_by(step as usize);
    match &target.value {
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Object::string(indices.map(|i| chars[i as usize]).collect::<String>())
        }
        Value::List(items) => {
            Object::list(indices.map(|i| items[i as usize].clone()).collect())
        }
        Value::Bytes(bytes) => {
            Object::bytes(indices.map(|i| bytes[i as usize]).collect::<Vec<u8>>())
        }
        _ => unreachable!("length computed above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(s: &str) -> Object {
        Object::number(s.parse().expect("number"))
    }

    #[test]
    fn test_prefix_not_truth_table() {
        assert_eq!(
            eval_prefix(PrefixOp::Not, Object::boolean(true)),
            Object::boolean(false)
        );
        assert_eq!(
            eval_prefix(PrefixOp::Not, Object::nil()),
            Object::boolean(true)
        );
        assert_eq!(
            eval_prefix(PrefixOp::Not, Object::int(7)),
            Object::boolean(false)
        );
    }

    #[test]
    fn test_prefix_neg_and_bitnot() {
        assert_eq!(eval_prefix(PrefixOp::Neg, num("2.5")), num("-2.5"));
        assert!(eval_prefix(PrefixOp::Neg, Object::string("x")).is_error());
        assert_eq!(
            eval_prefix(PrefixOp::BitNot, Object::bytes(vec![0x0f])),
            Object::bytes(vec![0xf0])
        );
    }

    #[test]
    fn test_number_arithmetic() {
        assert_eq!(eval_infix(InfixOp::Add, num("1.2"), num("3.4")), num("4.6"));
        assert_eq!(eval_infix(InfixOp::Mul, num("3"), num("4")), num("12"));
        assert_eq!(eval_infix(InfixOp::Shl, num("1"), num("4")), num("16"));
        assert_eq!(
            eval_infix(InfixOp::Lt, num("1"), num("2")),
            Object::boolean(true)
        );
    }

    #[test]
    fn test_equality_across_types() {
        assert_eq!(
            eval_infix(InfixOp::Eq, num("1"), Object::string("1")),
            Object::boolean(false)
        );
        assert_eq!(
            eval_infix(InfixOp::Ne, num("1"), Object::string("1")),
            Object::boolean(true)
        );
    }

    #[test]
    fn test_string_ops() {
        assert_eq!(
            eval_infix(InfixOp::Add, Object::string("ab"), Object::string("cd")),
            Object::string("abcd")
        );
        assert_eq!(
            eval_infix(InfixOp::Lt, Object::string("abc"), Object::string("abd")),
            Object::boolean(true)
        );
        assert_eq!(
            eval_infix(InfixOp::Mul, Object::string("ab"), num("3")),
            Object::string("ababab")
        );
        assert!(eval_infix(InfixOp::Mul, Object::string("ab"), num("-1")).is_error());
    }

    #[test]
    fn test_string_concat_falls_back_to_inspect() {
        assert_eq!(
            eval_infix(InfixOp::Add, Object::string("n = "), num("5")),
            Object::string("n = 5")
        );
        assert_eq!(
            eval_infix(
                InfixOp::Add,
                Object::list(vec![Object::int(1)]),
                Object::string("!")
            ),
            Object::string("[1]!")
        );
    }

    #[test]
    fn test_list_ops() {
        let xs = Object::list(vec![Object::int(1), Object::int(2)]);
        assert_eq!(
            eval_infix(InfixOp::Append, xs.clone(), Object::int(3)),
            Object::list(vec![Object::int(1), Object::int(2), Object::int(3)])
        );
        assert_eq!(
            eval_infix(InfixOp::Prepend, Object::int(0), xs.clone()),
            Object::list(vec![Object::int(0), Object::int(1), Object::int(2)])
        );
        let concat = eval_infix(InfixOp::Add, xs.clone(), xs);
        match &concat.value {
            Value::List(items) => assert_eq!(items.len(), 4),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_bytes_ops() {
        let a = Object::bytes(vec![1, 2]);
        let b = Object::bytes(vec![3]);
        assert_eq!(
            eval_infix(InfixOp::Add, a.clone(), b),
            Object::bytes(vec![1, 2, 3])
        );
        assert_eq!(
            eval_infix(InfixOp::Append, a.clone(), num("255")),
            Object::bytes(vec![1, 2, 255])
        );
        assert!(eval_infix(InfixOp::Append, a.clone(), num("256")).is_error());
        assert_eq!(
            eval_infix(InfixOp::Prepend, num("0"), a),
            Object::bytes(vec![0, 1, 2])
        );
    }

    #[test]
    fn test_bytes_bitwise_pads_by_modulo() {
        let long = Object::bytes(vec![0b1111_0000, 0b0000_1111, 0b1010_1010]);
        let short = Object::bytes(vec![0b1100_1100]);
        assert_eq!(
            eval_infix(InfixOp::BitAnd, long, short),
            Object::bytes(vec![0b1100_0000, 0b0000_1100, 0b1000_1000])
        );
    }

    #[test]
    fn test_type_mismatch_cites_both_types() {
        let err = eval_infix(InfixOp::Sub, Object::string("a"), num("1"));
        match &err.value {
            Value::Error(e) => {
                assert!(e.message.contains("STRING"));
                assert!(e.message.contains("NUMBER"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_index_negative_wraps_and_oob_is_nil() {
        let xs = Object::list(vec![Object::int(10), Object::int(20), Object::int(30)]);
        assert_eq!(eval_index(&xs, &num("-1")), Object::int(30));
        assert_eq!(eval_index(&xs, &num("5")), Object::nil());
        assert_eq!(eval_index(&Object::string("héllo"), &num("1")), Object::string("é"));
        assert_eq!(eval_index(&Object::bytes(vec![7, 8]), &num("1")), Object::int(8));
    }

    #[test]
    fn test_map_index() {
        let mut m = crate::value::MapValue::new();
        m.insert(Object::string("k"), Object::int(1)).unwrap();
        let map = Object::map(m);
        assert_eq!(eval_index(&map, &Object::string("k")), Object::int(1));
        assert_eq!(eval_index(&map, &Object::string("missing")), Object::nil());
        assert!(eval_index(&map, &Object::list(vec![])).is_error());
    }

    #[test]
    fn test_slice_semantics() {
        let xs = Object::list((1..=5).map(Object::int).collect());
        let slice = |start: Option<i64>, end: Option<i64>, step: Option<i64>| SliceValue {
            start: start.map(Dec64::from_i64),
            end: end.map(Dec64::from_i64),
            step: step.map(Dec64::from_i64),
        };
        assert_eq!(
            eval_slice(&xs, &slice(Some(1), Some(3), None)),
            Object::list(vec![Object::int(2), Object::int(3)])
        );
        assert_eq!(
            eval_slice(&xs, &slice(None, None, Some(2))),
            Object::list(vec![Object::int(1), Object::int(3), Object::int(5)])
        );
        // negative bounds wrap, overlong bounds clamp
        assert_eq!(
            eval_slice(&xs, &slice(Some(-2), Some(100), None)),
            Object::list(vec![Object::int(4), Object::int(5)])
        );
        assert!(eval_slice(&xs, &slice(None, None, Some(0))).is_error());
        assert_eq!(
            eval_slice(&Object::string("hello"), &slice(Some(1), Some(4), None)),
            Object::string("ell")
        );
    }
}
