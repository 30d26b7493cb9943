//! Binary and unary operator dispatch.
//!
//! Integer arithmetic is checked 32-bit: overflow, division by zero and
//! out-of-range shifts fail with `Arithmetic`. Floor division rounds toward
//! negative infinity and the sign of `%` follows the divisor.

use std::sync::Arc;

use crate::errors::{ErrorKind, EvalError, EvalResult};
use crate::expressions::{BinOp, UnaryOp};
use crate::scope::Scope;
use crate::semantics::Semantics;
use crate::types::{Dict, List};
use crate::value::Value;

/// Semantics flag enabling `dict + dict` concatenation.
pub const ALLOW_DICT_CONCAT: &str = "allow_dict_concat";

pub(crate) fn binary(
    op: BinOp,
    left: &Value,
    right: &Value,
    scope: &Scope,
    semantics: &Semantics,
) -> EvalResult<Value> {
    match op {
        BinOp::Add => add(left, right, scope, semantics),
        BinOp::Sub => match (left, right) {
            (Value::Int(a), Value::Int(b)) => checked(a.checked_sub(*b), "-"),
            _ => Err(unsupported(op, left, right)),
        },
        BinOp::Mul => mul(left, right, scope).ok_or_else(|| unsupported(op, left, right))?,
        BinOp::FloorDiv => match (left, right) {
            (Value::Int(a), Value::Int(b)) => floor_div(*a, *b),
            _ => Err(unsupported(op, left, right)),
        },
        BinOp::Percent => match (left, right) {
            (Value::Int(a), Value::Int(b)) => floor_mod(*a, *b),
            (Value::Str(format), right) => Ok(Value::string(
                crate::types::string::percent_format(format, right)?,
            )),
            _ => Err(unsupported(op, left, right)),
        },
        BinOp::LShift => match (left, right) {
            (Value::Int(a), Value::Int(b)) => shift_left(*a, *b),
            _ => Err(unsupported(op, left, right)),
        },
        BinOp::RShift => match (left, right) {
            (Value::Int(a), Value::Int(b)) => shift_right(*a, *b),
            _ => Err(unsupported(op, left, right)),
        },
        BinOp::BitOr => match (left, right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a | b)),
            (Value::Depset(_), _) | (_, Value::Depset(_)) => Err(EvalError::type_error(
                "'|' is not supported on depsets; use the depset() constructor's \
                 transitive argument to merge",
            )),
            _ => Err(unsupported(op, left, right)),
        },
        BinOp::BitXor => match (left, right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a ^ b)),
            _ => Err(unsupported(op, left, right)),
        },
        BinOp::BitAnd => match (left, right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a & b)),
            _ => Err(unsupported(op, left, right)),
        },
    }
}

pub(crate) fn unary(op: UnaryOp, operand: &Value) -> EvalResult<Value> {
    match (op, operand) {
        (UnaryOp::Not, operand) => Ok(Value::Bool(!operand.truth())),
        (UnaryOp::Minus, Value::Int(i)) => checked(i.checked_neg(), "-"),
        (UnaryOp::Plus, Value::Int(i)) => Ok(Value::Int(*i)),
        (UnaryOp::Invert, Value::Int(i)) => Ok(Value::Int(!i)),
        (op, operand) => Err(EvalError::unsupported_unary_op(
            op.symbol(),
            operand.type_name(),
        )),
    }
}

fn unsupported(op: BinOp, left: &Value, right: &Value) -> EvalError {
    EvalError::unsupported_binary_op(op.symbol(), left.type_name(), right.type_name())
}

fn checked(result: Option<i32>, op: &str) -> EvalResult<Value> {
    result
        .map(Value::Int)
        .ok_or_else(|| EvalError::integer_overflow(op))
}

fn add(left: &Value, right: &Value, scope: &Scope, semantics: &Semantics) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => checked(a.checked_add(*b), "+"),
        (Value::Str(a), Value::Str(b)) => {
            let mut out = String::with_capacity(a.len() + b.len());
            out.push_str(a);
            out.push_str(b);
            Ok(Value::string(out))
        }
        (Value::List(a), Value::List(b)) => {
            let mut items = a.snapshot();
            items.extend(b.snapshot());
            Ok(Value::List(Arc::new(List::new(items, scope.clone()))))
        }
        (Value::Tuple(a), Value::Tuple(b)) => {
            let mut items = a.to_vec();
            items.extend(b.iter().cloned());
            Ok(Value::Tuple(items.into()))
        }
        (Value::Dict(a), Value::Dict(b)) => {
            if !semantics.flag(ALLOW_DICT_CONCAT) {
                return Err(EvalError::type_error(
                    "'+' is not supported on dicts; use dict.update()",
                ));
            }
            let mut pairs = a.entries();
            pairs.extend(b.entries());
            Ok(Value::Dict(Arc::new(Dict::from_pairs(pairs, scope.clone())?)))
        }
        (Value::Depset(_), _) | (_, Value::Depset(_)) => Err(EvalError::type_error(
            "'+' is not supported on depsets; use the depset() constructor's \
             transitive argument to merge",
        )),
        _ => Err(unsupported(BinOp::Add, left, right)),
    }
}

fn mul(left: &Value, right: &Value, scope: &Scope) -> Option<EvalResult<Value>> {
    let (count, sequence) = match (left, right) {
        (Value::Int(n), other) | (other, Value::Int(n)) => (*n, other),
        _ => return None,
    };
    match sequence {
        Value::Int(_) => {
            let (Value::Int(a), Value::Int(b)) = (left, right) else {
                unreachable!("both matched int");
            };
            Some(checked(a.checked_mul(*b), "*"))
        }
        Value::Str(s) => {
            let repeats = count.max(0) as usize;
            Some(Ok(Value::string(s.repeat(repeats))))
        }
        Value::List(list) => {
            let items = repeat_items(&list.snapshot(), count);
            Some(Ok(Value::List(Arc::new(List::new(items, scope.clone())))))
        }
        Value::Tuple(items) => {
            let items = repeat_items(items, count);
            Some(Ok(Value::Tuple(items.into())))
        }
        _ => None,
    }
}

fn repeat_items(items: &[Value], count: i32) -> Vec<Value> {
    let repeats = count.max(0) as usize;
    let mut out = Vec::with_capacity(items.len() * repeats);
    for _ in 0..repeats {
        out.extend(items.iter().cloned());
    }
    out
}

/// `a // b` with floor semantics.
fn floor_div(a: i32, b: i32) -> EvalResult<Value> {
    if b == 0 {
        return Err(EvalError::division_by_zero());
    }
    let Some(quotient) = a.checked_div(b) else {
        return Err(EvalError::integer_overflow("//"));
    };
    let adjusted = if a % b != 0 && (a < 0) != (b < 0) {
        quotient - 1
    } else {
        quotient
    };
    Ok(Value::Int(adjusted))
}

/// `a % b`; the result's sign follows the divisor.
fn floor_mod(a: i32, b: i32) -> EvalResult<Value> {
    if b == 0 {
        return Err(EvalError::division_by_zero());
    }
    let Some(remainder) = a.checked_rem(b) else {
        return Err(EvalError::integer_overflow("%"));
    };
    let adjusted = if remainder != 0 && (remainder < 0) != (b < 0) {
        remainder + b
    } else {
        remainder
    };
    Ok(Value::Int(adjusted))
}

fn shift_left(a: i32, b: i32) -> EvalResult<Value> {
    if b < 0 {
        return Err(ErrorKind::Arithmetic.err("negative shift count"));
    }
    if b > 31 {
        return Err(ErrorKind::Arithmetic.err("shift count out of range"));
    }
    let wide = i64::from(a) << b;
    i32::try_from(wide)
        .map(Value::Int)
        .map_err(|_| EvalError::integer_overflow("<<"))
}

fn shift_right(a: i32, b: i32) -> EvalResult<Value> {
    if b < 0 {
        return Err(ErrorKind::Arithmetic.err("negative shift count"));
    }
    if b > 31 {
        return Err(ErrorKind::Arithmetic.err("shift count out of range"));
    }
    Ok(Value::Int(a >> b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_op(op: BinOp, a: i32, b: i32) -> EvalResult<Value> {
        binary(
            op,
            &Value::Int(a),
            &Value::Int(b),
            &Scope::new(),
            &Semantics::new(),
        )
    }

    #[test]
    fn overflow_is_arithmetic_error() {
        let err = int_op(BinOp::Add, i32::MAX, 1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Arithmetic);
        let err = int_op(BinOp::Mul, i32::MIN, -1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Arithmetic);
    }

    #[test]
    fn floor_div_and_mod_identity() {
        for &(a, b) in &[(7, 3), (-7, 3), (7, -3), (-7, -3), (6, 3), (-6, 3)] {
            let q = match int_op(BinOp::FloorDiv, a, b).unwrap() {
                Value::Int(q) => q,
                _ => unreachable!(),
            };
            let r = match int_op(BinOp::Percent, a, b).unwrap() {
                Value::Int(r) => r,
                _ => unreachable!(),
            };
            assert_eq!(q * b + r, a, "identity for {a} // {b}");
            assert!(r == 0 || (r < 0) == (b < 0), "sign of {a} % {b}");
        }
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(
            int_op(BinOp::FloorDiv, 1, 0).unwrap_err().kind,
            ErrorKind::Arithmetic
        );
        assert_eq!(
            int_op(BinOp::Percent, 1, 0).unwrap_err().kind,
            ErrorKind::Arithmetic
        );
    }

    #[test]
    fn negative_shift_count() {
        let err = int_op(BinOp::LShift, 1, -1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Arithmetic);
        assert!(err.message.contains("negative shift count"));
    }

    #[test]
    fn dict_concat_is_gated() {
        let scope = Scope::new();
        let a = Value::Dict(Arc::new(
            Dict::from_pairs(vec![(Value::Int(1), Value::Int(1))], scope.clone()).unwrap(),
        ));
        let b = Value::Dict(Arc::new(
            Dict::from_pairs(vec![(Value::Int(2), Value::Int(2))], scope.clone()).unwrap(),
        ));
        let off = Semantics::new();
        assert_eq!(
            binary(BinOp::Add, &a, &b, &scope, &off).unwrap_err().kind,
            ErrorKind::Type
        );
        let on = Semantics::new().with_flag(ALLOW_DICT_CONCAT, true);
        let merged = binary(BinOp::Add, &a, &b, &scope, &on).unwrap();
        assert_eq!(merged.length(), Some(2));
    }

    #[test]
    fn sequence_repetition() {
        let scope = Scope::new();
        let out = binary(
            BinOp::Mul,
            &Value::string("ab"),
            &Value::Int(3),
            &scope,
            &Semantics::new(),
        )
        .unwrap();
        assert!(out.equals(&Value::string("ababab")));
        let out = binary(
            BinOp::Mul,
            &Value::Int(-2),
            &Value::string("ab"),
            &scope,
            &Semantics::new(),
        )
        .unwrap();
        assert!(out.equals(&Value::string("")));
    }
}
