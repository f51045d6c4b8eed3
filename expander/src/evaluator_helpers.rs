use std::cmp::Ordering;

use mpl::instruction::value::{BinaryOperator, UnaryOperator};

use crate::builtins::{MAX_SEQUENCE_LEN, percent_format};
use crate::error::RuntimeError;
use crate::runtime_value::RuntimeValue;

/// Both operands as integers (bools count as integers), if possible.
fn integer_pair(left: &RuntimeValue, right: &RuntimeValue) -> Option<(i64, i64)> {
    Some((left.as_i64()?, right.as_i64()?))
}

/// Both operands as floats, or a type error naming the operator.
pub fn coerce_numbers(
    symbol: &str,
    left: &RuntimeValue,
    right: &RuntimeValue,
) -> Result<(f64, f64), RuntimeError> {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(RuntimeError::type_error(
            format!("numbers for '{}'", symbol),
            format!("{} and {}", left.type_name(), right.type_name()),
        )),
    }
}

/// Repetition count for `len * times` elements, or an error past the sequence cap.
fn repeat_count(len: usize, times: i64) -> Result<usize, RuntimeError> {
    let times = times.max(0);
    if len == 0 {
        return Ok(0);
    }
    let total = (len as i64).checked_mul(times).ok_or(RuntimeError::Overflow)?;
    if total > MAX_SEQUENCE_LEN {
        return Err(RuntimeError::argument(format!(
            "repetition of more than {} elements",
            MAX_SEQUENCE_LEN
        )));
    }
    Ok(times as usize)
}

fn repeat(items: &[RuntimeValue], times: i64) -> Result<Vec<RuntimeValue>, RuntimeError> {
    let times = repeat_count(items.len(), times)?;
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    Ok(out)
}

fn floor_div(a: i64, b: i64) -> Result<i64, RuntimeError> {
    if b == 0 {
        return Err(RuntimeError::DivisionByZero);
    }
    let q = a.checked_div(b).ok_or(RuntimeError::Overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn modulo(a: i64, b: i64) -> Result<i64, RuntimeError> {
    if b == 0 {
        return Err(RuntimeError::DivisionByZero);
    }
    let r = a.checked_rem(b).ok_or(RuntimeError::Overflow)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

fn float_modulo(a: f64, b: f64) -> Result<f64, RuntimeError> {
    if b == 0.0 {
        return Err(RuntimeError::DivisionByZero);
    }
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

fn power(left: &RuntimeValue, right: &RuntimeValue) -> Result<RuntimeValue, RuntimeError> {
    if let Some((base, exp)) = integer_pair(left, right) {
        if exp >= 0 {
            let exp = u32::try_from(exp).map_err(|_| RuntimeError::Overflow)?;
            return base
                .checked_pow(exp)
                .map(RuntimeValue::Integer)
                .ok_or(RuntimeError::Overflow);
        }
        if base == 0 {
            return Err(RuntimeError::DivisionByZero);
        }
    }
    let (a, b) = coerce_numbers("**", left, right)?;
    if a == 0.0 && b < 0.0 {
        return Err(RuntimeError::DivisionByZero);
    }
    Ok(RuntimeValue::Float(a.powf(b)))
}

/// Membership test for `in`.
pub fn contains(container: &RuntimeValue, item: &RuntimeValue) -> Result<bool, RuntimeError> {
    match container {
        RuntimeValue::List(items) | RuntimeValue::Tuple(items) => Ok(items.contains(item)),
        RuntimeValue::Dict(entries) => Ok(entries.iter().any(|(k, _)| k == item)),
        RuntimeValue::String(s) => match item {
            RuntimeValue::String(sub) => Ok(s.contains(sub.as_str())),
            other => Err(RuntimeError::type_error("str", other.type_name())),
        },
        other => Err(RuntimeError::type_error("container", other.type_name())),
    }
}

/// Evaluate a non-short-circuiting binary operator.
pub fn binary_op(
    operator: BinaryOperator,
    left: &RuntimeValue,
    right: &RuntimeValue,
) -> Result<RuntimeValue, RuntimeError> {
    use RuntimeValue as V;

    match operator {
        BinaryOperator::Addition => match (left, right) {
            (V::String(a), V::String(b)) => Ok(V::String(format!("{}{}", a, b))),
            (V::List(a), V::List(b)) => Ok(V::List([a.as_slice(), b.as_slice()].concat())),
            (V::Tuple(a), V::Tuple(b)) => Ok(V::Tuple([a.as_slice(), b.as_slice()].concat())),
            _ => match integer_pair(left, right) {
                Some((a, b)) => a.checked_add(b).map(V::Integer).ok_or(RuntimeError::Overflow),
                None => coerce_numbers("+", left, right).map(|(a, b)| V::Float(a + b)),
            },
        },
        BinaryOperator::Subtraction => match integer_pair(left, right) {
            Some((a, b)) => a.checked_sub(b).map(V::Integer).ok_or(RuntimeError::Overflow),
            None => coerce_numbers("-", left, right).map(|(a, b)| V::Float(a - b)),
        },
        BinaryOperator::Multiplication => match (left, right) {
            (V::String(s), n) | (n, V::String(s)) if n.as_i64().is_some() => {
                let times = repeat_count(s.len(), n.as_i64().unwrap_or(0))?;
                Ok(V::String(s.repeat(times)))
            }
            (V::List(items), n) | (n, V::List(items)) if n.as_i64().is_some() => {
                Ok(V::List(repeat(items, n.as_i64().unwrap_or(0))?))
            }
            _ => match integer_pair(left, right) {
                Some((a, b)) => a.checked_mul(b).map(V::Integer).ok_or(RuntimeError::Overflow),
                None => coerce_numbers("*", left, right).map(|(a, b)| V::Float(a * b)),
            },
        },
        BinaryOperator::Division => {
            let (a, b) = coerce_numbers("/", left, right)?;
            if b == 0.0 {
                return Err(RuntimeError::DivisionByZero);
            }
            Ok(V::Float(a / b))
        }
        BinaryOperator::FloorDivision => match integer_pair(left, right) {
            Some((a, b)) => floor_div(a, b).map(V::Integer),
            None => {
                let (a, b) = coerce_numbers("//", left, right)?;
                if b == 0.0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                Ok(V::Float((a / b).floor()))
            }
        },
        BinaryOperator::Modulo => match (left, right) {
            (V::String(template), values) => percent_format(template, values).map(V::String),
            _ => match integer_pair(left, right) {
                Some((a, b)) => modulo(a, b).map(V::Integer),
                None => {
                    let (a, b) = coerce_numbers("%", left, right)?;
                    float_modulo(a, b).map(V::Float)
                }
            },
        },
        BinaryOperator::Power => power(left, right),
        BinaryOperator::Equality => Ok(V::Boolean(left == right)),
        BinaryOperator::Inequality => Ok(V::Boolean(left != right)),
        BinaryOperator::LessThan => Ok(V::Boolean(left.compare(right)? == Ordering::Less)),
        BinaryOperator::GreaterThan => Ok(V::Boolean(left.compare(right)? == Ordering::Greater)),
        BinaryOperator::LessThanOrEqual => {
            Ok(V::Boolean(left.compare(right)? != Ordering::Greater))
        }
        BinaryOperator::GreaterThanOrEqual => {
            Ok(V::Boolean(left.compare(right)? != Ordering::Less))
        }
        BinaryOperator::Membership => contains(right, left).map(V::Boolean),
        BinaryOperator::NonMembership => contains(right, left).map(|found| V::Boolean(!found)),
        BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr => Err(RuntimeError::Syntax(
            "logical operators are evaluated lazily".to_string(),
        )),
    }
}

pub fn unary_op(operator: UnaryOperator, value: &RuntimeValue) -> Result<RuntimeValue, RuntimeError> {
    match operator {
        UnaryOperator::LogicalNot => Ok(RuntimeValue::Boolean(!value.is_truthy())),
        UnaryOperator::Negation => match value {
            RuntimeValue::Float(f) => Ok(RuntimeValue::Float(-f)),
            other => match other.as_i64() {
                Some(n) => n.checked_neg().map(RuntimeValue::Integer).ok_or(RuntimeError::Overflow),
                None => Err(RuntimeError::type_error("number", other.type_name())),
            },
        },
        UnaryOperator::Identity => match value {
            RuntimeValue::Float(_) | RuntimeValue::Integer(_) => Ok(value.clone()),
            RuntimeValue::Boolean(b) => Ok(RuntimeValue::Integer(*b as i64)),
            other => Err(RuntimeError::type_error("number", other.type_name())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn int(n: i64) -> RuntimeValue {
        RuntimeValue::Integer(n)
    }

    #[rstest]
    #[case(BinaryOperator::FloorDivision, 7, 2, 3)]
    #[case(BinaryOperator::FloorDivision, -7, 2, -4)]
    #[case(BinaryOperator::Modulo, -7, 3, 2)]
    #[case(BinaryOperator::Modulo, 7, -3, -2)]
    #[case(BinaryOperator::Power, 2, 7, 128)]
    fn python_integer_semantics(
        #[case] op: BinaryOperator,
        #[case] a: i64,
        #[case] b: i64,
        #[case] expected: i64,
    ) {
        assert_eq!(binary_op(op, &int(a), &int(b)).unwrap(), int(expected));
    }

    #[test]
    fn repetition_is_capped() {
        let list = RuntimeValue::List(vec![int(0)]);
        let text = RuntimeValue::String("a".into());
        for sequence in [&list, &text] {
            assert!(matches!(
                binary_op(BinaryOperator::Multiplication, sequence, &int(10_i64.pow(15))),
                Err(RuntimeError::ArgumentError(_))
            ));
            assert!(matches!(
                binary_op(BinaryOperator::Multiplication, &int(i64::MAX), sequence),
                Err(RuntimeError::ArgumentError(_))
            ));
        }
        assert_eq!(
            binary_op(BinaryOperator::Multiplication, &text, &int(3)).unwrap(),
            RuntimeValue::String("aaa".into())
        );
        assert_eq!(
            binary_op(BinaryOperator::Multiplication, &list, &int(-2)).unwrap(),
            RuntimeValue::List(vec![])
        );
        let empty = RuntimeValue::List(vec![]);
        assert_eq!(
            binary_op(BinaryOperator::Multiplication, &empty, &int(10_i64.pow(15))).unwrap(),
            empty
        );
    }

    #[test]
    fn true_division_is_float() {
        assert_eq!(
            binary_op(BinaryOperator::Division, &int(10), &int(4)).unwrap(),
            RuntimeValue::Float(2.5)
        );
        assert!(matches!(
            binary_op(BinaryOperator::Division, &int(1), &int(0)),
            Err(RuntimeError::DivisionByZero)
        ));
    }

    #[test]
    fn sequences() {
        let l = RuntimeValue::List(vec![int(1)]);
        assert_eq!(
            binary_op(BinaryOperator::Multiplication, &l, &int(3)).unwrap(),
            RuntimeValue::List(vec![int(1), int(1), int(1)])
        );
        assert_eq!(
            binary_op(BinaryOperator::Membership, &int(1), &l).unwrap(),
            RuntimeValue::Boolean(true)
        );
        assert!(binary_op(BinaryOperator::Addition, &l, &int(1)).is_err());
    }

    #[test]
    fn overflow_is_an_error() {
        assert!(matches!(
            binary_op(BinaryOperator::Multiplication, &int(i64::MAX), &int(2)),
            Err(RuntimeError::Overflow)
        ));
    }
}
