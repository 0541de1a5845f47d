//! Binary and unary operator evaluation.
//!
//! Integer arithmetic wraps at 64 bits; mixed Integer/Float arithmetic
//! promotes to Float; Integer/Integer division truncates. Modulo is defined
//! only for integers. Division and modulo by zero raise. Shift counts must
//! be in `[0, 63]`. String concatenation uses `+`, string repetition `*`
//! with an Integer operand on either side.

use crate::bytecode::op::Opcode;
use crate::error::{RunError, RunResult};
use crate::resource::ResourceTracker;
use crate::types::DictKey;
use crate::value::Value;

/// Evaluates a binary opcode over popped operands.
pub(super) fn evaluate(
    op: Opcode,
    left: Value,
    right: Value,
    tracker: &mut ResourceTracker,
) -> RunResult<Value> {
    match op {
        Opcode::Add => add(left, right, tracker),
        Opcode::Sub => arithmetic(op, left, right),
        Opcode::Mul => mul(left, right, tracker),
        Opcode::Div => arithmetic(op, left, right),
        Opcode::Mod => modulo(left, right),
        Opcode::BitOr | Opcode::BitAnd | Opcode::BitXor => bitwise(op, left, right),
        Opcode::Shl | Opcode::Shr => shift(op, left, right),
        Opcode::Eq => Ok(Value::Bool(left.welle_eq(&right))),
        Opcode::NotEq => Ok(Value::Bool(!left.welle_eq(&right))),
        Opcode::Is => Ok(Value::Bool(left.is_same(&right))),
        Opcode::Gt | Opcode::Lt | Opcode::Ge | Opcode::Le => ordered(op, &left, &right),
        Opcode::In => membership(&left, &right),
        _ => Err(RunError::fatal(format!("{op} is not a binary operator"))),
    }
}

/// Evaluates a unary opcode.
pub(super) fn evaluate_unary(op: Opcode, operand: Value) -> RunResult<Value> {
    match op {
        Opcode::Neg => match operand {
            Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(unsupported_unary("-", &other)),
        },
        Opcode::Not => Ok(Value::Bool(!operand.is_truthy())),
        Opcode::BitNot => match operand {
            Value::Int(n) => Ok(Value::Int(!n)),
            other => Err(unsupported_unary("~", &other)),
        },
        _ => Err(RunError::fatal(format!("{op} is not a unary operator"))),
    }
}

fn add(left: Value, right: Value, tracker: &mut ResourceTracker) -> RunResult<Value> {
    match (&left, &right) {
        (Value::Str(a), Value::Str(b)) => {
            tracker.charge_string(a.len() + b.len())?;
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(a);
            joined.push_str(b);
            Ok(Value::str(joined))
        }
        _ => arithmetic(Opcode::Add, left, right),
    }
}

fn mul(left: Value, right: Value, tracker: &mut ResourceTracker) -> RunResult<Value> {
    match (&left, &right) {
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
            if *n < 0 {
                return Err(RunError::raised("repeat count cannot be negative"));
            }
            let count = usize::try_from(*n).unwrap_or(usize::MAX);
            let total = s.len().saturating_mul(count);
            tracker.charge_string(total)?;
            Ok(Value::str(s.repeat(count)))
        }
        _ => arithmetic(Opcode::Mul, left, right),
    }
}

fn arithmetic(op: Opcode, left: Value, right: Value) -> RunResult<Value> {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            match op {
                Opcode::Add => Ok(Value::Int(a.wrapping_add(b))),
                Opcode::Sub => Ok(Value::Int(a.wrapping_sub(b))),
                Opcode::Mul => Ok(Value::Int(a.wrapping_mul(b))),
                Opcode::Div => {
                    if b == 0 {
                        Err(RunError::raised("division by zero"))
                    } else {
                        Ok(Value::Int(a.wrapping_div(b)))
                    }
                }
                _ => unreachable!("arithmetic handles + - * /"),
            }
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let a = as_float(&left);
            let b = as_float(&right);
            match op {
                Opcode::Add => Ok(Value::Float(a + b)),
                Opcode::Sub => Ok(Value::Float(a - b)),
                Opcode::Mul => Ok(Value::Float(a * b)),
                Opcode::Div => {
                    if b == 0.0 {
                        Err(RunError::raised("division by zero"))
                    } else {
                        Ok(Value::Float(a / b))
                    }
                }
                _ => unreachable!("arithmetic handles + - * /"),
            }
        }
        _ => Err(unsupported(op, &left, &right)),
    }
}

fn modulo(left: Value, right: Value) -> RunResult<Value> {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                Err(RunError::raised("modulo by zero"))
            } else {
                Ok(Value::Int(a.wrapping_rem(*b)))
            }
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            Err(RunError::raised("modulo requires integer operands"))
        }
        _ => Err(unsupported(Opcode::Mod, &left, &right)),
    }
}

fn bitwise(op: Opcode, left: Value, right: Value) -> RunResult<Value> {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(match op {
            Opcode::BitOr => a | b,
            Opcode::BitAnd => a & b,
            Opcode::BitXor => a ^ b,
            _ => unreachable!("bitwise handles | & ^"),
        })),
        _ => Err(unsupported(op, &left, &right)),
    }
}

fn shift(op: Opcode, left: Value, right: Value) -> RunResult<Value> {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => {
            if !(0..64).contains(b) {
                return Err(RunError::raised("shift count out of range"));
            }
            let count = u32::try_from(*b).expect("checked range");
            Ok(Value::Int(match op {
                Opcode::Shl => a.wrapping_shl(count),
                Opcode::Shr => a.wrapping_shr(count),
                _ => unreachable!("shift handles << >>"),
            }))
        }
        _ => Err(unsupported(op, &left, &right)),
    }
}

fn ordered(op: Opcode, left: &Value, right: &Value) -> RunResult<Value> {
    let ordering = left
        .welle_cmp(right)
        .ok_or_else(|| unsupported(op, left, right))?;
    let result = match op {
        Opcode::Gt => ordering.is_gt(),
        Opcode::Lt => ordering.is_lt(),
        Opcode::Ge => ordering.is_ge(),
        Opcode::Le => ordering.is_le(),
        _ => unreachable!("ordered handles > < >= <="),
    };
    Ok(Value::Bool(result))
}

fn membership(left: &Value, right: &Value) -> RunResult<Value> {
    match right {
        Value::Array(items) => Ok(Value::Bool(items.borrow().iter().any(|v| v.welle_eq(left)))),
        Value::Tuple(items) => Ok(Value::Bool(items.iter().any(|v| v.welle_eq(left)))),
        Value::Dict(dict) => {
            let key = DictKey::from_value(left).ok_or_else(|| {
                RunError::raised(format!("unhashable key: {}", left.type_name()))
            })?;
            Ok(Value::Bool(dict.borrow().contains(&key)))
        }
        Value::Str(haystack) => match left {
            Value::Str(needle) => Ok(Value::Bool(haystack.contains(needle.as_ref()))),
            other => Err(unsupported(Opcode::In, other, right)),
        },
        other => Err(unsupported(Opcode::In, left, other)),
    }
}

fn as_float(value: &Value) -> f64 {
    match value {
        Value::Int(n) => *n as f64,
        Value::Float(f) => *f,
        _ => unreachable!("caller checked numeric"),
    }
}

fn op_symbol(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "+",
        Opcode::Sub => "-",
        Opcode::Mul => "*",
        Opcode::Div => "/",
        Opcode::Mod => "%",
        Opcode::BitOr => "|",
        Opcode::BitAnd => "&",
        Opcode::BitXor => "^",
        Opcode::Shl => "<<",
        Opcode::Shr => ">>",
        Opcode::Gt => ">",
        Opcode::Lt => "<",
        Opcode::Ge => ">=",
        Opcode::Le => "<=",
        Opcode::In => "in",
        _ => "?",
    }
}

fn unsupported(op: Opcode, left: &Value, right: &Value) -> RunError {
    RunError::raised(format!(
        "unsupported operand types for {}: {} and {}",
        op_symbol(op),
        left.type_name(),
        right.type_name()
    ))
}

fn unsupported_unary(symbol: &str, operand: &Value) -> RunError {
    RunError::raised(format!(
        "unsupported operand type for {symbol}: {}",
        operand.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(op: Opcode, left: Value, right: Value) -> RunResult<Value> {
        let mut tracker = ResourceTracker::default();
        evaluate(op, left, right, &mut tracker)
    }

    #[test]
    fn integer_division_truncates() {
        assert_eq!(eval(Opcode::Div, Value::Int(7), Value::Int(2)).unwrap(), Value::Int(3));
        assert_eq!(
            eval(Opcode::Div, Value::Int(-7), Value::Int(2)).unwrap(),
            Value::Int(-3)
        );
    }

    #[test]
    fn division_by_zero_raises() {
        let err = eval(Opcode::Div, Value::Int(1), Value::Int(0)).unwrap_err();
        match err {
            RunError::Raised(e) => assert_eq!(e.message, "division by zero"),
            RunError::Fatal(_) => panic!("expected raised error"),
        }
    }

    #[test]
    fn float_modulo_raises() {
        let err = eval(Opcode::Mod, Value::Float(1.5), Value::Int(1)).unwrap_err();
        match err {
            RunError::Raised(e) => assert_eq!(e.message, "modulo requires integer operands"),
            RunError::Fatal(_) => panic!("expected raised error"),
        }
    }

    #[test]
    fn mixed_arithmetic_promotes_to_float() {
        assert_eq!(
            eval(Opcode::Add, Value::Int(1), Value::Float(0.5)).unwrap(),
            Value::Float(1.5)
        );
    }

    #[test]
    fn wrapping_integer_arithmetic() {
        assert_eq!(
            eval(Opcode::Add, Value::Int(i64::MAX), Value::Int(1)).unwrap(),
            Value::Int(i64::MIN)
        );
    }

    #[test]
    fn shift_count_bounds() {
        assert_eq!(eval(Opcode::Shl, Value::Int(1), Value::Int(3)).unwrap(), Value::Int(8));
        assert!(eval(Opcode::Shl, Value::Int(1), Value::Int(64)).is_err());
        assert!(eval(Opcode::Shr, Value::Int(1), Value::Int(-1)).is_err());
    }

    #[test]
    fn string_concat_and_repeat() {
        assert_eq!(
            eval(Opcode::Add, Value::str("ab"), Value::str("cd")).unwrap(),
            Value::str("abcd")
        );
        assert_eq!(
            eval(Opcode::Mul, Value::str("ab"), Value::Int(3)).unwrap(),
            Value::str("ababab")
        );
        assert_eq!(
            eval(Opcode::Mul, Value::Int(2), Value::str("x")).unwrap(),
            Value::str("xx")
        );
    }

    #[test]
    fn is_distinguishes_numeric_types() {
        assert_eq!(
            eval(Opcode::Eq, Value::Int(1), Value::Float(1.0)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval(Opcode::Is, Value::Int(1), Value::Float(1.0)).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn membership_over_containers() {
        let arr = Value::array(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(eval(Opcode::In, Value::Int(2), arr).unwrap(), Value::Bool(true));
        assert_eq!(
            eval(Opcode::In, Value::str("af"), Value::str("café")).unwrap(),
            Value::Bool(true)
        );
    }
}
