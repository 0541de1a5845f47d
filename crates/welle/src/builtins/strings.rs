//! String conversion and number formatting builtins.

use crate::builtins::{check_arity, check_arity_range, type_error, BuiltinFn};
use crate::error::{RunError, RunResult};
use crate::resource::ResourceTracker;
use crate::value::Value;

pub(super) fn str_builtin(
    b: BuiltinFn,
    args: Vec<Value>,
    tracker: &mut ResourceTracker,
) -> RunResult<Value> {
    check_arity(b, &args, 1)?;
    let rendered = args[0].display_string();
    tracker.charge_string(rendered.len())?;
    Ok(Value::str(rendered))
}

/// `group_digits(1234567)` -> `"1,234,567"`.
pub(super) fn group_digits(
    b: BuiltinFn,
    args: Vec<Value>,
    tracker: &mut ResourceTracker,
) -> RunResult<Value> {
    check_arity(b, &args, 1)?;
    let Value::Int(n) = &args[0] else {
        return Err(type_error(b, &args[0]));
    };
    let digits = n.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if *n < 0 {
        grouped.push('-');
    }
    let first_group = digits.len() % 3;
    if first_group > 0 {
        grouped.push_str(&digits[..first_group]);
    }
    for (i, chunk) in digits.as_bytes()[first_group..].chunks(3).enumerate() {
        if i > 0 || first_group > 0 {
            grouped.push(',');
        }
        grouped.push_str(std::str::from_utf8(chunk).expect("ascii digits"));
    }
    tracker.charge_string(grouped.len())?;
    Ok(Value::str(grouped))
}

/// `format_float(x, precision)` renders with a fixed number of decimals.
pub(super) fn format_float(
    b: BuiltinFn,
    args: Vec<Value>,
    tracker: &mut ResourceTracker,
) -> RunResult<Value> {
    let (x, precision) = numeric_format_args(b, &args)?;
    let rendered = format!("{x:.precision$}");
    tracker.charge_string(rendered.len())?;
    Ok(Value::str(rendered))
}

/// `format_percent(0.1234, 1)` -> `"12.3%"`.
pub(super) fn format_percent(
    b: BuiltinFn,
    args: Vec<Value>,
    tracker: &mut ResourceTracker,
) -> RunResult<Value> {
    let (x, precision) = numeric_format_args(b, &args)?;
    let scaled = x * 100.0;
    let rendered = format!("{scaled:.precision$}%");
    tracker.charge_string(rendered.len())?;
    Ok(Value::str(rendered))
}

fn numeric_format_args(b: BuiltinFn, args: &[Value]) -> RunResult<(f64, usize)> {
    check_arity_range(b, args, 1, 2)?;
    let x = match &args[0] {
        Value::Int(n) => *n as f64,
        Value::Float(f) => *f,
        other => return Err(type_error(b, other)),
    };
    let precision = match args.get(1) {
        None => 2,
        Some(Value::Int(p)) if (0..=17).contains(p) => {
            usize::try_from(*p).expect("checked range")
        }
        Some(Value::Int(_)) => {
            return Err(RunError::raised(format!("{b} precision out of range")));
        }
        Some(other) => return Err(type_error(b, other)),
    };
    Ok((x, precision))
}
