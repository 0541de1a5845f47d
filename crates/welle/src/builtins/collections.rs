//! Sequence and container builtins.

use std::cmp::Ordering;

use crate::builtins::{check_arity, check_arity_range, type_error, BuiltinFn};
use crate::error::{RunError, RunResult};
use crate::resource::ResourceTracker;
use crate::types::DictKey;
use crate::value::Value;

pub(super) fn len(b: BuiltinFn, args: Vec<Value>) -> RunResult<Value> {
    check_arity(b, &args, 1)?;
    let len = match &args[0] {
        // Code points, not bytes.
        Value::Str(s) => s.chars().count(),
        Value::Array(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(dict) => dict.borrow().len(),
        other => return Err(type_error(b, other)),
    };
    Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
}

pub(super) fn join(b: BuiltinFn, args: Vec<Value>, tracker: &mut ResourceTracker) -> RunResult<Value> {
    check_arity_range(b, &args, 1, 2)?;
    let sep = match args.get(1) {
        None => String::new(),
        Some(Value::Str(s)) => s.to_string(),
        Some(other) => return Err(type_error(b, other)),
    };
    let items: Vec<String> = match &args[0] {
        Value::Array(items) => items.borrow().iter().map(Value::display_string).collect(),
        Value::Tuple(items) => items.iter().map(Value::display_string).collect(),
        other => return Err(type_error(b, other)),
    };
    let joined = items.join(&sep);
    tracker.charge_string(joined.len())?;
    Ok(Value::str(joined))
}

pub(super) fn keys(b: BuiltinFn, args: Vec<Value>, tracker: &mut ResourceTracker) -> RunResult<Value> {
    check_arity(b, &args, 1)?;
    let Value::Dict(dict) = &args[0] else {
        return Err(type_error(b, &args[0]));
    };
    let keys = dict.borrow().sorted_keys();
    tracker.charge_array(keys.len())?;
    Ok(Value::array(keys))
}

pub(super) fn values(b: BuiltinFn, args: Vec<Value>, tracker: &mut ResourceTracker) -> RunResult<Value> {
    check_arity(b, &args, 1)?;
    let Value::Dict(dict) = &args[0] else {
        return Err(type_error(b, &args[0]));
    };
    let values = dict.borrow().sorted_values();
    tracker.charge_array(values.len())?;
    Ok(Value::array(values))
}

pub(super) fn push(b: BuiltinFn, args: Vec<Value>, tracker: &mut ResourceTracker) -> RunResult<Value> {
    check_arity(b, &args, 2)?;
    let Value::Array(items) = &args[0] else {
        return Err(type_error(b, &args[0]));
    };
    tracker.charge_array_growth(1)?;
    items.borrow_mut().push(args[1].clone());
    Ok(args[0].clone())
}

pub(super) fn count(b: BuiltinFn, args: Vec<Value>) -> RunResult<Value> {
    check_arity(b, &args, 2)?;
    let count = match (&args[0], &args[1]) {
        (Value::Array(items), needle) => {
            items.borrow().iter().filter(|v| v.welle_eq(needle)).count()
        }
        (Value::Tuple(items), needle) => items.iter().filter(|v| v.welle_eq(needle)).count(),
        (Value::Str(haystack), Value::Str(needle)) => {
            if needle.is_empty() {
                0
            } else {
                haystack.matches(needle.as_ref()).count()
            }
        }
        (other, _) => return Err(type_error(b, other)),
    };
    Ok(Value::Int(i64::try_from(count).unwrap_or(i64::MAX)))
}

pub(super) fn remove(b: BuiltinFn, args: Vec<Value>) -> RunResult<Value> {
    check_arity(b, &args, 2)?;
    match &args[0] {
        Value::Array(items) => {
            let mut items = items.borrow_mut();
            match items.iter().position(|v| v.welle_eq(&args[1])) {
                Some(idx) => {
                    items.remove(idx);
                    Ok(Value::Bool(true))
                }
                None => Ok(Value::Bool(false)),
            }
        }
        Value::Dict(dict) => {
            let key = dict_key(b, &args[1])?;
            Ok(dict.borrow_mut().remove(&key).unwrap_or(Value::Nil))
        }
        other => Err(type_error(b, other)),
    }
}

pub(super) fn get(b: BuiltinFn, args: Vec<Value>) -> RunResult<Value> {
    check_arity_range(b, &args, 2, 3)?;
    let Value::Dict(dict) = &args[0] else {
        return Err(type_error(b, &args[0]));
    };
    let key = dict_key(b, &args[1])?;
    let fallback = args.get(2).cloned().unwrap_or(Value::Nil);
    Ok(dict.borrow().get(&key).cloned().unwrap_or(fallback))
}

pub(super) fn pop(b: BuiltinFn, args: Vec<Value>) -> RunResult<Value> {
    check_arity_range(b, &args, 1, 2)?;
    match &args[0] {
        Value::Array(items) => {
            if args.len() != 1 {
                return Err(type_error(b, &args[1]));
            }
            items
                .borrow_mut()
                .pop()
                .ok_or_else(|| RunError::raised("pop from empty array"))
        }
        Value::Dict(dict) => {
            let key_arg = args
                .get(1)
                .ok_or_else(|| RunError::raised("pop on a dict requires a key"))?;
            let key = dict_key(b, key_arg)?;
            Ok(dict.borrow_mut().remove(&key).unwrap_or(Value::Nil))
        }
        other => Err(type_error(b, other)),
    }
}

pub(super) fn has_key(b: BuiltinFn, args: Vec<Value>) -> RunResult<Value> {
    check_arity(b, &args, 2)?;
    let Value::Dict(dict) = &args[0] else {
        return Err(type_error(b, &args[0]));
    };
    let key = dict_key(b, &args[1])?;
    Ok(Value::Bool(dict.borrow().contains(&key)))
}

pub(super) fn sort(b: BuiltinFn, args: Vec<Value>) -> RunResult<Value> {
    check_arity(b, &args, 1)?;
    let Value::Array(items) = &args[0] else {
        return Err(type_error(b, &args[0]));
    };
    {
        let mut items = items.borrow_mut();
        // Validate comparability up front so a failed sort leaves the array
        // untouched.
        for pair in items.windows(2) {
            if pair[0].welle_cmp(&pair[1]).is_none() {
                return Err(incomparable(&pair[0], &pair[1]));
            }
        }
        items.sort_by(|a, z| a.welle_cmp(z).unwrap_or(Ordering::Equal));
    }
    Ok(args[0].clone())
}

pub(super) fn range(b: BuiltinFn, args: Vec<Value>, tracker: &mut ResourceTracker) -> RunResult<Value> {
    check_arity_range(b, &args, 1, 3)?;
    let bound = |v: &Value| -> RunResult<i64> {
        match v {
            Value::Int(n) => Ok(*n),
            other => Err(type_error(b, other)),
        }
    };
    let (start, stop, step) = match args.len() {
        1 => (0, bound(&args[0])?, 1),
        2 => (bound(&args[0])?, bound(&args[1])?, 1),
        _ => (bound(&args[0])?, bound(&args[1])?, bound(&args[2])?),
    };
    if step == 0 {
        return Err(RunError::raised("range step cannot be zero"));
    }
    let span = if step > 0 {
        stop.saturating_sub(start)
    } else {
        start.saturating_sub(stop)
    };
    let step_abs = step.unsigned_abs();
    let len = if span <= 0 {
        0
    } else {
        (span.unsigned_abs() + step_abs - 1) / step_abs
    };
    let len = usize::try_from(len).unwrap_or(usize::MAX);
    tracker.charge_array(len)?;
    let mut items = Vec::with_capacity(len);
    let mut current = start;
    for _ in 0..len {
        items.push(Value::Int(current));
        current = current.wrapping_add(step);
    }
    Ok(Value::array(items))
}

pub(super) fn max(b: BuiltinFn, args: Vec<Value>) -> RunResult<Value> {
    extremum(b, args, Ordering::Greater)
}

pub(super) fn min(b: BuiltinFn, args: Vec<Value>) -> RunResult<Value> {
    extremum(b, args, Ordering::Less)
}

fn extremum(b: BuiltinFn, args: Vec<Value>, keep: Ordering) -> RunResult<Value> {
    if args.is_empty() {
        return Err(RunError::raised(format!("{b} of empty sequence")));
    }
    let items: Vec<Value> = if args.len() == 1 {
        match &args[0] {
            Value::Array(items) => items.borrow().clone(),
            Value::Tuple(items) => items.to_vec(),
            other => vec![other.clone()],
        }
    } else {
        args
    };
    let mut iter = items.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| RunError::raised(format!("{b} of empty sequence")))?;
    for item in iter {
        match item.welle_cmp(&best) {
            Some(ord) if ord == keep => best = item,
            Some(_) => {}
            None => return Err(incomparable(&item, &best)),
        }
    }
    Ok(best)
}

pub(super) fn sum(b: BuiltinFn, args: Vec<Value>) -> RunResult<Value> {
    check_arity(b, &args, 1)?;
    let items: Vec<Value> = match &args[0] {
        Value::Array(items) => items.borrow().clone(),
        Value::Tuple(items) => items.to_vec(),
        other => return Err(type_error(b, other)),
    };
    let mut int_sum: i64 = 0;
    let mut float_sum: f64 = 0.0;
    let mut saw_float = false;
    for item in &items {
        match item {
            Value::Int(n) => int_sum = int_sum.wrapping_add(*n),
            Value::Float(f) => {
                saw_float = true;
                float_sum += f;
            }
            other => return Err(type_error(b, other)),
        }
    }
    if saw_float {
        Ok(Value::Float(float_sum + int_sum as f64))
    } else {
        Ok(Value::Int(int_sum))
    }
}

pub(super) fn mean(b: BuiltinFn, args: Vec<Value>) -> RunResult<Value> {
    check_arity(b, &args, 1)?;
    let len = match &args[0] {
        Value::Array(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        other => return Err(type_error(b, other)),
    };
    if len == 0 {
        return Err(RunError::raised("mean of empty sequence"));
    }
    let total = match sum(b, args)? {
        Value::Int(n) => n as f64,
        Value::Float(f) => f,
        _ => unreachable!("sum returns a number"),
    };
    Ok(Value::Float(total / len as f64))
}

pub(super) fn reverse(b: BuiltinFn, args: Vec<Value>, tracker: &mut ResourceTracker) -> RunResult<Value> {
    check_arity(b, &args, 1)?;
    match &args[0] {
        Value::Array(items) => {
            items.borrow_mut().reverse();
            Ok(args[0].clone())
        }
        Value::Str(s) => {
            let reversed: String = s.chars().rev().collect();
            tracker.charge_string(reversed.len())?;
            Ok(Value::str(reversed))
        }
        other => Err(type_error(b, other)),
    }
}

pub(super) fn any(b: BuiltinFn, args: Vec<Value>) -> RunResult<Value> {
    check_arity(b, &args, 1)?;
    match &args[0] {
        Value::Array(items) => Ok(Value::Bool(items.borrow().iter().any(Value::is_truthy))),
        Value::Tuple(items) => Ok(Value::Bool(items.iter().any(Value::is_truthy))),
        other => Err(type_error(b, other)),
    }
}

pub(super) fn all(b: BuiltinFn, args: Vec<Value>) -> RunResult<Value> {
    check_arity(b, &args, 1)?;
    match &args[0] {
        Value::Array(items) => Ok(Value::Bool(items.borrow().iter().all(Value::is_truthy))),
        Value::Tuple(items) => Ok(Value::Bool(items.iter().all(Value::is_truthy))),
        other => Err(type_error(b, other)),
    }
}

/// Converts a value into a dict key or raises the unhashable-key error.
pub(crate) fn dict_key(b: BuiltinFn, value: &Value) -> RunResult<DictKey> {
    DictKey::from_value(value).ok_or_else(|| {
        RunError::raised(format!(
            "unhashable key for {b}: {}",
            value.type_name()
        ))
    })
}

fn incomparable(a: &Value, z: &Value) -> RunError {
    RunError::raised(format!(
        "cannot compare {} with {}",
        a.type_name(),
        z.type_name()
    ))
}
