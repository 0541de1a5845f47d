//! Container operations: indexing, slicing, members, merges, iterators.

use std::rc::Rc;

use crate::error::{RunError, RunResult};
use crate::resource::ResourceTracker;
use crate::types::{DictKey, Iter};
use crate::value::Value;

/// Indexing. Arrays, tuples, and strings take integer indices with negative
/// offsets counting from the end; out-of-range indices raise. Dict indexing
/// returns nil on a missing key (member access is the strict variant).
pub(super) fn index_get(object: &Value, index: &Value) -> RunResult<Value> {
    match object {
        Value::Array(items) => {
            let items = items.borrow();
            let idx = normalize_index(index, items.len(), object)?;
            Ok(items[idx].clone())
        }
        Value::Tuple(items) => {
            let idx = normalize_index(index, items.len(), object)?;
            Ok(items[idx].clone())
        }
        Value::Str(s) => {
            let len = s.chars().count();
            let idx = normalize_index(index, len, object)?;
            let ch = s.chars().nth(idx).expect("index normalized");
            Ok(Value::str(ch.to_string()))
        }
        Value::Dict(dict) => {
            let key = hashable_key(index)?;
            Ok(dict.borrow().get(&key).cloned().unwrap_or(Value::Nil))
        }
        other => Err(RunError::raised(format!(
            "cannot index {}",
            other.type_name()
        ))),
    }
}

pub(super) fn index_set(
    object: &Value,
    index: &Value,
    value: Value,
    tracker: &mut ResourceTracker,
) -> RunResult<()> {
    match object {
        Value::Array(items) => {
            let mut items = items.borrow_mut();
            let idx = normalize_index(index, items.len(), object)?;
            items[idx] = value;
            Ok(())
        }
        Value::Dict(dict) => {
            let key = hashable_key(index)?;
            let mut dict = dict.borrow_mut();
            if !dict.contains(&key) {
                tracker.charge_dict_entry()?;
            }
            dict.insert(key, value);
            Ok(())
        }
        Value::Tuple(_) => Err(RunError::raised("tuples are immutable")),
        Value::Str(_) => Err(RunError::raised("strings are immutable")),
        other => Err(RunError::raised(format!(
            "cannot index {}",
            other.type_name()
        ))),
    }
}

/// Slicing with optional bounds and step, Python-style semantics.
pub(super) fn slice(
    object: &Value,
    low: &Value,
    high: &Value,
    step: &Value,
    tracker: &mut ResourceTracker,
) -> RunResult<Value> {
    let step = match step {
        Value::Nil => 1,
        Value::Int(n) => *n,
        other => return Err(slice_bound_error(other)),
    };
    if step == 0 {
        return Err(RunError::raised("slice step cannot be zero"));
    }

    match object {
        Value::Array(items) => {
            let items = items.borrow();
            let indices = slice_indices(items.len(), low, high, step)?;
            tracker.charge_array(indices.len())?;
            let sliced: Vec<Value> = indices.into_iter().map(|i| items[i].clone()).collect();
            Ok(Value::array(sliced))
        }
        Value::Tuple(items) => {
            let indices = slice_indices(items.len(), low, high, step)?;
            tracker.charge_array(indices.len())?;
            let sliced: Vec<Value> = indices.into_iter().map(|i| items[i].clone()).collect();
            Ok(Value::Tuple(sliced.into()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let indices = slice_indices(chars.len(), low, high, step)?;
            let sliced: String = indices.into_iter().map(|i| chars[i]).collect();
            tracker.charge_string(sliced.len())?;
            Ok(Value::str(sliced))
        }
        other => Err(RunError::raised(format!(
            "cannot slice {}",
            other.type_name()
        ))),
    }
}

/// Member access. Errors expose `message`, `code`, and `stack`; dict member
/// access is string-key indexing that raises on a miss, unlike plain
/// indexing which yields nil.
///
/// Field reads are not construction sites, so nothing is charged here; a
/// budget error's message must stay readable inside its own catch handler.
pub(super) fn member_get(object: &Value, name: &str) -> RunResult<Value> {
    match object {
        Value::Error(err) => match name {
            "message" => Ok(Value::str(err.message.clone())),
            "code" => Ok(Value::Int(err.code)),
            "stack" => Ok(Value::str(err.stack.clone())),
            _ => Err(unknown_member(name)),
        },
        Value::Dict(dict) => {
            let key = DictKey::Str(name.into());
            dict.borrow()
                .get(&key)
                .cloned()
                .ok_or_else(|| unknown_member(name))
        }
        other => Err(RunError::raised(format!(
            "cannot access member \"{name}\" on {}",
            other.type_name()
        ))),
    }
}

pub(super) fn member_set(
    object: &Value,
    name: &str,
    value: Value,
    tracker: &mut ResourceTracker,
) -> RunResult<()> {
    match object {
        Value::Dict(dict) => {
            let key = DictKey::Str(name.into());
            let mut dict = dict.borrow_mut();
            if !dict.contains(&key) {
                tracker.charge_dict_entry()?;
            }
            dict.insert(key, value);
            Ok(())
        }
        other => Err(RunError::raised(format!(
            "cannot set member \"{name}\" on {}",
            other.type_name()
        ))),
    }
}

/// The `|=` operator: in-place dict update (last wins, charging per new
/// key) or bitwise or for integers.
pub(super) fn dict_update(
    left: Value,
    right: Value,
    tracker: &mut ResourceTracker,
) -> RunResult<Value> {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a | b)),
        (Value::Dict(target), Value::Dict(source)) => {
            if Rc::ptr_eq(target, source) {
                return Ok(left);
            }
            let entries: Vec<(DictKey, Value)> = source
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let mut target_ref = target.borrow_mut();
            for (key, value) in entries {
                if !target_ref.contains(&key) {
                    tracker.charge_dict_entry()?;
                }
                target_ref.insert(key, value);
            }
            drop(target_ref);
            Ok(left)
        }
        _ => Err(RunError::raised(format!(
            "unsupported operand types for |=: {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

/// Snapshots an iterable. Later mutations of the source do not affect the
/// iterator. Dicts iterate their keys in the deterministic sorted order;
/// string snapshots charge per produced code point.
pub(super) fn iter_init(source: &Value, tracker: &mut ResourceTracker) -> RunResult<Value> {
    let items: Vec<Value> = match source {
        Value::Array(items) => items.borrow().clone(),
        Value::Tuple(items) => items.to_vec(),
        Value::Dict(dict) => dict.borrow().sorted_keys(),
        Value::Str(s) => {
            let mut items = Vec::new();
            for ch in s.chars() {
                tracker.charge_string(ch.len_utf8())?;
                items.push(Value::str(ch.to_string()));
            }
            items
        }
        other => {
            return Err(RunError::raised(format!(
                "cannot iterate over {}",
                other.type_name()
            )));
        }
    };
    Ok(Value::Iterator(Rc::new(std::cell::RefCell::new(Iter::new(
        items,
    )))))
}

// ============================================================================
// Helpers
// ============================================================================

fn normalize_index(index: &Value, len: usize, object: &Value) -> RunResult<usize> {
    let Value::Int(raw) = index else {
        return Err(RunError::raised(format!(
            "{} index must be an integer, got {}",
            object.type_name(),
            index.type_name()
        )));
    };
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let adjusted = if *raw < 0 { raw + len_i } else { *raw };
    if (0..len_i).contains(&adjusted) {
        Ok(usize::try_from(adjusted).expect("checked range"))
    } else {
        Err(RunError::raised("index out of range"))
    }
}

fn slice_bound_error(value: &Value) -> RunError {
    RunError::raised(format!(
        "slice bounds must be integers, got {}",
        value.type_name()
    ))
}

/// Computes the element indices a slice selects.
fn slice_indices(len: usize, low: &Value, high: &Value, step: i64) -> RunResult<Vec<usize>> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let bound = |v: &Value| -> RunResult<Option<i64>> {
        match v {
            Value::Nil => Ok(None),
            Value::Int(n) => Ok(Some(*n)),
            other => Err(slice_bound_error(other)),
        }
    };
    let low = bound(low)?;
    let high = bound(high)?;

    let (start, stop) = if step > 0 {
        let start = low.map_or(0, |v| clamp_index(v, len, 0, len));
        let stop = high.map_or(len, |v| clamp_index(v, len, 0, len));
        (start, stop)
    } else {
        let start = low.map_or(len - 1, |v| clamp_index(v, len, -1, len - 1));
        let stop = high.map_or(-1, |v| clamp_index(v, len, -1, len - 1));
        (start, stop)
    };

    let mut indices = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        if (0..len).contains(&i) {
            indices.push(usize::try_from(i).expect("in range"));
        }
        i += step;
    }
    Ok(indices)
}

/// Normalizes a possibly-negative slice bound into `[min, max]`.
fn clamp_index(value: i64, len: i64, min: i64, max: i64) -> i64 {
    let adjusted = if value < 0 { value + len } else { value };
    adjusted.clamp(min, max)
}

fn hashable_key(value: &Value) -> RunResult<DictKey> {
    DictKey::from_value(value)
        .ok_or_else(|| RunError::raised(format!("unhashable key: {}", value.type_name())))
}

fn unknown_member(name: &str) -> RunError {
    RunError::raised(format!("unknown member \"{name}\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_indexing() {
        let arr = Value::array(vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
        assert_eq!(index_get(&arr, &Value::Int(-1)).unwrap(), Value::Int(30));
        assert_eq!(index_get(&arr, &Value::Int(0)).unwrap(), Value::Int(10));
        assert!(index_get(&arr, &Value::Int(3)).is_err());
        assert!(index_get(&arr, &Value::Int(-4)).is_err());
    }

    #[test]
    fn string_code_point_indexing() {
        let s = Value::str("café");
        assert_eq!(index_get(&s, &Value::Int(-1)).unwrap(), Value::str("é"));
        assert_eq!(index_get(&s, &Value::Int(0)).unwrap(), Value::str("c"));
    }

    #[test]
    fn negative_slice() {
        let mut tracker = ResourceTracker::default();
        let arr = Value::array(vec![
            Value::Int(10),
            Value::Int(20),
            Value::Int(30),
            Value::Int(40),
        ]);
        let sliced = slice(&arr, &Value::Int(-3), &Value::Int(-1), &Value::Nil, &mut tracker)
            .unwrap();
        assert_eq!(sliced, Value::array(vec![Value::Int(20), Value::Int(30)]));
    }

    #[test]
    fn reverse_slice_with_negative_step() {
        let mut tracker = ResourceTracker::default();
        let s = Value::str("abc");
        let sliced = slice(&s, &Value::Nil, &Value::Nil, &Value::Int(-1), &mut tracker).unwrap();
        assert_eq!(sliced, Value::str("cba"));
    }

    #[test]
    fn dict_index_miss_is_nil_but_member_miss_raises() {
        let dict = Value::dict(crate::types::Dict::new());
        assert_eq!(index_get(&dict, &Value::str("a")).unwrap(), Value::Nil);
        assert!(member_get(&dict, "a").is_err());
    }

    #[test]
    fn iterator_snapshots_source() {
        let mut tracker = ResourceTracker::default();
        let arr = Value::array(vec![Value::Int(1)]);
        let iter = iter_init(&arr, &mut tracker).unwrap();
        if let Value::Array(items) = &arr {
            items.borrow_mut().push(Value::Int(2));
        }
        let Value::Iterator(iter) = iter else { panic!() };
        let mut iter = iter.borrow_mut();
        assert_eq!(iter.next(), Some(Value::Int(1)));
        assert_eq!(iter.next(), None, "mutation after init is invisible");
    }
}
