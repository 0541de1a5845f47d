//! Intrinsic method dispatch.
//!
//! Method calls that miss the receiver's own entries (Dicts only) land in a
//! static table keyed on receiver type and method name, delegating to the
//! registry builtin with the receiver prepended as the first argument.

use crate::builtins::BuiltinFn;
use crate::value::Value;

/// Looks up the intrinsic backing `receiver.name(...)`.
pub(super) fn intrinsic(receiver: &Value, name: &str) -> Option<BuiltinFn> {
    use BuiltinFn::{
        Abs, All, Any, Count, Get, HasKey, Join, Keys, Len, Map, Max, Mean, Min, Pop, Push,
        Remove, Reverse, Sort, Sqrt, Str, Sum, Values,
    };
    match receiver {
        Value::Array(_) => match name {
            "len" => Some(Len),
            "push" | "append" => Some(Push),
            "pop" => Some(Pop),
            "count" => Some(Count),
            "remove" => Some(Remove),
            "sort" => Some(Sort),
            "reverse" => Some(Reverse),
            "sum" => Some(Sum),
            "mean" => Some(Mean),
            "max" => Some(Max),
            "min" => Some(Min),
            "any" => Some(Any),
            "all" => Some(All),
            "join" => Some(Join),
            "map" => Some(Map),
            "str" => Some(Str),
            _ => None,
        },
        Value::Tuple(_) => match name {
            "len" => Some(Len),
            "count" => Some(Count),
            "sum" => Some(Sum),
            "mean" => Some(Mean),
            "max" => Some(Max),
            "min" => Some(Min),
            "any" => Some(Any),
            "all" => Some(All),
            "join" => Some(Join),
            "map" => Some(Map),
            "str" => Some(Str),
            _ => None,
        },
        Value::Dict(_) => match name {
            "len" => Some(Len),
            "keys" => Some(Keys),
            "values" => Some(Values),
            "hasKey" => Some(HasKey),
            "get" => Some(Get),
            "remove" => Some(Remove),
            "pop" => Some(Pop),
            "str" => Some(Str),
            _ => None,
        },
        Value::Str(_) => match name {
            "len" => Some(Len),
            "count" => Some(Count),
            "reverse" => Some(Reverse),
            "str" => Some(Str),
            _ => None,
        },
        Value::Int(_) | Value::Float(_) => match name {
            "abs" => Some(Abs),
            "sqrt" => Some(Sqrt),
            "str" => Some(Str),
            _ => None,
        },
        _ => None,
    }
}
