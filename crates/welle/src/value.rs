//! The Welle value model.
//!
//! A tagged sum of scalars, containers, callables, control-flow sentinels,
//! and errors. Scalars have value semantics; containers (arrays, dicts) are
//! shared by reference so mutation is observable through every holder.
//! Captured locals live in [`Cell`]s jointly owned by the defining frame and
//! any closures that captured them; cells never reference each other, so
//! plain reference counting suffices.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

use crate::builtins::BuiltinFn;
use crate::bytecode::code::{Closure, CompiledFunction};
use crate::error::ErrorValue;
use crate::types::{Dict, Iter};

/// Depth cap for structural operations (display, equality) so cyclic
/// containers cannot overflow the host stack.
const MAX_DATA_DEPTH: u32 = 64;

/// A shared mutable cell, the representation of a captured local.
pub type Cell = Rc<RefCell<Value>>;

/// A Welle runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Bool(bool),
    Nil,
    /// Mutable, ordered, identity-bearing sequence.
    Array(Rc<RefCell<Vec<Value>>>),
    /// Immutable ordered sequence.
    Tuple(Rc<[Value]>),
    /// Mutable mapping with deterministic iteration order.
    Dict(Rc<RefCell<Dict>>),
    /// A compiled function; appears in constant pools, never executes bare.
    Function(Rc<CompiledFunction>),
    /// A compiled function plus its captured cells.
    Closure(Rc<Closure>),
    /// A captured local, visible on the operand stack during closure creation.
    CellRef(Cell),
    /// A registry builtin.
    Builtin(BuiltinFn),
    /// An error object (raised or inert, see [`ErrorValue::is_value`]).
    Error(Rc<ErrorValue>),
    /// Transient wrapper marking a value expanded into a call argument list.
    Spread(Box<Value>),
    /// Transient iteration snapshot.
    Iterator(Rc<RefCell<Iter>>),
}

impl Value {
    /// Creates a string value.
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Self::Str(s.into())
    }

    /// Creates an array value from elements.
    #[must_use]
    pub fn array(items: Vec<Self>) -> Self {
        Self::Array(Rc::new(RefCell::new(items)))
    }

    /// Creates a dict value.
    #[must_use]
    pub fn dict(dict: Dict) -> Self {
        Self::Dict(Rc::new(RefCell::new(dict)))
    }

    /// The language-level type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Bool(_) => "boolean",
            Self::Nil => "nil",
            Self::Array(_) => "array",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Function(_) | Self::Closure(_) => "function",
            Self::CellRef(_) => "cell",
            Self::Builtin(_) => "builtin",
            Self::Error(_) => "error",
            Self::Spread(_) => "spread",
            Self::Iterator(_) => "iterator",
        }
    }

    /// Truthiness: only `false` and `nil` are falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Bool(false) | Self::Nil)
    }

    /// Value equality (`==`): numeric across Integer/Float, deep for
    /// containers, identity for callables.
    #[must_use]
    pub fn welle_eq(&self, other: &Self) -> bool {
        self.eq_at_depth(other, 0)
    }

    fn eq_at_depth(&self, other: &Self, depth: u32) -> bool {
        if depth > MAX_DATA_DEPTH {
            return false;
        }
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) => (*a as f64) == *b,
            (Self::Float(a), Self::Int(b)) => *a == (*b as f64),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Nil, Self::Nil) => true,
            (Self::Array(a), Self::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.eq_at_depth(y, depth + 1))
            }
            (Self::Tuple(a), Self::Tuple(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.eq_at_depth(y, depth + 1))
            }
            (Self::Dict(a), Self::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.get(k).is_some_and(|w| v.eq_at_depth(w, depth + 1))
                    })
            }
            (Self::Closure(a), Self::Closure(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => a.message == b.message && a.code == b.code,
            _ => false,
        }
    }

    /// Ordered comparison: numbers (with promotion) and strings only.
    #[must_use]
    pub fn welle_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Str(a), Self::Str(b)) => Some(a.as_ref().cmp(b.as_ref())),
            _ => None,
        }
    }

    /// The `is` operator: equal value *and* type; identity for containers
    /// and callables. `1 is 1.0` is false even though `1 == 1.0`.
    #[must_use]
    pub fn is_same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Nil, Self::Nil) => true,
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Tuple(a), Self::Tuple(b)) => Rc::ptr_eq(a, b),
            (Self::Dict(a), Self::Dict(b)) => Rc::ptr_eq(a, b),
            (Self::Closure(a), Self::Closure(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Renders the value the way `str()` and `print` show it: strings bare,
    /// everything else in literal form.
    #[must_use]
    pub fn display_string(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            _ => self.repr_string(),
        }
    }

    /// Renders the value in literal form: strings quoted, containers in
    /// their literal syntax, dicts in the deterministic key order.
    #[must_use]
    pub fn repr_string(&self) -> String {
        let mut out = String::new();
        self.repr_into(&mut out, 0);
        out
    }

    fn repr_into(&self, out: &mut String, depth: u32) {
        if depth > MAX_DATA_DEPTH {
            out.push_str("...");
            return;
        }
        match self {
            Self::Int(n) => {
                let _ = write!(out, "{n}");
            }
            Self::Float(f) => {
                if f.is_finite() {
                    let mut buf = ryu::Buffer::new();
                    out.push_str(buf.format(*f));
                } else {
                    let _ = write!(out, "{f}");
                }
            }
            Self::Str(s) => {
                out.push('"');
                for c in s.chars() {
                    match c {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        '\r' => out.push_str("\\r"),
                        _ => out.push(c),
                    }
                }
                out.push('"');
            }
            Self::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Self::Nil => out.push_str("nil"),
            Self::Array(items) => {
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.repr_into(out, depth + 1);
                }
                out.push(']');
            }
            Self::Tuple(items) => {
                out.push('(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.repr_into(out, depth + 1);
                }
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Self::Dict(dict) => {
                out.push_str("#{");
                for (i, (key, value)) in dict.borrow().sorted_pairs().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.to_value().repr_into(out, depth + 1);
                    out.push_str(": ");
                    value.repr_into(out, depth + 1);
                }
                out.push('}');
            }
            Self::Function(func) => {
                let _ = write!(out, "<function {}>", func.name());
            }
            Self::Closure(closure) => {
                let _ = write!(out, "<function {}>", closure.function.name());
            }
            Self::CellRef(cell) => {
                out.push_str("<cell ");
                cell.borrow().repr_into(out, depth + 1);
                out.push('>');
            }
            Self::Builtin(b) => {
                let _ = write!(out, "<builtin {b}>");
            }
            Self::Error(err) => {
                let _ = write!(out, "error: {}", err.message);
            }
            Self::Spread(inner) => {
                out.push('*');
                inner.repr_into(out, depth + 1);
            }
            Self::Iterator(_) => out.push_str("<iterator>"),
        }
    }

    /// The display string of a string repeated `count` times, etc. is built
    /// by callers; this helper reports whether the value can be a dict key.
    #[must_use]
    pub fn is_hashable(&self) -> bool {
        matches!(
            self,
            Self::Int(_) | Self::Float(_) | Self::Bool(_) | Self::Str(_)
        )
    }
}

impl PartialEq for Value {
    /// Structural equality used by tests; note this is stricter than the
    /// language's `==` (no numeric cross-promotion).
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Nil, Self::Nil) => true,
            (Self::Array(a), Self::Array(b)) => *a.borrow() == *b.borrow(),
            (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::Dict(a), Self::Dict(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (Self::Closure(a), Self::Closure(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_eq_promotes_but_is_does_not() {
        assert!(Value::Int(1).welle_eq(&Value::Float(1.0)));
        assert!(!Value::Int(1).is_same(&Value::Float(1.0)));
        assert!(Value::Int(1).is_same(&Value::Int(1)));
    }

    #[test]
    fn container_is_compares_identity() {
        let a = Value::array(vec![Value::Int(1)]);
        let b = Value::array(vec![Value::Int(1)]);
        assert!(a.welle_eq(&b));
        assert!(!a.is_same(&b));
        assert!(a.is_same(&a.clone()));
    }

    #[test]
    fn display_and_repr() {
        assert_eq!(Value::str("hi").display_string(), "hi");
        assert_eq!(Value::str("hi").repr_string(), "\"hi\"");
        let arr = Value::array(vec![Value::Int(4), Value::Int(16)]);
        assert_eq!(arr.display_string(), "[4, 16]");
        assert_eq!(Value::Float(2.5).display_string(), "2.5");
        assert_eq!(Value::Nil.display_string(), "nil");
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Nil.is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::str("").is_truthy());
    }
}
