//! The Welle dict: a mutable mapping with deterministic iteration order.
//!
//! Keys are restricted to the hashable value variants (booleans, integers,
//! floats, strings). Integer-to-float promotion does NOT apply to keys, so
//! `1` and `1.0` address different entries.
//!
//! Iteration, `keys`, and `values` observe the language's fixed order:
//! group by key-variant rank (Boolean < Integer < String < other), then
//! sort ascending within each rank. This order is part of the language
//! contract; the backing `IndexMap` preserves insertion order only for
//! storage, and the sorted view is computed on demand.

use std::cmp::Ordering;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::Value;

/// A hashable dict key.
///
/// Floats are stored by bit pattern, which gives well-defined hashing and
/// equality without promoting across numeric variants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(Rc<str>),
}

impl DictKey {
    /// Converts a value into a key, or `None` for unhashable variants.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Int(n) => Some(Self::Int(*n)),
            Value::Float(f) => Some(Self::Float(f.to_bits())),
            Value::Str(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }

    /// Converts the key back into a value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(n) => Value::Int(*n),
            Self::Float(bits) => Value::Float(f64::from_bits(*bits)),
            Self::Str(s) => Value::Str(s.clone()),
        }
    }

    /// Rank used by the deterministic iteration order.
    ///
    /// Boolean < Integer < String < other.
    fn rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int(_) => 1,
            Self::Str(_) => 2,
            Self::Float(_) => 3,
        }
    }

    /// Total order over keys: rank first, then ascending within the rank.
    fn sort_cmp(&self, other: &Self) -> Ordering {
        match self.rank().cmp(&other.rank()) {
            Ordering::Equal => match (self, other) {
                (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
                (Self::Int(a), Self::Int(b)) => a.cmp(b),
                (Self::Str(a), Self::Str(b)) => a.as_ref().cmp(b.as_ref()),
                (Self::Float(a), Self::Float(b)) => {
                    f64::from_bits(*a).total_cmp(&f64::from_bits(*b))
                }
                _ => Ordering::Equal,
            },
            unequal => unequal,
        }
    }
}

/// A mutable, identity-bearing mapping.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: IndexMap<DictKey, Value, ahash::RandomState>,
}

impl Dict {
    /// Creates an empty dict.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the dict has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a key.
    #[must_use]
    pub fn get(&self, key: &DictKey) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Inserts an entry, returning true when the key is new.
    pub fn insert(&mut self, key: DictKey, value: Value) -> bool {
        self.entries.insert(key, value).is_none()
    }

    /// Removes an entry, returning its value.
    pub fn remove(&mut self, key: &DictKey) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    /// True when the key is present.
    #[must_use]
    pub fn contains(&self, key: &DictKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns `(key, value)` pairs in the language's deterministic order.
    #[must_use]
    pub fn sorted_pairs(&self) -> Vec<(DictKey, Value)> {
        let mut pairs: Vec<(DictKey, Value)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        // Stable sort keeps equal-rank-and-value pairs in storage order.
        pairs.sort_by(|(a, _), (b, _)| a.sort_cmp(b));
        pairs
    }

    /// Returns keys in the deterministic order, as values.
    #[must_use]
    pub fn sorted_keys(&self) -> Vec<Value> {
        self.sorted_pairs()
            .into_iter()
            .map(|(k, _)| k.to_value())
            .collect()
    }

    /// Returns values in key-sorted order.
    #[must_use]
    pub fn sorted_values(&self) -> Vec<Value> {
        self.sorted_pairs().into_iter().map(|(_, v)| v).collect()
    }

    /// Iterates entries in storage order (used for equality, not iteration).
    pub fn iter(&self) -> impl Iterator<Item = (&DictKey, &Value)> {
        self.entries.iter()
    }
}
