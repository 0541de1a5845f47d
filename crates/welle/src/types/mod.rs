//! Runtime container types with observable semantics.

pub mod dict;
pub mod iter;

pub use dict::{Dict, DictKey};
pub use iter::Iter;
