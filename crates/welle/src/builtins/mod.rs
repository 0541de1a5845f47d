//! The builtin registry.
//!
//! Builtins live in a numbered vector whose index is the operand of the
//! `GetBuiltin` instruction; the index is the `#[repr(u8)]` discriminant of
//! [`BuiltinFn`], so the enum *is* the registry and the indices are stable.
//! Aliasing is permitted: `append` shares `push`'s index.
//!
//! `map` is special: its registry entry is a stub that errors if called
//! directly. The VM's call site recognizes the stub and dispatches through
//! its internal apply-function machinery so user callables run per element.

mod collections;
mod math;
mod print;
mod strings;

use std::fmt;
use std::rc::Rc;

use strum::{EnumIter, FromRepr, IntoEnumIterator};

use crate::error::{ErrorValue, RunError, RunResult};
use crate::io::PrintWriter;
use crate::resource::ResourceTracker;
use crate::value::Value;

/// Every registry builtin, in index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter)]
#[repr(u8)]
pub enum BuiltinFn {
    Len = 0,
    Str = 1,
    Join = 2,
    Keys = 3,
    Values = 4,
    /// Also registered under the alias `append`.
    Push = 5,
    Count = 6,
    Remove = 7,
    Get = 8,
    Pop = 9,
    HasKey = 10,
    Sort = 11,
    Range = 12,
    Max = 13,
    Min = 14,
    Abs = 15,
    Sum = 16,
    Reverse = 17,
    Any = 18,
    All = 19,
    /// Stub; the VM dispatches map through apply-function.
    Map = 20,
    Mean = 21,
    Sqrt = 22,
    Print = 23,
    Input = 24,
    Getpass = 25,
    WriteFile = 26,
    GroupDigits = 27,
    FormatFloat = 28,
    FormatPercent = 29,
    Error = 30,
}

impl BuiltinFn {
    /// The stable registry index.
    #[must_use]
    pub fn index(self) -> u8 {
        self as u8
    }

    /// The primary source-level name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Len => "len",
            Self::Str => "str",
            Self::Join => "join",
            Self::Keys => "keys",
            Self::Values => "values",
            Self::Push => "push",
            Self::Count => "count",
            Self::Remove => "remove",
            Self::Get => "get",
            Self::Pop => "pop",
            Self::HasKey => "hasKey",
            Self::Sort => "sort",
            Self::Range => "range",
            Self::Max => "max",
            Self::Min => "min",
            Self::Abs => "abs",
            Self::Sum => "sum",
            Self::Reverse => "reverse",
            Self::Any => "any",
            Self::All => "all",
            Self::Map => "map",
            Self::Mean => "mean",
            Self::Sqrt => "sqrt",
            Self::Print => "print",
            Self::Input => "input",
            Self::Getpass => "getpass",
            Self::WriteFile => "writeFile",
            Self::GroupDigits => "group_digits",
            Self::FormatFloat => "format_float",
            Self::FormatPercent => "format_percent",
            Self::Error => "error",
        }
    }

    /// Additional names sharing this entry's index.
    #[must_use]
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Push => &["append"],
            _ => &[],
        }
    }

    /// Iterates every registry entry in index order.
    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }

    /// Looks an entry up by name or alias.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        Self::all().find(|b| b.name() == name || b.aliases().contains(&name))
    }

    /// Invokes the builtin.
    pub fn call(
        self,
        args: Vec<Value>,
        tracker: &mut ResourceTracker,
        writer: &mut impl PrintWriter,
    ) -> RunResult<Value> {
        match self {
            Self::Len => collections::len(self, args),
            Self::Join => collections::join(self, args, tracker),
            Self::Keys => collections::keys(self, args, tracker),
            Self::Values => collections::values(self, args, tracker),
            Self::Push => collections::push(self, args, tracker),
            Self::Count => collections::count(self, args),
            Self::Remove => collections::remove(self, args),
            Self::Get => collections::get(self, args),
            Self::Pop => collections::pop(self, args),
            Self::HasKey => collections::has_key(self, args),
            Self::Sort => collections::sort(self, args),
            Self::Range => collections::range(self, args, tracker),
            Self::Max => collections::max(self, args),
            Self::Min => collections::min(self, args),
            Self::Sum => collections::sum(self, args),
            Self::Reverse => collections::reverse(self, args, tracker),
            Self::Any => collections::any(self, args),
            Self::All => collections::all(self, args),
            Self::Mean => collections::mean(self, args),
            Self::Map => Err(RunError::raised("map cannot be called directly")),
            Self::Str => strings::str_builtin(self, args, tracker),
            Self::GroupDigits => strings::group_digits(self, args, tracker),
            Self::FormatFloat => strings::format_float(self, args, tracker),
            Self::FormatPercent => strings::format_percent(self, args, tracker),
            Self::Abs => math::abs(self, args),
            Self::Sqrt => math::sqrt(self, args),
            Self::Print => print::print(args, writer),
            Self::Input => print::input(self, args, tracker, writer),
            Self::Getpass => print::getpass(self, args, tracker, writer),
            Self::WriteFile => print::write_file(self, args),
            Self::Error => error_builtin(self, args, tracker),
        }
    }
}

impl fmt::Display for BuiltinFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The `error(msg, code?)` constructor: builds an inert error *value* for
/// the program to inspect, pass around, or throw later.
fn error_builtin(b: BuiltinFn, args: Vec<Value>, tracker: &mut ResourceTracker) -> RunResult<Value> {
    check_arity_range(b, &args, 1, 2)?;
    tracker.charge_error()?;
    let message = args[0].display_string();
    let code = match args.get(1) {
        None => 0,
        Some(Value::Int(code)) => *code,
        Some(other) => {
            return Err(type_error(b, other));
        }
    };
    Ok(Value::Error(Rc::new(ErrorValue::value(message, code))))
}

/// Raises the canonical wrong-arity error.
pub(crate) fn check_arity(b: BuiltinFn, args: &[Value], expected: usize) -> RunResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(RunError::raised(format!(
            "wrong number of arguments to {b}: expected {expected}, got {}",
            args.len()
        )))
    }
}

/// Arity check for builtins with optional trailing arguments.
pub(crate) fn check_arity_range(
    b: BuiltinFn,
    args: &[Value],
    min: usize,
    max: usize,
) -> RunResult<()> {
    if (min..=max).contains(&args.len()) {
        Ok(())
    } else {
        Err(RunError::raised(format!(
            "wrong number of arguments to {b}: expected {min} to {max}, got {}",
            args.len()
        )))
    }
}

/// Raises the canonical unsupported-argument error.
pub(crate) fn type_error(b: BuiltinFn, value: &Value) -> RunError {
    RunError::raised(format!(
        "argument to {b} not supported, got {}",
        value.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_stable_and_dense() {
        assert_eq!(BuiltinFn::Len.index(), 0);
        assert_eq!(BuiltinFn::Error.index(), 30);
        let mut prev = None;
        for b in BuiltinFn::all() {
            if let Some(prev) = prev {
                assert_eq!(b.index(), prev + 1, "registry indices must be dense");
            }
            prev = Some(b.index());
        }
    }

    #[test]
    fn aliases_share_the_index() {
        assert_eq!(BuiltinFn::lookup("append"), Some(BuiltinFn::Push));
        assert_eq!(BuiltinFn::lookup("push"), Some(BuiltinFn::Push));
        assert_eq!(BuiltinFn::lookup("hasKey"), Some(BuiltinFn::HasKey));
        assert_eq!(BuiltinFn::lookup("nope"), None);
    }

    #[test]
    fn map_stub_errors_when_called_directly() {
        let mut tracker = ResourceTracker::default();
        let mut writer = crate::io::NoPrint;
        let err = BuiltinFn::Map
            .call(vec![], &mut tracker, &mut writer)
            .unwrap_err();
        match err {
            RunError::Raised(e) => assert_eq!(e.message, "map cannot be called directly"),
            RunError::Fatal(_) => panic!("expected raised error"),
        }
    }
}
