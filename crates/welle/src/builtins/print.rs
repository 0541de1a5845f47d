//! I/O builtins: `print`, `input`, `getpass`, `writeFile`.
//!
//! `print` goes through the host-provided [`PrintWriter`]; the line-reading
//! builtins block on standard input, which is acceptable for these
//! peripheral entries.

use std::io::BufRead;

use crate::builtins::{check_arity, check_arity_range, type_error, BuiltinFn};
use crate::error::{RunError, RunResult};
use crate::io::PrintWriter;
use crate::resource::ResourceTracker;
use crate::value::Value;

pub(super) fn print(args: Vec<Value>, writer: &mut impl PrintWriter) -> RunResult<Value> {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            writer.stdout_push(' ');
        }
        writer.stdout_write(arg.display_string().into());
    }
    writer.stdout_push('\n');
    Ok(Value::Nil)
}

pub(super) fn input(
    b: BuiltinFn,
    args: Vec<Value>,
    tracker: &mut ResourceTracker,
    writer: &mut impl PrintWriter,
) -> RunResult<Value> {
    read_line(b, args, tracker, writer)
}

/// Identical to `input` apart from intent; echo suppression is the host
/// terminal's concern.
pub(super) fn getpass(
    b: BuiltinFn,
    args: Vec<Value>,
    tracker: &mut ResourceTracker,
    writer: &mut impl PrintWriter,
) -> RunResult<Value> {
    read_line(b, args, tracker, writer)
}

fn read_line(
    b: BuiltinFn,
    args: Vec<Value>,
    tracker: &mut ResourceTracker,
    writer: &mut impl PrintWriter,
) -> RunResult<Value> {
    check_arity_range(b, &args, 0, 1)?;
    if let Some(prompt) = args.first() {
        match prompt {
            Value::Str(s) => writer.stdout_write(s.to_string().into()),
            other => return Err(type_error(b, other)),
        }
    }
    let mut line = String::new();
    let stdin = std::io::stdin();
    let read = stdin
        .lock()
        .read_line(&mut line)
        .map_err(|err| RunError::raised(format!("{b}: {err}")))?;
    if read == 0 {
        return Ok(Value::Nil);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    tracker.charge_string(line.len())?;
    Ok(Value::str(line))
}

pub(super) fn write_file(b: BuiltinFn, args: Vec<Value>) -> RunResult<Value> {
    check_arity(b, &args, 2)?;
    let Value::Str(path) = &args[0] else {
        return Err(type_error(b, &args[0]));
    };
    let Value::Str(content) = &args[1] else {
        return Err(type_error(b, &args[1]));
    };
    std::fs::write(path.as_ref(), content.as_bytes())
        .map_err(|err| RunError::raised(format!("cannot write file \"{path}\": {err}")))?;
    Ok(Value::Nil)
}
