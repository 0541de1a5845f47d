//! Error taxonomy for the compiler and VM.
//!
//! Three classes exist at runtime: raised errors (the normal dynamic failure
//! mode), error *values* produced by the `error(...)` builtin (inert until
//! thrown), and fatal errors (internal invariant violations that abort
//! execution). Compile errors are static and carry a source position.

use std::fmt;
use std::rc::Rc;

use crate::ast::Position;

/// Reserved error code for memory-budget exhaustion.
pub const MEMORY_ERROR_CODE: i64 = 8001;

/// A Welle error object.
///
/// This is both the payload of a raised error and the value produced by the
/// `error(msg, code?)` builtin. The `is_value` flag distinguishes the two:
/// an error value behaves as ordinary data until it is thrown, at which
/// point the VM clones it into a raised shape so the original stays usable.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    /// Human-readable message.
    pub message: String,
    /// Integer error code; 0 unless set explicitly.
    pub code: i64,
    /// Formatted stack trace, filled in by the VM when the error is raised.
    pub stack: String,
    /// True for values built by `error(...)`, false for raised errors.
    pub is_value: bool,
}

impl ErrorValue {
    /// Creates a raised error with the default code.
    pub fn raised(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: 0,
            stack: String::new(),
            is_value: false,
        }
    }

    /// Creates a raised error with an explicit code.
    pub fn raised_with_code(message: impl Into<String>, code: i64) -> Self {
        Self {
            message: message.into(),
            code,
            stack: String::new(),
            is_value: false,
        }
    }

    /// Creates an inert error value, as produced by the `error(...)` builtin.
    pub fn value(message: impl Into<String>, code: i64) -> Self {
        Self {
            message: message.into(),
            code,
            stack: String::new(),
            is_value: true,
        }
    }

    /// Renders the top-level report for an uncaught error.
    ///
    /// The format is one line `error: <msg>` followed by the stack trace
    /// captured when the error was raised.
    #[must_use]
    pub fn report(&self) -> String {
        if self.stack.is_empty() {
            format!("error: {}", self.message)
        } else {
            format!("error: {}\n{}", self.message, self.stack)
        }
    }
}

/// One frame of a stack trace, deepest first.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    /// Function name, `<anon@L:C>` for anonymous functions, `<main>` at top level.
    pub name: Rc<str>,
    /// Source file of the executing function.
    pub file: Rc<str>,
    /// Position of the instruction being executed.
    pub position: Position,
}

/// Formats a stack trace from frames ordered deepest-first.
#[must_use]
pub fn format_stack_trace(frames: &[TraceFrame]) -> String {
    let mut out = String::from("stack trace:");
    for frame in frames {
        out.push_str(&format!(
            "\n  at {} ({}:{}:{})",
            frame.name, frame.file, frame.position.line, frame.position.column
        ));
    }
    out
}

/// Internal result alias used throughout the compiler back end and VM.
pub type RunResult<T> = Result<T, RunError>;

/// Error type threaded through VM execution.
#[derive(Debug)]
pub enum RunError {
    /// A catchable Welle error travelling toward a handler.
    Raised(Box<ErrorValue>),
    /// An internal invariant violation. Never catchable; indicates a bug.
    Fatal(String),
}

impl RunError {
    /// Creates a raised error with the default code.
    pub fn raised(message: impl Into<String>) -> Self {
        Self::Raised(Box::new(ErrorValue::raised(message)))
    }

    /// Creates a raised error with an explicit code.
    pub fn raised_with_code(message: impl Into<String>, code: i64) -> Self {
        Self::Raised(Box::new(ErrorValue::raised_with_code(message, code)))
    }

    /// Creates a fatal internal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raised(err) => write!(f, "{}", err.message),
            Self::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

impl std::error::Error for RunError {}

/// A static error produced before execution begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    message: String,
    position: Position,
}

impl CompileError {
    /// Creates a compile error at the given source position.
    pub fn new(message: impl Into<String>, position: Position) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the source position the error points at.
    #[must_use]
    pub fn position(&self) -> Position {
        self.position
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "compile error: {} at {}:{}",
            self.message, self.position.line, self.position.column
        )
    }
}

impl std::error::Error for CompileError {}
