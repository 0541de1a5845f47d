//! Welle: a bytecode compiler and stack virtual machine for a small
//! dynamically-typed scripting language.
//!
//! The crate consumes a program tree (see [`ast`]; the lexer and parser are
//! external collaborators), lowers it to bytecode with a constant pool, and
//! executes it with closures, structured exceptions, deferred calls,
//! snapshot iterators, and memory/step/recursion budgets.
//!
//! ```
//! use welle::ast::{Expr, ExprKind, Position, Program, Stmt, StmtKind};
//! use welle::{CollectStringPrint, Runner};
//!
//! let pos = Position::new(1, 1);
//! let call = Expr::new(
//!     ExprKind::Call {
//!         callee: Box::new(Expr::new(ExprKind::Ident("print".into()), pos)),
//!         args: vec![Expr::new(ExprKind::Int(42), pos)],
//!     },
//!     pos,
//! );
//! let program = Program::new("demo.we", vec![Stmt::new(StmtKind::Expr(call), pos)]);
//!
//! let mut out = CollectStringPrint::new();
//! Runner::new().run(&program, &mut out).unwrap();
//! assert_eq!(out.output(), "42\n");
//! ```

pub mod ast;
mod builtins;
mod bytecode;
mod error;
mod io;
mod modules;
mod resource;
mod run;
mod symbols;
mod types;
mod value;

pub use crate::{
    builtins::BuiltinFn,
    bytecode::{
        Closure, CompiledFunction, Compiler, CompilerOptions, ConstPool, Opcode, Unit, Vm,
        GLOBALS_SIZE, MAX_FRAMES, STACK_SIZE,
    },
    error::{CompileError, ErrorValue, RunError, MEMORY_ERROR_CODE},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    modules::{MapLoader, ModuleLoader},
    resource::{ResourceLimits, ResourceTracker},
    run::{Outcome, RunFailure, Runner},
    symbols::{Symbol, SymbolScope, SymbolTable},
    types::{Dict, DictKey, Iter},
    value::{Cell, Value},
};
