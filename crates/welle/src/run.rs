//! Top-level compile-and-run entry points.
//!
//! [`Runner`] is the embedding facade: configure budgets, optimization, and
//! a module loader, then execute a program tree and receive the captured
//! outcome (REPL result, exports, or the uncaught error report).

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::Program;
use crate::bytecode::{Compiler, CompilerOptions, Unit, Vm};
use crate::error::{CompileError, ErrorValue};
use crate::io::PrintWriter;
use crate::modules::ModuleLoader;
use crate::resource::ResourceLimits;
use crate::types::Dict;
use crate::value::Value;

/// What a program run produced.
#[derive(Debug)]
pub struct Outcome {
    /// The most recently popped value: the result of the last expression
    /// statement, nil when the program ended on a non-expression.
    pub value: Value,
    /// The program's exports dictionary.
    pub exports: Rc<RefCell<Dict>>,
}

/// Why a program run failed.
#[derive(Debug)]
pub enum RunFailure {
    /// A static error; nothing executed.
    Compile(CompileError),
    /// An uncaught runtime error, with its formatted stack trace.
    Uncaught(Box<ErrorValue>),
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compile(err) => write!(f, "{err}"),
            Self::Uncaught(err) => write!(f, "{}", err.report()),
        }
    }
}

impl std::error::Error for RunFailure {}

/// Compile-and-run facade.
pub struct Runner<'a> {
    limits: ResourceLimits,
    options: CompilerOptions,
    loader: Option<&'a mut dyn ModuleLoader>,
}

impl Default for Runner<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Runner<'a> {
    /// Creates a runner with no budgets and default compiler options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            limits: ResourceLimits::default(),
            options: CompilerOptions::default(),
            loader: None,
        }
    }

    /// Applies resource limits to the run.
    #[must_use]
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Overrides compiler options (e.g. disables optimization).
    #[must_use]
    pub fn compiler_options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    /// Resolves imports through the given loader.
    #[must_use]
    pub fn loader(mut self, loader: &'a mut dyn ModuleLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Compiles a program without running it.
    pub fn compile(&self, program: &Program) -> Result<Unit, CompileError> {
        Compiler::with_options(&program.file, self.options.clone()).compile(program)
    }

    /// Compiles and runs a program, writing `print` output to `writer`.
    pub fn run(
        self,
        program: &Program,
        writer: &mut impl PrintWriter,
    ) -> Result<Outcome, RunFailure> {
        let unit = self.compile(program).map_err(RunFailure::Compile)?;
        let mut vm = match self.loader {
            Some(loader) => Vm::with_loader(self.limits, writer, loader),
            None => Vm::new(self.limits, writer),
        };
        match vm.run(&unit) {
            Ok(value) => Ok(Outcome {
                value,
                exports: vm.exports(),
            }),
            Err(err) => Err(RunFailure::Uncaught(err)),
        }
    }
}
