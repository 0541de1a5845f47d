//! Module loading seam and import-cycle tracking.
//!
//! Module resolution lives outside the core: the VM asks a [`ModuleLoader`]
//! for the program tree of a path and executes it in-line, sharing the
//! cache and the import tracker with the parent so recursive imports are
//! detected deterministically.

use ahash::AHashMap;

use crate::ast::Program;
use crate::error::{RunError, RunResult};
use crate::value::Value;

/// Resolves module paths to parsed programs.
pub trait ModuleLoader {
    /// Loads the program for `path`, or an error message when it cannot.
    fn load(&mut self, path: &str) -> Result<Program, String>;
}

/// An in-memory loader for tests and embedding.
#[derive(Debug, Default)]
pub struct MapLoader {
    programs: AHashMap<String, Program>,
}

impl MapLoader {
    /// Creates an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a program under a path.
    pub fn insert(&mut self, path: impl Into<String>, program: Program) {
        self.programs.insert(path.into(), program);
    }
}

impl ModuleLoader for MapLoader {
    fn load(&mut self, path: &str) -> Result<Program, String> {
        self.programs
            .get(path)
            .cloned()
            .ok_or_else(|| "module not found".to_string())
    }
}

/// VM-side registry: the path-to-exports cache plus the ordered stack of
/// modules currently executing, used for cycle detection.
#[derive(Debug, Default)]
pub(crate) struct ModuleRegistry {
    cache: AHashMap<String, Value>,
    active: Vec<String>,
    active_index: AHashMap<String, usize>,
}

impl ModuleRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the cached exports for a path, if the module already ran.
    pub(crate) fn cached(&self, path: &str) -> Option<Value> {
        self.cache.get(path).cloned()
    }

    /// Caches a completed module's exports.
    pub(crate) fn cache(&mut self, path: &str, exports: Value) {
        self.cache.insert(path.to_string(), exports);
    }

    /// Marks a module as executing, raising WM0001 on repeated entry.
    ///
    /// The cycle message lists the chain in import order, starting at the
    /// first occurrence of the repeated path:
    /// `WM0001 import cycle: a -> b -> a`.
    pub(crate) fn begin(&mut self, path: &str) -> RunResult<()> {
        if let Some(&start) = self.active_index.get(path) {
            let mut chain: Vec<&str> = self.active[start..].iter().map(String::as_str).collect();
            chain.push(path);
            return Err(RunError::raised(format!(
                "WM0001 import cycle: {}",
                chain.join(" -> ")
            )));
        }
        self.active_index.insert(path.to_string(), self.active.len());
        self.active.push(path.to_string());
        Ok(())
    }

    /// Unmarks a module after execution (successful or not).
    pub(crate) fn end(&mut self, path: &str) {
        if self.active.last().map(String::as_str) == Some(path) {
            self.active.pop();
        }
        self.active_index.remove(path);
    }
}
