//! Lexically-scoped name resolution and closure conversion.
//!
//! Each identifier use resolves to a scope tag plus an index: globals index
//! into the VM's globals vector, locals into the current frame's slot
//! region, and free symbols into the enclosing closure's captured cells.
//! Resolving a name from an outer non-global scope registers exactly one
//! free entry per name in the current scope, in first-resolution order;
//! that order is what the compiler replays when it emits the cell pushes
//! preceding a `Closure` instruction.

use std::rc::Rc;

use ahash::AHashMap;

use crate::builtins::BuiltinFn;

/// Where a resolved symbol lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    /// Top-level binding; index is a globals-vector slot.
    Global,
    /// Frame-local binding; index is a slot above the frame's base pointer.
    Local,
    /// Captured binding; index into the closure's free-cell vector.
    Free,
    /// The name of the function currently being compiled (self-reference).
    Function,
    /// A registry builtin; index is its stable registry index.
    Builtin,
}

/// A resolved symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: Rc<str>,
    pub scope: SymbolScope,
    pub index: u16,
}

/// One lexical scope in the resolution chain.
#[derive(Debug, Default)]
pub struct SymbolTable {
    outer: Option<Box<SymbolTable>>,
    store: AHashMap<Rc<str>, Symbol>,
    /// Free symbols as they exist in the *enclosing* scope, recorded the
    /// first time each name resolves through this scope.
    pub free_symbols: Vec<Symbol>,
    num_definitions: u16,
    temp_counter: u32,
}

impl SymbolTable {
    /// Creates the top-level scope with every builtin pre-registered.
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self::default();
        for builtin in BuiltinFn::all() {
            let sym = Symbol {
                name: builtin.name().into(),
                scope: SymbolScope::Builtin,
                index: u16::from(builtin.index()),
            };
            table.store.insert(sym.name.clone(), sym);
            for alias in builtin.aliases() {
                let sym = Symbol {
                    name: (*alias).into(),
                    scope: SymbolScope::Builtin,
                    index: u16::from(builtin.index()),
                };
                table.store.insert(sym.name.clone(), sym);
            }
        }
        table
    }

    /// Creates a scope enclosed by `outer` (entering a function body).
    #[must_use]
    pub fn enclosed(outer: Self) -> Self {
        Self {
            outer: Some(Box::new(outer)),
            ..Self::default()
        }
    }

    /// Leaves this scope, returning the enclosing one.
    ///
    /// # Panics
    /// Panics when called on the top-level scope; the compiler only pairs
    /// this with `enclosed`.
    #[must_use]
    pub fn into_outer(self) -> Self {
        *self.outer.expect("cannot leave the top-level scope")
    }

    /// True for the top-level (global) scope.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.outer.is_none()
    }

    /// Number of Local/Global definitions in this scope.
    #[must_use]
    pub fn num_definitions(&self) -> u16 {
        self.num_definitions
    }

    /// Defines a name in this scope: Global at top level, Local otherwise.
    ///
    /// Redefinition of an existing name reuses its slot.
    pub fn define(&mut self, name: &str) -> Symbol {
        if let Some(existing) = self.store.get(name) {
            if matches!(existing.scope, SymbolScope::Global | SymbolScope::Local) {
                return existing.clone();
            }
        }
        let scope = if self.is_global() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let sym = Symbol {
            name: name.into(),
            scope,
            index: self.num_definitions,
        };
        self.num_definitions += 1;
        self.store.insert(sym.name.clone(), sym.clone());
        sym
    }

    /// Defines a uniquely-named slot invisible to source lookups.
    ///
    /// Temps carry a `$` prefix, which the lexer never produces in an
    /// identifier, and a per-scope counter.
    pub fn define_temp(&mut self, prefix: &str) -> Symbol {
        let name = format!("${prefix}{}", self.temp_counter);
        self.temp_counter += 1;
        self.define(&name)
    }

    /// Registers the name of the function whose body this scope compiles.
    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let sym = Symbol {
            name: name.into(),
            scope: SymbolScope::Function,
            index: 0,
        };
        self.store.insert(sym.name.clone(), sym.clone());
        sym
    }

    /// Resolves a name through the scope chain.
    ///
    /// A hit in an outer non-global scope registers a free-symbol entry in
    /// this scope (once per name) and returns the Free view of it.
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(sym) = self.store.get(name) {
            return Some(sym.clone());
        }
        let outer = self.outer.as_mut()?;
        let sym = outer.resolve(name)?;
        match sym.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(sym),
            SymbolScope::Local | SymbolScope::Free | SymbolScope::Function => {
                Some(self.define_free(sym))
            }
        }
    }

    /// Resolves only against this scope, ignoring the chain.
    ///
    /// Used to diagnose `:=` redeclaration.
    #[must_use]
    pub fn resolve_here(&self, name: &str) -> Option<Symbol> {
        self.store.get(name).cloned()
    }

    /// Records `original` (a symbol of the enclosing scope) as captured and
    /// returns the Free symbol this scope uses for it.
    fn define_free(&mut self, original: Symbol) -> Symbol {
        let index = u16::try_from(self.free_symbols.len()).expect("too many free variables");
        let sym = Symbol {
            name: original.name.clone(),
            scope: SymbolScope::Free,
            index,
        };
        self.free_symbols.push(original);
        self.store.insert(sym.name.clone(), sym.clone());
        sym
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_global_then_local() {
        let mut global = SymbolTable::new();
        let a = global.define("a");
        assert_eq!(a.scope, SymbolScope::Global);
        assert_eq!(a.index, 0);

        let mut local = SymbolTable::enclosed(global);
        let b = local.define("b");
        assert_eq!(b.scope, SymbolScope::Local);
        assert_eq!(b.index, 0);
    }

    #[test]
    fn free_symbols_recorded_in_first_resolution_order() {
        let mut global = SymbolTable::new();
        global.define("g");

        let mut outer = SymbolTable::enclosed(global);
        outer.define("a");
        outer.define("b");

        let mut inner = SymbolTable::enclosed(outer);
        // Resolve b before a; free order must follow resolution order.
        let b = inner.resolve("b").unwrap();
        let a = inner.resolve("a").unwrap();
        let g = inner.resolve("g").unwrap();
        assert_eq!(b.scope, SymbolScope::Free);
        assert_eq!(b.index, 0);
        assert_eq!(a.scope, SymbolScope::Free);
        assert_eq!(a.index, 1);
        assert_eq!(g.scope, SymbolScope::Global);

        // A second resolution reuses the recorded entry.
        let b2 = inner.resolve("b").unwrap();
        assert_eq!(b2.index, 0);
        assert_eq!(inner.free_symbols.len(), 2);
    }

    #[test]
    fn capture_through_two_levels_records_one_entry_per_scope() {
        let global = SymbolTable::new();
        let mut defining = SymbolTable::enclosed(global);
        defining.define("x");
        let intermediate = SymbolTable::enclosed(defining);
        let mut innermost = SymbolTable::enclosed(intermediate);

        let x = innermost.resolve("x").unwrap();
        assert_eq!(x.scope, SymbolScope::Free);
        assert_eq!(x.index, 0);

        // The intermediate scope recorded exactly one free entry, and its
        // view of the symbol is itself Free (captured from the definer).
        let intermediate = innermost.into_outer();
        assert_eq!(intermediate.free_symbols.len(), 1);
        assert_eq!(intermediate.resolve_here("x").unwrap().scope, SymbolScope::Free);
    }

    #[test]
    fn builtins_resolve_from_any_scope() {
        let global = SymbolTable::new();
        let mut inner = SymbolTable::enclosed(global);
        let len = inner.resolve("len").unwrap();
        assert_eq!(len.scope, SymbolScope::Builtin);
        let append = inner.resolve("append").unwrap();
        let push = inner.resolve("push").unwrap();
        assert_eq!(append.index, push.index);
    }

    #[test]
    fn temps_are_invisible_to_source_names() {
        let mut global = SymbolTable::new();
        let t0 = global.define_temp("iter");
        let t1 = global.define_temp("iter");
        assert_ne!(t0.name, t1.name);
        assert!(global.resolve("iter").is_none());
    }
}
