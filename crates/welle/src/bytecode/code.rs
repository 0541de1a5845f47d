//! Compiled code objects: functions, constant pools, and position tables.
//!
//! A [`CompiledFunction`] is the output of the compiler for one function (or
//! the module top level) and the input to the VM. The constant pool belongs
//! to the whole compilation unit: nested functions share their unit's pool,
//! and closures carry an `Rc` of it so functions exported across module
//! boundaries stay callable.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::ast::Position;
use crate::value::{Cell, Value};

/// Compiled bytecode for a function or the module top level.
#[derive(Debug)]
pub struct CompiledFunction {
    /// Raw bytecode. Opcodes are 1 byte, followed by 0-2 operands of 1 or 2
    /// bytes each (big-endian for 2-byte operands).
    instructions: Vec<u8>,
    /// Number of parameters; arguments occupy the first local slots.
    num_params: usize,
    /// Total local slots, parameters included.
    num_locals: usize,
    /// Function name; `<anon@L:C>` for anonymous literals, `<main>` for the
    /// module top level.
    name: Rc<str>,
    /// Source file, for stack traces.
    file: Rc<str>,
    /// Source positions by instruction offset, sorted ascending.
    positions: Vec<PositionEntry>,
}

impl CompiledFunction {
    /// Creates a compiled function.
    #[must_use]
    pub fn new(
        instructions: Vec<u8>,
        num_params: usize,
        num_locals: usize,
        name: Rc<str>,
        file: Rc<str>,
        positions: Vec<PositionEntry>,
    ) -> Self {
        Self {
            instructions,
            num_params,
            num_locals,
            name,
            file,
            positions,
        }
    }

    /// The raw bytecode bytes.
    #[must_use]
    pub fn instructions(&self) -> &[u8] {
        &self.instructions
    }

    /// Parameter count.
    #[must_use]
    pub fn num_params(&self) -> usize {
        self.num_params
    }

    /// Local slot count, parameters included.
    #[must_use]
    pub fn num_locals(&self) -> usize {
        self.num_locals
    }

    /// Function name as shown in stack traces.
    #[must_use]
    pub fn name(&self) -> &Rc<str> {
        &self.name
    }

    /// Source file.
    #[must_use]
    pub fn file(&self) -> &Rc<str> {
        &self.file
    }

    /// The position table.
    #[must_use]
    pub fn positions(&self) -> &[PositionEntry] {
        &self.positions
    }

    /// Finds the source position for a bytecode offset.
    ///
    /// Entries are recorded at instruction boundaries; this returns the most
    /// recent entry at or before `offset`.
    #[must_use]
    pub fn position_for_offset(&self, offset: usize) -> Option<Position> {
        let offset = u32::try_from(offset).ok()?;
        self.positions
            .iter()
            .rev()
            .find(|entry| entry.offset <= offset)
            .map(|entry| entry.position)
    }
}

/// One entry of the position table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionEntry {
    /// Bytecode offset this entry applies to.
    pub offset: u32,
    /// Source position of the originating token.
    pub position: Position,
}

/// Constant pool for a compilation unit.
///
/// Constants are appended during compilation and never deduplicated; the
/// index is the operand of `Constant` (and of the name-carrying opcodes).
#[derive(Debug, Default)]
pub struct ConstPool {
    values: Vec<Value>,
}

impl ConstPool {
    /// Creates a pool from collected constants.
    #[must_use]
    pub fn from_vec(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Returns the constant at `index`.
    ///
    /// # Panics
    /// Panics on out-of-range indices; indices come from the compiler, so
    /// this only fires on malformed bytecode.
    #[must_use]
    pub fn get(&self, index: u16) -> &Value {
        &self.values[index as usize]
    }

    /// Number of constants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A compiled program: the top-level function plus the unit's constants.
#[derive(Debug)]
pub struct Unit {
    pub main: Rc<CompiledFunction>,
    pub constants: Rc<ConstPool>,
}

/// A function paired with its captured cells and its unit's constant pool.
#[derive(Debug)]
pub struct Closure {
    pub function: Rc<CompiledFunction>,
    pub free: SmallVec<[Cell; 4]>,
    pub constants: Rc<ConstPool>,
}
