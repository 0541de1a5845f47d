//! The stack-based virtual machine.
//!
//! The VM executes one bytecode unit at a time over a value stack, a
//! call-frame stack, and a globals vector. Structured exceptions run through
//! two first-class runtime stacks (traps for `try`/`catch`, entries for
//! `finally`) plus a pending-error slot for rethrow-across-finally; see the
//! `exceptions` module. Deferred calls queue per frame and run in LIFO order
//! on every frame exit.
//!
//! Execution is single-threaded and cooperative: the dispatch loop is the
//! only mutator of VM state, and imports and higher-order builtins run to
//! completion through synchronous sub-execution (`apply_function`).

mod binary;
mod call;
mod collections;
mod exceptions;
mod methods;

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::builtins::BuiltinFn;
use crate::bytecode::code::{Closure, Unit};
use crate::bytecode::compiler::Compiler;
use crate::bytecode::op::Opcode;
use crate::error::{ErrorValue, RunError, RunResult};
use crate::io::PrintWriter;
use crate::modules::{ModuleLoader, ModuleRegistry};
use crate::resource::{ResourceLimits, ResourceTracker};
use crate::types::{Dict, DictKey};
use crate::value::Value;

/// Operand stack capacity.
pub const STACK_SIZE: usize = 2048;
/// Globals vector capacity.
pub const GLOBALS_SIZE: usize = 65536;
/// Call-frame stack capacity.
pub const MAX_FRAMES: usize = 1024;

/// A registered deferred call, run when its frame exits.
#[derive(Debug)]
pub(crate) struct DeferredCall {
    pub(crate) callee: Value,
    pub(crate) args: Vec<Value>,
}

/// A single function activation.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) closure: Rc<Closure>,
    /// Offset of the next byte to fetch.
    pub(crate) ip: usize,
    /// Offset of the opcode currently executing, for stack traces.
    pub(crate) op_offset: usize,
    /// Index into the value stack where this frame's locals begin; the
    /// callee reference sits at `base - 1`.
    pub(crate) base: usize,
    /// LIFO queue of deferred calls.
    pub(crate) defers: Vec<DeferredCall>,
}

/// A saved `try` context: where to jump when a raised error reaches it.
///
/// `catch_ip == NO_TARGET` marks a finally-only try.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TrapEntry {
    pub(crate) catch_ip: u16,
    pub(crate) sp: usize,
    pub(crate) frame_index: usize,
}

/// An error awaiting rethrow at the end of a finally block.
///
/// The recorded frame index and trap depth tie the slot to the finally that
/// set it: a `return` at or below the frame cancels the rethrow, and a new
/// error escaping to a handler older than the slot discards it.
#[derive(Debug)]
pub(crate) struct PendingError {
    pub(crate) error: Box<ErrorValue>,
    pub(crate) frame_index: usize,
    pub(crate) trap_depth: usize,
}

/// A saved `finally` context.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FinallyEntry {
    pub(crate) finally_ip: u16,
    /// Where execution resumes after the finally block; recorded for
    /// completeness, normal flow falls through to it.
    #[allow(dead_code)]
    pub(crate) after_ip: u16,
    pub(crate) sp: usize,
    pub(crate) frame_index: usize,
}

/// The Welle virtual machine.
pub struct Vm<'a, W: PrintWriter> {
    pub(crate) stack: Vec<Value>,
    pub(crate) last_popped: Value,
    pub(crate) globals: Vec<Option<Value>>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) traps: Vec<TrapEntry>,
    pub(crate) finallies: Vec<FinallyEntry>,
    /// Error awaiting rethrow at the end of a finally block.
    pub(crate) pending_error: Option<PendingError>,
    pub(crate) tracker: ResourceTracker,
    pub(crate) writer: &'a mut W,
    loader: Option<&'a mut dyn ModuleLoader>,
    modules: ModuleRegistry,
    /// Exports of the module currently executing.
    pub(crate) exports: Rc<RefCell<Dict>>,
}

impl<'a, W: PrintWriter> Vm<'a, W> {
    /// Creates a VM with the given budgets and print writer.
    pub fn new(limits: ResourceLimits, writer: &'a mut W) -> Self {
        Self {
            stack: Vec::with_capacity(256),
            last_popped: Value::Nil,
            globals: vec![None; GLOBALS_SIZE],
            frames: Vec::new(),
            traps: Vec::new(),
            finallies: Vec::new(),
            pending_error: None,
            tracker: ResourceTracker::new(limits),
            writer,
            loader: None,
            modules: ModuleRegistry::new(),
            exports: Rc::new(RefCell::new(Dict::new())),
        }
    }

    /// Creates a VM that can resolve `import` statements through `loader`.
    pub fn with_loader(
        limits: ResourceLimits,
        writer: &'a mut W,
        loader: &'a mut dyn ModuleLoader,
    ) -> Self {
        let mut vm = Self::new(limits, writer);
        vm.loader = Some(loader);
        vm
    }

    /// Runs a compiled unit to completion.
    ///
    /// Returns the most recently popped value (the REPL result) on success,
    /// or the uncaught error with its formatted stack trace.
    pub fn run(&mut self, unit: &Unit) -> Result<Value, Box<ErrorValue>> {
        let closure = Rc::new(Closure {
            function: unit.main.clone(),
            free: SmallVec::new(),
            constants: unit.constants.clone(),
        });
        self.stack.push(Value::Closure(closure.clone()));
        let base = self.stack.len();
        self.frames.push(Frame {
            closure,
            ip: 0,
            op_offset: 0,
            base,
            defers: Vec::new(),
        });

        match self.run_until(0) {
            Ok(()) => {
                // The entry frame's return value is not a program result.
                self.stack.pop();
                Ok(self.last_popped.clone())
            }
            Err(RunError::Raised(err)) => Err(err),
            Err(RunError::Fatal(msg)) => {
                Err(Box::new(ErrorValue::raised(format!("internal error: {msg}"))))
            }
        }
    }

    /// The exports dictionary of the executed program.
    #[must_use]
    pub fn exports(&self) -> Rc<RefCell<Dict>> {
        self.exports.clone()
    }

    /// Returns the resource tracker for inspection.
    #[must_use]
    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    // ========================================================================
    // Dispatch loop
    // ========================================================================

    /// Runs until the frame stack drops back to `floor` frames.
    ///
    /// Synchronous sub-execution (defers, `map`, imports) re-enters this
    /// loop with a higher floor; an error not caught by any handler in
    /// frames at or above the floor is returned to the Rust caller.
    pub(crate) fn run_until(&mut self, floor: usize) -> RunResult<()> {
        while self.frames.len() > floor {
            if let Err(err) = self.tracker.on_step() {
                self.handle_error(err, floor)?;
                continue;
            }

            let func = self.current_frame().closure.function.clone();
            let code = func.instructions();
            let ip = self.current_frame().ip;
            if ip >= code.len() {
                // Safety net; the compiler always terminates with Return.
                if let Err(err) = self.execute_return(Value::Nil, floor) {
                    self.handle_error(err, floor)?;
                }
                continue;
            }

            let op = Opcode::from_repr(code[ip])
                .ok_or_else(|| RunError::fatal(format!("invalid opcode byte {:#x}", code[ip])))?;
            let mut operands = [0u16; 2];
            let mut cursor = ip + 1;
            for (slot, &width) in operands.iter_mut().zip(op.operand_widths()) {
                *slot = match width {
                    1 => u16::from(code[cursor]),
                    2 => u16::from_be_bytes([code[cursor], code[cursor + 1]]),
                    _ => unreachable!("operand widths are 1 or 2"),
                };
                cursor += width;
            }
            {
                let frame = self.current_frame_mut();
                frame.op_offset = ip;
                frame.ip = cursor;
            }

            if let Err(err) = self.execute_op(op, operands, floor) {
                self.handle_error(err, floor)?;
            }
        }
        Ok(())
    }

    fn execute_op(&mut self, op: Opcode, operands: [u16; 2], floor: usize) -> RunResult<()> {
        match op {
            // --- constants and literals ---
            Opcode::Constant => {
                let value = self.current_constants().get(operands[0]).clone();
                // Literal emission is a construction site for strings.
                if let Value::Str(s) = &value {
                    self.tracker.charge_string(s.len())?;
                }
                self.push(value)
            }
            Opcode::True => self.push(Value::Bool(true)),
            Opcode::False => self.push(Value::Bool(false)),
            Opcode::Nil => self.push(Value::Nil),

            // --- arithmetic / bitwise / comparison ---
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::BitOr
            | Opcode::BitAnd
            | Opcode::BitXor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Eq
            | Opcode::NotEq
            | Opcode::Is
            | Opcode::Gt
            | Opcode::Lt
            | Opcode::Ge
            | Opcode::Le
            | Opcode::In => {
                let right = self.pop()?;
                let left = self.pop()?;
                let result = binary::evaluate(op, left, right, &mut self.tracker)?;
                self.push(result)
            }
            Opcode::Neg | Opcode::Not | Opcode::BitNot => {
                let operand = self.pop()?;
                let result = binary::evaluate_unary(op, operand)?;
                self.push(result)
            }

            Opcode::Pop => {
                self.last_popped = self.pop()?;
                Ok(())
            }

            // --- globals ---
            Opcode::SetGlobal => {
                let value = self.pop()?;
                self.globals[usize::from(operands[0])] = Some(value);
                Ok(())
            }
            Opcode::DefineGlobal => {
                let slot = usize::from(operands[0]);
                if self.globals[slot].is_some() {
                    let name = self.constant_name(operands[1]);
                    return Err(RunError::raised(format!(
                        "cannot redeclare \"{name}\" in this scope"
                    )));
                }
                let value = self.pop()?;
                self.globals[slot] = Some(value);
                Ok(())
            }
            Opcode::GetGlobal => {
                let value = self.globals[usize::from(operands[0])]
                    .clone()
                    .ok_or_else(|| RunError::raised("undefined variable"))?;
                self.push(value)
            }

            // --- locals ---
            Opcode::SetLocal => {
                let value = self.pop()?;
                let idx = self.current_frame().base + usize::from(operands[0]);
                self.store_local(idx, value);
                Ok(())
            }
            Opcode::DefineLocal => {
                // A define is a fresh binding: it never routes through a
                // cell left over from an earlier capture of the slot.
                let value = self.pop()?;
                let idx = self.current_frame().base + usize::from(operands[0]);
                self.stack[idx] = value;
                Ok(())
            }
            Opcode::GetLocal => {
                let idx = self.current_frame().base + usize::from(operands[0]);
                let value = match &self.stack[idx] {
                    Value::CellRef(cell) => cell.borrow().clone(),
                    other => other.clone(),
                };
                self.push(value)
            }
            Opcode::GetLocalCell => {
                let idx = self.current_frame().base + usize::from(operands[0]);
                let cell = match &self.stack[idx] {
                    Value::CellRef(cell) => cell.clone(),
                    _ => {
                        // First capture: promote the slot to a shared cell.
                        self.tracker.charge_cell()?;
                        let current = mem::replace(&mut self.stack[idx], Value::Nil);
                        let cell = Rc::new(RefCell::new(current));
                        self.stack[idx] = Value::CellRef(cell.clone());
                        cell
                    }
                };
                self.push(Value::CellRef(cell))
            }

            // --- free variables ---
            Opcode::SetFree => {
                let value = self.pop()?;
                let cell = self.current_frame().closure.free[usize::from(operands[0])].clone();
                *cell.borrow_mut() = value;
                Ok(())
            }
            Opcode::GetFree => {
                let cell = self.current_frame().closure.free[usize::from(operands[0])].clone();
                let value = cell.borrow().clone();
                self.push(value)
            }
            Opcode::GetFreeCell => {
                let cell = self.current_frame().closure.free[usize::from(operands[0])].clone();
                self.push(Value::CellRef(cell))
            }

            Opcode::Closure => self.execute_make_closure(operands[0], operands[1] as u8),

            // --- calls and returns ---
            Opcode::Call => self.execute_call(operands[0] as u8, false),
            Opcode::CallSpread => self.execute_call(operands[0] as u8, true),
            Opcode::CallMethod => self.execute_call_method(operands[0], operands[1] as u8, false),
            Opcode::CallMethodSpread => {
                self.execute_call_method(operands[0], operands[1] as u8, true)
            }
            Opcode::ReturnValue => {
                let value = self.pop()?;
                self.execute_return(value, floor)
            }
            Opcode::Return => self.execute_return(Value::Nil, floor),

            Opcode::Defer => self.execute_defer(operands[0] as u8, false),
            Opcode::DeferSpread => self.execute_defer(operands[0] as u8, true),

            // --- jumps ---
            Opcode::Jump => {
                self.current_frame_mut().ip = usize::from(operands[0]);
                Ok(())
            }
            Opcode::JumpNotTruthy => {
                let cond = self.pop()?;
                if !cond.is_truthy() {
                    self.current_frame_mut().ip = usize::from(operands[0]);
                }
                Ok(())
            }
            Opcode::JumpIfNil => {
                // Peeks without popping; the null-coalescing operator keeps
                // the non-nil value on the stack.
                if matches!(self.peek()?, Value::Nil) {
                    self.current_frame_mut().ip = usize::from(operands[0]);
                }
                Ok(())
            }

            // --- exceptions ---
            Opcode::Try => {
                self.traps.push(TrapEntry {
                    catch_ip: operands[0],
                    sp: self.stack.len(),
                    frame_index: self.frames.len() - 1,
                });
                Ok(())
            }
            Opcode::TryFinally => {
                self.finallies.push(FinallyEntry {
                    finally_ip: operands[0],
                    after_ip: operands[1],
                    sp: self.stack.len(),
                    frame_index: self.frames.len() - 1,
                });
                Ok(())
            }
            Opcode::EndTry => {
                self.traps
                    .pop()
                    .map(|_| ())
                    .ok_or_else(|| RunError::fatal("EndTry with empty trap stack"))
            }
            Opcode::EndFinally => {
                self.finallies
                    .pop()
                    .map(|_| ())
                    .ok_or_else(|| RunError::fatal("EndFinally with empty finally stack"))
            }
            Opcode::RethrowPending => match self.pending_error.take() {
                Some(pending) => Err(RunError::Raised(pending.error)),
                None => Ok(()),
            },
            Opcode::Throw => {
                let value = self.pop()?;
                Err(self.raise_thrown(value))
            }

            // --- containers ---
            Opcode::Array => self.execute_build_array(operands[0]),
            Opcode::ArrayAppend => {
                let value = self.pop()?;
                let array = self.pop()?;
                let Value::Array(items) = &array else {
                    return Err(RunError::fatal("ArrayAppend on non-array"));
                };
                self.tracker.charge_array_growth(1)?;
                items.borrow_mut().push(value);
                self.push(array)
            }
            Opcode::Tuple => self.execute_build_tuple(operands[0]),
            Opcode::Dict => self.execute_build_dict(operands[0]),
            Opcode::Index => {
                let index = self.pop()?;
                let object = self.pop()?;
                let result = collections::index_get(&object, &index)?;
                self.push(result)
            }
            Opcode::SetIndex => {
                let index = self.pop()?;
                let object = self.pop()?;
                let value = self.pop()?;
                collections::index_set(&object, &index, value.clone(), &mut self.tracker)?;
                self.push(value)
            }
            Opcode::Slice => {
                let step = self.pop()?;
                let high = self.pop()?;
                let low = self.pop()?;
                let object = self.pop()?;
                let result =
                    collections::slice(&object, &low, &high, &step, &mut self.tracker)?;
                self.push(result)
            }
            Opcode::GetMember => {
                let name = self.constant_name(operands[0]);
                let object = self.pop()?;
                let result = collections::member_get(&object, &name)?;
                self.push(result)
            }
            Opcode::SetMember => {
                let name = self.constant_name(operands[0]);
                let object = self.pop()?;
                let value = self.pop()?;
                collections::member_set(&object, &name, value.clone(), &mut self.tracker)?;
                self.push(value)
            }
            Opcode::UnpackTuple => self.execute_unpack(operands[0] as u8, None),
            Opcode::UnpackStar => {
                self.execute_unpack(operands[0] as u8, Some(operands[1] as u8))
            }
            Opcode::Spread => {
                let value = self.pop()?;
                self.push(Value::Spread(Box::new(value)))
            }
            Opcode::DictUpdate => {
                let right = self.pop()?;
                let left = self.pop()?;
                let result = collections::dict_update(left, right, &mut self.tracker)?;
                self.push(result)
            }

            // --- iteration ---
            Opcode::IterInit | Opcode::IterInitComp => {
                let source = self.pop()?;
                let iter = collections::iter_init(&source, &mut self.tracker)?;
                self.push(iter)
            }
            Opcode::IterInitDict => {
                let source = self.pop()?;
                let Value::Dict(_) = &source else {
                    return Err(RunError::raised(format!(
                        "key/value iteration requires a dict, got {}",
                        source.type_name()
                    )));
                };
                let iter = collections::iter_init(&source, &mut self.tracker)?;
                self.push(iter)
            }
            Opcode::IterNext => {
                let iter = self.pop()?;
                let Value::Iterator(iter) = iter else {
                    return Err(RunError::fatal("IterNext on non-iterator"));
                };
                let next = iter.borrow_mut().next();
                match next {
                    Some(value) => {
                        self.push(value)?;
                        self.push(Value::Bool(true))
                    }
                    None => {
                        self.push(Value::Nil)?;
                        self.push(Value::Bool(false))
                    }
                }
            }

            Opcode::GetBuiltin => {
                let builtin = BuiltinFn::from_repr(operands[0] as u8)
                    .ok_or_else(|| RunError::fatal("unknown builtin index"))?;
                self.push(Value::Builtin(builtin))
            }

            // --- imports / exports ---
            Opcode::ImportModule => {
                let path = self.constant_name(operands[0]);
                let exports = self.import_module(&path)?;
                self.push(exports)
            }
            Opcode::ImportFrom => {
                let path = self.constant_name(operands[0]);
                let name = self.constant_name(operands[1]);
                let exports = self.import_module(&path)?;
                let Value::Dict(dict) = &exports else {
                    return Err(RunError::fatal("module exports must be a dict"));
                };
                let key = DictKey::Str(name.as_str().into());
                let value = dict.borrow().get(&key).cloned().ok_or_else(|| {
                    RunError::raised(format!("module \"{path}\" has no export \"{name}\""))
                })?;
                self.push(value)
            }
            Opcode::Export => {
                let name = self.constant_name(operands[0]);
                let value = self.pop()?;
                self.tracker.charge_dict_entry()?;
                self.exports
                    .borrow_mut()
                    .insert(DictKey::Str(name.as_str().into()), value);
                Ok(())
            }

            Opcode::CurrentClosure => {
                let closure = self.current_frame().closure.clone();
                self.push(Value::Closure(closure))
            }
        }
    }

    // ========================================================================
    // Stack and frame helpers
    // ========================================================================

    pub(crate) fn push(&mut self, value: Value) -> RunResult<()> {
        if self.stack.len() >= STACK_SIZE {
            return Err(RunError::raised("stack overflow"));
        }
        self.stack.push(value);
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> RunResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| RunError::fatal("stack underflow"))
    }

    pub(crate) fn peek(&self) -> RunResult<&Value> {
        self.stack
            .last()
            .ok_or_else(|| RunError::fatal("peek on empty stack"))
    }

    pub(crate) fn current_frame(&self) -> &Frame {
        self.frames.last().expect("at least one frame")
    }

    pub(crate) fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("at least one frame")
    }

    pub(crate) fn current_constants(&self) -> Rc<crate::bytecode::code::ConstPool> {
        self.current_frame().closure.constants.clone()
    }

    /// Reads a string constant (a name or module path).
    pub(crate) fn constant_name(&self, index: u16) -> String {
        match self.current_constants().get(index) {
            Value::Str(s) => s.to_string(),
            other => other.repr_string(),
        }
    }

    /// Stores into a local slot, routing through its cell when promoted.
    fn store_local(&mut self, idx: usize, value: Value) {
        if let Value::CellRef(cell) = &self.stack[idx] {
            *cell.borrow_mut() = value;
        } else {
            self.stack[idx] = value;
        }
    }

    fn execute_make_closure(&mut self, func_const: u16, free_count: u8) -> RunResult<()> {
        let free_count = usize::from(free_count);
        self.tracker.charge_closure(free_count)?;
        let mut free = SmallVec::with_capacity(free_count);
        let split_at = self.stack.len() - free_count;
        for value in self.stack.split_off(split_at) {
            match value {
                Value::CellRef(cell) => free.push(cell),
                other => {
                    // Globals and self-references arrive as plain values and
                    // are promoted into fresh cells.
                    self.tracker.charge_cell()?;
                    free.push(Rc::new(RefCell::new(other)));
                }
            }
        }
        let Value::Function(function) = self.current_constants().get(func_const).clone() else {
            return Err(RunError::fatal("Closure operand is not a function constant"));
        };
        let closure = Closure {
            function,
            free,
            constants: self.current_constants(),
        };
        self.push(Value::Closure(Rc::new(closure)))
    }

    fn execute_build_array(&mut self, count: u16) -> RunResult<()> {
        let count = usize::from(count);
        self.tracker.charge_array(count)?;
        let split_at = self.stack.len() - count;
        let items = self.stack.split_off(split_at);
        self.push(Value::array(items))
    }

    fn execute_build_tuple(&mut self, count: u16) -> RunResult<()> {
        let count = usize::from(count);
        self.tracker.charge_array(count)?;
        let split_at = self.stack.len() - count;
        let items = self.stack.split_off(split_at);
        self.push(Value::Tuple(items.into()))
    }

    fn execute_build_dict(&mut self, pair_count: u16) -> RunResult<()> {
        let pair_count = usize::from(pair_count);
        self.tracker.charge_dict(pair_count)?;
        let split_at = self.stack.len() - pair_count * 2;
        let flat = self.stack.split_off(split_at);
        let mut dict = Dict::new();
        let mut iter = flat.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            let key = DictKey::from_value(&key).ok_or_else(|| {
                RunError::raised(format!("unhashable key: {}", key.type_name()))
            })?;
            // Last entry wins for duplicate keys.
            dict.insert(key, value);
        }
        self.push(Value::dict(dict))
    }

    fn execute_unpack(&mut self, count: u8, star_idx: Option<u8>) -> RunResult<()> {
        let count = usize::from(count);
        let value = self.pop()?;
        let items: Vec<Value> = match &value {
            Value::Tuple(items) => items.to_vec(),
            Value::Array(items) => items.borrow().clone(),
            other => {
                return Err(RunError::raised(format!(
                    "cannot destructure {}",
                    other.type_name()
                )));
            }
        };

        // The original value goes back first so the assignment has a result
        // once every bound position has been drained.
        self.push(value)?;
        match star_idx {
            None => {
                if items.len() != count {
                    return Err(RunError::raised(format!(
                        "tuple arity mismatch: expected {count}, got {}",
                        items.len()
                    )));
                }
                for item in items {
                    self.push(item)?;
                }
            }
            Some(star_idx) => {
                let star_idx = usize::from(star_idx);
                let fixed = count - 1;
                if items.len() < fixed {
                    return Err(RunError::raised(format!(
                        "tuple arity mismatch: expected at least {fixed}, got {}",
                        items.len()
                    )));
                }
                let after = fixed - star_idx;
                let middle_len = items.len() - fixed;
                self.tracker.charge_array(middle_len)?;
                let mut iter = items.into_iter();
                for _ in 0..star_idx {
                    let item = iter.next().expect("length checked");
                    self.push(item)?;
                }
                let middle: Vec<Value> = iter.by_ref().take(middle_len).collect();
                self.push(Value::array(middle))?;
                for _ in 0..after {
                    let item = iter.next().expect("length checked");
                    self.push(item)?;
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Imports
    // ========================================================================

    fn import_module(&mut self, path: &str) -> RunResult<Value> {
        if let Some(cached) = self.modules.cached(path) {
            return Ok(cached);
        }
        self.modules.begin(path)?;

        let result = self.execute_module(path);
        self.modules.end(path);
        let exports = result?;
        self.modules.cache(path, exports.clone());
        Ok(exports)
    }

    fn execute_module(&mut self, path: &str) -> RunResult<Value> {
        let program = match self.loader.as_mut() {
            Some(loader) => loader.load(path).map_err(|msg| {
                RunError::raised(format!("cannot import \"{path}\": {msg}"))
            })?,
            None => {
                return Err(RunError::raised(format!(
                    "cannot import \"{path}\": no module loader configured"
                )));
            }
        };
        let unit = Compiler::new(path)
            .compile(&program)
            .map_err(|err| RunError::raised(format!("cannot import \"{path}\": {err}")))?;

        // The submodule runs on the same stacks but with its own globals
        // and exports; the cache, budgets, and import tracker are shared.
        let saved_globals = mem::replace(&mut self.globals, vec![None; GLOBALS_SIZE]);
        let saved_exports = mem::replace(&mut self.exports, Rc::new(RefCell::new(Dict::new())));

        let closure = Rc::new(Closure {
            function: unit.main.clone(),
            free: SmallVec::new(),
            constants: unit.constants.clone(),
        });
        let result = self.apply_function(Value::Closure(closure), Vec::new());

        let module_exports = mem::replace(&mut self.exports, saved_exports);
        self.globals = saved_globals;
        result?;
        Ok(Value::Dict(module_exports))
    }
}
