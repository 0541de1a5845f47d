//! Call sequencing: closures, builtins, methods, spreads, and defers.

use crate::builtins::BuiltinFn;
use crate::bytecode::vm::{methods, DeferredCall, Frame, Vm, MAX_FRAMES, STACK_SIZE};
use crate::error::{RunError, RunResult};
use crate::io::PrintWriter;
use crate::types::DictKey;
use crate::value::Value;

impl<W: PrintWriter> Vm<'_, W> {
    /// Executes `Call`/`CallSpread`: `[callee, arg0..argN]` are on the stack.
    pub(super) fn execute_call(&mut self, argc: u8, spread: bool) -> RunResult<()> {
        let mut args = self.pop_args(argc)?;
        if spread {
            args = expand_spreads(args)?;
        }
        let callee = self.pop()?;
        self.call_value(callee, args)
    }

    /// Executes `CallMethod`/`CallMethodSpread`.
    ///
    /// A Dict receiver whose entries contain the method name calls that
    /// value as a plain function (no implicit self); everything else goes
    /// through the intrinsic method table for the receiver's type.
    pub(super) fn execute_call_method(
        &mut self,
        name_const: u16,
        argc: u8,
        spread: bool,
    ) -> RunResult<()> {
        let name = self.constant_name(name_const);
        let mut args = self.pop_args(argc)?;
        if spread {
            args = expand_spreads(args)?;
        }
        let receiver = self.pop()?;

        if let Value::Dict(dict) = &receiver {
            let key = DictKey::Str(name.as_str().into());
            let entry = dict.borrow().get(&key).cloned();
            if let Some(callee) = entry {
                return self.call_value(callee, args);
            }
        }

        match methods::intrinsic(&receiver, &name) {
            Some(BuiltinFn::Map) => {
                // arr.map(f) delegates to map(f, arr).
                let callee = args.into_iter().next().ok_or_else(|| {
                    RunError::raised("wrong number of arguments to map: expected 1, got 0")
                })?;
                let result = self.execute_map(callee, receiver)?;
                self.push(result)
            }
            Some(builtin) => {
                let mut full_args = Vec::with_capacity(args.len() + 1);
                full_args.push(receiver);
                full_args.extend(args);
                let result = builtin.call(full_args, &mut self.tracker, &mut *self.writer)?;
                self.push(result)
            }
            None => Err(RunError::raised(format!(
                "unknown method \"{name}\" on {}",
                receiver.type_name()
            ))),
        }
    }

    /// Dispatches a call on an arbitrary callee with materialized arguments.
    fn call_value(&mut self, callee: Value, args: Vec<Value>) -> RunResult<()> {
        match callee {
            Value::Closure(_) => {
                self.push(callee)?;
                let argc = args.len();
                for arg in args {
                    self.push(arg)?;
                }
                self.push_closure_frame(argc)
            }
            Value::Builtin(BuiltinFn::Map) => {
                // The registry entry is a stub; the VM dispatches map itself
                // so user callables run per element.
                let mut iter = args.into_iter();
                let (Some(func), Some(seq), None) = (iter.next(), iter.next(), iter.next()) else {
                    return Err(RunError::raised(
                        "wrong number of arguments to map: expected 2",
                    ));
                };
                let result = self.execute_map(func, seq)?;
                self.push(result)
            }
            Value::Builtin(builtin) => {
                let result = builtin.call(args, &mut self.tracker, &mut *self.writer)?;
                self.push(result)
            }
            other => Err(RunError::raised(format!(
                "calling non-function: {}",
                other.type_name()
            ))),
        }
    }

    /// Pushes a frame for the closure sitting below `argc` arguments.
    ///
    /// The callee stays on the stack at `base - 1` for the lifetime of the
    /// frame; locals beyond the parameters are reserved as nil.
    fn push_closure_frame(&mut self, argc: usize) -> RunResult<()> {
        let callee_idx = self.stack.len() - argc - 1;
        let Value::Closure(closure) = self.stack[callee_idx].clone() else {
            return Err(RunError::fatal("push_closure_frame on non-closure"));
        };
        let num_params = closure.function.num_params();
        if argc != num_params {
            return Err(RunError::raised(format!(
                "wrong number of arguments: expected {num_params}, got {argc}"
            )));
        }
        self.tracker.check_recursion(self.frames.len())?;
        if self.frames.len() >= MAX_FRAMES {
            return Err(RunError::raised("frame stack overflow"));
        }

        let base = self.stack.len() - argc;
        let num_locals = closure.function.num_locals();
        if base + num_locals > STACK_SIZE {
            return Err(RunError::raised("stack overflow"));
        }
        for _ in argc..num_locals {
            self.stack.push(Value::Nil);
        }
        self.frames.push(Frame {
            closure,
            ip: 0,
            op_offset: 0,
            base,
            defers: Vec::new(),
        });
        Ok(())
    }

    /// Return sequencing: run the frame's defers in LIFO order, then pop
    /// the frame, restore the stack to just below the callee reference, and
    /// push the return value.
    ///
    /// A throwing defer supersedes the return: remaining defers still run,
    /// the frame stays in place, and the error propagates from here.
    pub(super) fn execute_return(&mut self, value: Value, _floor: usize) -> RunResult<()> {
        // A return executed inside a finally cancels the pending rethrow;
        // returns of functions merely *called* from the finally do not.
        let returning = self.frames.len() - 1;
        if self
            .pending_error
            .as_ref()
            .is_some_and(|p| returning <= p.frame_index)
        {
            self.pending_error = None;
        }

        if let Some(err) = self.run_frame_defers()? {
            return Err(RunError::Raised(err));
        }

        let frame = self.frames.pop().expect("returning frame");
        self.prune_handlers();
        self.stack.truncate(frame.base.saturating_sub(1));
        self.push(value)
    }

    /// Runs the current frame's deferred calls in LIFO order.
    ///
    /// Returns the last raised error, if any; fatal errors abort directly.
    pub(super) fn run_frame_defers(&mut self) -> Result<Option<Box<crate::error::ErrorValue>>, RunError> {
        let mut defers = std::mem::take(&mut self.current_frame_mut().defers);
        let mut last_error = None;
        while let Some(deferred) = defers.pop() {
            match self.apply_function(deferred.callee, deferred.args) {
                Ok(_) => {}
                Err(RunError::Raised(mut err)) => {
                    if err.stack.is_empty() {
                        err.stack = self.capture_stack_trace();
                    }
                    last_error = Some(err);
                }
                Err(fatal @ RunError::Fatal(_)) => return Err(fatal),
            }
        }
        Ok(last_error)
    }

    /// Registers a deferred call in the current frame.
    ///
    /// Arguments (and spreads) are evaluated and expanded now; the call
    /// itself runs when the frame exits.
    pub(super) fn execute_defer(&mut self, argc: u8, spread: bool) -> RunResult<()> {
        let mut args = self.pop_args(argc)?;
        if spread {
            args = expand_spreads(args)?;
        }
        let callee = self.pop()?;
        if !matches!(callee, Value::Closure(_) | Value::Builtin(_)) {
            return Err(RunError::raised(format!(
                "defer requires a function, got {}",
                callee.type_name()
            )));
        }
        self.current_frame_mut()
            .defers
            .push(DeferredCall { callee, args });
        Ok(())
    }

    /// Synchronous sub-execution: calls `callee` with `args` and runs the
    /// dispatch loop until the pushed frame completes.
    ///
    /// Used by defers, imports, and higher-order builtins like `map`. An
    /// error not handled within the sub-execution is returned to the Rust
    /// caller, which resumes propagation at its own level.
    pub(crate) fn apply_function(&mut self, callee: Value, args: Vec<Value>) -> RunResult<Value> {
        match callee {
            Value::Closure(_) => {
                let floor = self.frames.len();
                self.push(callee)?;
                let argc = args.len();
                for arg in args {
                    self.push(arg)?;
                }
                self.push_closure_frame(argc)?;
                self.run_until(floor)?;
                self.pop()
            }
            Value::Builtin(BuiltinFn::Map) => {
                let mut iter = args.into_iter();
                let (Some(func), Some(seq), None) = (iter.next(), iter.next(), iter.next()) else {
                    return Err(RunError::raised(
                        "wrong number of arguments to map: expected 2",
                    ));
                };
                self.execute_map(func, seq)
            }
            Value::Builtin(builtin) => builtin.call(args, &mut self.tracker, &mut *self.writer),
            other => Err(RunError::raised(format!(
                "calling non-function: {}",
                other.type_name()
            ))),
        }
    }

    /// `map(f, seq)`: applies a user callable per element of an array or
    /// tuple, collecting the results into a new array.
    fn execute_map(&mut self, func: Value, seq: Value) -> RunResult<Value> {
        let items: Vec<Value> = match &seq {
            Value::Array(items) => items.borrow().clone(),
            Value::Tuple(items) => items.to_vec(),
            other => {
                return Err(RunError::raised(format!(
                    "argument to map not supported, got {}",
                    other.type_name()
                )));
            }
        };
        self.tracker.charge_array(items.len())?;
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let result = self.apply_function(func.clone(), vec![item])?;
            results.push(result);
        }
        Ok(Value::array(results))
    }

    fn pop_args(&mut self, argc: u8) -> RunResult<Vec<Value>> {
        let argc = usize::from(argc);
        if self.stack.len() < argc {
            return Err(RunError::fatal("argument underflow"));
        }
        let split_at = self.stack.len() - argc;
        Ok(self.stack.split_off(split_at))
    }
}

/// Expands `Spread` wrappers in an argument list by splicing in the
/// elements of the wrapped array or tuple.
fn expand_spreads(args: Vec<Value>) -> RunResult<Vec<Value>> {
    let mut expanded = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Value::Spread(inner) => match *inner {
                Value::Array(items) => expanded.extend(items.borrow().iter().cloned()),
                Value::Tuple(items) => expanded.extend(items.iter().cloned()),
                other => {
                    return Err(RunError::raised(format!(
                        "cannot spread {}",
                        other.type_name()
                    )));
                }
            },
            other => expanded.push(other),
        }
    }
    Ok(expanded)
}
