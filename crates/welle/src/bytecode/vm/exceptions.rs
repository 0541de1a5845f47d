//! Exception propagation.
//!
//! Raised errors travel through two first-class runtime stacks. Handler
//! selection, deepest context first:
//!
//! 1. A trap whose `catch_ip` is set: pop it, drain frames above its frame
//!    (running their defers), restore the saved stack depth, seek the catch
//!    handler, and push the error as the caught value.
//! 2. A trap with the no-catch sentinel: discard it and consult the finally
//!    stack.
//! 3. A finally entry: record the error in the pending slot, unwind to the
//!    entry's frame, and seek the finally body. `RethrowPending` re-enters
//!    this machinery when the block completes without superseding the error.
//! 4. Otherwise drain everything (still running defers) and surface the
//!    formatted stack trace.
//!
//! Host-language errors are used only at the outermost boundary; unwinding
//! here is an explicit loop over VM state.

use std::rc::Rc;

use crate::bytecode::op::NO_TARGET;
use crate::bytecode::vm::Vm;
use crate::error::{format_stack_trace, ErrorValue, RunError, RunResult, TraceFrame};
use crate::io::PrintWriter;
use crate::value::Value;

impl<W: PrintWriter> Vm<'_, W> {
    /// Converts a thrown value into a raised error.
    ///
    /// Throwing an error *value* clones it into a raised shape so the
    /// original stays usable; re-throwing an already-raised error keeps its
    /// original stack trace.
    pub(super) fn raise_thrown(&mut self, value: Value) -> RunError {
        match value {
            Value::Error(err) => {
                if err.is_value {
                    let mut raised = ErrorValue::raised_with_code(err.message.clone(), err.code);
                    raised.stack = self.capture_stack_trace();
                    RunError::Raised(Box::new(raised))
                } else {
                    RunError::Raised(Box::new((*err).clone()))
                }
            }
            other => {
                let mut raised = ErrorValue::raised(other.display_string());
                raised.stack = self.capture_stack_trace();
                RunError::Raised(Box::new(raised))
            }
        }
    }

    /// Central error handling for the dispatch loop.
    ///
    /// `Ok(())` means the error was caught (or routed into a finally) and
    /// execution continues; `Err` bubbles the error out of `run_until`.
    pub(super) fn handle_error(&mut self, err: RunError, floor: usize) -> RunResult<()> {
        match err {
            fatal @ RunError::Fatal(_) => Err(fatal),
            RunError::Raised(mut err) => {
                if err.stack.is_empty() {
                    err.stack = self.capture_stack_trace();
                }
                self.propagate(err, floor)
            }
        }
    }

    /// The propagation state machine described in the module docs.
    fn propagate(&mut self, mut err: Box<ErrorValue>, floor: usize) -> RunResult<()> {
        loop {
            let trap_in_scope = self
                .traps
                .last()
                .is_some_and(|t| t.frame_index >= floor);
            if trap_in_scope {
                let committed_index = self.traps.len() - 1;
                let trap = *self.traps.last().expect("checked non-empty");
                if trap.catch_ip != NO_TARGET {
                    self.traps.pop();
                    // Transferring to a handler older than the pending slot
                    // leaves that finally's extent: the rethrow is off.
                    if self
                        .pending_error
                        .as_ref()
                        .is_some_and(|p| committed_index < p.trap_depth)
                    {
                        self.pending_error = None;
                    }
                    err = self.drain_frames_to(trap.frame_index + 1, err)?;
                    self.stack.truncate(trap.sp);
                    self.current_frame_mut().ip = usize::from(trap.catch_ip);
                    // The catch handler finds the error on the stack.
                    self.push(Value::Error(Rc::new(*err)))?;
                    return Ok(());
                }
                // Finally-only try: nothing to jump to here.
                self.traps.pop();
            }

            let finally_in_scope = self
                .finallies
                .last()
                .is_some_and(|f| f.frame_index >= floor);
            if finally_in_scope {
                let entry = self.finallies.pop().expect("checked non-empty");
                err = self.drain_frames_to(entry.frame_index + 1, err)?;
                self.stack.truncate(entry.sp);
                // The unwinder already popped the entry, so execution
                // resumes just past the EndFinally opcode.
                self.current_frame_mut().ip = usize::from(entry.finally_ip) + 1;
                // A pending error from an inner finally is superseded.
                self.pending_error = Some(super::PendingError {
                    error: err,
                    frame_index: entry.frame_index,
                    trap_depth: self.traps.len(),
                });
                return Ok(());
            }

            if trap_in_scope {
                // A no-catch trap was discarded and no finally matched;
                // consult the next outer handler.
                continue;
            }

            err = self.drain_frames_to(floor, err)?;
            return Err(RunError::Raised(err));
        }
    }

    /// Pops frames down to `target_len`, running each frame's defers in
    /// LIFO order. A throwing defer supersedes the propagating error but
    /// does not stop the unwind.
    fn drain_frames_to(
        &mut self,
        target_len: usize,
        mut err: Box<ErrorValue>,
    ) -> Result<Box<ErrorValue>, RunError> {
        while self.frames.len() > target_len {
            if let Some(defer_err) = self.run_frame_defers()? {
                err = defer_err;
            }
            let frame = self.frames.pop().expect("frame present");
            self.stack.truncate(frame.base.saturating_sub(1));
            self.prune_handlers();
        }
        Ok(err)
    }

    /// Drops trap and finally entries belonging to frames that no longer
    /// exist.
    pub(super) fn prune_handlers(&mut self) {
        let live = self.frames.len();
        while self.traps.last().is_some_and(|t| t.frame_index >= live) {
            self.traps.pop();
        }
        while self.finallies.last().is_some_and(|f| f.frame_index >= live) {
            self.finallies.pop();
        }
    }

    /// Formats the current call stack, deepest frame first.
    ///
    /// Anonymous functions were named `<anon@L:C>` at compile time; the
    /// top-level frame reads `<main>`.
    pub(crate) fn capture_stack_trace(&self) -> String {
        let mut trace = Vec::with_capacity(self.frames.len());
        for frame in self.frames.iter().rev() {
            let function = &frame.closure.function;
            let position = function
                .position_for_offset(frame.op_offset)
                .unwrap_or_default();
            trace.push(TraceFrame {
                name: function.name().clone(),
                file: function.file().clone(),
                position,
            });
        }
        format_stack_trace(&trace)
    }
}
