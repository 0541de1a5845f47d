//! Resource budgets: memory, instruction count, and recursion depth.
//!
//! All three limits are optional and produce ordinary catchable Welle errors
//! when exceeded, so sandboxed programs can observe and recover from them.
//! Allocation charges are applied at value-construction sites with a fixed
//! per-kind cost.

use crate::error::{RunError, RunResult, MEMORY_ERROR_CODE};

/// Fixed per-value header cost in bytes.
///
/// Every charged allocation pays this on top of its payload: a string pays
/// `HEADER + byte length`, an array `HEADER + SLOT * len`, and so on.
pub const VALUE_HEADER_COST: usize = 16;

/// Cost of one array slot.
pub const SLOT_COST: usize = 8;

/// Cost of one dict entry (key + value + bucket overhead).
pub const DICT_ENTRY_COST: usize = 32;

/// Configuration for resource limits.
///
/// All limits are optional - set to `None` to disable a specific limit.
/// Use `ResourceLimits::default()` for no limits, or build custom limits
/// with the builder pattern.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    /// Maximum heap memory in bytes (approximate, per-kind charges).
    pub max_memory: Option<usize>,
    /// Maximum number of executed bytecode instructions.
    pub max_steps: Option<u64>,
    /// Maximum call-frame depth, measured at the moment of call.
    pub max_recursion: Option<usize>,
}

impl ResourceLimits {
    /// Creates a new `ResourceLimits` with all limits disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum memory usage in bytes.
    #[must_use]
    pub fn max_memory(mut self, limit: usize) -> Self {
        self.max_memory = Some(limit);
        self
    }

    /// Sets the maximum number of executed instructions.
    #[must_use]
    pub fn max_steps(mut self, limit: u64) -> Self {
        self.max_steps = Some(limit);
        self
    }

    /// Sets the maximum recursion depth (call-frame depth).
    #[must_use]
    pub fn max_recursion(mut self, limit: usize) -> Self {
        self.max_recursion = Some(limit);
        self
    }
}

/// Tracks resource usage against configured limits.
///
/// Owned by the VM; builtins that allocate receive a mutable reference so
/// every construction site charges through the same accounting. Budget
/// errors are raised as catchable errors with exact, stable messages.
#[derive(Debug, Default)]
pub struct ResourceTracker {
    limits: ResourceLimits,
    memory_used: usize,
    steps: u64,
}

impl ResourceTracker {
    /// Creates a tracker enforcing the given limits.
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            memory_used: 0,
            steps: 0,
        }
    }

    /// Returns the current approximate memory usage in bytes.
    #[must_use]
    pub fn memory_used(&self) -> usize {
        self.memory_used
    }

    /// Returns the number of instructions executed so far.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Charges an allocation of `size` bytes.
    ///
    /// The memory error itself is constructed without charging, so budget
    /// exhaustion can always be reported.
    pub fn on_allocate(&mut self, size: usize) -> RunResult<()> {
        if let Some(max) = self.limits.max_memory {
            let new_memory = self.memory_used.saturating_add(size);
            if new_memory > max {
                return Err(RunError::raised_with_code(
                    format!("max memory exceeded ({max} bytes)"),
                    MEMORY_ERROR_CODE,
                ));
            }
            self.memory_used = new_memory;
        }
        Ok(())
    }

    /// Charges for one constructed string.
    pub fn charge_string(&mut self, byte_len: usize) -> RunResult<()> {
        self.on_allocate(VALUE_HEADER_COST + byte_len)
    }

    /// Charges for one constructed array of `len` slots.
    pub fn charge_array(&mut self, len: usize) -> RunResult<()> {
        self.on_allocate(VALUE_HEADER_COST + SLOT_COST * len)
    }

    /// Charges for growth of an existing array by `added` slots.
    pub fn charge_array_growth(&mut self, added: usize) -> RunResult<()> {
        self.on_allocate(SLOT_COST * added)
    }

    /// Charges for one constructed dict of `entries` entries.
    pub fn charge_dict(&mut self, entries: usize) -> RunResult<()> {
        self.on_allocate(VALUE_HEADER_COST + DICT_ENTRY_COST * entries)
    }

    /// Charges for one new entry inserted into an existing dict.
    pub fn charge_dict_entry(&mut self) -> RunResult<()> {
        self.on_allocate(DICT_ENTRY_COST)
    }

    /// Charges for one closure capturing `free_count` cells.
    pub fn charge_closure(&mut self, free_count: usize) -> RunResult<()> {
        self.on_allocate(VALUE_HEADER_COST + SLOT_COST * free_count)
    }

    /// Charges for one promoted cell.
    pub fn charge_cell(&mut self) -> RunResult<()> {
        self.on_allocate(VALUE_HEADER_COST)
    }

    /// Charges for one constructed error object.
    pub fn charge_error(&mut self) -> RunResult<()> {
        self.on_allocate(VALUE_HEADER_COST)
    }

    /// Counts one executed instruction, raising when the step cap is exhausted.
    ///
    /// The cap fires once: it is cleared as the error is raised so the
    /// handler that observes the limit can itself execute.
    pub fn on_step(&mut self) -> RunResult<()> {
        if let Some(max) = self.limits.max_steps {
            self.steps += 1;
            if self.steps > max {
                self.limits.max_steps = None;
                return Err(RunError::raised(format!(
                    "max instruction count exceeded ({max})"
                )));
            }
        }
        Ok(())
    }

    /// Checks the recursion limit before a new frame is pushed.
    ///
    /// `current_depth` is the frame count before the push, so the new depth
    /// would be `current_depth + 1`.
    pub fn check_recursion(&self, current_depth: usize) -> RunResult<()> {
        if let Some(max) = self.limits.max_recursion {
            if current_depth >= max {
                return Err(RunError::raised(format!(
                    "max recursion depth exceeded ({max})"
                )));
            }
        }
        Ok(())
    }
}
