//! Bytecode optimizer: constant folding and peephole cleanup.
//!
//! Both passes run over one [`CompiledFunction`] at a time and share a
//! rewrite skeleton: instructions are re-emitted while recording a map from
//! old byte offsets to new ones (every offset inside a replaced window maps
//! to its replacement's first byte), then every jump-target operand and the
//! position table are rewritten through the map. The `NO_TARGET` sentinel is
//! never remapped.
//!
//! Folding must not change observable trap behavior: windows with a zero
//! denominator or an out-of-range shift count are left for the runtime to
//! raise, and no window containing an incoming jump target is rewritten.

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::bytecode::code::{CompiledFunction, PositionEntry};
use crate::bytecode::op::{Opcode, NO_TARGET};
use crate::value::Value;

type Operands = SmallVec<[u16; 2]>;

/// A decoded instruction.
#[derive(Debug, Clone)]
struct Instr {
    offset: usize,
    op: Opcode,
    operands: Operands,
}

impl Instr {
    fn encoded_len(&self) -> usize {
        self.op.instruction_len()
    }
}

/// One rewrite window: a run of original instructions and its replacement.
#[derive(Debug)]
struct Window {
    /// Indices into the decoded instruction list.
    orig_range: std::ops::Range<usize>,
    /// Replacement instructions; empty for pure removal, identical to the
    /// originals for kept instructions.
    replacement: Vec<(Opcode, Operands)>,
}

/// Optimizes a function to fixpoint, appending folded constants to the pool.
#[must_use]
pub fn optimize(func: &CompiledFunction, constants: &mut Vec<Value>) -> CompiledFunction {
    let mut current = rebuild(func, func.instructions().to_vec(), func.positions().to_vec());
    // Alternate the passes until neither changes the stream. The iteration
    // cap is a backstop; real programs converge in two or three rounds.
    for _ in 0..16 {
        let (folded, fold_changed) = fold_pass(&current, constants);
        current = folded;
        let (peeped, peep_changed) = peephole_pass(&current);
        current = peeped;
        if !fold_changed && !peep_changed {
            break;
        }
    }
    current
}

// ============================================================================
// Constant folding
// ============================================================================

fn fold_pass(func: &CompiledFunction, constants: &mut Vec<Value>) -> (CompiledFunction, bool) {
    let instrs = decode(func.instructions());
    let targets = collect_jump_targets(&instrs);

    let mut windows = Vec::with_capacity(instrs.len());
    let mut changed = false;
    let mut i = 0;
    while i < instrs.len() {
        // [lit, lit, binop]
        if i + 2 < instrs.len()
            && !targets.contains(&instrs[i + 1].offset)
            && !targets.contains(&instrs[i + 2].offset)
        {
            if let (Some(a), Some(b)) = (
                literal_value(&instrs[i], constants),
                literal_value(&instrs[i + 1], constants),
            ) {
                if let Some(result) = fold_binary(instrs[i + 2].op, &a, &b) {
                    windows.push(Window {
                        orig_range: i..i + 3,
                        replacement: vec![push_instruction(result, constants)],
                    });
                    changed = true;
                    i += 3;
                    continue;
                }
            }
        }
        // [lit, unop]
        if i + 1 < instrs.len() && !targets.contains(&instrs[i + 1].offset) {
            if let Some(a) = literal_value(&instrs[i], constants) {
                if let Some(result) = fold_unary(instrs[i + 1].op, &a) {
                    windows.push(Window {
                        orig_range: i..i + 2,
                        replacement: vec![push_instruction(result, constants)],
                    });
                    changed = true;
                    i += 2;
                    continue;
                }
            }
        }
        windows.push(keep(&instrs, i));
        i += 1;
    }

    (reassemble(func, &instrs, &windows), changed)
}

/// Reads the literal a push instruction produces, if it is foldable.
///
/// Floats are deliberately excluded; string literals participate only in
/// equality folds (see [`fold_binary`]).
fn literal_value(instr: &Instr, constants: &[Value]) -> Option<Value> {
    match instr.op {
        Opcode::True => Some(Value::Bool(true)),
        Opcode::False => Some(Value::Bool(false)),
        Opcode::Nil => Some(Value::Nil),
        Opcode::Constant => match &constants[instr.operands[0] as usize] {
            v @ (Value::Int(_) | Value::Str(_)) => Some(v.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// Evaluates a binary fold, declining anything that could trap or amplify.
fn fold_binary(op: Opcode, a: &Value, b: &Value) -> Option<Value> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            Some(match op {
                Opcode::Add => Value::Int(a.wrapping_add(b)),
                Opcode::Sub => Value::Int(a.wrapping_sub(b)),
                Opcode::Mul => Value::Int(a.wrapping_mul(b)),
                // Zero denominators must raise at runtime.
                Opcode::Div if b != 0 => Value::Int(a.wrapping_div(b)),
                Opcode::Mod if b != 0 => Value::Int(a.wrapping_rem(b)),
                Opcode::BitOr => Value::Int(a | b),
                Opcode::BitAnd => Value::Int(a & b),
                Opcode::BitXor => Value::Int(a ^ b),
                Opcode::Shl if (0..64).contains(&b) => Value::Int(a.wrapping_shl(b as u32)),
                Opcode::Shr if (0..64).contains(&b) => Value::Int(a.wrapping_shr(b as u32)),
                Opcode::Eq => Value::Bool(a == b),
                Opcode::NotEq => Value::Bool(a != b),
                Opcode::Gt => Value::Bool(a > b),
                Opcode::Lt => Value::Bool(a < b),
                Opcode::Ge => Value::Bool(a >= b),
                Opcode::Le => Value::Bool(a <= b),
                _ => return None,
            })
        }
        (Value::Bool(a), Value::Bool(b)) => match op {
            Opcode::Eq => Some(Value::Bool(a == b)),
            Opcode::NotEq => Some(Value::Bool(a != b)),
            _ => None,
        },
        (Value::Nil, Value::Nil) => match op {
            Opcode::Eq => Some(Value::Bool(true)),
            Opcode::NotEq => Some(Value::Bool(false)),
            _ => None,
        },
        // String equality folds; concatenation does not (size amplification).
        (Value::Str(a), Value::Str(b)) => match op {
            Opcode::Eq => Some(Value::Bool(a == b)),
            Opcode::NotEq => Some(Value::Bool(a != b)),
            _ => None,
        },
        _ => None,
    }
}

fn fold_unary(op: Opcode, a: &Value) -> Option<Value> {
    match op {
        Opcode::Neg => match a {
            Value::Int(n) => Some(Value::Int(n.wrapping_neg())),
            _ => None,
        },
        Opcode::Not => Some(Value::Bool(!a.is_truthy())),
        Opcode::BitNot => match a {
            Value::Int(n) => Some(Value::Int(!n)),
            _ => None,
        },
        _ => None,
    }
}

/// Builds the push instruction for a folded value.
fn push_instruction(value: Value, constants: &mut Vec<Value>) -> (Opcode, Operands) {
    match value {
        Value::Bool(true) => (Opcode::True, Operands::new()),
        Value::Bool(false) => (Opcode::False, Operands::new()),
        Value::Nil => (Opcode::Nil, Operands::new()),
        other => {
            let idx = u16::try_from(constants.len()).expect("constant pool exceeds u16 range");
            constants.push(other);
            let mut operands = Operands::new();
            operands.push(idx);
            (Opcode::Constant, operands)
        }
    }
}

// ============================================================================
// Peephole
// ============================================================================

fn peephole_pass(func: &CompiledFunction) -> (CompiledFunction, bool) {
    let instrs = decode(func.instructions());
    let targets = collect_jump_targets(&instrs);

    let mut windows = Vec::with_capacity(instrs.len());
    let mut changed = false;
    let mut i = 0;
    while i < instrs.len() {
        // [push-nil, pop] cancels out.
        if i + 1 < instrs.len()
            && instrs[i].op == Opcode::Nil
            && instrs[i + 1].op == Opcode::Pop
            && !targets.contains(&instrs[i + 1].offset)
        {
            windows.push(Window {
                orig_range: i..i + 2,
                replacement: Vec::new(),
            });
            changed = true;
            i += 2;
            continue;
        }
        // [pop, return-value] collapses; return already produces a value.
        if i + 1 < instrs.len()
            && instrs[i].op == Opcode::Pop
            && instrs[i + 1].op == Opcode::ReturnValue
            && !targets.contains(&instrs[i + 1].offset)
        {
            windows.push(Window {
                orig_range: i..i + 2,
                replacement: vec![(Opcode::ReturnValue, Operands::new())],
            });
            changed = true;
            i += 2;
            continue;
        }
        // A jump whose target is the next instruction does nothing.
        if instrs[i].op == Opcode::Jump {
            let next_offset = instrs[i].offset + instrs[i].encoded_len();
            if usize::from(instrs[i].operands[0]) == next_offset {
                windows.push(Window {
                    orig_range: i..i + 1,
                    replacement: Vec::new(),
                });
                changed = true;
                i += 1;
                continue;
            }
        }
        windows.push(keep(&instrs, i));
        i += 1;
    }

    (reassemble(func, &instrs, &windows), changed)
}

// ============================================================================
// Rewrite skeleton
// ============================================================================

fn keep(instrs: &[Instr], i: usize) -> Window {
    Window {
        orig_range: i..i + 1,
        replacement: vec![(instrs[i].op, instrs[i].operands.clone())],
    }
}

/// Re-emits the windows, remapping jump targets and the position table.
fn reassemble(func: &CompiledFunction, instrs: &[Instr], windows: &[Window]) -> CompiledFunction {
    // Pass 1: lay out replacement instructions and record the offset map.
    let mut offset_map: AHashMap<usize, usize> = AHashMap::new();
    let mut new_instrs: Vec<Instr> = Vec::with_capacity(instrs.len());
    let mut cursor = 0usize;
    for window in windows {
        for orig_idx in window.orig_range.clone() {
            offset_map.insert(instrs[orig_idx].offset, cursor);
        }
        for (op, operands) in &window.replacement {
            new_instrs.push(Instr {
                offset: cursor,
                op: *op,
                operands: operands.clone(),
            });
            cursor += op.instruction_len();
        }
    }
    // Jumps may target the end-of-code offset.
    offset_map.insert(func.instructions().len(), cursor);

    // Pass 2: rewrite jump-target operands through the map.
    for instr in &mut new_instrs {
        for operand_idx in jump_operand_indices(instr.op) {
            let target = instr.operands[*operand_idx];
            if target == NO_TARGET {
                continue;
            }
            let new_target = offset_map
                .get(&usize::from(target))
                .copied()
                .expect("jump target must map to an instruction start");
            instr.operands[*operand_idx] =
                u16::try_from(new_target).expect("rewritten jump target exceeds u16");
        }
    }

    // Pass 3: remap the position table. Entries pointing at removed offsets
    // are dropped; entries pointing at the first byte of a replaced window
    // survive.
    let mut surviving_starts: AHashMap<usize, usize> = AHashMap::new();
    {
        let mut cursor = 0usize;
        for window in windows {
            if !window.replacement.is_empty() {
                let first = window.orig_range.start;
                surviving_starts.insert(instrs[first].offset, cursor);
            }
            for (op, _) in &window.replacement {
                cursor += op.instruction_len();
            }
        }
    }
    let mut positions = Vec::with_capacity(func.positions().len());
    let mut last_offset: Option<u32> = None;
    for entry in func.positions() {
        if let Some(new_offset) = surviving_starts.get(&(entry.offset as usize)) {
            let new_offset = u32::try_from(*new_offset).expect("offset exceeds u32");
            if last_offset == Some(new_offset) {
                continue;
            }
            last_offset = Some(new_offset);
            positions.push(PositionEntry {
                offset: new_offset,
                position: entry.position,
            });
        }
    }

    let bytes = encode(&new_instrs);
    rebuild(func, bytes, positions)
}

fn rebuild(func: &CompiledFunction, bytes: Vec<u8>, positions: Vec<PositionEntry>) -> CompiledFunction {
    CompiledFunction::new(
        bytes,
        func.num_params(),
        func.num_locals(),
        func.name().clone(),
        func.file().clone(),
        positions,
    )
}

fn decode(code: &[u8]) -> Vec<Instr> {
    let mut instrs = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let op = Opcode::from_repr(code[offset]).expect("invalid opcode in compiled bytecode");
        let mut operands = Operands::new();
        let mut cursor = offset + 1;
        for &width in op.operand_widths() {
            let operand = match width {
                1 => u16::from(code[cursor]),
                2 => u16::from_be_bytes([code[cursor], code[cursor + 1]]),
                _ => unreachable!("operand widths are 1 or 2"),
            };
            operands.push(operand);
            cursor += width;
        }
        instrs.push(Instr { offset, op, operands });
        offset = cursor;
    }
    instrs
}

fn encode(instrs: &[Instr]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for instr in instrs {
        bytes.push(instr.op as u8);
        for (operand, &width) in instr.operands.iter().zip(instr.op.operand_widths()) {
            match width {
                1 => bytes.push(u8::try_from(*operand).expect("u8 operand out of range")),
                2 => bytes.extend_from_slice(&operand.to_be_bytes()),
                _ => unreachable!("operand widths are 1 or 2"),
            }
        }
    }
    bytes
}

/// Which operands of an instruction hold absolute jump targets.
fn jump_operand_indices(op: Opcode) -> &'static [usize] {
    match op {
        Opcode::Jump | Opcode::JumpNotTruthy | Opcode::JumpIfNil | Opcode::Try => &[0],
        Opcode::TryFinally => &[0, 1],
        _ => &[],
    }
}

fn collect_jump_targets(instrs: &[Instr]) -> ahash::AHashSet<usize> {
    let mut targets = ahash::AHashSet::new();
    for instr in instrs {
        for operand_idx in jump_operand_indices(instr.op) {
            let target = instr.operands[*operand_idx];
            if target != NO_TARGET {
                targets.insert(usize::from(target));
            }
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::builder::CodeBuilder;

    fn func_from(builder: CodeBuilder) -> CompiledFunction {
        let (instructions, positions) = builder.into_parts();
        CompiledFunction::new(instructions, 0, 0, "<test>".into(), "t.we".into(), positions)
    }

    #[test]
    fn folds_integer_addition() {
        let mut constants = vec![Value::Int(1), Value::Int(2)];
        let mut builder = CodeBuilder::new();
        builder.emit_u16(Opcode::Constant, 0);
        builder.emit_u16(Opcode::Constant, 1);
        builder.emit(Opcode::Add);
        builder.emit(Opcode::Return);
        let optimized = optimize(&func_from(builder), &mut constants);

        let instrs = decode(optimized.instructions());
        assert_eq!(instrs.len(), 2);
        assert_eq!(instrs[0].op, Opcode::Constant);
        assert_eq!(constants[instrs[0].operands[0] as usize], Value::Int(3));
        assert_eq!(instrs[1].op, Opcode::Return);
    }

    #[test]
    fn never_folds_division_by_zero() {
        let mut constants = vec![Value::Int(1), Value::Int(0)];
        let mut builder = CodeBuilder::new();
        builder.emit_u16(Opcode::Constant, 0);
        builder.emit_u16(Opcode::Constant, 1);
        builder.emit(Opcode::Div);
        builder.emit(Opcode::Return);
        let optimized = optimize(&func_from(builder), &mut constants);

        let instrs = decode(optimized.instructions());
        assert_eq!(instrs.len(), 4, "1/0 must be left for the runtime");
        assert_eq!(instrs[2].op, Opcode::Div);
    }

    #[test]
    fn removes_nil_pop_and_remaps_jumps() {
        let mut constants = Vec::new();
        let mut builder = CodeBuilder::new();
        // jump over a nil/pop pair to a constant push
        let jump = builder.emit_jump(Opcode::Jump); // 0..3
        builder.emit(Opcode::Nil); // 3
        builder.emit(Opcode::Pop); // 4
        builder.patch_jump(jump); // target 5
        builder.emit(Opcode::True); // 5
        builder.emit(Opcode::Return); // 6
        let optimized = optimize(&func_from(builder), &mut constants);

        let instrs = decode(optimized.instructions());
        // The nil/pop pair is gone, and the jump (now jump-to-next) is gone too.
        assert_eq!(instrs.len(), 2);
        assert_eq!(instrs[0].op, Opcode::True);
        assert_eq!(instrs[1].op, Opcode::Return);
    }

    #[test]
    fn folds_string_equality_but_not_concat() {
        let mut constants = vec![Value::str("a"), Value::str("a"), Value::str("b")];
        let mut builder = CodeBuilder::new();
        builder.emit_u16(Opcode::Constant, 0);
        builder.emit_u16(Opcode::Constant, 1);
        builder.emit(Opcode::Eq);
        builder.emit(Opcode::Pop);
        builder.emit_u16(Opcode::Constant, 0);
        builder.emit_u16(Opcode::Constant, 2);
        builder.emit(Opcode::Add);
        builder.emit(Opcode::Return);
        let optimized = optimize(&func_from(builder), &mut constants);

        let instrs = decode(optimized.instructions());
        assert_eq!(instrs[0].op, Opcode::True, "string equality folds");
        assert!(
            instrs.iter().any(|i| i.op == Opcode::Add),
            "string concatenation must not fold"
        );
    }

    #[test]
    fn fold_skips_windows_with_incoming_jumps() {
        let mut constants = vec![Value::Int(1), Value::Int(2)];
        let mut builder = CodeBuilder::new();
        // Jump lands on the second literal: the window must not fold.
        let jump = builder.emit_jump(Opcode::Jump); // 0..3
        builder.emit_u16(Opcode::Constant, 0); // 3
        builder.patch_jump(jump); // target 6
        builder.emit_u16(Opcode::Constant, 1); // 6
        builder.emit(Opcode::Add); // 9
        builder.emit(Opcode::Return);
        let optimized = optimize(&func_from(builder), &mut constants);

        let instrs = decode(optimized.instructions());
        assert!(instrs.iter().any(|i| i.op == Opcode::Add));
    }

    #[test]
    fn positions_survive_at_window_starts() {
        use crate::ast::Position;
        let mut constants = vec![Value::Int(1), Value::Int(2)];
        let mut builder = CodeBuilder::new();
        builder.set_position(Position::new(1, 1));
        builder.emit_u16(Opcode::Constant, 0);
        builder.set_position(Position::new(1, 5));
        builder.emit_u16(Opcode::Constant, 1);
        builder.emit(Opcode::Add);
        builder.set_position(Position::new(2, 1));
        builder.emit(Opcode::Return);
        let optimized = optimize(&func_from(builder), &mut constants);

        assert_eq!(optimized.position_for_offset(0), Some(Position::new(1, 1)));
        let return_offset = optimized.instructions().len() - 1;
        assert_eq!(
            optimized.position_for_offset(return_offset),
            Some(Position::new(2, 1))
        );
    }
}
