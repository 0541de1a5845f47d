//! Tree-to-bytecode compiler.
//!
//! The compiler walks the program tree and emits bytecode through a stack of
//! compilation scopes, one per function body being compiled. Each scope owns
//! its own [`CodeBuilder`] plus loop/switch contexts for break/continue
//! back-patching; the constant pool is shared by every scope of the unit.
//!
//! Desugared constructs (for-in, comprehensions, switch/match scrutinees,
//! compound index assignment) stash intermediate state in compiler-generated
//! temporaries that are invisible to source-level name lookups.

use std::rc::Rc;

use crate::ast::{
    AssignOp, Block, CatchClause, DestructureTarget, DictEntry, Expr, ExprKind, InfixOp, MatchArm,
    Position, PrefixOp, Program, Stmt, StmtKind, SwitchCase,
};
use crate::builtins::BuiltinFn;
use crate::bytecode::builder::{CodeBuilder, JumpLabel};
use crate::bytecode::code::{CompiledFunction, ConstPool, Unit};
use crate::bytecode::op::Opcode;
use crate::bytecode::optimizer;
use crate::error::CompileError;
use crate::symbols::{Symbol, SymbolScope, SymbolTable};
use crate::value::Value;

/// Maximum number of arguments in a call and of locals in a function.
///
/// Both limits come from the bytecode format: argument counts and local
/// slots are u8 operands.
const MAX_CALL_ARGS: usize = 255;
const MAX_LOCALS: usize = 256;

/// Compiler configuration.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Run the constant-folding and peephole passes after compilation.
    pub optimize: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self { optimize: true }
    }
}

/// What a `break` can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakableKind {
    Loop,
    Switch,
}

/// An active loop or switch context with its pending back-patches.
#[derive(Debug)]
struct Breakable {
    kind: BreakableKind,
    breaks: Vec<JumpLabel>,
    continues: Vec<JumpLabel>,
}

/// One compilation scope: a function body (or the module top level).
#[derive(Debug, Default)]
struct Scope {
    builder: CodeBuilder,
    breakables: Vec<Breakable>,
}

/// Compiles a [`Program`] into a bytecode [`Unit`].
pub struct Compiler {
    constants: Vec<Value>,
    symbols: SymbolTable,
    scopes: Vec<Scope>,
    file: Rc<str>,
    options: CompilerOptions,
}

impl Compiler {
    /// Creates a compiler for the given source file name.
    #[must_use]
    pub fn new(file: &str) -> Self {
        Self::with_options(file, CompilerOptions::default())
    }

    /// Creates a compiler with explicit options.
    #[must_use]
    pub fn with_options(file: &str, options: CompilerOptions) -> Self {
        Self {
            constants: Vec::new(),
            symbols: SymbolTable::new(),
            scopes: vec![Scope::default()],
            file: file.into(),
            options,
        }
    }

    /// Compiles a whole program into a unit.
    pub fn compile(mut self, program: &Program) -> Result<Unit, CompileError> {
        for stmt in &program.statements {
            self.compile_stmt(stmt)?;
        }
        self.builder().emit(Opcode::Return);

        let scope = self.scopes.pop().expect("top-level scope");
        let (instructions, positions) = scope.builder.into_parts();
        let mut main = CompiledFunction::new(
            instructions,
            0,
            0,
            "<main>".into(),
            self.file.clone(),
            positions,
        );

        let mut constants = self.constants;
        if self.options.optimize {
            main = optimizer::optimize(&main, &mut constants);
            for idx in 0..constants.len() {
                if let Value::Function(func) = constants[idx].clone() {
                    let optimized = optimizer::optimize(&func, &mut constants);
                    constants[idx] = Value::Function(Rc::new(optimized));
                }
            }
        }

        Ok(Unit {
            main: Rc::new(main),
            constants: Rc::new(ConstPool::from_vec(constants)),
        })
    }

    // ========================================================================
    // Scope helpers
    // ========================================================================

    fn builder(&mut self) -> &mut CodeBuilder {
        &mut self.scopes.last_mut().expect("scope stack").builder
    }

    fn scope(&mut self) -> &mut Scope {
        self.scopes.last_mut().expect("scope stack")
    }

    fn enter_scope(&mut self) {
        self.scopes.push(Scope::default());
        let outer = std::mem::take(&mut self.symbols);
        self.symbols = SymbolTable::enclosed(outer);
    }

    fn leave_scope(&mut self) -> (CodeBuilder, Vec<Symbol>, u16) {
        let scope = self.scopes.pop().expect("scope stack");
        let table = std::mem::take(&mut self.symbols);
        let num_locals = table.num_definitions();
        let free_symbols = table.free_symbols.clone();
        self.symbols = table.into_outer();
        (scope.builder, free_symbols, num_locals)
    }

    fn add_constant(&mut self, value: Value) -> u16 {
        let idx = self.constants.len();
        let idx = u16::try_from(idx).expect("constant pool exceeds u16 range; too many constants");
        self.constants.push(value);
        idx
    }

    fn add_string_constant(&mut self, s: &str) -> u16 {
        self.add_constant(Value::str(s))
    }

    // ========================================================================
    // Symbol emission
    // ========================================================================

    fn load_symbol(&mut self, sym: &Symbol) {
        match sym.scope {
            SymbolScope::Global => self.builder().emit_u16(Opcode::GetGlobal, sym.index),
            SymbolScope::Local => {
                let slot = u8::try_from(sym.index).expect("local slot exceeds u8");
                self.builder().emit_u8(Opcode::GetLocal, slot);
            }
            SymbolScope::Free => {
                let idx = u8::try_from(sym.index).expect("free index exceeds u8");
                self.builder().emit_u8(Opcode::GetFree, idx);
            }
            SymbolScope::Builtin => {
                let idx = u8::try_from(sym.index).expect("builtin index exceeds u8");
                self.builder().emit_u8(Opcode::GetBuiltin, idx);
            }
            SymbolScope::Function => self.builder().emit(Opcode::CurrentClosure),
        }
    }

    fn store_symbol(&mut self, sym: &Symbol) {
        match sym.scope {
            SymbolScope::Global => self.builder().emit_u16(Opcode::SetGlobal, sym.index),
            SymbolScope::Local => {
                let slot = u8::try_from(sym.index).expect("local slot exceeds u8");
                self.builder().emit_u8(Opcode::SetLocal, slot);
            }
            SymbolScope::Free => {
                let idx = u8::try_from(sym.index).expect("free index exceeds u8");
                self.builder().emit_u8(Opcode::SetFree, idx);
            }
            SymbolScope::Builtin | SymbolScope::Function => {
                unreachable!("builtins and function self-references are not assignable")
            }
        }
    }

    /// Defines a name in the current scope, checking the local-slot limit.
    fn define_checked(&mut self, name: &str, pos: Position) -> Result<Symbol, CompileError> {
        let sym = self.symbols.define(name);
        if sym.scope == SymbolScope::Local && usize::from(sym.index) >= MAX_LOCALS {
            return Err(CompileError::new(
                format!("more than {MAX_LOCALS} local variables in function"),
                pos,
            ));
        }
        Ok(sym)
    }

    /// Stores the top of stack into `name`, defining it when unbound.
    ///
    /// Used by destructuring targets, for-in loop variables, and catch
    /// clause bindings; pops the value without pushing it back.
    fn compile_store_target(&mut self, name: &str, pos: Position) -> Result<(), CompileError> {
        let resolved = self.symbols.resolve(name).filter(|s| {
            matches!(
                s.scope,
                SymbolScope::Global | SymbolScope::Local | SymbolScope::Free
            )
        });
        let sym = match resolved {
            Some(sym) => sym,
            None => self.define_checked(name, pos)?,
        };
        self.store_symbol(&sym);
        Ok(())
    }

    // ========================================================================
    // Statement compilation
    // ========================================================================

    fn compile_block(&mut self, block: &Block) -> Result<(), CompileError> {
        for stmt in &block.0 {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        self.builder().set_position(stmt.pos);
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.compile_expr(expr)?;
                self.builder().emit(Opcode::Pop);
            }

            StmtKind::Assign { name, op, value } => {
                self.compile_named_assign(name, *op, value, stmt.pos)?;
                self.builder().emit(Opcode::Pop);
            }

            StmtKind::DestructureAssign { targets, value } => {
                self.compile_destructure(targets, value, stmt.pos)?;
                self.builder().emit(Opcode::Pop);
            }

            StmtKind::IndexAssign {
                object,
                index,
                op,
                value,
            } => {
                self.compile_index_assign(object, index, *op, value, stmt.pos)?;
                self.builder().emit(Opcode::Pop);
            }

            StmtKind::MemberAssign {
                object,
                member,
                op,
                value,
            } => {
                self.compile_member_assign(object, member, *op, value, stmt.pos)?;
                self.builder().emit(Opcode::Pop);
            }

            StmtKind::Return(expr) => match expr {
                Some(expr) => {
                    self.compile_expr(expr)?;
                    self.builder().emit(Opcode::ReturnValue);
                }
                None => self.builder().emit(Opcode::Return),
            },

            StmtKind::Defer { call } => self.compile_defer(call, stmt.pos)?,

            StmtKind::Throw(expr) => {
                self.compile_expr(expr)?;
                self.builder().set_position(stmt.pos);
                self.builder().emit(Opcode::Throw);
            }

            StmtKind::Pass => {}

            StmtKind::Break => {
                let label = self.builder().emit_jump(Opcode::Jump);
                let target = self.scope().breakables.last_mut();
                match target {
                    Some(breakable) => breakable.breaks.push(label),
                    None => {
                        return Err(CompileError::new("break outside loop or switch", stmt.pos))
                    }
                }
            }

            StmtKind::Continue => {
                let label = self.builder().emit_jump(Opcode::Jump);
                let target = self
                    .scope()
                    .breakables
                    .iter_mut()
                    .rev()
                    .find(|b| b.kind == BreakableKind::Loop);
                match target {
                    Some(breakable) => breakable.continues.push(label),
                    None => return Err(CompileError::new("continue outside loop", stmt.pos)),
                }
            }

            StmtKind::If { cond, then, alt } => {
                self.compile_expr(cond)?;
                let jump_else = self.builder().emit_jump(Opcode::JumpNotTruthy);
                self.compile_block(then)?;
                match alt {
                    Some(alt) => {
                        let jump_end = self.builder().emit_jump(Opcode::Jump);
                        self.builder().patch_jump(jump_else);
                        self.compile_block(alt)?;
                        self.builder().patch_jump(jump_end);
                    }
                    None => self.builder().patch_jump(jump_else),
                }
            }

            StmtKind::While { cond, body } => {
                let loop_start = self.builder().current_offset();
                self.compile_expr(cond)?;
                let jump_end = self.builder().emit_jump(Opcode::JumpNotTruthy);

                self.scope().breakables.push(Breakable {
                    kind: BreakableKind::Loop,
                    breaks: Vec::new(),
                    continues: Vec::new(),
                });
                self.compile_block(body)?;
                self.builder().emit_jump_to(Opcode::Jump, loop_start);
                self.builder().patch_jump(jump_end);

                let breakable = self.scope().breakables.pop().expect("loop context");
                self.patch_breakable(breakable, loop_start);
            }

            StmtKind::For {
                init,
                cond,
                post,
                body,
            } => self.compile_for(init.as_deref(), cond.as_ref(), post.as_deref(), body)?,

            StmtKind::ForIn {
                key,
                value,
                iterable,
                body,
            } => self.compile_for_in(key, value.as_deref(), iterable, body, stmt.pos)?,

            StmtKind::Switch {
                subject,
                cases,
                default,
            } => self.compile_switch(subject, cases, default.as_ref(), stmt.pos)?,

            StmtKind::Try {
                body,
                catch,
                finally,
            } => self.compile_try(body, catch.as_ref(), finally.as_ref(), stmt.pos)?,

            StmtKind::Func { name, params, body } => {
                // Define before compiling the body so the function can refer
                // to itself by name.
                let sym = self.define_checked(name, stmt.pos)?;
                self.compile_function(params, body, Some(name), stmt.pos)?;
                self.store_symbol(&sym);
            }

            StmtKind::Import { path, alias } => {
                let path_const = self.add_string_constant(path);
                self.builder().emit_u16(Opcode::ImportModule, path_const);
                let bind_name = match alias {
                    Some(alias) => alias.clone(),
                    None => module_basename(path),
                };
                self.compile_store_target(&bind_name, stmt.pos)?;
            }

            StmtKind::FromImport { path, names } => {
                for (name, alias) in names {
                    let path_const = self.add_string_constant(path);
                    let name_const = self.add_string_constant(name);
                    self.builder()
                        .emit_u16_u16(Opcode::ImportFrom, path_const, name_const);
                    let bind_name = alias.as_ref().unwrap_or(name).clone();
                    self.compile_store_target(&bind_name, stmt.pos)?;
                }
            }

            StmtKind::Export { name } => {
                let sym = self.symbols.resolve(name).ok_or_else(|| {
                    CompileError::new(format!("cannot export undefined name \"{name}\""), stmt.pos)
                })?;
                self.load_symbol(&sym);
                let name_const = self.add_string_constant(name);
                self.builder().emit_u16(Opcode::Export, name_const);
            }
        }
        Ok(())
    }

    /// Patches a finished loop/switch context: breaks to the current offset,
    /// continues to `continue_target`.
    fn patch_breakable(&mut self, breakable: Breakable, continue_target: usize) {
        for label in breakable.breaks {
            self.builder().patch_jump(label);
        }
        for label in breakable.continues {
            self.builder().patch_jump_to(label, continue_target);
        }
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    /// Compiles a named assignment, leaving the assigned value on the stack.
    fn compile_named_assign(
        &mut self,
        name: &str,
        op: AssignOp,
        value: &Expr,
        pos: Position,
    ) -> Result<(), CompileError> {
        match op {
            AssignOp::Walrus => {
                let already = self
                    .symbols
                    .resolve_here(name)
                    .is_some_and(|s| matches!(s.scope, SymbolScope::Global | SymbolScope::Local));
                if already {
                    return Err(CompileError::new(
                        format!("cannot redeclare \"{name}\" in this scope"),
                        pos,
                    ));
                }
                let sym = self.define_checked(name, pos)?;
                self.compile_expr(value)?;
                let name_const = self.add_string_constant(name);
                match sym.scope {
                    SymbolScope::Global => {
                        self.builder()
                            .emit_u16_u16(Opcode::DefineGlobal, sym.index, name_const);
                    }
                    SymbolScope::Local => {
                        let slot = u8::try_from(sym.index).expect("local slot exceeds u8");
                        self.builder()
                            .emit_u8_u16(Opcode::DefineLocal, slot, name_const);
                    }
                    _ => unreachable!("define produces globals or locals"),
                }
                self.load_symbol(&sym);
            }

            AssignOp::Assign => {
                let resolved = self.symbols.resolve(name).filter(|s| {
                    matches!(
                        s.scope,
                        SymbolScope::Global | SymbolScope::Local | SymbolScope::Free
                    )
                });
                let sym = match resolved {
                    Some(sym) => sym,
                    None => self.define_checked(name, pos)?,
                };
                self.compile_expr(value)?;
                self.store_symbol(&sym);
                self.load_symbol(&sym);
            }

            _ => {
                // Compound assignment: the target must already be bound.
                let sym = self
                    .symbols
                    .resolve(name)
                    .filter(|s| {
                        matches!(
                            s.scope,
                            SymbolScope::Global | SymbolScope::Local | SymbolScope::Free
                        )
                    })
                    .ok_or_else(|| {
                        CompileError::new(format!("undefined variable \"{name}\""), pos)
                    })?;
                self.load_symbol(&sym);
                self.compile_expr(value)?;
                self.builder().emit(compound_opcode(op));
                self.store_symbol(&sym);
                self.load_symbol(&sym);
            }
        }
        Ok(())
    }

    fn compile_destructure(
        &mut self,
        targets: &[DestructureTarget],
        value: &Expr,
        pos: Position,
    ) -> Result<(), CompileError> {
        let star_count = targets
            .iter()
            .filter(|t| matches!(t, DestructureTarget::Star(_)))
            .count();
        if star_count > 1 {
            return Err(CompileError::new(
                "multiple starred targets in destructuring",
                pos,
            ));
        }
        let count = u8::try_from(targets.len())
            .map_err(|_| CompileError::new("too many destructuring targets", pos))?;

        self.compile_expr(value)?;
        self.builder().set_position(pos);
        if star_count == 1 {
            let star_idx = targets
                .iter()
                .position(|t| matches!(t, DestructureTarget::Star(_)))
                .expect("star present");
            let star_idx = u8::try_from(star_idx).expect("star index fits u8");
            self.builder()
                .emit_u8_u8(Opcode::UnpackStar, count, star_idx);
        } else {
            self.builder().emit_u8(Opcode::UnpackTuple, count);
        }

        // Bound values sit above the original value, last target on top;
        // store in reverse so the stack drains correctly.
        for target in targets.iter().rev() {
            match target {
                DestructureTarget::Name(name) | DestructureTarget::Star(name) => {
                    self.compile_store_target(name, pos)?;
                }
                DestructureTarget::Discard => self.builder().emit(Opcode::Pop),
            }
        }
        Ok(())
    }

    fn compile_index_assign(
        &mut self,
        object: &Expr,
        index: &Expr,
        op: AssignOp,
        value: &Expr,
        pos: Position,
    ) -> Result<(), CompileError> {
        match op {
            AssignOp::Walrus => Err(CompileError::new("invalid target for :=", pos)),
            AssignOp::Assign => {
                self.compile_expr(value)?;
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.builder().set_position(pos);
                self.builder().emit(Opcode::SetIndex);
                Ok(())
            }
            _ => {
                // Evaluate base and key once, into temps.
                let t_obj = self.symbols.define_temp("idxobj");
                let t_idx = self.symbols.define_temp("idxkey");
                self.compile_expr(object)?;
                self.store_symbol(&t_obj);
                self.compile_expr(index)?;
                self.store_symbol(&t_idx);

                self.load_symbol(&t_obj);
                self.load_symbol(&t_idx);
                self.builder().emit(Opcode::Index);
                self.compile_expr(value)?;
                self.builder().set_position(pos);
                self.builder().emit(compound_opcode(op));

                self.load_symbol(&t_obj);
                self.load_symbol(&t_idx);
                self.builder().emit(Opcode::SetIndex);
                Ok(())
            }
        }
    }

    fn compile_member_assign(
        &mut self,
        object: &Expr,
        member: &str,
        op: AssignOp,
        value: &Expr,
        pos: Position,
    ) -> Result<(), CompileError> {
        let name_const = self.add_string_constant(member);
        match op {
            AssignOp::Walrus => Err(CompileError::new("invalid target for :=", pos)),
            AssignOp::Assign => {
                self.compile_expr(value)?;
                self.compile_expr(object)?;
                self.builder().set_position(pos);
                self.builder().emit_u16(Opcode::SetMember, name_const);
                Ok(())
            }
            _ => {
                let t_obj = self.symbols.define_temp("membase");
                self.compile_expr(object)?;
                self.store_symbol(&t_obj);

                self.load_symbol(&t_obj);
                self.builder().emit_u16(Opcode::GetMember, name_const);
                self.compile_expr(value)?;
                self.builder().set_position(pos);
                self.builder().emit(compound_opcode(op));

                self.load_symbol(&t_obj);
                self.builder().emit_u16(Opcode::SetMember, name_const);
                Ok(())
            }
        }
    }

    // ========================================================================
    // Control flow
    // ========================================================================

    fn compile_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        post: Option<&Stmt>,
        body: &Block,
    ) -> Result<(), CompileError> {
        if let Some(init) = init {
            self.compile_stmt(init)?;
        }
        let cond_start = self.builder().current_offset();
        match cond {
            Some(cond) => self.compile_expr(cond)?,
            None => self.builder().emit(Opcode::True),
        }
        let jump_end = self.builder().emit_jump(Opcode::JumpNotTruthy);

        self.scope().breakables.push(Breakable {
            kind: BreakableKind::Loop,
            breaks: Vec::new(),
            continues: Vec::new(),
        });
        self.compile_block(body)?;

        // The continue target is the post-expression, whose address is only
        // known once the body has been compiled.
        let post_start = self.builder().current_offset();
        if let Some(post) = post {
            self.compile_stmt(post)?;
        }
        self.builder().emit_jump_to(Opcode::Jump, cond_start);
        self.builder().patch_jump(jump_end);

        let breakable = self.scope().breakables.pop().expect("loop context");
        self.patch_breakable(breakable, post_start);
        Ok(())
    }

    fn compile_for_in(
        &mut self,
        key: &str,
        value: Option<&str>,
        iterable: &Expr,
        body: &Block,
        pos: Position,
    ) -> Result<(), CompileError> {
        let t_dict = if value.is_some() {
            // Key/value destructuring needs the dict around for lookups.
            let t_dict = self.symbols.define_temp("dict");
            self.compile_expr(iterable)?;
            self.store_symbol(&t_dict);
            self.load_symbol(&t_dict);
            self.builder().set_position(pos);
            self.builder().emit(Opcode::IterInitDict);
            Some(t_dict)
        } else {
            self.compile_expr(iterable)?;
            self.builder().set_position(pos);
            self.builder().emit(Opcode::IterInit);
            None
        };
        let t_iter = self.symbols.define_temp("iter");
        self.store_symbol(&t_iter);

        let loop_start = self.builder().current_offset();
        self.load_symbol(&t_iter);
        self.builder().emit(Opcode::IterNext);
        let jump_cleanup = self.builder().emit_jump(Opcode::JumpNotTruthy);

        // Bind the loop variable(s): the key comes from the iterator, the
        // value (dict form) through an index lookup.
        self.compile_store_target(key, pos)?;
        if let (Some(value_name), Some(t_dict)) = (value, &t_dict) {
            let key_sym = self.symbols.resolve(key).expect("loop key just bound");
            self.load_symbol(t_dict);
            self.load_symbol(&key_sym);
            self.builder().emit(Opcode::Index);
            self.compile_store_target(value_name, pos)?;
        }

        self.scope().breakables.push(Breakable {
            kind: BreakableKind::Loop,
            breaks: Vec::new(),
            continues: Vec::new(),
        });
        self.compile_block(body)?;
        self.builder().emit_jump_to(Opcode::Jump, loop_start);

        // Exhausted: drop the leftover value pushed by the final IterNext.
        self.builder().patch_jump(jump_cleanup);
        self.builder().emit(Opcode::Pop);

        let breakable = self.scope().breakables.pop().expect("loop context");
        self.patch_breakable(breakable, loop_start);
        Ok(())
    }

    fn compile_switch(
        &mut self,
        subject: &Expr,
        cases: &[SwitchCase],
        default: Option<&Block>,
        pos: Position,
    ) -> Result<(), CompileError> {
        let t_subject = self.symbols.define_temp("switch");
        self.compile_expr(subject)?;
        self.store_symbol(&t_subject);

        self.scope().breakables.push(Breakable {
            kind: BreakableKind::Switch,
            breaks: Vec::new(),
            continues: Vec::new(),
        });

        let mut end_jumps = Vec::new();
        for case in cases {
            let mut next_case = None;
            let mut body_jumps = Vec::new();
            for (i, alt) in case.values.iter().enumerate() {
                self.load_symbol(&t_subject);
                self.compile_expr(alt)?;
                self.builder().emit(Opcode::Eq);
                if i + 1 == case.values.len() {
                    next_case = Some(self.builder().emit_jump(Opcode::JumpNotTruthy));
                } else {
                    let try_next = self.builder().emit_jump(Opcode::JumpNotTruthy);
                    body_jumps.push(self.builder().emit_jump(Opcode::Jump));
                    self.builder().patch_jump(try_next);
                }
            }
            for label in body_jumps {
                self.builder().patch_jump(label);
            }
            self.compile_block(&case.body)?;
            end_jumps.push(self.builder().emit_jump(Opcode::Jump));
            if let Some(label) = next_case {
                self.builder().patch_jump(label);
            }
        }

        if let Some(default) = default {
            self.builder().set_position(pos);
            self.compile_block(default)?;
        }
        for label in end_jumps {
            self.builder().patch_jump(label);
        }

        let breakable = self.scope().breakables.pop().expect("switch context");
        // A switch has no continue target; continues inside it belong to an
        // enclosing loop and were recorded there instead.
        for label in breakable.breaks {
            self.builder().patch_jump(label);
        }
        Ok(())
    }

    fn compile_try(
        &mut self,
        body: &Block,
        catch: Option<&CatchClause>,
        finally: Option<&Block>,
        pos: Position,
    ) -> Result<(), CompileError> {
        self.builder().set_position(pos);
        let catch_label = if catch.is_some() {
            Some(self.builder().emit_try())
        } else {
            self.builder().emit_try_no_catch();
            None
        };
        let finally_labels = finally.map(|_| self.builder().emit_try_finally());

        self.compile_block(body)?;
        self.builder().emit(Opcode::EndTry);
        let mut normal_exits = vec![self.builder().emit_jump(Opcode::Jump)];

        if let (Some(catch), Some(catch_label)) = (catch, catch_label) {
            self.builder().patch_jump(catch_label);
            // The unwinder left the caught error on the stack.
            self.compile_store_target(&catch.name, pos)?;
            self.compile_block(&catch.body)?;
            normal_exits.push(self.builder().emit_jump(Opcode::Jump));
        }

        match (finally, finally_labels) {
            (Some(finally_block), Some((finally_label, after_label))) => {
                // Normal completion of the try body or catch body enters the
                // finally through EndFinally, which pops the runtime entry;
                // the unwinder pops the entry itself and resumes just past it.
                self.builder().patch_jump(finally_label);
                let finally_offset = self.builder().current_offset();
                for label in normal_exits {
                    self.builder().patch_jump_to(label, finally_offset);
                }
                self.builder().emit(Opcode::EndFinally);
                self.compile_block(finally_block)?;
                self.builder().emit(Opcode::RethrowPending);
                self.builder().patch_jump(after_label);
            }
            _ => {
                for label in normal_exits {
                    self.builder().patch_jump(label);
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Functions and defer
    // ========================================================================

    fn compile_function(
        &mut self,
        params: &[String],
        body: &Block,
        name: Option<&str>,
        pos: Position,
    ) -> Result<(), CompileError> {
        if params.len() > MAX_CALL_ARGS {
            return Err(CompileError::new(
                format!("more than {MAX_CALL_ARGS} parameters"),
                pos,
            ));
        }

        self.enter_scope();
        if let Some(name) = name {
            self.symbols.define_function_name(name);
        }
        for param in params {
            self.symbols.define(param);
        }
        self.compile_block(body)?;
        if !(self.builder().last_op_is(Opcode::Return)
            || self.builder().last_op_is(Opcode::ReturnValue))
        {
            self.builder().emit(Opcode::Return);
        }
        let (builder, free_symbols, num_locals) = self.leave_scope();

        if usize::from(num_locals) > MAX_LOCALS {
            return Err(CompileError::new(
                format!("more than {MAX_LOCALS} local variables in function"),
                pos,
            ));
        }
        if free_symbols.len() > MAX_CALL_ARGS {
            return Err(CompileError::new(
                format!("more than {MAX_CALL_ARGS} captured variables"),
                pos,
            ));
        }

        let fn_name: Rc<str> = match name {
            Some(name) => name.into(),
            None => format!("<anon@{}:{}>", pos.line, pos.column).into(),
        };
        let (instructions, positions) = builder.into_parts();
        let func = CompiledFunction::new(
            instructions,
            params.len(),
            usize::from(num_locals),
            fn_name,
            self.file.clone(),
            positions,
        );
        let func_const = self.add_constant(Value::Function(Rc::new(func)));

        // Push each captured cell (or value to promote) in recording order.
        let free_count = u8::try_from(free_symbols.len()).expect("free count fits u8");
        for free_sym in &free_symbols {
            match free_sym.scope {
                SymbolScope::Local => {
                    let slot = u8::try_from(free_sym.index).expect("local slot exceeds u8");
                    self.builder().emit_u8(Opcode::GetLocalCell, slot);
                }
                SymbolScope::Free => {
                    let idx = u8::try_from(free_sym.index).expect("free index exceeds u8");
                    self.builder().emit_u8(Opcode::GetFreeCell, idx);
                }
                SymbolScope::Global => {
                    self.builder().emit_u16(Opcode::GetGlobal, free_sym.index);
                }
                SymbolScope::Function => self.builder().emit(Opcode::CurrentClosure),
                SymbolScope::Builtin => {
                    unreachable!("builtins resolve directly and are never captured")
                }
            }
        }
        self.builder().set_position(pos);
        self.builder()
            .emit_u16_u8(Opcode::Closure, func_const, free_count);
        Ok(())
    }

    fn compile_defer(&mut self, call: &Expr, pos: Position) -> Result<(), CompileError> {
        let ExprKind::Call { callee, args } = &call.kind else {
            return Err(CompileError::new("defer requires a call expression", pos));
        };
        self.compile_expr(callee)?;
        let (argc, any_spread) = self.compile_call_args(args, pos)?;
        self.builder().set_position(pos);
        if any_spread {
            self.builder().emit_u8(Opcode::DeferSpread, argc);
        } else {
            self.builder().emit_u8(Opcode::Defer, argc);
        }
        Ok(())
    }

    // ========================================================================
    // Expression compilation
    // ========================================================================

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        self.builder().set_position(expr.pos);
        match &expr.kind {
            ExprKind::Ident(name) => {
                let sym = self.symbols.resolve(name).ok_or_else(|| {
                    CompileError::new(format!("undefined variable \"{name}\""), expr.pos)
                })?;
                self.load_symbol(&sym);
            }

            ExprKind::Int(n) => {
                let idx = self.add_constant(Value::Int(*n));
                self.builder().emit_u16(Opcode::Constant, idx);
            }
            ExprKind::Float(f) => {
                let idx = self.add_constant(Value::Float(*f));
                self.builder().emit_u16(Opcode::Constant, idx);
            }
            ExprKind::Str(s) => {
                let idx = self.add_string_constant(s);
                self.builder().emit_u16(Opcode::Constant, idx);
            }
            ExprKind::Bool(true) => self.builder().emit(Opcode::True),
            ExprKind::Bool(false) => self.builder().emit(Opcode::False),
            ExprKind::Nil => self.builder().emit(Opcode::Nil),

            ExprKind::List(items) => {
                let count = self.compile_expr_list(items, expr.pos)?;
                self.builder().set_position(expr.pos);
                self.builder().emit_u16(Opcode::Array, count);
            }
            ExprKind::Tuple(items) => {
                let count = self.compile_expr_list(items, expr.pos)?;
                self.builder().set_position(expr.pos);
                self.builder().emit_u16(Opcode::Tuple, count);
            }
            ExprKind::Dict(entries) => {
                for entry in entries {
                    match entry {
                        DictEntry::Pair(key, value) => {
                            self.compile_expr(key)?;
                            self.compile_expr(value)?;
                        }
                        DictEntry::Shorthand(name) => {
                            let key_const = self.add_string_constant(name);
                            self.builder().emit_u16(Opcode::Constant, key_const);
                            let ident = Expr::new(ExprKind::Ident(name.clone()), expr.pos);
                            self.compile_expr(&ident)?;
                        }
                    }
                }
                let count = u16::try_from(entries.len())
                    .map_err(|_| CompileError::new("dict literal too large", expr.pos))?;
                self.builder().set_position(expr.pos);
                self.builder().emit_u16(Opcode::Dict, count);
            }

            ExprKind::ListComp {
                element,
                var,
                iterable,
                filter,
            } => self.compile_list_comp(element, var, iterable, filter.as_deref(), expr.pos)?,

            ExprKind::Prefix { op, operand } => {
                self.compile_expr(operand)?;
                self.builder().set_position(expr.pos);
                self.builder().emit(match op {
                    PrefixOp::Neg => Opcode::Neg,
                    PrefixOp::Not => Opcode::Not,
                    PrefixOp::BitNot => Opcode::BitNot,
                });
            }

            ExprKind::Infix { left, op, right } => {
                self.compile_infix(left, *op, right, expr.pos)?;
            }

            ExprKind::Conditional { cond, then, alt } => {
                self.compile_expr(cond)?;
                let jump_else = self.builder().emit_jump(Opcode::JumpNotTruthy);
                self.compile_expr(then)?;
                let jump_end = self.builder().emit_jump(Opcode::Jump);
                self.builder().patch_jump(jump_else);
                self.compile_expr(alt)?;
                self.builder().patch_jump(jump_end);
            }

            ExprKind::Member { object, member } => {
                self.compile_expr(object)?;
                let name_const = self.add_string_constant(member);
                self.builder().set_position(expr.pos);
                self.builder().emit_u16(Opcode::GetMember, name_const);
            }

            ExprKind::Index { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.builder().set_position(expr.pos);
                self.builder().emit(Opcode::Index);
            }

            ExprKind::SliceExpr {
                object,
                low,
                high,
                step,
            } => {
                self.compile_expr(object)?;
                for bound in [low, high, step] {
                    match bound {
                        Some(bound) => self.compile_expr(bound)?,
                        None => self.builder().emit(Opcode::Nil),
                    }
                }
                self.builder().set_position(expr.pos);
                self.builder().emit(Opcode::Slice);
            }

            ExprKind::Call { callee, args } => {
                if let ExprKind::Member { object, member } = &callee.kind {
                    // Member call: dispatch through the receiver.
                    self.compile_expr(object)?;
                    let name_const = self.add_string_constant(member);
                    let (argc, any_spread) = self.compile_call_args(args, expr.pos)?;
                    self.builder().set_position(expr.pos);
                    if any_spread {
                        self.builder()
                            .emit_u16_u8(Opcode::CallMethodSpread, name_const, argc);
                    } else {
                        self.builder()
                            .emit_u16_u8(Opcode::CallMethod, name_const, argc);
                    }
                } else {
                    self.compile_expr(callee)?;
                    let (argc, any_spread) = self.compile_call_args(args, expr.pos)?;
                    self.builder().set_position(expr.pos);
                    if any_spread {
                        self.builder().emit_u8(Opcode::CallSpread, argc);
                    } else {
                        self.builder().emit_u8(Opcode::Call, argc);
                    }
                }
            }

            ExprKind::Spread(_) => {
                return Err(CompileError::new(
                    "spread is only allowed in call arguments",
                    expr.pos,
                ));
            }

            ExprKind::FunctionLit { params, body } => {
                self.compile_function(params, body, None, expr.pos)?;
            }

            ExprKind::Template { parts, exprs, tag } => {
                self.compile_template(parts, exprs, tag.as_deref(), expr.pos)?;
            }

            ExprKind::Match {
                subject,
                arms,
                default,
            } => self.compile_match(subject, arms, default.as_deref(), expr.pos)?,

            ExprKind::AssignExpr { name, op, value } => {
                self.compile_named_assign(name, *op, value, expr.pos)?;
            }
        }
        Ok(())
    }

    /// Compiles a plain expression list (no spreads), returning the count.
    fn compile_expr_list(&mut self, items: &[Expr], pos: Position) -> Result<u16, CompileError> {
        for item in items {
            self.compile_expr(item)?;
        }
        u16::try_from(items.len()).map_err(|_| CompileError::new("literal too large", pos))
    }

    /// Compiles call arguments, wrapping spread expressions, and returns
    /// `(argc, any_spread)`.
    fn compile_call_args(&mut self, args: &[Expr], pos: Position) -> Result<(u8, bool), CompileError> {
        if args.len() > MAX_CALL_ARGS {
            return Err(CompileError::new(
                format!("more than {MAX_CALL_ARGS} arguments in function call"),
                pos,
            ));
        }
        let mut any_spread = false;
        for arg in args {
            if let ExprKind::Spread(inner) = &arg.kind {
                self.compile_expr(inner)?;
                self.builder().set_position(arg.pos);
                self.builder().emit(Opcode::Spread);
                any_spread = true;
            } else {
                self.compile_expr(arg)?;
            }
        }
        let argc = u8::try_from(args.len()).expect("argument count checked above");
        Ok((argc, any_spread))
    }

    fn compile_infix(
        &mut self,
        left: &Expr,
        op: InfixOp,
        right: &Expr,
        pos: Position,
    ) -> Result<(), CompileError> {
        match op {
            InfixOp::And => {
                // Short-circuit: a falsy left operand yields false without
                // evaluating the right operand.
                self.compile_expr(left)?;
                let jump_false = self.builder().emit_jump(Opcode::JumpNotTruthy);
                self.compile_expr(right)?;
                let jump_end = self.builder().emit_jump(Opcode::Jump);
                self.builder().patch_jump(jump_false);
                self.builder().emit(Opcode::False);
                self.builder().patch_jump(jump_end);
            }
            InfixOp::Or => {
                self.compile_expr(left)?;
                let jump_rhs = self.builder().emit_jump(Opcode::JumpNotTruthy);
                self.builder().emit(Opcode::True);
                let jump_end = self.builder().emit_jump(Opcode::Jump);
                self.builder().patch_jump(jump_rhs);
                self.compile_expr(right)?;
                self.builder().patch_jump(jump_end);
            }
            InfixOp::NullCoalesce => {
                // JumpIfNil peeks: a non-nil left operand survives on the
                // stack and the right operand is never evaluated.
                self.compile_expr(left)?;
                let jump_rhs = self.builder().emit_jump(Opcode::JumpIfNil);
                let jump_end = self.builder().emit_jump(Opcode::Jump);
                self.builder().patch_jump(jump_rhs);
                self.builder().emit(Opcode::Pop);
                self.compile_expr(right)?;
                self.builder().patch_jump(jump_end);
            }
            _ => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.builder().set_position(pos);
                self.builder().emit(infix_opcode(op));
            }
        }
        Ok(())
    }

    fn compile_list_comp(
        &mut self,
        element: &Expr,
        var: &str,
        iterable: &Expr,
        filter: Option<&Expr>,
        pos: Position,
    ) -> Result<(), CompileError> {
        self.compile_expr(iterable)?;
        self.builder().set_position(pos);
        self.builder().emit(Opcode::IterInitComp);
        let t_iter = self.symbols.define_temp("comp");
        self.store_symbol(&t_iter);

        self.builder().emit_u16(Opcode::Array, 0);
        let t_acc = self.symbols.define_temp("acc");
        self.store_symbol(&t_acc);

        let loop_start = self.builder().current_offset();
        self.load_symbol(&t_iter);
        self.builder().emit(Opcode::IterNext);
        let jump_cleanup = self.builder().emit_jump(Opcode::JumpNotTruthy);
        self.compile_store_target(var, pos)?;

        if let Some(filter) = filter {
            self.compile_expr(filter)?;
            self.builder()
                .emit_jump_to(Opcode::JumpNotTruthy, loop_start);
        }

        self.load_symbol(&t_acc);
        self.compile_expr(element)?;
        self.builder().emit(Opcode::ArrayAppend);
        self.builder().emit(Opcode::Pop);
        self.builder().emit_jump_to(Opcode::Jump, loop_start);

        self.builder().patch_jump(jump_cleanup);
        self.builder().emit(Opcode::Pop);
        self.load_symbol(&t_acc);
        Ok(())
    }

    fn compile_match(
        &mut self,
        subject: &Expr,
        arms: &[MatchArm],
        default: Option<&Expr>,
        pos: Position,
    ) -> Result<(), CompileError> {
        let t_subject = self.symbols.define_temp("match");
        self.compile_expr(subject)?;
        self.store_symbol(&t_subject);

        let mut end_jumps = Vec::new();
        for arm in arms {
            let mut next_arm = None;
            let mut body_jumps = Vec::new();
            for (i, alt) in arm.values.iter().enumerate() {
                self.load_symbol(&t_subject);
                self.compile_expr(alt)?;
                self.builder().emit(Opcode::Eq);
                if i + 1 == arm.values.len() {
                    next_arm = Some(self.builder().emit_jump(Opcode::JumpNotTruthy));
                } else {
                    let try_next = self.builder().emit_jump(Opcode::JumpNotTruthy);
                    body_jumps.push(self.builder().emit_jump(Opcode::Jump));
                    self.builder().patch_jump(try_next);
                }
            }
            for label in body_jumps {
                self.builder().patch_jump(label);
            }
            self.compile_expr(&arm.body)?;
            end_jumps.push(self.builder().emit_jump(Opcode::Jump));
            if let Some(label) = next_arm {
                self.builder().patch_jump(label);
            }
        }

        self.builder().set_position(pos);
        match default {
            Some(default) => self.compile_expr(default)?,
            None => self.builder().emit(Opcode::Nil),
        }
        for label in end_jumps {
            self.builder().patch_jump(label);
        }
        Ok(())
    }

    fn compile_template(
        &mut self,
        parts: &[String],
        exprs: &[Expr],
        tag: Option<&Expr>,
        pos: Position,
    ) -> Result<(), CompileError> {
        debug_assert_eq!(parts.len(), exprs.len() + 1, "template shape");
        match tag {
            Some(tag) => {
                // Tagged template: tag(parts_tuple, e0, e1, ...).
                self.compile_expr(tag)?;
                for part in parts {
                    let idx = self.add_string_constant(part);
                    self.builder().emit_u16(Opcode::Constant, idx);
                }
                let part_count = u16::try_from(parts.len())
                    .map_err(|_| CompileError::new("template literal too large", pos))?;
                self.builder().emit_u16(Opcode::Tuple, part_count);
                for expr in exprs {
                    self.compile_expr(expr)?;
                }
                let argc = u8::try_from(1 + exprs.len())
                    .map_err(|_| CompileError::new("template literal too large", pos))?;
                self.builder().set_position(pos);
                self.builder().emit_u8(Opcode::Call, argc);
            }
            None => {
                // Plain template: concatenate parts with str(e) in between.
                let idx = self.add_string_constant(&parts[0]);
                self.builder().emit_u16(Opcode::Constant, idx);
                for (expr, part) in exprs.iter().zip(&parts[1..]) {
                    self.builder().emit_u8(Opcode::GetBuiltin, BuiltinFn::Str.index());
                    self.compile_expr(expr)?;
                    self.builder().emit_u8(Opcode::Call, 1);
                    self.builder().emit(Opcode::Add);
                    let idx = self.add_string_constant(part);
                    self.builder().emit_u16(Opcode::Constant, idx);
                    self.builder().emit(Opcode::Add);
                }
            }
        }
        Ok(())
    }
}

/// Maps a compound-assignment operator to its binary opcode.
fn compound_opcode(op: AssignOp) -> Opcode {
    match op {
        AssignOp::Add => Opcode::Add,
        AssignOp::Sub => Opcode::Sub,
        AssignOp::Mul => Opcode::Mul,
        AssignOp::Div => Opcode::Div,
        AssignOp::Mod => Opcode::Mod,
        AssignOp::BitOr => Opcode::DictUpdate,
        AssignOp::Assign | AssignOp::Walrus => unreachable!("not a compound operator"),
    }
}

/// Maps a non-short-circuiting infix operator to its opcode.
fn infix_opcode(op: InfixOp) -> Opcode {
    match op {
        InfixOp::Add => Opcode::Add,
        InfixOp::Sub => Opcode::Sub,
        InfixOp::Mul => Opcode::Mul,
        InfixOp::Div => Opcode::Div,
        InfixOp::Mod => Opcode::Mod,
        InfixOp::BitOr => Opcode::BitOr,
        InfixOp::BitAnd => Opcode::BitAnd,
        InfixOp::BitXor => Opcode::BitXor,
        InfixOp::Shl => Opcode::Shl,
        InfixOp::Shr => Opcode::Shr,
        InfixOp::Eq => Opcode::Eq,
        InfixOp::NotEq => Opcode::NotEq,
        InfixOp::Lt => Opcode::Lt,
        InfixOp::Le => Opcode::Le,
        InfixOp::Gt => Opcode::Gt,
        InfixOp::Ge => Opcode::Ge,
        InfixOp::Is => Opcode::Is,
        InfixOp::In => Opcode::In,
        InfixOp::And | InfixOp::Or | InfixOp::NullCoalesce => {
            unreachable!("short-circuit operators compile to jumps")
        }
    }
}

/// Derives a binding name from a module path: the basename without its
/// extension.
fn module_basename(path: &str) -> String {
    let base = path.rsplit('/').next().unwrap_or(path);
    match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => base.to_string(),
    }
}
