//! The Welle program tree consumed by the compiler.
//!
//! The lexer and parser live outside this crate; this module is the contract
//! they must produce. Every statement and expression carries the source
//! position of its defining token so compiled bytecode can map back to
//! source for stack traces.

/// A line/column pair, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    /// Creates a position.
    #[must_use]
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A parsed source file: the statement list plus the file name used in
/// stack traces.
#[derive(Debug, Clone)]
pub struct Program {
    pub statements: Vec<Stmt>,
    pub file: String,
}

impl Program {
    /// Creates a program for the given file name.
    #[must_use]
    pub fn new(file: impl Into<String>, statements: Vec<Stmt>) -> Self {
        Self {
            statements,
            file: file.into(),
        }
    }
}

/// A block of statements.
#[derive(Debug, Clone, Default)]
pub struct Block(pub Vec<Stmt>);

/// A statement with its source position.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub pos: Position,
}

impl Stmt {
    /// Creates a statement at the given position.
    #[must_use]
    pub fn new(kind: StmtKind, pos: Position) -> Self {
        Self { kind, pos }
    }
}

/// Assignment operator tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=`
    Assign,
    /// `:=` define-and-yield; redeclaration in the same scope is an error.
    Walrus,
    /// `+=`
    Add,
    /// `-=`
    Sub,
    /// `*=`
    Mul,
    /// `/=`
    Div,
    /// `%=`
    Mod,
    /// `|=` (dict in-place update for dicts, bitwise or for integers)
    BitOr,
}

/// One position in a destructuring target list.
#[derive(Debug, Clone)]
pub enum DestructureTarget {
    /// Bind to a name.
    Name(String),
    /// Starred target collecting the middle of the sequence.
    Star(String),
    /// `_` - discard the value.
    Discard,
}

/// One `case` of a `switch` statement.
#[derive(Debug, Clone)]
pub struct SwitchCase {
    /// Alternative values; the case matches if any compares equal.
    pub values: Vec<Expr>,
    pub body: Block,
}

/// The `catch (name) { ... }` clause of a try statement.
#[derive(Debug, Clone)]
pub struct CatchClause {
    pub name: String,
    pub body: Block,
}

/// Statement kinds.
#[derive(Debug, Clone)]
pub enum StmtKind {
    /// Expression statement; its value is discarded.
    Expr(Expr),
    /// `x = e`, `x += e`, `x := e`, ...
    Assign {
        name: String,
        op: AssignOp,
        value: Expr,
    },
    /// `(a, b, *c, d) = e`
    DestructureAssign {
        targets: Vec<DestructureTarget>,
        value: Expr,
    },
    /// `obj[idx] = e` and compound variants.
    IndexAssign {
        object: Expr,
        index: Expr,
        op: AssignOp,
        value: Expr,
    },
    /// `obj.member = e` and compound variants.
    MemberAssign {
        object: Expr,
        member: String,
        op: AssignOp,
        value: Expr,
    },
    /// `return` / `return e`
    Return(Option<Expr>),
    /// `defer f(args)` - `call` must be a call expression.
    Defer { call: Expr },
    /// `throw e`
    Throw(Expr),
    /// `pass`
    Pass,
    /// `break`
    Break,
    /// `continue`
    Continue,
    If {
        cond: Expr,
        then: Block,
        alt: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    /// C-style `for (init; cond; post) { body }`; all three heads optional.
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        post: Option<Box<Stmt>>,
        body: Block,
    },
    /// `for (k in xs)` / `for (k, v in d)` - the two-name form requires a Dict.
    ForIn {
        key: String,
        value: Option<String>,
        iterable: Expr,
        body: Block,
    },
    Switch {
        subject: Expr,
        cases: Vec<SwitchCase>,
        default: Option<Block>,
    },
    /// `try { .. } catch (e) { .. } finally { .. }`; at least one of
    /// catch/finally is present.
    Try {
        body: Block,
        catch: Option<CatchClause>,
        finally: Option<Block>,
    },
    /// Named function statement.
    Func {
        name: String,
        params: Vec<String>,
        body: Block,
    },
    /// `import "path"` / `import "path" as alias`
    Import { path: String, alias: Option<String> },
    /// `from "path" import a, b as c`
    FromImport {
        path: String,
        names: Vec<(String, Option<String>)>,
    },
    /// `export name`
    Export { name: String },
}

/// An expression with its source position.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Position,
}

impl Expr {
    /// Creates an expression at the given position.
    #[must_use]
    pub fn new(kind: ExprKind, pos: Position) -> Self {
        Self { kind, pos }
    }
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    /// `-`
    Neg,
    /// `!` / `not`
    Not,
    /// `~`
    BitNot,
}

/// Infix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitOr,
    BitAnd,
    BitXor,
    Shl,
    Shr,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Is,
    In,
    /// Short-circuiting `and`.
    And,
    /// Short-circuiting `or`.
    Or,
    /// Null-coalescing `??`: yields the right operand only when the left is nil.
    NullCoalesce,
}

/// One entry of a dict literal.
#[derive(Debug, Clone)]
pub enum DictEntry {
    /// `key: value`
    Pair(Expr, Expr),
    /// `{x}` shorthand for `"x": x`.
    Shorthand(String),
}

/// One arm of a `match` expression.
#[derive(Debug, Clone)]
pub struct MatchArm {
    /// Alternative values; the arm matches if any compares equal.
    pub values: Vec<Expr>,
    pub body: Expr,
}

/// Expression kinds.
#[derive(Debug, Clone)]
pub enum ExprKind {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Nil,
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<DictEntry>),
    /// `[e for x in s if f]`
    ListComp {
        element: Box<Expr>,
        var: String,
        iterable: Box<Expr>,
        filter: Option<Box<Expr>>,
    },
    Prefix {
        op: PrefixOp,
        operand: Box<Expr>,
    },
    Infix {
        left: Box<Expr>,
        op: InfixOp,
        right: Box<Expr>,
    },
    /// Ternary `cond ? then : alt`.
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        alt: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        member: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    /// `obj[low:high:step]`; any bound may be absent.
    SliceExpr {
        object: Box<Expr>,
        low: Option<Box<Expr>>,
        high: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// `*e` inside a call or defer argument list.
    Spread(Box<Expr>),
    /// `func (params) { body }`; the position locates the `func` token and
    /// names the function `<anon@L:C>` in stack traces.
    FunctionLit {
        params: Vec<String>,
        body: Block,
    },
    /// Template literal. `parts.len() == exprs.len() + 1`; a tagged template
    /// invokes `tag(parts_tuple, e0, e1, ...)` instead of concatenating.
    Template {
        parts: Vec<String>,
        exprs: Vec<Expr>,
        tag: Option<Box<Expr>>,
    },
    /// `match subject { v1, v2 => e, ... , _ => d }`
    Match {
        subject: Box<Expr>,
        arms: Vec<MatchArm>,
        default: Option<Box<Expr>>,
    },
    /// Assignment at expression position, including `:=` define-and-yield.
    AssignExpr {
        name: String,
        op: AssignOp,
        value: Box<Expr>,
    },
}
