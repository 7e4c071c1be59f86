//! Abstract Syntax Tree for Slug
//!
//! Plain data produced by the parser and consumed by the evaluator. Every
//! node carries the position of its first token so runtime errors can point
//! back into the source.

use slug_core::Dec64;
use std::fmt;

/// Source position (0-indexed line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Position { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line + 1, self.column + 1)
    }
}

/// A parsed source file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

/// A brace-delimited statement list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub statements: Vec<Stmt>,
}

/// A tag annotation such as `@export` or `@deprecated("use other")`.
#[derive(Debug, Clone, PartialEq)]
pub struct TagSpec {
    pub name: String,
    pub args: Vec<Expr>,
    pub pos: Position,
}

/// A function parameter: plain, defaulted, or variadic (`...rest`).
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
    pub variadic: bool,
}

/// A call argument, optionally a `...list` spread.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub expr: Expr,
    pub spread: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `let pattern = value` / `const pattern = value`, with leading tags.
    Let {
        pattern: Pattern,
        value: Expr,
        constant: bool,
        tags: Vec<TagSpec>,
        pos: Position,
    },
    /// `fn name(params) { body }` — named function definition. Kept apart
    /// from `Let` so redefinition with a new signature extends a group.
    Function {
        name: String,
        func: Expr,
        tags: Vec<TagSpec>,
        pos: Position,
    },
    /// `foreign fn name(params)` — binds a native function from the
    /// process-wide foreign registry under the enclosing module's FQN.
    Foreign {
        name: String,
        params: Vec<Param>,
        tags: Vec<TagSpec>,
        pos: Position,
    },
    Return {
        value: Option<Expr>,
        pos: Position,
    },
    /// `defer call(...)` — registered on the current frame, run LIFO on exit.
    Defer {
        call: Expr,
        pos: Position,
    },
    Throw {
        value: Expr,
        pos: Position,
    },
    Expr {
        expr: Expr,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    /// `!` logical not
    Not,
    /// `-` numeric negation
    Neg,
    /// `~` bitwise/byte-wise not
    BitNot,
}

impl fmt::Display for PrefixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrefixOp::Not => "!",
            PrefixOp::Neg => "-",
            PrefixOp::BitNot => "~",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    /// `list :+ elem`
    Append,
    /// `elem +: list`
    Prepend,
}

impl fmt::Display for InfixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InfixOp::Add => "+",
            InfixOp::Sub => "-",
            InfixOp::Mul => "*",
            InfixOp::Div => "/",
            InfixOp::Rem => "%",
            InfixOp::BitAnd => "&",
            InfixOp::BitOr => "|",
            InfixOp::BitXor => "^",
            InfixOp::Shl => "<<",
            InfixOp::Shr => ">>",
            InfixOp::Lt => "<",
            InfixOp::Gt => ">",
            InfixOp::Le => "<=",
            InfixOp::Ge => ">=",
            InfixOp::Eq => "==",
            InfixOp::Ne => "!=",
            InfixOp::And => "&&",
            InfixOp::Or => "||",
            InfixOp::Append => ":+",
            InfixOp::Prepend => "+:",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number {
        value: Dec64,
        pos: Position,
    },
    Str {
        value: String,
        pos: Position,
    },
    Bytes {
        value: Vec<u8>,
        pos: Position,
    },
    Bool {
        value: bool,
        pos: Position,
    },
    Nil {
        pos: Position,
    },
    Ident {
        name: String,
        pos: Position,
    },
    List {
        elements: Vec<Expr>,
        pos: Position,
    },
    MapLit {
        entries: Vec<(Expr, Expr)>,
        pos: Position,
    },
    Prefix {
        op: PrefixOp,
        rhs: Box<Expr>,
        pos: Position,
    },
    Infix {
        op: InfixOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: Position,
    },
    /// `target = value`. Only identifier targets are assignable; the
    /// evaluator rejects everything else.
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        pos: Position,
    },
    If {
        cond: Box<Expr>,
        then: Block,
        alt: Option<Block>,
        pos: Position,
    },
    /// Function literal. `has_tail_call` is set by the tail-position pass.
    Function {
        name: Option<String>,
        params: Vec<Param>,
        body: Block,
        has_tail_call: bool,
        pos: Position,
    },
    /// Call. `tail` is set by the tail-position pass when the call is the
    /// last evaluated expression of a function body.
    Call {
        callee: Box<Expr>,
        args: Vec<Arg>,
        tail: bool,
        pos: Position,
    },
    /// `recur(args)` — tail call to the innermost enclosing function.
    Recur {
        args: Vec<Arg>,
        pos: Position,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
        pos: Position,
    },
    /// `target[start:end:step]` with any part omitted.
    SliceExpr {
        target: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
        pos: Position,
    },
    Match {
        subject: Box<Expr>,
        cases: Vec<MatchCase>,
        pos: Position,
    },
    /// `try { ... } catch { pattern => ... }`.
    TryCatch {
        body: Block,
        cases: Vec<MatchCase>,
        pos: Position,
    },
}

impl Expr {
    pub fn pos(&self) -> Position {
        match self {
            Expr::Number { pos, .. }
            | Expr::Str { pos, .. }
            | Expr::Bytes { pos, .. }
            | Expr::Bool { pos, .. }
            | Expr::Nil { pos }
            | Expr::Ident { pos, .. }
            | Expr::List { pos, .. }
            | Expr::MapLit { pos, .. }
            | Expr::Prefix { pos, .. }
            | Expr::Infix { pos, .. }
            | Expr::Assign { pos, .. }
            | Expr::If { pos, .. }
            | Expr::Function { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::Recur { pos, .. }
            | Expr::Index { pos, .. }
            | Expr::SliceExpr { pos, .. }
            | Expr::Match { pos, .. }
            | Expr::TryCatch { pos, .. } => *pos,
        }
    }
}

/// One `pattern [if guard] => body` arm of a match or catch.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCase {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Block,
    pub pos: Position,
}

/// A map-pattern entry: `key: pattern`, or shorthand `name` which binds the
/// value under the string key `"name"`.
#[derive(Debug, Clone, PartialEq)]
pub struct MapPatternEntry {
    pub key: Expr,
    pub pattern: Pattern,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// `_` — matches anything, binds nothing.
    Wildcard { pos: Position },
    /// `name` — binds the matched value.
    Ident { name: String, pos: Position },
    /// `^name` — compares against `name` resolved in the enclosing scope.
    Pin { name: String, pos: Position },
    /// A literal expression compared by value equality.
    Literal { expr: Expr, pos: Position },
    /// `...name` / `...` — binds the residue (list tail or map rest).
    Spread {
        name: Option<String>,
        pos: Position,
    },
    /// `[p1, p2, ...rest]` — also matches Bytes element-wise.
    List {
        elements: Vec<Pattern>,
        pos: Position,
    },
    /// `{k: p, ...rest}`, `{= k: p}` (exact), `{*}` (select-all).
    Map {
        entries: Vec<MapPatternEntry>,
        rest: Option<Option<String>>,
        exact: bool,
        select_all: bool,
        pos: Position,
    },
    /// `p1 | p2 | …` — first matching alternative wins.
    Alt {
        alternatives: Vec<Pattern>,
        pos: Position,
    },
}

impl Pattern {
    pub fn pos(&self) -> Position {
        match self {
            Pattern::Wildcard { pos }
            | Pattern::Ident { pos, .. }
            | Pattern::Pin { pos, .. }
            | Pattern::Literal { pos, .. }
            | Pattern::Spread { pos, .. }
            | Pattern::List { pos, .. }
            | Pattern::Map { pos, .. }
            | Pattern::Alt { pos, .. } => *pos,
        }
    }
}
