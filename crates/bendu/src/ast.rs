//! The surface AST consumed by the type inferencer.
//!
//! Per spec.md §1/§6 the lexer/parser is an external collaborator: this
//! module only commits to the *shape* the parser hands the inferencer. It
//! is deliberately small — no precedence climbing, no concrete-syntax
//! trivia, just the semantic skeleton from spec.md §4.1 and §3.
//!
//! Spans are carried on every node so type errors can point at the
//! expression that produced a constraint (spec.md §7: "Unification
//! failures attach the source location of the subexpression that
//! generated the constraint").

use std::fmt;

use serde::{Deserialize, Serialize};

/// A half-open source range, `[start, end)` byte offsets into one file.
///
/// Intentionally does not carry a filename: a `Span` is only ever
/// interpreted in the context of the `Package`/source-id that owns the AST,
/// the way the teacher's `CodeRange` carries a `StringId` filename alongside
/// byte offsets for the same reason (traceback rendering needs both, but a
/// span by itself is file-relative).
///
/// Derives `Serialize`/`Deserialize` along with every other node in this
/// module: the parser that produces this AST is an external collaborator
/// (spec.md §1/§218), and the CLI's `compile`/`dis --file` subcommands
/// consume its output as postcard-encoded bytes rather than parsing source
/// text themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub const DUMMY: Span = Span { start: 0, end: 0 };

    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span { start: self.start.min(other.start), end: self.end.max(other.end) }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A literal value as it appears in source, before type assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i32),
    Float(f32),
    Char(u8),
    String(String),
    Bool(bool),
    Unit,
}

/// Binary operators; spec.md §4.1 groups these by the type-class-like
/// constraint they impose rather than by concrete-syntax precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

/// A surface-level type annotation, resolved against the alias registry and
/// type-declaration table during inference (spec.md §4.1, "Type
/// annotations").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeExpr {
    Con(String, Vec<TypeExpr>),
    Var(String),
    Arrow(Vec<TypeExpr>, Box<TypeExpr>),
    Tuple(Vec<TypeExpr>),
    Record { fields: Vec<(String, TypeExpr)>, rest: Option<String> },
    Union(Vec<TypeExpr>),
    Intersect(Vec<TypeExpr>),
    LitString(String),
}

/// A pattern as used in `match` arms and `let` destructuring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pattern {
    Wildcard,
    Var(String),
    Literal(Literal),
    Tuple(Vec<Pattern>),
    Record { fields: Vec<(String, Pattern)>, rest: bool },
    Constructor { name: String, args: Vec<Pattern> },
    Annotated(Box<Pattern>, TypeExpr),
}

/// One `match` arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Expr,
}

/// A single named parameter in a lambda or `let`-bound function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub annotation: Option<TypeExpr>,
    pub span: Span,
}

/// An import clause: `import foo`, `import foo as f`, or
/// `from foo import (a, b as c)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImportKind {
    Unqualified,
    Qualified(String),
    Selective(Vec<(String, Option<String>)>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    pub path: String,
    pub kind: ImportKind,
    pub span: Span,
}

/// A constructor declaration inside a `type` definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtorDecl {
    pub name: String,
    pub fields: Vec<TypeExpr>,
    pub span: Span,
}

/// A top-level `type` declaration: an ADT or a type alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeDecl {
    Adt { name: String, params: Vec<String>, ctors: Vec<CtorDecl> },
    Alias { name: String, params: Vec<String>, body: TypeExpr },
}

/// One expression node. Every case here corresponds to a constraint-
/// generation rule in spec.md §4.1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(Literal),
    Var(String),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Apply(Box<Expr>, Vec<Expr>),
    Lambda { params: Vec<Param>, body: Box<Expr> },
    Let { name: String, mutable: bool, recursive: bool, value: Box<Expr>, body: Box<Expr> },
    If { cond: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
    Match { scrutinee: Box<Expr>, arms: Vec<MatchArm> },
    RecordLit { fields: Vec<(String, Expr)>, spread: Option<Box<Expr>> },
    FieldAccess(Box<Expr>, String),
    Tuple(Vec<Expr>),
    ArrayLit(Vec<Expr>),
    ArrayIndex(Box<Expr>, Box<Expr>),
    ArraySlice { array: Box<Expr>, from: Option<Box<Expr>>, to: Option<Box<Expr>> },
    Annotated(Box<Expr>, TypeExpr),
    Block(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// A top-level `let` binding; `public` corresponds to `let … *` in spec.md §4.3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LetDecl {
    pub name: String,
    pub mutable: bool,
    pub public: bool,
    pub recursive: bool,
    pub annotation: Option<TypeExpr>,
    pub value: Expr,
    pub span: Span,
}

/// One top-level item in a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item {
    Import(Import),
    Type(TypeDecl),
    Let(LetDecl),
    Expr(Expr),
}

/// A whole compilation unit handed to the inferencer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub items: Vec<Item>,
}

/// Deserializes a postcard-encoded [`Module`] — the form the external
/// parser collaborator's output takes once it crosses into this pipeline
/// (spec.md §1/§218: the lexer/parser itself is out of scope here).
pub fn decode_module(bytes: &[u8]) -> postcard::Result<Module> {
    postcard::from_bytes(bytes)
}

/// Encodes a [`Module`] to the same postcard form [`decode_module`] reads
/// back — used by test fixtures and by any front end that wants to hand
/// this pipeline an already-parsed module on disk.
pub fn encode_module(module: &Module) -> postcard::Result<Vec<u8>> {
    postcard::to_allocvec(module)
}

/// Deserializes a single postcard-encoded [`Expr`] (the `bendu dis
/// --expression`/`bendu test --expression` CLI argument shape: a standalone
/// expression, not a whole module, hex-encoded so it can travel as one
/// `argv` entry — see `DESIGN.md` for why).
pub fn decode_expr(bytes: &[u8]) -> postcard::Result<Expr> {
    postcard::from_bytes(bytes)
}

pub fn encode_expr(expr: &Expr) -> postcard::Result<Vec<u8>> {
    postcard::to_allocvec(expr)
}
