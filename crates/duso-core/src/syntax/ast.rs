//! The abstract syntax tree the evaluator walks. Produced by [`super::parser`].
//!
//! Every node is plain, `Send + Sync` data (no interior mutability, no
//! `Rc`) so a parsed [`Block`] can be shared by `Arc` across goroutines —
//! the AST itself is immutable after parsing and is exactly the kind of
//! thing the module cache and closures want to share cheaply.

use std::sync::Arc;

pub type Block = Vec<Spanned<Stmt>>;

/// A statement tagged with its source position, so the evaluator can
/// report `file:line:col` on errors and construct call-stack frames
/// without threading a span through every expression node.
#[derive(Debug, Clone)]
pub struct Spanned<T> {
    pub node: T,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    VarDecl(String, Expr),
    Assign(AssignTarget, Expr),
    If {
        cond: Expr,
        then_block: Block,
        else_block: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    ForRange {
        var: String,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
        body: Block,
    },
    ForIn {
        var: String,
        iter: Expr,
        body: Block,
    },
    FunctionDecl {
        name: String,
        params: Vec<String>,
        body: Arc<Block>,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Throw(Expr),
    TryCatch {
        try_block: Block,
        catch_var: String,
        catch_block: Block,
    },
    Block(Block),
}

#[derive(Debug, Clone)]
pub enum AssignTarget {
    Ident(String),
    Index(Expr, Expr),
    Field(Expr, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone)]
pub enum StrPart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Nil,
    Number(f64),
    Bool(bool),
    /// A string literal. `raw` strings have exactly one `Text` part and
    /// skip template evaluation entirely; other strings are re-evaluated
    /// (the parts are parsed once, at parse time) every time the literal
    /// is reached.
    Str {
        parts: Arc<Vec<StrPart>>,
        raw: bool,
    },
    Ident(String),
    ArrayLit(Vec<Expr>),
    ObjectLit(Vec<(String, Expr)>),
    FunctionLit {
        name: Option<String>,
        params: Vec<String>,
        body: Arc<Block>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    MethodCall {
        receiver: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Index {
        receiver: Box<Expr>,
        index: Box<Expr>,
    },
    Field {
        receiver: Box<Expr>,
        name: String,
    },
}
