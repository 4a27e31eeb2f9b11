//! The lexer/parser producing the AST the evaluator consumes. The
//! distilled specification treats this as an external collaborator; a
//! runnable workspace needs a concrete one, so this module supplies a
//! small, real recursive-descent implementation.

pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::{AssignTarget, BinaryOp, Block, Expr, Stmt, StrPart, UnaryOp};
pub use lexer::LexError;
pub use parser::{parse_program, ParseError};
