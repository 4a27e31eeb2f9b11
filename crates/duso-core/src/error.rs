//! The runtime's own error taxonomy, distinct from [`crate::eval::Signal`].
//!
//! `RuntimeError` formats the handful of conditions the evaluator itself
//! raises as `error` values (position-tagged messages, unresolved
//! identifiers, calling a non-callable) — see `Evaluator::raise` and
//! `raise_const` in `eval.rs`, which turn one of these into a
//! `Signal::Throw`. Resolver, parse, and datastore failures keep their own
//! error types end to end and are never funneled through this one.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{file}:{line}:{col}: {message}")]
    Runtime {
        file: String,
        line: usize,
        col: usize,
        message: String,
    },

    #[error("unresolved identifier '{0}'")]
    UnresolvedIdent(String),

    #[error("value of type '{0}' is not callable")]
    NotCallable(&'static str),
}

impl RuntimeError {
    pub fn at(file: &str, line: usize, col: usize, message: impl Into<String>) -> Self {
        RuntimeError::Runtime {
            file: file.to_string(),
            line,
            col,
            message: message.into(),
        }
    }
}
