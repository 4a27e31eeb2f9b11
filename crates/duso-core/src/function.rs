//! The evaluator's concrete function representation: an AST body plus the
//! environment it closed over. `duso_value::Value::Function` only needs
//! the `Callable` trait object; the evaluator (the only code that ever
//! calls a function) downcasts back to this concrete type.

use crate::env::Environment;
use crate::syntax::ast::Block;
use duso_value::{Callable, Value};
use std::any::Any;
use std::sync::Arc;

#[derive(Debug)]
pub struct ScriptFunction {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Arc<Block>,
    pub closure: Environment,
}

impl Callable for ScriptFunction {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn arity(&self) -> usize {
        self.params.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ScriptFunction {
    /// Downcasts a generic `Callable` trait object back to a
    /// `ScriptFunction`. The only other concrete `Callable` this crate
    /// constructs is [`NativeMethod`], used for handles (datastore,
    /// `context().response()`) that need to expose Rust-implemented
    /// methods through the same `obj.method(...)` call syntax as a
    /// user-defined method.
    pub fn downcast(callable: &Arc<dyn Callable>) -> Option<&ScriptFunction> {
        callable.as_any().downcast_ref::<ScriptFunction>()
    }
}

/// The signature of a native method: receives the evaluator (for
/// recursive calls, e.g. a script-function `wait_for` predicate), the
/// receiver the method was called on, and the evaluated arguments.
/// Returns a [`crate::eval::Signal`] error path like any other call so
/// response builders can terminate the invocation via `Signal::Exit`
/// exactly the way `exit(...)` does.
pub type NativeFn = Arc<
    dyn Fn(&mut crate::eval::Evaluator, &Value, Vec<Value>) -> Result<Value, crate::eval::Signal>
        + Send
        + Sync,
>;

/// A Rust-implemented method installed as an object field so it is
/// callable through ordinary `handle.method(args)` syntax. Used for
/// datastore handles and `context().response()` builders — anything that
/// needs to expose native behavior through a script-facing object
/// without going through the global built-in table (which is keyed by
/// bare identifier, not by receiver).
pub struct NativeMethod {
    pub label: String,
    pub func: NativeFn,
}

impl std::fmt::Debug for NativeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<native {}>", self.label)
    }
}

impl Callable for NativeMethod {
    fn name(&self) -> Option<&str> {
        Some(&self.label)
    }

    fn arity(&self) -> usize {
        0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl NativeMethod {
    pub fn downcast(callable: &Arc<dyn Callable>) -> Option<&NativeMethod> {
        callable.as_any().downcast_ref::<NativeMethod>()
    }

    /// Builds a `Value::Function` wrapping a native closure, for
    /// installing as an object field.
    pub fn value(label: impl Into<String>, func: NativeFn) -> Value {
        Value::Function(Arc::new(NativeMethod { label: label.into(), func }))
    }
}
