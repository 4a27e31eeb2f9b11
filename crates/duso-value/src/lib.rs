//! The universal value representation shared by the evaluator, the
//! datastore, and everything that crosses a scope boundary between them.
//!
//! `Value` is deliberately the *only* currency these layers trade in: the
//! datastore stores `Value`s, the evaluator produces and consumes `Value`s,
//! and the invocation subsystem passes `Value`s across goroutine boundaries
//! via [`Value::deep_copy`]. Keeping one representation (rather than a
//! "scripting" value and a separate "storage" value) means deep copy is the
//! single place cross-scope isolation is enforced.

mod error;

pub use error::ErrorValue;

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// An object's field map. Insertion order is preserved for iteration, per
/// the language's object semantics.
pub type ObjectMap = IndexMap<String, Value>;

/// A callable value. The evaluator crate implements this for its own
/// function representation (AST body + captured [`Environment`]); this
/// crate only needs enough of the shape to store, compare, and deep-copy
/// function values without depending on the evaluator.
///
/// [`Environment`]: https://docs.rs/duso-core (not linkable from here; see duso_core::env::Environment)
pub trait Callable: fmt::Debug + Send + Sync {
    /// The function's declared name, if any (anonymous lambdas have none).
    fn name(&self) -> Option<&str>;
    /// Number of declared parameters.
    fn arity(&self) -> usize;
    /// Lets the evaluator downcast back to its concrete function
    /// representation (this crate only needs the shape above to store,
    /// compare, and deep-copy-strip function values).
    fn as_any(&self) -> &dyn std::any::Any;
}

/// A parsed-but-unexecuted program, optionally carrying user metadata.
/// Produced by the `parse(src)` built-in. Like [`Callable`], the concrete
/// AST representation lives in the evaluator crate; this crate only needs
/// the value-level shape (compared by identity, carried opaquely).
pub trait CodeObject: fmt::Debug + Send + Sync {
    /// Source text this code object was parsed from.
    fn source(&self) -> &str;
}

/// The tagged-sum value type of the language.
///
/// Arrays and objects are `Arc<Mutex<_>>`-backed so that a single `Value`
/// type can be shared between a single-goroutine evaluator (where aliasing
/// a mutable container is the expected in-scope behavior) and the
/// datastore (where `Value` must be `Send + Sync` to live behind a shared
/// mutex across many goroutines). `Value::clone()` is always a cheap
/// pointer clone; [`Value::deep_copy`] is the explicit, recursive,
/// function-stripping copy used at every scope boundary.
#[derive(Clone)]
pub enum Value {
    Nil,
    Number(f64),
    String(Arc<str>),
    Boolean(bool),
    Array(Arc<Mutex<Vec<Value>>>),
    Object(Arc<Mutex<ObjectMap>>),
    Function(Arc<dyn Callable>),
    Code(Arc<dyn CodeObject>),
    Error(Arc<ErrorValue>),
}

impl Value {
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(Mutex::new(items)))
    }

    pub fn object(map: ObjectMap) -> Self {
        Value::Object(Arc::new(Mutex::new(map)))
    }

    pub fn empty_array() -> Self {
        Value::array(Vec::new())
    }

    pub fn empty_object() -> Self {
        Value::object(ObjectMap::new())
    }

    pub fn error(value: Value, stack: impl Into<String>) -> Self {
        Value::Error(Arc::new(ErrorValue::new(value, stack)))
    }

    /// `type()` built-in's string tag for this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Boolean(_) => "boolean",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Code(_) => "code",
            Value::Error(_) => "error",
        }
    }

    /// Truthiness per the language's rules: `nil`, `false`, `0`, empty
    /// string, empty array, and empty object are falsy; everything else
    /// (including `error` values and non-empty containers) is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.lock().is_empty(),
            Value::Object(o) => !o.lock().is_empty(),
            Value::Function(_) | Value::Code(_) | Value::Error(_) => true,
        }
    }

    /// Structural equality on primitives, arrays, and objects; identity
    /// equality (same underlying allocation) on functions and code values.
    /// Errors compare by identity as well, since they are not meaningfully
    /// comparable structurally (their `stack` text is incidental).
    pub fn values_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.lock();
                let b = b.lock();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.values_equal(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.lock();
                let b = b.lock();
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|bv| v.values_equal(bv)))
            }
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Code(a), Value::Code(b)) => Arc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Recursively copies arrays and objects, passes primitives through,
    /// and collapses functions and code values to `nil` because their
    /// captured environments are not transportable across a scope
    /// boundary. This is the sole mechanism by which the runtime keeps
    /// goroutines from observing each other's mutations.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Nil => Value::Nil,
            Value::Number(n) => Value::Number(*n),
            Value::String(s) => Value::String(s.clone()),
            Value::Boolean(b) => Value::Boolean(*b),
            Value::Array(items) => {
                let copied: Vec<Value> = items.lock().iter().map(Value::deep_copy).collect();
                Value::array(copied)
            }
            Value::Object(map) => {
                let copied: ObjectMap = map
                    .lock()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy()))
                    .collect();
                Value::object(copied)
            }
            Value::Function(_) | Value::Code(_) => Value::Nil,
            Value::Error(e) => Value::error(e.message.deep_copy(), e.stack.clone()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Canonical textual form used when coercing a number for string
    /// concatenation (`+` between a string and a number).
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.to_string(),
            Value::Array(items) => {
                let parts: Vec<String> = items.lock().iter().map(Value::to_display_string).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Object(map) => {
                let parts: Vec<String> = map
                    .lock()
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.to_display_string()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Function(f) => match f.name() {
                Some(name) => format!("<function {name}>"),
                None => "<function>".to_string(),
            },
            Value::Code(_) => "<code>".to_string(),
            Value::Error(e) => format!("<error: {}>", e.message.to_display_string()),
        }
    }
}

/// Formats a number the way the language's string coercion does: integral
/// floats print without a trailing `.0`.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falsy_values() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(!Value::empty_array().is_truthy());
        assert!(!Value::empty_object().is_truthy());
    }

    #[test]
    fn truthy_values() {
        assert!(Value::Number(1.0).is_truthy());
        assert!(Value::string("x").is_truthy());
        assert!(Value::array(vec![Value::Nil]).is_truthy());
    }

    #[test]
    fn deep_copy_breaks_aliasing() {
        let arr = Value::array(vec![Value::Number(1.0)]);
        let copy = arr.deep_copy();
        if let (Value::Array(a), Value::Array(b)) = (&arr, &copy) {
            a.lock().push(Value::Number(2.0));
            assert_eq!(b.lock().len(), 1, "copy must not see source mutation");
        } else {
            unreachable!();
        }
    }

    #[test]
    fn clone_aliases_same_container() {
        let arr = Value::array(vec![Value::Number(1.0)]);
        let aliased = arr.clone();
        if let (Value::Array(a), Value::Array(b)) = (&arr, &aliased) {
            a.lock().push(Value::Number(2.0));
            assert_eq!(b.lock().len(), 2, "plain clone aliases the same scope's container");
        } else {
            unreachable!();
        }
    }

    #[test]
    fn structural_equality_for_objects() {
        let mut m1 = ObjectMap::new();
        m1.insert("a".into(), Value::Number(1.0));
        let mut m2 = ObjectMap::new();
        m2.insert("a".into(), Value::Number(1.0));
        assert!(Value::object(m1).values_equal(&Value::object(m2)));
    }

    #[test]
    fn number_display_strips_trailing_zero() {
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(42.5), "42.5");
    }
}
