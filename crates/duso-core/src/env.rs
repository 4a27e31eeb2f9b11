//! Lexical environment: an ordered chain of frames, innermost first.
//! Closures hold a strong reference to the frame active when they were
//! created — not to the caller's frame, since scoping is lexical, not
//! dynamic.

use duso_value::Value;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;

struct FrameNode {
    bindings: Mutex<IndexMap<String, Value>>,
    parent: Option<Environment>,
}

/// A reference-counted frame chain. Cloning an `Environment` aliases the
/// same chain (this is what lets a closure and its defining scope observe
/// each other's mutations to shared bindings).
#[derive(Clone)]
pub struct Environment(Arc<FrameNode>);

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("depth", &self.depth())
            .finish()
    }
}

impl Environment {
    pub fn root() -> Self {
        Environment(Arc::new(FrameNode {
            bindings: Mutex::new(IndexMap::new()),
            parent: None,
        }))
    }

    /// A new, empty frame linked to `self` as parent.
    pub fn child(&self) -> Self {
        Environment(Arc::new(FrameNode {
            bindings: Mutex::new(IndexMap::new()),
            parent: Some(self.clone()),
        }))
    }

    /// `var name = expr` — bind in the current (innermost) frame
    /// unconditionally, shadowing any outer binding of the same name.
    pub fn declare(&self, name: impl Into<String>, value: Value) {
        self.0.bindings.lock().insert(name.into(), value);
    }

    /// Walks outward from the innermost frame looking for `name`.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.0.bindings.lock().get(name) {
            return Some(v.clone());
        }
        self.0.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Plain assignment: rebind the first occurrence of `name` found
    /// walking outward; if none exists, create a new binding in the
    /// outermost (root) frame.
    pub fn assign(&self, name: &str, value: Value) {
        if self.try_assign_existing(name, value.clone()) {
            return;
        }
        self.root_frame().0.bindings.lock().insert(name.to_string(), value);
    }

    fn try_assign_existing(&self, name: &str, value: Value) -> bool {
        let mut bindings = self.0.bindings.lock();
        if bindings.contains_key(name) {
            bindings.insert(name.to_string(), value);
            return true;
        }
        drop(bindings);
        match &self.0.parent {
            Some(parent) => parent.try_assign_existing(name, value),
            None => false,
        }
    }

    fn root_frame(&self) -> Environment {
        match &self.0.parent {
            Some(parent) => parent.root_frame(),
            None => self.clone(),
        }
    }

    /// Reads a binding from only the innermost frame (used for writing
    /// back method-call field bindings without walking outward).
    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.0.bindings.lock().get(name).cloned()
    }

    /// Names currently bound in the innermost frame only. Used by method
    /// invocation to know which identifiers to write back to the
    /// receiver object when the method returns.
    pub fn local_names(&self) -> Vec<String> {
        self.0.bindings.lock().keys().cloned().collect()
    }

    fn depth(&self) -> usize {
        match &self.0.parent {
            Some(parent) => 1 + parent.depth(),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_shadows_outer_binding() {
        let outer = Environment::root();
        outer.declare("x", Value::Number(1.0));
        let inner = outer.child();
        inner.declare("x", Value::Number(2.0));
        assert_eq!(inner.get("x").unwrap().as_number(), Some(2.0));
        assert_eq!(outer.get("x").unwrap().as_number(), Some(1.0));
    }

    #[test]
    fn plain_assign_rebinds_outer_frame() {
        let outer = Environment::root();
        outer.declare("x", Value::Number(1.0));
        let inner = outer.child();
        inner.assign("x", Value::Number(9.0));
        assert_eq!(outer.get("x").unwrap().as_number(), Some(9.0));
    }

    #[test]
    fn assign_with_no_existing_binding_creates_at_root() {
        let outer = Environment::root();
        let inner = outer.child();
        inner.assign("y", Value::Number(5.0));
        assert_eq!(outer.get("y").unwrap().as_number(), Some(5.0));
    }

    #[test]
    fn closures_share_frame_mutation() {
        let outer = Environment::root();
        outer.declare("counter", Value::Number(0.0));
        let closure_a = outer.clone();
        let closure_b = outer.clone();
        closure_a.assign("counter", Value::Number(1.0));
        assert_eq!(closure_b.get("counter").unwrap().as_number(), Some(1.0));
    }
}
