//! The tree-walking evaluator (component C): walks the [`crate::syntax::ast`]
//! tree produced by the parser, threading an [`Environment`] of [`Value`]s
//! and reporting non-value outcomes as [`Signal`] — a distinguished sum the
//! caller examines, not a fatal Rust error. `return`/`break`/`continue` are
//! absorbed by the nearest function/loop; `throw` by the nearest
//! `try`/`catch`; `exit` propagates all the way to the top of the
//! invocation.

use crate::context::GoroutineId;
use crate::debug::DebugSession;
use crate::env::Environment;
use crate::error::RuntimeError;
use crate::function::ScriptFunction;
use crate::module::Resolver;
use crate::syntax::ast::*;
use crate::vfs::Vfs;
use duso_datastore::Registry;
use duso_value::{ObjectMap, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A registered built-in. Consulted at any call-site whose callee
/// identifier did not resolve in the environment — i.e. built-ins occupy
/// a namespace distinct from, and checked after, user bindings.
pub type Builtin =
    Arc<dyn Fn(&mut Evaluator, Vec<Value>, &Environment) -> Result<Value, Signal> + Send + Sync>;

/// Policy flags copied verbatim into every fresh evaluator spawned off an
/// interpreter (`run`/`spawn`/HTTP handler): `--debug`, `--no-stdin`,
/// `--no-fs-writes`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyFlags {
    pub debug: bool,
    pub no_stdin: bool,
    pub no_fs_writes: bool,
}

/// Shared, effectively-immutable state every evaluator in a process
/// consults: the built-in table, the datastore registry, the module
/// resolver, the VFS, policy flags, and the debug session. `run`/`spawn`
/// build a "fresh evaluator" by cloning this `Arc` and starting a new
/// [`Evaluator`] with an empty call stack — no variables carry over.
pub struct Interpreter {
    pub builtins: HashMap<String, Builtin>,
    pub datastore: Arc<Registry>,
    pub resolver: Arc<Resolver>,
    pub vfs: Arc<Vfs>,
    pub policy: PolicyFlags,
    pub debug_session: Arc<DebugSession>,
}

impl Interpreter {
    pub fn new(
        datastore: Arc<Registry>,
        resolver: Arc<Resolver>,
        vfs: Arc<Vfs>,
        policy: PolicyFlags,
        debug_session: Arc<DebugSession>,
    ) -> Arc<Self> {
        let mut builtins = HashMap::new();
        crate::builtins::register_all(&mut builtins);
        Arc::new(Self {
            builtins,
            datastore,
            resolver,
            vfs,
            policy,
            debug_session,
        })
    }
}

/// Control-flow signals the evaluator reports instead of a plain `Value`.
/// Not fatal errors: the caller (loop, function activation, `try`, the
/// invocation subsystem) examines and absorbs the ones meant for it.
#[derive(Debug, Clone)]
pub enum Signal {
    Return(Value),
    Break,
    Continue,
    /// Carries an `error` Value: either the user's `throw(v)` payload
    /// wrapped with a formatted stack, or one raised internally by a bad
    /// runtime condition (division by zero, bad index, unresolved
    /// identifier, non-callable call).
    Throw(Value),
    /// The designated mechanism for returning a value from a script.
    /// Propagates past every loop, function, and `try`/`catch` all the
    /// way to the top of the invocation.
    Exit(Value),
}

struct CallFrame {
    name: Option<String>,
    line: usize,
    col: usize,
}

/// Per-invocation evaluator state: the goroutine's current source
/// position (for error reporting), its script-level call stack (for
/// formatted traces), a reference to the shared [`Interpreter`], and the
/// goroutine id installed in [`crate::context`] for this invocation.
pub struct Evaluator {
    pub interpreter: Arc<Interpreter>,
    pub file: String,
    pub goroutine_id: GoroutineId,
    pos: (usize, usize),
    call_stack: Vec<CallFrame>,
}

impl Evaluator {
    pub fn new(interpreter: Arc<Interpreter>, file: impl Into<String>, goroutine_id: GoroutineId) -> Self {
        Self {
            interpreter,
            file: file.into(),
            goroutine_id,
            pos: (0, 0),
            call_stack: Vec::new(),
        }
    }

    /// Builds a fresh evaluator sharing this one's `Interpreter` (built-
    /// ins, datastore, resolver, VFS, policy) for a new invocation. Used
    /// by the invocation subsystem and HTTP server; never carries over
    /// variables or call-stack state.
    pub fn fresh(&self, file: impl Into<String>, goroutine_id: GoroutineId) -> Evaluator {
        Evaluator::new(self.interpreter.clone(), file, goroutine_id)
    }

    pub fn current_pos(&self) -> (usize, usize) {
        self.pos
    }

    pub fn eval_program(&mut self, block: &Block, env: &Environment) -> Result<Value, Signal> {
        self.eval_block(block, env)
    }

    fn current_script_dir(&self) -> Option<String> {
        std::path::Path::new(&self.file)
            .parent()
            .and_then(|p| p.to_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// `require(name)`: resolves and parses `name` via the module
    /// resolver's search order, executing its body in a fresh root
    /// environment (not the caller's — `require` never leaks bindings)
    /// the first time this interpreter loads it. The value of the
    /// module's last statement is memoized by absolute path, so a second
    /// `require` of the same module in this interpreter returns a deep
    /// copy without re-running the body.
    pub fn require_module(&mut self, name: &str) -> Result<Value, Signal> {
        let dir = self.current_script_dir();
        let resolver = self.interpreter.resolver.clone();
        let loaded = resolver
            .load(name, dir.as_deref(), crate::module::LoadKind::Require)
            .map_err(|e| self.raise(e.to_string()))?;
        if let Some(cached) = loaded.cached_result {
            return Ok(cached.deep_copy());
        }
        let path = loaded.absolute_path.clone();
        let result = resolver.with_loading(&path, || -> Result<Value, Signal> {
            let saved_file = std::mem::replace(&mut self.file, path.clone());
            let env = Environment::root();
            let outcome = self.eval_program(&loaded.ast, &env);
            self.file = saved_file;
            match outcome {
                Ok(v) => Ok(v),
                Err(Signal::Exit(v)) => Ok(v),
                Err(other) => Err(other),
            }
        })?;
        resolver.memoize(&path, result.clone());
        Ok(result.deep_copy())
    }

    /// `include(name)`: resolves and parses `name` the same way, but
    /// executes its body directly in the caller's own environment —
    /// exported bindings leak into the caller's scope — and is never
    /// memoized.
    pub fn include_module(&mut self, name: &str, env: &Environment) -> Result<Value, Signal> {
        let dir = self.current_script_dir();
        let resolver = self.interpreter.resolver.clone();
        let loaded = resolver
            .load(name, dir.as_deref(), crate::module::LoadKind::Include)
            .map_err(|e| self.raise(e.to_string()))?;
        let path = loaded.absolute_path.clone();
        resolver.with_loading(&path, || {
            let saved_file = std::mem::replace(&mut self.file, path.clone());
            let outcome = self.eval_program(&loaded.ast, env);
            self.file = saved_file;
            outcome
        })
    }

    fn eval_block(&mut self, block: &Block, env: &Environment) -> Result<Value, Signal> {
        let mut last = Value::Nil;
        for stmt in block {
            last = self.eval_stmt(stmt, env)?;
        }
        Ok(last)
    }

    fn eval_stmt(&mut self, stmt: &Spanned<Stmt>, env: &Environment) -> Result<Value, Signal> {
        self.pos = (stmt.line, stmt.col);
        match &stmt.node {
            Stmt::Expr(e) => self.eval_expr(e, env),
            Stmt::VarDecl(name, e) => {
                let v = self.eval_expr(e, env)?;
                env.declare(name.clone(), v);
                Ok(Value::Nil)
            }
            Stmt::Assign(target, e) => {
                let v = self.eval_expr(e, env)?;
                self.assign(target, v.clone(), env)?;
                Ok(v)
            }
            Stmt::If { cond, then_block, else_block } => {
                if self.eval_expr(cond, env)?.is_truthy() {
                    self.eval_block(then_block, &env.child())
                } else if let Some(eb) = else_block {
                    self.eval_block(eb, &env.child())
                } else {
                    Ok(Value::Nil)
                }
            }
            Stmt::While { cond, body } => {
                while self.eval_expr(cond, env)?.is_truthy() {
                    match self.eval_block(body, &env.child()) {
                        Ok(_) => {}
                        Err(Signal::Break) => break,
                        Err(Signal::Continue) => continue,
                        Err(other) => return Err(other),
                    }
                }
                Ok(Value::Nil)
            }
            Stmt::ForRange { var, start, end, step, body } => self.eval_for_range(var, start, end, step.as_ref(), body, env),
            Stmt::ForIn { var, iter, body } => self.eval_for_in(var, iter, body, env),
            Stmt::FunctionDecl { name, params, body } => {
                let f = Value::Function(Arc::new(ScriptFunction {
                    name: Some(name.clone()),
                    params: params.clone(),
                    body: body.clone(),
                    closure: env.clone(),
                }));
                env.declare(name.clone(), f);
                Ok(Value::Nil)
            }
            Stmt::Return(e) => {
                let v = match e {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Value::Nil,
                };
                Err(Signal::Return(v))
            }
            Stmt::Break => Err(Signal::Break),
            Stmt::Continue => Err(Signal::Continue),
            Stmt::Throw(e) => {
                let payload = self.eval_expr(e, env)?;
                Err(self.throw(payload))
            }
            Stmt::TryCatch { try_block, catch_var, catch_block } => {
                match self.eval_block(try_block, &env.child()) {
                    Err(Signal::Throw(err_val)) => {
                        let catch_env = env.child();
                        catch_env.declare(catch_var.clone(), err_val);
                        self.eval_block(catch_block, &catch_env)
                    }
                    other => other,
                }
            }
            Stmt::Block(b) => self.eval_block(b, &env.child()),
        }
    }

    fn eval_for_range(
        &mut self,
        var: &str,
        start: &Expr,
        end: &Expr,
        step: Option<&Expr>,
        body: &Block,
        env: &Environment,
    ) -> Result<Value, Signal> {
        let start_v = self.expect_number(self.eval_expr(start, env)?)?;
        let end_v = self.expect_number(self.eval_expr(end, env)?)?;
        let step_v = match step {
            Some(s) => self.expect_number(self.eval_expr(s, env)?)?,
            None => 1.0,
        };
        if step_v == 0.0 {
            return Err(self.raise("for-loop step must not be zero"));
        }
        // Inclusive at both ends; a negative step is required to descend.
        let mut i = start_v;
        loop {
            if step_v > 0.0 {
                if i > end_v {
                    break;
                }
            } else if i < end_v {
                break;
            }
            let loop_env = env.child();
            loop_env.declare(var.to_string(), Value::Number(i));
            match self.eval_block(body, &loop_env) {
                Ok(_) => {}
                Err(Signal::Break) => break,
                Err(Signal::Continue) => {}
                Err(other) => return Err(other),
            }
            i += step_v;
        }
        Ok(Value::Nil)
    }

    fn eval_for_in(&mut self, var: &str, iter: &Expr, body: &Block, env: &Environment) -> Result<Value, Signal> {
        let iter_v = self.eval_expr(iter, env)?;
        let items: Vec<Value> = match &iter_v {
            Value::Array(a) => a.lock().clone(),
            Value::Object(o) => o.lock().keys().map(|k| Value::string(k.clone())).collect(),
            Value::String(s) => s.chars().map(|c| Value::string(c.to_string())).collect(),
            other => return Err(self.raise(format!("cannot iterate over a {}", other.type_name()))),
        };
        for item in items {
            let loop_env = env.child();
            loop_env.declare(var.to_string(), item);
            match self.eval_block(body, &loop_env) {
                Ok(_) => {}
                Err(Signal::Break) => break,
                Err(Signal::Continue) => {}
                Err(other) => return Err(other),
            }
        }
        Ok(Value::Nil)
    }

    fn assign(&mut self, target: &AssignTarget, value: Value, env: &Environment) -> Result<(), Signal> {
        match target {
            AssignTarget::Ident(name) => {
                env.assign(name, value);
                Ok(())
            }
            AssignTarget::Index(recv_expr, idx_expr) => {
                let recv = self.eval_expr(recv_expr, env)?;
                let idx = self.eval_expr(idx_expr, env)?;
                match &recv {
                    Value::Array(items) => {
                        let i = self.expect_number(idx)?;
                        if i < 0.0 {
                            return Err(self.raise("array index out of range"));
                        }
                        let i = i as usize;
                        let mut items = items.lock();
                        if i < items.len() {
                            items[i] = value;
                        } else if i == items.len() {
                            items.push(value);
                        } else {
                            return Err(self.raise("array index out of range"));
                        }
                        Ok(())
                    }
                    Value::Object(map) => {
                        let key = match idx.as_str() {
                            Some(s) => s.to_string(),
                            None => idx.to_display_string(),
                        };
                        map.lock().insert(key, value);
                        Ok(())
                    }
                    other => Err(self.raise(format!("cannot index-assign a {}", other.type_name()))),
                }
            }
            AssignTarget::Field(recv_expr, name) => {
                let recv = self.eval_expr(recv_expr, env)?;
                match &recv {
                    Value::Object(map) => {
                        map.lock().insert(name.clone(), value);
                        Ok(())
                    }
                    other => Err(self.raise(format!("cannot assign a field on a {}", other.type_name()))),
                }
            }
        }
    }

    fn eval_expr(&mut self, expr: &Expr, env: &Environment) -> Result<Value, Signal> {
        match expr {
            Expr::Nil => Ok(Value::Nil),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Bool(b) => Ok(Value::Boolean(*b)),
            Expr::Str { parts, .. } => self.eval_template(parts, env),
            Expr::Ident(name) => {
                env.get(name).ok_or_else(|| self.raise(RuntimeError::UnresolvedIdent(name.clone()).to_string()))
            }
            Expr::ArrayLit(items) => {
                let vals = items.iter().map(|e| self.eval_expr(e, env)).collect::<Result<Vec<_>, _>>()?;
                Ok(Value::array(vals))
            }
            Expr::ObjectLit(fields) => {
                let mut map = ObjectMap::new();
                for (k, e) in fields {
                    let v = self.eval_expr(e, env)?;
                    map.insert(k.clone(), v);
                }
                Ok(Value::object(map))
            }
            Expr::FunctionLit { name, params, body } => Ok(Value::Function(Arc::new(ScriptFunction {
                name: name.clone(),
                params: params.clone(),
                body: body.clone(),
                closure: env.clone(),
            }))),
            Expr::Unary { op, expr } => {
                let v = self.eval_expr(expr, env)?;
                self.eval_unary(*op, v)
            }
            Expr::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs, env),
            Expr::Call { callee, args } => self.eval_call(callee, args, env),
            Expr::MethodCall { receiver, name, args } => self.eval_method_call(receiver, name, args, env),
            Expr::Index { receiver, index } => self.eval_index(receiver, index, env),
            Expr::Field { receiver, name } => self.eval_field(receiver, name, env),
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], env: &Environment) -> Result<Value, Signal> {
        // `watch` needs its arguments as unevaluated expressions (to key
        // its cache on source form and to decide, post-evaluation,
        // whether to enter the debug session) so it is special-cased
        // ahead of the generic eager-argument-evaluation path below, but
        // only when not shadowed by a user binding of the same name.
        if let Expr::Ident(name) = callee {
            if name == "watch" && env.get(name).is_none() {
                return self.eval_watch(args, env);
            }
        }
        let arg_vals = args.iter().map(|a| self.eval_expr(a, env)).collect::<Result<Vec<_>, _>>()?;
        if let Expr::Ident(name) = callee {
            if let Some(v) = env.get(name) {
                return self.call_value(v, arg_vals);
            }
            if let Some(builtin) = self.interpreter.builtins.get(name.as_str()).cloned() {
                return builtin(self, arg_vals, env);
            }
            return Err(self.raise(RuntimeError::UnresolvedIdent(name.clone()).to_string()));
        }
        let callee_v = self.eval_expr(callee, env)?;
        self.call_value(callee_v, arg_vals)
    }

    /// `breakpoint()`: a no-op when debug mode is off; otherwise enters
    /// the debug session, which serializes itself across goroutines.
    pub fn eval_breakpoint(&mut self, env: &Environment) -> Result<Value, Signal> {
        if !self.interpreter.policy.debug {
            return Ok(Value::Nil);
        }
        let describe = self.describe_debug_context();
        let debug = self.interpreter.debug_session.clone();
        let file = self.file.clone();
        let mut eval_line = |expr_src: &str| -> String {
            match crate::syntax::parser::parse_expr(expr_src, &file) {
                Ok(expr) => match self.eval_expr(&expr, env) {
                    Ok(v) => v.to_display_string(),
                    Err(Signal::Throw(e)) => format!("error: {}", e.to_display_string()),
                    Err(_) => "non-value control signal".to_string(),
                },
                Err(e) => format!("parse error: {e}"),
            }
        };
        debug.enter(&describe, &mut eval_line);
        Ok(Value::Nil)
    }

    /// `watch(expr1, …)`: a no-op (including skipping evaluation of its
    /// arguments) when debug mode is off. When on, each argument is
    /// evaluated, compared against its cached value (keyed by the
    /// expression's parsed form), and any change is printed as a `WATCH:`
    /// line before entering the debug session.
    fn eval_watch(&mut self, args: &[Expr], env: &Environment) -> Result<Value, Signal> {
        if !self.interpreter.policy.debug {
            return Ok(Value::Nil);
        }
        let debug = self.interpreter.debug_session.clone();
        let mut changed_report = String::new();
        for expr in args {
            let key = format!("{expr:?}");
            let value = self.eval_expr(expr, env)?;
            if debug.check_watch(&key, &value) {
                changed_report.push_str(&format!("WATCH: {key} = {}\n", value.to_display_string()));
            }
        }
        if changed_report.is_empty() {
            return Ok(Value::Nil);
        }
        print!("{changed_report}");
        let describe = self.describe_debug_context();
        let file = self.file.clone();
        let mut eval_line = |expr_src: &str| -> String {
            match crate::syntax::parser::parse_expr(expr_src, &file) {
                Ok(expr) => match self.eval_expr(&expr, env) {
                    Ok(v) => v.to_display_string(),
                    Err(Signal::Throw(e)) => format!("error: {}", e.to_display_string()),
                    Err(_) => "non-value control signal".to_string(),
                },
                Err(e) => format!("parse error: {e}"),
            }
        };
        debug.enter(&describe, &mut eval_line);
        Ok(Value::Nil)
    }

    /// Builds the text shown when entering the debug session: current
    /// position, a source listing with the triggering line highlighted
    /// and a caret at the column, the chain of invocation frames (cross-
    /// goroutine), and the chain of call frames within this invocation.
    fn describe_debug_context(&self) -> String {
        let (line, col) = self.pos;
        let mut out = format!("-- breakpoint at {}:{}:{} --\n", self.file, line, col);
        if let Ok(source) = self.interpreter.vfs.read(&self.file) {
            if let Some(src_line) = source.lines().nth(line.saturating_sub(1)) {
                out.push_str(&format!("{line:>5} | {src_line}\n"));
                out.push_str(&format!("      | {}^\n", " ".repeat(col.saturating_sub(1))));
            }
        }
        if let Some(ctx) = crate::context::current() {
            out.push_str("invocation frames:\n");
            for frame in ctx.frame.chain() {
                out.push_str(&format!("  {} ({})\n", frame.filename, frame.reason.as_str()));
            }
        }
        if !self.call_stack.is_empty() {
            out.push_str("call frames:\n");
            for frame in self.call_stack.iter().rev() {
                let name = frame.name.as_deref().unwrap_or("<anonymous>");
                out.push_str(&format!("  {}:{}:{} in {name}\n", self.file, frame.line, frame.col));
            }
        }
        out
    }

    /// Calls any callable `Value`. Built-ins are not `Value::Function`s
    /// (they live in the interpreter's `builtins` table, consulted only
    /// at an unresolved call-site identifier) — this only ever sees
    /// user-defined `ScriptFunction`s.
    pub fn call_value(&mut self, callee: Value, args: Vec<Value>) -> Result<Value, Signal> {
        match &callee {
            Value::Function(f) => self.call_callable(f, &Value::Nil, args),
            other => Err(self.raise(RuntimeError::NotCallable(other.type_name()).to_string())),
        }
    }

    /// Dispatches a `Callable` trait object to whichever concrete
    /// implementation it is: a [`ScriptFunction`] (the AST-body-plus-
    /// closure representation produced by function literals/decls) or a
    /// [`crate::function::NativeMethod`] (a Rust closure installed as an
    /// object field, e.g. a datastore handle's `set`/`get`).
    fn call_callable(
        &mut self,
        f: &Arc<dyn duso_value::Callable>,
        receiver: &Value,
        args: Vec<Value>,
    ) -> Result<Value, Signal> {
        if let Some(sf) = ScriptFunction::downcast(f) {
            let method_receiver = if matches!(receiver, Value::Object(_)) { Some(receiver) } else { None };
            return self.call_script_function(sf, args, method_receiver);
        }
        if let Some(native) = crate::function::NativeMethod::downcast(f) {
            return (native.func)(self, receiver, args);
        }
        Err(self.raise("unrecognized function representation"))
    }

    fn call_script_function(
        &mut self,
        sf: &ScriptFunction,
        args: Vec<Value>,
        method_receiver: Option<&Value>,
    ) -> Result<Value, Signal> {
        let frame = sf.closure.child();
        if let Some(Value::Object(map)) = method_receiver {
            for (k, v) in map.lock().iter() {
                frame.declare(k.clone(), v.clone());
            }
        }
        for (i, param) in sf.params.iter().enumerate() {
            frame.declare(param.clone(), args.get(i).cloned().unwrap_or(Value::Nil));
        }
        self.call_stack.push(CallFrame { name: sf.name.clone(), line: self.pos.0, col: self.pos.1 });
        let result = self.eval_block(&sf.body, &frame);
        self.call_stack.pop();

        // Write back primitive reassignments of field-bound identifiers:
        // `obj.m()` installs `obj`'s fields in the callee frame so the
        // method may reference and reassign them by bare name; container
        // fields already alias the same underlying Arc and need no
        // writeback, but a plain `field = newval` rebinds the frame's
        // local slot only, so it must be copied back onto the object.
        if let Some(Value::Object(map)) = method_receiver {
            let mut map = map.lock();
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some(v) = frame.get_local(&key) {
                    map.insert(key, v);
                }
            }
        }

        match result {
            Err(Signal::Return(v)) => Ok(v),
            other => other,
        }
    }

    fn eval_method_call(&mut self, receiver: &Expr, name: &str, args: &[Expr], env: &Environment) -> Result<Value, Signal> {
        let recv_val = self.eval_expr(receiver, env)?;
        let arg_vals = args.iter().map(|a| self.eval_expr(a, env)).collect::<Result<Vec<_>, _>>()?;
        match &recv_val {
            Value::Object(map) => {
                let method_val = map.lock().get(name).cloned();
                match method_val {
                    Some(Value::Function(f)) => self.call_callable(&f, &recv_val, arg_vals),
                    Some(other) => Err(self.raise(format!("field '{name}' is not callable (is a {})", other.type_name()))),
                    None => Err(self.raise(format!("object has no method '{name}'"))),
                }
            }
            other => Err(self.raise(format!("cannot call method '{name}' on a {}", other.type_name()))),
        }
    }

    fn eval_index(&mut self, receiver: &Expr, index: &Expr, env: &Environment) -> Result<Value, Signal> {
        let recv = self.eval_expr(receiver, env)?;
        let idx = self.eval_expr(index, env)?;
        match &recv {
            Value::Array(items) => {
                let i = self.expect_number(idx)?;
                if i < 0.0 {
                    return Err(self.raise("array index out of range"));
                }
                items
                    .lock()
                    .get(i as usize)
                    .cloned()
                    .ok_or_else(|| self.raise("array index out of range"))
            }
            Value::Object(map) => {
                let key = match idx.as_str() {
                    Some(s) => s.to_string(),
                    None => idx.to_display_string(),
                };
                Ok(map.lock().get(&key).cloned().unwrap_or(Value::Nil))
            }
            Value::String(s) => {
                let i = self.expect_number(idx)? as usize;
                s.chars()
                    .nth(i)
                    .map(|c| Value::string(c.to_string()))
                    .ok_or_else(|| self.raise("string index out of range"))
            }
            other => Err(self.raise(format!("cannot index a {}", other.type_name()))),
        }
    }

    fn eval_field(&mut self, receiver: &Expr, name: &str, env: &Environment) -> Result<Value, Signal> {
        let recv = self.eval_expr(receiver, env)?;
        match &recv {
            Value::Object(map) => Ok(map.lock().get(name).cloned().unwrap_or(Value::Nil)),
            Value::Error(e) => match name {
                "message" => Ok(e.message.clone()),
                "stack" => Ok(Value::string(e.stack.clone())),
                _ => Ok(Value::Nil),
            },
            other => Err(self.raise(format!("cannot read field '{name}' on a {}", other.type_name()))),
        }
    }

    fn eval_template(&mut self, parts: &[StrPart], env: &Environment) -> Result<Value, Signal> {
        let mut out = String::new();
        for part in parts {
            match part {
                StrPart::Text(t) => out.push_str(t),
                StrPart::Expr(e) => {
                    let v = self.eval_expr(e, env)?;
                    out.push_str(&v.to_display_string());
                }
            }
        }
        Ok(Value::string(out))
    }

    fn eval_unary(&mut self, op: UnaryOp, v: Value) -> Result<Value, Signal> {
        match op {
            UnaryOp::Not => Ok(Value::Boolean(!v.is_truthy())),
            UnaryOp::Neg => self.expect_number(v).map(|n| Value::Number(-n)),
        }
    }

    fn eval_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, env: &Environment) -> Result<Value, Signal> {
        if op == BinaryOp::And {
            let l = self.eval_expr(lhs, env)?;
            return if l.is_truthy() { self.eval_expr(rhs, env) } else { Ok(l) };
        }
        if op == BinaryOp::Or {
            let l = self.eval_expr(lhs, env)?;
            return if l.is_truthy() { Ok(l) } else { self.eval_expr(rhs, env) };
        }
        let l = self.eval_expr(lhs, env)?;
        let r = self.eval_expr(rhs, env)?;
        match op {
            BinaryOp::Add => self.add(l, r),
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => self.arithmetic(op, l, r),
            BinaryOp::Eq => Ok(Value::Boolean(l.values_equal(&r))),
            BinaryOp::Ne => Ok(Value::Boolean(!l.values_equal(&r))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => self.compare(op, &l, &r),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    /// `+` concatenates strings, adds numbers, and coerces a number to
    /// its canonical textual form when mixed with a string.
    fn add(&mut self, l: Value, r: Value) -> Result<Value, Signal> {
        match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::string(format!("{}{}", l.to_display_string(), r.to_display_string())))
            }
            _ => Err(self.raise(format!("cannot add a {} and a {}", l.type_name(), r.type_name()))),
        }
    }

    fn arithmetic(&mut self, op: BinaryOp, l: Value, r: Value) -> Result<Value, Signal> {
        let a = self.expect_number(l)?;
        let b = self.expect_number(r)?;
        match op {
            BinaryOp::Sub => Ok(Value::Number(a - b)),
            BinaryOp::Mul => Ok(Value::Number(a * b)),
            BinaryOp::Div => {
                if b == 0.0 {
                    Err(self.raise("division by zero"))
                } else {
                    Ok(Value::Number(a / b))
                }
            }
            BinaryOp::Mod => {
                if b == 0.0 {
                    Err(self.raise("division by zero"))
                } else {
                    Ok(Value::Number(a % b))
                }
            }
            _ => unreachable!(),
        }
    }

    fn compare(&mut self, op: BinaryOp, l: &Value, r: &Value) -> Result<Value, Signal> {
        use std::cmp::Ordering;
        let ordering = match (l, r) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.as_ref().cmp(b.as_ref())),
            _ => None,
        };
        let Some(ord) = ordering else {
            return Err(self.raise(format!("cannot compare a {} and a {}", l.type_name(), r.type_name())));
        };
        Ok(Value::Boolean(match op {
            BinaryOp::Lt => ord == Ordering::Less,
            BinaryOp::Le => ord != Ordering::Greater,
            BinaryOp::Gt => ord == Ordering::Greater,
            BinaryOp::Ge => ord != Ordering::Less,
            _ => unreachable!(),
        }))
    }

    fn expect_number(&self, v: Value) -> Result<f64, Signal> {
        v.as_number().ok_or_else(|| self.raise_const(format!("expected a number, got a {}", v.type_name())))
    }

    /// Raises a runtime-condition error at the evaluator's current
    /// position: builds a string payload of the form
    /// `file:line:col: message` plus a formatted call-frame trace.
    pub fn raise(&self, message: impl Into<String>) -> Signal {
        self.raise_const(message)
    }

    fn raise_const(&self, message: impl Into<String>) -> Signal {
        let (line, col) = self.pos;
        let payload = Value::string(RuntimeError::at(&self.file, line, col, message).to_string());
        self.throw(payload)
    }

    /// Wraps a `throw(v)` payload (any Value, unmodified) in an `error`
    /// Value with a formatted stack trace. The distinguishing feature
    /// from [`Evaluator::raise`]: `message` here is exactly the value the
    /// script threw, with no position text baked in.
    pub fn throw(&self, payload: Value) -> Signal {
        Signal::Throw(Value::error(payload, self.format_stack()))
    }

    fn format_stack(&self) -> String {
        let (line, col) = self.pos;
        let mut lines = vec![format!("{}:{}:{}", self.file, line, col)];
        for frame in self.call_stack.iter().rev() {
            let name = frame.name.as_deref().unwrap_or("<anonymous>");
            lines.push(format!("{}:{}:{} in {name}", self.file, frame.line, frame.col));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::DebugSession;
    use crate::syntax::parser::parse_program;
    use duso_datastore::Registry as DsRegistry;

    fn evaluator() -> Evaluator {
        let vfs = Arc::new(Vfs::new(Arc::new(DsRegistry::new()), false));
        let resolver = Arc::new(Resolver::new(vfs.clone(), vec![]));
        let interp = Interpreter::new(
            Arc::new(DsRegistry::new()),
            resolver,
            vfs,
            PolicyFlags::default(),
            Arc::new(DebugSession::new()),
        );
        Evaluator::new(interp, "t.du", 1)
    }

    fn run(src: &str) -> Result<Value, Signal> {
        let block = parse_program(src, "t.du").unwrap();
        let env = Environment::root();
        evaluator().eval_program(&block, &env)
    }

    #[test]
    fn arithmetic_and_precedence() {
        let v = run("1 + 2 * 3").unwrap();
        assert_eq!(v.as_number(), Some(7.0));
    }

    #[test]
    fn string_number_concat_coerces_number() {
        let v = run(r#""n=" + 5"#).unwrap();
        assert_eq!(v.as_str(), Some("n=5"));
    }

    #[test]
    fn division_by_zero_raises_catchable_error() {
        let v = run("var r = nil\ntry { r = 1 / 0 } catch (e) { r = e }\nr").unwrap();
        assert_eq!(v.type_name(), "error");
    }

    #[test]
    fn for_range_is_inclusive_both_ends() {
        let v = run("var total = 0\nfor i = 1, 3 { total = total + i }\ntotal").unwrap();
        assert_eq!(v.as_number(), Some(6.0));
    }

    #[test]
    fn for_range_descends_with_negative_step() {
        let v = run("var total = 0\nfor i = 3, 1, -1 { total = total + i }\ntotal").unwrap();
        assert_eq!(v.as_number(), Some(6.0));
    }

    #[test]
    fn array_write_at_len_appends() {
        let v = run("var a = [1, 2]\na[2] = 3\nlen(a)").unwrap();
        assert_eq!(v.as_number(), Some(3.0));
    }

    #[test]
    fn array_read_out_of_range_raises() {
        let v = run("var a = [1]\na[5]");
        assert!(v.is_err());
    }

    #[test]
    fn array_write_beyond_len_plus_one_raises() {
        let v = run("var a = [1]\na[5] = 9");
        assert!(v.is_err());
    }

    #[test]
    fn closures_capture_defining_environment() {
        let v = run(
            "function make_counter() { var n = 0\n function inc() { n = n + 1\n return n }\n return inc }\nvar c = make_counter()\nc()\nc()",
        )
        .unwrap();
        assert_eq!(v.as_number(), Some(2.0));
    }

    #[test]
    fn method_call_binds_fields_and_writes_back_reassignment() {
        let v = run(
            "var counter = { n: 0, bump: function() { n = n + 1\n return n } }\ncounter.bump()\ncounter.bump()\ncounter.n",
        )
        .unwrap();
        assert_eq!(v.as_number(), Some(2.0));
    }

    #[test]
    fn object_iteration_preserves_insertion_order() {
        let v = run("var o = { b: 1, a: 2 }\nvar keys = []\nfor k in o { push(keys, k) }\nkeys").unwrap();
        if let Value::Array(items) = v {
            let items = items.lock();
            assert_eq!(items[0].as_str(), Some("b"));
            assert_eq!(items[1].as_str(), Some("a"));
        } else {
            panic!("expected array");
        }
    }

    #[test]
    fn try_catch_binds_thrown_payload_as_message() {
        let v = run(r#"var caught = nil
try { throw "boom" } catch (e) { caught = e.message }
caught"#)
            .unwrap();
        assert_eq!(v.as_str(), Some("boom"));
    }

    #[test]
    fn break_and_continue_are_absorbed_by_nearest_loop() {
        let v = run(
            "var total = 0\nfor i = 0, 5 { if i == 2 { continue }\n if i == 4 { break }\n total = total + i }\ntotal",
        )
        .unwrap();
        assert_eq!(v.as_number(), Some(1.0)); // 0 + 1 + (skip 2) + 3, break before 4
    }

    #[test]
    fn string_template_evaluates_embedded_expression() {
        let v = run(r#"var name = "world"
"hello {{ name }}!""#)
            .unwrap();
        assert_eq!(v.as_str(), Some("hello world!"));
    }

    #[test]
    fn raw_string_suppresses_template_expansion() {
        let v = run(r#"raw"{{ not_evaluated }}""#).unwrap();
        assert_eq!(v.as_str(), Some("{{ not_evaluated }}"));
    }
}
