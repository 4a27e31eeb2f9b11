//! Invocation subsystem (component E): `run`/`spawn` share one pipeline —
//! resolve the script through the VFS, parse it, build an
//! [`InvocationFrame`], launch a goroutine, evaluate, capture the
//! outcome. Grounded on the teacher's `ModuleHostCommand::dispatch`
//! reply-via-oneshot pattern: each invocation is handed to
//! `tokio::task::spawn_blocking` (the closest analogue to an independently
//! scheduled goroutine) and `run` waits on a `oneshot::Receiver` for the
//! result.

use crate::context::{self, ContextGuard, GoroutineId, InvocationFrame, InvocationReason, RequestContext};
use crate::env::Environment;
use crate::eval::{Evaluator, Interpreter, Signal};
use duso_value::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::error;

fn build_frame(eval: &Evaluator, path: &str, reason: InvocationReason) -> Arc<InvocationFrame> {
    let (line, col) = eval.current_pos();
    let parent = context::current().map(|c| c.frame.clone());
    Arc::new(InvocationFrame {
        filename: path.to_string(),
        line,
        col,
        reason,
        details: String::new(),
        parent,
    })
}

/// Runs inside the child's dedicated `spawn_blocking` task: installs the
/// goroutine-local context, resolves+parses the script through the VFS
/// (not the module resolver's search order — `run`/`spawn` address a
/// concrete path, not a bare module name), evaluates it, and translates
/// the outcome to a plain `Result<Value, String>` so it can cross the
/// oneshot/thread boundary without carrying the evaluator's lifetime.
fn evaluate_invocation(
    interpreter: Arc<Interpreter>,
    frame: Arc<InvocationFrame>,
    gid: GoroutineId,
    ctx_value: Value,
) -> Result<Value, String> {
    let request_ctx = Arc::new(RequestContext::new(frame.clone(), ctx_value));
    let _guard = ContextGuard::install(gid, request_ctx);

    // `run`/`spawn` address a concrete path rather than a bare module
    // name, so this goes through `load_path` rather than `load`'s
    // bare-name search order — but still shares the same mtime-validated
    // AST cache as `require`/`include`, so repeated invocations of the
    // same script don't reparse it every time.
    let loaded = interpreter
        .resolver
        .load_path(&frame.filename)
        .map_err(|e| e.to_string())?;

    let mut child_eval = Evaluator::new(interpreter, frame.filename.clone(), gid);
    let env = Environment::root();
    match child_eval.eval_program(&loaded.ast, &env) {
        Ok(_) => Ok(Value::Nil),
        Err(Signal::Exit(v)) => Ok(v.deep_copy()),
        Err(Signal::Throw(e)) => Err(e.to_display_string()),
        Err(_) => Ok(Value::Nil),
    }
}

/// `run(path, ctx?, timeout?)`: blocks the calling goroutine until the
/// child finishes, subject to an optional timeout, then returns the
/// child's `exit` payload (`nil` if it never called `exit`). The context
/// value is deep-copied into the child and its `exit` payload is
/// deep-copied again on the way out, preserving no-sharing across the
/// boundary even though both sides run in the same process.
pub fn run(eval: &mut Evaluator, path: String, ctx_value: Value, timeout: Option<Duration>) -> Result<Value, Signal> {
    let gid = context::next_goroutine_id();
    let frame = build_frame(eval, &path, InvocationReason::Run);
    let interpreter = eval.interpreter.clone();
    let ctx_copy = ctx_value.deep_copy();

    let (tx, rx) = oneshot::channel::<Result<Value, String>>();
    let handle = tokio::runtime::Handle::current();
    handle.spawn_blocking(move || {
        let outcome = evaluate_invocation(interpreter, frame, gid, ctx_copy);
        let _ = tx.send(outcome);
    });

    let outcome = handle.block_on(async {
        match timeout {
            Some(d) => match tokio::time::timeout(d, rx).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err("invocation goroutine dropped its reply".to_string()),
                Err(_) => Err(format!("run({path}) timed out")),
            },
            None => rx
                .await
                .unwrap_or_else(|_| Err("invocation goroutine dropped its reply".to_string())),
        }
    });

    outcome.map_err(|msg| eval.raise(msg))
}

/// `spawn(path, ctx?)`: fire-and-forget. Returns a monotonic numeric
/// process id immediately (the post-increment value of the `sys`
/// datastore's `spawn_count` slot — reusing that counter as the id is
/// what "increments a process counter in `sys`" and "returns a monotonic
/// id" collapse into). Errors in the spawned script are logged, never
/// propagated to the caller.
pub fn spawn(eval: &mut Evaluator, path: String, ctx_value: Value) -> Result<Value, Signal> {
    let gid = context::next_goroutine_id();
    let frame = build_frame(eval, &path, InvocationReason::Spawn);
    let interpreter = eval.interpreter.clone();
    let ctx_copy = ctx_value.deep_copy();

    let sys = interpreter
        .datastore
        .get_or_create(
            "sys",
            duso_datastore::DatastoreConfig {
                read_only: true,
                ..Default::default()
            },
        )
        .map_err(|e| eval.raise(e.to_string()))?;
    let process_id = sys.force_increment("spawn_count", 1.0);

    tokio::runtime::Handle::current().spawn_blocking(move || {
        if let Err(msg) = evaluate_invocation(interpreter, frame.clone(), gid, ctx_copy) {
            error!(path = %frame.filename, error = %msg, "spawned script raised an uncaught error");
        }
    });

    Ok(Value::Number(process_id))
}
