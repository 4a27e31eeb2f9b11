//! Per-request dispatch (component G): builds the request object, installs
//! goroutine-local context, evaluates the handler script through the
//! module resolver's AST cache, and turns the outcome into an HTTP
//! response. Grounded on `duso_core::invoke::evaluate_invocation`'s shape
//! (resolve through the cache, fresh evaluator, translate the `Signal`),
//! generalized with the extra `reason = "http_route"` frame and the
//! timeout-triggered `504` the invocation subsystem has no equivalent of.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use duso_core::context::{self, ContextGuard, GoroutineId, InvocationFrame, InvocationReason, RequestContext};
use duso_core::{Environment, Evaluator, Interpreter, Signal};
use duso_value::Value;
use http::{HeaderName, HeaderValue, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Runs `script_path` as an HTTP handler and converts its outcome to a
/// response. `server_frame` is the server's own root invocation frame
/// (the process that called `start()`), installed as the handler frame's
/// parent so `context().callstack()` reflects the real call chain.
pub async fn dispatch(
    interpreter: Arc<Interpreter>,
    server_frame: Arc<InvocationFrame>,
    script_path: String,
    request_value: Value,
    timeout: Option<Duration>,
) -> Response {
    let gid = context::next_goroutine_id();
    let frame = Arc::new(InvocationFrame {
        filename: script_path.clone(),
        line: 0,
        col: 0,
        reason: InvocationReason::HttpRoute,
        details: String::new(),
        parent: Some(server_frame),
    });

    let request_ctx = Arc::new(RequestContext::new(frame.clone(), request_value));
    let cancellation = request_ctx.cancellation.clone();

    let join = tokio::task::spawn_blocking(move || evaluate_handler(interpreter, frame, gid, request_ctx));

    let outcome = match timeout {
        Some(d) => match tokio::time::timeout(d, join).await {
            Ok(result) => result,
            Err(_) => {
                // The handler goroutine is never forcibly killed; flipping
                // the token just lets cooperative built-ins notice.
                cancellation.cancel();
                return (StatusCode::GATEWAY_TIMEOUT, "handler timed out").into_response();
            }
        },
        None => join.await,
    };

    match outcome {
        Ok(Ok(Some(v))) => response_from_value(&v),
        Ok(Ok(None)) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(message)) => {
            error!(path = %script_path, error = %message, "http handler raised an uncaught error");
            (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
        }
        Err(join_err) => {
            error!(path = %script_path, error = %join_err, "http handler task panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Runs inside the handler's dedicated `spawn_blocking` task. `Ok(None)`
/// is the fallthrough case (no `exit`, no response builder called) — the
/// caller turns that into `204`.
fn evaluate_handler(
    interpreter: Arc<Interpreter>,
    frame: Arc<InvocationFrame>,
    gid: GoroutineId,
    request_ctx: Arc<RequestContext>,
) -> Result<Option<Value>, String> {
    let _guard = ContextGuard::install(gid, request_ctx);

    let loaded = interpreter
        .resolver
        .load_path(&frame.filename)
        .map_err(|e| e.to_string())?;

    let mut evaluator = Evaluator::new(interpreter, frame.filename.clone(), gid);
    let env = Environment::root();
    match evaluator.eval_program(&loaded.ast, &env) {
        Ok(_) => Ok(None),
        Err(Signal::Exit(v)) => Ok(Some(v)),
        Err(Signal::Throw(e)) => Err(e.to_display_string()),
        Err(_) => Ok(None),
    }
}

/// Both `exit({status, body, headers})` and every `context().response()`
/// builder produce this same `{status, body, headers}` shape (see
/// `duso_core::builtins::response_value`) specifically so this is the
/// only place that ever has to know how to turn it into a real HTTP
/// response.
fn response_from_value(v: &Value) -> Response {
    let Value::Object(map) = v else {
        return StatusCode::NO_CONTENT.into_response();
    };
    let map = map.lock();
    let status = map.get("status").and_then(Value::as_number).unwrap_or(200.0) as u16;
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    let body = map.get("body").map(Value::to_display_string).unwrap_or_default();

    let mut builder = Response::builder().status(status);
    if let Some(Value::Object(headers)) = map.get("headers") {
        for (name, value) in headers.lock().iter() {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value.to_display_string()),
            ) {
                builder = builder.header(name, value);
            }
        }
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
