//! The built-in function table: the thin non-control-flow surface
//! (`len`/`type`/`push`/…), the scope-crossing surface (`context`, `run`,
//! `spawn`, `datastore`), and the I/O surface (VFS ops, `input`,
//! `breakpoint`). Built-ins occupy a namespace distinct from, and checked
//! after, user bindings — see `Evaluator::eval_call`.

use crate::env::Environment;
use crate::eval::{Builtin, Evaluator, Signal};
use crate::function::NativeMethod;
use crate::syntax::ast::Block;
use duso_datastore::Datastore;
use duso_value::{CodeObject, ObjectMap, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub fn register_all(builtins: &mut HashMap<String, Builtin>) {
    register_value_ops(builtins);
    register_invocation_ops(builtins);
    register_io_ops(builtins);
    register_vfs_ops(builtins);
}

fn expect_string(eval: &Evaluator, args: &[Value], idx: usize, builtin: &str) -> Result<String, Signal> {
    args.get(idx)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| eval.raise(format!("{builtin}: expected a string argument at position {idx}")))
}

// ---------------------------------------------------------------------
// Pure value operations: len, type, push, pop, shift, unshift, keys,
// parse, exit.
// ---------------------------------------------------------------------

fn register_value_ops(builtins: &mut HashMap<String, Builtin>) {
    builtins.insert(
        "len".into(),
        Arc::new(|eval, args, _env| {
            let v = args
                .into_iter()
                .next()
                .ok_or_else(|| eval.raise("len: missing argument"))?;
            let n = match &v {
                Value::Array(a) => a.lock().len(),
                Value::Object(o) => o.lock().len(),
                Value::String(s) => s.chars().count(),
                other => return Err(eval.raise(format!("len: unsupported type {}", other.type_name()))),
            };
            Ok(Value::Number(n as f64))
        }),
    );

    builtins.insert(
        "type".into(),
        Arc::new(|_eval, args, _env| Ok(Value::string(args.into_iter().next().unwrap_or(Value::Nil).type_name()))),
    );

    builtins.insert(
        "push".into(),
        Arc::new(|eval, args, _env| {
            let mut args = args.into_iter();
            let arr = args.next().ok_or_else(|| eval.raise("push: missing array argument"))?;
            let item = args.next().unwrap_or(Value::Nil);
            match &arr {
                Value::Array(items) => {
                    let mut items = items.lock();
                    items.push(item);
                    Ok(Value::Number(items.len() as f64))
                }
                other => Err(eval.raise(format!("push: expected an array, got a {}", other.type_name()))),
            }
        }),
    );

    builtins.insert(
        "pop".into(),
        Arc::new(|eval, args, _env| {
            let arr = args.into_iter().next().ok_or_else(|| eval.raise("pop: missing array argument"))?;
            match &arr {
                Value::Array(items) => Ok(items.lock().pop().unwrap_or(Value::Nil)),
                other => Err(eval.raise(format!("pop: expected an array, got a {}", other.type_name()))),
            }
        }),
    );

    builtins.insert(
        "shift".into(),
        Arc::new(|eval, args, _env| {
            let arr = args.into_iter().next().ok_or_else(|| eval.raise("shift: missing array argument"))?;
            match &arr {
                Value::Array(items) => {
                    let mut items = items.lock();
                    if items.is_empty() {
                        Ok(Value::Nil)
                    } else {
                        Ok(items.remove(0))
                    }
                }
                other => Err(eval.raise(format!("shift: expected an array, got a {}", other.type_name()))),
            }
        }),
    );

    builtins.insert(
        "unshift".into(),
        Arc::new(|eval, args, _env| {
            let mut args = args.into_iter();
            let arr = args.next().ok_or_else(|| eval.raise("unshift: missing array argument"))?;
            let item = args.next().unwrap_or(Value::Nil);
            match &arr {
                Value::Array(items) => {
                    let mut items = items.lock();
                    items.insert(0, item);
                    Ok(Value::Number(items.len() as f64))
                }
                other => Err(eval.raise(format!("unshift: expected an array, got a {}", other.type_name()))),
            }
        }),
    );

    builtins.insert(
        "keys".into(),
        Arc::new(|eval, args, _env| {
            let v = args.into_iter().next().ok_or_else(|| eval.raise("keys: missing argument"))?;
            match &v {
                Value::Object(o) => Ok(Value::array(o.lock().keys().map(|k| Value::string(k.clone())).collect())),
                other => Err(eval.raise(format!("keys: expected an object, got a {}", other.type_name()))),
            }
        }),
    );

    builtins.insert(
        "parse".into(),
        Arc::new(|_eval, args, _env| {
            let src = args
                .into_iter()
                .next()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            match crate::syntax::parser::parse_program(&src, "<parse>") {
                Ok(ast) => Ok(Value::Code(Arc::new(ParsedCode { source: src, ast: Arc::new(ast) }))),
                // `parse` never throws: a syntax error comes back as an
                // ordinary `error` value, distinguishable via `type()`.
                Err(e) => Ok(Value::error(Value::string(e.to_string()), String::new())),
            }
        }),
    );

    builtins.insert(
        "exit".into(),
        Arc::new(|_eval, args, _env| Err(Signal::Exit(args.into_iter().next().unwrap_or(Value::Nil)))),
    );
}

/// `parse(src)`'s result: the value-level shape of a parsed-but-
/// unexecuted program. The concrete AST stays evaluator-private; nothing
/// outside this crate inspects `ast` directly.
#[derive(Debug)]
struct ParsedCode {
    source: String,
    ast: Arc<Block>,
}

impl CodeObject for ParsedCode {
    fn source(&self) -> &str {
        &self.source
    }
}

// ---------------------------------------------------------------------
// Scope-crossing surface: context(), run, spawn, require, include,
// datastore(ns, config?).
// ---------------------------------------------------------------------

fn register_invocation_ops(builtins: &mut HashMap<String, Builtin>) {
    builtins.insert(
        "context".into(),
        Arc::new(|_eval, _args, _env| Ok(build_context_object().unwrap_or(Value::Nil))),
    );

    builtins.insert(
        "run".into(),
        Arc::new(|eval, args, _env| {
            let path = expect_string(eval, &args, 0, "run")?;
            let ctx_value = args.get(1).cloned().unwrap_or(Value::Nil);
            let timeout = args.get(2).and_then(Value::as_number).map(Duration::from_secs_f64);
            crate::invoke::run(eval, path, ctx_value, timeout)
        }),
    );

    builtins.insert(
        "spawn".into(),
        Arc::new(|eval, args, _env| {
            let path = expect_string(eval, &args, 0, "spawn")?;
            let ctx_value = args.get(1).cloned().unwrap_or(Value::Nil);
            crate::invoke::spawn(eval, path, ctx_value)
        }),
    );

    builtins.insert(
        "require".into(),
        Arc::new(|eval, args, _env| {
            let name = expect_string(eval, &args, 0, "require")?;
            eval.require_module(&name)
        }),
    );

    builtins.insert(
        "include".into(),
        Arc::new(|eval, args, env| {
            let name = expect_string(eval, &args, 0, "include")?;
            eval.include_module(&name, env)
        }),
    );

    builtins.insert(
        "datastore".into(),
        Arc::new(|eval, args, _env| {
            let namespace = expect_string(eval, &args, 0, "datastore")?;
            let config = build_datastore_config(args.get(1));
            let store = eval
                .interpreter
                .datastore
                .get_or_create(&namespace, config)
                .map_err(|e| eval.raise(e.to_string()))?;
            Ok(datastore_handle(store))
        }),
    );
}

/// `context()`'s return shape: a `request()` accessor returning the
/// deep-copied invocation value, a `callstack()` accessor returning the
/// invocation-frame chain, and a `response()` accessor (only meaningful
/// inside an HTTP handler, but harmless to expose unconditionally since
/// its builders just construct a `Signal::Exit` payload).
fn build_context_object() -> Option<Value> {
    let ctx = crate::context::current()?;
    let mut obj = ObjectMap::new();

    let input = ctx.input.clone();
    obj.insert(
        "request".into(),
        NativeMethod::value("context.request", Arc::new(move |_eval, _recv, _args| Ok(input.deep_copy()))),
    );

    let frame = ctx.frame.clone();
    obj.insert(
        "callstack".into(),
        NativeMethod::value(
            "context.callstack",
            Arc::new(move |_eval, _recv, _args| Ok(Value::array(frame.chain().iter().map(|f| f.to_value()).collect()))),
        ),
    );

    obj.insert(
        "response".into(),
        NativeMethod::value("context.response", Arc::new(|_eval, _recv, _args| Ok(response_builder_object()))),
    );

    Some(Value::object(obj))
}

fn response_value(status: f64, body: String, headers: ObjectMap) -> Value {
    let mut obj = ObjectMap::new();
    obj.insert("status".into(), Value::Number(status));
    obj.insert("body".into(), Value::string(body));
    obj.insert("headers".into(), Value::object(headers));
    Value::object(obj)
}

fn single_header(name: &str, value: impl Into<String>) -> ObjectMap {
    let mut headers = ObjectMap::new();
    headers.insert(name.to_string(), Value::string(value.into()));
    headers
}

/// Each builder method constructs a `{status, body, headers}` value and
/// terminates the invocation via `Signal::Exit`, exactly like a bare
/// `exit(...)` call — deliberately the same mechanism, so the dispatcher
/// that already knows how to convert an `exit` payload to an HTTP
/// response needs no second code path for response builders.
fn response_builder_object() -> Value {
    let mut obj = ObjectMap::new();

    obj.insert(
        "json".into(),
        NativeMethod::value(
            "response.json",
            Arc::new(|_eval, _recv, args| {
                let body = args.into_iter().next().unwrap_or(Value::Nil);
                let json = value_to_json(&body).to_string();
                Err(Signal::Exit(response_value(200.0, json, single_header("Content-Type", "application/json"))))
            }),
        ),
    );

    obj.insert(
        "text".into(),
        NativeMethod::value(
            "response.text",
            Arc::new(|_eval, _recv, args| {
                let body = args.into_iter().next().map(|v| v.to_display_string()).unwrap_or_default();
                Err(Signal::Exit(response_value(200.0, body, single_header("Content-Type", "text/plain"))))
            }),
        ),
    );

    obj.insert(
        "html".into(),
        NativeMethod::value(
            "response.html",
            Arc::new(|_eval, _recv, args| {
                let body = args.into_iter().next().map(|v| v.to_display_string()).unwrap_or_default();
                Err(Signal::Exit(response_value(200.0, body, single_header("Content-Type", "text/html"))))
            }),
        ),
    );

    obj.insert(
        "redirect".into(),
        NativeMethod::value(
            "response.redirect",
            Arc::new(|_eval, _recv, args| {
                let url = args.first().and_then(Value::as_str).unwrap_or("").to_string();
                let status = args.get(1).and_then(Value::as_number).unwrap_or(302.0);
                Err(Signal::Exit(response_value(status, String::new(), single_header("Location", url))))
            }),
        ),
    );

    obj.insert(
        "file".into(),
        NativeMethod::value(
            "response.file",
            Arc::new(|eval, _recv, args| {
                let path = args.first().and_then(Value::as_str).unwrap_or("").to_string();
                match eval.interpreter.vfs.read(&path) {
                    Ok(contents) => {
                        let mime = mime_guess::from_path(&path).first_or_octet_stream().to_string();
                        Err(Signal::Exit(response_value(200.0, contents, single_header("Content-Type", mime))))
                    }
                    Err(e) => Err(Signal::Exit(response_value(
                        404.0,
                        e.to_string(),
                        single_header("Content-Type", "text/plain"),
                    ))),
                }
            }),
        ),
    );

    obj.insert(
        "error".into(),
        NativeMethod::value(
            "response.error",
            Arc::new(|_eval, _recv, args| {
                let status = args.first().and_then(Value::as_number).unwrap_or(500.0);
                let message = args
                    .get(1)
                    .map(Value::to_display_string)
                    .unwrap_or_else(|| "internal error".to_string());
                Err(Signal::Exit(response_value(status, message, single_header("Content-Type", "text/plain"))))
            }),
        ),
    );

    obj.insert(
        "response".into(),
        NativeMethod::value(
            "response.response",
            Arc::new(|_eval, _recv, args| {
                let status = args.first().and_then(Value::as_number).unwrap_or(200.0);
                let body = args.get(1).map(Value::to_display_string).unwrap_or_default();
                let mut headers = ObjectMap::new();
                if let Some(Value::Object(h)) = args.get(2) {
                    for (k, v) in h.lock().iter() {
                        headers.insert(title_case(k), v.clone());
                    }
                }
                Err(Signal::Exit(response_value(status, body, headers)))
            }),
        ),
    );

    Value::object(obj)
}

/// Canonicalizes a header name the way the wire protocol requires:
/// `content-type` -> `Content-Type`.
fn title_case(key: &str) -> String {
    key.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn value_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Nil => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.to_string()),
        Value::Array(items) => serde_json::Value::Array(items.lock().iter().map(value_to_json).collect()),
        Value::Object(map) => {
            serde_json::Value::Object(map.lock().iter().map(|(k, v)| (k.clone(), value_to_json(v))).collect())
        }
        Value::Function(_) | Value::Code(_) => serde_json::Value::Null,
        Value::Error(e) => value_to_json(&e.message),
    }
}

fn build_datastore_config(arg: Option<&Value>) -> duso_datastore::DatastoreConfig {
    let mut config = duso_datastore::DatastoreConfig::default();
    if let Some(Value::Object(map)) = arg {
        let map = map.lock();
        if let Some(p) = map.get("persistence_path").and_then(Value::as_str) {
            config.persistence_path = Some(std::path::PathBuf::from(p));
        }
        if let Some(secs) = map.get("autosave_period").and_then(Value::as_number) {
            config.autosave_period = Some(Duration::from_secs_f64(secs));
        }
    }
    config
}

/// Wraps a `Datastore` handle as an object whose fields are
/// [`NativeMethod`]s, giving scripts the same `store.set(...)` call
/// syntax they use for user-defined methods without `Datastore` itself
/// being a `ScriptFunction`.
fn datastore_handle(store: Arc<Datastore>) -> Value {
    let mut obj = ObjectMap::new();

    let s = store.clone();
    obj.insert(
        "set".into(),
        NativeMethod::value(
            "datastore.set",
            Arc::new(move |eval, _recv, args| {
                let key = expect_string(eval, &args, 0, "set")?;
                let value = args.get(1).cloned().unwrap_or(Value::Nil);
                s.set(&key, value).map_err(|e| eval.raise(e.to_string()))?;
                Ok(Value::Nil)
            }),
        ),
    );

    let s = store.clone();
    obj.insert(
        "get".into(),
        NativeMethod::value(
            "datastore.get",
            Arc::new(move |eval, _recv, args| {
                let key = expect_string(eval, &args, 0, "get")?;
                if s.name() == "sys" && key == "goroutine_count" {
                    return Ok(Value::Number(crate::context::active_count() as f64));
                }
                Ok(s.get(&key))
            }),
        ),
    );

    let s = store.clone();
    obj.insert(
        "set_once".into(),
        NativeMethod::value(
            "datastore.set_once",
            Arc::new(move |eval, _recv, args| {
                let key = expect_string(eval, &args, 0, "set_once")?;
                let value = args.get(1).cloned().unwrap_or(Value::Nil);
                Ok(Value::Boolean(s.set_once(&key, value).map_err(|e| eval.raise(e.to_string()))?))
            }),
        ),
    );

    let s = store.clone();
    obj.insert(
        "increment".into(),
        NativeMethod::value(
            "datastore.increment",
            Arc::new(move |eval, _recv, args| {
                let key = expect_string(eval, &args, 0, "increment")?;
                let delta = args.get(1).and_then(Value::as_number).unwrap_or(1.0);
                Ok(Value::Number(s.increment(&key, delta).map_err(|e| eval.raise(e.to_string()))?))
            }),
        ),
    );

    let s = store.clone();
    obj.insert(
        "push".into(),
        NativeMethod::value(
            "datastore.push",
            Arc::new(move |eval, _recv, args| {
                let key = expect_string(eval, &args, 0, "push")?;
                let item = args.get(1).cloned().unwrap_or(Value::Nil);
                Ok(Value::Number(s.push(&key, item).map_err(|e| eval.raise(e.to_string()))? as f64))
            }),
        ),
    );

    let s = store.clone();
    obj.insert(
        "delete".into(),
        NativeMethod::value(
            "datastore.delete",
            Arc::new(move |eval, _recv, args| {
                let key = expect_string(eval, &args, 0, "delete")?;
                s.delete(&key).map_err(|e| eval.raise(e.to_string()))?;
                Ok(Value::Nil)
            }),
        ),
    );

    let s = store.clone();
    obj.insert(
        "clear".into(),
        NativeMethod::value(
            "datastore.clear",
            Arc::new(move |eval, _recv, _args| {
                s.clear().map_err(|e| eval.raise(e.to_string()))?;
                Ok(Value::Nil)
            }),
        ),
    );

    let s = store.clone();
    obj.insert(
        "keys".into(),
        NativeMethod::value(
            "datastore.keys",
            Arc::new(move |_eval, _recv, _args| Ok(Value::array(s.keys().into_iter().map(Value::string).collect()))),
        ),
    );

    let s = store.clone();
    obj.insert(
        "save".into(),
        NativeMethod::value(
            "datastore.save",
            Arc::new(move |eval, _recv, _args| {
                s.save().map_err(|e| eval.raise(e.to_string()))?;
                Ok(Value::Nil)
            }),
        ),
    );

    let s = store.clone();
    obj.insert(
        "load".into(),
        NativeMethod::value(
            "datastore.load",
            Arc::new(move |eval, _recv, _args| {
                s.load().map_err(|e| eval.raise(e.to_string()))?;
                Ok(Value::Nil)
            }),
        ),
    );

    let s = store.clone();
    obj.insert(
        "wait".into(),
        NativeMethod::value(
            "datastore.wait",
            Arc::new(move |eval, _recv, args| {
                let key = expect_string(eval, &args, 0, "wait")?;
                let expected = args.get(1).filter(|v| !matches!(v, Value::Nil));
                let timeout = args.get(2).and_then(Value::as_number).map(Duration::from_secs_f64);
                s.wait(&key, expected, timeout).map_err(|e| eval.raise(e.to_string()))
            }),
        ),
    );

    let s = store.clone();
    obj.insert(
        "wait_for".into(),
        NativeMethod::value(
            "datastore.wait_for",
            Arc::new(move |eval, _recv, args| {
                let key = expect_string(eval, &args, 0, "wait_for")?;
                let predicate = args.get(1).cloned().ok_or_else(|| eval.raise("wait_for: missing predicate"))?;
                if !matches!(predicate, Value::Function(_)) {
                    return Err(eval.raise("wait_for: predicate must be callable"));
                }
                let timeout = args.get(2).and_then(Value::as_number).map(Duration::from_secs_f64);
                let mut failure: Option<Signal> = None;
                // `wait_for` releases the namespace mutex for the duration
                // of each predicate call (and around each blocking wait),
                // re-acquiring to re-check after every broadcast; a script
                // predicate that reads the same namespace would otherwise
                // deadlock on the non-reentrant lock it's already holding.
                let result = s.wait_for(
                    &key,
                    |probe| {
                        if failure.is_some() {
                            return false;
                        }
                        match eval.call_value(predicate.clone(), vec![probe.clone()]) {
                            Ok(v) => v.is_truthy(),
                            Err(sig) => {
                                failure = Some(sig);
                                false
                            }
                        }
                    },
                    timeout,
                );
                if let Some(sig) = failure {
                    return Err(sig);
                }
                result.map_err(|e| eval.raise(e.to_string()))
            }),
        ),
    );

    Value::object(obj)
}

// ---------------------------------------------------------------------
// I/O surface: sleep, input, breakpoint.
// ---------------------------------------------------------------------

fn register_io_ops(builtins: &mut HashMap<String, Builtin>) {
    builtins.insert(
        "sleep".into(),
        Arc::new(|_eval, args, _env| {
            let secs = args.into_iter().next().and_then(|v| v.as_number()).unwrap_or(0.0).max(0.0);
            let cancellation = crate::context::current().map(|c| c.cancellation.clone());
            let deadline = std::time::Instant::now() + Duration::from_secs_f64(secs);
            let poll = Duration::from_millis(20);
            while std::time::Instant::now() < deadline {
                if let Some(token) = &cancellation {
                    if token.is_cancelled() {
                        break;
                    }
                }
                let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                std::thread::sleep(remaining.min(poll));
            }
            Ok(Value::Nil)
        }),
    );

    builtins.insert(
        "input".into(),
        Arc::new(|eval, _args, _env| {
            if eval.interpreter.policy.no_stdin {
                return Err(eval.raise("input: stdin is disabled (--no-stdin)"));
            }
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map_err(|e| eval.raise(e.to_string()))?;
            if line.ends_with('\n') {
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
            }
            Ok(Value::string(line))
        }),
    );

    builtins.insert("breakpoint".into(), Arc::new(|eval, _args, env| eval.eval_breakpoint(env)));
}

// ---------------------------------------------------------------------
// VFS surface.
// ---------------------------------------------------------------------

fn register_vfs_ops(builtins: &mut HashMap<String, Builtin>) {
    builtins.insert(
        "read_file".into(),
        Arc::new(|eval, args, _env| {
            let path = expect_string(eval, &args, 0, "read_file")?;
            eval.interpreter.vfs.read(&path).map(Value::string).map_err(|e| eval.raise(e.to_string()))
        }),
    );

    builtins.insert(
        "write_file".into(),
        Arc::new(|eval, args, _env| {
            let path = expect_string(eval, &args, 0, "write_file")?;
            let contents = expect_string(eval, &args, 1, "write_file")?;
            eval.interpreter.vfs.write(&path, &contents).map_err(|e| eval.raise(e.to_string()))?;
            Ok(Value::Nil)
        }),
    );

    builtins.insert(
        "append_file".into(),
        Arc::new(|eval, args, _env| {
            let path = expect_string(eval, &args, 0, "append_file")?;
            let contents = expect_string(eval, &args, 1, "append_file")?;
            eval.interpreter.vfs.append(&path, &contents).map_err(|e| eval.raise(e.to_string()))?;
            Ok(Value::Nil)
        }),
    );

    builtins.insert(
        "file_exists".into(),
        Arc::new(|eval, args, _env| {
            let path = expect_string(eval, &args, 0, "file_exists")?;
            Ok(Value::Boolean(eval.interpreter.vfs.exists(&path)))
        }),
    );

    builtins.insert(
        "is_dir".into(),
        Arc::new(|eval, args, _env| {
            let path = expect_string(eval, &args, 0, "is_dir")?;
            Ok(Value::Boolean(eval.interpreter.vfs.is_dir(&path)))
        }),
    );

    builtins.insert(
        "remove_file".into(),
        Arc::new(|eval, args, _env| {
            let path = expect_string(eval, &args, 0, "remove_file")?;
            eval.interpreter.vfs.remove(&path).map_err(|e| eval.raise(e.to_string()))?;
            Ok(Value::Nil)
        }),
    );

    builtins.insert(
        "list_files".into(),
        Arc::new(|eval, args, _env| {
            let pattern = expect_string(eval, &args, 0, "list_files")?;
            let files = eval.interpreter.vfs.list_files(&pattern).map_err(|e| eval.raise(e.to_string()))?;
            Ok(Value::array(files.into_iter().map(Value::string).collect()))
        }),
    );

    builtins.insert(
        "copy_file".into(),
        Arc::new(|eval, args, _env| {
            let src = expect_string(eval, &args, 0, "copy_file")?;
            let dest = expect_string(eval, &args, 1, "copy_file")?;
            eval.interpreter.vfs.copy_or_move(&[src], &dest, false).map_err(|e| eval.raise(e.to_string()))?;
            Ok(Value::Nil)
        }),
    );

    builtins.insert(
        "move_file".into(),
        Arc::new(|eval, args, _env| {
            let src = expect_string(eval, &args, 0, "move_file")?;
            let dest = expect_string(eval, &args, 1, "move_file")?;
            eval.interpreter.vfs.copy_or_move(&[src], &dest, true).map_err(|e| eval.raise(e.to_string()))?;
            Ok(Value::Nil)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::DebugSession;
    use crate::eval::{Interpreter, PolicyFlags};
    use crate::module::Resolver;
    use crate::syntax::parser::parse_program;
    use duso_datastore::Registry;
    use crate::vfs::Vfs;

    fn run(src: &str) -> Value {
        let vfs = Arc::new(Vfs::new(Arc::new(Registry::new()), false));
        let resolver = Arc::new(Resolver::new(vfs.clone(), vec![]));
        let interp = Interpreter::new(Arc::new(Registry::new()), resolver, vfs, PolicyFlags::default(), Arc::new(DebugSession::new()));
        let mut evaluator = Evaluator::new(interp, "t.du", 1);
        let block = parse_program(src, "t.du").unwrap();
        let env = Environment::root();
        evaluator.eval_program(&block, &env).unwrap()
    }

    #[test]
    fn len_reports_array_object_and_string_sizes() {
        assert_eq!(run("len([1, 2, 3])").as_number(), Some(3.0));
        assert_eq!(run(r#"len("abc")"#).as_number(), Some(3.0));
        assert_eq!(run("len({ a: 1, b: 2 })").as_number(), Some(2.0));
    }

    #[test]
    fn type_reports_the_value_tag() {
        assert_eq!(run("type(1)").as_str(), Some("number"));
        assert_eq!(run(r#"type("x")"#).as_str(), Some("string"));
        assert_eq!(run("type([1])").as_str(), Some("array"));
    }

    #[test]
    fn push_pop_shift_unshift_mutate_in_place() {
        let v = run("var a = [1, 2]\npush(a, 3)\nunshift(a, 0)\npop(a)\nshift(a)\na");
        if let Value::Array(items) = v {
            let items = items.lock();
            assert_eq!(items.len(), 2);
            assert_eq!(items[0].as_number(), Some(1.0));
            assert_eq!(items[1].as_number(), Some(2.0));
        } else {
            panic!("expected array");
        }
    }

    #[test]
    fn parse_never_throws_on_bad_syntax() {
        let v = run(r#"parse("var = =")"#);
        assert_eq!(v.type_name(), "error");
    }

    #[test]
    fn parse_returns_a_code_value_on_success() {
        let v = run(r#"parse("1 + 1")"#);
        assert_eq!(v.type_name(), "code");
    }

    #[test]
    fn context_is_nil_outside_an_invocation() {
        let v = run("context()");
        assert_eq!(v.type_name(), "nil");
    }

    #[test]
    fn datastore_set_and_get_roundtrip() {
        let v = run(r#"var d = datastore("unit_test_ns")
d.set("k", 42)
d.get("k")"#);
        assert_eq!(v.as_number(), Some(42.0));
    }

    #[test]
    fn sys_goroutine_count_reads_live_rather_than_a_stored_key() {
        let v = run(r#"var sys = datastore("sys")
sys.get("goroutine_count")"#);
        assert_eq!(v.as_number(), Some(0.0));
    }

    fn run_in_dir(dir: &std::path::Path, entry_src: &str) -> Value {
        let entry_path = dir.join("main.du");
        std::fs::write(&entry_path, entry_src).unwrap();
        let vfs = Arc::new(Vfs::new(Arc::new(Registry::new()), false));
        let resolver = Arc::new(Resolver::new(vfs.clone(), vec![]));
        let interp = Interpreter::new(Arc::new(Registry::new()), resolver, vfs, PolicyFlags::default(), Arc::new(DebugSession::new()));
        let mut evaluator = Evaluator::new(interp, entry_path.to_str().unwrap().to_string(), 1);
        let block = parse_program(entry_src, entry_path.to_str().unwrap()).unwrap();
        let env = Environment::root();
        evaluator.eval_program(&block, &env).unwrap()
    }

    #[test]
    fn require_memoizes_and_never_leaks_bindings_into_caller() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("counter.du"),
            "var count = 0\nfunction bump() { count = count + 1\n return count }\nbump()",
        )
        .unwrap();
        let v = run_in_dir(
            dir.path(),
            r#"var a = require("counter")
var b = require("counter")
var leaked = type(count) == "nil"
[a, b, leaked]"#,
        );
        if let Value::Array(items) = v {
            let items = items.lock();
            assert_eq!(items[0].as_number(), Some(1.0));
            assert_eq!(items[1].as_number(), Some(1.0), "second require reuses the memoized result");
            assert_eq!(items[2].as_str(), Some("true"), "require must not leak bindings into the caller");
        } else {
            panic!("expected array");
        }
    }

    #[test]
    fn include_executes_in_callers_environment_and_leaks_bindings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.du"), "var shared = 99").unwrap();
        let v = run_in_dir(dir.path(), "include(\"lib\")\nshared");
        assert_eq!(v.as_number(), Some(99.0));
    }

    #[test]
    fn require_cycle_is_reported_as_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.du"), "require(\"b\")").unwrap();
        std::fs::write(dir.path().join("b.du"), "require(\"a\")").unwrap();
        let entry_path = dir.path().join("main.du");
        let entry_src = r#"require("a")"#;
        std::fs::write(&entry_path, entry_src).unwrap();
        let vfs = Arc::new(Vfs::new(Arc::new(Registry::new()), false));
        let resolver = Arc::new(Resolver::new(vfs.clone(), vec![]));
        let interp = Interpreter::new(Arc::new(Registry::new()), resolver, vfs, PolicyFlags::default(), Arc::new(DebugSession::new()));
        let mut evaluator = Evaluator::new(interp, entry_path.to_str().unwrap().to_string(), 1);
        let block = parse_program(entry_src, entry_path.to_str().unwrap()).unwrap();
        let env = Environment::root();
        assert!(evaluator.eval_program(&block, &env).is_err());
    }
}
