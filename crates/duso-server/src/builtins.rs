//! The `server(config)` built-in and its handle's `route`/`static`/`start`
//! methods — the script-facing half of component G's constructor
//! paragraph. Lives here rather than in `duso-core` because it closes
//! over `Server`/`axum`; `duso-cli` merges [`table`]'s entries into the
//! interpreter's built-in table at startup via `duso_core::Runtime::new`'s
//! `extra_builtins` parameter, so `duso-core` stays free of any HTTP
//! dependency while still giving scripts a single flat built-in
//! namespace. Grounded on `duso_core::builtins::register_invocation_ops`'s
//! `datastore(...)` handle — a built-in that returns an object of
//! `NativeMethod`s closing over Rust state.

use crate::config::ServerConfig;
use crate::routes::{Method, RouteKind};
use crate::server::Server;
use duso_core::eval::Builtin;
use duso_core::function::NativeMethod;
use duso_value::Value;
use std::sync::Arc;
use std::time::Duration;

/// The entries `duso-cli` passes to `duso_core::Runtime::new`.
pub fn table() -> Vec<(String, Builtin)> {
    vec![("server".to_string(), Arc::new(server_builtin) as Builtin)]
}

fn server_builtin(
    eval: &mut duso_core::Evaluator,
    args: Vec<Value>,
    _env: &duso_core::Environment,
) -> Result<Value, duso_core::Signal> {
    let config = build_config(args.first());
    let server = Server::new(config, eval.interpreter.clone(), eval.file.clone());
    Ok(server_handle(Arc::new(server)))
}

fn build_config(arg: Option<&Value>) -> ServerConfig {
    let mut config = ServerConfig::default();
    let Some(Value::Object(map)) = arg else {
        return config;
    };
    let map = map.lock();

    if let Some(v) = map.get("address").and_then(Value::as_str) {
        config.address = v.to_string();
    }
    if let Some(v) = map.get("port").and_then(Value::as_number) {
        config.port = v as u16;
    }
    match map.get("timeout") {
        Some(Value::Nil) => config.timeout = None,
        Some(v) => {
            if let Some(secs) = v.as_number() {
                config.timeout = Some(Duration::from_secs_f64(secs));
            }
        }
        None => {}
    }
    match map.get("request_handler_timeout") {
        Some(Value::Nil) => config.request_handler_timeout = None,
        Some(v) => {
            if let Some(secs) = v.as_number() {
                config.request_handler_timeout = Some(Duration::from_secs_f64(secs));
            }
        }
        None => {}
    }
    if let Some(Value::Boolean(b)) = map.get("https") {
        config.https = *b;
    }
    if let Some(v) = map.get("cert_file").and_then(Value::as_str) {
        config.cert_file = Some(v.to_string());
    }
    if let Some(v) = map.get("key_file").and_then(Value::as_str) {
        config.key_file = Some(v.to_string());
    }
    if let Some(Value::Boolean(b)) = map.get("directory_listing") {
        config.directory_listing = *b;
    }
    if let Some(Value::Array(items)) = map.get("default_files") {
        config.default_files = items.lock().iter().filter_map(Value::as_str).map(String::from).collect();
    }
    config
}

fn server_handle(server: Arc<Server>) -> Value {
    let mut obj = duso_value::ObjectMap::new();

    let s = server.clone();
    obj.insert(
        "route".into(),
        NativeMethod::value(
            "server.route",
            Arc::new(move |_eval, _recv, args| {
                let methods = Method::from_value(args.first().unwrap_or(&Value::Nil));
                let prefix = args.get(1).and_then(Value::as_str).unwrap_or("/").to_string();
                let handler = args.get(2).and_then(Value::as_str).map(String::from);
                s.add_route(methods, prefix, handler);
                Ok(Value::Nil)
            }),
        ),
    );

    let s = server.clone();
    obj.insert(
        "static".into(),
        NativeMethod::value(
            "server.static",
            Arc::new(move |_eval, _recv, args| {
                let prefix = args.first().and_then(Value::as_str).unwrap_or("/").to_string();
                let directory = args.get(1).and_then(Value::as_str).unwrap_or(".").to_string();
                s.add_static(prefix, directory);
                Ok(Value::Nil)
            }),
        ),
    );

    let s = server.clone();
    obj.insert(
        "start".into(),
        NativeMethod::value(
            "server.start",
            Arc::new(move |eval, _recv, _args| {
                // `start()` blocks synchronously until shutdown; safe to
                // `block_on` here because every script body — including
                // the top-level one — runs inside a `spawn_blocking` task
                // (see `duso-cli`'s entry point and
                // `duso_core::invoke::run`'s identical use of
                // `Handle::block_on` from a blocking context).
                let handle = tokio::runtime::Handle::current();
                match handle.block_on(Arc::clone(&s).start()) {
                    Ok(()) => Ok(Value::Nil),
                    Err(e) => Err(eval.raise(e.to_string())),
                }
            }),
        ),
    );

    Value::object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_survives_an_empty_argument() {
        let config = build_config(None);
        assert_eq!(config.port, ServerConfig::default().port);
    }

    #[test]
    fn config_object_overrides_port_and_address() {
        let mut map = duso_value::ObjectMap::new();
        map.insert("port".into(), Value::Number(9090.0));
        map.insert("address".into(), Value::string("0.0.0.0"));
        let config = build_config(Some(&Value::object(map)));
        assert_eq!(config.port, 9090);
        assert_eq!(config.address, "0.0.0.0");
    }
}
