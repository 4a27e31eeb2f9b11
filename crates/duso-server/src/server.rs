//! The HTTP server (component G): wraps a [`RouteTable`], a
//! [`ServerConfig`], and the shared [`duso_core::Interpreter`] every
//! handler invocation evaluates against. `start()` binds the listener,
//! serves behind a single catch-all `axum` route that delegates into
//! [`RouteTable::find`] and [`crate::dispatch::dispatch`], and blocks
//! until `SIGINT`/`SIGTERM` — grounded on the teacher's `client-api`
//! `axum::serve` + graceful-shutdown idiom.

use crate::config::ServerConfig;
use crate::dispatch;
use crate::request::build_request_value;
use crate::routes::{Method, RouteKind, RouteTable};
use crate::static_files;
use axum::extract::Request as AxumRequest;
use axum::response::{IntoResponse, Response};
use duso_core::context::InvocationFrame;
use duso_core::Interpreter;
use http::StatusCode;
use std::sync::Arc;
use tracing::info;

pub struct Server {
    config: ServerConfig,
    routes: RouteTable,
    interpreter: Arc<Interpreter>,
    /// The invocation frame for the script that called `server(...)` and
    /// `start()` — installed as every handler frame's parent.
    frame: Arc<InvocationFrame>,
}

impl Server {
    pub fn new(config: ServerConfig, interpreter: Arc<Interpreter>, setup_script: impl Into<String>) -> Self {
        Self {
            config,
            routes: RouteTable::new(),
            interpreter,
            frame: InvocationFrame::root(setup_script),
        }
    }

    /// `route(method_or_methods, path_prefix, handler_script_path?)`.
    /// `handler_script_path` defaults to the server's own setup script —
    /// the self-referential "gate" pattern where one file is both server
    /// setup and handler, branching on whether `context()` is `nil`.
    pub fn add_route(&self, methods: Method, prefix: String, handler_script_path: Option<String>) {
        let script_path = handler_script_path.unwrap_or_else(|| self.frame.filename.clone());
        self.routes.add(methods, prefix, RouteKind::Handler { script_path });
    }

    /// `static(url_prefix, directory)`.
    pub fn add_static(&self, prefix: String, directory: String) {
        self.routes.add(Method::Any, prefix, RouteKind::Static { directory });
    }

    /// `start()`: binds, serves, and blocks until `SIGINT`/`SIGTERM`. The
    /// `https`/`cert_file`/`key_file` config fields are accepted and
    /// retained (a script can still configure them and a reverse proxy can
    /// still read them back off `sys`) but this listener always serves
    /// plain HTTP/1.1 — the teacher's own `client-api` terminates TLS the
    /// same way, in front of the process rather than inside it.
    pub async fn start(self: Arc<Self>) -> anyhow::Result<()> {
        if self.config.https {
            tracing::warn!("https requested but TLS termination is not built into this server; serving plain HTTP (terminate TLS upstream)");
        }
        let addr = self.config.socket_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "duso http server listening");

        let server = self.clone();
        let app = axum::Router::new()
            .fallback(move |req: AxumRequest| {
                let server = server.clone();
                async move { server.handle(req).await }
            })
            .layer(tower_http::trace::TraceLayer::new_for_http());

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }

    async fn handle(&self, req: AxumRequest) -> Response {
        self.bump_counters();

        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query = req.uri().query().map(str::to_string);
        let headers = req.headers().clone();
        let body_bytes = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
            Ok(b) => b,
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        };
        let body = String::from_utf8_lossy(&body_bytes).into_owned();

        let route = match self.routes.find(&method, &path) {
            Some(route) => route,
            None => return StatusCode::NOT_FOUND.into_response(),
        };

        match route.kind {
            RouteKind::Static { directory } => static_files::serve(&self.config, &directory, &route.prefix, &path).await,
            RouteKind::Handler { script_path } => {
                let request_value = build_request_value(&method, &path, query.as_deref(), &headers, &body);
                dispatch::dispatch(
                    self.interpreter.clone(),
                    self.frame.clone(),
                    script_path,
                    request_value,
                    self.config.request_handler_timeout,
                )
                .await
            }
        }
    }

    /// `sys`'s `http_procs` counter (global) and `http_procs_<port>`
    /// (per-port), bumped via `force_increment` since `sys` is read-only
    /// to scripts but not to the runtime itself — same bypass `spawn`
    /// uses for `spawn_count`.
    fn bump_counters(&self) {
        let Ok(sys) = self.interpreter.datastore.get_or_create(
            "sys",
            duso_datastore::DatastoreConfig { read_only: true, ..Default::default() },
        ) else {
            return;
        };
        sys.force_increment("http_procs", 1.0);
        sys.force_increment(&format!("http_procs_{}", self.config.port), 1.0);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl_c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
