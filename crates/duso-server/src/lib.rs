//! The HTTP server dispatcher (component G): a route table with longest-
//! prefix matching over registration order, a per-request fresh
//! evaluator, static file routes, and the three ways a handler can
//! produce a response (`exit(...)`, a `context().response()` builder, or
//! falling through to `204 No Content`).
//!
//! Grounded on the teacher's `client-api` crate: `axum::serve` plus
//! `tower_http` layers for transport plumbing, while the actual route
//! matching is application code (the longest-prefix algorithm has no
//! equivalent in `axum`'s radix-tree router, so a single catch-all `axum`
//! handler delegates into [`routes::RouteTable::find`] and
//! [`dispatch::dispatch`]).

pub mod builtins;
pub mod config;
pub mod dispatch;
pub mod request;
pub mod routes;
pub mod server;
pub mod static_files;

pub use config::ServerConfig;
pub use routes::{Method, RouteTable};
pub use server::Server;
