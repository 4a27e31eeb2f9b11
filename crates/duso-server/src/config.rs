//! `ServerConfig`: everything the constructor in §4.G's opening paragraph
//! lists — `{port, address, timeout, request_handler_timeout, https
//! flags, cert_file, key_file, directory-listing flag, default-files
//! list}` — plus the ambient defaults grounded on the teacher's
//! `config.rs` per-OS-default-path idiom.

use std::time::Duration;

/// Construction-time configuration for a [`crate::Server`]. Mirrors the
/// spec's `{port, address, timeout, request_handler_timeout, https
/// flags, cert_file, key_file, directory-listing flag, default-files
/// list}` literally; `Default` picks values a local `duso serve` run
/// would want without any flags.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    /// Socket-level accept/idle timeout. `None` disables it.
    pub timeout: Option<Duration>,
    /// Per-request handler timeout; exceeding it yields `504 Gateway
    /// Timeout` to the client without cancelling the handler goroutine
    /// (the handler's `RequestContext::cancellation` token is flipped so
    /// cooperative built-ins can notice, per DESIGN.md's Open Question
    /// decision).
    pub request_handler_timeout: Option<Duration>,
    pub https: bool,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    /// When a static route's matched path is a directory and none of
    /// `default_files` exists in it: `true` renders a listing, `false`
    /// returns `404`.
    pub directory_listing: bool,
    pub default_files: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
            timeout: Some(Duration::from_secs(60)),
            request_handler_timeout: Some(Duration::from_secs(30)),
            https: false,
            cert_file: None,
            key_file: None,
            directory_listing: false,
            default_files: vec!["index.html".to_string(), "index.du".to_string()],
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        format!("{}:{}", self.address, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid server address '{}:{}': {e}", self.address, self.port))
    }
}
