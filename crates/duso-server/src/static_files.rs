//! Static file routes (`static(url_prefix, directory)`): strips the
//! matched prefix off the request path, joins the remainder onto
//! `directory`, infers `Content-Type` from the extension, and serves one
//! of the configured default files for a directory hit (falling back to
//! a listing or `404` per [`crate::config::ServerConfig`]).
//!
//! Served bytes are read directly off the OS filesystem rather than
//! through `duso_core::vfs::Vfs` — the VFS abstraction is string-typed
//! (scripts only ever read/write text), which would corrupt binary
//! static assets (images, fonts). Grounded on the teacher's `client-api`
//! use of `tower_http`'s byte-oriented static-file serving.

use crate::config::ServerConfig;
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::{header, StatusCode};
use std::path::{Component, Path, PathBuf};

/// Rejects any request path containing a `..` component before it ever
/// reaches a filesystem join, closing the classic path-traversal
/// escape out of the served directory.
fn safe_join(directory: &str, relative: &str) -> Option<PathBuf> {
    let rel = Path::new(relative.trim_start_matches('/'));
    if rel.components().any(|c| matches!(c, Component::ParentDir)) {
        return None;
    }
    Some(Path::new(directory).join(rel))
}

pub async fn serve(config: &ServerConfig, directory: &str, url_prefix: &str, request_path: &str) -> Response {
    let relative = request_path.strip_prefix(url_prefix).unwrap_or(request_path);
    let Some(mut target) = safe_join(directory, relative) else {
        return (StatusCode::BAD_REQUEST, "invalid path").into_response();
    };

    if target.is_dir() {
        match find_default_file(config, &target) {
            Some(file) => target = file,
            None if config.directory_listing => return render_listing(&target, request_path),
            None => return (StatusCode::NOT_FOUND, "not found").into_response(),
        }
    }

    match tokio::fs::read(&target).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&target).first_or_octet_stream();
            ([(header::CONTENT_TYPE, mime.to_string())], Body::from(bytes)).into_response()
        }
        Err(_) => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

fn find_default_file(config: &ServerConfig, dir: &Path) -> Option<PathBuf> {
    config.default_files.iter().map(|name| dir.join(name)).find(|p| p.is_file())
}

fn render_listing(dir: &Path, request_path: &str) -> Response {
    let mut entries: Vec<String> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    entries.sort();
    let prefix = request_path.trim_end_matches('/');
    let items: String = entries
        .iter()
        .map(|name| format!("<li><a href=\"{prefix}/{name}\">{name}</a></li>"))
        .collect();
    let html = format!("<html><body><ul>{items}</ul></body></html>");
    ([(header::CONTENT_TYPE, "text/html")], html).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(safe_join("/srv/www", "../etc/passwd").is_none());
    }

    #[test]
    fn joins_a_plain_relative_path() {
        let joined = safe_join("/srv/www", "css/app.css").unwrap();
        assert_eq!(joined, PathBuf::from("/srv/www/css/app.css"));
    }
}
