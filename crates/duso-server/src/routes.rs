//! The route table (component G): longest-prefix-wins matching over
//! method-filtered routes, ties broken by registration order. Routes may
//! be added after `start()`, so the table itself is read/write-lock
//! guarded (dispatch only ever takes the read half) — grounded on the
//! spec's explicit "Thread safety" paragraph in §4.G.

use parking_lot::RwLock;

/// A route's method filter: a single method, an explicit set, or a
/// wildcard matching any method.
#[derive(Debug, Clone)]
pub enum Method {
    Any,
    One(http::Method),
    Many(Vec<http::Method>),
}

impl Method {
    pub fn from_value(v: &duso_value::Value) -> Method {
        match v {
            duso_value::Value::Nil => Method::Any,
            duso_value::Value::String(s) if s.as_ref() == "*" => Method::Any,
            duso_value::Value::String(s) => Method::One(parse_method(s)),
            duso_value::Value::Array(items) => Method::Many(
                items
                    .lock()
                    .iter()
                    .filter_map(|v| v.as_str().map(parse_method))
                    .collect(),
            ),
            _ => Method::Any,
        }
    }

    fn matches(&self, m: &http::Method) -> bool {
        match self {
            Method::Any => true,
            Method::One(x) => x == m,
            Method::Many(xs) => xs.iter().any(|x| x == m),
        }
    }
}

fn parse_method(s: &str) -> http::Method {
    http::Method::from_bytes(s.to_ascii_uppercase().as_bytes()).unwrap_or(http::Method::GET)
}

#[derive(Debug, Clone)]
pub enum RouteKind {
    /// `route(...)`: `handler_script_path` defaults to the server setup
    /// script itself (the "gate pattern" — the same file runs as both
    /// server setup and handler, branching on whether `context()` is
    /// `nil`).
    Handler { script_path: String },
    /// `static(url_prefix, directory)`.
    Static { directory: String },
}

#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub methods: Method,
    pub prefix: String,
    pub kind: RouteKind,
}

/// Registration-order-indexed route list behind a read-write lock.
/// Dispatch takes the read half; `route`/`static` take the write half.
#[derive(Default)]
pub struct RouteTable {
    routes: RwLock<Vec<RouteEntry>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, methods: Method, prefix: impl Into<String>, kind: RouteKind) {
        self.routes.write().push(RouteEntry { methods, prefix: prefix.into(), kind });
    }

    /// Finds the best match for `method`/`path`: among routes whose
    /// prefix is a prefix of `path` and whose method set includes
    /// `method`, the longest prefix wins; a tie is broken by whichever
    /// was registered first. Iterating the vector in registration order
    /// and only replacing the running best on a *strictly* longer prefix
    /// gives that tie-break for free.
    pub fn find(&self, method: &http::Method, path: &str) -> Option<RouteEntry> {
        let routes = self.routes.read();
        let mut best: Option<(usize, &RouteEntry)> = None;
        for entry in routes.iter() {
            if !entry.methods.matches(method) || !path.starts_with(entry.prefix.as_str()) {
                continue;
            }
            let len = entry.prefix.len();
            if best.is_none_or(|(blen, _)| len > blen) {
                best = Some((len, entry));
            }
        }
        best.map(|(_, e)| e.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins_over_shorter_registered_first() {
        let table = RouteTable::new();
        table.add(Method::One(http::Method::GET), "/api", RouteKind::Handler { script_path: "api.du".into() });
        table.add(
            Method::One(http::Method::GET),
            "/api/users",
            RouteKind::Handler { script_path: "users.du".into() },
        );
        let hit = table.find(&http::Method::GET, "/api/users/42").unwrap();
        assert_eq!(hit.prefix, "/api/users");
        let hit = table.find(&http::Method::GET, "/api/health").unwrap();
        assert_eq!(hit.prefix, "/api");
    }

    #[test]
    fn wildcard_method_matches_anything() {
        let table = RouteTable::new();
        table.add(Method::Any, "/", RouteKind::Handler { script_path: "root.du".into() });
        assert!(table.find(&http::Method::POST, "/anything").is_some());
    }

    #[test]
    fn unmatched_method_is_excluded() {
        let table = RouteTable::new();
        table.add(Method::One(http::Method::POST), "/submit", RouteKind::Handler { script_path: "s.du".into() });
        assert!(table.find(&http::Method::GET, "/submit").is_none());
    }

    #[test]
    fn equal_length_prefixes_prefer_earliest_registration() {
        let table = RouteTable::new();
        table.add(Method::Any, "/x", RouteKind::Handler { script_path: "first.du".into() });
        table.add(Method::Any, "/x", RouteKind::Handler { script_path: "second.du".into() });
        let hit = table.find(&http::Method::GET, "/x").unwrap();
        match hit.kind {
            RouteKind::Handler { script_path } => assert_eq!(script_path, "first.du"),
            _ => panic!("expected handler"),
        }
    }
}
