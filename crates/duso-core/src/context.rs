//! Goroutine-local context (component D): a process-wide table mapping a
//! goroutine id to its [`RequestContext`], installed before evaluation
//! begins and cleared on return by the invocation subsystem (E) and the
//! HTTP server (G). `context()` (the built-in) reads the *calling*
//! goroutine's entry via the thread-local current-id, set once per
//! `spawn_blocking` task — the Rust analogue of goroutine-local storage.

use duso_value::Value;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type GoroutineId = u64;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_goroutine_id() -> GoroutineId {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

thread_local! {
    static CURRENT_GOROUTINE: Cell<Option<GoroutineId>> = const { Cell::new(None) };
}

/// Sets the current task's goroutine id. Called once at the top of every
/// invocation body (main script, `run`/`spawn` target, HTTP handler).
pub fn set_current(gid: GoroutineId) {
    CURRENT_GOROUTINE.with(|c| c.set(Some(gid)));
}

pub fn current_goroutine_id() -> Option<GoroutineId> {
    CURRENT_GOROUTINE.with(|c| c.get())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationReason {
    HttpRoute,
    Run,
    Spawn,
}

impl InvocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationReason::HttpRoute => "http_route",
            InvocationReason::Run => "run",
            InvocationReason::Spawn => "spawn",
        }
    }
}

/// A node in the cross-goroutine call chain. Walking `parent` yields the
/// invocation stack a script observes via `context().callstack()`.
#[derive(Debug)]
pub struct InvocationFrame {
    pub filename: String,
    pub line: usize,
    pub col: usize,
    pub reason: InvocationReason,
    pub details: String,
    pub parent: Option<Arc<InvocationFrame>>,
}

impl InvocationFrame {
    pub fn root(filename: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            filename: filename.into(),
            line: 0,
            col: 0,
            reason: InvocationReason::Run,
            details: String::new(),
            parent: None,
        })
    }

    pub fn chain(self: &Arc<Self>) -> Vec<Arc<InvocationFrame>> {
        let mut out = vec![self.clone()];
        let mut cur = self.clone();
        while let Some(parent) = cur.parent.clone() {
            out.push(parent.clone());
            cur = parent;
        }
        out
    }

    pub fn to_value(&self) -> Value {
        let mut obj = duso_value::ObjectMap::new();
        obj.insert("filename".into(), Value::string(self.filename.clone()));
        obj.insert("line".into(), Value::Number(self.line as f64));
        obj.insert("col".into(), Value::Number(self.col as f64));
        obj.insert("reason".into(), Value::string(self.reason.as_str()));
        obj.insert("details".into(), Value::string(self.details.clone()));
        Value::object(obj)
    }
}

/// Goroutine-local handle a script reaches through `context()`. Lifetime
/// is bounded by the invocation: installed in [`CONTEXTS`] before
/// evaluation begins, removed on return.
pub struct RequestContext {
    pub frame: Arc<InvocationFrame>,
    /// The inbound request object (HTTP) or the deep-copied context value
    /// passed to `run`/`spawn`. `nil` if none was supplied.
    pub input: Value,
    /// Flipped by the HTTP dispatcher on `request_handler_timeout`
    /// expiry; cooperative built-ins (`sleep`, datastore waits, `fetch`)
    /// check it opportunistically. The handler goroutine itself is never
    /// forcefully killed.
    pub cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new(frame: Arc<InvocationFrame>, input: Value) -> Self {
        Self {
            frame,
            input,
            cancellation: CancellationToken::new(),
        }
    }
}

static CONTEXTS: Lazy<Mutex<HashMap<GoroutineId, Arc<RequestContext>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Installs `ctx` for `gid`. Called by the invocation subsystem and the
/// HTTP server before handing control to a fresh evaluator.
pub fn set(gid: GoroutineId, ctx: Arc<RequestContext>) {
    CONTEXTS.lock().insert(gid, ctx);
}

/// Removes `gid`'s entry. Always called in a `defer`-style guard so it
/// runs even if evaluation panics or errors.
pub fn clear(gid: GoroutineId) {
    CONTEXTS.lock().remove(&gid);
}

pub fn get(gid: GoroutineId) -> Option<Arc<RequestContext>> {
    CONTEXTS.lock().get(&gid).cloned()
}

/// Number of goroutines currently holding an installed context (an active
/// HTTP handler, `run`, or `spawn` invocation). Backs `sys`'s live
/// `goroutine_count` entry; the main script thread is not counted since it
/// installs no [`RequestContext`] of its own.
pub fn active_count() -> usize {
    CONTEXTS.lock().len()
}

/// Returns the calling goroutine's entry, or `None` if this thread has no
/// goroutine id installed or no context was ever set for it — by
/// definition, a thread without an installed entry is not running inside
/// an invocation handler.
pub fn current() -> Option<Arc<RequestContext>> {
    current_goroutine_id().and_then(get)
}

/// Returns a closure that re-reads `gid`'s context on every call. Used by
/// the HTTP server and invocation subsystem to hand a late-binding getter
/// to code that runs after context installation but needs to observe
/// later mutations (e.g. the cancellation token flipping on timeout).
pub fn getter(gid: GoroutineId) -> impl Fn() -> Option<Arc<RequestContext>> {
    move || get(gid)
}

/// RAII guard that clears `gid`'s context on drop, installing the
/// install -> evaluate -> defer-clear pattern without scattering
/// `clear()` calls at every early-return site.
pub struct ContextGuard(GoroutineId);

impl ContextGuard {
    pub fn install(gid: GoroutineId, ctx: Arc<RequestContext>) -> Self {
        set(gid, ctx);
        set_current(gid);
        ContextGuard(gid)
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        clear(self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_none_without_an_installed_entry() {
        assert!(get(999_999).is_none());
    }

    #[test]
    fn install_and_guard_drop_clears_entry() {
        let gid = next_goroutine_id();
        let frame = InvocationFrame::root("main.du");
        {
            let _guard = ContextGuard::install(gid, Arc::new(RequestContext::new(frame, Value::Nil)));
            assert!(get(gid).is_some());
        }
        assert!(get(gid).is_none());
    }

    #[test]
    fn invocation_frame_chain_walks_to_root() {
        let root = InvocationFrame::root("main.du");
        let child = Arc::new(InvocationFrame {
            filename: "worker.du".into(),
            line: 3,
            col: 1,
            reason: InvocationReason::Spawn,
            details: String::new(),
            parent: Some(root.clone()),
        });
        assert_eq!(child.chain().len(), 2);
    }
}
