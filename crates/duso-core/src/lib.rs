//! The evaluator, its environment/closure model, the invocation
//! subsystem, the goroutine-local context table, the module resolver and
//! cache, the VFS, and the debug session — everything in
//! §4.B–§4.E/§4.H–§4.J of the runtime core. `duso-server` and `duso-cli`
//! depend on this crate and wire it to a socket or a terminal.

pub mod builtins;
pub mod context;
pub mod debug;
pub mod env;
pub mod error;
pub mod eval;
pub mod function;
pub mod invoke;
pub mod module;
pub mod syntax;
pub mod vfs;

pub use context::{ContextGuard, GoroutineId, InvocationFrame, InvocationReason, RequestContext};
pub use env::Environment;
pub use error::RuntimeError;
pub use eval::{Builtin, Evaluator, Interpreter, PolicyFlags, Signal};
pub use module::{LoadKind, ModuleError, Resolver};
pub use vfs::{Vfs, VfsError};

use std::sync::Arc;

/// Everything a process needs to build evaluators from: the shared
/// [`Interpreter`] state plus the pieces that are constructed once at
/// startup and handed to every invocation path (`run`, `spawn`, HTTP
/// dispatch, the one-shot CLI script). Grounded on the teacher's
/// `StandaloneEnv`-style "one struct holds the whole running process"
/// shape (`standalone/src/lib.rs`).
pub struct Runtime {
    pub interpreter: Arc<Interpreter>,
}

impl Runtime {
    /// `extra_builtins` lets a caller above this crate (`duso-cli`) merge
    /// in built-ins this crate has no compile-time knowledge of — namely
    /// `duso-server`'s `server(...)`, which would otherwise need
    /// `duso-core` to depend on the HTTP stack it is itself depended on
    /// by. Merged via `Arc::get_mut` while the `Arc` this function just
    /// created still has exactly one owner, so no interior mutability is
    /// needed on `Interpreter::builtins` for this one-time setup step.
    pub fn new(
        datastore: Arc<duso_datastore::Registry>,
        lib_dirs: Vec<String>,
        policy: PolicyFlags,
        extra_builtins: Vec<(String, eval::Builtin)>,
    ) -> Arc<Self> {
        let vfs = Arc::new(Vfs::new(datastore.clone(), policy.no_fs_writes));
        let resolver = Arc::new(Resolver::new(vfs.clone(), lib_dirs));
        let debug_session = Arc::new(debug::DebugSession::new());
        let mut interpreter = Interpreter::new(datastore, resolver, vfs, policy, debug_session);
        if !extra_builtins.is_empty() {
            let interp = Arc::get_mut(&mut interpreter).expect("fresh Interpreter Arc has a single owner");
            interp.builtins.extend(extra_builtins);
        }
        Arc::new(Self { interpreter })
    }

    /// Builds a fresh evaluator for a brand-new top-level invocation (the
    /// CLI's one-shot script, or the HTTP server's setup-time self-eval)
    /// sharing this runtime's built-ins, datastore, resolver, and policy.
    pub fn fresh_evaluator(&self, file: impl Into<String>) -> (Evaluator, GoroutineId) {
        let gid = context::next_goroutine_id();
        (Evaluator::new(self.interpreter.clone(), file, gid), gid)
    }
}
