//! Debug session (component J): `breakpoint()` and a triggered
//! `watch(expr...)` both enter a process-wide, TTY-serialized REPL.
//! Concurrent breakpoints queue on [`DebugSession`]'s mutex rather than
//! interleaving output — the resume signal itself is exactly the
//! teacher's `NotifyOnce` idiom (broadcast once, flag so late subscribers
//! still observe it), here realized inline since each `enter` call is
//! synchronous and single-shot rather than reused across calls.

use duso_value::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;

/// Serializes TTY access across goroutines and caches `watch()` values
/// keyed by the watched expression's source text.
pub struct DebugSession {
    tty: Mutex<()>,
    watch_cache: Mutex<HashMap<String, Value>>,
}

impl Default for DebugSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugSession {
    pub fn new() -> Self {
        Self {
            tty: Mutex::new(()),
            watch_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Enters the REPL: prints `describe` (source context, invocation-
    /// frame chain, call-frame chain — built by the caller, since this
    /// module has no access to script source or the evaluator's call
    /// stack), then loops reading lines from stdin. `c` continues, `exit`
    /// quits the process, anything else is handed to `eval_line` and the
    /// result printed. Acquiring `tty` before printing is what makes
    /// concurrent breakpoints queue instead of interleaving.
    pub fn enter(&self, describe: &str, mut eval_line: impl FnMut(&str) -> String) {
        let _guard = self.tty.lock();
        println!("{describe}");
        println!("(duso-debug) type an expression, 'c' to continue, 'exit' to quit");
        loop {
            print!("(duso-debug)> ");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            if std::io::stdin().read_line(&mut line).unwrap_or(0) == 0 {
                break; // stdin closed
            }
            match line.trim() {
                "c" => break,
                "exit" => std::process::exit(0),
                "" => continue,
                expr => println!("{}", eval_line(expr)),
            }
        }
    }

    /// Compares `current` against the cached value for `key` (the
    /// watched expression's source text) and updates the cache
    /// unconditionally. Returns `true` the first time a key is seen and
    /// on every subsequent change, matching "on any change ... enters the
    /// session."
    pub fn check_watch(&self, key: &str, current: &Value) -> bool {
        let mut cache = self.watch_cache.lock();
        let changed = match cache.get(key) {
            Some(prev) => !prev.values_equal(current),
            None => true,
        };
        cache.insert(key.to_string(), current.deep_copy());
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_reports_change_on_first_sight_and_on_diff() {
        let session = DebugSession::new();
        assert!(session.check_watch("x", &Value::Number(1.0)));
        assert!(!session.check_watch("x", &Value::Number(1.0)));
        assert!(session.check_watch("x", &Value::Number(2.0)));
    }
}
