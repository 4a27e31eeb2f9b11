use crate::error::DatastoreError;
use crate::persistence;
use duso_value::Value;
use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Configuration supplied on the *first* call that creates a namespace.
/// Later calls with the same namespace ignore their configuration — the
/// first caller wins, per the registry's contract.
#[derive(Debug, Clone, Default)]
pub struct DatastoreConfig {
    pub persistence_path: Option<PathBuf>,
    pub autosave_period: Option<Duration>,
    /// Set only for the runtime-reserved `sys` namespace: ordinary `set`/
    /// `increment`/`push`/etc. calls are rejected. Runtime code updates it
    /// through [`Datastore::force_set`], which is not reachable from
    /// scripts.
    pub read_only: bool,
}

struct Inner {
    data: IndexMap<String, Value>,
}

/// A single namespaced, thread-safe key/value store. Every mutation holds
/// `inner` for its duration and broadcasts on `cond` before releasing it,
/// so a waiter that wakes is guaranteed to observe the write that woke it.
pub struct Datastore {
    name: String,
    inner: Mutex<Inner>,
    cond: Condvar,
    config: DatastoreConfig,
}

impl Datastore {
    pub(crate) fn new(name: String, config: DatastoreConfig) -> Result<Self, DatastoreError> {
        let mut data = IndexMap::new();
        if let Some(path) = &config.persistence_path {
            if path.exists() {
                data = persistence::load(path)?;
            }
        }
        Ok(Self {
            name,
            inner: Mutex::new(Inner { data }),
            cond: Condvar::new(),
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn autosave_period(&self) -> Option<Duration> {
        self.config.autosave_period
    }

    fn guard_writable(&self) -> Result<(), DatastoreError> {
        if self.config.read_only {
            Err(DatastoreError::ReadOnly(self.name.clone()))
        } else {
            Ok(())
        }
    }

    pub fn set(&self, key: &str, value: Value) -> Result<(), DatastoreError> {
        self.guard_writable()?;
        self.force_set(key, value);
        Ok(())
    }

    /// Bypasses the read-only gate. Used only by runtime-internal code
    /// (e.g. `sys` metrics updates) — never reachable from a script, since
    /// the evaluator's datastore built-ins only call the gated methods.
    pub fn force_set(&self, key: &str, value: Value) {
        let mut guard = self.inner.lock();
        guard.data.insert(key.to_string(), value.deep_copy());
        self.cond.notify_all();
    }

    /// Atomic read-add-write bypassing the read-only gate, for runtime-
    /// internal counters (`sys.spawn_count`, `sys.http_procs`). Never
    /// reachable from a script.
    pub fn force_increment(&self, key: &str, delta: f64) -> f64 {
        let mut guard = self.inner.lock();
        let entry = guard.data.entry(key.to_string()).or_insert(Value::Number(0.0));
        let new_value = match entry {
            Value::Number(n) => {
                *n += delta;
                *n
            }
            other => {
                *other = Value::Number(delta);
                delta
            }
        };
        self.cond.notify_all();
        new_value
    }

    pub fn get(&self, key: &str) -> Value {
        let guard = self.inner.lock();
        guard.data.get(key).map(Value::deep_copy).unwrap_or(Value::Nil)
    }

    pub fn set_once(&self, key: &str, value: Value) -> Result<bool, DatastoreError> {
        self.guard_writable()?;
        let mut guard = self.inner.lock();
        if guard.data.contains_key(key) {
            return Ok(false);
        }
        guard.data.insert(key.to_string(), value.deep_copy());
        self.cond.notify_all();
        Ok(true)
    }

    pub fn increment(&self, key: &str, delta: f64) -> Result<f64, DatastoreError> {
        self.guard_writable()?;
        let mut guard = self.inner.lock();
        let entry = guard
            .data
            .entry(key.to_string())
            .or_insert(Value::Number(0.0));
        let new_value = match entry {
            Value::Number(n) => {
                *n += delta;
                *n
            }
            _ => {
                return Err(DatastoreError::TypeMismatch {
                    key: key.to_string(),
                    expected: "number",
                })
            }
        };
        self.cond.notify_all();
        Ok(new_value)
    }

    pub fn push(&self, key: &str, item: Value) -> Result<usize, DatastoreError> {
        self.guard_writable()?;
        let mut guard = self.inner.lock();
        let entry = guard
            .data
            .entry(key.to_string())
            .or_insert_with(Value::empty_array);
        let len = match entry {
            Value::Array(items) => {
                let mut items = items.lock();
                items.push(item.deep_copy());
                items.len()
            }
            _ => {
                return Err(DatastoreError::TypeMismatch {
                    key: key.to_string(),
                    expected: "array",
                })
            }
        };
        self.cond.notify_all();
        Ok(len)
    }

    pub fn delete(&self, key: &str) -> Result<(), DatastoreError> {
        self.guard_writable()?;
        let mut guard = self.inner.lock();
        guard.data.shift_remove(key);
        self.cond.notify_all();
        Ok(())
    }

    pub fn clear(&self) -> Result<(), DatastoreError> {
        self.guard_writable()?;
        let mut guard = self.inner.lock();
        guard.data.clear();
        self.cond.notify_all();
        Ok(())
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().data.keys().cloned().collect()
    }

    /// Blocks until the slot at `key` changes (no `expected`) or equals
    /// `expected`. "Changes" is judged relative to the value observed at
    /// the moment `wait` was called. Spurious wakeups re-check the
    /// condition; a timeout returns [`DatastoreError::Timeout`].
    pub fn wait(
        &self,
        key: &str,
        expected: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, DatastoreError> {
        let mut guard = self.inner.lock();
        let initial = guard.data.get(key).cloned();
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            let current = guard.data.get(key).cloned();
            let satisfied = match expected {
                Some(exp) => current.as_ref().is_some_and(|c| c.values_equal(exp)),
                None => changed(&initial, &current),
            };
            if satisfied {
                return Ok(current.unwrap_or(Value::Nil));
            }
            match deadline {
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return Err(DatastoreError::Timeout);
                    }
                    self.cond.wait_for(&mut guard, dl - now);
                }
                None => self.cond.wait(&mut guard),
            }
        }
    }

    /// Repeatedly applies `predicate` to the current value under the lock
    /// after every broadcast. For array slots the predicate receives the
    /// array's length (a number), not the array itself.
    pub fn wait_for<F>(
        &self,
        key: &str,
        mut predicate: F,
        timeout: Option<Duration>,
    ) -> Result<Value, DatastoreError>
    where
        F: FnMut(&Value) -> bool,
    {
        let mut guard = self.inner.lock();
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            let current = guard.data.get(key).cloned().unwrap_or(Value::Nil);
            let probe = match &current {
                Value::Array(items) => Value::Number(items.lock().len() as f64),
                other => other.clone(),
            };
            // Predicate runs with the namespace lock released: a predicate
            // that reads the same namespace (e.g. comparing against another
            // key) would otherwise re-enter this non-reentrant mutex.
            let satisfied = parking_lot::MutexGuard::unlocked(&mut guard, || predicate(&probe));
            if satisfied {
                return Ok(current);
            }
            match deadline {
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return Err(DatastoreError::Timeout);
                    }
                    self.cond.wait_for(&mut guard, dl - now);
                }
                None => self.cond.wait(&mut guard),
            }
        }
    }

    pub fn save(&self) -> Result<(), DatastoreError> {
        let path = self
            .config
            .persistence_path
            .as_ref()
            .ok_or(DatastoreError::NoPersistencePath)?;
        let guard = self.inner.lock();
        persistence::save(path, &guard.data)
    }

    pub fn load(&self) -> Result<(), DatastoreError> {
        let Some(path) = &self.config.persistence_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let data = persistence::load(path)?;
        let mut guard = self.inner.lock();
        guard.data = data;
        Ok(())
    }
}

fn changed(initial: &Option<Value>, current: &Option<Value>) -> bool {
    match (initial, current) {
        (None, None) => false,
        (None, Some(_)) | (Some(_), None) => true,
        (Some(a), Some(b)) => !a.values_equal(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn store() -> Arc<Datastore> {
        Arc::new(Datastore::new("test".into(), DatastoreConfig::default()).unwrap())
    }

    #[test]
    fn coordinated_counter_from_n_goroutines() {
        let ds = store();
        ds.set("completed", Value::Number(0.0)).unwrap();
        let handles: Vec<_> = (0..5)
            .map(|_| {
                let ds = ds.clone();
                thread::spawn(move || ds.increment("completed", 1.0).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let result = ds.wait("completed", Some(&Value::Number(5.0)), Some(Duration::from_secs(2)));
        assert!(result.is_ok());
        assert_eq!(ds.get("completed").as_number(), Some(5.0));
    }

    #[test]
    fn wait_times_out_with_no_writer() {
        let ds = store();
        let result = ds.wait("x", Some(&Value::Number(5.0)), Some(Duration::from_millis(50)));
        assert!(matches!(result, Err(DatastoreError::Timeout)));
    }

    #[test]
    fn push_and_wait_for_length() {
        let ds = store();
        ds.push("q", Value::Number(1.0)).unwrap();
        let ds2 = ds.clone();
        thread::spawn(move || {
            ds2.push("q", Value::Number(2.0)).unwrap();
        });
        let result = ds
            .wait_for("q", |v| v.as_number() == Some(2.0), Some(Duration::from_secs(2)))
            .unwrap();
        assert_eq!(result.type_name(), "array");
    }

    #[test]
    fn read_only_namespace_rejects_writes() {
        let ds = Datastore::new(
            "sys".into(),
            DatastoreConfig {
                read_only: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(matches!(
            ds.set("x", Value::Number(1.0)),
            Err(DatastoreError::ReadOnly(_))
        ));
        ds.force_set("x", Value::Number(1.0));
        assert_eq!(ds.get("x").as_number(), Some(1.0));
    }

    #[test]
    fn set_once_only_sets_first_writer() {
        let ds = store();
        assert!(ds.set_once("k", Value::Number(1.0)).unwrap());
        assert!(!ds.set_once("k", Value::Number(2.0)).unwrap());
        assert_eq!(ds.get("k").as_number(), Some(1.0));
    }

    #[test]
    fn deep_copy_on_write_and_read_isolates_mutation() {
        let ds = store();
        let arr = Value::array(vec![Value::Number(1.0)]);
        ds.set("a", arr.clone()).unwrap();
        if let Value::Array(items) = &arr {
            items.lock().push(Value::Number(2.0));
        }
        let stored = ds.get("a");
        if let Value::Array(items) = &stored {
            assert_eq!(items.lock().len(), 1, "store must not see post-set mutation");
        } else {
            unreachable!();
        }
    }
}
