//! JSON persistence for a single namespace. Functions and code values are
//! never persisted — by the time a value reaches the store it has already
//! been deep-copied, which collapses them to `nil`, so the only values
//! this module ever sees are primitives, arrays, and objects.

use crate::error::DatastoreError;
use duso_value::{ObjectMap, Value};
use indexmap::IndexMap;
use std::path::Path;

pub fn value_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Nil => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.to_string()),
        Value::Array(items) => {
            serde_json::Value::Array(items.lock().iter().map(value_to_json).collect())
        }
        Value::Object(map) => serde_json::Value::Object(
            map.lock()
                .iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
        Value::Function(_) | Value::Code(_) | Value::Error(_) => serde_json::Value::Null,
    }
}

pub fn json_to_value(j: serde_json::Value) -> Value {
    match j {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Value::string(s),
        serde_json::Value::Array(items) => Value::array(items.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => {
            let mut out = ObjectMap::new();
            for (k, v) in map {
                out.insert(k, json_to_value(v));
            }
            Value::object(out)
        }
    }
}

pub fn save(path: &Path, data: &IndexMap<String, Value>) -> Result<(), DatastoreError> {
    let mut obj = serde_json::Map::with_capacity(data.len());
    for (k, v) in data {
        obj.insert(k.clone(), value_to_json(v));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(&serde_json::Value::Object(obj))?;
    std::fs::write(path, text)?;
    Ok(())
}

pub fn load(path: &Path) -> Result<IndexMap<String, Value>, DatastoreError> {
    let text = std::fs::read_to_string(path)?;
    let json: serde_json::Value = serde_json::from_str(&text)?;
    let mut out = IndexMap::new();
    if let serde_json::Value::Object(map) = json {
        for (k, v) in map {
            out.insert(k, json_to_value(v));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_primitives_arrays_objects() {
        let mut data = IndexMap::new();
        data.insert("n".to_string(), Value::Number(42.0));
        data.insert(
            "arr".to_string(),
            Value::array(vec![Value::Number(1.0), Value::string("x")]),
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        save(&path, &data).unwrap();
        let loaded = load(&path).unwrap();
        assert!(loaded["n"].values_equal(&Value::Number(42.0)));
        assert!(loaded["arr"].values_equal(&data["arr"]));
    }

    #[test]
    fn missing_file_is_not_an_error_for_caller_that_checks_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(!path.exists());
    }
}
