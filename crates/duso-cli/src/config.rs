//! Parses the `--config` blob into a [`duso_value::Value`] for the `sys`
//! datastore: JSON first, falling back to comma-separated `key=value`
//! pairs. Grounded on `duso_core::builtins::value_to_json`'s shape, run
//! in reverse (`serde_json::Value` -> `duso_value::Value`) since this
//! crate sits above `duso-core` and populates `sys` rather than reading
//! it back out to JSON.

use duso_value::{ObjectMap, Value};

pub fn parse_config_blob(blob: &str) -> Value {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(blob) {
        return json_to_value(&json);
    }
    key_value_pairs(blob)
}

fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::string(s.clone()),
        serde_json::Value::Array(items) => Value::array(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => {
            let mut out = ObjectMap::new();
            for (k, v) in map {
                out.insert(k.clone(), json_to_value(v));
            }
            Value::object(out)
        }
    }
}

fn key_value_pairs(blob: &str) -> Value {
    let mut out = ObjectMap::new();
    for pair in blob.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((k, v)) => out.insert(k.trim().to_string(), Value::string(v.trim())),
            None => out.insert(pair.to_string(), Value::Boolean(true)),
        };
    }
    Value::object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_json_object_blob() {
        let v = parse_config_blob(r#"{"level": "debug", "retries": 3}"#);
        let Value::Object(map) = v else { panic!("expected object") };
        let map = map.lock();
        assert_eq!(map.get("level").and_then(Value::as_str), Some("debug"));
        assert_eq!(map.get("retries").and_then(Value::as_number), Some(3.0));
    }

    #[test]
    fn falls_back_to_key_value_pairs_when_not_json() {
        let v = parse_config_blob("env=staging,verbose");
        let Value::Object(map) = v else { panic!("expected object") };
        let map = map.lock();
        assert_eq!(map.get("env").and_then(Value::as_str), Some("staging"));
        assert!(matches!(map.get("verbose"), Some(Value::Boolean(true))));
    }

    #[test]
    fn empty_blob_yields_an_empty_object() {
        let v = parse_config_blob("");
        let Value::Object(map) = v else { panic!("expected object") };
        assert!(map.lock().is_empty());
    }
}
