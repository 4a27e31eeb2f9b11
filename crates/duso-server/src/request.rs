//! Builds the script-facing request object `{method, path, headers,
//! query, body}` from an inbound `axum`/`http` request, with canonical
//! (title-cased) header keys per the wire protocol section of the spec.

use duso_value::{ObjectMap, Value};

pub fn title_case(key: &str) -> String {
    key.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// `{method, path, headers, query, body}`. `query` is an object of the
/// first value for each repeated key, parsed with `percent_encoding`'s
/// decoder — the spec doesn't require multi-value query handling.
pub fn build_request_value(
    method: &http::Method,
    path: &str,
    query_string: Option<&str>,
    headers: &http::HeaderMap,
    body: &str,
) -> Value {
    let mut obj = ObjectMap::new();
    obj.insert("method".into(), Value::string(method.as_str()));
    obj.insert("path".into(), Value::string(path));

    let mut header_obj = ObjectMap::new();
    for (name, value) in headers.iter() {
        let key = title_case(name.as_str());
        let text = value.to_str().unwrap_or_default().to_string();
        header_obj.insert(key, Value::string(text));
    }
    obj.insert("headers".into(), Value::object(header_obj));

    obj.insert("query".into(), Value::object(parse_query(query_string.unwrap_or(""))));
    obj.insert("body".into(), Value::string(body.to_string()));
    Value::object(obj)
}

fn parse_query(raw: &str) -> ObjectMap {
    let mut out = ObjectMap::new();
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        let key = percent_decode(k);
        let value = percent_decode(v);
        out.entry(key).or_insert_with(|| Value::string(value));
    }
    out
}

fn percent_decode(s: &str) -> String {
    percent_encoding::percent_decode_str(&s.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_keys_are_title_cased() {
        assert_eq!(title_case("content-type"), "Content-Type");
        assert_eq!(title_case("x-request-id"), "X-Request-Id");
    }

    #[test]
    fn query_string_decodes_percent_and_plus() {
        let q = parse_query("name=a%20b&tag=x+y");
        assert_eq!(q.get("name").unwrap().as_str(), Some("a b"));
        assert_eq!(q.get("tag").unwrap().as_str(), Some("x y"));
    }
}
