//! Minimal path queries over JSON documents.
//!
//! Definitions locate outputs, errors, job ids, poll states, and streamed
//! tokens with a small subset of JSONPath:
//!
//! - `$.a.b`: field access (the leading `$` is optional)
//! - `$.items[2].url`: array index; out of range resolves to nothing
//! - `$.items[*].url`: wildcard; the rest of the path is mapped over every element
//! - `$..key`: recursive descent for the first mapping that contains `key`
//!
//! Evaluation never fails. Anything that cannot be resolved (a missing key,
//! a type mismatch, an index out of bounds, a malformed segment) yields `None`,
//! and a JSON `null` result is reported as `None` as well.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Index(usize),
    Wildcard,
    /// A bracket expression that is neither `*` nor an index.
    Invalid,
}

/// Evaluates `path` against `value`.
///
/// An empty path or an empty document (null, `false`, `0`, `""`, `[]`, `{}`)
/// resolves to `None` without partial progress.
pub fn evaluate(value: &Value, path: &str) -> Option<Value> {
    if path.is_empty() || is_empty_document(value) {
        return None;
    }

    let path = path.trim_start_matches('$');
    if let Some(descent) = path.strip_prefix("..") {
        let key = descent.split('.').next().unwrap_or_default();
        let key = key.split('[').next().unwrap_or_default();
        return recursive_find(value, key);
    }

    let segments = parse_segments(path);
    walk(value, &segments).filter(|resolved| !resolved.is_null())
}

fn is_empty_document(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// Splits a dotted path into field, index, and wildcard segments.
///
/// `images[*]` becomes `Field("images"), Wildcard`; a bare `[0]` segment is an
/// index applied to the current value.
fn parse_segments(path: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    for raw in path.trim_matches('.').split('.').filter(|raw| !raw.is_empty()) {
        let (name, mut brackets) = match raw.find('[') {
            Some(start) if raw.ends_with(']') => (&raw[..start], &raw[start..]),
            _ => {
                segments.push(Segment::Field(raw.to_string()));
                continue;
            }
        };
        if !name.is_empty() {
            segments.push(Segment::Field(name.to_string()));
        }
        while let Some(rest) = brackets.strip_prefix('[') {
            let Some(end) = rest.find(']') else {
                segments.push(Segment::Invalid);
                break;
            };
            segments.push(parse_bracket(&rest[..end]));
            brackets = &rest[end + 1..];
        }
        if !brackets.is_empty() {
            segments.push(Segment::Invalid);
        }
    }
    segments
}

fn parse_bracket(inner: &str) -> Segment {
    let inner = inner.trim();
    if inner == "*" {
        return Segment::Wildcard;
    }
    inner.parse::<usize>().map(Segment::Index).unwrap_or(Segment::Invalid)
}

fn walk(value: &Value, segments: &[Segment]) -> Option<Value> {
    let mut current = value;
    for (position, segment) in segments.iter().enumerate() {
        if current.is_null() {
            return None;
        }
        current = match segment {
            Segment::Wildcard => {
                let Value::Array(items) = current else {
                    return None;
                };
                let remaining = &segments[position + 1..];
                let mapped = items
                    .iter()
                    .filter(|item| !item.is_null())
                    .map(|item| walk(item, remaining).unwrap_or(Value::Null))
                    .collect();
                return Some(Value::Array(mapped));
            }
            Segment::Index(index) => match current {
                Value::Array(items) => items.get(*index)?,
                _ => return None,
            },
            Segment::Field(name) => match current {
                Value::Object(map) => map.get(name)?,
                _ => return None,
            },
            Segment::Invalid => return None,
        };
    }
    Some(current.clone())
}

/// Depth-first search for `key`.
///
/// Within a mapping the first match wins. Within a list every element is
/// searched and the matches are concatenated, with list-valued matches
/// flattened one level.
fn recursive_find(value: &Value, key: &str) -> Option<Value> {
    match value {
        Value::Object(map) => {
            if let Some(found) = map.get(key) {
                return (!found.is_null()).then(|| found.clone());
            }
            map.values().find_map(|nested| recursive_find(nested, key))
        }
        Value::Array(items) => {
            let mut matches = Vec::new();
            for item in items {
                match recursive_find(item, key) {
                    Some(Value::Array(nested)) => matches.extend(nested),
                    Some(found) => matches.push(found),
                    None => {}
                }
            }
            (!matches.is_empty()).then_some(Value::Array(matches))
        }
        _ => None,
    }
}
