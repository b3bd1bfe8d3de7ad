//! Turns a definition plus user parameters into a concrete HTTP request.
//!
//! Every build starts from a fresh copy of the definition's body template, so
//! concurrent builds against the same definition never observe each other's
//! writes and the stored definition is never mutated.

use arcade_types::{Definition, ParamSpec, ParamTarget, ParamType, ParamValues, SYSTEM_PROMPT_PARAM};
use arcade_util::{fill_placeholder, placeholder_names, redact_headers, resolve_path};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Number, Value, json};
use tracing::{debug, warn};

use crate::error::EngineError;

/// Placeholder substituted for the API key when rendering shareable commands.
pub const API_KEY_PLACEHOLDER: &str = "<API_KEY>";

static REQUEST_ID_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("request id regex should compile"));

/// A request ready to hand to the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedRequest {
    pub method: String,
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub body: Value,
}

impl PreparedRequest {
    /// A display-safe echo of the request with credentials masked.
    pub fn redacted(&self, secret_header: Option<&str>) -> PreparedRequest {
        PreparedRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: redact_headers(&self.headers, secret_header),
            body: self.body.clone(),
        }
    }

    /// True when the body carries nothing worth sending.
    pub fn has_body(&self) -> bool {
        match &self.body {
            Value::Null => false,
            Value::Object(map) => !map.is_empty(),
            Value::Array(items) => !items.is_empty(),
            _ => true,
        }
    }
}

/// Builds the initial provider request for `definition`.
///
/// Parameters are applied in declaration order. Values of `integer` and
/// `float` params are coerced first; a value that cannot be coerced is an
/// error rather than being sent as-is.
pub fn build_request(definition: &Definition, params: &ParamValues, api_key: &str) -> Result<PreparedRequest, EngineError> {
    let request = &definition.request;
    let mut body = request.body_template.clone();

    for param in &request.params {
        let Some(raw_value) = params.get(&param.name) else {
            continue;
        };
        let target = param.target();
        if target == ParamTarget::Url {
            continue;
        }
        let value = coerce_param(param, raw_value)?;
        match target {
            ParamTarget::ChatMessage => {
                if let Some(map) = body_object(&mut body, &param.name) {
                    map.insert("messages".to_string(), json!([{"role": "user", "content": value}]));
                }
            }
            ParamTarget::BodyPath(path) => set_nested(&mut body, path, value),
            ParamTarget::TopLevel => {
                if let Some(map) = body_object(&mut body, &param.name) {
                    map.insert(param.name.clone(), value);
                }
            }
            ParamTarget::Pseudo | ParamTarget::Url => {}
        }
    }

    apply_system_prompt(&mut body, params.get(SYSTEM_PROMPT_PARAM));

    let mut headers = IndexMap::new();
    headers.insert("Content-Type".to_string(), request.content_type.clone());
    headers.extend(auth_headers(definition, api_key));
    for (name, value) in &request.headers {
        headers.insert(name.clone(), value.clone());
    }

    let url = build_url(definition, params);
    debug!(definition = %definition.id, method = %request.method, url = %url, "built provider request");

    Ok(PreparedRequest {
        method: request.method.to_ascii_uppercase(),
        url,
        headers,
        body,
    })
}

/// Headers that authenticate follow-up calls (status and result fetches).
pub fn auth_headers(definition: &Definition, api_key: &str) -> IndexMap<String, String> {
    let mut headers = IndexMap::new();
    let auth = &definition.auth;
    headers.insert(auth.header.clone(), auth.header_value(api_key));
    headers
}

/// Builds the job status URL for a polling definition.
pub fn build_status_url(definition: &Definition, request_id: &str) -> Result<String, EngineError> {
    validate_request_id(request_id)?;
    let polling = definition
        .polling()
        .ok_or_else(|| EngineError::pattern_mismatch(&definition.id, "polling"))?;
    Ok(fill_placeholder(&polling.status_url, "request_id", request_id))
}

/// Builds the job result URL for a polling definition.
pub fn build_result_url(definition: &Definition, request_id: &str) -> Result<String, EngineError> {
    validate_request_id(request_id)?;
    let polling = definition
        .polling()
        .ok_or_else(|| EngineError::pattern_mismatch(&definition.id, "polling"))?;
    Ok(fill_placeholder(&polling.result_url, "request_id", request_id))
}

/// Rejects job ids that could alter the URL they are spliced into.
pub fn validate_request_id(request_id: &str) -> Result<(), EngineError> {
    if REQUEST_ID_REGEX.is_match(request_id) {
        Ok(())
    } else {
        Err(EngineError::invalid_request_id(request_id))
    }
}

/// Renders the request as a copy-pasteable `curl` command.
///
/// The real key never appears: the auth header carries `placeholder` instead.
pub fn build_curl_command(definition: &Definition, params: &ParamValues, placeholder: &str) -> Result<String, EngineError> {
    let request = build_request(definition, params, placeholder)?;

    let mut parts = vec![format!(
        "curl -X {} '{}'",
        request.method,
        escape_single_quotes(&request.url)
    )];
    for (name, value) in &request.headers {
        parts.push(format!("  -H '{}: {}'", escape_single_quotes(name), escape_single_quotes(value)));
    }
    if request.has_body() {
        let rendered = serde_json::to_string_pretty(&request.body).unwrap_or_else(|_| request.body.to_string());
        parts.push(format!("  -d '{}'", escape_single_quotes(&rendered)));
    }
    Ok(parts.join(" \\\n"))
}

/// Renders a parameter value the way it appears inside a URL or header.
pub fn plain_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn escape_single_quotes(text: &str) -> String {
    text.replace('\'', "'\\''")
}

fn build_url(definition: &Definition, params: &ParamValues) -> String {
    let url_values = definition
        .request
        .params
        .iter()
        .filter(|param| param.url_path)
        .filter_map(|param| params.get(&param.name).map(|value| (param.name.as_str(), plain_string(value))));
    let url = resolve_path(&definition.request.url, url_values);
    let unresolved = placeholder_names(&url);
    if !unresolved.is_empty() {
        warn!(definition = %definition.id, placeholders = ?unresolved, "request url has unresolved placeholders");
    }
    url
}

/// Coerces a raw parameter value to the declared type.
fn coerce_param(param: &ParamSpec, value: &Value) -> Result<Value, EngineError> {
    let coerced = match param.r#type {
        ParamType::Integer => coerce_integer(value),
        ParamType::Float => coerce_float(value).and_then(Number::from_f64).map(Value::Number),
        ParamType::String | ParamType::Enum => Some(value.clone()),
    };
    coerced.ok_or_else(|| EngineError::param_type(&param.name, param.r#type.as_str(), value))
}

/// Integers pass through exactly; floats truncate only when the result fits
/// in `i64` or `u64`.
fn coerce_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Number(number) if number.is_i64() || number.is_u64() => Some(value.clone()),
        Value::Number(number) => number.as_f64().and_then(truncate_float),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>()
                .map(Value::from)
                .or_else(|_| text.parse::<u64>().map(Value::from))
                .ok()
        }
        Value::Bool(flag) => Some(Value::from(i64::from(*flag))),
        _ => None,
    }
}

fn truncate_float(float: f64) -> Option<Value> {
    // 2^63 and 2^64 are exact in f64; both bounds are exclusive.
    const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;
    const U64_BOUND: f64 = 18_446_744_073_709_551_616.0;
    let truncated = float.trunc();
    if !truncated.is_finite() {
        return None;
    }
    if (-I64_BOUND..I64_BOUND).contains(&truncated) {
        Some(Value::from(truncated as i64))
    } else if (0.0..U64_BOUND).contains(&truncated) {
        Some(Value::from(truncated as u64))
    } else {
        None
    }
}

fn coerce_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn body_object<'a>(body: &'a mut Value, param_name: &str) -> Option<&'a mut JsonMap<String, Value>> {
    let map = body.as_object_mut();
    if map.is_none() {
        warn!(param = %param_name, "body template is not an object; parameter dropped");
    }
    map
}

/// Pops the `_system_prompt` pseudo-param and, when non-empty, prepends it as
/// a system message to an existing `messages` list.
fn apply_system_prompt(body: &mut Value, system_prompt: Option<&Value>) {
    let Some(map) = body.as_object_mut() else {
        return;
    };
    map.shift_remove(SYSTEM_PROMPT_PARAM);

    let prompt = match system_prompt {
        Some(Value::String(text)) if !text.is_empty() => text.clone(),
        Some(Value::String(_) | Value::Null) | None => return,
        Some(other) => other.to_string(),
    };
    if let Some(Value::Array(messages)) = map.get_mut("messages") {
        messages.insert(0, json!({"role": "system", "content": prompt}));
    }
}

/// Writes `value` at a dot-separated location, creating missing mapping levels.
///
/// Purely numeric segments index into lists. Writes that would need to grow a
/// list or descend through a scalar are dropped with a warning; the validator
/// rejects definitions whose body paths cannot be honoured.
fn set_nested(body: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, intermediate)) = segments.split_last() else {
        return;
    };

    let mut current = body;
    for segment in intermediate {
        current = match current {
            Value::Array(items) if is_index(segment) => match segment.parse::<usize>().ok().and_then(|index| items.get_mut(index)) {
                Some(next) => next,
                None => {
                    warn!(body_path = %path, segment = %segment, "body path index out of range; value dropped");
                    return;
                }
            },
            Value::Object(map) => map.entry(segment.to_string()).or_insert_with(|| Value::Object(JsonMap::new())),
            _ => {
                warn!(body_path = %path, segment = %segment, "body path descends through a scalar; value dropped");
                return;
            }
        };
    }

    match current {
        Value::Array(items) if is_index(last) => match last.parse::<usize>().ok().and_then(|index| items.get_mut(index)) {
            Some(slot) => *slot = value,
            None => warn!(body_path = %path, "body path index out of range; value dropped"),
        },
        Value::Object(map) => {
            map.insert(last.to_string(), value);
        }
        _ => warn!(body_path = %path, "body path target is not a container; value dropped"),
    }
}

fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|byte| byte.is_ascii_digit())
}
