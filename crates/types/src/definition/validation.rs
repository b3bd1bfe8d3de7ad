//! Structural and semantic validation of raw definition JSON.
//!
//! Validation runs before a definition is deserialized into the typed model so
//! that every problem can be reported, not just the first one serde trips over.
//! Each rule is independent; messages accumulate and the returned list is empty
//! exactly when the definition can be trusted at runtime. A definition that
//! passes every rule is finally deserialized into [`Definition`], so a clean
//! report always means the registry can load it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map as JsonMap, Value};

use super::{Definition, REQUEST_ID_PLACEHOLDER, SCHEMA_VERSION};

const REQUIRED_TOP_LEVEL: &[&str] = &[
    "schema_version",
    "id",
    "provider",
    "name",
    "auth",
    "request",
    "interaction",
    "response",
];
const VALID_PARAM_TYPES: &[&str] = &["string", "integer", "float", "enum"];
const VALID_UI_TYPES: &[&str] = &["textarea", "dropdown", "slider", "text"];
const VALID_PATTERNS: &[&str] = &["polling", "streaming", "sync"];
const VALID_OUTPUT_TYPES: &[&str] = &["text", "image", "audio", "video"];
const VALID_OUTPUT_SOURCES: &[&str] = &["inline", "url", "base64"];
const POLLING_FIELDS: &[&str] = &[
    "status_url",
    "result_url",
    "request_id_path",
    "poll_interval_ms",
    "done_when",
    "failed_when",
];

static DEFINITION_ID_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9-]+$").expect("definition id regex should compile"));

static EMPTY_OBJECT: Lazy<JsonMap<String, Value>> = Lazy::new(JsonMap::new);

/// Validates one raw definition and returns every violation found.
pub fn validate_definition(definition: &Value) -> Vec<String> {
    let Some(root) = definition.as_object() else {
        return vec!["Definition must be a JSON object".to_string()];
    };
    let mut errors = Vec::new();

    validate_top_level(root, &mut errors);
    validate_auth(object_field(root, "auth"), &mut errors);

    let request = object_field(root, "request");
    let params = array_field(request, "params");
    validate_request(request, params, &mut errors);
    validate_interaction(object_field(root, "interaction"), &mut errors);
    validate_response(object_field(root, "response"), &mut errors);
    validate_examples(array_field(root, "examples"), params, &mut errors);
    validate_body_paths(request.get("body_template"), params, &mut errors);

    if errors.is_empty()
        && let Err(error) = serde_json::from_value::<Definition>(definition.clone())
    {
        errors.push(format!("Cannot deserialize definition: {error}"));
    }
    errors
}

/// A definition id that appears more than once in a corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateDefinitionId {
    pub id: String,
    /// Source (usually a file path) of the first definition carrying the id.
    pub first_source: String,
    /// Source of the later definition that repeats it.
    pub duplicate_source: String,
}

impl DuplicateDefinitionId {
    pub fn message(&self) -> String {
        format!("Duplicate id '{}' (also in {})", self.id, self.first_source)
    }
}

/// Finds repeated ids across a corpus, in iteration order.
///
/// The first occurrence of an id is treated as the owner; every later
/// occurrence is reported against it. Definitions without a string id are
/// ignored here because [`validate_definition`] already reports them.
pub fn find_duplicate_ids<'a, I>(definitions: I) -> Vec<DuplicateDefinitionId>
where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    let mut owners: Vec<(&str, &str)> = Vec::new();
    let mut duplicates = Vec::new();
    for (source, definition) in definitions {
        let Some(id) = definition.get("id").and_then(Value::as_str).filter(|id| !id.is_empty()) else {
            continue;
        };
        match owners.iter().find(|(owner_id, _)| *owner_id == id) {
            Some((_, first_source)) => duplicates.push(DuplicateDefinitionId {
                id: id.to_string(),
                first_source: first_source.to_string(),
                duplicate_source: source.to_string(),
            }),
            None => owners.push((id, source)),
        }
    }
    duplicates
}

fn validate_top_level(root: &JsonMap<String, Value>, errors: &mut Vec<String>) {
    for field in REQUIRED_TOP_LEVEL {
        if !root.contains_key(*field) {
            errors.push(format!("Missing required field: {field}"));
        }
    }

    let version_ok = root
        .get("schema_version")
        .and_then(Value::as_u64)
        .is_some_and(|version| version == SCHEMA_VERSION);
    if !version_ok {
        errors.push(format!("schema_version must be {SCHEMA_VERSION}"));
    }

    match root.get("id") {
        Some(Value::String(id)) if !id.is_empty() && !DEFINITION_ID_REGEX.is_match(id) => {
            errors.push(format!("id '{id}' must be lowercase alphanumeric with hyphens"));
        }
        Some(Value::String(_)) | None => {}
        Some(other) => errors.push(format!("id '{other}' must be a string")),
    }
}

fn validate_auth(auth: &JsonMap<String, Value>, errors: &mut Vec<String>) {
    if auth.get("type").and_then(Value::as_str) != Some("header") {
        errors.push("auth.type must be 'header'".to_string());
    }
    if !auth.contains_key("header") {
        errors.push("auth.header is required".to_string());
    }
    if !auth.contains_key("env_key") {
        errors.push("auth.env_key is required".to_string());
    }
    let validation_url = string_field(auth, "validation_url");
    if !validation_url.is_empty() && !validation_url.starts_with("https://") {
        errors.push("auth.validation_url must start with https://".to_string());
    }
}

fn validate_request(request: &JsonMap<String, Value>, params: &[Value], errors: &mut Vec<String>) {
    if !request.contains_key("method") {
        errors.push("request.method is required".to_string());
    }
    if !string_field(request, "url").starts_with("https://") {
        errors.push("request.url must start with https://".to_string());
    }
    if params.is_empty() {
        errors.push("request.params must have at least one entry".to_string());
    }

    let mut has_required = false;
    for param in params {
        let param = param.as_object().unwrap_or(&EMPTY_OBJECT);
        let name = param.get("name").and_then(Value::as_str).unwrap_or("<unnamed>");
        if !param.contains_key("name") {
            errors.push("Param missing 'name'".to_string());
        }

        let param_type = param.get("type").and_then(Value::as_str);
        match param.get("type") {
            None => errors.push(format!("Param '{name}' missing 'type'")),
            Some(value) if !value.as_str().is_some_and(|text| VALID_PARAM_TYPES.contains(&text)) => errors.push(format!(
                "Param '{name}' type '{}' not in {}",
                display_value(value),
                format_allowed(VALID_PARAM_TYPES)
            )),
            Some(_) => {}
        }

        let ui = param.get("ui").and_then(Value::as_str);
        match param.get("ui") {
            None => errors.push(format!("Param '{name}' missing 'ui'")),
            Some(value) if !value.as_str().is_some_and(|text| VALID_UI_TYPES.contains(&text)) => errors.push(format!(
                "Param '{name}' ui '{}' not in {}",
                display_value(value),
                format_allowed(VALID_UI_TYPES)
            )),
            Some(_) => {}
        }

        let has_options = param
            .get("options")
            .and_then(Value::as_array)
            .is_some_and(|options| !options.is_empty());
        if param_type == Some("enum") && !has_options {
            errors.push(format!("Param '{name}' is enum but has no options"));
        }
        if ui == Some("slider") && !matches!(param_type, Some("integer" | "float")) {
            errors.push(format!(
                "Param '{name}' uses slider but type is '{}' (must be integer or float)",
                param_type.unwrap_or("none")
            ));
        }

        match param.get("required") {
            Some(Value::Bool(true)) => has_required = true,
            Some(Value::Bool(false)) | None => {}
            Some(other) => errors.push(format!("Param '{name}' required must be true or false, got {other}")),
        }
    }

    if !has_required {
        errors.push("At least one param must be required: true".to_string());
    }
}

fn validate_interaction(interaction: &JsonMap<String, Value>, errors: &mut Vec<String>) {
    let pattern = string_field(interaction, "pattern");
    if !VALID_PATTERNS.contains(&pattern) {
        errors.push(format!("interaction.pattern '{pattern}' not in {}", format_allowed(VALID_PATTERNS)));
    }

    match pattern {
        "polling" => {
            for field in POLLING_FIELDS {
                if !interaction.contains_key(*field) {
                    errors.push(format!("Polling pattern missing: {field}"));
                }
            }
            for field in ["status_url", "result_url"] {
                let url = string_field(interaction, field);
                if !url.is_empty() && !url.contains(REQUEST_ID_PLACEHOLDER) {
                    errors.push(format!("{field} must contain {REQUEST_ID_PLACEHOLDER} placeholder"));
                }
            }
            for field in ["done_when", "failed_when"] {
                let Some(predicate) = interaction.get(field) else {
                    continue;
                };
                let predicate = predicate.as_object().unwrap_or(&EMPTY_OBJECT);
                if !predicate.contains_key("path") {
                    errors.push(format!("{field} missing 'path'"));
                }
                if !predicate.contains_key("equals") && !predicate.contains_key("in") {
                    errors.push(format!("{field} must have 'equals' or 'in'"));
                }
            }
        }
        "streaming" => {
            if !interaction.contains_key("stream_path") {
                errors.push("Streaming pattern missing: stream_path".to_string());
            }
        }
        _ => {}
    }
}

fn validate_response(response: &JsonMap<String, Value>, errors: &mut Vec<String>) {
    let outputs = array_field(response, "outputs");
    if outputs.is_empty() {
        errors.push("response.outputs must have at least one entry".to_string());
    }
    for output in outputs {
        let output = output.as_object().unwrap_or(&EMPTY_OBJECT);
        if !output.contains_key("path") {
            errors.push("Output missing 'path'".to_string());
        }
        match output.get("type") {
            None => errors.push("Output missing 'type'".to_string()),
            Some(value) if !value.as_str().is_some_and(|text| VALID_OUTPUT_TYPES.contains(&text)) => errors.push(format!(
                "Output type '{}' not in {}",
                display_value(value),
                format_allowed(VALID_OUTPUT_TYPES)
            )),
            Some(_) => {}
        }
        match output.get("source") {
            None => errors.push("Output missing 'source'".to_string()),
            Some(value) if !value.as_str().is_some_and(|text| VALID_OUTPUT_SOURCES.contains(&text)) => errors.push(format!(
                "Output source '{}' not in {}",
                display_value(value),
                format_allowed(VALID_OUTPUT_SOURCES)
            )),
            Some(_) => {}
        }
    }

    match response.get("error") {
        None => errors.push("response.error is required".to_string()),
        Some(error) if error.get("path").is_none() => errors.push("response.error must have a 'path'".to_string()),
        Some(_) => {}
    }
}

fn validate_examples(examples: &[Value], params: &[Value], errors: &mut Vec<String>) {
    if examples.is_empty() {
        errors.push("examples array must have at least one entry".to_string());
    }

    let required_names: Vec<&str> = params
        .iter()
        .filter(|param| param.get("required").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|param| param.get("name").and_then(Value::as_str))
        .collect();

    for (index, example) in examples.iter().enumerate() {
        let example = example.as_object().unwrap_or(&EMPTY_OBJECT);
        if !example.contains_key("label") {
            errors.push(format!("Example {index} missing 'label'"));
        }
        let Some(example_params) = example.get("params") else {
            errors.push(format!("Example {index} missing 'params'"));
            continue;
        };
        let label = example
            .get("label")
            .map(display_value)
            .unwrap_or_else(|| index.to_string());
        for name in &required_names {
            if example_params.get(*name).is_none() {
                errors.push(format!("Example '{label}' missing required param '{name}'"));
            }
        }
    }
}

/// Every intermediate segment of a param's `body_path` must already exist in
/// the body template, otherwise the value can never be written at build time.
fn validate_body_paths(body_template: Option<&Value>, params: &[Value], errors: &mut Vec<String>) {
    let empty_template = Value::Object(JsonMap::new());
    let body_template = body_template.unwrap_or(&empty_template);

    for param in params {
        let body_path = param.get("body_path").and_then(Value::as_str).unwrap_or_default();
        if body_path.is_empty() || body_path.starts_with('_') {
            continue;
        }
        let segments: Vec<&str> = body_path.split('.').collect();
        let intermediate = &segments[..segments.len() - 1];
        if !template_contains_path(body_template, intermediate) {
            errors.push(format!(
                "Param '{}' body_path '{}' references missing intermediate path in body_template",
                param.get("name").and_then(Value::as_str).unwrap_or("<unnamed>"),
                body_path
            ));
        }
    }
}

fn template_contains_path(template: &Value, segments: &[&str]) -> bool {
    let mut current = template;
    for segment in segments {
        current = match current {
            Value::Object(map) => match map.get(*segment) {
                Some(next) => next,
                None => return false,
            },
            Value::Array(items) if is_index_segment(segment) => match segment.parse::<usize>().ok().and_then(|index| items.get(index)) {
                Some(next) => next,
                None => return false,
            },
            _ => return false,
        };
    }
    true
}

fn is_index_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|byte| byte.is_ascii_digit())
}

fn object_field<'a>(map: &'a JsonMap<String, Value>, key: &str) -> &'a JsonMap<String, Value> {
    map.get(key).and_then(Value::as_object).unwrap_or(&EMPTY_OBJECT)
}

fn array_field<'a>(map: &'a JsonMap<String, Value>, key: &str) -> &'a [Value] {
    map.get(key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default()
}

fn string_field<'a>(map: &'a JsonMap<String, Value>, key: &str) -> &'a str {
    map.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn format_allowed(allowed: &[&str]) -> String {
    let mut sorted = allowed.to_vec();
    sorted.sort_unstable();
    format!("[{}]", sorted.join(", "))
}
