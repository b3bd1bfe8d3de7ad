//! Interprets provider responses through a definition's path queries.

use arcade_types::{Definition, Output, OutputSource, OutputType, PollStatus, PollingSpec};
use arcade_util::{evaluate, wrap_base64_payload};
use serde_json::Value;

/// Classifies a status response as pending, done, or failed.
///
/// `done_when` is checked first, so a response matching both predicates is
/// reported as done.
pub fn classify_poll(polling: &PollingSpec, status_response: &Value) -> PollStatus {
    let done_value = evaluate(status_response, &polling.done_when.path);
    if polling.done_when.matches(done_value.as_ref()) {
        return PollStatus::Done;
    }
    let failed_value = evaluate(status_response, &polling.failed_when.path);
    if polling.failed_when.matches(failed_value.as_ref()) {
        return PollStatus::Failed;
    }
    PollStatus::Pending
}

/// Pulls the provider's error value out of a response body.
///
/// Definitions without an error descriptor yield `None`.
pub fn extract_error(definition: &Definition, response: &Value) -> Option<Value> {
    let error = definition.response.error.as_ref()?;
    evaluate(response, &error.path)
}

/// Renders an extracted error value as a single message line.
pub fn error_message(error: &Value) -> String {
    match error {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Extracts every declared output that resolves to a value.
pub fn extract_outputs(definition: &Definition, response: &Value) -> Vec<Output> {
    definition
        .response
        .outputs
        .iter()
        .filter_map(|spec| {
            let value = evaluate(response, &spec.path)?;
            let values = match value {
                Value::Array(items) => items,
                single => vec![single],
            };
            Some(Output {
                r#type: spec.r#type,
                source: spec.source,
                value: values,
                downloadable: spec.downloadable,
                mime_type: spec.mime_type.clone(),
            })
        })
        .collect()
}

/// Finds the id of a newly created job in the submit response.
pub fn extract_request_id(polling: &PollingSpec, response: &Value) -> Option<String> {
    match evaluate(response, &polling.request_id_path)? {
        Value::String(id) => Some(id),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Wraps raw base64 image and audio payloads into self-describing data URIs.
///
/// Values that already are data URIs, and non-string values, pass through.
pub fn wrap_base64_outputs(outputs: Vec<Output>) -> Vec<Output> {
    outputs
        .into_iter()
        .map(|mut output| {
            if output.source != OutputSource::Base64 || !matches!(output.r#type, OutputType::Image | OutputType::Audio) {
                return output;
            }
            let Some(mime) = output
                .mime_type
                .clone()
                .or_else(|| output.r#type.default_mime_type().map(str::to_string))
            else {
                return output;
            };
            for value in &mut output.value {
                if let Value::String(payload) = value {
                    *payload = wrap_base64_payload(&mime, payload);
                }
            }
            output
        })
        .collect()
}
