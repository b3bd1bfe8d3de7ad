//! Error types for request building and provider interaction.

use serde_json::Value;
use thiserror::Error;

/// Main error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A declared `integer`/`float` parameter could not be coerced.
    #[error("Parameter '{name}' expects {expected}, got '{value}'")]
    ParamType { name: String, expected: String, value: String },

    /// A job id contains characters outside `[A-Za-z0-9_-]`.
    #[error("Invalid request_id: {request_id}")]
    InvalidRequestId { request_id: String },

    /// A polling-only operation was requested for a definition of another pattern.
    #[error("Definition '{id}' does not use the {expected} interaction pattern")]
    PatternMismatch { id: String, expected: String },

    /// The provider could not be reached, answered with a non-success status,
    /// or returned a body that is not JSON.
    #[error("Upstream error: {message}")]
    Upstream {
        message: String,
        status: Option<u16>,
        /// Provider body, kept so callers can show the original error.
        body: Option<Value>,
    },

    #[error("Timeout error: {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The provider reported the job as failed.
    #[error("Job {request_id} failed: {message}")]
    JobFailed { request_id: String, message: String, body: Value },
}

impl EngineError {
    /// Create a parameter coercion error.
    pub fn param_type(name: impl Into<String>, expected: impl Into<String>, value: &Value) -> Self {
        let value = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        Self::ParamType {
            name: name.into(),
            expected: expected.into(),
            value,
        }
    }

    /// Create an invalid request id error.
    pub fn invalid_request_id(request_id: impl Into<String>) -> Self {
        Self::InvalidRequestId {
            request_id: request_id.into(),
        }
    }

    /// Create a pattern mismatch error.
    pub fn pattern_mismatch(id: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::PatternMismatch {
            id: id.into(),
            expected: expected.into(),
        }
    }

    /// Create an upstream error without a status or body (transport failure).
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            status: None,
            body: None,
        }
    }

    /// Create an upstream error carrying the provider's status and body.
    pub fn upstream(message: impl Into<String>, status: u16, body: Option<Value>) -> Self {
        Self::Upstream {
            message: message.into(),
            status: Some(status),
            body,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_engine_error_creation() {
        let err = EngineError::param_type("steps", "integer", &json!("many"));
        assert_eq!(err.to_string(), "Parameter 'steps' expects integer, got 'many'");

        let err = EngineError::invalid_request_id("a/b");
        assert!(matches!(err, EngineError::InvalidRequestId { .. }));

        let err = EngineError::upstream("HTTP 500", 500, Some(json!({"error": "boom"})));
        assert!(matches!(err, EngineError::Upstream { status: Some(500), .. }));

        let err = EngineError::timeout("status poll", 15_000);
        assert_eq!(err.to_string(), "Timeout error: status poll timed out after 15000ms");
    }
}
