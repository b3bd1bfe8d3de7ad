//! # Arcade Engine
//!
//! The Arcade engine turns declarative provider definitions into HTTP requests
//! and turns provider responses back into typed outputs. No provider has
//! dedicated code: every difference between APIs lives in the definition JSON.
//!
//! ## Key Features
//!
//! - **Request building**: parameter coercion, dot-addressed body paths, chat
//!   message and system prompt shapes, auth and static headers, URL templates
//! - **Response interpretation**: poll classification, output and error
//!   extraction through path queries
//! - **Streaming**: server-sent-event lines to a token sequence
//! - **Job driving**: sync, streaming and polling patterns over a pluggable
//!   [`Transport`]
//! - **Key probes**: bounded, concurrent validation of provider API keys
//!
//! ## Usage
//!
//! ```rust
//! use arcade_engine::build_request;
//! use arcade_types::Definition;
//! use serde_json::json;
//!
//! let definition: Definition = serde_json::from_value(json!({
//!     "schema_version": 1,
//!     "id": "acme-image",
//!     "provider": "acme",
//!     "name": "Acme Image",
//!     "auth": {"type": "header", "header": "Authorization", "prefix": "Bearer ", "env_key": "ACME_API_KEY"},
//!     "request": {
//!         "method": "POST",
//!         "url": "https://api.acme.test/v1/images",
//!         "params": [{"name": "prompt", "type": "string", "ui": "textarea", "required": true}]
//!     },
//!     "interaction": {"pattern": "sync"},
//!     "response": {"outputs": [{"path": "$.data[*].url", "type": "image", "source": "url"}], "error": {"path": "$.error.message"}}
//! }))?;
//!
//! let params = json!({"prompt": "a red fox"}).as_object().cloned().unwrap_or_default();
//! let request = build_request(&definition, &params, "sk-test")?;
//! assert_eq!(request.body, json!({"prompt": "a red fox"}));
//! assert_eq!(request.headers["Authorization"], "Bearer sk-test");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`request`**: request builder, job URL helpers, curl rendering
//! - **`response`**: poll classification and output/error extraction
//! - **`streaming`**: the event-stream adapter
//! - **`transport`**: the [`Transport`] seam and its `reqwest` implementation
//! - **`jobs`**: [`JobDriver`], which runs each interaction pattern
//! - **`keys`**: API key probe fan-out

pub mod error;
pub mod jobs;
pub mod keys;
pub mod request;
pub mod response;
pub mod streaming;
pub mod transport;

pub use error::EngineError;
pub use jobs::{DriverSettings, JobDriver, JobResult, PollingOutcome, StatusReport, StreamSession, Submission};
pub use keys::{KeyProbe, KeyStatus, probe_keys};
pub use request::{
    API_KEY_PLACEHOLDER, PreparedRequest, auth_headers, build_curl_command, build_request, build_result_url, build_status_url,
    plain_string, validate_request_id,
};
pub use response::{classify_poll, error_message, extract_error, extract_outputs, extract_request_id, wrap_base64_outputs};
pub use streaming::{LineOutcome, StreamEvent, interpret_line, stream_events};
pub use transport::{HttpTransport, LineStream, StreamResponse, Transport, TransportRequest, TransportResponse, lines_from_chunks};
