//! Strongly typed provider definition schema.
//!
//! A definition describes one provider capability (a chat model, an image
//! generator, a text-to-speech voice, ...) declaratively: how to authenticate,
//! how to assemble the HTTP request from user parameters, which interaction
//! pattern the provider follows, and where to find outputs and errors in the
//! provider's JSON responses. Definitions are loaded once and never mutated.
//!
//! The raw JSON form is checked by [`validation::validate_definition`] before
//! it is deserialized into these types.

pub mod validation;

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};

/// The only definition file format understood by this crate.
pub const SCHEMA_VERSION: u64 = 1;

/// Body path sentinel that expands a parameter into a single user chat message.
pub const CHAT_MESSAGE_BODY_PATH: &str = "_chat_message";

/// Pseudo-parameter holding an optional system prompt for chat bodies.
pub const SYSTEM_PROMPT_PARAM: &str = "_system_prompt";

/// Placeholder spliced with the job identifier in polling URLs.
pub const REQUEST_ID_PLACEHOLDER: &str = "{request_id}";

/// Default number of status checks before a polling job is abandoned.
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 300;

/// Default ceiling on `auth.validation_url` probes in flight at once.
pub const DEFAULT_PROBE_CONCURRENCY: usize = 8;

/// User-supplied parameter values keyed by parameter name.
pub type ParamValues = JsonMap<String, Value>;

/// One provider capability, as authored in a definition file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Definition {
    /// File format version; always [`SCHEMA_VERSION`] for loaded definitions.
    pub schema_version: u64,
    /// Globally unique slug (lowercase alphanumerics and hyphens).
    pub id: String,
    /// Provider slug shared by all definitions of the same vendor.
    pub provider: String,
    /// Human-readable display name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub auth: AuthSpec,
    pub request: RequestSpec,
    pub interaction: Interaction,
    pub response: ResponseSpec,
    /// Labelled parameter sets that exercise the definition.
    #[serde(default)]
    pub examples: Vec<Example>,
}

impl Definition {
    /// Type of the first declared output, used for listing and grouping.
    pub fn primary_output_type(&self) -> OutputType {
        self.response.outputs.first().map(|output| output.r#type).unwrap_or_default()
    }

    /// Returns the polling descriptor when the definition follows the polling pattern.
    pub fn polling(&self) -> Option<&PollingSpec> {
        match &self.interaction {
            Interaction::Polling(polling) => Some(polling),
            _ => None,
        }
    }

    /// Declared parameter defaults, the values a form would start from.
    pub fn default_params(&self) -> ParamValues {
        self.request
            .params
            .iter()
            .filter_map(|param| param.default.as_ref().map(|value| (param.name.clone(), value.clone())))
            .collect()
    }

    /// Looks up an example by label, ignoring ASCII case.
    pub fn example(&self, label: &str) -> Option<&Example> {
        self.examples.iter().find(|example| example.label.eq_ignore_ascii_case(label))
    }
}

/// How the API key is attached to outgoing requests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// The key is sent in a named header, optionally prefixed (`Bearer `).
    #[default]
    Header,
}

/// Authentication settings for a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSpec {
    pub r#type: AuthType,
    /// Header that carries the key (for example `Authorization`).
    pub header: String,
    /// Literal prepended to the key (for example `Bearer `).
    #[serde(default)]
    pub prefix: String,
    /// Environment variable conventionally holding the key.
    pub env_key: String,
    /// Cheap authenticated endpoint used to probe whether a key works.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_url: Option<String>,
}

impl AuthSpec {
    /// Header value for the given key.
    pub fn header_value(&self, api_key: &str) -> String {
        format!("{}{}", self.prefix, api_key)
    }
}

/// Request template for the initial provider call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestSpec {
    pub method: String,
    /// URL template; `{name}` placeholders are filled from `url_path` params.
    pub url: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Static headers applied after the auth header.
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    /// JSON skeleton copied fresh for every request.
    #[serde(default = "empty_body_template")]
    pub body_template: Value,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn empty_body_template() -> Value {
    Value::Object(JsonMap::new())
}

/// Declared type of a user parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Float,
    Enum,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Enum => "enum",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendering hint for form-based front ends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UiHint {
    Textarea,
    Dropdown,
    Slider,
    Text,
}

/// One user-adjustable input of a definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub r#type: ParamType,
    pub ui: UiHint,
    #[serde(default)]
    pub required: bool,
    /// Allowed values for `enum` params.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Value>,
    /// Dot-separated location inside the body template, or a `_`-prefixed sentinel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_path: Option<String>,
    /// When true the value fills `{name}` in the URL template instead of the body.
    #[serde(default)]
    pub url_path: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Where a parameter value ends up in the outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamTarget<'a> {
    /// Substituted into the URL template.
    Url,
    /// Expanded into `messages = [{role: user, content}]`.
    ChatMessage,
    /// Consumed before body assembly; never written to the body.
    Pseudo,
    /// Written at a dotted location inside the body.
    BodyPath(&'a str),
    /// Written under a top-level body field named after the parameter.
    TopLevel,
}

impl ParamSpec {
    /// Classifies how the builder should apply this parameter.
    pub fn target(&self) -> ParamTarget<'_> {
        if self.url_path {
            return ParamTarget::Url;
        }
        match self.body_path.as_deref() {
            Some(CHAT_MESSAGE_BODY_PATH) => ParamTarget::ChatMessage,
            Some(path) if path.starts_with('_') => ParamTarget::Pseudo,
            Some(path) if !path.is_empty() => ParamTarget::BodyPath(path),
            _ => ParamTarget::TopLevel,
        }
    }
}

/// Interaction pattern of the provider, selected by the `pattern` tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "pattern", rename_all = "lowercase")]
pub enum Interaction {
    /// One HTTP call yields the final result.
    Sync,
    /// The provider answers with server-sent events carrying JSON fragments.
    Streaming {
        /// Path query selecting the token inside each fragment.
        stream_path: String,
    },
    /// The provider creates a job that is polled until it finishes.
    Polling(PollingSpec),
}

impl Interaction {
    pub fn pattern(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Streaming { .. } => "streaming",
            Self::Polling(_) => "polling",
        }
    }
}

/// Settings for asynchronous job providers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollingSpec {
    /// Status endpoint template containing `{request_id}`.
    pub status_url: String,
    /// Result endpoint template containing `{request_id}`.
    pub result_url: String,
    /// Path query locating the job id in the submission response.
    #[serde(default = "default_request_id_path")]
    pub request_id_path: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    pub done_when: PollPredicate,
    pub failed_when: PollPredicate,
}

fn default_request_id_path() -> String {
    "$.request_id".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

/// Matches a value found at `path` against a literal or a set of literals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollPredicate {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<Value>,
    #[serde(rename = "in", default, skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<Value>>,
}

impl PollPredicate {
    /// True when `value` equals the literal or is a member of the set.
    ///
    /// An absent value never matches.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        let Some(value) = value else {
            return false;
        };
        if self.equals.as_ref().is_some_and(|expected| expected == value) {
            return true;
        }
        self.one_of.as_ref().is_some_and(|candidates| candidates.contains(value))
    }
}

/// Current state of an asynchronous job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Pending,
    Done,
    Failed,
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Response description: where outputs and errors live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseSpec {
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSpec>,
}

/// Media kind of an output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    #[default]
    Text,
    Image,
    Audio,
    Video,
}

impl OutputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// MIME type assumed for base64 payloads that do not declare one.
    pub fn default_mime_type(&self) -> Option<&'static str> {
        match self {
            Self::Image => Some("image/png"),
            Self::Audio => Some("audio/mpeg"),
            Self::Text | Self::Video => None,
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an output value is encoded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputSource {
    /// The value itself is the content (usually text).
    Inline,
    /// The value is a URL pointing at the content.
    #[default]
    Url,
    /// The value is base64-encoded content.
    Base64,
}

/// Declares one output of a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputSpec {
    pub path: String,
    #[serde(default)]
    pub r#type: OutputType,
    #[serde(default)]
    pub source: OutputSource,
    #[serde(default)]
    pub downloadable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Locates the provider's error message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorSpec {
    pub path: String,
}

/// A labelled example parameter set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Example {
    pub label: String,
    #[serde(default)]
    pub params: ParamValues,
}

/// Output values extracted from a provider response.
///
/// `value` is always a list because providers may return batches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Output {
    pub r#type: OutputType,
    pub source: OutputSource,
    pub value: Vec<Value>,
    pub downloadable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}
