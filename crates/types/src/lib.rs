//! Shared type definitions for the Arcade definition engine.
//!
//! The [`definition`] module holds the typed shape of a provider definition and
//! the rules used to vet raw definition JSON before it is trusted.

pub mod definition;

pub use definition::validation::{DuplicateDefinitionId, find_duplicate_ids, validate_definition};
pub use definition::{
    AuthSpec, AuthType, CHAT_MESSAGE_BODY_PATH, DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_PROBE_CONCURRENCY, Definition, ErrorSpec, Example, Interaction, Output, OutputSource, OutputSpec,
    OutputType, ParamSpec, ParamTarget, ParamType, ParamValues, PollPredicate, PollStatus, PollingSpec, REQUEST_ID_PLACEHOLDER,
    RequestSpec, ResponseSpec, SCHEMA_VERSION, SYSTEM_PROMPT_PARAM, UiHint,
};
