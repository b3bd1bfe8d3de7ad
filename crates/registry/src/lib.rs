//! Registry crate for loading and validating Arcade provider definitions.
//!
//! Definitions are read once from a directory of JSON files, validated, and
//! kept in a read-only map keyed by id. The same crate carries the offline
//! corpus validator and the user configuration.

pub mod config;
pub mod corpus;
pub mod error;
pub mod models;

pub use config::{ArcadeConfig, CONFIG_PATH_ENV, default_config_path};
pub use corpus::{CorpusReport, FileReport, collect_definition_files, validate_corpus};
pub use error::RegistryError;
pub use models::{DefinitionRegistry, DefinitionSummary, RejectedDefinition};
