use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or querying the definition registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Definition '{id}' not found")]
    DefinitionNotFound { id: String },

    #[error("Cannot read file {}: {error}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("Invalid JSON in {origin}: {error}")]
    Json {
        origin: String,
        #[source]
        error: serde_json::Error,
    },

    /// Every rule violation of one definition, never just the first.
    #[error("Definition {origin} is invalid: {}", errors.join("; "))]
    Invalid { origin: String, errors: Vec<String> },

    #[error("Duplicate id '{id}' in {second} (also in {first})")]
    DuplicateId { id: String, first: String, second: String },
}

impl RegistryError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::DefinitionNotFound { id: id.into() }
    }

    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::Io { path: path.into(), error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        assert_eq!(RegistryError::not_found("fal-flux").to_string(), "Definition 'fal-flux' not found");

        let invalid = RegistryError::Invalid {
            origin: "chat/groq.json".to_string(),
            errors: vec!["auth.header is required".to_string(), "response.error is required".to_string()],
        };
        assert_eq!(
            invalid.to_string(),
            "Definition chat/groq.json is invalid: auth.header is required; response.error is required"
        );

        let io = RegistryError::io("missing.json", std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(io.to_string(), "Cannot read file missing.json: gone");
    }
}
