use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use arcade_types::{Definition, OutputType, find_duplicate_ids, validate_definition};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::corpus::collect_definition_files;
use crate::error::RegistryError;

/// A definition that failed to load, with every reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedDefinition {
    pub origin: String,
    pub errors: Vec<String>,
}

/// Listing entry for a loaded definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefinitionSummary {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub output_type: OutputType,
    pub pattern: &'static str,
}

/// Read-only set of validated definitions keyed by id.
///
/// Built once at startup. Only definitions that pass validation are kept;
/// lenient loads remember the others in [`DefinitionRegistry::rejected`].
#[derive(Debug, Clone, Default)]
pub struct DefinitionRegistry {
    definitions: BTreeMap<String, Definition>,
    origins: BTreeMap<String, String>,
    rejected: Vec<RejectedDefinition>,
}

impl DefinitionRegistry {
    /// Builds a registry from raw JSON values keyed by their origin (a path or id).
    ///
    /// With `strict` the first invalid or duplicate definition is an error.
    /// Otherwise such definitions are skipped with a warning.
    pub fn from_values<I>(values: I, strict: bool) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let entries: Vec<(String, Value)> = values.into_iter().collect();
        let mut errors: Vec<Vec<String>> = entries.iter().map(|(_, value)| validate_definition(value)).collect();

        if strict && let Some(index) = errors.iter().position(|list| !list.is_empty()) {
            return Err(RegistryError::Invalid {
                origin: entries[index].0.clone(),
                errors: std::mem::take(&mut errors[index]),
            });
        }

        // Only definitions that passed validation can own an id.
        let valid_entries = entries.iter().zip(&errors).filter(|(_, errors)| errors.is_empty());
        let duplicates = find_duplicate_ids(valid_entries.map(|((origin, value), _)| (origin.as_str(), value)));
        for duplicate in duplicates {
            if strict {
                return Err(RegistryError::DuplicateId {
                    id: duplicate.id,
                    first: duplicate.first_source,
                    second: duplicate.duplicate_source,
                });
            }
            if let Some(index) = entries.iter().position(|(origin, _)| *origin == duplicate.duplicate_source) {
                errors[index].push(duplicate.message());
            }
        }

        let mut registry = Self::default();
        for ((origin, value), errors) in entries.into_iter().zip(errors) {
            if !errors.is_empty() {
                registry.reject(origin, errors);
                continue;
            }
            match serde_json::from_value::<Definition>(value) {
                Ok(definition) => {
                    debug!(id = %definition.id, %origin, "definition loaded");
                    registry.origins.insert(definition.id.clone(), origin);
                    registry.definitions.insert(definition.id.clone(), definition);
                }
                Err(error) if strict => return Err(RegistryError::Json { origin, error }),
                Err(error) => registry.reject(origin, vec![format!("Cannot deserialize definition: {error}")]),
            }
        }

        info!(loaded = registry.definitions.len(), rejected = registry.rejected.len(), "definition registry built");
        Ok(registry)
    }

    /// Loads every `*.json` file under `dir`.
    pub fn load_from_dir(dir: &Path, strict: bool) -> Result<Self, RegistryError> {
        let mut values = Vec::new();
        let mut unreadable = Vec::new();

        for path in collect_definition_files(dir)? {
            let origin = path.display().to_string();
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(error) if strict => return Err(RegistryError::io(path, error)),
                Err(error) => {
                    unreadable.push(RejectedDefinition {
                        origin,
                        errors: vec![format!("Cannot read file: {error}")],
                    });
                    continue;
                }
            };
            match serde_json::from_str::<Value>(&content) {
                Ok(value) => values.push((origin, value)),
                Err(error) if strict => return Err(RegistryError::Json { origin, error }),
                Err(error) => unreadable.push(RejectedDefinition {
                    origin,
                    errors: vec![format!("Invalid JSON: {error}")],
                }),
            }
        }

        let mut registry = Self::from_values(values, strict)?;
        for rejected in unreadable {
            registry.reject(rejected.origin, rejected.errors);
        }
        Ok(registry)
    }

    fn reject(&mut self, origin: String, errors: Vec<String>) {
        warn!(%origin, errors = errors.len(), first = errors.first().map(String::as_str).unwrap_or(""), "skipping invalid definition");
        self.rejected.push(RejectedDefinition { origin, errors });
    }

    pub fn get(&self, id: &str) -> Result<&Definition, RegistryError> {
        self.definitions.get(id).ok_or_else(|| RegistryError::not_found(id))
    }

    /// Where the definition with `id` was loaded from.
    pub fn origin(&self, id: &str) -> Option<&str> {
        self.origins.get(id).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn rejected(&self) -> &[RejectedDefinition] {
        &self.rejected
    }

    /// Listing entries sorted by display name.
    pub fn summaries(&self) -> Vec<DefinitionSummary> {
        let mut summaries: Vec<DefinitionSummary> = self
            .definitions
            .values()
            .map(|definition| DefinitionSummary {
                id: definition.id.clone(),
                name: definition.name.clone(),
                provider: definition.provider.clone(),
                output_type: definition.primary_output_type(),
                pattern: definition.interaction.pattern(),
            })
            .collect();
        summaries.sort_by(|left, right| left.name.cmp(&right.name).then_with(|| left.id.cmp(&right.id)));
        summaries
    }
}
