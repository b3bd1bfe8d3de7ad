//! Offline validation of a definition corpus.

use std::fs;
use std::path::{Path, PathBuf};

use arcade_types::{find_duplicate_ids, validate_definition};
use serde::Serialize;
use serde_json::Value;

use crate::error::RegistryError;

/// Finds definition files under `path`.
///
/// A file path is returned as-is; a directory is walked recursively for
/// `*.json` files, returned in sorted path order.
pub fn collect_definition_files(path: &Path) -> Result<Vec<PathBuf>, RegistryError> {
    let metadata = fs::metadata(path).map_err(|error| RegistryError::io(path, error))?;
    if metadata.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    walk(path, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), RegistryError> {
    let entries = fs::read_dir(dir).map_err(|error| RegistryError::io(dir, error))?;
    for entry in entries {
        let entry = entry.map_err(|error| RegistryError::io(dir, error))?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, files)?;
        } else if path.extension().is_some_and(|extension| extension == "json") {
            files.push(path);
        }
    }
    Ok(())
}

/// Validation outcome of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub errors: Vec<String>,
}

impl FileReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validation outcome of a whole corpus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CorpusReport {
    pub files: Vec<FileReport>,
}

impl CorpusReport {
    pub fn total(&self) -> usize {
        self.files.len()
    }

    pub fn passed(&self) -> usize {
        self.files.iter().filter(|file| file.is_valid()).count()
    }

    /// True when at least one file was checked and all of them passed.
    pub fn is_success(&self) -> bool {
        !self.files.is_empty() && self.passed() == self.total()
    }
}

/// Validates every file and checks ids for duplicates across the corpus.
///
/// Unreadable and unparsable files are reported, never fatal. A repeated id
/// is reported on every file after the first that carries it.
pub fn validate_corpus(paths: &[PathBuf]) -> CorpusReport {
    let mut files = Vec::with_capacity(paths.len());
    let mut parsed: Vec<(usize, String, Value)> = Vec::new();

    for path in paths {
        let errors = match fs::read_to_string(path) {
            Err(error) => vec![format!("Cannot read file: {error}")],
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Err(error) => vec![format!("Invalid JSON: {error}")],
                Ok(value) => {
                    let errors = validate_definition(&value);
                    parsed.push((files.len(), path.display().to_string(), value));
                    errors
                }
            },
        };
        files.push(FileReport { path: path.clone(), errors });
    }

    let duplicates = find_duplicate_ids(parsed.iter().map(|(_, origin, value)| (origin.as_str(), value)));
    for duplicate in duplicates {
        let owner = parsed
            .iter()
            .find(|(_, origin, _)| *origin == duplicate.duplicate_source)
            .map(|(index, _, _)| *index);
        if let Some(index) = owner {
            files[index].errors.push(duplicate.message());
        }
    }

    CorpusReport { files }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_is_not_a_success() {
        let report = CorpusReport::default();
        assert_eq!(report.total(), 0);
        assert!(!report.is_success());
    }

    #[test]
    fn missing_paths_are_reported() {
        let report = validate_corpus(&[PathBuf::from("/definitely/not/here.json")]);
        assert_eq!(report.passed(), 0);
        assert!(report.files[0].errors[0].starts_with("Cannot read file: "));
    }
}
