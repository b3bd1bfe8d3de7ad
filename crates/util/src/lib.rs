//! Utility helpers shared by the Arcade engine, registry, and CLI.

pub mod data_uri;
pub mod http_path_resolution;
pub mod json_path;
pub mod path_processing;

pub use data_uri::{encode_data_uri, is_binary_media, mime_essence, wrap_base64_payload};
pub use http_path_resolution::{fill_placeholder, placeholder_names, resolve_path};
pub use json_path::evaluate;
pub use path_processing::expand_tilde;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

/// Replacement shown wherever a secret was removed.
pub const REDACTED: &str = "***";

static SECRET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization: )((?:bearer |token |key |basic )?[\w\-\.=:/+]+)",
        r"(?i)(x-api-key: |api-key: |x-goog-api-key: )([\w\-\.=:/+]+)",
        r"(?i)([A-Z0-9_]*?(?:KEY|TOKEN|SECRET|PASSWORD)=)([^\s]+)",
        r"(?i)(Bearer )([\w\-\.=:/+]+)",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("secret pattern should compile"))
    .collect()
});

/// Redacts values that look like secrets in a string.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in SECRET_PATTERNS.iter() {
        redacted = pattern
            .replace_all(&redacted, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}<redacted>", prefix)
            })
            .to_string();
    }
    redacted
}

/// Returns a copy of `headers` safe to display or log.
///
/// Any header whose name contains `authorization` (case-insensitive) or that
/// matches `secret_header` has its value replaced by [`REDACTED`].
pub fn redact_headers(headers: &IndexMap<String, String>, secret_header: Option<&str>) -> IndexMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let is_secret = name.to_ascii_lowercase().contains("authorization")
                || secret_header.is_some_and(|secret| secret.eq_ignore_ascii_case(name));
            let shown = if is_secret { REDACTED.to_string() } else { value.clone() };
            (name.clone(), shown)
        })
        .collect()
}
