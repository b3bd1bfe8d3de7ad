//! URL template placeholder handling.
//!
//! Definition URLs carry `{name}` placeholders that are filled by literal
//! replacement. No percent-encoding is applied: values that reach a URL either
//! come from definition-declared parameters or, for job ids, are checked by
//! the caller against a strict character set first.

/// Replaces every `{key}` in `template` with `value`.
pub fn fill_placeholder(template: &str, key: &str, value: &str) -> String {
    template.replace(&format!("{{{key}}}"), value)
}

/// Resolves a URL template by replacing each `{key}` with its value.
///
/// Placeholders without a value are left in place.
///
/// # Examples
/// ```
/// use arcade_util::resolve_path;
///
/// let url = resolve_path(
///     "https://api.example.com/v1/models/{model}:generate",
///     [("model", "gemini-flash")],
/// );
/// assert_eq!(url, "https://api.example.com/v1/models/gemini-flash:generate");
/// ```
pub fn resolve_path<K, V, I>(template: &str, values: I) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
    I: IntoIterator<Item = (K, V)>,
{
    values
        .into_iter()
        .fold(template.to_string(), |resolved, (key, value)| fill_placeholder(&resolved, key.as_ref(), value.as_ref()))
}

/// Lists the `{name}` placeholders still present in `template`, in order.
pub fn placeholder_names(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut remainder = template;
    while let Some(start) = remainder.find('{') {
        let after_start = &remainder[start + 1..];
        let Some(end) = after_start.find('}') else {
            break;
        };
        let name = &after_start[..end];
        if !name.is_empty() && !name.contains('{') {
            names.push(name.to_string());
        }
        remainder = &after_start[end + 1..];
    }
    names
}
