//! Display identifiers derived from untrusted metadata.

use serde_json::Value;
use url::Url;

use crate::models::{keys, Metadata};

pub const UNKNOWN_IDENTIFIER: &str = "unknown";
pub const RESOURCE_PREFIX: &str = "resumes";

/// Final path component of `raw`, with both `/` and `\` treated as separators.
///
/// `.`, `..` and empty components never survive, so the result can be placed
/// in a URL path or joined onto a directory without escaping it.
pub fn sanitize_identifier(raw: &str) -> Option<String> {
    raw.split(['/', '\\'])
        .map(str::trim)
        .filter(|component| !component.is_empty() && *component != "." && *component != "..")
        .last()
        .map(|component| component.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|component| !component.is_empty())
}

/// Reads `source`, falling back to the legacy `filename` key.
pub fn display_identifier(metadata: &Metadata) -> String {
    [keys::SOURCE, keys::FILENAME]
        .iter()
        .filter_map(|key| metadata.get(*key).and_then(Value::as_str))
        .find_map(sanitize_identifier)
        .unwrap_or_else(|| UNKNOWN_IDENTIFIER.to_string())
}

/// "john_doe-resume.pdf" becomes "John Doe Resume".
pub fn display_name(identifier: &str) -> String {
    let stem = match identifier.rfind('.') {
        Some(position) if position > 0 => &identifier[..position],
        _ => identifier,
    };

    stem.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Relative download path for a sanitized identifier, percent-encoded.
pub fn download_url(identifier: &str) -> String {
    let Ok(mut url) = Url::parse("http://localhost/") else {
        return format!("/{RESOURCE_PREFIX}/{UNKNOWN_IDENTIFIER}");
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.clear().push(RESOURCE_PREFIX).push(identifier);
    }
    url.path().to_string()
}
