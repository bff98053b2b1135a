//! Command token substitution.
//!
//! Commands may embed `:::dotted.path:::` tokens that are resolved against
//! the client attribute tree before execution, with an optional literal
//! fallback after a pipe: `:::dotted.path|default:::`. Every token that
//! resolves to nothing (and has no fallback) is reported back so the
//! executor can refuse to run a half-substituted command line.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r":::(.*?):::").expect("token pattern is valid"))
}

/// Substitute tokens in `command` against `attributes`.
///
/// Returns the substituted command and the list of unmatched token paths.
/// Unmatched tokens are replaced with the empty string; a command without
/// tokens comes back unchanged.
pub fn substitute(command: &str, attributes: &Value) -> (String, Vec<String>) {
    let mut unmatched = Vec::new();

    let substituted = token_pattern().replace_all(command, |caps: &Captures<'_>| {
        let token = &caps[1];
        let (path, default) = match token.split_once('|') {
            Some((path, default)) => (path, Some(default)),
            None => (token, None),
        };

        match resolve(attributes, path) {
            Some(value) => value,
            None => match default {
                Some(fallback) => fallback.to_string(),
                None => {
                    unmatched.push(path.to_string());
                    String::new()
                }
            },
        }
    });

    (substituted.into_owned(), unmatched)
}

/// Resolve a dotted path to its string rendering.
///
/// `null` and missing leaves both count as unresolved; non-string leaves
/// render via their JSON form (numbers, booleans).
fn resolve(attributes: &Value, path: &str) -> Option<String> {
    let mut current = attributes;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    match current {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
