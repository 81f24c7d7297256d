//! `$ARMADA_SECRET_<NAME>` placeholders.
//!
//! Secrets are expanded only for validation. Stored profile contents always
//! keep the placeholder form.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::{Captures, Regex};

static SECRET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{ARMADA_SECRET_([A-Z0-9_]+)\}|ARMADA_SECRET_([A-Z0-9_]+))")
        .expect("static regex is valid")
});

fn captured_name<'a>(caps: &Captures<'a>) -> &'a str {
    caps.get(1)
        .or_else(|| caps.get(2))
        .map_or("", |m| m.as_str())
}

/// Names of every secret referenced in `contents`.
pub fn secret_names(contents: &str) -> BTreeSet<String> {
    SECRET_RE
        .captures_iter(contents)
        .map(|caps| captured_name(&caps).to_string())
        .collect()
}

/// Replace each placeholder with its value.
///
/// Returns the names with no value when any are missing.
pub fn expand(contents: &str, values: &HashMap<String, String>) -> Result<String, Vec<String>> {
    let missing: Vec<String> = secret_names(contents)
        .into_iter()
        .filter(|name| !values.contains_key(name))
        .collect();
    if !missing.is_empty() {
        return Err(missing);
    }

    Ok(SECRET_RE
        .replace_all(contents, |caps: &Captures<'_>| {
            values
                .get(captured_name(caps))
                .cloned()
                .unwrap_or_default()
        })
        .into_owned())
}
