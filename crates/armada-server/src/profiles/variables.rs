//! `$ARMADA_VAR_<NAME>` placeholders, substituted per host at delivery.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::storage::ProfileKind;

static VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{ARMADA_VAR_([A-Z0-9_]+)\}|ARMADA_VAR_([A-Z0-9_]+))")
        .expect("static regex is valid")
});

const APPLE_PROFILE_VARS: &[&str] = &[
    "HOST_UUID",
    "HOST_END_USER_EMAIL_IDP",
    "NDES_SCEP_CHALLENGE",
    "NDES_SCEP_PROXY_URL",
];

const WINDOWS_PROFILE_VARS: &[&str] = &["HOST_UUID"];

/// Variables a kind of artifact may reference.
pub const fn allowed_for(kind: ProfileKind) -> &'static [&'static str] {
    match kind {
        ProfileKind::AppleProfile => APPLE_PROFILE_VARS,
        ProfileKind::AppleDeclaration => &[],
        ProfileKind::WindowsProfile => WINDOWS_PROFILE_VARS,
    }
}

/// Names of every variable referenced in `contents`.
pub fn variable_names(contents: &str) -> BTreeSet<String> {
    VAR_RE
        .captures_iter(contents)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Replace variables that have a value for this host. Others are left in
/// place for a later delivery step.
pub fn substitute(contents: &str, values: &HashMap<&str, String>) -> String {
    VAR_RE
        .replace_all(contents, |caps: &Captures<'_>| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            values
                .get(name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Reject variables that `kind` does not support.
pub fn validate(kind: ProfileKind, name: &str, contents: &str) -> Result<(), String> {
    let allowed = allowed_for(kind);
    let unsupported: Vec<String> = variable_names(contents)
        .into_iter()
        .filter(|v| !allowed.contains(&v.as_str()))
        .map(|v| format!("$ARMADA_VAR_{v}"))
        .collect();

    if unsupported.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "{kind} \"{name}\" uses unsupported variables: {}",
            unsupported.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apple_profiles_accept_scep_variables() {
        let contents = "<string>$ARMADA_VAR_NDES_SCEP_CHALLENGE</string><string>${ARMADA_VAR_HOST_UUID}</string>";
        assert!(validate(ProfileKind::AppleProfile, "scep", contents).is_ok());
    }

    #[test]
    fn windows_profiles_only_accept_host_uuid() {
        assert!(validate(ProfileKind::WindowsProfile, "w", "$ARMADA_VAR_HOST_UUID").is_ok());
        let err = validate(ProfileKind::WindowsProfile, "w", "$ARMADA_VAR_NDES_SCEP_CHALLENGE")
            .err()
            .unwrap_or_default();
        assert!(err.contains("$ARMADA_VAR_NDES_SCEP_CHALLENGE"));
    }

    #[test]
    fn substitutes_known_values_only() {
        let values = HashMap::from([("HOST_UUID", "abc".to_string())]);
        let out = substitute("${ARMADA_VAR_HOST_UUID}/$ARMADA_VAR_NDES_SCEP_CHALLENGE", &values);
        assert_eq!(out, "abc/$ARMADA_VAR_NDES_SCEP_CHALLENGE");
    }

    #[test]
    fn declarations_accept_no_variables() {
        assert!(validate(ProfileKind::AppleDeclaration, "d", "${ARMADA_VAR_HOST_UUID}").is_err());
        assert!(validate(ProfileKind::AppleDeclaration, "d", "{}").is_ok());
    }
}
