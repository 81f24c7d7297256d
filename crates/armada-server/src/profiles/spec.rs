//! Desired-state input for a profile batch.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::storage::{LabelMode, NO_TEAM};

/// One configuration artifact as submitted by the caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileSpec {
    pub name: String,
    pub contents: String,
    /// Deprecated; treated as `labels_include_all`.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub labels_include_all: Vec<String>,
    #[serde(default)]
    pub labels_include_any: Vec<String>,
    #[serde(default)]
    pub labels_exclude_any: Vec<String>,
}

/// A normalized label scope: one mode and its label names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelScope {
    pub mode: LabelMode,
    pub names: Vec<String>,
}

impl ProfileSpec {
    /// Fold the deprecated field into `include_all` and reject payloads that
    /// set more than one scope field. Repeated names collapse to one.
    pub fn label_scope(&self) -> Result<Option<LabelScope>, String> {
        let candidates = [
            (LabelMode::IncludeAll, &self.labels),
            (LabelMode::IncludeAll, &self.labels_include_all),
            (LabelMode::IncludeAny, &self.labels_include_any),
            (LabelMode::ExcludeAny, &self.labels_exclude_any),
        ];

        let mut set = candidates.into_iter().filter(|(_, names)| !names.is_empty());
        let first = set.next();
        if set.next().is_some() {
            return Err(format!(
                "Profile \"{}\" may use only one of \"labels\", \"labels_include_all\", \
                 \"labels_include_any\" or \"labels_exclude_any\".",
                self.name
            ));
        }

        Ok(first.map(|(mode, names)| LabelScope {
            mode,
            names: names
                .iter()
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        }))
    }
}

/// Which team a batch applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeamSelector {
    NoTeam,
    Id(i64),
    Name(String),
}

impl TeamSelector {
    /// Build a selector from optional id and name, which are mutually
    /// exclusive. Team id 0 is the default tenant.
    pub fn from_parts(team_id: Option<i64>, team_name: Option<&str>) -> Result<Self, String> {
        match (team_id, team_name) {
            (Some(_), Some(_)) => {
                Err("Specify either a team id or a team name, not both.".to_string())
            }
            (Some(NO_TEAM), None) | (None, None) => Ok(Self::NoTeam),
            (Some(id), None) => Ok(Self::Id(id)),
            (None, Some(name)) => Ok(Self::Name(name.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn spec() -> ProfileSpec {
        ProfileSpec {
            name: "wifi".into(),
            contents: String::new(),
            ..Default::default()
        }
    }

    #[test]
    fn deprecated_labels_fold_into_include_all() {
        let p = ProfileSpec {
            labels: vec!["a".into()],
            ..spec()
        };
        let scope = p.label_scope().unwrap().unwrap();
        assert_eq!(scope.mode, LabelMode::IncludeAll);
        assert_eq!(scope.names, vec!["a".to_string()]);
    }

    #[test]
    fn repeated_names_collapse() {
        let p = ProfileSpec {
            labels_exclude_any: vec!["b".into(), "a".into(), "b".into()],
            ..spec()
        };
        let scope = p.label_scope().unwrap().unwrap();
        assert_eq!(scope.names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn include_any_with_exclude_any_is_rejected() {
        let p = ProfileSpec {
            labels_include_any: vec!["a".into()],
            labels_exclude_any: vec!["b".into()],
            ..spec()
        };
        assert!(p.label_scope().is_err());
    }

    #[test]
    fn deprecated_with_new_field_is_rejected() {
        let p = ProfileSpec {
            labels: vec!["a".into()],
            labels_include_all: vec!["a".into()],
            ..spec()
        };
        assert!(p.label_scope().is_err());
    }

    #[test]
    fn no_labels_means_no_scope() {
        assert_eq!(spec().label_scope().unwrap(), None);
    }

    #[test]
    fn team_id_and_name_are_exclusive() {
        assert!(TeamSelector::from_parts(Some(1), Some("x")).is_err());
        assert_eq!(
            TeamSelector::from_parts(Some(0), None).unwrap(),
            TeamSelector::NoTeam
        );
        assert_eq!(
            TeamSelector::from_parts(None, None).unwrap(),
            TeamSelector::NoTeam
        );
        assert_eq!(
            TeamSelector::from_parts(None, Some("x")).unwrap(),
            TeamSelector::Name("x".into())
        );
    }
}
