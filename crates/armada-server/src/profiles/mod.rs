//! Declarative configuration profile reconciliation.
//!
//! A batch carries the complete desired set of profiles for one team. The
//! reconciler validates and classifies every artifact, then replaces the
//! team's stored set atomically and resets delivery state for the hosts the
//! changed profiles reach.

pub mod classify;
pub mod secrets;
pub mod spec;
pub mod variables;

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, info, instrument};

pub use spec::{LabelScope, ProfileSpec, TeamSelector};

use crate::activity::ActivityDetails;
use crate::authz::{Action, AuthzSubject, ResourceKind, Viewer};
use crate::error::{ResultExt, ServiceError, ServiceResult};
use crate::service::Service;
use crate::storage::{
    LabelRef, MdmFamily, NO_TEAM, NewProfile, ProfileKind, ProfileUpdates, Team, team_key,
};

/// Outcome of a batch replacement.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchApplyResult {
    pub dry_run: bool,
    /// Profiles inserted, modified or removed, per kind.
    pub updates: ProfileUpdates,
    /// (host, profile) pairs reset to pending.
    pub pending_hosts: u64,
}

/// An artifact that passed label and secret resolution.
struct Prepared<'a> {
    spec: &'a ProfileSpec,
    scope: Option<LabelScope>,
    labels: Vec<LabelRef>,
    secrets_updated_at: Option<i64>,
    kind: ProfileKind,
    identifier: Option<String>,
}

impl Service {
    /// Replace a team's configuration profiles with `profiles`.
    ///
    /// With `dry_run` the batch is only validated and nothing is stored.
    #[instrument(skip(self, viewer, profiles), fields(count = profiles.len()))]
    pub async fn batch_set_profiles(
        &self,
        viewer: &Viewer,
        team: TeamSelector,
        dry_run: bool,
        profiles: Vec<ProfileSpec>,
    ) -> ServiceResult<BatchApplyResult> {
        let team = self.resolve_profile_team(viewer, &team).await?;
        let team_id = team.as_ref().map(|t| t.id);

        // Label scopes
        let mut scopes = Vec::with_capacity(profiles.len());
        for p in &profiles {
            scopes.push(p.label_scope().map_err(ServiceError::InvalidArgument)?);
        }

        let label_names: Vec<String> = scopes
            .iter()
            .flatten()
            .flat_map(|s| s.names.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let label_ids = self
            .ds
            .label_ids_by_name(&label_names)
            .await
            .context("resolve label names")?;

        // Secrets
        let secret_names: Vec<String> = profiles
            .iter()
            .flat_map(|p| secrets::secret_names(&p.contents))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let secret_rows = self
            .ds
            .secret_variables(&secret_names)
            .await
            .context("load secret variables")?;
        let secret_updated: HashMap<&str, i64> = secret_rows
            .iter()
            .map(|s| (s.name.as_str(), s.updated_at))
            .collect();
        let secret_values: HashMap<String, String> = secret_rows
            .iter()
            .map(|s| (s.name.clone(), s.value.clone()))
            .collect();

        let mut prepared: Vec<Prepared<'_>> = Vec::with_capacity(profiles.len());
        let mut unvalidated: Vec<(&str, ProfileKind)> = Vec::new();
        for (spec, scope) in profiles.iter().zip(scopes) {
            let labels = match &scope {
                Some(scope) => resolve_labels(spec, scope, &label_ids)?,
                None => Vec::new(),
            };

            let expanded = match secrets::expand(&spec.contents, &secret_values) {
                Ok(expanded) => expanded,
                Err(missing) if dry_run => {
                    debug!(
                        profile = %spec.name,
                        missing = missing.len(),
                        "Skipping validation of profile with unresolved secrets"
                    );
                    let kind = classify::sniff_kind(&spec.contents).map_err(|e| {
                        ServiceError::InvalidArgument(format!("Profile \"{}\": {e}", spec.name))
                    })?;
                    unvalidated.push((spec.name.as_str(), kind));
                    continue;
                }
                Err(missing) => {
                    return Err(ServiceError::InvalidArgument(format!(
                        "Profile \"{}\" references secrets that don't exist: {}",
                        spec.name,
                        missing
                            .iter()
                            .map(|m| format!("$ARMADA_SECRET_{m}"))
                            .collect::<Vec<_>>()
                            .join(", ")
                    )));
                }
            };

            let secrets_updated_at = secrets::secret_names(&spec.contents)
                .iter()
                .filter_map(|n| secret_updated.get(n.as_str()).copied())
                .max();

            let classified =
                classify::classify(&spec.name, &expanded).map_err(ServiceError::InvalidArgument)?;

            prepared.push(Prepared {
                spec,
                scope,
                labels,
                secrets_updated_at,
                kind: classified.kind,
                identifier: classified.identifier,
            });
        }

        check_duplicates(&prepared, &unvalidated)?;

        // An empty set for an unconfigured platform is a no-op, not an error.
        for family in [MdmFamily::Apple, MdmFamily::Windows] {
            let submitted = prepared.iter().any(|p| p.kind.family() == family)
                || unvalidated.iter().any(|(_, kind)| kind.family() == family);
            if submitted && !self.mdm_enabled(family) {
                return Err(ServiceError::NotConfigured(match family {
                    MdmFamily::Apple => "Apple".to_string(),
                    MdmFamily::Windows => "Windows".to_string(),
                }));
            }
        }

        if dry_run {
            info!(team_id, validated = prepared.len(), "Profile batch validated");
            return Ok(BatchApplyResult {
                dry_run: true,
                ..Default::default()
            });
        }

        for p in &prepared {
            variables::validate(p.kind, &p.spec.name, &p.spec.contents)
                .map_err(ServiceError::InvalidArgument)?;
        }

        // Stored contents keep their secret placeholders.
        let new_profiles: Vec<NewProfile> = prepared
            .into_iter()
            .map(|p| NewProfile {
                kind: p.kind,
                name: p.spec.name.clone(),
                identifier: p.identifier,
                contents: p.spec.contents.as_bytes().to_vec(),
                label_mode: p.scope.map(|s| s.mode),
                labels: p.labels,
                secrets_updated_at: p.secrets_updated_at,
            })
            .collect();

        let updates = self
            .ds
            .batch_set_mdm_profiles(team_key(team_id), &new_profiles)
            .await
            .context("replace profiles")?;

        let mut pending_hosts = 0;
        for kind in ProfileKind::ALL {
            let changes = updates.get(kind);
            if changes.is_empty() {
                continue;
            }

            pending_hosts += self
                .ds
                .bulk_set_pending_profile_status(&changes.upserted)
                .await
                .context("set pending profile status")?;

            self.activity
                .record(
                    viewer,
                    &ActivityDetails::EditedProfiles {
                        kind,
                        team_id,
                        team_name: team.as_ref().map(|t| t.name.clone()),
                    },
                )
                .await?;
        }

        info!(
            team_id,
            changed = updates.any_changed(),
            pending_hosts,
            "Profile batch applied"
        );

        Ok(BatchApplyResult {
            dry_run: false,
            updates,
            pending_hosts,
        })
    }

    /// Resolve the batch's team and authorize writing its profiles.
    async fn resolve_profile_team(
        &self,
        viewer: &Viewer,
        selector: &TeamSelector,
    ) -> ServiceResult<Option<Team>> {
        let default_team = matches!(selector, TeamSelector::NoTeam | TeamSelector::Id(NO_TEAM));
        if !default_team && !self.license.is_premium() {
            return Err(ServiceError::MissingLicense);
        }

        let lookup = match selector {
            TeamSelector::NoTeam | TeamSelector::Id(NO_TEAM) => {
                self.authz.authorize(
                    viewer,
                    &AuthzSubject::new(ResourceKind::ConfigProfile, None),
                    Action::Write,
                )?;
                return Ok(None);
            }
            TeamSelector::Id(id) => self.ds.team(*id).await,
            TeamSelector::Name(name) => self.ds.team_by_name(name).await,
        };

        let Some(team) = lookup.context("load team")? else {
            self.authz.authorize(
                viewer,
                &AuthzSubject::generic(ResourceKind::ConfigProfile),
                Action::Write,
            )?;
            return Err(ServiceError::NotFound("Team".to_string()));
        };

        self.authz.authorize(
            viewer,
            &AuthzSubject::new(ResourceKind::ConfigProfile, Some(team.id)),
            Action::Write,
        )?;
        Ok(Some(team))
    }
}

fn resolve_labels(
    spec: &ProfileSpec,
    scope: &LabelScope,
    label_ids: &HashMap<String, i64>,
) -> ServiceResult<Vec<LabelRef>> {
    let mut labels = Vec::with_capacity(scope.names.len());
    for name in &scope.names {
        let Some(id) = label_ids.get(name) else {
            return Err(ServiceError::InvalidArgument(format!(
                "Profile \"{}\" references a label that doesn't exist: {name}",
                spec.name
            )));
        };
        labels.push(LabelRef {
            id: *id,
            name: name.clone(),
        });
    }
    Ok(labels)
}

/// Reject duplicate names or identifiers within a kind, and duplicate names
/// across kinds. Profiles whose content went unvalidated during a dry run
/// only take part in the name check.
fn check_duplicates(
    prepared: &[Prepared<'_>],
    unvalidated: &[(&str, ProfileKind)],
) -> ServiceResult<()> {
    let mut names: HashMap<&str, ProfileKind> = HashMap::new();
    for &(name, kind) in unvalidated {
        check_name(&mut names, name, kind)?;
    }

    let mut identifiers: HashMap<(ProfileKind, &str), &str> = HashMap::new();
    for p in prepared {
        let name = p.spec.name.as_str();
        check_name(&mut names, name, p.kind)?;

        let Some(identifier) = p.identifier.as_deref() else {
            continue;
        };
        if let Some(first) = identifiers.insert((p.kind, identifier), name) {
            return Err(ServiceError::Conflict(format!(
                "{} \"{name}\" and \"{first}\" share the identifier {identifier}",
                p.kind
            )));
        }
    }
    Ok(())
}

fn check_name<'a>(
    names: &mut HashMap<&'a str, ProfileKind>,
    name: &'a str,
    kind: ProfileKind,
) -> ServiceResult<()> {
    match names.insert(name, kind) {
        None => Ok(()),
        Some(other) if other == kind => Err(ServiceError::Conflict(format!(
            "More than one {kind} has the name \"{name}\""
        ))),
        Some(other) => Err(ServiceError::Conflict(format!(
            "The name \"{name}\" is used by both a {other} and a {kind}"
        ))),
    }
}
