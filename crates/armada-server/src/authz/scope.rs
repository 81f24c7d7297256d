//! Authorization across every team a set of target hosts spans.

use std::collections::BTreeSet;

use tracing::debug;

use super::{Action, AuthzSubject, Authorizer, ResourceKind, Viewer};
use crate::datastore::Datastore;
use crate::error::{ResultExt, ServiceResult};
use crate::storage::Host;

/// Load `host_uuids` without visibility filtering and authorize `action`
/// once per distinct team they belong to.
///
/// Fails with `Forbidden` if any team is denied, before the caller can act
/// on the hosts, and without revealing which uuids exist. Unknown uuids are
/// dropped from the result; an empty result authorizes the generic subject
/// so unauthorized callers still learn nothing.
pub async fn authorize_hosts_scope(
    ds: &dyn Datastore,
    authz: &dyn Authorizer,
    viewer: &Viewer,
    host_uuids: &[String],
    kind: ResourceKind,
    action: Action,
) -> ServiceResult<Vec<Host>> {
    let hosts = ds
        .hosts_by_uuids_elevated(host_uuids)
        .await
        .context("load target hosts")?;

    if hosts.is_empty() {
        authz.authorize(viewer, &AuthzSubject::generic(kind), action)?;
        return Ok(hosts);
    }

    let teams: BTreeSet<Option<i64>> = hosts.iter().map(|h| h.team_id).collect();
    for team_id in &teams {
        authz.authorize(viewer, &AuthzSubject::new(kind, *team_id), action)?;
    }

    debug!(
        hosts = hosts.len(),
        teams = teams.len(),
        "Target scope authorized"
    );
    Ok(hosts)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::authz::{Role, RolePolicy};
    use crate::error::ServiceError;
    use crate::storage::{NewHost, Platform, ServerDatabase};

    async fn seed() -> (ServerDatabase, i64, i64) {
        let db = ServerDatabase::open_in_memory().await.unwrap();
        let t1 = db.create_team("one").await.unwrap().id;
        let t2 = db.create_team("two").await.unwrap().id;
        for (uuid, team) in [("h1", t1), ("h2", t2)] {
            db.create_host(&NewHost {
                uuid,
                hostname: uuid,
                platform: Platform::Darwin,
                team_id: Some(team),
                mdm_enrolled: true,
                scripts_capable: true,
                scripts_enabled: None,
            })
            .await
            .unwrap();
        }
        (db, t1, t2)
    }

    #[tokio::test]
    async fn denied_team_fails_the_whole_scope() {
        let (db, t1, _) = seed().await;
        let viewer = Viewer::team_member("u", "u", "u@example.com", &[(t1, Role::Maintainer)]);
        let uuids = vec!["h1".to_string(), "h2".to_string()];

        let err = authorize_hosts_scope(
            &db,
            &RolePolicy,
            &viewer,
            &uuids,
            ResourceKind::MdmCommand,
            Action::Write,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden));
    }

    #[tokio::test]
    async fn authorized_teams_return_all_hosts() {
        let (db, t1, t2) = seed().await;
        let viewer = Viewer::team_member(
            "u",
            "u",
            "u@example.com",
            &[(t1, Role::Maintainer), (t2, Role::Admin)],
        );
        let uuids = vec!["h1".to_string(), "h2".to_string(), "missing".to_string()];

        let hosts = authorize_hosts_scope(
            &db,
            &RolePolicy,
            &viewer,
            &uuids,
            ResourceKind::MdmCommand,
            Action::Write,
        )
        .await
        .unwrap();
        assert_eq!(hosts.len(), 2);
    }

    #[tokio::test]
    async fn unknown_hosts_still_require_generic_authorization() {
        let (db, t1, _) = seed().await;
        let viewer = Viewer::team_member("u", "u", "u@example.com", &[(t1, Role::Maintainer)]);
        let uuids = vec!["nope".to_string()];

        let err = authorize_hosts_scope(
            &db,
            &RolePolicy,
            &viewer,
            &uuids,
            ResourceKind::MdmCommand,
            Action::Write,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden));
    }
}
