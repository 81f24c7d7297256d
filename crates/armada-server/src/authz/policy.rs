//! Role-based authorization policy.

use super::{Action, AuthzError, AuthzSubject, Authorizer, Role, Viewer};

/// Grants reads to any role and writes to admins and maintainers, either
/// globally or on the subject's team. Subjects without a team require a
/// global role.
#[derive(Debug, Clone, Copy, Default)]
pub struct RolePolicy;

impl RolePolicy {
    fn effective_role(viewer: &Viewer, team_id: Option<i64>) -> Option<Role> {
        if viewer.global_role.is_some() {
            return viewer.global_role;
        }
        team_id.and_then(|id| viewer.team_roles.get(&id).copied())
    }
}

impl Authorizer for RolePolicy {
    fn authorize(
        &self,
        viewer: &Viewer,
        subject: &AuthzSubject,
        action: Action,
    ) -> Result<(), AuthzError> {
        let role = Self::effective_role(viewer, subject.team_id).ok_or(AuthzError::Forbidden)?;
        match action {
            Action::Read => Ok(()),
            Action::Write if role.can_write() => Ok(()),
            Action::Write => Err(AuthzError::Forbidden),
        }
    }
}
