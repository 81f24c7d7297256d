//! Authorization primitives.
//!
//! Every check is evaluated against an [`AuthzSubject`]: a resource kind
//! plus the team that owns it (`None` for "no team" or a generic check).
//! Operations that touch several teams authorize each one separately, see
//! [`scope::authorize_hosts_scope`].

pub mod policy;
pub mod scope;

use std::collections::HashMap;

pub use policy::RolePolicy;
pub use scope::authorize_hosts_scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Host,
    MdmCommand,
    ConfigProfile,
    Script,
    ScriptResult,
}

/// The thing being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthzSubject {
    pub kind: ResourceKind,
    pub team_id: Option<i64>,
}

impl AuthzSubject {
    pub const fn new(kind: ResourceKind, team_id: Option<i64>) -> Self {
        Self { kind, team_id }
    }

    /// A subject that names no specific team.
    pub const fn generic(kind: ResourceKind) -> Self {
        Self {
            kind,
            team_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Maintainer,
    Observer,
}

impl Role {
    pub const fn can_write(self) -> bool {
        matches!(self, Self::Admin | Self::Maintainer)
    }
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub user_id: String,
    pub name: String,
    pub email: String,
    /// Role across every team, if any.
    pub global_role: Option<Role>,
    /// Roles on individual teams.
    pub team_roles: HashMap<i64, Role>,
}

impl Viewer {
    pub fn global(user_id: &str, name: &str, email: &str, role: Role) -> Self {
        Self {
            user_id: user_id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            global_role: Some(role),
            team_roles: HashMap::new(),
        }
    }

    pub fn team_member(user_id: &str, name: &str, email: &str, roles: &[(i64, Role)]) -> Self {
        Self {
            user_id: user_id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            global_role: None,
            team_roles: roles.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthzError {
    #[error("forbidden")]
    Forbidden,
}

/// Authorization policy.
pub trait Authorizer: Send + Sync {
    fn authorize(
        &self,
        viewer: &Viewer,
        subject: &AuthzSubject,
        action: Action,
    ) -> Result<(), AuthzError>;
}
