//! Data models for Armada storage.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Profile and script tables store "no team" as team id 0.
pub const NO_TEAM: i64 = 0;

/// Map an optional team id onto the storage key used by profile and script
/// tables.
pub fn team_key(team_id: Option<i64>) -> i64 {
    team_id.unwrap_or(NO_TEAM)
}

/// Operating system reported by a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Darwin,
    Ios,
    Ipados,
    Windows,
    Linux,
}

impl Platform {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Darwin => "darwin",
            Self::Ios => "ios",
            Self::Ipados => "ipados",
            Self::Windows => "windows",
            Self::Linux => "linux",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "darwin" => Some(Self::Darwin),
            "ios" => Some(Self::Ios),
            "ipados" => Some(Self::Ipados),
            "windows" => Some(Self::Windows),
            "linux" => Some(Self::Linux),
            _ => None,
        }
    }

    /// The management protocol family this platform speaks, if any.
    pub const fn mdm_family(self) -> Option<MdmFamily> {
        match self {
            Self::Darwin | Self::Ios | Self::Ipados => Some(MdmFamily::Apple),
            Self::Windows => Some(MdmFamily::Windows),
            Self::Linux => None,
        }
    }
}

/// Device management protocol family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MdmFamily {
    Apple,
    Windows,
}

impl MdmFamily {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Apple => "apple",
            Self::Windows => "windows",
        }
    }

    /// Host platforms served by this family.
    pub const fn platforms(self) -> &'static [&'static str] {
        match self {
            Self::Apple => &["darwin", "ios", "ipados"],
            Self::Windows => &["windows"],
        }
    }
}

impl fmt::Display for MdmFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three kinds of configuration artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    AppleProfile,
    AppleDeclaration,
    WindowsProfile,
}

impl ProfileKind {
    pub const ALL: [Self; 3] = [
        Self::AppleProfile,
        Self::AppleDeclaration,
        Self::WindowsProfile,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppleProfile => "apple_profile",
            Self::AppleDeclaration => "apple_declaration",
            Self::WindowsProfile => "windows_profile",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "apple_profile" => Some(Self::AppleProfile),
            "apple_declaration" => Some(Self::AppleDeclaration),
            "windows_profile" => Some(Self::WindowsProfile),
            _ => None,
        }
    }

    pub const fn family(self) -> MdmFamily {
        match self {
            Self::AppleProfile | Self::AppleDeclaration => MdmFamily::Apple,
            Self::WindowsProfile => MdmFamily::Windows,
        }
    }

    /// Prefix for generated profile uuids, so the kind is visible in ids.
    pub const fn uuid_prefix(self) -> char {
        match self {
            Self::AppleProfile => 'a',
            Self::AppleDeclaration => 'd',
            Self::WindowsProfile => 'w',
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AppleProfile => "Apple configuration profile",
            Self::AppleDeclaration => "Apple declaration",
            Self::WindowsProfile => "Windows profile",
        })
    }
}

/// How a profile's labels select hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelMode {
    IncludeAll,
    IncludeAny,
    ExcludeAny,
}

impl LabelMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IncludeAll => "include_all",
            Self::IncludeAny => "include_any",
            Self::ExcludeAny => "exclude_any",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "include_all" => Some(Self::IncludeAll),
            "include_any" => Some(Self::IncludeAny),
            "exclude_any" => Some(Self::ExcludeAny),
            _ => None,
        }
    }

    /// Whether a host carrying `host_labels` is in scope for `scope_labels`.
    pub fn matches(self, scope_labels: &[i64], host_labels: &[i64]) -> bool {
        match self {
            Self::IncludeAll => scope_labels.iter().all(|l| host_labels.contains(l)),
            Self::IncludeAny => scope_labels.iter().any(|l| host_labels.contains(l)),
            Self::ExcludeAny => !scope_labels.iter().any(|l| host_labels.contains(l)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Host {
    pub id: i64,
    pub uuid: String,
    pub hostname: String,
    pub platform: String,
    pub team_id: Option<i64>,
    /// Connected to the device management channel.
    pub mdm_enrolled: bool,
    /// The agent reports it can execute scripts.
    pub scripts_capable: bool,
    /// `Some(false)` when scripts were explicitly disabled on the agent.
    pub scripts_enabled: Option<bool>,
    pub seen_at: i64,
    pub created_at: i64,
}

impl Host {
    pub fn platform(&self) -> Option<Platform> {
        Platform::parse(&self.platform)
    }

    /// Whether the host checked in within `interval_secs` of `now`.
    pub const fn is_online(&self, now: i64, interval_secs: i64) -> bool {
        now - self.seen_at <= interval_secs
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Label {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SecretVariable {
    pub name: String,
    pub value: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MdmProfile {
    pub profile_uuid: String,
    pub team_id: i64,
    pub kind: String,
    pub name: String,
    pub identifier: Option<String>,
    pub contents: Vec<u8>,
    pub checksum: String,
    pub label_mode: Option<String>,
    pub secrets_updated_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MdmProfile {
    pub fn kind(&self) -> Option<ProfileKind> {
        ProfileKind::parse(&self.kind)
    }
}

/// A label reference resolved to its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRef {
    pub id: i64,
    pub name: String,
}

/// One artifact of a batch replacement, as it will be stored.
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub kind: ProfileKind,
    pub name: String,
    pub identifier: Option<String>,
    /// Contents with secret placeholders left unexpanded.
    pub contents: Vec<u8>,
    pub label_mode: Option<LabelMode>,
    pub labels: Vec<LabelRef>,
    pub secrets_updated_at: Option<i64>,
}

/// Profiles of one kind touched by a batch replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindChanges {
    /// Inserted or modified profile uuids.
    pub upserted: Vec<String>,
    /// Deleted profile uuids.
    pub removed: Vec<String>,
}

impl KindChanges {
    pub fn is_empty(&self) -> bool {
        self.upserted.is_empty() && self.removed.is_empty()
    }
}

/// Per-kind result of a batch replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileUpdates {
    pub apple_profiles: KindChanges,
    pub apple_declarations: KindChanges,
    pub windows_profiles: KindChanges,
}

impl ProfileUpdates {
    pub const fn get(&self, kind: ProfileKind) -> &KindChanges {
        match kind {
            ProfileKind::AppleProfile => &self.apple_profiles,
            ProfileKind::AppleDeclaration => &self.apple_declarations,
            ProfileKind::WindowsProfile => &self.windows_profiles,
        }
    }

    pub const fn get_mut(&mut self, kind: ProfileKind) -> &mut KindChanges {
        match kind {
            ProfileKind::AppleProfile => &mut self.apple_profiles,
            ProfileKind::AppleDeclaration => &mut self.apple_declarations,
            ProfileKind::WindowsProfile => &mut self.windows_profiles,
        }
    }

    pub fn any_changed(&self) -> bool {
        ProfileKind::ALL.iter().any(|k| !self.get(*k).is_empty())
    }
}

/// Delivery state of one profile on one host.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HostProfileStatus {
    pub host_uuid: String,
    pub profile_uuid: String,
    pub name: String,
    pub kind: String,
    /// `None` until the first delivery attempt; treated as pending.
    pub status: Option<String>,
    pub detail: String,
    pub command_uuid: Option<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Script {
    pub id: i64,
    pub team_id: i64,
    pub name: String,
    pub contents: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HostScriptResult {
    pub id: i64,
    pub execution_id: String,
    pub host_id: i64,
    pub script_id: Option<i64>,
    pub contents: String,
    pub sync_request: bool,
    /// `None` until the agent reports completion.
    pub exit_code: Option<i64>,
    pub output: String,
    pub runtime_secs: i64,
    pub timed_out: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A script execution request to persist.
#[derive(Debug, Clone)]
pub struct NewScriptExecution {
    pub host_id: i64,
    pub script_id: Option<i64>,
    pub contents: String,
    pub sync_request: bool,
}

/// Completion report for a script execution.
#[derive(Debug, Clone)]
pub struct ScriptCompletion {
    pub exit_code: i64,
    pub output: String,
    pub runtime_secs: i64,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MdmCommand {
    pub command_uuid: String,
    pub platform: String,
    pub request_type: String,
    pub raw_command: Vec<u8>,
    pub created_at: i64,
}

/// Per-host outcome of a queued command.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CommandResult {
    pub host_uuid: String,
    pub command_uuid: String,
    pub request_type: String,
    /// `None` until the host reports back.
    pub status: Option<String>,
    pub result: Option<Vec<u8>>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Activity {
    pub id: i64,
    pub actor_id: Option<String>,
    pub actor_name: Option<String>,
    pub actor_email: Option<String>,
    pub activity_type: String,
    pub details: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apple_platforms_share_a_family() {
        assert_eq!(Platform::Darwin.mdm_family(), Some(MdmFamily::Apple));
        assert_eq!(Platform::Ipados.mdm_family(), Some(MdmFamily::Apple));
        assert_eq!(Platform::Windows.mdm_family(), Some(MdmFamily::Windows));
        assert_eq!(Platform::Linux.mdm_family(), None);
    }

    #[test]
    fn label_modes_match_hosts() {
        let scope = [1, 2];
        assert!(LabelMode::IncludeAll.matches(&scope, &[1, 2, 3]));
        assert!(!LabelMode::IncludeAll.matches(&scope, &[1]));
        assert!(LabelMode::IncludeAny.matches(&scope, &[2]));
        assert!(!LabelMode::IncludeAny.matches(&scope, &[3]));
        assert!(LabelMode::ExcludeAny.matches(&scope, &[3]));
        assert!(!LabelMode::ExcludeAny.matches(&scope, &[1, 3]));
    }
}
