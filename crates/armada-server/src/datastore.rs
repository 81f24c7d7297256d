//! Persistence seam consumed by the control plane services.
//!
//! Services hold an `Arc<dyn Datastore>` so the persistence engine can be
//! swapped (or wrapped in tests) without touching orchestration code.
//! [`crate::storage::ServerDatabase`] is the production implementation.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::storage::{
    Activity, CommandResult, DatabaseError, Host, HostProfileStatus, HostScriptResult, MdmCommand,
    MdmProfile, NewActivity, NewProfile, NewScriptExecution, ProfileUpdates, Script,
    ScriptCompletion, SecretVariable, Team,
};

#[async_trait]
pub trait Datastore: Send + Sync {
    // Hosts, teams, labels, secrets

    /// Load hosts by uuid without filtering by the caller's visibility.
    async fn hosts_by_uuids_elevated(&self, uuids: &[String]) -> Result<Vec<Host>, DatabaseError>;
    async fn host(&self, id: i64) -> Result<Option<Host>, DatabaseError>;
    async fn host_by_uuid(&self, uuid: &str) -> Result<Option<Host>, DatabaseError>;
    async fn team(&self, id: i64) -> Result<Option<Team>, DatabaseError>;
    async fn team_by_name(&self, name: &str) -> Result<Option<Team>, DatabaseError>;
    /// Resolve label names to ids in one lookup. Unknown names are absent.
    async fn label_ids_by_name(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, i64>, DatabaseError>;
    async fn secret_variables(&self, names: &[String])
    -> Result<Vec<SecretVariable>, DatabaseError>;

    // Profiles and delivery state

    /// Atomically replace a team's profiles, reporting what changed per kind.
    async fn batch_set_mdm_profiles(
        &self,
        team_id: i64,
        profiles: &[NewProfile],
    ) -> Result<ProfileUpdates, DatabaseError>;
    /// Reset every affected host of each profile to pending.
    async fn bulk_set_pending_profile_status(
        &self,
        profile_uuids: &[String],
    ) -> Result<u64, DatabaseError>;
    async fn mdm_profile(&self, profile_uuid: &str) -> Result<Option<MdmProfile>, DatabaseError>;
    async fn host_profile_status(
        &self,
        host_uuid: &str,
        profile_uuid: &str,
    ) -> Result<Option<HostProfileStatus>, DatabaseError>;
    async fn host_profile_statuses(
        &self,
        host_uuid: &str,
    ) -> Result<Vec<HostProfileStatus>, DatabaseError>;
    async fn set_host_profile_status(
        &self,
        host_uuid: &str,
        profile_uuid: &str,
        status: &str,
        detail: &str,
        command_uuid: Option<&str>,
    ) -> Result<bool, DatabaseError>;

    // Commands

    async fn insert_mdm_command(
        &self,
        command: &MdmCommand,
        host_uuids: &[String],
    ) -> Result<(), DatabaseError>;
    async fn command_host_uuids(&self, command_uuid: &str) -> Result<Vec<String>, DatabaseError>;
    async fn command_results(&self, command_uuid: &str)
    -> Result<Vec<CommandResult>, DatabaseError>;
    async fn set_command_result(
        &self,
        host_uuid: &str,
        command_uuid: &str,
        status: &str,
        result: &[u8],
    ) -> Result<bool, DatabaseError>;

    // Scripts

    async fn create_script(
        &self,
        team_id: i64,
        name: &str,
        contents: &str,
    ) -> Result<Script, DatabaseError>;
    async fn script(&self, id: i64) -> Result<Option<Script>, DatabaseError>;
    async fn script_by_name(&self, team_id: i64, name: &str)
    -> Result<Option<Script>, DatabaseError>;
    async fn new_host_script_execution(
        &self,
        request: &NewScriptExecution,
    ) -> Result<HostScriptResult, DatabaseError>;
    async fn host_script_result(
        &self,
        execution_id: &str,
    ) -> Result<Option<HostScriptResult>, DatabaseError>;
    async fn pending_host_script_executions(
        &self,
        host_id: i64,
    ) -> Result<Vec<HostScriptResult>, DatabaseError>;
    async fn is_script_execution_pending(
        &self,
        host_id: i64,
        script_id: i64,
    ) -> Result<bool, DatabaseError>;
    async fn set_host_script_result(
        &self,
        host_id: i64,
        execution_id: &str,
        completion: &ScriptCompletion,
    ) -> Result<bool, DatabaseError>;

    // Audit log

    async fn new_activity(&self, activity: &NewActivity<'_>) -> Result<Activity, DatabaseError>;
}
