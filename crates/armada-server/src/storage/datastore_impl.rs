//! [`Datastore`] backed by [`ServerDatabase`].

use std::collections::HashMap;

use async_trait::async_trait;

use super::db::{DatabaseError, ServerDatabase};
use super::models::{
    Activity, CommandResult, Host, HostProfileStatus, HostScriptResult, MdmCommand, MdmProfile,
    NewProfile, NewScriptExecution, ProfileUpdates, Script, ScriptCompletion, SecretVariable, Team,
};
use super::queries_activity::NewActivity;
use crate::datastore::Datastore;

#[async_trait]
impl Datastore for ServerDatabase {
    async fn hosts_by_uuids_elevated(&self, uuids: &[String]) -> Result<Vec<Host>, DatabaseError> {
        self.list_hosts_by_uuids(uuids).await
    }

    async fn host(&self, id: i64) -> Result<Option<Host>, DatabaseError> {
        self.get_host(id).await
    }

    async fn host_by_uuid(&self, uuid: &str) -> Result<Option<Host>, DatabaseError> {
        self.get_host_by_uuid(uuid).await
    }

    async fn team(&self, id: i64) -> Result<Option<Team>, DatabaseError> {
        self.get_team(id).await
    }

    async fn team_by_name(&self, name: &str) -> Result<Option<Team>, DatabaseError> {
        self.get_team_by_name(name).await
    }

    async fn label_ids_by_name(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, i64>, DatabaseError> {
        Self::label_ids_by_name(self, names).await
    }

    async fn secret_variables(
        &self,
        names: &[String],
    ) -> Result<Vec<SecretVariable>, DatabaseError> {
        self.list_secret_variables(names).await
    }

    async fn batch_set_mdm_profiles(
        &self,
        team_id: i64,
        profiles: &[NewProfile],
    ) -> Result<ProfileUpdates, DatabaseError> {
        Self::batch_set_mdm_profiles(self, team_id, profiles).await
    }

    async fn bulk_set_pending_profile_status(
        &self,
        profile_uuids: &[String],
    ) -> Result<u64, DatabaseError> {
        Self::bulk_set_pending_profile_status(self, profile_uuids).await
    }

    async fn mdm_profile(&self, profile_uuid: &str) -> Result<Option<MdmProfile>, DatabaseError> {
        self.get_mdm_profile(profile_uuid).await
    }

    async fn host_profile_status(
        &self,
        host_uuid: &str,
        profile_uuid: &str,
    ) -> Result<Option<HostProfileStatus>, DatabaseError> {
        self.get_host_profile_status(host_uuid, profile_uuid).await
    }

    async fn host_profile_statuses(
        &self,
        host_uuid: &str,
    ) -> Result<Vec<HostProfileStatus>, DatabaseError> {
        self.list_host_profile_statuses(host_uuid).await
    }

    async fn set_host_profile_status(
        &self,
        host_uuid: &str,
        profile_uuid: &str,
        status: &str,
        detail: &str,
        command_uuid: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        Self::set_host_profile_status(self, host_uuid, profile_uuid, status, detail, command_uuid)
            .await
    }

    async fn insert_mdm_command(
        &self,
        command: &MdmCommand,
        host_uuids: &[String],
    ) -> Result<(), DatabaseError> {
        Self::insert_mdm_command(self, command, host_uuids).await
    }

    async fn command_host_uuids(&self, command_uuid: &str) -> Result<Vec<String>, DatabaseError> {
        self.list_command_host_uuids(command_uuid).await
    }

    async fn command_results(
        &self,
        command_uuid: &str,
    ) -> Result<Vec<CommandResult>, DatabaseError> {
        self.list_command_results(command_uuid).await
    }

    async fn set_command_result(
        &self,
        host_uuid: &str,
        command_uuid: &str,
        status: &str,
        result: &[u8],
    ) -> Result<bool, DatabaseError> {
        Self::set_command_result(self, host_uuid, command_uuid, status, result).await
    }

    async fn create_script(
        &self,
        team_id: i64,
        name: &str,
        contents: &str,
    ) -> Result<Script, DatabaseError> {
        Self::create_script(self, team_id, name, contents).await
    }

    async fn script(&self, id: i64) -> Result<Option<Script>, DatabaseError> {
        self.get_script(id).await
    }

    async fn script_by_name(
        &self,
        team_id: i64,
        name: &str,
    ) -> Result<Option<Script>, DatabaseError> {
        self.get_script_by_name(team_id, name).await
    }

    async fn new_host_script_execution(
        &self,
        request: &NewScriptExecution,
    ) -> Result<HostScriptResult, DatabaseError> {
        self.insert_host_script_execution(request).await
    }

    async fn host_script_result(
        &self,
        execution_id: &str,
    ) -> Result<Option<HostScriptResult>, DatabaseError> {
        self.get_host_script_result(execution_id).await
    }

    async fn pending_host_script_executions(
        &self,
        host_id: i64,
    ) -> Result<Vec<HostScriptResult>, DatabaseError> {
        self.list_pending_host_script_executions(host_id).await
    }

    async fn is_script_execution_pending(
        &self,
        host_id: i64,
        script_id: i64,
    ) -> Result<bool, DatabaseError> {
        Self::is_script_execution_pending(self, host_id, script_id).await
    }

    async fn set_host_script_result(
        &self,
        host_id: i64,
        execution_id: &str,
        completion: &ScriptCompletion,
    ) -> Result<bool, DatabaseError> {
        Self::set_host_script_result(self, host_id, execution_id, completion).await
    }

    async fn new_activity(&self, activity: &NewActivity<'_>) -> Result<Activity, DatabaseError> {
        self.insert_activity(activity).await
    }
}
