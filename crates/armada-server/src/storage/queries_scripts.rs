//! Saved script and script execution queries.

use armada_core::db::unix_timestamp;

use super::db::{DatabaseError, ServerDatabase};
use super::models::{HostScriptResult, NewScriptExecution, Script, ScriptCompletion};

impl ServerDatabase {
    // =========================================================================
    // Saved scripts
    // =========================================================================

    /// Save a script. A duplicate name within the team is
    /// [`DatabaseError::Unique`].
    pub async fn create_script(
        &self,
        team_id: i64,
        name: &str,
        contents: &str,
    ) -> Result<Script, DatabaseError> {
        let result = sqlx::query(
            "INSERT INTO scripts (team_id, name, contents, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(team_id)
        .bind(name)
        .bind(contents)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        self.get_script(result.last_insert_rowid())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Script {name}")))
    }

    /// Get a saved script by ID.
    pub async fn get_script(&self, id: i64) -> Result<Option<Script>, DatabaseError> {
        Ok(sqlx::query_as::<_, Script>("SELECT * FROM scripts WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?)
    }

    /// Get a saved script by team and name.
    pub async fn get_script_by_name(
        &self,
        team_id: i64,
        name: &str,
    ) -> Result<Option<Script>, DatabaseError> {
        Ok(
            sqlx::query_as::<_, Script>("SELECT * FROM scripts WHERE team_id = ? AND name = ?")
                .bind(team_id)
                .bind(name)
                .fetch_optional(self.pool())
                .await?,
        )
    }

    // =========================================================================
    // Executions
    // =========================================================================

    /// Queue a script execution and return the stored row.
    pub async fn insert_host_script_execution(
        &self,
        request: &NewScriptExecution,
    ) -> Result<HostScriptResult, DatabaseError> {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO host_script_results (execution_id, host_id, script_id, contents, sync_request, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&execution_id)
        .bind(request.host_id)
        .bind(request.script_id)
        .bind(&request.contents)
        .bind(request.sync_request)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_host_script_result(&execution_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Script execution {execution_id}")))
    }

    /// Get an execution by its execution id.
    pub async fn get_host_script_result(
        &self,
        execution_id: &str,
    ) -> Result<Option<HostScriptResult>, DatabaseError> {
        Ok(sqlx::query_as::<_, HostScriptResult>(
            "SELECT * FROM host_script_results WHERE execution_id = ?",
        )
        .bind(execution_id)
        .fetch_optional(self.pool())
        .await?)
    }

    /// Executions on a host that have not reported an exit code, oldest first.
    pub async fn list_pending_host_script_executions(
        &self,
        host_id: i64,
    ) -> Result<Vec<HostScriptResult>, DatabaseError> {
        Ok(sqlx::query_as::<_, HostScriptResult>(
            "SELECT * FROM host_script_results WHERE host_id = ? AND exit_code IS NULL ORDER BY created_at, id",
        )
        .bind(host_id)
        .fetch_all(self.pool())
        .await?)
    }

    /// Whether a saved script already has an execution queued on a host.
    pub async fn is_script_execution_pending(
        &self,
        host_id: i64,
        script_id: i64,
    ) -> Result<bool, DatabaseError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM host_script_results WHERE host_id = ? AND script_id = ? AND exit_code IS NULL",
        )
        .bind(host_id)
        .bind(script_id)
        .fetch_one(self.pool())
        .await?;

        Ok(count > 0)
    }

    /// Store an agent's completion report for a pending execution.
    ///
    /// Returns `false` when no pending execution with that id exists on the
    /// host.
    pub async fn set_host_script_result(
        &self,
        host_id: i64,
        execution_id: &str,
        completion: &ScriptCompletion,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE host_script_results SET exit_code = ?, output = ?, runtime_secs = ?, timed_out = ?, updated_at = ? \
             WHERE host_id = ? AND execution_id = ? AND exit_code IS NULL",
        )
        .bind(completion.exit_code)
        .bind(&completion.output)
        .bind(completion.runtime_secs)
        .bind(completion.timed_out)
        .bind(unix_timestamp())
        .bind(host_id)
        .bind(execution_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
