//! Management command queue queries.

use armada_core::db::unix_timestamp;

use super::db::{DatabaseError, ServerDatabase};
use super::models::{CommandResult, MdmCommand};

impl ServerDatabase {
    /// Store a command and queue it for every host in `host_uuids`.
    ///
    /// Runs in one transaction; a host uuid with no enrolled host surfaces
    /// as [`DatabaseError::ForeignKey`] and nothing is queued.
    pub async fn insert_mdm_command(
        &self,
        command: &MdmCommand,
        host_uuids: &[String],
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO mdm_commands (command_uuid, platform, request_type, raw_command, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&command.command_uuid)
        .bind(&command.platform)
        .bind(&command.request_type)
        .bind(&command.raw_command)
        .bind(command.created_at)
        .execute(&mut *tx)
        .await?;

        for host_uuid in host_uuids {
            sqlx::query(
                "INSERT INTO mdm_command_queue (host_uuid, command_uuid, status, result, updated_at) VALUES (?, ?, NULL, NULL, ?)",
            )
            .bind(host_uuid)
            .bind(&command.command_uuid)
            .bind(command.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Get a stored command.
    pub async fn get_mdm_command(
        &self,
        command_uuid: &str,
    ) -> Result<Option<MdmCommand>, DatabaseError> {
        Ok(
            sqlx::query_as::<_, MdmCommand>("SELECT * FROM mdm_commands WHERE command_uuid = ?")
                .bind(command_uuid)
                .fetch_optional(self.pool())
                .await?,
        )
    }

    /// Hosts a command was queued for.
    pub async fn list_command_host_uuids(
        &self,
        command_uuid: &str,
    ) -> Result<Vec<String>, DatabaseError> {
        Ok(sqlx::query_scalar(
            "SELECT host_uuid FROM mdm_command_queue WHERE command_uuid = ? ORDER BY host_uuid",
        )
        .bind(command_uuid)
        .fetch_all(self.pool())
        .await?)
    }

    /// Per-host results of a command.
    pub async fn list_command_results(
        &self,
        command_uuid: &str,
    ) -> Result<Vec<CommandResult>, DatabaseError> {
        Ok(sqlx::query_as::<_, CommandResult>(
            "SELECT q.host_uuid, q.command_uuid, c.request_type, q.status, q.result, q.updated_at \
             FROM mdm_command_queue q JOIN mdm_commands c ON c.command_uuid = q.command_uuid \
             WHERE q.command_uuid = ? ORDER BY q.host_uuid",
        )
        .bind(command_uuid)
        .fetch_all(self.pool())
        .await?)
    }

    /// Record a host's response to a queued command.
    ///
    /// Returns `false` when the command was never queued for that host.
    pub async fn set_command_result(
        &self,
        host_uuid: &str,
        command_uuid: &str,
        status: &str,
        result: &[u8],
    ) -> Result<bool, DatabaseError> {
        let outcome = sqlx::query(
            "UPDATE mdm_command_queue SET status = ?, result = ?, updated_at = ? WHERE host_uuid = ? AND command_uuid = ?",
        )
        .bind(status)
        .bind(result)
        .bind(unix_timestamp())
        .bind(host_uuid)
        .bind(command_uuid)
        .execute(self.pool())
        .await?;

        Ok(outcome.rows_affected() > 0)
    }
}
