//! Host, team, label and secret queries.

use std::collections::HashMap;

use armada_core::db::unix_timestamp;
use sqlx::{QueryBuilder, Sqlite};

use super::db::{DatabaseError, ServerDatabase};
use super::models::{Host, Label, Platform, SecretVariable, Team};

/// Parameters for enrolling a host.
#[derive(Debug, Clone)]
pub struct NewHost<'a> {
    pub uuid: &'a str,
    pub hostname: &'a str,
    pub platform: Platform,
    pub team_id: Option<i64>,
    pub mdm_enrolled: bool,
    pub scripts_capable: bool,
    pub scripts_enabled: Option<bool>,
}

impl ServerDatabase {
    // =========================================================================
    // Team queries
    // =========================================================================

    /// Create a team.
    pub async fn create_team(&self, name: &str) -> Result<Team, DatabaseError> {
        let result = sqlx::query("INSERT INTO teams (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(unix_timestamp())
            .execute(self.pool())
            .await?;

        self.get_team(result.last_insert_rowid())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Team {name}")))
    }

    /// Get a team by ID.
    pub async fn get_team(&self, id: i64) -> Result<Option<Team>, DatabaseError> {
        Ok(sqlx::query_as::<_, Team>("SELECT * FROM teams WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?)
    }

    /// Get a team by name.
    pub async fn get_team_by_name(&self, name: &str) -> Result<Option<Team>, DatabaseError> {
        Ok(sqlx::query_as::<_, Team>("SELECT * FROM teams WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?)
    }

    // =========================================================================
    // Host queries
    // =========================================================================

    /// Enroll a host.
    pub async fn create_host(&self, params: &NewHost<'_>) -> Result<Host, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "INSERT INTO hosts (uuid, hostname, platform, team_id, mdm_enrolled, scripts_capable, scripts_enabled, seen_at, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(params.uuid)
        .bind(params.hostname)
        .bind(params.platform.as_str())
        .bind(params.team_id)
        .bind(params.mdm_enrolled)
        .bind(params.scripts_capable)
        .bind(params.scripts_enabled)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_host(result.last_insert_rowid())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Host {}", params.uuid)))
    }

    /// Get a host by ID.
    pub async fn get_host(&self, id: i64) -> Result<Option<Host>, DatabaseError> {
        Ok(sqlx::query_as::<_, Host>("SELECT * FROM hosts WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?)
    }

    /// Get a host by UUID.
    pub async fn get_host_by_uuid(&self, uuid: &str) -> Result<Option<Host>, DatabaseError> {
        Ok(sqlx::query_as::<_, Host>("SELECT * FROM hosts WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(self.pool())
            .await?)
    }

    /// Load hosts by UUID without any visibility filtering.
    ///
    /// Unknown UUIDs are silently absent from the result.
    pub async fn list_hosts_by_uuids(&self, uuids: &[String]) -> Result<Vec<Host>, DatabaseError> {
        if uuids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT * FROM hosts WHERE uuid IN (");
        let mut separated = qb.separated(", ");
        for uuid in uuids {
            separated.push_bind(uuid);
        }
        separated.push_unseparated(") ORDER BY id");

        Ok(qb.build_query_as::<Host>().fetch_all(self.pool()).await?)
    }

    /// List management-enrolled hosts in a team with one of `platforms`.
    pub async fn list_mdm_hosts_in_team(
        &self,
        team_id: i64,
        platforms: &[&str],
    ) -> Result<Vec<Host>, DatabaseError> {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "SELECT * FROM hosts WHERE mdm_enrolled = 1 AND COALESCE(team_id, 0) = ",
        );
        qb.push_bind(team_id);
        qb.push(" AND platform IN (");
        let mut separated = qb.separated(", ");
        for p in platforms {
            separated.push_bind(*p);
        }
        separated.push_unseparated(") ORDER BY id");

        Ok(qb.build_query_as::<Host>().fetch_all(self.pool()).await?)
    }

    /// Record a host check-in.
    pub async fn touch_host(&self, id: i64, seen_at: i64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE hosts SET seen_at = ? WHERE id = ?")
            .bind(seen_at)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    // =========================================================================
    // Label queries
    // =========================================================================

    /// Create a label.
    pub async fn create_label(&self, name: &str) -> Result<Label, DatabaseError> {
        let result = sqlx::query("INSERT INTO labels (name) VALUES (?)")
            .bind(name)
            .execute(self.pool())
            .await?;

        Ok(Label {
            id: result.last_insert_rowid(),
            name: name.to_string(),
        })
    }

    /// Add a host to a label.
    pub async fn add_label_membership(
        &self,
        label_id: i64,
        host_id: i64,
    ) -> Result<(), DatabaseError> {
        sqlx::query("INSERT OR IGNORE INTO label_membership (label_id, host_id) VALUES (?, ?)")
            .bind(label_id)
            .bind(host_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Resolve label names to ids in one query. Unknown names are absent.
    pub async fn label_ids_by_name(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, i64>, DatabaseError> {
        if names.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT * FROM labels WHERE name IN (");
        let mut separated = qb.separated(", ");
        for name in names {
            separated.push_bind(name);
        }
        separated.push_unseparated(")");

        let labels = qb.build_query_as::<Label>().fetch_all(self.pool()).await?;
        Ok(labels.into_iter().map(|l| (l.name, l.id)).collect())
    }

    /// Label ids for each of the given hosts.
    pub async fn host_label_ids(
        &self,
        host_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<i64>>, DatabaseError> {
        let mut out: HashMap<i64, Vec<i64>> = HashMap::new();
        if host_ids.is_empty() {
            return Ok(out);
        }

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT host_id, label_id FROM label_membership WHERE host_id IN (");
        let mut separated = qb.separated(", ");
        for id in host_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows: Vec<(i64, i64)> = qb.build_query_as().fetch_all(self.pool()).await?;
        for (host_id, label_id) in rows {
            out.entry(host_id).or_default().push(label_id);
        }
        Ok(out)
    }

    // =========================================================================
    // Secret variable queries
    // =========================================================================

    /// Create or replace a secret variable.
    pub async fn upsert_secret_variable(&self, name: &str, value: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO secret_variables (name, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(name)
        .bind(value)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Load secret variables by name. Unknown names are absent.
    pub async fn list_secret_variables(
        &self,
        names: &[String],
    ) -> Result<Vec<SecretVariable>, DatabaseError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT * FROM secret_variables WHERE name IN (");
        let mut separated = qb.separated(", ");
        for name in names {
            separated.push_bind(name);
        }
        separated.push_unseparated(")");

        Ok(qb
            .build_query_as::<SecretVariable>()
            .fetch_all(self.pool())
            .await?)
    }
}
