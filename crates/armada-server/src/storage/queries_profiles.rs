//! Configuration profile and delivery-state queries.

use std::collections::{BTreeSet, HashMap};

use armada_core::db::unix_timestamp;
use sha2::{Digest, Sha256};
use sqlx::{Sqlite, Transaction};
use tracing::debug;

use super::db::{DatabaseError, ServerDatabase};
use super::models::{
    HostProfileStatus, LabelMode, MdmProfile, NewProfile, ProfileKind, ProfileUpdates,
};

/// Hex SHA-256 of stored profile contents.
pub fn profile_checksum(contents: &[u8]) -> String {
    hex::encode(Sha256::digest(contents))
}

/// What a stored profile looks like for change detection.
struct ExistingProfile {
    profile_uuid: String,
    kind: String,
    checksum: String,
    identifier: Option<String>,
    label_mode: Option<String>,
    secrets_updated_at: Option<i64>,
    label_ids: BTreeSet<i64>,
}

impl ExistingProfile {
    fn differs_from(&self, new: &NewProfile, checksum: &str) -> bool {
        let new_labels: BTreeSet<i64> = new.labels.iter().map(|l| l.id).collect();
        self.checksum != checksum
            || self.identifier != new.identifier
            || self.label_mode.as_deref() != new.label_mode.map(LabelMode::as_str)
            || self.secrets_updated_at != new.secrets_updated_at
            || self.label_ids != new_labels
    }
}

impl ServerDatabase {
    /// Replace every profile of a team with `profiles` in one transaction.
    ///
    /// Profiles are matched by name. Unchanged profiles keep their uuid and
    /// are not reported; a name that moves to a different kind is removed
    /// and re-created.
    pub async fn batch_set_mdm_profiles(
        &self,
        team_id: i64,
        profiles: &[NewProfile],
    ) -> Result<ProfileUpdates, DatabaseError> {
        let mut tx = self.pool().begin().await?;
        let now = unix_timestamp();
        let mut updates = ProfileUpdates::default();

        let existing = load_team_profiles(&mut tx, team_id).await?;
        let wanted: HashMap<&str, &NewProfile> =
            profiles.iter().map(|p| (p.name.as_str(), p)).collect();

        // Deletes first so re-created names do not trip the unique index.
        for (name, old) in &existing {
            let keep = wanted
                .get(name.as_str())
                .is_some_and(|p| p.kind.as_str() == old.kind);
            if keep {
                continue;
            }
            sqlx::query("DELETE FROM mdm_profiles WHERE profile_uuid = ?")
                .bind(&old.profile_uuid)
                .execute(&mut *tx)
                .await?;
            if let Some(kind) = ProfileKind::parse(&old.kind) {
                updates
                    .get_mut(kind)
                    .removed
                    .push(old.profile_uuid.clone());
            }
        }

        for profile in profiles {
            let checksum = profile_checksum(&profile.contents);
            let label_mode = profile.label_mode.map(LabelMode::as_str);

            let profile_uuid = match existing.get(&profile.name) {
                Some(old) if old.kind == profile.kind.as_str() => {
                    if !old.differs_from(profile, &checksum) {
                        continue;
                    }
                    sqlx::query(
                        "UPDATE mdm_profiles SET identifier = ?, contents = ?, checksum = ?, label_mode = ?, secrets_updated_at = ?, updated_at = ? WHERE profile_uuid = ?",
                    )
                    .bind(&profile.identifier)
                    .bind(&profile.contents)
                    .bind(&checksum)
                    .bind(label_mode)
                    .bind(profile.secrets_updated_at)
                    .bind(now)
                    .bind(&old.profile_uuid)
                    .execute(&mut *tx)
                    .await?;
                    sqlx::query("DELETE FROM mdm_profile_labels WHERE profile_uuid = ?")
                        .bind(&old.profile_uuid)
                        .execute(&mut *tx)
                        .await?;
                    old.profile_uuid.clone()
                }
                _ => {
                    let profile_uuid =
                        format!("{}{}", profile.kind.uuid_prefix(), uuid::Uuid::new_v4());
                    sqlx::query(
                        "INSERT INTO mdm_profiles (profile_uuid, team_id, kind, name, identifier, contents, checksum, label_mode, secrets_updated_at, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&profile_uuid)
                    .bind(team_id)
                    .bind(profile.kind.as_str())
                    .bind(&profile.name)
                    .bind(&profile.identifier)
                    .bind(&profile.contents)
                    .bind(&checksum)
                    .bind(label_mode)
                    .bind(profile.secrets_updated_at)
                    .bind(now)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                    profile_uuid
                }
            };

            for label in &profile.labels {
                sqlx::query(
                    "INSERT INTO mdm_profile_labels (profile_uuid, label_id, label_name) VALUES (?, ?, ?)",
                )
                .bind(&profile_uuid)
                .bind(label.id)
                .bind(&label.name)
                .execute(&mut *tx)
                .await?;
            }

            updates.get_mut(profile.kind).upserted.push(profile_uuid);
        }

        tx.commit().await?;

        debug!(
            team_id,
            changed = updates.any_changed(),
            "Batch profile replacement committed"
        );
        Ok(updates)
    }

    /// Get a profile by uuid.
    pub async fn get_mdm_profile(
        &self,
        profile_uuid: &str,
    ) -> Result<Option<MdmProfile>, DatabaseError> {
        Ok(
            sqlx::query_as::<_, MdmProfile>("SELECT * FROM mdm_profiles WHERE profile_uuid = ?")
                .bind(profile_uuid)
                .fetch_optional(self.pool())
                .await?,
        )
    }

    /// List a team's profiles ordered by name.
    pub async fn list_mdm_profiles(&self, team_id: i64) -> Result<Vec<MdmProfile>, DatabaseError> {
        Ok(sqlx::query_as::<_, MdmProfile>(
            "SELECT * FROM mdm_profiles WHERE team_id = ? ORDER BY name",
        )
        .bind(team_id)
        .fetch_all(self.pool())
        .await?)
    }

    /// Reset delivery state to pending for every in-scope host of each
    /// profile, and drop rows for hosts that fell out of scope.
    ///
    /// Returns the number of (host, profile) rows set to pending.
    pub async fn bulk_set_pending_profile_status(
        &self,
        profile_uuids: &[String],
    ) -> Result<u64, DatabaseError> {
        let mut total = 0u64;

        for profile_uuid in profile_uuids {
            let Some(profile) = self.get_mdm_profile(profile_uuid).await? else {
                continue;
            };
            let Some(kind) = profile.kind() else {
                continue;
            };

            let hosts = self
                .list_mdm_hosts_in_team(profile.team_id, kind.family().platforms())
                .await?;

            let label_ids: Vec<i64> = sqlx::query_scalar(
                "SELECT label_id FROM mdm_profile_labels WHERE profile_uuid = ?",
            )
            .bind(profile_uuid)
            .fetch_all(self.pool())
            .await?;
            let mode = profile.label_mode.as_deref().and_then(LabelMode::parse);

            let in_scope: Vec<&str> = match mode {
                Some(mode) if !label_ids.is_empty() => {
                    let ids: Vec<i64> = hosts.iter().map(|h| h.id).collect();
                    let memberships = self.host_label_ids(&ids).await?;
                    hosts
                        .iter()
                        .filter(|h| {
                            let host_labels = memberships.get(&h.id).map_or(&[][..], Vec::as_slice);
                            mode.matches(&label_ids, host_labels)
                        })
                        .map(|h| h.uuid.as_str())
                        .collect()
                }
                _ => hosts.iter().map(|h| h.uuid.as_str()).collect(),
            };

            let mut tx = self.pool().begin().await?;
            let now = unix_timestamp();

            sqlx::query("DELETE FROM host_mdm_profiles WHERE profile_uuid = ?")
                .bind(profile_uuid)
                .execute(&mut *tx)
                .await?;
            for host_uuid in &in_scope {
                sqlx::query(
                    "INSERT INTO host_mdm_profiles (host_uuid, profile_uuid, status, detail, command_uuid, updated_at) VALUES (?, ?, 'pending', '', NULL, ?)",
                )
                .bind(host_uuid)
                .bind(profile_uuid)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;

            total += in_scope.len() as u64;
        }

        Ok(total)
    }

    /// Delivery state of one profile on one host.
    pub async fn get_host_profile_status(
        &self,
        host_uuid: &str,
        profile_uuid: &str,
    ) -> Result<Option<HostProfileStatus>, DatabaseError> {
        Ok(sqlx::query_as::<_, HostProfileStatus>(
            "SELECT hp.host_uuid, hp.profile_uuid, p.name, p.kind, hp.status, hp.detail, hp.command_uuid, hp.updated_at \
             FROM host_mdm_profiles hp JOIN mdm_profiles p ON p.profile_uuid = hp.profile_uuid \
             WHERE hp.host_uuid = ? AND hp.profile_uuid = ?",
        )
        .bind(host_uuid)
        .bind(profile_uuid)
        .fetch_optional(self.pool())
        .await?)
    }

    /// Delivery state of every profile on a host.
    pub async fn list_host_profile_statuses(
        &self,
        host_uuid: &str,
    ) -> Result<Vec<HostProfileStatus>, DatabaseError> {
        Ok(sqlx::query_as::<_, HostProfileStatus>(
            "SELECT hp.host_uuid, hp.profile_uuid, p.name, p.kind, hp.status, hp.detail, hp.command_uuid, hp.updated_at \
             FROM host_mdm_profiles hp JOIN mdm_profiles p ON p.profile_uuid = hp.profile_uuid \
             WHERE hp.host_uuid = ? ORDER BY p.name",
        )
        .bind(host_uuid)
        .fetch_all(self.pool())
        .await?)
    }

    /// Write the delivery state of one profile on one host.
    ///
    /// Returns `false` when no such (host, profile) row exists.
    pub async fn set_host_profile_status(
        &self,
        host_uuid: &str,
        profile_uuid: &str,
        status: &str,
        detail: &str,
        command_uuid: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE host_mdm_profiles SET status = ?, detail = ?, command_uuid = COALESCE(?, command_uuid), updated_at = ? WHERE host_uuid = ? AND profile_uuid = ?",
        )
        .bind(status)
        .bind(detail)
        .bind(command_uuid)
        .bind(unix_timestamp())
        .bind(host_uuid)
        .bind(profile_uuid)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

async fn load_team_profiles(
    tx: &mut Transaction<'_, Sqlite>,
    team_id: i64,
) -> Result<HashMap<String, ExistingProfile>, DatabaseError> {
    let rows = sqlx::query_as::<_, MdmProfile>("SELECT * FROM mdm_profiles WHERE team_id = ?")
        .bind(team_id)
        .fetch_all(&mut **tx)
        .await?;

    let label_rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT pl.profile_uuid, pl.label_id FROM mdm_profile_labels pl \
         JOIN mdm_profiles p ON p.profile_uuid = pl.profile_uuid WHERE p.team_id = ?",
    )
    .bind(team_id)
    .fetch_all(&mut **tx)
    .await?;

    let mut labels: HashMap<String, BTreeSet<i64>> = HashMap::new();
    for (profile_uuid, label_id) in label_rows {
        labels.entry(profile_uuid).or_default().insert(label_id);
    }

    Ok(rows
        .into_iter()
        .map(|p| {
            let label_ids = labels.remove(&p.profile_uuid).unwrap_or_default();
            (
                p.name,
                ExistingProfile {
                    profile_uuid: p.profile_uuid,
                    kind: p.kind,
                    checksum: p.checksum,
                    identifier: p.identifier,
                    label_mode: p.label_mode,
                    secrets_updated_at: p.secrets_updated_at,
                    label_ids,
                },
            )
        })
        .collect())
}
