//! Audit log queries.

use super::db::{DatabaseError, ServerDatabase};
use super::models::Activity;

/// An audit entry to persist.
#[derive(Debug, Clone)]
pub struct NewActivity<'a> {
    pub actor_id: Option<&'a str>,
    pub actor_name: Option<&'a str>,
    pub actor_email: Option<&'a str>,
    pub activity_type: &'a str,
    /// Serialized JSON details.
    pub details: &'a str,
    pub created_at: i64,
}

impl ServerDatabase {
    /// Append an audit entry.
    pub async fn insert_activity(&self, activity: &NewActivity<'_>) -> Result<Activity, DatabaseError> {
        let result = sqlx::query(
            "INSERT INTO activities (actor_id, actor_name, actor_email, activity_type, details, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(activity.actor_id)
        .bind(activity.actor_name)
        .bind(activity.actor_email)
        .bind(activity.activity_type)
        .bind(activity.details)
        .bind(activity.created_at)
        .execute(self.pool())
        .await?;

        Ok(Activity {
            id: result.last_insert_rowid(),
            actor_id: activity.actor_id.map(str::to_string),
            actor_name: activity.actor_name.map(str::to_string),
            actor_email: activity.actor_email.map(str::to_string),
            activity_type: activity.activity_type.to_string(),
            details: activity.details.to_string(),
            created_at: activity.created_at,
        })
    }

    /// Most recent audit entries, newest first.
    pub async fn list_activities(&self, limit: i64) -> Result<Vec<Activity>, DatabaseError> {
        Ok(sqlx::query_as::<_, Activity>(
            "SELECT * FROM activities ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?)
    }
}
