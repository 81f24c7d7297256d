//! Audit trail and activity notifications.

pub mod webhook;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

pub use webhook::{WebhookClient, WebhookError, WebhookPayload, WebhookSender, WebhookWorker};

use crate::authz::Viewer;
use crate::datastore::Datastore;
use crate::error::{ResultExt, ServiceError, ServiceResult};
use crate::storage::{Activity, MdmFamily, NewActivity, ProfileKind};

/// Details recorded with each activity type.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ActivityDetails {
    RanMdmCommand {
        host_uuids: Vec<String>,
        command_uuid: String,
        request_type: String,
        platform: MdmFamily,
    },
    EditedProfiles {
        #[serde(skip)]
        kind: ProfileKind,
        team_id: Option<i64>,
        team_name: Option<String>,
    },
    RanScript {
        host_id: i64,
        host_display_name: String,
        script_execution_id: String,
        script_name: Option<String>,
        #[serde(rename = "async")]
        is_async: bool,
    },
    AddedScript {
        script_name: String,
        team_id: Option<i64>,
        team_name: Option<String>,
    },
    ResentProfile {
        host_id: i64,
        host_display_name: String,
        profile_name: String,
    },
}

impl ActivityDetails {
    pub const fn activity_type(&self) -> &'static str {
        match self {
            Self::RanMdmCommand { .. } => "ran_mdm_command",
            Self::EditedProfiles { kind, .. } => match kind {
                ProfileKind::AppleProfile => "edited_macos_profile",
                ProfileKind::AppleDeclaration => "edited_declaration_profile",
                ProfileKind::WindowsProfile => "edited_windows_profile",
            },
            Self::RanScript { .. } => "ran_script",
            Self::AddedScript { .. } => "added_script",
            Self::ResentProfile { .. } => "resent_configuration_profile",
        }
    }
}

/// Writes audit entries and forwards them to the webhook, if enabled.
#[derive(Clone)]
pub struct ActivityEmitter {
    ds: Arc<dyn Datastore>,
    webhook: Option<WebhookSender>,
}

impl ActivityEmitter {
    pub fn new(ds: Arc<dyn Datastore>) -> Self {
        Self { ds, webhook: None }
    }

    #[must_use]
    pub fn with_webhook(mut self, sender: WebhookSender) -> Self {
        self.webhook = Some(sender);
        self
    }

    /// Persist an activity attributed to `viewer`, then queue its webhook
    /// delivery. Webhook failures never reach the caller.
    pub async fn record(
        &self,
        viewer: &Viewer,
        details: &ActivityDetails,
    ) -> ServiceResult<Activity> {
        let activity_type = details.activity_type();
        let details_json = serde_json::to_value(details)
            .map_err(|e| ServiceError::internal("serialize activity details", e))?;
        let now = Utc::now();

        let activity = self
            .ds
            .new_activity(&NewActivity {
                actor_id: Some(&viewer.user_id),
                actor_name: Some(&viewer.name),
                actor_email: Some(&viewer.email),
                activity_type,
                details: &details_json.to_string(),
                created_at: now.timestamp(),
            })
            .await
            .context("record activity")?;

        info!(activity_type, activity_id = activity.id, "Activity recorded");

        if let Some(webhook) = &self.webhook {
            webhook.dispatch(WebhookPayload {
                timestamp: now,
                actor_full_name: Some(viewer.name.clone()),
                actor_id: Some(viewer.user_id.clone()),
                actor_email: Some(viewer.email.clone()),
                activity_type: activity_type.to_string(),
                details: details_json,
            });
        }

        Ok(activity)
    }
}
