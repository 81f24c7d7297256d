//! Per-host profile delivery tracking and resends.

pub mod state;

use std::collections::HashMap;

use armada_core::db::unix_timestamp;
use tracing::{info, instrument, warn};

pub use state::{DeliveryEvent, DeliveryStatus, InvalidTransition, transition};

use crate::activity::ActivityDetails;
use crate::authz::{Action, AuthzSubject, ResourceKind, Viewer};
use crate::commands::queue::EnqueueError;
use crate::commands::{apple, windows};
use crate::error::{ResultExt, ServiceError, ServiceResult};
use crate::profiles::{secrets, variables};
use crate::service::Service;
use crate::storage::{Host, HostProfileStatus, MdmCommand, MdmProfile, ProfileKind};

impl Service {
    /// Re-deliver a profile to one host.
    ///
    /// Only a settled delivery (verified or failed) can be resent; an
    /// in-flight one is left untouched.
    #[instrument(skip(self, viewer))]
    pub async fn resend_host_profile(
        &self,
        viewer: &Viewer,
        host_id: i64,
        profile_uuid: &str,
    ) -> ServiceResult<HostProfileStatus> {
        let host = self
            .authorized_profile_host(viewer, host_id, Action::Write)
            .await?;

        let status = self
            .ds
            .host_profile_status(&host.uuid, profile_uuid)
            .await
            .context("load delivery status")?
            .ok_or_else(|| ServiceError::NotFound("Profile".to_string()))?;
        let current = DeliveryStatus::from_stored(status.status.as_deref()).ok_or_else(|| {
            ServiceError::internal(
                "read delivery status",
                format!("unknown status {:?}", status.status),
            )
        })?;
        if !current.can_resend() {
            return Err(ServiceError::Conflict(format!(
                "Couldn't resend. The profile is still {current} on this host."
            )));
        }

        let profile = self
            .ds
            .mdm_profile(profile_uuid)
            .await
            .context("load profile")?
            .ok_or_else(|| ServiceError::NotFound("Profile".to_string()))?;
        let kind = profile.kind().ok_or_else(|| {
            ServiceError::internal("read profile kind", format!("unknown kind {}", profile.kind))
        })?;
        if !self.mdm_enabled(kind.family()) {
            return Err(ServiceError::NotConfigured(match kind {
                ProfileKind::WindowsProfile => "Windows".to_string(),
                ProfileKind::AppleProfile | ProfileKind::AppleDeclaration => "Apple".to_string(),
            }));
        }

        let command = self.install_command(&host, &profile, kind).await?;
        match self.queue.enqueue(&command, &[host.uuid.clone()]).await {
            Ok(()) => {}
            Err(EnqueueError::Push { .. }) => {
                warn!(
                    host_uuid = %host.uuid,
                    command_uuid = %command.command_uuid,
                    "Push failed; host will fetch the profile at its next check-in"
                );
            }
            Err(EnqueueError::ForeignKey(_)) => {
                return Err(ServiceError::PreconditionFailed(
                    "The host is no longer enrolled in MDM.".to_string(),
                ));
            }
            Err(EnqueueError::Storage(e)) => {
                return Err(ServiceError::internal("enqueue profile command", e));
            }
        }

        self.ds
            .set_host_profile_status(
                &host.uuid,
                profile_uuid,
                DeliveryStatus::Pending.as_str(),
                "",
                Some(&command.command_uuid),
            )
            .await
            .context("reset delivery status")?;

        self.activity
            .record(
                viewer,
                &ActivityDetails::ResentProfile {
                    host_id: host.id,
                    host_display_name: host.hostname.clone(),
                    profile_name: profile.name.clone(),
                },
            )
            .await?;

        info!(
            host_id = host.id,
            profile_uuid,
            command_uuid = %command.command_uuid,
            "Profile resent"
        );

        self.ds
            .host_profile_status(&host.uuid, profile_uuid)
            .await
            .context("load delivery status")?
            .ok_or_else(|| ServiceError::NotFound("Profile".to_string()))
    }

    /// Apply a device report to a profile's delivery state.
    #[instrument(skip(self, event), fields(event = event.name()))]
    pub async fn record_profile_delivery(
        &self,
        host_uuid: &str,
        profile_uuid: &str,
        event: DeliveryEvent,
    ) -> ServiceResult<DeliveryStatus> {
        let status = self
            .ds
            .host_profile_status(host_uuid, profile_uuid)
            .await
            .context("load delivery status")?
            .ok_or_else(|| ServiceError::NotFound("Profile delivery".to_string()))?;
        let current = DeliveryStatus::from_stored(status.status.as_deref()).ok_or_else(|| {
            ServiceError::internal(
                "read delivery status",
                format!("unknown status {:?}", status.status),
            )
        })?;
        let is_declaration = ProfileKind::parse(&status.kind) == Some(ProfileKind::AppleDeclaration);

        let next = transition(current, &event, is_declaration)
            .map_err(|e| ServiceError::Conflict(e.to_string()))?;
        let detail = match &event {
            DeliveryEvent::Failed { detail } => detail.as_str(),
            DeliveryEvent::Acknowledged | DeliveryEvent::Verified => "",
        };

        self.ds
            .set_host_profile_status(host_uuid, profile_uuid, next.as_str(), detail, None)
            .await
            .context("store delivery status")?;

        info!(host_uuid, profile_uuid, from = %current, to = %next, "Delivery status updated");
        Ok(next)
    }

    /// Delivery state of every profile on a host.
    #[instrument(skip(self, viewer))]
    pub async fn list_host_profiles(
        &self,
        viewer: &Viewer,
        host_id: i64,
    ) -> ServiceResult<Vec<HostProfileStatus>> {
        let host = self
            .authorized_profile_host(viewer, host_id, Action::Read)
            .await?;
        self.ds
            .host_profile_statuses(&host.uuid)
            .await
            .context("list delivery statuses")
    }

    async fn authorized_profile_host(
        &self,
        viewer: &Viewer,
        host_id: i64,
        action: Action,
    ) -> ServiceResult<Host> {
        let Some(host) = self.ds.host(host_id).await.context("load host")? else {
            self.authz.authorize(
                viewer,
                &AuthzSubject::generic(ResourceKind::ConfigProfile),
                action,
            )?;
            return Err(ServiceError::NotFound("Host".to_string()));
        };
        self.authz.authorize(
            viewer,
            &AuthzSubject::new(ResourceKind::ConfigProfile, host.team_id),
            action,
        )?;
        Ok(host)
    }

    /// Build the platform command that installs `profile` on `host`, with
    /// secrets and host variables filled in.
    async fn install_command(
        &self,
        host: &Host,
        profile: &MdmProfile,
        kind: ProfileKind,
    ) -> ServiceResult<MdmCommand> {
        let command_uuid = uuid::Uuid::new_v4().to_string();

        let (request_type, raw_command) = match kind {
            ProfileKind::AppleDeclaration => (
                "DeclarativeManagement",
                apple::encode_declarative_management(&command_uuid)
                    .map_err(|e| ServiceError::internal("encode command", e))?,
            ),
            ProfileKind::AppleProfile => {
                let contents = self.render_for_host(host, &profile.contents).await?;
                (
                    "InstallProfile",
                    apple::encode_install_profile(&command_uuid, contents.as_bytes())
                        .map_err(|e| ServiceError::internal("encode command", e))?,
                )
            }
            ProfileKind::WindowsProfile => {
                let contents = self.render_for_host(host, &profile.contents).await?;
                (
                    "Atomic",
                    windows::encode_profile_command(&command_uuid, contents.as_bytes()),
                )
            }
        };

        Ok(MdmCommand {
            command_uuid,
            platform: kind.family().as_str().to_string(),
            request_type: request_type.to_string(),
            raw_command,
            created_at: unix_timestamp(),
        })
    }

    async fn render_for_host(&self, host: &Host, stored: &[u8]) -> ServiceResult<String> {
        let contents = String::from_utf8_lossy(stored);

        let names: Vec<String> = secrets::secret_names(&contents).into_iter().collect();
        let values: HashMap<String, String> = self
            .ds
            .secret_variables(&names)
            .await
            .context("load secret variables")?
            .into_iter()
            .map(|s| (s.name, s.value))
            .collect();
        let expanded = secrets::expand(&contents, &values).map_err(|missing| {
            ServiceError::PreconditionFailed(format!(
                "The profile references secrets that no longer exist: {}",
                missing.join(", ")
            ))
        })?;

        let host_values = HashMap::from([("HOST_UUID", host.uuid.clone())]);
        Ok(variables::substitute(&expanded, &host_values))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::authz::Role;
    use crate::profiles::TeamSelector;
    use crate::profiles::classify::tests::{declaration, mobileconfig};
    use crate::profiles::spec::ProfileSpec;
    use crate::service::test_support::{Fixture, fixture, host};
    use crate::storage::Platform;

    /// Apply one profile to a fresh Apple host and return its uuid.
    async fn seed(f: &Fixture, contents: String) -> (Host, String) {
        let h = host(&f.db, "mac-1", Platform::Darwin, None).await;
        let result = f
            .svc
            .batch_set_profiles(
                &f.admin,
                TeamSelector::NoTeam,
                false,
                vec![ProfileSpec {
                    name: "p".into(),
                    contents,
                    ..Default::default()
                }],
            )
            .await
            .unwrap();
        let uuid = [
            &result.updates.apple_profiles.upserted,
            &result.updates.apple_declarations.upserted,
        ]
        .into_iter()
        .flatten()
        .next()
        .unwrap()
        .clone();
        (h, uuid)
    }

    fn wifi() -> String {
        mobileconfig("com.example.wifi", "com.apple.wifi.managed")
    }

    #[tokio::test]
    async fn resend_conflicts_while_in_flight() {
        let f = fixture().await;
        let (h, uuid) = seed(&f, wifi()).await;

        for status in ["pending", "verifying"] {
            f.db.set_host_profile_status(&h.uuid, &uuid, status, "", None)
                .await
                .unwrap();
            let before = f.db.get_host_profile_status(&h.uuid, &uuid).await.unwrap().unwrap();

            let err = f.svc.resend_host_profile(&f.admin, h.id, &uuid).await.unwrap_err();
            assert!(matches!(err, ServiceError::Conflict(_)));

            let after = f.db.get_host_profile_status(&h.uuid, &uuid).await.unwrap().unwrap();
            assert_eq!(after.status, before.status);
            assert_eq!(after.command_uuid, before.command_uuid);
        }
    }

    #[tokio::test]
    async fn resend_from_settled_state_resets_to_pending() {
        let f = fixture().await;
        let (h, uuid) = seed(&f, wifi()).await;

        for status in ["failed", "verified"] {
            f.db.set_host_profile_status(&h.uuid, &uuid, status, "boom", None)
                .await
                .unwrap();

            let row = f.svc.resend_host_profile(&f.admin, h.id, &uuid).await.unwrap();
            assert_eq!(row.status.as_deref(), Some("pending"));
            assert_eq!(row.detail, "");

            let command_uuid = row.command_uuid.unwrap();
            let command = f.db.get_mdm_command(&command_uuid).await.unwrap().unwrap();
            assert_eq!(command.request_type, "InstallProfile");
            assert_eq!(
                f.db.list_command_host_uuids(&command_uuid).await.unwrap(),
                vec![h.uuid.clone()]
            );
        }

        let activity = &f.db.list_activities(1).await.unwrap()[0];
        assert_eq!(activity.activity_type, "resent_configuration_profile");
    }

    #[tokio::test]
    async fn resend_expands_host_variables() {
        let f = fixture().await;
        let contents = wifi().replace(
            "<key>PayloadVersion</key>",
            "<key>Host</key><string>$ARMADA_VAR_HOST_UUID</string><key>PayloadVersion</key>",
        );
        let (h, uuid) = seed(&f, contents).await;
        f.db.set_host_profile_status(&h.uuid, &uuid, "failed", "", None)
            .await
            .unwrap();

        let row = f.svc.resend_host_profile(&f.admin, h.id, &uuid).await.unwrap();
        let command = f
            .db
            .get_mdm_command(&row.command_uuid.unwrap())
            .await
            .unwrap()
            .unwrap();
        let apple::AppleCommand { request_type, .. } =
            apple::decode_command(&command.raw_command).unwrap();
        assert_eq!(request_type, "InstallProfile");

        let envelope = plist::Value::from_reader(std::io::Cursor::new(&command.raw_command)).unwrap();
        let payload = envelope
            .as_dictionary()
            .and_then(|d| d.get("Command"))
            .and_then(plist::Value::as_dictionary)
            .and_then(|d| d.get("Payload"))
            .and_then(plist::Value::as_data)
            .unwrap();
        let payload = String::from_utf8(payload.to_vec()).unwrap();
        assert!(payload.contains("<string>mac-1</string>"));
    }

    #[tokio::test]
    async fn resend_of_declaration_triggers_sync() {
        let f = fixture().await;
        let (h, uuid) = seed(&f, declaration("com.example.d")).await;
        f.db.set_host_profile_status(&h.uuid, &uuid, "verified", "", None)
            .await
            .unwrap();

        let row = f.svc.resend_host_profile(&f.admin, h.id, &uuid).await.unwrap();
        let command = f
            .db
            .get_mdm_command(&row.command_uuid.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(command.request_type, "DeclarativeManagement");
    }

    #[tokio::test]
    async fn device_reports_drive_the_state_machine() {
        let f = fixture().await;
        let (h, uuid) = seed(&f, wifi()).await;

        let s = f
            .svc
            .record_profile_delivery(&h.uuid, &uuid, DeliveryEvent::Acknowledged)
            .await
            .unwrap();
        assert_eq!(s, DeliveryStatus::Verifying);
        let s = f
            .svc
            .record_profile_delivery(&h.uuid, &uuid, DeliveryEvent::Verified)
            .await
            .unwrap();
        assert_eq!(s, DeliveryStatus::Verified);

        let err = f
            .svc
            .record_profile_delivery(&h.uuid, &uuid, DeliveryEvent::Acknowledged)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        f.svc
            .record_profile_delivery(
                &h.uuid,
                &uuid,
                DeliveryEvent::Failed {
                    detail: "MDMClientError (89)".into(),
                },
            )
            .await
            .unwrap();
        let row = f.db.get_host_profile_status(&h.uuid, &uuid).await.unwrap().unwrap();
        assert_eq!(row.status.as_deref(), Some("failed"));
        assert_eq!(row.detail, "MDMClientError (89)");
    }

    #[tokio::test]
    async fn listing_is_team_scoped() {
        let f = fixture().await;
        let (h, _) = seed(&f, wifi()).await;

        let rows = f.svc.list_host_profiles(&f.admin, h.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "p");

        let outsider = Viewer::team_member("9", "t", "t@example.com", &[(5, Role::Admin)]);
        let err = f.svc.list_host_profiles(&outsider, h.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden));
        let err = f.svc.list_host_profiles(&outsider, 404).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden));
        let err = f.svc.list_host_profiles(&f.admin, 404).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
