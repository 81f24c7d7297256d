//! Management command dispatch.
//!
//! A command arrives base64-encoded together with its target hosts. The
//! dispatcher authorizes every team the targets span, checks they share one
//! enrolled platform, decodes the payload with the platform codec, gates
//! high-impact commands behind the premium tier and hands the command to
//! the [`queue::CommandQueue`].

pub mod apple;
pub mod queue;
pub mod windows;

use std::collections::BTreeSet;

use armada_core::db::unix_timestamp;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::activity::ActivityDetails;
use crate::authz::{Action, ResourceKind, Viewer, authorize_hosts_scope};
use crate::error::{ResultExt, ServiceError, ServiceResult};
use crate::service::Service;
use crate::storage::{CommandResult, MdmCommand, MdmFamily};
use queue::EnqueueError;

/// Standard alphabet, accepting input with or without padding.
const PADDING_AGNOSTIC: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Outcome of a dispatched command.
///
/// `failed_uuids` lists hosts the push channel could not reach; the command
/// is still queued for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandEnqueueResult {
    pub command_uuid: String,
    pub request_type: String,
    pub platform: MdmFamily,
    pub failed_uuids: Vec<String>,
}

/// Decode a base64 payload, with or without padding.
pub fn decode_base64(raw: &str) -> Result<Vec<u8>, base64::DecodeError> {
    PADDING_AGNOSTIC.decode(raw.trim())
}

impl Service {
    /// Queue a raw management command for a set of hosts.
    #[instrument(skip(self, viewer, raw_base64), fields(hosts = host_uuids.len()))]
    pub async fn run_mdm_command(
        &self,
        viewer: &Viewer,
        raw_base64: &str,
        host_uuids: &[String],
    ) -> ServiceResult<CommandEnqueueResult> {
        let hosts = authorize_hosts_scope(
            self.ds.as_ref(),
            self.authz.as_ref(),
            viewer,
            host_uuids,
            ResourceKind::MdmCommand,
            Action::Write,
        )
        .await?;
        if hosts.is_empty() {
            return Err(ServiceError::NotFound("Hosts".to_string()));
        }

        if hosts.iter().any(|h| !h.mdm_enrolled) {
            return Err(ServiceError::PreconditionFailed(
                "Can't run the MDM command because one or more hosts have MDM turned off. \
                 Turn on MDM for those hosts and try again."
                    .to_string(),
            ));
        }

        let families: BTreeSet<Option<MdmFamily>> = hosts
            .iter()
            .map(|h| h.platform().and_then(|p| p.mdm_family()))
            .collect();
        let family = match families.into_iter().collect::<Vec<_>>().as_slice() {
            [Some(family)] => *family,
            [None] => {
                return Err(ServiceError::InvalidArgument(
                    "Invalid platform. You can only run MDM commands on Windows or Apple hosts."
                        .to_string(),
                ));
            }
            _ => {
                return Err(ServiceError::InvalidArgument(
                    "All hosts must be on the same platform.".to_string(),
                ));
            }
        };

        if !self.mdm_enabled(family) {
            return Err(ServiceError::NotConfigured(match family {
                MdmFamily::Apple => "Apple".to_string(),
                MdmFamily::Windows => "Windows".to_string(),
            }));
        }

        let raw = decode_base64(raw_base64).map_err(|e| {
            ServiceError::InvalidArgument(format!("unable to decode base64 command: {e}"))
        })?;

        let (command_uuid, request_type, premium) = match family {
            MdmFamily::Apple => {
                let cmd = apple::decode_command(&raw).map_err(ServiceError::InvalidArgument)?;
                let premium = apple::is_premium_request(&cmd.request_type);
                (cmd.command_uuid, cmd.request_type, premium)
            }
            MdmFamily::Windows => {
                let cmd = windows::decode_command(&raw).map_err(ServiceError::InvalidArgument)?;
                let premium = windows::is_premium_target(&cmd.target_loc_uri);
                (uuid::Uuid::new_v4().to_string(), cmd.target_loc_uri, premium)
            }
        };

        if premium && !self.license.is_premium() {
            return Err(ServiceError::MissingLicense);
        }

        let target_uuids: Vec<String> = hosts.iter().map(|h| h.uuid.clone()).collect();
        let command = MdmCommand {
            command_uuid,
            platform: family.as_str().to_string(),
            request_type,
            raw_command: raw,
            created_at: unix_timestamp(),
        };

        let failed_uuids = match self.queue.enqueue(&command, &target_uuids).await {
            Ok(()) => Vec::new(),
            Err(EnqueueError::Push { failed }) if failed.len() < target_uuids.len() => {
                warn!(
                    command_uuid = %command.command_uuid,
                    failed = failed.len(),
                    "Command queued with partial push failure"
                );
                failed
            }
            Err(EnqueueError::Push { .. }) => {
                return Err(ServiceError::BadGateway(
                    "Push notification failed for every targeted host".to_string(),
                ));
            }
            Err(EnqueueError::ForeignKey(_)) => {
                return Err(ServiceError::InvalidArgument(
                    "One or more hosts are not enrolled in MDM. \
                     They may have been unenrolled since the command was prepared."
                        .to_string(),
                ));
            }
            Err(EnqueueError::Storage(e)) => {
                return Err(ServiceError::internal("enqueue MDM command", e));
            }
        };

        self.activity
            .record(
                viewer,
                &ActivityDetails::RanMdmCommand {
                    host_uuids: target_uuids,
                    command_uuid: command.command_uuid.clone(),
                    request_type: command.request_type.clone(),
                    platform: family,
                },
            )
            .await?;

        info!(
            command_uuid = %command.command_uuid,
            request_type = %command.request_type,
            platform = %family,
            "MDM command dispatched"
        );

        Ok(CommandEnqueueResult {
            command_uuid: command.command_uuid,
            request_type: command.request_type,
            platform: family,
            failed_uuids,
        })
    }

    /// Per-host results of a command, authorized over every team it reached.
    #[instrument(skip(self, viewer))]
    pub async fn get_command_results(
        &self,
        viewer: &Viewer,
        command_uuid: &str,
    ) -> ServiceResult<Vec<CommandResult>> {
        let host_uuids = self
            .ds
            .command_host_uuids(command_uuid)
            .await
            .context("load command targets")?;

        authorize_hosts_scope(
            self.ds.as_ref(),
            self.authz.as_ref(),
            viewer,
            &host_uuids,
            ResourceKind::MdmCommand,
            Action::Read,
        )
        .await?;

        if host_uuids.is_empty() {
            return Err(ServiceError::NotFound(format!("Command {command_uuid}")));
        }

        self.ds
            .command_results(command_uuid)
            .await
            .context("load command results")
    }

    /// Store a host's response to a queued command.
    #[instrument(skip(self, raw_result))]
    pub async fn record_command_result(
        &self,
        host_uuid: &str,
        command_uuid: &str,
        status: &str,
        raw_result: &[u8],
    ) -> ServiceResult<()> {
        let updated = self
            .ds
            .set_command_result(host_uuid, command_uuid, status, raw_result)
            .await
            .context("store command result")?;
        if !updated {
            return Err(ServiceError::NotFound(format!(
                "Command {command_uuid} for host {host_uuid}"
            )));
        }
        info!(host_uuid, command_uuid, status, "Command result recorded");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};

    use super::*;
    use crate::authz::Role;
    use crate::commands::queue::{PushNotifier, StoreAndForwardQueue};
    use crate::service::test_support::{config, fixture, fixture_with, host};
    use crate::storage::Platform;

    const INFO_COMMAND: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict>
<key>Command</key><dict><key>RequestType</key><string>DeviceInformation</string></dict>
<key>CommandUUID</key><string>cmd-info</string>
</dict></plist>"#;

    const ERASE_COMMAND: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict>
<key>Command</key><dict><key>RequestType</key><string>EraseDevice</string></dict>
<key>CommandUUID</key><string>cmd-erase</string>
</dict></plist>"#;

    const REBOOT: &str = "<Exec><CmdID>1</CmdID><Item><Target>\
        <LocURI>./Device/Vendor/MSFT/Reboot/RebootNow</LocURI></Target></Item></Exec>";

    fn uuids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn base64_accepts_padded_and_unpadded() {
        let data = b"ab";
        assert_eq!(decode_base64(&STANDARD.encode(data)).unwrap(), data);
        assert_eq!(decode_base64(&STANDARD_NO_PAD.encode(data)).unwrap(), data);
    }

    #[tokio::test]
    async fn apple_command_is_queued_and_audited() {
        let f = fixture().await;
        host(&f.db, "mac-1", Platform::Darwin, None).await;
        host(&f.db, "ipad-1", Platform::Ipados, None).await;

        let result = f
            .svc
            .run_mdm_command(&f.admin, &STANDARD.encode(INFO_COMMAND), &uuids(&["mac-1", "ipad-1"]))
            .await
            .unwrap();

        assert_eq!(result.command_uuid, "cmd-info");
        assert_eq!(result.request_type, "DeviceInformation");
        assert_eq!(result.platform, MdmFamily::Apple);
        assert!(result.failed_uuids.is_empty());
        assert_eq!(f.db.list_command_host_uuids("cmd-info").await.unwrap().len(), 2);

        let activities = f.db.list_activities(10).await.unwrap();
        assert_eq!(activities[0].activity_type, "ran_mdm_command");
    }

    #[tokio::test]
    async fn windows_command_uses_target_as_request_type() {
        let f = fixture().await;
        host(&f.db, "win-1", Platform::Windows, None).await;

        let result = f
            .svc
            .run_mdm_command(&f.admin, &STANDARD_NO_PAD.encode(REBOOT), &uuids(&["win-1"]))
            .await
            .unwrap();
        assert_eq!(result.platform, MdmFamily::Windows);
        assert_eq!(result.request_type, "./Device/Vendor/MSFT/Reboot/RebootNow");
    }

    #[tokio::test]
    async fn unauthorized_team_blocks_every_target() {
        let f = fixture().await;
        let t1 = f.db.create_team("one").await.unwrap().id;
        let t2 = f.db.create_team("two").await.unwrap().id;
        host(&f.db, "a", Platform::Darwin, Some(t1)).await;
        host(&f.db, "b", Platform::Darwin, Some(t2)).await;
        let viewer = Viewer::team_member("9", "m", "m@example.com", &[(t1, Role::Maintainer)]);

        let err = f
            .svc
            .run_mdm_command(&viewer, &STANDARD.encode(INFO_COMMAND), &uuids(&["a", "b"]))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Forbidden));
        assert!(f.db.get_mdm_command("cmd-info").await.unwrap().is_none());
        assert!(f.db.list_activities(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_known_targets_is_not_found() {
        let f = fixture().await;
        let err = f
            .svc
            .run_mdm_command(&f.admin, &STANDARD.encode(INFO_COMMAND), &uuids(&["ghost"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn unenrolled_host_fails_precondition() {
        let f = fixture().await;
        f.db.create_host(&crate::storage::NewHost {
            uuid: "off",
            hostname: "off",
            platform: Platform::Darwin,
            team_id: None,
            mdm_enrolled: false,
            scripts_capable: false,
            scripts_enabled: None,
        })
        .await
        .unwrap();

        let err = f
            .svc
            .run_mdm_command(&f.admin, &STANDARD.encode(INFO_COMMAND), &uuids(&["off"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn mixed_platforms_are_rejected() {
        let f = fixture().await;
        host(&f.db, "mac", Platform::Darwin, None).await;
        host(&f.db, "win", Platform::Windows, None).await;

        let err = f
            .svc
            .run_mdm_command(&f.admin, &STANDARD.encode(INFO_COMMAND), &uuids(&["mac", "win"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn unconfigured_platform_is_reported() {
        let mut cfg = config(true);
        cfg.mdm.windows_enabled = false;
        let f = fixture_with(&cfg).await;
        host(&f.db, "win", Platform::Windows, None).await;

        let err = f
            .svc
            .run_mdm_command(&f.admin, &STANDARD.encode(REBOOT), &uuids(&["win"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn erase_requires_premium() {
        let f = fixture_with(&config(false)).await;
        host(&f.db, "mac", Platform::Darwin, None).await;

        let err = f
            .svc
            .run_mdm_command(&f.admin, &STANDARD.encode(ERASE_COMMAND), &uuids(&["mac"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::MissingLicense));
    }

    #[tokio::test]
    async fn malformed_payload_is_invalid() {
        let f = fixture().await;
        host(&f.db, "mac", Platform::Darwin, None).await;

        let err = f
            .svc
            .run_mdm_command(&f.admin, "!!not-base64!!", &uuids(&["mac"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));

        let err = f
            .svc
            .run_mdm_command(&f.admin, &STANDARD.encode("<plist/>"), &uuids(&["mac"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
    }

    struct Unreachable(Vec<String>);

    #[async_trait]
    impl PushNotifier for Unreachable {
        async fn push(&self, _family: MdmFamily, host_uuids: &[String]) -> Vec<String> {
            host_uuids
                .iter()
                .filter(|u| self.0.contains(*u))
                .cloned()
                .collect()
        }
    }

    #[tokio::test]
    async fn partial_push_failure_is_a_success_with_failed_ids() {
        let f = fixture().await;
        host(&f.db, "a", Platform::Darwin, None).await;
        host(&f.db, "b", Platform::Darwin, None).await;
        let queue = StoreAndForwardQueue::new(f.db.clone(), Arc::new(Unreachable(uuids(&["b"]))));
        let svc = f.svc.with_queue(Arc::new(queue));

        let result = svc
            .run_mdm_command(&f.admin, &STANDARD.encode(INFO_COMMAND), &uuids(&["a", "b"]))
            .await
            .unwrap();
        assert_eq!(result.failed_uuids, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn total_push_failure_is_bad_gateway() {
        let f = fixture().await;
        host(&f.db, "a", Platform::Darwin, None).await;
        let queue = StoreAndForwardQueue::new(f.db.clone(), Arc::new(Unreachable(uuids(&["a"]))));
        let svc = f.svc.with_queue(Arc::new(queue));

        let err = svc
            .run_mdm_command(&f.admin, &STANDARD.encode(INFO_COMMAND), &uuids(&["a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BadGateway(_)));
    }

    #[tokio::test]
    async fn command_results_round_trip() {
        let f = fixture().await;
        host(&f.db, "mac", Platform::Darwin, None).await;
        f.svc
            .run_mdm_command(&f.admin, &STANDARD.encode(INFO_COMMAND), &uuids(&["mac"]))
            .await
            .unwrap();

        f.svc
            .record_command_result("mac", "cmd-info", "Acknowledged", b"<plist/>")
            .await
            .unwrap();

        let results = f.svc.get_command_results(&f.admin, "cmd-info").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status.as_deref(), Some("Acknowledged"));
        assert_eq!(results[0].request_type, "DeviceInformation");

        let err = f
            .svc
            .record_command_result("mac", "unknown", "Error", b"")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
