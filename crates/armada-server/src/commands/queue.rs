//! Store-and-forward command queue.
//!
//! Commands are persisted per target host first, then the host is nudged
//! through its push channel so it checks in and fetches them. A host that
//! misses the push still receives the command at its next check-in.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::datastore::Datastore;
use crate::storage::{DatabaseError, MdmCommand, MdmFamily};

/// Enqueue failures, classified where they occur.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    /// The command is stored, but these hosts could not be notified.
    #[error("push notification failed for {} host(s)", failed.len())]
    Push { failed: Vec<String> },

    /// A target host is not enrolled in the management channel.
    #[error("target host is not enrolled: {0}")]
    ForeignKey(String),

    #[error("command storage failed: {0}")]
    Storage(#[source] DatabaseError),
}

impl From<DatabaseError> for EnqueueError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::ForeignKey(msg) => Self::ForeignKey(msg),
            other => Self::Storage(other),
        }
    }
}

/// Queues a command for delivery to hosts.
#[async_trait]
pub trait CommandQueue: Send + Sync {
    async fn enqueue(&self, command: &MdmCommand, host_uuids: &[String])
    -> Result<(), EnqueueError>;
}

/// Wakes hosts so they check in for queued work.
#[async_trait]
pub trait PushNotifier: Send + Sync {
    /// Returns the uuids of hosts that could not be reached.
    async fn push(&self, family: MdmFamily, host_uuids: &[String]) -> Vec<String>;
}

/// Sends no pushes; hosts pick up commands at their regular check-in.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckInOnlyPush;

#[async_trait]
impl PushNotifier for CheckInOnlyPush {
    async fn push(&self, _family: MdmFamily, _host_uuids: &[String]) -> Vec<String> {
        Vec::new()
    }
}

/// [`CommandQueue`] that persists through the datastore and then pushes.
pub struct StoreAndForwardQueue {
    ds: Arc<dyn Datastore>,
    push: Arc<dyn PushNotifier>,
}

impl StoreAndForwardQueue {
    pub fn new(ds: Arc<dyn Datastore>, push: Arc<dyn PushNotifier>) -> Self {
        Self { ds, push }
    }
}

#[async_trait]
impl CommandQueue for StoreAndForwardQueue {
    async fn enqueue(
        &self,
        command: &MdmCommand,
        host_uuids: &[String],
    ) -> Result<(), EnqueueError> {
        self.ds.insert_mdm_command(command, host_uuids).await?;

        info!(
            command_uuid = %command.command_uuid,
            request_type = %command.request_type,
            hosts = host_uuids.len(),
            "Command queued"
        );

        let family = match command.platform.as_str() {
            "windows" => MdmFamily::Windows,
            _ => MdmFamily::Apple,
        };
        let failed = self.push.push(family, host_uuids).await;
        if failed.is_empty() {
            return Ok(());
        }

        warn!(
            command_uuid = %command.command_uuid,
            failed = failed.len(),
            "Push notification failed for some hosts"
        );
        Err(EnqueueError::Push { failed })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::{NewHost, Platform, ServerDatabase};
    use armada_core::db::unix_timestamp;

    struct FailFirst;

    #[async_trait]
    impl PushNotifier for FailFirst {
        async fn push(&self, _family: MdmFamily, host_uuids: &[String]) -> Vec<String> {
            host_uuids.iter().take(1).cloned().collect()
        }
    }

    fn command(uuid: &str) -> MdmCommand {
        MdmCommand {
            command_uuid: uuid.to_string(),
            platform: "apple".to_string(),
            request_type: "DeviceInformation".to_string(),
            raw_command: b"<plist/>".to_vec(),
            created_at: unix_timestamp(),
        }
    }

    async fn db_with_host() -> Arc<ServerDatabase> {
        let db = ServerDatabase::open_in_memory().await.unwrap();
        db.create_host(&NewHost {
            uuid: "h1",
            hostname: "mac",
            platform: Platform::Darwin,
            team_id: None,
            mdm_enrolled: true,
            scripts_capable: false,
            scripts_enabled: None,
        })
        .await
        .unwrap();
        Arc::new(db)
    }

    #[tokio::test]
    async fn unknown_host_is_foreign_key_error() {
        let db = db_with_host().await;
        let queue = StoreAndForwardQueue::new(db.clone(), Arc::new(CheckInOnlyPush));

        let err = queue
            .enqueue(&command("c1"), &["ghost".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::ForeignKey(_)));
        assert!(db.get_mdm_command("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn push_failures_are_reported_after_storing() {
        let db = db_with_host().await;
        let queue = StoreAndForwardQueue::new(db.clone(), Arc::new(FailFirst));

        let err = queue
            .enqueue(&command("c2"), &["h1".to_string()])
            .await
            .unwrap_err();
        match err {
            EnqueueError::Push { failed } => assert_eq!(failed, vec!["h1".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(db.list_command_host_uuids("c2").await.unwrap(), vec!["h1"]);
    }
}
