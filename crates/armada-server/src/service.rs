//! The control plane service facade.
//!
//! [`Service`] wires the injected collaborators together. The operations
//! themselves live next to their domain: `commands`, `profiles`, `scripts`
//! and `delivery` each add an `impl Service` block.

use std::sync::Arc;

use armada_core::config::{Config, MdmConfig, ScriptConfig};

use crate::activity::{ActivityEmitter, WebhookSender};
use crate::authz::{Authorizer, RolePolicy};
use crate::commands::queue::{CheckInOnlyPush, CommandQueue, StoreAndForwardQueue};
use crate::datastore::Datastore;
use crate::license::{License, StaticLicense};
use crate::storage::MdmFamily;

pub struct Service {
    pub(crate) ds: Arc<dyn Datastore>,
    pub(crate) authz: Arc<dyn Authorizer>,
    pub(crate) license: Arc<dyn License>,
    pub(crate) queue: Arc<dyn CommandQueue>,
    pub(crate) activity: ActivityEmitter,
    pub(crate) mdm: MdmConfig,
    pub(crate) scripts: ScriptConfig,
}

impl Service {
    /// Build a service with the role policy, the configured license tier, a
    /// check-in-only command queue and no webhook.
    pub fn new(ds: Arc<dyn Datastore>, config: &Config) -> Self {
        let queue = StoreAndForwardQueue::new(Arc::clone(&ds), Arc::new(CheckInOnlyPush));
        Self {
            authz: Arc::new(RolePolicy),
            license: Arc::new(StaticLicense::new(config.license.tier)),
            queue: Arc::new(queue),
            activity: ActivityEmitter::new(Arc::clone(&ds)),
            mdm: config.mdm.clone(),
            scripts: config.scripts.clone(),
            ds,
        }
    }

    #[must_use]
    pub fn with_authorizer(mut self, authz: Arc<dyn Authorizer>) -> Self {
        self.authz = authz;
        self
    }

    #[must_use]
    pub fn with_license(mut self, license: Arc<dyn License>) -> Self {
        self.license = license;
        self
    }

    #[must_use]
    pub fn with_queue(mut self, queue: Arc<dyn CommandQueue>) -> Self {
        self.queue = queue;
        self
    }

    #[must_use]
    pub fn with_webhook(mut self, sender: WebhookSender) -> Self {
        self.activity = self.activity.with_webhook(sender);
        self
    }

    pub const fn mdm_enabled(&self, family: MdmFamily) -> bool {
        match family {
            MdmFamily::Apple => self.mdm.apple_enabled,
            MdmFamily::Windows => self.mdm.windows_enabled,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod test_support {
    //! Shared fixtures for service-level tests.

    use std::sync::Arc;

    use armada_core::config::{Config, LicenseTier};

    use super::Service;
    use crate::authz::{Role, Viewer};
    use crate::storage::{Host, NewHost, Platform, ServerDatabase};

    pub struct Fixture {
        pub db: Arc<ServerDatabase>,
        pub svc: Service,
        pub admin: Viewer,
    }

    pub fn config(premium: bool) -> Config {
        let mut config = Config::default();
        config.mdm.apple_enabled = true;
        config.mdm.windows_enabled = true;
        if premium {
            config.license.tier = LicenseTier::Premium;
        }
        config
    }

    pub async fn fixture_with(config: &Config) -> Fixture {
        let db = Arc::new(ServerDatabase::open_in_memory().await.unwrap());
        let svc = Service::new(db.clone(), config);
        Fixture {
            db,
            svc,
            admin: Viewer::global("1", "Admin", "admin@example.com", Role::Admin),
        }
    }

    pub async fn fixture() -> Fixture {
        fixture_with(&config(true)).await
    }

    pub async fn host(
        db: &ServerDatabase,
        uuid: &str,
        platform: Platform,
        team_id: Option<i64>,
    ) -> Host {
        db.create_host(&NewHost {
            uuid,
            hostname: uuid,
            platform,
            team_id,
            mdm_enrolled: true,
            scripts_capable: true,
            scripts_enabled: None,
        })
        .await
        .unwrap()
    }
}
