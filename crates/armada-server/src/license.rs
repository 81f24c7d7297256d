//! License tier checks.

use armada_core::config::LicenseTier;

/// Answers whether premium-tier features are available.
pub trait License: Send + Sync {
    fn is_premium(&self) -> bool;
}

/// A license fixed at startup from configuration.
#[derive(Debug, Clone, Copy)]
pub struct StaticLicense {
    tier: LicenseTier,
}

impl StaticLicense {
    pub const fn new(tier: LicenseTier) -> Self {
        Self { tier }
    }
}

impl License for StaticLicense {
    fn is_premium(&self) -> bool {
        self.tier == LicenseTier::Premium
    }
}
