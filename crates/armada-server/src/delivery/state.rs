//! Per-host profile delivery state machine.
//!
//! ```text
//! pending ──ack──▶ verifying ──verified──▶ verified
//!    │                 │                      │
//!    └─────────────────┴──────failed──────────┴──▶ failed
//! ```
//!
//! Declarations skip `verifying`: the device acknowledges the sync command
//! long before it reports the declaration as applied.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Verifying,
    Verified,
    Failed,
}

impl DeliveryStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verifying => "verifying",
            Self::Verified => "verified",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "verifying" => Some(Self::Verifying),
            "verified" => Some(Self::Verified),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Read a stored status. A row that was never attempted counts as
    /// pending.
    pub fn from_stored(s: Option<&str>) -> Option<Self> {
        s.map_or(Some(Self::Pending), Self::parse)
    }

    /// Whether a resend may replace the current delivery.
    pub const fn can_resend(self) -> bool {
        matches!(self, Self::Verified | Self::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A report from the device about one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeliveryEvent {
    /// The device accepted the install command.
    Acknowledged,
    /// The device reported the profile as installed.
    Verified,
    Failed { detail: String },
}

impl DeliveryEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Acknowledged => "acknowledged",
            Self::Verified => "verified",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("can't apply {event} to a profile that is {from}")]
pub struct InvalidTransition {
    pub from: DeliveryStatus,
    pub event: &'static str,
}

/// Next status after `event`.
pub fn transition(
    current: DeliveryStatus,
    event: &DeliveryEvent,
    is_declaration: bool,
) -> Result<DeliveryStatus, InvalidTransition> {
    use DeliveryStatus::{Failed, Pending, Verified, Verifying};

    let next = match (current, event) {
        (_, DeliveryEvent::Failed { .. }) => Some(Failed),
        (Pending, DeliveryEvent::Acknowledged) if is_declaration => Some(Pending),
        (Pending | Verifying, DeliveryEvent::Acknowledged) => Some(Verifying),
        (Pending, DeliveryEvent::Verified) if is_declaration => Some(Verified),
        (Verifying | Verified, DeliveryEvent::Verified) => Some(Verified),
        _ => None,
    };

    next.ok_or(InvalidTransition {
        from: current,
        event: event.name(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn profile_walks_through_verifying() {
        let s = transition(DeliveryStatus::Pending, &DeliveryEvent::Acknowledged, false).unwrap();
        assert_eq!(s, DeliveryStatus::Verifying);
        let s = transition(s, &DeliveryEvent::Verified, false).unwrap();
        assert_eq!(s, DeliveryStatus::Verified);
    }

    #[test]
    fn profile_cannot_skip_verifying() {
        let err = transition(DeliveryStatus::Pending, &DeliveryEvent::Verified, false).unwrap_err();
        assert_eq!(err.from, DeliveryStatus::Pending);
        assert_eq!(err.event, "verified");
    }

    #[test]
    fn declaration_stays_pending_until_verified() {
        let s = transition(DeliveryStatus::Pending, &DeliveryEvent::Acknowledged, true).unwrap();
        assert_eq!(s, DeliveryStatus::Pending);
        let s = transition(s, &DeliveryEvent::Verified, true).unwrap();
        assert_eq!(s, DeliveryStatus::Verified);
    }

    #[test]
    fn failure_is_reachable_from_every_state() {
        for from in [
            DeliveryStatus::Pending,
            DeliveryStatus::Verifying,
            DeliveryStatus::Verified,
            DeliveryStatus::Failed,
        ] {
            let event = DeliveryEvent::Failed {
                detail: "rejected".into(),
            };
            assert_eq!(transition(from, &event, false).unwrap(), DeliveryStatus::Failed);
        }
    }

    #[test]
    fn failed_profiles_need_a_resend() {
        assert!(transition(DeliveryStatus::Failed, &DeliveryEvent::Acknowledged, false).is_err());
        assert!(DeliveryStatus::Failed.can_resend());
        assert!(DeliveryStatus::Verified.can_resend());
        assert!(!DeliveryStatus::Pending.can_resend());
        assert!(!DeliveryStatus::Verifying.can_resend());
    }

    #[test]
    fn missing_status_reads_as_pending() {
        assert_eq!(DeliveryStatus::from_stored(None), Some(DeliveryStatus::Pending));
        assert_eq!(DeliveryStatus::from_stored(Some("verifying")), Some(DeliveryStatus::Verifying));
        assert_eq!(DeliveryStatus::from_stored(Some("bogus")), None);
    }
}
