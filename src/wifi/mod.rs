//! Host WiFi join capability.
//!
//! The orchestrator joins the logger's burst access point through
//! [`WifiJoiner`]. Hosts without a join capability get
//! [`UnavailableJoiner`] and the operator joins the AP by hand.
//!
//! # Components
//!
//! - [`NmcliJoiner`] - NetworkManager CLI (`nmcli device wifi connect`)
//! - [`UnavailableJoiner`] - always reports `CapabilityUnavailable`

mod nmcli;

pub use nmcli::{NmcliJoiner, NMCLI_PROGRAM};

use crate::ble::AccessPoint;
use async_trait::async_trait;

/// Errors raised while joining a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// The host tried and failed to join.
    JoinFailed(String),
    /// The host has no way to join networks programmatically.
    CapabilityUnavailable,
}

impl std::fmt::Display for JoinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::JoinFailed(reason) => write!(f, "WiFi join failed: {}", reason),
            Self::CapabilityUnavailable => write!(f, "WiFi join not available on this host"),
        }
    }
}

impl std::error::Error for JoinError {}

/// Joins a named network.
#[async_trait]
pub trait WifiJoiner: Send + Sync {
    /// Join `ap` and return once the link is usable.
    async fn join(&self, ap: &AccessPoint) -> Result<(), JoinError>;
}

/// Joiner for hosts without a join capability.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableJoiner;

#[async_trait]
impl WifiJoiner for UnavailableJoiner {
    async fn join(&self, _ap: &AccessPoint) -> Result<(), JoinError> {
        Err(JoinError::CapabilityUnavailable)
    }
}

/// Best joiner for this host: `nmcli` when installed, otherwise none.
pub fn host_joiner(settle: std::time::Duration) -> Box<dyn WifiJoiner> {
    match NmcliJoiner::detect(settle) {
        Some(joiner) => Box::new(joiner),
        None => {
            log::warn!("{} not found; WiFi join must be done manually", NMCLI_PROGRAM);
            Box::new(UnavailableJoiner)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unavailable_joiner() {
        let ap = AccessPoint {
            ssid: "Racesense-AB12".into(),
            password: "racesense".into(),
        };
        assert_eq!(
            UnavailableJoiner.join(&ap).await,
            Err(JoinError::CapabilityUnavailable)
        );
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            JoinError::JoinFailed("no secrets".into()).to_string(),
            "WiFi join failed: no secrets"
        );
    }
}
