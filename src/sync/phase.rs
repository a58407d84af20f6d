//! Burst-sync phases and progress events.

use serde::Serialize;
use std::fmt;

/// Phase of a sync run.
///
/// ```text
/// IDLE -> BLE_CONNECTING -> STARTING_AP -> WAITING_AP_READY -> JOINING_WIFI
///      -> FETCHING_MANIFEST -> DOWNLOADING (n) -> AP_STOPPING -> COMPLETE
/// any  -> ERROR
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Idle,
    BleConnecting,
    StartingAp,
    WaitingApReady,
    JoiningWifi,
    FetchingManifest,
    Downloading,
    ApStopping,
    Complete,
    Error,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::BleConnecting => "BLE_CONNECTING",
            Self::StartingAp => "STARTING_AP",
            Self::WaitingApReady => "WAITING_AP_READY",
            Self::JoiningWifi => "JOINING_WIFI",
            Self::FetchingManifest => "FETCHING_MANIFEST",
            Self::Downloading => "DOWNLOADING",
            Self::ApStopping => "AP_STOPPING",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
        }
    }

    /// Progress step reported for this phase.
    ///
    /// `WAITING_AP_READY` has no step of its own and reports as
    /// `STARTING_AP`; `IDLE` is never reported.
    pub fn step(&self) -> Option<SyncStep> {
        match self {
            Self::Idle => None,
            Self::BleConnecting => Some(SyncStep::BleConnecting),
            Self::StartingAp | Self::WaitingApReady => Some(SyncStep::StartingAp),
            Self::JoiningWifi => Some(SyncStep::JoiningWifi),
            Self::FetchingManifest => Some(SyncStep::FetchingManifest),
            Self::Downloading => Some(SyncStep::Downloading),
            Self::ApStopping => Some(SyncStep::ApStopping),
            Self::Complete => Some(SyncStep::SyncComplete),
            Self::Error => Some(SyncStep::Error),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step names shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStep {
    BleConnecting,
    StartingAp,
    JoiningWifi,
    FetchingManifest,
    Downloading,
    ApStopping,
    SyncComplete,
    Error,
}

impl SyncStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BleConnecting => "BLE_CONNECTING",
            Self::StartingAp => "STARTING_AP",
            Self::JoiningWifi => "JOINING_WIFI",
            Self::FetchingManifest => "FETCHING_MANIFEST",
            Self::Downloading => "DOWNLOADING",
            Self::ApStopping => "AP_STOPPING",
            Self::SyncComplete => "SYNC_COMPLETE",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub step: SyncStep,
    pub details: String,
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.step, self.details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waiting_reports_as_starting_ap() {
        assert_eq!(SyncPhase::WaitingApReady.step(), Some(SyncStep::StartingAp));
        assert_eq!(SyncPhase::Complete.step(), Some(SyncStep::SyncComplete));
        assert_eq!(SyncPhase::Idle.step(), None);
    }

    #[test]
    fn test_step_serializes_as_wire_name() {
        let event = ProgressEvent {
            step: SyncStep::FetchingManifest,
            details: "Fetching session list".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["step"], "FETCHING_MANIFEST");
        assert_eq!(json["details"], "Fetching session list");
    }

    #[test]
    fn test_display() {
        assert_eq!(SyncPhase::WaitingApReady.to_string(), "WAITING_AP_READY");
        assert_eq!(SyncStep::SyncComplete.to_string(), "SYNC_COMPLETE");
        assert!(SyncPhase::Error.is_terminal());
        assert!(!SyncPhase::Downloading.is_terminal());
    }
}
