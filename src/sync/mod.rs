//! Burst sync: pull session files off the logger over its temporary AP.
//!
//! The BLE control channel asks the logger to open an access point, the host
//! joins it, and sessions are downloaded, persisted and acknowledged one at
//! a time over HTTP.
//!
//! # Components
//!
//! - [`SyncOrchestrator`] - the run state machine
//! - [`SyncPhase`] / [`ProgressEvent`] - run progress
//! - [`SyncError`] / [`SyncFailure`] - why a run stopped

mod orchestrator;
mod phase;

pub use orchestrator::{ProgressCallback, SyncOrchestrator, SyncReport};
pub use phase::{ProgressEvent, SyncPhase, SyncStep};

use crate::ble::BleError;
use crate::dataplane::DataPlaneError;
use crate::storage::StorageError;
use crate::wifi::JoinError;
use std::time::Duration;

/// Sync run errors.
#[derive(Debug)]
pub enum SyncError {
    /// BLE control channel failure.
    Ble(BleError),
    /// Joining the device AP failed.
    Join(JoinError),
    /// HTTP data-plane failure.
    DataPlane(DataPlaneError),
    /// Persisting a session failed.
    Storage(StorageError),
    /// The device did not report a ready AP in time.
    ApReadyTimeout(Duration),
    /// Another run is in progress.
    AlreadyRunning,
    /// The BLE link dropped mid-run.
    Disconnected,
    /// The caller cancelled the run.
    Cancelled,
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ble(e) => write!(f, "{}", e),
            Self::Join(e) => write!(f, "{}", e),
            Self::DataPlane(e) => write!(f, "{}", e),
            Self::Storage(e) => write!(f, "{}", e),
            Self::ApReadyTimeout(timeout) => {
                write!(f, "device AP not ready after {}s", timeout.as_secs())
            }
            Self::AlreadyRunning => write!(f, "a sync is already running"),
            Self::Disconnected => write!(f, "BLE link lost during sync"),
            Self::Cancelled => write!(f, "sync cancelled"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Ble(e) => Some(e),
            Self::Join(e) => Some(e),
            Self::DataPlane(e) => Some(e),
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BleError> for SyncError {
    fn from(e: BleError) -> Self {
        Self::Ble(e)
    }
}

impl From<JoinError> for SyncError {
    fn from(e: JoinError) -> Self {
        Self::Join(e)
    }
}

impl From<DataPlaneError> for SyncError {
    fn from(e: DataPlaneError) -> Self {
        Self::DataPlane(e)
    }
}

impl From<StorageError> for SyncError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

/// A failed run: the phase it stopped in and why.
#[derive(Debug)]
pub struct SyncFailure {
    pub phase: SyncPhase,
    pub error: SyncError,
}

impl std::fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.phase, self.error)
    }
}

impl std::error::Error for SyncFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
