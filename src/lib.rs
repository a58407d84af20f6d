//! Racesense burst-sync library.
//!
//! Pulls recorded ride sessions off a Racesense logger. A BLE control
//! channel asks the logger to raise a temporary WiFi access point; the host
//! joins it, downloads every unsynced session over HTTP, stores it locally
//! and acknowledges it, then tells the logger to drop the AP.
//!
//! # Components
//!
//! - [`ble`] - control channel driver over an abstract BLE central
//! - [`config`] - device commands, WiFi credentials, tunables
//! - [`wifi`] - joining the logger's access point
//! - [`dataplane`] - HTTP manifest/download/ack client and a device simulator
//! - [`storage`] - durable session files
//! - [`sync`] - the burst-sync state machine

pub mod ble;
pub mod config;
pub mod dataplane;
pub mod storage;
pub mod sync;
pub mod wifi;

// Re-export commonly used items
pub use ble::{BleError, BleTransport, ConnectionState, ControlChannel};
pub use config::{ChannelConfig, ConfigError, DeviceCommand, SyncConfig, WifiCredentials};
pub use dataplane::{DataPlane, DataPlaneError, HttpDataPlane, Manifest, ManifestEntry};
pub use storage::{FsSessionStore, SessionStore, StorageError};
pub use sync::{ProgressEvent, SyncError, SyncFailure, SyncOrchestrator, SyncReport, SyncStep};
pub use wifi::{JoinError, WifiJoiner};
