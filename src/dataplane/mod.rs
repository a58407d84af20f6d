//! WiFi data plane: HTTP against the logger's burst access point.
//!
//! # Routes
//!
//! ```text
//! GET  /api/manifest                -> {"sessions":[{"id","size","synced"}]}
//! GET  /api/sessions/{id}/download  -> raw CSV bytes
//! POST /api/sessions/{id}/ack       <- {"synced":true}
//! ```
//!
//! # Components
//!
//! - [`HttpDataPlane`] - reqwest client used by the sync orchestrator
//! - [`DeviceSimulator`] - tiny_http server speaking the same routes

mod http;
mod simulator;

pub use http::HttpDataPlane;
pub use simulator::{DeviceSimulator, SimulatorFault, DEFAULT_SIMULATOR_PORT};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

/// Session list served by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub sessions: Vec<ManifestEntry>,
}

impl Manifest {
    /// Entries not yet acknowledged, in manifest order.
    pub fn pending(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.sessions.iter().filter(|entry| !entry.synced)
    }
}

/// One recorded session on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Session identifier. Firmware may send it as a number.
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    /// Payload size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Already acknowledged by a previous sync.
    #[serde(default)]
    pub synced: bool,
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "session id must be a string or number, got {}",
            other
        ))),
    }
}

/// Data-plane failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataPlaneError {
    /// Manifest request failed or returned garbage.
    ManifestFetchFailed(String),
    /// Session download failed.
    DownloadFailed { id: String, reason: String },
    /// Session acknowledgement failed.
    AckFailed { id: String, reason: String },
}

impl std::fmt::Display for DataPlaneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ManifestFetchFailed(reason) => write!(f, "failed to fetch manifest: {}", reason),
            Self::DownloadFailed { id, reason } => {
                write!(f, "failed to download session {}: {}", id, reason)
            }
            Self::AckFailed { id, reason } => {
                write!(f, "failed to acknowledge session {}: {}", id, reason)
            }
        }
    }
}

impl std::error::Error for DataPlaneError {}

/// Device data-plane operations used by the sync run.
#[async_trait]
pub trait DataPlane: Send + Sync {
    /// Fetch the device's session list.
    async fn fetch_manifest(&self) -> Result<Manifest, DataPlaneError>;

    /// Download one session's payload.
    async fn download_entry(&self, id: &str) -> Result<Vec<u8>, DataPlaneError>;

    /// Mark one session as synced on the device.
    async fn ack_entry(&self, id: &str) -> Result<(), DataPlaneError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_parse() {
        let manifest: Manifest = serde_json::from_str(
            r#"{"sessions":[{"id":"123","size":1024,"synced":false},{"id":7,"size":10,"synced":true}]}"#,
        )
        .unwrap();
        assert_eq!(manifest.sessions.len(), 2);
        assert_eq!(manifest.sessions[1].id, "7");

        let pending: Vec<&str> = manifest.pending().map(|e| e.id.as_str()).collect();
        assert_eq!(pending, vec!["123"]);
    }

    #[test]
    fn test_manifest_defaults() {
        let manifest: Manifest = serde_json::from_str(r#"{"sessions":[{"id":"a"}]}"#).unwrap();
        assert_eq!(manifest.sessions[0].size, 0);
        assert!(!manifest.sessions[0].synced);

        let empty: Manifest = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.pending().count(), 0);
    }

    #[test]
    fn test_manifest_rejects_object_id() {
        let result: Result<Manifest, _> =
            serde_json::from_str(r#"{"sessions":[{"id":{"x":1}}]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_error_display() {
        let err = DataPlaneError::DownloadFailed {
            id: "123".into(),
            reason: "HTTP 500".into(),
        };
        assert_eq!(err.to_string(), "failed to download session 123: HTTP 500");
    }
}
