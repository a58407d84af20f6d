//! Control-channel wire protocol.
//!
//! # GATT Service Structure
//!
//! ```text
//! Service: Racesense Logger (12345678-1234-5678-1234-567812345678)
//! ├── NETWORKS    (Read)         - JSON array of visible SSIDs
//! ├── STATUS      (Read, Notify) - JSON connection / AP status
//! ├── CONFIGURE   (Write)        - SCAN | SYNC | START_AP | STOP_AP | {ssid,password,api_url?}
//! └── DEVICE_INFO (Read)         - JSON firmware version, storage, GPS state
//! ```
//!
//! Every value is UTF-8 text. Structured values are JSON; anything that fails
//! to parse is kept as raw text.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Primary service advertised by the logger.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_567812345678);

/// UUID for the NETWORKS characteristic.
pub const CHAR_NETWORKS_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_567812345001);

/// UUID for the STATUS characteristic.
pub const CHAR_STATUS_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_567812345002);

/// UUID for the CONFIGURE characteristic.
pub const CHAR_CONFIGURE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_567812345003);

/// UUID for the DEVICE_INFO characteristic.
pub const CHAR_DEVICE_INFO_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_567812345004);

/// Advertised-name prefixes of current and legacy firmware.
pub const NAME_PREFIXES: &[&str] = &["Racesense", "Datalogger"];

/// Logical role of a control-channel characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Networks,
    Status,
    Configure,
    DeviceInfo,
}

impl Role {
    /// All roles, in resolution order.
    pub const ALL: [Role; 4] = [Role::Networks, Role::Status, Role::Configure, Role::DeviceInfo];

    /// Upper-case role name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Networks => "NETWORKS",
            Self::Status => "STATUS",
            Self::Configure => "CONFIGURE",
            Self::DeviceInfo => "DEVICE_INFO",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded characteristic value.
#[derive(Debug, Clone, PartialEq)]
pub enum BlePayload {
    /// Value parsed as JSON.
    Json(serde_json::Value),
    /// Value that was not valid JSON.
    Text(String),
}

impl BlePayload {
    /// Decode raw characteristic bytes: UTF-8 (lossy), then JSON, else text.
    pub fn decode(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        match serde_json::from_str(&text) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(text.into_owned()),
        }
    }

    /// JSON value, if the payload decoded as JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    /// Deserialize a JSON payload into a typed value.
    pub fn parse<T: DeserializeOwned>(&self) -> Option<T> {
        self.as_json()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

impl fmt::Display for BlePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => write!(f, "{}", value),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Last device-reported status.
///
/// Fields default when absent; firmware only sends the `ap_*` fields while
/// the burst AP is running.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Station-mode WiFi link is up.
    #[serde(default)]
    pub connected: bool,
    /// Station-mode SSID.
    #[serde(default)]
    pub ssid: Option<String>,
    /// Device IP address.
    #[serde(default)]
    pub ip: Option<String>,
    /// `STA` or `AP`.
    #[serde(default)]
    pub mode: Option<String>,
    /// Burst access point is running.
    #[serde(default)]
    pub ap_active: bool,
    /// Burst access point SSID.
    #[serde(default)]
    pub ap_ssid: Option<String>,
    /// Burst access point password.
    #[serde(default)]
    pub ap_password: Option<String>,
}

impl StatusSnapshot {
    /// Build a snapshot from a payload. Only JSON objects qualify.
    pub fn from_payload(payload: &BlePayload) -> Option<Self> {
        match payload.as_json() {
            Some(value) if value.is_object() => payload.parse(),
            _ => None,
        }
    }

    /// The AP is up and has announced its SSID.
    pub fn ap_ready(&self) -> bool {
        self.ap_active && self.ap_ssid.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Access point credentials, once [`ap_ready`](Self::ap_ready).
    pub fn access_point(&self, fallback_password: &str) -> Option<AccessPoint> {
        if !self.ap_ready() {
            return None;
        }
        let ssid = self.ap_ssid.clone()?;
        let password = match self.ap_password.as_deref() {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => fallback_password.to_string(),
        };
        Some(AccessPoint { ssid, password })
    }
}

/// Burst AP credentials announced by the device.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AccessPoint {
    pub ssid: String,
    pub password: String,
}

impl fmt::Debug for AccessPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessPoint")
            .field("ssid", &self.ssid)
            .finish_non_exhaustive()
    }
}

/// Contents of `DEVICE_INFO`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub storage_pct: f32,
    #[serde(default)]
    pub gps_status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_uuids_match_firmware() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "12345678-1234-5678-1234-567812345678"
        );
        assert_eq!(
            CHAR_STATUS_UUID.to_string(),
            "12345678-1234-5678-1234-567812345002"
        );
        assert_eq!(
            CHAR_DEVICE_INFO_UUID.to_string(),
            "12345678-1234-5678-1234-567812345004"
        );
    }

    #[test]
    fn test_decode_json() {
        let payload = BlePayload::decode(br#"{"connected":true,"ip":"10.0.0.2"}"#);
        assert_eq!(
            payload,
            BlePayload::Json(json!({"connected": true, "ip": "10.0.0.2"}))
        );
    }

    #[test]
    fn test_decode_falls_back_to_text() {
        let payload = BlePayload::decode(b"connecting");
        assert_eq!(payload, BlePayload::Text("connecting".to_string()));
        assert!(StatusSnapshot::from_payload(&payload).is_none());
    }

    #[test]
    fn test_non_object_json_is_not_a_snapshot() {
        let payload = BlePayload::decode(br#"["a","b"]"#);
        assert!(payload.as_json().is_some());
        assert!(StatusSnapshot::from_payload(&payload).is_none());
    }

    #[test]
    fn test_snapshot_defaults_missing_fields() {
        let payload = BlePayload::decode(br#"{"connected":false,"ssid":"","ip":"0.0.0.0","mode":"STA"}"#);
        let snapshot = StatusSnapshot::from_payload(&payload).unwrap();
        assert!(!snapshot.ap_active);
        assert!(!snapshot.ap_ready());
        assert_eq!(snapshot.mode.as_deref(), Some("STA"));
    }

    #[test]
    fn test_ap_ready_requires_ssid() {
        let snapshot = StatusSnapshot {
            ap_active: true,
            ap_ssid: Some(String::new()),
            ..Default::default()
        };
        assert!(!snapshot.ap_ready());
        assert!(snapshot.access_point("racesense").is_none());
    }

    #[test]
    fn test_access_point_password_fallback() {
        let snapshot = StatusSnapshot {
            ap_active: true,
            ap_ssid: Some("Racesense-AB12".to_string()),
            ..Default::default()
        };
        let ap = snapshot.access_point("racesense").unwrap();
        assert_eq!(ap.ssid, "Racesense-AB12");
        assert_eq!(ap.password, "racesense");

        let snapshot = StatusSnapshot {
            ap_password: Some("burst-pass".to_string()),
            ..snapshot
        };
        assert_eq!(snapshot.access_point("racesense").unwrap().password, "burst-pass");
    }

    #[test]
    fn test_device_info_parse() {
        let payload =
            BlePayload::decode(br#"{"version":"1.1.0","storage_pct":12.5,"gps_status":"FIX"}"#);
        let info: DeviceInfo = payload.parse().unwrap();
        assert_eq!(info.version, "1.1.0");
        assert_eq!(info.gps_status, "FIX");
    }
}
