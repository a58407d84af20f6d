//! WiFi credentials and control commands sent over the BLE `CONFIGURE`
//! characteristic.
//!
//! # Example
//!
//! ```
//! use racesense_sync::config::{DeviceCommand, WifiCredentials};
//!
//! let creds = WifiCredentials::new("Paddock", "hunter2hunter2").unwrap();
//! assert!(creds.validate().is_ok());
//!
//! let cmd: DeviceCommand = "START_AP".parse().unwrap();
//! assert_eq!(cmd, DeviceCommand::StartAp);
//! ```

use serde::Serialize;
use std::fmt;
use zeroize::Zeroize;

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum password length for WPA2.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Minimum password length for WPA2.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Credentials pushed to the logger so it can reach a home/paddock network.
///
/// The password is zeroed when the value is dropped.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct WifiCredentials {
    /// Network SSID (1-32 bytes).
    pub ssid: String,
    /// Network password (8-64 bytes for WPA2, empty for open networks).
    pub password: String,
    /// Backend URL the logger uploads to once online.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl WifiCredentials {
    /// Create validated credentials.
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Result<Self, ConfigError> {
        let creds = Self {
            ssid: ssid.into(),
            password: password.into(),
            api_url: None,
        };
        creds.validate()?;
        Ok(creds)
    }

    /// Credentials for an open network (no password).
    pub fn open(ssid: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(ssid, String::new())
    }

    /// Attach the backend URL the device should upload to.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        let url = api_url.into();
        self.api_url = if url.is_empty() { None } else { Some(url) };
        self
    }

    /// Validate SSID and password lengths.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssid.is_empty() {
            return Err(ConfigError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(ConfigError::SsidTooLong {
                len: self.ssid.len(),
                max: MAX_SSID_LEN,
            });
        }

        // Empty is OK for open networks
        if !self.password.is_empty() && self.password.len() < MIN_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooShort {
                len: self.password.len(),
                min: MIN_PASSWORD_LEN,
            });
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooLong {
                len: self.password.len(),
                max: MAX_PASSWORD_LEN,
            });
        }

        Ok(())
    }

    /// Check if this is an open network (no password).
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }

    /// JSON body written to `CONFIGURE`: `{"ssid":..,"password":..,"api_url":..}`.
    pub fn to_json(&self) -> String {
        // Serializing plain strings cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"****")
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl Drop for WifiCredentials {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

/// Commands written to the `CONFIGURE` characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Refresh the device's list of visible networks.
    Scan,
    /// Ask the device to upload sessions to the backend itself.
    Sync,
    /// Open the temporary burst access point.
    StartAp,
    /// Close the burst access point.
    StopAp,
    /// Store and join a WiFi network.
    Configure(WifiCredentials),
}

impl DeviceCommand {
    /// Wire text for the command.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Scan => "SCAN".to_string(),
            Self::Sync => "SYNC".to_string(),
            Self::StartAp => "START_AP".to_string(),
            Self::StopAp => "STOP_AP".to_string(),
            Self::Configure(creds) => creds.to_json(),
        }
    }
}

impl std::str::FromStr for DeviceCommand {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "SCAN" => Ok(Self::Scan),
            "SYNC" => Ok(Self::Sync),
            "START_AP" => Ok(Self::StartAp),
            "STOP_AP" => Ok(Self::StopAp),
            other if other.starts_with('{') => {
                let value: serde_json::Value = serde_json::from_str(other)
                    .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
                let ssid = value
                    .get("ssid")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ConfigError::InvalidFormat("missing ssid".into()))?;
                let password = value.get("password").and_then(|v| v.as_str()).unwrap_or("");
                let mut creds = WifiCredentials::new(ssid, password)?;
                if let Some(url) = value.get("api_url").and_then(|v| v.as_str()) {
                    creds = creds.with_api_url(url);
                }
                Ok(Self::Configure(creds))
            }
            _ => Err(ConfigError::UnknownCommand(s.to_string())),
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Never print the password
            Self::Configure(creds) => write!(f, "CONFIGURE({})", creds.ssid),
            other => write!(f, "{}", other.to_wire()),
        }
    }
}

/// Errors that can occur during configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// SSID is empty.
    SsidEmpty,
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Password is too short for WPA2.
    PasswordTooShort { len: usize, min: usize },
    /// Password exceeds maximum length.
    PasswordTooLong { len: usize, max: usize },
    /// Invalid data format during parsing.
    InvalidFormat(String),
    /// Unknown command string.
    UnknownCommand(String),
    /// Environment variable holds an unusable value.
    InvalidEnv { var: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PasswordTooShort { len, min } => {
                write!(f, "password too short: {} bytes (min {})", len, min)
            }
            Self::PasswordTooLong { len, max } => {
                write!(f, "password too long: {} bytes (max {})", len, max)
            }
            Self::InvalidFormat(msg) => write!(f, "invalid format: {}", msg),
            Self::UnknownCommand(cmd) => write!(f, "unknown command: {}", cmd),
            Self::InvalidEnv { var, value } => {
                write!(f, "invalid value for {}: {:?}", var, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
