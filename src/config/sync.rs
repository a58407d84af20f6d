//! Runtime configuration for the BLE control channel and the burst sync.
//!
//! Defaults match the logger firmware. Host binaries may override a subset
//! through environment variables (see [`SyncConfig::from_env`]).

use super::wifi::ConfigError;
use crate::ble::protocol::{
    CHAR_CONFIGURE_UUID, CHAR_DEVICE_INFO_UUID, CHAR_NETWORKS_UUID, CHAR_STATUS_UUID,
    NAME_PREFIXES, SERVICE_UUID,
};
use crate::ble::supervisor::ReconnectPolicy;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Address the logger assigns itself when it runs its burst AP.
pub const DEFAULT_DEVICE_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

/// Port of the logger's data-plane HTTP server.
pub const DEFAULT_DEVICE_PORT: u16 = 80;

/// How long to wait for the device to report its AP as active.
pub const AP_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Password used when the device does not report one for its AP.
pub const DEFAULT_AP_PASSWORD: &str = "racesense";

/// Default per-request timeout for data-plane HTTP calls.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Time the firmware needs between `SCAN` and a fresh `NETWORKS` value.
pub const SCAN_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Upper bound on device discovery.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Time given to the host to obtain a DHCP lease after joining the AP.
pub const DEFAULT_JOIN_SETTLE: Duration = Duration::from_secs(3);

/// Environment variable overriding the device address.
pub const ENV_DEVICE_IP: &str = "RACESENSE_DEVICE_IP";
/// Environment variable overriding the device HTTP port.
pub const ENV_DEVICE_PORT: &str = "RACESENSE_DEVICE_PORT";
/// Environment variable overriding the HTTP timeout (seconds).
pub const ENV_HTTP_TIMEOUT: &str = "RACESENSE_HTTP_TIMEOUT_SECS";
/// Environment variable overriding the AP-ready timeout (seconds).
pub const ENV_AP_TIMEOUT: &str = "RACESENSE_AP_TIMEOUT_SECS";
/// Environment variable overriding the download directory.
pub const ENV_DATA_DIR: &str = "RACESENSE_DATA_DIR";

/// GATT layout and timing used by the control channel driver.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Primary service advertised by the logger.
    pub service_uuid: Uuid,
    /// `NETWORKS` characteristic.
    pub networks_uuid: Uuid,
    /// `STATUS` characteristic.
    pub status_uuid: Uuid,
    /// `CONFIGURE` characteristic.
    pub configure_uuid: Uuid,
    /// `DEVICE_INFO` characteristic.
    pub device_info_uuid: Uuid,
    /// Accepted advertised-name prefixes.
    pub name_prefixes: Vec<String>,
    /// Bound on device discovery.
    pub scan_timeout: Duration,
    /// Delay between `SCAN` and reading `NETWORKS`.
    pub scan_settle: Duration,
    /// Automatic reconnection after an unexpected disconnect.
    pub reconnect: ReconnectPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            service_uuid: SERVICE_UUID,
            networks_uuid: CHAR_NETWORKS_UUID,
            status_uuid: CHAR_STATUS_UUID,
            configure_uuid: CHAR_CONFIGURE_UUID,
            device_info_uuid: CHAR_DEVICE_INFO_UUID,
            name_prefixes: NAME_PREFIXES.iter().map(|p| p.to_string()).collect(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            scan_settle: SCAN_SETTLE_DELAY,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Burst-sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Device address on its own AP.
    pub device_ip: Ipv4Addr,
    /// Data-plane HTTP port.
    pub device_port: u16,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// Bound on `WAITING_AP_READY`.
    pub ap_ready_timeout: Duration,
    /// AP password used when the device omits one.
    pub fallback_ap_password: String,
    /// Root directory for downloaded sessions.
    pub data_dir: PathBuf,
    /// Delay after a successful WiFi join.
    pub join_settle: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_ip: DEFAULT_DEVICE_IP,
            device_port: DEFAULT_DEVICE_PORT,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            ap_ready_timeout: AP_READY_TIMEOUT,
            fallback_ap_password: DEFAULT_AP_PASSWORD.to_string(),
            data_dir: PathBuf::from("racesense-data"),
            join_settle: DEFAULT_JOIN_SETTLE,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `RACESENSE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_DEVICE_IP) {
            config.device_ip = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_DEVICE_IP,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(ENV_DEVICE_PORT) {
            config.device_port = match value.trim().parse::<u16>() {
                Ok(port) if port > 0 => port,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: ENV_DEVICE_PORT,
                        value,
                    })
                }
            };
        }
        if let Some(value) = lookup(ENV_HTTP_TIMEOUT) {
            config.http_timeout = parse_secs(ENV_HTTP_TIMEOUT, &value)?;
        }
        if let Some(value) = lookup(ENV_AP_TIMEOUT) {
            config.ap_ready_timeout = parse_secs(ENV_AP_TIMEOUT, &value)?;
        }
        if let Some(value) = lookup(ENV_DATA_DIR) {
            if value.is_empty() {
                return Err(ConfigError::InvalidEnv {
                    var: ENV_DATA_DIR,
                    value,
                });
            }
            config.data_dir = PathBuf::from(value);
        }

        Ok(config)
    }

    /// Base URL of the device's data-plane HTTP server.
    pub fn base_url(&self) -> String {
        if self.device_port == DEFAULT_DEVICE_PORT {
            format!("http://{}", self.device_ip)
        } else {
            format!("http://{}:{}", self.device_ip, self.device_port)
        }
    }
}

fn parse_secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let map: HashMap<&'static str, String> =
            pairs.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.base_url(), "http://192.168.4.1");
        assert_eq!(config.ap_ready_timeout, Duration::from_secs(30));
        assert_eq!(config.fallback_ap_password, "racesense");
    }

    #[test]
    fn test_env_overrides() {
        let config = SyncConfig::from_lookup(lookup_from(&[
            (ENV_DEVICE_IP, "10.0.0.7"),
            (ENV_HTTP_TIMEOUT, "5"),
            (ENV_DATA_DIR, "/tmp/rides"),
        ]))
        .unwrap();
        assert_eq!(config.base_url(), "http://10.0.0.7");
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/rides"));
        assert_eq!(config.ap_ready_timeout, AP_READY_TIMEOUT);
    }

    #[test]
    fn test_env_rejects_bad_values() {
        let result = SyncConfig::from_lookup(lookup_from(&[(ENV_DEVICE_IP, "not-an-ip")]));
        assert!(matches!(result, Err(ConfigError::InvalidEnv { var, .. }) if var == ENV_DEVICE_IP));

        let result = SyncConfig::from_lookup(lookup_from(&[(ENV_AP_TIMEOUT, "0")]));
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_device_port_override() {
        let config = SyncConfig::from_lookup(lookup_from(&[
            (ENV_DEVICE_IP, "127.0.0.1"),
            (ENV_DEVICE_PORT, "8080"),
        ]))
        .unwrap();
        assert_eq!(config.base_url(), "http://127.0.0.1:8080");

        for bad in ["0", "65536", "http"] {
            let result = SyncConfig::from_lookup(lookup_from(&[(ENV_DEVICE_PORT, bad)]));
            assert!(
                matches!(result, Err(ConfigError::InvalidEnv { var, .. }) if var == ENV_DEVICE_PORT),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_channel_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.name_prefixes, vec!["Racesense", "Datalogger"]);
        assert_eq!(config.scan_settle, Duration::from_secs(2));
        assert_eq!(config.reconnect.max_attempts, 3);
    }
}
