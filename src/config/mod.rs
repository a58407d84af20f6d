//! Configuration types.
//!
//! # Components
//!
//! - [`wifi`] - WiFi credentials and `CONFIGURE` commands (validated)
//! - [`sync`] - control channel layout and burst-sync timing

mod sync;
mod wifi;

pub use sync::{
    ChannelConfig, SyncConfig, AP_READY_TIMEOUT, DEFAULT_AP_PASSWORD, DEFAULT_DEVICE_IP,
    DEFAULT_DEVICE_PORT, DEFAULT_HTTP_TIMEOUT, DEFAULT_JOIN_SETTLE, DEFAULT_SCAN_TIMEOUT,
    ENV_AP_TIMEOUT, ENV_DATA_DIR, ENV_DEVICE_IP, ENV_DEVICE_PORT, ENV_HTTP_TIMEOUT,
    SCAN_SETTLE_DELAY,
};
pub use wifi::{
    ConfigError, DeviceCommand, WifiCredentials, MAX_PASSWORD_LEN, MAX_SSID_LEN,
    MIN_PASSWORD_LEN,
};
