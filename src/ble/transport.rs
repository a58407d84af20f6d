//! Host BLE capability surface.
//!
//! [`BleTransport`] is the seam between the control channel driver and the
//! platform BLE stack. Handles are opaque values issued by the transport;
//! the driver never looks inside them.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Callback fired with the raw bytes of each characteristic notification.
pub type NotifyListener = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Callback fired once when the host reports that a GATT session dropped.
pub type DisconnectListener = Arc<dyn Fn() + Send + Sync>;

/// A discovered peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    /// Platform peripheral identifier.
    pub id: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None => f.write_str(&self.id),
        }
    }
}

/// An established GATT connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattSession {
    /// Transport-unique session number. Stale numbers are rejected.
    pub id: u64,
    /// Peripheral this session belongs to.
    pub device: DeviceHandle,
}

/// A resolved primary service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub session_id: u64,
    pub uuid: Uuid,
}

/// A resolved characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharHandle {
    pub session_id: u64,
    pub service: Uuid,
    pub uuid: Uuid,
}

/// Which peripherals `request_device` accepts.
///
/// A peripheral matches if it advertises `service` or its name starts with
/// any of `name_prefixes`.
#[derive(Debug, Clone)]
pub struct DeviceFilter {
    pub service: Uuid,
    pub name_prefixes: Vec<String>,
}

impl DeviceFilter {
    /// Check advertisement data against the filter.
    pub fn matches(&self, name: Option<&str>, services: &[Uuid]) -> bool {
        if services.contains(&self.service) {
            return true;
        }
        match name {
            Some(name) => self
                .name_prefixes
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str())),
            None => false,
        }
    }
}

/// Errors raised by the BLE transport and control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleError {
    /// Host has no usable BLE adapter.
    Unsupported,
    /// Discovery ended without a matching device.
    NoDeviceSelected,
    /// GATT connect timed out or was refused.
    ConnectionFailed(String),
    /// A required characteristic (or the service) is absent.
    CharacteristicMissing(String),
    /// Operation requires a connected channel.
    NotConnected,
    /// Read/write/subscribe failed in the host stack.
    TransportError(String),
}

impl fmt::Display for BleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => write!(f, "BLE is not supported on this host"),
            Self::NoDeviceSelected => write!(f, "no matching BLE device selected"),
            Self::ConnectionFailed(e) => write!(f, "GATT connection failed: {}", e),
            Self::CharacteristicMissing(what) => write!(f, "characteristic missing: {}", what),
            Self::NotConnected => write!(f, "BLE control channel not connected"),
            Self::TransportError(e) => write!(f, "BLE transport error: {}", e),
        }
    }
}

impl std::error::Error for BleError {}

/// Minimal host BLE surface used by the control channel driver.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Whether the host exposes a BLE adapter at all.
    fn is_supported(&self) -> bool;

    /// Discover a peripheral matching `filter`.
    async fn request_device(&self, filter: &DeviceFilter) -> Result<DeviceHandle, BleError>;

    /// Connect to `device`. `on_disconnect` fires once when the link drops.
    async fn connect_gatt(
        &self,
        device: &DeviceHandle,
        on_disconnect: DisconnectListener,
    ) -> Result<GattSession, BleError>;

    /// Resolve a primary service.
    async fn get_service(
        &self,
        session: &GattSession,
        service: Uuid,
    ) -> Result<ServiceHandle, BleError>;

    /// Resolve a characteristic of a service.
    async fn get_characteristic(
        &self,
        service: &ServiceHandle,
        characteristic: Uuid,
    ) -> Result<CharHandle, BleError>;

    /// Write with response.
    async fn write_value(&self, characteristic: &CharHandle, value: &[u8]) -> Result<(), BleError>;

    /// Read the current value.
    async fn read_value(&self, characteristic: &CharHandle) -> Result<Vec<u8>, BleError>;

    /// Enable notifications and route them to `on_change`.
    async fn subscribe(
        &self,
        characteristic: &CharHandle,
        on_change: NotifyListener,
    ) -> Result<(), BleError>;

    /// Tear down the session. Does not fire the disconnect listener.
    async fn disconnect(&self, session: &GattSession) -> Result<(), BleError>;
}
