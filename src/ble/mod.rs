//! BLE control channel.
//!
//! # Components
//!
//! - [`protocol`] - GATT layout, payload decoding, status/device-info types
//! - [`transport`] - host BLE capability trait and handles
//! - [`driver`] - [`ControlChannel`]: connect sequence, commands, status slot
//! - [`supervisor`] - bounded reconnection policy
//! - `btleplug_transport` - real transport (feature `btleplug`)

pub mod driver;
pub mod protocol;
pub mod supervisor;
pub mod transport;

#[cfg(feature = "btleplug")]
mod btleplug_transport;

#[cfg(test)]
pub(crate) mod mock;

pub use driver::{CharacteristicMap, ConnectionState, ControlChannel, StatusWatch, WaitError};
pub use protocol::{
    AccessPoint, BlePayload, DeviceInfo, Role, StatusSnapshot, CHAR_CONFIGURE_UUID,
    CHAR_DEVICE_INFO_UUID, CHAR_NETWORKS_UUID, CHAR_STATUS_UUID, NAME_PREFIXES, SERVICE_UUID,
};
pub use supervisor::{ReconnectPolicy, ReconnectSupervisor, SupervisorState};
pub use transport::{
    BleError, BleTransport, CharHandle, DeviceFilter, DeviceHandle, DisconnectListener,
    GattSession, NotifyListener, ServiceHandle,
};

#[cfg(feature = "btleplug")]
pub use btleplug_transport::BtleplugTransport;
