//! Scriptable in-memory BLE transport for tests.
//!
//! Stands in for a logger: records every `CONFIGURE` write with a timestamp,
//! serves preset characteristic values, and can push `STATUS` notifications
//! either on demand or in response to specific commands.

use super::protocol::{CHAR_CONFIGURE_UUID, CHAR_STATUS_UUID, NAME_PREFIXES, SERVICE_UUID};
use super::transport::{
    BleError, BleTransport, CharHandle, DeviceFilter, DeviceHandle, DisconnectListener,
    GattSession, NotifyListener, ServiceHandle,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Default)]
struct MockState {
    next_session: u64,
    live_session: Option<u64>,
    connect_failures: u32,
    connect_delay: Duration,
    request_device_calls: usize,
    disconnect_calls: usize,
    connect_times: Vec<Instant>,
    commands: Vec<(Instant, String)>,
    reads: Vec<(Instant, Uuid)>,
    values: HashMap<Uuid, Vec<u8>>,
    failing_commands: HashSet<String>,
    replies: HashMap<String, Vec<u8>>,
    listeners: HashMap<Uuid, NotifyListener>,
    on_disconnect: Option<DisconnectListener>,
}

/// In-memory logger reachable over "BLE".
pub struct MockTransport {
    supported: bool,
    device: Option<DeviceHandle>,
    missing: HashSet<Uuid>,
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            supported: true,
            device: Some(racesense_device()),
            missing: HashSet::new(),
            state: Mutex::new(MockState {
                next_session: 1,
                ..Default::default()
            }),
        }
    }

    /// Host without a BLE adapter.
    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    /// No logger in range.
    pub fn without_device(mut self) -> Self {
        self.device = None;
        self
    }

    /// Firmware that lacks a characteristic.
    pub fn missing(mut self, uuid: Uuid) -> Self {
        self.missing.insert(uuid);
        self
    }

    /// Fail the next `count` GATT connects.
    pub fn fail_connects(&self, count: u32) {
        self.state.lock().unwrap().connect_failures = count;
    }

    /// Make every GATT connect take `delay`.
    pub fn slow_connects(&self, delay: Duration) {
        self.state.lock().unwrap().connect_delay = delay;
    }

    /// Reject writes of `command`.
    pub fn fail_command(&self, command: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_commands
            .insert(command.to_string());
    }

    /// Notify `STATUS` with `payload` whenever `command` is written.
    pub fn reply_to(&self, command: &str, payload: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .replies
            .insert(command.to_string(), payload.to_vec());
    }

    /// Preset the value returned by reads of `uuid`.
    pub fn set_value(&self, uuid: Uuid, value: &[u8]) {
        self.state.lock().unwrap().values.insert(uuid, value.to_vec());
    }

    /// Push a notification on `uuid` if subscribed.
    pub fn notify(&self, uuid: Uuid, value: &[u8]) {
        let listener = self.state.lock().unwrap().listeners.get(&uuid).cloned();
        if let Some(listener) = listener {
            listener(value.to_vec());
        }
    }

    /// Simulate the device going out of range.
    pub fn drop_link(&self) {
        let listener = {
            let mut state = self.state.lock().unwrap();
            state.live_session = None;
            state.listeners.clear();
            state.on_disconnect.clone()
        };
        if let Some(listener) = listener {
            listener();
        }
    }

    pub fn is_subscribed(&self, uuid: Uuid) -> bool {
        self.state.lock().unwrap().listeners.contains_key(&uuid)
    }

    /// Texts written to `CONFIGURE`, in order.
    pub fn commands(&self) -> Vec<String> {
        self.command_log().into_iter().map(|(_, text)| text).collect()
    }

    pub fn command_log(&self) -> Vec<(Instant, String)> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn read_times(&self, uuid: Uuid) -> Vec<Instant> {
        self.state
            .lock()
            .unwrap()
            .reads
            .iter()
            .filter(|(_, read)| *read == uuid)
            .map(|(at, _)| *at)
            .collect()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().connect_times.clone()
    }

    pub fn request_device_calls(&self) -> usize {
        self.state.lock().unwrap().request_device_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.lock().unwrap().disconnect_calls
    }

    fn check_session(&self, session_id: u64) -> Result<(), BleError> {
        if self.state.lock().unwrap().live_session == Some(session_id) {
            Ok(())
        } else {
            Err(BleError::TransportError("GATT session closed".into()))
        }
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn request_device(&self, filter: &DeviceFilter) -> Result<DeviceHandle, BleError> {
        self.state.lock().unwrap().request_device_calls += 1;
        let device = self.device.clone().ok_or(BleError::NoDeviceSelected)?;
        let advertised = if self.missing.contains(&SERVICE_UUID) {
            vec![]
        } else {
            vec![SERVICE_UUID]
        };
        if filter.matches(device.name.as_deref(), &advertised) {
            Ok(device)
        } else {
            Err(BleError::NoDeviceSelected)
        }
    }

    async fn connect_gatt(
        &self,
        device: &DeviceHandle,
        on_disconnect: DisconnectListener,
    ) -> Result<GattSession, BleError> {
        let delay = self.state.lock().unwrap().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.connect_times.push(Instant::now());
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(BleError::ConnectionFailed("device out of range".into()));
        }
        let id = state.next_session;
        state.next_session += 1;
        state.live_session = Some(id);
        state.on_disconnect = Some(on_disconnect);
        Ok(GattSession {
            id,
            device: device.clone(),
        })
    }

    async fn get_service(
        &self,
        session: &GattSession,
        service: Uuid,
    ) -> Result<ServiceHandle, BleError> {
        self.check_session(session.id)?;
        if self.missing.contains(&service) {
            return Err(BleError::CharacteristicMissing(service.to_string()));
        }
        Ok(ServiceHandle {
            session_id: session.id,
            uuid: service,
        })
    }

    async fn get_characteristic(
        &self,
        service: &ServiceHandle,
        characteristic: Uuid,
    ) -> Result<CharHandle, BleError> {
        self.check_session(service.session_id)?;
        if self.missing.contains(&characteristic) {
            return Err(BleError::CharacteristicMissing(characteristic.to_string()));
        }
        Ok(CharHandle {
            session_id: service.session_id,
            service: service.uuid,
            uuid: characteristic,
        })
    }

    async fn write_value(&self, characteristic: &CharHandle, value: &[u8]) -> Result<(), BleError> {
        self.check_session(characteristic.session_id)?;
        let text = String::from_utf8_lossy(value).into_owned();
        let reply = {
            let mut state = self.state.lock().unwrap();
            if characteristic.uuid == CHAR_CONFIGURE_UUID {
                state.commands.push((Instant::now(), text.clone()));
            }
            if state.failing_commands.contains(&text) {
                return Err(BleError::TransportError(format!("write of {} rejected", text)));
            }
            state.replies.get(&text).cloned()
        };
        if let Some(reply) = reply {
            self.notify(CHAR_STATUS_UUID, &reply);
        }
        Ok(())
    }

    async fn read_value(&self, characteristic: &CharHandle) -> Result<Vec<u8>, BleError> {
        self.check_session(characteristic.session_id)?;
        let mut state = self.state.lock().unwrap();
        state.reads.push((Instant::now(), characteristic.uuid));
        Ok(state
            .values
            .get(&characteristic.uuid)
            .cloned()
            .unwrap_or_default())
    }

    async fn subscribe(
        &self,
        characteristic: &CharHandle,
        on_change: NotifyListener,
    ) -> Result<(), BleError> {
        self.check_session(characteristic.session_id)?;
        self.state
            .lock()
            .unwrap()
            .listeners
            .insert(characteristic.uuid, on_change);
        Ok(())
    }

    async fn disconnect(&self, session: &GattSession) -> Result<(), BleError> {
        let mut state = self.state.lock().unwrap();
        state.disconnect_calls += 1;
        if state.live_session == Some(session.id) {
            state.live_session = None;
            state.listeners.clear();
        }
        Ok(())
    }
}

/// Device handle with the name prefix the firmware advertises.
pub fn racesense_device() -> DeviceHandle {
    DeviceHandle {
        id: "AA:BB:CC:DD:EE:FF".to_string(),
        name: Some(format!("{}-AB12", NAME_PREFIXES[0])),
    }
}
