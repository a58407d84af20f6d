//! [`BleTransport`] over the host Bluetooth stack via `btleplug`.
//!
//! Uses the first adapter the platform reports. Discovery scans until a
//! peripheral matches the filter or the scan timeout elapses.

use super::transport::{
    BleError, BleTransport, CharHandle, DeviceFilter, DeviceHandle, DisconnectListener,
    GattSession, NotifyListener, ServiceHandle,
};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Poll interval while scanning.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound for GATT connect and service discovery.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

struct Session {
    peripheral: Peripheral,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

fn transport_err(e: btleplug::Error) -> BleError {
    BleError::TransportError(e.to_string())
}

/// Host BLE transport.
pub struct BtleplugTransport {
    adapter: Option<Adapter>,
    scan_timeout: Duration,
    discovered: Mutex<HashMap<String, Peripheral>>,
    sessions: Mutex<HashMap<u64, Session>>,
    next_session: AtomicU64,
}

impl BtleplugTransport {
    /// Open the platform BLE manager.
    ///
    /// A host without adapters yields a transport whose
    /// [`is_supported`](BleTransport::is_supported) is false.
    pub async fn new(scan_timeout: Duration) -> Result<Self, BleError> {
        let manager = Manager::new().await.map_err(transport_err)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(transport_err)?
            .into_iter()
            .next();

        match &adapter {
            Some(adapter) => match adapter.adapter_info().await {
                Ok(info) => info!("Using BLE adapter {}", info),
                Err(e) => debug!("Adapter info unavailable: {}", e),
            },
            None => warn!("No BLE adapter found"),
        }

        Ok(Self {
            adapter,
            scan_timeout,
            discovered: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        })
    }

    fn adapter(&self) -> Result<&Adapter, BleError> {
        self.adapter.as_ref().ok_or(BleError::Unsupported)
    }

    async fn peripheral(&self, session_id: u64) -> Result<Peripheral, BleError> {
        self.sessions
            .lock()
            .await
            .get(&session_id)
            .map(|session| session.peripheral.clone())
            .ok_or(BleError::NotConnected)
    }

    async fn characteristic(&self, handle: &CharHandle) -> Result<(Peripheral, Characteristic), BleError> {
        let peripheral = self.peripheral(handle.session_id).await?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == handle.uuid && c.service_uuid == handle.service)
            .ok_or_else(|| BleError::CharacteristicMissing(handle.uuid.to_string()))?;
        Ok((peripheral, characteristic))
    }

    async fn scan(&self, adapter: &Adapter, filter: &DeviceFilter) -> Result<DeviceHandle, BleError> {
        let deadline = tokio::time::Instant::now() + self.scan_timeout;
        loop {
            for peripheral in adapter.peripherals().await.map_err(transport_err)? {
                let Some(props) = peripheral.properties().await.map_err(transport_err)? else {
                    continue;
                };
                if !filter.matches(props.local_name.as_deref(), &props.services) {
                    continue;
                }

                let handle = DeviceHandle {
                    id: peripheral.id().to_string(),
                    name: props.local_name,
                };
                info!("Found {}", handle);
                self.discovered
                    .lock()
                    .await
                    .insert(handle.id.clone(), peripheral);
                return Ok(handle);
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(BleError::NoDeviceSelected);
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    fn is_supported(&self) -> bool {
        self.adapter.is_some()
    }

    async fn request_device(&self, filter: &DeviceFilter) -> Result<DeviceHandle, BleError> {
        let adapter = self.adapter()?;
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(transport_err)?;

        let result = self.scan(adapter, filter).await;
        if let Err(e) = adapter.stop_scan().await {
            debug!("stop_scan failed: {}", e);
        }
        result
    }

    async fn connect_gatt(
        &self,
        device: &DeviceHandle,
        on_disconnect: DisconnectListener,
    ) -> Result<GattSession, BleError> {
        let adapter = self.adapter()?;
        let peripheral = self
            .discovered
            .lock()
            .await
            .get(&device.id)
            .cloned()
            .ok_or(BleError::NoDeviceSelected)?;

        // Subscribe before connecting so a fast drop is not missed
        let mut events = adapter.events().await.map_err(transport_err)?;
        match tokio::time::timeout(CONNECT_TIMEOUT, peripheral.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(BleError::ConnectionFailed(e.to_string())),
            Err(_) => return Err(BleError::ConnectionFailed("connect timed out".into())),
        }

        let peripheral_id = peripheral.id();
        let watcher = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == peripheral_id {
                        on_disconnect();
                        break;
                    }
                }
            }
        });

        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().await.insert(
            id,
            Session {
                peripheral,
                tasks: vec![watcher],
            },
        );
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
        let peripheral = self.peripheral(session.id).await?;
        tokio::time::timeout(CONNECT_TIMEOUT, peripheral.discover_services())
            .await
            .map_err(|_| BleError::ConnectionFailed("service discovery timed out".into()))?
            .map_err(transport_err)?;

        if !peripheral.services().iter().any(|s| s.uuid == service) {
            return Err(BleError::CharacteristicMissing(format!("service {}", service)));
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
        let handle = CharHandle {
            session_id: service.session_id,
            service: service.uuid,
            uuid: characteristic,
        };
        self.characteristic(&handle).await?;
        Ok(handle)
    }

    async fn write_value(&self, characteristic: &CharHandle, value: &[u8]) -> Result<(), BleError> {
        let (peripheral, c) = self.characteristic(characteristic).await?;
        peripheral
            .write(&c, value, WriteType::WithResponse)
            .await
            .map_err(transport_err)
    }

    async fn read_value(&self, characteristic: &CharHandle) -> Result<Vec<u8>, BleError> {
        let (peripheral, c) = self.characteristic(characteristic).await?;
        peripheral.read(&c).await.map_err(transport_err)
    }

    async fn subscribe(
        &self,
        characteristic: &CharHandle,
        on_change: NotifyListener,
    ) -> Result<(), BleError> {
        let (peripheral, c) = self.characteristic(characteristic).await?;
        let mut stream = peripheral.notifications().await.map_err(transport_err)?;
        peripheral.subscribe(&c).await.map_err(transport_err)?;

        let uuid = c.uuid;
        let task = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid == uuid {
                    on_change(notification.value);
                }
            }
        });

        match self.sessions.lock().await.get_mut(&characteristic.session_id) {
            Some(session) => session.tasks.push(task),
            None => task.abort(),
        }
        Ok(())
    }

    async fn disconnect(&self, session: &GattSession) -> Result<(), BleError> {
        let Some(mut entry) = self.sessions.lock().await.remove(&session.id) else {
            return Ok(());
        };
        entry.abort_tasks();
        entry.peripheral.disconnect().await.map_err(transport_err)
    }
}
