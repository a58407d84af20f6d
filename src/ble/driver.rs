//! BLE control channel driver.
//!
//! Turns a GATT session with the logger into four logical roles
//! (`NETWORKS`, `STATUS`, `CONFIGURE`, `DEVICE_INFO`), keeps the latest
//! status notification in a single-slot watch, and reconnects after
//! unexpected drops.
//!
//! # Connect sequence
//!
//! The firmware expects this exact order:
//!
//! 1. Discover a device by service UUID / name prefix
//! 2. Connect GATT, resolve the primary service
//! 3. Resolve all four characteristics (any missing fails the attempt)
//! 4. Subscribe to `STATUS` notifications
//! 5. Mark `Connected`, fire the connect callback
//!
//! Reconnection re-runs steps 2-5 on the saved device handle.
//!
//! # Lock Ordering
//!
//! `link` (tokio mutex) may be held across transport calls. The notification
//! path never takes it; it only touches the status watch and `callbacks`.

use super::protocol::{BlePayload, Role, StatusSnapshot};
use super::supervisor::ReconnectSupervisor;
use super::transport::{
    BleError, BleTransport, CharHandle, DeviceFilter, DeviceHandle, DisconnectListener,
    GattSession, NotifyListener, ServiceHandle,
};
use crate::config::{ChannelConfig, DeviceCommand, WifiCredentials};
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

type Callback = Arc<dyn Fn() + Send + Sync>;
type StatusCallback = Arc<dyn Fn(&BlePayload) + Send + Sync>;

/// Link state as seen by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
        }
    }
}

/// Resolved characteristics for one GATT connection.
#[derive(Debug, Clone)]
pub struct CharacteristicMap {
    networks: CharHandle,
    status: CharHandle,
    configure: CharHandle,
    device_info: CharHandle,
}

impl CharacteristicMap {
    /// Resolve every role. Partial resolution is an error.
    async fn resolve(
        transport: &dyn BleTransport,
        service: &ServiceHandle,
        config: &ChannelConfig,
    ) -> Result<Self, BleError> {
        let lookup = |role: Role| async move {
            let uuid = match role {
                Role::Networks => config.networks_uuid,
                Role::Status => config.status_uuid,
                Role::Configure => config.configure_uuid,
                Role::DeviceInfo => config.device_info_uuid,
            };
            transport
                .get_characteristic(service, uuid)
                .await
                .map_err(|e| match e {
                    BleError::CharacteristicMissing(_) => {
                        BleError::CharacteristicMissing(role.to_string())
                    }
                    other => other,
                })
        };

        Ok(Self {
            networks: lookup(Role::Networks).await?,
            status: lookup(Role::Status).await?,
            configure: lookup(Role::Configure).await?,
            device_info: lookup(Role::DeviceInfo).await?,
        })
    }

    /// Handle for a role.
    pub fn get(&self, role: Role) -> &CharHandle {
        match role {
            Role::Networks => &self.networks,
            Role::Status => &self.status,
            Role::Configure => &self.configure,
            Role::DeviceInfo => &self.device_info,
        }
    }
}

/// Failure of [`StatusWatch::wait_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// No matching snapshot before the deadline.
    TimedOut,
    /// The driver was dropped.
    Closed,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => write!(f, "timed out waiting for device status"),
            Self::Closed => write!(f, "status channel closed"),
        }
    }
}

impl std::error::Error for WaitError {}

/// Level-triggered view of the status slot.
///
/// Only the latest snapshot is ever inspected; intermediate notifications
/// that were overwritten before the waiter woke are not replayed.
pub struct StatusWatch {
    rx: watch::Receiver<Option<StatusSnapshot>>,
}

impl StatusWatch {
    /// Latest snapshot, if any arrived on this connection.
    pub fn latest(&self) -> Option<StatusSnapshot> {
        self.rx.borrow().clone()
    }

    /// Treat the current snapshot as already seen.
    pub fn mark_seen(&mut self) {
        self.rx.borrow_and_update();
    }

    /// Wait for a snapshot newer than the last one seen that satisfies
    /// `predicate`.
    pub async fn wait_for<F>(
        &mut self,
        mut predicate: F,
        timeout: Duration,
    ) -> Result<StatusSnapshot, WaitError>
    where
        F: FnMut(&StatusSnapshot) -> bool,
    {
        let rx = &mut self.rx;
        tokio::time::timeout(timeout, async move {
            loop {
                if rx.changed().await.is_err() {
                    return Err(WaitError::Closed);
                }
                let latest = rx.borrow_and_update().clone();
                if let Some(snapshot) = latest {
                    if predicate(&snapshot) {
                        return Ok(snapshot);
                    }
                }
            }
        })
        .await
        .map_err(|_| WaitError::TimedOut)?
    }
}

#[derive(Default)]
struct Callbacks {
    on_connect: Option<Callback>,
    on_disconnect: Option<Callback>,
    on_status: Option<StatusCallback>,
}

#[derive(Default)]
struct Link {
    device: Option<DeviceHandle>,
    session: Option<GattSession>,
    chars: Option<CharacteristicMap>,
    /// Cancels the running reconnect round, if any.
    reconnect: Option<CancellationToken>,
}

struct Inner {
    transport: Arc<dyn BleTransport>,
    config: ChannelConfig,
    state_tx: watch::Sender<ConnectionState>,
    status_tx: watch::Sender<Option<StatusSnapshot>>,
    link: Mutex<Link>,
    callbacks: StdMutex<Callbacks>,
    /// Number handed to the next connection attempt.
    next_generation: AtomicU64,
    /// Generation of the live session; 0 when none.
    live_generation: AtomicU64,
    reconnect_failures: AtomicU32,
}

/// Driver for the logger's BLE control channel.
///
/// Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct ControlChannel {
    inner: Arc<Inner>,
}

impl ControlChannel {
    /// Create a disconnected driver over `transport`.
    pub fn new(transport: Arc<dyn BleTransport>, config: ChannelConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (status_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                state_tx,
                status_tx,
                link: Mutex::new(Link::default()),
                callbacks: StdMutex::new(Callbacks::default()),
                next_generation: AtomicU64::new(1),
                live_generation: AtomicU64::new(0),
                reconnect_failures: AtomicU32::new(0),
            }),
        }
    }

    /// Discover the logger and run the full connect sequence.
    ///
    /// Returns immediately if already connected.
    pub async fn connect(&self) -> Result<DeviceHandle, BleError> {
        let inner = &self.inner;

        if !inner.transport.is_supported() {
            return Err(BleError::Unsupported);
        }

        {
            // Waits out any establish in flight, including a reconnect attempt
            let mut link = inner.link.lock().await;
            // An explicit connect supersedes any reconnect round in flight
            if let Some(round) = link.reconnect.take() {
                round.cancel();
            }
            if self.state() == ConnectionState::Connected && link.session.is_some() {
                if let Some(device) = link.device.clone() {
                    return Ok(device);
                }
            }
        }

        inner.state_tx.send_replace(ConnectionState::Connecting);
        let filter = DeviceFilter {
            service: inner.config.service_uuid,
            name_prefixes: inner.config.name_prefixes.clone(),
        };
        info!("Requesting BLE device (prefixes {:?})", filter.name_prefixes);
        let device = match inner.transport.request_device(&filter).await {
            Ok(device) => device,
            Err(e) => {
                inner.state_tx.send_replace(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        inner.link.lock().await.device = Some(device.clone());
        Inner::establish(inner, &device).await?;
        Ok(device)
    }

    /// Close the link on purpose. No reconnection follows.
    pub async fn disconnect(&self) -> Result<(), BleError> {
        let inner = &self.inner;
        let session = {
            let mut link = inner.link.lock().await;
            if let Some(round) = link.reconnect.take() {
                round.cancel();
            }
            link.chars = None;
            link.session.take()
        };
        inner.live_generation.store(0, Ordering::SeqCst);
        let was_connected =
            inner.state_tx.send_replace(ConnectionState::Disconnected) == ConnectionState::Connected;

        if let Some(session) = session {
            info!("Disconnecting from {}", session.device);
            inner.transport.disconnect(&session).await?;
        }
        if was_connected {
            inner.fire(|c| c.on_disconnect.clone());
        }
        Ok(())
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Observe connection state changes.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Device selected by the last successful discovery.
    pub async fn device(&self) -> Option<DeviceHandle> {
        self.inner.link.lock().await.device.clone()
    }

    /// Reconnection attempts that failed since this driver was created.
    pub fn reconnect_failures(&self) -> u32 {
        self.inner.reconnect_failures.load(Ordering::Relaxed)
    }

    /// Watch over the status slot, positioned at the current snapshot.
    pub fn status_watch(&self) -> StatusWatch {
        StatusWatch {
            rx: self.inner.status_tx.subscribe(),
        }
    }

    /// Latest status snapshot received by notification.
    pub fn latest_status(&self) -> Option<StatusSnapshot> {
        self.inner.status_tx.borrow().clone()
    }

    /// Register the callback fired after every successful connect.
    pub fn on_connect<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.callbacks().on_connect = Some(Arc::new(f));
    }

    /// Register the callback fired when the link goes down.
    pub fn on_disconnect<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.callbacks().on_disconnect = Some(Arc::new(f));
    }

    /// Register the callback fired for every `STATUS` notification.
    pub fn on_status<F>(&self, f: F)
    where
        F: Fn(&BlePayload) + Send + Sync + 'static,
    {
        self.inner.callbacks().on_status = Some(Arc::new(f));
    }

    /// Write UTF-8 text to `CONFIGURE`.
    pub async fn write_command(&self, text: &str) -> Result<(), BleError> {
        let configure = self.characteristic(Role::Configure).await?;
        self.inner
            .transport
            .write_value(&configure, text.as_bytes())
            .await
    }

    /// Send a control command.
    pub async fn send_command(&self, command: &DeviceCommand) -> Result<(), BleError> {
        debug!("Sending command {}", command);
        self.write_command(&command.to_wire()).await
    }

    /// Push WiFi credentials (validated at construction).
    pub async fn configure_wifi(&self, credentials: &WifiCredentials) -> Result<(), BleError> {
        info!("Configuring device WiFi: {}", credentials.ssid);
        self.send_command(&DeviceCommand::Configure(credentials.clone()))
            .await
    }

    /// Ask the device to upload its sessions to the backend itself.
    pub async fn trigger_sync(&self) -> Result<(), BleError> {
        self.send_command(&DeviceCommand::Sync).await
    }

    /// Open the burst access point.
    pub async fn start_ap(&self) -> Result<(), BleError> {
        self.send_command(&DeviceCommand::StartAp).await
    }

    /// Close the burst access point.
    pub async fn stop_ap(&self) -> Result<(), BleError> {
        self.send_command(&DeviceCommand::StopAp).await
    }

    /// Refresh and read the device's visible networks.
    ///
    /// The firmware scans asynchronously, so the read waits for the settle
    /// delay after the `SCAN` write.
    pub async fn scan_networks(&self) -> Result<BlePayload, BleError> {
        self.send_command(&DeviceCommand::Scan).await?;
        tokio::time::sleep(self.inner.config.scan_settle).await;
        self.read_role(Role::Networks).await
    }

    /// Read `STATUS` directly. Object payloads also refresh the status slot.
    pub async fn read_status(&self) -> Result<BlePayload, BleError> {
        let payload = self.read_role(Role::Status).await?;
        if let Some(snapshot) = StatusSnapshot::from_payload(&payload) {
            self.inner.status_tx.send_replace(Some(snapshot));
        }
        Ok(payload)
    }

    /// Read `DEVICE_INFO`.
    pub async fn read_device_info(&self) -> Result<BlePayload, BleError> {
        self.read_role(Role::DeviceInfo).await
    }

    async fn read_role(&self, role: Role) -> Result<BlePayload, BleError> {
        let handle = self.characteristic(role).await?;
        let bytes = self.inner.transport.read_value(&handle).await?;
        Ok(BlePayload::decode(&bytes))
    }

    async fn characteristic(&self, role: Role) -> Result<CharHandle, BleError> {
        let link = self.inner.link.lock().await;
        if self.state() != ConnectionState::Connected {
            return Err(BleError::NotConnected);
        }
        link.chars
            .as_ref()
            .map(|chars| chars.get(role).clone())
            .ok_or(BleError::NotConnected)
    }
}

impl Inner {
    fn callbacks(&self) -> std::sync::MutexGuard<'_, Callbacks> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invoke a callback outside the callbacks lock.
    fn fire(&self, pick: impl FnOnce(&Callbacks) -> Option<Callback>) {
        let callback = pick(&self.callbacks());
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Steps 2-5 of the connect sequence.
    async fn establish(self: &Arc<Self>, device: &DeviceHandle) -> Result<(), BleError> {
        let mut link = self.link.lock().await;
        if let Some(stale) = link.session.take() {
            link.chars = None;
            self.live_generation.store(0, Ordering::SeqCst);
            self.release(&stale).await;
        }
        self.state_tx.send_replace(ConnectionState::Connecting);

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        match self.open_session(device, generation).await {
            Ok((session, chars)) => {
                info!("Connected to {}", device);
                link.session = Some(session);
                link.chars = Some(chars);
                self.live_generation.store(generation, Ordering::SeqCst);
                self.state_tx.send_replace(ConnectionState::Connected);
                drop(link);
                self.fire(|c| c.on_connect.clone());
                Ok(())
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", device, e);
                self.state_tx.send_replace(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn open_session(
        self: &Arc<Self>,
        device: &DeviceHandle,
        generation: u64,
    ) -> Result<(GattSession, CharacteristicMap), BleError> {
        let transport = &self.transport;

        debug!("Connecting GATT to {}", device);
        let session = transport
            .connect_gatt(device, self.disconnect_listener(generation))
            .await?;

        let result = async {
            let service = transport
                .get_service(&session, self.config.service_uuid)
                .await?;
            let chars = CharacteristicMap::resolve(transport.as_ref(), &service, &self.config).await?;

            // New connection, no status yet
            self.status_tx.send_replace(None);
            transport
                .subscribe(chars.get(Role::Status), self.status_listener())
                .await?;
            Ok::<_, BleError>(chars)
        }
        .await;

        match result {
            Ok(chars) => Ok((session, chars)),
            Err(e) => {
                if let Err(close_err) = transport.disconnect(&session).await {
                    debug!("Cleanup disconnect failed: {}", close_err);
                }
                Err(e)
            }
        }
    }

    fn status_listener(self: &Arc<Self>) -> NotifyListener {
        let weak: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |bytes: Vec<u8>| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_status(&bytes);
            }
        })
    }

    fn disconnect_listener(self: &Arc<Self>, generation: u64) -> DisconnectListener {
        let weak: Weak<Self> = Arc::downgrade(self);
        let runtime = tokio::runtime::Handle::current();
        Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                runtime.spawn(Inner::link_lost(inner, generation));
            }
        })
    }

    fn handle_status(&self, bytes: &[u8]) {
        let payload = BlePayload::decode(bytes);
        match StatusSnapshot::from_payload(&payload) {
            Some(snapshot) => {
                debug!("Status: {}", payload);
                self.status_tx.send_replace(Some(snapshot));
            }
            None => debug!("Non-object status payload: {}", payload),
        }

        let callback = self.callbacks().on_status.clone();
        if let Some(callback) = callback {
            callback(&payload);
        }
    }

    /// Best-effort close of a session that is no longer live.
    async fn release(&self, session: &GattSession) {
        if let Err(e) = self.transport.disconnect(session).await {
            debug!("Releasing session {} failed: {}", session.id, e);
        }
    }

    /// Host reported that the session of `generation` dropped.
    async fn link_lost(self: Arc<Self>, generation: u64) {
        let (device, round, session) = {
            let mut link = self.link.lock().await;
            if self.live_generation.load(Ordering::SeqCst) != generation {
                debug!("Ignoring disconnect of stale session {}", generation);
                return;
            }
            self.live_generation.store(0, Ordering::SeqCst);
            link.chars = None;

            let round = CancellationToken::new();
            if let Some(previous) = link.reconnect.replace(round.clone()) {
                previous.cancel();
            }
            (link.device.clone(), round, link.session.take())
        };

        warn!("BLE link lost");
        self.state_tx.send_replace(ConnectionState::Disconnected);
        // Host-side session state still holds listeners and tasks
        if let Some(session) = session {
            self.release(&session).await;
        }
        self.fire(|c| c.on_disconnect.clone());

        if let Some(device) = device {
            self.supervise(device, round).await;
        }
    }

    /// Bounded reconnection round. Never returns an error.
    async fn supervise(self: &Arc<Self>, device: DeviceHandle, round: CancellationToken) {
        let mut supervisor = ReconnectSupervisor::new(self.config.reconnect);
        let max = supervisor.policy().max_attempts;
        supervisor.begin();

        while let Some((attempt, delay)) = supervisor.next_attempt() {
            tokio::select! {
                _ = round.cancelled() => {
                    debug!("Reconnect round cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            if round.is_cancelled() {
                debug!("Reconnect round cancelled");
                return;
            }

            info!("Reconnecting to {} (attempt {}/{})", device, attempt, max);
            match self.establish(&device).await {
                Ok(()) => {
                    supervisor.succeeded();
                    info!("Reconnected to {} on attempt {}", device, attempt);
                    return;
                }
                Err(e) => {
                    supervisor.record_failure();
                    self.reconnect_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Reconnection attempt {}/{} failed: {}", attempt, max, e);
                }
            }
        }

        warn!(
            "Giving up on {} after {} reconnection attempts",
            device,
            supervisor.attempts()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::mock::MockTransport;
    use crate::ble::protocol::{CHAR_DEVICE_INFO_UUID, CHAR_NETWORKS_UUID, CHAR_STATUS_UUID};
    use crate::ble::supervisor::ReconnectPolicy;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Instant;

    fn channel(mock: &Arc<MockTransport>) -> ControlChannel {
        ControlChannel::new(mock.clone(), ChannelConfig::default())
    }

    /// Let spawned tasks run without advancing the paused clock.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_connect_sequence() {
        let mock = Arc::new(MockTransport::new());
        let ble = channel(&mock);
        let connects = Arc::new(AtomicUsize::new(0));
        let counter = connects.clone();
        ble.on_connect(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let device = ble.connect().await.unwrap();
        assert_eq!(device.name.as_deref(), Some("Racesense-AB12"));
        assert_eq!(ble.state(), ConnectionState::Connected);
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert!(mock.is_subscribed(CHAR_STATUS_UUID));
    }

    #[tokio::test]
    async fn test_connect_unsupported() {
        let mock = Arc::new(MockTransport::new().unsupported());
        let ble = channel(&mock);
        assert_eq!(ble.connect().await, Err(BleError::Unsupported));
        assert_eq!(ble.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_no_device() {
        let mock = Arc::new(MockTransport::new().without_device());
        let ble = channel(&mock);
        assert_eq!(ble.connect().await, Err(BleError::NoDeviceSelected));
        assert_eq!(ble.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_missing_characteristic_fails_connect() {
        let mock = Arc::new(MockTransport::new().missing(CHAR_DEVICE_INFO_UUID));
        let ble = channel(&mock);

        let err = ble.connect().await.unwrap_err();
        assert_eq!(err, BleError::CharacteristicMissing("DEVICE_INFO".into()));
        assert_eq!(ble.state(), ConnectionState::Disconnected);
        // Half-open session is torn down
        assert_eq!(mock.disconnect_calls(), 1);
        assert_eq!(ble.write_command("SCAN").await, Err(BleError::NotConnected));
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let mock = Arc::new(MockTransport::new());
        let ble = channel(&mock);
        assert_eq!(ble.start_ap().await, Err(BleError::NotConnected));
        assert_eq!(ble.read_status().await, Err(BleError::NotConnected));
    }

    #[tokio::test]
    async fn test_write_command_goes_to_configure() {
        let mock = Arc::new(MockTransport::new());
        let ble = channel(&mock);
        ble.connect().await.unwrap();

        ble.trigger_sync().await.unwrap();
        let creds = WifiCredentials::new("Home", "password123")
            .unwrap()
            .with_api_url("http://api.local");
        ble.configure_wifi(&creds).await.unwrap();

        let commands = mock.commands();
        assert_eq!(commands[0], "SYNC");
        let pushed: serde_json::Value = serde_json::from_str(&commands[1]).unwrap();
        assert_eq!(pushed["ssid"], "Home");
        assert_eq!(pushed["api_url"], "http://api.local");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_waits_before_reading_networks() {
        let mock = Arc::new(MockTransport::new());
        mock.set_value(CHAR_NETWORKS_UUID, br#"["Paddock","Garage"]"#);
        let ble = channel(&mock);
        ble.connect().await.unwrap();

        let networks = ble.scan_networks().await.unwrap();
        let ssids: Vec<String> = networks.parse().unwrap();
        assert_eq!(ssids, vec!["Paddock", "Garage"]);

        let (scan_at, _) = mock.command_log()[0].clone();
        let read_at = mock.read_times(CHAR_NETWORKS_UUID)[0];
        assert!(read_at - scan_at >= Duration::from_secs(2));
        assert_eq!(mock.commands()[0], "SCAN");
    }

    #[tokio::test]
    async fn test_reads_fall_back_to_text() {
        let mock = Arc::new(MockTransport::new());
        mock.set_value(CHAR_STATUS_UUID, b"booting");
        mock.set_value(CHAR_DEVICE_INFO_UUID, br#"{"version":"1.1.0"}"#);
        let ble = channel(&mock);
        ble.connect().await.unwrap();

        assert_eq!(
            ble.read_status().await.unwrap(),
            BlePayload::Text("booting".into())
        );
        assert!(ble.read_device_info().await.unwrap().as_json().is_some());
    }

    #[tokio::test]
    async fn test_notifications_update_slot_and_callback() {
        let mock = Arc::new(MockTransport::new());
        let ble = channel(&mock);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        ble.on_status(move |payload| sink.lock().unwrap().push(payload.clone()));
        ble.connect().await.unwrap();

        mock.notify(CHAR_STATUS_UUID, br#"{"connected":true,"ip":"10.0.0.9"}"#);
        mock.notify(CHAR_STATUS_UUID, b"not json");

        // Raw text reaches the callback but does not replace the snapshot
        let latest = ble.latest_status().unwrap();
        assert_eq!(latest.ip.as_deref(), Some("10.0.0.9"));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], BlePayload::Text("not json".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_watch_is_level_triggered() {
        let mock = Arc::new(MockTransport::new());
        let ble = channel(&mock);
        ble.connect().await.unwrap();

        mock.notify(CHAR_STATUS_UUID, br#"{"ap_active":true,"ap_ssid":"Old"}"#);
        let mut watch = ble.status_watch();

        // The snapshot present at subscription time is not a match
        let result = watch
            .wait_for(|s| s.ap_ready(), Duration::from_secs(1))
            .await;
        assert_eq!(result, Err(WaitError::TimedOut));

        mock.notify(CHAR_STATUS_UUID, br#"{"ap_active":false}"#);
        mock.notify(CHAR_STATUS_UUID, br#"{"ap_active":true,"ap_ssid":"New"}"#);
        let snapshot = watch
            .wait_for(|s| s.ap_ready(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(snapshot.ap_ssid.as_deref(), Some("New"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_drop() {
        let mock = Arc::new(MockTransport::new());
        let ble = channel(&mock);
        let drops = Arc::new(AtomicUsize::new(0));
        let counter = drops.clone();
        ble.on_disconnect(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        ble.connect().await.unwrap();

        mock.drop_link();
        settle().await;
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(ble.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(ble.state(), ConnectionState::Connected);
        assert_eq!(mock.connect_times().len(), 2);
        // Discovery is not repeated
        assert_eq!(mock.request_device_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_session_is_released() {
        let mock = Arc::new(MockTransport::new());
        let ble = channel(&mock);
        ble.connect().await.unwrap();

        mock.drop_link();
        settle().await;
        assert_eq!(mock.disconnect_calls(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(ble.is_connected());
        assert_eq!(mock.disconnect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_during_reconnect_attempt_opens_no_second_session() {
        let mock = Arc::new(MockTransport::new());
        mock.slow_connects(Duration::from_secs(1));
        let ble = channel(&mock);
        ble.connect().await.unwrap();

        mock.drop_link();
        // The reconnect attempt runs from +2s to +3s after the drop
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(ble.state(), ConnectionState::Connecting);

        ble.connect().await.unwrap();
        assert!(ble.is_connected());
        assert_eq!(mock.connect_times().len(), 2);
        assert_eq!(mock.request_device_calls(), 1);
        // Only the dropped session was released
        assert_eq!(mock.disconnect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_is_bounded_and_spaced() {
        let mock = Arc::new(MockTransport::new());
        let ble = channel(&mock);
        ble.connect().await.unwrap();

        mock.fail_connects(u32::MAX);
        let dropped_at = Instant::now();
        mock.drop_link();
        tokio::time::sleep(Duration::from_secs(30)).await;

        let attempts = mock.connect_times();
        // First connect plus three retries
        assert_eq!(attempts.len(), 4);
        let mut previous = dropped_at;
        for at in &attempts[1..] {
            assert!(*at - previous >= Duration::from_secs(2));
            previous = *at;
        }
        assert_eq!(ble.reconnect_failures(), 3);
        assert_eq!(ble.state(), ConnectionState::Disconnected);

        // A new explicit connect works once the host recovers
        mock.fail_connects(0);
        ble.connect().await.unwrap();
        assert!(ble.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_policy_is_respected() {
        let mock = Arc::new(MockTransport::new());
        let config = ChannelConfig {
            reconnect: ReconnectPolicy {
                max_attempts: 1,
                delay: Duration::from_millis(500),
            },
            ..ChannelConfig::default()
        };
        let ble = ControlChannel::new(mock.clone(), config);
        ble.connect().await.unwrap();

        mock.fail_connects(u32::MAX);
        mock.drop_link();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(mock.connect_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_disconnect_does_not_reconnect() {
        let mock = Arc::new(MockTransport::new());
        let ble = channel(&mock);
        ble.connect().await.unwrap();

        ble.disconnect().await.unwrap();
        // A late host event for the closed session is ignored
        mock.drop_link();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(ble.state(), ConnectionState::Disconnected);
        assert_eq!(mock.connect_times().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_when_connected_is_noop() {
        let mock = Arc::new(MockTransport::new());
        let ble = channel(&mock);
        ble.connect().await.unwrap();
        ble.connect().await.unwrap();
        assert_eq!(mock.connect_times().len(), 1);
    }
}
