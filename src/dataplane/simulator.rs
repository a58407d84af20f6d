//! Logger data-plane simulator.
//!
//! Serves the burst-AP HTTP routes from an in-memory session set so the
//! client and the sync run can be exercised without hardware. Uses
//! `tiny_http` on a background thread; drop the handle to stop it.

use super::{Manifest, ManifestEntry};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Method, Request, Response, Server};

/// Port the `device-sim` binary listens on by default.
pub const DEFAULT_SIMULATOR_PORT: u16 = 8080;

/// Request failures the simulator can be told to produce (HTTP 500).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SimulatorFault {
    Manifest,
    Download(String),
    Ack(String),
}

struct StoredSession {
    id: String,
    data: Vec<u8>,
    synced: bool,
}

#[derive(Default)]
struct SimulatorState {
    sessions: Vec<StoredSession>,
    acks: Vec<String>,
    downloads: Vec<String>,
    faults: HashSet<SimulatorFault>,
}

impl SimulatorState {
    fn manifest(&self) -> Manifest {
        Manifest {
            sessions: self
                .sessions
                .iter()
                .map(|s| ManifestEntry {
                    id: s.id.clone(),
                    size: s.data.len() as u64,
                    synced: s.synced,
                })
                .collect(),
        }
    }

    fn session_mut(&mut self, id: &str) -> Option<&mut StoredSession> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }
}

type Shared = Arc<Mutex<SimulatorState>>;

fn lock(state: &Shared) -> MutexGuard<'_, SimulatorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Running simulator.
pub struct DeviceSimulator {
    addr: SocketAddr,
    state: Shared,
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl DeviceSimulator {
    /// Start serving on `bind_addr` (e.g. `0.0.0.0:8080`).
    pub fn start(bind_addr: &str) -> Result<Self, io::Error> {
        let server = Server::http(bind_addr)
            .map_err(|e| io::Error::new(io::ErrorKind::AddrInUse, format!("{}", e)))?;
        let addr = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "not an IP listener"))?;

        info!("Device simulator listening on http://{}", addr);

        let state: Shared = Arc::default();
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = {
            let state = state.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || Self::run_server(server, state, shutdown))
        };

        Ok(Self {
            addr,
            state,
            handle: Some(handle),
            shutdown,
        })
    }

    /// Start on an ephemeral localhost port.
    pub fn start_local() -> Result<Self, io::Error> {
        Self::start("127.0.0.1:0")
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://host:port` for clients.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Add or replace an unsynced session.
    pub fn add_session(&self, id: &str, data: &[u8]) {
        let mut state = lock(&self.state);
        match state.session_mut(id) {
            Some(session) => {
                session.data = data.to_vec();
                session.synced = false;
            }
            None => state.sessions.push(StoredSession {
                id: id.to_string(),
                data: data.to_vec(),
                synced: false,
            }),
        }
    }

    /// Load every `*.csv` in `dir`; the file stem becomes the session id.
    pub fn load_dir(&self, dir: &Path) -> Result<usize, io::Error> {
        let pattern = dir.join("*.csv");
        let paths = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        let mut loaded = 0;
        for path in paths.flatten() {
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let data = std::fs::read(&path)?;
            debug!("Loaded session {} ({} bytes)", id, data.len());
            self.add_session(id, &data);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Make a route fail with HTTP 500 until [`clear_faults`](Self::clear_faults).
    pub fn inject(&self, fault: SimulatorFault) {
        lock(&self.state).faults.insert(fault);
    }

    pub fn clear_faults(&self) {
        lock(&self.state).faults.clear();
    }

    /// Acknowledged ids, in order.
    pub fn acks(&self) -> Vec<String> {
        lock(&self.state).acks.clone()
    }

    /// Downloaded ids, in order.
    pub fn downloads(&self) -> Vec<String> {
        lock(&self.state).downloads.clone()
    }

    /// Current manifest.
    pub fn manifest(&self) -> Manifest {
        lock(&self.state).manifest()
    }

    fn run_server(server: Server, state: Shared, shutdown: Arc<AtomicBool>) {
        loop {
            if shutdown.load(Ordering::Acquire) {
                info!("Device simulator shutting down");
                break;
            }

            match server.recv_timeout(Duration::from_millis(100)) {
                Ok(Some(request)) => Self::handle(request, &state),
                Ok(None) => {}
                Err(e) => {
                    error!("Simulator server error: {}", e);
                    break;
                }
            }
        }
    }

    fn handle(mut request: Request, state: &Shared) {
        let path = request
            .url()
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();
        let method = request.method().clone();
        debug!("{} {}", method, path);

        // Drain the body so keep-alive connections stay usable
        let mut body = Vec::new();
        if let Err(e) = request.as_reader().read_to_end(&mut body) {
            warn!("Failed to read request body: {}", e);
        }

        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let response = match (&method, segments.as_slice()) {
            (Method::Get, ["api", "manifest"]) => Self::manifest_response(state),
            (Method::Get, ["api", "sessions", id, "download"]) => {
                Self::download_response(state, id)
            }
            (Method::Post, ["api", "sessions", id, "ack"]) => Self::ack_response(state, id, &body),
            (_, ["api", "manifest"])
            | (_, ["api", "sessions", _, "download"])
            | (_, ["api", "sessions", _, "ack"]) => text(405, "Method Not Allowed"),
            _ => text(404, "Not Found"),
        };

        if let Err(e) = request.respond(response) {
            warn!("Failed to send response: {}", e);
        }
    }

    fn manifest_response(state: &Shared) -> Response<io::Cursor<Vec<u8>>> {
        let state = lock(state);
        if state.faults.contains(&SimulatorFault::Manifest) {
            return text(500, "Internal Server Error");
        }
        match serde_json::to_vec(&state.manifest()) {
            Ok(json) => with_json_type(Response::from_data(json)),
            Err(e) => text(500, &e.to_string()),
        }
    }

    fn download_response(state: &Shared, id: &str) -> Response<io::Cursor<Vec<u8>>> {
        let mut state = lock(state);
        if state.faults.contains(&SimulatorFault::Download(id.to_string())) {
            return text(500, "Internal Server Error");
        }
        let Some(data) = state.session_mut(id).map(|s| s.data.clone()) else {
            return text(404, "Not Found");
        };
        state.downloads.push(id.to_string());
        Response::from_data(data)
    }

    fn ack_response(state: &Shared, id: &str, body: &[u8]) -> Response<io::Cursor<Vec<u8>>> {
        let mut state = lock(state);
        if state.faults.contains(&SimulatorFault::Ack(id.to_string())) {
            return text(500, "Internal Server Error");
        }

        let synced = serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("synced").and_then(|s| s.as_bool()))
            .unwrap_or(false);
        if !synced {
            return text(400, "Bad Request");
        }

        let Some(session) = state.session_mut(id) else {
            return text(404, "Not Found");
        };
        session.synced = true;
        state.acks.push(id.to_string());
        with_json_type(Response::from_data(br#"{"ok":true}"#.to_vec()))
    }

    /// Stop the server.
    ///
    /// May take up to 100ms due to the polling interval.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeviceSimulator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn with_json_type(response: Response<io::Cursor<Vec<u8>>>) -> Response<io::Cursor<Vec<u8>>> {
    match Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

fn text(status: u16, body: &str) -> Response<io::Cursor<Vec<u8>>> {
    Response::from_data(body.as_bytes().to_vec()).with_status_code(status)
}
