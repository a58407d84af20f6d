//! Burst-sync state machine.
//!
//! One run is a strictly sequential flow; every I/O step is raced against
//! the caller's cancellation token and, once BLE is up, against the link
//! dropping. Only one run may be active per orchestrator.

use super::{ProgressEvent, SyncError, SyncFailure, SyncPhase};
use crate::ble::{ConnectionState, ControlChannel, WaitError};
use crate::config::SyncConfig;
use crate::dataplane::{DataPlane, ManifestEntry};
use crate::storage::{session_path, SessionStore};
use crate::wifi::{JoinError, WifiJoiner};
use log::{error, info, warn};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Receives every progress event.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Sessions downloaded, persisted and acknowledged.
    pub processed: usize,
    /// Where each processed session was written, in manifest order.
    pub persisted: Vec<PathBuf>,
    /// `STOP_AP` was accepted by the device.
    pub ap_stopped: bool,
    /// The host could not join the AP itself and skipped the join.
    pub join_skipped: bool,
}

/// Run-local state.
struct SyncRun {
    phase: SyncPhase,
    report: SyncReport,
}

/// Releases the single-run flag on drop.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Resolves once the BLE link leaves `Connected`. Never resolves for `None`.
async fn link_lost(link: Option<&mut watch::Receiver<ConnectionState>>) {
    let Some(rx) = link else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() != ConnectionState::Connected {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// Run `step` unless cancellation or link loss wins first.
async fn guarded<T, E, F>(
    cancel: &CancellationToken,
    link: Option<&mut watch::Receiver<ConnectionState>>,
    step: F,
) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<SyncError>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        _ = link_lost(link) => Err(SyncError::Disconnected),
        result = step => result.map_err(Into::into),
    }
}

/// Sequences one burst sync over the BLE control channel and the data plane.
pub struct SyncOrchestrator {
    ble: ControlChannel,
    joiner: Arc<dyn WifiJoiner>,
    data: Arc<dyn DataPlane>,
    store: Arc<dyn SessionStore>,
    config: SyncConfig,
    running: AtomicBool,
    progress: Mutex<Option<ProgressCallback>>,
}

impl SyncOrchestrator {
    pub fn new(
        ble: ControlChannel,
        joiner: Arc<dyn WifiJoiner>,
        data: Arc<dyn DataPlane>,
        store: Arc<dyn SessionStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            ble,
            joiner,
            data,
            store,
            config,
            running: AtomicBool::new(false),
            progress: Mutex::new(None),
        }
    }

    /// Register the progress callback, replacing any previous one.
    pub fn on_progress<F>(&self, f: F)
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(f));
    }

    /// A run is in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn control_channel(&self) -> &ControlChannel {
        &self.ble
    }

    /// Run a full sync.
    pub async fn start_sync(&self) -> Result<SyncReport, SyncFailure> {
        self.start_sync_with_cancel(CancellationToken::new()).await
    }

    /// Run a full sync that ends with [`SyncError::Cancelled`] once `cancel`
    /// fires.
    ///
    /// A trigger while another run is active fails with
    /// [`SyncError::AlreadyRunning`] and emits nothing.
    pub async fn start_sync_with_cancel(
        &self,
        cancel: CancellationToken,
    ) -> Result<SyncReport, SyncFailure> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            warn!("Sync requested while another run is active");
            return Err(SyncFailure {
                phase: SyncPhase::Idle,
                error: SyncError::AlreadyRunning,
            });
        };

        let mut run = SyncRun {
            phase: SyncPhase::Idle,
            report: SyncReport::default(),
        };

        match self.execute(&mut run, &cancel).await {
            Ok(()) => {
                let report = run.report;
                let details = format!("Synced {} session(s)", report.processed);
                info!("{}", details);
                self.emit(SyncPhase::Complete, details);
                Ok(report)
            }
            Err(error) => {
                let failure = SyncFailure {
                    phase: run.phase,
                    error,
                };
                error!("Sync failed: {}", failure);
                self.emit(SyncPhase::Error, failure.to_string());
                Err(failure)
            }
        }
    }

    fn emit(&self, phase: SyncPhase, details: String) {
        let Some(step) = phase.step() else {
            return;
        };
        let callback = self
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(&ProgressEvent { step, details });
        }
    }

    fn enter(&self, run: &mut SyncRun, phase: SyncPhase, details: impl Into<String>) {
        run.phase = phase;
        let details = details.into();
        info!("{}: {}", phase, details);
        self.emit(phase, details);
    }

    async fn execute(&self, run: &mut SyncRun, cancel: &CancellationToken) -> Result<(), SyncError> {
        self.enter(run, SyncPhase::BleConnecting, "Connecting to logger");
        let device = guarded(cancel, None, self.ble.connect()).await?;
        info!("Control channel up: {}", device);
        let mut link = self.ble.state_watch();

        self.enter(run, SyncPhase::StartingAp, "Requesting burst access point");
        // Only snapshots that arrive after START_AP count
        let mut status = self.ble.status_watch();
        status.mark_seen();
        guarded(cancel, Some(&mut link), self.ble.start_ap()).await?;

        self.enter(run, SyncPhase::WaitingApReady, "Waiting for access point");
        let timeout = self.config.ap_ready_timeout;
        let snapshot = guarded(cancel, Some(&mut link), async {
            status
                .wait_for(|s| s.ap_ready(), timeout)
                .await
                .map_err(|e| match e {
                    WaitError::TimedOut => SyncError::ApReadyTimeout(timeout),
                    WaitError::Closed => SyncError::Disconnected,
                })
        })
        .await?;
        let ap = snapshot
            .access_point(&self.config.fallback_ap_password)
            .ok_or(SyncError::ApReadyTimeout(timeout))?;

        self.enter(run, SyncPhase::JoiningWifi, format!("Joining {}", ap.ssid));
        match guarded(cancel, Some(&mut link), self.joiner.join(&ap)).await {
            Ok(()) => {}
            Err(SyncError::Join(JoinError::CapabilityUnavailable)) => {
                warn!("Host cannot join WiFi; join {} manually", ap.ssid);
                run.report.join_skipped = true;
            }
            Err(e) => return Err(e),
        }
        drop(ap);

        self.enter(run, SyncPhase::FetchingManifest, "Fetching session list");
        let manifest = guarded(cancel, Some(&mut link), self.data.fetch_manifest()).await?;
        let pending: Vec<ManifestEntry> = manifest.pending().cloned().collect();
        info!(
            "Manifest lists {} session(s), {} pending",
            manifest.sessions.len(),
            pending.len()
        );

        if pending.is_empty() {
            self.enter(run, SyncPhase::Downloading, "No new sessions");
        }
        let total = pending.len();
        for (index, entry) in pending.iter().enumerate() {
            self.enter(
                run,
                SyncPhase::Downloading,
                format!("Session {} ({}/{})", entry.id, index + 1, total),
            );
            let relative = session_path(&entry.id)?;
            let bytes =
                guarded(cancel, Some(&mut link), self.data.download_entry(&entry.id)).await?;
            let path = guarded(
                cancel,
                Some(&mut link),
                self.store.persist(&relative, &bytes),
            )
            .await?;
            // Ack strictly after the payload is on disk
            guarded(cancel, Some(&mut link), self.data.ack_entry(&entry.id)).await?;

            run.report.persisted.push(path);
            run.report.processed += 1;
        }

        self.enter(run, SyncPhase::ApStopping, "Stopping access point");
        match guarded(cancel, None, self.ble.stop_ap()).await {
            Ok(()) => run.report.ap_stopped = true,
            Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
            Err(e) => warn!("STOP_AP failed, device will time out its AP: {}", e),
        }

        Ok(())
    }
}
