//! NetworkManager-backed joiner.

use super::{JoinError, WifiJoiner};
use crate::ble::AccessPoint;
use async_trait::async_trait;
use log::{debug, info};
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use zeroize::Zeroizing;

/// NetworkManager CLI binary.
pub const NMCLI_PROGRAM: &str = "nmcli";

/// Joins networks with `nmcli device wifi connect`.
#[derive(Debug, Clone)]
pub struct NmcliJoiner {
    program: PathBuf,
    settle: Duration,
}

impl NmcliJoiner {
    /// Joiner that waits `settle` after a successful join for DHCP.
    pub fn new(settle: Duration) -> Self {
        Self::with_program(NMCLI_PROGRAM, settle)
    }

    /// Joiner using a specific binary.
    pub fn with_program(program: impl Into<PathBuf>, settle: Duration) -> Self {
        Self {
            program: program.into(),
            settle,
        }
    }

    /// Find `nmcli` on `PATH`.
    pub fn detect(settle: Duration) -> Option<Self> {
        let paths = std::env::var_os("PATH")?;
        std::env::split_paths(&paths)
            .map(|dir| dir.join(NMCLI_PROGRAM))
            .find(|candidate| candidate.is_file())
            .map(|program| Self::with_program(program, settle))
    }

    /// Arguments for joining `ap`. The password never goes on the command
    /// line; secured networks use `--ask` and read it from stdin.
    fn args(ap: &AccessPoint) -> Vec<&str> {
        let mut args = Vec::with_capacity(5);
        if !ap.password.is_empty() {
            args.push("--ask");
        }
        args.extend(["device", "wifi", "connect", ap.ssid.as_str()]);
        args
    }

    async fn run(&self, ap: &AccessPoint) -> io::Result<Output> {
        let mut command = Command::new(&self.program);
        command
            .args(Self::args(ap))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if ap.password.is_empty() {
            return command.stdin(Stdio::null()).output().await;
        }

        let mut child = command.stdin(Stdio::piped()).spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            let mut line = Zeroizing::new(Vec::with_capacity(ap.password.len() + 1));
            line.extend_from_slice(ap.password.as_bytes());
            line.push(b'\n');
            // The child may exit without reading; its status says why
            if let Err(e) = stdin.write_all(&line).await {
                debug!("Writing password to {} failed: {}", self.program.display(), e);
            }
        }
        child.wait_with_output().await
    }
}

#[async_trait]
impl WifiJoiner for NmcliJoiner {
    async fn join(&self, ap: &AccessPoint) -> Result<(), JoinError> {
        info!("Joining WiFi network {}", ap.ssid);
        let output = self.run(ap).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => JoinError::CapabilityUnavailable,
            _ => JoinError::JoinFailed(e.to_string()),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let reason = if stderr.is_empty() {
                format!("{} exited with {}", self.program.display(), output.status)
            } else {
                stderr
            };
            return Err(JoinError::JoinFailed(reason));
        }

        debug!("Waiting {:?} for an address", self.settle);
        tokio::time::sleep(self.settle).await;
        info!("Joined {}", ap.ssid);
        Ok(())
    }
}
