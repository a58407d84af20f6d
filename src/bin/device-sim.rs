//! Racesense logger data-plane simulator.
//!
//! Serves `*.csv` files from a directory the way a logger does on its burst
//! AP, so `racesense-sync` and HTTP clients can be tried without hardware.
//!
//! Usage:
//!   device-sim <sessions_dir> [port]
//!
//! Point the sync tool at it with `RACESENSE_DEVICE_IP=127.0.0.1` and
//! `RACESENSE_DEVICE_PORT=8080`.

use log::{error, info};
use racesense_sync::dataplane::{DeviceSimulator, DEFAULT_SIMULATOR_PORT};
use std::path::PathBuf;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let Some(dir) = args.next().map(PathBuf::from) else {
        eprintln!("Usage: device-sim <sessions_dir> [port]");
        std::process::exit(1);
    };
    let port = match args.next().map(|p| p.parse::<u16>()) {
        None => DEFAULT_SIMULATOR_PORT,
        Some(Ok(port)) => port,
        Some(Err(e)) => {
            eprintln!("Invalid port: {}", e);
            std::process::exit(1);
        }
    };

    let simulator = match DeviceSimulator::start(&format!("0.0.0.0:{}", port)) {
        Ok(simulator) => simulator,
        Err(e) => {
            error!("Failed to start simulator: {}", e);
            std::process::exit(1);
        }
    };

    match simulator.load_dir(&dir) {
        Ok(count) => info!("Serving {} session(s) from {}", count, dir.display()),
        Err(e) => {
            error!("Failed to load {}: {}", dir.display(), e);
            std::process::exit(1);
        }
    }
    info!("Manifest at {}/api/manifest (Ctrl+C to exit)", simulator.base_url());

    loop {
        std::thread::park();
    }
}
