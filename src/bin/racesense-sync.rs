//! Racesense logger sync utility.
//!
//! Talks to a nearby logger over BLE and runs a burst sync, or issues
//! single control-channel commands.
//!
//! Usage:
//!   racesense-sync [sync]
//!   racesense-sync scan
//!   racesense-sync status
//!   racesense-sync info
//!   racesense-sync configure <ssid> <password> [api_url]
//!
//! Tunables come from `RACESENSE_*` environment variables (see
//! `racesense_sync::config`). Requires the `btleplug` feature.

const USAGE: &str = "Usage:\n  \
    racesense-sync [sync]\n  \
    racesense-sync scan\n  \
    racesense-sync status\n  \
    racesense-sync info\n  \
    racesense-sync configure <ssid> <password> [api_url]";

fn halt_with_error(msg: &str) -> ! {
    eprintln!("\n{}", msg);
    std::process::exit(1);
}

#[cfg(feature = "btleplug")]
#[tokio::main]
async fn main() {
    use log::{error, info, warn};
    use racesense_sync::ble::{BlePayload, BtleplugTransport, ControlChannel};
    use racesense_sync::config::{ChannelConfig, SyncConfig, WifiCredentials};
    use racesense_sync::dataplane::HttpDataPlane;
    use racesense_sync::storage::FsSessionStore;
    use racesense_sync::sync::SyncOrchestrator;
    use racesense_sync::wifi::host_joiner;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("sync");

    let config = match SyncConfig::from_env() {
        Ok(config) => config,
        Err(e) => halt_with_error(&format!("Error: {}", e)),
    };
    let channel_config = ChannelConfig::default();

    let transport = match BtleplugTransport::new(channel_config.scan_timeout).await {
        Ok(transport) => transport,
        Err(e) => halt_with_error(&format!("Error: BLE unavailable: {}", e)),
    };
    let ble = ControlChannel::new(Arc::new(transport), channel_config);
    ble.on_disconnect(|| warn!("Logger disconnected"));

    fn print_payload(payload: &BlePayload) {
        match payload {
            BlePayload::Json(value) => match serde_json::to_string_pretty(value) {
                Ok(pretty) => println!("{}", pretty),
                Err(_) => println!("{}", payload),
            },
            BlePayload::Text(_) => println!("{}", payload),
        }
    }

    match command {
        "sync" => {
            let cancel = CancellationToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupted, cancelling sync");
                        cancel.cancel();
                    }
                });
            }

            let orchestrator = SyncOrchestrator::new(
                ble.clone(),
                Arc::from(host_joiner(config.join_settle)),
                Arc::new(HttpDataPlane::from_config(&config)),
                Arc::new(FsSessionStore::new(config.data_dir.clone())),
                config.clone(),
            );
            orchestrator.on_progress(|event| println!("{}", event));

            let result = orchestrator.start_sync_with_cancel(cancel).await;
            if let Err(e) = ble.disconnect().await {
                warn!("BLE disconnect failed: {}", e);
            }
            match result {
                Ok(report) => {
                    info!("Sessions stored under {}", config.data_dir.display());
                    for path in &report.persisted {
                        println!("  {}", path.display());
                    }
                    if report.join_skipped {
                        warn!("WiFi join was skipped; join the logger AP manually next time");
                    }
                }
                Err(failure) => {
                    error!("{}", failure);
                    std::process::exit(1);
                }
            }
        }
        "scan" | "status" | "info" | "configure" => {
            if let Err(e) = ble.connect().await {
                halt_with_error(&format!("Error: {}", e));
            }

            let result = match command {
                "scan" => ble.scan_networks().await.map(|p| print_payload(&p)),
                "status" => ble.read_status().await.map(|p| print_payload(&p)),
                "info" => ble.read_device_info().await.map(|p| print_payload(&p)),
                _ => {
                    let (Some(ssid), Some(password)) = (args.get(1), args.get(2)) else {
                        halt_with_error(USAGE);
                    };
                    let credentials = match WifiCredentials::new(ssid.as_str(), password.as_str())
                    {
                        Ok(c) => match args.get(3) {
                            Some(url) => c.with_api_url(url.as_str()),
                            None => c,
                        },
                        Err(e) => halt_with_error(&format!("Error: {}", e)),
                    };
                    ble.configure_wifi(&credentials).await.map(|()| {
                        println!("Sent credentials for {}", credentials.ssid);
                    })
                }
            };

            if let Err(e) = ble.disconnect().await {
                warn!("BLE disconnect failed: {}", e);
            }
            if let Err(e) = result {
                halt_with_error(&format!("Error: {}", e));
            }
        }
        _ => halt_with_error(USAGE),
    }
}

#[cfg(not(feature = "btleplug"))]
fn main() {
    halt_with_error(&format!(
        "racesense-sync needs a BLE central; rebuild with --features btleplug\n\n{}",
        USAGE
    ));
}
