//! Continuously scan for devices until Ctrl+C
//!
//! Run with: cargo run --example continuous_scan

use futures::StreamExt;
use std::time::Duration;
use webgatt::{Bluetooth, CancellationToken, Error, EventKind, RequestDeviceOptions, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,webgatt=info")
        .init();

    let bluetooth = Bluetooth::new().await?;
    let signal = CancellationToken::new();

    let canceller = signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let _handle = bluetooth
        .events()
        .on(EventKind::AdvertisementReceived, |event| {
            println!("  advertisement from {:?}", event.device_id);
        });

    println!("Scanning... Press Ctrl+C to stop\n");
    let options = RequestDeviceOptions::new()
        .with_predicate(|record| record.name.is_some())
        .with_timeout(Duration::from_secs(3))
        .with_signal(signal);

    let mut devices = Box::pin(bluetooth.scan(options)?);
    while let Some(result) = devices.next().await {
        match result {
            Ok(device) => println!(
                "New device: {} {:?} ({:?} dBm)",
                device.id(),
                device.name(),
                device.rssi()
            ),
            Err(Error::Canceled) => println!("\nScan canceled"),
            Err(e) => {
                eprintln!("Scan failed: {}", e);
                return Err(e);
            }
        }
    }

    println!("Discovered {} devices", bluetooth.get_devices().len());
    Ok(())
}
